//! Light device model — handles, color/power values, the transport trait.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;

// ── Error type ──

/// Light communication errors.
///
/// String payloads follow the convention **"context: details"**, as in
/// `"bind: address in use"`.
#[derive(Debug)]
pub enum LightError {
    /// No reply arrived before the attempt's deadline.
    Timeout,
    /// Socket-level failure (reset, unreachable, ...).
    Io(std::io::Error),
    /// A message could not be encoded or the reply made no sense.
    Protocol(String),
    /// Discovery exhausted its attempts without a single reply.
    NotFound { attempts: u32 },
    /// The transport could not be opened or the device did not answer the
    /// initial probe.
    DialFailed(String),
    /// Retrying ran out of deadline budget. `deadline` is the last
    /// per-attempt deadline used.
    DeadlineExceeded {
        deadline: Duration,
        last: Box<LightError>,
    },
    /// Cloud API request failed.
    Http(String),
}

impl LightError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LightError::Timeout | LightError::Io(_))
    }

    /// Whether the session that produced this error must be rebuilt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LightError::NotFound { .. }
                | LightError::DialFailed(_)
                | LightError::DeadlineExceeded { .. }
        )
    }
}

impl fmt::Display for LightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LightError::Timeout => write!(f, "Light did not answer in time"),
            LightError::Io(e) => write!(f, "Network error: {e}"),
            LightError::Protocol(e) => write!(f, "Protocol error: {e}"),
            LightError::NotFound { attempts } => {
                write!(f, "No light found after {attempts} discovery attempts")
            }
            LightError::DialFailed(e) => write!(f, "Failed to connect to light: {e}"),
            LightError::DeadlineExceeded { deadline, last } => {
                write!(f, "Gave up at {deadline:?} deadline: {last}")
            }
            LightError::Http(e) => write!(f, "Cloud request failed: {e}"),
        }
    }
}

impl std::error::Error for LightError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LightError::Io(e) => Some(e),
            LightError::DeadlineExceeded { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LightError {
    fn from(e: std::io::Error) -> Self {
        LightError::Io(e)
    }
}

impl From<lifx_core::Error> for LightError {
    fn from(e: lifx_core::Error) -> Self {
        LightError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LightError>;

// ── Values ──

pub const MAX_BRIGHTNESS: u16 = u16::MAX;

/// Addressable light found by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceHandle {
    /// Device target id (the MAC address packed into the low six bytes).
    pub target: u64,
    /// Address the device accepts commands on.
    pub addr: SocketAddr,
}

impl DeviceHandle {
    /// The target id formatted as a MAC address, e.g. `d0:73:d5:01:02:03`.
    pub fn mac(&self) -> String {
        let b = self.target.to_le_bytes();
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.mac(), self.addr)
    }
}

/// HSBK color as the device reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Color {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hue {} sat {} bri {} ({:.0}%) {}K",
            self.hue,
            self.saturation,
            self.brightness,
            f64::from(self.brightness) * 100.0 / f64::from(MAX_BRIGHTNESS),
            self.kelvin
        )
    }
}

impl From<lifx_core::HSBK> for Color {
    fn from(c: lifx_core::HSBK) -> Self {
        Color {
            hue: c.hue,
            saturation: c.saturation,
            brightness: c.brightness,
            kelvin: c.kelvin,
        }
    }
}

impl From<Color> for lifx_core::HSBK {
    fn from(c: Color) -> Self {
        lifx_core::HSBK {
            hue: c.hue,
            saturation: c.saturation,
            brightness: c.brightness,
            kelvin: c.kelvin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    On,
    Off,
}

impl Power {
    pub fn opposite(self) -> Self {
        match self {
            Power::On => Power::Off,
            Power::Off => Power::On,
        }
    }
}

impl fmt::Display for Power {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Power::On => write!(f, "on"),
            Power::Off => write!(f, "off"),
        }
    }
}

impl std::str::FromStr for Power {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(Power::On),
            "off" => Ok(Power::Off),
            other => Err(format!("unknown power state: {other}")),
        }
    }
}

// ── Traits ──

/// A live connection to one light.
///
/// Each call is a single attempt bounded by `timeout`; retrying is the
/// caller's business (see [`crate::backoff`]). A connection may go stale
/// without notice and only report it on the next call.
pub trait LightConnection {
    fn handle(&self) -> &DeviceHandle;
    fn get_color(&mut self, timeout: Duration) -> Result<Color>;
    /// Set the color, fading over `transition` on the device side.
    fn set_color(&mut self, color: Color, transition: Duration, timeout: Duration) -> Result<()>;
    fn get_power(&mut self, timeout: Duration) -> Result<Power>;
    fn set_power(&mut self, power: Power, timeout: Duration) -> Result<()>;
}

/// Opens connections to discovered lights.
pub trait Dialer {
    type Connection: LightConnection;
    fn dial(&self, handle: &DeviceHandle) -> Result<Self::Connection>;
}

// ── Mock device for testing ──

/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr};

    /// Recorded transport call.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        GetColor,
        SetColor(Color, Duration),
        GetPower,
        SetPower(Power),
    }

    /// Handle on a private address, distinguished by `n`.
    pub fn handle(n: u8) -> DeviceHandle {
        DeviceHandle {
            target: 0x0000_0002_03d5_73d0 | (u64::from(n) << 40),
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, n)), 56700),
        }
    }

    /// In-memory light. Holds color and power; every call is recorded
    /// with the timeout it was given. Queued failures are returned (one
    /// per call) before the state is touched.
    #[derive(Debug)]
    pub struct MockLight {
        handle: DeviceHandle,
        pub color: Color,
        pub power: Power,
        pub calls: Vec<Call>,
        /// Timeout passed to each call, in call order.
        pub timeouts: Vec<Duration>,
        /// Errors returned by the next calls, front first.
        pub failures: VecDeque<LightError>,
    }

    impl MockLight {
        pub fn new(handle: DeviceHandle) -> Self {
            MockLight {
                handle,
                color: Color {
                    hue: 0,
                    saturation: 0,
                    brightness: 32768,
                    kelvin: 3500,
                },
                power: Power::On,
                calls: Vec::new(),
                timeouts: Vec::new(),
                failures: VecDeque::new(),
            }
        }

        /// Make the next `count` calls time out.
        pub fn fail_next(&mut self, count: usize) {
            for _ in 0..count {
                self.failures.push_back(LightError::Timeout);
            }
        }

        pub fn count(&self, call: fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| call(c)).count()
        }

        fn record(&mut self, call: Call, timeout: Duration) -> Result<()> {
            self.calls.push(call);
            self.timeouts.push(timeout);
            match self.failures.pop_front() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    impl LightConnection for MockLight {
        fn handle(&self) -> &DeviceHandle {
            &self.handle
        }

        fn get_color(&mut self, timeout: Duration) -> Result<Color> {
            self.record(Call::GetColor, timeout)?;
            Ok(self.color)
        }

        fn set_color(&mut self, color: Color, transition: Duration, timeout: Duration) -> Result<()> {
            self.record(Call::SetColor(color, transition), timeout)?;
            self.color = color;
            Ok(())
        }

        fn get_power(&mut self, timeout: Duration) -> Result<Power> {
            self.record(Call::GetPower, timeout)?;
            Ok(self.power)
        }

        fn set_power(&mut self, power: Power, timeout: Duration) -> Result<()> {
            self.record(Call::SetPower(power), timeout)?;
            self.power = power;
            Ok(())
        }
    }

    /// Dialer producing [`MockLight`]s. Addresses listed in `refuse` fail
    /// to dial.
    #[derive(Default)]
    pub struct MockDialer {
        pub refuse: Vec<SocketAddr>,
    }

    impl Dialer for MockDialer {
        type Connection = MockLight;

        fn dial(&self, handle: &DeviceHandle) -> Result<MockLight> {
            if self.refuse.contains(&handle.addr) {
                return Err(LightError::DialFailed(format!(
                    "mock: {} refused",
                    handle.addr
                )));
            }
            Ok(MockLight::new(handle.clone()))
        }
    }
}
