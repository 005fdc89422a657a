//! LIFX LAN backend — UDP broadcast discovery and per-light connections.
//!
//! Message encoding is delegated to `lifx-core`. Replies are matched to
//! requests by sequence number; anything else on the socket is dropped.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use lifx_core::{BuildOptions, Message, PowerLevel, RawMessage, Service};

use crate::device::{Color, DeviceHandle, Dialer, LightConnection, LightError, Power, Result};
use crate::discovery::{CancelToken, DiscoverySource};

/// UDP port LIFX devices listen on.
pub const LIFX_PORT: u16 = 56700;

/// How often discovery repeats its broadcast within one window.
const REBROADCAST_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on a single blocking receive during discovery, so that
/// cancellation is noticed quickly.
const POLL_SLICE: Duration = Duration::from_millis(50);

const RECV_BUF: usize = 1024;

/// Client identifier placed in every header. Devices echo it back;
/// 0 would ask them to broadcast replies.
fn source_id() -> u32 {
    std::process::id().max(2)
}

fn encode(message: Message, options: &BuildOptions) -> Result<Vec<u8>> {
    let raw = RawMessage::build(options, message)?;
    Ok(raw.pack()?)
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// `StatePower` reports a raw level: 0 is off, anything else is on.
fn power_from_level(level: u16) -> Power {
    if level == 0 { Power::Off } else { Power::On }
}

impl From<Power> for PowerLevel {
    fn from(power: Power) -> Self {
        match power {
            Power::On => PowerLevel::Enabled,
            Power::Off => PowerLevel::Standby,
        }
    }
}

/// Transition duration in the protocol's millisecond field.
fn transition_ms(transition: Duration) -> u32 {
    u32::try_from(transition.as_millis()).unwrap_or(u32::MAX)
}

// ── Discovery ──

/// Broadcasts `GetService` and reports every light that answers.
#[derive(Debug, Clone)]
pub struct LanDiscovery {
    broadcast: SocketAddr,
}

impl Default for LanDiscovery {
    fn default() -> Self {
        Self::new(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::BROADCAST,
            LIFX_PORT,
        )))
    }
}

impl LanDiscovery {
    pub fn new(broadcast: SocketAddr) -> Self {
        Self { broadcast }
    }
}

impl DiscoverySource for LanDiscovery {
    fn scan(
        &self,
        window: Duration,
        cancel: &CancelToken,
        found: &Sender<DeviceHandle>,
    ) -> Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        let options = BuildOptions {
            res_required: true,
            source: source_id(),
            ..Default::default()
        };
        let packet = encode(Message::GetService, &options)?;

        let ends = Instant::now() + window;
        let mut last_broadcast: Option<Instant> = None;
        let mut seen = HashSet::new();
        let mut buf = [0u8; RECV_BUF];

        while !cancel.is_cancelled() {
            let now = Instant::now();
            if now >= ends {
                break;
            }
            if last_broadcast.is_none_or(|t| now.duration_since(t) >= REBROADCAST_INTERVAL) {
                socket.send_to(&packet, self.broadcast)?;
                last_broadcast = Some(now);
            }
            socket.set_read_timeout(Some((ends - now).min(POLL_SLICE)))?;
            let (n, from) = match socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            let Ok(raw) = RawMessage::unpack(&buf[..n]) else {
                continue;
            };
            let target = raw.frame_addr.target;
            if let Ok(Message::StateService {
                port,
                service: Service::UDP,
            }) = Message::from_raw(&raw)
            {
                let Ok(port) = u16::try_from(port) else {
                    continue;
                };
                if target == 0 || !seen.insert(target) {
                    continue;
                }
                let handle = DeviceHandle {
                    target,
                    addr: SocketAddr::new(from.ip(), port),
                };
                log::debug!("StateService from {handle}");
                if found.send(handle).is_err() {
                    break;
                }
            }
        }
        Ok(())
    }
}

// ── Connection ──

/// Connected UDP socket to one light.
#[derive(Debug)]
pub struct LanConnection {
    handle: DeviceHandle,
    socket: UdpSocket,
    source: u32,
    sequence: u8,
}

impl LanConnection {
    pub fn dial(handle: &DeviceHandle) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .map_err(|e| LightError::DialFailed(format!("bind: {e}")))?;
        socket
            .connect(handle.addr)
            .map_err(|e| LightError::DialFailed(format!("connect {}: {e}", handle.addr)))?;
        Ok(Self {
            handle: handle.clone(),
            socket,
            source: source_id(),
            sequence: 0,
        })
    }

    /// Send `message` and wait for the first reply `accept` maps to a value.
    ///
    /// Acknowledged requests (`ack = true`) wait for `Acknowledgement`;
    /// others ask the device for a state reply.
    fn request<T>(
        &mut self,
        message: Message,
        ack: bool,
        timeout: Duration,
        accept: impl Fn(Message) -> Option<T>,
    ) -> Result<T> {
        self.sequence = self.sequence.wrapping_add(1);
        let sequence = self.sequence;
        let options = BuildOptions {
            target: Some(self.handle.target),
            ack_required: ack,
            res_required: !ack,
            sequence,
            source: self.source,
        };
        let packet = encode(message, &options)?;
        let ends = Instant::now() + timeout;
        self.socket.send(&packet)?;

        let mut buf = [0u8; RECV_BUF];
        loop {
            let remaining = ends.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LightError::Timeout);
            }
            self.socket.set_read_timeout(Some(remaining))?;
            let n = match self.socket.recv(&mut buf) {
                Ok(n) => n,
                Err(e) if is_timeout(&e) => return Err(LightError::Timeout),
                Err(e) => return Err(e.into()),
            };
            let raw = match RawMessage::unpack(&buf[..n]) {
                Ok(raw) => raw,
                Err(e) => {
                    log::debug!("{}: dropping undecodable reply: {e}", self.handle);
                    continue;
                }
            };
            // stale reply to an earlier attempt
            if raw.frame_addr.sequence != sequence {
                continue;
            }
            match Message::from_raw(&raw) {
                Ok(reply) => {
                    if let Some(value) = accept(reply) {
                        return Ok(value);
                    }
                }
                Err(e) => log::debug!("{}: unparsed reply: {e}", self.handle),
            }
        }
    }
}

impl LightConnection for LanConnection {
    fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    fn get_color(&mut self, timeout: Duration) -> Result<Color> {
        self.request(Message::LightGet, false, timeout, |reply| match reply {
            Message::LightState { color, .. } => Some(Color::from(color)),
            _ => None,
        })
    }

    fn set_color(&mut self, color: Color, transition: Duration, timeout: Duration) -> Result<()> {
        let message = Message::LightSetColor {
            reserved: 0,
            color: color.into(),
            duration: transition_ms(transition),
        };
        self.request(message, true, timeout, |reply| {
            matches!(reply, Message::Acknowledgement { .. }).then_some(())
        })
    }

    fn get_power(&mut self, timeout: Duration) -> Result<Power> {
        self.request(Message::GetPower, false, timeout, |reply| match reply {
            Message::StatePower { level } => Some(power_from_level(level)),
            _ => None,
        })
    }

    fn set_power(&mut self, power: Power, timeout: Duration) -> Result<()> {
        let message = Message::SetPower {
            level: power.into(),
        };
        self.request(message, true, timeout, |reply| {
            matches!(reply, Message::Acknowledgement { .. }).then_some(())
        })
    }
}

/// Dials [`LanConnection`]s.
#[derive(Debug, Clone, Default)]
pub struct LanDialer;

impl Dialer for LanDialer {
    type Connection = LanConnection;

    fn dial(&self, handle: &DeviceHandle) -> Result<LanConnection> {
        LanConnection::dial(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::handle;

    #[test]
    fn power_level_mapping() {
        assert_eq!(power_from_level(0), Power::Off);
        assert_eq!(power_from_level(65535), Power::On);
        assert_eq!(power_from_level(32768), Power::On);
        assert!(matches!(PowerLevel::from(Power::On), PowerLevel::Enabled));
        assert!(matches!(PowerLevel::from(Power::Off), PowerLevel::Standby));
    }

    #[test]
    fn transition_saturates() {
        assert_eq!(transition_ms(Duration::from_millis(75)), 75);
        assert_eq!(transition_ms(Duration::MAX), u32::MAX);
    }

    #[test]
    fn default_broadcast_address() {
        let d = LanDiscovery::default();
        assert_eq!(d.broadcast.to_string(), "255.255.255.255:56700");
    }

    #[test]
    fn silent_light_times_out() {
        // A bound socket that never answers.
        let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let h = DeviceHandle {
            target: handle(1).target,
            addr: silent.local_addr().unwrap(),
        };
        let mut conn = LanConnection::dial(&h).unwrap();
        let start = Instant::now();
        let err = conn.get_color(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, LightError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    /// Answer one `GetPower` from a loopback light: `before` replies with a
    /// stale sequence number, then the real reply at `level`.
    fn loopback_power(level: u16, before: &[u16]) -> Power {
        let light = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let h = DeviceHandle {
            target: handle(1).target,
            addr: light.local_addr().unwrap(),
        };
        let before = before.to_vec();
        let responder = std::thread::spawn(move || {
            let mut buf = [0u8; RECV_BUF];
            let (n, from) = light.recv_from(&mut buf).unwrap();
            let request = RawMessage::unpack(&buf[..n]).unwrap();
            let reply = |sequence: u8, level: u16| {
                let options = BuildOptions {
                    target: Some(request.frame_addr.target),
                    sequence,
                    ..Default::default()
                };
                encode(Message::StatePower { level }, &options).unwrap()
            };
            let stale = request.frame_addr.sequence.wrapping_sub(1);
            for l in before {
                light.send_to(&reply(stale, l), from).unwrap();
            }
            light
                .send_to(&reply(request.frame_addr.sequence, level), from)
                .unwrap();
        });

        let mut conn = LanConnection::dial(&h).unwrap();
        let power = conn.get_power(Duration::from_secs(2)).unwrap();
        responder.join().unwrap();
        power
    }

    #[test]
    fn get_power_reads_reply_with_matching_sequence() {
        assert_eq!(loopback_power(0, &[65535]), Power::Off);
        assert_eq!(loopback_power(65535, &[0]), Power::On);
    }

    #[test]
    fn get_power_treats_partial_level_as_on() {
        assert_eq!(loopback_power(32768, &[]), Power::On);
    }
}
