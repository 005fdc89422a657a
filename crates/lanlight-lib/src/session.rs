//! Device session — one connected light, its retry policy, and color cache.
//!
//! Every primitive goes through [`Backoff`]. A primitive that exhausts its
//! deadline budget returns a fatal error; the session does not redial on its
//! own, the supervisor rebuilds it from discovery.

use std::time::Duration;

use crate::backoff::{Backoff, BackoffConfig, Outcome};
use crate::device::{
    Color, DeviceHandle, Dialer, LightConnection, LightError, MAX_BRIGHTNESS, Power, Result,
};

/// Device-defined color temperature bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KelvinRange {
    pub min: u16,
    pub max: u16,
}

impl Default for KelvinRange {
    fn default() -> Self {
        Self {
            min: 1500,
            max: 9000,
        }
    }
}

impl KelvinRange {
    pub fn clamp(&self, kelvin: u16) -> u16 {
        kelvin.clamp(self.min, self.max)
    }

    /// Map a fraction in `[0, 1]` onto the range. Out-of-range and NaN
    /// fractions are clamped first.
    pub fn at(&self, fraction: f32) -> u16 {
        level_at(fraction, self.min, self.max)
    }
}

/// Which way an adjustment moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Clamp a fraction to `[0, 1]`, mapping NaN to 0.
pub fn clamp_fraction(fraction: f32) -> f32 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Linear map of a clamped fraction onto `[min, max]`. The endpoints map
/// exactly.
pub fn level_at(fraction: f32, min: u16, max: u16) -> u16 {
    let f = f64::from(clamp_fraction(fraction));
    let span = f64::from(max.saturating_sub(min));
    min.saturating_add((f * span).round() as u16).min(max)
}

/// Move `value` one `step` in `direction`, staying inside `[min, max]`.
pub fn step(value: u16, step: u16, direction: Direction, min: u16, max: u16) -> u16 {
    let moved = match direction {
        Direction::Up => value.saturating_add(step),
        Direction::Down => value.saturating_sub(step),
    };
    moved.clamp(min, max)
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for the first attempt of each primitive.
    pub initial_deadline: Duration,
    pub backoff: BackoffConfig,
    /// Fade duration for derived color changes.
    pub transition: Duration,
    pub brightness_step: u16,
    pub kelvin_step: u16,
    pub kelvin: KelvinRange,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_deadline: Duration::from_millis(250),
            backoff: BackoffConfig::default(),
            transition: Duration::from_millis(75),
            brightness_step: 2185, // 1/30 of the range
            kelvin_step: 250,
            kelvin: KelvinRange::default(),
        }
    }
}

/// A controllable light.
#[derive(Debug)]
pub struct Session<C> {
    connection: C,
    backoff: Backoff,
    config: SessionConfig,
    cached: Option<Color>,
}

impl<C: LightConnection> Session<C> {
    /// Dial `handle` and confirm it answers a color read.
    ///
    /// Any failure is reported as [`LightError::DialFailed`].
    pub fn connect<D>(handle: &DeviceHandle, dialer: &D, config: SessionConfig) -> Result<Self>
    where
        D: Dialer<Connection = C>,
    {
        let connection = dialer.dial(handle)?;
        let mut session = Self::new(connection, config);
        let deadline = session.config.initial_deadline;
        session.get_color(deadline, false).map_err(|e| {
            LightError::DialFailed(format!("{handle} did not answer: {e}"))
        })?;
        log::info!("connected to {handle}");
        Ok(session)
    }

    /// Wrap an already open connection.
    pub fn new(connection: C, config: SessionConfig) -> Self {
        Self {
            backoff: Backoff::new(config.backoff.clone()),
            connection,
            config,
            cached: None,
        }
    }

    pub fn handle(&self) -> &DeviceHandle {
        self.connection.handle()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Default deadline for the first attempt of a primitive.
    pub fn deadline(&self) -> Duration {
        self.config.initial_deadline
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// Last color successfully written, if any.
    pub fn cached_color(&self) -> Option<Color> {
        self.cached
    }

    fn finish<T>(&self, op: &str, outcome: Outcome<T>) -> T {
        if outcome.is_recovered() {
            log::info!(
                "{}: {op} recovered after {} failed attempt(s)",
                self.connection.handle(),
                outcome.failures()
            );
        }
        outcome.into_value()
    }

    // ── Primitives ──

    /// Read the color. With `use_cache`, a cached color is returned without
    /// touching the network.
    pub fn get_color(&mut self, deadline: Duration, use_cache: bool) -> Result<Color> {
        if use_cache && let Some(color) = self.cached {
            return Ok(color);
        }
        let conn = &mut self.connection;
        let outcome = self.backoff.run(deadline, |d| conn.get_color(d))?;
        Ok(self.finish("get_color", outcome))
    }

    /// Write the color, fading over `transition`. The cache is updated
    /// only when the write succeeds.
    pub fn set_color(&mut self, color: Color, deadline: Duration, transition: Duration) -> Result<()> {
        let conn = &mut self.connection;
        let outcome = self
            .backoff
            .run(deadline, |d| conn.set_color(color, transition, d))?;
        self.finish("set_color", outcome);
        self.cached = Some(color);
        Ok(())
    }

    pub fn get_power(&mut self, deadline: Duration) -> Result<Power> {
        let conn = &mut self.connection;
        let outcome = self.backoff.run(deadline, |d| conn.get_power(d))?;
        Ok(self.finish("get_power", outcome))
    }

    pub fn set_power(&mut self, power: Power, deadline: Duration) -> Result<()> {
        let conn = &mut self.connection;
        let outcome = self.backoff.run(deadline, |d| conn.set_power(power, d))?;
        self.finish("set_power", outcome);
        Ok(())
    }

    // ── Derived operations ──

    fn update_color(&mut self, use_cache: bool, change: impl FnOnce(&mut Color)) -> Result<Color> {
        let deadline = self.deadline();
        let mut color = self.get_color(deadline, use_cache)?;
        change(&mut color);
        self.set_color(color, deadline, self.config.transition)?;
        Ok(color)
    }

    /// Brighten or dim by one step, clamped to `[0, MAX_BRIGHTNESS]`.
    pub fn adjust_brightness(&mut self, direction: Direction, use_cache: bool) -> Result<Color> {
        let amount = self.config.brightness_step;
        self.update_color(use_cache, |c| {
            c.brightness = step(c.brightness, amount, direction, 0, MAX_BRIGHTNESS);
        })
    }

    /// Warm (down) or cool (up) by one step, clamped to the kelvin range.
    pub fn adjust_kelvin(&mut self, direction: Direction, use_cache: bool) -> Result<Color> {
        let amount = self.config.kelvin_step;
        let range = self.config.kelvin;
        self.update_color(use_cache, |c| {
            c.kelvin = step(c.kelvin, amount, direction, range.min, range.max);
        })
    }

    /// Set brightness to a fraction of full scale.
    pub fn set_brightness(&mut self, fraction: f32) -> Result<Color> {
        self.update_color(false, |c| {
            c.brightness = level_at(fraction, 0, MAX_BRIGHTNESS);
        })
    }

    /// Set color temperature to a fraction of the kelvin range.
    pub fn set_color_temp(&mut self, fraction: f32) -> Result<Color> {
        let range = self.config.kelvin;
        self.update_color(false, |c| c.kelvin = range.at(fraction))
    }

    /// Plain white at `kelvin` and a brightness fraction, then power on.
    pub fn set_white(&mut self, kelvin: u16, brightness: f32) -> Result<()> {
        let color = Color {
            hue: 0,
            saturation: 0,
            brightness: level_at(brightness, 0, MAX_BRIGHTNESS),
            kelvin: self.config.kelvin.clamp(kelvin),
        };
        let deadline = self.deadline();
        self.set_color(color, deadline, self.config.transition)?;
        self.set_power(Power::On, deadline)
    }

    /// Read power and set the opposite. Returns the new state.
    pub fn toggle_power(&mut self) -> Result<Power> {
        let deadline = self.deadline();
        let next = self.get_power(deadline)?.opposite();
        self.set_power(next, deadline)?;
        Ok(next)
    }
}
