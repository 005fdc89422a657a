//! Action routing — keycodes to light actions, applied to every light.
//!
//! Adjustment actions (brighter, dimmer, warmer, cooler) follow key repeat
//! and read the cached color on repeats. Every other action fires once per
//! press.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::device::{LightConnection, Power, Result};
use crate::input::Activate;
use crate::session::{Direction, Session};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    TogglePower,
    PowerOn,
    PowerOff,
    /// Plain white at `kelvin` and a brightness fraction, powered on.
    Preset { kelvin: u16, brightness: f32 },
    Brighter,
    Dimmer,
    Warmer,
    Cooler,
    /// Absolute brightness fraction.
    Brightness(f32),
    /// Absolute color temperature as a fraction of the kelvin range.
    Temperature(f32),
}

impl Action {
    /// Whether held keys keep triggering this action.
    pub fn repeats(&self) -> bool {
        matches!(
            self,
            Action::Brighter | Action::Dimmer | Action::Warmer | Action::Cooler
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::TogglePower => write!(f, "toggle"),
            Action::PowerOn => write!(f, "on"),
            Action::PowerOff => write!(f, "off"),
            Action::Preset { kelvin, brightness } => write!(f, "preset:{kelvin}:{brightness}"),
            Action::Brighter => write!(f, "brighter"),
            Action::Dimmer => write!(f, "dimmer"),
            Action::Warmer => write!(f, "warmer"),
            Action::Cooler => write!(f, "cooler"),
            Action::Brightness(v) => write!(f, "brightness:{v}"),
            Action::Temperature(v) => write!(f, "temperature:{v}"),
        }
    }
}

fn parse_fraction(s: &str) -> std::result::Result<f32, String> {
    let v: f32 = s
        .trim()
        .parse()
        .map_err(|_| format!("not a number: {s}"))?;
    if !(0.0..=1.0).contains(&v) {
        return Err(format!("fraction out of range [0, 1]: {s}"));
    }
    Ok(v)
}

impl FromStr for Action {
    type Err = String;

    /// Accepts `toggle`, `on`, `off`, `brighter`, `dimmer`, `warmer`,
    /// `cooler`, `preset:<kelvin>:<brightness>`, `brightness:<f>` and
    /// `temperature:<f>`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (name, arg) = match s.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (s, None),
        };
        match (name.to_ascii_lowercase().as_str(), arg) {
            ("toggle", None) => Ok(Action::TogglePower),
            ("on", None) => Ok(Action::PowerOn),
            ("off", None) => Ok(Action::PowerOff),
            ("brighter", None) => Ok(Action::Brighter),
            ("dimmer", None) => Ok(Action::Dimmer),
            ("warmer", None) => Ok(Action::Warmer),
            ("cooler", None) => Ok(Action::Cooler),
            ("brightness", Some(v)) => Ok(Action::Brightness(parse_fraction(v)?)),
            ("temperature", Some(v)) => Ok(Action::Temperature(parse_fraction(v)?)),
            ("preset", Some(args)) => {
                let (k, b) = args
                    .split_once(':')
                    .ok_or_else(|| format!("preset needs kelvin:brightness, got {args}"))?;
                let kelvin = k
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid kelvin: {k}"))?;
                Ok(Action::Preset {
                    kelvin,
                    brightness: parse_fraction(b)?,
                })
            }
            _ => Err(format!("unknown action: {s}")),
        }
    }
}

/// Keycode → action table.
#[derive(Debug, Clone, PartialEq)]
pub struct Keymap(HashMap<u16, Action>);

impl Default for Keymap {
    /// ESC toggles, 1–6 pick white presets, the dial dims and brightens,
    /// F4/F5 warm and cool.
    fn default() -> Self {
        let presets = [
            (1500, 0.25),
            (2000, 0.35),
            (2700, 0.5),
            (3500, 0.75),
            (4300, 1.0),
            (5200, 1.0),
        ];
        let mut map = HashMap::from([
            (1, Action::TogglePower),
            (114, Action::Dimmer),
            (115, Action::Brighter),
            (62, Action::Warmer),
            (63, Action::Cooler),
        ]);
        for (code, (kelvin, brightness)) in (2u16..).zip(presets) {
            map.insert(code, Action::Preset { kelvin, brightness });
        }
        Keymap(map)
    }
}

impl Keymap {
    pub fn empty() -> Self {
        Keymap(HashMap::new())
    }

    /// Start from the defaults and apply `overrides` (keycode string →
    /// action string, `"none"` unmaps). Returns every bad entry.
    pub fn with_overrides(
        overrides: &HashMap<String, String>,
    ) -> std::result::Result<Self, Vec<String>> {
        let mut keymap = Keymap::default();
        let mut errors = Vec::new();
        for (key, value) in overrides {
            let Ok(code) = key.trim().parse::<u16>() else {
                errors.push(format!("keycode {key:?} is not a number"));
                continue;
            };
            if value.trim().eq_ignore_ascii_case("none") {
                keymap.0.remove(&code);
                continue;
            }
            match value.parse::<Action>() {
                Ok(action) => {
                    keymap.0.insert(code, action);
                }
                Err(e) => errors.push(format!("keycode {code}: {e}")),
            }
        }
        if errors.is_empty() {
            Ok(keymap)
        } else {
            errors.sort();
            Err(errors)
        }
    }

    pub fn insert(&mut self, code: u16, action: Action) {
        self.0.insert(code, action);
    }

    pub fn get(&self, code: u16) -> Option<Action> {
        self.0.get(&code).copied()
    }

    /// Entries sorted by keycode.
    pub fn entries(&self) -> Vec<(u16, Action)> {
        let mut entries: Vec<(u16, Action)> = self.0.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by_key(|(k, _)| *k);
        entries
    }
}

/// Apply `action` to every light, in order.
///
/// `use_cache` lets adjustments reuse the last written color. A toggle
/// flips the first light and sets every other light to match it.
pub fn apply<C: LightConnection>(
    lights: &mut [Session<C>],
    action: Action,
    use_cache: bool,
) -> Result<()> {
    let mut toggled = None;
    for light in lights.iter_mut() {
        let action = match (action, toggled) {
            (Action::TogglePower, Some(Power::On)) => Action::PowerOn,
            (Action::TogglePower, Some(Power::Off)) => Action::PowerOff,
            _ => action,
        };
        if let Some(power) = apply_one(light, action, use_cache)? {
            toggled = Some(power);
        }
    }
    if let Some(power) = toggled {
        log::info!("power {power}");
    }
    Ok(())
}

/// Run `action` on one light. Returns the new power state after a toggle.
fn apply_one<C: LightConnection>(
    light: &mut Session<C>,
    action: Action,
    use_cache: bool,
) -> Result<Option<Power>> {
    let deadline = light.deadline();
    match action {
        Action::TogglePower => return light.toggle_power().map(Some),
        Action::PowerOn => light.set_power(Power::On, deadline)?,
        Action::PowerOff => light.set_power(Power::Off, deadline)?,
        Action::Preset { kelvin, brightness } => light.set_white(kelvin, brightness)?,
        Action::Brighter => {
            light.adjust_brightness(Direction::Up, use_cache)?;
        }
        Action::Dimmer => {
            light.adjust_brightness(Direction::Down, use_cache)?;
        }
        Action::Warmer => {
            light.adjust_kelvin(Direction::Down, use_cache)?;
        }
        Action::Cooler => {
            light.adjust_kelvin(Direction::Up, use_cache)?;
        }
        Action::Brightness(v) => {
            light.set_brightness(v)?;
        }
        Action::Temperature(v) => {
            light.set_color_temp(v)?;
        }
    }
    Ok(None)
}

/// Route one activation through `keymap` to the lights.
///
/// Unmapped keycodes are logged and ignored, as are repeats of actions that
/// do not repeat. Returns the action that ran, if any.
pub fn route<C: LightConnection>(
    keymap: &Keymap,
    lights: &mut [Session<C>],
    activate: Activate,
) -> Result<Option<Action>> {
    let Some(action) = keymap.get(activate.code) else {
        if !activate.is_repeat {
            log::debug!("unmapped keycode {}", activate.code);
        }
        return Ok(None);
    };
    if activate.is_repeat && !action.repeats() {
        return Ok(None);
    }
    log::debug!(
        "key {} -> {action}{}",
        activate.code,
        if activate.is_repeat { " (repeat)" } else { "" }
    );
    apply(lights, action, activate.is_repeat)?;
    Ok(Some(action))
}
