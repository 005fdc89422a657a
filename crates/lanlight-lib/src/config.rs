//! Application configuration — TOML-based, platform-aware paths.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::Keymap;
use crate::backoff::BackoffConfig;
use crate::input::{RecordFormat, RepeatTiming};
use crate::session::{KelvinRange, SessionConfig};

/// Header comment prepended to saved config files.
const CONFIG_HEADER: &str = "# lanlight configuration, written by `lanlight config --init`.\n\
     # Omitted keys fall back to built-in defaults.\n\n";

/// One raw input device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputConfig {
    pub path: String,
    #[serde(default = "default_format")]
    pub format: RecordFormat,
}

fn default_format() -> RecordFormat {
    RecordFormat::Evdev64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input devices to read. Default: `/dev/input/event0` and `event1`.
    #[serde(default = "default_inputs")]
    pub inputs: Vec<InputConfig>,

    /// Number of lights to control. Discovery stops early once reached.
    #[serde(default = "default_target_count")]
    pub target_count: usize,

    /// Discovery attempts before giving up.
    #[serde(default = "default_discovery_attempts")]
    pub discovery_attempts: u32,

    /// Discovery window unit; attempt `i` listens for `i × unit`.
    #[serde(default = "default_discovery_unit_ms")]
    pub discovery_unit_ms: u64,

    /// First per-attempt deadline for light operations.
    #[serde(default = "default_initial_deadline_ms")]
    pub initial_deadline_ms: u64,

    /// Deadline cap; a failure at the cap ends the session.
    #[serde(default = "default_max_deadline_ms")]
    pub max_deadline_ms: u64,

    /// Pause between failed attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Fade time for color changes.
    #[serde(default = "default_transition_ms")]
    pub transition_ms: u64,

    /// Hold time before a key starts repeating.
    #[serde(default = "default_repeat_delay_ms")]
    pub repeat_delay_ms: u64,

    /// Time between repeats.
    #[serde(default = "default_repeat_interval_ms")]
    pub repeat_interval_ms: u64,

    /// Idle power probe interval. 0 = disabled.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Brightness change per dimmer/brighter step (0–65535 scale).
    #[serde(default = "default_brightness_step")]
    pub brightness_step: u16,

    /// Kelvin change per warmer/cooler step.
    #[serde(default = "default_kelvin_step")]
    pub kelvin_step: u16,

    #[serde(default = "default_kelvin_min")]
    pub kelvin_min: u16,

    #[serde(default = "default_kelvin_max")]
    pub kelvin_max: u16,

    /// Keymap overrides (keycode → action), applied over the built-in map.
    /// Example in TOML: `[keymap]` / `59 = "preset:2700:0.4"` / `1 = "none"`
    #[serde(default)]
    pub keymap: HashMap<String, String>,

    /// LIFX cloud API token for the fallback path. Empty = disabled.
    #[serde(default)]
    pub cloud_token: String,

    /// Cloud state endpoint.
    #[serde(default = "default_cloud_url")]
    pub cloud_url: String,
}

fn default_inputs() -> Vec<InputConfig> {
    ["/dev/input/event0", "/dev/input/event1"]
        .into_iter()
        .map(|path| InputConfig {
            path: path.into(),
            format: default_format(),
        })
        .collect()
}
fn default_target_count() -> usize {
    1
}
fn default_discovery_attempts() -> u32 {
    5
}
fn default_discovery_unit_ms() -> u64 {
    1000
}
fn default_initial_deadline_ms() -> u64 {
    250
}
fn default_max_deadline_ms() -> u64 {
    4000
}
fn default_retry_delay_ms() -> u64 {
    100
}
fn default_transition_ms() -> u64 {
    75
}
fn default_repeat_delay_ms() -> u64 {
    500
}
fn default_repeat_interval_ms() -> u64 {
    100
}
fn default_keepalive_secs() -> u64 {
    30
}
fn default_brightness_step() -> u16 {
    2185
}
fn default_kelvin_step() -> u16 {
    250
}
fn default_kelvin_min() -> u16 {
    1500
}
fn default_kelvin_max() -> u16 {
    9000
}
fn default_cloud_url() -> String {
    crate::cloud::DEFAULT_STATE_URL.into()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            inputs: default_inputs(),
            target_count: default_target_count(),
            discovery_attempts: default_discovery_attempts(),
            discovery_unit_ms: default_discovery_unit_ms(),
            initial_deadline_ms: default_initial_deadline_ms(),
            max_deadline_ms: default_max_deadline_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            transition_ms: default_transition_ms(),
            repeat_delay_ms: default_repeat_delay_ms(),
            repeat_interval_ms: default_repeat_interval_ms(),
            keepalive_secs: default_keepalive_secs(),
            brightness_step: default_brightness_step(),
            kelvin_step: default_kelvin_step(),
            kelvin_min: default_kelvin_min(),
            kelvin_max: default_kelvin_max(),
            keymap: HashMap::new(),
            cloud_token: String::new(),
            cloud_url: default_cloud_url(),
        }
    }
}

/// Longest accepted millisecond setting.
pub const MAX_WAIT_MS: u64 = 60_000;

/// Longest accepted keep-alive interval.
pub const MAX_KEEPALIVE_SECS: u64 = 3600;

/// Validation errors that [`Config::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A count or duration that must be positive is zero.
    Zero(&'static str),
    /// A duration is above its upper bound.
    TooLarge {
        field: &'static str,
        value: u64,
        max: u64,
    },
    /// No input devices are configured.
    NoInputs,
    /// `kelvin_min` is not below `kelvin_max`.
    KelvinRange { min: u16, max: u16 },
    /// `max_deadline_ms` is below `initial_deadline_ms`.
    DeadlineRange { initial_ms: u64, max_ms: u64 },
    /// A keymap entry could not be parsed.
    InvalidKeymap(String),
    /// The cloud endpoint is not an http(s) URL.
    InvalidCloudUrl(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Zero(field) => write!(f, "{field} must be greater than zero"),
            ValidationError::TooLarge { field, value, max } => {
                write!(f, "{field} ({value}) must be at most {max}")
            }
            ValidationError::NoInputs => write!(f, "At least one input device is required"),
            ValidationError::KelvinRange { min, max } => {
                write!(f, "kelvin_min ({min}) must be below kelvin_max ({max})")
            }
            ValidationError::DeadlineRange { initial_ms, max_ms } => write!(
                f,
                "max_deadline_ms ({max_ms}) must not be below initial_deadline_ms ({initial_ms})"
            ),
            ValidationError::InvalidKeymap(e) => write!(f, "Invalid keymap: {e}"),
            ValidationError::InvalidCloudUrl(url) => write!(f, "Invalid cloud_url: {url}"),
        }
    }
}

impl Config {
    /// Platform-specific config directory.
    pub fn dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("lanlight"))
    }

    /// Full path to config file.
    pub fn path() -> Option<PathBuf> {
        Self::dir().map(|d| d.join("config.toml"))
    }

    /// Load config from disk, or return defaults if not found.
    pub fn load() -> Self {
        let (config, warnings) = Self::load_with_warnings();
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Write the config to `path` under a header comment.
    ///
    /// The file is written next to its destination and renamed into place,
    /// so a reader never sees half a config.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let body = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let staged = path.with_extension("toml.tmp");
        std::fs::write(&staged, format!("{CONFIG_HEADER}{body}"))?;
        std::fs::rename(&staged, path).inspect_err(|_| {
            let _ = std::fs::remove_file(&staged);
        })
    }

    /// Load config from an arbitrary path, returning the config and any parse warnings.
    ///
    /// Returns `(defaults, [])` if the file doesn't exist.
    /// Returns `(defaults, [warning])` if the file exists but can't be parsed.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, vec![]),
                Err(e) => {
                    let warning = format!(
                        "config parse error ({}), using defaults: {e}",
                        path.display()
                    );
                    (Self::default(), vec![warning])
                }
            },
            Err(_) => (Self::default(), vec![]),
        }
    }

    /// Load config from the default path, returning the config and any parse warnings.
    pub fn load_with_warnings() -> (Self, Vec<String>) {
        let Some(path) = Self::path() else {
            return (Self::default(), vec![]);
        };
        Self::load_from(&path)
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.inputs.is_empty() {
            errors.push(ValidationError::NoInputs);
        }

        let positive = [
            ("target_count", self.target_count as u64),
            ("discovery_attempts", u64::from(self.discovery_attempts)),
            ("discovery_unit_ms", self.discovery_unit_ms),
            ("initial_deadline_ms", self.initial_deadline_ms),
            ("max_deadline_ms", self.max_deadline_ms),
            ("repeat_delay_ms", self.repeat_delay_ms),
            ("repeat_interval_ms", self.repeat_interval_ms),
            ("brightness_step", u64::from(self.brightness_step)),
            ("kelvin_step", u64::from(self.kelvin_step)),
        ];
        for (field, value) in positive {
            if value == 0 {
                errors.push(ValidationError::Zero(field));
            }
        }

        let bounded = [
            ("discovery_unit_ms", self.discovery_unit_ms, MAX_WAIT_MS),
            ("initial_deadline_ms", self.initial_deadline_ms, MAX_WAIT_MS),
            ("max_deadline_ms", self.max_deadline_ms, MAX_WAIT_MS),
            ("retry_delay_ms", self.retry_delay_ms, MAX_WAIT_MS),
            ("transition_ms", self.transition_ms, MAX_WAIT_MS),
            ("repeat_delay_ms", self.repeat_delay_ms, MAX_WAIT_MS),
            ("repeat_interval_ms", self.repeat_interval_ms, MAX_WAIT_MS),
            ("keepalive_secs", self.keepalive_secs, MAX_KEEPALIVE_SECS),
        ];
        for (field, value, max) in bounded {
            if value > max {
                errors.push(ValidationError::TooLarge { field, value, max });
            }
        }

        if self.max_deadline_ms < self.initial_deadline_ms {
            errors.push(ValidationError::DeadlineRange {
                initial_ms: self.initial_deadline_ms,
                max_ms: self.max_deadline_ms,
            });
        }

        if self.kelvin_min >= self.kelvin_max {
            errors.push(ValidationError::KelvinRange {
                min: self.kelvin_min,
                max: self.kelvin_max,
            });
        }

        if let Err(bad) = Keymap::with_overrides(&self.keymap) {
            errors.extend(bad.into_iter().map(ValidationError::InvalidKeymap));
        }

        if !self.cloud_token.trim().is_empty()
            && !(self.cloud_url.starts_with("https://") || self.cloud_url.starts_with("http://"))
        {
            errors.push(ValidationError::InvalidCloudUrl(self.cloud_url.clone()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Per-light operation settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            initial_deadline: Duration::from_millis(self.initial_deadline_ms),
            backoff: BackoffConfig {
                max_deadline: Duration::from_millis(self.max_deadline_ms),
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            },
            transition: Duration::from_millis(self.transition_ms),
            brightness_step: self.brightness_step,
            kelvin_step: self.kelvin_step,
            kelvin: KelvinRange {
                min: self.kelvin_min,
                max: self.kelvin_max,
            },
        }
    }

    pub fn repeat_timing(&self) -> RepeatTiming {
        RepeatTiming {
            initial_delay: Duration::from_millis(self.repeat_delay_ms),
            interval: Duration::from_millis(self.repeat_interval_ms),
        }
    }

    pub fn discovery_unit(&self) -> Duration {
        Duration::from_millis(self.discovery_unit_ms)
    }

    /// `None` when keepalive probes are disabled.
    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }

    /// The built-in keymap with this config's overrides applied.
    pub fn keymap(&self) -> crate::error::Result<Keymap> {
        Keymap::with_overrides(&self.keymap)
            .map_err(|bad| crate::LanlightError::Config(bad.join("; ")))
    }

    /// Cloud token, if the fallback is enabled.
    pub fn cloud_token(&self) -> Option<&str> {
        let token = self.cloud_token.trim();
        (!token.is_empty()).then_some(token)
    }
}
