//! CLI subcommands — control daemon, discovery, status, power, config.

mod config_cmd;
mod discover;
mod power;
mod run;
mod status;

use std::path::Path;

use clap::{Subcommand, ValueEnum};
use serde::Serialize;

pub(super) use crate::RUNNING;
pub(super) use lanlight_lib::config::Config;
pub(super) use lanlight_lib::error::Result;
use lanlight_lib::action::Keymap;
use lanlight_lib::cloud::CloudClient;
use lanlight_lib::control::Supervisor;
use lanlight_lib::device::{Color, DeviceHandle, MAX_BRIGHTNESS, Power};
use lanlight_lib::discovery::DiscoveryManager;
use lanlight_lib::lan::{LanDialer, LanDiscovery};

const PADDING: usize = 2;

/// Compute alignment width for a command's key-value output.
/// Ensures at least PADDING spaces after the longest key in either level,
/// with top-level and indent values aligned to the same column.
pub(super) fn kv_width(top: &[&str], indent: &[&str]) -> usize {
    let top_max = top.iter().map(|k| k.len()).max().unwrap_or(0);
    let indent_max = indent.iter().map(|k| k.len()).max().unwrap_or(0);
    let top_need = if top.is_empty() { 0 } else { top_max + PADDING };
    // Indent keys lose 2 chars of inner width to the "  " prefix
    let indent_need = if indent.is_empty() {
        0
    } else {
        indent_max + PADDING + 2
    };
    top_need.max(indent_need)
}

pub(super) fn format_kv(key: &str, value: impl std::fmt::Display, w: usize) -> String {
    format!("{key:<width$}{value}", width = w)
}

pub(super) fn kv(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("{}", format_kv(key, value, w));
}

pub(super) fn kv_indent(key: &str, value: impl std::fmt::Display, w: usize) {
    println!("  {key:<width$}{value}", width = w - 2);
}

/// Brightness as a whole percentage.
pub(super) fn percent(brightness: u16) -> u32 {
    (u32::from(brightness) * 100 + u32::from(MAX_BRIGHTNESS) / 2) / u32::from(MAX_BRIGHTNESS)
}

// ── JSON output structs ──

#[derive(Serialize)]
pub(super) struct LightJson {
    pub mac: String,
    pub addr: String,
}

impl From<&DeviceHandle> for LightJson {
    fn from(h: &DeviceHandle) -> Self {
        LightJson {
            mac: h.mac(),
            addr: h.addr.to_string(),
        }
    }
}

#[derive(Serialize)]
pub(super) struct DiscoverOutput {
    pub count: usize,
    pub lights: Vec<LightJson>,
}

#[derive(Serialize)]
pub(super) struct LightStatusJson {
    #[serde(flatten)]
    pub light: LightJson,
    pub power: Option<Power>,
    pub color: Option<Color>,
    pub brightness_percent: Option<u32>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub(super) struct ConfigSummaryJson {
    pub target_count: usize,
    pub inputs: Vec<String>,
    pub cloud_fallback: bool,
}

impl From<&Config> for ConfigSummaryJson {
    fn from(c: &Config) -> Self {
        ConfigSummaryJson {
            target_count: c.target_count,
            inputs: c
                .inputs
                .iter()
                .map(|i| format!("{} ({})", i.path, i.format))
                .collect(),
            cloud_fallback: c.cloud_token().is_some(),
        }
    }
}

#[derive(Serialize)]
pub(super) struct StatusOutput {
    pub version: String,
    pub lights: Vec<LightStatusJson>,
    pub config: ConfigSummaryJson,
}

#[derive(Serialize)]
pub(super) struct PowerOutput {
    pub power: Power,
    pub lights: Vec<LightJson>,
}

#[derive(Serialize)]
pub(super) struct KeymapEntryJson {
    pub code: u16,
    pub action: String,
}

#[derive(Serialize)]
pub(super) struct ConfigOutput {
    pub config_file: Option<String>,
    pub config_file_exists: bool,
    pub settings: Config,
    pub keymap: Vec<KeymapEntryJson>,
    pub problems: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PowerArg {
    On,
    Off,
    Toggle,
}

#[derive(Subcommand)]
pub enum Command {
    /// Read input devices and control the lights until Ctrl+C
    Run,

    /// Broadcast for lights and list the ones that answer
    Discover {
        /// Stop once this many lights answer (default: target_count from config)
        #[arg(long)]
        count: Option<usize>,
    },

    /// Show power and color of each light
    Status,

    /// Switch the lights on, off, or to the opposite of the first light
    Power {
        #[arg(value_enum)]
        state: PowerArg,
    },

    /// Show current configuration and keymap
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,

        /// With --init, replace an existing config file
        #[arg(long, requires = "init")]
        force: bool,
    },
}

impl Command {
    /// Long-running commands log at info by default.
    pub fn is_daemon(&self) -> bool {
        matches!(self, Command::Run)
    }
}

/// Load config from `path` (or the default location), logging parse warnings.
pub(super) fn load_config(path: Option<&Path>) -> Config {
    match path {
        Some(p) => {
            let (config, warnings) = Config::load_from(p);
            for w in &warnings {
                log::warn!("{w}");
            }
            config
        }
        None => Config::load(),
    }
}

/// Reject an invalid config, listing every problem.
pub(super) fn validated(config: Config) -> Result<Config> {
    match config.validate() {
        Ok(()) => Ok(config),
        Err(errors) => {
            let list: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            Err(lanlight_lib::LanlightError::Config(list.join("; ")))
        }
    }
}

/// Supervisor over the LAN transport, configured from `config`.
pub(super) fn lan_supervisor(
    config: &Config,
    keymap: Keymap,
) -> Result<Supervisor<LanDiscovery, LanDialer>> {
    let cloud = match config.cloud_token() {
        Some(token) => Some(CloudClient::new(&config.cloud_url, token)?),
        None => None,
    };
    Ok(Supervisor::new(
        DiscoveryManager::new(LanDiscovery::default(), config.discovery_unit()),
        LanDialer,
        config.session_config(),
        keymap,
    )
    .target_count(config.target_count)
    .attempts(config.discovery_attempts)
    .cloud(cloud))
}

/// Print `value` as pretty JSON on stdout.
pub(super) fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
    println!("{text}");
    Ok(())
}

/// Warn if `--json` was passed to a command that doesn't support it.
fn warn_json_unsupported(cmd_name: &str) {
    log::warn!("--json is not supported for `{cmd_name}` (ignored)");
}

pub fn run(cmd: Command, json: bool, config_path: Option<&Path>) -> Result<()> {
    match cmd {
        Command::Run => {
            if json {
                warn_json_unsupported("run");
            }
            run::cmd_run(config_path)
        }
        Command::Discover { count } => discover::cmd_discover(count, json, config_path),
        Command::Status => status::cmd_status(json, config_path),
        Command::Power { state } => power::cmd_power(state, json, config_path),
        Command::Config { init: true, force } => {
            if json {
                warn_json_unsupported("config --init");
            }
            config_cmd::cmd_config_init(force, config_path)
        }
        Command::Config { init: false, .. } => config_cmd::cmd_config(json, config_path),
    }
}


#[cfg(test)]
mod json_struct_tests {
    use super::*;
    use lanlight_lib::device::mock::handle;

    #[test]
    fn light_json_has_mac_and_addr() {
        let json = serde_json::to_value(LightJson::from(&handle(3))).unwrap();
        assert_eq!(json["addr"], "192.168.1.3:56700");
        assert!(json["mac"].as_str().unwrap().starts_with("d0:73:d5"));
    }

    #[test]
    fn light_status_flattens_handle() {
        let status = LightStatusJson {
            light: LightJson::from(&handle(1)),
            power: Some(Power::On),
            color: None,
            brightness_percent: None,
            error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("mac"));
        assert_eq!(obj["power"], "on");
        assert!(obj["color"].is_null());
    }

    #[test]
    fn config_summary_reports_cloud_fallback() {
        let mut config = Config::default();
        assert!(!ConfigSummaryJson::from(&config).cloud_fallback);
        config.cloud_token = "t".into();
        let summary = ConfigSummaryJson::from(&config);
        assert!(summary.cloud_fallback);
        assert_eq!(summary.inputs[0], "/dev/input/event0 (evdev64)");
    }

    #[test]
    fn validated_lists_every_problem() {
        let config = Config {
            target_count: 0,
            kelvin_min: 9000,
            ..Config::default()
        };
        let err = validated(config).unwrap_err().to_string();
        assert!(err.contains("target_count"));
        assert!(err.contains("kelvin_min"));
    }
}
