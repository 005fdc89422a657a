//! `status` subcommand — show power and color of each light.

use std::path::Path;

use lanlight_lib::action::Keymap;
use lanlight_lib::device::LightConnection;
use lanlight_lib::session::Session;

use super::{
    Config, ConfigSummaryJson, LightJson, LightStatusJson, Result, StatusOutput, kv, kv_indent,
    kv_width, lan_supervisor, load_config, percent, print_json,
};

/// Read one light's state. Errors are reported in the result, not raised.
fn collect_light_status<C: LightConnection>(light: &mut Session<C>) -> LightStatusJson {
    let deadline = light.deadline();
    let mut status = LightStatusJson {
        light: LightJson::from(light.handle()),
        power: None,
        color: None,
        brightness_percent: None,
        error: None,
    };
    match light.get_color(deadline, false) {
        Ok(color) => {
            status.brightness_percent = Some(percent(color.brightness));
            status.color = Some(color);
        }
        Err(e) => status.error = Some(e.to_string()),
    }
    match light.get_power(deadline) {
        Ok(power) => status.power = Some(power),
        Err(e) => status.error = Some(e.to_string()),
    }
    status
}

/// One-line summary for the human-readable listing.
fn describe(status: &LightStatusJson) -> String {
    if let Some(e) = &status.error {
        return format!("error: {e}");
    }
    let power = status.power.map(|p| p.to_string()).unwrap_or_default();
    match (&status.color, status.brightness_percent) {
        (Some(c), Some(pct)) => format!("{power}, {}K, {pct}%", c.kelvin),
        _ => power,
    }
}

/// Print or serialize the status output.
fn print_status(lights: Vec<LightStatusJson>, config: &Config, json: bool) -> Result<()> {
    let summary = ConfigSummaryJson::from(config);
    if json {
        return print_json(&StatusOutput {
            version: env!("CARGO_PKG_VERSION").to_string(),
            lights,
            config: summary,
        });
    }

    let macs: Vec<String> = lights.iter().map(|l| l.light.mac.clone()).collect();
    let mut indent: Vec<&str> = vec!["Target count:", "Inputs:", "Cloud fallback:"];
    indent.extend(macs.iter().map(String::as_str));
    let w = kv_width(&["Version:", "Lights:", "Config:"], &indent);

    kv("Version:", env!("CARGO_PKG_VERSION"), w);
    if lights.is_empty() {
        kv("Lights:", "none found", w);
    } else {
        println!("Lights:");
        for status in &lights {
            kv_indent(&status.light.mac, describe(status), w);
        }
    }
    println!("Config:");
    kv_indent("Target count:", summary.target_count, w);
    kv_indent("Inputs:", summary.inputs.join(", "), w);
    kv_indent(
        "Cloud fallback:",
        if summary.cloud_fallback {
            "enabled"
        } else {
            "disabled"
        },
        w,
    );
    Ok(())
}

pub(super) fn cmd_status(json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let supervisor = lan_supervisor(&config, Keymap::empty())?;
    let lights = match supervisor.build_lights() {
        Ok(mut lights) => lights.iter_mut().map(collect_light_status).collect(),
        Err(e) => {
            log::warn!("{e}");
            Vec::new()
        }
    };
    print_status(lights, &config, json)
}
