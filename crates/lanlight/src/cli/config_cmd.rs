//! `config` subcommand — show current configuration and keymap.

use std::path::Path;

use lanlight_lib::action::Keymap;

use lanlight_lib::LanlightError;

use super::{Config, ConfigOutput, KeymapEntryJson, Result, kv, kv_indent, kv_width, print_json};

/// Write the effective configuration (file values plus defaults) to the
/// config file. An existing file is only replaced with `force`.
pub(super) fn cmd_config_init(force: bool, custom_path: Option<&Path>) -> Result<()> {
    let path = custom_path
        .map(Path::to_path_buf)
        .or_else(Config::path)
        .ok_or_else(|| LanlightError::Config("no config directory on this platform".into()))?;
    if path.exists() && !force {
        return Err(LanlightError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    let config = super::load_config(custom_path);
    config.save_to(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub(super) fn cmd_config(json: bool, custom_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(custom_path);
    let config_path = custom_path.map(|p| p.to_path_buf()).or_else(Config::path);
    let config_exists = config_path.as_ref().map(|p| p.exists()).unwrap_or(false);

    let problems: Vec<String> = match config.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    };
    // a broken override falls back to the built-in map for display
    let keymap = config.keymap().unwrap_or_default();
    let entries: Vec<KeymapEntryJson> = keymap
        .entries()
        .into_iter()
        .map(|(code, action)| KeymapEntryJson {
            code,
            action: action.to_string(),
        })
        .collect();

    if json {
        return print_json(&ConfigOutput {
            config_file: config_path.as_ref().map(|p| p.display().to_string()),
            config_file_exists: config_exists,
            settings: config,
            keymap: entries,
            problems,
        });
    }

    // Human-readable output
    let w = kv_width(
        &["Config file:"],
        &[
            "target_count:",
            "discovery:",
            "deadlines:",
            "transition_ms:",
            "repeat:",
            "keepalive_secs:",
            "steps:",
            "kelvin range:",
            "cloud:",
        ],
    );

    match &config_path {
        Some(p) => {
            if config_exists {
                kv("Config file:", format_args!("{} (loaded)", p.display()), w);
            } else {
                kv(
                    "Config file:",
                    format_args!("{} (not found, using defaults)", p.display()),
                    w,
                );
            }
        }
        None => kv("Config file:", "(no config directory)", w),
    }
    println!();

    println!("Inputs:");
    for input in &config.inputs {
        println!("  {} ({})", input.path, input.format);
    }
    println!();

    println!("Settings:");
    kv_indent("target_count:", config.target_count, w);
    kv_indent(
        "discovery:",
        format_args!(
            "{} attempts, {}ms unit",
            config.discovery_attempts, config.discovery_unit_ms
        ),
        w,
    );
    kv_indent(
        "deadlines:",
        format_args!(
            "{}ms → {}ms, {}ms between retries",
            config.initial_deadline_ms, config.max_deadline_ms, config.retry_delay_ms
        ),
        w,
    );
    kv_indent("transition_ms:", config.transition_ms, w);
    kv_indent(
        "repeat:",
        format_args!(
            "after {}ms, every {}ms",
            config.repeat_delay_ms, config.repeat_interval_ms
        ),
        w,
    );
    kv_indent("keepalive_secs:", config.keepalive_secs, w);
    kv_indent(
        "steps:",
        format_args!(
            "brightness {}, kelvin {}",
            config.brightness_step, config.kelvin_step
        ),
        w,
    );
    kv_indent(
        "kelvin range:",
        format_args!("{}K – {}K", config.kelvin_min, config.kelvin_max),
        w,
    );
    match config.cloud_token() {
        Some(_) => kv_indent("cloud:", format_args!("enabled ({})", config.cloud_url), w),
        None => kv_indent("cloud:", "disabled", w),
    }
    println!();

    println!("Keymap:");
    let codes: Vec<String> = entries.iter().map(|e| e.code.to_string()).collect();
    let code_keys: Vec<&str> = codes.iter().map(String::as_str).collect();
    let kw = kv_width(&[], &code_keys);
    for (code, entry) in codes.iter().zip(&entries) {
        kv_indent(code, &entry.action, kw);
    }

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for p in &problems {
            println!("  {p}");
        }
    }
    Ok(())
}
