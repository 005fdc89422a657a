//! `run` subcommand — read input devices and control the lights until Ctrl+C.

use std::path::Path;
use std::sync::mpsc;

use lanlight_lib::control::{ControlMsg, spawn_keepalive};
use lanlight_lib::input::spawn_stream;

use super::{RUNNING, Result, lan_supervisor, load_config, validated};

pub(super) fn cmd_run(config_path: Option<&Path>) -> Result<()> {
    let config = validated(load_config(config_path))?;
    let keymap = config.keymap()?;
    let timing = config.repeat_timing();

    let (tx, rx) = mpsc::channel::<ControlMsg>();
    let mut opened = 0;
    let mut last_err = None;
    for input in &config.inputs {
        match spawn_stream(&input.path, input.format, timing, tx.clone()) {
            Ok(_) => opened += 1,
            Err(e) => {
                log::warn!("[input] {e}");
                last_err = Some(e);
            }
        }
    }
    if opened == 0
        && let Some(e) = last_err
    {
        return Err(e.into());
    }

    if let Some(interval) = config.keepalive() {
        spawn_keepalive(interval, tx.clone())?;
    }
    drop(tx);

    log::info!(
        "lanlight {} ({opened} input(s), {} light(s) wanted)",
        env!("CARGO_PKG_VERSION"),
        config.target_count
    );
    if config.cloud_token().is_some() {
        log::info!("[cloud] fallback enabled");
    }

    let supervisor = lan_supervisor(&config, keymap)?;
    supervisor.run(&rx, &RUNNING)?;
    log::info!("stopped");
    Ok(())
}
