//! `power` subcommand — switch the lights on, off, or toggle them.

use std::path::Path;

use lanlight_lib::action::{self, Action, Keymap};
use lanlight_lib::cloud::CloudClient;
use lanlight_lib::device::Power;

use super::{
    LightJson, PowerArg, PowerOutput, Result, lan_supervisor, load_config, print_json, validated,
};

fn action_for(state: PowerArg) -> Action {
    match state {
        PowerArg::On => Action::PowerOn,
        PowerArg::Off => Action::PowerOff,
        PowerArg::Toggle => Action::TogglePower,
    }
}

fn print_result(output: &PowerOutput, json: bool) -> Result<()> {
    if json {
        return print_json(output);
    }
    if output.lights.is_empty() {
        println!("Power {} (via cloud)", output.power);
    } else {
        println!("Power {} on {} light(s)", output.power, output.lights.len());
    }
    Ok(())
}

pub(super) fn cmd_power(state: PowerArg, json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = validated(load_config(config_path))?;
    let supervisor = lan_supervisor(&config, Keymap::empty())?;

    let mut lights = match supervisor.build_lights() {
        Ok(lights) => lights,
        Err(e) => {
            // absolute states can still go through the cloud
            let target = match state {
                PowerArg::On => Power::On,
                PowerArg::Off => Power::Off,
                PowerArg::Toggle => return Err(e.into()),
            };
            let Some(token) = config.cloud_token() else {
                return Err(e.into());
            };
            log::warn!("{e}; using cloud");
            CloudClient::new(&config.cloud_url, token)?.set_power(target)?;
            return print_result(
                &PowerOutput {
                    power: target,
                    lights: Vec::new(),
                },
                json,
            );
        }
    };

    action::apply(&mut lights, action_for(state), false)?;
    let first = &mut lights[0];
    let power = first.get_power(first.deadline())?;
    print_result(
        &PowerOutput {
            power,
            lights: lights.iter().map(|l| LightJson::from(l.handle())).collect(),
        },
        json,
    )
}
