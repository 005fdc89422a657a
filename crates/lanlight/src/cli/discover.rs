//! `discover` subcommand — broadcast for lights and list the ones that answer.

use std::path::Path;

use lanlight_lib::discovery::DiscoveryManager;
use lanlight_lib::lan::LanDiscovery;

use super::{DiscoverOutput, LightJson, Result, kv_indent, kv_width, load_config, print_json};

pub(super) fn cmd_discover(count: Option<usize>, json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let target = count.unwrap_or(config.target_count);
    let manager = DiscoveryManager::new(LanDiscovery::default(), config.discovery_unit());
    let handles = manager.discover(target, config.discovery_attempts)?;

    if json {
        return print_json(&DiscoverOutput {
            count: handles.len(),
            lights: handles.iter().map(LightJson::from).collect(),
        });
    }

    let macs: Vec<String> = handles.iter().map(|h| h.mac()).collect();
    let keys: Vec<&str> = macs.iter().map(String::as_str).collect();
    let w = kv_width(&[], &keys);
    println!("Found {} light(s):", handles.len());
    for (mac, handle) in macs.iter().zip(&handles) {
        kv_indent(mac, handle.addr, w);
    }
    Ok(())
}
