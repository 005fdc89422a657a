//! Integration tests for the `lanlight` binary.
//!
//! These tests exercise the CLI binary via `assert_cmd`. Every test points
//! `--config` at a temp file so the user's own config is never read.

use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn cli() -> assert_cmd::Command {
    cargo_bin_cmd!("lanlight")
}

/// Write `contents` to a config file in a fresh temp dir.
fn config_file(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

/// Discovery settings that give up quickly when no light answers.
const QUICK_DISCOVERY: &str = "discovery_attempts = 1\ndiscovery_unit_ms = 50\n";

#[test]
fn cli_help_succeeds() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("lanlight"));
}

#[test]
fn cli_version_prints_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_config_json_produces_valid_json() {
    let (_dir, path) = config_file("target_count = 2\n");
    let output = cli()
        .args(["--json", "config", "--config"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value =
        serde_json::from_slice(&output).expect("config --json should produce valid JSON");
    assert!(json["settings"].is_object());
    assert_eq!(json["settings"]["target_count"], 2);
    assert_eq!(json["config_file_exists"], true);
    assert!(json["keymap"].as_array().unwrap().len() >= 11);
    assert!(json["problems"].as_array().unwrap().is_empty());
}

#[test]
fn cli_config_shows_custom_file() {
    let (_dir, path) = config_file("kelvin_step = 100\n");
    cli()
        .arg("config")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("(loaded)"))
        .stdout(predicate::str::contains("kelvin 100"))
        .stdout(predicate::str::contains("toggle"));
}

#[test]
fn cli_config_lists_problems() {
    let (_dir, path) = config_file("kelvin_min = 9000\nkelvin_max = 1500\n");
    cli()
        .arg("config")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Problems:"))
        .stdout(predicate::str::contains("kelvin_min (9000)"));
}

#[test]
fn cli_config_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    cli()
        .arg("config")
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("not found, using defaults"));
}

#[test]
fn cli_config_init_writes_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lanlight").join("config.toml");
    cli()
        .args(["config", "--init", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.starts_with("# lanlight configuration"));
    assert!(written.contains("target_count = 1"));
    assert!(written.contains("repeat_delay_ms = 500"));
}

#[test]
fn cli_config_init_keeps_existing_file() {
    let (_dir, path) = config_file("target_count = 3\n");
    cli()
        .args(["config", "--init", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "target_count = 3\n");
}

#[test]
fn cli_config_init_force_fills_in_defaults() {
    let (_dir, path) = config_file("target_count = 3\n");
    cli()
        .args(["config", "--init", "--force", "--config"])
        .arg(&path)
        .assert()
        .success();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("target_count = 3"));
    assert!(written.contains("kelvin_step = 250"));
}

#[test]
fn cli_config_force_requires_init() {
    cli().args(["config", "--force"]).assert().failure();
}

// ── --verbose flag ──

#[test]
fn cli_verbose_flag_accepted() {
    let (_dir, path) = config_file("");
    cli()
        .args(["-v", "config", "--config"])
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn cli_verbose_long_flag_accepted() {
    let (_dir, path) = config_file("");
    cli()
        .args(["--verbose", "config", "--config"])
        .arg(&path)
        .assert()
        .success();
}

// ── Subcommands ──

#[test]
fn cli_power_rejects_unknown_state() {
    cli()
        .args(["power", "dim"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn cli_power_help_lists_states() {
    cli()
        .args(["power", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("toggle"));
}

#[test]
fn cli_run_rejects_invalid_config() {
    let (_dir, path) = config_file("repeat_interval_ms = 0\n");
    cli()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("repeat_interval_ms"));
}

#[test]
fn cli_run_rejects_unbounded_deadline() {
    let (_dir, path) = config_file("max_deadline_ms = 86400000\n");
    cli()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_deadline_ms (86400000) must be at most 60000"));
}

#[test]
fn cli_run_fails_without_input_devices() {
    let (_dir, path) = config_file(
        "[[inputs]]\npath = \"/nonexistent/lanlight/event7\"\nformat = \"evdev64\"\n",
    );
    cli()
        .arg("run")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("event7"));
}

#[test]
fn cli_status_succeeds_without_lights() {
    let (_dir, path) = config_file(QUICK_DISCOVERY);
    cli()
        .arg("status")
        .arg("--config")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Lights:"));
}

#[test]
fn cli_discover_help_succeeds() {
    cli()
        .args(["discover", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--count"));
}
