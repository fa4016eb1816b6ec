//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation, serialization/deserialization,
//! and edge cases in configuration handling.

use super::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = SessionConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.display.builtin, 1);
    assert!(config.display.async_power_mode);
    assert_eq!(config.timeouts.external_connection_ms, 500);
    assert_eq!(config.timeouts.vm_release_interval_ms, 100);
    assert_eq!(config.timeouts.vm_release_retries, 3);
    assert_eq!(config.timeouts.client_hotplug_wait_ms, 5000);
    assert!(config.general.null_display_mode);
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("session.toml");

    let test_config = r#"
[display]
builtin = 2
pluggable = 2
virtual_displays = 2
max_virtual_displays = 1
async_power_mode = false

[timeouts]
external_connection_ms = 300
enumeration_poll_ms = 10
vm_release_interval_ms = 50
vm_release_retries = 5
commit_done_interval_ms = 16
commit_done_retries = 3
client_hotplug_wait_ms = 1000
power_transition_ms = 400
cwb_completion_ms = 250

[general]
debug = true
idle_timeout_ms = 80
null_display_mode = true
"#;

    fs::write(&file_path, test_config)?;

    let config = SessionConfig::load(&file_path)?;

    assert_eq!(config.display.builtin, 2);
    assert!(!config.display.async_power_mode);
    assert_eq!(config.display.layout().total(), 6);
    assert_eq!(config.timeouts.vm_release_retries, 5);
    assert_eq!(config.timeouts.cwb_completion(), Duration::from_millis(250));
    assert_eq!(config.general.idle_timeout_ms, 80);

    Ok(())
}

#[test]
fn test_partial_file_keeps_defaults() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("partial.toml");

    fs::write(
        &file_path,
        r#"
[general]
debug = true
idle_timeout_ms = 0
null_display_mode = true
"#,
    )?;

    let config = SessionConfig::load(&file_path)?;
    assert!(config.general.debug);
    assert_eq!(config.display, DisplayConfig::default());
    assert_eq!(config.timeouts, TimeoutConfig::default());

    Ok(())
}

#[test]
fn test_malformed_toml_handling() {
    let dir = tempdir().unwrap();
    let file_path = dir.path().join("malformed.toml");

    let malformed_config = r#"
[display
builtin = 1
missing_bracket

[timeouts]
vm_release_retries = "three"
"#;

    fs::write(&file_path, malformed_config).unwrap();

    assert!(SessionConfig::load(&file_path).is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let result = SessionConfig::load(dir.path().join("nope.toml"));
    let message = format!("{:#}", result.unwrap_err());
    assert!(message.contains("Failed to read config file"));
}

#[test]
fn test_validation_rejects_bad_layouts() {
    let mut config = SessionConfig::default();
    config.display.builtin = 0;
    assert!(config.validate().is_err());

    let mut config = SessionConfig::default();
    config.display.builtin = 8;
    config.display.pluggable = 1;
    assert!(config.validate().is_err(), "8 builtins plus 8 aliases plus more slots overflow");

    let mut config = SessionConfig::default();
    config.display.max_virtual_displays = 4;
    assert!(config.validate().is_err());
}

#[test]
fn test_validation_rejects_bad_timeouts() {
    let mut config = SessionConfig::default();
    config.timeouts.vm_release_retries = 0;
    assert!(config.validate().is_err());

    let mut config = SessionConfig::default();
    config.timeouts.commit_done_interval_ms = 0;
    assert!(config.validate().is_err());

    let mut config = SessionConfig::default();
    config.timeouts.enumeration_poll_ms = 1000;
    assert!(config.validate().is_err());
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("saved.toml");

    let mut config = SessionConfig::default();
    config.display.pluggable = 3;
    config.timeouts.cwb_completion_ms = 42;
    config.save(&file_path)?;

    let reloaded = SessionConfig::load(&file_path)?;
    assert_eq!(reloaded, config);

    Ok(())
}

#[test]
fn test_merge_partial_overrides_changed_sections_only() {
    let mut base = SessionConfig::default();
    base.display.pluggable = 2;

    let mut partial = SessionConfig::default();
    partial.general.debug = true;

    let merged = base.merge_partial(partial);
    assert_eq!(merged.display.pluggable, 2);
    assert!(merged.general.debug);
    assert_eq!(merged.timeouts, TimeoutConfig::default());
}
