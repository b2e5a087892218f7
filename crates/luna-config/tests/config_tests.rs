// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Luna configuration system.

use std::io::Write;

use luna_config::diagnostic::{ConfigError, suggest_key};
use luna_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};

/// Valid TOML with every section deserializes successfully.
#[test]
fn valid_toml_deserializes_into_luna_config() {
    let toml = r#"
[daemon]
hostname = "ctrl1"
log_level = "debug"

[storage]
database_path = "/tmp/luna-test.db"
wal_mode = false

[queue]
grace_period_ms = 250
cleanup_delay = "30m"

[api]
bind_address = "0.0.0.0"
port = 7051
token = "s3cret"

[ha]
enabled = true
insync_retries = 3

[[ha.controllers]]
hostname = "ctrl1"
endpoint = "http://ctrl1:7051"

[[ha.controllers]]
hostname = "ctrl2"
endpoint = "http://ctrl2:7051"
shadow = true

[operations]
timeout_secs = 600

[operations.commands]
pack_osimage = "lpack {object}"
clone_osimage = "lclone {param0} {param1}"
"#;

    let config = load_and_validate_str(toml).expect("valid TOML should load");
    assert_eq!(config.daemon.hostname, "ctrl1");
    assert_eq!(config.daemon.log_level, "debug");
    assert_eq!(config.storage.database_path, "/tmp/luna-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.queue.grace_period_ms, 250);
    assert_eq!(config.queue.cleanup_delay, "30m");
    assert_eq!(config.api.port, 7051);
    assert_eq!(config.api.token.as_deref(), Some("s3cret"));
    assert!(config.ha.enabled);
    assert_eq!(config.ha.insync_retries, 3);
    assert_eq!(config.ha.controllers.len(), 2);
    assert!(config.ha.controllers[1].shadow);
    assert_eq!(config.operations.timeout_secs, 600);
    assert_eq!(config.operations.commands.len(), 2);
}

/// Missing sections fall back to defaults.
#[test]
fn missing_sections_use_defaults() {
    let config = load_config_from_str("").expect("empty TOML should use defaults");

    assert_eq!(config.daemon.log_level, "info");
    assert!(config.storage.wal_mode);
    assert_eq!(config.storage.busy_retries, 5);
    assert_eq!(config.queue.grace_period_ms, 1000);
    assert_eq!(config.queue.cleanup_delay, "1h");
    assert_eq!(config.api.bind_address, "127.0.0.1");
    assert_eq!(config.api.port, 7050);
    assert!(config.api.token.is_none());
    assert!(!config.ha.enabled);
    assert!(config.ha.controllers.is_empty());
    assert!(config.operations.commands.is_empty());
}

#[test]
fn unknown_field_is_rejected_with_suggestion() {
    let toml = r#"
[queue]
grace_period = 10
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject unknown field");
    let unknown = errors
        .iter()
        .find_map(|e| match e {
            ConfigError::UnknownKey {
                key, suggestion, ..
            } => Some((key.clone(), suggestion.clone())),
            _ => None,
        })
        .expect("an UnknownKey diagnostic");
    assert_eq!(unknown.0, "grace_period");
    assert_eq!(unknown.1.as_deref(), Some("grace_period_ms"));
}

#[test]
fn wrong_type_is_reported() {
    let toml = r#"
[api]
port = "seventy"
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject wrong type");
    assert!(!errors.is_empty());
}

/// Validation errors are collected rather than failing on the first one.
#[test]
fn validation_collects_every_error() {
    let toml = r#"
[api]
port = 0

[queue]
cleanup_delay = "later"
"#;

    let errors = load_and_validate_str(toml).expect_err("should fail validation");
    assert!(errors.len() >= 2, "expected two errors, got {errors:?}");
}

#[test]
fn ha_without_siblings_is_rejected() {
    let toml = r#"
[daemon]
hostname = "ctrl1"

[api]
token = "t"

[ha]
enabled = true

[[ha.controllers]]
hostname = "ctrl1"
endpoint = "http://ctrl1:7050"
"#;

    let errors = load_and_validate_str(toml).expect_err("single controller HA is invalid");
    assert!(errors.iter().any(|e| e.to_string().contains("at least two")));
}

#[test]
fn loads_explicit_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[daemon]\nhostname = \"from-file\"").unwrap();

    let config = load_and_validate_path(file.path()).expect("file should load");
    assert_eq!(config.daemon.hostname, "from-file");
}

#[test]
fn suggest_key_handles_controller_fields() {
    let valid = &["hostname", "endpoint", "relay", "shadow"];
    assert_eq!(suggest_key("endpiont", valid), Some("endpoint".to_string()));
    assert_eq!(suggest_key("zzz", valid), None);
}

#[test]
fn config_serializes_to_json() {
    let config = load_config_from_str("[daemon]\nhostname = \"ctrl1\"").unwrap();
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["daemon"]["hostname"], "ctrl1");
    assert_eq!(json["api"]["port"], 7050);
}
