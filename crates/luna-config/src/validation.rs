// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as HA topology consistency, valid endpoints and parseable delays.

use std::collections::HashSet;
use std::str::FromStr;

use luna_core::descriptor::{TaskVerb, VerbKind, parse_delay};

use crate::diagnostic::ConfigError;
use crate::model::LunaConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &LunaConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.daemon.hostname.trim().is_empty() {
        errors.push(validation("daemon.hostname must not be empty"));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(validation("storage.database_path must not be empty"));
    }

    if config.storage.busy_retries == 0 {
        errors.push(validation("storage.busy_retries must be at least 1"));
    }

    let addr = config.api.bind_address.trim();
    if addr.is_empty() {
        errors.push(validation("api.bind_address must not be empty"));
    } else {
        let is_valid_ip = addr.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = addr
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-');
        if !is_valid_ip && !is_valid_hostname {
            errors.push(validation(format!(
                "api.bind_address `{addr}` is not a valid IP address or hostname"
            )));
        }
    }

    if config.api.port == 0 {
        errors.push(validation("api.port must not be 0"));
    }

    if let Err(e) = parse_delay(&config.queue.cleanup_delay) {
        errors.push(validation(format!("queue.cleanup_delay: {e}")));
    }

    if config.queue.heartbeat_interval_secs == 0 {
        errors.push(validation("queue.heartbeat_interval_secs must be at least 1"));
    }

    if config.queue.orphan_timeout_secs <= config.queue.heartbeat_interval_secs {
        errors.push(validation(format!(
            "queue.orphan_timeout_secs ({}) must exceed queue.heartbeat_interval_secs ({})",
            config.queue.orphan_timeout_secs, config.queue.heartbeat_interval_secs
        )));
    }

    for verb in config.operations.commands.keys() {
        let runnable = TaskVerb::from_str(verb).is_ok_and(|v| v.kind() == VerbKind::Leaf);
        if !runnable {
            errors.push(validation(format!(
                "operations.commands has no verb named `{verb}`"
            )));
        }
    }

    validate_ha(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_ha(config: &LunaConfig, errors: &mut Vec<ConfigError>) {
    let ha = &config.ha;

    let mut seen = HashSet::new();
    for controller in &ha.controllers {
        if controller.hostname.trim().is_empty() {
            errors.push(validation("ha.controllers[].hostname must not be empty"));
        }
        if !seen.insert(controller.hostname.as_str()) {
            errors.push(validation(format!(
                "duplicate controller `{}` in [[ha.controllers]]",
                controller.hostname
            )));
        }
        if !controller.endpoint.starts_with("http://") && !controller.endpoint.starts_with("https://")
        {
            errors.push(validation(format!(
                "controller `{}` endpoint `{}` must be an http(s) URL",
                controller.hostname, controller.endpoint
            )));
        }
    }

    for controller in &ha.controllers {
        if let Some(relay) = &controller.relay {
            if relay == &controller.hostname {
                errors.push(validation(format!(
                    "controller `{}` cannot relay through itself",
                    controller.hostname
                )));
            } else if !seen.contains(relay.as_str()) {
                errors.push(validation(format!(
                    "controller `{}` relays through unknown controller `{relay}`",
                    controller.hostname
                )));
            }
            if !ha.sharedip {
                errors.push(validation(format!(
                    "controller `{}` sets a relay but ha.sharedip is false",
                    controller.hostname
                )));
            }
        }
    }

    if ha.enabled {
        if !seen.contains(config.daemon.hostname.as_str()) {
            errors.push(validation(format!(
                "ha.enabled requires daemon.hostname `{}` to be listed in [[ha.controllers]]",
                config.daemon.hostname
            )));
        }
        if ha.controllers.len() < 2 {
            errors.push(validation(
                "ha.enabled requires at least two [[ha.controllers]]",
            ));
        }
        if config.api.token.is_none() {
            errors.push(validation(
                "ha.enabled requires api.token so controllers can authenticate each other",
            ));
        }
    }
}

fn validation(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ControllerConfig;

    fn controller(hostname: &str) -> ControllerConfig {
        ControllerConfig {
            hostname: hostname.to_string(),
            endpoint: format!("http://{hostname}:7050"),
            relay: None,
            shadow: false,
        }
    }

    fn ha_config() -> LunaConfig {
        let mut config = LunaConfig::default();
        config.daemon.hostname = "ctrl1".to_string();
        config.api.token = Some("secret".to_string());
        config.ha.enabled = true;
        config.ha.controllers = vec![controller("ctrl1"), controller("ctrl2")];
        config
    }

    #[test]
    fn default_config_validates() {
        let config = LunaConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = LunaConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("database_path"))));
    }

    #[test]
    fn valid_ha_pair_passes() {
        assert!(validate_config(&ha_config()).is_ok());
    }

    #[test]
    fn ha_requires_self_in_controllers() {
        let mut config = ha_config();
        config.daemon.hostname = "ctrl3".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("ctrl3"))
        ));
    }

    #[test]
    fn ha_requires_token() {
        let mut config = ha_config();
        config.api.token = None;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn duplicate_controllers_fail_validation() {
        let mut config = ha_config();
        config.ha.controllers.push(controller("ctrl2"));
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("duplicate controller"))
        ));
    }

    #[test]
    fn relay_must_be_known_and_sharedip() {
        let mut config = ha_config();
        config.ha.controllers[1].relay = Some("ctrl9".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("unknown controller"))
        ));
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("sharedip"))
        ));
    }

    #[test]
    fn bad_cleanup_delay_fails_validation() {
        let mut config = LunaConfig::default();
        config.queue.cleanup_delay = "tomorrow".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn unknown_operation_verb_fails_validation() {
        let mut config = LunaConfig::default();
        config
            .operations
            .commands
            .insert("make_coffee".to_string(), "true".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::Validation { message } if message.contains("make_coffee"))
        ));
    }
}
