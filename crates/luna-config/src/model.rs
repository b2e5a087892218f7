// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Luna controller daemon.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Luna configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LunaConfig {
    /// Controller identity and logging.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Task queue, coordinator and janitor timings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// HTTP API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// High-availability and replication settings.
    #[serde(default)]
    pub ha: HaConfig,

    /// Leaf operation commands.
    #[serde(default)]
    pub operations: OperationsConfig,
}

/// Controller identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Hostname this controller is known by in the cluster.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            log_level: default_log_level(),
        }
    }
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "controller".to_string())
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// Attempts for a statement that hits `SQLITE_BUSY`/`SQLITE_LOCKED`.
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,

    /// First backoff delay between busy retries, doubled on every attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
            busy_retries: default_busy_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("luna").join("luna.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("luna.db"))
        .display()
        .to_string()
}

fn default_wal_mode() -> bool {
    true
}

fn default_busy_retries() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

/// Task queue and coordinator timings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// How long a submitting handler waits before its first status read.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Status messages older than this are removed by the janitor.
    #[serde(default = "default_status_retention_secs")]
    pub status_retention_secs: u64,

    /// Interval of the janitor loop.
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,

    /// In-progress tasks whose heartbeat is older than this are reaped.
    #[serde(default = "default_orphan_timeout_secs")]
    pub orphan_timeout_secs: u64,

    /// How often a running coordinator refreshes its task heartbeat.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Pause after moving a task that leaked into the wrong subsystem.
    #[serde(default = "default_foreign_task_delay_ms")]
    pub foreign_task_delay_ms: u64,

    /// Deferral for cleaning up superseded provisioning files.
    #[serde(default = "default_cleanup_delay")]
    pub cleanup_delay: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            status_retention_secs: default_status_retention_secs(),
            janitor_interval_secs: default_janitor_interval_secs(),
            orphan_timeout_secs: default_orphan_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            foreign_task_delay_ms: default_foreign_task_delay_ms(),
            cleanup_delay: default_cleanup_delay(),
        }
    }
}

impl QueueConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn foreign_task_delay(&self) -> Duration {
        Duration::from_millis(self.foreign_task_delay_ms)
    }
}

fn default_grace_period_ms() -> u64 {
    1000
}

fn default_status_retention_secs() -> u64 {
    3600
}

fn default_janitor_interval_secs() -> u64 {
    60
}

fn default_orphan_timeout_secs() -> u64 {
    3600
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_foreign_task_delay_ms() -> u64 {
    1000
}

fn default_cleanup_delay() -> String {
    "1h".to_string()
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// Address to bind the API server to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to bind the API server to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared bearer token for authenticated routes and controller-to-controller calls.
    #[serde(default)]
    pub token: Option<String>,

    /// Timeout for outbound replication requests.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7050
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// High-availability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HaConfig {
    /// Enable journaling and replication between controllers.
    #[serde(default)]
    pub enabled: bool,

    /// Seconds to wait for the in-sync flag before rejecting a journaled request.
    #[serde(default = "default_insync_retries")]
    pub insync_retries: u32,

    /// Interval of the background push of pending journal entries.
    #[serde(default = "default_push_interval_secs")]
    pub push_interval_secs: u64,

    /// Controllers share a virtual IP; some siblings are reached through a relay.
    #[serde(default)]
    pub sharedip: bool,

    /// This controller is a passive replica that never originates journal entries.
    #[serde(default)]
    pub shadow: bool,

    /// Every controller in the cluster, this one included.
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            insync_retries: default_insync_retries(),
            push_interval_secs: default_push_interval_secs(),
            sharedip: false,
            shadow: false,
            controllers: Vec::new(),
        }
    }
}

fn default_insync_retries() -> u32 {
    5
}

fn default_push_interval_secs() -> u64 {
    30
}

/// One controller of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Hostname, matched against `daemon.hostname` and journal `sendfor`.
    pub hostname: String,

    /// Base URL of the controller's API, e.g. `http://ctrl2:7050`.
    pub endpoint: String,

    /// Controller that forwards journal entries to this one when it sits behind the shared IP.
    #[serde(default)]
    pub relay: Option<String>,

    /// Passive replica.
    #[serde(default)]
    pub shadow: bool,
}

/// Leaf operation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OperationsConfig {
    /// Maximum run time of a single leaf command.
    #[serde(default = "default_operation_timeout_secs")]
    pub timeout_secs: u64,

    /// Shell command per verb. `{object}`, `{param0}`, `{param1}` and
    /// `{request_id}` are substituted before execution.
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_operation_timeout_secs(),
            commands: BTreeMap::new(),
        }
    }
}

fn default_operation_timeout_secs() -> u64 {
    4 * 3600
}
