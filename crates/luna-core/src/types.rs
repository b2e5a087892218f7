// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the storage, queue and journal crates.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Literal message that terminates a request's status stream.
pub const EOF_MESSAGE: &str = "EOF";

/// Well-known queue partitions.
pub mod subsystem {
    pub const OSIMAGE: &str = "osimage";
    pub const HOUSEKEEPER: &str = "housekeeper";
    pub const CONTROL: &str = "control";
}

/// Lifecycle status of a row in the task queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum TaskStatus {
    #[strum(serialize = "queued")]
    #[serde(rename = "queued")]
    Queued,
    #[strum(serialize = "parked")]
    #[serde(rename = "parked")]
    Parked,
    #[strum(serialize = "in progress")]
    #[serde(rename = "in progress")]
    InProgress,
}

/// One row of the task queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTask {
    pub id: i64,
    pub request_id: String,
    pub subsystem: String,
    /// Colon-delimited descriptor, e.g. `pack_osimage:compute:noeof`.
    pub task: String,
    pub status: TaskStatus,
    pub created: String,
    /// Deferred tasks are not eligible before this timestamp.
    pub run_after: Option<String>,
    /// Last sign of life from the coordinator executing this task.
    pub heartbeat: Option<String>,
}

/// One line of progress for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub id: i64,
    pub request_id: String,
    pub created: String,
    pub username_initiator: String,
    pub read: bool,
    pub message: String,
}

impl StatusMessage {
    pub fn is_eof(&self) -> bool {
        self.message == EOF_MESSAGE
    }
}

/// One replication instruction destined for one sibling controller.
///
/// This is both the persisted row and the wire format of `POST /journal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    #[serde(default)]
    pub id: i64,
    pub function: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub param: String,
    /// Base64 encoded JSON body.
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub masteronly: bool,
    /// Request id on the originating controller, used to route status back.
    #[serde(default)]
    pub misc: String,
    pub sendby: String,
    pub sendfor: String,
    #[serde(default)]
    pub sendto: String,
    #[serde(default)]
    pub tries: i64,
    #[serde(default)]
    pub created: String,
}

/// Role of this controller in an HA pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Backup,
}

/// Persisted HA singleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaState {
    pub enabled: bool,
    pub role: Role,
    /// Hostname of the controller currently holding the master role, if known.
    pub master: Option<String>,
    pub insync: bool,
    pub overrule: bool,
    pub shadow: bool,
    pub sharedip: bool,
    pub updated: String,
}

impl Default for HaState {
    fn default() -> Self {
        Self {
            enabled: false,
            role: Role::Master,
            master: None,
            insync: true,
            overrule: false,
            shadow: false,
            sharedip: false,
            updated: String::new(),
        }
    }
}

impl HaState {
    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }
}

/// Current UTC time in the timestamp format used by every table.
///
/// Millisecond precision keeps `ORDER BY created` meaningful for bursts of inserts.
pub fn timestamp_now() -> String {
    format_timestamp(chrono::Utc::now())
}

/// Format a UTC time in the storage timestamp format.
pub fn format_timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
