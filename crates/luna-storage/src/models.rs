// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the storage tables.
//!
//! The canonical types live in `luna_core::types` so they can cross crate
//! boundaries; this module re-exports them and adds the insert-side shapes.

pub use luna_core::types::{HaState, JournalEntry, QueueTask, Role, StatusMessage, TaskStatus};

/// A queue row about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueRow {
    pub request_id: String,
    pub subsystem: String,
    pub task: String,
    pub verb: String,
    pub object: String,
    pub status: TaskStatus,
    pub run_after: Option<String>,
}

/// Result of a de-duplicating insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// A live row with the same subsystem, verb and object already exists.
    Existing(i64),
}

impl InsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            InsertOutcome::Inserted(id) | InsertOutcome::Existing(id) => *id,
        }
    }
}

/// Unread messages handed out by one status read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRead {
    pub messages: Vec<StatusMessage>,
    /// The `EOF` sentinel was among them and the request's rows are gone.
    pub consumed: bool,
}
