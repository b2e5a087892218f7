// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Luna controller daemon.
//!
//! This crate provides the error type, the queue/status/journal data model and
//! the task descriptor grammar shared by every other crate in the workspace.

pub mod descriptor;
pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use descriptor::{TaskDescriptor, TaskVerb, VerbKind, is_plain_word};
pub use error::LunaError;
pub use traits::{LeafExecutor, LeafTask};
pub use types::{
    EOF_MESSAGE, HaState, JournalEntry, QueueTask, Role, StatusMessage, TaskStatus,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luna_error_messages_are_descriptive() {
        let err = LunaError::OutOfSync("waited 5s".into());
        assert_eq!(err.to_string(), "controller out of sync: waited 5s");

        let err = LunaError::Replication {
            host: "ctrl2".into(),
            message: "connection refused".into(),
        };
        assert!(err.to_string().contains("ctrl2"));

        let err = LunaError::Storage {
            source: Box::new(std::io::Error::other("disk full")),
        };
        assert!(err.is_storage());
    }

    #[test]
    fn every_leaf_verb_has_a_home() {
        use strum::IntoEnumIterator;
        for verb in TaskVerb::iter() {
            if verb.kind() != VerbKind::Close {
                assert!(verb.home_subsystem().is_some(), "{verb} has no subsystem");
            }
        }
    }
}
