// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Status channel service.
//!
//! Producers append lines per request id; pollers read everything unread
//! since their last poll. The literal `EOF` ends a stream, and the read that
//! observes it removes the request's rows.

use std::time::Duration;

use luna_core::types::{EOF_MESSAGE, format_timestamp};
use luna_core::{LunaError, StatusMessage};
use luna_storage::Database;
use luna_storage::queries::status as s;
use serde::Serialize;
use tracing::{debug, warn};

/// Separator between joined status lines.
pub const MESSAGE_SEPARATOR: &str = ";;";

/// Answer to one status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Unread lines as `<created> :: <text>`, joined by `;;`.
    pub message: String,
    /// The stream ended with this read; the request's rows are gone.
    pub complete: bool,
}

#[derive(Clone)]
pub struct StatusChannel {
    db: Database,
}

impl StatusChannel {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn add_message(
        &self,
        request_id: &str,
        username_initiator: &str,
        message: &str,
    ) -> Result<(), LunaError> {
        debug!(request_id, message, "status message");
        s::insert_message(&self.db, request_id, username_initiator, message).await?;
        Ok(())
    }

    pub async fn add_eof(&self, request_id: &str, username_initiator: &str) -> Result<(), LunaError> {
        self.add_message(request_id, username_initiator, EOF_MESSAGE)
            .await
    }

    /// Write a terminal failure line followed by `EOF`, logging instead of
    /// failing when the status table itself is unavailable.
    pub async fn fail(&self, request_id: &str, username_initiator: &str, message: &str) {
        if let Err(e) = self.add_message(request_id, username_initiator, message).await {
            warn!(request_id, error = %e, "could not record failure");
        }
        if let Err(e) = self.add_eof(request_id, username_initiator).await {
            warn!(request_id, error = %e, "could not close status stream");
        }
    }

    /// Read and mark everything unread for `request_id`.
    ///
    /// `None` means the request is unknown or was fully consumed earlier.
    pub async fn get_status(&self, request_id: &str) -> Result<Option<StatusReport>, LunaError> {
        let Some(read) = s::read_unread(&self.db, request_id).await? else {
            return Ok(None);
        };
        let message = read
            .messages
            .iter()
            .filter(|m| !m.is_eof())
            .map(|m| format!("{} :: {}", m.created, m.message))
            .collect::<Vec<_>>()
            .join(MESSAGE_SEPARATOR);
        Ok(Some(StatusReport {
            message,
            complete: read.consumed,
        }))
    }

    pub async fn mark_messages_read(&self, request_id: &str) -> Result<usize, LunaError> {
        s::mark_read(&self.db, request_id).await
    }

    pub async fn del_messages(&self, request_id: &str) -> Result<usize, LunaError> {
        s::delete_messages(&self.db, request_id).await
    }

    pub async fn last_message(&self, request_id: &str) -> Result<Option<StatusMessage>, LunaError> {
        s::last_message(&self.db, request_id).await
    }

    /// Every message of a request, read or not, oldest first.
    pub async fn messages(&self, request_id: &str) -> Result<Vec<StatusMessage>, LunaError> {
        s::all_messages(&self.db, request_id).await
    }

    /// Remove messages older than `age`; returns how many went.
    pub async fn cleanup_older_than(&self, age: Duration) -> Result<usize, LunaError> {
        let age = chrono::Duration::from_std(age)
            .map_err(|e| LunaError::Internal(format!("retention out of range: {e}")))?;
        let cutoff = format_timestamp(chrono::Utc::now() - age);
        s::delete_older_than(&self.db, &cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn setup() -> (StatusChannel, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open_path(dir.path().join("status.db")).await.unwrap();
        (StatusChannel::new(db), dir)
    }

    #[tokio::test]
    async fn eof_round_trip_is_found_exactly_once() {
        let (status, _dir) = setup().await;
        status.add_message("rid", "luna", "EOF").await.unwrap();

        let report = status.get_status("rid").await.unwrap();
        assert!(report.unwrap().complete);
        assert!(status.get_status("rid").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn messages_are_joined_in_order_without_eof() {
        let (status, _dir) = setup().await;
        status.add_message("rid", "luna", "packing img1").await.unwrap();
        status.add_message("rid", "luna", "packed img1").await.unwrap();
        status.add_eof("rid", "luna").await.unwrap();

        let report = status.get_status("rid").await.unwrap().unwrap();
        let lines: Vec<&str> = report.message.split(MESSAGE_SEPARATOR).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" :: packing img1"));
        assert!(lines[1].ends_with(" :: packed img1"));
        assert!(!report.message.contains("EOF"));
    }

    #[tokio::test]
    async fn polls_only_return_new_lines() {
        let (status, _dir) = setup().await;
        status.add_message("rid", "luna", "one").await.unwrap();
        let first = status.get_status("rid").await.unwrap().unwrap();
        assert!(first.message.ends_with("one"));
        assert!(!first.complete);

        let empty = status.get_status("rid").await.unwrap().unwrap();
        assert_eq!(empty.message, "");

        status.add_message("rid", "luna", "two").await.unwrap();
        let second = status.get_status("rid").await.unwrap().unwrap();
        assert!(second.message.ends_with("two"));
        assert!(!second.message.contains("one"));
    }

    #[tokio::test]
    async fn fail_closes_stream() {
        let (status, _dir) = setup().await;
        status.fail("rid", "luna", "pack_osimage of img1 failed").await;
        let last = status.last_message("rid").await.unwrap().unwrap();
        assert!(last.is_eof());
        assert_eq!(status.messages("rid").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cleanup_keeps_recent_messages() {
        let (status, _dir) = setup().await;
        status.add_message("rid", "luna", "fresh").await.unwrap();
        assert_eq!(status.cleanup_older_than(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(status.del_messages("rid").await.unwrap(), 1);
    }
}
