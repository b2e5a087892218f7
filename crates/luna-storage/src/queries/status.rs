// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Status channel rows.

use luna_core::types::{EOF_MESSAGE, timestamp_now};
use luna_core::LunaError;
use rusqlite::{OptionalExtension, Row, params};

use crate::database::Database;
use crate::models::{StatusMessage, StatusRead};

const COLUMNS: &str = "id, request_id, created, username_initiator, read, message";

fn row_to_message(row: &Row<'_>) -> Result<StatusMessage, rusqlite::Error> {
    Ok(StatusMessage {
        id: row.get(0)?,
        request_id: row.get(1)?,
        created: row.get(2)?,
        username_initiator: row.get(3)?,
        read: row.get(4)?,
        message: row.get(5)?,
    })
}

pub async fn insert_message(
    db: &Database,
    request_id: &str,
    username_initiator: &str,
    message: &str,
) -> Result<i64, LunaError> {
    let request_id = request_id.to_string();
    let username_initiator = username_initiator.to_string();
    let message = message.to_string();
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO status (request_id, created, username_initiator, read, message)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![request_id, timestamp_now(), username_initiator, message],
        )?;
        Ok(conn.last_insert_rowid())
    })
    .await
}

/// Hand out the unread messages of a request and mark them read.
///
/// Returns `None` when the request has no rows at all. When the `EOF`
/// sentinel is among the handed-out messages, every row of the request is
/// deleted in the same transaction.
pub async fn read_unread(db: &Database, request_id: &str) -> Result<Option<StatusRead>, LunaError> {
    let request_id = request_id.to_string();
    db.call(move |conn| {
        let tx = conn.transaction()?;
        let total: i64 = tx.query_row(
            "SELECT COUNT(*) FROM status WHERE request_id = ?1",
            params![request_id],
            |r| r.get(0),
        )?;
        if total == 0 {
            return Ok(None);
        }

        let messages = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {COLUMNS} FROM status
                 WHERE request_id = ?1 AND read = 0
                 ORDER BY created ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![request_id], row_to_message)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let consumed = messages.iter().any(|m| m.message == EOF_MESSAGE);
        if consumed {
            tx.execute("DELETE FROM status WHERE request_id = ?1", params![request_id])?;
        } else if !messages.is_empty() {
            tx.execute(
                "UPDATE status SET read = 1 WHERE request_id = ?1 AND read = 0",
                params![request_id],
            )?;
        }
        tx.commit()?;
        Ok(Some(StatusRead { messages, consumed }))
    })
    .await
}

pub async fn mark_read(db: &Database, request_id: &str) -> Result<usize, LunaError> {
    let request_id = request_id.to_string();
    db.call(move |conn| {
        conn.execute(
            "UPDATE status SET read = 1 WHERE request_id = ?1 AND read = 0",
            params![request_id],
        )
    })
    .await
}

pub async fn delete_messages(db: &Database, request_id: &str) -> Result<usize, LunaError> {
    let request_id = request_id.to_string();
    db.call(move |conn| conn.execute("DELETE FROM status WHERE request_id = ?1", params![request_id]))
        .await
}

/// Delete every message created before `cutoff`.
pub async fn delete_older_than(db: &Database, cutoff: &str) -> Result<usize, LunaError> {
    let cutoff = cutoff.to_string();
    db.call(move |conn| conn.execute("DELETE FROM status WHERE created < ?1", params![cutoff]))
        .await
}

pub async fn last_message(db: &Database, request_id: &str) -> Result<Option<StatusMessage>, LunaError> {
    let request_id = request_id.to_string();
    db.call(move |conn| {
        conn.query_row(
            &format!(
                "SELECT {COLUMNS} FROM status WHERE request_id = ?1
                 ORDER BY created DESC, id DESC LIMIT 1"
            ),
            params![request_id],
            row_to_message,
        )
        .optional()
    })
    .await
}

pub async fn all_messages(db: &Database, request_id: &str) -> Result<Vec<StatusMessage>, LunaError> {
    let request_id = request_id.to_string();
    db.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM status WHERE request_id = ?1 ORDER BY created ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![request_id], row_to_message)?;
        rows.collect()
    })
    .await
}
