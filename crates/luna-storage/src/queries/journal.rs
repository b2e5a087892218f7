// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Journal rows.
//!
//! A row whose `sendfor` is this controller is inbound and waits to be
//! applied; every other row is outbound and waits for delivery to `sendto`.

use luna_core::LunaError;
use luna_core::types::timestamp_now;
use rusqlite::{Row, params};

use crate::database::Database;
use crate::models::JournalEntry;

const COLUMNS: &str =
    "id, function, object, param, payload, masteronly, misc, sendby, sendfor, sendto, tries, created";

fn row_to_entry(row: &Row<'_>) -> Result<JournalEntry, rusqlite::Error> {
    Ok(JournalEntry {
        id: row.get(0)?,
        function: row.get(1)?,
        object: row.get(2)?,
        param: row.get(3)?,
        payload: row.get(4)?,
        masteronly: row.get(5)?,
        misc: row.get(6)?,
        sendby: row.get(7)?,
        sendfor: row.get(8)?,
        sendto: row.get(9)?,
        tries: row.get(10)?,
        created: row.get(11)?,
    })
}

/// Insert entries in one transaction, returning their new ids.
///
/// Incoming ids are ignored. An empty `created` is stamped with the current
/// time, an empty `sendto` defaults to `sendfor`.
pub async fn insert_entries(db: &Database, entries: Vec<JournalEntry>) -> Result<Vec<i64>, LunaError> {
    if entries.is_empty() {
        return Ok(Vec::new());
    }
    db.call(move |conn| {
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(entries.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO journal
                 (function, object, param, payload, masteronly, misc, sendby, sendfor, sendto, tries, created)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for e in &entries {
                let sendto = if e.sendto.is_empty() { &e.sendfor } else { &e.sendto };
                let created = if e.created.is_empty() {
                    timestamp_now()
                } else {
                    e.created.clone()
                };
                stmt.execute(params![
                    e.function,
                    e.object,
                    e.param,
                    e.payload,
                    e.masteronly,
                    e.misc,
                    e.sendby,
                    e.sendfor,
                    sendto,
                    e.tries,
                    created,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    })
    .await
}

/// Rows addressed to `host`, oldest first.
pub async fn entries_for(db: &Database, host: &str) -> Result<Vec<JournalEntry>, LunaError> {
    let host = host.to_string();
    db.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM journal WHERE sendfor = ?1 ORDER BY created ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![host], row_to_entry)?;
        rows.collect()
    })
    .await
}

/// Rows awaiting delivery from `me`, oldest first, optionally only those
/// routed through `sendto`.
pub async fn outbound(
    db: &Database,
    me: &str,
    sendto: Option<&str>,
) -> Result<Vec<JournalEntry>, LunaError> {
    let me = me.to_string();
    let sendto = sendto.map(str::to_string);
    db.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM journal
             WHERE sendfor != ?1 AND (?2 IS NULL OR sendto = ?2)
             ORDER BY created ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![me, sendto], row_to_entry)?;
        rows.collect()
    })
    .await
}

pub async fn delete_entries(db: &Database, ids: Vec<i64>) -> Result<usize, LunaError> {
    if ids.is_empty() {
        return Ok(0);
    }
    db.call(move |conn| {
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM journal WHERE id = ?1")?;
            for id in &ids {
                deleted += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    })
    .await
}

/// Acknowledge delivery of `host`'s rows up to and including `upto`.
pub async fn delete_for_upto(db: &Database, host: &str, upto: Option<i64>) -> Result<usize, LunaError> {
    let host = host.to_string();
    db.call(move |conn| {
        conn.execute(
            "DELETE FROM journal WHERE sendfor = ?1 AND (?2 IS NULL OR id <= ?2)",
            params![host, upto],
        )
    })
    .await
}

pub async fn increment_tries(db: &Database, ids: Vec<i64>) -> Result<(), LunaError> {
    if ids.is_empty() {
        return Ok(());
    }
    db.call(move |conn| {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE journal SET tries = tries + 1 WHERE id = ?1")?;
            for id in &ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
    .await
}

pub async fn count(db: &Database) -> Result<i64, LunaError> {
    db.call(|conn| conn.query_row("SELECT COUNT(*) FROM journal", [], |r| r.get(0)))
        .await
}
