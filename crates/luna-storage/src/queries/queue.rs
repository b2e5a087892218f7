// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task queue rows.
//!
//! Eligibility is always `created`-then-`id` order within a subsystem. A row
//! with `run_after` in the future is not eligible; `parked` rows are only
//! returned when asked for explicitly.

use std::str::FromStr;

use luna_core::{LunaError, TaskVerb};
use luna_core::types::timestamp_now;
use rusqlite::{OptionalExtension, Row, params};

use crate::database::Database;
use crate::models::{InsertOutcome, NewQueueRow, QueueTask, TaskStatus};

const COLUMNS: &str = "id, request_id, subsystem, task, status, created, run_after, heartbeat";

fn row_to_task(row: &Row<'_>) -> Result<QueueTask, rusqlite::Error> {
    let status: String = row.get(4)?;
    let status = TaskStatus::from_str(&status).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(QueueTask {
        id: row.get(0)?,
        request_id: row.get(1)?,
        subsystem: row.get(2)?,
        task: row.get(3)?,
        status,
        created: row.get(5)?,
        run_after: row.get(6)?,
        heartbeat: row.get(7)?,
    })
}

/// `'a', 'b', ...` list of composite verbs for `IN` filters.
fn composite_verbs() -> String {
    TaskVerb::composites()
        .map(|verb| format!("'{}'", verb.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

const LIVE_KEY: &str = "subsystem = ?1 AND verb = ?2 AND object = ?3
     AND status IN ('queued', 'parked', 'in progress')";

/// Oldest live row sharing the `(subsystem, verb, object)` de-duplication key.
pub async fn live_task(
    db: &Database,
    subsystem: &str,
    verb: &str,
    object: &str,
) -> Result<Option<QueueTask>, LunaError> {
    let (subsystem, verb, object) = (subsystem.to_string(), verb.to_string(), object.to_string());
    db.call(move |conn| {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM queue WHERE {LIVE_KEY} ORDER BY created ASC, id ASC LIMIT 1"),
            params![subsystem, verb, object],
            row_to_task,
        )
        .optional()
    })
    .await
}

/// Insert a row unless a live row with the same `(subsystem, verb, object)`
/// exists and `force` is false.
pub async fn insert_task(
    db: &Database,
    row: NewQueueRow,
    force: bool,
) -> Result<InsertOutcome, LunaError> {
    db.call(move |conn| {
        let tx = conn.transaction()?;
        if !force {
            let existing: Option<i64> = tx
                .query_row(
                    &format!("SELECT id FROM queue WHERE {LIVE_KEY} ORDER BY created ASC, id ASC LIMIT 1"),
                    params![row.subsystem, row.verb, row.object],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                return Ok(InsertOutcome::Existing(id));
            }
        }
        tx.execute(
            "INSERT INTO queue (request_id, subsystem, task, verb, object, status, run_after, created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.request_id,
                row.subsystem,
                row.task,
                row.verb,
                row.object,
                row.status.to_string(),
                row.run_after,
                timestamp_now(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(InsertOutcome::Inserted(id))
    })
    .await
}

/// Oldest eligible row of `subsystem` with `status`.
pub async fn next_task(
    db: &Database,
    subsystem: &str,
    status: TaskStatus,
    only_request_id: Option<&str>,
) -> Result<Option<i64>, LunaError> {
    let subsystem = subsystem.to_string();
    let only_request_id = only_request_id.map(str::to_string);
    db.call(move |conn| {
        conn.query_row(
            "SELECT id FROM queue
             WHERE subsystem = ?1 AND status = ?2
               AND (run_after IS NULL OR run_after <= ?3)
               AND (?4 IS NULL OR request_id = ?4)
             ORDER BY created ASC, id ASC LIMIT 1",
            params![subsystem, status.to_string(), timestamp_now(), only_request_id],
            |r| r.get(0),
        )
        .optional()
    })
    .await
}

/// Oldest eligible row of `subsystem` with `status` that targets `object`.
pub async fn next_parallel_task(
    db: &Database,
    subsystem: &str,
    object: &str,
    status: TaskStatus,
) -> Result<Option<i64>, LunaError> {
    let subsystem = subsystem.to_string();
    let object = object.to_string();
    db.call(move |conn| {
        conn.query_row(
            "SELECT id FROM queue
             WHERE subsystem = ?1 AND object = ?2 AND status = ?3
               AND (run_after IS NULL OR run_after <= ?4)
             ORDER BY created ASC, id ASC LIMIT 1",
            params![subsystem, object, status.to_string(), timestamp_now()],
            |r| r.get(0),
        )
        .optional()
    })
    .await
}

/// Atomically pick the oldest eligible queued row and mark it `in progress`.
///
/// A row is skipped while another request holds an `in progress` row for the
/// same object in the same subsystem, and while its own request has a phase
/// running anywhere, so the phases of a composite never overlap even when a
/// scoped run and a full drain work the subsystem together. Claiming also
/// refreshes the heartbeat of every other `in progress` row of the claimed
/// request, so a composite parent stays alive while its phases run.
pub async fn claim_next_task(
    db: &Database,
    subsystem: &str,
    only_request_id: Option<&str>,
) -> Result<Option<QueueTask>, LunaError> {
    let subsystem = subsystem.to_string();
    let only_request_id = only_request_id.map(str::to_string);
    db.call(move |conn| {
        let tx = conn.transaction()?;
        let now = timestamp_now();
        let candidate = tx
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM queue q
                     WHERE q.subsystem = ?1 AND q.status = 'queued'
                       AND (q.run_after IS NULL OR q.run_after <= ?2)
                       AND (?3 IS NULL OR q.request_id = ?3)
                       AND NOT EXISTS (
                           SELECT 1 FROM queue p
                           WHERE p.status = 'in progress'
                             AND ((p.subsystem = q.subsystem AND p.object = q.object
                                   AND p.request_id != q.request_id)
                               OR (p.request_id = q.request_id AND p.verb NOT IN ({composites}))))
                     ORDER BY q.created ASC, q.id ASC LIMIT 1",
                    composites = composite_verbs()
                ),
                params![subsystem, now, only_request_id],
                row_to_task,
            )
            .optional()?;

        let Some(mut task) = candidate else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE queue SET status = 'in progress', heartbeat = ?2 WHERE id = ?1",
            params![task.id, now],
        )?;
        tx.execute(
            "UPDATE queue SET heartbeat = ?2 WHERE request_id = ?1 AND status = 'in progress'",
            params![task.request_id, now],
        )?;
        tx.commit()?;

        task.status = TaskStatus::InProgress;
        task.heartbeat = Some(now);
        Ok(Some(task))
    })
    .await
}

pub async fn update_status(db: &Database, id: i64, status: TaskStatus) -> Result<bool, LunaError> {
    db.call(move |conn| {
        let n = conn.execute(
            "UPDATE queue SET status = ?2 WHERE id = ?1",
            params![id, status.to_string()],
        )?;
        Ok(n > 0)
    })
    .await
}

pub async fn change_subsystem(db: &Database, id: i64, subsystem: &str) -> Result<bool, LunaError> {
    let subsystem = subsystem.to_string();
    db.call(move |conn| {
        let n = conn.execute(
            "UPDATE queue SET subsystem = ?2 WHERE id = ?1",
            params![id, subsystem],
        )?;
        Ok(n > 0)
    })
    .await
}

/// Move a row into `subsystem` as `queued`, clearing its heartbeat.
pub async fn requeue(db: &Database, id: i64, subsystem: &str) -> Result<bool, LunaError> {
    let subsystem = subsystem.to_string();
    db.call(move |conn| {
        let n = conn.execute(
            "UPDATE queue SET subsystem = ?2, status = 'queued', heartbeat = NULL WHERE id = ?1",
            params![id, subsystem],
        )?;
        Ok(n > 0)
    })
    .await
}

pub async fn remove_task(db: &Database, id: i64) -> Result<bool, LunaError> {
    db.call(move |conn| {
        let n = conn.execute("DELETE FROM queue WHERE id = ?1", params![id])?;
        Ok(n > 0)
    })
    .await
}

pub async fn remove_by_request_id(db: &Database, request_id: &str) -> Result<usize, LunaError> {
    let request_id = request_id.to_string();
    db.call(move |conn| conn.execute("DELETE FROM queue WHERE request_id = ?1", params![request_id]))
        .await
}

pub async fn get_task(db: &Database, id: i64) -> Result<Option<QueueTask>, LunaError> {
    db.call(move |conn| {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM queue WHERE id = ?1"),
            params![id],
            row_to_task,
        )
        .optional()
    })
    .await
}

/// Refresh the heartbeat of `id` and of every `in progress` row of its request.
pub async fn touch_heartbeat(db: &Database, id: i64) -> Result<(), LunaError> {
    db.call(move |conn| {
        conn.execute(
            "UPDATE queue SET heartbeat = ?2
             WHERE status = 'in progress'
               AND (id = ?1 OR request_id = (SELECT request_id FROM queue WHERE id = ?1))",
            params![id, timestamp_now()],
        )?;
        Ok(())
    })
    .await
}

/// All rows, optionally of one subsystem, in service order.
pub async fn list_tasks(db: &Database, subsystem: Option<&str>) -> Result<Vec<QueueTask>, LunaError> {
    let subsystem = subsystem.map(str::to_string);
    db.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM queue
             WHERE (?1 IS NULL OR subsystem = ?1)
             ORDER BY created ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![subsystem], row_to_task)?;
        rows.collect()
    })
    .await
}

/// Parked rows of `subsystem`, optionally of one request, in service order.
pub async fn parked_tasks(
    db: &Database,
    subsystem: &str,
    only_request_id: Option<&str>,
) -> Result<Vec<QueueTask>, LunaError> {
    let subsystem = subsystem.to_string();
    let only_request_id = only_request_id.map(str::to_string);
    db.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM queue
             WHERE subsystem = ?1 AND status = 'parked' AND (?2 IS NULL OR request_id = ?2)
             ORDER BY created ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![subsystem, only_request_id], row_to_task)?;
        rows.collect()
    })
    .await
}

/// Subsystems holding a deferred queued row whose `run_after` has passed.
pub async fn due_deferred_subsystems(db: &Database) -> Result<Vec<String>, LunaError> {
    db.call(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT subsystem FROM queue
             WHERE status = 'queued' AND run_after IS NOT NULL AND run_after <= ?1
             ORDER BY subsystem",
        )?;
        let rows = stmt.query_map(params![timestamp_now()], |r| r.get(0))?;
        rows.collect()
    })
    .await
}

/// `in progress` rows whose last sign of life is older than `cutoff`.
///
/// A composite parent only counts once its request has no other rows left:
/// while phases are still queued it is waiting its turn, not abandoned.
pub async fn orphaned_tasks(db: &Database, cutoff: &str) -> Result<Vec<QueueTask>, LunaError> {
    let cutoff = cutoff.to_string();
    db.call(move |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM queue q
             WHERE q.status = 'in progress' AND COALESCE(q.heartbeat, q.created) < ?1
               AND (q.verb NOT IN ({composites})
                    OR NOT EXISTS (
                        SELECT 1 FROM queue c WHERE c.request_id = q.request_id AND c.id != q.id))
             ORDER BY q.created ASC, q.id ASC",
            composites = composite_verbs()
        ))?;
        let rows = stmt.query_map(params![cutoff], row_to_task)?;
        rows.collect()
    })
    .await
}
