// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subsystem drain leases.
//!
//! A lease names the coordinator allowed to drain a subsystem. It expires
//! unless renewed, so a coordinator that died does not block the subsystem
//! for longer than one lease period.

use luna_core::LunaError;
use luna_core::types::timestamp_now;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;

/// Take the lease of `subsystem` for `holder` until `expires`.
///
/// Returns the current holder when somebody else holds a live lease. The
/// same holder re-acquiring simply extends its lease.
pub async fn acquire(
    db: &Database,
    subsystem: &str,
    holder: &str,
    expires: &str,
) -> Result<Option<String>, LunaError> {
    let subsystem = subsystem.to_string();
    let holder = holder.to_string();
    let expires = expires.to_string();
    db.call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<String> = tx
            .query_row(
                "SELECT holder FROM subsystem_lease
                 WHERE subsystem = ?1 AND holder != ?2 AND expires > ?3",
                params![subsystem, holder, timestamp_now()],
                |r| r.get(0),
            )
            .optional()?;
        if current.is_some() {
            return Ok(current);
        }
        tx.execute(
            "INSERT INTO subsystem_lease (subsystem, holder, expires) VALUES (?1, ?2, ?3)
             ON CONFLICT (subsystem) DO UPDATE SET holder = excluded.holder, expires = excluded.expires",
            params![subsystem, holder, expires],
        )?;
        tx.commit()?;
        Ok(None)
    })
    .await
}

/// Push the expiry of a lease `holder` still owns. False if it was lost.
pub async fn renew(db: &Database, subsystem: &str, holder: &str, expires: &str) -> Result<bool, LunaError> {
    let subsystem = subsystem.to_string();
    let holder = holder.to_string();
    let expires = expires.to_string();
    db.call(move |conn| {
        let n = conn.execute(
            "UPDATE subsystem_lease SET expires = ?3 WHERE subsystem = ?1 AND holder = ?2",
            params![subsystem, holder, expires],
        )?;
        Ok(n > 0)
    })
    .await
}

pub async fn release(db: &Database, subsystem: &str, holder: &str) -> Result<(), LunaError> {
    let subsystem = subsystem.to_string();
    let holder = holder.to_string();
    db.call(move |conn| {
        conn.execute(
            "DELETE FROM subsystem_lease WHERE subsystem = ?1 AND holder = ?2",
            params![subsystem, holder],
        )?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::test_support::setup_db;

    const FAR: &str = "2999-01-01T00:00:00.000Z";
    const PAST: &str = "2000-01-01T00:00:00.000Z";

    #[tokio::test]
    async fn live_lease_keeps_others_out() {
        let (db, _dir) = setup_db().await;
        assert_eq!(acquire(&db, "osimage", "serve", FAR).await.unwrap(), None);
        assert_eq!(
            acquire(&db, "osimage", "cli", FAR).await.unwrap(),
            Some("serve".to_string())
        );
        // Other subsystems are independent; the holder may re-acquire.
        assert_eq!(acquire(&db, "control", "cli", FAR).await.unwrap(), None);
        assert_eq!(acquire(&db, "osimage", "serve", FAR).await.unwrap(), None);

        release(&db, "osimage", "serve").await.unwrap();
        assert_eq!(acquire(&db, "osimage", "cli", FAR).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_lease_is_taken_over() {
        let (db, _dir) = setup_db().await;
        acquire(&db, "osimage", "dead", PAST).await.unwrap();
        assert_eq!(acquire(&db, "osimage", "serve", FAR).await.unwrap(), None);
        assert!(!renew(&db, "osimage", "dead", FAR).await.unwrap());
        assert!(renew(&db, "osimage", "serve", FAR).await.unwrap());
    }

    #[tokio::test]
    async fn release_by_a_stranger_is_ignored() {
        let (db, _dir) = setup_db().await;
        acquire(&db, "osimage", "serve", FAR).await.unwrap();
        release(&db, "osimage", "cli").await.unwrap();
        assert_eq!(
            acquire(&db, "osimage", "cli", FAR).await.unwrap(),
            Some("serve".to_string())
        );
    }
}
