// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `ha_state` singleton.

use std::str::FromStr;

use luna_core::LunaError;
use luna_core::types::timestamp_now;
use rusqlite::params;

use crate::database::Database;
use crate::models::{HaState, Role};

pub async fn load(db: &Database) -> Result<HaState, LunaError> {
    db.call(|conn| {
        conn.query_row(
            "SELECT enabled, role, master, insync, overrule, shadow, sharedip, updated
             FROM ha_state WHERE id = 1",
            [],
            |row| {
                let role: String = row.get(1)?;
                let role = Role::from_str(&role).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(HaState {
                    enabled: row.get(0)?,
                    role,
                    master: row.get(2)?,
                    insync: row.get(3)?,
                    overrule: row.get(4)?,
                    shadow: row.get(5)?,
                    sharedip: row.get(6)?,
                    updated: row.get(7)?,
                })
            },
        )
    })
    .await
}

pub async fn save(db: &Database, state: &HaState) -> Result<(), LunaError> {
    let state = state.clone();
    db.call(move |conn| {
        conn.execute(
            "INSERT INTO ha_state (id, enabled, role, master, insync, overrule, shadow, sharedip, updated)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled, role = excluded.role, master = excluded.master,
                insync = excluded.insync, overrule = excluded.overrule, shadow = excluded.shadow,
                sharedip = excluded.sharedip, updated = excluded.updated",
            params![
                state.enabled,
                state.role.to_string(),
                state.master,
                state.insync,
                state.overrule,
                state.shadow,
                state.sharedip,
                timestamp_now(),
            ],
        )?;
        Ok(())
    })
    .await
}

pub async fn set_insync(db: &Database, insync: bool) -> Result<(), LunaError> {
    db.call(move |conn| {
        conn.execute(
            "UPDATE ha_state SET insync = ?1, updated = ?2 WHERE id = 1",
            params![insync, timestamp_now()],
        )?;
        Ok(())
    })
    .await
}

pub async fn set_overrule(db: &Database, overrule: bool) -> Result<(), LunaError> {
    db.call(move |conn| {
        conn.execute(
            "UPDATE ha_state SET overrule = ?1, updated = ?2 WHERE id = 1",
            params![overrule, timestamp_now()],
        )?;
        Ok(())
    })
    .await
}

/// Record `master` as the controller holding the master role; `role` is this
/// controller's resulting role.
pub async fn set_role(db: &Database, role: Role, master: Option<&str>) -> Result<(), LunaError> {
    let master = master.map(str::to_string);
    db.call(move |conn| {
        conn.execute(
            "UPDATE ha_state SET role = ?1, master = ?2, updated = ?3 WHERE id = 1",
            params![role.to_string(), master, timestamp_now()],
        )?;
        Ok(())
    })
    .await
}
