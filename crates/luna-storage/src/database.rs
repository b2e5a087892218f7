// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All statements are serialized through tokio-rusqlite's single background
//! thread. Do NOT create additional Connection instances for writes.

use std::path::Path;

use luna_config::model::StorageConfig;
use luna_core::LunaError;
use tracing::{debug, info};

use crate::migrations;
use crate::retry::RetryPolicy;

/// Convert a tokio-rusqlite error into `LunaError::Storage`.
pub fn map_tr_err<E>(e: tokio_rusqlite::Error<E>) -> LunaError
where
    E: std::error::Error + Send + Sync + 'static,
{
    LunaError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the controller database.
///
/// Cheap to clone; every clone talks to the same background connection.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
    retry: RetryPolicy,
}

impl Database {
    /// Open (or create) the database described by `config`, apply PRAGMAs and
    /// run pending migrations.
    pub async fn open(config: &StorageConfig) -> Result<Self, LunaError> {
        let path = Path::new(&config.database_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| LunaError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| LunaError::Storage {
                source: Box::new(e),
            })?;

        let wal_mode = config.wal_mode;
        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            if wal_mode {
                conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            }
            conn.execute_batch(
                "PRAGMA busy_timeout = 5000;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;",
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        conn.call(|conn| -> Result<(), LunaError> { migrations::run_migrations(conn) })
            .await
            .map_err(|e| match e {
                tokio_rusqlite::Error::Error(inner) => inner,
                other => LunaError::Storage {
                    source: other.to_string().into(),
                },
            })?;

        info!(path = %config.database_path, wal = wal_mode, "database opened");

        Ok(Self {
            conn,
            retry: RetryPolicy::from_config(config),
        })
    }

    /// Open a database at `path` with default storage settings.
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self, LunaError> {
        let config = StorageConfig {
            database_path: path.as_ref().display().to_string(),
            ..StorageConfig::default()
        };
        Self::open(&config).await
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Run `f` on the database thread, retrying while SQLite reports the
    /// database busy or locked.
    pub async fn call<F, T>(&self, f: F) -> Result<T, LunaError>
    where
        F: Fn(&mut rusqlite::Connection) -> Result<T, rusqlite::Error>
            + Clone
            + Send
            + 'static,
        T: Send + 'static,
    {
        crate::retry::with_retry(&self.retry, || {
            let f = f.clone();
            let conn = self.conn.clone();
            async move { conn.call(move |c| f(c)).await }
        })
        .await
    }

    /// Close the connection, flushing the WAL.
    pub async fn close(self) -> Result<(), LunaError> {
        debug!("closing database");
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        self.conn.close().await.map_err(map_tr_err)
    }
}
