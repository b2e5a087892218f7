// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exponential backoff for statements that hit a busy or locked database.
//!
//! The daemon's own statements are serialized on one connection, but the
//! `luna mother` CLI and operator tooling open the same file from other
//! processes. Only `SQLITE_BUSY` and `SQLITE_LOCKED` are retried; every other
//! error is returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::future::retry;
use luna_config::model::StorageConfig;
use luna_core::LunaError;
use rusqlite::ErrorCode;
use tracing::warn;

use crate::database::map_tr_err;

const MAX_INTERVAL: Duration = Duration::from_secs(2);

/// How often and how patiently a busy statement is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_attempts: config.busy_retries.max(1),
            initial_interval: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            multiplier: 2.0,
            max_interval: MAX_INTERVAL,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

/// True when SQLite reported the database busy or a table locked.
pub fn is_busy(err: &tokio_rusqlite::Error<rusqlite::Error>) -> bool {
    match err {
        tokio_rusqlite::Error::Error(rusqlite::Error::SqliteFailure(e, _)) => matches!(
            e.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

/// Run `op` until it succeeds, fails with a non-busy error, or the policy's
/// attempts are used up.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, LunaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, tokio_rusqlite::Error<rusqlite::Error>>>,
{
    let max_attempts = policy.max_attempts;
    let mut attempt = 0u32;

    retry(policy.backoff(), || {
        attempt += 1;
        let current = attempt;
        let fut = op();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if is_busy(&e) && current < max_attempts => {
                    warn!(attempt = current, max_attempts, "database busy, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
    .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn busy() -> tokio_rusqlite::Error<rusqlite::Error> {
        tokio_rusqlite::Error::Error(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        ))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_busy_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let value = with_retry(&fast_policy(5), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy())
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = with_retry(&fast_policy(3), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(busy())
            }
        })
        .await;
        assert!(result.unwrap_err().is_storage());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = with_retry(&fast_policy(5), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(tokio_rusqlite::Error::Error(
                    rusqlite::Error::QueryReturnedNoRows,
                ))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
