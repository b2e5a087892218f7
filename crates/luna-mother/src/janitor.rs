// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic queue and status maintenance.

use std::collections::BTreeMap;
use std::time::Duration;

use luna_config::model::QueueConfig;
use luna_core::LunaError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;

#[derive(Debug, Clone)]
pub struct JanitorSettings {
    pub interval: Duration,
    pub status_retention: Duration,
    pub orphan_timeout: Duration,
    pub username: String,
}

impl JanitorSettings {
    pub fn from_config(queue: &QueueConfig) -> Self {
        Self {
            interval: Duration::from_secs(queue.janitor_interval_secs),
            status_retention: Duration::from_secs(queue.status_retention_secs),
            orphan_timeout: Duration::from_secs(queue.orphan_timeout_secs),
            username: "luna".to_string(),
        }
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_messages: usize,
    /// Requests purged because an in-progress task stopped heartbeating.
    pub reaped_requests: Vec<String>,
    /// Subsystems kicked because a deferred task came due.
    pub kicked: Vec<String>,
}

pub struct Janitor {
    dispatcher: Dispatcher,
    settings: JanitorSettings,
}

impl Janitor {
    pub fn new(dispatcher: Dispatcher, settings: JanitorSettings) -> Self {
        Self {
            dispatcher,
            settings,
        }
    }

    /// Expire old status lines, reap orphaned requests, start due deferred work.
    pub async fn sweep(&self) -> Result<SweepReport, LunaError> {
        let queue = self.dispatcher.queue();
        let status = self.dispatcher.status();
        let mut report = SweepReport {
            expired_messages: status.cleanup_older_than(self.settings.status_retention).await?,
            ..SweepReport::default()
        };

        let mut requests: BTreeMap<String, String> = BTreeMap::new();
        for task in queue.orphaned_tasks(self.settings.orphan_timeout).await? {
            requests.entry(task.request_id).or_insert(task.task);
        }
        for (request_id, task) in requests {
            warn!(request_id = %request_id, task = %task, "reaping orphaned request");
            queue.remove_task_from_queue_by_request_id(&request_id).await?;
            status
                .fail(
                    &request_id,
                    &self.settings.username,
                    &format!("{task} abandoned: no progress for {:?}", self.settings.orphan_timeout),
                )
                .await;
            report.reaped_requests.push(request_id);
        }

        for subsystem in queue.due_deferred_subsystems().await? {
            debug!(subsystem = %subsystem, "deferred work due");
            self.dispatcher.drain(&subsystem);
            report.kicked.push(subsystem);
        }

        if report.expired_messages > 0 || !report.reaped_requests.is_empty() {
            info!(
                expired = report.expired_messages,
                reaped = report.reaped_requests.len(),
                "janitor sweep"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "janitor sweep failed");
                    }
                }
            }
        }
        debug!("janitor stopped");
    }
}
