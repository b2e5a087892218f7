// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task queue service.
//!
//! Wraps the `queue` table with the descriptor grammar: callers hand in a
//! [`TaskDescriptor`], the queue stores its string form next to the
//! structured `(verb, object)` de-duplication key.

use std::fmt;

use luna_core::descriptor::parse_delay;
use luna_core::types::format_timestamp;
use luna_core::{LunaError, QueueTask, TaskDescriptor, TaskStatus};
use luna_storage::queries::lease;
use luna_storage::queries::queue as q;
use luna_storage::{Database, InsertOutcome, NewQueueRow};
use tracing::{debug, error, info};

/// A task about to be enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub descriptor: TaskDescriptor,
    pub subsystem: String,
    pub request_id: String,
    /// Deferral such as `1h`; the task is not eligible before it elapses.
    pub when: Option<String>,
    /// Bypass de-duplication.
    pub force: bool,
    pub status: TaskStatus,
}

impl NewTask {
    pub fn new(
        descriptor: TaskDescriptor,
        subsystem: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            descriptor,
            subsystem: subsystem.into(),
            request_id: request_id.into(),
            when: None,
            force: false,
            status: TaskStatus::Queued,
        }
    }

    /// Parse a raw descriptor such as `pack_n_build_osimage:img1`.
    pub fn parse(
        task: &str,
        subsystem: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Result<Self, LunaError> {
        Ok(Self::new(task.parse()?, subsystem, request_id))
    }

    pub fn when(mut self, when: impl Into<String>) -> Self {
        self.when = Some(when.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Enqueue as a placeholder that only the parked-lane drain promotes.
    pub fn parked(mut self) -> Self {
        self.status = TaskStatus::Parked;
        self
    }
}

/// Whether `add_task` created a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added,
    AlreadyQueued,
}

impl EnqueueOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueOutcome::Added => "added",
            EnqueueOutcome::AlreadyQueued => "already queued",
        }
    }
}

impl fmt::Display for EnqueueOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `add_task`: the new row, or the live duplicate it collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub task_id: i64,
    pub outcome: EnqueueOutcome,
}

impl Enqueued {
    pub fn is_added(&self) -> bool {
        self.outcome == EnqueueOutcome::Added
    }
}

/// The task queue.
#[derive(Clone)]
pub struct TaskQueue {
    db: Database,
}

impl TaskQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Enqueue `task`, de-duplicating on `(subsystem, verb, object)` unless forced.
    pub async fn add_task(&self, task: NewTask) -> Result<Enqueued, LunaError> {
        let run_after = match &task.when {
            Some(when) => Some(format_timestamp(chrono::Utc::now() + parse_delay(when)?)),
            None => None,
        };
        let descriptor = task.descriptor.to_string();
        let row = NewQueueRow {
            request_id: task.request_id.clone(),
            subsystem: task.subsystem.clone(),
            task: descriptor.clone(),
            verb: task.descriptor.verb.as_str().to_string(),
            object: task.descriptor.object().to_string(),
            status: task.status,
            run_after,
        };

        let outcome = q::insert_task(&self.db, row, task.force).await.map_err(|e| {
            error!(task = %descriptor, subsystem = %task.subsystem, error = %e, "could not queue task");
            e
        })?;

        let enqueued = match outcome {
            InsertOutcome::Inserted(task_id) => Enqueued {
                task_id,
                outcome: EnqueueOutcome::Added,
            },
            InsertOutcome::Existing(task_id) => Enqueued {
                task_id,
                outcome: EnqueueOutcome::AlreadyQueued,
            },
        };
        info!(
            task_id = enqueued.task_id,
            task = %descriptor,
            subsystem = %task.subsystem,
            request_id = %task.request_id,
            outcome = %enqueued.outcome,
            "task enqueued"
        );
        Ok(enqueued)
    }

    pub async fn next_task_in_queue(
        &self,
        subsystem: &str,
        status: TaskStatus,
        only_request_id: Option<&str>,
    ) -> Result<Option<i64>, LunaError> {
        q::next_task(&self.db, subsystem, status, only_request_id).await
    }

    pub async fn next_parallel_task_in_queue(
        &self,
        subsystem: &str,
        object: &str,
        status: TaskStatus,
    ) -> Result<Option<i64>, LunaError> {
        q::next_parallel_task(&self.db, subsystem, object, status).await
    }

    /// Atomically take the next runnable task of `subsystem` and mark it `in progress`.
    pub async fn claim_next_task(
        &self,
        subsystem: &str,
        only_request_id: Option<&str>,
    ) -> Result<Option<QueueTask>, LunaError> {
        q::claim_next_task(&self.db, subsystem, only_request_id).await
    }

    pub async fn update_task_status_in_queue(
        &self,
        task_id: i64,
        status: TaskStatus,
    ) -> Result<bool, LunaError> {
        debug!(task_id, status = %status, "updating task status");
        q::update_status(&self.db, task_id, status).await
    }

    pub async fn change_subsystem(&self, task_id: i64, subsystem: &str) -> Result<bool, LunaError> {
        debug!(task_id, subsystem, "changing task subsystem");
        q::change_subsystem(&self.db, task_id, subsystem).await
    }

    /// Move a task into `subsystem` and make it eligible again.
    pub async fn requeue(&self, task_id: i64, subsystem: &str) -> Result<bool, LunaError> {
        q::requeue(&self.db, task_id, subsystem).await
    }

    pub async fn remove_task_from_queue(&self, task_id: i64) -> Result<bool, LunaError> {
        q::remove_task(&self.db, task_id).await
    }

    pub async fn remove_task_from_queue_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<usize, LunaError> {
        let removed = q::remove_by_request_id(&self.db, request_id).await?;
        if removed > 0 {
            info!(request_id, removed, "purged request from queue");
        }
        Ok(removed)
    }

    /// The live row `add_task` would collide with, if any.
    pub async fn find_live_task(
        &self,
        subsystem: &str,
        descriptor: &TaskDescriptor,
    ) -> Result<Option<QueueTask>, LunaError> {
        q::live_task(&self.db, subsystem, descriptor.verb.as_str(), descriptor.object()).await
    }

    pub async fn get_task_details(&self, task_id: i64) -> Result<Option<QueueTask>, LunaError> {
        q::get_task(&self.db, task_id).await
    }

    pub async fn touch_heartbeat(&self, task_id: i64) -> Result<(), LunaError> {
        q::touch_heartbeat(&self.db, task_id).await
    }

    pub async fn list_tasks(&self, subsystem: Option<&str>) -> Result<Vec<QueueTask>, LunaError> {
        q::list_tasks(&self.db, subsystem).await
    }

    pub async fn parked_tasks(
        &self,
        subsystem: &str,
        only_request_id: Option<&str>,
    ) -> Result<Vec<QueueTask>, LunaError> {
        q::parked_tasks(&self.db, subsystem, only_request_id).await
    }

    pub async fn due_deferred_subsystems(&self) -> Result<Vec<String>, LunaError> {
        q::due_deferred_subsystems(&self.db).await
    }

    /// `in progress` tasks without a heartbeat newer than `older_than`.
    pub async fn orphaned_tasks(
        &self,
        older_than: std::time::Duration,
    ) -> Result<Vec<QueueTask>, LunaError> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| LunaError::Internal(format!("orphan timeout out of range: {e}")))?;
        let cutoff = format_timestamp(chrono::Utc::now() - age);
        q::orphaned_tasks(&self.db, &cutoff).await
    }

    /// Take the drain lease of `subsystem` for `ttl`; the other holder if refused.
    pub async fn acquire_lease(
        &self,
        subsystem: &str,
        holder: &str,
        ttl: std::time::Duration,
    ) -> Result<Option<String>, LunaError> {
        lease::acquire(&self.db, subsystem, holder, &expiry(ttl)?).await
    }

    pub async fn renew_lease(
        &self,
        subsystem: &str,
        holder: &str,
        ttl: std::time::Duration,
    ) -> Result<bool, LunaError> {
        lease::renew(&self.db, subsystem, holder, &expiry(ttl)?).await
    }

    pub async fn release_lease(&self, subsystem: &str, holder: &str) -> Result<(), LunaError> {
        lease::release(&self.db, subsystem, holder).await
    }
}

fn expiry(ttl: std::time::Duration) -> Result<String, LunaError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| LunaError::Internal(format!("lease period out of range: {e}")))?;
    Ok(format_timestamp(chrono::Utc::now() + ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use luna_core::TaskVerb;
    use tempfile::tempdir;

    async fn setup() -> (TaskQueue, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open_path(dir.path().join("queue.db")).await.unwrap();
        (TaskQueue::new(db), dir)
    }

    #[tokio::test]
    async fn duplicate_returns_same_id_and_not_added() {
        let (queue, _dir) = setup().await;
        let first = queue
            .add_task(NewTask::parse("pack_osimage:img1", "osimage", "r1").unwrap())
            .await
            .unwrap();
        assert_eq!(first.outcome.as_str(), "added");

        let second = queue
            .add_task(NewTask::parse("pack_osimage:img1", "osimage", "r2").unwrap())
            .await
            .unwrap();
        assert_eq!(second.task_id, first.task_id);
        assert_ne!(second.outcome.as_str(), "added");

        let forced = queue
            .add_task(NewTask::parse("pack_osimage:img1", "osimage", "r2").unwrap().forced())
            .await
            .unwrap();
        assert!(forced.is_added());
        assert_ne!(forced.task_id, first.task_id);
    }

    #[tokio::test]
    async fn noeof_flag_does_not_defeat_deduplication() {
        let (queue, _dir) = setup().await;
        let plain = queue
            .add_task(NewTask::parse("build_osimage:img1", "osimage", "r1").unwrap())
            .await
            .unwrap();
        let flagged = queue
            .add_task(NewTask::parse("build_osimage:img1:noeof", "osimage", "r2").unwrap())
            .await
            .unwrap();
        assert_eq!(flagged.task_id, plain.task_id);
    }

    #[tokio::test]
    async fn when_defers_the_task() {
        let (queue, _dir) = setup().await;
        let descriptor = TaskDescriptor::single(TaskVerb::CleanupOldProvisioning, "img1").unwrap();
        let enqueued = queue
            .add_task(NewTask::new(descriptor, "housekeeper", "r1").when("1h"))
            .await
            .unwrap();

        let task = queue.get_task_details(enqueued.task_id).await.unwrap().unwrap();
        assert!(task.run_after.is_some());
        assert_eq!(
            queue
                .next_task_in_queue("housekeeper", TaskStatus::Queued, None)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn bad_delay_is_rejected() {
        let (queue, _dir) = setup().await;
        let err = queue
            .add_task(NewTask::parse("cleanup_old_file:f", "housekeeper", "r1").unwrap().when("soon"))
            .await
            .unwrap_err();
        assert!(matches!(err, LunaError::InvalidTask(_)));
    }

    #[tokio::test]
    async fn parallel_lookup_is_scoped_to_object() {
        let (queue, _dir) = setup().await;
        queue
            .add_task(NewTask::parse("pack_osimage:a", "osimage", "r1").unwrap())
            .await
            .unwrap();
        let b = queue
            .add_task(NewTask::parse("pack_osimage:b", "osimage", "r2").unwrap())
            .await
            .unwrap();

        assert_eq!(
            queue
                .next_parallel_task_in_queue("osimage", "b", TaskStatus::Queued)
                .await
                .unwrap(),
            Some(b.task_id)
        );
    }

    #[tokio::test]
    async fn parked_task_is_placeholder() {
        let (queue, _dir) = setup().await;
        let parked = queue
            .add_task(
                NewTask::parse("sync_osimage_with_master:img1", "osimage", "r1")
                    .unwrap()
                    .parked(),
            )
            .await
            .unwrap();
        assert_eq!(
            queue.next_task_in_queue("osimage", TaskStatus::Queued, None).await.unwrap(),
            None
        );
        let rows = queue.parked_tasks("osimage", None).await.unwrap();
        assert_eq!(rows[0].id, parked.task_id);
    }
}
