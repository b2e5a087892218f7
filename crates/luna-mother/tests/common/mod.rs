// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared fixtures for the coordinator and dispatcher tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use luna_core::{LeafExecutor, LeafTask, LunaError, TaskVerb};
use luna_mother::{CoordinatorSettings, MotherCoordinator, StatusChannel, TaskQueue};
use luna_storage::Database;
use tempfile::TempDir;

/// Records every leaf it runs as `"<verb> <object>"`, in completion order.
#[derive(Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<String>>,
    failing: Vec<TaskVerb>,
    delays: HashMap<String, Duration>,
    running: AtomicUsize,
    peak: AtomicUsize,
    per_object: Mutex<HashMap<String, (usize, usize)>>,
}

impl MockExecutor {
    pub fn failing(verbs: &[TaskVerb]) -> Self {
        Self {
            failing: verbs.to_vec(),
            ..Self::default()
        }
    }

    /// Leaves on `object` take `delay`.
    pub fn slow(mut self, object: &str, delay: Duration) -> Self {
        self.delays.insert(object.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Most leaves that ever ran at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Most leaves that ever ran on `object` at the same time.
    pub fn peak_on(&self, object: &str) -> usize {
        self.per_object
            .lock()
            .unwrap()
            .get(object)
            .map_or(0, |(_, peak)| *peak)
    }
}

#[async_trait]
impl LeafExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(&self, task: &LeafTask) -> Result<String, LunaError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let object = task.descriptor.object().to_string();
        {
            let mut per_object = self.per_object.lock().unwrap();
            let (running, peak) = per_object.entry(object.clone()).or_default();
            *running += 1;
            *peak = (*peak).max(*running);
        }
        if let Some(delay) = self.delays.get(&object) {
            tokio::time::sleep(*delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", task.descriptor.verb, object));
        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Some((running, _)) = self.per_object.lock().unwrap().get_mut(&object) {
            *running -= 1;
        }

        if self.failing.contains(&task.descriptor.verb) {
            return Err(LunaError::Operation("boom".to_string()));
        }
        Ok(String::new())
    }
}

pub struct Fixture {
    pub coordinator: Arc<MotherCoordinator>,
    pub executor: Arc<MockExecutor>,
    pub queue: TaskQueue,
    pub status: StatusChannel,
    pub db: Database,
    _dir: TempDir,
}

pub fn settings() -> CoordinatorSettings {
    CoordinatorSettings {
        heartbeat_interval: Duration::from_millis(20),
        foreign_task_delay: Duration::ZERO,
        cleanup_delay: "1h".to_string(),
        username: "luna".to_string(),
    }
}

pub async fn fixture(executor: MockExecutor) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open_path(dir.path().join("luna.db")).await.unwrap();
    let queue = TaskQueue::new(db.clone());
    let status = StatusChannel::new(db.clone());
    let executor = Arc::new(executor);
    let coordinator = Arc::new(MotherCoordinator::new(
        queue.clone(),
        status.clone(),
        executor.clone(),
        settings(),
    ));
    Fixture {
        coordinator,
        executor,
        queue,
        status,
        db,
        _dir: dir,
    }
}

/// Task strings of a subsystem, in service order.
pub async fn tasks(queue: &TaskQueue, subsystem: &str) -> Vec<String> {
    queue
        .list_tasks(Some(subsystem))
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.task)
        .collect()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
