// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Coordinator dispatch.
//!
//! Everything that changes a queue sends a [`CoordinatorRequest`] to the
//! [`Dispatcher`]. The dispatcher worker owns the per-subsystem leases: at
//! most one full drain runs per subsystem, and a request that arrives while
//! one is running sets the lease's pending flag so the running drain loops
//! once more instead of being lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use luna_core::{LunaError, TaskStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::coordinator::{MotherCoordinator, RunSummary};
use crate::queue::{EnqueueOutcome, NewTask, TaskQueue};
use crate::status::StatusChannel;

/// Wait before asking again for a drain another process was running.
const BUSY_RETRY: Duration = Duration::from_secs(5);

/// Work for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorRequest {
    /// Drain every eligible task of the subsystem.
    Drain { subsystem: String },
    /// Run only the tasks of one request, next to a full drain on other objects.
    Scoped {
        subsystem: String,
        request_id: String,
    },
}

/// What the dispatch rule decided for a freshly added task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchDecision {
    Drain,
    Scoped,
    /// An earlier coordinator will reach the task.
    Deferred,
}

/// Reply to a task submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    /// Request id to poll. For a duplicate this is the request that owns the live row.
    pub request_id: String,
    pub task_id: i64,
    pub added: bool,
    /// Status text read after the grace period, or the enqueue outcome.
    pub message: String,
    /// The request already ended within the grace period.
    pub complete: bool,
}

#[derive(Default)]
struct Lease {
    running: Arc<Mutex<()>>,
    pending: AtomicBool,
}

struct Inner {
    coordinator: Arc<MotherCoordinator>,
    leases: DashMap<String, Arc<Lease>>,
    scoped: DashSet<(String, String)>,
    tx: mpsc::UnboundedSender<CoordinatorRequest>,
    /// Requests sent but not yet finished, for `wait_idle`.
    in_flight: AtomicUsize,
    grace_period: Duration,
    cancel: CancellationToken,
}

/// Handle to the dispatcher worker. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Spawn the dispatcher worker. It stops when `cancel` fires.
    pub fn start(
        coordinator: Arc<MotherCoordinator>,
        grace_period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            coordinator,
            leases: DashMap::new(),
            scoped: DashSet::new(),
            tx,
            in_flight: AtomicUsize::new(0),
            grace_period,
            cancel,
        });
        tokio::spawn(worker(inner.clone(), rx));
        Self { inner }
    }

    pub fn queue(&self) -> &TaskQueue {
        self.inner.coordinator.queue()
    }

    pub fn status(&self) -> &StatusChannel {
        self.inner.coordinator.status()
    }

    pub fn coordinator(&self) -> &Arc<MotherCoordinator> {
        &self.inner.coordinator
    }

    pub fn request(&self, request: CoordinatorRequest) {
        self.inner.request(request);
    }

    /// Ask for a full drain of `subsystem`.
    pub fn drain(&self, subsystem: &str) {
        self.request(CoordinatorRequest::Drain {
            subsystem: subsystem.to_string(),
        });
    }

    /// Apply the dispatch rule to a task that was just added.
    pub async fn dispatch_new(
        &self,
        subsystem: &str,
        task_id: i64,
        object: &str,
        request_id: &str,
    ) -> Result<DispatchDecision, LunaError> {
        let queue = self.queue();
        if queue.next_task_in_queue(subsystem, TaskStatus::Queued, None).await? == Some(task_id) {
            self.drain(subsystem);
            return Ok(DispatchDecision::Drain);
        }
        if queue
            .next_parallel_task_in_queue(subsystem, object, TaskStatus::Queued)
            .await?
            == Some(task_id)
        {
            self.request(CoordinatorRequest::Scoped {
                subsystem: subsystem.to_string(),
                request_id: request_id.to_string(),
            });
            return Ok(DispatchDecision::Scoped);
        }
        debug!(task_id, subsystem, "task waits for a running coordinator");
        Ok(DispatchDecision::Deferred)
    }

    /// Enqueue, dispatch, wait the grace period and read the status once.
    pub async fn submit(&self, task: NewTask) -> Result<SubmitOutcome, LunaError> {
        let subsystem = task.subsystem.clone();
        let request_id = task.request_id.clone();
        let object = task.descriptor.object().to_string();

        let enqueued = self.queue().add_task(task).await?;
        if enqueued.outcome == EnqueueOutcome::AlreadyQueued {
            let owner = self
                .queue()
                .get_task_details(enqueued.task_id)
                .await?
                .map(|t| t.request_id)
                .unwrap_or(request_id);
            return Ok(SubmitOutcome {
                request_id: owner,
                task_id: enqueued.task_id,
                added: false,
                message: enqueued.outcome.to_string(),
                complete: false,
            });
        }

        self.dispatch_new(&subsystem, enqueued.task_id, &object, &request_id)
            .await?;
        tokio::time::sleep(self.inner.grace_period).await;

        let (message, complete) = match self.status().get_status(&request_id).await? {
            Some(report) => (report.message, report.complete),
            None => (String::new(), false),
        };
        Ok(SubmitOutcome {
            request_id,
            task_id: enqueued.task_id,
            added: true,
            message,
            complete,
        })
    }

    /// Resolve once every request sent so far has been fully served.
    pub async fn wait_idle(&self) {
        while self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) == 0
    }
}

impl Inner {
    fn request(&self, request: CoordinatorRequest) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(request).is_err() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            debug!("dispatcher stopped, request dropped");
        }
    }

    fn done(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn lease(&self, subsystem: &str) -> Arc<Lease> {
        self.leases.entry(subsystem.to_string()).or_default().clone()
    }

    fn follow_up(&self, summary: &RunSummary) {
        for subsystem in &summary.dispatch {
            self.request(CoordinatorRequest::Drain {
                subsystem: subsystem.clone(),
            });
        }
    }
}

async fn worker(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<CoordinatorRequest>) {
    info!("dispatcher started");
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => handle(&inner, request),
                None => break,
            },
        }
    }
    rx.close();
    while rx.try_recv().is_ok() {
        inner.done();
    }
    info!("dispatcher stopped");
}

fn handle(inner: &Arc<Inner>, request: CoordinatorRequest) {
    match request {
        CoordinatorRequest::Drain { subsystem } => {
            let lease = inner.lease(&subsystem);
            lease.pending.store(true, Ordering::SeqCst);
            match lease.running.clone().try_lock_owned() {
                Ok(guard) => {
                    tokio::spawn(drain(inner.clone(), subsystem, lease, guard));
                }
                Err(_) => {
                    debug!(subsystem = %subsystem, "drain already running, marked pending");
                    inner.done();
                }
            }
        }
        CoordinatorRequest::Scoped {
            subsystem,
            request_id,
        } => {
            let key = (subsystem.clone(), request_id.clone());
            if inner.scoped.insert(key) {
                tokio::spawn(scoped(inner.clone(), subsystem, request_id));
            } else {
                debug!(subsystem = %subsystem, request_id = %request_id, "scoped run already active");
                inner.done();
            }
        }
    }
}

async fn drain(inner: Arc<Inner>, subsystem: String, lease: Arc<Lease>, guard: OwnedMutexGuard<()>) {
    let mut guard = Some(guard);
    loop {
        while lease.pending.swap(false, Ordering::SeqCst) {
            if inner.cancel.is_cancelled() {
                break;
            }
            match inner.coordinator.run(&subsystem, None).await {
                Ok(summary) => inner.follow_up(&summary),
                Err(LunaError::Busy(reason)) => {
                    info!(subsystem = %subsystem, reason = %reason, "drain refused, retrying later");
                    retry_later(&inner, &subsystem);
                }
                Err(e) => error!(subsystem = %subsystem, error = %e, "mother run failed"),
            }
        }
        drop(guard.take());

        if inner.cancel.is_cancelled() || !lease.pending.load(Ordering::SeqCst) {
            break;
        }
        match lease.running.clone().try_lock_owned() {
            Ok(next) => guard = Some(next),
            Err(_) => break,
        }
    }
    inner.done();
}

fn retry_later(inner: &Arc<Inner>, subsystem: &str) {
    let inner = inner.clone();
    let subsystem = subsystem.to_string();
    tokio::spawn(async move {
        tokio::select! {
            _ = inner.cancel.cancelled() => {}
            _ = tokio::time::sleep(BUSY_RETRY) => inner.request(CoordinatorRequest::Drain { subsystem }),
        }
    });
}

async fn scoped(inner: Arc<Inner>, subsystem: String, request_id: String) {
    match inner.coordinator.run(&subsystem, Some(&request_id)).await {
        Ok(summary) => inner.follow_up(&summary),
        Err(e) => error!(subsystem = %subsystem, request_id = %request_id, error = %e, "scoped mother run failed"),
    }
    inner.scoped.remove(&(subsystem.clone(), request_id));

    // Work the scoped run stepped over belongs to a full drain.
    match inner
        .coordinator
        .queue()
        .next_task_in_queue(&subsystem, TaskStatus::Queued, None)
        .await
    {
        Ok(Some(_)) => inner.request(CoordinatorRequest::Drain { subsystem }),
        Ok(None) => {}
        Err(e) => error!(subsystem = %subsystem, error = %e, "could not inspect queue"),
    }
    inner.done();
}
