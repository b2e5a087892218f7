// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The mother coordinator.
//!
//! One invocation drains a subsystem: it claims queued tasks in FIFO order,
//! expands composites into their phases, runs leaves through the
//! [`LeafExecutor`], and finally promotes the subsystem's parked tasks.
//! Invocations are short-lived; the [`Dispatcher`](crate::Dispatcher)
//! starts a new one whenever the queue changes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use luna_config::model::QueueConfig;
use luna_core::types::subsystem;
use luna_core::{
    LeafExecutor, LeafTask, LunaError, QueueTask, TaskDescriptor, TaskVerb, VerbKind,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::expansion;
use crate::queue::{NewTask, TaskQueue};
use crate::status::StatusChannel;

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);
const MIN_LEASE: Duration = Duration::from_secs(1);

/// Timings and identity used by a coordinator invocation.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub heartbeat_interval: Duration,
    /// Pause after moving or discarding a task that does not belong here.
    pub foreign_task_delay: Duration,
    /// Deferral of the cleanup scheduled after a provision.
    pub cleanup_delay: String,
    /// Initiator recorded on status lines written by the coordinator.
    pub username: String,
}

impl CoordinatorSettings {
    pub fn from_config(queue: &QueueConfig) -> Self {
        Self {
            heartbeat_interval: queue.heartbeat_interval(),
            foreign_task_delay: queue.foreign_task_delay(),
            cleanup_delay: queue.cleanup_delay.clone(),
            username: "luna".to_string(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

/// What one step did with the task it claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Expanded { composite_id: i64, phases: usize },
    Completed { task_id: i64 },
    Failed { task_id: i64 },
    Closed { composite_id: i64 },
    /// The verb belongs to another subsystem; the row now lives there.
    Moved { task_id: i64, to: String },
    /// The descriptor could not be parsed; the row was dropped.
    Discarded { task_id: i64 },
    /// Processing hit an unexpected error; the request was failed and purged.
    Aborted { task_id: i64 },
}

/// Totals of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub steps: usize,
    pub completed: usize,
    pub failed: usize,
    /// Other subsystems that received work and need a coordinator.
    pub dispatch: BTreeSet<String>,
}

impl RunSummary {
    fn record(&mut self, outcome: &StepOutcome) {
        self.steps += 1;
        match outcome {
            StepOutcome::Completed { .. } => self.completed += 1,
            StepOutcome::Failed { .. }
            | StepOutcome::Discarded { .. }
            | StepOutcome::Aborted { .. } => self.failed += 1,
            StepOutcome::Moved { to, .. } => {
                self.dispatch.insert(to.clone());
            }
            StepOutcome::Expanded { .. } | StepOutcome::Closed { .. } => {}
        }
    }
}

pub struct MotherCoordinator {
    queue: TaskQueue,
    status: StatusChannel,
    executor: Arc<dyn LeafExecutor>,
    settings: CoordinatorSettings,
    /// Name this coordinator holds subsystem leases under.
    holder: String,
}

impl MotherCoordinator {
    pub fn new(
        queue: TaskQueue,
        status: StatusChannel,
        executor: Arc<dyn LeafExecutor>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            queue,
            status,
            executor,
            settings,
            holder: format!("pid {} ({})", std::process::id(), uuid::Uuid::new_v4()),
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn status(&self) -> &StatusChannel {
        &self.status
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Drain `subsystem` (or only `only_request_id` within it) until neither
    /// queued nor parked work remains.
    ///
    /// A full drain holds the subsystem lease for its whole duration and fails
    /// with [`LunaError::Busy`] while another coordinator, in this or another
    /// process, holds it. Scoped runs take no lease.
    pub async fn run(
        &self,
        subsystem: &str,
        only_request_id: Option<&str>,
    ) -> Result<RunSummary, LunaError> {
        if only_request_id.is_some() {
            return self.drain(subsystem, only_request_id).await;
        }

        let ttl = self.lease_ttl();
        if let Some(holder) = self.queue.acquire_lease(subsystem, &self.holder, ttl).await? {
            return Err(LunaError::Busy(format!(
                "subsystem {subsystem} is being drained by {holder}"
            )));
        }

        let drain = self.drain(subsystem, None);
        tokio::pin!(drain);
        let mut renewal = tokio::time::interval(ttl / 3);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);
        renewal.tick().await;
        let result = loop {
            tokio::select! {
                result = &mut drain => break result,
                _ = renewal.tick() => match self.queue.renew_lease(subsystem, &self.holder, ttl).await {
                    Ok(true) => {}
                    Ok(false) => warn!(subsystem, "drain lease lost"),
                    Err(e) => warn!(subsystem, error = %e, "could not renew drain lease"),
                },
            }
        };

        if let Err(e) = self.queue.release_lease(subsystem, &self.holder).await {
            warn!(subsystem, error = %e, "could not release drain lease");
        }
        result
    }

    /// Lease period: a few heartbeats, so a dead holder is soon replaced.
    fn lease_ttl(&self) -> Duration {
        (self.settings.heartbeat_interval * 4).max(MIN_LEASE)
    }

    async fn drain(
        &self,
        subsystem: &str,
        only_request_id: Option<&str>,
    ) -> Result<RunSummary, LunaError> {
        info!(subsystem, request_id = ?only_request_id, executor = self.executor.name(), "mother started");
        let mut summary = RunSummary::default();

        loop {
            while let Some(outcome) = self.step(subsystem, only_request_id).await? {
                summary.record(&outcome);
            }

            let promoted = self.promote_parked(subsystem, only_request_id).await?;
            let requeued_here = promoted.contains(subsystem);
            summary
                .dispatch
                .extend(promoted.into_iter().filter(|s| s != subsystem));
            if !requeued_here {
                break;
            }
        }

        summary.dispatch.remove(subsystem);
        info!(
            subsystem,
            steps = summary.steps,
            completed = summary.completed,
            failed = summary.failed,
            "mother finished"
        );
        Ok(summary)
    }

    /// Claim and process one task. `None` when nothing is runnable.
    ///
    /// An error while processing a claimed task fails and purges that task's
    /// request and yields [`StepOutcome::Aborted`], so the drain carries on
    /// with other requests. Only a failure to claim is returned as an error.
    pub async fn step(
        &self,
        subsystem: &str,
        only_request_id: Option<&str>,
    ) -> Result<Option<StepOutcome>, LunaError> {
        let Some(task) = self.queue.claim_next_task(subsystem, only_request_id).await? else {
            return Ok(None);
        };
        debug!(task_id = task.id, task = %task.task, request_id = %task.request_id, "claimed task");

        match self.process(subsystem, &task).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                error!(task_id = task.id, task = %task.task, request_id = %task.request_id, error = %e, "task aborted");
                self.status
                    .fail(
                        &task.request_id,
                        &self.settings.username,
                        &format!("{} aborted: {e}", task.task),
                    )
                    .await;
                if let Err(purge) = self
                    .queue
                    .remove_task_from_queue_by_request_id(&task.request_id)
                    .await
                {
                    warn!(request_id = %task.request_id, error = %purge, "could not purge aborted request");
                }
                Ok(Some(StepOutcome::Aborted { task_id: task.id }))
            }
        }
    }

    async fn process(&self, subsystem: &str, task: &QueueTask) -> Result<StepOutcome, LunaError> {
        let descriptor = match task.task.parse::<TaskDescriptor>() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(task_id = task.id, task = %task.task, error = %e, "discarding unknown task");
                tokio::time::sleep(self.settings.foreign_task_delay).await;
                self.queue.remove_task_from_queue(task.id).await?;
                self.status
                    .fail(
                        &task.request_id,
                        &self.settings.username,
                        &format!("unknown task {}: {e}", task.task),
                    )
                    .await;
                return Ok(StepOutcome::Discarded { task_id: task.id });
            }
        };

        if let Some(home) = descriptor.verb.home_subsystem().filter(|home| *home != subsystem) {
            warn!(task_id = task.id, verb = %descriptor.verb, from = subsystem, to = home, "task belongs to another subsystem");
            self.queue.requeue(task.id, home).await?;
            tokio::time::sleep(self.settings.foreign_task_delay).await;
            return Ok(StepOutcome::Moved {
                task_id: task.id,
                to: home.to_string(),
            });
        }

        match descriptor.verb.kind() {
            VerbKind::Composite => self.expand(subsystem, task, &descriptor).await,
            VerbKind::Close => self.close(task, &descriptor).await,
            VerbKind::Leaf => self.execute(subsystem, task, descriptor).await,
        }
    }

    async fn expand(
        &self,
        subsystem: &str,
        task: &QueueTask,
        descriptor: &TaskDescriptor,
    ) -> Result<StepOutcome, LunaError> {
        let phases = expansion::expand(descriptor, task.id)?;
        let count = phases.len();
        for phase in phases {
            let target = phase.verb.home_subsystem().unwrap_or(subsystem).to_string();
            self.queue
                .add_task(NewTask::new(phase, target, &task.request_id).forced())
                .await?;
        }
        info!(composite_id = task.id, task = %task.task, phases = count, "composite expanded");
        Ok(StepOutcome::Expanded {
            composite_id: task.id,
            phases: count,
        })
    }

    async fn close(&self, task: &QueueTask, descriptor: &TaskDescriptor) -> Result<StepOutcome, LunaError> {
        let composite_id: i64 = descriptor.object().parse().map_err(|_| {
            LunaError::InvalidTask(format!("close_task needs a task id, got `{}`", descriptor.object()))
        })?;
        self.queue.remove_task_from_queue(composite_id).await?;
        self.queue.remove_task_from_queue(task.id).await?;
        debug!(composite_id, "composite closed");
        Ok(StepOutcome::Closed { composite_id })
    }

    async fn execute(
        &self,
        subsystem: &str,
        task: &QueueTask,
        descriptor: TaskDescriptor,
    ) -> Result<StepOutcome, LunaError> {
        let label = format!("{} {}", descriptor.verb, descriptor.object());
        let user = &self.settings.username;
        self.status
            .add_message(&task.request_id, user, &format!("{label} started"))
            .await?;

        let leaf = LeafTask {
            task_id: task.id,
            request_id: task.request_id.clone(),
            subsystem: subsystem.to_string(),
            descriptor,
        };
        let result = self.run_with_heartbeat(&leaf).await;
        self.queue.remove_task_from_queue(task.id).await?;

        match result {
            Ok(output) => {
                let line = if output.is_empty() {
                    format!("{label} finished")
                } else {
                    format!("{label} finished: {output}")
                };
                self.status.add_message(&task.request_id, user, &line).await?;
                if leaf.descriptor.verb == TaskVerb::ProvisionOsimage {
                    self.schedule_cleanup(&leaf.descriptor).await;
                }
                if !leaf.descriptor.noeof {
                    self.status.add_eof(&task.request_id, user).await?;
                }
                info!(task_id = task.id, task = %task.task, "task completed");
                Ok(StepOutcome::Completed { task_id: task.id })
            }
            Err(e) => {
                warn!(task_id = task.id, task = %task.task, error = %e, "task failed");
                self.status
                    .add_message(&task.request_id, user, &format!("{label} failed: {e}"))
                    .await?;
                self.queue
                    .remove_task_from_queue_by_request_id(&task.request_id)
                    .await?;
                self.status.add_eof(&task.request_id, user).await?;
                Ok(StepOutcome::Failed { task_id: task.id })
            }
        }
    }

    /// Run the leaf, refreshing the task heartbeat until it returns.
    async fn run_with_heartbeat(&self, leaf: &LeafTask) -> Result<String, LunaError> {
        let run = self.executor.run(leaf);
        tokio::pin!(run);

        let mut ticker = tokio::time::interval(self.settings.heartbeat_interval.max(MIN_HEARTBEAT));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut run => return result,
                _ = ticker.tick() => {
                    if let Err(e) = self.queue.touch_heartbeat(leaf.task_id).await {
                        warn!(task_id = leaf.task_id, error = %e, "could not refresh heartbeat");
                    }
                }
            }
        }
    }

    /// Defer removal of the provisioning files the new build superseded.
    async fn schedule_cleanup(&self, provisioned: &TaskDescriptor) {
        let descriptor = match TaskDescriptor::single(TaskVerb::CleanupOldProvisioning, provisioned.object()) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(error = %e, "cannot describe provisioning cleanup");
                return;
            }
        };
        let task = NewTask::new(
            descriptor,
            subsystem::HOUSEKEEPER,
            uuid::Uuid::new_v4().to_string(),
        )
        .when(&self.settings.cleanup_delay);
        if let Err(e) = self.queue.add_task(task).await {
            warn!(object = provisioned.object(), error = %e, "could not schedule provisioning cleanup");
        }
    }

    /// Requeue every parked task into its home subsystem.
    ///
    /// Returns the subsystems that received tasks.
    async fn promote_parked(
        &self,
        subsystem: &str,
        only_request_id: Option<&str>,
    ) -> Result<BTreeSet<String>, LunaError> {
        let mut targets = BTreeSet::new();
        for task in self.queue.parked_tasks(subsystem, only_request_id).await? {
            let target = task
                .task
                .parse::<TaskDescriptor>()
                .ok()
                .and_then(|d| d.verb.home_subsystem())
                .unwrap_or(subsystem);
            self.queue.requeue(task.id, target).await?;
            info!(task_id = task.id, task = %task.task, from = subsystem, to = target, "parked task promoted");
            targets.insert(target.to_string());
        }
        Ok(targets)
    }
}
