// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task queue, status channel and the mother coordinator.
//!
//! Long-running work enters through [`TaskQueue::add_task`], progress is
//! reported per request id through the [`StatusChannel`], and the
//! [`Dispatcher`] runs one [`MotherCoordinator`] drain per subsystem.

pub mod coordinator;
pub mod dispatch;
pub mod executor;
pub mod expansion;
pub mod janitor;
pub mod queue;
pub mod replication;
pub mod status;
pub mod submission;

pub use coordinator::{CoordinatorSettings, MotherCoordinator, RunSummary, StepOutcome};
pub use dispatch::{CoordinatorRequest, DispatchDecision, Dispatcher, SubmitOutcome};
pub use executor::ShellExecutor;
pub use janitor::{Janitor, JanitorSettings, SweepReport};
pub use queue::{EnqueueOutcome, Enqueued, NewTask, TaskQueue};
pub use replication::register_task_handlers;
pub use status::{MESSAGE_SEPARATOR, StatusChannel, StatusReport};
pub use submission::{TaskSubmission, journal_function};
