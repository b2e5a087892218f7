// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Leaf operation trait, the boundary between the coordinator and the
//! code that actually packs images or powers nodes.

use async_trait::async_trait;

use crate::descriptor::TaskDescriptor;
use crate::error::LunaError;

/// A leaf task handed to an executor.
#[derive(Debug, Clone)]
pub struct LeafTask {
    pub task_id: i64,
    pub request_id: String,
    pub subsystem: String,
    pub descriptor: TaskDescriptor,
}

/// Executes one concrete unit of work.
///
/// Implementations run to completion before returning. The returned string is
/// written to the request's status stream; an error fails the whole request.
#[async_trait]
pub trait LeafExecutor: Send + Sync + 'static {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Runs the leaf task.
    async fn run(&self, task: &LeafTask) -> Result<String, LunaError>;
}
