// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task submission body, shared by the HTTP route and the journal payload.

use luna_core::types::subsystem;
use luna_core::{LunaError, TaskDescriptor, TaskVerb};
use serde::{Deserialize, Serialize};

use crate::queue::NewTask;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub verb: TaskVerb,
    /// Shorthand for single-parameter verbs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl TaskSubmission {
    pub fn descriptor(&self) -> Result<TaskDescriptor, LunaError> {
        let params = if self.params.is_empty() {
            self.object.iter().cloned().collect()
        } else {
            self.params.clone()
        };
        TaskDescriptor::new(self.verb, params)
    }

    /// The queue row for this submission, honouring `force` and `when`.
    pub fn to_task(
        &self,
        subsystem: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Result<NewTask, LunaError> {
        let mut task = NewTask::new(self.descriptor()?, subsystem, request_id);
        task.force = self.force;
        task.when = self.when.clone();
        Ok(task)
    }
}

/// Journal function replicating `verb` submitted to `subsystem`, and whether
/// only the master applies it. Housekeeping stays local.
pub fn journal_function(subsystem: &str, verb: TaskVerb) -> Option<(String, bool)> {
    match subsystem {
        subsystem::OSIMAGE => Some((format!("OSImage.{verb}"), false)),
        subsystem::CONTROL => Some((format!("Control.{verb}"), true)),
        _ => None,
    }
}
