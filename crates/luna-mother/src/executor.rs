// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shell-backed leaf operations.
//!
//! Each verb maps to an operator-supplied command line in
//! `[operations.commands]`. Placeholders are substituted before the command
//! runs through `sh -c`:
//!
//! | placeholder    | value                                   |
//! |----------------|-----------------------------------------|
//! | `{object}`     | the object the task mutates             |
//! | `{param0}`...  | positional parameters of the descriptor |
//! | `{request_id}` | request id of the task tree             |
//!
//! Substituted values must be plain words (see [`is_plain_word`]); anything
//! else is refused before a shell is started.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use luna_config::model::OperationsConfig;
use luna_core::{LeafExecutor, LeafTask, LunaError, is_plain_word};
use tracing::{debug, info};

/// Runs configured shell commands for leaf verbs.
pub struct ShellExecutor {
    commands: BTreeMap<String, String>,
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(config: &OperationsConfig) -> Self {
        Self {
            commands: config.commands.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// The command line for `task`, placeholders substituted.
    pub fn render(&self, task: &LeafTask) -> Result<String, LunaError> {
        let verb = task.descriptor.verb.as_str();
        let template = self.commands.get(verb).ok_or_else(|| {
            LunaError::Operation(format!("no command configured for {verb}"))
        })?;

        let mut values = task
            .descriptor
            .params
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(task.request_id.as_str()));
        if let Some(bad) = values.find(|v| !is_plain_word(v)) {
            return Err(LunaError::Operation(format!(
                "refusing to run {verb}: `{bad}` is not a plain word"
            )));
        }

        let mut command = template
            .replace("{object}", task.descriptor.object())
            .replace("{request_id}", &task.request_id);
        for (i, param) in task.descriptor.params.iter().enumerate() {
            command = command.replace(&format!("{{param{i}}}"), param);
        }
        Ok(command)
    }
}

#[async_trait]
impl LeafExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn run(&self, task: &LeafTask) -> Result<String, LunaError> {
        let command = self.render(task)?;
        let verb = task.descriptor.verb.as_str();
        debug!(task_id = task.task_id, verb, command = %command, "running leaf command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| LunaError::Timeout {
                duration: self.timeout,
            })?
            .map_err(|e| LunaError::Operation(format!("failed to start {verb}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let detail = if stderr.is_empty() { stdout } else { stderr };
            return Err(LunaError::Operation(format!(
                "{verb} of {} exited with {exit_code}: {detail}",
                task.descriptor.object()
            )));
        }

        info!(task_id = task.task_id, verb, object = task.descriptor.object(), "leaf command finished");
        Ok(stdout)
    }
}
