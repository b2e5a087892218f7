// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `luna mother`: drain a subsystem in the foreground.
//!
//! Runs the same coordinator `serve` uses, without the dispatcher. Work the
//! run hands to other subsystems is drained afterwards in this process.
//! Full drains share the subsystem lease with a running daemon, so this
//! refuses to start on a subsystem the daemon is draining.

use std::collections::{BTreeSet, VecDeque};

use luna_config::LunaConfig;
use luna_core::LunaError;
use luna_storage::Database;
use tracing::info;

use crate::node::coordinator;
use crate::serve::init_tracing;

pub async fn run_mother(
    config: LunaConfig,
    subsystem: &str,
    request_id: Option<&str>,
) -> Result<(), LunaError> {
    init_tracing(&config.daemon.log_level);

    let db = Database::open(&config.storage).await?;
    let coordinator = coordinator(&config, &db);

    let mut pending = VecDeque::from([(subsystem.to_string(), request_id.map(str::to_string))]);
    let mut visited = BTreeSet::new();
    while let Some((name, scope)) = pending.pop_front() {
        let summary = match coordinator.run(&name, scope.as_deref()).await {
            Ok(summary) => summary,
            // Follow-ups held elsewhere are drained by their holder.
            Err(LunaError::Busy(reason)) if !visited.is_empty() => {
                println!("{name}: skipped, {reason}");
                visited.insert(name);
                continue;
            }
            Err(e) => return Err(e),
        };
        info!(
            subsystem = %name,
            steps = summary.steps,
            completed = summary.completed,
            failed = summary.failed,
            "coordinator run finished"
        );
        println!(
            "{name}: {} steps, {} completed, {} failed",
            summary.steps, summary.completed, summary.failed
        );
        visited.insert(name);
        for next in summary.dispatch {
            if !visited.contains(&next) {
                pending.push_back((next, None));
            }
        }
    }
    Ok(())
}
