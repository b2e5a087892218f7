// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring shared by every command that touches the queue or the journal.

use std::sync::Arc;
use std::time::Duration;

use luna_config::LunaConfig;
use luna_core::LunaError;
use luna_journal::{FunctionRegistry, HaController, Journal, PeerClient};
use luna_mother::{
    CoordinatorSettings, Dispatcher, MotherCoordinator, ShellExecutor, StatusChannel, TaskQueue,
    register_task_handlers,
};
use luna_storage::Database;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Storage, coordinator and journal of one controller.
pub struct Node {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub journal: Journal,
}

impl Node {
    pub async fn build(config: &LunaConfig, cancel: CancellationToken) -> Result<Self, LunaError> {
        let db = Database::open(&config.storage).await?;
        let coordinator = coordinator(config, &db);
        let dispatcher = Dispatcher::start(coordinator, config.queue.grace_period(), cancel);

        let ha = Arc::new(HaController::init(db.clone(), config).await?);
        let registry = Arc::new(FunctionRegistry::new());
        let client = PeerClient::new(
            config.api.token.as_deref(),
            Duration::from_secs(config.api.request_timeout_secs),
        )?;
        let journal = Journal::new(db.clone(), ha.clone(), registry.clone(), client);
        register_task_handlers(&registry, ha, dispatcher.clone());
        info!(functions = registry.keys().len(), "journal functions registered");

        Ok(Self {
            db,
            dispatcher,
            journal,
        })
    }
}

/// A coordinator running leaves through the configured shell commands.
pub fn coordinator(config: &LunaConfig, db: &Database) -> Arc<MotherCoordinator> {
    Arc::new(MotherCoordinator::new(
        TaskQueue::new(db.clone()),
        StatusChannel::new(db.clone()),
        Arc::new(ShellExecutor::new(&config.operations)),
        CoordinatorSettings::from_config(&config.queue),
    ))
}
