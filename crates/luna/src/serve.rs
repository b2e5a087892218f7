// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `luna serve`: the long-running controller.

use std::time::Duration;

use luna_config::LunaConfig;
use luna_core::LunaError;
use luna_core::types::subsystem;
use luna_gateway::{AuthConfig, GatewayState, ServerConfig, start_server};
use luna_mother::{Janitor, JanitorSettings};
use tracing::{info, warn};

use crate::node::Node;
use crate::shutdown::install_signal_handler;

/// How long shutdown waits for running coordinators.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run_serve(config: LunaConfig) -> Result<(), LunaError> {
    init_tracing(&config.daemon.log_level);

    info!(hostname = %config.daemon.hostname, ha = config.ha.enabled, "starting luna serve");

    let cancel = install_signal_handler();
    let node = Node::build(&config, cancel.clone()).await?;

    // Work queued before a restart.
    for name in [subsystem::OSIMAGE, subsystem::HOUSEKEEPER, subsystem::CONTROL] {
        node.dispatcher.drain(name);
    }

    let janitor = Janitor::new(
        node.dispatcher.clone(),
        JanitorSettings::from_config(&config.queue),
    );
    tokio::spawn(janitor.run(cancel.clone()));

    if config.ha.enabled {
        let journal = node.journal.clone();
        tokio::spawn(async move {
            match journal.startup_sync().await {
                Ok(report) => info!(pulled = report.pulled, unreachable = ?report.unreachable, "startup sync done"),
                Err(e) => warn!(error = %e, "startup sync failed, retrying from the push ticker"),
            }
        });
        tokio::spawn(
            node.journal
                .clone()
                .run_push_ticker(Duration::from_secs(config.ha.push_interval_secs), cancel.clone()),
        );
    }

    if config.api.token.is_none() {
        warn!("api.token is not set; journal and task routes will reject every request");
    }
    let state = GatewayState::new(
        node.dispatcher.clone(),
        node.journal.clone(),
        AuthConfig::new(config.api.token.clone()),
    );
    let server = ServerConfig {
        host: config.api.bind_address.clone(),
        port: config.api.port,
    };
    start_server(&server, state, cancel.clone()).await?;

    cancel.cancel();
    if tokio::time::timeout(DRAIN_TIMEOUT, node.dispatcher.wait_idle())
        .await
        .is_err()
    {
        warn!("coordinators still running at shutdown; the janitor will reap their tasks");
    }
    if let Err(e) = node.db.close().await {
        warn!(error = %e, "database did not close cleanly");
    }

    info!("luna serve shutdown complete");
    Ok(())
}

/// Initialise the tracing subscriber once per process.
///
/// `RUST_LOG` overrides the configured level.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("luna={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
