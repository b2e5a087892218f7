// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-shot journal, HA and configuration commands.

use luna_config::LunaConfig;
use luna_core::LunaError;
use tokio_util::sync::CancellationToken;

use crate::node::Node;
use crate::serve::init_tracing;

async fn node(config: &LunaConfig) -> Result<(Node, CancellationToken), LunaError> {
    init_tracing(&config.daemon.log_level);
    let cancel = CancellationToken::new();
    let node = Node::build(config, cancel.clone()).await?;
    Ok((node, cancel))
}

pub async fn run_push(config: LunaConfig) -> Result<(), LunaError> {
    let (node, _cancel) = node(&config).await?;
    let report = node.journal.pushto_controllers(None).await?;
    println!("delivered {} entries", report.delivered);
    if !report.failed_hosts.is_empty() {
        println!("unreachable: {}", report.failed_hosts.join(", "));
    }
    Ok(())
}

pub async fn run_pull(config: LunaConfig) -> Result<(), LunaError> {
    let (node, _cancel) = node(&config).await?;
    let report = node.journal.pullfrom_controllers().await?;
    println!("pulled {} entries", report.pulled);
    if !report.unreachable.is_empty() {
        println!("unreachable: {}", report.unreachable.join(", "));
    }
    Ok(())
}

/// Apply inbound rows and run whatever they queued before exiting.
pub async fn run_handle(config: LunaConfig) -> Result<(), LunaError> {
    let (node, _cancel) = node(&config).await?;
    let report = node.journal.handle_requests().await?;
    node.dispatcher.wait_idle().await;
    println!(
        "applied {}, discarded {}, failed {}",
        report.applied, report.discarded, report.failed
    );
    Ok(())
}

pub async fn run_set_master(config: LunaConfig, host: &str) -> Result<(), LunaError> {
    let (node, _cancel) = node(&config).await?;
    let role = node.journal.set_master(host).await?;
    let push = node.journal.pushto_controllers(None).await?;
    println!("{host} is master, this controller is {role}");
    if !push.failed_hosts.is_empty() {
        println!(
            "not yet told: {} (the rows stay queued for the next push)",
            push.failed_hosts.join(", ")
        );
    }
    Ok(())
}

pub fn run_config_check(config: &LunaConfig, show: bool) -> Result<(), LunaError> {
    println!(
        "configuration valid: controller {}, ha {}",
        config.daemon.hostname,
        if config.ha.enabled { "enabled" } else { "disabled" }
    );
    if show {
        let rendered = luna_config::to_toml(config)
            .map_err(|e| LunaError::Config(format!("cannot render configuration: {e}")))?;
        println!("{rendered}");
    }
    Ok(())
}
