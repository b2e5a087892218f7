// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HA role and sync state.
//!
//! The persisted `ha_state` singleton is the source of truth; configuration
//! seeds it at startup and journaled `Ha.set_master` calls move it.

use std::time::Duration;

use luna_config::model::{ControllerConfig, LunaConfig};
use luna_core::{HaState, LunaError, Role};
use luna_storage::Database;
use luna_storage::queries::ha;
use tracing::{info, warn};

/// Who the siblings are and how to reach them.
#[derive(Debug, Clone)]
pub struct Topology {
    me: String,
    sharedip: bool,
    controllers: Vec<ControllerConfig>,
}

impl Topology {
    pub fn new(me: impl Into<String>, sharedip: bool, controllers: Vec<ControllerConfig>) -> Self {
        Self {
            me: me.into(),
            sharedip,
            controllers,
        }
    }

    pub fn from_config(config: &LunaConfig) -> Self {
        Self::new(
            config.daemon.hostname.clone(),
            config.ha.sharedip,
            config.ha.controllers.clone(),
        )
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn controller(&self, host: &str) -> Option<&ControllerConfig> {
        self.controllers.iter().find(|c| c.hostname == host)
    }

    pub fn is_known(&self, host: &str) -> bool {
        self.controller(host).is_some()
    }

    /// Every controller except this one, in configuration order.
    pub fn siblings(&self) -> impl Iterator<Item = &ControllerConfig> {
        self.controllers.iter().filter(move |c| c.hostname != self.me)
    }

    pub fn endpoint(&self, host: &str) -> Option<&str> {
        self.controller(host).map(|c| c.endpoint.as_str())
    }

    /// The controller a row for `host` is handed to.
    ///
    /// Behind a shared IP a sibling may only be reachable through its relay.
    pub fn route(&self, host: &str) -> String {
        if self.sharedip {
            if let Some(relay) = self
                .controller(host)
                .and_then(|c| c.relay.as_deref())
                .filter(|relay| *relay != self.me)
            {
                return relay.to_string();
            }
        }
        host.to_string()
    }

    /// The controller that takes the master role when none is recorded.
    fn initial_master(&self) -> Option<&str> {
        self.controllers
            .iter()
            .find(|c| !c.shadow)
            .map(|c| c.hostname.as_str())
    }
}

pub struct HaController {
    db: Database,
    topology: Topology,
    insync_poll: Duration,
}

impl HaController {
    /// Merge configuration into the persisted state.
    ///
    /// A standalone controller is its own master and always in sync. With HA
    /// enabled the controller starts out of sync until `startup_sync` ran.
    pub async fn init(db: Database, config: &LunaConfig) -> Result<Self, LunaError> {
        let topology = Topology::from_config(config);
        let me = topology.me().to_string();
        let mut state = ha::load(&db).await?;

        state.enabled = config.ha.enabled;
        state.sharedip = config.ha.sharedip;
        state.shadow = config.ha.shadow || topology.controller(&me).is_some_and(|c| c.shadow);

        if state.enabled {
            let master = state
                .master
                .clone()
                .filter(|m| topology.is_known(m))
                .or_else(|| topology.initial_master().map(str::to_string));
            state.role = role_for(&me, master.as_deref());
            state.master = master;
            state.insync = false;
        } else {
            state.role = Role::Master;
            state.master = Some(me.clone());
            state.insync = true;
        }
        ha::save(&db, &state).await?;
        info!(
            enabled = state.enabled,
            role = %state.role,
            master = ?state.master,
            shadow = state.shadow,
            "ha state initialised"
        );

        Ok(Self {
            db,
            topology,
            insync_poll: Duration::from_secs(1),
        })
    }

    /// Override the pause between in-sync checks.
    pub fn with_insync_poll(mut self, poll: Duration) -> Self {
        self.insync_poll = poll;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn me(&self) -> &str {
        self.topology.me()
    }

    pub async fn state(&self) -> Result<HaState, LunaError> {
        ha::load(&self.db).await
    }

    pub async fn is_master(&self) -> Result<bool, LunaError> {
        Ok(self.state().await?.is_master())
    }

    pub async fn set_insync(&self, insync: bool) -> Result<(), LunaError> {
        ha::set_insync(&self.db, insync).await
    }

    /// Let this controller originate changes even when it is not in sync.
    pub async fn set_overrule(&self, overrule: bool) -> Result<(), LunaError> {
        warn!(overrule, "in-sync overrule changed");
        ha::set_overrule(&self.db, overrule).await
    }

    /// Check the in-sync flag up to `retries + 1` times, pausing in between.
    pub async fn wait_insync(&self, retries: u32) -> Result<(), LunaError> {
        for attempt in 0..=retries {
            let state = self.state().await?;
            if state.insync || state.overrule {
                return Ok(());
            }
            if attempt < retries {
                tokio::time::sleep(self.insync_poll).await;
            }
        }
        Err(LunaError::OutOfSync(format!(
            "{} did not reach sync after {retries} retries",
            self.me()
        )))
    }

    /// Record `host` as master and derive this controller's role.
    pub async fn apply_master(&self, host: &str) -> Result<Role, LunaError> {
        if !self.topology.is_known(host) {
            return Err(LunaError::Replication {
                host: host.to_string(),
                message: "not a configured controller".to_string(),
            });
        }
        let role = role_for(self.me(), Some(host));
        ha::set_role(&self.db, role, Some(host)).await?;
        info!(master = host, role = %role, "master changed");
        Ok(role)
    }
}

fn role_for(me: &str, master: Option<&str>) -> Role {
    match master {
        Some(master) if master == me => Role::Master,
        _ => Role::Backup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn controller(hostname: &str, relay: Option<&str>, shadow: bool) -> ControllerConfig {
        ControllerConfig {
            hostname: hostname.to_string(),
            endpoint: format!("http://{hostname}:7050"),
            relay: relay.map(str::to_string),
            shadow,
        }
    }

    fn config(me: &str) -> LunaConfig {
        let mut config = LunaConfig::default();
        config.daemon.hostname = me.to_string();
        config.ha.enabled = true;
        config.ha.controllers = vec![
            controller("ctrl1", None, false),
            controller("ctrl2", None, false),
        ];
        config
    }

    #[test]
    fn route_goes_through_relay_only_with_sharedip() {
        let controllers = vec![
            controller("ctrl1", None, false),
            controller("ctrl2", None, false),
            controller("ctrl3", Some("ctrl2"), true),
        ];
        let direct = Topology::new("ctrl1", false, controllers.clone());
        assert_eq!(direct.route("ctrl3"), "ctrl3");

        let shared = Topology::new("ctrl1", true, controllers.clone());
        assert_eq!(shared.route("ctrl3"), "ctrl2");
        assert_eq!(shared.route("ctrl2"), "ctrl2");

        let relay = Topology::new("ctrl2", true, controllers);
        assert_eq!(relay.route("ctrl3"), "ctrl3");
        assert_eq!(relay.siblings().count(), 2);
    }

    #[tokio::test]
    async fn first_listed_controller_becomes_master() {
        let dir = tempdir().unwrap();
        let db = Database::open_path(dir.path().join("ha.db")).await.unwrap();

        let ha = HaController::init(db.clone(), &config("ctrl2")).await.unwrap();
        let state = ha.state().await.unwrap();
        assert_eq!(state.role, Role::Backup);
        assert_eq!(state.master.as_deref(), Some("ctrl1"));
        assert!(!state.insync);
    }

    #[tokio::test]
    async fn standalone_controller_is_master_and_in_sync() {
        let dir = tempdir().unwrap();
        let db = Database::open_path(dir.path().join("ha.db")).await.unwrap();
        let mut config = config("ctrl1");
        config.ha.enabled = false;

        let ha = HaController::init(db, &config).await.unwrap();
        assert!(ha.is_master().await.unwrap());
        ha.wait_insync(0).await.unwrap();
    }

    #[tokio::test]
    async fn wait_insync_gives_up_unless_overruled() {
        let dir = tempdir().unwrap();
        let db = Database::open_path(dir.path().join("ha.db")).await.unwrap();
        let ha = HaController::init(db, &config("ctrl1"))
            .await
            .unwrap()
            .with_insync_poll(Duration::from_millis(5));

        let err = ha.wait_insync(2).await.unwrap_err();
        assert!(matches!(err, LunaError::OutOfSync(_)));

        ha.set_overrule(true).await.unwrap();
        ha.wait_insync(0).await.unwrap();
    }

    #[tokio::test]
    async fn apply_master_flips_role() {
        let dir = tempdir().unwrap();
        let db = Database::open_path(dir.path().join("ha.db")).await.unwrap();
        let ha = HaController::init(db, &config("ctrl1")).await.unwrap();
        assert!(ha.is_master().await.unwrap());

        assert_eq!(ha.apply_master("ctrl2").await.unwrap(), Role::Backup);
        assert!(!ha.is_master().await.unwrap());
        assert!(ha.apply_master("ctrl9").await.is_err());
    }
}
