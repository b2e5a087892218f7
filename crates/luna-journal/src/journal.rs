// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The replication journal.
//!
//! Originating a change writes one row per sibling controller; a push
//! delivers rows grouped by next hop and deletes them only after the
//! destination accepted the batch, so delivery is at-least-once. Receivers
//! store rows addressed to them as inbound and replay them through the
//! [`FunctionRegistry`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use luna_core::types::timestamp_now;
use luna_core::{JournalEntry, LunaError, Role};
use luna_storage::Database;
use luna_storage::queries::{journal as j, status};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::PeerClient;
use crate::ha::HaController;
use crate::registry::{FunctionRegistry, JournalCall};

/// Built-in function moving the master role.
pub const HA_SET_MASTER: &str = "Ha.set_master";
/// Built-in function appending a status line on the controller that owns a request.
pub const STATUS_ADD_MESSAGE: &str = "Status.add_message";

/// A change to replicate to the sibling controllers.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalRequest {
    pub function: String,
    pub object: String,
    pub param: String,
    pub payload: serde_json::Value,
    /// Only the master applies the row.
    pub masteronly: bool,
    /// Local request id, echoed back in failure reports.
    pub misc: String,
    /// Push right away instead of waiting for the next tick.
    pub sendnow: bool,
    /// In-sync checks before giving up.
    pub keeptrying: u32,
}

impl JournalRequest {
    pub fn new(function: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            object: object.into(),
            param: String::new(),
            payload: serde_json::Value::Null,
            masteronly: false,
            misc: String::new(),
            sendnow: true,
            keeptrying: 5,
        }
    }

    pub fn param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn masteronly(mut self, masteronly: bool) -> Self {
        self.masteronly = masteronly;
        self
    }

    pub fn misc(mut self, misc: impl Into<String>) -> Self {
        self.misc = misc.into();
        self
    }

    pub fn sendnow(mut self, sendnow: bool) -> Self {
        self.sendnow = sendnow;
        self
    }

    pub fn keeptrying(mut self, keeptrying: u32) -> Self {
        self.keeptrying = keeptrying;
        self
    }
}

/// How `add_request` disposed of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAccepted {
    /// HA is disabled; nothing to replicate.
    NotReplicated,
    /// Shadow controllers never originate rows.
    Shadow,
    Journaled { entries: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleReport {
    pub applied: usize,
    /// Master-only rows dropped on a backup.
    pub discarded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub inbound: usize,
    pub forwarded: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub failed_hosts: Vec<String>,
    /// Another push was running and will pick up this trigger.
    pub coalesced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub pulled: usize,
    pub unreachable: Vec<String>,
}

struct Inner {
    db: Database,
    ha: Arc<HaController>,
    registry: Arc<FunctionRegistry>,
    client: PeerClient,
    push_gate: Semaphore,
    push_pending: AtomicBool,
    handle_lock: Mutex<()>,
}

/// Handle to the journal. Cheap to clone.
#[derive(Clone)]
pub struct Journal {
    inner: Arc<Inner>,
}

impl Journal {
    /// Build the journal and register the built-in functions.
    pub fn new(
        db: Database,
        ha: Arc<HaController>,
        registry: Arc<FunctionRegistry>,
        client: PeerClient,
    ) -> Self {
        register_builtins(&registry, &db, &ha);
        Self {
            inner: Arc::new(Inner {
                db,
                ha,
                registry,
                client,
                push_gate: Semaphore::new(1),
                push_pending: AtomicBool::new(false),
                handle_lock: Mutex::new(()),
            }),
        }
    }

    pub fn ha(&self) -> &Arc<HaController> {
        &self.inner.ha
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.inner.registry
    }

    fn me(&self) -> &str {
        self.inner.ha.me()
    }

    /// Originate a change: one row per sibling, then an optional push.
    pub async fn add_request(&self, request: JournalRequest) -> Result<RequestAccepted, LunaError> {
        if !self.inner.registry.contains(&request.function) {
            return Err(LunaError::UnknownFunction(request.function));
        }
        let state = self.inner.ha.state().await?;
        if !state.enabled {
            return Ok(RequestAccepted::NotReplicated);
        }
        if state.shadow {
            debug!(function = %request.function, "shadow controller does not originate");
            return Ok(RequestAccepted::Shadow);
        }
        if !state.overrule {
            self.inner.ha.wait_insync(request.keeptrying).await?;
        }
        self.journal_to_siblings(&request).await
    }

    async fn journal_to_siblings(&self, request: &JournalRequest) -> Result<RequestAccepted, LunaError> {
        let payload = encode_payload(&request.payload)?;
        let topology = self.inner.ha.topology();
        let created = timestamp_now();
        let entries: Vec<JournalEntry> = topology
            .siblings()
            .map(|sibling| JournalEntry {
                id: 0,
                function: request.function.clone(),
                object: request.object.clone(),
                param: request.param.clone(),
                payload: payload.clone(),
                masteronly: request.masteronly,
                misc: request.misc.clone(),
                sendby: self.me().to_string(),
                sendfor: sibling.hostname.clone(),
                sendto: topology.route(&sibling.hostname),
                tries: 0,
                created: created.clone(),
            })
            .collect();

        let count = entries.len();
        j::insert_entries(&self.inner.db, entries).await?;
        info!(function = %request.function, object = %request.object, entries = count, "request journaled");
        if request.sendnow && count > 0 {
            self.trigger_push(None);
        }
        Ok(RequestAccepted::Journaled { entries: count })
    }

    /// Apply every inbound row in order, deleting each once handled.
    pub async fn handle_requests(&self) -> Result<HandleReport, LunaError> {
        let _guard = self.inner.handle_lock.lock().await;
        let mut report = HandleReport::default();

        for entry in j::entries_for(&self.inner.db, self.me()).await? {
            let state = self.inner.ha.state().await?;
            if entry.masteronly && !state.is_master() {
                debug!(id = entry.id, function = %entry.function, "discarding master-only row on backup");
                report.discarded += 1;
            } else {
                let applied = match decode_payload(&entry.payload) {
                    Ok(payload) => {
                        self.inner
                            .registry
                            .call(JournalCall {
                                function: entry.function.clone(),
                                object: entry.object.clone(),
                                param: entry.param.clone(),
                                payload,
                                masteronly: entry.masteronly,
                                misc: entry.misc.clone(),
                                sendby: entry.sendby.clone(),
                            })
                            .await
                    }
                    Err(e) => Err(e),
                };
                match applied {
                    Ok(()) => report.applied += 1,
                    Err(e) => {
                        warn!(id = entry.id, function = %entry.function, object = %entry.object, error = %e, "journal row failed");
                        report.failed += 1;
                        self.report_failure(&entry, &e).await;
                    }
                }
            }
            j::delete_entries(&self.inner.db, vec![entry.id]).await?;
        }

        if report.applied + report.discarded + report.failed > 0 {
            info!(
                applied = report.applied,
                discarded = report.discarded,
                failed = report.failed,
                "journal handled"
            );
        }
        Ok(report)
    }

    /// Send a failure line back to the controller that originated `entry`.
    async fn report_failure(&self, entry: &JournalEntry, err: &LunaError) {
        if entry.sendby.is_empty() || entry.sendby == self.me() || entry.function == STATUS_ADD_MESSAGE {
            return;
        }
        let report = JournalEntry {
            id: 0,
            function: STATUS_ADD_MESSAGE.to_string(),
            object: entry.misc.clone(),
            param: format!("{} {} failed on {}: {err}", entry.function, entry.object, self.me()),
            payload: String::new(),
            masteronly: false,
            misc: entry.misc.clone(),
            sendby: self.me().to_string(),
            sendfor: entry.sendby.clone(),
            sendto: self.inner.ha.topology().route(&entry.sendby),
            tries: 0,
            created: String::new(),
        };
        match j::insert_entries(&self.inner.db, vec![report]).await {
            Ok(_) => self.trigger_push(None),
            Err(e) => error!(sendby = %entry.sendby, error = %e, "could not journal failure report"),
        }
    }

    /// Store a batch received from a sibling.
    ///
    /// Rows for this controller are handled in the background; rows for
    /// another controller are forwarded to it.
    pub async fn update_journal(&self, entries: Vec<JournalEntry>) -> Result<UpdateReport, LunaError> {
        let me = self.me().to_string();
        let (inbound, forward): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.sendfor == me);

        let inbound: Vec<JournalEntry> = inbound
            .into_iter()
            .map(|mut e| {
                e.sendto = me.clone();
                e.tries = 0;
                e
            })
            .collect();
        let mut hosts = BTreeSet::new();
        let forward: Vec<JournalEntry> = forward
            .into_iter()
            .map(|mut e| {
                e.sendto = e.sendfor.clone();
                e.tries = 0;
                hosts.insert(e.sendfor.clone());
                e
            })
            .collect();

        let report = UpdateReport {
            inbound: j::insert_entries(&self.inner.db, inbound).await?.len(),
            forwarded: j::insert_entries(&self.inner.db, forward).await?.len(),
        };
        debug!(inbound = report.inbound, forwarded = report.forwarded, "journal batch stored");

        if report.inbound > 0 {
            let journal = self.clone();
            tokio::spawn(async move {
                if let Err(e) = journal.handle_requests().await {
                    error!(error = %e, "handling journal failed");
                }
            });
        }
        for host in hosts {
            self.trigger_push(Some(host));
        }
        Ok(report)
    }

    fn trigger_push(&self, forward: Option<String>) {
        let journal = self.clone();
        tokio::spawn(async move {
            if let Err(e) = journal.pushto_controllers(forward.as_deref()).await {
                warn!(error = %e, "journal push failed");
            }
        });
    }

    /// Deliver outbound rows, optionally only those routed to `forward`.
    ///
    /// One push runs at a time; a trigger arriving meanwhile is folded into
    /// an extra pass of the running push.
    pub async fn pushto_controllers(&self, forward: Option<&str>) -> Result<PushReport, LunaError> {
        let mut report = PushReport::default();
        let mut filter = forward.map(str::to_string);
        self.inner.push_pending.store(true, Ordering::SeqCst);

        loop {
            let Ok(permit) = self.inner.push_gate.try_acquire() else {
                debug!("push already running, folded into it");
                report.coalesced = true;
                return Ok(report);
            };
            while self.inner.push_pending.swap(false, Ordering::SeqCst) {
                self.push_pass(filter.take().as_deref(), &mut report).await?;
            }
            drop(permit);
            if !self.inner.push_pending.load(Ordering::SeqCst) {
                return Ok(report);
            }
        }
    }

    async fn push_pass(&self, filter: Option<&str>, report: &mut PushReport) -> Result<(), LunaError> {
        let db = &self.inner.db;
        let topology = self.inner.ha.topology();

        let mut batches: BTreeMap<String, Vec<JournalEntry>> = BTreeMap::new();
        for row in j::outbound(db, self.me(), filter).await? {
            batches.entry(row.sendto.clone()).or_default().push(row);
        }

        for (host, batch) in batches {
            let ids: Vec<i64> = batch.iter().map(|e| e.id).collect();
            let delivered = match topology.endpoint(&host) {
                Some(endpoint) => self.inner.client.push(&host, endpoint, &batch).await,
                None => Err(LunaError::Replication {
                    host: host.clone(),
                    message: "no endpoint configured".to_string(),
                }),
            };
            match delivered {
                Ok(()) => {
                    report.delivered += j::delete_entries(db, ids).await?;
                }
                Err(e) => {
                    warn!(host = %host, entries = ids.len(), error = %e, "journal push failed, keeping rows");
                    j::increment_tries(db, ids).await?;
                    report.failed_hosts.push(host);
                }
            }
        }
        Ok(())
    }

    /// Fetch and store the rows `host` holds for this controller.
    pub async fn pull_journal(&self, host: &str) -> Result<usize, LunaError> {
        let endpoint = self.inner.ha.topology().endpoint(host).ok_or_else(|| LunaError::Replication {
            host: host.to_string(),
            message: "no endpoint configured".to_string(),
        })?;
        let me = self.me().to_string();
        let rows = self.inner.client.fetch(host, endpoint, &me).await?;
        let Some(upto) = rows.iter().map(|e| e.id).max() else {
            return Ok(0);
        };

        let rows: Vec<JournalEntry> = rows
            .into_iter()
            .filter(|e| e.sendfor == me)
            .map(|mut e| {
                e.sendto = me.clone();
                e.tries = 0;
                e
            })
            .collect();
        let stored = j::insert_entries(&self.inner.db, rows).await?.len();

        if let Err(e) = self.inner.client.acknowledge(host, endpoint, &me, upto).await {
            warn!(host, upto, error = %e, "acknowledge failed, rows may arrive again");
        }
        debug!(host, stored, "journal pulled");
        Ok(stored)
    }

    pub async fn pullfrom_controllers(&self) -> Result<PullReport, LunaError> {
        let mut report = PullReport::default();
        let hosts: Vec<String> = self
            .inner
            .ha
            .topology()
            .siblings()
            .map(|c| c.hostname.clone())
            .collect();
        for host in hosts {
            match self.pull_journal(&host).await {
                Ok(n) => report.pulled += n,
                Err(e) if e.is_storage() => return Err(e),
                Err(e) => {
                    warn!(host = %host, error = %e, "pull failed");
                    report.unreachable.push(host);
                }
            }
        }
        Ok(report)
    }

    /// Rows held for `host`, served to its pull.
    pub async fn entries_for(&self, host: &str) -> Result<Vec<JournalEntry>, LunaError> {
        j::entries_for(&self.inner.db, host).await
    }

    /// Drop rows `host` confirmed, all of them when `upto` is absent.
    pub async fn acknowledge(&self, host: &str, upto: Option<i64>) -> Result<usize, LunaError> {
        j::delete_for_upto(&self.inner.db, host, upto).await
    }

    /// Move the master role to `host` on every controller.
    pub async fn set_master(&self, host: &str) -> Result<Role, LunaError> {
        let ha = &self.inner.ha;
        if !ha.topology().is_known(host) {
            return Err(LunaError::Replication {
                host: host.to_string(),
                message: "not a configured controller".to_string(),
            });
        }
        let state = ha.state().await?;
        // Recovery path: not gated on the in-sync flag.
        if state.enabled && !state.shadow {
            self.journal_to_siblings(&JournalRequest::new(HA_SET_MASTER, host))
                .await?;
        }
        ha.apply_master(host).await
    }

    /// Catch up with the siblings before originating anything.
    ///
    /// The controller is declared in sync when at least one sibling answered
    /// (or it has none).
    pub async fn startup_sync(&self) -> Result<PullReport, LunaError> {
        let ha = &self.inner.ha;
        if !ha.state().await?.enabled {
            return Ok(PullReport::default());
        }
        ha.set_insync(false).await?;
        let report = self.pullfrom_controllers().await?;
        self.handle_requests().await?;

        let siblings = ha.topology().siblings().count();
        if siblings == 0 || report.unreachable.len() < siblings {
            ha.set_insync(true).await?;
            info!(pulled = report.pulled, "controller in sync");
        } else {
            warn!(unreachable = ?report.unreachable, "no sibling reachable, staying out of sync");
        }
        Ok(report)
    }

    /// Push pending rows every `interval`, retrying the startup sync while
    /// the controller is still out of sync.
    pub async fn run_push_ticker(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.inner.ha.state().await {
                        Ok(state) if state.enabled && !state.insync && !state.overrule => {
                            if let Err(e) = self.startup_sync().await {
                                warn!(error = %e, "sync retry failed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "could not read ha state"),
                    }
                    if let Err(e) = self.pushto_controllers(None).await {
                        warn!(error = %e, "journal push failed");
                    }
                }
            }
        }
        debug!("journal push ticker stopped");
    }
}

fn register_builtins(registry: &FunctionRegistry, db: &Database, ha: &Arc<HaController>) {
    let ha = ha.clone();
    registry.register(HA_SET_MASTER, move |call: JournalCall| {
        let ha = ha.clone();
        async move { ha.apply_master(&call.object).await.map(|_| ()) }
    });

    let db = db.clone();
    registry.register(STATUS_ADD_MESSAGE, move |call: JournalCall| {
        let db = db.clone();
        async move {
            status::insert_message(&db, &call.object, &call.sendby, &call.param)
                .await
                .map(|_| ())
        }
    });
}

/// Base64 of the JSON body; `null` encodes as the empty string.
pub fn encode_payload(payload: &serde_json::Value) -> Result<String, LunaError> {
    if payload.is_null() {
        return Ok(String::new());
    }
    let json = serde_json::to_vec(payload).map_err(|e| LunaError::Journal {
        message: "payload is not serializable".to_string(),
        source: Some(Box::new(e)),
    })?;
    Ok(STANDARD.encode(json))
}

pub fn decode_payload(payload: &str) -> Result<serde_json::Value, LunaError> {
    if payload.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    let json = STANDARD.decode(payload).map_err(|e| LunaError::Journal {
        message: "payload is not base64".to_string(),
        source: Some(Box::new(e)),
    })?;
    serde_json::from_slice(&json).map_err(|e| LunaError::Journal {
        message: "payload is not JSON".to_string(),
        source: Some(Box::new(e)),
    })
}
