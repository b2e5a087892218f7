// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Journal and HA replication for the Luna controller daemon.
//!
//! State-changing requests are journaled once per sibling controller,
//! pushed over HTTP, and replayed on arrival through a registry of typed
//! handlers. The HA controller tracks this controller's role and whether it
//! is in sync with its siblings.

pub mod client;
pub mod ha;
pub mod journal;
pub mod registry;

pub use client::{JournalBatch, PeerClient};
pub use ha::{HaController, Topology};
pub use journal::{
    HA_SET_MASTER, HandleReport, Journal, JournalRequest, PullReport, PushReport, RequestAccepted,
    STATUS_ADD_MESSAGE, UpdateReport,
};
pub use registry::{FunctionRegistry, JournalCall};
