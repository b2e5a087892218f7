// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Luna controller daemon.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, busy retries with exponential
//! backoff, and typed queries for the task queue, the status channel, the
//! replication journal and the HA singleton.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod retry;

pub use database::Database;
pub use models::*;
