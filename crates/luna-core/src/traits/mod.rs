// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the core services and their collaborators.

pub mod executor;

pub use executor::{LeafExecutor, LeafTask};
