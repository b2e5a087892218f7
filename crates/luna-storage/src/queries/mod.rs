// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for the storage tables.

pub mod ha;
pub mod journal;
pub mod lease;
pub mod queue;
pub mod status;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::Database;
    use tempfile::TempDir;

    pub async fn setup_db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_path(dir.path().join("test.db")).await.unwrap();
        (db, dir)
    }
}
