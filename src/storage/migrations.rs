// Quran Core - Download and caching engine for Quran apps
// Copyright (C) 2025 Quran Core contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Versioned schema migrations
//!
//! Schema versions are tracked in SQLite's `PRAGMA user_version`. A fresh
//! file (version 0) gets every migration applied in order; an older file only
//! gets the ones above its version.
//!
//! # Migration Strategy
//! Migrations are plain SQL executed at runtime so that mobile builds do not
//! need a build-time database.

use crate::error::{QuranError, Result};
use crate::storage::pool::DatabaseConnection;
use sqlx::Executor;

/// One schema step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// `user_version` after this step is applied
    pub version: i64,

    /// Human readable name for logs
    pub name: &'static str,

    /// SQL executed for this step (may contain several statements)
    pub sql: &'static str,
}

/// Read the schema version stored in the file
pub async fn current_version(connection: &DatabaseConnection) -> Result<i64> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(connection.pool())
        .await?;
    Ok(version)
}

/// Bring the schema up to the highest version in `migrations`
///
/// Returns the version the file was at before migrating.
pub async fn migrate(connection: &DatabaseConnection, migrations: &[Migration]) -> Result<i64> {
    let from = current_version(connection).await?;

    let mut pending: Vec<&Migration> = migrations.iter().filter(|m| m.version > from).collect();
    pending.sort_by_key(|m| m.version);

    if pending.is_empty() {
        return Ok(from);
    }

    if from == 0 {
        tracing::info!(path = %connection.path().display(), "creating database schema");
    } else {
        tracing::info!(path = %connection.path().display(), from, "upgrading database schema");
    }

    for migration in pending {
        let mut tx = connection.pool().begin().await?;
        (&mut *tx).execute(migration.sql).await.map_err(|e| {
            QuranError::MigrationFailed(format!("{} (v{}): {}", migration.name, migration.version, e))
        })?;
        // PRAGMA does not accept bound parameters
        (&mut *tx).execute(format!("PRAGMA user_version = {}", migration.version).as_str())
            .await
            .map_err(|e| QuranError::MigrationFailed(e.to_string()))?;
        tx.commit().await?;

        tracing::debug!(name = migration.name, version = migration.version, "applied migration");
    }

    Ok(from)
}
