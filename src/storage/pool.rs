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


//! Shared SQLite connections
//!
//! [`ConnectionsPool`] hands out one [`DatabaseConnection`] per database file
//! and counts how many owners hold it. The sqlx pool behind a file is opened
//! on the first `get_connection` and closed when the last owner releases it.
//!
//! # SQLite Configuration
//! - WAL mode unless the file is opened read-only
//! - Foreign keys enabled
//! - Busy timeout from [`DatabaseConfig`]
//! - Normal synchronous mode

use crate::config::DatabaseConfig;
use crate::error::{QuranError, Result};
use crate::storage::persistence;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::ConnectOptions;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Connections kept open per database file
const MAX_CONNECTIONS_PER_FILE: u32 = 4;

/// Handle to an opened database file
///
/// Clones share the same underlying sqlx pool.
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    path: PathBuf,
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Get reference to the sqlx pool for running queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Database file this connection belongs to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the pool has released the file
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[derive(Debug)]
struct PoolEntry {
    use_count: usize,
    connection: DatabaseConnection,
}

/// Reference-counted cache of open database files keyed by path
///
/// Constructed by the application's composition root and shared through an
/// `Arc`; there is no process-wide instance.
#[derive(Debug)]
pub struct ConnectionsPool {
    config: DatabaseConfig,
    entries: Mutex<HashMap<PathBuf, PoolEntry>>,
}

impl ConnectionsPool {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Create a pool wrapped in `Arc` for sharing between services
    pub fn shared(config: DatabaseConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Acquire the connection for a database file
    ///
    /// Reuses the open connection when one exists, otherwise creates missing
    /// parent directories and opens the file.
    ///
    /// # Errors
    /// Returns `CannotOpenDatabase` if the directory cannot be created or the
    /// file cannot be opened after the configured retry attempts.
    pub async fn get_connection<P: AsRef<Path>>(&self, path: P) -> Result<DatabaseConnection> {
        let path = path.as_ref().to_path_buf();

        // Held across the open so two callers never race on the same file
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(&path) {
            entry.use_count += 1;
            tracing::trace!(path = %path.display(), use_count = entry.use_count, "reusing database connection");
            return Ok(entry.connection.clone());
        }

        let pool = self.open(&path).await?;
        let connection = DatabaseConnection {
            path: path.clone(),
            pool,
        };

        entries.insert(
            path.clone(),
            PoolEntry {
                use_count: 1,
                connection: connection.clone(),
            },
        );
        tracing::debug!(path = %path.display(), "opened database connection");

        Ok(connection)
    }

    /// Release a connection obtained from [`get_connection`](Self::get_connection)
    ///
    /// The file is closed when the last holder releases it. Releasing a
    /// connection the pool no longer tracks only logs a warning.
    pub async fn close(&self, connection: &DatabaseConnection) {
        let mut entries = self.entries.lock().await;

        let remove = match entries.get_mut(&connection.path) {
            Some(entry) => {
                entry.use_count = entry.use_count.saturating_sub(1);
                entry.use_count == 0
            }
            None => {
                tracing::warn!(
                    path = %connection.path.display(),
                    "closing a connection that is not in the pool"
                );
                false
            }
        };

        if remove {
            if let Some(entry) = entries.remove(&connection.path) {
                entry.connection.pool.close().await;
                tracing::debug!(path = %connection.path.display(), "closed database connection");
            }
        }
    }

    /// Current use count for a path (0 when not open)
    pub async fn use_count<P: AsRef<Path>>(&self, path: P) -> usize {
        self.entries
            .lock()
            .await
            .get(path.as_ref())
            .map(|entry| entry.use_count)
            .unwrap_or(0)
    }

    /// Number of distinct files currently open
    pub async fn open_connections(&self) -> usize {
        self.entries.lock().await.len()
    }

    async fn open(&self, path: &Path) -> Result<SqlitePool> {
        let cannot_open = |message: String| QuranError::CannotOpenDatabase {
            path: path.display().to_string(),
            message,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    cannot_open(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let connect_opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(!self.config.read_only)
            .read_only(self.config.read_only)
            .foreign_keys(true)
            .busy_timeout(self.config.busy_timeout())
            .disable_statement_logging();

        let connect_opts = if self.config.read_only {
            connect_opts
        } else {
            connect_opts
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };

        let attempts = self.config.busy_retry_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = SqlitePoolOptions::new()
                .max_connections(MAX_CONNECTIONS_PER_FILE)
                .acquire_timeout(self.config.busy_timeout() + Duration::from_secs(1))
                .connect_with(connect_opts.clone())
                .await;

            match result {
                Ok(pool) => return Ok(pool),
                Err(e) if persistence::is_busy(&e) && attempt < attempts => {
                    tracing::warn!(path = %path.display(), attempt, "database busy while opening, retrying");
                    tokio::time::sleep(persistence::retry_delay(attempt)).await;
                }
                Err(e) => return Err(cannot_open(e.to_string())),
            }
        }
    }
}
