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


//! SQLite storage
//!
//! Database files are opened through a shared [`ConnectionsPool`] so that
//! every component touching the same file uses one connection pool. All
//! statements run through the retrying helpers in [`persistence`], and
//! schemas are versioned with `PRAGMA user_version` by [`migrations`].
//!
//! # Usage Example
//! ```no_run
//! use quran_core::config::DatabaseConfig;
//! use quran_core::storage::{ConnectionsPool, DownloadsPersistence, SqliteDownloadsPersistence};
//!
//! # async fn example() -> quran_core::Result<()> {
//! let pool = ConnectionsPool::shared(DatabaseConfig::default());
//! let persistence = SqliteDownloadsPersistence::open(pool, "./ongoing-downloads.db").await?;
//! let batches = persistence.retrieve_all().await?;
//! println!("{} batches in flight", batches.len());
//! persistence.close().await;
//! # Ok(())
//! # }
//! ```

pub mod downloads;
pub mod migrations;
pub mod persistence;
pub mod pool;

// Re-export commonly used types
pub use downloads::{DownloadsPersistence, SqliteDownloadsPersistence};
pub use migrations::Migration;
pub use persistence::SqliteTransaction;
pub use pool::{ConnectionsPool, DatabaseConnection};
