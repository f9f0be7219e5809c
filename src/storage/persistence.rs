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


//! Statement runner with busy retry and error mapping
//!
//! SQLite reports lock contention as BUSY or LOCKED. Statements run through
//! [`run`] or [`run_in_transaction`] are retried a bounded number of times on
//! contention, and every other driver error is mapped into the crate's
//! persistence error kinds.

use crate::error::{QuranError, Result};
use crate::storage::pool::DatabaseConnection;
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use std::future::Future;
use std::time::Duration;

// Primary SQLite result codes
const SQLITE_PERM: i32 = 3;
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_NOTADB: i32 = 26;

/// Database transaction owned by a [`run_in_transaction`] closure
pub type SqliteTransaction = Transaction<'static, Sqlite>;

fn primary_code(err: &sqlx::Error) -> Option<i32> {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff),
        _ => None,
    }
}

/// Whether the driver error is lock contention worth retrying
pub fn is_busy(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::PoolTimedOut)
        || matches!(primary_code(err), Some(SQLITE_BUSY) | Some(SQLITE_LOCKED))
}

/// Backoff before the next attempt
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(50 * u64::from(attempt))
}

/// Map a driver error to the persistence error kinds
pub fn map_error(err: sqlx::Error, attempts: u32) -> QuranError {
    match primary_code(&err) {
        Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => QuranError::DatabaseBusy { attempts },
        Some(SQLITE_PERM) | Some(SQLITE_NOTADB) | Some(SQLITE_CORRUPT) | Some(SQLITE_CANTOPEN) => {
            QuranError::BadFile(err.to_string())
        }
        _ if matches!(err, sqlx::Error::PoolTimedOut) => QuranError::DatabaseBusy { attempts },
        _ if matches!(err, sqlx::Error::RowNotFound) => QuranError::not_found(err.to_string()),
        _ => QuranError::QueryFailed(err.to_string()),
    }
}

/// Run a statement against the connection, retrying on contention
///
/// `op` is invoked once per attempt with the connection's pool. Retries stop
/// once `retry_attempts` attempts have been made.
///
/// # Errors
/// - `DatabaseBusy` when every attempt hit BUSY/LOCKED
/// - `BadFile` for permission, corrupt or non-database files
/// - `QueryFailed` for anything else
pub async fn run<T, F, Fut>(connection: &DatabaseConnection, retry_attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut(SqlitePool) -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let retry_attempts = retry_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(connection.pool().clone()).await {
            Ok(value) => return Ok(value),
            Err(e) if is_busy(&e) && attempt < retry_attempts => {
                tracing::debug!(path = %connection.path().display(), attempt, "database busy, retrying");
                tokio::time::sleep(retry_delay(attempt)).await;
            }
            Err(e) => {
                let err = map_error(e, attempt);
                tracing::error!(path = %connection.path().display(), error = %err, "database operation failed");
                return Err(err);
            }
        }
    }
}

/// Run statements inside a transaction, retrying the whole unit on contention
///
/// The closure receives the open transaction and hands it back with its
/// value; the runner commits it. Returning an error rolls it back.
pub async fn run_in_transaction<T, F, Fut>(
    connection: &DatabaseConnection,
    retry_attempts: u32,
    mut op: F,
) -> Result<T>
where
    F: FnMut(SqliteTransaction) -> Fut,
    Fut: Future<Output = std::result::Result<(T, SqliteTransaction), sqlx::Error>>,
{
    let retry_attempts = retry_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = async {
            let tx = connection.pool().begin().await?;
            let (value, tx) = op(tx).await?;
            tx.commit().await?;
            Ok::<T, sqlx::Error>(value)
        }
        .await;

        match result {
            Ok(value) => return Ok(value),
            Err(e) if is_busy(&e) && attempt < retry_attempts => {
                tracing::debug!(path = %connection.path().display(), attempt, "database busy in transaction, retrying");
                tokio::time::sleep(retry_delay(attempt)).await;
            }
            Err(e) => {
                let err = map_error(e, attempt);
                tracing::error!(path = %connection.path().display(), error = %err, "database transaction failed");
                return Err(err);
            }
        }
    }
}
