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


//! Error types for Quran Core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped into a small closed set of domain kinds so that UI callers
//! only ever render a generic message; raw transport and driver errors never
//! cross this boundary.
//!
//! ## Error Categories
//!
//! - **Persistence**: opening SQLite files, queries, busy contention, migrations
//! - **Transport**: connectivity, unreachable servers, dropped connections
//! - **File**: disk space, moves and directory creation for finished downloads
//! - **Cache**: failures while computing a cacheable value
//! - **General**: cancellation, invalid state, missing records

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using our QuranError type
pub type Result<T> = std::result::Result<T, QuranError>;

/// Result handed to many observers at once (batch completion, coalesced cache waiters).
///
/// Every observer receives a clone of the same `Arc`, so they all see the
/// identical error instance.
pub type SharedResult<T> = std::result::Result<T, Arc<QuranError>>;

/// Classification of transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The device has no usable network connection
    NotConnected,
    /// Data roaming is disabled while abroad
    InternationalRoamingOff,
    /// Host lookup, connect or request timed out
    ServerNotReachable,
    /// The connection dropped while the body was streaming
    ConnectionLost,
    /// The server answered with a non-2xx status
    ServerError,
    /// Anything the classifier could not place
    Unknown,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkErrorKind::NotConnected => "not connected",
            NetworkErrorKind::InternationalRoamingOff => "international roaming off",
            NetworkErrorKind::ServerNotReachable => "server not reachable",
            NetworkErrorKind::ConnectionLost => "connection lost",
            NetworkErrorKind::ServerError => "server error",
            NetworkErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Main error type for Quran Core
#[derive(Error, Debug)]
pub enum QuranError {
    // ===== Persistence Errors =====

    /// SQLite file could not be opened or created
    #[error("Cannot open database at {path}: {message}")]
    CannotOpenDatabase {
        path: String,
        message: String,
    },

    /// SQLite file is corrupt, not a database, or not accessible
    #[error("Bad database file: {0}")]
    BadFile(String),

    /// Database query execution failed
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// Database stayed locked after all retry attempts
    #[error("Database busy after {attempts} attempts")]
    DatabaseBusy {
        attempts: u32,
    },

    /// Database schema creation or upgrade failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    // ===== Transport Errors =====

    /// Network transfer failed
    #[error("Network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    // ===== File Errors =====

    /// Not enough space left to store a finished download
    #[error("No disk space left on device")]
    NoDiskSpace,

    /// Generic file I/O error
    #[error("File I/O error: {0}")]
    FileIoError(String),

    // ===== Cache Errors =====

    /// Computing a cacheable value failed
    #[error("Computation failed: {0}")]
    ComputationFailed(String),

    // ===== General Errors =====

    /// Operation was cancelled by user or system
    #[error("Operation cancelled")]
    Cancelled,

    /// Application state is invalid for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Record not found
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),
}

impl From<reqwest::Error> for QuranError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            NetworkErrorKind::ServerNotReachable
        } else if err.is_connect() {
            NetworkErrorKind::NotConnected
        } else if err.is_body() || err.is_decode() {
            NetworkErrorKind::ConnectionLost
        } else if err.is_status() {
            NetworkErrorKind::ServerError
        } else {
            NetworkErrorKind::Unknown
        };
        QuranError::Network {
            kind,
            message: err.to_string(),
        }
    }
}

// Helper methods for creating common errors
impl QuranError {
    /// Create a Network error
    pub fn network<S: Into<String>>(kind: NetworkErrorKind, message: S) -> Self {
        QuranError::Network {
            kind,
            message: message.into(),
        }
    }

    /// Create a Network error for an unacceptable HTTP status
    pub fn server_error(status_code: u16) -> Self {
        QuranError::Network {
            kind: NetworkErrorKind::ServerError,
            message: format!("Unacceptable status code: {}", status_code),
        }
    }

    /// Create a RecordNotFound error with a resource name
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        QuranError::RecordNotFound(resource.into())
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        QuranError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        QuranError::InternalError(message.into())
    }

    /// Map a file system failure of a finished download
    ///
    /// ENOSPC is reported as `NoDiskSpace`, everything else as `FileIoError`.
    pub fn from_file_system(err: std::io::Error) -> Self {
        if err.raw_os_error() == Some(28) {
            QuranError::NoDiskSpace
        } else {
            QuranError::FileIoError(err.to_string())
        }
    }

    /// Check if error is retryable (transient network errors, busy database)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QuranError::Network {
                kind: NetworkErrorKind::ServerNotReachable
                    | NetworkErrorKind::ConnectionLost
                    | NetworkErrorKind::NotConnected,
                ..
            } | QuranError::DatabaseBusy { .. }
        )
    }

    /// Check if the operation was cancelled rather than failed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QuranError::Cancelled)
    }

    /// Check if error came from the transport
    pub fn is_network_error(&self) -> bool {
        matches!(self, QuranError::Network { .. })
    }

    /// Check if error came from SQLite access
    pub fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            QuranError::CannotOpenDatabase { .. }
                | QuranError::BadFile(_)
                | QuranError::QueryFailed(_)
                | QuranError::DatabaseBusy { .. }
                | QuranError::MigrationFailed(_)
                | QuranError::SqlxError(_)
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            QuranError::Network { kind, .. } => match kind {
                NetworkErrorKind::NotConnected => {
                    "The Internet connection appears to be offline.".to_string()
                }
                NetworkErrorKind::InternationalRoamingOff => {
                    "International roaming is off. Please enable it to download.".to_string()
                }
                NetworkErrorKind::ServerNotReachable => {
                    "Cannot reach the server. Please try again later.".to_string()
                }
                NetworkErrorKind::ConnectionLost => {
                    "The network connection was lost. Please try again.".to_string()
                }
                NetworkErrorKind::ServerError | NetworkErrorKind::Unknown => {
                    "Unable to complete the download. Please try again later.".to_string()
                }
            },
            QuranError::NoDiskSpace => {
                "There is not enough free space on the device.".to_string()
            }
            QuranError::Cancelled => "The download was cancelled.".to_string(),
            e if e.is_persistence_error() => {
                "Unable to read stored data. Please try again.".to_string()
            }
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(QuranError::network(NetworkErrorKind::ConnectionLost, "reset").is_retryable());
        assert!(QuranError::DatabaseBusy { attempts: 3 }.is_retryable());
        assert!(!QuranError::server_error(404).is_retryable());
        assert!(!QuranError::Cancelled.is_retryable());
    }

    #[test]
    fn test_disk_full_maps_to_no_disk_space() {
        let err = std::io::Error::from_raw_os_error(28);
        assert!(matches!(QuranError::from_file_system(err), QuranError::NoDiskSpace));

        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(QuranError::from_file_system(err), QuranError::FileIoError(_)));
    }

    #[test]
    fn test_user_message_hides_details() {
        let err = QuranError::QueryFailed("near \"SELEC\": syntax error".to_string());
        assert!(!err.user_message().contains("SELEC"));
        assert!(err.is_persistence_error());
    }
}
