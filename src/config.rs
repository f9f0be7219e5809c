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


//! Runtime configuration
//!
//! All tunables of the download manager, the connection pool and the
//! cacheable services live in one serde-backed [`CoreConfig`]. Every section
//! has defaults, so a partial JSON file only overrides what it names.
//!
//! # Config Location
//! - Desktop (macOS): ~/Library/Application Support/QuranCore/config.json
//! - Desktop (Linux): ~/.local/share/QuranCore/config.json
//! - Desktop (Windows): %APPDATA%/QuranCore/config.json
//! - Mobile: supplied by the host app

use crate::error::{QuranError, Result};
use crate::logging::LogOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the persisted batches database
pub const DEFAULT_DOWNLOADS_DATABASE: &str = "ongoing-downloads.db";

/// SQLite connection settings used by the connection pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// How long SQLite waits on a locked file before reporting BUSY
    pub busy_timeout_secs: u64,

    /// Attempts made while a statement keeps failing with BUSY/LOCKED
    pub busy_retry_attempts: u32,

    /// Open files read-only (no create, no writes)
    pub read_only: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_secs: 5,
            busy_retry_attempts: 3,
            read_only: false,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

/// Limits for operation-backed cacheable services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached values before LRU eviction
    pub count_limit: usize,

    /// Computations allowed to run at the same time
    pub max_concurrent_operations: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            count_limit: 10,
            max_concurrent_operations: 1,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Root directory downloaded files are stored under
    pub downloads_directory: PathBuf,

    /// File name (relative to `downloads_directory`) of the batches database
    pub downloads_database: String,

    /// Maximum transfers running at once across all batches
    pub max_simultaneous_downloads: usize,

    /// Per-request timeout for the HTTP transport
    pub request_timeout_secs: u64,

    /// Connection pool settings
    pub database: DatabaseConfig,

    /// Cacheable service settings
    pub cache: CacheConfig,

    /// Logging settings
    pub log: LogOptions,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            downloads_directory: default_data_directory().join("downloads"),
            downloads_database: DEFAULT_DOWNLOADS_DATABASE.to_string(),
            max_simultaneous_downloads: 3,
            request_timeout_secs: 300,
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            log: LogOptions::default(),
        }
    }
}

impl CoreConfig {
    /// Read configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            QuranError::InvalidConfiguration(format!(
                "Cannot read config {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration, falling back to defaults when the file is missing
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file missing, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Write configuration as pretty JSON, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject values that would stall the engine
    pub fn validate(&self) -> Result<()> {
        if self.max_simultaneous_downloads == 0 {
            return Err(QuranError::InvalidConfiguration(
                "max_simultaneous_downloads must be at least 1".to_string(),
            ));
        }
        if self.cache.count_limit == 0 {
            return Err(QuranError::InvalidConfiguration(
                "cache.count_limit must be at least 1".to_string(),
            ));
        }
        if self.cache.max_concurrent_operations == 0 {
            return Err(QuranError::InvalidConfiguration(
                "cache.max_concurrent_operations must be at least 1".to_string(),
            ));
        }
        if self.database.busy_retry_attempts == 0 {
            return Err(QuranError::InvalidConfiguration(
                "database.busy_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.downloads_database.is_empty() {
            return Err(QuranError::InvalidConfiguration(
                "downloads_database must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute path of the batches database
    pub fn downloads_database_path(&self) -> PathBuf {
        self.downloads_directory.join(&self.downloads_database)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Get the platform application data directory
///
/// Mobile hosts are expected to pass their sandbox directory explicitly.
pub fn default_data_directory() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("QuranCore")
    }

    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".local").join("share").join("QuranCore")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata).join("QuranCore")
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from(".").join("QuranCore")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.max_simultaneous_downloads, 3);
        assert_eq!(config.database.busy_timeout_secs, 5);
        assert_eq!(config.database.busy_retry_attempts, 3);
        assert_eq!(config.cache.count_limit, 10);
        assert_eq!(config.cache.max_concurrent_operations, 1);
        assert!(config
            .downloads_database_path()
            .ends_with("ongoing-downloads.db"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"max_simultaneous_downloads": 5, "cache": {"count_limit": 50}}"#)
                .unwrap();
        assert_eq!(config.max_simultaneous_downloads, 5);
        assert_eq!(config.cache.count_limit, 50);
        assert_eq!(config.cache.max_concurrent_operations, 1);
        assert_eq!(config.request_timeout_secs, 300);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = CoreConfig::default();
        config.downloads_directory = dir.path().join("downloads");
        config.max_simultaneous_downloads = 2;
        config.save(&path).unwrap();

        let loaded = CoreConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::load_or_default(dir.path().join("absent.json")).unwrap();
        assert_eq!(config, CoreConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = CoreConfig::default();
        config.max_simultaneous_downloads = 0;
        assert!(matches!(
            config.validate(),
            Err(QuranError::InvalidConfiguration(_))
        ));

        let mut config = CoreConfig::default();
        config.cache.max_concurrent_operations = 0;
        assert!(config.validate().is_err());
    }
}
