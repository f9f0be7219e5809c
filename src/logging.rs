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


//! Logging setup
//!
//! The library only emits `tracing` events. Hosts that do not install their
//! own subscriber can call [`init_logging`] once at startup.

use crate::error::{QuranError, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "quran_core=info";

/// Options for the console subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    /// Filter directive used when `RUST_LOG` is absent
    pub filter: String,

    /// Emit ANSI colors
    pub use_color: bool,

    /// Include the event target (module path)
    pub with_target: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            use_color: true,
            with_target: true,
        }
    }
}

impl LogOptions {
    /// Build the env filter, `RUST_LOG` wins over the configured directive
    pub fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter).map_err(|e| {
                QuranError::InvalidConfiguration(format!(
                    "Invalid log filter '{}': {}",
                    self.filter, e
                ))
            }),
        }
    }
}

/// Install the global tracing subscriber
///
/// # Errors
/// Returns `InvalidState` if a global subscriber is already installed and
/// `InvalidConfiguration` if the filter directive does not parse.
pub fn init_logging(options: &LogOptions) -> Result<()> {
    let filter = options.env_filter()?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(options.with_target)
                .with_ansi(options.use_color),
        )
        .try_init()
        .map_err(|e| QuranError::InvalidState(format!("Logging already initialized: {}", e)))?;

    tracing::debug!(filter = %options.filter, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_rejected() {
        let options = LogOptions {
            filter: "quran_core=verbose".to_string(),
            ..LogOptions::default()
        };
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(
                options.env_filter(),
                Err(QuranError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_second_init_fails() {
        let options = LogOptions::default();
        let _ = init_logging(&options);
        assert!(matches!(
            init_logging(&options),
            Err(QuranError::InvalidState(_))
        ));
    }
}
