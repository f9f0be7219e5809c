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


//! Quran Core
//!
//! Native engine of a Quran reading app: batched resumable downloads of
//! translation and recitation files, a memoize-and-coalesce cache for page
//! rendering work, and a shared SQLite connection pool.
//!
//! # Modules
//! - [`download`] - download manager, batches, HTTP session
//! - [`cache`] - cacheable services with coalesced computations
//! - [`storage`] - connection pool, migrations, download records
//! - [`config`] - file based configuration
//! - [`logging`] - tracing subscriber setup
//! - [`error`] - crate error type

pub mod cache;
pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod storage;

mod sync;

pub use config::CoreConfig;
pub use error::{QuranError, Result, SharedResult};
