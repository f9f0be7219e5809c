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


//! Memoizing services for expensive per-key computations
//!
//! Page renderers ask a [`CacheableService`] for values such as page
//! geometry or decoded images. A service answers from memory when it can
//! and otherwise computes the value, sharing a single computation between
//! every caller asking for the same key at the same time.

use crate::error::SharedResult;
use async_trait::async_trait;

pub mod main_thread;
pub mod memory;
pub mod operation;

pub use main_thread::{get_on_main_thread, ChannelDispatcher, MainThreadDispatcher, MainThreadTask};
pub use memory::Cache;
pub use operation::OperationCacheableService;

/// A keyed value source with memoization
///
/// At most one computation per key is in flight; concurrent callers for
/// that key receive the same result.
#[async_trait]
pub trait CacheableService<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// Cached value or the result of the (possibly shared) computation
    async fn get(&self, key: K) -> SharedResult<V>;

    /// Cached value only; never starts a computation
    fn get_cached(&self, key: &K) -> Option<V>;

    /// Drop every cached value
    fn invalidate(&self);
}
