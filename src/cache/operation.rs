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


//! Cacheable service backed by a bounded pool of computations
//!
//! A miss registers the caller as a waiter for the key. The first waiter
//! schedules the operation; everyone arriving while it runs joins the same
//! waiter list. When the operation finishes the value is cached (on
//! success) and handed to every waiter, errors included, so a failure is
//! never cached and the next `get` computes again.
//!
//! `invalidate` only empties the cache. Running computations keep their
//! waiters and store their value when they finish.

use crate::cache::memory::Cache;
use crate::cache::CacheableService;
use crate::config::CacheConfig;
use crate::error::{QuranError, Result, SharedResult};
use crate::sync::lock;
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

type Operation<K, V> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<V>> + Send + Sync>;
type Waiter<V> = oneshot::Sender<SharedResult<V>>;

struct ServiceInner<K: Hash + Eq, V> {
    cache: Cache<K, V>,
    operation: Operation<K, V>,
    workers: Arc<Semaphore>,
    in_flight: Mutex<HashMap<K, Vec<Waiter<V>>>>,
    scheduled: AtomicU64,
}

/// [`CacheableService`] computing misses with an async operation
pub struct OperationCacheableService<K: Hash + Eq, V> {
    inner: Arc<ServiceInner<K, V>>,
}

impl<K: Hash + Eq, V> Clone for OperationCacheableService<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> OperationCacheableService<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(config: &CacheConfig, operation: F) -> Result<Self>
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if config.max_concurrent_operations == 0 {
            return Err(QuranError::InvalidConfiguration(
                "max_concurrent_operations must be at least 1".to_string(),
            ));
        }
        let operation: Operation<K, V> = Arc::new(move |key| operation(key).boxed());
        Ok(Self {
            inner: Arc::new(ServiceInner {
                cache: Cache::new(config.count_limit)?,
                operation,
                workers: Arc::new(Semaphore::new(config.max_concurrent_operations)),
                in_flight: Mutex::new(HashMap::new()),
                scheduled: AtomicU64::new(0),
            }),
        })
    }

    /// Number of computations ever scheduled
    pub fn scheduled_operations(&self) -> u64 {
        self.inner.scheduled.load(Ordering::SeqCst)
    }

    /// Whether a computation for `key` is scheduled or running
    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.inner.in_flight).contains_key(key)
    }

    pub fn cache(&self) -> &Cache<K, V> {
        &self.inner.cache
    }

    fn schedule(&self, key: K) {
        let number = self.inner.scheduled.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = match Arc::clone(&inner.workers).acquire_owned().await {
                Ok(_permit) => {
                    // A panicking operation still has to release its waiters
                    AssertUnwindSafe(async { (inner.operation)(key.clone()).await })
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            Err(QuranError::ComputationFailed(panic_message(panic.as_ref())))
                        })
                }
                Err(_) => Err(QuranError::internal("cache worker pool closed")),
            };
            inner.complete(key, number, result.map_err(Arc::new));
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("operation panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("operation panicked: {}", message)
    } else {
        "operation panicked".to_string()
    }
}

impl<K, V> ServiceInner<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn complete(&self, key: K, number: u64, result: SharedResult<V>) {
        let waiters = {
            let mut in_flight = lock(&self.in_flight);
            // Stored before the entry goes so a new caller never misses both
            if let Ok(value) = &result {
                self.cache.set_object(key.clone(), value.clone());
            }
            in_flight.remove(&key).unwrap_or_default()
        };

        if let Err(e) = &result {
            warn!("Cache computation {} failed: {}", number, e);
        } else {
            debug!("Cache computation {} finished for {} waiters", number, waiters.len());
        }

        for waiter in waiters {
            // A dropped receiver means the caller stopped waiting
            let _ = waiter.send(result.clone());
        }
    }
}

#[async_trait]
impl<K, V> CacheableService<K, V> for OperationCacheableService<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: K) -> SharedResult<V> {
        if let Some(value) = self.inner.cache.object(&key) {
            return Ok(value);
        }

        let (sender, receiver) = oneshot::channel();
        let first = {
            let mut in_flight = lock(&self.inner.in_flight);
            // A computation may have finished since the first lookup
            if let Some(value) = self.inner.cache.object(&key) {
                return Ok(value);
            }
            match in_flight.get_mut(&key) {
                Some(waiters) => {
                    waiters.push(sender);
                    false
                }
                None => {
                    in_flight.insert(key.clone(), vec![sender]);
                    true
                }
            }
        };

        if first {
            self.schedule(key);
        }

        receiver
            .await
            .unwrap_or_else(|_| Err(Arc::new(QuranError::Cancelled)))
    }

    fn get_cached(&self, key: &K) -> Option<V> {
        self.inner.cache.object(key)
    }

    fn invalidate(&self) {
        self.inner.cache.remove_all();
    }
}
