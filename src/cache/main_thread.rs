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


//! Main-thread friendly access to cacheable services
//!
//! UI code cannot await. [`get_on_main_thread`] answers synchronously with
//! whatever is cached and, on a miss, computes in the background and
//! delivers the value later through a [`MainThreadDispatcher`].

use crate::cache::CacheableService;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Unit of work to run on the UI thread
pub type MainThreadTask = Box<dyn FnOnce() + Send>;

/// Schedules work onto the UI thread
pub trait MainThreadDispatcher: Send + Sync {
    fn dispatch(&self, task: MainThreadTask);
}

/// Dispatcher handing tasks to a channel drained by the UI loop
#[derive(Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<MainThreadTask>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MainThreadTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl MainThreadDispatcher for ChannelDispatcher {
    fn dispatch(&self, task: MainThreadTask) {
        if self.sender.send(task).is_err() {
            warn!("Main thread dispatcher is gone, dropping task");
        }
    }
}

/// Call `callback` with the cached value, or with `None` followed by the computed one
///
/// The first call happens before this function returns. On a miss the
/// value is computed on the current tokio runtime and the second call is
/// dispatched through `dispatcher`. Failures are logged and produce no
/// second call.
pub fn get_on_main_thread<K, V, S, F>(
    service: Arc<S>,
    key: K,
    dispatcher: Arc<dyn MainThreadDispatcher>,
    callback: F,
) where
    K: Send + Sync + 'static,
    V: Clone + Send + 'static,
    S: CacheableService<K, V> + ?Sized + 'static,
    F: Fn(Option<V>) + Send + 'static,
{
    if let Some(value) = service.get_cached(&key) {
        callback(Some(value));
        return;
    }
    callback(None);

    let handle = match Handle::try_current() {
        Ok(handle) => handle,
        Err(e) => {
            error!("No runtime to compute cache miss on: {}", e);
            return;
        }
    };

    handle.spawn(async move {
        match service.get(key).await {
            Ok(value) => dispatcher.dispatch(Box::new(move || callback(Some(value)))),
            Err(e) => error!("Cache computation failed: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::OperationCacheableService;
    use crate::config::CacheConfig;
    use crate::error::QuranError;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<Option<u32>>>>, impl Fn(Option<u32>) + Send + 'static) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        (calls, move |value| sink.lock().unwrap().push(value))
    }

    #[tokio::test]
    async fn test_miss_then_value_through_dispatcher() {
        let service = Arc::new(
            OperationCacheableService::new(&CacheConfig::default(), |n: u32| async move { Ok(n + 1) })
                .unwrap(),
        );
        let (dispatcher, mut tasks) = ChannelDispatcher::new();
        let (calls, callback) = recorder();

        get_on_main_thread(Arc::clone(&service), 41, Arc::new(dispatcher.clone()), callback);
        assert_eq!(*calls.lock().unwrap(), vec![None]);

        let task = tasks.recv().await.unwrap();
        task();
        assert_eq!(*calls.lock().unwrap(), vec![None, Some(42)]);

        // Now cached: answered synchronously
        let (calls, callback) = recorder();
        get_on_main_thread(service, 41, Arc::new(dispatcher), callback);
        assert_eq!(*calls.lock().unwrap(), vec![Some(42)]);
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let service = Arc::new(
            OperationCacheableService::new(&CacheConfig::default(), |_: u32| async move {
                Err::<u32, _>(QuranError::ComputationFailed("boom".to_string()))
            })
            .unwrap(),
        );
        let (dispatcher, mut tasks) = ChannelDispatcher::new();
        let (calls, callback) = recorder();

        get_on_main_thread(Arc::clone(&service), 1, Arc::new(dispatcher), callback);

        // The dispatcher is dropped by the background task without sending
        assert!(tasks.recv().await.is_none());
        assert_eq!(*calls.lock().unwrap(), vec![None]);
    }
}
