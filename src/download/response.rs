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


//! Response handles for in-flight transfers
//!
//! Every response exposes the same lifecycle through [`Response`]: resume,
//! suspend, cancel, a live [`Progress`] and a single terminal result. The
//! result is write-once; the first assignment wins and later ones are
//! dropped. Callbacks registered after the result is known are invoked
//! straight away with it.

use crate::download::progress::Progress;
use crate::download::request::{Download, DownloadRequest, DownloadStatus};
use crate::download::session::{NetworkSession, TransferTask};
use crate::error::{QuranError, SharedResult};
use crate::sync::lock;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Callback invoked once with the terminal result
pub type CompletionCallback = Box<dyn FnOnce(SharedResult<()>) + Send>;

/// Uniform handle over an in-flight operation
pub trait Response: Send + Sync {
    fn resume(&self);

    fn suspend(&self);

    /// Terminal: no success or failure is delivered afterwards
    fn cancel(&self);

    fn progress(&self) -> Progress;

    /// Terminal result, `None` while still running
    fn result(&self) -> Option<SharedResult<()>>;

    /// Register a callback for the terminal result (replayed if already known)
    fn on_completion(&self, callback: CompletionCallback);
}

#[derive(Default)]
struct CompletionState {
    result: Option<SharedResult<()>>,
    callbacks: Vec<CompletionCallback>,
}

/// Write-once result with callbacks and async waiters
pub(crate) struct CompletionCell {
    state: Mutex<CompletionState>,
    sender: watch::Sender<Option<SharedResult<()>>>,
}

impl CompletionCell {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            state: Mutex::new(CompletionState::default()),
            sender,
        }
    }

    pub(crate) fn result(&self) -> Option<SharedResult<()>> {
        lock(&self.state).result.clone()
    }

    pub(crate) fn is_pending(&self) -> bool {
        lock(&self.state).result.is_none()
    }

    /// Store the result if none is set yet
    ///
    /// `on_win` runs after the result is stored and before any callback
    /// fires. Returns `false` when a result was already present.
    pub(crate) fn set_with<F: FnOnce()>(&self, result: SharedResult<()>, on_win: F) -> bool {
        let callbacks = {
            let mut state = lock(&self.state);
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            std::mem::take(&mut state.callbacks)
        };

        on_win();
        self.sender.send_replace(Some(result.clone()));
        for callback in callbacks {
            callback(result.clone());
        }
        true
    }

    pub(crate) fn on_completion(&self, callback: CompletionCallback) {
        let mut state = lock(&self.state);
        match state.result.clone() {
            Some(result) => {
                drop(state);
                callback(result);
            }
            None => state.callbacks.push(callback),
        }
    }

    pub(crate) async fn wait(&self) -> SharedResult<()> {
        let mut receiver = self.sender.subscribe();
        let result = match receiver.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| Err(Arc::new(QuranError::internal("completion channel closed"))))
    }
}

struct ResponseState {
    download: Download,
    task: Option<Arc<dyn TransferTask>>,
}

struct ResponseInner {
    state: Mutex<ResponseState>,
    progress: Progress,
    completion: CompletionCell,
}

/// Response for a single [`DownloadRequest`]
///
/// Cheap to clone; clones observe the same transfer.
#[derive(Clone)]
pub struct DownloadResponse {
    inner: Arc<ResponseInner>,
}

impl fmt::Debug for DownloadResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("DownloadResponse")
            .field("url", &state.download.request.url.as_str())
            .field("status", &state.download.status)
            .field("task_id", &state.download.task_id)
            .finish()
    }
}

impl DownloadResponse {
    pub fn new(download: Download) -> Self {
        Self {
            inner: Arc::new(ResponseInner {
                state: Mutex::new(ResponseState {
                    download,
                    task: None,
                }),
                progress: Progress::default(),
                completion: CompletionCell::new(),
            }),
        }
    }

    /// Current persisted view of this transfer
    pub fn download(&self) -> Download {
        lock(&self.inner.state).download.clone()
    }

    pub fn request(&self) -> DownloadRequest {
        lock(&self.inner.state).download.request.clone()
    }

    pub fn task_id(&self) -> Option<u64> {
        lock(&self.inner.state).download.task_id
    }

    pub fn has_task(&self) -> bool {
        lock(&self.inner.state).task.is_some()
    }

    /// Whether no terminal result has been set yet
    pub fn is_pending(&self) -> bool {
        self.inner.completion.is_pending()
    }

    /// Wait for the terminal result
    pub async fn completion(&self) -> SharedResult<()> {
        self.inner.completion.wait().await
    }

    /// Record transport progress (ignored once terminal)
    pub fn update_progress(&self, written_bytes: u64, expected_bytes: u64) {
        if self.is_pending() {
            self.inner.progress.update(expected_bytes, written_bytes);
        }
    }

    /// Create and attach a task when this response is waiting for one
    pub fn download_if_pending(&self, session: &dyn NetworkSession) -> Option<Arc<dyn TransferTask>> {
        if !self.is_pending() {
            return None;
        }
        let mut state = lock(&self.inner.state);
        if state.task.is_some() {
            return None;
        }
        let task = session.download_task(&state.download.request);
        state.download.task_id = Some(task.id());
        state.download.status = DownloadStatus::Downloading;
        state.task = Some(Arc::clone(&task));
        Some(task)
    }

    /// Attach a task found in the transport
    pub fn set_downloading(&self, task: Arc<dyn TransferTask>) {
        if !self.is_pending() {
            return;
        }
        let mut state = lock(&self.inner.state);
        if let Some(current) = &state.task {
            if Arc::ptr_eq(current, &task) {
                return;
            }
            tracing::warn!(task_id = task.id(), "replacing the task attached to a download");
        }
        state.download.task_id = Some(task.id());
        state.download.status = DownloadStatus::Downloading;
        state.task = Some(task);
    }

    /// Detach the task so the transfer is started again later
    pub fn set_pending(&self) {
        if !self.is_pending() {
            return;
        }
        let mut state = lock(&self.inner.state);
        state.task = None;
        state.download.task_id = None;
        state.download.status = DownloadStatus::Pending;
    }

    /// Complete successfully
    pub fn fulfill(&self) -> bool {
        let won = self.inner.completion.set_with(Ok(()), || {
            let mut state = lock(&self.inner.state);
            state.task = None;
            state.download.task_id = None;
            state.download.status = DownloadStatus::Completed;
            drop(state);
            self.inner.progress.finish();
        });
        if !won {
            tracing::debug!("ignoring success of an already completed download");
        }
        won
    }

    /// Complete with an error
    pub fn reject(&self, error: QuranError) -> bool {
        let won = self.inner.completion.set_with(Err(Arc::new(error)), || {
            let mut state = lock(&self.inner.state);
            state.task = None;
            state.download.task_id = None;
        });
        if !won {
            tracing::debug!("ignoring failure of an already completed download");
        }
        won
    }

    /// Set the terminal result, first assignment wins
    pub fn set_result(&self, result: Result<(), QuranError>) -> bool {
        match result {
            Ok(()) => self.fulfill(),
            Err(error) => self.reject(error),
        }
    }

    fn task(&self) -> Option<Arc<dyn TransferTask>> {
        lock(&self.inner.state).task.clone()
    }
}

impl Response for DownloadResponse {
    fn resume(&self) {
        if let Some(task) = self.task() {
            task.resume();
        }
    }

    fn suspend(&self) {
        if let Some(task) = self.task() {
            task.suspend();
        }
    }

    fn cancel(&self) {
        if !self.is_pending() {
            return;
        }
        if let Some(task) = self.task() {
            tracing::info!(task_id = task.id(), url = %task.request().url, "cancelling download task");
            task.cancel();
        }
        self.reject(QuranError::Cancelled);
    }

    fn progress(&self) -> Progress {
        self.inner.progress.clone()
    }

    fn result(&self) -> Option<SharedResult<()>> {
        self.inner.completion.result()
    }

    fn on_completion(&self, callback: CompletionCallback) {
        self.inner.completion.on_completion(callback);
    }
}
