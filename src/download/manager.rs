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


//! Download manager for translation and recitation files
//!
//! # Download Queue Management
//! - Batches are persisted before any transfer starts
//! - At most `max_simultaneous_downloads` transfers run across all batches
//! - Pending transfers start in batch id order, then request order
//! - A finished batch is removed from memory and persistence
//!
//! # Restart
//! [`DownloadManager::start`] reloads stored batches and re-attaches
//! transport tasks that are still alive. Downloads whose task is gone go
//! back to pending and continue from their resume file.

use crate::config::CoreConfig;
use crate::download::batch::DownloadBatchResponse;
use crate::download::http::HttpSession;
use crate::download::request::{DownloadBatch, DownloadBatchRequest, DownloadRequest, DownloadStatus};
use crate::download::response::{DownloadResponse, Response};
use crate::download::session::{
    event_channel, NetworkSession, SessionEvent, SessionEventReceiver, SessionEventSender, TransferTask,
};
use crate::error::{QuranError, Result};
use crate::storage::downloads::{DownloadsPersistence, SqliteDownloadsPersistence};
use crate::storage::pool::ConnectionsPool;
use crate::sync::lock;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Mutex as AsyncMutex;

/// Attempts made to read stored batches on start
const LOAD_ATTEMPTS: u32 = 3;

#[derive(Default)]
struct ManagerState {
    batches: BTreeMap<i64, DownloadBatchResponse>,
    loaded_initial_tasks: bool,
}

struct ManagerInner {
    max_simultaneous_downloads: usize,
    persistence: Arc<dyn DownloadsPersistence>,
    session: Arc<dyn NetworkSession>,
    events: Mutex<Option<SessionEventReceiver>>,
    state: AsyncMutex<ManagerState>,
}

/// Batch downloader with persistence and bounded concurrency
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

impl DownloadManager {
    /// Create a manager around a transport built by `session_factory`
    ///
    /// The factory receives the sender the session must report its events on.
    /// Nothing is transferred before [`start`](Self::start) runs.
    pub fn new<F>(
        max_simultaneous_downloads: usize,
        persistence: Arc<dyn DownloadsPersistence>,
        session_factory: F,
    ) -> Self
    where
        F: FnOnce(SessionEventSender) -> Arc<dyn NetworkSession>,
    {
        let (sender, receiver) = event_channel();
        let session = session_factory(sender);
        Self {
            inner: Arc::new(ManagerInner {
                max_simultaneous_downloads: max_simultaneous_downloads.max(1),
                persistence,
                session,
                events: Mutex::new(Some(receiver)),
                state: AsyncMutex::new(ManagerState::default()),
            }),
        }
    }

    /// Build the HTTP + SQLite manager described by `config` and start it
    pub async fn from_config(config: &CoreConfig, pool: Arc<ConnectionsPool>) -> Result<Self> {
        config.validate()?;
        let persistence =
            SqliteDownloadsPersistence::open(pool, config.downloads_database_path()).await?;

        let (sender, receiver) = event_channel();
        let session = HttpSession::new(sender, config.request_timeout())?;

        let manager = Self {
            inner: Arc::new(ManagerInner {
                max_simultaneous_downloads: config.max_simultaneous_downloads,
                persistence: Arc::new(persistence),
                session: Arc::new(session),
                events: Mutex::new(Some(receiver)),
                state: AsyncMutex::new(ManagerState::default()),
            }),
        };
        manager.start().await?;
        Ok(manager)
    }

    /// Load stored batches, re-attach live tasks and start pending transfers
    ///
    /// Calling it again is a no-op. If stored batches cannot be read the
    /// manager still runs with an empty queue and the error is returned.
    pub async fn start(&self) -> Result<()> {
        let Some(receiver) = lock(&self.inner.events).take() else {
            return Ok(());
        };
        tokio::spawn(run_event_loop(Arc::downgrade(&self.inner), receiver));

        let loaded = self.inner.load_batches().await;

        let running = self.inner.session.running_tasks().await;
        let tasks_by_id: HashMap<u64, Arc<dyn TransferTask>> =
            running.into_iter().map(|task| (task.id(), task)).collect();

        let mut state = self.inner.state.lock().await;
        if let Ok(batches) = &loaded {
            tracing::info!(batches = batches.len(), "loading download batches from persistence");
            for batch in batches.iter().cloned() {
                // Batches queued before start are already in memory
                if state.batches.contains_key(&batch.id) {
                    continue;
                }
                self.inner.create_response(&mut state, batch);
            }
        }

        for batch in state.batches.values() {
            for response in batch.responses() {
                let Some(task_id) = response.task_id() else {
                    continue;
                };
                match tasks_by_id.get(&task_id) {
                    Some(task) => {
                        tracing::info!(task_id, url = %task.request().url, "associating download with a running task");
                        response.set_downloading(Arc::clone(task));
                    }
                    None => {
                        tracing::info!(task_id, "task not found, download goes back to pending");
                        response.set_pending();
                    }
                }
            }
        }

        state.loaded_initial_tasks = true;
        self.inner.start_pending_tasks(&mut state).await;

        loaded.map(|_| ())
    }

    /// Persist a batch and queue its transfers
    pub async fn download(&self, request: DownloadBatchRequest) -> Result<DownloadBatchResponse> {
        tracing::info!(requests = request.len(), "batching downloads");
        let batch = self.inner.persistence.insert(&request).await?;

        let mut state = self.inner.state.lock().await;
        let response = self.inner.create_response(&mut state, batch);
        self.inner.start_pending_tasks(&mut state).await;
        Ok(response)
    }

    /// Batches that have not finished yet, ordered by batch id
    pub async fn ongoing_downloads(&self) -> Vec<DownloadBatchResponse> {
        self.inner.state.lock().await.batches.values().cloned().collect()
    }

    /// Cancel batches and wait until each has completed
    pub async fn cancel(&self, batches: &[DownloadBatchResponse]) {
        for batch in batches {
            batch.cancel();
        }
        for batch in batches {
            if let Err(e) = batch.completion().await {
                tracing::debug!(batch_id = batch.batch_id(), error = %e, "cancelled batch completed");
            }
        }

        let mut state = self.inner.state.lock().await;
        let removed: Vec<i64> = batches
            .iter()
            .map(DownloadBatchResponse::batch_id)
            .filter(|id| state.batches.remove(id).is_some())
            .collect();
        self.inner.delete_batches(&removed).await;
        self.inner.start_pending_tasks(&mut state).await;
    }

    /// Cancel every ongoing batch
    pub async fn cancel_all(&self) {
        let batches = self.ongoing_downloads().await;
        self.cancel(&batches).await;
    }
}

async fn run_event_loop(manager: Weak<ManagerInner>, mut receiver: SessionEventReceiver) {
    while let Some(event) = receiver.recv().await {
        let Some(inner) = manager.upgrade() else {
            break;
        };
        inner.handle_event(event).await;
    }
    tracing::debug!("download event loop stopped");
}

impl ManagerInner {
    async fn load_batches(&self) -> Result<Vec<DownloadBatch>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.persistence.retrieve_all().await {
                Ok(batches) => return Ok(batches),
                Err(e) if attempt < LOAD_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "failed to load download batches, retrying");
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to retrieve initial download batches");
                    return Err(e);
                }
            }
        }
    }

    fn create_response(self: &Arc<Self>, state: &mut ManagerState, batch: DownloadBatch) -> DownloadBatchResponse {
        let responses: Vec<DownloadResponse> = batch
            .downloads
            .into_iter()
            .map(|download| {
                let completed = download.status == DownloadStatus::Completed;
                let response = DownloadResponse::new(download);
                if completed {
                    response.fulfill();
                }
                response
            })
            .collect();

        let response = DownloadBatchResponse::new(batch.id, responses);
        state.batches.insert(batch.id, response.clone());

        let manager = Arc::downgrade(self);
        let watched = response.clone();
        tokio::spawn(async move {
            if let Err(e) = watched.completion().await {
                tracing::debug!(batch_id = watched.batch_id(), error = %e, "batch finished with error");
            }
            if let Some(inner) = manager.upgrade() {
                inner.complete_batch(&watched).await;
            }
        });

        response
    }

    async fn complete_batch(&self, batch: &DownloadBatchResponse) {
        let mut state = self.state.lock().await;
        if state.batches.remove(&batch.batch_id()).is_none() {
            return;
        }
        self.delete_batches(&[batch.batch_id()]).await;
        self.start_pending_tasks(&mut state).await;
    }

    async fn delete_batches(&self, batch_ids: &[i64]) {
        if batch_ids.is_empty() {
            return;
        }
        if let Err(e) = self.persistence.delete(batch_ids).await {
            tracing::error!(?batch_ids, error = %e, "failed to delete download batches");
        }
    }

    async fn start_pending_tasks(&self, state: &mut ManagerState) {
        if !state.loaded_initial_tasks {
            return;
        }

        let running = state
            .batches
            .values()
            .flat_map(|batch| batch.responses())
            .filter(|response| response.task_id().is_some())
            .count();
        if running >= self.max_simultaneous_downloads {
            return;
        }
        let capacity = self.max_simultaneous_downloads - running;

        let mut started: Vec<(Arc<dyn TransferTask>, DownloadResponse)> = Vec::new();
        'batches: for batch in state.batches.values() {
            for response in batch.responses() {
                if started.len() >= capacity {
                    break 'batches;
                }
                if let Some(task) = response.download_if_pending(self.session.as_ref()) {
                    started.push((task, response.clone()));
                }
            }
        }

        if started.is_empty() {
            return;
        }
        tracing::info!(count = started.len(), "enqueuing downloads on empty channels");

        let downloads: Vec<_> = started.iter().map(|(_, response)| response.download()).collect();
        if let Err(e) = self.persistence.update(&downloads).await {
            tracing::error!(error = %e, "failed to persist started downloads");
        }

        for (task, _) in &started {
            task.resume();
        }
    }

    fn find_response(state: &ManagerState, task_id: u64) -> Option<DownloadResponse> {
        state
            .batches
            .values()
            .flat_map(|batch| batch.responses())
            .find(|response| response.task_id() == Some(task_id))
            .cloned()
    }

    async fn handle_event(&self, event: SessionEvent) {
        let mut state = self.state.lock().await;
        let task_id = event.task_id();

        let Some(response) = Self::find_response(&state, task_id) else {
            tracing::debug!(task_id, "no ongoing download for task");
            return;
        };

        match event {
            SessionEvent::Progress {
                written_bytes,
                expected_bytes,
                ..
            } => {
                response.update_progress(written_bytes, expected_bytes);
                return;
            }
            SessionEvent::Finished { location, .. } => {
                let request = response.request();
                if let Err(e) = place_file(&request, &location).await {
                    tracing::error!(
                        destination = %request.destination_path.display(),
                        error = %e,
                        "problem moving downloaded file to its destination"
                    );
                    response.reject(e);
                } else {
                    return;
                }
            }
            SessionEvent::Completed { result: Ok(()), .. } => {
                if response.fulfill() {
                    if let Err(e) = self.persistence.update(&[response.download()]).await {
                        tracing::error!(error = %e, "failed to persist completed download");
                    }
                }
            }
            SessionEvent::Completed { result: Err(e), .. } => {
                if !e.is_cancelled() {
                    tracing::error!(url = %response.request().url, error = %e, "download network error occurred");
                }
                response.reject(e);
            }
        }

        self.start_pending_tasks(&mut state).await;
    }
}

/// Move a finished transfer into place
///
/// Replaces any existing destination file and creates its directory.
async fn place_file(request: &DownloadRequest, location: &Path) -> Result<()> {
    let destination = &request.destination_path;

    if request.resume_path != location {
        remove_if_exists(&request.resume_path).await?;
    }
    remove_if_exists(destination).await?;

    if let Some(directory) = destination.parent() {
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(QuranError::from_file_system)?;
    }

    if tokio::fs::rename(location, destination).await.is_err() {
        // Different file systems, fall back to copying
        tokio::fs::copy(location, destination)
            .await
            .map_err(QuranError::from_file_system)?;
        remove_if_exists(location).await?;
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(QuranError::from_file_system(e)),
    }
}
