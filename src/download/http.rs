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


//! HTTP transport with resume support
//!
//! # Resume Mechanism
//! 1. Bytes stream into the request's resume file
//! 2. A later start sends `Range: bytes=<resume file length>-`
//! 3. `206 Partial Content` appends, `200 OK` starts the file over
//! 4. On success the resume file is handed to the manager as `Finished`
//!
//! Suspending stops the stream and keeps the resume file. Cancelling stops
//! it for good and deletes the partial data.

use crate::download::request::{DownloadRequest, HttpMethod};
use crate::download::session::{NetworkSession, SessionEvent, SessionEventSender, TransferTask};
use crate::error::{NetworkErrorKind, QuranError, Result};
use crate::sync::lock;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Method, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type TaskRegistry = Arc<Mutex<HashMap<u64, Arc<HttpTask>>>>;

/// reqwest-backed [`NetworkSession`]
pub struct HttpSession {
    client: Client,
    events: SessionEventSender,
    next_task_id: AtomicU64,
    tasks: TaskRegistry,
}

impl HttpSession {
    /// Create a session with its own client
    pub fn new(events: SessionEventSender, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self::with_client(client, events))
    }

    pub fn with_client(client: Client, events: SessionEventSender) -> Self {
        Self {
            client,
            events,
            next_task_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl NetworkSession for HttpSession {
    fn download_task(&self, request: &DownloadRequest) -> Arc<dyn TransferTask> {
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let registry = Arc::downgrade(&self.tasks);
        let task = Arc::new_cyclic(|this| HttpTask {
            id,
            request: request.clone(),
            client: self.client.clone(),
            events: self.events.clone(),
            this: this.clone(),
            registry,
            state: Mutex::new(HttpTaskState::default()),
        });
        lock(&self.tasks).insert(id, Arc::clone(&task));
        tracing::debug!(task_id = id, url = %request.url, "created download task");
        task
    }

    async fn running_tasks(&self) -> Vec<Arc<dyn TransferTask>> {
        lock(&self.tasks)
            .values()
            .map(|task| Arc::clone(task) as Arc<dyn TransferTask>)
            .collect()
    }
}

#[derive(Default)]
struct HttpTaskState {
    handle: Option<JoinHandle<()>>,
    token: Option<CancellationToken>,
    cancelled: bool,
    finished: bool,
}

/// One resumable HTTP transfer
pub struct HttpTask {
    id: u64,
    request: DownloadRequest,
    client: Client,
    events: SessionEventSender,
    this: Weak<HttpTask>,
    registry: Weak<Mutex<HashMap<u64, Arc<HttpTask>>>>,
    state: Mutex<HttpTaskState>,
}

impl fmt::Debug for HttpTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTask")
            .field("id", &self.id)
            .field("url", &self.request.url.as_str())
            .finish()
    }
}

enum TransferOutcome {
    Finished(PathBuf),
    Stopped,
}

impl HttpTask {
    fn send(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!(task_id = self.id, "session event receiver dropped");
        }
    }

    fn deregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(&self.id);
        }
    }

    /// Mark terminal, returns false when already terminal
    fn finish(&self) -> bool {
        let mut state = lock(&self.state);
        if state.finished {
            return false;
        }
        state.finished = true;
        state.handle = None;
        state.token = None;
        true
    }

    async fn run(self: Arc<Self>, previous: Option<JoinHandle<()>>, token: CancellationToken) {
        // A suspended stream flushes its last chunk before the file is reopened
        if let Some(previous) = previous {
            let _ = previous.await;
        }
        if lock(&self.state).finished {
            return;
        }

        let outcome = self.transfer(&token).await;
        let cancelled = lock(&self.state).cancelled;

        match outcome {
            Ok(TransferOutcome::Finished(location)) => {
                if self.finish() {
                    self.deregister();
                    self.send(SessionEvent::Finished {
                        task_id: self.id,
                        location,
                    });
                    self.send(SessionEvent::Completed {
                        task_id: self.id,
                        result: Ok(()),
                    });
                }
            }
            Ok(TransferOutcome::Stopped) if cancelled => {
                if self.finish() {
                    self.deregister();
                    remove_partial(&self.request.resume_path).await;
                    self.send(SessionEvent::Completed {
                        task_id: self.id,
                        result: Err(QuranError::Cancelled),
                    });
                }
            }
            Ok(TransferOutcome::Stopped) => {
                tracing::debug!(task_id = self.id, "download task suspended");
            }
            Err(error) => {
                if self.finish() {
                    self.deregister();
                    tracing::warn!(task_id = self.id, url = %self.request.url, error = %error, "download task failed");
                    self.send(SessionEvent::Completed {
                        task_id: self.id,
                        result: Err(error),
                    });
                }
            }
        }
    }

    async fn transfer(&self, token: &CancellationToken) -> Result<TransferOutcome> {
        let resume_path = &self.request.resume_path;
        if let Some(parent) = resume_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(QuranError::from_file_system)?;
        }

        let offset = match tokio::fs::metadata(resume_path).await {
            Ok(metadata) => metadata.len(),
            Err(_) => 0,
        };

        let method = match self.request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
        };
        let mut builder = self.client.request(method, self.request.url.clone());
        for (key, value) in &self.request.headers {
            if !key.eq_ignore_ascii_case("range") {
                builder = builder.header(key, value);
            }
        }
        if offset > 0 {
            builder = builder.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }

        let response = tokio::select! {
            _ = token.cancelled() => return Ok(TransferOutcome::Stopped),
            response = builder.send() => response?,
        };

        let status = response.status();
        let (append, mut written, expected) = match status {
            StatusCode::PARTIAL_CONTENT if offset > 0 => {
                let total = content_range_total(&response)
                    .or_else(|| response.content_length().map(|len| len + offset))
                    .unwrap_or(0);
                tracing::debug!(task_id = self.id, offset, total, "resuming download");
                (true, offset, total)
            }
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                // Remote file changed size, start over on the next attempt
                remove_partial(resume_path).await;
                return Err(QuranError::server_error(status.as_u16()));
            }
            s if s.is_success() => (false, 0, response.content_length().unwrap_or(0)),
            s => return Err(QuranError::server_error(s.as_u16())),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(resume_path)
            .await
            .map_err(QuranError::from_file_system)?;

        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => {
                    file.flush().await.map_err(QuranError::from_file_system)?;
                    return Ok(TransferOutcome::Stopped);
                }
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(QuranError::from_file_system)?;
            written += chunk.len() as u64;

            self.send(SessionEvent::Progress {
                task_id: self.id,
                written_bytes: written,
                expected_bytes: expected.max(written),
            });
        }

        file.flush().await.map_err(QuranError::from_file_system)?;
        file.sync_all().await.map_err(QuranError::from_file_system)?;

        if expected > 0 && written < expected {
            return Err(QuranError::network(
                NetworkErrorKind::ConnectionLost,
                format!("Download incomplete: {}/{} bytes", written, expected),
            ));
        }

        Ok(TransferOutcome::Finished(resume_path.clone()))
    }
}

impl TransferTask for HttpTask {
    fn id(&self) -> u64 {
        self.id
    }

    fn request(&self) -> &DownloadRequest {
        &self.request
    }

    fn resume(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let mut state = lock(&self.state);
        if state.finished || state.cancelled {
            return;
        }
        let streaming = state.token.as_ref().map_or(false, |token| !token.is_cancelled())
            && state.handle.as_ref().map_or(false, |handle| !handle.is_finished());
        if streaming {
            return;
        }

        let previous = state.handle.take();
        let token = CancellationToken::new();
        state.token = Some(token.clone());
        state.handle = Some(tokio::spawn(this.run(previous, token)));
        tracing::debug!(task_id = self.id, url = %self.request.url, "download task started");
    }

    fn suspend(&self) {
        let state = lock(&self.state);
        if let Some(token) = &state.token {
            token.cancel();
        }
    }

    fn cancel(&self) {
        let running = {
            let mut state = lock(&self.state);
            if state.finished || state.cancelled {
                return;
            }
            state.cancelled = true;
            if let Some(token) = &state.token {
                token.cancel();
            }
            state.handle.as_ref().map_or(false, |handle| !handle.is_finished())
        };

        // A running transfer reports its own cancellation
        if !running && self.finish() {
            self.deregister();
            if let Err(e) = std::fs::remove_file(&self.request.resume_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.request.resume_path.display(), error = %e, "cannot remove partial download");
                }
            }
            self.send(SessionEvent::Completed {
                task_id: self.id,
                result: Err(QuranError::Cancelled),
            });
        }
    }
}

fn content_range_total(response: &reqwest::Response) -> Option<u64> {
    // Content-Range: bytes 1000-1999/2000
    response
        .headers()
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.rsplit('/').next())
        .and_then(|total| total.parse::<u64>().ok())
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "cannot remove partial download");
        }
    }
}
