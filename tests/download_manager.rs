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


//! Download manager integration tests
//!
//! The transport is an in-process session whose tasks only finish when the
//! test says so, which keeps scheduling order deterministic.

use async_trait::async_trait;
use quran_core::config::DatabaseConfig;
use quran_core::download::session::SessionEventSender;
use quran_core::download::{
    DownloadBatchRequest, DownloadManager, DownloadRequest, DownloadStatus, NetworkSession,
    Response, SessionEvent, TransferTask,
};
use quran_core::error::{NetworkErrorKind, QuranError};
use quran_core::storage::{ConnectionsPool, DownloadsPersistence, SqliteDownloadsPersistence};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Fake transport
// ============================================================================

#[derive(Default)]
struct FakeSession {
    events: Mutex<Option<SessionEventSender>>,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, Arc<FakeTask>>>,
    /// URLs in the order their tasks were resumed
    started: Mutex<Vec<String>>,
}

#[derive(Debug)]
struct FakeTask {
    id: u64,
    request: DownloadRequest,
    session: Weak<FakeSession>,
}

impl FakeSession {
    fn attach(&self, events: SessionEventSender) {
        *self.events.lock().unwrap() = Some(events);
    }

    fn send(&self, event: SessionEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn task_for(&self, url: &str) -> Arc<FakeTask> {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .find(|task| task.request.url.as_str() == url)
            .cloned()
            .unwrap_or_else(|| panic!("no task for {}", url))
    }

    /// Write the body into the resume file and report success
    fn succeed(&self, url: &str, body: &[u8]) {
        let task = self.task_for(url);
        let location = task.request.resume_path.clone();
        std::fs::create_dir_all(location.parent().unwrap()).unwrap();
        std::fs::write(&location, body).unwrap();

        self.tasks.lock().unwrap().remove(&task.id);
        self.send(SessionEvent::Progress {
            task_id: task.id,
            written_bytes: body.len() as u64,
            expected_bytes: body.len() as u64,
        });
        self.send(SessionEvent::Finished {
            task_id: task.id,
            location,
        });
        self.send(SessionEvent::Completed {
            task_id: task.id,
            result: Ok(()),
        });
    }

    fn fail(&self, url: &str) {
        let task = self.task_for(url);
        self.tasks.lock().unwrap().remove(&task.id);
        self.send(SessionEvent::Completed {
            task_id: task.id,
            result: Err(QuranError::network(NetworkErrorKind::ConnectionLost, "reset by peer")),
        });
    }
}

impl TransferTask for FakeTask {
    fn id(&self) -> u64 {
        self.id
    }

    fn request(&self) -> &DownloadRequest {
        &self.request
    }

    fn resume(&self) {
        if let Some(session) = self.session.upgrade() {
            session.started.lock().unwrap().push(self.request.url.to_string());
        }
    }

    fn suspend(&self) {}

    fn cancel(&self) {
        if let Some(session) = self.session.upgrade() {
            session.tasks.lock().unwrap().remove(&self.id);
            session.send(SessionEvent::Completed {
                task_id: self.id,
                result: Err(QuranError::Cancelled),
            });
        }
    }
}

struct SessionHandle(Arc<FakeSession>);

#[async_trait]
impl NetworkSession for SessionHandle {
    fn download_task(&self, request: &DownloadRequest) -> Arc<dyn TransferTask> {
        let task = Arc::new(FakeTask {
            id: self.0.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            request: request.clone(),
            session: Arc::downgrade(&self.0),
        });
        self.0.tasks.lock().unwrap().insert(task.id, Arc::clone(&task));
        task
    }

    async fn running_tasks(&self) -> Vec<Arc<dyn TransferTask>> {
        self.0
            .tasks
            .lock()
            .unwrap()
            .values()
            .map(|task| Arc::clone(task) as Arc<dyn TransferTask>)
            .collect()
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Fixture {
    dir: TempDir,
    pool: Arc<ConnectionsPool>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            pool: ConnectionsPool::shared(DatabaseConfig::default()),
        }
    }

    fn database(&self) -> PathBuf {
        self.dir.path().join("ongoing-downloads.db")
    }

    async fn persistence(&self) -> Arc<SqliteDownloadsPersistence> {
        Arc::new(
            SqliteDownloadsPersistence::open(Arc::clone(&self.pool), self.database())
                .await
                .unwrap(),
        )
    }

    async fn manager(&self, max: usize) -> (DownloadManager, Arc<FakeSession>) {
        let session = Arc::new(FakeSession::default());
        let handle = Arc::clone(&session);
        let manager = DownloadManager::new(max, self.persistence().await, move |events| {
            handle.attach(events);
            Arc::new(SessionHandle(handle)) as Arc<dyn NetworkSession>
        });
        (manager, session)
    }

    fn destination(&self, name: &str) -> PathBuf {
        self.dir.path().join("audio_files/husary").join(name)
    }

    fn batch_request(&self, names: &[&str]) -> DownloadBatchRequest {
        DownloadBatchRequest::new(
            names
                .iter()
                .map(|name| DownloadRequest::parse(&url(name), self.destination(name)).unwrap())
                .collect(),
        )
    }
}

fn url(name: &str) -> String {
    format!("https://download.quranicaudio.com/quran/husary/{}", name)
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn stored_batches(fixture: &Fixture) -> usize {
    fixture.persistence().await.retrieve_all().await.unwrap().len()
}

/// Finished batches leave memory and persistence once their watcher ran
async fn wait_until_removed(fixture: &Fixture, manager: &DownloadManager) {
    for _ in 0..500 {
        if manager.ongoing_downloads().await.is_empty() && stored_batches(fixture).await == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("finished batch was not removed");
}

fn exists(path: &Path) -> bool {
    path.exists()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_batch_fails_only_after_every_file_finished() {
    let fixture = Fixture::new();
    let (manager, session) = fixture.manager(3).await;
    manager.start().await.unwrap();

    let batch = manager
        .download(fixture.batch_request(&["001.mp3", "002.mp3", "003.mp3"]))
        .await
        .unwrap();
    eventually(|| session.started().len() == 3).await;

    session.fail(&url("003.mp3"));
    session.succeed(&url("001.mp3"), b"first");
    eventually(|| batch.responses()[0].result().is_some()).await;
    assert!(batch.result().is_none(), "002 is still running");

    session.succeed(&url("002.mp3"), b"second");
    let result = batch.completion().await;
    assert!(matches!(
        result.unwrap_err().as_ref(),
        QuranError::Network { kind: NetworkErrorKind::ConnectionLost, .. }
    ));

    assert_eq!(std::fs::read(fixture.destination("001.mp3")).unwrap(), b"first");
    assert_eq!(std::fs::read(fixture.destination("002.mp3")).unwrap(), b"second");
    assert!(!exists(&fixture.destination("003.mp3")));
}

#[tokio::test]
async fn test_limits_simultaneous_downloads() {
    let fixture = Fixture::new();
    let (manager, session) = fixture.manager(3).await;
    manager.start().await.unwrap();

    let batch = manager
        .download(fixture.batch_request(&["001.mp3", "002.mp3", "003.mp3", "004.mp3"]))
        .await
        .unwrap();
    eventually(|| session.started().len() == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.started().len(), 3);
    assert!(batch.responses()[3].task_id().is_none());

    session.succeed(&url("002.mp3"), b"2");
    eventually(|| session.started().len() == 4).await;
    assert_eq!(session.started()[3], url("004.mp3"));

    for name in ["001.mp3", "003.mp3", "004.mp3"] {
        session.succeed(&url(name), name.as_bytes());
    }
    batch.completion().await.unwrap();
}

#[tokio::test]
async fn test_later_batches_wait_for_earlier_ones() {
    let fixture = Fixture::new();
    let (manager, session) = fixture.manager(1).await;
    manager.start().await.unwrap();

    let first = manager.download(fixture.batch_request(&["001.mp3"])).await.unwrap();
    let second = manager.download(fixture.batch_request(&["002.mp3"])).await.unwrap();
    assert!(first.batch_id() < second.batch_id());
    eventually(|| session.started() == vec![url("001.mp3")]).await;

    session.succeed(&url("001.mp3"), b"1");
    first.completion().await.unwrap();
    eventually(|| session.started().len() == 2).await;

    session.succeed(&url("002.mp3"), b"2");
    second.completion().await.unwrap();
}

#[tokio::test]
async fn test_finished_batch_is_removed() {
    let fixture = Fixture::new();
    let (manager, session) = fixture.manager(3).await;
    manager.start().await.unwrap();

    let batch = manager
        .download(fixture.batch_request(&["001.mp3", "002.mp3"]))
        .await
        .unwrap();
    eventually(|| session.started().len() == 2).await;
    assert_eq!(stored_batches(&fixture).await, 1);

    session.succeed(&url("001.mp3"), b"1");
    eventually(|| batch.responses()[0].result().is_some()).await;

    // Completed files are recorded while the rest of the batch runs
    let stored = fixture.persistence().await.retrieve_all().await.unwrap();
    let first = stored[0]
        .downloads
        .iter()
        .find(|download| download.request.url.as_str() == url("001.mp3"))
        .unwrap();
    assert_eq!(first.status, DownloadStatus::Completed);

    session.succeed(&url("002.mp3"), b"2");
    batch.completion().await.unwrap();
    wait_until_removed(&fixture, &manager).await;
}

#[tokio::test]
async fn test_restart_continues_stored_batches() {
    let fixture = Fixture::new();
    let batch_id = {
        let (manager, session) = fixture.manager(3).await;
        manager.start().await.unwrap();
        let batch = manager
            .download(fixture.batch_request(&["001.mp3", "002.mp3"]))
            .await
            .unwrap();
        eventually(|| session.started().len() == 2).await;
        session.succeed(&url("001.mp3"), b"1");
        eventually(|| batch.responses()[0].result().is_some()).await;
        batch.batch_id()
    };

    // A new process: the old transport tasks are gone
    let (manager, session) = fixture.manager(3).await;
    manager.start().await.unwrap();

    let batches = manager.ongoing_downloads().await;
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.batch_id(), batch_id);
    assert!(matches!(batch.responses()[0].result(), Some(Ok(()))));

    eventually(|| session.started() == vec![url("002.mp3")]).await;
    session.succeed(&url("002.mp3"), b"2");
    batch.completion().await.unwrap();
    assert!(exists(&fixture.destination("002.mp3")));
}

#[tokio::test]
async fn test_downloads_wait_for_start() {
    let fixture = Fixture::new();
    let (manager, session) = fixture.manager(3).await;

    let batch = manager.download(fixture.batch_request(&["001.mp3"])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(session.started().is_empty());
    assert_eq!(stored_batches(&fixture).await, 1);

    manager.start().await.unwrap();
    // The batch is stored and in memory; it must not be duplicated
    assert_eq!(manager.ongoing_downloads().await.len(), 1);
    eventually(|| session.started().len() == 1).await;

    session.succeed(&url("001.mp3"), b"1");
    batch.completion().await.unwrap();
}

#[tokio::test]
async fn test_cancel_prevents_success() {
    let fixture = Fixture::new();
    let (manager, session) = fixture.manager(3).await;
    manager.start().await.unwrap();

    let batch = manager
        .download(fixture.batch_request(&["001.mp3", "002.mp3"]))
        .await
        .unwrap();
    eventually(|| session.started().len() == 2).await;

    manager.cancel(&[batch.clone()]).await;
    let result = batch.completion().await;
    assert!(result.unwrap_err().is_cancelled());
    assert!(manager.ongoing_downloads().await.is_empty());
    assert_eq!(stored_batches(&fixture).await, 0);
    assert!(!exists(&fixture.destination("001.mp3")));
}

#[tokio::test]
async fn test_cancel_all_starts_nothing_new() {
    let fixture = Fixture::new();
    let (manager, session) = fixture.manager(1).await;
    manager.start().await.unwrap();

    let first = manager.download(fixture.batch_request(&["001.mp3"])).await.unwrap();
    let second = manager.download(fixture.batch_request(&["002.mp3"])).await.unwrap();
    eventually(|| session.started().len() == 1).await;

    manager.cancel_all().await;
    assert!(first.completion().await.is_err());
    assert!(second.completion().await.is_err());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(session.started(), vec![url("001.mp3")]);
}

#[tokio::test]
async fn test_empty_batch_completes_immediately() {
    let fixture = Fixture::new();
    let (manager, _session) = fixture.manager(3).await;
    manager.start().await.unwrap();

    let batch = manager.download(DownloadBatchRequest::new(Vec::new())).await.unwrap();
    batch.completion().await.unwrap();
    wait_until_removed(&fixture, &manager).await;
}
