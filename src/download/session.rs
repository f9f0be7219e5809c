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


//! Transport abstraction used by the download manager
//!
//! A [`NetworkSession`] turns a [`DownloadRequest`] into a [`TransferTask`]
//! and reports what happens to its tasks as [`SessionEvent`]s on the channel
//! it was created with. The manager consumes those events in order.

use crate::download::request::DownloadRequest;
use crate::error::QuranError;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sender side of the session event channel
pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiver side of the session event channel
pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the channel a session reports on
pub fn event_channel() -> (SessionEventSender, SessionEventReceiver) {
    mpsc::unbounded_channel()
}

/// What happened to a transport task
#[derive(Debug)]
pub enum SessionEvent {
    /// Bytes were written
    Progress {
        task_id: u64,
        written_bytes: u64,
        expected_bytes: u64,
    },

    /// Body fully received into `location`
    Finished { task_id: u64, location: PathBuf },

    /// Task ended, `Ok` only after a `Finished` event
    Completed {
        task_id: u64,
        result: Result<(), QuranError>,
    },
}

impl SessionEvent {
    pub fn task_id(&self) -> u64 {
        match self {
            SessionEvent::Progress { task_id, .. }
            | SessionEvent::Finished { task_id, .. }
            | SessionEvent::Completed { task_id, .. } => *task_id,
        }
    }
}

/// One transfer owned by a session
pub trait TransferTask: Send + Sync + fmt::Debug {
    /// Identifier unique within the session
    fn id(&self) -> u64;

    /// Request the task was created for
    fn request(&self) -> &DownloadRequest;

    /// Start or continue the transfer
    fn resume(&self);

    /// Pause the transfer, keeping what was received
    fn suspend(&self);

    /// Stop the transfer for good
    fn cancel(&self);
}

/// Transport producing transfer tasks
#[async_trait]
pub trait NetworkSession: Send + Sync {
    /// Create a task in the suspended state
    fn download_task(&self, request: &DownloadRequest) -> Arc<dyn TransferTask>;

    /// Tasks still alive in the transport
    async fn running_tasks(&self) -> Vec<Arc<dyn TransferTask>>;
}
