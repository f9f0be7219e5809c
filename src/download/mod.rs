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


//! Batched, resumable downloads
//!
//! A [`DownloadManager`] accepts [`DownloadBatchRequest`]s, persists them,
//! and runs at most `max_simultaneous_downloads` transfers at a time through
//! a [`NetworkSession`]. Each batch is observed through a
//! [`DownloadBatchResponse`] that aggregates the progress and result of its
//! per-file [`DownloadResponse`]s.
//!
//! - `request` - requests, persisted records and statuses
//! - `progress` - hierarchical progress reporting
//! - `session` - transport abstraction and session events
//! - `http` - reqwest session with Range-based resume
//! - `response` / `batch` - per-file and per-batch observers
//! - `manager` - scheduling, persistence and event handling
//! - `audio` - recitation file lists for reciters

pub mod audio;
pub mod batch;
pub mod http;
pub mod manager;
pub mod progress;
pub mod request;
pub mod response;
pub mod session;

// Re-export commonly used types
pub use audio::{AudioFile, AudioType, AyahNumber, AyahsAudioDownloadRequest, Qari};
pub use batch::DownloadBatchResponse;
pub use http::HttpSession;
pub use manager::DownloadManager;
pub use progress::{Progress, ProgressSnapshot};
pub use request::{
    Download, DownloadBatch, DownloadBatchRequest, DownloadRequest, DownloadStatus, HttpMethod,
};
pub use response::{DownloadResponse, Response};
pub use session::{NetworkSession, SessionEvent, TransferTask};
