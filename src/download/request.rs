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


//! Download requests and persisted download records
//!
//! A [`DownloadRequest`] says what to fetch and where to put it. A
//! [`Download`] is the same request plus the bookkeeping the manager persists
//! so it can pick transfers back up after a restart.

use crate::error::{QuranError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Directory (next to the destination) holding partial transfers
pub const RESUME_DIRECTORY: &str = ".resume";

/// Extension of partial transfer files
pub const RESUME_EXTENSION: &str = "resume";

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// Immutable description of one file transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HashMap<String, String>,
    pub destination_path: PathBuf,
    pub resume_path: PathBuf,
}

impl DownloadRequest {
    /// GET request whose resume file is derived from the URL
    pub fn new<P: Into<PathBuf>>(url: Url, destination_path: P) -> Self {
        let destination_path = destination_path.into();
        let resume_path = resume_path_for(&url, &destination_path);
        Self {
            method: HttpMethod::Get,
            url,
            headers: HashMap::new(),
            destination_path,
            resume_path,
        }
    }

    /// Parse the URL string, then build like [`DownloadRequest::new`]
    pub fn parse<P: Into<PathBuf>>(url: &str, destination_path: P) -> Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "http" | "https" => Ok(Self::new(url, destination_path)),
            scheme => Err(QuranError::invalid_input(format!(
                "Unsupported URL scheme '{}'",
                scheme
            ))),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Whether the destination file already exists
    pub fn is_satisfied(&self) -> bool {
        self.destination_path.is_file()
    }
}

impl fmt::Display for DownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.method.as_str(), self.url, self.destination_path.display())
    }
}

/// Resume file location for a remote URL
///
/// `<destination dir>/.resume/<sha256(url)>.resume`. The same URL always
/// maps to the same file so a partial transfer survives restarts.
pub fn resume_path_for(url: &Url, destination_path: &Path) -> PathBuf {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let directory = destination_path.parent().unwrap_or_else(|| Path::new(""));
    directory
        .join(RESUME_DIRECTORY)
        .join(format!("{}.{}", hex::encode(digest), RESUME_EXTENSION))
}

/// Ordered set of requests completed as one unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadBatchRequest {
    pub requests: Vec<DownloadRequest>,
}

impl DownloadBatchRequest {
    pub fn new(requests: Vec<DownloadRequest>) -> Self {
        Self { requests }
    }

    /// Drop requests whose destination already exists
    pub fn filter_missing(self) -> Self {
        let requests = self
            .requests
            .into_iter()
            .filter(|request| !request.is_satisfied())
            .collect();
        Self { requests }
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }
}

/// Lifecycle of a persisted download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadStatus {
    /// Waiting for a free transfer slot
    Pending,
    /// A transport task is attached
    Downloading,
    /// File is at its destination
    Completed,
}

impl DownloadStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            DownloadStatus::Pending => 0,
            DownloadStatus::Downloading => 1,
            DownloadStatus::Completed => 2,
        }
    }

    /// Unknown values load as `Downloading` so the task is re-checked on start
    pub fn from_i64(value: i64) -> Self {
        match value {
            0 => DownloadStatus::Pending,
            2 => DownloadStatus::Completed,
            _ => DownloadStatus::Downloading,
        }
    }
}

/// Persisted state of one request inside a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    /// Transport task id while a task is attached
    pub task_id: Option<u64>,
    pub request: DownloadRequest,
    pub status: DownloadStatus,
    pub batch_id: i64,
}

impl Download {
    pub fn new(request: DownloadRequest, batch_id: i64) -> Self {
        Self {
            task_id: None,
            request,
            status: DownloadStatus::Pending,
            batch_id,
        }
    }
}

/// Persisted batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadBatch {
    pub id: i64,
    pub downloads: Vec<Download>,
}
