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


//! Composite response for a batch of downloads
//!
//! [`DownloadBatchResponse`] groups the responses of one batch. Its progress
//! is the sum of the children and it completes once, after every child has
//! reached a terminal state. The result is `Ok` only if every child
//! succeeded, otherwise the first error in request order.

use crate::download::progress::Progress;
use crate::download::request::DownloadRequest;
use crate::download::response::{CompletionCallback, CompletionCell, DownloadResponse, Response};
use crate::error::SharedResult;
use std::fmt;
use std::sync::{Arc, Weak};

struct BatchInner {
    batch_id: i64,
    responses: Vec<DownloadResponse>,
    progress: Progress,
    completion: CompletionCell,
}

impl BatchInner {
    fn check_completion(&self) {
        let mut first_error = None;
        for response in &self.responses {
            match response.result() {
                None => return,
                Some(Err(error)) if first_error.is_none() => first_error = Some(error),
                Some(_) => {}
            }
        }

        let result = match first_error {
            Some(error) => {
                tracing::error!(batch_id = self.batch_id, error = %error, "download batch failed");
                Err(error)
            }
            None => {
                tracing::info!(batch_id = self.batch_id, files = self.responses.len(), "download batch completed");
                Ok(())
            }
        };
        self.completion.set_with(result, || {});
    }
}

/// Response covering every download of a batch
///
/// Cheap to clone; clones observe the same batch.
#[derive(Clone)]
pub struct DownloadBatchResponse {
    inner: Arc<BatchInner>,
}

impl fmt::Debug for DownloadBatchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadBatchResponse")
            .field("batch_id", &self.inner.batch_id)
            .field("responses", &self.inner.responses.len())
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl PartialEq for DownloadBatchResponse {
    fn eq(&self, other: &Self) -> bool {
        self.inner.batch_id == other.inner.batch_id
    }
}

impl Eq for DownloadBatchResponse {}

impl DownloadBatchResponse {
    pub fn new(batch_id: i64, responses: Vec<DownloadResponse>) -> Self {
        let progress = Progress::default();
        for response in &responses {
            progress.add_child(&response.progress());
        }

        let batch = Self {
            inner: Arc::new(BatchInner {
                batch_id,
                responses,
                progress,
                completion: CompletionCell::new(),
            }),
        };

        for response in &batch.inner.responses {
            let weak: Weak<BatchInner> = Arc::downgrade(&batch.inner);
            response.on_completion(Box::new(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.check_completion();
                }
            }));
        }

        // Covers empty batches and batches restored with every file done
        batch.inner.check_completion();
        batch
    }

    pub fn batch_id(&self) -> i64 {
        self.inner.batch_id
    }

    pub fn responses(&self) -> &[DownloadResponse] {
        &self.inner.responses
    }

    pub fn requests(&self) -> Vec<DownloadRequest> {
        self.inner.responses.iter().map(DownloadResponse::request).collect()
    }

    pub fn response_for(&self, request: &DownloadRequest) -> Option<&DownloadResponse> {
        self.inner
            .responses
            .iter()
            .find(|response| response.request() == *request)
    }

    pub fn is_completed(&self) -> bool {
        !self.inner.completion.is_pending()
    }

    /// Wait until every child is terminal
    pub async fn completion(&self) -> SharedResult<()> {
        self.inner.completion.wait().await
    }
}

impl Response for DownloadBatchResponse {
    fn resume(&self) {
        for response in &self.inner.responses {
            response.resume();
        }
    }

    fn suspend(&self) {
        for response in &self.inner.responses {
            response.suspend();
        }
    }

    fn cancel(&self) {
        tracing::info!(batch_id = self.inner.batch_id, "cancelling download batch");
        for response in &self.inner.responses {
            response.cancel();
        }
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
