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


//! Persistence of ongoing download batches
//!
//! # Database Schema
//! - `batch`: one row per submitted batch
//! - `download`: one row per request, cascading on batch delete
//!
//! Paths are stored as given. Request headers are not stored, restored
//! requests are plain GETs. Downloads are matched on update by
//! `(batch_id, url)`.

use crate::download::request::{Download, DownloadBatch, DownloadBatchRequest, DownloadRequest, DownloadStatus, HttpMethod};
use crate::error::{QuranError, Result};
use crate::storage::migrations::{self, Migration};
use crate::storage::persistence::{run, run_in_transaction};
use crate::storage::pool::{ConnectionsPool, DatabaseConnection};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "create_batches_and_downloads",
    sql: r#"
CREATE TABLE IF NOT EXISTS batch (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS download (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER,
    url TEXT NOT NULL,
    resume_path TEXT NOT NULL,
    destination_path TEXT NOT NULL,
    status INTEGER NOT NULL,
    batch_id INTEGER NOT NULL REFERENCES batch(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_download_batch ON download(batch_id);
CREATE INDEX IF NOT EXISTS idx_download_url ON download(url);
"#,
}];

/// Storage of batches that have not finished yet
#[async_trait]
pub trait DownloadsPersistence: Send + Sync {
    /// Every stored batch with its downloads, ordered by batch id
    async fn retrieve_all(&self) -> Result<Vec<DownloadBatch>>;

    /// Store a new batch, all downloads pending
    async fn insert(&self, batch: &DownloadBatchRequest) -> Result<DownloadBatch>;

    /// Save task ids and statuses
    async fn update(&self, downloads: &[Download]) -> Result<()>;

    async fn delete(&self, batch_ids: &[i64]) -> Result<()>;
}

/// SQLite-backed [`DownloadsPersistence`] using a pooled connection
pub struct SqliteDownloadsPersistence {
    pool: Arc<ConnectionsPool>,
    connection: DatabaseConnection,
    retry_attempts: u32,
}

impl SqliteDownloadsPersistence {
    /// Open (and create or upgrade) the batches database
    pub async fn open<P: AsRef<Path>>(pool: Arc<ConnectionsPool>, path: P) -> Result<Self> {
        let connection = pool.get_connection(path).await?;
        if let Err(e) = migrations::migrate(&connection, MIGRATIONS).await {
            pool.close(&connection).await;
            return Err(e);
        }
        let retry_attempts = pool.config().busy_retry_attempts;
        Ok(Self {
            pool,
            connection,
            retry_attempts,
        })
    }

    /// Release the pooled connection
    pub async fn close(self) {
        self.pool.close(&self.connection).await;
    }

    pub fn path(&self) -> &Path {
        self.connection.path()
    }
}

fn row_to_download(row: &SqliteRow) -> Result<Download> {
    let url: String = row.try_get("url")?;
    let url = Url::parse(&url)?;
    let task_id: Option<i64> = row.try_get("task_id")?;
    let resume_path: String = row.try_get("resume_path")?;
    let destination_path: String = row.try_get("destination_path")?;

    let request = DownloadRequest {
        method: HttpMethod::Get,
        url,
        headers: Default::default(),
        destination_path: PathBuf::from(destination_path),
        resume_path: PathBuf::from(resume_path),
    };

    Ok(Download {
        task_id: task_id.map(|id| id as u64),
        request,
        status: DownloadStatus::from_i64(row.try_get("status")?),
        batch_id: row.try_get("batch_id")?,
    })
}

fn path_text(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| QuranError::invalid_input(format!("Path is not UTF-8: {}", path.display())))
}

#[async_trait]
impl DownloadsPersistence for SqliteDownloadsPersistence {
    async fn retrieve_all(&self) -> Result<Vec<DownloadBatch>> {
        let rows = run(&self.connection, self.retry_attempts, |pool| async move {
            sqlx::query(
                "SELECT task_id, url, resume_path, destination_path, status, batch_id \
                 FROM download ORDER BY batch_id, id",
            )
            .fetch_all(&pool)
            .await
        })
        .await?;

        let mut batches: BTreeMap<i64, Vec<Download>> = BTreeMap::new();
        for row in &rows {
            let download = row_to_download(row)?;
            batches.entry(download.batch_id).or_default().push(download);
        }

        Ok(batches
            .into_iter()
            .map(|(id, downloads)| DownloadBatch { id, downloads })
            .collect())
    }

    async fn insert(&self, batch: &DownloadBatchRequest) -> Result<DownloadBatch> {
        let mut rows = Vec::with_capacity(batch.len());
        for request in &batch.requests {
            rows.push((
                request.url.to_string(),
                path_text(&request.resume_path)?,
                path_text(&request.destination_path)?,
            ));
        }

        let batch_id = run_in_transaction(&self.connection, self.retry_attempts, |mut tx| {
            let rows = rows.clone();
            async move {
                let batch_id = sqlx::query("INSERT INTO batch DEFAULT VALUES")
                    .execute(&mut *tx)
                    .await?
                    .last_insert_rowid();

                for (url, resume_path, destination_path) in rows {
                    sqlx::query(
                        "INSERT INTO download (task_id, url, resume_path, destination_path, status, batch_id) \
                         VALUES (NULL, ?, ?, ?, ?, ?)",
                    )
                    .bind(url)
                    .bind(resume_path)
                    .bind(destination_path)
                    .bind(DownloadStatus::Pending.as_i64())
                    .bind(batch_id)
                    .execute(&mut *tx)
                    .await?;
                }
                Ok((batch_id, tx))
            }
        })
        .await?;

        tracing::debug!(batch_id, downloads = batch.len(), "stored download batch");

        Ok(DownloadBatch {
            id: batch_id,
            downloads: batch
                .requests
                .iter()
                .cloned()
                .map(|request| Download::new(request, batch_id))
                .collect(),
        })
    }

    async fn update(&self, downloads: &[Download]) -> Result<()> {
        if downloads.is_empty() {
            return Ok(());
        }
        let rows: Vec<(Option<i64>, i64, String, i64)> = downloads
            .iter()
            .map(|d| {
                (
                    d.task_id.map(|id| id as i64),
                    d.status.as_i64(),
                    d.request.url.to_string(),
                    d.batch_id,
                )
            })
            .collect();

        run_in_transaction(&self.connection, self.retry_attempts, |mut tx| {
            let rows = rows.clone();
            async move {
                for (task_id, status, url, batch_id) in rows {
                    sqlx::query("UPDATE download SET task_id = ?, status = ? WHERE batch_id = ? AND url = ?")
                        .bind(task_id)
                        .bind(status)
                        .bind(batch_id)
                        .bind(url)
                        .execute(&mut *tx)
                        .await?;
                }
                Ok(((), tx))
            }
        })
        .await
    }

    async fn delete(&self, batch_ids: &[i64]) -> Result<()> {
        if batch_ids.is_empty() {
            return Ok(());
        }
        let ids = batch_ids.to_vec();
        run_in_transaction(&self.connection, self.retry_attempts, |mut tx| {
            let ids = ids.clone();
            async move {
                for id in ids {
                    sqlx::query("DELETE FROM download WHERE batch_id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query("DELETE FROM batch WHERE id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
                Ok(((), tx))
            }
        })
        .await?;

        tracing::debug!(?batch_ids, "deleted download batches");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use tempfile::TempDir;

    fn batch_request(dir: &Path, names: &[&str]) -> DownloadBatchRequest {
        DownloadBatchRequest::new(
            names
                .iter()
                .map(|name| {
                    DownloadRequest::parse(&format!("https://files.quran.app/{}", name), dir.join(name))
                        .unwrap()
                })
                .collect(),
        )
    }

    async fn open(dir: &TempDir) -> SqliteDownloadsPersistence {
        let pool = ConnectionsPool::shared(DatabaseConfig::default());
        SqliteDownloadsPersistence::open(pool, dir.path().join("ongoing-downloads.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let persistence = open(&dir).await;

        let first = persistence
            .insert(&batch_request(dir.path(), &["a.mp3", "b.mp3"]))
            .await
            .unwrap();
        let second = persistence
            .insert(&batch_request(dir.path(), &["c.mp3"]))
            .await
            .unwrap();
        assert!(second.id > first.id);

        let all = persistence.retrieve_all().await.unwrap();
        assert_eq!(all, vec![first.clone(), second]);
        assert!(all[0]
            .downloads
            .iter()
            .all(|d| d.status == DownloadStatus::Pending && d.task_id.is_none()));
        assert_eq!(all[0].downloads[0].request.resume_path, first.downloads[0].request.resume_path);

        persistence.close().await;
    }

    #[tokio::test]
    async fn test_update_task_and_status() {
        let dir = TempDir::new().unwrap();
        let persistence = open(&dir).await;

        let mut batch = persistence
            .insert(&batch_request(dir.path(), &["a.mp3", "b.mp3"]))
            .await
            .unwrap();
        batch.downloads[0].task_id = Some(12);
        batch.downloads[0].status = DownloadStatus::Downloading;
        batch.downloads[1].status = DownloadStatus::Completed;
        persistence.update(&batch.downloads).await.unwrap();

        let all = persistence.retrieve_all().await.unwrap();
        assert_eq!(all[0].downloads, batch.downloads);

        persistence.close().await;
    }

    #[tokio::test]
    async fn test_delete_removes_batch_and_downloads() {
        let dir = TempDir::new().unwrap();
        let persistence = open(&dir).await;

        let a = persistence.insert(&batch_request(dir.path(), &["a.mp3"])).await.unwrap();
        let b = persistence.insert(&batch_request(dir.path(), &["b.mp3"])).await.unwrap();
        persistence.delete(&[a.id]).await.unwrap();

        let all = persistence.retrieve_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, b.id);

        persistence.close().await;
    }

    #[tokio::test]
    async fn test_batches_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let stored = {
            let persistence = open(&dir).await;
            let batch = persistence.insert(&batch_request(dir.path(), &["a.mp3"])).await.unwrap();
            persistence.close().await;
            batch
        };

        let persistence = open(&dir).await;
        assert_eq!(persistence.retrieve_all().await.unwrap(), vec![stored]);
        persistence.close().await;
    }
}
