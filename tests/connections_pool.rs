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


//! Connection pool tests shared between concurrent holders

use quran_core::config::DatabaseConfig;
use quran_core::storage::persistence::run;
use quran_core::storage::ConnectionsPool;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_concurrent_holders_share_one_connection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("quran.db");
    let pool = ConnectionsPool::shared(DatabaseConfig::default());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        let path = path.clone();
        handles.push(tokio::spawn(async move { pool.get_connection(&path).await.unwrap() }));
    }
    let mut connections = Vec::new();
    for handle in handles {
        connections.push(handle.await.unwrap());
    }

    assert_eq!(pool.open_connections().await, 1);
    assert_eq!(pool.use_count(&path).await, 8);

    let (last, rest) = connections.split_last().unwrap();
    for connection in rest {
        pool.close(connection).await;
    }
    assert_eq!(pool.use_count(&path).await, 1);
    assert!(!last.is_closed());

    pool.close(last).await;
    assert_eq!(pool.open_connections().await, 0);
    assert!(last.is_closed());
}

#[tokio::test]
async fn test_reopen_after_release_sees_data() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/dir/bookmarks.db");
    let pool = ConnectionsPool::shared(DatabaseConfig::default());

    let connection = pool.get_connection(&path).await.unwrap();
    run(&connection, 3, |db| async move {
        sqlx::query("CREATE TABLE page (number INTEGER PRIMARY KEY)")
            .execute(&db)
            .await?;
        sqlx::query("INSERT INTO page (number) VALUES (604)")
            .execute(&db)
            .await?;
        Ok::<_, sqlx::Error>(())
    })
    .await
    .unwrap();
    pool.close(&connection).await;

    let connection = pool.get_connection(&path).await.unwrap();
    let count: i64 = run(&connection, 3, |db| async move {
        sqlx::query_scalar("SELECT COUNT(*) FROM page").fetch_one(&db).await
    })
    .await
    .unwrap();
    assert_eq!(count, 1);
    pool.close(&connection).await;
}

#[tokio::test]
async fn test_distinct_files_get_distinct_connections() {
    let dir = TempDir::new().unwrap();
    let pool = ConnectionsPool::shared(DatabaseConfig::default());

    let a = pool.get_connection(dir.path().join("a.db")).await.unwrap();
    let b = pool.get_connection(dir.path().join("b.db")).await.unwrap();
    assert_eq!(pool.open_connections().await, 2);

    pool.close(&a).await;
    assert_eq!(pool.open_connections().await, 1);
    assert!(!b.is_closed());
    pool.close(&b).await;
}
