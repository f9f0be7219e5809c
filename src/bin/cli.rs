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


use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use quran_core::download::{DownloadBatchRequest, DownloadManager, DownloadRequest, Response};
use quran_core::logging::init_logging;
use quran_core::storage::ConnectionsPool;
use quran_core::CoreConfig;
use std::path::PathBuf;
use url::Url;

#[derive(Parser)]
#[command(name = "quran-cli")]
#[command(about = "Quran Core CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// Configuration file (JSON); defaults are used when missing
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download files as one batch and wait for it
    Download {
        /// URLs to download
        #[arg(required = true)]
        urls: Vec<String>,
        /// Directory relative to the downloads root
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
    },
    /// List batches still in flight from earlier runs
    Pending,
    /// Cancel every batch in flight
    CancelAll,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CoreConfig::load_or_default(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CoreConfig::default(),
    };
    config.validate()?;
    init_logging(&config.log)?;

    let pool = ConnectionsPool::shared(config.database.clone());
    let manager = DownloadManager::from_config(&config, pool)
        .await
        .context("starting download manager")?;

    match cli.command {
        Commands::Download { urls, dir } => {
            let directory = config.downloads_directory.join(dir);
            let mut requests = Vec::with_capacity(urls.len());
            for url in &urls {
                let parsed = Url::parse(url).with_context(|| format!("invalid URL {}", url))?;
                let name = parsed
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .with_context(|| format!("URL has no file name: {}", url))?;
                requests.push(DownloadRequest::parse(url, directory.join(name))?);
            }

            let request = DownloadBatchRequest::new(requests).filter_missing();
            if request.is_empty() {
                println!("All files already downloaded to {}", directory.display());
                return Ok(());
            }

            println!("Downloading {} files to {}", request.len(), directory.display());
            let batch = manager.download(request).await?;
            batch.progress().on_change(|snapshot| {
                println!("  {:>5.1}%", snapshot.fraction_completed() * 100.0);
            });

            if let Err(e) = batch.completion().await {
                bail!("download failed: {}", e.user_message());
            }
            println!("✓ Batch {} finished", batch.batch_id());
        }
        Commands::Pending => {
            let batches = manager.ongoing_downloads().await;
            if batches.is_empty() {
                println!("No downloads in flight");
            }
            for batch in batches {
                println!(
                    "Batch {}: {} files, {:.1}%",
                    batch.batch_id(),
                    batch.responses().len(),
                    batch.progress().fraction_completed() * 100.0
                );
                for request in batch.requests() {
                    println!("  {}", request);
                }
            }
        }
        Commands::CancelAll => {
            let count = manager.ongoing_downloads().await.len();
            manager.cancel_all().await;
            println!("Cancelled {} batches", count);
        }
    }

    Ok(())
}
