mod api;
mod config;
mod downloader;
mod errors;
mod events;
mod paths;
mod queue;
mod tagger;
mod track;
mod utils;

#[cfg(test)]
mod pipeline_test;
#[cfg(test)]
mod testutil;

use api::catalog::HttpCatalog;
use api::spotify::HttpSpotifyBridge;
use clap::Parser;
use config::{parse_bitrate, Settings};
use downloader::artwork::ArtworkCache;
use downloader::{JobContext, TrackError};
use errors::{AppError, Result};
use events::{EventSink, LogSink, QueueEvent};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use queue::manager::QueueManager;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "wavedl", version, about = "Queue-based music downloader")]
struct Cli {
    /// Links to download. Several can be joined with ';' or passed as
    /// separate arguments.
    links: Vec<String>,

    /// Preferred bitrate: flac, 320, 128, 360, 360_mq or 360_lq
    #[arg(short, long)]
    bitrate: Option<String>,

    /// Read additional links from a file, one per line
    #[arg(long, value_name = "FILE")]
    link_file: Option<PathBuf>,

    /// Do not restore an interrupted queue from the previous run
    #[arg(long)]
    no_restore: bool,

    /// Plain log output instead of progress bars
    #[arg(long)]
    no_progress: bool,
}

/// Terminal sink: progress bars per running item, log lines for the rest.
struct CliSink {
    bars: MultiProgress,
    active: Mutex<HashMap<String, ProgressBar>>,
}

impl CliSink {
    fn new() -> CliSink {
        CliSink {
            bars: MultiProgress::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:40!} [{bar:30.cyan/blue}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

impl EventSink for CliSink {
    fn send(&self, event: QueueEvent) {
        match event {
            QueueEvent::AddedToQueue {
                title,
                artist,
                size,
                ..
            } => {
                log::info!("Queued: {} - {} ({} tracks)", artist, title, size);
            }
            QueueEvent::AlreadyInQueue { title, .. } => {
                log::warn!("Already in queue: {}", title);
            }
            QueueEvent::ResolutionFailed { link, message, .. } => {
                log::error!("{}: {}", link, message);
            }
            QueueEvent::LoginNeeded => {
                log::error!("No session token configured, cannot download. Edit the config file first.");
            }
            QueueEvent::StartDownload { uuid } => {
                let bar = self.bars.add(ProgressBar::new(100));
                bar.set_style(Self::bar_style());
                bar.set_message(uuid.clone());
                if let Ok(mut active) = self.active.lock() {
                    active.insert(uuid, bar);
                }
            }
            QueueEvent::Progress { uuid, progress } => {
                if let Ok(active) = self.active.lock() {
                    if let Some(bar) = active.get(&uuid) {
                        bar.set_position(progress as u64);
                    }
                }
            }
            QueueEvent::TrackDownloaded { path, .. } => {
                log::info!("Done: {}", path);
            }
            QueueEvent::TrackFailed {
                error: TrackError { artist, title, message, .. },
                ..
            } => {
                log::error!("Failed: {} - {} | {}", artist, title, message);
            }
            QueueEvent::FinishDownload { uuid } => {
                if let Ok(mut active) = self.active.lock() {
                    if let Some(bar) = active.remove(&uuid) {
                        bar.finish_and_clear();
                    }
                }
                log::info!("Finished: {}", uuid);
            }
            QueueEvent::CancellingCurrentItem { uuid } => {
                log::info!("Cancelling: {}", uuid);
            }
            QueueEvent::RemovedFromQueue { uuid } => log::info!("Removed: {}", uuid),
            QueueEvent::RemovedAllDownloads => log::info!("Queue cleared"),
            QueueEvent::RemovedFinishedDownloads => log::info!("Finished downloads cleared"),
            QueueEvent::RestoringQueue => log::info!("Restoring interrupted queue"),
            QueueEvent::QueueRestored { pending, completed } => {
                log::info!(
                    "Queue restored: {} pending, {} already done",
                    pending.len(),
                    completed.len()
                );
            }
            QueueEvent::StartAddingArtist { name, .. } => {
                log::info!("Expanding artist: {}", name);
            }
            QueueEvent::FinishAddingArtist { name, .. } => {
                log::info!("Finished expanding artist: {}", name);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let settings = Arc::new(Settings::load()?);

    let bitrate = match &cli.bitrate {
        Some(value) => parse_bitrate(value)
            .ok_or_else(|| AppError::Config(format!("Unknown bitrate '{}'", value)))?,
        None => settings.max_bitrate,
    };

    let catalog = Arc::new(HttpCatalog::new(
        settings.session.clone(),
        settings.proxy.as_deref(),
    )?);
    match catalog.login().await {
        Ok(true) => log::debug!("session token accepted"),
        Ok(false) => log::warn!("no valid session token, downloads will be refused"),
        Err(e) => log::warn!("could not verify session: {}", e),
    }
    let bridge = Arc::new(HttpSpotifyBridge::new(
        settings.session.spotify_client_id.clone(),
        settings.session.spotify_client_secret.clone(),
    )?);
    let stream_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(600))
        .connect_timeout(Duration::from_secs(30))
        .user_agent(api::catalog::USER_AGENT)
        .build()?;
    let artwork = Arc::new(ArtworkCache::new(stream_client.clone()));
    let events: Arc<dyn EventSink> = if cli.no_progress {
        Arc::new(LogSink)
    } else {
        Arc::new(CliSink::new())
    };

    let ctx = Arc::new(JobContext {
        catalog,
        bridge,
        events,
        client: stream_client,
        artwork,
    });
    let manager = QueueManager::new(ctx, Settings::config_dir()?.join("queue.json"));

    if !cli.no_restore {
        if let Err(e) = manager.load().await {
            log::warn!("could not restore saved queue: {}", e);
        }
    }

    let mut links = cli.links.clone();
    if let Some(file) = &cli.link_file {
        let body = std::fs::read_to_string(file)?;
        links.extend(
            body.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }

    if !links.is_empty() {
        manager.enqueue(&links.join(";"), bitrate, settings.clone()).await;
    }

    if manager.pending().await.is_empty() {
        log::info!("Nothing to download. Pass a link or see --help.");
        return Ok(());
    }

    manager.run().await;
    manager.save().await?;
    Ok(())
}
