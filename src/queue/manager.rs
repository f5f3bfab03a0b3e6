use super::item::{QueueItem, QueueItemSnapshot};
use super::resolver::Resolver;
use crate::config::Settings;
use crate::downloader::{DownloadJob, JobContext};
use crate::errors::Result;
use crate::events::QueueEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The queue proper. Pending and completed hold uuids in order; the single
/// active slot is an empty string while idle; the registry maps every live
/// uuid to its item. An item is always in exactly one of the three places.
#[derive(Default)]
struct QueueState {
    queue: Vec<String>,
    active: String,
    completed: Vec<String>,
    items: HashMap<String, Arc<QueueItem>>,
}

/// On-disk form of the queue, written after every mutation and read back
/// once at startup.
#[derive(Default, Serialize, Deserialize)]
struct SavedQueue {
    queue: Vec<String>,
    #[serde(rename = "queueComplete", default)]
    complete: Vec<String>,
    #[serde(rename = "currentItem", default)]
    current: String,
    #[serde(rename = "queueList", default)]
    items: HashMap<String, QueueItemSnapshot>,
}

/// Serial download queue: items run one at a time in arrival order, while
/// tracks inside a collection item run concurrently.
pub struct QueueManager {
    ctx: Arc<JobContext>,
    state: Mutex<QueueState>,
    save_path: PathBuf,
}

impl QueueManager {
    pub fn new(ctx: Arc<JobContext>, save_path: PathBuf) -> QueueManager {
        QueueManager {
            ctx,
            state: Mutex::new(QueueState::default()),
            save_path,
        }
    }

    /// Resolves a semicolon-separated batch of links and enqueues the
    /// results. One bad link never stops the rest. Returns the uuids added.
    pub async fn enqueue(&self, links: &str, bitrate: u32, settings: Arc<Settings>) -> Vec<String> {
        if !self.ctx.catalog.logged_in() {
            self.ctx.events.send(QueueEvent::LoginNeeded);
            return Vec::new();
        }

        let resolver = Resolver {
            catalog: self.ctx.catalog.as_ref(),
            bridge: self.ctx.bridge.as_ref(),
            events: self.ctx.events.as_ref(),
        };

        let mut added = Vec::new();
        for link in links.split(';').map(str::trim).filter(|l| !l.is_empty()) {
            match resolver.resolve(link, bitrate, settings.clone()).await {
                Ok(items) => {
                    for item in items {
                        let item = Arc::new(item);
                        let mut state = self.state.lock().await;
                        if state.items.contains_key(&item.uuid) {
                            self.ctx.events.send(QueueEvent::AlreadyInQueue {
                                uuid: item.uuid.clone(),
                                title: item.title.clone(),
                            });
                            continue;
                        }
                        self.ctx.events.send(QueueEvent::AddedToQueue {
                            uuid: item.uuid.clone(),
                            title: item.title.clone(),
                            artist: item.artist.clone(),
                            size: item.size,
                        });
                        state.queue.push(item.uuid.clone());
                        added.push(item.uuid.clone());
                        state.items.insert(item.uuid.clone(), item);
                    }
                }
                Err(e) => {
                    self.ctx.events.send(QueueEvent::ResolutionFailed {
                        link: link.to_string(),
                        message: e.to_string(),
                        code: Some(e.code().to_string()),
                    });
                }
            }
        }
        if let Err(e) = self.save().await {
            log::warn!("could not persist queue: {}", e);
        }
        added
    }

    /// Drains the queue serially until it is empty.
    pub async fn run(&self) {
        loop {
            let item = {
                let mut state = self.state.lock().await;
                if !state.active.is_empty() || state.queue.is_empty() {
                    None
                } else {
                    let uuid = state.queue.remove(0);
                    state.active = uuid.clone();
                    state.items.get(&uuid).cloned()
                }
            };
            let Some(item) = item else { break };

            self.ctx.events.send(QueueEvent::StartDownload {
                uuid: item.uuid.clone(),
            });
            let job = DownloadJob::new(self.ctx.clone(), item.clone());
            job.run().await;
            self.ctx.events.send(QueueEvent::FinishDownload {
                uuid: item.uuid.clone(),
            });

            {
                let mut state = self.state.lock().await;
                let uuid = std::mem::take(&mut state.active);
                if item.is_cancelled() {
                    state.items.remove(&uuid);
                } else {
                    state.completed.push(uuid);
                }
            }
            if let Err(e) = self.save().await {
                log::warn!("could not persist queue: {}", e);
            }
        }
    }

    /// Removes one item wherever it lives. The active item is only flagged;
    /// the running job notices and stops, and the drain loop drops it.
    pub async fn remove(&self, uuid: &str) {
        let mut state = self.state.lock().await;
        if state.active == uuid {
            if let Some(item) = state.items.get(uuid) {
                item.cancel();
            }
            self.ctx.events.send(QueueEvent::CancellingCurrentItem {
                uuid: uuid.to_string(),
            });
            return;
        }
        if let Some(pos) = state.queue.iter().position(|u| u == uuid) {
            state.queue.remove(pos);
        } else if let Some(pos) = state.completed.iter().position(|u| u == uuid) {
            state.completed.remove(pos);
        } else {
            return;
        }
        state.items.remove(uuid);
        drop(state);
        self.ctx.events.send(QueueEvent::RemovedFromQueue {
            uuid: uuid.to_string(),
        });
        if let Err(e) = self.save().await {
            log::warn!("could not persist queue: {}", e);
        }
    }

    /// Empties the pending and completed lists and cancels whatever is
    /// running.
    pub async fn cancel_all(&self) {
        {
            let mut state = self.state.lock().await;
            let mut dropped: Vec<String> = state.queue.drain(..).collect();
            dropped.extend(state.completed.drain(..));
            for uuid in dropped {
                state.items.remove(&uuid);
            }
            if !state.active.is_empty() {
                if let Some(item) = state.items.get(&state.active) {
                    item.cancel();
                }
                self.ctx.events.send(QueueEvent::CancellingCurrentItem {
                    uuid: state.active.clone(),
                });
            }
        }
        self.ctx.events.send(QueueEvent::RemovedAllDownloads);
        if let Err(e) = self.save().await {
            log::warn!("could not persist queue: {}", e);
        }
    }

    pub async fn clear_completed(&self) {
        {
            let mut state = self.state.lock().await;
            let done: Vec<String> = state.completed.drain(..).collect();
            for uuid in done {
                state.items.remove(&uuid);
            }
        }
        self.ctx.events.send(QueueEvent::RemovedFinishedDownloads);
        if let Err(e) = self.save().await {
            log::warn!("could not persist queue: {}", e);
        }
    }

    pub async fn pending(&self) -> Vec<String> {
        self.state.lock().await.queue.clone()
    }

    pub async fn completed(&self) -> Vec<String> {
        self.state.lock().await.completed.clone()
    }

    pub async fn item(&self, uuid: &str) -> Option<Arc<QueueItem>> {
        self.state.lock().await.items.get(uuid).cloned()
    }

    pub async fn save(&self) -> Result<()> {
        let saved = {
            let state = self.state.lock().await;
            let mut items = HashMap::new();
            for (uuid, item) in &state.items {
                items.insert(uuid.clone(), item.snapshot());
            }
            SavedQueue {
                queue: state.queue.clone(),
                complete: state.completed.clone(),
                current: state.active.clone(),
                items,
            }
        };
        if let Some(dir) = self.save_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_string(&saved)?;
        tokio::fs::write(&self.save_path, body).await?;
        Ok(())
    }

    /// Restores a previously saved queue. The file is consumed so a crash
    /// during restore cannot replay it. The interrupted item goes back to
    /// the head of the queue with its progress reset; completed items keep
    /// their counters.
    pub async fn load(&self) -> Result<bool> {
        let body = match tokio::fs::read_to_string(&self.save_path).await {
            Ok(body) => body,
            Err(_) => return Ok(false),
        };
        tokio::fs::remove_file(&self.save_path).await?;
        let saved: SavedQueue = serde_json::from_str(&body)?;
        if saved.queue.is_empty() && saved.complete.is_empty() && saved.current.is_empty() {
            return Ok(false);
        }

        self.ctx.events.send(QueueEvent::RestoringQueue);
        let mut state = self.state.lock().await;
        let mut pending = Vec::new();
        if !saved.current.is_empty() {
            pending.push(saved.current.clone());
        }
        pending.extend(saved.queue.iter().cloned());

        for uuid in &pending {
            if let Some(snap) = saved.items.get(uuid) {
                if let Some(item) = QueueItem::from_snapshot(snap.clone(), true) {
                    state.queue.push(uuid.clone());
                    state.items.insert(uuid.clone(), Arc::new(item));
                }
            }
        }
        for uuid in &saved.complete {
            if let Some(snap) = saved.items.get(uuid) {
                if let Some(item) = QueueItem::from_snapshot(snap.clone(), false) {
                    state.completed.push(uuid.clone());
                    state.items.insert(uuid.clone(), Arc::new(item));
                }
            }
        }
        let restored_pending = state.queue.clone();
        let restored_completed = state.completed.clone();
        drop(state);
        self.ctx.events.send(QueueEvent::QueueRestored {
            pending: restored_pending,
            completed: restored_completed,
        });
        Ok(true)
    }
}
