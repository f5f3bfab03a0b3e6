use crate::downloader::TrackError;

/// Everything the pipeline reports to the outside world. One narrow
/// interface so the transport (log, progress bar, socket) stays pluggable.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    AddedToQueue {
        uuid: String,
        title: String,
        artist: String,
        size: usize,
    },
    AlreadyInQueue {
        uuid: String,
        title: String,
    },
    ResolutionFailed {
        link: String,
        message: String,
        code: Option<String>,
    },
    LoginNeeded,
    StartDownload {
        uuid: String,
    },
    Progress {
        uuid: String,
        progress: u32,
    },
    TrackDownloaded {
        uuid: String,
        path: String,
    },
    TrackFailed {
        uuid: String,
        error: TrackError,
    },
    FinishDownload {
        uuid: String,
    },
    CancellingCurrentItem {
        uuid: String,
    },
    RemovedFromQueue {
        uuid: String,
    },
    RemovedAllDownloads,
    RemovedFinishedDownloads,
    RestoringQueue,
    QueueRestored {
        pending: Vec<String>,
        completed: Vec<String>,
    },
    StartAddingArtist {
        id: String,
        name: String,
    },
    FinishAddingArtist {
        id: String,
        name: String,
    },
}

pub trait EventSink: Send + Sync {
    fn send(&self, event: QueueEvent);
}

/// Default sink: everything goes to the log.
pub struct LogSink;

impl EventSink for LogSink {
    fn send(&self, event: QueueEvent) {
        match event {
            QueueEvent::AddedToQueue { uuid, title, artist, size } => {
                log::info!("[{}] Added to queue: {} - {} ({} tracks)", uuid, artist, title, size)
            }
            QueueEvent::AlreadyInQueue { uuid, .. } => {
                log::warn!("[{}] Already in queue, will not be added again", uuid)
            }
            QueueEvent::ResolutionFailed { link, message, .. } => {
                log::error!("[{}] {}", link, message)
            }
            QueueEvent::LoginNeeded => log::error!("Not logged in, cannot download"),
            QueueEvent::StartDownload { uuid } => log::info!("[{}] Started downloading", uuid),
            QueueEvent::Progress { uuid, progress } => {
                log::debug!("[{}] Progress {}%", uuid, progress)
            }
            QueueEvent::TrackDownloaded { uuid, path } => {
                log::info!("[{}] Track download completed: {}", uuid, path)
            }
            QueueEvent::TrackFailed { uuid, error } => {
                log::error!("[{}] {} - {} | {}", uuid, error.artist, error.title, error.message)
            }
            QueueEvent::FinishDownload { uuid } => log::info!("[{}] Finished downloading", uuid),
            QueueEvent::CancellingCurrentItem { uuid } => {
                log::info!("[{}] Cancelling current item", uuid)
            }
            QueueEvent::RemovedFromQueue { uuid } => log::info!("[{}] Removed from queue", uuid),
            QueueEvent::RemovedAllDownloads => log::info!("Removed all downloads"),
            QueueEvent::RemovedFinishedDownloads => log::info!("Removed finished downloads"),
            QueueEvent::RestoringQueue => log::info!("Restoring saved queue"),
            QueueEvent::QueueRestored { pending, completed } => {
                log::info!("Queue restored: {} pending, {} completed", pending.len(), completed.len())
            }
            QueueEvent::StartAddingArtist { name, .. } => {
                log::info!("Expanding artist: {}", name)
            }
            QueueEvent::FinishAddingArtist { name, .. } => {
                log::info!("Finished expanding artist: {}", name)
            }
        }
    }
}
