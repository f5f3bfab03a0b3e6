use crate::api::{AlbumInfo, GwTrack};
use crate::api::spotify::SpotifyPlaylist;
use crate::config::Settings;
use crate::downloader::TrackError;
use crate::track::PlaylistContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What a queue item actually downloads.
#[derive(Debug, Clone)]
pub enum QueueContent {
    Single(GwTrack),
    Collection(Vec<GwTrack>),
    /// A foreign playlist whose entries still need matching against the
    /// native catalog; conversion happens when the item starts.
    Convertible { source: SpotifyPlaylist },
}

/// One unit of work in the download queue. Immutable identity and a settings
/// snapshot taken at enqueue time; live counters are atomics so concurrent
/// track downloads can update them without the queue lock.
pub struct QueueItem {
    /// Deterministic composite id: `{kind}_{id}_{bitrate}`.
    pub uuid: String,
    pub kind: String,
    pub id: String,
    pub bitrate: u32,
    pub title: String,
    pub artist: String,
    pub cover: Option<String>,
    /// Number of tracks this item will attempt.
    pub size: usize,
    pub content: QueueContent,
    pub settings: Arc<Settings>,
    pub album_context: Option<AlbumInfo>,
    pub playlist_context: Option<PlaylistContext>,
    pub created_at: DateTime<Utc>,

    pub downloaded: AtomicUsize,
    pub failed: AtomicUsize,
    /// Whole percentage points, only ever moving in even steps.
    pub progress: AtomicU32,
    pub cancelled: AtomicBool,
    pub errors: Mutex<Vec<TrackError>>,
    /// (collection position, finished file) pairs, sorted at playlist
    /// generation time.
    pub files: Mutex<Vec<(usize, PathBuf)>>,
}

impl QueueItem {
    pub fn uuid_for(kind: &str, id: &str, bitrate: u32) -> String {
        format!("{}_{}_{}", kind, id, bitrate)
    }

    pub fn new(
        kind: &str,
        id: &str,
        bitrate: u32,
        title: String,
        artist: String,
        cover: Option<String>,
        content: QueueContent,
        settings: Arc<Settings>,
    ) -> QueueItem {
        let size = match &content {
            QueueContent::Single(_) => 1,
            QueueContent::Collection(tracks) => tracks.len(),
            QueueContent::Convertible { source } => source.track_refs.len(),
        };
        QueueItem {
            uuid: Self::uuid_for(kind, id, bitrate),
            kind: kind.to_string(),
            id: id.to_string(),
            bitrate,
            title,
            artist,
            cover,
            size,
            content,
            settings,
            album_context: None,
            playlist_context: None,
            created_at: Utc::now(),
            downloaded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            progress: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
        }
    }

    pub fn with_album(mut self, album: AlbumInfo) -> QueueItem {
        self.album_context = Some(album);
        self
    }

    pub fn with_playlist(mut self, playlist: PlaylistContext) -> QueueItem {
        self.playlist_context = Some(playlist);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Every track accounted for, successfully or not.
    pub fn is_finished(&self) -> bool {
        self.downloaded.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst) >= self.size
    }

    pub fn push_error(&self, error: TrackError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error);
        }
    }

    pub fn push_file(&self, position: usize, path: PathBuf) {
        self.downloaded.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut files) = self.files.lock() {
            files.push((position, path));
        }
    }

    pub fn snapshot(&self) -> QueueItemSnapshot {
        let content = match &self.content {
            QueueContent::Single(track) => ContentSnapshot {
                single: Some(track.clone()),
                collection: None,
                convertible: None,
            },
            QueueContent::Collection(tracks) => ContentSnapshot {
                single: None,
                collection: Some(tracks.clone()),
                convertible: None,
            },
            QueueContent::Convertible { source } => ContentSnapshot {
                single: None,
                collection: None,
                convertible: Some(source.clone()),
            },
        };
        QueueItemSnapshot {
            uuid: self.uuid.clone(),
            kind: self.kind.clone(),
            id: self.id.clone(),
            bitrate: self.bitrate,
            title: self.title.clone(),
            artist: self.artist.clone(),
            cover: self.cover.clone(),
            size: self.size,
            content,
            downloaded: self.downloaded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            progress: self.progress.load(Ordering::SeqCst),
            errors: self.errors.lock().map(|e| e.clone()).unwrap_or_default(),
            settings: (*self.settings).clone(),
            album_context: self.album_context.clone(),
            playlist_context: self.playlist_context.clone(),
            created_at: self.created_at,
        }
    }

    /// Rebuilds an item from a saved snapshot. With `reset`, the transient
    /// download state is discarded so the item restarts from scratch.
    pub fn from_snapshot(snap: QueueItemSnapshot, reset: bool) -> Option<QueueItem> {
        let content = match snap.content {
            ContentSnapshot { single: Some(track), .. } => QueueContent::Single(track),
            ContentSnapshot { collection: Some(tracks), .. } => QueueContent::Collection(tracks),
            ContentSnapshot { convertible: Some(source), .. } => {
                QueueContent::Convertible { source }
            }
            _ => return None,
        };
        let (downloaded, failed, progress, errors) = if reset {
            (0, 0, 0, Vec::new())
        } else {
            (snap.downloaded, snap.failed, snap.progress, snap.errors)
        };
        Some(QueueItem {
            uuid: snap.uuid,
            kind: snap.kind,
            id: snap.id,
            bitrate: snap.bitrate,
            title: snap.title,
            artist: snap.artist,
            cover: snap.cover,
            size: snap.size,
            content,
            settings: Arc::new(snap.settings),
            album_context: snap.album_context,
            playlist_context: snap.playlist_context,
            created_at: snap.created_at,
            downloaded: AtomicUsize::new(downloaded),
            failed: AtomicUsize::new(failed),
            progress: AtomicU32::new(progress),
            cancelled: AtomicBool::new(false),
            errors: Mutex::new(errors),
            files: Mutex::new(Vec::new()),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single: Option<GwTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<Vec<GwTrack>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convertible: Option<SpotifyPlaylist>,
}

/// Serializable form of a queue item, used for queue persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItemSnapshot {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub bitrate: u32,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub cover: Option<String>,
    pub size: usize,
    #[serde(flatten)]
    pub content: ContentSnapshot,
    #[serde(default)]
    pub downloaded: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub errors: Vec<TrackError>,
    pub settings: Settings,
    #[serde(default)]
    pub album_context: Option<AlbumInfo>,
    #[serde(default)]
    pub playlist_context: Option<PlaylistContext>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gw_track(id: &str) -> GwTrack {
        GwTrack {
            id: id.to_string(),
            title: "Song".to_string(),
            version: None,
            artist_id: "9".to_string(),
            artist: "Artist".to_string(),
            artist_pic: None,
            album_id: "2".to_string(),
            album_title: "Album".to_string(),
            album_pic: None,
            md5_origin: "aa".to_string(),
            media_version: "4".to_string(),
            fallback_id: "0".to_string(),
            duration: 100,
            track_number: Some(1),
            disc_number: Some(1),
            position: None,
            explicit: false,
            isrc: None,
            gain: None,
            release_date: None,
            lyrics_id: 0,
            copyright: None,
        }
    }

    #[test]
    fn uuid_is_deterministic_composite() {
        assert_eq!(QueueItem::uuid_for("album", "302127", 9), "album_302127_9");
    }

    #[test]
    fn counters_settle_into_finished() {
        let item = QueueItem::new(
            "album",
            "2",
            3,
            "Album".to_string(),
            "Artist".to_string(),
            None,
            QueueContent::Collection(vec![gw_track("1"), gw_track("2")]),
            Arc::new(Settings::default()),
        );
        assert_eq!(item.size, 2);
        assert!(!item.is_finished());
        item.push_file(1, PathBuf::from("/tmp/a.mp3"));
        item.push_error(TrackError {
            track_id: "2".to_string(),
            title: "Song".to_string(),
            artist: "Artist".to_string(),
            message: "failed".to_string(),
            code: "notAvailable".to_string(),
        });
        assert!(item.is_finished());
        assert_eq!(item.downloaded.load(Ordering::SeqCst), 1);
        assert_eq!(item.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn snapshot_round_trip_with_reset() {
        let item = QueueItem::new(
            "track",
            "1",
            3,
            "Song".to_string(),
            "Artist".to_string(),
            None,
            QueueContent::Single(gw_track("1")),
            Arc::new(Settings::default()),
        );
        item.progress.store(42, Ordering::SeqCst);
        item.push_error(TrackError {
            track_id: "1".to_string(),
            title: "Song".to_string(),
            artist: "Artist".to_string(),
            message: "failed".to_string(),
            code: "notAvailable".to_string(),
        });

        let json = serde_json::to_string(&item.snapshot()).unwrap();
        let snap: QueueItemSnapshot = serde_json::from_str(&json).unwrap();

        let kept = QueueItem::from_snapshot(snap.clone(), false).unwrap();
        assert_eq!(kept.failed.load(Ordering::SeqCst), 1);
        assert_eq!(kept.progress.load(Ordering::SeqCst), 42);

        let reset = QueueItem::from_snapshot(snap, true).unwrap();
        assert_eq!(reset.failed.load(Ordering::SeqCst), 0);
        assert_eq!(reset.progress.load(Ordering::SeqCst), 0);
        assert!(!reset.is_cancelled());
        assert_eq!(reset.uuid, "track_1_3");
    }

    #[test]
    fn snapshot_keeps_variant_key() {
        let item = QueueItem::new(
            "track",
            "1",
            3,
            "Song".to_string(),
            "Artist".to_string(),
            None,
            QueueContent::Single(gw_track("1")),
            Arc::new(Settings::default()),
        );
        let value = serde_json::to_value(item.snapshot()).unwrap();
        assert!(value.get("single").is_some());
        assert!(value.get("collection").is_none());
        assert_eq!(value["type"], "track");
    }
}
