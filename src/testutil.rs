use crate::api::spotify::{SpotifyBridge, SpotifyPlaylist, SpotifyTrackRef};
use crate::api::{
    AlbumInfo, ArtistInfo, CatalogApi, Format, GwTrack, LyricsInfo, PlaylistInfo, TrackDetails,
    TrackFilesizes,
};
use crate::errors::{AppError, Result};
use crate::events::{EventSink, QueueEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Minimal fixture HTTP server: every request gets the same status and body.
/// Returns the base URL to point a client at.
pub async fn serve_http(status: u16, body: Vec<u8>) -> String {
    serve_http_counting(status, body).await.0
}

/// Same as [`serve_http`], also counting how many requests arrived.
pub async fn serve_http_counting(status: u16, body: Vec<u8>) -> (String, Arc<AtomicUsize>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            counter.fetch_add(1, Ordering::SeqCst);
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 {} Fixture\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{}", addr), hits)
}

pub fn gw(id: &str, title: &str, artist: &str, album_id: &str) -> GwTrack {
    GwTrack {
        id: id.to_string(),
        title: title.to_string(),
        version: None,
        artist_id: "900".to_string(),
        artist: artist.to_string(),
        artist_pic: None,
        album_id: album_id.to_string(),
        album_title: format!("Album {}", album_id),
        album_pic: Some("pichash".to_string()),
        md5_origin: "aabbccdd".to_string(),
        media_version: "4".to_string(),
        fallback_id: "0".to_string(),
        duration: 180,
        track_number: Some(1),
        disc_number: Some(1),
        position: None,
        explicit: false,
        isrc: None,
        gain: None,
        release_date: Some("2021-03-05".to_string()),
        lyrics_id: 0,
        copyright: None,
    }
}

pub fn album(id: &str, title: &str, artist: &str, track_total: u32) -> AlbumInfo {
    AlbumInfo {
        id: id.to_string(),
        title: title.to_string(),
        artist_id: "900".to_string(),
        artist_name: artist.to_string(),
        artist_pic: None,
        pic: Some("pichash".to_string()),
        track_total,
        disc_total: 1,
        record_type: "album".to_string(),
        barcode: None,
        label: None,
        explicit: false,
        release_date: Some("2021-03-05".to_string()),
        genres: vec!["Rock".to_string()],
        copyright: None,
        contributors: Vec::new(),
    }
}

/// In-memory catalog: fixture maps, no network. Stream URLs point at a
/// closed local port so attempted transfers fail fast, unless `stream_base`
/// redirects them to a fixture server.
#[derive(Default)]
pub struct MockCatalog {
    pub logged_in: bool,
    pub user: String,
    pub stream_base: String,
    pub tracks: HashMap<String, GwTrack>,
    pub details: HashMap<String, TrackDetails>,
    pub albums: HashMap<String, AlbumInfo>,
    pub album_tracks: HashMap<String, Vec<GwTrack>>,
    pub playlists: HashMap<String, PlaylistInfo>,
    pub playlist_tracks: HashMap<String, Vec<GwTrack>>,
    pub artists: HashMap<String, ArtistInfo>,
    pub artist_albums: HashMap<String, Vec<String>>,
    pub filesizes: HashMap<String, TrackFilesizes>,
    /// ISRC -> track id
    pub isrc_index: HashMap<String, String>,
    /// UPC -> album id
    pub upc_index: HashMap<String, String>,
    /// "artist|title" -> track id
    pub search_index: HashMap<String, String>,
    pub probe_ok: bool,
}

impl MockCatalog {
    pub fn with_session() -> MockCatalog {
        MockCatalog {
            logged_in: true,
            user: "42".to_string(),
            ..MockCatalog::default()
        }
    }
}

#[async_trait::async_trait]
impl CatalogApi for MockCatalog {
    fn logged_in(&self) -> bool {
        self.logged_in
    }

    fn user_id(&self) -> String {
        self.user.clone()
    }

    async fn track(&self, id: &str) -> Result<TrackDetails> {
        self.details
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn track_by_isrc(&self, isrc: &str) -> Result<GwTrack> {
        let id = self
            .isrc_index
            .get(isrc)
            .ok_or_else(|| AppError::NotFound(isrc.to_string()))?;
        self.track_gw(id).await
    }

    async fn track_gw(&self, id: &str) -> Result<GwTrack> {
        self.tracks
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn album(&self, id: &str) -> Result<AlbumInfo> {
        self.albums
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn album_by_upc(&self, upc: &str) -> Result<AlbumInfo> {
        let id = self
            .upc_index
            .get(upc)
            .ok_or_else(|| AppError::NotFound(upc.to_string()))?;
        self.album(id).await
    }

    async fn album_gw(&self, id: &str) -> Result<AlbumInfo> {
        Err(AppError::NotFound(id.to_string()))
    }

    async fn album_tracks_gw(&self, id: &str) -> Result<Vec<GwTrack>> {
        Ok(self.album_tracks.get(id).cloned().unwrap_or_default())
    }

    async fn playlist(&self, id: &str) -> Result<PlaylistInfo> {
        self.playlists
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn playlist_tracks_gw(&self, id: &str) -> Result<Vec<GwTrack>> {
        Ok(self.playlist_tracks.get(id).cloned().unwrap_or_default())
    }

    async fn artist(&self, id: &str) -> Result<ArtistInfo> {
        self.artists
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn artist_albums(&self, id: &str) -> Result<Vec<String>> {
        Ok(self.artist_albums.get(id).cloned().unwrap_or_default())
    }

    async fn artist_discography(&self, id: &str) -> Result<Vec<String>> {
        self.artist_albums(id).await
    }

    async fn artist_top_gw(&self, _id: &str) -> Result<Vec<GwTrack>> {
        Ok(Vec::new())
    }

    async fn track_filesizes(&self, id: &str) -> Result<TrackFilesizes> {
        Ok(self.filesizes.get(id).cloned().unwrap_or_default())
    }

    async fn track_from_metadata(
        &self,
        artist: &str,
        title: &str,
        _album: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .search_index
            .get(&format!("{}|{}", artist, title))
            .cloned())
    }

    async fn lyrics_gw(&self, _id: &str) -> Result<LyricsInfo> {
        Ok(LyricsInfo::default())
    }

    fn stream_url(&self, id: &str, _md5: &str, _media_version: &str, format: Format) -> String {
        let base = if self.stream_base.is_empty() {
            "http://127.0.0.1:1"
        } else {
            self.stream_base.as_str()
        };
        format!("{}/stream/{}?fmt={}", base, id, format.code())
    }

    async fn probe(&self, _url: &str) -> Result<bool> {
        Ok(self.probe_ok)
    }
}

#[derive(Default)]
pub struct MockBridge {
    pub enabled: bool,
    pub track_refs: HashMap<String, SpotifyTrackRef>,
    pub upcs: HashMap<String, String>,
    pub playlists: HashMap<String, SpotifyPlaylist>,
}

#[async_trait::async_trait]
impl SpotifyBridge for MockBridge {
    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn track_ref(&self, id: &str) -> Result<SpotifyTrackRef> {
        self.track_refs
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn album_upc(&self, id: &str) -> Result<Option<String>> {
        Ok(self.upcs.get(id).cloned())
    }

    async fn playlist(&self, id: &str) -> Result<SpotifyPlaylist> {
        self.playlists
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }
}

/// Records every event for later assertions.
#[derive(Default)]
pub struct CollectSink {
    pub events: Mutex<Vec<QueueEvent>>,
}

impl CollectSink {
    pub fn resolution_codes(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                QueueEvent::ResolutionFailed { code, .. } => code.clone(),
                _ => None,
            })
            .collect()
    }

    pub fn count<F: Fn(&QueueEvent) -> bool>(&self, pred: F) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for CollectSink {
    fn send(&self, event: QueueEvent) {
        self.events.lock().unwrap().push(event);
    }
}
