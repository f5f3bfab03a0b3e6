pub mod catalog;
pub mod spotify;

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Audio format codes used by the backend, ordered high to low within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Mp3_128,
    Mp3_320,
    Mp3Misc,
    Flac,
    Mp4Ra1,
    Mp4Ra2,
    Mp4Ra3,
}

impl Format {
    pub fn code(self) -> u32 {
        match self {
            Format::Mp3_128 => 1,
            Format::Mp3_320 => 3,
            Format::Mp3Misc => 8,
            Format::Flac => 9,
            Format::Mp4Ra1 => 13,
            Format::Mp4Ra2 => 14,
            Format::Mp4Ra3 => 15,
        }
    }

    pub fn from_code(code: u32) -> Option<Format> {
        match code {
            1 => Some(Format::Mp3_128),
            3 => Some(Format::Mp3_320),
            8 => Some(Format::Mp3Misc),
            9 => Some(Format::Flac),
            13 => Some(Format::Mp4Ra1),
            14 => Some(Format::Mp4Ra2),
            15 => Some(Format::Mp4Ra3),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Flac => ".flac",
            Format::Mp4Ra1 | Format::Mp4Ra2 | Format::Mp4Ra3 => ".mp4",
            _ => ".mp3",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Mp3_128 => "MP3_128",
            Format::Mp3_320 => "MP3_320",
            Format::Mp3Misc => "MP3_MISC",
            Format::Flac => "FLAC",
            Format::Mp4Ra1 => "MP4_RA1",
            Format::Mp4Ra2 => "MP4_RA2",
            Format::Mp4Ra3 => "MP4_RA3",
        }
    }

    /// Whether this format belongs to the immersive ("360") tier.
    pub fn is_immersive(self) -> bool {
        matches!(self, Format::Mp4Ra1 | Format::Mp4Ra2 | Format::Mp4Ra3)
    }
}

/// Raw gateway track record: the unit the queue carries around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GwTrack {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub version: Option<String>,
    pub artist_id: String,
    pub artist: String,
    #[serde(default)]
    pub artist_pic: Option<String>,
    pub album_id: String,
    pub album_title: String,
    #[serde(default)]
    pub album_pic: Option<String>,
    /// Content checksum; empty means not downloadable without a fallback.
    #[serde(default)]
    pub md5_origin: String,
    #[serde(default)]
    pub media_version: String,
    /// "0" when no fallback exists.
    #[serde(default = "zero_id")]
    pub fallback_id: String,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default)]
    pub disc_number: Option<u32>,
    /// 1-based position inside the owning collection, set by the resolver.
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub isrc: Option<String>,
    #[serde(default)]
    pub gain: Option<f64>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub lyrics_id: i64,
    #[serde(default)]
    pub copyright: Option<String>,
}

fn zero_id() -> String {
    "0".to_string()
}

impl GwTrack {
    /// Display title including the version suffix when it is not already part
    /// of the title.
    pub fn full_title(&self) -> String {
        match &self.version {
            Some(v) if !v.is_empty() && !self.title.contains(v.as_str()) => {
                format!("{} {}", self.title.trim(), v.trim())
            }
            _ => self.title.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contributor {
    pub id: String,
    pub name: String,
    pub role: String,
}

/// Public-API track extras not present on the gateway record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDetails {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub bpm: f64,
    #[serde(default)]
    pub gain: Option<f64>,
    #[serde(default)]
    pub disc_number: Option<u32>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub contributors: Vec<Contributor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumInfo {
    pub id: String,
    pub title: String,
    pub artist_id: String,
    pub artist_name: String,
    #[serde(default)]
    pub artist_pic: Option<String>,
    /// CDN picture hash for cover URL construction.
    #[serde(default)]
    pub pic: Option<String>,
    #[serde(default)]
    pub track_total: u32,
    #[serde(default)]
    pub disc_total: u32,
    #[serde(default)]
    pub record_type: String,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub explicit: bool,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub copyright: Option<String>,
    #[serde(default)]
    pub contributors: Vec<Contributor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub title: String,
    pub public: bool,
    pub creator_id: String,
    pub creator_name: String,
    #[serde(default)]
    pub pic: Option<String>,
    #[serde(default)]
    pub pic_url: Option<String>,
    #[serde(default)]
    pub track_total: u32,
    #[serde(default)]
    pub creation_date: Option<String>,
    #[serde(default)]
    pub explicit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub pic: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LyricsInfo {
    #[serde(default)]
    pub unsync: Option<String>,
    /// LRC-formatted synced lyrics.
    #[serde(default)]
    pub sync: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FilesizeEntry {
    pub size: u64,
    /// Whether availability has been probed against the content URL.
    pub tested: bool,
}

/// Per-format filesize map reported by the backend for one track.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackFilesizes(pub HashMap<u32, FilesizeEntry>);

impl TrackFilesizes {
    pub fn get(&self, format: Format) -> Option<FilesizeEntry> {
        self.0.get(&format.code()).copied()
    }

    pub fn set(&mut self, format: Format, size: u64) {
        self.0.insert(format.code(), FilesizeEntry { size, tested: false });
    }

    /// Marks a format as known-unavailable (zero size, already tested).
    pub fn mark_unavailable(&mut self, format: Format) {
        self.0.insert(format.code(), FilesizeEntry { size: 0, tested: true });
    }
}

/// The audio backend and its public catalog, behind one seam so the download
/// pipeline can run against an in-memory double.
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    fn logged_in(&self) -> bool;
    fn user_id(&self) -> String;

    async fn track(&self, id: &str) -> Result<TrackDetails>;
    async fn track_by_isrc(&self, isrc: &str) -> Result<GwTrack>;
    async fn track_gw(&self, id: &str) -> Result<GwTrack>;
    async fn album(&self, id: &str) -> Result<AlbumInfo>;
    /// Looks an album up by its UPC barcode.
    async fn album_by_upc(&self, upc: &str) -> Result<AlbumInfo>;
    async fn album_gw(&self, id: &str) -> Result<AlbumInfo>;
    async fn album_tracks_gw(&self, id: &str) -> Result<Vec<GwTrack>>;
    async fn playlist(&self, id: &str) -> Result<PlaylistInfo>;
    async fn playlist_tracks_gw(&self, id: &str) -> Result<Vec<GwTrack>>;
    async fn artist(&self, id: &str) -> Result<ArtistInfo>;
    /// Album ids of an artist's main releases.
    async fn artist_albums(&self, id: &str) -> Result<Vec<String>>;
    /// Album ids of the full discography.
    async fn artist_discography(&self, id: &str) -> Result<Vec<String>>;
    async fn artist_top_gw(&self, id: &str) -> Result<Vec<GwTrack>>;
    async fn track_filesizes(&self, id: &str) -> Result<TrackFilesizes>;
    /// Free-text alternative search; Ok(None) when nothing matches.
    async fn track_from_metadata(
        &self,
        artist: &str,
        title: &str,
        album: &str,
    ) -> Result<Option<String>>;
    async fn lyrics_gw(&self, id: &str) -> Result<LyricsInfo>;

    /// Signed streaming URL for (track id, checksum, media version, format).
    fn stream_url(&self, id: &str, md5: &str, media_version: &str, format: Format) -> String;
    /// HEAD-equivalent availability probe against a content URL.
    async fn probe(&self, url: &str) -> Result<bool>;
}
