use crate::errors::{AppError, Result};
use crate::utils::Casing;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How to behave when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteMode {
    /// Skip the download entirely.
    Never,
    /// Always re-download and replace.
    Always,
    /// Keep the audio, rewrite the tags only.
    TagOnly,
    /// Probe for the same name under any known extension before skipping.
    ExtensionProbe,
    /// Keep both files, suffixing the new one with " (n)".
    KeepBoth,
}

impl Default for OverwriteMode {
    fn default() -> Self {
        OverwriteMode::Never
    }
}

/// Featuring-credit rewriting policy for titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeaturedToTitle {
    NoChange,
    RemoveFromTitle,
    AddToTitle,
    RemoveFromTitleAndAlbum,
}

impl Default for FeaturedToTitle {
    fn default() -> Self {
        FeaturedToTitle::NoChange
    }
}

/// Independently togglable tag fields plus tag-shaping options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagSettings {
    pub title: bool,
    pub artist: bool,
    pub album: bool,
    pub cover: bool,
    pub track_number: bool,
    pub track_total: bool,
    pub disc_number: bool,
    pub disc_total: bool,
    pub album_artist: bool,
    pub genre: bool,
    pub year: bool,
    pub date: bool,
    pub explicit: bool,
    pub isrc: bool,
    pub length: bool,
    pub barcode: bool,
    pub bpm: bool,
    pub replay_gain: bool,
    pub label: bool,
    pub lyrics: bool,
    pub copyright: bool,
    pub composer: bool,
    pub involved_people: bool,
    pub source: bool,
    pub save_playlist_as_compilation: bool,
    pub use_null_separator: bool,
    pub save_id3v1: bool,
    pub single_album_artist: bool,
    /// "default" joins with ", "; "and_feat" uses main/feat strings; anything
    /// else is used verbatim as the separator.
    pub multi_artist_separator: String,
}

impl Default for TagSettings {
    fn default() -> Self {
        Self {
            title: true,
            artist: true,
            album: true,
            cover: true,
            track_number: true,
            track_total: true,
            disc_number: true,
            disc_total: true,
            album_artist: true,
            genre: true,
            year: true,
            date: true,
            explicit: false,
            isrc: true,
            length: true,
            barcode: true,
            bpm: true,
            replay_gain: false,
            label: true,
            lyrics: false,
            copyright: false,
            composer: false,
            involved_people: false,
            source: false,
            save_playlist_as_compilation: false,
            use_null_separator: false,
            save_id3v1: true,
            single_album_artist: false,
            multi_artist_separator: "default".to_string(),
        }
    }
}

/// Backend session and endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Long-lived session token for the audio backend gateway.
    pub session_token: String,
    pub api_base: String,
    pub gw_base: String,
    pub cdn_base: String,
    pub media_base: String,
    /// Shared secret for per-track stream key derivation.
    pub stream_secret: String,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_token: String::new(),
            api_base: "https://api.example-music.com".to_string(),
            gw_base: "https://www.example-music.com/ajax/gw-light.php".to_string(),
            cdn_base: "https://cdn-images.example-music.com/images".to_string(),
            media_base: "https://media.example-music.com/v1".to_string(),
            stream_secret: "g4el58wc0zvf9na1".to_string(),
            spotify_client_id: None,
            spotify_client_secret: None,
        }
    }
}

/// Full user configuration. A snapshot of this struct is captured per queue
/// item at enqueue time and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub download_location: PathBuf,
    pub queue_concurrency: usize,
    pub max_bitrate: u32,
    pub fallback_bitrate: bool,
    pub fallback_search: bool,

    pub trackname_template: String,
    pub album_trackname_template: String,
    pub playlist_trackname_template: String,
    pub create_playlist_folder: bool,
    pub playlist_name_template: String,
    pub create_artist_folder: bool,
    pub artist_name_template: String,
    pub create_album_folder: bool,
    pub album_name_template: String,
    pub create_cd_folder: bool,
    pub create_structure_playlist: bool,
    pub create_single_folder: bool,
    pub illegal_character_replacer: String,

    pub overwrite_file: OverwriteMode,
    pub save_artwork: bool,
    pub cover_image_template: String,
    pub save_artwork_artist: bool,
    pub artist_image_template: String,
    pub local_artwork_size: u32,
    pub local_artwork_format: String,
    pub embedded_artwork_size: u32,
    pub embedded_artwork_png: bool,
    pub jpeg_image_quality: u32,

    pub date_format: String,
    pub album_various_artists: bool,
    pub remove_duplicate_artists: bool,
    pub featured_to_title: FeaturedToTitle,
    pub title_casing: Casing,
    pub artist_casing: Casing,
    pub remove_album_version: bool,

    pub sync_lyrics: bool,
    pub log_errors: bool,
    pub log_searched: bool,
    pub create_m3u8_file: bool,
    pub playlist_filename_template: String,
    pub execute_command: String,

    pub tags: TagSettings,
    pub session: SessionSettings,
    pub proxy: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_location: dirs::audio_dir()
                .or_else(dirs::download_dir)
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            queue_concurrency: 3,
            max_bitrate: 3,
            fallback_bitrate: true,
            fallback_search: false,
            trackname_template: "%artist% - %title%".to_string(),
            album_trackname_template: "%tracknumber% - %title%".to_string(),
            playlist_trackname_template: "%position% - %artist% - %title%".to_string(),
            create_playlist_folder: true,
            playlist_name_template: "%playlist%".to_string(),
            create_artist_folder: false,
            artist_name_template: "%artist%".to_string(),
            create_album_folder: true,
            album_name_template: "%artist% - %album%".to_string(),
            create_cd_folder: true,
            create_structure_playlist: false,
            create_single_folder: false,
            illegal_character_replacer: "_".to_string(),
            overwrite_file: OverwriteMode::Never,
            save_artwork: true,
            cover_image_template: "cover".to_string(),
            save_artwork_artist: false,
            artist_image_template: "folder".to_string(),
            local_artwork_size: 1400,
            local_artwork_format: "jpg".to_string(),
            embedded_artwork_size: 800,
            embedded_artwork_png: false,
            jpeg_image_quality: 80,
            date_format: "Y-M-D".to_string(),
            album_various_artists: true,
            remove_duplicate_artists: false,
            featured_to_title: FeaturedToTitle::NoChange,
            title_casing: Casing::Nothing,
            artist_casing: Casing::Nothing,
            remove_album_version: false,
            sync_lyrics: false,
            log_errors: true,
            log_searched: false,
            create_m3u8_file: false,
            playlist_filename_template: "playlist".to_string(),
            execute_command: String::new(),
            tags: TagSettings::default(),
            session: SessionSettings::default(),
            proxy: None,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = serde_json::from_str(&content)?;
            settings.validate()?;
            Ok(settings)
        } else {
            let settings = Settings::default();
            settings.save()?;
            Ok(settings)
        }
    }

    /// Checks the hand-edited fields that later code derives keys from.
    pub fn validate(&self) -> Result<()> {
        if self.session.stream_secret.len() != 16 {
            return Err(AppError::Config(
                "stream_secret must be exactly 16 characters".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        if let Some(config_dir) = config_path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_dir() -> Result<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?;
        Ok(base.join("wavedl"))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }
}

/// Parses a user-facing bitrate name into the backend format code.
pub fn parse_bitrate(value: &str) -> Option<u32> {
    match value.to_lowercase().as_str() {
        "flac" | "lossless" | "9" => Some(9),
        "mp3" | "320" | "3" => Some(3),
        "128" | "1" => Some(1),
        "360" | "360_hq" | "15" => Some(15),
        "360_mq" | "14" => Some(14),
        "360_lq" | "13" => Some(13),
        _ => None,
    }
}
