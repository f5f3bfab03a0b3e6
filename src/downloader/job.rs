use super::artwork::{cover_candidates, ArtworkCache};
use super::{bitrate, post, stream, DownloadError, TrackError};
use crate::api::spotify::SpotifyBridge;
use crate::api::{CatalogApi, Format, GwTrack};
use crate::config::OverwriteMode;
use crate::events::{EventSink, QueueEvent};
use crate::paths::{self, ItemKind};
use crate::queue::item::{QueueContent, QueueItem};
use crate::tagger::{self, CoverData};
use crate::track::Track;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

/// How many times one track may swap to an alternative id before giving up.
const MAX_FALLBACKS: u32 = 5;

/// Shared services every download job runs against.
pub struct JobContext {
    pub catalog: Arc<dyn CatalogApi>,
    pub bridge: Arc<dyn SpotifyBridge>,
    pub events: Arc<dyn EventSink>,
    /// Client used for audio streams and artwork, longer timeouts than the
    /// API client.
    pub client: reqwest::Client,
    pub artwork: Arc<ArtworkCache>,
}

/// Executes one queue item: every track through the resolve / stream /
/// decrypt / tag pipeline, then the per-item extras.
pub struct DownloadJob {
    ctx: Arc<JobContext>,
    item: Arc<QueueItem>,
    extras_dir: Mutex<Option<PathBuf>>,
    playlist_name: Mutex<Option<String>>,
    searched_log: Mutex<Vec<String>>,
}

impl DownloadJob {
    pub fn new(ctx: Arc<JobContext>, item: Arc<QueueItem>) -> DownloadJob {
        DownloadJob {
            ctx,
            item,
            extras_dir: Mutex::new(None),
            playlist_name: Mutex::new(None),
            searched_log: Mutex::new(Vec::new()),
        }
    }

    pub async fn run(&self) {
        match self.item.content.clone() {
            QueueContent::Single(track) => {
                self.handle_track(track, ItemKind::Single, true).await;
            }
            QueueContent::Collection(tracks) => {
                self.download_collection(tracks).await;
            }
            QueueContent::Convertible { source } => {
                let tracks = self.convert_source_tracks(source.track_refs).await;
                self.download_collection(tracks).await;
            }
        }
        if !self.item.is_cancelled() {
            self.post_process().await;
        }
    }

    fn collection_kind(&self) -> ItemKind {
        if self.item.playlist_context.is_some() {
            ItemKind::Playlist
        } else {
            ItemKind::Album
        }
    }

    async fn download_collection(&self, tracks: Vec<GwTrack>) {
        let kind = self.collection_kind();
        let concurrency = self.item.settings.queue_concurrency.max(1);
        futures::stream::iter(
            tracks
                .into_iter()
                .map(|track| self.handle_track(track, kind, false)),
        )
        .buffered(concurrency)
        .collect::<Vec<()>>()
        .await;
    }

    /// Matches foreign playlist entries against the native catalog, by ISRC
    /// first and metadata search second. Misses become recorded failures.
    async fn convert_source_tracks(
        &self,
        refs: Vec<crate::api::spotify::SpotifyTrackRef>,
    ) -> Vec<GwTrack> {
        let mut tracks = Vec::with_capacity(refs.len());
        for (i, track_ref) in refs.into_iter().enumerate() {
            if self.item.is_cancelled() {
                break;
            }
            let found = self.match_source_track(&track_ref).await;
            match found {
                Some(mut gw) => {
                    gw.position = Some(i + 1);
                    tracks.push(gw);
                }
                None => {
                    let error = TrackError {
                        track_id: String::new(),
                        title: track_ref.title.clone(),
                        artist: track_ref.artist.clone(),
                        message: "Track not found on the service!".to_string(),
                        code: "trackNotFound".to_string(),
                    };
                    self.item.push_error(error.clone());
                    self.ctx.events.send(QueueEvent::TrackFailed {
                        uuid: self.item.uuid.clone(),
                        error,
                    });
                    self.bump_collection_progress();
                }
            }
        }
        tracks
    }

    async fn match_source_track(
        &self,
        track_ref: &crate::api::spotify::SpotifyTrackRef,
    ) -> Option<GwTrack> {
        if let Some(isrc) = &track_ref.isrc {
            if let Ok(gw) = self.ctx.catalog.track_by_isrc(isrc).await {
                return Some(gw);
            }
        }
        let id = self
            .ctx
            .catalog
            .track_from_metadata(&track_ref.artist, &track_ref.title, &track_ref.album)
            .await
            .ok()??;
        self.ctx.catalog.track_gw(&id).await.ok()
    }

    /// Downloads one track and records the outcome on the item.
    async fn handle_track(&self, gw: GwTrack, kind: ItemKind, byte_progress: bool) {
        if self.item.is_cancelled() {
            return;
        }
        let position = gw.position.unwrap_or(1);
        let display = (gw.full_title(), gw.artist.clone());
        match self.download_track(gw, kind, byte_progress).await {
            Ok(path) => {
                self.item.push_file(position, path.clone());
                self.ctx.events.send(QueueEvent::TrackDownloaded {
                    uuid: self.item.uuid.clone(),
                    path: path.to_string_lossy().to_string(),
                });
            }
            Err((track_id, e)) => {
                if e == DownloadError::Cancelled {
                    return;
                }
                let error = TrackError {
                    track_id,
                    title: display.0,
                    artist: display.1,
                    message: e.to_string(),
                    code: e.code().to_string(),
                };
                self.item.push_error(error.clone());
                self.ctx.events.send(QueueEvent::TrackFailed {
                    uuid: self.item.uuid.clone(),
                    error,
                });
            }
        }
        if !byte_progress {
            self.bump_collection_progress();
        }
    }

    /// Collection progress moves in even whole-percent steps as tracks settle.
    fn bump_collection_progress(&self) {
        let done = self.item.downloaded.load(Ordering::SeqCst)
            + self.item.failed.load(Ordering::SeqCst);
        let pct = (done * 100 / self.item.size.max(1)) as u32;
        let even = pct - pct % 2;
        if self.item.progress.swap(even, Ordering::SeqCst) != even {
            self.ctx.events.send(QueueEvent::Progress {
                uuid: self.item.uuid.clone(),
                progress: even,
            });
        }
    }

    /// The per-track pipeline with its bounded fallback chain: the current
    /// id is tried, then its declared alternative, then (at most once) a
    /// metadata search, until nothing recoverable is left.
    async fn download_track(
        &self,
        gw: GwTrack,
        kind: ItemKind,
        byte_progress: bool,
    ) -> Result<PathBuf, (String, DownloadError)> {
        let settings = self.item.settings.clone();
        let catalog = self.ctx.catalog.as_ref();
        let lyrics_id = gw.lyrics_id;

        let mut track = Track::build(catalog, &gw)
            .await
            .map_err(|_| (gw.id.clone(), DownloadError::NotOnService))?;
        if let Some(context) = &self.item.playlist_context {
            track.apply_playlist(context, settings.tags.save_playlist_as_compilation);
        }
        track.apply_settings(&settings);

        let wants_lyrics = settings.tags.lyrics || settings.sync_lyrics;
        if wants_lyrics {
            track.fetch_lyrics(catalog, lyrics_id).await;
        }

        let mut fallbacks = 0u32;
        loop {
            if self.item.is_cancelled() {
                return Err((track.id.clone(), DownloadError::Cancelled));
            }

            let failure = if track.md5_origin.is_empty() {
                DownloadError::NotEncoded
            } else {
                match bitrate::preferred_format(
                    catalog,
                    &mut track,
                    self.item.bitrate,
                    settings.fallback_bitrate,
                )
                .await
                {
                    Ok(format) => {
                        match self.attempt(&track, kind, format, byte_progress).await {
                            Ok(path) => return Ok(path),
                            // A fake lossless payload gets the format marked
                            // unavailable and one more resolution cycle,
                            // without consuming a fallback id.
                            Err(DownloadError::FakeLossless) => {
                                track.filesizes.mark_unavailable(Format::Flac);
                                continue;
                            }
                            Err(e) if e.recoverable() => e,
                            Err(e) => return Err((track.id.clone(), e)),
                        }
                    }
                    Err(e) if e.recoverable() => e,
                    Err(e) => return Err((track.id.clone(), e)),
                }
            };

            fallbacks += 1;
            if fallbacks > MAX_FALLBACKS {
                return Err((track.id.clone(), failure.without_alternative()));
            }

            if track.fallback_id != "0" {
                let fallback_id = track.fallback_id.clone();
                match catalog.track_gw(&fallback_id).await {
                    Ok(alt) => {
                        let filesizes = catalog
                            .track_filesizes(&alt.id)
                            .await
                            .unwrap_or_default();
                        log::info!(
                            "{}: falling back to alternative id {}",
                            track.id,
                            alt.id
                        );
                        track.apply_essential(&alt, filesizes);
                        continue;
                    }
                    Err(_) => return Err((track.id.clone(), failure.without_alternative())),
                }
            }

            if settings.fallback_search && !track.searched {
                track.searched = true;
                let found = catalog
                    .track_from_metadata(
                        &track.main_artist.name,
                        &track.title,
                        &track.album.title,
                    )
                    .await
                    .ok()
                    .flatten();
                if let Some(id) = found {
                    if let Ok(alt) = catalog.track_gw(&id).await {
                        let filesizes =
                            catalog.track_filesizes(&alt.id).await.unwrap_or_default();
                        track.apply_essential(&alt, filesizes);
                        if let Ok(mut lines) = self.searched_log.lock() {
                            lines.push(format!(
                                "{} - {} => {}",
                                track.main_artists_string,
                                track.full_title(),
                                alt.id
                            ));
                        }
                        continue;
                    }
                }
            }

            return Err((track.id.clone(), failure.without_alternative()));
        }
    }

    /// One transfer attempt at a resolved format: destination layout,
    /// overwrite policy, stream, decrypt, artwork, tags.
    async fn attempt(
        &self,
        track: &Track,
        kind: ItemKind,
        format: Format,
        byte_progress: bool,
    ) -> Result<PathBuf, DownloadError> {
        let settings = &self.item.settings;
        log::debug!("downloading {} as {}", track.id, format.name());
        let layout = paths::track_paths(track, settings, kind, format);
        self.remember_extras(track, &layout, format);

        let mut final_path = layout
            .directory
            .join(format!("{}{}", layout.filename, format.extension()));

        if final_path.exists() {
            match settings.overwrite_file {
                OverwriteMode::Never => return Ok(final_path),
                OverwriteMode::ExtensionProbe => return Ok(final_path),
                OverwriteMode::KeepBoth => {
                    final_path = paths::keep_both_path(&final_path);
                }
                OverwriteMode::TagOnly => {
                    let cover = self.embedded_cover(track).await;
                    tagger::tag_track(&final_path, track, settings, cover.as_ref())
                        .map_err(|e| DownloadError::Tagging(e.to_string()))?;
                    return Ok(final_path);
                }
                OverwriteMode::Always => {}
            }
        } else if settings.overwrite_file == OverwriteMode::ExtensionProbe {
            for ext in [".mp3", ".flac", ".mp4"] {
                let sibling = layout.directory.join(format!("{}{}", layout.filename, ext));
                if sibling.exists() {
                    return Ok(sibling);
                }
            }
        }

        tokio::fs::create_dir_all(&layout.directory)
            .await
            .map_err(|e| DownloadError::Write(e.to_string()))?;

        let url = self.ctx.catalog.stream_url(
            &track.id,
            &track.md5_origin,
            &track.media_version,
            format,
        );
        let key = stream::track_key(&track.id, &settings.session.stream_secret);
        let part_path = final_path.with_extension(
            format!("{}.part", format.extension().trim_start_matches('.')),
        );

        let events = self.ctx.events.clone();
        let uuid = self.item.uuid.clone();
        let progress = &self.item.progress;
        let mut received: i64 = 0;
        let on_progress = |delta: i64, total: u64| {
            received += delta;
            if byte_progress && total > 0 {
                let pct = ((received.max(0) as u64).min(total) * 100 / total) as u32;
                let even = pct - pct % 2;
                if progress.swap(even, Ordering::SeqCst) != even {
                    events.send(QueueEvent::Progress {
                        uuid: uuid.clone(),
                        progress: even,
                    });
                }
            }
        };

        let result = stream::stream_track(
            &self.ctx.client,
            &url,
            &part_path,
            &key,
            &self.item.cancelled,
            on_progress,
        )
        .await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(e);
        }

        tokio::fs::rename(&part_path, &final_path)
            .await
            .map_err(|e| DownloadError::Write(e.to_string()))?;

        let cover = self.embedded_cover(track).await;
        if let Err(e) = tagger::tag_track(&final_path, track, settings, cover.as_ref()) {
            let _ = tokio::fs::remove_file(&final_path).await;
            if tagger::is_missing_flac_header(&e) {
                return Err(DownloadError::FakeLossless);
            }
            return Err(DownloadError::Tagging(e.to_string()));
        }

        if settings.sync_lyrics {
            if let Some(lrc) = track.lyrics.sync.as_deref().filter(|s| !s.is_empty()) {
                if let Err(e) = post::write_lyrics_file(&final_path, lrc).await {
                    log::warn!("could not write lyrics file for {}: {}", track.id, e);
                }
            }
        }

        self.save_local_artwork(track, &layout, kind).await;
        Ok(final_path)
    }

    fn remember_extras(&self, track: &Track, layout: &paths::TrackPaths, format: Format) {
        if let Ok(mut dir) = self.extras_dir.lock() {
            if dir.is_none() {
                *dir = Some(layout.extras_dir.clone());
            }
        }
        if let Ok(mut name) = self.playlist_name.lock() {
            if name.is_none() {
                *name = Some(paths::playlist_filename(track, &self.item.settings, format));
            }
        }
    }

    /// Embedded cover bytes, fetched through the shared cache. Never fatal.
    async fn embedded_cover(&self, track: &Track) -> Option<CoverData> {
        let settings = &self.item.settings;
        if !settings.tags.cover {
            return None;
        }
        let size = settings.embedded_artwork_size;
        let png = settings.embedded_artwork_png;
        let (key, urls) = if let Some(url) = &track.album.pic_url {
            (
                format!("pl_{}_{}", track.album.id, size),
                vec![url.clone()],
            )
        } else {
            let pic = track.album.pic.as_deref().filter(|p| !p.is_empty())?;
            (
                format!("alb_{}_{}", track.album.id, size),
                cover_candidates(
                    &settings.session.cdn_base,
                    "cover",
                    pic,
                    size,
                    png,
                    settings.jpeg_image_quality,
                ),
            )
        };
        match self.ctx.artwork.fetch(&key, png, &urls).await {
            Ok(data) => Some(CoverData { data, png }),
            Err(e) => {
                log::warn!("embedded artwork unavailable for {}: {}", track.id, e);
                None
            }
        }
    }

    /// Cover and artist images saved next to the audio files. Best effort.
    async fn save_local_artwork(&self, track: &Track, layout: &paths::TrackPaths, kind: ItemKind) {
        let settings = &self.item.settings;
        if settings.save_artwork && (kind != ItemKind::Single || settings.create_single_folder) {
            let png = settings.local_artwork_format == "png";
            let ext = if png { "png" } else { "jpg" };
            let dest = layout
                .cover_dir
                .join(format!("{}.{}", settings.cover_image_template, ext));
            if !dest.exists() {
                let size = settings.local_artwork_size;
                let fetched = if let Some(url) = &track.album.pic_url {
                    self.ctx
                        .artwork
                        .fetch(&format!("pl_{}_{}", track.album.id, size), png, &[url.clone()])
                        .await
                } else if let Some(pic) = track.album.pic.as_deref().filter(|p| !p.is_empty()) {
                    let urls = cover_candidates(
                        &settings.session.cdn_base,
                        "cover",
                        pic,
                        size,
                        png,
                        settings.jpeg_image_quality,
                    );
                    self.ctx
                        .artwork
                        .fetch(&format!("alb_{}_{}", track.album.id, size), png, &urls)
                        .await
                } else {
                    return;
                };
                if let Ok(data) = fetched {
                    let _ = tokio::fs::create_dir_all(&layout.cover_dir).await;
                    let _ = tokio::fs::write(&dest, data).await;
                }
            }
        }

        if settings.save_artwork_artist {
            if let (Some(artist_dir), Some(pic)) = (
                &layout.artist_dir,
                track.main_artist.pic.as_deref().filter(|p| !p.is_empty()),
            ) {
                let dest = artist_dir.join(format!("{}.jpg", settings.artist_image_template));
                if !dest.exists() {
                    let size = settings.local_artwork_size;
                    let urls = cover_candidates(
                        &settings.session.cdn_base,
                        "artist",
                        pic,
                        size,
                        false,
                        settings.jpeg_image_quality,
                    );
                    if let Ok(data) = self
                        .ctx
                        .artwork
                        .fetch(&format!("art_{}_{}", track.main_artist.id, size), false, &urls)
                        .await
                    {
                        let _ = tokio::fs::create_dir_all(artist_dir).await;
                        let _ = tokio::fs::write(&dest, data).await;
                    }
                }
            }
        }
    }

    /// Per-item files written after the last track settles: error and search
    /// logs, the ordered playlist file, the user hook.
    async fn post_process(&self) {
        let settings = &self.item.settings;
        let extras_dir = self
            .extras_dir
            .lock()
            .ok()
            .and_then(|d| d.clone())
            .unwrap_or_else(|| settings.download_location.clone());

        if settings.log_errors {
            let errors = self
                .item
                .errors
                .lock()
                .map(|e| e.clone())
                .unwrap_or_default();
            for error in errors {
                let line = format!(
                    "{} | {} - {} | {}",
                    error.track_id, error.artist, error.title, error.message
                );
                if let Err(e) = post::append_log_line(&extras_dir, "errors.txt", &line).await {
                    log::warn!("could not write errors.txt: {}", e);
                }
            }
        }

        if settings.log_searched {
            let lines = self
                .searched_log
                .lock()
                .map(|l| l.clone())
                .unwrap_or_default();
            for line in lines {
                if let Err(e) = post::append_log_line(&extras_dir, "searched.txt", &line).await {
                    log::warn!("could not write searched.txt: {}", e);
                }
            }
        }

        let is_collection = !matches!(self.item.content, QueueContent::Single(_));
        if settings.create_m3u8_file && is_collection {
            let mut files = self
                .item
                .files
                .lock()
                .map(|f| f.clone())
                .unwrap_or_default();
            if !files.is_empty() {
                files.sort_by_key(|(position, _)| *position);
                let ordered: Vec<PathBuf> = files.into_iter().map(|(_, path)| path).collect();
                let name = self
                    .playlist_name
                    .lock()
                    .ok()
                    .and_then(|n| n.clone())
                    .unwrap_or_else(|| "playlist".to_string());
                if let Err(e) = post::write_m3u8(&extras_dir, &name, &ordered).await {
                    log::warn!("could not write playlist file: {}", e);
                }
            }
        }

        if !settings.execute_command.is_empty() {
            let last_file = self
                .item
                .files
                .lock()
                .ok()
                .and_then(|f| f.last().map(|(_, path)| path.clone()));
            if let Some(file) = last_file {
                post::run_user_command(&settings.execute_command, &file, &extras_dir).await;
            }
        }
    }
}
