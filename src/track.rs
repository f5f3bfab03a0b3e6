use crate::api::{AlbumInfo, CatalogApi, GwTrack, LyricsInfo, TrackFilesizes};
use crate::config::{FeaturedToTitle, Settings};
use crate::errors::Result;
use crate::utils::{and_comma_concat, change_case, format_date, remove_features, unique_array};
use std::collections::HashMap;

pub const VARIOUS_ARTISTS: &str = "Various Artists";
pub const VARIOUS_ARTISTS_ID: &str = "5080";

/// Calendar date split into template-ready parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateParts {
    pub year: String,
    pub month: String,
    pub day: String,
}

impl DateParts {
    /// Parses "YYYY-MM-DD" (or a prefix of it). Some records come back with
    /// day and month swapped; a month above 12 means swap them back.
    pub fn parse(raw: &str) -> Option<DateParts> {
        let mut parts = raw.split('-');
        let year = parts.next()?.to_string();
        if year.len() != 4 {
            return None;
        }
        let mut month = parts.next().unwrap_or("00").to_string();
        let mut day = parts.next().unwrap_or("00").to_string();
        if month.parse::<u32>().map(|m| m > 12).unwrap_or(false) {
            std::mem::swap(&mut month, &mut day);
        }
        if month.len() == 1 {
            month = format!("0{}", month);
        }
        if day.len() == 1 {
            day = format!("0{}", day);
        }
        Some(DateParts { year, month, day })
    }

    pub fn format(&self, template: &str) -> String {
        format_date(&self.year, &self.month, &self.day, template)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackArtist {
    pub id: String,
    pub name: String,
    pub pic: Option<String>,
}

/// Album context carried by every track, possibly overridden by a playlist.
#[derive(Debug, Clone, Default)]
pub struct TrackAlbum {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub artist_id: String,
    pub pic: Option<String>,
    pub track_total: u32,
    pub disc_total: u32,
    pub record_type: String,
    pub barcode: Option<String>,
    pub label: Option<String>,
    pub explicit: bool,
    pub genres: Vec<String>,
    pub date: Option<DateParts>,
    pub copyright: Option<String>,
    /// Playlist URL used for local artwork instead of the CDN hash.
    pub pic_url: Option<String>,
}

impl TrackAlbum {
    fn from_info(info: &AlbumInfo) -> TrackAlbum {
        TrackAlbum {
            id: info.id.clone(),
            title: info.title.clone(),
            artist: info.artist_name.clone(),
            artist_id: info.artist_id.clone(),
            pic: info.pic.clone(),
            track_total: info.track_total,
            disc_total: info.disc_total,
            record_type: info.record_type.clone(),
            barcode: info.barcode.clone(),
            label: info.label.clone(),
            explicit: info.explicit,
            genres: info.genres.clone(),
            date: info.release_date.as_deref().and_then(DateParts::parse),
            copyright: info.copyright.clone(),
            pic_url: None,
        }
    }
}

/// Playlist context the resolver attaches to collection tracks.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PlaylistContext {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub pic: Option<String>,
    pub pic_url: Option<String>,
    pub track_total: u32,
    pub explicit: bool,
}

/// Fully assembled track: gateway record, public-API extras and album
/// context merged, ready for path templating and tagging.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub version: Option<String>,
    pub duration: u64,
    pub track_number: u32,
    pub disc_number: u32,
    pub position: Option<usize>,
    pub explicit: bool,
    pub isrc: Option<String>,
    pub bpm: f64,
    pub replay_gain: Option<String>,
    pub copyright: Option<String>,
    pub lyrics: LyricsInfo,
    pub date: Option<DateParts>,

    pub main_artist: TrackArtist,
    /// All credited names in first-seen order.
    pub artists: Vec<String>,
    /// Role -> names, e.g. "Main", "Featured", "Composer".
    pub artist_roles: HashMap<String, Vec<String>>,
    pub artists_string: String,
    pub main_artists_string: String,
    pub feat_artists_string: Option<String>,

    pub album: TrackAlbum,
    pub playlist: Option<PlaylistContext>,

    pub md5_origin: String,
    pub media_version: String,
    pub fallback_id: String,
    pub filesizes: TrackFilesizes,
    /// Set when this record came out of a metadata search rather than the
    /// original link.
    pub searched: bool,
}

impl Track {
    /// Assembles a track from the gateway record plus public-API lookups.
    /// Public album data is preferred; the gateway copy is the fallback when
    /// the album is not publicly listed.
    pub async fn build(catalog: &dyn CatalogApi, gw: &GwTrack) -> Result<Track> {
        let details = catalog.track(&gw.id).await.ok();
        let filesizes = catalog.track_filesizes(&gw.id).await.unwrap_or_default();

        let mut album = match catalog.album(&gw.album_id).await {
            Ok(info) => TrackAlbum::from_info(&info),
            Err(_) => {
                let mut fallback = match catalog.album_gw(&gw.album_id).await {
                    Ok(info) => TrackAlbum::from_info(&info),
                    Err(_) => TrackAlbum {
                        id: gw.album_id.clone(),
                        title: gw.album_title.clone(),
                        artist: gw.artist.clone(),
                        artist_id: gw.artist_id.clone(),
                        pic: gw.album_pic.clone(),
                        ..TrackAlbum::default()
                    },
                };
                if fallback.pic.is_none() {
                    fallback.pic = gw.album_pic.clone();
                }
                fallback
            }
        };
        if album.date.is_none() {
            album.date = gw.release_date.as_deref().and_then(DateParts::parse);
        }

        let mut artist_roles: HashMap<String, Vec<String>> = HashMap::new();
        let mut artists = Vec::new();
        if let Some(d) = &details {
            for c in &d.contributors {
                if c.role != "Main" && c.role != "Featured" {
                    artist_roles
                        .entry(c.role.clone())
                        .or_default()
                        .push(c.name.clone());
                    continue;
                }
                artist_roles
                    .entry(c.role.clone())
                    .or_default()
                    .push(c.name.clone());
                artists.push(c.name.clone());
            }
        }
        if artists.is_empty() {
            artists.push(gw.artist.clone());
            artist_roles
                .entry("Main".to_string())
                .or_default()
                .push(gw.artist.clone());
        }
        let artists = unique_array(&artists);

        let main_names = artist_roles.get("Main").cloned().unwrap_or_default();
        let main_artists_string = if main_names.is_empty() {
            gw.artist.clone()
        } else {
            and_comma_concat(&unique_array(&main_names))
        };
        let feat_names = artist_roles.get("Featured").cloned().unwrap_or_default();
        let feat_artists_string = if feat_names.is_empty() {
            None
        } else {
            Some(format!("feat. {}", and_comma_concat(&unique_array(&feat_names))))
        };

        let gain = details.as_ref().and_then(|d| d.gain).or(gw.gain);
        let replay_gain = gain.map(|g| format!("{:.6} dB", (g + 18.4) * -1.0));

        let date = album.date.clone();

        Ok(Track {
            id: gw.id.clone(),
            title: gw.title.trim().to_string(),
            version: gw.version.clone(),
            duration: gw.duration,
            track_number: gw.track_number.unwrap_or(1),
            disc_number: details
                .as_ref()
                .and_then(|d| d.disc_number)
                .or(gw.disc_number)
                .unwrap_or(1),
            position: gw.position,
            explicit: gw.explicit || details.as_ref().map(|d| d.explicit).unwrap_or(false),
            isrc: gw.isrc.clone(),
            bpm: details.as_ref().map(|d| d.bpm).unwrap_or(0.0),
            replay_gain,
            copyright: gw.copyright.clone().or_else(|| album.copyright.clone()),
            lyrics: LyricsInfo::default(),
            date,
            main_artist: TrackArtist {
                id: gw.artist_id.clone(),
                name: gw.artist.clone(),
                pic: gw.artist_pic.clone(),
            },
            artists_string: String::new(),
            artists,
            artist_roles,
            main_artists_string,
            feat_artists_string,
            album,
            playlist: None,
            md5_origin: gw.md5_origin.clone(),
            media_version: gw.media_version.clone(),
            fallback_id: gw.fallback_id.clone(),
            filesizes,
            searched: false,
        })
    }

    /// Re-reads the stream-critical fields from another gateway record, used
    /// when falling back to an alternative id for the same recording.
    pub fn apply_essential(&mut self, gw: &GwTrack, filesizes: TrackFilesizes) {
        self.id = gw.id.clone();
        self.duration = gw.duration;
        self.md5_origin = gw.md5_origin.clone();
        self.media_version = gw.media_version.clone();
        self.fallback_id = gw.fallback_id.clone();
        self.filesizes = filesizes;
    }

    pub fn full_title(&self) -> String {
        match &self.version {
            Some(v) if !v.trim().is_empty() && !self.title.contains(v.trim()) => {
                format!("{} {}", self.title.trim(), v.trim())
            }
            _ => self.title.clone(),
        }
    }

    /// Title with the featuring credit appended when it is not already there.
    pub fn feat_title(&self) -> String {
        let base = self.full_title();
        match &self.feat_artists_string {
            Some(feat) if !base.to_lowercase().contains("feat.") => {
                format!("{} ({})", base, feat)
            }
            _ => base,
        }
    }

    pub async fn fetch_lyrics(&mut self, catalog: &dyn CatalogApi, lyrics_id: i64) {
        if lyrics_id == 0 {
            return;
        }
        if let Ok(lyrics) = catalog.lyrics_gw(&self.id).await {
            self.lyrics = lyrics;
        }
    }

    /// Treats this track as part of a compilation named after the playlist.
    pub fn apply_playlist(&mut self, ctx: &PlaylistContext, as_compilation: bool) {
        if as_compilation {
            self.album = TrackAlbum {
                id: format!("pl_{}", ctx.id),
                title: ctx.title.clone(),
                artist: VARIOUS_ARTISTS.to_string(),
                artist_id: VARIOUS_ARTISTS_ID.to_string(),
                pic: ctx.pic.clone(),
                pic_url: ctx.pic_url.clone(),
                track_total: ctx.track_total,
                disc_total: 1,
                record_type: "compilation".to_string(),
                explicit: ctx.explicit,
                ..TrackAlbum::default()
            };
            if let Some(pos) = self.position {
                self.track_number = pos as u32;
            }
            self.disc_number = 1;
        }
        self.playlist = Some(ctx.clone());
    }

    /// Applies the user's title/artist shaping options. Run once, after all
    /// metadata is assembled.
    pub fn apply_settings(&mut self, settings: &Settings) {
        if settings.remove_album_version {
            if self.title.contains("Album Version") {
                self.title = self
                    .title
                    .replace("(Album Version)", "")
                    .replace("Album Version", "")
                    .trim()
                    .to_string();
            }
            if let Some(v) = &self.version {
                if v.contains("Album Version") {
                    self.version = None;
                }
            }
        }

        match settings.featured_to_title {
            FeaturedToTitle::NoChange => {}
            FeaturedToTitle::RemoveFromTitle => {
                self.title = remove_features(&self.title);
            }
            FeaturedToTitle::AddToTitle => {
                self.title = self.feat_title();
                self.version = None;
            }
            FeaturedToTitle::RemoveFromTitleAndAlbum => {
                self.title = remove_features(&self.title);
                self.album.title = remove_features(&self.album.title);
            }
        }

        if settings.album_various_artists
            && self.album.artist_id == VARIOUS_ARTISTS_ID
            && self.album.record_type != "compilation"
        {
            self.album.artist = VARIOUS_ARTISTS.to_string();
        }

        self.title = change_case(&self.title, settings.title_casing);
        self.main_artist.name = change_case(&self.main_artist.name, settings.artist_casing);
        self.album.artist = change_case(&self.album.artist, settings.artist_casing);
        for name in &mut self.artists {
            *name = change_case(name, settings.artist_casing);
        }

        if settings.remove_duplicate_artists {
            self.artists = unique_array(&self.artists);
        }

        self.artists_string = match settings.tags.multi_artist_separator.as_str() {
            "default" => self.artists.join(", "),
            "and_feat" => match &self.feat_artists_string {
                Some(feat) => format!("{} {}", self.main_artists_string, feat),
                None => self.main_artists_string.clone(),
            },
            sep => self.artists.join(sep),
        };
        if self.artists_string.is_empty() {
            self.artists_string = self.main_artist.name.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track() -> Track {
        Track {
            id: "1".to_string(),
            title: "Song".to_string(),
            version: Some("(Remix)".to_string()),
            duration: 200,
            track_number: 3,
            disc_number: 1,
            position: Some(5),
            explicit: false,
            isrc: Some("ISRC1".to_string()),
            bpm: 0.0,
            replay_gain: None,
            copyright: None,
            lyrics: LyricsInfo::default(),
            date: DateParts::parse("2020-05-01"),
            main_artist: TrackArtist {
                id: "9".to_string(),
                name: "Artist".to_string(),
                pic: None,
            },
            artists: vec!["Artist".to_string(), "Guest".to_string()],
            artist_roles: HashMap::from([
                ("Main".to_string(), vec!["Artist".to_string()]),
                ("Featured".to_string(), vec!["Guest".to_string()]),
            ]),
            artists_string: String::new(),
            main_artists_string: "Artist".to_string(),
            feat_artists_string: Some("feat. Guest".to_string()),
            album: TrackAlbum {
                id: "2".to_string(),
                title: "Album".to_string(),
                artist: "Artist".to_string(),
                artist_id: "9".to_string(),
                record_type: "album".to_string(),
                track_total: 10,
                disc_total: 1,
                ..TrackAlbum::default()
            },
            playlist: None,
            md5_origin: "aa".to_string(),
            media_version: "4".to_string(),
            fallback_id: "0".to_string(),
            filesizes: TrackFilesizes::default(),
            searched: false,
        }
    }

    #[test]
    fn date_swaps_month_and_day_when_month_is_impossible() {
        let d = DateParts::parse("2020-25-07").unwrap();
        assert_eq!(d.month, "07");
        assert_eq!(d.day, "25");
        let ok = DateParts::parse("2020-11-30").unwrap();
        assert_eq!(ok.month, "11");
    }

    #[test]
    fn feat_title_appends_credit_once() {
        let t = sample_track();
        assert_eq!(t.feat_title(), "Song (Remix) (feat. Guest)");
        let mut already = sample_track();
        already.title = "Song (feat. Guest)".to_string();
        already.version = None;
        assert_eq!(already.feat_title(), "Song (feat. Guest)");
    }

    #[test]
    fn playlist_compilation_overrides_album() {
        let mut t = sample_track();
        let ctx = PlaylistContext {
            id: "77".to_string(),
            title: "My Mix".to_string(),
            owner: "me".to_string(),
            pic: None,
            pic_url: None,
            track_total: 12,
            explicit: false,
        };
        t.apply_playlist(&ctx, true);
        assert_eq!(t.album.title, "My Mix");
        assert_eq!(t.album.artist, VARIOUS_ARTISTS);
        assert_eq!(t.album.record_type, "compilation");
        assert_eq!(t.track_number, 5);
    }

    #[test]
    fn settings_remove_features_from_title() {
        let mut t = sample_track();
        t.title = "Song (feat. Guest)".to_string();
        let mut settings = Settings::default();
        settings.featured_to_title = FeaturedToTitle::RemoveFromTitle;
        t.apply_settings(&settings);
        assert_eq!(t.title, "Song");
    }

    #[test]
    fn settings_and_feat_separator() {
        let mut t = sample_track();
        let mut settings = Settings::default();
        settings.tags.multi_artist_separator = "and_feat".to_string();
        t.apply_settings(&settings);
        assert_eq!(t.artists_string, "Artist feat. Guest");
    }

    #[test]
    fn replay_gain_formula() {
        let gain = -7.2_f64;
        let formatted = format!("{:.6} dB", (gain + 18.4) * -1.0);
        assert_eq!(formatted, "-11.200000 dB");
    }
}
