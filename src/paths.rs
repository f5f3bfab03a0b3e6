use crate::api::Format;
use crate::config::Settings;
use crate::track::Track;
use crate::utils::sanitize_filename;
use std::path::PathBuf;

/// What kind of queue item a track belongs to; decides which filename
/// template and folder structure applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Single,
    Album,
    Playlist,
}

/// Resolved destination for one track.
#[derive(Debug, Clone)]
pub struct TrackPaths {
    /// Directory the audio file goes into (not yet created).
    pub directory: PathBuf,
    /// Filename without extension.
    pub filename: String,
    /// Directory the album/playlist cover belongs in.
    pub cover_dir: PathBuf,
    /// Directory for artist artwork, when an artist folder exists.
    pub artist_dir: Option<PathBuf>,
    /// Directory for errors.txt / searched.txt / playlist files.
    pub extras_dir: PathBuf,
}

fn bitrate_label(format: Format) -> &'static str {
    match format {
        Format::Flac => "FLAC",
        Format::Mp3_320 => "320",
        Format::Mp3_128 => "128",
        Format::Mp3Misc => "MISC",
        Format::Mp4Ra1 | Format::Mp4Ra2 | Format::Mp4Ra3 => "360",
    }
}

fn pad_number(n: u32, total: u32) -> String {
    let width = total.to_string().len().max(2);
    format!("{:0width$}", n, width = width)
}

/// Expands one template against a track. Unknown placeholders are left as-is.
pub fn expand_template(template: &str, track: &Track, settings: &Settings, format: Format) -> String {
    let date = track
        .date
        .as_ref()
        .map(|d| d.format(&settings.date_format))
        .unwrap_or_default();
    let year = track
        .date
        .as_ref()
        .map(|d| d.year.clone())
        .unwrap_or_default();

    let mut out = template.to_string();
    let pairs: Vec<(&str, String)> = vec![
        ("%title%", track.full_title()),
        ("%artist%", track.main_artist.name.clone()),
        ("%artists%", track.artists_string.clone()),
        ("%album%", track.album.title.clone()),
        ("%albumartist%", track.album.artist.clone()),
        ("%tracknumber%", pad_number(track.track_number, track.album.track_total)),
        ("%tracktotal%", track.album.track_total.to_string()),
        ("%discnumber%", track.disc_number.to_string()),
        ("%disctotal%", track.album.disc_total.to_string()),
        ("%year%", year),
        ("%date%", date),
        ("%isrc%", track.isrc.clone().unwrap_or_default()),
        ("%upc%", track.album.barcode.clone().unwrap_or_default()),
        ("%label%", track.album.label.clone().unwrap_or_default()),
        ("%genre%", track.album.genres.first().cloned().unwrap_or_default()),
        ("%explicit%", if track.explicit { "E".to_string() } else { String::new() }),
        ("%bitrate%", bitrate_label(format).to_string()),
        ("%artist_id%", track.main_artist.id.clone()),
        ("%album_id%", track.album.id.clone()),
        ("%track_id%", track.id.clone()),
        (
            "%position%",
            track
                .position
                .map(|p| {
                    let total = track
                        .playlist
                        .as_ref()
                        .map(|pl| pl.track_total)
                        .unwrap_or(track.album.track_total);
                    pad_number(p as u32, total)
                })
                .unwrap_or_default(),
        ),
        (
            "%playlist%",
            track
                .playlist
                .as_ref()
                .map(|p| p.title.clone())
                .unwrap_or_default(),
        ),
        (
            "%playlist_owner%",
            track
                .playlist
                .as_ref()
                .map(|p| p.owner.clone())
                .unwrap_or_default(),
        ),
    ];
    for (placeholder, value) in pairs {
        if out.contains(placeholder) {
            out = out.replace(placeholder, &sanitize_filename(&value, &settings.illegal_character_replacer));
        }
    }
    out.trim().to_string()
}

/// Works out the full destination layout for a track according to the folder
/// toggles. Collection tracks land under album/playlist folders; singles go
/// straight into the download location unless a single folder is requested.
pub fn track_paths(track: &Track, settings: &Settings, kind: ItemKind, format: Format) -> TrackPaths {
    let mut directory = settings.download_location.clone();
    let mut artist_dir = None;
    let mut album_folder = false;

    match kind {
        ItemKind::Playlist if !settings.tags.save_playlist_as_compilation => {
            if settings.create_playlist_folder {
                directory = directory.join(expand_template(
                    &settings.playlist_name_template,
                    track,
                    settings,
                    format,
                ));
            }
        }
        ItemKind::Single => {
            if settings.create_single_folder {
                if settings.create_artist_folder {
                    let dir = directory.join(expand_template(
                        &settings.artist_name_template,
                        track,
                        settings,
                        format,
                    ));
                    artist_dir = Some(dir.clone());
                    directory = dir;
                }
                directory = directory.join(expand_template(
                    &settings.album_name_template,
                    track,
                    settings,
                    format,
                ));
                album_folder = true;
            }
        }
        _ => {
            if settings.create_artist_folder {
                let dir = directory.join(expand_template(
                    &settings.artist_name_template,
                    track,
                    settings,
                    format,
                ));
                artist_dir = Some(dir.clone());
                directory = dir;
            }
            if settings.create_album_folder {
                directory = directory.join(expand_template(
                    &settings.album_name_template,
                    track,
                    settings,
                    format,
                ));
                album_folder = true;
            }
        }
    }

    let cover_dir = directory.clone();
    let extras_dir = directory.clone();

    // CD subfolders only make sense inside an album folder.
    if album_folder && settings.create_cd_folder && track.album.disc_total > 1 {
        directory = directory.join(format!("CD{}", track.disc_number));
    }

    let template = match kind {
        ItemKind::Single => &settings.trackname_template,
        ItemKind::Album => &settings.album_trackname_template,
        ItemKind::Playlist => &settings.playlist_trackname_template,
    };
    let mut filename = expand_template(template, track, settings, format);
    if filename.is_empty() {
        filename = expand_template("%artist% - %title%", track, settings, format);
    }

    TrackPaths {
        directory,
        filename,
        cover_dir,
        artist_dir,
        extras_dir,
    }
}

/// Filename (no extension) for the generated m3u8 playlist file.
pub fn playlist_filename(track: &Track, settings: &Settings, format: Format) -> String {
    let name = expand_template(&settings.playlist_filename_template, track, settings, format);
    if name.is_empty() {
        "playlist".to_string()
    } else {
        name
    }
}

/// Appends " (n)" before the extension until the name no longer collides.
pub fn keep_both_path(path: &std::path::Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("track")
        .to_string();
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let parent = path.parent().map(PathBuf::from).unwrap_or_default();
    let mut n = 1;
    loop {
        let candidate = parent.join(format!("{} ({}).{}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LyricsInfo;
    use crate::track::{DateParts, TrackAlbum, TrackArtist};
    use std::collections::HashMap;

    fn sample_track() -> Track {
        Track {
            id: "1".to_string(),
            title: "Song".to_string(),
            version: None,
            duration: 200,
            track_number: 3,
            disc_number: 1,
            position: Some(7),
            explicit: true,
            isrc: Some("ISRC1".to_string()),
            bpm: 0.0,
            replay_gain: None,
            copyright: None,
            lyrics: LyricsInfo::default(),
            date: DateParts::parse("2020-05-01"),
            main_artist: TrackArtist {
                id: "9".to_string(),
                name: "AC/DC".to_string(),
                pic: None,
            },
            artists: vec!["AC/DC".to_string()],
            artist_roles: HashMap::new(),
            artists_string: "AC/DC".to_string(),
            main_artists_string: "AC/DC".to_string(),
            feat_artists_string: None,
            album: TrackAlbum {
                id: "2".to_string(),
                title: "Album".to_string(),
                artist: "AC/DC".to_string(),
                artist_id: "9".to_string(),
                record_type: "album".to_string(),
                track_total: 120,
                disc_total: 2,
                ..TrackAlbum::default()
            },
            playlist: None,
            md5_origin: "aa".to_string(),
            media_version: "4".to_string(),
            fallback_id: "0".to_string(),
            filesizes: Default::default(),
            searched: false,
        }
    }

    #[test]
    fn template_expands_and_sanitizes() {
        let settings = Settings::default();
        let t = sample_track();
        let out = expand_template("%artist% - %title%", &t, &settings, Format::Mp3_320);
        assert_eq!(out, "AC_DC - Song");
    }

    #[test]
    fn track_number_pads_to_total_width() {
        let settings = Settings::default();
        let t = sample_track();
        // 120 tracks means three digits.
        let out = expand_template("%tracknumber%", &t, &settings, Format::Mp3_320);
        assert_eq!(out, "003");
    }

    #[test]
    fn album_layout_nests_cd_folder() {
        let mut settings = Settings::default();
        settings.download_location = PathBuf::from("/music");
        let t = sample_track();
        let paths = track_paths(&t, &settings, ItemKind::Album, Format::Flac);
        assert_eq!(paths.directory, PathBuf::from("/music/AC_DC - Album/CD1"));
        assert_eq!(paths.cover_dir, PathBuf::from("/music/AC_DC - Album"));
        assert_eq!(paths.filename, "003 - Song");
    }

    #[test]
    fn single_goes_to_download_root_by_default() {
        let mut settings = Settings::default();
        settings.download_location = PathBuf::from("/music");
        let t = sample_track();
        let paths = track_paths(&t, &settings, ItemKind::Single, Format::Mp3_320);
        assert_eq!(paths.directory, PathBuf::from("/music"));
        assert_eq!(paths.filename, "AC_DC - Song");
    }

    #[test]
    fn single_with_folders_nests_like_an_album() {
        let mut settings = Settings::default();
        settings.download_location = PathBuf::from("/music");
        settings.create_single_folder = true;
        let t = sample_track();
        let paths = track_paths(&t, &settings, ItemKind::Single, Format::Mp3_320);
        assert_eq!(paths.directory, PathBuf::from("/music/AC_DC - Album/CD1"));
    }
}
