use super::{involved_people_pairs, CoverData};
use crate::config::Settings;
use crate::errors::{AppError, Result};
use crate::track::Track;
use id3::frame::{Comment, ExtendedText, Lyrics, Picture, PictureType, SynchronisedLyrics};
use id3::{Content, Frame, Tag, TagLike, Timestamp, Version};
use std::path::Path;

fn artists_value(track: &Track, settings: &Settings) -> String {
    if settings.tags.use_null_separator {
        track.artists.join("\0")
    } else {
        track.artists_string.clone()
    }
}

pub fn write_tags(path: &Path, track: &Track, settings: &Settings, cover: Option<&CoverData>) -> Result<()> {
    let tags = &settings.tags;
    let mut tag = Tag::new();

    if tags.title {
        tag.set_title(track.full_title());
    }
    if tags.artist {
        tag.set_artist(artists_value(track, settings));
    }
    if tags.album {
        tag.set_album(&track.album.title);
    }
    if tags.album_artist {
        let value = if tags.single_album_artist {
            track.main_artist.name.clone()
        } else {
            track.album.artist.clone()
        };
        tag.set_album_artist(value);
    }
    if tags.track_number {
        tag.set_track(track.track_number);
    }
    if tags.track_total {
        tag.set_total_tracks(track.album.track_total);
    }
    if tags.disc_number {
        tag.set_disc(track.disc_number);
    }
    if tags.disc_total {
        tag.set_total_discs(track.album.disc_total);
    }
    if tags.genre {
        if let Some(genre) = track.album.genres.first() {
            tag.set_genre(genre.as_str());
        }
    }
    if let Some(date) = &track.date {
        if tags.year {
            if let Ok(year) = date.year.parse::<i32>() {
                tag.set_year(year);
            }
        }
        if tags.date {
            let stamp = format!("{}-{}-{}", date.year, date.month, date.day);
            if let Ok(ts) = stamp.parse::<Timestamp>() {
                tag.set_date_recorded(ts);
            }
        }
    }
    if tags.length {
        tag.set_duration((track.duration * 1000) as u32);
    }
    if tags.bpm && track.bpm > 0.0 {
        tag.set_text("TBPM", format!("{}", track.bpm.round() as u32));
    }
    if tags.isrc {
        if let Some(isrc) = &track.isrc {
            tag.set_text("TSRC", isrc);
        }
    }
    if tags.label {
        if let Some(label) = &track.album.label {
            tag.set_text("TPUB", label);
        }
    }
    if tags.copyright {
        if let Some(copyright) = &track.copyright {
            tag.set_text("TCOP", copyright);
        }
    }
    if tags.composer {
        if let Some(composers) = track.artist_roles.get("Composer") {
            tag.set_text("TCOM", composers.join(", "));
        }
    }
    if tags.explicit {
        tag.add_frame(Frame::with_content(
            "TXXX",
            Content::ExtendedText(ExtendedText {
                description: "ITUNESADVISORY".to_string(),
                value: if track.explicit { "1" } else { "0" }.to_string(),
            }),
        ));
    }
    if tags.barcode {
        if let Some(barcode) = &track.album.barcode {
            tag.add_frame(Frame::with_content(
                "TXXX",
                Content::ExtendedText(ExtendedText {
                    description: "BARCODE".to_string(),
                    value: barcode.clone(),
                }),
            ));
        }
    }
    if tags.replay_gain {
        if let Some(gain) = &track.replay_gain {
            tag.add_frame(Frame::with_content(
                "TXXX",
                Content::ExtendedText(ExtendedText {
                    description: "REPLAYGAIN_TRACK_GAIN".to_string(),
                    value: gain.clone(),
                }),
            ));
        }
    }
    if tags.source {
        tag.add_frame(Frame::with_content(
            "TXXX",
            Content::ExtendedText(ExtendedText {
                description: "SOURCEID".to_string(),
                value: track.id.clone(),
            }),
        ));
    }
    if tags.involved_people {
        let pairs = involved_people_pairs(track);
        if !pairs.is_empty() {
            let value = pairs
                .iter()
                .flat_map(|(role, name)| [role.clone(), name.clone()])
                .collect::<Vec<_>>()
                .join("\0");
            tag.set_text("TIPL", value);
        }
    }
    if tags.save_playlist_as_compilation && track.album.record_type == "compilation" {
        tag.set_text("TCMP", "1");
    }
    if tags.lyrics {
        if let Some(text) = &track.lyrics.unsync {
            tag.add_frame(Lyrics {
                lang: "eng".to_string(),
                description: String::new(),
                text: text.clone(),
            });
        }
        if settings.sync_lyrics {
            if let Some(sync) = &track.lyrics.sync {
                if let Some(lyrics) = parse_lrc(sync) {
                    tag.add_frame(lyrics);
                }
            }
        }
    }
    if tags.cover {
        if let Some(cover) = cover {
            tag.add_frame(Picture {
                mime_type: if cover.png { "image/png" } else { "image/jpeg" }.to_string(),
                picture_type: PictureType::CoverFront,
                description: "cover".to_string(),
                data: cover.data.clone(),
            });
        }
    }
    if let Some(playlist) = &track.playlist {
        if tags.source {
            tag.add_frame(Comment {
                lang: "eng".to_string(),
                description: "PLAYLIST".to_string(),
                text: playlist.title.clone(),
            });
        }
    }

    tag.write_to_path(path, Version::Id3v24)
        .map_err(|e| AppError::Tagging(format!("ID3 write failed: {}", e)))?;
    Ok(())
}

/// Converts LRC-style "[mm:ss.xx]line" text into a synchronised lyrics frame.
fn parse_lrc(text: &str) -> Option<SynchronisedLyrics> {
    use id3::frame::{SynchronisedLyricsType, TimestampFormat};

    let mut content = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        let rest = line.strip_prefix('[')?;
        let close = rest.find(']')?;
        let (stamp, words) = rest.split_at(close);
        let words = &words[1..];
        let mut parts = stamp.split(':');
        let minutes: u32 = parts.next()?.parse().ok()?;
        let seconds: f64 = parts.next()?.parse().ok()?;
        let ms = (minutes as f64 * 60.0 + seconds) * 1000.0;
        content.push((ms as u32, words.to_string()));
    }
    if content.is_empty() {
        return None;
    }
    Some(SynchronisedLyrics {
        lang: "eng".to_string(),
        timestamp_format: TimestampFormat::Ms,
        content_type: SynchronisedLyricsType::Lyrics,
        description: String::new(),
        content,
    })
}
