use super::{involved_people_pairs, CoverData};
use crate::config::Settings;
use crate::errors::{AppError, Result};
use crate::track::Track;
use lofty::config::WriteOptions;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::tag::{ItemKey, ItemValue, Tag, TagExt, TagItem, TagType};
use std::io::Read;
use std::path::Path;

/// Verifies the file actually starts with the FLAC stream marker. The server
/// sometimes serves a decoy payload for unavailable lossless tracks; catching
/// it here lets the pipeline retry at a lower bitrate.
fn check_stream_marker(path: &Path) -> Result<()> {
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == b"fLaC" => Ok(()),
        _ => Err(AppError::Tagging(
            "FLAC stream marker missing from downloaded file".to_string(),
        )),
    }
}

pub fn write_tags(path: &Path, track: &Track, settings: &Settings, cover: Option<&CoverData>) -> Result<()> {
    check_stream_marker(path)?;

    let tags = &settings.tags;
    let mut tag = Tag::new(TagType::VorbisComments);

    if tags.title {
        tag.insert_text(ItemKey::TrackTitle, track.full_title());
    }
    if tags.artist {
        if tags.use_null_separator {
            for artist in &track.artists {
                tag.push(TagItem::new(
                    ItemKey::TrackArtist,
                    ItemValue::Text(artist.clone()),
                ));
            }
        } else {
            tag.insert_text(ItemKey::TrackArtist, track.artists_string.clone());
        }
    }
    if tags.album {
        tag.insert_text(ItemKey::AlbumTitle, track.album.title.clone());
    }
    if tags.album_artist {
        let value = if tags.single_album_artist {
            track.main_artist.name.clone()
        } else {
            track.album.artist.clone()
        };
        tag.insert_text(ItemKey::AlbumArtist, value);
    }
    if tags.track_number {
        tag.insert_text(ItemKey::TrackNumber, track.track_number.to_string());
    }
    if tags.track_total {
        tag.insert_text(ItemKey::TrackTotal, track.album.track_total.to_string());
    }
    if tags.disc_number {
        tag.insert_text(ItemKey::DiscNumber, track.disc_number.to_string());
    }
    if tags.disc_total {
        tag.insert_text(ItemKey::DiscTotal, track.album.disc_total.to_string());
    }
    if tags.genre {
        if let Some(genre) = track.album.genres.first() {
            tag.insert_text(ItemKey::Genre, genre.clone());
        }
    }
    if let Some(date) = &track.date {
        if tags.year {
            tag.insert_text(ItemKey::Year, date.year.clone());
        }
        if tags.date {
            tag.insert_text(
                ItemKey::RecordingDate,
                format!("{}-{}-{}", date.year, date.month, date.day),
            );
        }
    }
    if tags.length {
        tag.insert_text(ItemKey::Length, (track.duration * 1000).to_string());
    }
    if tags.bpm && track.bpm > 0.0 {
        tag.insert_text(ItemKey::Bpm, (track.bpm.round() as u32).to_string());
    }
    if tags.isrc {
        if let Some(isrc) = &track.isrc {
            tag.insert_text(ItemKey::Isrc, isrc.clone());
        }
    }
    if tags.label {
        if let Some(label) = &track.album.label {
            tag.insert_text(ItemKey::Label, label.clone());
        }
    }
    if tags.copyright {
        if let Some(copyright) = &track.copyright {
            tag.insert_text(ItemKey::CopyrightMessage, copyright.clone());
        }
    }
    if tags.composer {
        if let Some(composers) = track.artist_roles.get("Composer") {
            tag.insert_text(ItemKey::Composer, composers.join(", "));
        }
    }
    if tags.explicit {
        tag.insert_text(
            ItemKey::ParentalAdvisory,
            if track.explicit { "1" } else { "0" }.to_string(),
        );
    }
    if tags.barcode {
        if let Some(barcode) = &track.album.barcode {
            tag.insert_text(ItemKey::Barcode, barcode.clone());
        }
    }
    if tags.replay_gain {
        if let Some(gain) = &track.replay_gain {
            tag.insert_text(ItemKey::ReplayGainTrackGain, gain.clone());
        }
    }
    if tags.involved_people {
        for (role, name) in involved_people_pairs(track) {
            tag.push(TagItem::new(
                ItemKey::Performer,
                ItemValue::Text(format!("{}: {}", role, name)),
            ));
        }
    }
    if tags.save_playlist_as_compilation && track.album.record_type == "compilation" {
        tag.insert_text(ItemKey::FlagCompilation, "1".to_string());
    }
    if tags.lyrics {
        let text = if settings.sync_lyrics {
            track.lyrics.sync.as_ref().or(track.lyrics.unsync.as_ref())
        } else {
            track.lyrics.unsync.as_ref()
        };
        if let Some(text) = text {
            tag.insert_text(ItemKey::Lyrics, text.clone());
        }
    }
    if tags.cover {
        if let Some(cover) = cover {
            let mime = if cover.png { MimeType::Png } else { MimeType::Jpeg };
            tag.push_picture(Picture::new_unchecked(
                PictureType::CoverFront,
                Some(mime),
                None,
                cover.data.clone(),
            ));
        }
    }

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| AppError::Tagging(format!("FLAC write failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tagger::is_missing_flac_header;
    use std::io::Write;

    #[test]
    fn marker_check_flags_non_flac_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.flac");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"<html>not audio</html>").unwrap();
        let err = check_stream_marker(&path).unwrap_err();
        assert!(is_missing_flac_header(&err));
    }

    #[test]
    fn marker_check_accepts_real_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.flac");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"fLaC\x00\x00\x00\x22").unwrap();
        assert!(check_stream_marker(&path).is_ok());
    }
}
