mod flac;
mod mp3;

use crate::config::Settings;
use crate::errors::{AppError, Result};
use crate::track::Track;
use std::path::Path;

/// Embedded artwork bytes plus the format they were fetched in.
pub struct CoverData {
    pub data: Vec<u8>,
    pub png: bool,
}

/// Writes tags into a finished download, picking the writer by extension.
pub fn tag_track(path: &Path, track: &Track, settings: &Settings, cover: Option<&CoverData>) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp3") => mp3::write_tags(path, track, settings, cover),
        Some("flac") => flac::write_tags(path, track, settings, cover),
        // Immersive audio containers carry their metadata in-band.
        Some("mp4") => Ok(()),
        other => Err(AppError::Tagging(format!(
            "no tag writer for extension {:?}",
            other
        ))),
    }
}

/// True when the error means the FLAC stream marker is missing, i.e. the
/// server delivered something that is not actually a FLAC file.
pub fn is_missing_flac_header(err: &AppError) -> bool {
    matches!(err, AppError::Tagging(msg) if msg.contains("FLAC stream marker"))
}

pub(crate) fn involved_people_pairs(track: &Track) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (role, names) in &track.artist_roles {
        if role == "Main" || role == "Featured" {
            continue;
        }
        for name in names {
            pairs.push((role.clone(), name.clone()));
        }
    }
    pairs.sort();
    pairs
}
