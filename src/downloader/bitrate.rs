use super::DownloadError;
use crate::api::{CatalogApi, Format};
use crate::track::Track;

/// Immersive tier first, then lossless down to the lowest MP3. Used when no
/// fallback is allowed, so an exact match at any tier can still be found.
const ALL_FORMATS: [Format; 6] = [
    Format::Mp4Ra3,
    Format::Mp4Ra2,
    Format::Mp4Ra1,
    Format::Flac,
    Format::Mp3_320,
    Format::Mp3_128,
];
const IMMERSIVE_FORMATS: [Format; 3] = [Format::Mp4Ra3, Format::Mp4Ra2, Format::Mp4Ra1];
const STANDARD_FORMATS: [Format; 3] = [Format::Flac, Format::Mp3_320, Format::Mp3_128];

/// Picks the best available format at or below the requested bitrate code.
///
/// Cached filesizes decide availability where known; formats reported as zero
/// but never probed get one availability check against their stream URL.
/// With fallback disabled the first miss is final. An immersive request never
/// degrades to the standard tier; a standard request that misses everything
/// settles on the legacy MP3 format the server always serves.
pub async fn preferred_format(
    catalog: &dyn CatalogApi,
    track: &mut Track,
    requested: u32,
    allow_fallback: bool,
) -> Result<Format, DownloadError> {
    let immersive_request = Format::from_code(requested)
        .map(Format::is_immersive)
        .unwrap_or(false);

    let candidates: &[Format] = if !allow_fallback {
        &ALL_FORMATS
    } else if immersive_request {
        &IMMERSIVE_FORMATS
    } else {
        &STANDARD_FORMATS
    };

    for &format in candidates {
        if format.code() > requested {
            continue;
        }
        match track.filesizes.get(format) {
            Some(entry) if entry.size != 0 => return Ok(format),
            Some(entry) if !entry.tested => {
                let url = catalog.stream_url(
                    &track.id,
                    &track.md5_origin,
                    &track.media_version,
                    format,
                );
                match catalog.probe(&url).await {
                    Ok(true) => {
                        // Remember the probe result either way.
                        track.filesizes.set(format, 1);
                        return Ok(format);
                    }
                    _ => track.filesizes.mark_unavailable(format),
                }
            }
            Some(_) => {}
            // No filesize report at all: assume the server has it.
            None => return Ok(format),
        }
        if !allow_fallback {
            return Err(DownloadError::WrongBitrate);
        }
    }

    if !allow_fallback {
        Err(DownloadError::WrongBitrate)
    } else if immersive_request {
        Err(DownloadError::NoImmersive)
    } else {
        Ok(Format::Mp3Misc)
    }
}
