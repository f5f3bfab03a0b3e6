pub mod artwork;
pub mod bitrate;
pub mod job;
pub mod post;
pub mod stream;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed failures of the per-track pipeline. Each carries a stable code so
/// saved queues and frontends can tell the cases apart across versions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("Track not yet encoded!")]
    NotEncoded,
    #[error("Track not yet encoded and no alternative found!")]
    NotEncodedNoAlternative,
    #[error("Track not found at desired bitrate.")]
    WrongBitrate,
    #[error("Track not found at desired bitrate and no alternative found!")]
    WrongBitrateNoAlternative,
    #[error("Track is not available in 360 Reality Audio.")]
    NoImmersive,
    #[error("Track not available on the service!")]
    NotOnService,
    #[error("Track not available in your country!")]
    NotAvailable,
    #[error("Track not available in your country and no alternative found!")]
    NotAvailableNoAlternative,
    #[error("Downloaded stream is empty")]
    EmptyStream,
    /// A lossless download whose payload was not actually FLAC. Handled
    /// inside the pipeline by retrying at a lower bitrate.
    #[error("Downloaded file carries no FLAC stream marker")]
    FakeLossless,
    #[error("Download cancelled")]
    Cancelled,
    #[error("Could not write the downloaded file: {0}")]
    Write(String),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Tagging failed: {0}")]
    Tagging(String),
}

impl DownloadError {
    pub fn code(&self) -> &'static str {
        match self {
            DownloadError::NotEncoded => "notEncoded",
            DownloadError::NotEncodedNoAlternative => "notEncodedNoAlternative",
            DownloadError::WrongBitrate => "wrongBitrate",
            DownloadError::WrongBitrateNoAlternative => "wrongBitrateNoAlternative",
            DownloadError::NoImmersive => "no360RA",
            DownloadError::NotOnService => "notOnService",
            DownloadError::NotAvailable => "notAvailable",
            DownloadError::NotAvailableNoAlternative => "notAvailableNoAlternative",
            DownloadError::EmptyStream => "emptyStream",
            DownloadError::FakeLossless => "taggingFailed",
            DownloadError::Cancelled => "cancelled",
            DownloadError::Write(_) => "writeFailed",
            DownloadError::Connection(_) => "connectionFailed",
            DownloadError::Tagging(_) => "taggingFailed",
        }
    }

    /// The "...and no alternative found" variant, used once every fallback
    /// has been exhausted.
    pub fn without_alternative(self) -> DownloadError {
        match self {
            DownloadError::NotEncoded => DownloadError::NotEncodedNoAlternative,
            DownloadError::WrongBitrate => DownloadError::WrongBitrateNoAlternative,
            DownloadError::NotAvailable => DownloadError::NotAvailableNoAlternative,
            other => other,
        }
    }

    /// Whether another id for the same recording could still succeed.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            DownloadError::NotEncoded
                | DownloadError::WrongBitrate
                | DownloadError::NotAvailable
                | DownloadError::EmptyStream
        )
    }
}

/// A failed track as recorded on the queue item and surfaced to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackError {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub message: String,
    pub code: String,
}

pub use job::{DownloadJob, JobContext};
