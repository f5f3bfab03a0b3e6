pub mod item;
pub mod manager;
pub mod resolver;

use thiserror::Error;

/// Why a link could not be turned into a queue item. Codes are stable
/// identifiers for frontends; messages are for humans.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("URL not supported yet: {0}")]
    UnsupportedUrl(String),
    #[error("You can't download others private playlists.")]
    NotYourPrivatePlaylist,
    #[error("Spotify support is not configured.")]
    SpotifyDisabled,
    #[error("Track not found on the service!")]
    TrackNotFound,
    #[error("Track with this ISRC not found on the service!")]
    IsrcNotFound,
    #[error("Album not found!")]
    AlbumNotFound,
    #[error("Album with this barcode not found!")]
    UpcNotFound,
    #[error("Artist not found!")]
    ArtistNotFound,
    #[error("Playlist not found!")]
    PlaylistNotFound,
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::InvalidUrl(_) => "invalidURL",
            QueueError::UnsupportedUrl(_) => "unsupportedURL",
            QueueError::NotYourPrivatePlaylist => "notYourPrivatePlaylist",
            QueueError::SpotifyDisabled => "spotifyDisabled",
            QueueError::TrackNotFound => "trackNotFound",
            QueueError::IsrcNotFound => "isrcNotFound",
            QueueError::AlbumNotFound => "albumNotFound",
            QueueError::UpcNotFound => "upcNotFound",
            QueueError::ArtistNotFound => "artistNotFound",
            QueueError::PlaylistNotFound => "playlistNotFound",
        }
    }
}
