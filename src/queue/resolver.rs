use super::item::{QueueContent, QueueItem};
use super::QueueError;
use crate::api::spotify::SpotifyBridge;
use crate::api::{catalog::cover_url, AlbumInfo, CatalogApi, GwTrack};
use crate::config::Settings;
use crate::events::{EventSink, QueueEvent};
use crate::track::PlaylistContext;
use regex::Regex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtistScope {
    /// Main releases only.
    Albums,
    /// Everything, singles and features included.
    Discography,
    /// Most streamed tracks as one collection.
    Top,
}

/// A recognized link, reduced to what the resolver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Track(String),
    TrackIsrc(String),
    Album(String),
    AlbumUpc(String),
    Playlist(String),
    Artist(String, ArtistScope),
    SpotifyTrack(String),
    SpotifyAlbum(String),
    SpotifyPlaylist(String),
}

/// Classifies a pasted link. Unknown hosts are invalid; known hosts with an
/// unrecognized path are unsupported.
pub fn parse_link(link: &str) -> Result<LinkKind, QueueError> {
    let link = link.trim();
    if link.is_empty() {
        return Err(QueueError::InvalidUrl(link.to_string()));
    }

    if link.contains("spotify") {
        let re = Regex::new(
            r"(?:open\.spotify\.com/(?:intl-[a-z]+/)?|spotify:)(track|album|playlist)[/:]([A-Za-z0-9]+)",
        )
        .unwrap();
        return match re.captures(link) {
            Some(caps) => {
                let id = caps[2].to_string();
                Ok(match &caps[1] {
                    "track" => LinkKind::SpotifyTrack(id),
                    "album" => LinkKind::SpotifyAlbum(id),
                    _ => LinkKind::SpotifyPlaylist(id),
                })
            }
            None => Err(QueueError::UnsupportedUrl(link.to_string())),
        };
    }

    let re = Regex::new(
        r"(?:^|/)(track|album|playlist|artist)/(isrc:[A-Za-z0-9]+|upc:[0-9]+|\d+)(/(top_track|discography))?",
    )
    .unwrap();
    let caps = re
        .captures(link)
        .ok_or_else(|| QueueError::InvalidUrl(link.to_string()))?;
    let id = caps[2].to_string();
    Ok(match &caps[1] {
        "track" => match id.strip_prefix("isrc:") {
            Some(isrc) => LinkKind::TrackIsrc(isrc.to_string()),
            None => LinkKind::Track(id),
        },
        "album" => match id.strip_prefix("upc:") {
            Some(upc) => LinkKind::AlbumUpc(upc.to_string()),
            None => LinkKind::Album(id),
        },
        "playlist" => LinkKind::Playlist(id),
        _ => {
            let scope = match caps.get(4).map(|m| m.as_str()) {
                Some("top_track") => ArtistScope::Top,
                Some("discography") => ArtistScope::Discography,
                _ => ArtistScope::Albums,
            };
            LinkKind::Artist(id, scope)
        }
    })
}

/// Turns links into queue items. Owns no state; all lookups go through the
/// catalog and bridge seams.
pub struct Resolver<'a> {
    pub catalog: &'a dyn CatalogApi,
    pub bridge: &'a dyn SpotifyBridge,
    pub events: &'a dyn EventSink,
}

impl Resolver<'_> {
    /// Resolves one link into queue items. Artist links expand into one item
    /// per release; everything else yields exactly one.
    pub async fn resolve(
        &self,
        link: &str,
        bitrate: u32,
        settings: Arc<Settings>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        match parse_link(link)? {
            LinkKind::Track(id) => {
                let gw = self
                    .catalog
                    .track_gw(&id)
                    .await
                    .map_err(|_| QueueError::TrackNotFound)?;
                Ok(vec![self.track_item(gw, bitrate, settings)])
            }
            LinkKind::TrackIsrc(isrc) => {
                let gw = self
                    .catalog
                    .track_by_isrc(&isrc)
                    .await
                    .map_err(|_| QueueError::IsrcNotFound)?;
                Ok(vec![self.track_item(gw, bitrate, settings)])
            }
            LinkKind::Album(id) => Ok(vec![self.album_item(&id, bitrate, settings).await?]),
            LinkKind::AlbumUpc(upc) => {
                let album = self
                    .catalog
                    .album_by_upc(&upc)
                    .await
                    .map_err(|_| QueueError::UpcNotFound)?;
                Ok(vec![self.album_item(&album.id, bitrate, settings).await?])
            }
            LinkKind::Playlist(id) => Ok(vec![self.playlist_item(&id, bitrate, settings).await?]),
            LinkKind::Artist(id, scope) => self.artist_items(&id, scope, bitrate, settings).await,
            LinkKind::SpotifyTrack(id) => {
                let gw = self.spotify_track(&id).await?;
                Ok(vec![self.track_item(gw, bitrate, settings)])
            }
            LinkKind::SpotifyAlbum(id) => {
                if !self.bridge.enabled() {
                    return Err(QueueError::SpotifyDisabled);
                }
                let upc = self
                    .bridge
                    .album_upc(&id)
                    .await
                    .map_err(|_| QueueError::AlbumNotFound)?
                    .ok_or(QueueError::UpcNotFound)?;
                let album = self
                    .catalog
                    .album_by_upc(&upc)
                    .await
                    .map_err(|_| QueueError::UpcNotFound)?;
                Ok(vec![self.album_item(&album.id, bitrate, settings).await?])
            }
            LinkKind::SpotifyPlaylist(id) => {
                if !self.bridge.enabled() {
                    return Err(QueueError::SpotifyDisabled);
                }
                let source = self
                    .bridge
                    .playlist(&id)
                    .await
                    .map_err(|_| QueueError::PlaylistNotFound)?;
                // The converted tracks still belong to a playlist: same
                // folder layout, templates and m3u8 as a native one.
                let context = PlaylistContext {
                    id: id.clone(),
                    title: source.title.clone(),
                    owner: source.owner.clone(),
                    pic: None,
                    pic_url: source.cover_url.clone(),
                    track_total: source.track_refs.len() as u32,
                    explicit: false,
                };
                let item = QueueItem::new(
                    "spotify_playlist",
                    &id,
                    bitrate,
                    source.title.clone(),
                    source.owner.clone(),
                    source.cover_url.clone(),
                    QueueContent::Convertible { source },
                    settings,
                )
                .with_playlist(context);
                Ok(vec![item])
            }
        }
    }

    fn cover_of(&self, settings: &Settings, kind: &str, pic: Option<&String>) -> Option<String> {
        pic.filter(|p| !p.is_empty()).map(|p| {
            cover_url(
                &settings.session.cdn_base,
                kind,
                p,
                256,
                false,
                settings.jpeg_image_quality,
            )
        })
    }

    fn track_item(&self, gw: GwTrack, bitrate: u32, settings: Arc<Settings>) -> QueueItem {
        let cover = self.cover_of(&settings, "cover", gw.album_pic.as_ref());
        QueueItem::new(
            "track",
            &gw.id.clone(),
            bitrate,
            gw.full_title(),
            gw.artist.clone(),
            cover,
            QueueContent::Single(gw),
            settings,
        )
    }

    async fn album_item(
        &self,
        id: &str,
        bitrate: u32,
        settings: Arc<Settings>,
    ) -> Result<QueueItem, QueueError> {
        let mut album: AlbumInfo = self
            .catalog
            .album(id)
            .await
            .map_err(|_| QueueError::AlbumNotFound)?;
        let mut tracks = self
            .catalog
            .album_tracks_gw(id)
            .await
            .map_err(|_| QueueError::AlbumNotFound)?;
        if tracks.is_empty() {
            return Err(QueueError::AlbumNotFound);
        }
        // The public listing caps the reported count; the track list is
        // authoritative.
        if tracks.len() as u32 != album.track_total {
            album.track_total = tracks.len() as u32;
        }
        if tracks.len() == 1 {
            let track = tracks.remove(0);
            return Ok(self.track_item(track, bitrate, settings));
        }
        for (i, track) in tracks.iter_mut().enumerate() {
            track.position = Some(i + 1);
        }
        let cover = self.cover_of(&settings, "cover", album.pic.as_ref());
        Ok(QueueItem::new(
            "album",
            id,
            bitrate,
            album.title.clone(),
            album.artist_name.clone(),
            cover,
            QueueContent::Collection(tracks),
            settings,
        )
        .with_album(album))
    }

    async fn playlist_item(
        &self,
        id: &str,
        bitrate: u32,
        settings: Arc<Settings>,
    ) -> Result<QueueItem, QueueError> {
        let playlist = self
            .catalog
            .playlist(id)
            .await
            .map_err(|_| QueueError::PlaylistNotFound)?;
        if !playlist.public && playlist.creator_id != self.catalog.user_id() {
            return Err(QueueError::NotYourPrivatePlaylist);
        }
        let mut tracks = self
            .catalog
            .playlist_tracks_gw(id)
            .await
            .map_err(|_| QueueError::PlaylistNotFound)?;
        for (i, track) in tracks.iter_mut().enumerate() {
            track.position = Some(i + 1);
        }
        let explicit = tracks.iter().any(|t| t.explicit);
        let context = PlaylistContext {
            id: playlist.id.clone(),
            title: playlist.title.clone(),
            owner: playlist.creator_name.clone(),
            pic: playlist.pic.clone(),
            pic_url: playlist.pic_url.clone(),
            track_total: tracks.len() as u32,
            explicit,
        };
        let cover = self.cover_of(&settings, "playlist", playlist.pic.as_ref());
        Ok(QueueItem::new(
            "playlist",
            id,
            bitrate,
            playlist.title.clone(),
            playlist.creator_name.clone(),
            cover,
            QueueContent::Collection(tracks),
            settings,
        )
        .with_playlist(context))
    }

    async fn artist_items(
        &self,
        id: &str,
        scope: ArtistScope,
        bitrate: u32,
        settings: Arc<Settings>,
    ) -> Result<Vec<QueueItem>, QueueError> {
        let artist = self
            .catalog
            .artist(id)
            .await
            .map_err(|_| QueueError::ArtistNotFound)?;
        self.events.send(QueueEvent::StartAddingArtist {
            id: artist.id.clone(),
            name: artist.name.clone(),
        });

        let items = match scope {
            ArtistScope::Top => {
                let mut tracks = self
                    .catalog
                    .artist_top_gw(id)
                    .await
                    .map_err(|_| QueueError::ArtistNotFound)?;
                for (i, track) in tracks.iter_mut().enumerate() {
                    track.position = Some(i + 1);
                }
                let context = PlaylistContext {
                    id: format!("artist_top_{}", id),
                    title: format!("{} - Top tracks", artist.name),
                    owner: artist.name.clone(),
                    pic: artist.pic.clone(),
                    pic_url: None,
                    track_total: tracks.len() as u32,
                    explicit: tracks.iter().any(|t| t.explicit),
                };
                let cover = self.cover_of(&settings, "artist", artist.pic.as_ref());
                vec![QueueItem::new(
                    "artist_top",
                    id,
                    bitrate,
                    context.title.clone(),
                    artist.name.clone(),
                    cover,
                    QueueContent::Collection(tracks),
                    settings,
                )
                .with_playlist(context)]
            }
            _ => {
                let album_ids = match scope {
                    ArtistScope::Discography => self.catalog.artist_discography(id).await,
                    _ => self.catalog.artist_albums(id).await,
                }
                .map_err(|_| QueueError::ArtistNotFound)?;
                let mut items = Vec::new();
                for album_id in album_ids {
                    match self.album_item(&album_id, bitrate, settings.clone()).await {
                        Ok(item) => items.push(item),
                        Err(e) => log::warn!("skipping release {}: {}", album_id, e),
                    }
                }
                items
            }
        };

        self.events.send(QueueEvent::FinishAddingArtist {
            id: artist.id,
            name: artist.name,
        });
        Ok(items)
    }

    /// Matches a foreign track against the native catalog: ISRC first, then
    /// a metadata search.
    async fn spotify_track(&self, id: &str) -> Result<GwTrack, QueueError> {
        if !self.bridge.enabled() {
            return Err(QueueError::SpotifyDisabled);
        }
        let track_ref = self
            .bridge
            .track_ref(id)
            .await
            .map_err(|_| QueueError::TrackNotFound)?;
        if let Some(isrc) = &track_ref.isrc {
            if let Ok(gw) = self.catalog.track_by_isrc(isrc).await {
                return Ok(gw);
            }
        }
        let found = self
            .catalog
            .track_from_metadata(&track_ref.artist, &track_ref.title, &track_ref.album)
            .await
            .map_err(|_| QueueError::TrackNotFound)?
            .ok_or(QueueError::TrackNotFound)?;
        self.catalog
            .track_gw(&found)
            .await
            .map_err(|_| QueueError::TrackNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_native_links() {
        assert_eq!(
            parse_link("https://www.example-music.com/en/track/3135556"),
            Ok(LinkKind::Track("3135556".to_string()))
        );
        assert_eq!(
            parse_link("https://www.example-music.com/album/302127"),
            Ok(LinkKind::Album("302127".to_string()))
        );
        assert_eq!(
            parse_link("https://www.example-music.com/artist/27/discography"),
            Ok(LinkKind::Artist("27".to_string(), ArtistScope::Discography))
        );
        assert_eq!(
            parse_link("https://www.example-music.com/artist/27/top_track"),
            Ok(LinkKind::Artist("27".to_string(), ArtistScope::Top))
        );
    }

    #[test]
    fn recognizes_isrc_and_upc_forms() {
        assert_eq!(
            parse_link("https://www.example-music.com/track/isrc:USSM12345678"),
            Ok(LinkKind::TrackIsrc("USSM12345678".to_string()))
        );
        assert_eq!(
            parse_link("https://www.example-music.com/album/upc:724384960650"),
            Ok(LinkKind::AlbumUpc("724384960650".to_string()))
        );
    }

    #[test]
    fn recognizes_foreign_links() {
        assert_eq!(
            parse_link("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"),
            Ok(LinkKind::SpotifyTrack("4uLU6hMCjMI75M1A2tKUQC".to_string()))
        );
        assert_eq!(
            parse_link("https://open.spotify.com/intl-de/playlist/37i9dQZF1DXcBWIGoYBM5M"),
            Ok(LinkKind::SpotifyPlaylist("37i9dQZF1DXcBWIGoYBM5M".to_string()))
        );
        assert_eq!(
            parse_link("spotify:album:6akEvsycLGftJxYudPjmqK"),
            Ok(LinkKind::SpotifyAlbum("6akEvsycLGftJxYudPjmqK".to_string()))
        );
    }

    #[test]
    fn rejects_garbage_and_unknown_paths() {
        assert!(matches!(
            parse_link("not a link"),
            Err(QueueError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_link("https://open.spotify.com/show/abcdef"),
            Err(QueueError::UnsupportedUrl(_))
        ));
        assert!(matches!(parse_link(""), Err(QueueError::InvalidUrl(_))));
    }
}
