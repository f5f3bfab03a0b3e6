use crate::api::{
    AlbumInfo, ArtistInfo, CatalogApi, Contributor, FilesizeEntry, Format, GwTrack, LyricsInfo,
    PlaylistInfo, TrackDetails, TrackFilesizes,
};
use crate::config::SessionSettings;
use crate::errors::{AppError, Result};
use md5::{Digest, Md5};
use moka::future::Cache;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP client for the public catalog API and the authenticated gateway.
pub struct HttpCatalog {
    client: Client,
    session: SessionSettings,
    user_id: std::sync::RwLock<String>,
    album_cache: Cache<String, AlbumInfo>,
}

impl HttpCatalog {
    pub fn new(session: SessionSettings, proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true);

        if let Some(proxy_url) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            session,
            user_id: std::sync::RwLock::new(String::new()),
            album_cache: Cache::new(256),
        })
    }

    /// Verifies the session token against the gateway and learns the user id
    /// behind it. Returns false when the token is missing or rejected.
    pub async fn login(&self) -> Result<bool> {
        if self.session.session_token.is_empty() {
            return Ok(false);
        }
        let v = self.gw_call("user.getData", json!({})).await?;
        let id = string_of(&v["USER"]["USER_ID"]);
        if id.is_empty() || id == "0" {
            return Ok(false);
        }
        if let Ok(mut user_id) = self.user_id.write() {
            *user_id = id;
        }
        Ok(true)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn api_call(&self, path: &str) -> Result<Value> {
        let url = format!("{}/{}", self.session.api_base, path);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Api(format!("HTTP {} for {}", response.status(), path)));
        }
        let json: Value = response.json().await?;
        if let Some(error) = json.get("error") {
            let kind = error["type"].as_str().unwrap_or("APIError");
            let message = error["message"].as_str().unwrap_or("unknown error");
            return Err(AppError::Api(format!("{}: {}", kind, message)));
        }
        Ok(json)
    }

    async fn gw_call(&self, method: &str, args: Value) -> Result<Value> {
        let response = self
            .client
            .post(&self.session.gw_base)
            .query(&[("method", method), ("api_version", "1.0")])
            .header("Cookie", format!("sid={}", self.session.session_token))
            .json(&args)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Gateway(format!("HTTP {} for {}", response.status(), method)));
        }
        let json: Value = response.json().await?;
        if let Some(error) = json.get("error") {
            if error.is_object() && !error.as_object().unwrap().is_empty() {
                if let Some(data_error) = error.get("DATA_ERROR") {
                    return Err(AppError::Gateway(format!(
                        "{}",
                        data_error.as_str().unwrap_or("data error")
                    )));
                }
                return Err(AppError::Gateway(error.to_string()));
            }
        }
        Ok(json["results"].clone())
    }

    fn parse_gw_track(v: &Value) -> GwTrack {
        GwTrack {
            id: string_of(&v["SNG_ID"]),
            title: v["SNG_TITLE"].as_str().unwrap_or("").to_string(),
            version: v["VERSION"].as_str().filter(|s| !s.is_empty()).map(String::from),
            artist_id: string_of(&v["ART_ID"]),
            artist: v["ART_NAME"].as_str().unwrap_or("").to_string(),
            artist_pic: v["ART_PICTURE"].as_str().map(String::from),
            album_id: string_of(&v["ALB_ID"]),
            album_title: v["ALB_TITLE"].as_str().unwrap_or("").to_string(),
            album_pic: v["ALB_PICTURE"].as_str().map(String::from),
            md5_origin: v["MD5_ORIGIN"].as_str().unwrap_or("").to_string(),
            media_version: string_of(&v["MEDIA_VERSION"]),
            fallback_id: v["FALLBACK"]["SNG_ID"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| "0".to_string()),
            duration: v["DURATION"]
                .as_u64()
                .or_else(|| v["DURATION"].as_str().and_then(|s| s.parse().ok()))
                .unwrap_or(0),
            track_number: number_of(&v["TRACK_NUMBER"]),
            disc_number: number_of(&v["DISK_NUMBER"]),
            position: None,
            explicit: matches!(
                v["EXPLICIT_TRACK_CONTENT"]["EXPLICIT_LYRICS_STATUS"].as_u64(),
                Some(1) | Some(4)
            ) || v["EXPLICIT_LYRICS"].as_str() == Some("1"),
            isrc: v["ISRC"].as_str().map(String::from),
            gain: v["GAIN"]
                .as_f64()
                .or_else(|| v["GAIN"].as_str().and_then(|s| s.parse().ok())),
            release_date: v["PHYSICAL_RELEASE_DATE"].as_str().map(String::from),
            lyrics_id: v["LYRICS_ID"].as_i64().unwrap_or(0),
            copyright: v["COPYRIGHT"].as_str().map(String::from),
        }
    }

    fn parse_album(v: &Value) -> AlbumInfo {
        let contributors = v["contributors"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|c| Contributor {
                        id: string_of(&c["id"]),
                        name: c["name"].as_str().unwrap_or("").to_string(),
                        role: c["role"].as_str().unwrap_or("Main").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let genres = v["genres"]["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|g| g["name"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        AlbumInfo {
            id: string_of(&v["id"]),
            title: v["title"].as_str().unwrap_or("").to_string(),
            artist_id: string_of(&v["artist"]["id"]),
            artist_name: v["artist"]["name"].as_str().unwrap_or("").to_string(),
            artist_pic: pic_hash(v["artist"]["picture_small"].as_str(), "artist/"),
            pic: pic_hash(v["cover_small"].as_str(), "cover/"),
            track_total: v["nb_tracks"].as_u64().unwrap_or(0) as u32,
            disc_total: v["nb_disk"].as_u64().unwrap_or(0) as u32,
            record_type: v["record_type"].as_str().unwrap_or("album").to_string(),
            barcode: v["upc"].as_str().map(String::from),
            label: v["label"].as_str().map(String::from),
            explicit: v["explicit_lyrics"].as_bool().unwrap_or(false),
            release_date: v["release_date"].as_str().map(String::from),
            genres,
            copyright: v["copyright"].as_str().map(String::from),
            contributors,
        }
    }
}

/// Extracts the CDN picture hash out of a full image URL.
fn pic_hash(url: Option<&str>, marker: &str) -> Option<String> {
    let url = url?;
    let start = url.find(marker)? + marker.len();
    let rest = &url[start..];
    let end = rest.find('/')?;
    Some(rest[..end].to_string())
}

fn string_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn number_of(v: &Value) -> Option<u32> {
    v.as_u64()
        .map(|n| n as u32)
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

#[async_trait::async_trait]
impl CatalogApi for HttpCatalog {
    fn logged_in(&self) -> bool {
        !self.session.session_token.is_empty()
    }

    fn user_id(&self) -> String {
        self.user_id.read().map(|id| id.clone()).unwrap_or_default()
    }

    async fn track(&self, id: &str) -> Result<TrackDetails> {
        let v = self.api_call(&format!("track/{}", id)).await?;
        let contributors = v["contributors"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|c| Contributor {
                        id: string_of(&c["id"]),
                        name: c["name"].as_str().unwrap_or("").to_string(),
                        role: c["role"].as_str().unwrap_or("Main").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(TrackDetails {
            id: string_of(&v["id"]),
            title: v["title"].as_str().unwrap_or("").to_string(),
            bpm: v["bpm"].as_f64().unwrap_or(0.0),
            gain: v["gain"].as_f64(),
            disc_number: v["disk_number"].as_u64().map(|n| n as u32),
            explicit: v["explicit_lyrics"].as_bool().unwrap_or(false),
            contributors,
        })
    }

    async fn track_by_isrc(&self, isrc: &str) -> Result<GwTrack> {
        let v = self.api_call(&format!("track/isrc:{}", isrc)).await?;
        let id = string_of(&v["id"]);
        if id.is_empty() {
            return Err(AppError::NotFound(format!("ISRC {}", isrc)));
        }
        self.track_gw(&id).await
    }

    async fn track_gw(&self, id: &str) -> Result<GwTrack> {
        let v = self.gw_call("song.getData", json!({ "SNG_ID": id })).await?;
        Ok(Self::parse_gw_track(&v))
    }

    async fn album(&self, id: &str) -> Result<AlbumInfo> {
        if let Some(cached) = self.album_cache.get(id).await {
            return Ok(cached);
        }
        let v = self.api_call(&format!("album/{}", id)).await?;
        let album = Self::parse_album(&v);
        self.album_cache.insert(id.to_string(), album.clone()).await;
        Ok(album)
    }

    async fn album_by_upc(&self, upc: &str) -> Result<AlbumInfo> {
        let v = self.api_call(&format!("album/upc:{}", upc)).await?;
        let album = Self::parse_album(&v);
        if album.id.is_empty() {
            return Err(AppError::NotFound(format!("UPC {}", upc)));
        }
        Ok(album)
    }

    async fn album_gw(&self, id: &str) -> Result<AlbumInfo> {
        let v = self.gw_call("album.getData", json!({ "ALB_ID": id })).await?;
        Ok(AlbumInfo {
            id: string_of(&v["ALB_ID"]),
            title: v["ALB_TITLE"].as_str().unwrap_or("").to_string(),
            artist_id: string_of(&v["ART_ID"]),
            artist_name: v["ART_NAME"].as_str().unwrap_or("").to_string(),
            artist_pic: None,
            pic: v["ALB_PICTURE"].as_str().map(String::from),
            track_total: v["NUMBER_TRACK"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| v["NUMBER_TRACK"].as_u64().map(|n| n as u32))
                .unwrap_or(0),
            disc_total: v["NUMBER_DISK"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| v["NUMBER_DISK"].as_u64().map(|n| n as u32))
                .unwrap_or(0),
            record_type: "album".to_string(),
            barcode: None,
            label: v["LABEL_NAME"].as_str().map(String::from),
            explicit: matches!(
                v["EXPLICIT_ALBUM_CONTENT"]["EXPLICIT_LYRICS_STATUS"].as_u64(),
                Some(1) | Some(4)
            ),
            release_date: v["PHYSICAL_RELEASE_DATE"].as_str().map(String::from),
            genres: Vec::new(),
            copyright: v["COPYRIGHT"].as_str().map(String::from),
            contributors: Vec::new(),
        })
    }

    async fn album_tracks_gw(&self, id: &str) -> Result<Vec<GwTrack>> {
        let v = self
            .gw_call("song.getListByAlbum", json!({ "ALB_ID": id, "NB": 500 }))
            .await?;
        Ok(v["data"]
            .as_array()
            .map(|arr| arr.iter().map(Self::parse_gw_track).collect())
            .unwrap_or_default())
    }

    async fn playlist(&self, id: &str) -> Result<PlaylistInfo> {
        let v = self.api_call(&format!("playlist/{}", id)).await?;
        Ok(PlaylistInfo {
            id: string_of(&v["id"]),
            title: v["title"].as_str().unwrap_or("").to_string(),
            public: v["public"].as_bool().unwrap_or(false),
            creator_id: string_of(&v["creator"]["id"]),
            creator_name: v["creator"]["name"].as_str().unwrap_or("").to_string(),
            pic: pic_hash(v["picture_small"].as_str(), "playlist/"),
            pic_url: v["picture_xl"].as_str().map(String::from),
            track_total: v["nb_tracks"].as_u64().unwrap_or(0) as u32,
            creation_date: v["creation_date"].as_str().map(String::from),
            explicit: false,
        })
    }

    async fn playlist_tracks_gw(&self, id: &str) -> Result<Vec<GwTrack>> {
        let v = self
            .gw_call(
                "playlist.getSongs",
                json!({ "PLAYLIST_ID": id, "NB": 2000, "START": 0 }),
            )
            .await?;
        Ok(v["data"]
            .as_array()
            .map(|arr| arr.iter().map(Self::parse_gw_track).collect())
            .unwrap_or_default())
    }

    async fn artist(&self, id: &str) -> Result<ArtistInfo> {
        let v = self.api_call(&format!("artist/{}", id)).await?;
        Ok(ArtistInfo {
            id: string_of(&v["id"]),
            name: v["name"].as_str().unwrap_or("").to_string(),
            pic: pic_hash(v["picture_small"].as_str(), "artist/"),
        })
    }

    async fn artist_albums(&self, id: &str) -> Result<Vec<String>> {
        let v = self.api_call(&format!("artist/{}/albums?limit=200", id)).await?;
        Ok(v["data"]
            .as_array()
            .map(|arr| arr.iter().map(|a| string_of(&a["id"])).collect())
            .unwrap_or_default())
    }

    async fn artist_discography(&self, id: &str) -> Result<Vec<String>> {
        let v = self
            .gw_call(
                "album.getDiscography",
                json!({ "ART_ID": id, "NB": 100, "START": 0 }),
            )
            .await?;
        Ok(v["data"]
            .as_array()
            .map(|arr| arr.iter().map(|a| string_of(&a["ALB_ID"])).collect())
            .unwrap_or_default())
    }

    async fn artist_top_gw(&self, id: &str) -> Result<Vec<GwTrack>> {
        let v = self
            .gw_call("artist.getTopTrack", json!({ "ART_ID": id, "NB": 100 }))
            .await?;
        Ok(v["data"]
            .as_array()
            .map(|arr| arr.iter().map(Self::parse_gw_track).collect())
            .unwrap_or_default())
    }

    async fn track_filesizes(&self, id: &str) -> Result<TrackFilesizes> {
        let v = self.gw_call("song.getData", json!({ "SNG_ID": id })).await?;
        let mut sizes = TrackFilesizes::default();
        for (key, format) in [
            ("FILESIZE_MP3_128", Format::Mp3_128),
            ("FILESIZE_MP3_320", Format::Mp3_320),
            ("FILESIZE_MP3_MISC", Format::Mp3Misc),
            ("FILESIZE_FLAC", Format::Flac),
            ("FILESIZE_MP4_RA1", Format::Mp4Ra1),
            ("FILESIZE_MP4_RA2", Format::Mp4Ra2),
            ("FILESIZE_MP4_RA3", Format::Mp4Ra3),
        ] {
            let size = v[key]
                .as_u64()
                .or_else(|| v[key].as_str().and_then(|s| s.parse().ok()))
                .unwrap_or(0);
            sizes.0.insert(format.code(), FilesizeEntry { size, tested: false });
        }
        Ok(sizes)
    }

    async fn track_from_metadata(
        &self,
        artist: &str,
        title: &str,
        album: &str,
    ) -> Result<Option<String>> {
        let query = format!("artist:\"{}\" track:\"{}\" album:\"{}\"", artist, title, album);
        let v = self
            .api_call(&format!("search/track?q={}&limit=1", urlencoding::encode(&query)))
            .await?;
        let id = v["data"]
            .as_array()
            .and_then(|arr| arr.first())
            .map(|t| string_of(&t["id"]));
        Ok(id.filter(|s| !s.is_empty() && s != "0"))
    }

    async fn lyrics_gw(&self, id: &str) -> Result<LyricsInfo> {
        let v = self.gw_call("song.getLyrics", json!({ "SNG_ID": id })).await?;
        let unsync = v["LYRICS_TEXT"].as_str().map(String::from);
        let sync = v["LYRICS_SYNC_JSON"].as_array().map(|lines| {
            let mut out = String::new();
            let mut last_timestamp = String::new();
            for line in lines {
                match line["lrc_timestamp"].as_str() {
                    Some(ts) => {
                        out.push_str(ts);
                        last_timestamp = ts.to_string();
                    }
                    None => out.push_str(&last_timestamp),
                }
                out.push_str(line["line"].as_str().unwrap_or(""));
                out.push_str("\r\n");
            }
            out
        });
        Ok(LyricsInfo { unsync, sync })
    }

    fn stream_url(&self, id: &str, md5: &str, media_version: &str, format: Format) -> String {
        let payload = format!(
            "{}|{}|{}|{}|{}",
            md5,
            format.code(),
            id,
            media_version,
            self.session.stream_secret
        );
        let sig = hex::encode(Md5::digest(payload.as_bytes()));
        format!(
            "{}/{}/{}?fmt={}&mv={}&sig={}",
            self.session.media_base,
            &md5[..1.min(md5.len())],
            id,
            format.code(),
            media_version,
            sig
        )
    }

    async fn probe(&self, url: &str) -> Result<bool> {
        let response = self.client.head(url).send().await?;
        Ok(response.status().is_success())
    }
}

/// Builds a CDN cover URL for a picture hash at the given square size.
pub fn cover_url(cdn_base: &str, kind: &str, pic: &str, size: u32, png: bool, jpeg_quality: u32) -> String {
    let suffix = if png {
        "none-100-0-0.png".to_string()
    } else {
        format!("000000-{}-0-0.jpg", jpeg_quality)
    };
    format!("{}/{}/{}/{}x{}-{}", cdn_base, kind, pic, size, size, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pic_hash_extracts_segment() {
        let url = "https://cdn-images.example-music.com/images/cover/abc123def/56x56-000000-80-0-0.jpg";
        assert_eq!(pic_hash(Some(url), "cover/"), Some("abc123def".to_string()));
        assert_eq!(pic_hash(None, "cover/"), None);
    }

    #[test]
    fn cover_url_shapes() {
        let url = cover_url("https://cdn/images", "cover", "abc", 800, false, 80);
        assert_eq!(url, "https://cdn/images/cover/abc/800x800-000000-80-0-0.jpg");
        let png = cover_url("https://cdn/images", "cover", "abc", 800, true, 80);
        assert!(png.ends_with("none-100-0-0.png"));
    }

    #[test]
    fn gw_track_parses_strings_and_numbers() {
        let v = json!({
            "SNG_ID": "123",
            "SNG_TITLE": "Song",
            "VERSION": "(Remix)",
            "ART_ID": 42,
            "ART_NAME": "Artist",
            "ALB_ID": "7",
            "ALB_TITLE": "Album",
            "MD5_ORIGIN": "aabbcc",
            "MEDIA_VERSION": "4",
            "DURATION": "215",
            "TRACK_NUMBER": "3",
            "FALLBACK": { "SNG_ID": "456" },
            "EXPLICIT_TRACK_CONTENT": { "EXPLICIT_LYRICS_STATUS": 1 }
        });
        let t = HttpCatalog::parse_gw_track(&v);
        assert_eq!(t.id, "123");
        assert_eq!(t.artist_id, "42");
        assert_eq!(t.duration, 215);
        assert_eq!(t.fallback_id, "456");
        assert!(t.explicit);
        assert_eq!(t.full_title(), "Song (Remix)");
    }
}
