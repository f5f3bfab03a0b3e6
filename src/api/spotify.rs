use crate::errors::{AppError, Result};
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;

const ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

/// A playlist pulled from the foreign service, kept as metadata only. Each
/// entry still has to be matched against the native catalog before download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyPlaylist {
    pub id: String,
    pub title: String,
    pub owner: String,
    pub cover_url: Option<String>,
    pub track_refs: Vec<SpotifyTrackRef>,
}

/// Enough metadata to find the same track on the native catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyTrackRef {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub isrc: Option<String>,
}

/// Bridge to the foreign streaming service. Behind a trait so the queue
/// resolver can be exercised without network access.
#[async_trait::async_trait]
pub trait SpotifyBridge: Send + Sync {
    fn enabled(&self) -> bool;
    /// ISRC (and fallback metadata) for a foreign track id.
    async fn track_ref(&self, id: &str) -> Result<SpotifyTrackRef>;
    /// UPC barcode for a foreign album id, if the album carries one.
    async fn album_upc(&self, id: &str) -> Result<Option<String>>;
    async fn playlist(&self, id: &str) -> Result<SpotifyPlaylist>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct TokenState {
    token: String,
    expires_at: std::time::Instant,
}

/// Client-credentials implementation against the public web API.
pub struct HttpSpotifyBridge {
    client: Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    token: Mutex<Option<TokenState>>,
}

impl HttpSpotifyBridge {
    pub fn new(client_id: Option<String>, client_secret: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(super::catalog::USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let (id, secret) = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => (id, secret),
            _ => {
                return Err(AppError::Spotify(
                    "Spotify support is not configured".to_string(),
                ))
            }
        };

        let mut guard = self.token.lock().await;
        if let Some(state) = guard.as_ref() {
            if state.expires_at > std::time::Instant::now() {
                return Ok(state.token.clone());
            }
        }

        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", id, secret));
        let response = self
            .client
            .post(ACCOUNTS_TOKEN_URL)
            .header("Authorization", format!("Basic {}", credentials))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Spotify(format!(
                "token request failed with HTTP {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await?;
        // Refresh a minute early to avoid racing the expiry.
        let expires_at = std::time::Instant::now()
            + Duration::from_secs(token.expires_in.saturating_sub(60).max(30));
        let value = token.access_token.clone();
        *guard = Some(TokenState {
            token: token.access_token,
            expires_at,
        });
        Ok(value)
    }

    async fn api_get(&self, path: &str) -> Result<Value> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/{}", API_BASE, path))
            .bearer_auth(token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("spotify resource {}", path)));
        }
        if !response.status().is_success() {
            return Err(AppError::Spotify(format!(
                "HTTP {} for {}",
                response.status(),
                path
            )));
        }
        Ok(response.json().await?)
    }

    fn parse_track_ref(v: &Value) -> SpotifyTrackRef {
        SpotifyTrackRef {
            artist: v["artists"][0]["name"].as_str().unwrap_or("").to_string(),
            title: v["name"].as_str().unwrap_or("").to_string(),
            album: v["album"]["name"].as_str().unwrap_or("").to_string(),
            isrc: v["external_ids"]["isrc"].as_str().map(String::from),
        }
    }
}

#[async_trait::async_trait]
impl SpotifyBridge for HttpSpotifyBridge {
    fn enabled(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }

    async fn track_ref(&self, id: &str) -> Result<SpotifyTrackRef> {
        let v = self.api_get(&format!("tracks/{}", id)).await?;
        Ok(Self::parse_track_ref(&v))
    }

    async fn album_upc(&self, id: &str) -> Result<Option<String>> {
        let v = self.api_get(&format!("albums/{}", id)).await?;
        Ok(v["external_ids"]["upc"].as_str().map(String::from))
    }

    async fn playlist(&self, id: &str) -> Result<SpotifyPlaylist> {
        let v = self.api_get(&format!("playlists/{}", id)).await?;
        let mut track_refs: Vec<SpotifyTrackRef> = v["tracks"]["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| !item["track"].is_null())
                    .map(|item| Self::parse_track_ref(&item["track"]))
                    .collect()
            })
            .unwrap_or_default();

        // The first page caps at 100 entries; follow the cursor for the rest.
        let mut next = v["tracks"]["next"].as_str().map(String::from);
        while let Some(next_url) = next {
            let path = next_url
                .strip_prefix(&format!("{}/", API_BASE))
                .unwrap_or(&next_url)
                .to_string();
            let page = self.api_get(&path).await?;
            if let Some(items) = page["items"].as_array() {
                track_refs.extend(
                    items
                        .iter()
                        .filter(|item| !item["track"].is_null())
                        .map(|item| Self::parse_track_ref(&item["track"])),
                );
            }
            next = page["next"].as_str().map(String::from);
        }

        Ok(SpotifyPlaylist {
            id: id.to_string(),
            title: v["name"].as_str().unwrap_or("").to_string(),
            owner: v["owner"]["display_name"].as_str().unwrap_or("").to_string(),
            cover_url: v["images"][0]["url"].as_str().map(String::from),
            track_refs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_track_ref_reads_isrc() {
        let v = json!({
            "name": "Song",
            "artists": [{ "name": "Artist" }],
            "album": { "name": "Album" },
            "external_ids": { "isrc": "USX9P1234567" }
        });
        let r = HttpSpotifyBridge::parse_track_ref(&v);
        assert_eq!(r.artist, "Artist");
        assert_eq!(r.isrc.as_deref(), Some("USX9P1234567"));
    }

    #[tokio::test]
    async fn unconfigured_bridge_reports_disabled() {
        let bridge = HttpSpotifyBridge::new(None, None).unwrap();
        assert!(!bridge.enabled());
        let err = bridge.track_ref("abc").await.unwrap_err();
        assert!(matches!(err, AppError::Spotify(_)));
    }
}
