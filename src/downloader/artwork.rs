use crate::errors::{AppError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Largest size the CDN is guaranteed to serve; oversized requests 404 and
/// get retried at this edge.
const CDN_MAX_SIZE: u32 = 1200;

/// Temp-directory artwork cache shared by all concurrent track downloads.
///
/// One image per (kind, id, size) key. A per-key lock serializes writers so
/// concurrent tracks of the same album fetch the cover exactly once.
pub struct ArtworkCache {
    client: reqwest::Client,
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtworkCache {
    pub fn new(client: reqwest::Client) -> ArtworkCache {
        ArtworkCache {
            client,
            dir: std::env::temp_dir().join("wavedl-artwork"),
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn with_dir(client: reqwest::Client, dir: PathBuf) -> ArtworkCache {
        ArtworkCache {
            client,
            dir,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Fetches an image by cache key, downloading it at most once. `urls`
    /// are tried in order; a miss on all of them is an error, which callers
    /// treat as non-fatal.
    pub async fn fetch(&self, key: &str, png: bool, urls: &[String]) -> Result<Vec<u8>> {
        let ext = if png { "png" } else { "jpg" };
        let path = self.dir.join(format!("{}.{}", key, ext));
        if let Ok(data) = tokio::fs::read(&path).await {
            return Ok(data);
        }

        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;
        // Another task may have finished the download while we waited.
        if let Ok(data) = tokio::fs::read(&path).await {
            return Ok(data);
        }

        for url in urls {
            match self.download(url).await {
                Ok(data) => {
                    tokio::fs::create_dir_all(&self.dir).await?;
                    let mut file = tokio::fs::File::create(&path).await?;
                    file.write_all(&data).await?;
                    file.flush().await?;
                    return Ok(data);
                }
                Err(e) => log::debug!("artwork fetch failed for {}: {}", url, e),
            }
        }
        Err(AppError::Download(format!("no artwork available for {}", key)))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Download(format!(
                "HTTP {} for artwork",
                response.status()
            )));
        }
        let data = response.bytes().await?;
        if data.is_empty() {
            return Err(AppError::Download("empty artwork response".to_string()));
        }
        Ok(data.to_vec())
    }
}

/// Cover URL candidates for a picture hash: the requested size first, then
/// the CDN edge size when the request exceeds it.
pub fn cover_candidates(
    cdn_base: &str,
    kind: &str,
    pic: &str,
    size: u32,
    png: bool,
    jpeg_quality: u32,
) -> Vec<String> {
    let mut urls = vec![crate::api::catalog::cover_url(
        cdn_base, kind, pic, size, png, jpeg_quality,
    )];
    if size > CDN_MAX_SIZE {
        urls.push(crate::api::catalog::cover_url(
            cdn_base,
            kind,
            pic,
            CDN_MAX_SIZE,
            png,
            jpeg_quality,
        ));
    }
    urls
}
