use super::DownloadError;
use blowfish::Blowfish;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use futures_util::StreamExt;
use md5::{Digest, Md5};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

type BfCbcDec = cbc::Decryptor<Blowfish>;

const CHUNK_SIZE: usize = 2048;
const STREAM_IV: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];
const RESET_RETRIES: u32 = 5;
const RESET_BACKOFF: Duration = Duration::from_secs(2);

/// Derives the per-track Blowfish key: both halves of the track id's MD5 hex
/// digest folded into the shared secret.
pub fn track_key(track_id: &str, secret: &str) -> [u8; 16] {
    let digest = hex::encode(Md5::digest(track_id.as_bytes()));
    let digest = digest.as_bytes();
    let secret = secret.as_bytes();
    let mut key = [0u8; 16];
    for i in 0..16 {
        key[i] = digest[i] ^ digest[i + 16] ^ secret[i];
    }
    key
}

/// Decrypts one full stream chunk in place. The cipher is rebuilt per chunk;
/// every encrypted chunk starts from the same fixed IV.
pub fn decrypt_chunk(key: &[u8; 16], chunk: &mut [u8]) -> Result<(), DownloadError> {
    let cipher = BfCbcDec::new_from_slices(key, &STREAM_IV)
        .map_err(|e| DownloadError::Write(format!("cipher init failed: {}", e)))?;
    cipher
        .decrypt_padded_mut::<NoPadding>(chunk)
        .map_err(|e| DownloadError::Write(format!("chunk decryption failed: {}", e)))?;
    Ok(())
}

enum StreamFailure {
    /// Connection dropped mid-stream after writing this many bytes.
    Reset(u64),
    Fatal(DownloadError),
}

/// Downloads and decrypts a track stream to `dest`.
///
/// The stream is encrypted in 2048-byte chunks where every third chunk is
/// ciphered; partial trailing chunks are stored in the clear. A dropped
/// connection restarts the whole transfer after a short pause, reporting the
/// discarded bytes as a negative progress delta.
pub async fn stream_track(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    key: &[u8; 16],
    cancel: &AtomicBool,
    mut on_progress: impl FnMut(i64, u64),
) -> Result<(), DownloadError> {
    let mut attempt = 0;
    loop {
        match stream_once(client, url, dest, key, cancel, &mut on_progress).await {
            Ok(()) => return Ok(()),
            Err(StreamFailure::Reset(written)) => {
                attempt += 1;
                if attempt > RESET_RETRIES {
                    return Err(DownloadError::Connection(
                        "connection kept resetting".to_string(),
                    ));
                }
                log::warn!("stream reset after {} bytes, retrying ({})", written, attempt);
                if written > 0 {
                    on_progress(-(written as i64), 0);
                }
                tokio::time::sleep(RESET_BACKOFF).await;
            }
            Err(StreamFailure::Fatal(e)) => return Err(e),
        }
    }
}

async fn stream_once(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    key: &[u8; 16],
    cancel: &AtomicBool,
    on_progress: &mut impl FnMut(i64, u64),
) -> Result<(), StreamFailure> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| StreamFailure::Fatal(DownloadError::Connection(e.to_string())))?;
    // Expired, region-blocked or otherwise refused media URLs all look the
    // same to us: this id has no usable stream, try an alternative.
    if !response.status().is_success() {
        return Err(StreamFailure::Fatal(DownloadError::NotAvailable));
    }
    let total = response.content_length().unwrap_or(0);
    if total == 0 {
        return Err(StreamFailure::Fatal(DownloadError::EmptyStream));
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| StreamFailure::Fatal(DownloadError::Write(e.to_string())))?;
    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::with_capacity(CHUNK_SIZE * 2);
    let mut chunk_index: u64 = 0;
    let mut written: u64 = 0;

    while let Some(piece) = body.next().await {
        if cancel.load(Ordering::SeqCst) {
            return Err(StreamFailure::Fatal(DownloadError::Cancelled));
        }
        let piece = match piece {
            Ok(piece) => piece,
            Err(_) => return Err(StreamFailure::Reset(written)),
        };
        buffer.extend_from_slice(&piece);

        while buffer.len() >= CHUNK_SIZE {
            let mut chunk: Vec<u8> = buffer.drain(..CHUNK_SIZE).collect();
            if chunk_index % 3 == 0 {
                decrypt_chunk(key, &mut chunk).map_err(StreamFailure::Fatal)?;
            }
            chunk_index += 1;
            file.write_all(&chunk)
                .await
                .map_err(|e| StreamFailure::Fatal(DownloadError::Write(e.to_string())))?;
            written += chunk.len() as u64;
            on_progress(chunk.len() as i64, total);
        }
    }

    // Trailing partial chunk is never encrypted.
    if !buffer.is_empty() {
        file.write_all(&buffer)
            .await
            .map_err(|e| StreamFailure::Fatal(DownloadError::Write(e.to_string())))?;
        written += buffer.len() as u64;
        on_progress(buffer.len() as i64, total);
    }
    file.flush()
        .await
        .map_err(|e| StreamFailure::Fatal(DownloadError::Write(e.to_string())))?;
    log::debug!("stream complete: {} bytes", written);
    Ok(())
}
