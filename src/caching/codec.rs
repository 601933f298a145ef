//! # Entry Codec
//!
//! Converts a downstream response into the persisted [`CacheEntry`] and back.
//!
//! Persisted layout (JSON):
//! ```json
//! {"content": "...", "status": 200, "headers": {"content-type": ["text/html"]},
//!  "cached_at": "2024-01-01 12:00:00", "compressed": false}
//! ```
//!
//! Bodies larger than the compression threshold are zlib-compressed and
//! base64-encoded. Bodies that are not valid UTF-8 always take that path so
//! `content` stays a JSON string. Decoding never fails: a damaged compressed
//! entry falls back to the raw `content` bytes.

use super::{CacheError, CacheResult};
use crate::core::config::EXCLUDED_HEADERS;
use axum::http::{HeaderMap, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use tracing::warn;

const CACHED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Stored representation of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Body text, or base64 of the zlib stream when `compressed`
    pub content: String,
    pub status: u16,
    /// Lower-case header names in sorted order, every value kept
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    /// Wall-clock store time, informational only
    #[serde(default)]
    pub cached_at: String,
    #[serde(default)]
    pub compressed: bool,
}

/// Entry contents after decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedResponse {
    pub status: StatusCode,
    pub headers: BTreeMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

/// Entry encoding capability
pub trait EntryCodec: Send + Sync {
    fn encode(&self, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> CacheResult<CacheEntry>;

    /// Best-effort inverse of [`encode`](EntryCodec::encode); never fails
    fn decode(&self, entry: &CacheEntry) -> DecodedResponse;
}

/// zlib + base64 codec
#[derive(Debug, Clone)]
pub struct ZlibEntryCodec {
    compression_threshold: usize,
    level: Compression,
}

impl ZlibEntryCodec {
    pub fn new(compression_threshold: usize) -> Self {
        Self {
            compression_threshold,
            level: Compression::new(6),
        }
    }

    fn filter_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
        let mut filtered = BTreeMap::new();

        for name in headers.keys() {
            let name = name.as_str().to_ascii_lowercase();
            if EXCLUDED_HEADERS.contains(&name.as_str()) {
                continue;
            }

            let values = headers
                .get_all(name.as_str())
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .collect();
            filtered.insert(name, values);
        }

        filtered
    }

    fn compress(&self, body: &[u8]) -> CacheResult<String> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(body.len() / 2), self.level);
        encoder
            .write_all(body)
            .and_then(|_| encoder.finish())
            .map(|compressed| STANDARD.encode(compressed))
            .map_err(|e| CacheError::Store {
                message: format!("Failed to compress entry: {}", e),
            })
    }

    fn decompress(content: &str) -> Option<Vec<u8>> {
        let compressed = STANDARD.decode(content).ok()?;
        let mut body = Vec::new();
        ZlibDecoder::new(compressed.as_slice()).read_to_end(&mut body).ok()?;
        Some(body)
    }
}

impl Default for ZlibEntryCodec {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EntryCodec for ZlibEntryCodec {
    fn encode(&self, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> CacheResult<CacheEntry> {
        let text = std::str::from_utf8(body).ok();
        let compressed = text.is_none() || body.len() > self.compression_threshold;

        let content = match text {
            Some(text) if !compressed => text.to_string(),
            _ => self.compress(body)?,
        };

        Ok(CacheEntry {
            content,
            status: status.as_u16(),
            headers: Self::filter_headers(headers),
            cached_at: chrono::Utc::now().format(CACHED_AT_FORMAT).to_string(),
            compressed,
        })
    }

    fn decode(&self, entry: &CacheEntry) -> DecodedResponse {
        let body = if entry.compressed {
            Self::decompress(&entry.content).unwrap_or_else(|| {
                warn!("Compressed cache entry could not be decoded, serving raw content");
                entry.content.clone().into_bytes()
            })
        } else {
            entry.content.clone().into_bytes()
        };

        DecodedResponse {
            status: StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK),
            headers: entry.headers.clone(),
            body,
        }
    }
}
