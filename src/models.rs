use crate::error::ImageError;
use bytes::Bytes;
use image::{GenericImageView, ImageFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tokio::time::Instant;

/// Cache key of an image, usually the URL it is served from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new<I: Into<String>>(id: I) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Body of a `GET {resource}?hash` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HashResponse {
    pub hash: String,
}

/// An undecoded response body as returned by an [`ImageClient`](crate::client::ImageClient).
#[derive(Debug, Clone)]
pub struct RawBody {
    pub data: Bytes,
    pub content_type: Option<String>,
}

/// Image bytes that are known to be displayable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    data: Bytes,
    content_type: Option<String>,
    format: Option<ImageFormat>,
    dimensions: Option<(u32, u32)>,
    digest: String,
}

impl Payload {
    /// Validates a fetched body.
    ///
    /// Raster formats are fully decoded once so that a truncated or corrupt body fails here
    /// instead of in the rendering layer. SVG documents are kept as they are.
    pub fn decode(body: RawBody) -> Result<Self, ImageError> {
        let digest = format!("{:x}", Sha256::digest(&body.data));

        let is_svg = body
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/svg"));
        if is_svg {
            std::str::from_utf8(&body.data)
                .map_err(|e| ImageError::Decode(format!("svg is not valid utf-8: {}", e)))?;
            return Ok(Self {
                data: body.data,
                content_type: body.content_type,
                format: None,
                dimensions: None,
                digest,
            });
        }

        let format = image::guess_format(&body.data)?;
        let decoded = image::load_from_memory_with_format(&body.data, format)?;

        Ok(Self {
            dimensions: Some(decoded.dimensions()),
            format: Some(format),
            data: body.data,
            content_type: body.content_type,
            digest,
        })
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    /// Hex SHA-256 of the raw bytes.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One cached image.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub resource: ResourceId,
    pub payload: Payload,
    /// Server-reported hash, absent when the entry was fetched without a hash check.
    pub content_hash: Option<String>,
    pub fetched_at: Instant,
    /// Refreshed on every read by a region; drives idle eviction.
    pub last_used_at: Instant,
}

impl CacheEntry {
    pub fn new(resource: ResourceId, payload: Payload, content_hash: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            resource,
            payload,
            content_hash,
            fetched_at: now,
            last_used_at: now,
        }
    }
}
