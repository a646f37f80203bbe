//! Media catalog collaborator
//!
//! Everything ppcast needs from the upstream media server goes through
//! [`MediaCatalog`]: playlist membership, size probes, ranged fetches and
//! completion reports. Authentication lives entirely inside implementations.

pub mod plex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

pub use plex::PlexClient;

/// Catalog client errors
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The requested playlist does not exist upstream
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure talking to the catalog
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    /// Catalog answered with a non-success status
    #[error("Upstream error {code}: {message}")]
    Status { code: u16, message: String },

    /// Catalog answered with something we could not parse
    #[error("Parse error: {0}")]
    Parse(String),
}

impl CatalogError {
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        match code {
            404 => Self::NotFound(message.into()),
            _ => Self::Status {
                code,
                message: message.into(),
            },
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self {
        CatalogError::Unreachable(e.to_string())
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Bytes of one backing resource, in order
pub type ByteStream = BoxStream<'static, CatalogResult<Bytes>>;

/// One playlist entry as listed by the catalog, before size resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTrack {
    /// Key the catalog expects in completion reports
    pub key: String,
    /// Stable identity of the backing resource (dedup key)
    pub resource_id: String,
    /// Where the bytes live; opaque outside the catalog
    pub locator: String,
    /// Display title
    pub title: String,
    /// Duration in milliseconds (0 when unknown)
    pub duration_ms: u64,
}

/// Playlist membership as listed by the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPlaylist {
    pub id: String,
    pub title: String,
    pub tracks: Vec<CatalogTrack>,
}

/// Upstream media catalog
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    /// List the playlist's tracks in playlist order
    async fn resolve_tracks(&self, playlist_id: &str) -> CatalogResult<CatalogPlaylist>;

    /// Size in bytes of a backing resource (HEAD-equivalent)
    async fn probe_size(&self, locator: &str) -> CatalogResult<u64>;

    /// Bytes `start..=end` of a backing resource
    async fn fetch_range(&self, locator: &str, start: u64, end: u64) -> CatalogResult<ByteStream>;

    /// Tell the catalog a track was played
    async fn report_completion(
        &self,
        track_key: &str,
        duration_secs: f64,
        position_secs: f64,
    ) -> CatalogResult<()>;
}
