//! Track index: the playlist laid out as one virtual byte sequence
//!
//! The index is rebuilt for every request. Sizes come from one probe per
//! backing resource, issued before any bytes are streamed. A failed probe
//! degrades that track to size 0 instead of failing the playlist.

use crate::catalog::{CatalogPlaylist, CatalogTrack, MediaCatalog};
use crate::error::ApiResult;
use futures::{stream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One track of the virtual concatenation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Key used for completion reporting
    pub key: String,
    /// Stable identity of the backing resource
    pub resource_id: String,
    /// Backing resource locator, opaque outside the catalog
    pub locator: String,
    pub title: String,
    /// Byte size; 0 when the probe failed
    pub size: u64,
    pub duration_ms: u64,
    /// First byte of this track within the concatenation
    pub start_offset: u64,
    /// Sum of the durations of all preceding tracks
    pub start_time_ms: u64,
}

/// Ordered tracks of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    pub tracks: Vec<Track>,
    pub total_size: u64,
    pub total_duration_ms: u64,
}

impl Playlist {
    /// Lay out tracks end to end with their resolved sizes
    pub fn from_sized(
        id: impl Into<String>,
        title: impl Into<String>,
        sized: Vec<(CatalogTrack, u64)>,
    ) -> Self {
        let mut offset = 0u64;
        let mut time_ms = 0u64;

        let tracks = sized
            .into_iter()
            .map(|(entry, size)| {
                let track = Track {
                    key: entry.key,
                    resource_id: entry.resource_id,
                    locator: entry.locator,
                    title: entry.title,
                    size,
                    duration_ms: entry.duration_ms,
                    start_offset: offset,
                    start_time_ms: time_ms,
                };
                offset += size;
                time_ms += entry.duration_ms;
                track
            })
            .collect();

        Self {
            id: id.into(),
            title: title.into(),
            tracks,
            total_size: offset,
            total_duration_ms: time_ms,
        }
    }
}

/// Keep the first occurrence of each backing resource.
///
/// Titles collide across albums, so the resource identity is the key.
pub fn dedup_tracks(tracks: Vec<CatalogTrack>) -> Vec<CatalogTrack> {
    let mut seen = HashSet::new();
    tracks
        .into_iter()
        .filter(|track| seen.insert(track.resource_id.clone()))
        .collect()
}

/// Builds [`Playlist`]s from the catalog
pub struct TrackIndexBuilder {
    catalog: Arc<dyn MediaCatalog>,
    probe_concurrency: usize,
}

impl TrackIndexBuilder {
    pub fn new(catalog: Arc<dyn MediaCatalog>, probe_concurrency: usize) -> Self {
        Self {
            catalog,
            probe_concurrency: probe_concurrency.max(1),
        }
    }

    /// Playlist membership, de-duplicated, without size probes
    pub async fn list(&self, playlist_id: &str) -> ApiResult<CatalogPlaylist> {
        let mut listing = self.catalog.resolve_tracks(playlist_id).await?;
        let listed = listing.tracks.len();
        listing.tracks = dedup_tracks(listing.tracks);

        if listing.tracks.len() < listed {
            debug!(
                playlist = %playlist_id,
                removed = listed - listing.tracks.len(),
                "Dropped duplicate tracks"
            );
        }

        Ok(listing)
    }

    /// Full index with sizes and offsets
    pub async fn build(&self, playlist_id: &str) -> ApiResult<Playlist> {
        let listing = self.list(playlist_id).await?;

        // buffered() keeps playlist order while probes overlap
        let catalog = &self.catalog;
        let sized: Vec<(CatalogTrack, u64)> = stream::iter(listing.tracks)
            .map(|track| async move {
                let size = match catalog.probe_size(&track.locator).await {
                    Ok(size) => size,
                    Err(e) => {
                        warn!(
                            track = %track.key,
                            locator = %track.locator,
                            "Size probe failed, treating track as empty: {}",
                            e
                        );
                        0
                    }
                };
                (track, size)
            })
            .buffered(self.probe_concurrency)
            .collect()
            .await;

        let playlist = Playlist::from_sized(listing.id, listing.title, sized);

        info!(
            playlist = %playlist.id,
            tracks = playlist.tracks.len(),
            total_size = playlist.total_size,
            total_duration_ms = playlist.total_duration_ms,
            "Track index built"
        );

        Ok(playlist)
    }
}
