//! ppcast-sv library - playlist concatenation service
//!
//! Serves a media-server playlist as one seekable MP3 resource and reports
//! per-track completion back to the media server.

use axum::Router;
use ppcast_common::config::StreamConfig;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod catalog;
pub mod completion;
pub mod error;
pub mod feed;
pub mod playlist;
pub mod range;
pub mod stream;

use catalog::MediaCatalog;
use completion::CompletionTracker;
use playlist::TrackIndexBuilder;
use stream::Multiplexer;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Track index builder (lists playlists, probes sizes)
    pub index: Arc<TrackIndexBuilder>,
    /// Stream response builder
    pub multiplexer: Multiplexer,
    /// Completion tracker with its dedup store
    pub tracker: Arc<CompletionTracker>,
    /// Public base URL, no trailing slash
    pub base_url: String,
}

impl AppState {
    /// Create new application state
    pub fn new(
        catalog: Arc<dyn MediaCatalog>,
        tracker: Arc<CompletionTracker>,
        stream: &StreamConfig,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            index: Arc::new(TrackIndexBuilder::new(
                Arc::clone(&catalog),
                stream.probe_concurrency,
            )),
            multiplexer: Multiplexer::new(catalog, stream.chunk_size),
            tracker,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    // get() also answers HEAD; the stream handler checks the method itself
    Router::new()
        .route("/stream/:file", get(api::stream_playlist))
        .route("/feed/:playlist", get(api::playlist_feed))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
