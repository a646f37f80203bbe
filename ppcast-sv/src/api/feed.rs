//! Podcast feed endpoint

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use tracing::info;

use super::validate_playlist_id;
use crate::error::ApiResult;
use crate::feed::{render_feed, RSS_CONTENT_TYPE};
use crate::AppState;

/// GET /feed/:playlist
///
/// Lists the playlist but probes no sizes; the enclosure length is left at 0.
pub async fn playlist_feed(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
) -> ApiResult<Response> {
    let playlist_id = validate_playlist_id(&playlist_id)?;
    let listing = state.index.list(playlist_id).await?;

    info!(
        playlist = %playlist_id,
        tracks = listing.tracks.len(),
        "Serving podcast feed"
    );

    let body = render_feed(&listing, &state.base_url, ppcast_common::time::now())?;
    Ok(([(header::CONTENT_TYPE, RSS_CONTENT_TYPE)], body).into_response())
}
