//! Concatenated stream endpoint

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, Method},
    response::Response,
};
use tracing::{debug, info};

use super::validate_playlist_id;
use crate::error::{ApiError, ApiResult};
use crate::range;
use crate::AppState;

/// Playlist id from `{id}.mp3`; everything from the first `.` is dropped
pub fn playlist_id_from_file(file: &str) -> ApiResult<&str> {
    let id = file.split('.').next().unwrap_or_default();
    validate_playlist_id(id)
}

/// GET|HEAD /stream/:file
///
/// Builds the track index, resolves the `Range` header against it and
/// hands off to the multiplexer. Every error here happens before the first
/// body byte and becomes a status code.
pub async fn stream_playlist(
    State(state): State<AppState>,
    method: Method,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let playlist_id = playlist_id_from_file(&file)?;

    // A header that is not visible ASCII is ignored like any other malformed range
    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    let playlist = state.index.build(playlist_id).await?;

    let request = range::resolve(range_header, playlist.total_size).map_err(|e| {
        debug!(
            playlist = %playlist_id,
            range = ?range_header,
            total_size = playlist.total_size,
            "Unsatisfiable range: {:?}",
            e
        );
        ApiError::RangeNotSatisfiable {
            total_size: playlist.total_size,
        }
    })?;

    info!(
        playlist = %playlist_id,
        method = %method,
        range = ?range_header,
        total_size = playlist.total_size,
        "Stream request"
    );

    if method == Method::HEAD {
        return Ok(state.multiplexer.respond_head(&playlist, request));
    }

    let session = state.tracker.session(playlist_id);
    Ok(state.multiplexer.respond(playlist, request, session))
}
