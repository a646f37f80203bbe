//! HTTP API handlers for ppcast-sv

pub mod feed;
pub mod health;
pub mod stream;

pub use feed::playlist_feed;
pub use health::health_routes;
pub use stream::stream_playlist;

use crate::error::{ApiError, ApiResult};

/// Validate a playlist id taken from the URL path.
///
/// Ids are passed to the catalog as a path segment, so only ASCII
/// alphanumerics, `-` and `_` are accepted.
pub fn validate_playlist_id(id: &str) -> ApiResult<&str> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(id)
    } else {
        Err(ApiError::BadRequest(format!("Invalid playlist id: {:?}", id)))
    }
}
