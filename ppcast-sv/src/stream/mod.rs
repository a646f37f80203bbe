//! Stream multiplexer
//!
//! Turns a track index plus a resolved range into an HTTP response: one
//! ranged upstream fetch per segment, forwarded in order and in bounded
//! chunks. Fetches happen lazily as the body is polled, so a client that
//! disconnects stops further upstream traffic.
//!
//! Completion state is updated before the piece that triggers it is
//! yielded: a connection may stop polling the body after the announced
//! `Content-Length` bytes, and then only the session's `Drop` runs.
//!
//! The head commits to a `Content-Length` before any fetch. If an upstream
//! fetch fails or comes up short afterwards, the body stream yields an
//! error and the connection is aborted; nothing is retried.

pub mod head;

use crate::catalog::MediaCatalog;
use crate::completion::CompletionSession;
use crate::playlist::Playlist;
use crate::range::{decompose, RangeRequest, Segment};
use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub use head::{HeadField, ResponseHead};

/// Failures after the head was sent. These can only truncate the body.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Upstream fetch failed for track {track}: {reason}")]
    UpstreamFetch { track: String, reason: String },

    #[error("Upstream ended early for track {track}: expected {expected} bytes, got {received}")]
    ShortRead {
        track: String,
        expected: u64,
        received: u64,
    },
}

impl From<StreamError> for io::Error {
    fn from(e: StreamError) -> Self {
        let kind = match e {
            StreamError::UpstreamFetch { .. } => io::ErrorKind::Other,
            StreamError::ShortRead { .. } => io::ErrorKind::UnexpectedEof,
        };
        io::Error::new(kind, e)
    }
}

/// Builds stream responses over a catalog
#[derive(Clone)]
pub struct Multiplexer {
    catalog: Arc<dyn MediaCatalog>,
    chunk_size: usize,
}

impl Multiplexer {
    pub fn new(catalog: Arc<dyn MediaCatalog>, chunk_size: usize) -> Self {
        Self {
            catalog,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Status and headers for a resolved request
    pub fn head(&self, playlist: &Playlist, request: RangeRequest) -> ResponseHead {
        match request {
            RangeRequest::Full => ResponseHead::full(playlist.total_size),
            RangeRequest::Partial(window) => ResponseHead::partial(window, playlist.total_size),
        }
    }

    /// Headers only; no upstream fetch, no completion tracking
    pub fn respond_head(&self, playlist: &Playlist, request: RangeRequest) -> Response {
        self.head(playlist, request).into_response(Body::empty())
    }

    /// Full response with a lazily fetched body
    pub fn respond(
        &self,
        playlist: Playlist,
        request: RangeRequest,
        session: CompletionSession,
    ) -> Response {
        let head = self.head(&playlist, request);
        let segments = request
            .window(playlist.total_size)
            .map(|window| decompose(&playlist.tracks, window))
            .unwrap_or_default();

        debug!(
            playlist = %playlist.id,
            status = head.status().as_u16(),
            content_length = head.content_length(),
            segments = segments.len(),
            "Streaming playlist"
        );

        let body = Body::from_stream(self.body_stream(playlist, segments, session));
        head.into_response(body)
    }

    /// Bytes of `segments`, in order, in chunks of at most `chunk_size`
    pub fn body_stream(
        &self,
        playlist: Playlist,
        segments: Vec<Segment>,
        mut session: CompletionSession,
    ) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
        let catalog = Arc::clone(&self.catalog);
        let chunk_size = self.chunk_size;

        async_stream::stream! {
            for segment in segments {
                let track = &playlist.tracks[segment.track_index];
                let expected = segment.len();

                debug!(
                    playlist = %playlist.id,
                    track = %track.key,
                    start = segment.local_start,
                    end = segment.local_end,
                    "Fetching segment"
                );

                let mut upstream = match catalog
                    .fetch_range(&track.locator, segment.local_start, segment.local_end)
                    .await
                {
                    Ok(upstream) => upstream,
                    Err(e) => {
                        let err = StreamError::UpstreamFetch {
                            track: track.key.clone(),
                            reason: e.to_string(),
                        };
                        warn!(playlist = %playlist.id, "Truncating response: {}", err);
                        yield Err(io::Error::from(err));
                        return;
                    }
                };

                let mut sent = 0u64;
                while sent < expected {
                    let mut bytes = match upstream.next().await {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(e)) => {
                            let err = StreamError::UpstreamFetch {
                                track: track.key.clone(),
                                reason: e.to_string(),
                            };
                            warn!(playlist = %playlist.id, "Truncating response: {}", err);
                            yield Err(io::Error::from(err));
                            return;
                        }
                        None => break,
                    };

                    // Never forward more than the segment asked for
                    let remaining = expected - sent;
                    if bytes.len() as u64 > remaining {
                        bytes.truncate(remaining as usize);
                    }

                    while !bytes.is_empty() {
                        let piece = bytes.split_to(bytes.len().min(chunk_size));
                        if sent == 0 {
                            session.track_started(track);
                        }
                        sent += piece.len() as u64;
                        // Servers stop polling once Content-Length bytes are out,
                        // so the last piece of a track must not be followed by work
                        if sent == expected && segment.covers_track(track.size) {
                            session.track_finished(track);
                        }
                        yield Ok(piece);
                    }
                }

                if sent < expected {
                    let err = StreamError::ShortRead {
                        track: track.key.clone(),
                        expected,
                        received: sent,
                    };
                    warn!(playlist = %playlist.id, "Truncating response: {}", err);
                    yield Err(io::Error::from(err));
                    return;
                }
            }

            // Only reached when the body is drained to its end; otherwise
            // the session's Drop reports
            session.finish().await;
        }
    }
}
