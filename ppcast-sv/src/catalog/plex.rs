//! Plex Media Server client
//!
//! Implements [`MediaCatalog`] against the Plex HTTP API:
//! - `GET /playlists/{id}/items` lists a playlist (XML)
//! - `HEAD /library/parts/{part}/{file}?download=1` probes a size
//! - `GET` on the same URL with a `Range` header fetches bytes
//! - `POST /:/scrobble` marks a track as played
//!
//! Every request carries the `X-Plex-Token` query parameter.

use super::{ByteStream, CatalogError, CatalogPlaylist, CatalogResult, CatalogTrack, MediaCatalog};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use ppcast_common::config::PlexConfig;
use reqwest::{header, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("ppcast/", env!("CARGO_PKG_VERSION"));
const SCROBBLE_IDENTIFIER: &str = "com.plexapp.plugins.library";
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// `MediaContainer` returned by `/playlists/{id}/items`
#[derive(Debug, Deserialize)]
struct MediaContainer {
    #[serde(rename = "@title", default)]
    title: String,
    #[serde(rename = "Track", default)]
    tracks: Vec<PlexTrack>,
}

#[derive(Debug, Deserialize)]
struct PlexTrack {
    #[serde(rename = "@ratingKey", default)]
    rating_key: Option<String>,
    #[serde(rename = "@title", default)]
    title: String,
    #[serde(rename = "@grandparentTitle", default)]
    grandparent_title: Option<String>,
    #[serde(rename = "@duration", default)]
    duration: Option<u64>,
    #[serde(rename = "Media", default)]
    media: Vec<PlexMedia>,
}

#[derive(Debug, Deserialize)]
struct PlexMedia {
    #[serde(rename = "@duration", default)]
    duration: Option<u64>,
    #[serde(rename = "Part", default)]
    parts: Vec<PlexPart>,
}

#[derive(Debug, Deserialize)]
struct PlexPart {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@file", default)]
    file: Option<String>,
}

/// Parse a playlist items document
///
/// Tracks without a playable part are skipped; they have nothing to stream.
fn parse_playlist(playlist_id: &str, xml: &str) -> CatalogResult<CatalogPlaylist> {
    let container: MediaContainer =
        quick_xml::de::from_str(xml).map_err(|e| CatalogError::Parse(e.to_string()))?;

    let tracks = container
        .tracks
        .into_iter()
        .filter_map(|track| {
            let media = track.media.into_iter().next()?;
            let media_duration = media.duration;
            let part = media.parts.into_iter().next()?;

            let file_name = part
                .file
                .as_deref()
                .map(basename)
                .filter(|name| !name.is_empty())
                .unwrap_or("file")
                .to_string();

            let title = match &track.grandparent_title {
                Some(artist) if !artist.is_empty() => format!("{} - {}", artist, track.title),
                _ => track.title.clone(),
            };

            Some(CatalogTrack {
                key: track.rating_key.clone().unwrap_or_else(|| part.id.clone()),
                resource_id: part.id.clone(),
                locator: format!("/library/parts/{}/{}", part.id, file_name),
                title,
                duration_ms: media_duration.or(track.duration).unwrap_or(0),
            })
        })
        .collect();

    Ok(CatalogPlaylist {
        id: playlist_id.to_string(),
        title: container.title,
        tracks,
    })
}

/// Last path component of a server-side file path (either separator)
fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Plex API client
pub struct PlexClient {
    /// Metadata requests (bounded total time)
    api_client: reqwest::Client,
    /// Media requests (no total timeout: bodies stream for minutes)
    media_client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl PlexClient {
    pub fn new(config: &PlexConfig) -> CatalogResult<Self> {
        let base_url = Url::parse(config.url.trim_end_matches('/'))
            .map_err(|e| CatalogError::Parse(format!("Invalid Plex URL '{}': {}", config.url, e)))?;

        let api_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        let media_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        info!(url = %base_url, "Plex client created");

        Ok(Self {
            api_client,
            media_client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// Build `{base}/{path}` with query parameters and the token
    fn url(&self, path: &str, query: &[(&str, &str)]) -> CatalogResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogError::Parse(format!("Plex URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));

        let mut params: Vec<(&str, &str)> = query.to_vec();
        if !self.token.is_empty() {
            params.push(("X-Plex-Token", self.token.as_str()));
        }
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }

        Ok(url)
    }

    fn media_url(&self, locator: &str) -> CatalogResult<Url> {
        self.url(locator, &[("download", "1")])
    }
}

/// URL with the token masked, for logs
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "X-Plex-Token" { "***".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}

/// Bytes `start..=end` of a body that starts at offset 0.
///
/// Reading stops once `end` is reached; dropping the response closes the
/// upstream connection.
fn slice_full_body(
    body: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    start: u64,
    end: u64,
) -> ByteStream {
    let sliced = async_stream::stream! {
        let mut body = Box::pin(body);
        let mut skip = start;
        let mut remaining = (end + 1).saturating_sub(start);

        while remaining > 0 {
            let chunk = match body.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    yield Err(CatalogError::from(e));
                    return;
                }
                None => return,
            };

            let len = chunk.len() as u64;
            if skip >= len {
                skip -= len;
                continue;
            }

            let mut piece = chunk.slice(skip as usize..);
            skip = 0;
            if piece.len() as u64 > remaining {
                piece.truncate(remaining as usize);
            }
            remaining -= piece.len() as u64;
            yield Ok::<Bytes, CatalogError>(piece);
        }
    };
    sliced.boxed()
}

#[async_trait]
impl MediaCatalog for PlexClient {
    async fn resolve_tracks(&self, playlist_id: &str) -> CatalogResult<CatalogPlaylist> {
        let url = self.url(&format!("playlists/{}/items", playlist_id), &[])?;
        debug!(url = %redacted(&url), "Listing Plex playlist");

        let response = self.api_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CatalogError::from_status(status.as_u16(), text));
        }

        let xml = response.text().await?;
        let playlist = parse_playlist(playlist_id, &xml)?;

        info!(
            playlist = %playlist_id,
            title = %playlist.title,
            tracks = playlist.tracks.len(),
            "Retrieved playlist from Plex"
        );

        Ok(playlist)
    }

    async fn probe_size(&self, locator: &str) -> CatalogResult<u64> {
        let url = self.media_url(locator)?;
        let response = self.api_client.head(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::from_status(status.as_u16(), locator));
        }

        // Read the header itself: for HEAD the body size hint is 0
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| CatalogError::Parse(format!("No Content-Length for {}", locator)))
    }

    async fn fetch_range(&self, locator: &str, start: u64, end: u64) -> CatalogResult<ByteStream> {
        let url = self.media_url(locator)?;
        debug!(locator = %locator, start, end, "Fetching range from Plex");

        let response = self
            .media_client
            .get(url)
            .header(header::RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(response
                .bytes_stream()
                .map_err(CatalogError::from)
                .boxed()),
            StatusCode::OK => {
                debug!(locator = %locator, "Range ignored upstream, slicing full body");
                Ok(slice_full_body(response.bytes_stream(), start, end))
            }
            status => Err(CatalogError::from_status(status.as_u16(), locator)),
        }
    }

    async fn report_completion(
        &self,
        track_key: &str,
        duration_secs: f64,
        position_secs: f64,
    ) -> CatalogResult<()> {
        let url = self.url(
            ":/scrobble",
            &[("identifier", SCROBBLE_IDENTIFIER), ("key", track_key)],
        )?;

        debug!(
            track = %track_key,
            duration_secs,
            position_secs,
            "Scrobbling track on Plex"
        );

        let response = self
            .api_client
            .post(url)
            .header(header::CONTENT_LENGTH, "0")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CatalogError::from_status(status.as_u16(), text));
        }

        Ok(())
    }
}
