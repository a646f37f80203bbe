//! Podcast feed for a playlist
//!
//! One RSS 2.0 item whose enclosure is the concatenated stream.

use crate::catalog::CatalogPlaylist;
use crate::error::{ApiError, ApiResult};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const RSS_CONTENT_TYPE: &str = "application/rss+xml; charset=UTF-8";

const ITUNES_NS: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Serialize)]
#[serde(rename = "rss")]
struct Rss {
    #[serde(rename = "@version")]
    version: &'static str,

    #[serde(rename = "@xmlns:itunes")]
    xmlns_itunes: &'static str,

    channel: Channel,
}

#[derive(Debug, Serialize)]
struct Channel {
    title: String,
    link: String,
    description: &'static str,
    #[serde(rename = "lastBuildDate")]
    last_build_date: String,
    generator: String,
    item: Item,
}

#[derive(Debug, Serialize)]
struct Item {
    title: String,
    link: String,
    guid: Guid,
    #[serde(rename = "pubDate")]
    pub_date: String,
    enclosure: Enclosure,
    #[serde(rename = "itunes:duration")]
    duration: u64,
}

#[derive(Debug, Serialize)]
struct Guid {
    #[serde(rename = "@isPermaLink")]
    is_perma_link: &'static str,
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Debug, Serialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@type")]
    media_type: &'static str,
    #[serde(rename = "@length")]
    length: u64,
}

/// Public URL of the concatenated stream
pub fn stream_url(base_url: &str, playlist_id: &str) -> String {
    format!("{}/stream/{}.mp3", base_url.trim_end_matches('/'), playlist_id)
}

/// Render the feed document
pub fn render_feed(
    listing: &CatalogPlaylist,
    base_url: &str,
    now: DateTime<Utc>,
) -> ApiResult<String> {
    let base_url = base_url.trim_end_matches('/');
    let link = format!("{}/feed/{}", base_url, listing.id);
    let date = now.to_rfc2822();
    let total_duration_ms: u64 = listing.tracks.iter().map(|t| t.duration_ms).sum();

    let rss = Rss {
        version: "2.0",
        xmlns_itunes: ITUNES_NS,
        channel: Channel {
            title: listing.title.clone(),
            link: link.clone(),
            description: "Plex playlist as podcast",
            last_build_date: date.clone(),
            generator: format!("ppcast/{}", env!("CARGO_PKG_VERSION")),
            item: Item {
                title: listing.title.clone(),
                link,
                guid: Guid {
                    is_perma_link: "false",
                    value: format!("{}-concat", listing.id),
                },
                pub_date: date,
                // Length unknown until every size is probed
                enclosure: Enclosure {
                    url: stream_url(base_url, &listing.id),
                    media_type: "audio/mpeg",
                    length: 0,
                },
                duration: total_duration_ms / 1000,
            },
        },
    };

    let body = quick_xml::se::to_string(&rss)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize feed: {}", e)))?;

    Ok(format!("{}\n{}", XML_DECLARATION, body))
}
