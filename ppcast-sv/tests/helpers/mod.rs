//! Shared fixtures for ppcast-sv integration tests
//!
//! `FakeCatalog` serves playlists from memory and records every fetch and
//! completion report; `TestApp` wires it into the real router with a
//! SQLite dedup store in a temporary directory.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use bytes::Bytes;
use futures::stream;
use ppcast_common::config::{CompletionConfig, PlayedThreshold, StreamConfig};
use ppcast_common::db::init_database;
use ppcast_sv::catalog::{
    ByteStream, CatalogError, CatalogPlaylist, CatalogResult, CatalogTrack, MediaCatalog,
};
use ppcast_sv::completion::{CompletionTracker, DedupStore, SqliteDedupStore};
use ppcast_sv::{build_router, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const SERVER_IDENTITY: &str = "http://plex.test:32400";

/// Upstream chunk size; deliberately not a divisor of the track sizes
const UPSTREAM_CHUNK: usize = 7;

/// One backing resource
#[derive(Debug, Clone)]
pub struct FakeTrack {
    pub key: String,
    pub bytes: Vec<u8>,
    pub duration_ms: u64,
    /// Refuse ranged fetches
    pub fail_fetch: bool,
    /// Fail the size probe
    pub fail_probe: bool,
    /// End every fetch this many bytes early
    pub short_by: usize,
}

impl FakeTrack {
    pub fn locator(&self) -> String {
        format!("/library/parts/{}/track.mp3", self.key)
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }

    pub fn short_by(mut self, bytes: usize) -> Self {
        self.short_by = bytes;
        self
    }
}

/// Track with deterministic, per-key content
pub fn track(key: &str, size: usize, duration_ms: u64) -> FakeTrack {
    let seed: usize = key.bytes().map(usize::from).sum();
    FakeTrack {
        key: key.to_string(),
        bytes: (0..size).map(|i| ((i + seed) % 251) as u8).collect(),
        duration_ms,
        fail_fetch: false,
        fail_probe: false,
        short_by: 0,
    }
}

/// A completion report as received by the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub track_key: String,
    pub duration_secs: f64,
    pub position_secs: f64,
}

#[derive(Default)]
pub struct FakeCatalog {
    playlists: HashMap<String, (String, Vec<FakeTrack>)>,
    unreachable: bool,
    fail_reports: bool,
    pub fetches: Mutex<Vec<(String, u64, u64)>>,
    pub reports: Mutex<Vec<Report>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every listing fails as if the server were down
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn with_playlist(mut self, id: &str, title: &str, tracks: Vec<FakeTrack>) -> Self {
        self.playlists
            .insert(id.to_string(), (title.to_string(), tracks));
        self
    }

    pub fn failing_reports(mut self) -> Self {
        self.fail_reports = true;
        self
    }

    /// Expected bytes of the whole concatenation (first occurrence of each track)
    pub fn concatenation(&self, id: &str) -> Vec<u8> {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        if let Some((_, tracks)) = self.playlists.get(id) {
            for track in tracks {
                if seen.contains(&track.key) || track.fail_probe {
                    continue;
                }
                seen.push(track.key.clone());
                out.extend_from_slice(&track.bytes);
            }
        }
        out
    }

    pub fn fetch_log(&self) -> Vec<(String, u64, u64)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn report_log(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    pub fn reported_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .report_log()
            .into_iter()
            .map(|r| r.track_key)
            .collect();
        keys.sort();
        keys
    }

    fn find(&self, locator: &str) -> Option<FakeTrack> {
        self.playlists
            .values()
            .flat_map(|(_, tracks)| tracks.iter())
            .find(|t| t.locator() == locator)
            .cloned()
    }
}

#[async_trait]
impl MediaCatalog for FakeCatalog {
    async fn resolve_tracks(&self, playlist_id: &str) -> CatalogResult<CatalogPlaylist> {
        if self.unreachable {
            return Err(CatalogError::Unreachable("connection refused".to_string()));
        }

        let (title, tracks) = self
            .playlists
            .get(playlist_id)
            .ok_or_else(|| CatalogError::NotFound(playlist_id.to_string()))?;

        Ok(CatalogPlaylist {
            id: playlist_id.to_string(),
            title: title.clone(),
            tracks: tracks
                .iter()
                .map(|t| CatalogTrack {
                    key: t.key.clone(),
                    resource_id: t.key.clone(),
                    locator: t.locator(),
                    title: format!("Track {}", t.key),
                    duration_ms: t.duration_ms,
                })
                .collect(),
        })
    }

    async fn probe_size(&self, locator: &str) -> CatalogResult<u64> {
        match self.find(locator) {
            Some(track) if !track.fail_probe => Ok(track.bytes.len() as u64),
            Some(_) => Err(CatalogError::Status {
                code: 500,
                message: "probe failed".to_string(),
            }),
            None => Err(CatalogError::NotFound(locator.to_string())),
        }
    }

    async fn fetch_range(&self, locator: &str, start: u64, end: u64) -> CatalogResult<ByteStream> {
        let track = self
            .find(locator)
            .ok_or_else(|| CatalogError::NotFound(locator.to_string()))?;
        self.fetches
            .lock()
            .unwrap()
            .push((track.key.clone(), start, end));

        if track.fail_fetch {
            return Err(CatalogError::Unreachable("connection reset".to_string()));
        }

        let end = (end as usize + 1).min(track.bytes.len());
        let end = end.saturating_sub(track.short_by).max(start as usize);
        let chunks: Vec<CatalogResult<Bytes>> = track.bytes[start as usize..end]
            .chunks(UPSTREAM_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn report_completion(
        &self,
        track_key: &str,
        duration_secs: f64,
        position_secs: f64,
    ) -> CatalogResult<()> {
        self.reports.lock().unwrap().push(Report {
            track_key: track_key.to_string(),
            duration_secs,
            position_secs,
        });

        if self.fail_reports {
            return Err(CatalogError::Status {
                code: 500,
                message: "scrobble failed".to_string(),
            });
        }
        Ok(())
    }
}

/// Knobs for [`test_app_with`]
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub threshold: PlayedThreshold,
    pub window: Duration,
    pub chunk_size: usize,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            threshold: PlayedThreshold::FirstByte,
            window: Duration::from_secs(180),
            chunk_size: 16,
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub catalog: Arc<FakeCatalog>,
    pub store: Arc<SqliteDedupStore>,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(test_request("GET", uri)).await
    }

    pub async fn get_range(&self, uri: &str, range: &str) -> Response<Body> {
        self.request(range_request(uri, range)).await
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("ppcast.db")
    }
}

pub async fn test_app(catalog: FakeCatalog) -> TestApp {
    test_app_with(catalog, TestOptions::default()).await
}

pub async fn test_app_with(catalog: FakeCatalog, options: TestOptions) -> TestApp {
    let dir = TempDir::new().unwrap();
    let catalog = Arc::new(catalog);
    let (router, store) =
        router_on_db(Arc::clone(&catalog), &dir.path().join("ppcast.db"), &options).await;

    TestApp {
        router,
        catalog,
        store,
        dir,
    }
}

/// A second, independent service instance on an existing database file
pub async fn router_on_db(
    catalog: Arc<FakeCatalog>,
    db_path: &Path,
    options: &TestOptions,
) -> (Router, Arc<SqliteDedupStore>) {
    let pool = init_database(db_path).await.unwrap();
    let store = Arc::new(SqliteDedupStore::new(pool));

    let completion = CompletionConfig {
        threshold: options.threshold,
        ..CompletionConfig::default()
    };
    let shared_store: Arc<dyn DedupStore> = store.clone();
    let tracker = Arc::new(
        CompletionTracker::new(catalog.clone(), shared_store, SERVER_IDENTITY, &completion)
            .with_window(options.window),
    );

    let stream = StreamConfig {
        chunk_size: options.chunk_size,
        probe_concurrency: 2,
    };
    let state = AppState::new(catalog, tracker, &stream, "http://pods.test:5780");

    (build_router(state), store)
}

/// Serve `router` on an ephemeral local port through hyper
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn range_request(uri: &str, range: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("Range", range)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Result<Bytes, axum::Error> {
    axum::body::to_bytes(response.into_body(), usize::MAX).await
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
}

/// Wait for spawned completion work (early-termination reports)
pub async fn wait_for_reports(catalog: &FakeCatalog, count: usize) {
    for _ in 0..100 {
        if catalog.report_log().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Playlist used by most tests: sizes 100, 200, 150
pub fn road_trip() -> FakeCatalog {
    FakeCatalog::new().with_playlist(
        "42",
        "Road Trip",
        vec![
            track("a", 100, 180_000),
            track("b", 200, 240_000),
            track("c", 150, 200_500),
        ],
    )
}
