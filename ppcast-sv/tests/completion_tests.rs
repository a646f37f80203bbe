//! Integration tests for completion reporting through the stream endpoint
//!
//! Reports are observed on the fake catalog; dedup state lives in a real
//! SQLite file so concurrent requests and separate service instances share it.

mod helpers;

use helpers::*;
use ppcast_common::config::PlayedThreshold;
use ppcast_sv::completion::{DedupKey, DedupStore};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// First-Byte Policy
// =============================================================================

#[tokio::test]
async fn test_full_stream_reports_every_track_once() {
    let app = test_app(road_trip()).await;

    let response = app.get("/stream/42.mp3").await;
    body_bytes(response).await.unwrap();

    let reports = app.catalog.report_log();
    assert_eq!(
        reports,
        vec![
            Report {
                track_key: "a".to_string(),
                duration_secs: 180.0,
                position_secs: 180.0,
            },
            Report {
                track_key: "b".to_string(),
                duration_secs: 240.0,
                position_secs: 420.0,
            },
            Report {
                track_key: "c".to_string(),
                duration_secs: 200.5,
                position_secs: 620.5,
            },
        ]
    );
}

#[tokio::test]
async fn test_ranged_stream_reports_only_touched_tracks() {
    let app = test_app(road_trip()).await;

    let response = app.get_range("/stream/42.mp3", "bytes=120-130").await;
    body_bytes(response).await.unwrap();

    let reports = app.catalog.report_log();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].track_key, "b");
    // Position is where b ends in the episode
    assert_eq!(reports[0].position_secs, 420.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_streams_report_once() {
    let app = test_app(road_trip()).await;

    let (first, second) = tokio::join!(
        async { body_bytes(app.get("/stream/42.mp3").await).await },
        async { body_bytes(app.get_range("/stream/42.mp3", "bytes=0-").await).await },
    );
    assert_eq!(first.unwrap().len(), 450);
    assert_eq!(second.unwrap().len(), 450);

    assert_eq!(app.catalog.reported_keys(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_repeat_inside_window_is_suppressed() {
    let app = test_app(road_trip()).await;

    body_bytes(app.get("/stream/42.mp3").await).await.unwrap();
    body_bytes(app.get_range("/stream/42.mp3", "bytes=0-99").await)
        .await
        .unwrap();

    assert_eq!(app.catalog.reported_keys(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_repeat_after_window_reports_again() {
    let options = TestOptions {
        window: Duration::from_millis(100),
        ..TestOptions::default()
    };
    let app = test_app_with(road_trip(), options).await;

    body_bytes(app.get_range("/stream/42.mp3", "bytes=0-9").await)
        .await
        .unwrap();
    body_bytes(app.get_range("/stream/42.mp3", "bytes=0-9").await)
        .await
        .unwrap();
    assert_eq!(app.catalog.reported_keys(), vec!["a"]);

    tokio::time::sleep(Duration::from_millis(150)).await;

    body_bytes(app.get_range("/stream/42.mp3", "bytes=0-9").await)
        .await
        .unwrap();
    assert_eq!(app.catalog.reported_keys(), vec!["a", "a"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_separate_instances_share_dedup_records() {
    let app = test_app(road_trip()).await;
    let (other_router, _store) = router_on_db(
        Arc::clone(&app.catalog),
        &app.db_path(),
        &TestOptions::default(),
    )
    .await;
    let other = TestApp {
        router: other_router,
        catalog: Arc::clone(&app.catalog),
        store: Arc::clone(&app.store),
        dir: tempfile::TempDir::new().unwrap(),
    };

    let (first, second) = tokio::join!(
        async { body_bytes(app.get("/stream/42.mp3").await).await },
        async { body_bytes(other.get("/stream/42.mp3").await).await },
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(app.catalog.reported_keys(), vec!["a", "b", "c"]);
}

// =============================================================================
// Full-Track Policy
// =============================================================================

#[tokio::test]
async fn test_full_track_policy_ignores_partial_tracks() {
    let options = TestOptions {
        threshold: PlayedThreshold::FullTrack,
        ..TestOptions::default()
    };
    let app = test_app_with(road_trip(), options).await;

    // All of b, part of c
    body_bytes(app.get_range("/stream/42.mp3", "bytes=100-349").await)
        .await
        .unwrap();
    assert_eq!(app.catalog.reported_keys(), vec!["b"]);

    body_bytes(app.get("/stream/42.mp3").await).await.unwrap();
    assert_eq!(app.catalog.reported_keys(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_full_track_policy_reports_over_a_real_connection() {
    let options = TestOptions {
        threshold: PlayedThreshold::FullTrack,
        ..TestOptions::default()
    };
    let app = test_app_with(road_trip(), options).await;
    let addr = serve(app.router.clone()).await;

    let response = reqwest::get(format!("http://{}/stream/42.mp3", addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body = response.bytes().await.unwrap();
    assert_eq!(body.as_ref(), app.catalog.concatenation("42").as_slice());

    wait_for_reports(&app.catalog, 3).await;
    assert_eq!(app.catalog.reported_keys(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_first_byte_policy_reports_over_a_real_connection() {
    let app = test_app(road_trip()).await;
    let addr = serve(app.router.clone()).await;

    let client = reqwest::Client::new();
    let body = client
        .get(format!("http://{}/stream/42.mp3", addr))
        .header("Range", "bytes=100-299")
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.len(), 200);

    wait_for_reports(&app.catalog, 1).await;
    assert_eq!(app.catalog.reported_keys(), vec!["b"]);
}

#[tokio::test]
async fn test_dedup_record_keeps_first_seen_time() {
    let app = test_app(road_trip()).await;

    body_bytes(app.get_range("/stream/42.mp3", "bytes=0-9").await)
        .await
        .unwrap();

    let pool = ppcast_common::db::init_database(&app.db_path()).await.unwrap();
    let (first_seen_at, reported_at): (i64, i64) = sqlx::query_as(
        "SELECT first_seen_at, reported_at FROM completion_records WHERE track_key = ?",
    )
    .bind("a")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(first_seen_at > 0);
    assert!(first_seen_at <= reported_at);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_lock_held_elsewhere_skips_report() {
    let app = test_app(road_trip()).await;

    let key = DedupKey::new(SERVER_IDENTITY, "a");
    let held = app
        .store
        .try_acquire(&key, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(held.is_some());

    body_bytes(app.get("/stream/42.mp3").await).await.unwrap();

    // The stream itself is unaffected
    assert_eq!(app.catalog.reported_keys(), vec!["b", "c"]);
}

#[tokio::test]
async fn test_failed_report_is_not_retried_inside_window() {
    let app = test_app(road_trip().failing_reports()).await;

    let body = body_bytes(app.get("/stream/42.mp3").await).await.unwrap();
    assert_eq!(body.len(), 450);
    assert_eq!(app.catalog.report_log().len(), 3);

    body_bytes(app.get("/stream/42.mp3").await).await.unwrap();
    assert_eq!(app.catalog.report_log().len(), 3);

    let last = app
        .store
        .read_last_reported(&DedupKey::new(SERVER_IDENTITY, "a"))
        .await
        .unwrap();
    assert!(last.is_some());
}

#[tokio::test]
async fn test_truncated_stream_reports_tracks_already_started() {
    let catalog = FakeCatalog::new().with_playlist(
        "5",
        "Broken end",
        vec![
            track("a", 100, 1000),
            track("b", 100, 1000),
            track("c", 100, 1000).failing_fetch(),
        ],
    );
    let app = test_app(catalog).await;

    assert!(body_bytes(app.get("/stream/5.mp3").await).await.is_err());

    wait_for_reports(&app.catalog, 2).await;
    assert_eq!(app.catalog.reported_keys(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_client_disconnect_stops_fetching_and_releases_locks() {
    let app = test_app(road_trip()).await;

    // Read one chunk, then drop the response
    {
        use http_body_util::BodyExt;
        let response = app.get("/stream/42.mp3").await;
        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        assert!(frame.is_data());
    }

    wait_for_reports(&app.catalog, 1).await;
    assert_eq!(app.catalog.reported_keys(), vec!["a"]);

    let fetched: Vec<String> = app.catalog.fetch_log().into_iter().map(|f| f.0).collect();
    assert_eq!(fetched, vec!["a"]);

    // Lock for a was released
    tokio::time::sleep(Duration::from_millis(50)).await;
    let lock = app
        .store
        .try_acquire(&DedupKey::new(SERVER_IDENTITY, "a"), Duration::from_secs(30))
        .await
        .unwrap();
    assert!(lock.is_some());
}
