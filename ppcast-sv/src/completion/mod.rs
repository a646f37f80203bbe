//! Completion tracker
//!
//! Per track key: `Unseen -> Pending -> Reported -> (window expires) -> Unseen`.
//! A streaming session marks tracks Pending as bytes go out; the
//! Pending -> Reported transition runs from `finish` when the body is
//! drained, otherwise from the session's `Drop` (hyper stops polling once
//! `Content-Length` bytes are written). Reports are at most once
//! per dedup window: the marker is written before the catalog call and is
//! not rolled back when that call fails.

pub mod store;

use crate::catalog::MediaCatalog;
use crate::playlist::Track;
use chrono::{DateTime, Utc};
use ppcast_common::config::{CompletionConfig, PlayedThreshold};
use ppcast_common::time::{self, millis_to_seconds, to_unix_millis};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use store::{DedupKey, DedupLock, DedupStore, LockGuard, SqliteDedupStore};

/// A track that reached the played threshold and awaits reporting.
///
/// Pending state lives only in the session that produced it; other
/// sessions and processes never see it. The durable record is written at
/// report time, carrying `first_seen_at`, and is what the dedup window
/// checks.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCompletion {
    pub track_key: String,
    pub duration_ms: u64,
    /// Sum of the durations of the tracks before this one
    pub start_time_ms: u64,
    pub first_seen_at: DateTime<Utc>,
}

impl PendingCompletion {
    pub fn from_track(track: &Track, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            track_key: track.key.clone(),
            duration_ms: track.duration_ms,
            start_time_ms: track.start_time_ms,
            first_seen_at,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        millis_to_seconds(self.duration_ms)
    }

    /// Where the track ends within the concatenated episode
    pub fn position_secs(&self) -> f64 {
        millis_to_seconds(self.start_time_ms + self.duration_ms)
    }
}

/// Result of one report attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The catalog accepted the report
    Reported,
    /// Already reported inside the dedup window
    Suppressed,
    /// Another request or process holds the lock
    Busy,
    /// The catalog call failed; the track stays marked as reported
    Failed(String),
    /// The dedup store failed; nothing was reported
    StoreError(String),
}

/// Decides whether to report a track and talks to the catalog
pub struct CompletionTracker {
    catalog: Arc<dyn MediaCatalog>,
    store: Arc<dyn DedupStore>,
    server_identity: String,
    window: Duration,
    lock_ttl: Duration,
    threshold: PlayedThreshold,
}

impl CompletionTracker {
    pub fn new(
        catalog: Arc<dyn MediaCatalog>,
        store: Arc<dyn DedupStore>,
        server_identity: impl Into<String>,
        config: &CompletionConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            server_identity: server_identity.into(),
            window: Duration::from_secs(config.window_secs),
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            threshold: config.threshold,
        }
    }

    /// Override the dedup window (sub-second windows are handy in tests)
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Start tracking one streaming response
    pub fn session(self: &Arc<Self>, playlist_id: &str) -> CompletionSession {
        CompletionSession {
            tracker: Arc::clone(self),
            playlist_id: playlist_id.to_string(),
            pending: Vec::new(),
        }
    }

    /// Run the Pending -> Reported transition for one track
    pub async fn try_report(&self, pending: &PendingCompletion) -> ReportOutcome {
        let key = DedupKey::new(self.server_identity.as_str(), pending.track_key.as_str());

        let guard = match self.store.try_acquire(&key, self.lock_ttl).await {
            Ok(Some(lock)) => LockGuard::new(Arc::clone(&self.store), lock),
            Ok(None) => {
                debug!(track = %pending.track_key, "Report lock held elsewhere, skipping");
                return ReportOutcome::Busy;
            }
            Err(e) => {
                warn!(track = %pending.track_key, "Dedup store unavailable: {}", e);
                return ReportOutcome::StoreError(e.to_string());
            }
        };

        let now = time::now();
        match self.store.read_last_reported(&key).await {
            Ok(Some(last)) if self.within_window(last, now) => {
                release(guard).await;
                debug!(
                    track = %pending.track_key,
                    last_reported = %last,
                    "Already reported inside dedup window"
                );
                return ReportOutcome::Suppressed;
            }
            Ok(_) => {}
            Err(e) => {
                release(guard).await;
                warn!(track = %pending.track_key, "Failed to read completion record: {}", e);
                return ReportOutcome::StoreError(e.to_string());
            }
        }

        if let Err(e) = self
            .store
            .write_reported(&key, pending.first_seen_at, now)
            .await
        {
            release(guard).await;
            warn!(track = %pending.track_key, "Failed to write completion record: {}", e);
            return ReportOutcome::StoreError(e.to_string());
        }

        // The marker is durable; other requests may proceed and will be suppressed
        release(guard).await;

        match self
            .catalog
            .report_completion(
                &pending.track_key,
                pending.duration_secs(),
                pending.position_secs(),
            )
            .await
        {
            Ok(()) => {
                info!(
                    track = %pending.track_key,
                    duration_secs = pending.duration_secs(),
                    position_secs = pending.position_secs(),
                    "Reported track completion"
                );
                ReportOutcome::Reported
            }
            Err(e) => {
                warn!(track = %pending.track_key, "Completion report failed: {}", e);
                ReportOutcome::Failed(e.to_string())
            }
        }
    }

    fn within_window(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let elapsed_ms = to_unix_millis(now) - to_unix_millis(last);
        elapsed_ms < self.window.as_millis() as i64
    }
}

async fn release(guard: LockGuard) {
    if let Err(e) = guard.release().await {
        warn!("Failed to release report lock: {}", e);
    }
}

async fn report_all(
    tracker: Arc<CompletionTracker>,
    pending: Vec<PendingCompletion>,
) -> Vec<ReportOutcome> {
    let mut outcomes = Vec::with_capacity(pending.len());
    for completion in &pending {
        outcomes.push(tracker.try_report(completion).await);
    }
    outcomes
}

/// Completion state of one streaming response
pub struct CompletionSession {
    tracker: Arc<CompletionTracker>,
    playlist_id: String,
    pending: Vec<PendingCompletion>,
}

impl CompletionSession {
    /// The first byte of `track` was forwarded
    pub fn track_started(&mut self, track: &Track) {
        if self.tracker.threshold == PlayedThreshold::FirstByte {
            self.mark_pending(track);
        }
    }

    /// Every byte of `track` was forwarded
    pub fn track_finished(&mut self, track: &Track) {
        if self.tracker.threshold == PlayedThreshold::FullTrack {
            self.mark_pending(track);
        }
    }

    pub fn pending(&self) -> &[PendingCompletion] {
        &self.pending
    }

    fn mark_pending(&mut self, track: &Track) {
        if self.pending.iter().any(|p| p.track_key == track.key) {
            return;
        }

        debug!(
            playlist = %self.playlist_id,
            track = %track.key,
            "Track pending completion"
        );
        self.pending
            .push(PendingCompletion::from_track(track, time::now()));
    }

    /// Report every pending track.
    ///
    /// Reports run on their own task, so they complete even if the caller
    /// is cancelled.
    pub async fn finish(mut self) -> Vec<ReportOutcome> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Vec::new();
        }

        let task = tokio::spawn(report_all(Arc::clone(&self.tracker), pending));
        match task.await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(playlist = %self.playlist_id, "Completion reporting task failed: {}", e);
                Vec::new()
            }
        }
    }
}

impl Drop for CompletionSession {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.pending);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(
                    playlist = %self.playlist_id,
                    tracks = pending.len(),
                    "Stream ended early, reporting pending tracks"
                );
                handle.spawn(report_all(Arc::clone(&self.tracker), pending));
            }
            Err(_) => {
                warn!(
                    playlist = %self.playlist_id,
                    tracks = pending.len(),
                    "No runtime to report pending tracks"
                );
            }
        }
    }
}
