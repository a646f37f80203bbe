//! Durable completion dedup store
//!
//! Records and locks are keyed by (server identity, track key) and live in
//! SQLite so that independent processes share them. Lock acquisition never
//! waits: a held lock or a busy database both read as "someone else is
//! reporting this track".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ppcast_common::time::{from_unix_millis, now, to_unix_millis};
use ppcast_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Dedup key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub server_identity: String,
    pub track_key: String,
}

impl DedupKey {
    pub fn new(server_identity: impl Into<String>, track_key: impl Into<String>) -> Self {
        Self {
            server_identity: server_identity.into(),
            track_key: track_key.into(),
        }
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.server_identity, self.track_key)
    }
}

/// A held report lock. Only the holder's token can release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupLock {
    pub key: DedupKey,
    pub token: String,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Take the lock for `key` without waiting.
    ///
    /// `Ok(None)` means busy. Locks older than `lock_ttl` are abandoned and
    /// may be taken over.
    async fn try_acquire(&self, key: &DedupKey, lock_ttl: Duration) -> Result<Option<DedupLock>>;

    async fn release(&self, lock: &DedupLock) -> Result<()>;

    /// When the track was last reported, if ever
    async fn read_last_reported(&self, key: &DedupKey) -> Result<Option<DateTime<Utc>>>;

    /// Mark the track reported at `reported_at`
    async fn write_reported(
        &self,
        key: &DedupKey,
        first_seen_at: DateTime<Utc>,
        reported_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Releases its lock when dropped.
///
/// Dropping spawns the release onto the runtime, so a report cancelled by a
/// client disconnect still frees the lock.
pub struct LockGuard {
    store: Arc<dyn DedupStore>,
    lock: Option<DedupLock>,
}

impl LockGuard {
    pub fn new(store: Arc<dyn DedupStore>, lock: DedupLock) -> Self {
        Self {
            store,
            lock: Some(lock),
        }
    }

    /// Release now and report the outcome
    pub async fn release(mut self) -> Result<()> {
        match self.lock.take() {
            Some(lock) => self.store.release(&lock).await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };

        let store = Arc::clone(&self.store);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release(&lock).await {
                        warn!(key = %lock.key, "Failed to release report lock: {}", e);
                    }
                });
            }
            Err(_) => {
                warn!(key = %lock.key, "No runtime to release report lock; it will expire");
            }
        }
    }
}

/// SQLite-backed [`DedupStore`]
#[derive(Clone)]
pub struct SqliteDedupStore {
    pool: SqlitePool,
}

impl SqliteDedupStore {
    /// Wrap a pool whose schema was created by `ppcast_common::db::init_database`
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn acquire_inner(&self, key: &DedupKey, lock_ttl: Duration) -> Result<Option<DedupLock>> {
        let now_ms = to_unix_millis(now());
        let stale_before = now_ms.saturating_sub(lock_ttl.as_millis() as i64);

        let stale = sqlx::query(
            "DELETE FROM completion_locks WHERE server_identity = ? AND track_key = ? AND acquired_at < ?",
        )
        .bind(&key.server_identity)
        .bind(&key.track_key)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        if stale.rows_affected() > 0 {
            warn!(key = %key, "Took over abandoned report lock");
        }

        let token = Uuid::new_v4().to_string();
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO completion_locks (server_identity, track_key, token, acquired_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&key.server_identity)
        .bind(&key.track_key)
        .bind(&token)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(DedupLock {
            key: key.clone(),
            token,
        }))
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn try_acquire(&self, key: &DedupKey, lock_ttl: Duration) -> Result<Option<DedupLock>> {
        match self.acquire_inner(key, lock_ttl).await {
            Err(e) if e.is_busy() => {
                debug!(key = %key, "Dedup database busy, treating lock as held");
                Ok(None)
            }
            other => other,
        }
    }

    async fn release(&self, lock: &DedupLock) -> Result<()> {
        sqlx::query(
            "DELETE FROM completion_locks WHERE server_identity = ? AND track_key = ? AND token = ?",
        )
        .bind(&lock.key.server_identity)
        .bind(&lock.key.track_key)
        .bind(&lock.token)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_last_reported(&self, key: &DedupKey) -> Result<Option<DateTime<Utc>>> {
        let reported_at: Option<Option<i64>> = sqlx::query_scalar(
            "SELECT reported_at FROM completion_records WHERE server_identity = ? AND track_key = ?",
        )
        .bind(&key.server_identity)
        .bind(&key.track_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reported_at.flatten().map(from_unix_millis))
    }

    async fn write_reported(
        &self,
        key: &DedupKey,
        first_seen_at: DateTime<Utc>,
        reported_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO completion_records (server_identity, track_key, first_seen_at, reported_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (server_identity, track_key)
            DO UPDATE SET first_seen_at = excluded.first_seen_at, reported_at = excluded.reported_at
            "#,
        )
        .bind(&key.server_identity)
        .bind(&key.track_key)
        .bind(to_unix_millis(first_seen_at))
        .bind(to_unix_millis(reported_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
