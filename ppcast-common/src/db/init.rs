//! Database initialization
//!
//! The database holds only completion dedup state, which several ppcast
//! processes may share. It is created on first run.

use crate::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Busy timeout for SQLite writes.
///
/// Kept short: a writer that cannot get the database quickly gives up
/// rather than stall an audio stream.
pub const BUSY_TIMEOUT_MS: u64 = 250;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Applied to every pooled connection, not just the first
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Idempotent - safe to call on every startup
    create_completion_records_table(&pool).await?;
    create_completion_locks_table(&pool).await?;

    Ok(pool)
}

/// One row per (server, track): when it was first seen and last reported.
/// Timestamps are Unix milliseconds.
async fn create_completion_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS completion_records (
            server_identity TEXT NOT NULL,
            track_key TEXT NOT NULL,
            first_seen_at INTEGER NOT NULL,
            reported_at INTEGER,
            PRIMARY KEY (server_identity, track_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Exclusive report locks. A row exists only while some process is
/// deciding whether to report the track.
async fn create_completion_locks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS completion_locks (
            server_identity TEXT NOT NULL,
            track_key TEXT NOT NULL,
            token TEXT NOT NULL,
            acquired_at INTEGER NOT NULL,
            PRIMARY KEY (server_identity, track_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
