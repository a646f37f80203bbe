//! Common error types for ppcast

use thiserror::Error;

/// Common result type for ppcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across ppcast crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True when SQLite reported the database as locked or busy.
    ///
    /// Callers on the streaming path treat this as "another process holds it"
    /// instead of waiting.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes
                db_err
                    .code()
                    .and_then(|code| code.parse::<i64>().ok())
                    .map(|code| matches!(code & 0xff, 5 | 6))
                    .unwrap_or(false)
            }
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}
