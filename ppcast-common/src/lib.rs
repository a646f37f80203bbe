//! # ppcast Common Library
//!
//! Shared code for the ppcast services:
//! - Error type shared by every crate
//! - Bootstrap configuration (TOML file with command-line / environment overrides)
//! - SQLite initialisation for the completion dedup store
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
