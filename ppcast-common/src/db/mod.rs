//! Database initialization

pub mod init;

pub use init::*;
