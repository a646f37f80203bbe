//! Bootstrap configuration loading
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Command-line and environment values arrive together as [`ConfigOverrides`]
//! (clap reads both); this module owns the TOML file and the defaults.
//! A missing config file is not an error: the service starts on defaults.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PPCAST_CONFIG";

/// Bootstrap configuration loaded from TOML file
///
/// Read once at startup; the service must restart to pick up changes.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address the HTTP listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Public base URL written into feed enclosures.
    ///
    /// Defaults to `http://localhost:<port>`.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Path to the SQLite file holding completion records
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Identity of the media server used in completion dedup keys.
    ///
    /// Defaults to the Plex URL, so two ppcast instances fronting the
    /// same server share dedup records.
    #[serde(default)]
    pub server_identity: Option<String>,

    /// Upstream media catalog
    #[serde(default)]
    pub plex: PlexConfig,

    /// Completion reporting policy
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Streaming tunables
    #[serde(default)]
    pub stream: StreamConfig,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Plex media server connection
#[derive(Debug, Clone, Deserialize)]
pub struct PlexConfig {
    /// Base URL, e.g. `http://127.0.0.1:32400`
    #[serde(default)]
    pub url: String,

    /// `X-Plex-Token` appended to every upstream request
    #[serde(default)]
    pub token: String,

    /// Accept self-signed certificates (common on LAN Plex installs)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Timeout for metadata requests (listing, probes, reports)
    #[serde(default = "default_plex_timeout_secs")]
    pub timeout_secs: u64,
}

/// When a track counts as played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayedThreshold {
    /// The first byte of the track was forwarded to the client
    #[default]
    FirstByte,
    /// Every byte of the track was forwarded within one response
    FullTrack,
}

/// Completion reporting policy
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    /// Dedup window: a repeated report for the same track inside this
    /// interval is suppressed
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Played threshold
    #[serde(default)]
    pub threshold: PlayedThreshold,

    /// Age after which an unreleased report lock is considered abandoned
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

/// Streaming tunables
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Maximum size of a body chunk forwarded to the client
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of size probes in flight while building a track index
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_port() -> u16 {
    5780
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_plex_timeout_secs() -> u64 {
    30
}

fn default_window_secs() -> u64 {
    180
}

fn default_lock_ttl_secs() -> u64 {
    30
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_probe_concurrency() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PlexConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            accept_invalid_certs: false,
            timeout_secs: default_plex_timeout_secs(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            threshold: PlayedThreshold::default(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            probe_concurrency: default_probe_concurrency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            base_url: None,
            database_path: None,
            server_identity: None,
            plex: PlexConfig::default(),
            completion: CompletionConfig::default(),
            stream: StreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub base_url: Option<String>,
    pub plex_url: Option<String>,
    pub plex_token: Option<String>,
    pub database_path: Option<PathBuf>,
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Apply command-line / environment overrides on top of file values
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(bind) = &overrides.bind_address {
            self.bind_address = bind.clone();
        }
        if let Some(base_url) = &overrides.base_url {
            self.base_url = Some(base_url.clone());
        }
        if let Some(url) = &overrides.plex_url {
            self.plex.url = url.clone();
        }
        if let Some(token) = &overrides.plex_token {
            self.plex.token = token.clone();
        }
        if let Some(path) = &overrides.database_path {
            self.database_path = Some(path.clone());
        }
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.plex.url.trim().is_empty() {
            return Err(Error::Config(
                "plex.url is required (config file, --plex-url or PPCAST_PLEX_URL)".to_string(),
            ));
        }
        if self.stream.chunk_size == 0 {
            return Err(Error::Config("stream.chunk_size must be greater than 0".to_string()));
        }
        if self.stream.probe_concurrency == 0 {
            return Err(Error::Config(
                "stream.probe_concurrency must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL for links, without a trailing slash
    pub fn resolved_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }

    /// Database path, falling back to the platform data directory
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    /// Identity used in completion dedup keys
    pub fn resolved_server_identity(&self) -> String {
        match &self.server_identity {
            Some(identity) if !identity.trim().is_empty() => identity.clone(),
            _ => self.plex.url.trim_end_matches('/').to_string(),
        }
    }
}

/// Resolve which config file to read
///
/// 1. Command-line argument
/// 2. `env_var_name` environment variable
/// 3. `~/.config/ppcast/config.toml`, then `/etc/ppcast/config.toml` (first that exists)
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform locations
    let user_config = dirs::config_dir().map(|d| d.join("ppcast").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/ppcast/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Load the bootstrap config
///
/// A missing file logs a warning and yields defaults; an unreadable or
/// malformed file is an error.
pub fn load_toml_config(path: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = path else {
        warn!("No config file found, using built-in defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!("Config file not found: {} (using built-in defaults)", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = TomlConfig::from_toml_str(&content)?;
    info!("Loaded config file: {}", path.display());
    Ok(config)
}

/// Get OS-dependent default database path
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ppcast").join("ppcast.db"))
        .unwrap_or_else(|| PathBuf::from("./ppcast_data/ppcast.db"))
}
