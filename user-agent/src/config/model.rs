// src/config/model.rs

//! Raw mirrors of the TOML tables. Every key is optional; conversion into
//! typed settings happens in `loader`.

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Whole file as deserialised from TOML
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub logging:  LoggingConfig,
    pub source:   SourceConfig,
    pub filter:   FilterConfig,
    pub peer_log: PeerLogConfig,
    pub snapshot: SnapshotConfig,
    pub trace:    TraceConfig,
    pub metrics:  MetricsConfig,
}

/// Mirror of the `[logging]` table
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enable: bool,
    pub file:   Option<PathBuf>,
    pub level:  String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: false, file: None, level: "INFO".into() }
    }
}

/// Mirror of the `[source]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind:         Option<String>,
    pub path:         Option<PathBuf>,
    pub poll_timeout: Option<String>,
}

/// Mirror of the `[filter]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub family:       Option<String>,
    pub local_ports:  Vec<i64>,
    pub remote_ports: Vec<i64>,
}

/// Mirror of the `[peer_log]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PeerLogConfig {
    pub path:           Option<PathBuf>,
    pub mode:           Option<String>,
    pub queue_capacity: Option<usize>,
    pub backpressure:   Option<String>,
    pub wait_timeout:   Option<String>,
    pub retry_attempts: Option<u32>,
    pub retry_backoff:  Option<String>,
}

/// Mirror of the `[snapshot]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enable: Option<bool>,
    pub key:    Option<i32>,
    pub size:   Option<usize>,
}

/// Mirror of the `[trace]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enable:    Option<bool>,
    pub timestamp: bool,
    pub wide:      bool,
}

/// Mirror of the `[metrics]` table
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub listen: Option<String>,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("port {0} is outside 1..=65535")]
    InvalidPort(i64),

    #[error("invalid port list '{0}'")]
    InvalidPortList(String),

    #[error("{0}")]
    InvalidFamily(String),

    #[error("unknown source kind '{0}' (expected ring or jsonl)")]
    InvalidSourceKind(String),

    #[error("unknown peer log mode '{0}' (expected inline or queued)")]
    InvalidMode(String),

    #[error("unknown backpressure policy '{0}' (expected wait or drop-oldest)")]
    InvalidBackpressure(String),

    #[error("invalid metrics listen address '{0}': {1}")]
    InvalidListen(String, #[source] std::net::AddrParseError),

    #[error("snapshot segment of {0} bytes is too small")]
    SnapshotTooSmall(usize),
}
