//! Typed runtime settings.
//!
//! Produced from the raw TOML mirrors in `model` by `loader::resolve`, with a
//! default for every field so an agent started without a config file still
//! runs: read the ring at [`DEFAULT_RING_PATH`], log peers to `unique.txt`,
//! publish snapshots at key 12345.

use shared::constants::{SHM_KEY, SNAPSHOT_SEGMENT_SIZE};
use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use super::model::ConfigError;
use crate::{
    comms::filter::EventFilter,
    sink::{
        writer::{Backpressure, LogQueueConfig},
        DEFAULT_PEER_LOG,
    },
    trace::TraceFormatter,
};

pub const DEFAULT_RING_PATH: &str = "/dev/shm/sockwatch.ring";
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Ring,
    JsonLines,
}

impl FromStr for SourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ring" => Ok(SourceKind::Ring),
            "jsonl" | "json" | "replay" => Ok(SourceKind::JsonLines),
            other => Err(ConfigError::InvalidSourceKind(other.into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    Inline,
    Queued,
}

impl FromStr for LogMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inline" => Ok(LogMode::Inline),
            "queued" => Ok(LogMode::Queued),
            other => Err(ConfigError::InvalidMode(other.into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub enable: bool,
    pub file:   Option<PathBuf>,
    pub level:  String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { enable: false, file: None, level: "INFO".into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub kind:         SourceKind,
    pub path:         PathBuf,
    pub poll_timeout: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            kind: SourceKind::Ring,
            path: PathBuf::from(DEFAULT_RING_PATH),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerLogSettings {
    pub path:  PathBuf,
    pub mode:  LogMode,
    pub queue: LogQueueConfig,
}

impl Default for PeerLogSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PEER_LOG),
            mode: LogMode::Inline,
            queue: LogQueueConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSettings {
    pub enable: bool,
    pub key:    i32,
    pub size:   usize,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self { enable: true, key: SHM_KEY, size: SNAPSHOT_SEGMENT_SIZE }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceSettings {
    pub enable: bool,
    pub format: TraceFormatter,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self { enable: true, format: TraceFormatter::default() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub logging:  LoggingSettings,
    pub source:   SourceSettings,
    pub filter:   EventFilter,
    pub peer_log: PeerLogSettings,
    pub snapshot: SnapshotSettings,
    pub trace:    TraceSettings,
    pub metrics:  Option<SocketAddr>,
}

/// `"wait"` uses `wait_timeout`; `"drop-oldest"` needs nothing else.
pub fn parse_backpressure(name: &str, wait_timeout: Duration) -> Result<Backpressure, ConfigError> {
    match name.to_lowercase().replace('_', "-").as_str() {
        "wait" => Ok(Backpressure::Wait(wait_timeout)),
        "drop-oldest" => Ok(Backpressure::DropOldest),
        other => Err(ConfigError::InvalidBackpressure(other.into())),
    }
}
