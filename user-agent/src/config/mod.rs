//! Public API for configuration

pub mod loader;
pub mod model;
pub mod types;

// Re-export the main entrypoints:
pub use loader::{load, parse_port_list};
pub use model::ConfigError;
pub use types::{
    LoggingSettings, LogMode, PeerLogSettings, Settings, SnapshotSettings, SourceKind,
    SourceSettings, TraceSettings,
};
