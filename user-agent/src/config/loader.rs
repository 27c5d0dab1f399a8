// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads the TOML file (if any), deserialises it into `FileConfig`, and
//! resolves that into typed `Settings`.

use std::{fs, net::SocketAddr, path::Path, time::Duration};

use super::{
    model::{ConfigError, FileConfig, FilterConfig, PeerLogConfig},
    types::{
        parse_backpressure, LoggingSettings, LogMode, PeerLogSettings, Settings, SnapshotSettings,
        SourceKind, SourceSettings, TraceSettings, DEFAULT_WAIT_TIMEOUT,
    },
};
use crate::{comms::filter::EventFilter, sink::writer::LogQueueConfig, trace::TraceFormatter};
use shared::constants::SNAPSHOT_HEADER_LEN;

/// Load settings from `path`, or defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let Some(path) = path else {
        log::debug!("No config file given, using defaults");
        return Ok(Settings::default());
    };
    log::debug!("Reading config from {:?}", path);
    let txt = fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let settings = from_toml_str(&txt)?;
    log::info!("Loaded config from {:?}", path);
    Ok(settings)
}

pub fn from_toml_str(txt: &str) -> Result<Settings, ConfigError> {
    let raw: FileConfig = toml::from_str(txt)?;
    resolve(raw)
}

/// Convert the raw mirrors into typed settings, filling defaults.
pub fn resolve(raw: FileConfig) -> Result<Settings, ConfigError> {
    let defaults = Settings::default();

    let logging = LoggingSettings {
        enable: raw.logging.enable,
        file: raw.logging.file,
        level: raw.logging.level,
    };

    let source = SourceSettings {
        kind: match raw.source.kind {
            Some(k) => k.parse::<SourceKind>()?,
            None => defaults.source.kind,
        },
        path: raw.source.path.unwrap_or(defaults.source.path),
        poll_timeout: duration_or(raw.source.poll_timeout, defaults.source.poll_timeout)?,
    };

    let snapshot = SnapshotSettings {
        enable: raw.snapshot.enable.unwrap_or(defaults.snapshot.enable),
        key: raw.snapshot.key.unwrap_or(defaults.snapshot.key),
        size: raw.snapshot.size.unwrap_or(defaults.snapshot.size),
    };
    if snapshot.size <= SNAPSHOT_HEADER_LEN {
        return Err(ConfigError::SnapshotTooSmall(snapshot.size));
    }

    let trace = TraceSettings {
        enable: raw.trace.enable.unwrap_or(defaults.trace.enable),
        format: TraceFormatter::new(raw.trace.timestamp, raw.trace.wide),
    };

    let metrics = raw
        .metrics
        .listen
        .map(|s| s.parse::<SocketAddr>().map_err(|e| ConfigError::InvalidListen(s, e)))
        .transpose()?;

    Ok(Settings {
        logging,
        source,
        filter: resolve_filter(raw.filter)?,
        peer_log: resolve_peer_log(raw.peer_log, defaults.peer_log)?,
        snapshot,
        trace,
        metrics,
    })
}

fn resolve_filter(raw: FilterConfig) -> Result<EventFilter, ConfigError> {
    Ok(EventFilter {
        family: raw
            .family
            .map(|f| f.parse().map_err(ConfigError::InvalidFamily))
            .transpose()?,
        local_ports: validate_ports(&raw.local_ports)?,
        remote_ports: validate_ports(&raw.remote_ports)?,
    })
}

fn resolve_peer_log(raw: PeerLogConfig, defaults: PeerLogSettings) -> Result<PeerLogSettings, ConfigError> {
    let mode = match raw.mode {
        Some(m) => m.parse::<LogMode>()?,
        None => defaults.mode,
    };
    let wait_timeout = duration_or(raw.wait_timeout, DEFAULT_WAIT_TIMEOUT)?;
    let base = LogQueueConfig::default();
    let queue = LogQueueConfig {
        capacity: raw.queue_capacity.unwrap_or(base.capacity).max(1),
        backpressure: match raw.backpressure {
            Some(b) => parse_backpressure(&b, wait_timeout)?,
            None => base.backpressure,
        },
        retry_attempts: raw.retry_attempts.unwrap_or(base.retry_attempts),
        retry_backoff: duration_or(raw.retry_backoff, base.retry_backoff)?,
    };
    Ok(PeerLogSettings { path: raw.path.unwrap_or(defaults.path), mode, queue })
}

fn duration_or(raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match raw {
        Some(s) => humantime::parse_duration(&s).map_err(|e| ConfigError::InvalidDuration(s, e)),
        None => Ok(default),
    }
}

fn validate_ports(ports: &[i64]) -> Result<Vec<u16>, ConfigError> {
    ports
        .iter()
        .map(|&p| match p {
            1..=65535 => Ok(p as u16),
            _ => Err(ConfigError::InvalidPort(p)),
        })
        .collect()
}

/// Parse a comma-separated port list as given on the command line.
pub fn parse_port_list(list: &str) -> Result<Vec<u16>, ConfigError> {
    let mut ports = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let port: i64 = item
            .parse()
            .map_err(|_| ConfigError::InvalidPortList(list.into()))?;
        ports.extend(validate_ports(&[port])?);
    }
    if ports.is_empty() {
        return Err(ConfigError::InvalidPortList(list.into()));
    }
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::events::AddressFamily;
    use crate::sink::writer::Backpressure;

    #[test]
    fn empty_file_gives_defaults() {
        let s = from_toml_str("").unwrap();
        assert_eq!(s.source.kind, SourceKind::Ring);
        assert_eq!(s.source.poll_timeout, Duration::from_millis(100));
        assert_eq!(s.peer_log.path.to_str(), Some("unique.txt"));
        assert_eq!(s.peer_log.mode, LogMode::Inline);
        assert_eq!((s.snapshot.enable, s.snapshot.key, s.snapshot.size), (true, 12345, 4096));
        assert!(s.trace.enable);
        assert!(s.filter.is_pass_all());
        assert!(s.metrics.is_none());
    }

    #[test]
    fn full_file_is_resolved() {
        let s = from_toml_str(
            r#"
            [logging]
            enable = true
            level = "debug"

            [source]
            kind = "jsonl"
            path = "/tmp/events.jsonl"
            poll_timeout = "250ms"

            [filter]
            family = "ipv6"
            remote_ports = [443, 8443]

            [peer_log]
            path = "/var/lib/sockwatch/unique.txt"
            mode = "queued"
            queue_capacity = 16
            backpressure = "wait"
            wait_timeout = "1s"
            retry_attempts = 5

            [snapshot]
            enable = false
            key = 777

            [trace]
            timestamp = true
            wide = true

            [metrics]
            listen = "127.0.0.1:9464"
            "#,
        )
        .unwrap();

        assert_eq!(s.source.kind, SourceKind::JsonLines);
        assert_eq!(s.source.poll_timeout, Duration::from_millis(250));
        assert_eq!(s.filter.family, Some(AddressFamily::Inet6));
        assert_eq!(s.filter.remote_ports, vec![443, 8443]);
        assert_eq!(s.peer_log.mode, LogMode::Queued);
        assert_eq!(s.peer_log.queue.capacity, 16);
        assert_eq!(s.peer_log.queue.backpressure, Backpressure::Wait(Duration::from_secs(1)));
        assert_eq!(s.peer_log.queue.retry_attempts, 5);
        assert!(!s.snapshot.enable);
        assert_eq!(s.snapshot.key, 777);
        assert!(s.trace.format.timestamp && s.trace.format.wide);
        assert_eq!(s.metrics.map(|a| a.port()), Some(9464));
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let err = from_toml_str("[filter]\nlocal_ports = [0]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(0)));
        let err = from_toml_str("[filter]\nremote_ports = [70000]").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(70000)));
    }

    #[test]
    fn bad_duration_names_the_value() {
        let err = from_toml_str("[source]\npoll_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration(ref s, _) if s == "soon"));
    }

    #[test]
    fn unknown_table_is_an_error() {
        assert!(matches!(from_toml_str("[database]\npath = \"x\""), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn port_lists_from_the_command_line() {
        assert_eq!(parse_port_list("80, 443,8080").unwrap(), vec![80, 443, 8080]);
        assert!(matches!(parse_port_list("80,http"), Err(ConfigError::InvalidPortList(_))));
        assert!(matches!(parse_port_list("65536"), Err(ConfigError::InvalidPort(65536))));
        assert!(parse_port_list("").is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(load(None).is_ok());
    }
}
