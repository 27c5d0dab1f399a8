//! Global `log` dispatch.
//!
//! Every record is rendered as
//! `[rfc3339][LEVEL][target][pid=..][tid=..] message` and goes to stderr
//! (stdout carries the trace display) and, when enabled, to a log file.

use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::{path::PathBuf, process, thread};

use crate::config::LoggingSettings;

/// Map a configured level name onto a filter. Unknown names mean INFO.
pub fn level_from_name(name: &str) -> LevelFilter {
    match name.to_uppercase().as_str() {
        "OFF" => LevelFilter::Off,
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

pub fn log_file_path(settings: &LoggingSettings) -> Option<PathBuf> {
    settings
        .enable
        .then(|| settings.file.clone().unwrap_or_else(|| PathBuf::from("sockwatch.log")))
}

/// Install the global logger. `verbose` forces DEBUG regardless of config.
pub fn setup_logging(settings: &LoggingSettings, verbose: bool) -> Result<(), fern::InitError> {
    let level = match verbose {
        true => LevelFilter::Debug,
        false => level_from_name(&settings.level),
    };

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(path) = log_file_path(settings) {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(level_from_name("debug"), LevelFilter::Debug);
        assert_eq!(level_from_name("Warn"), LevelFilter::Warn);
        assert_eq!(level_from_name("chatty"), LevelFilter::Info);
    }

    #[test]
    fn file_only_when_enabled() {
        let mut s = LoggingSettings::default();
        assert_eq!(log_file_path(&s), None);
        s.enable = true;
        assert_eq!(log_file_path(&s), Some(PathBuf::from("sockwatch.log")));
        s.file = Some(PathBuf::from("/var/log/sw.log"));
        assert_eq!(log_file_path(&s), Some(PathBuf::from("/var/log/sw.log")));
    }
}
