//! Inline peer log: one open/append/close per line, no fsync.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use super::{format_line, PeerLog, SinkError};
use crate::correlator::peers::FirstSeenPeer;

/// Append `line` to `path`, creating the file if needed.
pub fn append_line(path: &Path, line: &str) -> Result<(), SinkError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| SinkError::Open { path: path.to_path_buf(), source })?;
    file.write_all(line.as_bytes())
        .map_err(|source| SinkError::Write { path: path.to_path_buf(), source })
}

#[derive(Debug, Clone)]
pub struct FilePeerLog {
    path: PathBuf,
}

impl FilePeerLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open once for append so an unwritable path fails at startup rather
    /// than on the first peer.
    pub fn check_writable(&self) -> Result<(), SinkError> {
        append_line(&self.path, "")
    }
}

impl PeerLog for FilePeerLog {
    fn record(&mut self, peer: &FirstSeenPeer) -> Result<(), SinkError> {
        append_line(&self.path, &format_line(peer))
    }
}
