//! Audit log of first-seen peers.
//!
//! Two ways to get a line onto disk:
//!   • [`file::FilePeerLog`]    → open, append one line, close; on the caller's
//!     thread.
//!   • [`writer::QueuedPeerLog`] → bounded queue in front of a single writer
//!     thread, so a slow disk cannot stall correlation.
//!
//! Either way lines land in the order the correlator produced them.

pub mod file;
pub mod writer;

use std::{io, path::PathBuf};
use thiserror::Error;

use crate::correlator::peers::FirstSeenPeer;

/// Default audit file, relative to the working directory.
pub const DEFAULT_PEER_LOG: &str = "unique.txt";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot open peer log {path:?}: {source}")]
    Open { path: PathBuf, #[source] source: io::Error },

    #[error("cannot write peer log {path:?}: {source}")]
    Write { path: PathBuf, #[source] source: io::Error },

    #[error("peer log queue full, line dropped")]
    QueueFull,

    #[error("peer log writer has shut down")]
    Closed,
}

pub trait PeerLog {
    fn record(&mut self, peer: &FirstSeenPeer) -> Result<(), SinkError>;
}

impl<T: PeerLog + ?Sized> PeerLog for Box<T> {
    fn record(&mut self, peer: &FirstSeenPeer) -> Result<(), SinkError> {
        (**self).record(peer)
    }
}

/// One audit line, newline included.
pub fn format_line(peer: &FirstSeenPeer) -> String {
    let ev = &peer.record.event;
    format!(
        "Process Name: {}    S_IP: {}    SPort: {}   D_IP: {}   DPort: {}    ThreadID: {}    PID: {}     Latency: {:.3}\n",
        ev.comm,
        ev.local_addr,
        ev.local_port,
        ev.remote_addr,
        ev.remote_port,
        ev.tid,
        ev.pid,
        ev.latency_ms(),
    )
}
