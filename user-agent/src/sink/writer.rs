//! Queued peer log.
//!
//! The correlator pushes formatted lines into a bounded crossbeam queue; one
//! writer thread drains it and appends each line, retrying failed appends
//! with linear backoff. When the queue is full the configured
//! [`Backpressure`] decides who loses: the new line after a bounded wait, or
//! the oldest queued line.

use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TrySendError};
use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{file::append_line, format_line, PeerLog, SinkError};
use crate::correlator::peers::FirstSeenPeer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Block the correlator up to the given time, then drop the new line.
    Wait(Duration),
    /// Evict the oldest queued line to make room.
    DropOldest,
}

#[derive(Debug, Clone)]
pub struct LogQueueConfig {
    pub capacity: usize,
    pub backpressure: Backpressure,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for LogQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1_024,
            backpressure: Backpressure::DropOldest,
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// What the writer thread managed before it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub written: u64,
    pub failed: u64,
}

/// Producer side, owned by the correlator.
pub struct QueuedPeerLog {
    tx: Sender<String>,
    // Second handle on the queue, used only to evict under DropOldest.
    evict: Receiver<String>,
    // The evict handle keeps the channel connected, so writer death has to
    // be tracked separately.
    alive: Arc<AtomicBool>,
    backpressure: Backpressure,
    dropped: u64,
}

/// Cleared when the writer thread returns or unwinds.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl QueuedPeerLog {
    /// Lines dropped by backpressure so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn count_drop(&mut self) {
        self.dropped += 1;
        metrics::counter!("sockwatch_peer_log_dropped_total").increment(1);
    }

    fn push(&mut self, line: String) -> Result<(), SinkError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        match self.backpressure {
            Backpressure::Wait(timeout) => match self.tx.send_timeout(line, timeout) {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => {
                    self.count_drop();
                    Err(SinkError::QueueFull)
                }
                Err(SendTimeoutError::Disconnected(_)) => Err(SinkError::Closed),
            },
            Backpressure::DropOldest => {
                let mut line = line;
                loop {
                    match self.tx.try_send(line) {
                        Ok(()) => return Ok(()),
                        Err(TrySendError::Full(back)) => {
                            if let Ok(old) = self.evict.try_recv() {
                                self.count_drop();
                                log::warn!("peer log queue full, dropped oldest line: {}", old.trim_end());
                            }
                            line = back;
                        }
                        Err(TrySendError::Disconnected(_)) => return Err(SinkError::Closed),
                    }
                }
            }
        }
    }
}

impl PeerLog for QueuedPeerLog {
    fn record(&mut self, peer: &FirstSeenPeer) -> Result<(), SinkError> {
        self.push(format_line(peer))
    }
}

pub struct PeerLogWriterHandle {
    join: JoinHandle<WriterReport>,
}

impl PeerLogWriterHandle {
    /// Wait for the writer to drain and exit. Every [`QueuedPeerLog`] for
    /// this writer must have been dropped first, or this blocks forever.
    pub fn join(self) -> WriterReport {
        match self.join.join() {
            Ok(report) => report,
            Err(_) => {
                log::error!("peer log writer thread panicked");
                WriterReport::default()
            }
        }
    }
}

pub fn spawn_peer_log_writer(
    path: PathBuf,
    cfg: LogQueueConfig,
) -> io::Result<(QueuedPeerLog, PeerLogWriterHandle)> {
    let (tx, rx) = channel::bounded::<String>(cfg.capacity.max(1));
    let evict = rx.clone();
    let attempts = cfg.retry_attempts;
    let backoff = cfg.retry_backoff;
    let alive = Arc::new(AtomicBool::new(true));
    let guard = AliveGuard(alive.clone());

    let join = thread::Builder::new()
        .name("peer-log-writer".into())
        .spawn(move || {
            let _guard = guard;
            log::info!("peer log writer started for {:?}", path);
            let mut report = WriterReport::default();
            for line in rx.iter() {
                if write_with_retry(&path, &line, attempts, backoff) {
                    report.written += 1;
                } else {
                    report.failed += 1;
                }
            }
            log::info!(
                "peer log writer exited ({} written, {} failed)",
                report.written, report.failed
            );
            report
        })?;

    let log = QueuedPeerLog { tx, evict, alive, backpressure: cfg.backpressure, dropped: 0 };
    Ok((log, PeerLogWriterHandle { join }))
}

fn write_with_retry(path: &Path, line: &str, attempts: u32, backoff: Duration) -> bool {
    let mut attempt = 0;
    loop {
        match append_line(path, line) {
            Ok(()) => return true,
            Err(e) if attempt < attempts => {
                attempt += 1;
                log::warn!("peer log append failed (attempt {attempt}/{attempts}): {e}");
                thread::sleep(backoff * attempt);
            }
            Err(e) => {
                log::error!("peer log line dropped after {attempts} retries: {e}");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unstarted(capacity: usize, backpressure: Backpressure) -> (QueuedPeerLog, Receiver<String>) {
        let (tx, rx) = channel::bounded(capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let log = QueuedPeerLog { tx, evict: rx.clone(), alive, backpressure, dropped: 0 };
        (log, rx)
    }

    #[test]
    fn drop_oldest_keeps_the_newest_lines() {
        let (mut log, rx) = unstarted(2, Backpressure::DropOldest);
        for n in 1..=4 {
            log.push(format!("line {n}\n")).unwrap();
        }
        assert_eq!(log.dropped(), 2);
        let left: Vec<String> = rx.try_iter().collect();
        assert_eq!(left, vec!["line 3\n", "line 4\n"]);
    }

    #[test]
    fn bounded_wait_drops_the_new_line() {
        let (mut log, rx) = unstarted(1, Backpressure::Wait(Duration::from_millis(5)));
        log.push("first\n".into()).unwrap();
        assert!(matches!(log.push("second\n".into()), Err(SinkError::QueueFull)));
        assert_eq!(log.dropped(), 1);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["first\n"]);
    }

    #[test]
    fn dead_writer_closes_the_queue() {
        for backpressure in [Backpressure::DropOldest, Backpressure::Wait(Duration::from_millis(5))] {
            let (mut log, rx) = unstarted(4, backpressure);
            drop(AliveGuard(log.alive.clone()));
            assert!(matches!(log.push("late\n".into()), Err(SinkError::Closed)));
            assert_eq!(log.dropped(), 0);
            assert!(rx.is_empty());
        }
    }

    #[test]
    fn writer_fails_after_retries_on_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("missing").join("unique.txt");
        assert!(!write_with_retry(&bad, "x\n", 2, Duration::from_millis(1)));
    }
}
