//! Per-socket state machine over {NONE, ESTABLISHED}.
//!
//! For each transition:
//!   • CLOSE on an ESTABLISHED socket ends its session; CLOSE on anything
//!     else is ignored.
//!   • ESTABLISHED starts (or refreshes) the session, and the first time a
//!     remote endpoint is seen it is added to the peer registry and written
//!     to the peer log exactly once.
//!   • every other state only reaches the trace display.
//!
//! Each registry mutation publishes one snapshot. Sink and publisher
//! failures are logged and counted; they never stop correlation.

use shared::events::{SessionChange, SessionSnapshot};

use super::{
    peers::{PeerInsert, PeerRegistry},
    sessions::{InsertOutcome, SessionRegistry, SessionState},
};
use crate::{
    comms::events::{TcpState, TransitionEvent},
    sink::PeerLog,
    snapshot::{snapshot_of, SnapshotPublisher},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionTransition {
    #[default]
    Unchanged,
    Started,
    Refreshed,
    Ended,
}

/// What one event did to the registries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Outcome {
    pub session: SessionTransition,
    pub first_seen: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub events: u64,
    pub sessions_opened: u64,
    pub sessions_refreshed: u64,
    pub sessions_closed: u64,
    pub ignored_closes: u64,
    pub peers_first_seen: u64,
    pub log_failures: u64,
    pub publish_failures: u64,
    pub lost_events: u64,
}

pub struct Correlator<L, P> {
    sessions: SessionRegistry,
    peers: PeerRegistry,
    log: L,
    publisher: P,
    stats: CorrelatorStats,
}

impl<L: PeerLog, P: SnapshotPublisher> Correlator<L, P> {
    pub fn new(log: L, publisher: P) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            peers: PeerRegistry::new(),
            log,
            publisher,
            stats: CorrelatorStats::default(),
        }
    }

    pub fn handle(&mut self, ev: &TransitionEvent) -> Outcome {
        self.stats.events += 1;
        metrics::counter!("sockwatch_events_total").increment(1);

        match ev.new_state {
            TcpState::Close => self.on_close(ev),
            TcpState::Established => self.on_established(ev),
            _ => Outcome::default(),
        }
    }

    /// Upstream overflow. Counted and reported; registries are not repaired.
    pub fn handle_lost(&mut self, cpu: u32, count: u64) {
        log::warn!("lost {count} events on CPU #{cpu}");
        self.stats.lost_events += count;
        metrics::counter!("sockwatch_lost_events_total").increment(count);
    }

    fn on_close(&mut self, ev: &TransitionEvent) -> Outcome {
        if self.sessions.state_of(ev.socket) != SessionState::Established {
            self.stats.ignored_closes += 1;
            log::trace!("CLOSE for untracked socket {:x}", ev.socket);
            return Outcome::default();
        }
        let Some(record) = self.sessions.remove(ev.socket) else {
            return Outcome::default();
        };
        self.stats.sessions_closed += 1;
        metrics::counter!("sockwatch_sessions_closed_total").increment(1);
        log::debug!(
            "session ended: {:x} {}:{} -> {}:{}",
            record.socket(),
            record.event.local_addr,
            record.event.local_port,
            record.event.remote_addr,
            record.event.remote_port
        );

        let snapshot = snapshot_of(SessionChange::Closed, &record, self.sessions.len(), self.peers.len());
        self.publish(&snapshot);
        Outcome { session: SessionTransition::Ended, first_seen: false }
    }

    fn on_established(&mut self, ev: &TransitionEvent) -> Outcome {
        let (session, change) = match self.sessions.insert(ev) {
            Ok(InsertOutcome::Started) => {
                self.stats.sessions_opened += 1;
                metrics::counter!("sockwatch_sessions_opened_total").increment(1);
                (SessionTransition::Started, SessionChange::Opened)
            }
            Ok(InsertOutcome::Refreshed) => {
                self.stats.sessions_refreshed += 1;
                (SessionTransition::Refreshed, SessionChange::Refreshed)
            }
            Err(e) => {
                log::debug!("{e}");
                return Outcome::default();
            }
        };
        let Some(record) = self.sessions.lookup(ev.socket) else {
            return Outcome { session, first_seen: false };
        };

        let mut first_seen = false;
        if !self.peers.contains(ev.remote_addr, ev.remote_port, ev.protocol)
            && self.peers.insert_if_absent(record) == PeerInsert::Inserted
        {
            first_seen = true;
            self.stats.peers_first_seen += 1;
            metrics::counter!("sockwatch_peers_first_seen_total").increment(1);
            if let Some(peer) = self.peers.last() {
                log::info!("new peer {} via {} (pid {})", peer.endpoint, peer.record.event.comm, peer.record.event.pid);
                if let Err(e) = self.log.record(peer) {
                    self.stats.log_failures += 1;
                    log::warn!("peer log write skipped: {e}");
                }
            }
        }

        let snapshot = snapshot_of(change, record, self.sessions.len(), self.peers.len());
        self.publish(&snapshot);
        Outcome { session, first_seen }
    }

    fn publish(&mut self, snapshot: &SessionSnapshot) {
        metrics::gauge!("sockwatch_active_sessions").set(snapshot.active_sessions as f64);
        match self.publisher.publish(snapshot) {
            Ok(generation) => log::trace!("snapshot generation {generation} published"),
            Err(e) => {
                self.stats.publish_failures += 1;
                log::warn!("snapshot not published: {e}");
            }
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    pub fn peer_log(&self) -> &L {
        &self.log
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Hand back the collaborators, e.g. to drop a queued log before
    /// joining its writer.
    pub fn into_parts(self) -> (L, P, CorrelatorStats) {
        (self.log, self.publisher, self.stats)
    }
}
