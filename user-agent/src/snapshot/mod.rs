//! Cross-process snapshot of session state.
//!
//! Every registry mutation produces a [`SessionSnapshot`] that a publisher
//! makes visible to other processes. The shared-memory publisher lives in
//! [`shm`]; [`NullPublisher`] is used when publication is switched off.

pub mod shm;

use prost_types::Timestamp;
use shared::{
    events::{SessionChange, SessionSnapshot},
    segment::WriteError,
    shm::ShmError,
};
use std::{net::IpAddr, time::SystemTime};
use thiserror::Error;

use crate::correlator::sessions::SessionRecord;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("shared memory: {0}")]
    Shm(#[from] ShmError),

    #[error("snapshot does not fit: {0}")]
    Write(#[from] WriteError),
}

pub trait SnapshotPublisher {
    /// Publish one snapshot, returning the generation it was stored under.
    fn publish(&mut self, snapshot: &SessionSnapshot) -> Result<u64, SnapshotError>;
}

impl<T: SnapshotPublisher + ?Sized> SnapshotPublisher for Box<T> {
    fn publish(&mut self, snapshot: &SessionSnapshot) -> Result<u64, SnapshotError> {
        (**self).publish(snapshot)
    }
}

/// Discards snapshots but still counts generations.
#[derive(Debug, Default)]
pub struct NullPublisher {
    generation: u64,
}

impl SnapshotPublisher for NullPublisher {
    fn publish(&mut self, _snapshot: &SessionSnapshot) -> Result<u64, SnapshotError> {
        self.generation += 1;
        Ok(self.generation)
    }
}

fn addr_bytes(addr: &IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(a) => a.octets().to_vec(),
        IpAddr::V6(a) => a.octets().to_vec(),
    }
}

/// Build the snapshot for `record` after a registry change.
pub fn snapshot_of(
    change: SessionChange,
    record: &SessionRecord,
    active_sessions: usize,
    distinct_peers: usize,
) -> SessionSnapshot {
    let ev = &record.event;
    SessionSnapshot {
        change: change as i32,
        socket_id: ev.socket.0,
        pid: ev.pid,
        tid: ev.tid,
        comm: ev.comm.clone(),
        family: u32::from(ev.family().raw()),
        local_addr: addr_bytes(&ev.local_addr),
        local_port: u32::from(ev.local_port),
        remote_addr: addr_bytes(&ev.remote_addr),
        remote_port: u32::from(ev.remote_port),
        protocol: u32::from(ev.protocol),
        delta_us: ev.delta_us,
        active_sessions: active_sessions as u32,
        distinct_peers: distinct_peers as u32,
        observed_at: Some(Timestamp::from(SystemTime::now())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::events::TcpState;
    use crate::correlator::tests::event;
    use chrono::Utc;

    #[test]
    fn snapshot_copies_the_record() {
        let ev = event(0x55, "2001:db8::7", 8443, TcpState::Established);
        let record = SessionRecord { event: ev, established_at: Utc::now() };
        let snap = snapshot_of(SessionChange::Opened, &record, 4, 9);
        assert_eq!(snap.change_kind(), SessionChange::Opened);
        assert_eq!(snap.socket_id, 0x55);
        assert_eq!(snap.remote_addr.len(), 16);
        assert_eq!(snap.remote_port, 8443);
        assert_eq!(snap.family, 10);
        assert_eq!((snap.active_sessions, snap.distinct_peers), (4, 9));
        assert!(snap.observed_at.is_some());
    }

    #[test]
    fn null_publisher_counts_generations() {
        let mut p = NullPublisher::default();
        let snap = SessionSnapshot::default();
        assert_eq!(p.publish(&snap).unwrap(), 1);
        assert_eq!(p.publish(&snap).unwrap(), 2);
    }
}
