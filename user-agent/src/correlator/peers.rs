//! Distinct-peer registry: every remote endpoint ever seen ESTABLISHED.
//!
//! Append-only. The key is the remote-facing part of the 5-tuple, so two
//! local sockets talking to the same service count once.

use std::{collections::HashSet, fmt, net::IpAddr};

use super::sessions::SessionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    pub addr: IpAddr,
    pub port: u16,
    pub protocol: u16,
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            IpAddr::V4(a) => write!(f, "{}:{}", a, self.port),
            IpAddr::V6(a) => write!(f, "[{}]:{}", a, self.port),
        }
    }
}

/// A peer together with the session that introduced it.
#[derive(Debug, Clone, PartialEq)]
pub struct FirstSeenPeer {
    pub endpoint: PeerEndpoint,
    pub record: SessionRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerInsert {
    Inserted,
    Duplicate,
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    index: HashSet<PeerEndpoint>,
    order: Vec<FirstSeenPeer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, addr: IpAddr, port: u16, protocol: u16) -> bool {
        self.index.contains(&PeerEndpoint { addr, port, protocol })
    }

    pub fn insert_if_absent(&mut self, record: &SessionRecord) -> PeerInsert {
        let ev = &record.event;
        let endpoint = PeerEndpoint { addr: ev.remote_addr, port: ev.remote_port, protocol: ev.protocol };
        if !self.index.insert(endpoint) {
            return PeerInsert::Duplicate;
        }
        self.order.push(FirstSeenPeer { endpoint, record: record.clone() });
        PeerInsert::Inserted
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Peers in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &FirstSeenPeer> {
        self.order.iter()
    }

    pub fn last(&self) -> Option<&FirstSeenPeer> {
        self.order.last()
    }
}
