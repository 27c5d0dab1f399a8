//! Active session registry: sockets currently in ESTABLISHED.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::comms::events::{SocketId, TcpState, TransitionEvent};

/// Copy of the event that moved a socket into ESTABLISHED.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub event: TransitionEvent,
    pub established_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn socket(&self) -> SocketId {
        self.event.socket
    }
}

/// Per-socket state as far as the correlator models it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Established,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Started,
    /// The socket already had a record; it was replaced.
    Refreshed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("socket {socket} moved to {state}, only ESTABLISHED opens a session")]
    NotEstablished { socket: SocketId, state: TcpState },
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SocketId, SessionRecord>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, event: &TransitionEvent) -> Result<InsertOutcome, RegistryError> {
        if event.new_state != TcpState::Established {
            return Err(RegistryError::NotEstablished {
                socket: event.socket,
                state: event.new_state,
            });
        }
        let record = SessionRecord { event: event.clone(), established_at: Utc::now() };
        Ok(match self.sessions.insert(event.socket, record) {
            Some(_) => InsertOutcome::Refreshed,
            None => InsertOutcome::Started,
        })
    }

    pub fn lookup(&self, socket: SocketId) -> Option<&SessionRecord> {
        self.sessions.get(&socket)
    }

    pub fn state_of(&self, socket: SocketId) -> SessionState {
        match self.sessions.contains_key(&socket) {
            true => SessionState::Established,
            false => SessionState::None,
        }
    }

    pub fn remove(&mut self, socket: SocketId) -> Option<SessionRecord> {
        self.sessions.remove(&socket)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::tests::event;

    #[test]
    fn insert_then_lookup() {
        let mut reg = SessionRegistry::new();
        let ev = event(1, "10.0.0.1", 443, TcpState::Established);
        assert_eq!(reg.insert(&ev), Ok(InsertOutcome::Started));
        assert_eq!(reg.state_of(SocketId(1)), SessionState::Established);
        assert_eq!(reg.lookup(SocketId(1)).map(|r| r.event.remote_port), Some(443));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn non_established_insert_is_rejected() {
        let mut reg = SessionRegistry::new();
        let ev = event(1, "10.0.0.1", 443, TcpState::SynSent);
        assert_eq!(
            reg.insert(&ev),
            Err(RegistryError::NotEstablished { socket: SocketId(1), state: TcpState::SynSent })
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn second_insert_refreshes_in_place() {
        let mut reg = SessionRegistry::new();
        reg.insert(&event(1, "10.0.0.1", 443, TcpState::Established)).unwrap();
        let outcome = reg.insert(&event(1, "10.0.0.9", 8443, TcpState::Established)).unwrap();
        assert_eq!(outcome, InsertOutcome::Refreshed);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup(SocketId(1)).unwrap().event.remote_port, 8443);
    }

    #[test]
    fn removing_absent_socket_is_not_an_error() {
        let mut reg = SessionRegistry::new();
        assert!(reg.remove(SocketId(99)).is_none());
        assert_eq!(reg.state_of(SocketId(99)), SessionState::None);
        assert!(reg.lookup(SocketId(99)).is_none());
    }
}
