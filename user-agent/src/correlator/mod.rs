//! Session correlation.
//!
//! `sessions` tracks sockets currently ESTABLISHED, `peers` remembers every
//! remote endpoint ever reached, and `engine` drives both from the event
//! stream.

pub mod engine;
pub mod peers;
pub mod sessions;

pub use engine::{Correlator, CorrelatorStats, Outcome, SessionTransition};
pub use peers::{FirstSeenPeer, PeerEndpoint, PeerInsert, PeerRegistry};
pub use sessions::{InsertOutcome, RegistryError, SessionRecord, SessionRegistry, SessionState};
