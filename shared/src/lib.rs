//! Types shared between the sockwatch agent and any process that reads what
//! it publishes: the raw tracer record, the snapshot message and the layout
//! of the snapshot segment.

pub mod constants;
pub mod events;
pub mod raw;
pub mod segment;
pub mod shm;

pub use constants::*;
