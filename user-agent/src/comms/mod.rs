//! Event sources.
//! -----------------------------------------------------------------------------
//! A **source** hands the correlator one [`SourceItem`] at a time, in arrival
//! order:
//!   • `memory_ring` → event ring mapped from a file the kernel-side
//!     producer writes into.
//!   • `replay`      → newline-delimited JSON (file or stdin).
//!   • `listeners`   → crossbeam channel, for embedders and tests.
//!
//! Every source is polled from the single event-loop thread; none of them
//! spawns work of its own.

pub mod events;
pub mod filter;
pub mod listeners;
pub mod memory_ring;
pub mod replay;

use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

use events::TransitionEvent;

/// Unit of work delivered by a source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    Event(TransitionEvent),
    /// Upstream dropped `count` events (buffer overrun) on `cpu`.
    Lost { cpu: u32, count: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Delivered(usize),
    /// Nothing arrived before the timeout.
    Idle,
    /// The source will never deliver again.
    Exhausted,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open event source {path:?}: {source}")]
    Open { path: PathBuf, #[source] source: io::Error },

    #[error("event ring {path:?} is {size} bytes, too small for its header")]
    RingTooSmall { path: PathBuf, size: u64 },

    #[error("I/O error reading events: {0}")]
    Io(#[from] io::Error),
}

pub trait EventSource {
    /// Display name for logs.
    fn name(&self) -> &'static str;

    /// Deliver whatever is available, waiting at most `timeout` when nothing
    /// is. Items are handed to `on_item` in arrival order.
    fn poll(
        &mut self,
        timeout: Duration,
        on_item: &mut dyn FnMut(SourceItem),
    ) -> Result<PollStatus, SourceError>;
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn poll(
        &mut self,
        timeout: Duration,
        on_item: &mut dyn FnMut(SourceItem),
    ) -> Result<PollStatus, SourceError> {
        (**self).poll(timeout, on_item)
    }
}
