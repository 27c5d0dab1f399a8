// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point.  Re-export everything for both `main.rs` and
// integration tests.

pub mod comms;
pub mod config;
pub mod correlator;
pub mod logging;
pub mod runtime;
pub mod sink;
pub mod snapshot;
pub mod trace;
