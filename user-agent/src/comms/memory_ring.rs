//! Memory-mapped event ring reader
//! --------------------------------
//! The kernel-side producer (perf-buffer drain of the `tcpstates` BPF
//! program) appends raw events to a file-backed *single-producer /
//! single-consumer* byte ring:
//
//!   ┌ 0 ───────────┬ 4 ───────┬ 8 ─────────────┬ 16 ───────────────────── size ┐
//!   │ u32 write_off│ reserved │ u64 lost_events│ len | raw   len | raw   …     │
//!   └──────────────┴──────────┴────────────────┴───────────────────────────────┘
//
//! * `write_off` is the absolute offset of the next record; the producer
//!   publishes it with Release after the record bytes are in place.
//! * The producer wraps to 16 when the next record would cross the end and
//!   leaves a zero length at the wrap point when at least 4 bytes remain.
//! * `lost_events` is cumulative; growth is reported as `SourceItem::Lost`.
//! * The reader keeps its own cursor (in this struct, never global).
//!
//! This file maps the ring READ-ONLY.

use memmap2::Mmap;
use shared::{
    constants::{RING_HEADER_LEN, RING_LOST_EVENTS_AT, RING_WRITE_OFFSET_AT},
    raw::RawEvent,
};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
    thread,
    time::{Duration, Instant},
};

use super::{events::TransitionEvent, EventSource, PollStatus, SourceError, SourceItem};

const MAX_BATCH: usize = 1_024;
const IDLE_SLEEP: Duration = Duration::from_millis(2);

pub struct RingSource {
    path: PathBuf,
    map: Mmap,
    cursor: usize,
    lost_seen: u64,
}

impl RingSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let size = file.metadata()?.len();
        if size < (RING_HEADER_LEN + 4) as u64 {
            return Err(SourceError::RingTooSmall { path: path.to_path_buf(), size });
        }
        // The producer owns the file; we only ever read through this mapping.
        let map = unsafe { Mmap::map(&file) }.map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("event ring {:?} mapped ({} bytes)", path, map.len());
        Ok(Self { path: path.to_path_buf(), map, cursor: RING_HEADER_LEN, lost_seen: 0 })
    }

    fn write_offset(&self) -> usize {
        let cell = unsafe { &*(self.map.as_ptr().add(RING_WRITE_OFFSET_AT) as *const AtomicU32) };
        cell.load(Ordering::Acquire) as usize
    }

    fn lost_events(&self) -> u64 {
        let cell = unsafe { &*(self.map.as_ptr().add(RING_LOST_EVENTS_AT) as *const AtomicU64) };
        cell.load(Ordering::Acquire)
    }

    fn len_at(&self, offset: usize) -> usize {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.map[offset..offset + 4]);
        u32::from_le_bytes(bytes) as usize
    }

    /// Hand out every complete record the producer has published.
    fn drain(&mut self, on_item: &mut dyn FnMut(SourceItem)) -> usize {
        let size = self.map.len();
        let mut delivered = 0;

        let lost = self.lost_events();
        if lost > self.lost_seen {
            on_item(SourceItem::Lost { cpu: 0, count: lost - self.lost_seen });
            self.lost_seen = lost;
            delivered += 1;
        }

        while delivered < MAX_BATCH {
            let write_off = self.write_offset();
            if write_off < RING_HEADER_LEN || self.cursor == write_off {
                break;
            }
            if self.cursor + 4 > size {
                self.cursor = RING_HEADER_LEN;
                continue;
            }

            let len = self.len_at(self.cursor);
            if len == 0 {
                if self.cursor > write_off {
                    // wrap marker
                    self.cursor = RING_HEADER_LEN;
                    continue;
                }
                self.resync(write_off, "zero length ahead of writer");
                break;
            }
            if len > size - RING_HEADER_LEN - 4 || self.cursor + 4 + len > size {
                self.resync(write_off, "record length out of bounds");
                break;
            }
            if self.cursor < write_off && self.cursor + 4 + len > write_off {
                // writer still working
                break;
            }

            let start = self.cursor + 4;
            match RawEvent::decode(&self.map[start..start + len]) {
                Ok(raw) => {
                    on_item(SourceItem::Event(TransitionEvent::from(&raw)));
                    delivered += 1;
                }
                Err(e) => log::warn!("ring {:?}: skipping record at {}: {}", self.path, self.cursor, e),
            }

            // May now sit exactly at the end; the wrap happens on the next
            // pass, once the writer has moved away from here.
            self.cursor += 4 + len;
        }
        delivered
    }

    fn resync(&mut self, write_off: usize, why: &str) {
        log::warn!(
            "ring {:?}: {} at offset {}, skipping to writer offset {}",
            self.path, why, self.cursor, write_off
        );
        self.cursor = write_off;
    }
}

impl EventSource for RingSource {
    fn name(&self) -> &'static str {
        "ring"
    }

    fn poll(
        &mut self,
        timeout: Duration,
        on_item: &mut dyn FnMut(SourceItem),
    ) -> Result<PollStatus, SourceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let n = self.drain(on_item);
            if n > 0 {
                return Ok(PollStatus::Delivered(n));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(PollStatus::Idle);
            }
            thread::sleep(IDLE_SLEEP.min(deadline - now));
        }
    }
}
