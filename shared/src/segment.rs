//! Sequence-locked layout of the snapshot segment.
//!
//! ```text
//!   ┌ 0 ──────┬ 4 ──────┬ 8 ───────────┬ 16 ─────────┬ 20 ──────┬ 32 ───────────┐
//!   │ magic   │ schema  │ sequence u64 │ payload len │ reserved │ payload …     │
//!   └─────────┴─────────┴──────────────┴─────────────┴──────────┴───────────────┘
//! ```
//!
//! There is exactly one writer. It moves `sequence` to an odd value, copies
//! the payload, then publishes the next even value with Release ordering.
//! A reader accepts a copy only if it saw the same even sequence before and
//! after copying; anything else is a torn read and must be retried.
//!
//! No other cross-process lock exists, so every field is touched through
//! atomics or the sequence check.

use std::{
    marker::PhantomData,
    ptr::{self, NonNull},
    sync::atomic::{fence, AtomicU32, AtomicU64, Ordering},
};
use thiserror::Error;

use crate::constants::{SNAPSHOT_HEADER_LEN, SNAPSHOT_MAGIC, SNAPSHOT_SCHEMA};

const MAGIC_AT: usize = 0;
const SCHEMA_AT: usize = 4;
const SEQUENCE_AT: usize = 8;
const PAYLOAD_LEN_AT: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("segment of {0} bytes cannot hold the {SNAPSHOT_HEADER_LEN}-byte header")]
    TooSmall(usize),
    #[error("segment base is not 8-byte aligned")]
    Misaligned,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("payload of {len} bytes exceeds segment capacity of {capacity}")]
    TooLarge { len: usize, capacity: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("segment has not been initialised by a writer")]
    Uninitialised,
    #[error("segment schema {found} is not supported (expected {SNAPSHOT_SCHEMA})")]
    Schema { found: u32 },
    #[error("segment is empty")]
    Empty,
    #[error("torn read: writer was active during the copy")]
    Torn,
}

/// Read side of a mapped snapshot segment, valid for `'a`.
#[derive(Debug, Clone, Copy)]
pub struct SegmentReader<'a> {
    base: NonNull<u8>,
    len: usize,
    _mem: PhantomData<&'a [u8]>,
}

/// Write side. Only the single publisher of a segment should hold one.
#[derive(Debug, Clone, Copy)]
pub struct SegmentView<'a> {
    reader: SegmentReader<'a>,
}

// Shared memory is only touched through atomics and the seqlock.
unsafe impl Send for SegmentReader<'_> {}
unsafe impl Sync for SegmentReader<'_> {}

impl<'a> SegmentReader<'a> {
    /// # Safety
    /// `base` must point to `len` readable bytes that stay mapped for `'a`.
    pub unsafe fn from_raw(base: *const u8, len: usize) -> Result<Self, LayoutError> {
        if len < SNAPSHOT_HEADER_LEN {
            return Err(LayoutError::TooSmall(len));
        }
        if (base as usize) % 8 != 0 {
            return Err(LayoutError::Misaligned);
        }
        let base = NonNull::new(base as *mut u8).ok_or(LayoutError::Misaligned)?;
        Ok(Self { base, len, _mem: PhantomData })
    }

    pub fn capacity(&self) -> usize {
        self.len - SNAPSHOT_HEADER_LEN
    }

    fn u32_at(&self, offset: usize) -> &AtomicU32 {
        unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU32) }
    }

    fn sequence(&self) -> &AtomicU64 {
        unsafe { &*(self.base.as_ptr().add(SEQUENCE_AT) as *const AtomicU64) }
    }

    fn payload_ptr(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(SNAPSHOT_HEADER_LEN) }
    }

    /// Current generation (completed writes). Zero until the first write.
    pub fn generation(&self) -> u64 {
        self.sequence().load(Ordering::Acquire) / 2
    }

    /// One read attempt. On success `out` holds the payload and the
    /// generation it belongs to is returned.
    pub fn read_into(&self, out: &mut Vec<u8>) -> Result<u64, ReadError> {
        let magic = self.u32_at(MAGIC_AT).load(Ordering::Acquire);
        if magic != SNAPSHOT_MAGIC {
            return Err(ReadError::Uninitialised);
        }
        let schema = self.u32_at(SCHEMA_AT).load(Ordering::Acquire);
        if schema != SNAPSHOT_SCHEMA {
            return Err(ReadError::Schema { found: schema });
        }

        let seq = self.sequence();
        let before = seq.load(Ordering::Acquire);
        if before & 1 == 1 {
            return Err(ReadError::Torn);
        }
        if before == 0 {
            return Err(ReadError::Empty);
        }

        let len = self.u32_at(PAYLOAD_LEN_AT).load(Ordering::Relaxed) as usize;
        if len > self.capacity() {
            return Err(ReadError::Torn);
        }
        out.clear();
        out.resize(len, 0);
        unsafe {
            ptr::copy_nonoverlapping(self.payload_ptr() as *const u8, out.as_mut_ptr(), len);
        }

        fence(Ordering::Acquire);
        let after = seq.load(Ordering::Relaxed);
        if after != before {
            return Err(ReadError::Torn);
        }
        Ok(before / 2)
    }

    /// Retry torn reads up to `attempts` times.
    pub fn read_consistent(&self, attempts: usize) -> Result<(u64, Vec<u8>), ReadError> {
        let mut buf = Vec::with_capacity(self.capacity());
        let mut last = ReadError::Torn;
        for _ in 0..attempts.max(1) {
            match self.read_into(&mut buf) {
                Ok(generation) => return Ok((generation, buf)),
                Err(ReadError::Torn) => {
                    last = ReadError::Torn;
                    std::hint::spin_loop();
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }
}

impl<'a> SegmentView<'a> {
    /// # Safety
    /// `base` must point to `len` writable bytes that stay mapped for `'a`.
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Result<Self, LayoutError> {
        Ok(Self { reader: unsafe { SegmentReader::from_raw(base, len) }? })
    }

    /// Lay a segment over process-local words, e.g. for an embedded reader
    /// or tests. The words stay borrowed for as long as the view lives.
    pub fn from_words(words: &'a mut [u64]) -> Result<Self, LayoutError> {
        let len = words.len() * 8;
        unsafe { Self::from_raw(words.as_mut_ptr() as *mut u8, len) }
    }

    pub fn reader(&self) -> SegmentReader<'a> {
        self.reader
    }

    pub fn capacity(&self) -> usize {
        self.reader.capacity()
    }

    pub fn generation(&self) -> u64 {
        self.reader.generation()
    }

    /// Stamp magic and schema. A segment left behind by an earlier run with
    /// the same schema keeps its sequence so readers never see it go back.
    pub fn initialize(&self) {
        let r = &self.reader;
        let magic = r.u32_at(MAGIC_AT).load(Ordering::Acquire);
        let schema = r.u32_at(SCHEMA_AT).load(Ordering::Acquire);
        if magic == SNAPSHOT_MAGIC && schema == SNAPSHOT_SCHEMA {
            return;
        }
        r.sequence().store(0, Ordering::Relaxed);
        r.u32_at(PAYLOAD_LEN_AT).store(0, Ordering::Relaxed);
        r.u32_at(SCHEMA_AT).store(SNAPSHOT_SCHEMA, Ordering::Relaxed);
        r.u32_at(MAGIC_AT).store(SNAPSHOT_MAGIC, Ordering::Release);
    }

    /// Publish `payload`, returning its generation.
    pub fn write(&self, payload: &[u8]) -> Result<u64, WriteError> {
        let capacity = self.capacity();
        if payload.len() > capacity {
            return Err(WriteError::TooLarge { len: payload.len(), capacity });
        }

        let seq = self.reader.sequence();
        let current = seq.load(Ordering::Relaxed);
        // An odd value means a previous writer died mid-copy; keep it odd.
        let odd = current | 1;
        seq.store(odd, Ordering::Relaxed);
        fence(Ordering::Release);

        unsafe {
            ptr::copy_nonoverlapping(payload.as_ptr(), self.reader.payload_ptr(), payload.len());
        }
        self.reader.u32_at(PAYLOAD_LEN_AT).store(payload.len() as u32, Ordering::Relaxed);

        let even = odd.wrapping_add(1);
        seq.store(even, Ordering::Release);
        Ok(even / 2)
    }

    pub fn read_into(&self, out: &mut Vec<u8>) -> Result<u64, ReadError> {
        self.reader.read_into(out)
    }

    pub fn read_consistent(&self, attempts: usize) -> Result<(u64, Vec<u8>), ReadError> {
        self.reader.read_consistent(attempts)
    }

    #[cfg(test)]
    fn force_sequence(&self, value: u64) {
        self.reader.sequence().store(value, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backing(words: usize) -> Vec<u64> {
        vec![0u64; words]
    }

    fn view(buf: &mut [u64]) -> SegmentView<'_> {
        SegmentView::from_words(buf).unwrap()
    }

    #[test]
    fn fresh_segment_reads_as_uninitialised_then_empty() {
        let mut buf = backing(16);
        let v = view(&mut buf);
        assert_eq!(v.read_consistent(1), Err(ReadError::Uninitialised));
        v.initialize();
        assert_eq!(v.read_consistent(1), Err(ReadError::Empty));
        assert_eq!(v.generation(), 0);
    }

    #[test]
    fn each_write_bumps_generation() {
        let mut buf = backing(16);
        let v = view(&mut buf);
        v.initialize();
        assert_eq!(v.write(b"first").unwrap(), 1);
        assert_eq!(v.write(b"second").unwrap(), 2);
        let (generation, payload) = v.read_consistent(1).unwrap();
        assert_eq!(generation, 2);
        assert_eq!(payload, b"second");
    }

    #[test]
    fn odd_sequence_is_reported_as_torn() {
        let mut buf = backing(16);
        let v = view(&mut buf);
        v.initialize();
        v.write(b"stable").unwrap();
        v.force_sequence(5);
        assert_eq!(v.read_consistent(3), Err(ReadError::Torn));
        // The next write recovers from the abandoned odd value.
        assert_eq!(v.write(b"again").unwrap(), 3);
        assert_eq!(v.read_consistent(1).unwrap().1, b"again");
    }

    #[test]
    fn oversized_payload_leaves_segment_untouched() {
        let mut buf = backing(8);
        let v = view(&mut buf);
        v.initialize();
        v.write(b"ok").unwrap();
        let big = vec![7u8; v.capacity() + 1];
        assert!(matches!(v.write(&big), Err(WriteError::TooLarge { .. })));
        assert_eq!(v.read_consistent(1).unwrap(), (1, b"ok".to_vec()));
    }

    #[test]
    fn reinitialising_keeps_existing_generation() {
        let mut buf = backing(16);
        let v = view(&mut buf);
        v.initialize();
        v.write(b"x").unwrap();
        v.initialize();
        assert_eq!(v.generation(), 1);
    }

    #[test]
    fn tiny_region_is_rejected() {
        let mut buf = backing(2);
        let err = SegmentView::from_words(&mut buf).unwrap_err();
        assert_eq!(err, LayoutError::TooSmall(16));
    }
}
