//! Snapshot publisher backed by a SysV shared memory segment.
//!
//! Attaches (creating if needed) the segment at a fixed key, stamps the
//! header once, and writes one protobuf-encoded snapshot per publish under
//! the segment's sequence lock. The segment is detached when the publisher
//! is dropped; it is never removed, so readers keep the last snapshot.

use prost::Message;
use shared::{events::SessionSnapshot, segment::SegmentView, shm::ShmSegment};

use super::{SnapshotError, SnapshotPublisher};

fn encode_and_write(
    view: SegmentView<'_>,
    scratch: &mut Vec<u8>,
    snapshot: &SessionSnapshot,
) -> Result<u64, SnapshotError> {
    scratch.clear();
    // Vec grows on demand; encoding into it cannot run out of room.
    let _ = snapshot.encode(scratch);
    Ok(view.write(scratch)?)
}

pub struct ShmPublisher {
    segment: ShmSegment,
    scratch: Vec<u8>,
}

impl ShmPublisher {
    pub fn attach(key: i32, size: usize) -> Result<Self, SnapshotError> {
        let segment = ShmSegment::create_or_attach(key, size)?;
        let view = segment.view()?;
        view.initialize();
        log::info!(
            "snapshot segment attached (key={}, id={}, {} bytes, generation {})",
            key,
            segment.id(),
            segment.size(),
            view.generation()
        );
        let scratch = Vec::with_capacity(view.capacity());
        Ok(Self { segment, scratch })
    }

    pub fn generation(&self) -> u64 {
        self.segment.reader().map(|r| r.generation()).unwrap_or(0)
    }

    pub fn segment(&self) -> &ShmSegment {
        &self.segment
    }
}

impl SnapshotPublisher for ShmPublisher {
    fn publish(&mut self, snapshot: &SessionSnapshot) -> Result<u64, SnapshotError> {
        let view = self.segment.view()?;
        encode_and_write(view, &mut self.scratch, snapshot)
    }
}

impl Drop for ShmPublisher {
    fn drop(&mut self) {
        log::debug!("detaching snapshot segment id={}", self.segment.id());
    }
}

/// Publishes into memory the caller maps and keeps alive for `'a`.
pub struct SegmentPublisher<'a> {
    view: SegmentView<'a>,
    scratch: Vec<u8>,
}

impl<'a> SegmentPublisher<'a> {
    pub fn new(view: SegmentView<'a>) -> Self {
        view.initialize();
        Self { view, scratch: Vec::with_capacity(view.capacity()) }
    }

    pub fn generation(&self) -> u64 {
        self.view.generation()
    }
}

impl SnapshotPublisher for SegmentPublisher<'_> {
    fn publish(&mut self, snapshot: &SessionSnapshot) -> Result<u64, SnapshotError> {
        encode_and_write(self.view, &mut self.scratch, snapshot)
    }
}
