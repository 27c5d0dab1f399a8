//! SysV shared memory attach/detach.
//!
//! Thin RAII wrapper: `shmget` + `shmat` on construction, `shmdt` on drop.
//! The segment itself outlives the process unless someone marks it for
//! removal.

use std::{io, ptr};
use thiserror::Error;

use crate::segment::{LayoutError, SegmentReader, SegmentView};

/// Key for a segment nobody else can look up by key.
pub const PRIVATE_KEY: i32 = libc::IPC_PRIVATE;

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("shmget(key={key}, size={size}) failed: {source}")]
    Get { key: i32, size: usize, #[source] source: io::Error },
    #[error("shmat(id={id}) failed: {source}")]
    Attach { id: i32, #[source] source: io::Error },
    #[error("shmctl(id={id}) failed: {source}")]
    Control { id: i32, #[source] source: io::Error },
    #[error("segment id={id} is attached read-only")]
    ReadOnly { id: i32 },
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

pub struct ShmSegment {
    id: i32,
    base: *mut u8,
    size: usize,
    read_only: bool,
}

// The mapping is only reached through views that borrow the segment.
unsafe impl Send for ShmSegment {}

impl ShmSegment {
    /// Attach `key`, creating a world read/write segment of `size` bytes if
    /// none exists yet.
    pub fn create_or_attach(key: i32, size: usize) -> Result<Self, ShmError> {
        let id = unsafe { libc::shmget(key, size, 0o666 | libc::IPC_CREAT) };
        if id == -1 {
            return Err(ShmError::Get { key, size, source: io::Error::last_os_error() });
        }
        Self::attach_id(id, size, false)
    }

    /// Attach an existing segment without creating it. The mapped size is
    /// taken from the kernel.
    pub fn open_existing(key: i32, read_only: bool) -> Result<Self, ShmError> {
        let id = unsafe { libc::shmget(key, 0, 0) };
        if id == -1 {
            return Err(ShmError::Get { key, size: 0, source: io::Error::last_os_error() });
        }
        let size = segment_size(id)?;
        Self::attach_id(id, size, read_only)
    }

    /// Attach a known segment id. `size` must not exceed the segment's size.
    pub fn attach_id(id: i32, size: usize, read_only: bool) -> Result<Self, ShmError> {
        let flags = if read_only { libc::SHM_RDONLY } else { 0 };
        let addr = unsafe { libc::shmat(id, ptr::null(), flags) };
        if addr as isize == -1 {
            return Err(ShmError::Attach { id, source: io::Error::last_os_error() });
        }
        Ok(Self { id, base: addr as *mut u8, size, read_only })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Writable seqlock view; borrows `self` so it cannot outlive `shmdt`.
    pub fn view(&self) -> Result<SegmentView<'_>, ShmError> {
        if self.is_read_only() {
            return Err(ShmError::ReadOnly { id: self.id });
        }
        Ok(unsafe { SegmentView::from_raw(self.base, self.size) }?)
    }

    /// Read-only seqlock view; works for either attach mode.
    pub fn reader(&self) -> Result<SegmentReader<'_>, ShmError> {
        Ok(unsafe { SegmentReader::from_raw(self.base, self.size) }?)
    }

    /// `IPC_RMID`: the kernel frees the segment once the last process detaches.
    pub fn mark_for_removal(&self) -> Result<(), ShmError> {
        remove(self.id)
    }
}

fn stat(id: i32) -> Result<libc::shmid_ds, ShmError> {
    let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) };
    if rc == -1 {
        return Err(ShmError::Control { id, source: io::Error::last_os_error() });
    }
    Ok(ds)
}

fn segment_size(id: i32) -> Result<usize, ShmError> {
    Ok(stat(id)?.shm_segsz as usize)
}

/// Number of processes currently attached to `id` (`shm_nattch`).
pub fn attach_count(id: i32) -> Result<u64, ShmError> {
    Ok(stat(id)?.shm_nattch as u64)
}

/// `IPC_RMID` by id, for segments this process no longer holds.
pub fn remove(id: i32) -> Result<(), ShmError> {
    let rc = unsafe { libc::shmctl(id, libc::IPC_RMID, ptr::null_mut()) };
    if rc == -1 {
        return Err(ShmError::Control { id, source: io::Error::last_os_error() });
    }
    Ok(())
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.base as *const libc::c_void);
        }
    }
}
