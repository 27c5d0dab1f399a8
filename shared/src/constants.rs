/// SysV key of the snapshot segment.
pub const SHM_KEY: i32 = 12345;
/// Default segment size; one snapshot must fit after the header.
pub const SNAPSHOT_SEGMENT_SIZE: usize = 4096;

/// `b"SWSS"` read as a little-endian u32.
pub const SNAPSHOT_MAGIC: u32 = u32::from_le_bytes(*b"SWSS");
pub const SNAPSHOT_SCHEMA: u32 = 1;
/// Bytes reserved for the segment header; the payload starts here.
pub const SNAPSHOT_HEADER_LEN: usize = 32;

/// Kernel `TASK_COMM_LEN`.
pub const TASK_COMM_LEN: usize = 16;

/// Header of the event ring written by the kernel-side producer.
pub const RING_HEADER_LEN: usize = 16;
pub const RING_WRITE_OFFSET_AT: usize = 0;
pub const RING_LOST_EVENTS_AT: usize = 8;

pub const AF_INET: u16 = 2;
pub const AF_INET6: u16 = 10;
pub const IPPROTO_TCP: u16 = 6;
