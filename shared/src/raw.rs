//! Raw record emitted by the `tcpstates` BPF program.
//!
//! The producer copies the kernel `struct event` byte-for-byte into the event
//! ring, so the field order below is an ABI:
//!
//! ```text
//!   0  saddr[16]     16  daddr[16]     32  skaddr u64    40  ts_us u64
//!  48  delta_us u64  56  pid u32       60  tid u32       64  oldstate i32
//!  68  newstate i32  72  family u16    74  sport u16     76  dport u16
//!  78  protocol u16  80  task[16]      96  (end)
//! ```
//!
//! IPv4 addresses occupy the first four bytes of `saddr`/`daddr`.

use thiserror::Error;

use crate::constants::TASK_COMM_LEN;

/// Encoded size of one [`RawEvent`].
pub const RAW_EVENT_LEN: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub saddr: [u8; 16],
    pub daddr: [u8; 16],
    pub skaddr: u64,
    pub ts_us: u64,
    pub delta_us: u64,
    pub pid: u32,
    pub tid: u32,
    pub oldstate: i32,
    pub newstate: i32,
    pub family: u16,
    pub sport: u16,
    pub dport: u16,
    pub protocol: u16,
    pub task: [u8; TASK_COMM_LEN],
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("raw event truncated: {got} bytes, need {RAW_EVENT_LEN}")]
    Truncated { got: usize },
}

impl RawEvent {
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < RAW_EVENT_LEN {
            return Err(DecodeError::Truncated { got: buf.len() });
        }
        let mut r = Reader { buf, at: 0 };
        Ok(Self {
            saddr: r.array(),
            daddr: r.array(),
            skaddr: u64::from_le_bytes(r.array()),
            ts_us: u64::from_le_bytes(r.array()),
            delta_us: u64::from_le_bytes(r.array()),
            pid: u32::from_le_bytes(r.array()),
            tid: u32::from_le_bytes(r.array()),
            oldstate: i32::from_le_bytes(r.array()),
            newstate: i32::from_le_bytes(r.array()),
            family: u16::from_le_bytes(r.array()),
            sport: u16::from_le_bytes(r.array()),
            dport: u16::from_le_bytes(r.array()),
            protocol: u16::from_le_bytes(r.array()),
            task: r.array(),
        })
    }

    /// Encode in ring layout; used by producers and test fixtures.
    pub fn encode(&self) -> [u8; RAW_EVENT_LEN] {
        let mut out = [0u8; RAW_EVENT_LEN];
        let mut at = 0;
        let mut put = |bytes: &[u8]| {
            out[at..at + bytes.len()].copy_from_slice(bytes);
            at += bytes.len();
        };
        put(&self.saddr);
        put(&self.daddr);
        put(&self.skaddr.to_le_bytes());
        put(&self.ts_us.to_le_bytes());
        put(&self.delta_us.to_le_bytes());
        put(&self.pid.to_le_bytes());
        put(&self.tid.to_le_bytes());
        put(&self.oldstate.to_le_bytes());
        put(&self.newstate.to_le_bytes());
        put(&self.family.to_le_bytes());
        put(&self.sport.to_le_bytes());
        put(&self.dport.to_le_bytes());
        put(&self.protocol.to_le_bytes());
        put(&self.task);
        out
    }

    /// `task` up to the first NUL, lossily decoded.
    pub fn comm(&self) -> String {
        let end = self.task.iter().position(|&b| b == 0).unwrap_or(self.task.len());
        String::from_utf8_lossy(&self.task[..end]).into_owned()
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl Reader<'_> {
    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.at..self.at + N]);
        self.at += N;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawEvent {
        let mut task = [0u8; TASK_COMM_LEN];
        task[..4].copy_from_slice(b"curl");
        let mut daddr = [0u8; 16];
        daddr[..4].copy_from_slice(&[10, 0, 0, 1]);
        RawEvent {
            saddr: [0; 16],
            daddr,
            skaddr: 0xffff_8880_1234_5678,
            ts_us: 1_000,
            delta_us: 1_234,
            pid: 42,
            tid: 43,
            oldstate: 2,
            newstate: 1,
            family: 2,
            sport: 51000,
            dport: 443,
            protocol: 6,
            task,
        }
    }

    #[test]
    fn field_offsets_match_kernel_layout() {
        let buf = sample().encode();
        assert_eq!(&buf[16..20], &[10, 0, 0, 1]);
        assert_eq!(u64::from_le_bytes(buf[32..40].try_into().unwrap()), 0xffff_8880_1234_5678);
        assert_eq!(u32::from_le_bytes(buf[56..60].try_into().unwrap()), 42);
        assert_eq!(i32::from_le_bytes(buf[68..72].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(buf[76..78].try_into().unwrap()), 443);
        assert_eq!(&buf[80..84], b"curl");
    }

    #[test]
    fn decode_reads_back_comm_and_ports() {
        let ev = RawEvent::decode(&sample().encode()).unwrap();
        assert_eq!(ev.comm(), "curl");
        assert_eq!(ev.dport, 443);
        assert_eq!(ev.tid, 43);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = RawEvent::decode(&[0u8; 40]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { got: 40 });
    }
}
