//! Transition event model used across the agent.
//!
//! A [`TransitionEvent`] is one TCP state change of one kernel socket, as
//! reported by the `tcpstates` tracer. Sources decode their wire format into
//! this type; the correlator and the trace display only ever see this type.
//!
//! Events deserialize from JSON for the replay source:
//!
//! ```json
//! {"socket": 18446612686364083200, "old_state": "SYN_SENT", "new_state": "ESTABLISHED",
//!  "local_addr": "192.168.1.5", "local_port": 51000,
//!  "remote_addr": "10.0.0.1", "remote_port": 443,
//!  "pid": 812, "tid": 812, "comm": "curl", "delta_us": 1532, "ts_us": 99120}
//! ```

use serde::{Deserialize, Serialize};
use shared::{
    raw::RawEvent,
    constants::{AF_INET, AF_INET6, IPPROTO_TCP},
};
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

/// Opaque kernel socket handle (`skaddr`), stable for one socket's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(pub u64);

impl fmt::LowerHex for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Kernel TCP states, numbered as in `include/net/tcp_states.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TcpState {
    Established,
    SynSent,
    SynRecv,
    #[serde(rename = "FIN_WAIT1")]
    FinWait1,
    #[serde(rename = "FIN_WAIT2")]
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    NewSynRecv,
    #[serde(other)]
    Unknown,
}

impl TcpState {
    pub fn from_raw(state: i32) -> Self {
        match state {
            1 => TcpState::Established,
            2 => TcpState::SynSent,
            3 => TcpState::SynRecv,
            4 => TcpState::FinWait1,
            5 => TcpState::FinWait2,
            6 => TcpState::TimeWait,
            7 => TcpState::Close,
            8 => TcpState::CloseWait,
            9 => TcpState::LastAck,
            10 => TcpState::Listen,
            11 => TcpState::Closing,
            12 => TcpState::NewSynRecv,
            _ => TcpState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TcpState::Established => "ESTABLISHED",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynRecv => "SYN_RECV",
            TcpState::FinWait1 => "FIN_WAIT1",
            TcpState::FinWait2 => "FIN_WAIT2",
            TcpState::TimeWait => "TIME_WAIT",
            TcpState::Close => "CLOSE",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::LastAck => "LAST_ACK",
            TcpState::Listen => "LISTEN",
            TcpState::Closing => "CLOSING",
            TcpState::NewSynRecv => "NEW_SYN_RECV",
            TcpState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[serde(alias = "ipv4")]
    Inet,
    #[serde(alias = "ipv6")]
    Inet6,
}

impl AddressFamily {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Inet,
            IpAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    pub fn raw(&self) -> u16 {
        match self {
            AddressFamily::Inet => AF_INET,
            AddressFamily::Inet6 => AF_INET6,
        }
    }

    /// IP version digit shown in the wide trace layout.
    pub fn version(&self) -> u8 {
        match self {
            AddressFamily::Inet => 4,
            AddressFamily::Inet6 => 6,
        }
    }
}

/// Accepts `ipv4`/`4`/`inet` and `ipv6`/`6`/`inet6`.
impl FromStr for AddressFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ipv4" | "4" | "inet" => Ok(AddressFamily::Inet),
            "ipv6" | "6" | "inet6" => Ok(AddressFamily::Inet6),
            other => Err(format!("unknown address family '{other}'")),
        }
    }
}

fn default_protocol() -> u16 {
    IPPROTO_TCP
}

/// One socket state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub socket: SocketId,
    pub old_state: TcpState,
    pub new_state: TcpState,
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    #[serde(default)]
    pub family: Option<AddressFamily>,
    #[serde(default = "default_protocol")]
    pub protocol: u16,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub tid: u32,
    #[serde(default)]
    pub comm: String,
    #[serde(default)]
    pub delta_us: u64,
    #[serde(default)]
    pub ts_us: u64,
}

impl TransitionEvent {
    /// Address family, derived from the remote address when the source did
    /// not state it.
    pub fn family(&self) -> AddressFamily {
        self.family.unwrap_or_else(|| AddressFamily::of(&self.remote_addr))
    }

    /// Time spent in the previous state, in milliseconds.
    pub fn latency_ms(&self) -> f64 {
        self.delta_us as f64 / 1000.0
    }
}

impl From<&RawEvent> for TransitionEvent {
    fn from(raw: &RawEvent) -> Self {
        let family = if raw.family == AF_INET6 {
            AddressFamily::Inet6
        } else {
            AddressFamily::Inet
        };
        Self {
            socket: SocketId(raw.skaddr),
            old_state: TcpState::from_raw(raw.oldstate),
            new_state: TcpState::from_raw(raw.newstate),
            local_addr: decode_addr(family, &raw.saddr),
            local_port: raw.sport,
            remote_addr: decode_addr(family, &raw.daddr),
            remote_port: raw.dport,
            family: Some(family),
            protocol: if raw.protocol == 0 { IPPROTO_TCP } else { raw.protocol },
            pid: raw.pid,
            tid: raw.tid,
            comm: raw.comm(),
            delta_us: raw.delta_us,
            ts_us: raw.ts_us,
        }
    }
}

fn decode_addr(family: AddressFamily, bytes: &[u8; 16]) -> IpAddr {
    match family {
        AddressFamily::Inet => IpAddr::V4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])),
        AddressFamily::Inet6 => IpAddr::V6(Ipv6Addr::from(*bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(family: u16, daddr: [u8; 16]) -> RawEvent {
        let mut task = [0u8; 16];
        task[..3].copy_from_slice(b"ssh");
        RawEvent {
            saddr: [0; 16],
            daddr,
            skaddr: 0xabc,
            ts_us: 5,
            delta_us: 2_500,
            pid: 10,
            tid: 11,
            oldstate: 2,
            newstate: 1,
            family,
            sport: 40000,
            dport: 22,
            protocol: 0,
            task,
        }
    }

    #[test]
    fn raw_ipv4_event_converts() {
        let mut daddr = [0u8; 16];
        daddr[..4].copy_from_slice(&[192, 168, 0, 9]);
        let ev = TransitionEvent::from(&raw(AF_INET, daddr));
        assert_eq!(ev.socket, SocketId(0xabc));
        assert_eq!(ev.old_state, TcpState::SynSent);
        assert_eq!(ev.new_state, TcpState::Established);
        assert_eq!(ev.remote_addr, "192.168.0.9".parse::<IpAddr>().unwrap());
        assert_eq!(ev.protocol, IPPROTO_TCP);
        assert_eq!(ev.comm, "ssh");
        assert_eq!(ev.latency_ms(), 2.5);
    }

    #[test]
    fn raw_ipv6_event_converts() {
        let addr: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let ev = TransitionEvent::from(&raw(AF_INET6, addr.octets()));
        assert_eq!(ev.family(), AddressFamily::Inet6);
        assert_eq!(ev.remote_addr, IpAddr::V6(addr));
    }

    #[test]
    fn unknown_raw_state_maps_to_unknown() {
        assert_eq!(TcpState::from_raw(13), TcpState::Unknown);
        assert_eq!(TcpState::from_raw(-1), TcpState::Unknown);
    }

    #[test]
    fn json_event_uses_defaults() {
        let line = r#"{"socket": 1, "old_state": "ESTABLISHED", "new_state": "FIN_WAIT1",
            "local_addr": "127.0.0.1", "local_port": 1, "remote_addr": "::1", "remote_port": 2}"#;
        let ev: TransitionEvent = serde_json::from_str(line).unwrap();
        assert_eq!(ev.new_state, TcpState::FinWait1);
        assert_eq!(ev.family(), AddressFamily::Inet6);
        assert_eq!(ev.protocol, IPPROTO_TCP);
        assert!(ev.comm.is_empty());
    }
}
