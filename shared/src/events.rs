//! Snapshot message written into the shared segment.
//!
//! Hand-maintained prost definitions; field tags are part of the segment
//! contract and must never be renumbered.

/// What happened to the session described by a [`SessionSnapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SessionChange {
    Unspecified = 0,
    Opened = 1,
    Refreshed = 2,
    Closed = 3,
}

impl SessionChange {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            SessionChange::Unspecified => "UNSPECIFIED",
            SessionChange::Opened => "OPENED",
            SessionChange::Refreshed => "REFRESHED",
            SessionChange::Closed => "CLOSED",
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionSnapshot {
    #[prost(enumeration = "SessionChange", tag = "1")]
    pub change: i32,
    #[prost(uint64, tag = "2")]
    pub socket_id: u64,
    #[prost(uint32, tag = "3")]
    pub pid: u32,
    #[prost(uint32, tag = "4")]
    pub tid: u32,
    #[prost(string, tag = "5")]
    pub comm: ::prost::alloc::string::String,
    #[prost(uint32, tag = "6")]
    pub family: u32,
    #[prost(bytes = "vec", tag = "7")]
    pub local_addr: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint32, tag = "8")]
    pub local_port: u32,
    #[prost(bytes = "vec", tag = "9")]
    pub remote_addr: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint32, tag = "10")]
    pub remote_port: u32,
    #[prost(uint32, tag = "11")]
    pub protocol: u32,
    #[prost(uint64, tag = "12")]
    pub delta_us: u64,
    #[prost(uint32, tag = "13")]
    pub active_sessions: u32,
    #[prost(uint32, tag = "14")]
    pub distinct_peers: u32,
    #[prost(message, optional, tag = "15")]
    pub observed_at: ::core::option::Option<::prost_types::Timestamp>,
}

impl SessionSnapshot {
    /// Decoded `change`, `Unspecified` for values this build does not know.
    pub fn change_kind(&self) -> SessionChange {
        SessionChange::try_from(self.change).unwrap_or(SessionChange::Unspecified)
    }
}
