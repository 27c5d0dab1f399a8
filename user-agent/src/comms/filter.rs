//! Family / port filter applied before correlation (`-4`, `-6`, `-L`, `-D`).

use super::events::{AddressFamily, TransitionEvent};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub family: Option<AddressFamily>,
    /// Empty means every local port.
    pub local_ports: Vec<u16>,
    /// Empty means every remote port.
    pub remote_ports: Vec<u16>,
}

impl EventFilter {
    pub fn accepts(&self, ev: &TransitionEvent) -> bool {
        if let Some(family) = self.family {
            if ev.family() != family {
                return false;
            }
        }
        if !self.local_ports.is_empty() && !self.local_ports.contains(&ev.local_port) {
            return false;
        }
        if !self.remote_ports.is_empty() && !self.remote_ports.contains(&ev.remote_port) {
            return false;
        }
        true
    }

    pub fn is_pass_all(&self) -> bool {
        self.family.is_none() && self.local_ports.is_empty() && self.remote_ports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::events::{SocketId, TcpState};

    fn ev(remote: &str, lport: u16, rport: u16) -> TransitionEvent {
        TransitionEvent {
            socket: SocketId(1),
            old_state: TcpState::SynSent,
            new_state: TcpState::Established,
            local_addr: "0.0.0.0".parse().unwrap(),
            local_port: lport,
            remote_addr: remote.parse().unwrap(),
            remote_port: rport,
            family: None,
            protocol: 6,
            pid: 1,
            tid: 1,
            comm: "t".into(),
            delta_us: 0,
            ts_us: 0,
        }
    }

    #[test]
    fn default_filter_passes_everything() {
        let f = EventFilter::default();
        assert!(f.is_pass_all());
        assert!(f.accepts(&ev("::1", 1, 2)));
    }

    #[test]
    fn family_and_ports_must_all_match() {
        let f = EventFilter {
            family: Some(AddressFamily::Inet),
            local_ports: vec![],
            remote_ports: vec![80, 443],
        };
        assert!(f.accepts(&ev("10.0.0.1", 5000, 443)));
        assert!(!f.accepts(&ev("10.0.0.1", 5000, 22)));
        assert!(!f.accepts(&ev("2001:db8::1", 5000, 443)));
    }

    #[test]
    fn local_port_list_restricts() {
        let f = EventFilter { local_ports: vec![22], ..Default::default() };
        assert!(f.accepts(&ev("10.0.0.1", 22, 50000)));
        assert!(!f.accepts(&ev("10.0.0.1", 23, 50000)));
    }
}
