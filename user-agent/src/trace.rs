//! Live trace display, one line per transition on stdout.

use chrono::Local;

use crate::comms::events::TransitionEvent;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceFormatter {
    pub timestamp: bool,
    pub wide: bool,
}

impl TraceFormatter {
    pub fn new(timestamp: bool, wide: bool) -> Self {
        Self { timestamp, wide }
    }

    pub fn header(&self) -> String {
        let mut out = String::new();
        if self.timestamp {
            out.push_str(&format!("{:<8} ", "TIME(s)"));
        }
        if self.wide {
            out.push_str(&format!(
                "{:<16} {:<7} {:<16} {:<2} {:<26} {:<5} {:<26} {:<5} {:<11} -> {:<11} {}",
                "SKADDR", "PID", "COMM", "IP", "LADDR", "LPORT", "RADDR", "RPORT", "OLDSTATE", "NEWSTATE", "MS"
            ));
        } else {
            out.push_str(&format!(
                "{:<16} {:<7} {:<10} {:<15} {:<5} {:<15} {:<5} {:<11} -> {:<11} {}",
                "SKADDR", "PID", "COMM", "LADDR", "LPORT", "RADDR", "RPORT", "OLDSTATE", "NEWSTATE", "MS"
            ));
        }
        out
    }

    pub fn line(&self, ev: &TransitionEvent) -> String {
        let prefix = match self.timestamp {
            true => format!("{:>8} ", Local::now().format("%H:%M:%S")),
            false => String::new(),
        };
        let laddr = ev.local_addr.to_string();
        let raddr = ev.remote_addr.to_string();
        let body = if self.wide {
            format!(
                "{:<16x} {:<7} {:<16} {:<2} {:<26} {:<5} {:<26} {:<5} {:<11} -> {:<11} {:.3}",
                ev.socket.0,
                ev.pid,
                ev.comm,
                ev.family().version(),
                laddr,
                ev.local_port,
                raddr,
                ev.remote_port,
                ev.old_state.as_str(),
                ev.new_state.as_str(),
                ev.latency_ms()
            )
        } else {
            format!(
                "{:<16x} {:<7} {:<10.10} {:<15} {:<5} {:<15} {:<5} {:<11} -> {:<11} {:.3}",
                ev.socket.0,
                ev.pid,
                ev.comm,
                laddr,
                ev.local_port,
                raddr,
                ev.remote_port,
                ev.old_state.as_str(),
                ev.new_state.as_str(),
                ev.latency_ms()
            )
        };
        prefix + &body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::events::TcpState;
    use crate::correlator::tests::event;

    #[test]
    fn narrow_line_truncates_comm() {
        let mut ev = event(0xffff8880, "10.0.0.1", 443, TcpState::Established);
        ev.comm = "a-very-long-command".into();
        let line = TraceFormatter::default().line(&ev);
        assert!(line.starts_with("ffff8880         4242    a-very-lon 192.168.1.5     50000 10.0.0.1        443  "));
        assert!(line.ends_with("SYN_SENT    -> ESTABLISHED 1.250"));
    }

    #[test]
    fn wide_line_carries_ip_version() {
        let ev = event(1, "2001:db8::1", 22, TcpState::Close);
        let line = TraceFormatter::new(false, true).line(&ev);
        let cols: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(cols[3], "6");
        assert_eq!(cols[6], "2001:db8::1");
    }

    #[test]
    fn header_columns_line_up_with_timestamp() {
        let fmt = TraceFormatter::new(true, false);
        assert!(fmt.header().starts_with("TIME(s)  SKADDR "));
        let line = fmt.line(&event(1, "10.0.0.1", 1, TcpState::Listen));
        assert_eq!(&line[2..3], ":");
        assert_eq!(&line[8..9], " ");
    }
}
