//! Event loop: poll a source, filter, trace, correlate.
//!
//! Runs on one thread and owns nothing but borrowed collaborators, so the
//! binary and the integration tests drive it the same way. The stop flag is
//! checked once per poll; a poll returns within its timeout, so shutdown
//! latency is bounded by `poll_timeout`.

use std::{
    io::Write,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use crate::{
    comms::{filter::EventFilter, EventSource, PollStatus, SourceError, SourceItem},
    correlator::{Correlator, CorrelatorStats},
    sink::PeerLog,
    snapshot::SnapshotPublisher,
    trace::TraceFormatter,
};

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub filter: EventFilter,
    /// `None` disables the trace display.
    pub trace: Option<TraceFormatter>,
    pub poll_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Signalled,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub stats: CorrelatorStats,
    pub filtered: u64,
}

pub fn run<S, L, P>(
    source: &mut S,
    correlator: &mut Correlator<L, P>,
    opts: &LoopOptions,
    stop: &AtomicBool,
    out: &mut dyn Write,
) -> Result<RunSummary, SourceError>
where
    S: EventSource + ?Sized,
    L: PeerLog,
    P: SnapshotPublisher,
{
    log::info!("event loop started on {} source", source.name());
    let mut trace = opts.trace;
    if let Some(fmt) = trace {
        if let Err(e) = writeln!(out, "{}", fmt.header()) {
            log::warn!("trace display disabled: {e}");
            trace = None;
        }
    }

    let mut filtered = 0u64;
    let reason = loop {
        if stop.load(Ordering::Relaxed) {
            break StopReason::Signalled;
        }

        let status = source.poll(opts.poll_timeout, &mut |item| match item {
            SourceItem::Event(ev) => {
                if !opts.filter.accepts(&ev) {
                    filtered += 1;
                    return;
                }
                if let Some(fmt) = trace {
                    if let Err(e) = writeln!(out, "{}", fmt.line(&ev)) {
                        log::warn!("trace display disabled: {e}");
                        trace = None;
                    }
                }
                correlator.handle(&ev);
            }
            SourceItem::Lost { cpu, count } => correlator.handle_lost(cpu, count),
        })?;

        match status {
            PollStatus::Exhausted => break StopReason::Exhausted,
            PollStatus::Delivered(n) => log::trace!("delivered {n} items"),
            PollStatus::Idle => {}
        }
    };

    let _ = out.flush();
    let stats = correlator.stats();
    log::info!(
        "event loop stopped ({:?}): {} events, {} filtered, {} sessions opened, {} closed, {} active, {} distinct peers, {} lost",
        reason,
        stats.events,
        filtered,
        stats.sessions_opened,
        stats.sessions_closed,
        correlator.sessions().len(),
        correlator.peers().len(),
        stats.lost_events
    );
    Ok(RunSummary { reason, stats, filtered })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::{events::TcpState, listeners::ChannelSource};
    use crate::correlator::tests::{event, RecordingLog, RecordingPublisher};
    use crossbeam::channel;

    fn opts(filter: EventFilter, trace: bool) -> LoopOptions {
        LoopOptions {
            filter,
            trace: trace.then(TraceFormatter::default),
            poll_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn runs_until_the_channel_closes() {
        let (tx, rx) = channel::unbounded();
        tx.send(SourceItem::Event(event(1, "10.0.0.1", 443, TcpState::Established))).unwrap();
        tx.send(SourceItem::Lost { cpu: 1, count: 4 }).unwrap();
        tx.send(SourceItem::Event(event(1, "10.0.0.1", 443, TcpState::Close))).unwrap();
        drop(tx);

        let mut source = ChannelSource::new(rx);
        let mut c = Correlator::new(RecordingLog::default(), RecordingPublisher::default());
        let mut out = Vec::new();
        let summary = run(&mut source, &mut c, &opts(EventFilter::default(), true), &AtomicBool::new(false), &mut out)
            .unwrap();

        assert_eq!(summary.reason, StopReason::Exhausted);
        assert_eq!(summary.stats.events, 2);
        assert_eq!(summary.stats.lost_events, 4);
        assert!(c.sessions().is_empty());

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("SKADDR"));
        assert!(lines[2].contains("-> CLOSE"));
    }

    #[test]
    fn filtered_events_never_reach_the_correlator() {
        let (tx, rx) = channel::unbounded();
        tx.send(SourceItem::Event(event(1, "10.0.0.1", 443, TcpState::Established))).unwrap();
        tx.send(SourceItem::Event(event(2, "10.0.0.2", 22, TcpState::Established))).unwrap();
        drop(tx);

        let filter = EventFilter { remote_ports: vec![22], ..Default::default() };
        let mut source = ChannelSource::new(rx);
        let mut c = Correlator::new(RecordingLog::default(), RecordingPublisher::default());
        let summary = run(&mut source, &mut c, &opts(filter, false), &AtomicBool::new(false), &mut Vec::new())
            .unwrap();

        assert_eq!(summary.filtered, 1);
        assert_eq!(c.peers().len(), 1);
        assert_eq!(c.peer_log().lines.len(), 1);
    }

    #[test]
    fn stop_flag_ends_an_idle_loop() {
        let (_tx, rx) = channel::unbounded::<SourceItem>();
        let mut source = ChannelSource::new(rx);
        let mut c = Correlator::new(RecordingLog::default(), RecordingPublisher::default());
        let stop = AtomicBool::new(true);
        let summary = run(&mut source, &mut c, &opts(EventFilter::default(), false), &stop, &mut Vec::new())
            .unwrap();
        assert_eq!(summary.reason, StopReason::Signalled);
        assert_eq!(summary.stats.events, 0);
    }
}
