//! Channel-fed source.
//!
//! Pulls [`SourceItem`]s from a crossbeam channel. Whatever feeds the other
//! end (an embedding program, a perf-buffer thread, a test) owns the
//! producer side; dropping every sender ends the source.

use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use super::{EventSource, PollStatus, SourceError, SourceItem};

/// Upper bound on items drained per poll so one burst cannot hold the loop
/// past a stop request for long.
const MAX_BATCH: usize = 1_024;

pub struct ChannelSource {
    rx: Receiver<SourceItem>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<SourceItem>) -> Self {
        Self { rx }
    }
}

impl EventSource for ChannelSource {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn poll(
        &mut self,
        timeout: Duration,
        on_item: &mut dyn FnMut(SourceItem),
    ) -> Result<PollStatus, SourceError> {
        let first = match self.rx.recv_timeout(timeout) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => return Ok(PollStatus::Idle),
            Err(RecvTimeoutError::Disconnected) => return Ok(PollStatus::Exhausted),
        };
        on_item(first);

        let mut delivered = 1;
        while delivered < MAX_BATCH {
            match self.rx.try_recv() {
                Ok(item) => {
                    on_item(item);
                    delivered += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(PollStatus::Delivered(delivered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn drains_in_order_then_reports_exhausted() {
        let (tx, rx) = unbounded();
        tx.send(SourceItem::Lost { cpu: 1, count: 3 }).unwrap();
        tx.send(SourceItem::Lost { cpu: 2, count: 4 }).unwrap();
        drop(tx);

        let mut source = ChannelSource::new(rx);
        let mut got = Vec::new();
        let status = source.poll(Duration::from_millis(10), &mut |i| got.push(i)).unwrap();
        assert_eq!(status, PollStatus::Delivered(2));
        assert_eq!(
            got,
            vec![SourceItem::Lost { cpu: 1, count: 3 }, SourceItem::Lost { cpu: 2, count: 4 }]
        );

        let status = source.poll(Duration::from_millis(10), &mut |_| {}).unwrap();
        assert_eq!(status, PollStatus::Exhausted);
    }

    #[test]
    fn empty_channel_times_out_idle() {
        let (_tx, rx) = unbounded::<SourceItem>();
        let mut source = ChannelSource::new(rx);
        let status = source.poll(Duration::from_millis(5), &mut |_| {}).unwrap();
        assert_eq!(status, PollStatus::Idle);
    }
}
