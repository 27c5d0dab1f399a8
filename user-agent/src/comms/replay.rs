//! Newline-delimited JSON replay source.
//!
//! Each line is either a [`TransitionEvent`] object or a lost-events notice
//! `{"lost": 12, "cpu": 3}`. Used to replay captured traces and to drive the
//! agent without a kernel producer.
//!
//! Lines are read and parsed on a `replay-reader` thread that feeds a bounded
//! channel, so a poll never blocks past its timeout even when the input is an
//! idle pipe or terminal.

use crossbeam::channel::{bounded, Sender};
use serde::Deserialize;
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{
    events::TransitionEvent, listeners::ChannelSource, EventSource, PollStatus, SourceError,
    SourceItem,
};

/// Parsed lines buffered ahead of the event loop.
const READ_AHEAD: usize = 1_024;

#[derive(Deserialize)]
#[serde(untagged)]
enum Line {
    Lost {
        lost: u64,
        #[serde(default)]
        cpu: u32,
    },
    Event(TransitionEvent),
}

fn parse(line_no: usize, text: &str) -> Option<SourceItem> {
    match serde_json::from_str::<Line>(text) {
        Ok(Line::Event(ev)) => Some(SourceItem::Event(ev)),
        Ok(Line::Lost { lost, cpu }) => Some(SourceItem::Lost { cpu, count: lost }),
        Err(e) => {
            log::warn!("replay line {line_no}: ignored malformed record: {e}");
            None
        }
    }
}

/// Reader thread body. Returns when the input ends, a read fails, or the
/// source has been dropped.
fn read_lines(mut reader: Box<dyn BufRead + Send>, tx: Sender<SourceItem>) -> io::Result<usize> {
    let mut buf = String::new();
    let mut line_no = 0;
    loop {
        buf.clear();
        if reader.read_line(&mut buf)? == 0 {
            log::debug!("replay input ended after {line_no} lines");
            return Ok(line_no);
        }
        line_no += 1;
        let text = buf.trim();
        if text.is_empty() {
            continue;
        }
        if let Some(item) = parse(line_no, text) {
            if tx.send(item).is_err() {
                return Ok(line_no);
            }
        }
    }
}

pub struct JsonLinesSource {
    inner: ChannelSource,
    reader: Option<JoinHandle<io::Result<usize>>>,
}

impl JsonLinesSource {
    pub fn new(reader: Box<dyn BufRead + Send>) -> Result<Self, SourceError> {
        let (tx, rx) = bounded(READ_AHEAD);
        let handle = thread::Builder::new()
            .name("replay-reader".into())
            .spawn(move || read_lines(reader, tx))?;
        Ok(Self { inner: ChannelSource::new(rx), reader: Some(handle) })
    }

    /// `-` reads standard input.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        if path == Path::new("-") {
            return Self::new(Box::new(BufReader::new(io::stdin())));
        }
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(Box::new(BufReader::new(file)))
    }

    /// Surface a read error from the reader thread once it has finished.
    fn finish(&mut self) -> Result<(), SourceError> {
        let Some(handle) = self.reader.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(SourceError::Io(e)),
            Err(_) => Err(SourceError::Io(io::Error::other("replay reader panicked"))),
        }
    }
}

impl EventSource for JsonLinesSource {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn poll(
        &mut self,
        timeout: Duration,
        on_item: &mut dyn FnMut(SourceItem),
    ) -> Result<PollStatus, SourceError> {
        let status = self.inner.poll(timeout, on_item)?;
        if status == PollStatus::Exhausted {
            self.finish()?;
        }
        Ok(status)
    }
}
