//! Build with `cargo run --release --bin snapshot_dump` while the agent runs.
//! Prints every new snapshot generation the agent publishes.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use prost::Message;
use shared::{
    constants::{SHM_KEY, SNAPSHOT_SEGMENT_SIZE},
    events::SessionSnapshot,
    segment::ReadError,
    shm::ShmSegment,
};
use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    thread,
    time::Duration,
};

const POLL: Duration = Duration::from_millis(100);
const READ_ATTEMPTS: usize = 8;

/// Watch the session snapshot segment.
#[derive(Debug, Parser)]
#[command(name = "snapshot_dump", version, about)]
struct Args {
    /// SysV key of the segment
    #[arg(long, default_value_t = SHM_KEY)]
    key: i32,

    /// Minimum segment size expected, in bytes
    #[arg(long, default_value_t = SNAPSHOT_SEGMENT_SIZE)]
    size: usize,

    /// Print the current snapshot and exit
    #[arg(long)]
    once: bool,
}

fn addr(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => {
            let mut o = [0u8; 4];
            o.copy_from_slice(bytes);
            IpAddr::V4(Ipv4Addr::from(o)).to_string()
        }
        16 => {
            let mut o = [0u8; 16];
            o.copy_from_slice(bytes);
            IpAddr::V6(Ipv6Addr::from(o)).to_string()
        }
        _ => "?".into(),
    }
}

fn print(generation: u64, snap: &SessionSnapshot) {
    let at = snap
        .observed_at
        .as_ref()
        .and_then(|t| DateTime::<Utc>::from_timestamp(t.seconds, t.nanos.max(0) as u32))
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    println!(
        "#{generation:<6} {at} {:<9} {:<16x} {:<7} {:<16} {}:{} -> {}:{}  active={} peers={}",
        snap.change_kind().as_str_name(),
        snap.socket_id,
        snap.pid,
        snap.comm,
        addr(&snap.local_addr),
        snap.local_port,
        addr(&snap.remote_addr),
        snap.remote_port,
        snap.active_sessions,
        snap.distinct_peers,
    );
}

fn main() -> Result<()> {
    let args = Args::parse();

    /*── attach read-only ───────────────────────*/
    let segment = ShmSegment::open_existing(args.key, true)
        .with_context(|| format!("no snapshot segment at key {} (is the agent running?)", args.key))?;
    if segment.size() < args.size {
        bail!("segment is {} bytes, expected at least {}", segment.size(), args.size);
    }
    let view = segment.reader()?;
    eprintln!("attached key={} id={} ({} bytes)", args.key, segment.id(), segment.size());

    let mut last = 0u64;
    loop {
        match view.read_consistent(READ_ATTEMPTS) {
            Ok((generation, bytes)) if generation != last => {
                last = generation;
                match SessionSnapshot::decode(&*bytes) {
                    Ok(snap) => print(generation, &snap),
                    Err(e) => eprintln!("generation {generation}: undecodable payload: {e}"),
                }
            }
            Ok(_) => {}
            Err(ReadError::Empty) | Err(ReadError::Uninitialised) => {
                if args.once {
                    println!("no snapshot published yet");
                }
            }
            // writer kept the lock through every attempt; try again next tick
            Err(ReadError::Torn) => {}
            Err(e) => bail!("cannot read segment: {e}"),
        }
        if args.once {
            return Ok(());
        }
        thread::sleep(POLL);
    }
}
