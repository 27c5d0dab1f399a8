// src/main.rs

//! Agent entry-point.
//!
//! 1. Parse the command line and configuration, set up structured logging
//! 2. Open the event source, peer log and snapshot segment (fatal on error)
//! 3. Run the event loop on a blocking thread
//! 4. Wait for SIGINT / SIGTERM or source exhaustion, then shut down cleanly

use anyhow::{Context, Result};
use clap::Parser;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::signal::unix::{signal, SignalKind};

use agent::{
    comms::{
        events::AddressFamily, memory_ring::RingSource, replay::JsonLinesSource, EventSource,
    },
    config::{self, LogMode, Settings, SourceKind},
    correlator::Correlator,
    logging::setup_logging,
    runtime::{self, LoopOptions, RunSummary},
    sink::{
        file::FilePeerLog,
        writer::{spawn_peer_log_writer, PeerLogWriterHandle},
        PeerLog,
    },
    snapshot::{shm::ShmPublisher, NullPublisher, SnapshotPublisher},
};

/// Trace TCP state changes, track live sessions and log first-seen peers.
#[derive(Debug, Parser)]
#[command(name = "sockwatch", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Prefix trace lines with HH:MM:SS
    #[arg(short = 'T', long)]
    timestamp: bool,

    /// Wide trace columns (fits IPv6)
    #[arg(short, long)]
    wide: bool,

    /// Only IPv4 sockets
    #[arg(short = '4', long, conflicts_with = "ipv6")]
    ipv4: bool,

    /// Only IPv6 sockets
    #[arg(short = '6', long)]
    ipv6: bool,

    /// Comma-separated local ports to keep
    #[arg(short = 'L', long, value_name = "PORTS")]
    localport: Option<String>,

    /// Comma-separated remote ports to keep
    #[arg(short = 'D', long, value_name = "PORTS")]
    remoteport: Option<String>,

    /// Read events from this ring file
    #[arg(long, value_name = "PATH", conflicts_with = "replay")]
    ring: Option<PathBuf>,

    /// Replay JSON-lines events from a file, or `-` for stdin
    #[arg(long, value_name = "PATH")]
    replay: Option<PathBuf>,

    /// Suppress the live trace display
    #[arg(long)]
    no_trace: bool,

    /// Peer log path (default unique.txt)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

/// Fold command-line overrides into the loaded settings.
fn apply_args(settings: &mut Settings, args: &Args) -> Result<()> {
    if args.timestamp {
        settings.trace.format.timestamp = true;
    }
    if args.wide {
        settings.trace.format.wide = true;
    }
    if args.no_trace {
        settings.trace.enable = false;
    }
    if args.ipv4 {
        settings.filter.family = Some(AddressFamily::Inet);
    }
    if args.ipv6 {
        settings.filter.family = Some(AddressFamily::Inet6);
    }
    if let Some(list) = &args.localport {
        settings.filter.local_ports = config::parse_port_list(list).context("--localport")?;
    }
    if let Some(list) = &args.remoteport {
        settings.filter.remote_ports = config::parse_port_list(list).context("--remoteport")?;
    }
    if let Some(path) = &args.ring {
        settings.source.kind = SourceKind::Ring;
        settings.source.path = path.clone();
    }
    if let Some(path) = &args.replay {
        settings.source.kind = SourceKind::JsonLines;
        settings.source.path = path.clone();
    }
    if let Some(path) = &args.log_file {
        settings.peer_log.path = path.clone();
    }
    Ok(())
}

fn open_source(settings: &Settings) -> Result<Box<dyn EventSource + Send>> {
    let path = &settings.source.path;
    let source: Box<dyn EventSource + Send> = match settings.source.kind {
        SourceKind::Ring => Box::new(RingSource::open(path).context("opening event ring")?),
        SourceKind::JsonLines => {
            Box::new(JsonLinesSource::open(path).context("opening replay input")?)
        }
    };
    Ok(source)
}

fn open_peer_log(settings: &Settings) -> Result<(Box<dyn PeerLog + Send>, Option<PeerLogWriterHandle>)> {
    let inline = FilePeerLog::new(&settings.peer_log.path);
    inline.check_writable().context("opening peer log")?;
    log::info!("logging first-seen peers to {:?} ({:?})", inline.path(), settings.peer_log.mode);
    match settings.peer_log.mode {
        LogMode::Inline => {
            let log: Box<dyn PeerLog + Send> = Box::new(inline);
            Ok((log, None))
        }
        LogMode::Queued => {
            let (queued, handle) =
                spawn_peer_log_writer(settings.peer_log.path.clone(), settings.peer_log.queue.clone())
                    .context("spawning peer log writer")?;
            let log: Box<dyn PeerLog + Send> = Box::new(queued);
            Ok((log, Some(handle)))
        }
    }
}

fn open_publisher(settings: &Settings) -> Result<Box<dyn SnapshotPublisher + Send>> {
    let snap = settings.snapshot;
    if !snap.enable {
        log::info!("snapshot publication disabled");
        return Ok(Box::new(NullPublisher::default()));
    }
    let publisher = ShmPublisher::attach(snap.key, snap.size)
        .with_context(|| format!("attaching snapshot segment key={}", snap.key))?;
    Ok(Box::new(publisher))
}

fn install_metrics(settings: &Settings) -> Result<()> {
    if let Some(addr) = settings.metrics {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        log::info!("metrics exporter listening on {addr}");
    }
    Ok(())
}

async fn wait_for_signal(stop: Arc<AtomicBool>) -> Result<()> {
    let mut term = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::warn!("SIGINT received, stopping"),
        _ = term.recv() => log::warn!("SIGTERM received, stopping"),
    }
    stop.store(true, Ordering::Relaxed);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1 ─ Context
    let args = Args::parse();
    let mut settings = config::load(args.config.as_deref()).context("loading configuration")?;
    apply_args(&mut settings, &args)?;

    // 2 ─ Logging & metrics
    setup_logging(&settings.logging, args.verbose).context("logging setup failed")?;
    log::info!("sockwatch starting");
    install_metrics(&settings)?;

    // 3 ─ Resources
    let mut source = open_source(&settings)?;
    let (peer_log, writer) = open_peer_log(&settings)?;
    let publisher = open_publisher(&settings)?;
    let opts = LoopOptions {
        filter: settings.filter.clone(),
        trace: settings.trace.enable.then_some(settings.trace.format),
        poll_timeout: settings.source.poll_timeout,
    };

    // 4 ─ Event loop
    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = stop.clone();
    let event_loop = tokio::task::spawn_blocking(move || -> Result<RunSummary> {
        let mut correlator = Correlator::new(peer_log, publisher);
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let summary = runtime::run(&mut source, &mut correlator, &opts, &loop_stop, &mut out)?;
        // Dropping the queued log closes the writer's queue.
        drop(correlator.into_parts());
        Ok(summary)
    });

    let signals = tokio::spawn(async move {
        if let Err(e) = wait_for_signal(stop).await {
            log::error!("signal handling unavailable: {e:#}");
        }
    });
    let summary = event_loop.await.context("event loop panicked")??;
    signals.abort();

    // 5 ─ Shutdown
    if let Some(writer) = writer {
        let report = writer.join();
        log::info!("peer log writer drained: {} written, {} failed", report.written, report.failed);
    }
    log::info!(
        "sockwatch stopped ({:?}): {} first-seen peers, {} log failures, {} publish failures",
        summary.reason,
        summary.stats.peers_first_seen,
        summary.stats.log_failures,
        summary.stats.publish_failures
    );
    Ok(())
}
