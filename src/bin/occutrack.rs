//! Replays a JSON-lines detection log through the monitor.
//!
//! Each input line is one frame:
//! `{"camera_id": "...", "timestamp": <epoch seconds | ISO-8601>, "detections": [...]}`.
//! Alerts are logged and, with `--alerts-out`, appended as JSON lines. A
//! per-camera summary is printed to stdout at the end.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use occutrack_rs::error::SourceError;
use occutrack_rs::integration::{JsonLinesSink, LogSink};
use occutrack_rs::{
    AlertSink, DetectionSource, JsonLinesSource, Monitor, MonitorConfig, RetryingDispatcher,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Replay detections through the occupancy monitor", long_about = None)]
struct Args {
    /// Monitor configuration (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Detection log, one frame per line; `-` reads stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Append alerts to this file as JSON lines
    #[arg(short, long)]
    alerts_out: Option<PathBuf>,

    /// Do not replay silent cameras as empty frames
    #[arg(long)]
    no_timeouts: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "occutrack=info,occutrack_rs=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => MonitorConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MonitorConfig::default(),
    };

    let mut sinks: Vec<Box<dyn AlertSink>> = vec![Box::new(LogSink)];
    if let Some(path) = &args.alerts_out {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening alert output {}", path.display()))?;
        sinks.push(Box::new(JsonLinesSink::new("alerts-out", BufWriter::new(file))));
    }
    let dispatcher = Arc::new(
        RetryingDispatcher::spawn(config.dispatcher.clone(), sinks)
            .context("starting alert dispatcher")?,
    );

    let monitor = Monitor::new(config, dispatcher.clone()).context("invalid configuration")?;

    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&args.input).with_context(|| format!("opening {}", args.input))?;
        Box::new(BufReader::new(file))
    };
    let mut source = JsonLinesSource::new(reader);

    let mut frames = 0u64;
    let mut rejected = 0u64;
    let mut latest = None;
    loop {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(SourceError::Io(e)) => return Err(e).context("reading detections"),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable frame");
                continue;
            }
        };
        latest = latest.max(Some(frame.timestamp));
        // cameras keep their own clocks; only a camera's own gap times it out
        let result = if args.no_timeouts {
            monitor.process(frame)
        } else {
            monitor.ingest(frame)
        };
        match result {
            Ok(_) => frames += 1,
            Err(e) => {
                tracing::warn!(error = %e, "frame rejected");
                rejected += 1;
            }
        }
    }
    if let Some(end) = latest.filter(|_| !args.no_timeouts) {
        monitor.check_timeouts(end);
    }

    let mut cameras = Vec::new();
    for camera in monitor.cameras() {
        let snapshot = monitor.export_snapshot(&camera)?;
        let epoch = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
        cameras.push(serde_json::json!({
            "camera_id": camera,
            "frames": snapshot.frames_processed,
            "active_tracks": snapshot.tracks.iter().filter(|t| t.state.is_live()).count(),
            "archived_sessions": snapshot.archive.len(),
            "heatmap_total": snapshot.aggregate.heatmap.total(),
            "hottest_cell": snapshot.aggregate.heatmap.hottest(),
            "busiest_hours": snapshot.busiest_hours,
            "alerts": monitor.get_recent_alerts(&camera, epoch).len(),
        }));
    }

    drop(monitor);
    let stats = match Arc::try_unwrap(dispatcher) {
        Ok(dispatcher) => Some(dispatcher.shutdown()),
        Err(_) => None,
    };

    let summary = serde_json::json!({
        "frames": frames,
        "rejected_frames": rejected,
        "dispatch": stats,
        "cameras": cameras,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
