use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use marker_track::capture::{FrameSource, ImageSequenceSource, open_feed};
use marker_track::config::{FeedSpec, TrackerConfig};
use marker_track::detection::{DetectionLog, replay_factory};
use marker_track::geometry::posit_factory;
use marker_track::system::{TracingSink, TrackingSession};
use marker_track::tracking::TrackingLoop;

#[derive(Parser)]
#[command(name = "marker-track")]
#[command(about = "Track a square fiducial marker and publish its pose")]
#[command(version)]
struct Cli {
    /// Tracker configuration (YAML or JSON).
    #[arg(long)]
    config: PathBuf,

    /// Recorded detector output to replay (CSV, one row per marker).
    #[arg(long)]
    detections: Option<PathBuf>,

    /// Stop after this many frames have been sent and answered.
    #[arg(long)]
    frames: Option<u64>,

    /// Stream poses to a rerun viewer.
    #[arg(long)]
    viz: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = TrackerConfig::from_yaml_file(&cli.config)?;
    config.validate()?;

    let Some(detections) = cli.detections.as_ref() else {
        bail!("No marker detector backend is built in; pass --detections <csv> to replay one");
    };
    let log = DetectionLog::from_csv_path(detections)?;
    info!(
        calls = log.num_calls(),
        path = %detections.display(),
        "Loaded detection log"
    );

    // Without a frame budget a file feed plays once and the run ends with it.
    let play_once = cli.frames.is_none() && matches!(config.feed, FeedSpec::File(_));
    let source: Box<dyn FrameSource> = match &config.feed {
        FeedSpec::File(path) if play_once => Box::new(ImageSequenceSource::open(path, false)?),
        feed => open_feed(feed)?,
    };

    let mut tracker = TrackingLoop::setup(
        &config,
        source,
        replay_factory(Arc::new(log), true),
        posit_factory(),
    )?;
    tracker.add_sink(Box::new(TracingSink));
    add_viewer(&mut tracker, cli.viz)?;

    let mut session = TrackingSession::new(tracker, config.refresh_interval());
    if let Some(frames) = cli.frames {
        session = session.with_frame_budget(frames);
    }
    if play_once {
        session = session.stop_when_source_exhausted();
    }

    let stats = session
        .run(&crossbeam_channel::never())
        .context("Tracking stopped")?;

    println!("\n=== Tracking Summary ===");
    println!("Ticks: {}", stats.ticks);
    println!("Frames sent: {}", stats.frames_sent);
    println!("Skipped (detector busy): {}", stats.skipped_busy);
    println!("Results received: {}", stats.results_received);
    println!("Empty results: {}", stats.empty_results);
    println!("Stale results discarded: {}", stats.stale_discards);
    println!("Poses published: {}", stats.poses_published);
    println!("Solver failures: {}", stats.solver_failures);
    println!("Detector errors: {}", stats.detector_errors);
    println!("Timeouts: {}", stats.timeouts);
    println!("Channel restarts: {}", stats.channel_restarts);

    Ok(())
}

#[cfg(feature = "viz")]
fn add_viewer(tracker: &mut TrackingLoop, enabled: bool) -> Result<()> {
    if enabled {
        let sink = marker_track::viz::RerunPoseSink::spawn("marker-track")?;
        tracker.add_sink(Box::new(sink));
    }
    Ok(())
}

#[cfg(not(feature = "viz"))]
fn add_viewer(_tracker: &mut TrackingLoop, enabled: bool) -> Result<()> {
    if enabled {
        bail!("Built without the `viz` feature");
    }
    Ok(())
}
