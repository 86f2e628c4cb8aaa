//! occupancyd - Zone occupancy daemon.
//!
//! 1. Loads configuration (file, then OCCUPANCY_* environment overrides)
//! 2. Connects the video source and the detector backend
//! 3. Connects to the MQTT broker (or logs events with --dry-run)
//! 4. Runs the frame loop until Ctrl-C, end of stream or --max-frames

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use zone_occupancy::{
    build_backend, EventSink, FrameSource, MemorySink, MqttPublisher, OccupancyConfig, Pipeline,
    PipelineConfig, VideoSource, Zone,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Count distinct people inside a zone and publish changes over MQTT"
)]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "OCCUPANCY_CONFIG")]
    config: Option<PathBuf>,

    /// Log occupancy events instead of publishing them.
    #[arg(long)]
    dry_run: bool,

    /// Stop after this many processed frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Startup output style.
    #[arg(long, default_value = "auto", value_parser = ["auto", "plain", "pretty"])]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::from_flag(&args.ui, std::io::stderr().is_terminal());

    let mut cfg = {
        let mut stage = ui.stage("Load configuration");
        let cfg = OccupancyConfig::load_from(args.config.as_deref())?;
        stage.detail(format!("source {}", cfg.source.url));
        cfg
    };
    if args.max_frames.is_some() {
        cfg.pipeline.max_frames = args.max_frames;
    }

    let zone = {
        let mut stage = ui.stage("Build zone");
        let zone = Zone::from_settings(&cfg.zone, cfg.source.width, cfg.source.height)?;
        stage.detail(format!(
            "{} vertices, class {}",
            zone.polygon().vertices().len(),
            zone.target_class()
        ));
        zone
    };

    let detector = {
        let mut stage = ui.stage("Load detector");
        let mut detector = build_backend(&cfg.detector)?;
        detector
            .warm_up()
            .with_context(|| format!("{} detector warm-up failed", detector.name()))?;
        stage.detail(detector.name());
        detector
    };

    let source = {
        let _stage = ui.stage("Connect video source");
        let mut source = VideoSource::new(&cfg.source)?;
        source
            .connect()
            .with_context(|| format!("video source {} unavailable", cfg.source.url))?;
        source
    };

    let sink: Box<dyn EventSink> = if args.dry_run {
        log::warn!("dry run: occupancy events are logged, not published");
        Box::new(MemorySink::logging())
    } else {
        let mut stage = ui.stage("Connect MQTT broker");
        let publisher = MqttPublisher::connect(&cfg.mqtt)?;
        stage.detail(format!("topic {}", publisher.topic()));
        Box::new(publisher)
    };

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let mut pipeline = Pipeline::new(
        source,
        detector,
        sink,
        zone,
        PipelineConfig::from_config(&cfg),
    );
    log::info!("occupancyd running. Ctrl-C to stop.");
    let stats = pipeline.run(&stop)?;
    log::info!("occupancyd exiting: {}", stats);
    Ok(())
}
