//! `raster_scan`: run a capture session against the simulated scan device.
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use raster_daq::calibration::format_length;
use raster_daq::config::PipelineConfig;
use raster_daq::device::mock::MockScanDevice;
use raster_daq::pipeline::ScanPipeline;
use raster_daq::scan::{ScanGeometry, ScanMode};
use raster_daq::sink::{ExportBundle, WatchRenderSink};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// One raster, then stop
    Single,
    /// Repeat rasters until the duration elapses or Ctrl-C
    Live,
    /// Open-ended stream until the duration elapses or Ctrl-C
    Free,
}

impl From<Mode> for ScanMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Single => ScanMode::Single,
            Mode::Live => ScanMode::Live,
            Mode::Free => ScanMode::Free,
        }
    }
}

/// Acquire raster scans from a simulated device and report the session.
#[derive(Parser, Debug)]
#[command(name = "raster_scan")]
#[command(about = "Flow-controlled raster scan capture with live frame reassembly")]
struct Args {
    /// Capture mode
    #[arg(short, long, value_enum, default_value = "single")]
    mode: Mode,

    /// TOML configuration file (RASTER_* environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Horizontal resolution in pixels
    #[arg(long, default_value_t = 512)]
    width: u32,

    /// Vertical resolution in pixels
    #[arg(long, default_value_t = 512)]
    height: u32,

    /// Dwell per pixel in device ticks
    #[arg(short, long, default_value_t = 2)]
    dwell: u16,

    /// Samples per simulated device chunk
    #[arg(long, default_value_t = 65536)]
    chunk_len: usize,

    /// Simulated delay per chunk in milliseconds
    #[arg(long, default_value_t = 0)]
    chunk_delay_ms: u64,

    /// Stop live and free scans after this many milliseconds
    #[arg(long, default_value_t = 2000)]
    duration_ms: u64,

    /// Write the final frame as 8-bit PGM into this directory
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Magnification used to report the pixel size (needs `mag_cal` in config)
    #[arg(long, default_value_t = 1.0)]
    magnification: f64,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = PipelineConfig::load(args.config.as_deref()).context("loading configuration")?;
    debug!(?config, "Configuration loaded");

    let geometry = ScanGeometry::full_field(args.width, args.height)?;
    let mut device = MockScanDevice::new(args.chunk_len.max(1));
    if args.chunk_delay_ms > 0 {
        device = device.with_chunk_delay(Duration::from_millis(args.chunk_delay_ms));
    }

    let (render, mut snapshots) = WatchRenderSink::new();
    let mut pipeline = ScanPipeline::new(device, config).with_render_sink(render);

    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            if let Some(snapshot) = snapshots.borrow_and_update().as_ref() {
                debug!(
                    sequence = snapshot.sequence,
                    cursor = snapshot.cursor,
                    "Display refreshed"
                );
            }
        }
    });

    let interrupt = pipeline.interrupt_handle();
    let on_ctrl_c = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, interrupting scan");
            on_ctrl_c.set();
        }
    });

    let mode = ScanMode::from(args.mode);
    if !mode.is_bounded() {
        let duration = Duration::from_millis(args.duration_ms);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            interrupt.set();
        });
    }

    let report = pipeline.run_session(geometry, args.dwell, mode).await?;
    info!(
        chunks = report.chunks,
        samples = report.samples,
        rasters = report.rasters,
        updates = report.updates,
        quantum = report.quantum,
        peak_outstanding = report.peak_outstanding,
        credit_capacity = report.credit_capacity,
        interrupted = report.interrupted,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Session report"
    );

    if let Some(cal) = pipeline.config().mag_cal {
        let pixel = cal.pixel_size(args.magnification, &geometry);
        info!(
            magnification = args.magnification,
            pixel_size = %format_length(pixel),
            field_of_view = %format_length(pixel * geometry.width().max(geometry.height()) as f64),
            "Calibrated pixel size"
        );
    }

    if let Some(dir) = args.export_dir {
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let mut sink = |bundle: ExportBundle| write_pgm(&dir, &bundle);
        if pipeline.export(&mut sink)? {
            info!(dir = %dir.display(), "Frame exported");
        }
    }

    Ok(())
}

fn write_pgm(dir: &std::path::Path, bundle: &ExportBundle) -> std::io::Result<()> {
    let path = dir.join(format!("{}.pgm", bundle.name_hint));
    let mut file = fs::File::create(&path)?;
    write!(file, "P5\n{} {}\n255\n", bundle.width, bundle.height)?;
    file.write_all(&bundle.image_u8)?;
    Ok(())
}
