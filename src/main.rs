use anyhow::{Context, Result, bail};
use clap::Parser;
use color_sorter::capture::{FrameSource, ImageSequenceSource, run_sampling};
use color_sorter::config::SorterConfig;
use color_sorter::controller::{SorterController, SorterHandle, event_bus};
use color_sorter::core_modules::actuator::{ActuatorDispatcher, ActuatorLink, WriterLink};
use color_sorter::core_modules::color_classifier::ColorLabel;
use color_sorter::core_modules::frame_sampler::FrameSampler;
use color_sorter::error::ControllerError;
use color_sorter::pipeline::SortingPipeline;
use color_sorter::serial_link::{DEFAULT_WRITER_QUEUE, open_serial, spawn_writer};
use color_sorter::settings::{JsonSettingsStore, SettingsStore};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "color_sorter")]
#[command(about = "Sorts objects by color: samples a camera region, debounces the result and drives servos")]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Settings file holding the learned background color
    /// (default: <config dir>/color_sorter/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Serial device of the actuator board, overrides the config file
    #[arg(short, long)]
    serial: Option<PathBuf>,

    /// Serial baud rate, overrides the config file
    #[arg(long)]
    baud: Option<u32>,

    /// Directory of still frames (or a single image) to replay
    #[arg(short, long)]
    frames: Option<PathBuf>,

    /// Camera index or stream URL
    #[cfg(feature = "opencv")]
    #[arg(long)]
    camera: Option<String>,

    /// Playback rate for --frames
    #[arg(long)]
    fps: Option<f64>,

    /// Replay --frames forever
    #[arg(long)]
    loop_frames: bool,

    /// Run without a serial device; servo commands are only logged
    #[arg(long)]
    dry_run: bool,
}

/// How long shutdown waits for blocking work (a stalled serial write, a camera
/// read) before abandoning it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=color_sorter=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("color_sorter=info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let result = runtime.block_on(run(cli));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(cli: Cli) -> Result<()> {
    // --- 1. Configuration ---
    let mut config = match &cli.config {
        Some(path) => SorterConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => SorterConfig::default(),
    };
    if let Some(device) = &cli.serial {
        config.serial.device = Some(device.clone());
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    let sampler = FrameSampler::new(config.crop, config.roi, config.color_ranges.clone())
        .context("invalid sampling geometry")?;
    let mut source = open_source(&cli)?;

    // --- 2. Actuator link ---
    let events = event_bus();
    let device: Box<dyn ActuatorLink> = if cli.dry_run {
        info!("dry run, servo commands are only logged");
        Box::new(WriterLink::new(std::io::sink()))
    } else {
        let path = config
            .serial
            .device
            .clone()
            .context("no serial device configured, pass --serial or --dry-run")?;
        let port = open_serial(&path, config.serial.baud_rate)
            .with_context(|| format!("opening serial device {}", path.display()))?;
        // The board resets when the port opens.
        tokio::time::sleep(Duration::from_millis(config.serial.settle_ms)).await;
        Box::new(WriterLink::new(port))
    };
    let (link, writer) = spawn_writer(device, events.clone(), DEFAULT_WRITER_QUEUE);

    // --- 3. Pipeline and controller ---
    let store = match &cli.settings {
        Some(path) => JsonSettingsStore::new(path),
        None => JsonSettingsStore::default_location()?,
    };
    info!(path = %store.path().display(), "using settings file");
    let settings: Box<dyn SettingsStore> = Box::new(store);
    let pipeline = SortingPipeline::new(&config, ActuatorDispatcher::new(Box::new(link)), settings);
    let (handle, controller) = SorterController::spawn(pipeline, &config, events);
    let reporter = spawn_reporter(&handle);

    // --- 4. Sampling ---
    let sampling = {
        let handle = handle.clone();
        tokio::task::spawn_blocking(move || run_sampling(source.as_mut(), &sampler, &handle))
    };

    // --- 5. Control surface ---
    control_loop(&handle).await?;

    // --- 6. Shutdown ---
    handle.shutdown().await;
    controller.await.context("controller task failed")?;
    match tokio::time::timeout(SHUTDOWN_GRACE, sampling).await {
        Ok(joined) => {
            let stats = joined.context("sampling task failed")?;
            info!(?stats, "sampling summary");
        }
        Err(_) => warn!("frame source is stuck in a read, not waiting for it"),
    }
    match tokio::time::timeout(SHUTDOWN_GRACE, writer).await {
        Ok(joined) => joined.context("actuator writer failed")?,
        Err(_) => warn!("actuator writer is stuck on the device, not waiting for it"),
    }
    reporter.abort();
    info!("color sorter stopped");
    Ok(())
}

fn open_source(cli: &Cli) -> Result<Box<dyn FrameSource>> {
    #[cfg(feature = "opencv")]
    {
        if let Some(camera) = &cli.camera {
            let source = color_sorter::capture::camera::OpenCvSource::open(camera)?;
            return Ok(Box::new(source));
        }
    }

    let Some(frames) = &cli.frames else {
        bail!("no frame source, pass --frames <dir> (or --camera with the opencv feature)");
    };
    let mut source = ImageSequenceSource::open(frames)?.looping(cli.loop_frames);
    if let Some(fps) = cli.fps.filter(|fps| *fps > 0.0) {
        source = source.with_interval(Duration::from_secs_f64(1.0 / fps));
    }
    Ok(Box::new(source))
}

/// Prints every sorter event on its own line.
fn spawn_reporter(handle: &SorterHandle) -> tokio::task::JoinHandle<()> {
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{event}"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event reporter fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn control_loop(handle: &SorterHandle) -> Result<()> {
    println!("commands: start | stop | calibrate | finish | status | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        match line.trim() {
            "" => {}
            "start" => report(handle.start_triggering().await),
            "stop" => report(handle.stop_triggering().await),
            "calibrate" => report(handle.start_calibration().await),
            "finish" => report(handle.finish_calibration().await),
            "status" => match handle.status().await {
                Ok(status) => println!(
                    "mode={} last_triggered={} background={} calibration_samples={}",
                    status.mode,
                    label_or_dash(status.last_triggered),
                    label_or_dash(status.background),
                    status.calibration_samples
                ),
                Err(err) => println!("error: {err}"),
            },
            "quit" | "exit" => break,
            other => println!("unknown command: {other}"),
        }
        if handle.is_closed() {
            warn!("controller stopped, leaving control loop");
            break;
        }
    }
    Ok(())
}

fn report(result: Result<(), ControllerError>) {
    if let Err(err) = result {
        println!("error: {err}");
    }
}

fn label_or_dash(label: Option<ColorLabel>) -> &'static str {
    label.map(ColorLabel::name).unwrap_or("-")
}
