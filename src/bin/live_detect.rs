//! live_detect - real-time object detection on a local camera
//!
//! 1. Resolves the camera for this host (or `--source`)
//! 2. Selects the inference device and prepares the model (one-shot export)
//! 3. Opens the camera once and runs the detect/filter/output loop
//! 4. Stops on `q`, Ctrl-C, end of stream or a failed read
//!
//! Exit codes: 0 clean stop, 1 bad configuration or model load failure,
//! 2 missing model, 3 camera unavailable, 4 failure inside the loop.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use live_detect::config::{ConfigOverrides, LiveDetectConfig, RunMode};
use live_detect::detect::DetectionFilterPipeline;
use live_detect::device::{DevicePreference, DeviceSelector, SystemAcceleratorProbe};
use live_detect::error::StartupError;
use live_detect::ingest::{CameraSource, FrameSource};
use live_detect::model::{CommandExporter, DefaultLoader, ModelArtifacts, ModelPreparer};
use live_detect::platform;
use live_detect::runner::{RunSummary, Runner, StopFlag};
use live_detect::sink::{ConsoleSink, DetectionSink, JpegDirectoryViewer, OverlaySink};
use live_detect::ui::{Ui, UiMode};

const RUNTIME_FAILURE_EXIT: u8 = 4;

#[derive(Parser, Debug)]
#[command(
    name = "live_detect",
    version,
    about = "Real-time object detection on a local camera"
)]
struct Args {
    /// Output mode [default: overlay]
    #[arg(long, value_enum)]
    mode: Option<RunMode>,

    /// Minimum confidence to report, in [0, 1] [default: 0.6]
    #[arg(long)]
    threshold: Option<f32>,

    /// Inference device [default: auto]
    #[arg(long, value_enum)]
    device: Option<DevicePreference>,

    /// Model artifact (.onnx, or a .json detection script) [default: weights/merged/best.onnx]
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Camera index, device path, video file or stub:// source
    #[arg(long, value_name = "SOURCE")]
    source: Option<String>,

    /// Write annotated frames as JPEG files instead of opening a window
    #[arg(long, value_name = "DIR")]
    save_dir: Option<PathBuf>,

    /// Never export an accelerated model artifact
    #[arg(long)]
    no_export: bool,

    /// Stop after this many frames
    #[arg(long, value_name = "N")]
    max_frames: Option<u64>,

    /// JSON or TOML config file (also LIVE_DETECT_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// UI mode for stderr progress [default: auto]
    #[arg(long, value_enum)]
    ui: Option<UiMode>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            mode: self.mode,
            threshold: self.threshold,
            device: self.device,
            model_path: self.model.clone(),
            source: self.source.clone(),
            save_dir: self.save_dir.clone(),
            no_export: self.no_export,
            max_frames: self.max_frames,
            ui: self.ui,
        }
    }
}

enum Failure {
    Startup(StartupError),
    Runtime(anyhow::Error),
}

impl From<StartupError> for Failure {
    fn from(err: StartupError) -> Self {
        Failure::Startup(err)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(summary) => {
            if let Some(fps) = summary.average_fps() {
                log::info!("average fps: {:.1}", fps);
            }
            ExitCode::SUCCESS
        }
        Err(Failure::Startup(err)) => {
            eprintln!("error: {}", err);
            let mut cause = std::error::Error::source(&err);
            while let Some(inner) = cause {
                eprintln!("  caused by: {}", inner);
                cause = inner.source();
            }
            eprintln!("hint: {}", err.hint());
            ExitCode::from(err.exit_code())
        }
        Err(Failure::Runtime(err)) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(RUNTIME_FAILURE_EXIT)
        }
    }
}

fn run(args: &Args) -> Result<RunSummary, Failure> {
    let cfg = LiveDetectConfig::load(args.config.as_deref(), &args.overrides())
        .map_err(StartupError::Config)?;
    let ui = Ui::detect(cfg.ui);

    let descriptor = {
        let _stage = ui.stage("Resolve camera");
        let resolved = platform::resolve_host();
        match &cfg.source {
            Some(source) => resolved.with_source(source.clone()),
            None => resolved,
        }
    };
    log::info!(
        "host: {}, camera: {}",
        descriptor.os_class(),
        descriptor.source()
    );

    let device = {
        let _stage = ui.stage("Select inference device");
        let mut selector = DeviceSelector::new(cfg.device, SystemAcceleratorProbe::default());
        selector.select()
    };

    let prepared = {
        let mut stage = ui.stage("Load model");
        let mut preparer = ModelPreparer::new(
            ModelArtifacts::for_model(cfg.model.path.clone()),
            CommandExporter::new(cfg.export.command.clone()),
            DefaultLoader::new(cfg.model.input_size),
        )
        .with_export(cfg.export.enabled);
        preparer.prepare(&device).map_err(|err| {
            stage.fail(err.to_string());
            err
        })?
    };
    let mut pipeline =
        DetectionFilterPipeline::new(prepared.backend, cfg.threshold, cfg.mode.detail())
            .map_err(StartupError::Config)?
            .on_device(device.clone());

    let mut camera = {
        let mut stage = ui.stage("Open camera");
        CameraSource::open(&descriptor).map_err(|cause| {
            stage.fail(cause.to_string());
            StartupError::CameraUnavailable {
                camera: descriptor.source().to_string(),
                cause,
            }
        })?
    };
    log::info!("camera configured: {}", camera.effective());

    let mut sink = build_sink(&cfg).map_err(StartupError::Config)?;

    let stop = StopFlag::new();
    stop.install_ctrlc().map_err(StartupError::Config)?;

    log::info!(
        "running: mode={:?} threshold={:.2} device={} backend={}",
        cfg.mode,
        pipeline.threshold(),
        device.device,
        pipeline.backend_name()
    );
    Runner::new(stop)
        .with_fps_log_interval(cfg.fps_log_interval)
        .with_max_frames(cfg.max_frames)
        .run(&mut camera, &mut pipeline, &mut sink)
        .map_err(Failure::Runtime)
}

fn build_sink(cfg: &LiveDetectConfig) -> anyhow::Result<Box<dyn DetectionSink>> {
    match cfg.mode {
        RunMode::Console | RunMode::Minimal => Ok(Box::new(
            ConsoleSink::new(std::io::stdout(), cfg.mode.detail())
                .with_status_interval(cfg.status_interval),
        )),
        RunMode::Overlay => {
            if let Some(dir) = &cfg.save_dir {
                return Ok(Box::new(OverlaySink::new(JpegDirectoryViewer::create(dir)?)));
            }
            open_window()
        }
    }
}

#[cfg(feature = "opencv")]
fn open_window() -> anyhow::Result<Box<dyn DetectionSink>> {
    let viewer = live_detect::sink::WindowViewer::open("live-detect")?;
    Ok(Box::new(OverlaySink::new(viewer)))
}

#[cfg(not(feature = "opencv"))]
fn open_window() -> anyhow::Result<Box<dyn DetectionSink>> {
    Err(anyhow::anyhow!(
        "overlay mode needs a display window (build with the `opencv` feature) or --save-dir <dir>"
    ))
}
