//! device_report - show what live_detect would pick on this host
//!
//! Prints the OS class, the resolved camera and its capture hints, the
//! accelerator probe results, the selected inference device and the state
//! of the model artifacts. Nothing is opened or exported.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use live_detect::device::{DevicePreference, DeviceSelector, SystemAcceleratorProbe};
use live_detect::model::{ModelArtifacts, DEFAULT_MODEL_PATH};
use live_detect::platform;

#[derive(Parser, Debug)]
#[command(
    name = "device_report",
    version,
    about = "Report camera, accelerator and model selection for this host"
)]
struct Args {
    /// Model artifact to inspect
    #[arg(long, default_value = DEFAULT_MODEL_PATH)]
    model: PathBuf,

    /// Device preference to resolve
    #[arg(long, value_enum, default_value = "auto")]
    device: DevicePreference,

    /// Camera source to report instead of the platform default
    #[arg(long)]
    source: Option<String>,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    os_class: String,
    camera: CameraReport,
    accelerator: AcceleratorSection,
    selected_device: String,
    model: ModelReport,
}

#[derive(Debug, Serialize)]
struct CameraReport {
    source: String,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    codec: Option<String>,
}

#[derive(Debug, Serialize)]
struct AcceleratorSection {
    probed: bool,
    available: bool,
    name: Option<String>,
    driver_version: Option<String>,
    jetson_release: Option<String>,
    nvidia_smi: bool,
}

#[derive(Debug, Serialize)]
struct ModelReport {
    original: String,
    original_exists: bool,
    accelerated: String,
    accelerated_exists: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let resolved = platform::resolve_host();
    let descriptor = match &args.source {
        Some(raw) => resolved.with_source(platform::SourceId::parse(raw)),
        None => resolved,
    };
    let request = descriptor.request();

    let mut selector = DeviceSelector::new(args.device, SystemAcceleratorProbe::default());
    let selected = selector.select();
    let accelerator = match selector.report() {
        Some(report) => AcceleratorSection {
            probed: true,
            available: report.available,
            name: report.name.clone(),
            driver_version: report.driver_version.clone(),
            jetson_release: report.jetson_release.clone(),
            nvidia_smi: report.nvidia_smi,
        },
        None => AcceleratorSection {
            probed: false,
            available: false,
            name: None,
            driver_version: None,
            jetson_release: None,
            nvidia_smi: false,
        },
    };

    let artifacts = ModelArtifacts::for_model(args.model.clone());
    let report = Report {
        os_class: descriptor.os_class().to_string(),
        camera: CameraReport {
            source: descriptor.source().to_string(),
            width: request.width,
            height: request.height,
            fps: request.fps,
            codec: request.codec.map(|codec| codec.to_string()),
        },
        accelerator,
        selected_device: selected.device.to_string(),
        model: ModelReport {
            original: artifacts.original().display().to_string(),
            original_exists: artifacts.original().is_file(),
            accelerated: artifacts.accelerated().display().to_string(),
            accelerated_exists: artifacts.accelerated_exists(),
        },
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(())
}

fn print_text(report: &Report) {
    println!("os class:        {}", report.os_class);
    println!("camera source:   {}", report.camera.source);
    match (report.camera.width, report.camera.height) {
        (Some(w), Some(h)) => println!("capture request: {}x{}", w, h),
        _ => println!("capture request: backend defaults"),
    }
    if let Some(fps) = report.camera.fps {
        println!("  fps:           {}", fps);
    }
    if let Some(codec) = &report.camera.codec {
        println!("  codec:         {}", codec);
    }

    let acc = &report.accelerator;
    if !acc.probed {
        println!("accelerator:     not probed (cpu requested)");
    } else if acc.available {
        println!(
            "accelerator:     {}",
            acc.name.as_deref().unwrap_or("present (name unknown)")
        );
    } else {
        println!("accelerator:     none found");
    }
    if let Some(driver) = &acc.driver_version {
        println!("  driver:        {}", driver);
    }
    if let Some(release) = &acc.jetson_release {
        println!("  jetson:        {}", release);
    }
    if acc.probed {
        println!("  nvidia-smi:    {}", if acc.nvidia_smi { "yes" } else { "no" });
    }
    println!("selected device: {}", report.selected_device);

    let mark = |exists: bool| if exists { "present" } else { "missing" };
    println!(
        "model:           {} ({})",
        report.model.original,
        mark(report.model.original_exists)
    );
    println!(
        "accelerated:     {} ({})",
        report.model.accelerated,
        mark(report.model.accelerated_exists)
    );
}
