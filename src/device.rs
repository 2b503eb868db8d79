//! Inference device selection.
//!
//! The accelerator is probed at most once per process. The outcome is an
//! explicit [`DeviceConfig`] that is handed to the model loader and the
//! pipeline; nothing here touches process-wide state.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::Deserialize;
use wait_timeout::ChildExt;

const NVIDIA_DEVICE_NODE: &str = "/dev/nvidia0";
const NVIDIA_DRIVER_VERSION: &str = "/proc/driver/nvidia/version";
const JETSON_RELEASE: &str = "/etc/nv_tegra_release";
/// A wedged driver can leave `nvidia-smi` hanging; past this it counts as absent.
pub const NVIDIA_SMI_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InferenceDevice {
    Cpu,
    Gpu,
}

impl InferenceDevice {
    pub fn as_str(self) -> &'static str {
        match self {
            InferenceDevice::Cpu => "cpu",
            InferenceDevice::Gpu => "gpu",
        }
    }
}

impl fmt::Display for InferenceDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User preference from `--device`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Gpu,
}

impl std::str::FromStr for DevicePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "gpu" | "cuda" => Ok(DevicePreference::Gpu),
            other => Err(anyhow::anyhow!(
                "unknown device '{}' (expected auto, cpu or gpu)",
                other
            )),
        }
    }
}

/// Backend tuning flags applied when the GPU is selected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GpuTuning {
    /// Let the runtime benchmark kernels for the fixed input shape.
    pub benchmark_kernels: bool,
    /// Force deterministic kernels (slower).
    pub deterministic: bool,
}

impl GpuTuning {
    pub fn performance() -> Self {
        Self {
            benchmark_kernels: true,
            deterministic: false,
        }
    }

    /// Engine builder flags (`trtexec` spelling) for these settings.
    pub fn builder_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.benchmark_kernels {
            flags.push("--builderOptimizationLevel=5");
        }
        if self.deterministic {
            flags.push("--noTF32");
            flags.push("--avgTiming=16");
        }
        flags
    }
}

/// The selected device plus its tuning. Built once and passed down explicitly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub device: InferenceDevice,
    pub tuning: Option<GpuTuning>,
    pub accelerator_name: Option<String>,
}

impl DeviceConfig {
    pub fn cpu() -> Self {
        Self {
            device: InferenceDevice::Cpu,
            tuning: None,
            accelerator_name: None,
        }
    }

    pub fn gpu(accelerator_name: Option<String>) -> Self {
        Self {
            device: InferenceDevice::Gpu,
            tuning: Some(GpuTuning::performance()),
            accelerator_name,
        }
    }

    pub fn is_gpu(&self) -> bool {
        self.device == InferenceDevice::Gpu
    }
}

/// What the probe found on this host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcceleratorReport {
    pub available: bool,
    pub name: Option<String>,
    pub driver_version: Option<String>,
    pub jetson_release: Option<String>,
    pub nvidia_smi: bool,
}

pub trait AcceleratorProbe {
    fn probe(&self) -> AcceleratorReport;
}

/// Probes for an NVIDIA accelerator through the device node, the driver proc
/// file, the Jetson release file and `nvidia-smi`.
#[derive(Clone, Debug)]
pub struct SystemAcceleratorProbe {
    device_node: PathBuf,
    driver_version: PathBuf,
    jetson_release: PathBuf,
    nvidia_smi: String,
    smi_timeout: Duration,
}

impl Default for SystemAcceleratorProbe {
    fn default() -> Self {
        Self {
            device_node: PathBuf::from(NVIDIA_DEVICE_NODE),
            driver_version: PathBuf::from(NVIDIA_DRIVER_VERSION),
            jetson_release: PathBuf::from(JETSON_RELEASE),
            nvidia_smi: "nvidia-smi".to_string(),
            smi_timeout: NVIDIA_SMI_TIMEOUT,
        }
    }
}

impl SystemAcceleratorProbe {
    /// Probe rooted somewhere other than `/`, for tests.
    pub fn with_root(root: &Path, nvidia_smi: &str) -> Self {
        let rel = |p: &str| root.join(p.trim_start_matches('/'));
        Self {
            device_node: rel(NVIDIA_DEVICE_NODE),
            driver_version: rel(NVIDIA_DRIVER_VERSION),
            jetson_release: rel(JETSON_RELEASE),
            nvidia_smi: nvidia_smi.to_string(),
            smi_timeout: NVIDIA_SMI_TIMEOUT,
        }
    }

    pub fn with_smi_timeout(mut self, timeout: Duration) -> Self {
        self.smi_timeout = timeout;
        self
    }

    fn query_nvidia_smi(&self) -> Option<String> {
        let mut child = Command::new(&self.nvidia_smi)
            .arg("-L")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;

        let status = match child.wait_timeout(self.smi_timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                log::warn!(
                    "device: {} gave no answer within {:?}, treating it as absent",
                    self.nvidia_smi,
                    self.smi_timeout
                );
                kill_quietly(&mut child);
                return None;
            }
            Err(err) => {
                log::debug!("device: waiting for {} failed: {}", self.nvidia_smi, err);
                kill_quietly(&mut child);
                return None;
            }
        };
        if !status.success() {
            return None;
        }

        let mut listing = String::new();
        child.stdout.take()?.read_to_string(&mut listing).ok()?;
        let first = listing.lines().next()?.trim().to_string();
        Some(parse_gpu_name(&first).unwrap_or(first))
    }
}

impl AcceleratorProbe for SystemAcceleratorProbe {
    fn probe(&self) -> AcceleratorReport {
        let read = |path: &Path| {
            std::fs::read_to_string(path)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let driver_version = read(&self.driver_version);
        let jetson_release = read(&self.jetson_release);
        let smi_name = self.query_nvidia_smi();
        let nvidia_smi = smi_name.is_some();
        let available = nvidia_smi
            || jetson_release.is_some()
            || (self.device_node.exists() && driver_version.is_some());
        let name = smi_name.or_else(|| jetson_release.as_ref().map(|_| "NVIDIA Jetson".to_string()));

        AcceleratorReport {
            available,
            name,
            driver_version,
            jetson_release,
            nvidia_smi,
        }
    }
}

fn kill_quietly(child: &mut std::process::Child) {
    if let Err(err) = child.kill() {
        log::debug!("device: kill of probe process failed: {}", err);
    }
    // Reap the killed process.
    let _ = child.wait();
}

/// `GPU 0: NVIDIA GeForce RTX 3060 (UUID: GPU-...)` -> `NVIDIA GeForce RTX 3060`.
fn parse_gpu_name(line: &str) -> Option<String> {
    let (_, rest) = line.split_once(": ")?;
    let name = rest.split(" (UUID").next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Device selection state: `Unprobed` until the first `select`, then fixed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Unprobed,
    Selected(DeviceConfig),
}

pub struct DeviceSelector<P: AcceleratorProbe> {
    preference: DevicePreference,
    probe: P,
    state: DeviceState,
    report: Option<AcceleratorReport>,
}

impl<P: AcceleratorProbe> DeviceSelector<P> {
    pub fn new(preference: DevicePreference, probe: P) -> Self {
        Self {
            preference,
            probe,
            state: DeviceState::Unprobed,
            report: None,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Probe report, if the probe ran.
    pub fn report(&self) -> Option<&AcceleratorReport> {
        self.report.as_ref()
    }

    /// Select the device. The probe runs on the first call only.
    pub fn select(&mut self) -> DeviceConfig {
        if let DeviceState::Selected(config) = &self.state {
            return config.clone();
        }

        let config = match self.preference {
            DevicePreference::Cpu => {
                log::info!("device: cpu (requested)");
                DeviceConfig::cpu()
            }
            DevicePreference::Auto | DevicePreference::Gpu => {
                let report = self.probe.probe();
                let config = if report.available {
                    let config = DeviceConfig::gpu(report.name.clone());
                    log::info!(
                        "device: gpu ({})",
                        config.accelerator_name.as_deref().unwrap_or("unknown accelerator")
                    );
                    config
                } else {
                    if self.preference == DevicePreference::Gpu {
                        log::warn!("device: gpu requested but no accelerator found, using cpu");
                    } else {
                        log::info!("device: no accelerator found, using cpu");
                    }
                    DeviceConfig::cpu()
                };
                self.report = Some(report);
                config
            }
        };

        self.state = DeviceState::Selected(config.clone());
        config
    }
}
