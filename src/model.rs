//! Model artifacts and accelerated-artifact preparation.
//!
//! On a GPU host the original model is exported once to a device-optimized
//! artifact next to it (same stem, `.engine` extension) and that artifact is
//! preferred on later runs. Export and accelerated-load failures are never
//! fatal: they leave one degraded-mode notice and the original artifact is used.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};

use crate::detect::{DetectorBackend, StubBackend};
use crate::device::{DeviceConfig, GpuTuning};
use crate::error::StartupError;

pub const DEFAULT_MODEL_PATH: &str = "weights/merged/best.onnx";
pub const ACCELERATED_EXTENSION: &str = "engine";
pub const DEFAULT_EXPORT_COMMAND: &str = "trtexec --onnx={input} --saveEngine={output} {tuning}";
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// The original model and its accelerated sibling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelArtifacts {
    original: PathBuf,
    accelerated: PathBuf,
}

impl ModelArtifacts {
    pub fn for_model(path: impl Into<PathBuf>) -> Self {
        let original = path.into();
        let accelerated = original.with_extension(ACCELERATED_EXTENSION);
        Self {
            original,
            accelerated,
        }
    }

    pub fn original(&self) -> &Path {
        &self.original
    }

    pub fn accelerated(&self) -> &Path {
        &self.accelerated
    }

    pub fn accelerated_exists(&self) -> bool {
        self.accelerated != self.original && self.accelerated.is_file()
    }

    /// Fail fast when the original artifact is absent.
    pub fn ensure_original(&self) -> Result<(), StartupError> {
        if self.original.is_file() {
            Ok(())
        } else {
            Err(StartupError::ModelMissing {
                path: self.original.clone(),
            })
        }
    }
}

/// Produces the accelerated artifact from the original one.
pub trait Exporter {
    fn export(&self, input: &Path, output: &Path, tuning: Option<&GpuTuning>) -> Result<()>;
}

/// Runs an external command. `{input}` and `{output}` in the template are
/// replaced with the artifact paths; a `{tuning}` word expands to the GPU
/// tuning's builder flags, or to nothing.
#[derive(Clone, Debug)]
pub struct CommandExporter {
    template: String,
}

impl Default for CommandExporter {
    fn default() -> Self {
        Self::new(DEFAULT_EXPORT_COMMAND)
    }
}

impl CommandExporter {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn argv(&self, input: &Path, output: &Path, tuning: Option<&GpuTuning>) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        let mut argv = Vec::new();
        for part in self.template.split_whitespace() {
            if part == "{tuning}" {
                let flags = tuning.map(GpuTuning::builder_flags).unwrap_or_default();
                argv.extend(flags.into_iter().map(str::to_string));
            } else {
                argv.push(part.replace("{input}", &input).replace("{output}", &output));
            }
        }
        argv
    }
}

impl Exporter for CommandExporter {
    fn export(&self, input: &Path, output: &Path, tuning: Option<&GpuTuning>) -> Result<()> {
        let argv = self.argv(input, output, tuning);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("export command template is empty"))?;
        log::info!("export: {}", argv.join(" "));
        let status = Command::new(program)
            .args(args)
            .status()
            .with_context(|| format!("failed to launch exporter '{}'", program))?;
        if !status.success() {
            return Err(anyhow!("exporter '{}' exited with {}", program, status));
        }
        if !output.is_file() {
            return Err(anyhow!(
                "exporter '{}' finished but {} was not written",
                program,
                output.display()
            ));
        }
        Ok(())
    }
}

/// Turns an artifact on disk into a detector backend.
pub trait ModelLoader {
    fn load(&self, artifact: &Path, device: &DeviceConfig) -> Result<Box<dyn DetectorBackend>>;
}

/// Dispatches on the artifact extension:
/// - `.json`: detection script replayed by the stub backend
/// - `.onnx`: tract (feature `backend-tract`)
/// - `.engine`: no in-process runtime; always fails so the caller falls back
#[derive(Clone, Debug)]
pub struct DefaultLoader {
    input_size: u32,
}

impl Default for DefaultLoader {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

impl DefaultLoader {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }
}

impl ModelLoader for DefaultLoader {
    fn load(&self, artifact: &Path, device: &DeviceConfig) -> Result<Box<dyn DetectorBackend>> {
        let extension = artifact
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "json" => Ok(Box::new(StubBackend::from_script_file(artifact)?)),
            "onnx" => load_onnx(artifact, self.input_size, device),
            ACCELERATED_EXTENSION => Err(anyhow!(
                "no runtime for accelerated engines is linked into this build"
            )),
            other => Err(anyhow!(
                "unsupported model format '{}' for {}",
                other,
                artifact.display()
            )),
        }
    }
}

#[cfg(feature = "backend-tract")]
fn load_onnx(
    artifact: &Path,
    input_size: u32,
    device: &DeviceConfig,
) -> Result<Box<dyn DetectorBackend>> {
    if device.is_gpu() {
        log::info!("tract executes on the cpu; gpu tuning does not apply to this backend");
    }
    Ok(Box::new(crate::detect::TractBackend::new(artifact, input_size)?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_onnx(
    artifact: &Path,
    _input_size: u32,
    _device: &DeviceConfig,
) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "{} is an ONNX model but the `backend-tract` feature is disabled",
        artifact.display()
    ))
}

/// Accelerated-artifact lifecycle for this process. Export is attempted at
/// most once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccelerationState {
    NotAttempted,
    Ready(PathBuf),
    Failed,
}

/// A recoverable problem that left the process on the original artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Degradation {
    ExportFailed { reason: String },
    AcceleratedLoadFailed { path: PathBuf, reason: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::ExportFailed { reason } => write!(
                f,
                "accelerated export failed ({reason}); continuing with the original model"
            ),
            Degradation::AcceleratedLoadFailed { path, reason } => write!(
                f,
                "could not load accelerated model {} ({reason}); continuing with the original model",
                path.display()
            ),
        }
    }
}

pub struct PreparedModel {
    pub backend: Box<dyn DetectorBackend>,
    pub artifact: PathBuf,
    pub accelerated: bool,
    pub degraded: Vec<Degradation>,
}

impl fmt::Debug for PreparedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedModel")
            .field("backend", &self.backend.name())
            .field("artifact", &self.artifact)
            .field("accelerated", &self.accelerated)
            .field("degraded", &self.degraded)
            .finish()
    }
}

pub struct ModelPreparer<E: Exporter, L: ModelLoader> {
    artifacts: ModelArtifacts,
    exporter: E,
    loader: L,
    export_enabled: bool,
    state: AccelerationState,
}

impl<E: Exporter, L: ModelLoader> ModelPreparer<E, L> {
    pub fn new(artifacts: ModelArtifacts, exporter: E, loader: L) -> Self {
        Self {
            artifacts,
            exporter,
            loader,
            export_enabled: true,
            state: AccelerationState::NotAttempted,
        }
    }

    pub fn with_export(mut self, enabled: bool) -> Self {
        self.export_enabled = enabled;
        self
    }

    pub fn artifacts(&self) -> &ModelArtifacts {
        &self.artifacts
    }

    pub fn state(&self) -> &AccelerationState {
        &self.state
    }

    /// Load the best available artifact for `device`.
    pub fn prepare(&mut self, device: &DeviceConfig) -> Result<PreparedModel, StartupError> {
        self.artifacts.ensure_original()?;
        let mut degraded = Vec::new();

        if device.is_gpu() {
            if let Some(accelerated) = self.accelerated_artifact(device, &mut degraded) {
                match self.load_warm(&accelerated, device) {
                    Ok(backend) => {
                        log::info!("model: using accelerated artifact {}", accelerated.display());
                        return Ok(PreparedModel {
                            backend,
                            artifact: accelerated,
                            accelerated: true,
                            degraded,
                        });
                    }
                    Err(err) => {
                        let notice = Degradation::AcceleratedLoadFailed {
                            path: accelerated,
                            reason: format!("{err:#}"),
                        };
                        log::warn!("degraded mode: {}", notice);
                        degraded.push(notice);
                    }
                }
            }
        }

        let original = self.artifacts.original.clone();
        let backend = self
            .load_warm(&original, device)
            .map_err(|cause| StartupError::ModelLoad {
                path: original.clone(),
                cause,
            })?;
        log::info!("model: using {}", original.display());
        Ok(PreparedModel {
            backend,
            artifact: original,
            accelerated: false,
            degraded,
        })
    }

    /// Existing accelerated artifact, or the result of a one-shot export.
    fn accelerated_artifact(
        &mut self,
        device: &DeviceConfig,
        degraded: &mut Vec<Degradation>,
    ) -> Option<PathBuf> {
        if let AccelerationState::Ready(path) = &self.state {
            return Some(path.clone());
        }
        if self.artifacts.accelerated_exists() {
            let path = self.artifacts.accelerated.clone();
            self.state = AccelerationState::Ready(path.clone());
            return Some(path);
        }
        if !self.export_enabled || self.state != AccelerationState::NotAttempted {
            return None;
        }

        log::info!(
            "model: exporting {} -> {}",
            self.artifacts.original.display(),
            self.artifacts.accelerated.display()
        );
        match self.exporter.export(
            &self.artifacts.original,
            &self.artifacts.accelerated,
            device.tuning.as_ref(),
        ) {
            Ok(()) => {
                let path = self.artifacts.accelerated.clone();
                self.state = AccelerationState::Ready(path.clone());
                Some(path)
            }
            Err(err) => {
                self.state = AccelerationState::Failed;
                let notice = Degradation::ExportFailed {
                    reason: format!("{err:#}"),
                };
                log::warn!("degraded mode: {}", notice);
                degraded.push(notice);
                None
            }
        }
    }

    fn load_warm(&self, artifact: &Path, device: &DeviceConfig) -> Result<Box<dyn DetectorBackend>> {
        let mut backend = self.loader.load(artifact, device)?;
        backend
            .warm_up()
            .with_context(|| format!("warm-up failed for {}", artifact.display()))?;
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FailingExporter {
        calls: Cell<u32>,
    }

    impl Exporter for FailingExporter {
        fn export(&self, _: &Path, _: &Path, _: Option<&GpuTuning>) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            Err(anyhow!("no exporter on this host"))
        }
    }

    const SCRIPT: &str = r#"{"frames": [[]]}"#;

    fn model_dir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("best.json");
        std::fs::write(&model, SCRIPT).unwrap();
        (dir, model)
    }

    #[test]
    fn accelerated_path_replaces_extension() {
        let artifacts = ModelArtifacts::for_model("weights/merged/best.onnx");
        assert_eq!(artifacts.accelerated(), Path::new("weights/merged/best.engine"));
        assert!(matches!(
            artifacts.ensure_original(),
            Err(StartupError::ModelMissing { .. })
        ));
    }

    #[test]
    fn export_failure_keeps_original_with_one_notice() {
        let (_dir, model) = model_dir();
        let exporter = FailingExporter {
            calls: Cell::new(0),
        };
        let mut preparer =
            ModelPreparer::new(ModelArtifacts::for_model(&model), exporter, DefaultLoader::default());

        let gpu = DeviceConfig::gpu(None);
        let prepared = preparer.prepare(&gpu).unwrap();
        assert_eq!(prepared.artifact, model);
        assert!(!prepared.accelerated);
        assert_eq!(prepared.degraded.len(), 1);
        assert!(matches!(prepared.degraded[0], Degradation::ExportFailed { .. }));
        assert_eq!(preparer.state(), &AccelerationState::Failed);

        // The latch holds: no second attempt, no second notice.
        let again = preparer.prepare(&gpu).unwrap();
        assert!(again.degraded.is_empty());
        assert_eq!(preparer.exporter.calls.get(), 1);
    }

    #[test]
    fn cpu_never_exports() {
        let (_dir, model) = model_dir();
        let exporter = FailingExporter {
            calls: Cell::new(0),
        };
        let mut preparer =
            ModelPreparer::new(ModelArtifacts::for_model(&model), exporter, DefaultLoader::default());
        let prepared = preparer.prepare(&DeviceConfig::cpu()).unwrap();
        assert!(prepared.degraded.is_empty());
        assert_eq!(preparer.exporter.calls.get(), 0);
        assert_eq!(preparer.state(), &AccelerationState::NotAttempted);
    }

    #[test]
    fn unloadable_accelerated_artifact_falls_back() {
        let (_dir, model) = model_dir();
        std::fs::write(model.with_extension("engine"), b"serialized engine").unwrap();
        let exporter = FailingExporter {
            calls: Cell::new(0),
        };
        let mut preparer =
            ModelPreparer::new(ModelArtifacts::for_model(&model), exporter, DefaultLoader::default());

        let prepared = preparer.prepare(&DeviceConfig::gpu(None)).unwrap();
        assert_eq!(prepared.artifact, model);
        assert_eq!(prepared.degraded.len(), 1);
        assert!(matches!(
            prepared.degraded[0],
            Degradation::AcceleratedLoadFailed { .. }
        ));
        assert_eq!(preparer.exporter.calls.get(), 0);
    }

    #[test]
    fn disabled_export_is_silent() {
        let (_dir, model) = model_dir();
        let exporter = FailingExporter {
            calls: Cell::new(0),
        };
        let mut preparer =
            ModelPreparer::new(ModelArtifacts::for_model(&model), exporter, DefaultLoader::default())
                .with_export(false);
        let prepared = preparer.prepare(&DeviceConfig::gpu(None)).unwrap();
        assert!(prepared.degraded.is_empty());
        assert_eq!(preparer.exporter.calls.get(), 0);
    }

    #[test]
    fn command_exporter_substitutes_paths() -> Result<()> {
        let (dir, model) = model_dir();
        let output = dir.path().join("best.engine");
        CommandExporter::new("cp {input} {output}").export(&model, &output, None)?;
        assert_eq!(std::fs::read_to_string(&output)?, SCRIPT);

        let err = CommandExporter::new("false").export(&model, &output, None);
        assert!(err.is_err());
        Ok(())
    }

    #[test]
    fn tuning_placeholder_expands_to_builder_flags() {
        let exporter = CommandExporter::default();
        let (input, output) = (Path::new("m.onnx"), Path::new("m.engine"));

        let tuned = exporter.argv(input, output, Some(&GpuTuning::performance()));
        assert_eq!(
            tuned,
            vec![
                "trtexec",
                "--onnx=m.onnx",
                "--saveEngine=m.engine",
                "--builderOptimizationLevel=5"
            ]
        );

        let strict = GpuTuning {
            benchmark_kernels: false,
            deterministic: true,
        };
        let argv = exporter.argv(input, output, Some(&strict));
        assert!(argv.contains(&"--noTF32".to_string()));
        assert!(!argv.contains(&"--builderOptimizationLevel=5".to_string()));

        assert_eq!(exporter.argv(input, output, None).len(), 3);
    }

    struct TuningRecorder(Cell<Option<GpuTuning>>);

    impl Exporter for TuningRecorder {
        fn export(&self, _: &Path, _: &Path, tuning: Option<&GpuTuning>) -> Result<()> {
            self.0.set(tuning.copied());
            Err(anyhow!("recorded"))
        }
    }

    #[test]
    fn gpu_tuning_reaches_the_exporter() {
        let (_dir, model) = model_dir();
        let mut preparer = ModelPreparer::new(
            ModelArtifacts::for_model(&model),
            TuningRecorder(Cell::new(None)),
            DefaultLoader::default(),
        );
        preparer.prepare(&DeviceConfig::gpu(None)).unwrap();
        assert_eq!(preparer.exporter.0.get(), Some(GpuTuning::performance()));
    }

    #[test]
    fn unknown_extension_fails_to_load() {
        let loader = DefaultLoader::default();
        assert!(loader
            .load(Path::new("model.bin"), &DeviceConfig::cpu())
            .is_err());
    }
}
