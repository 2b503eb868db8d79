use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{validate_threshold, OutputDetail, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::device::DevicePreference;
use crate::model::{DEFAULT_EXPORT_COMMAND, DEFAULT_INPUT_SIZE, DEFAULT_MODEL_PATH};
use crate::platform::SourceId;
use crate::runner::DEFAULT_FPS_LOG_INTERVAL;
use crate::sink::DEFAULT_STATUS_INTERVAL;
use crate::ui::UiMode;

pub const CONFIG_ENV: &str = "LIVE_DETECT_CONFIG";
pub const MODEL_ENV: &str = "LIVE_DETECT_MODEL";
pub const THRESHOLD_ENV: &str = "LIVE_DETECT_THRESHOLD";
pub const SOURCE_ENV: &str = "LIVE_DETECT_SOURCE";
pub const DEVICE_ENV: &str = "LIVE_DETECT_DEVICE";

/// What the loop does with each frame's detections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Draw boxes and labels on the video feed.
    #[default]
    Overlay,
    /// Print a detailed block per detection.
    Console,
    /// Print one line per detection, no derived metrics.
    Minimal,
}

impl RunMode {
    pub fn detail(self) -> OutputDetail {
        match self {
            RunMode::Overlay | RunMode::Console => OutputDetail::Full,
            RunMode::Minimal => OutputDetail::Minimal,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LiveDetectConfigFile {
    mode: Option<RunMode>,
    threshold: Option<f32>,
    device: Option<DevicePreference>,
    source: Option<String>,
    save_dir: Option<PathBuf>,
    max_frames: Option<u64>,
    ui: Option<UiMode>,
    model: Option<ModelConfigFile>,
    export: Option<ExportConfigFile>,
    console: Option<ConsoleConfigFile>,
    fps_log_interval: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ExportConfigFile {
    enabled: Option<bool>,
    command: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConsoleConfigFile {
    status_interval: Option<u64>,
}

/// Command-line values that win over the file and the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mode: Option<RunMode>,
    pub threshold: Option<f32>,
    pub device: Option<DevicePreference>,
    pub model_path: Option<PathBuf>,
    pub source: Option<String>,
    pub save_dir: Option<PathBuf>,
    pub no_export: bool,
    pub max_frames: Option<u64>,
    pub ui: Option<UiMode>,
}

#[derive(Debug, Clone)]
pub struct LiveDetectConfig {
    pub mode: RunMode,
    pub threshold: f32,
    pub device: DevicePreference,
    pub model: ModelSettings,
    pub export: ExportSettings,
    pub source: Option<SourceId>,
    pub save_dir: Option<PathBuf>,
    pub max_frames: Option<u64>,
    pub status_interval: u64,
    pub fps_log_interval: u64,
    pub ui: UiMode,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub enabled: bool,
    pub command: String,
}

impl Default for LiveDetectConfig {
    fn default() -> Self {
        Self::from_file(LiveDetectConfigFile::default())
    }
}

impl LiveDetectConfig {
    /// File (explicit path, else `LIVE_DETECT_CONFIG`), then environment, then
    /// `overrides`, then validation.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => LiveDetectConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LiveDetectConfigFile) -> Self {
        let model = ModelSettings {
            path: file
                .model
                .as_ref()
                .and_then(|model| model.path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            input_size: file
                .model
                .as_ref()
                .and_then(|model| model.input_size)
                .unwrap_or(DEFAULT_INPUT_SIZE),
        };
        let export = ExportSettings {
            enabled: file
                .export
                .as_ref()
                .and_then(|export| export.enabled)
                .unwrap_or(true),
            command: file
                .export
                .and_then(|export| export.command)
                .unwrap_or_else(|| DEFAULT_EXPORT_COMMAND.to_string()),
        };
        Self {
            mode: file.mode.unwrap_or_default(),
            threshold: file.threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            device: file.device.unwrap_or_default(),
            model,
            export,
            source: file.source.as_deref().map(SourceId::parse),
            save_dir: file.save_dir,
            max_frames: file.max_frames,
            status_interval: file
                .console
                .and_then(|console| console.status_interval)
                .unwrap_or(DEFAULT_STATUS_INTERVAL),
            fps_log_interval: file.fps_log_interval.unwrap_or(DEFAULT_FPS_LOG_INTERVAL),
            ui: file.ui.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var(MODEL_ENV) {
            if !path.trim().is_empty() {
                self.model.path = PathBuf::from(path);
            }
        }
        if let Ok(threshold) = std::env::var(THRESHOLD_ENV) {
            self.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be a number in [0, 1]", THRESHOLD_ENV))?;
        }
        if let Ok(source) = std::env::var(SOURCE_ENV) {
            if !source.trim().is_empty() {
                self.source = Some(SourceId::parse(&source));
            }
        }
        if let Ok(device) = std::env::var(DEVICE_ENV) {
            if !device.trim().is_empty() {
                self.device = device.parse()?;
            }
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        if let Some(threshold) = overrides.threshold {
            self.threshold = threshold;
        }
        if let Some(device) = overrides.device {
            self.device = device;
        }
        if let Some(path) = &overrides.model_path {
            self.model.path = path.clone();
        }
        if let Some(source) = &overrides.source {
            self.source = Some(SourceId::parse(source));
        }
        if let Some(dir) = &overrides.save_dir {
            self.save_dir = Some(dir.clone());
        }
        if overrides.no_export {
            self.export.enabled = false;
        }
        if let Some(max_frames) = overrides.max_frames {
            self.max_frames = Some(max_frames);
        }
        if let Some(ui) = overrides.ui {
            self.ui = ui;
        }
    }

    fn validate(&mut self) -> Result<()> {
        self.threshold = validate_threshold(self.threshold)?;

        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(anyhow!(
                "model input size must be a positive multiple of 32, got {}",
                self.model.input_size
            ));
        }
        if self.export.enabled && self.export.command.trim().is_empty() {
            return Err(anyhow!("export command must not be empty"));
        }
        if let Some(SourceId::Path(path)) = &self.source {
            if path.is_empty() {
                return Err(anyhow!("source must not be empty"));
            }
        }
        if self.mode == RunMode::Overlay && self.save_dir.is_none() && !cfg!(feature = "opencv") {
            return Err(anyhow!(
                "overlay mode needs a display window (build with the `opencv` feature) or --save-dir <dir>"
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<LiveDetectConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_documented_values() {
        let cfg = LiveDetectConfig::default();
        assert_eq!(cfg.mode, RunMode::Overlay);
        assert_eq!(cfg.threshold, 0.6);
        assert_eq!(cfg.device, DevicePreference::Auto);
        assert_eq!(cfg.model.path, PathBuf::from("weights/merged/best.onnx"));
        assert!(cfg.export.enabled);
        assert_eq!(cfg.status_interval, 30);
        assert!(cfg.source.is_none());
    }

    #[test]
    fn overrides_win_and_are_validated() {
        let mut cfg = LiveDetectConfig::default();
        cfg.apply_overrides(&ConfigOverrides {
            mode: Some(RunMode::Minimal),
            threshold: Some(1.5),
            source: Some("2".to_string()),
            no_export: true,
            ..ConfigOverrides::default()
        });
        assert_eq!(cfg.source, Some(SourceId::Index(2)));
        assert!(!cfg.export.enabled);
        assert!(cfg.validate().is_err());

        cfg.threshold = 0.25;
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.mode.detail(), OutputDetail::Minimal);
    }

    #[test]
    fn rejects_bad_input_size() {
        let mut cfg = LiveDetectConfig::default();
        cfg.mode = RunMode::Console;
        cfg.model.input_size = 100;
        assert!(cfg.validate().is_err());
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn overlay_without_window_needs_save_dir() {
        let mut cfg = LiveDetectConfig::default();
        assert!(cfg.validate().is_err());
        cfg.save_dir = Some(PathBuf::from("annotated"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parses_toml_and_json_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let toml_path = dir.path().join("live.toml");
        std::fs::write(
            &toml_path,
            "mode = \"console\"\nthreshold = 0.4\n[model]\npath = \"m.json\"\n",
        )?;
        let file = read_config_file(&toml_path)?;
        assert_eq!(file.mode, Some(RunMode::Console));
        assert_eq!(file.model.and_then(|m| m.path), Some(PathBuf::from("m.json")));

        let json_path = dir.path().join("live.json");
        std::fs::write(&json_path, r#"{"device": "cpu", "console": {"status_interval": 5}}"#)?;
        let cfg = LiveDetectConfig::from_file(read_config_file(&json_path)?);
        assert_eq!(cfg.device, DevicePreference::Cpu);
        assert_eq!(cfg.status_interval, 5);

        std::fs::write(&json_path, r#"{"treshold": 0.5}"#)?;
        assert!(read_config_file(&json_path).is_err());
        Ok(())
    }
}
