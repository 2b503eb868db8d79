use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::device::InferenceDevice;
use crate::frame::Frame;

/// Stub backend for testing and offline runs.
///
/// Replays a fixed script of per-frame detections, cycling once the script is
/// exhausted. An empty script never detects anything.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    script: Vec<Vec<RawDetection>>,
    cursor: usize,
}

/// On-disk detection script: `{"frames": [[{"class": "cup", ...}], []]}`.
#[derive(Debug, Deserialize)]
struct DetectionScript {
    frames: Vec<Vec<RawDetection>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: Vec<Vec<RawDetection>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// Load a JSON detection script.
    pub fn from_script_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        let script: DetectionScript = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detection script {}: {}", path.display(), e))?;
        Ok(Self::scripted(script.frames))
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame, _device: InferenceDevice) -> Result<Vec<RawDetection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.script[self.cursor % self.script.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);
        Ok(detections)
    }
}
