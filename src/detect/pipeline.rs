//! Confidence filtering around a detector backend.

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DerivedMetrics, FilteredDetection, RawDetection};
use crate::device::DeviceConfig;
use crate::frame::Frame;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// How much per-detection information the pipeline computes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputDetail {
    /// Class, confidence, box, plus center and size.
    Full,
    /// Class, confidence and box only.
    Minimal,
}

/// Reject thresholds outside `[0, 1]` (NaN included).
pub fn validate_threshold(threshold: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(anyhow!(
            "confidence threshold must be within [0, 1], got {}",
            threshold
        ))
    }
}

/// Keep detections with `confidence >= threshold`, in detector order.
pub fn filter_detections(detections: Vec<RawDetection>, threshold: f32) -> Vec<RawDetection> {
    detections
        .into_iter()
        .filter(|det| det.confidence >= threshold)
        .collect()
}

/// Wraps a detector backend and applies the confidence threshold per frame.
pub struct DetectionFilterPipeline {
    backend: Box<dyn DetectorBackend>,
    device: DeviceConfig,
    threshold: f32,
    detail: OutputDetail,
}

impl DetectionFilterPipeline {
    pub fn new(
        backend: Box<dyn DetectorBackend>,
        threshold: f32,
        detail: OutputDetail,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            device: DeviceConfig::cpu(),
            threshold: validate_threshold(threshold)?,
            detail,
        })
    }

    /// Run on the selected device. Defaults to the CPU.
    pub fn on_device(mut self, device: DeviceConfig) -> Self {
        if let Some(tuning) = device.tuning {
            log::debug!(
                "pipeline: {} on {} (benchmark_kernels={}, deterministic={})",
                self.backend.name(),
                device.device,
                tuning.benchmark_kernels,
                tuning.deterministic
            );
        }
        self.device = device;
        self
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    /// Change the threshold for subsequent frames.
    pub fn configure(&mut self, threshold: f32) -> Result<()> {
        self.threshold = validate_threshold(threshold)?;
        Ok(())
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn detail(&self) -> OutputDetail {
        self.detail
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Detect, filter and (in full detail) derive center/size for one frame.
    pub fn step(&mut self, frame: &Frame) -> Result<Vec<FilteredDetection>> {
        let raw = self
            .backend
            .detect(frame, self.device.device)
            .with_context(|| format!("{} backend failed on frame", self.backend.name()))?;
        let raw_count = raw.len();
        let kept = filter_detections(raw, self.threshold);
        log::trace!(
            "pipeline: kept {}/{} detections at threshold {:.2}",
            kept.len(),
            raw_count,
            self.threshold
        );

        let detail = self.detail;
        Ok(kept
            .into_iter()
            .map(|raw| {
                let metrics = match detail {
                    OutputDetail::Full => Some(DerivedMetrics::of(&raw.bbox)),
                    OutputDetail::Minimal => None,
                };
                FilteredDetection { raw, metrics }
            })
            .collect())
    }
}
