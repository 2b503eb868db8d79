#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::device::InferenceDevice;
use crate::frame::Frame;

/// Detections below this score never leave the backend.
pub const DEFAULT_CANDIDATE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_MAX_DETECTIONS: usize = 300;

/// Tract-based backend for YOLO ONNX exports.
///
/// Expects the single-output head layout `[1, 4 + classes, anchors]` with
/// center/size boxes in input pixels. Runs on the CPU regardless of the
/// selected inference device.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    labels: Vec<String>,
    candidate_threshold: f32,
    iou_threshold: f32,
    max_detections: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let labels = read_embedded_names(model_path).unwrap_or_default();
        if labels.is_empty() {
            log::debug!(
                "tract: {} carries no class names, using numeric labels",
                model_path.display()
            );
        }

        Ok(Self {
            model,
            input_size,
            labels,
            candidate_threshold: DEFAULT_CANDIDATE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
        })
    }

    /// Replace the class names embedded in the model.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// Override the minimum score for a candidate box.
    pub fn with_candidate_threshold(mut self, threshold: f32) -> Self {
        self.candidate_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let side = self.input_size;
        let resized = imageops::resize(&frame.to_image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn label(&self, class_id: usize) -> String {
        match self.labels.get(class_id) {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("class{class_id}"),
        }
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected detector output shape: {:?}", shape));
        }
        // Some exports transpose the head to [1, anchors, channels].
        let transposed = shape[1] > shape[2];
        let (channels, anchors) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if channels < 5 {
            return Err(anyhow!(
                "detector output requires at least 5 channels, got {}",
                channels
            ));
        }
        let at = |c: usize, a: usize| {
            if transposed {
                view[[0, a, c]]
            } else {
                view[[0, c, a]]
            }
        };

        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let (class_id, score) = (4..channels)
                .map(|c| (c - 4, at(c, a)))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.candidate_threshold {
                continue;
            }
            let bbox = BoundingBox::from_center(
                at(0, a) * sx,
                at(1, a) * sy,
                at(2, a) * sx,
                at(3, a) * sy,
            );
            candidates.push(RawDetection::new(
                class_id as u32,
                self.label(class_id),
                score.clamp(0.0, 1.0),
                bbox,
            ));
        }

        Ok(non_max_suppression(
            candidates,
            self.iou_threshold,
            self.max_detections,
        ))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, _device: InferenceDevice) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = Frame::filled(side, side, [114, 114, 114])?;
        self.detect(&blank, InferenceDevice::Cpu).map(|_| ())
    }
}

/// Greedy per-class suppression, highest score first.
pub(crate) fn non_max_suppression(
    mut candidates: Vec<RawDetection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::new();
    for cand in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && k.bbox.iou(&cand.bbox) > iou_threshold);
        if !overlaps {
            kept.push(cand);
            if kept.len() >= max_detections {
                break;
            }
        }
    }
    kept
}

/// Class names stored by the exporter in the ONNX metadata as a Python dict
/// literal, e.g. `{0: 'person', 1: 'bicycle'}`.
fn read_embedded_names(model_path: &Path) -> Option<Vec<String>> {
    let proto = tract_onnx::onnx().proto_model_for_path(model_path).ok()?;
    let entry = proto
        .metadata_props
        .iter()
        .find(|prop| prop.key == "names")?;
    parse_names_literal(&entry.value)
}

pub(crate) fn parse_names_literal(raw: &str) -> Option<Vec<String>> {
    let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut pairs: Vec<(usize, String)> = Vec::new();
    for entry in body.split(',') {
        let Some((key, value)) = entry.split_once(':') else {
            continue;
        };
        let key: usize = key.trim().parse().ok()?;
        let value = value.trim().trim_matches(|c| c == '\'' || c == '"');
        pairs.push((key, value.to_string()));
    }
    // Indexed by class id; ids missing from the literal stay empty.
    let len = pairs.iter().map(|(key, _)| key + 1).max().unwrap_or(0);
    let mut names = vec![String::new(); len];
    for (key, name) in pairs {
        names[key] = name;
    }
    Some(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exporter_names_literal() {
        let names = parse_names_literal("{0: 'person', 2: 'car', 1: 'bicycle'}").unwrap();
        assert_eq!(names, vec!["person", "bicycle", "car"]);
        assert!(parse_names_literal("person,car").is_none());
    }

    #[test]
    fn names_with_gaps_keep_their_class_ids() {
        let names = parse_names_literal("{0: 'person', 2: 'car', 5: 'bus'}").unwrap();
        assert_eq!(names.len(), 6);
        assert_eq!(names[2], "car");
        assert_eq!(names[5], "bus");
        assert!(names[1].is_empty());
    }

    #[test]
    fn nms_keeps_best_box_per_overlapping_cluster() {
        let a = RawDetection::new(0, "a", 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let b = RawDetection::new(0, "a", 0.8, BoundingBox::new(1.0, 1.0, 10.0, 10.0));
        let c = RawDetection::new(1, "c", 0.7, BoundingBox::new(1.0, 1.0, 10.0, 10.0));
        let kept = non_max_suppression(vec![b, c.clone(), a.clone()], 0.45, 10);
        assert_eq!(kept, vec![a, c]);
    }
}
