use serde::Deserialize;

/// Axis-aligned box in pixel coordinates with `x1 <= x2` and `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(from = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Build a box from two corners, swapping coordinates if needed.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Build a box from a center point and a size, as YOLO heads report them.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        let half_w = w.abs() / 2.0;
        let half_h = h.abs() / 2.0;
        Self::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn size(&self) -> (f32, f32) {
        (self.x2 - self.x1, self.y2 - self.y1)
    }

    pub fn area(&self) -> f32 {
        let (w, h) = self.size();
        w * h
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// One detector output for one frame. Discarded once the frame is handled.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub class_id: u32,
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(class_id: u32, class_name: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            class_name: class_name.into(),
            confidence,
            bbox,
        }
    }
}

/// Center and size of a detection box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DerivedMetrics {
    pub center: (f32, f32),
    pub size: (f32, f32),
}

impl DerivedMetrics {
    pub fn of(bbox: &BoundingBox) -> Self {
        Self {
            center: bbox.center(),
            size: bbox.size(),
        }
    }
}

/// A detection that passed the confidence threshold.
///
/// `metrics` is `None` when the pipeline runs with minimal output detail.
#[derive(Clone, Debug, PartialEq)]
pub struct FilteredDetection {
    pub raw: RawDetection,
    pub metrics: Option<DerivedMetrics>,
}

impl FilteredDetection {
    pub fn class_name(&self) -> &str {
        &self.raw.class_name
    }

    pub fn confidence(&self) -> f32 {
        self.raw.confidence
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.raw.bbox
    }
}
