mod backend;
pub mod backends;
pub mod pipeline;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use pipeline::{
    filter_detections, validate_threshold, DetectionFilterPipeline, OutputDetail,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use result::{BoundingBox, DerivedMetrics, FilteredDetection, RawDetection};
