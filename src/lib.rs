//! Live Detect
//!
//! Real-time object detection on a local camera feed.
//!
//! # Architecture
//!
//! One blocking loop per process:
//!
//! 1. **Resolve**: the host OS picks the camera source and capture hints.
//! 2. **Prepare**: the inference device is probed once; on a GPU the model is
//!    exported to an accelerated artifact at most once, with a logged fallback
//!    to the original artifact.
//! 3. **Loop**: read a frame, detect, keep detections with
//!    `confidence >= threshold` in detector order, hand them to a sink.
//! 4. **Stop**: quit key, Ctrl-C, end of stream or a failed read. The camera
//!    and any window are released on every path.
//!
//! # Module Structure
//!
//! - `platform`: OS classification and camera descriptor resolution
//! - `ingest`: Frame sources (synthetic, V4L2, OpenCV)
//! - `detect`: Detector backends and the confidence filter pipeline
//! - `device`: Accelerator probe and device selection
//! - `model`: Model artifacts, export and loading
//! - `sink`: Overlay and console output
//! - `runner`: The frame loop, stop flag and FPS meter
//! - `config`: File, environment and CLI configuration

pub mod config;
pub mod detect;
pub mod device;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod model;
pub mod platform;
pub mod runner;
pub mod sink;
pub mod ui;

pub use config::{ConfigOverrides, LiveDetectConfig, RunMode};
pub use detect::{
    filter_detections, BoundingBox, DerivedMetrics, DetectionFilterPipeline, DetectorBackend,
    FilteredDetection, OutputDetail, RawDetection, StubBackend,
};
pub use device::{
    AcceleratorProbe, AcceleratorReport, DeviceConfig, DevicePreference, DeviceSelector,
    GpuTuning, InferenceDevice, SystemAcceleratorProbe,
};
pub use error::StartupError;
pub use frame::Frame;
pub use ingest::{CameraSource, CaptureError, EffectiveCapture, FrameSource};
pub use model::{
    AccelerationState, CommandExporter, DefaultLoader, Degradation, Exporter, ModelArtifacts,
    ModelLoader, ModelPreparer, PreparedModel,
};
pub use platform::{CameraDescriptor, CaptureRequest, Codec, OsClass, OsProbe, SourceId};
pub use runner::{FpsMeter, RunSummary, Runner, StopFlag, StopReason};
pub use sink::{ConsoleSink, DetectionSink, OverlaySink, SinkControl};
