//! Per-frame consumers of filtered detections.

use anyhow::Result;

use crate::detect::FilteredDetection;
use crate::frame::Frame;

pub mod console;
mod font;
pub mod overlay;
pub mod viewer;

pub use console::{ConsoleSink, DEFAULT_STATUS_INTERVAL};
pub use overlay::{annotate, OverlaySink};
#[cfg(feature = "opencv")]
pub use viewer::WindowViewer;
pub use viewer::{FrameViewer, JpegDirectoryViewer, ViewerEvent};

/// Whether the loop should keep going after a sink ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    /// The user asked to quit (key press in a viewer).
    Stop,
}

pub trait DetectionSink {
    /// Handle one frame. `frame_index` starts at 1.
    fn consume(
        &mut self,
        frame_index: u64,
        frame: &Frame,
        detections: &[FilteredDetection],
    ) -> Result<SinkControl>;
}

impl<S: DetectionSink + ?Sized> DetectionSink for Box<S> {
    fn consume(
        &mut self,
        frame_index: u64,
        frame: &Frame,
        detections: &[FilteredDetection],
    ) -> Result<SinkControl> {
        (**self).consume(frame_index, frame, detections)
    }
}
