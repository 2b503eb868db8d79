use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::device::InferenceDevice;
use crate::frame::Frame;

/// Detector backend trait.
///
/// The detector is a black box: an RGB frame goes in, zero or more raw
/// detections come out in the detector's own order. Backends do not apply the
/// user-facing confidence threshold; that is the pipeline's job.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Implementations must treat the frame as read-only.
    fn detect(&mut self, frame: &Frame, device: InferenceDevice) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, called once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
