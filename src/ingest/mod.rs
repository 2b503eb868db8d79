//! Frame ingestion sources.
//!
//! This module opens the resolved camera and hands RGB24 frames to the loop:
//! - Synthetic `stub://` source (tests, demos)
//! - USB/V4L2 devices (feature: capture-v4l2)
//! - Any OpenCV-reachable device index, path or video file (feature: opencv)
//!
//! A source is opened exactly once. Capture hints from the descriptor are
//! applied at open time and the values the device settled on are re-queried
//! and exposed as [`EffectiveCapture`]. The device is released when the
//! [`CameraSource`] is dropped, on every exit path.

use std::fmt;

use thiserror::Error;

use crate::frame::Frame;
use crate::platform::{CameraDescriptor, CaptureRequest, Codec, SourceId};

#[cfg(feature = "capture-v4l2")]
mod normalize;
#[cfg(feature = "opencv")]
pub mod opencv_capture;
pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

#[cfg(feature = "opencv")]
pub use opencv_capture::OpenCvSource;
pub use synthetic::{SyntheticSource, STUB_SCHEME};
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Source;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture source {uri} is unavailable: {reason}")]
    Unavailable { uri: String, reason: String },
    #[error("no capture backend compiled in for {uri} (enable the `opencv` or `capture-v4l2` feature)")]
    BackendMissing { uri: String },
    #[error("frame read failed on {uri}: {reason}")]
    Read { uri: String, reason: String },
}

/// What the device actually accepted after the hints were applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EffectiveCapture {
    pub width: u32,
    pub height: u32,
    pub fps: Option<f32>,
    pub codec: Option<Codec>,
}

impl fmt::Display for EffectiveCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)?;
        match self.fps {
            Some(fps) => write!(f, " @ {} fps", fps.round() as u32)?,
            None => write!(f, " @ ? fps")?,
        }
        match self.codec {
            Some(codec) => write!(f, " ({codec})"),
            None => write!(f, " (unknown codec)"),
        }
    }
}

/// A blocking frame producer.
pub trait FrameSource {
    /// Effective capture parameters, queried after configuration.
    fn effective(&self) -> EffectiveCapture;

    /// Block until the next frame. `Ok(None)` signals end of stream.
    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// Statistics for an open camera.
#[derive(Clone, Debug, Default)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub uri: String,
}

/// The opened camera. Owns the backend and releases it on drop.
pub struct CameraSource {
    uri: String,
    backend: Box<dyn FrameSource>,
    frames_captured: u64,
}

impl CameraSource {
    /// Open the described camera and apply its capture hints.
    pub fn open(descriptor: &CameraDescriptor) -> Result<Self, CaptureError> {
        let uri = descriptor.source().to_string();
        let backend = open_backend(descriptor)?;
        log::info!("camera opened: {} ({})", uri, descriptor.os_class());
        Ok(Self {
            uri,
            backend,
            frames_captured: 0,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frames_captured,
            uri: self.uri.clone(),
        }
    }

    /// Capture the next frame. `Ok(None)` at end of stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let frame = self.backend.read_frame()?;
        if frame.is_some() {
            self.frames_captured += 1;
        }
        Ok(frame)
    }
}

impl FrameSource for CameraSource {
    fn effective(&self) -> EffectiveCapture {
        self.backend.effective()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.next_frame()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        log::info!(
            "camera released: {} after {} frames",
            self.uri,
            self.frames_captured
        );
    }
}

/// A read that produced no frame: end of stream for a recording, a capture
/// failure for a live device.
#[cfg_attr(not(feature = "opencv"), allow(dead_code))]
pub(crate) fn empty_read(source: &SourceId) -> Result<Option<Frame>, CaptureError> {
    if source.is_live_device() {
        Err(CaptureError::Read {
            uri: source.to_string(),
            reason: "device returned no frame".to_string(),
        })
    } else {
        Ok(None)
    }
}

fn open_backend(descriptor: &CameraDescriptor) -> Result<Box<dyn FrameSource>, CaptureError> {
    if let SourceId::Path(path) = descriptor.source() {
        if path.starts_with(STUB_SCHEME) {
            return Ok(Box::new(SyntheticSource::open(path, descriptor.request())?));
        }
    }
    open_device(descriptor.source(), descriptor.request())
}

#[cfg(feature = "opencv")]
fn open_device(
    source: &SourceId,
    request: &CaptureRequest,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(OpenCvSource::open(source, request)?))
}

#[cfg(all(feature = "capture-v4l2", not(feature = "opencv")))]
fn open_device(
    source: &SourceId,
    request: &CaptureRequest,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    match source {
        SourceId::Path(_) if !source.is_v4l2_path() => Err(CaptureError::BackendMissing {
            uri: source.to_string(),
        }),
        _ => Ok(Box::new(V4l2Source::open(source, request)?)),
    }
}

#[cfg(not(any(feature = "opencv", feature = "capture-v4l2")))]
fn open_device(
    source: &SourceId,
    _request: &CaptureRequest,
) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::BackendMissing {
        uri: source.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::OsClass;

    fn stub(uri: &str) -> CameraDescriptor {
        CameraDescriptor::new(
            OsClass::Linux,
            SourceId::Path(uri.to_string()),
            CaptureRequest::default(),
        )
    }

    #[test]
    fn effective_capture_display() {
        let effective = EffectiveCapture {
            width: 1280,
            height: 720,
            fps: Some(30.0),
            codec: Some(Codec::Mjpeg),
        };
        assert_eq!(effective.to_string(), "1280x720 @ 30 fps (MJPG)");

        let unknown = EffectiveCapture {
            width: 640,
            height: 480,
            fps: None,
            codec: None,
        };
        assert_eq!(unknown.to_string(), "640x480 @ ? fps (unknown codec)");
    }

    #[test]
    fn camera_source_counts_frames_until_end_of_stream() {
        let mut camera = CameraSource::open(&stub("stub://test?frames=2&width=8&height=6")).unwrap();
        assert!(camera.next_frame().unwrap().is_some());
        assert!(camera.next_frame().unwrap().is_some());
        assert!(camera.next_frame().unwrap().is_none());
        assert_eq!(camera.stats().frames_captured, 2);
        assert_eq!(camera.effective().width, 8);
    }

    #[test]
    fn unavailable_stub_fails_to_open() {
        let err = CameraSource::open(&stub("stub://unavailable")).err().unwrap();
        assert!(matches!(err, CaptureError::Unavailable { .. }));
    }

    #[test]
    fn empty_read_ends_files_but_fails_cameras() {
        assert!(matches!(empty_read(&SourceId::parse("clip.mp4")), Ok(None)));
        assert!(matches!(
            empty_read(&SourceId::Index(0)),
            Err(CaptureError::Read { .. })
        ));
        let err = empty_read(&SourceId::parse("/dev/video0")).err().unwrap();
        assert_eq!(
            err.to_string(),
            "frame read failed on /dev/video0: device returned no frame"
        );
    }

    #[cfg(not(any(feature = "opencv", feature = "capture-v4l2")))]
    #[test]
    fn real_device_without_backend_reports_missing_backend() {
        let err = CameraSource::open(&stub("/dev/video0")).err().unwrap();
        assert!(matches!(err, CaptureError::BackendMissing { .. }));
    }
}
