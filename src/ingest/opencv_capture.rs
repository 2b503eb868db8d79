//! OpenCV-backed capture for device indices, V4L2 paths and video files.

use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture},
};

use crate::frame::Frame;
use crate::ingest::{empty_read, CaptureError, EffectiveCapture, FrameSource};
use crate::platform::{CaptureRequest, Codec, SourceId};

pub struct OpenCvSource {
    uri: String,
    source: SourceId,
    capture: VideoCapture,
    effective: EffectiveCapture,
    bgr: Mat,
    rgb: Mat,
}

impl OpenCvSource {
    pub fn open(source: &SourceId, request: &CaptureRequest) -> Result<Self, CaptureError> {
        let uri = source.to_string();
        let mut capture = open_video_capture(source).ok_or_else(|| CaptureError::Unavailable {
            uri: uri.clone(),
            reason: "no OpenCV backend could open the source".to_string(),
        })?;

        configure_camera(&mut capture, request);
        let effective = query_effective(&capture);
        log::info!("OpenCvSource: connected to {} ({})", uri, effective);

        Ok(Self {
            uri,
            source: source.clone(),
            capture,
            effective,
            bgr: Mat::default(),
            rgb: Mat::default(),
        })
    }

    fn read_error(&self, err: opencv::Error) -> CaptureError {
        CaptureError::Read {
            uri: self.uri.clone(),
            reason: err.to_string(),
        }
    }
}

impl FrameSource for OpenCvSource {
    fn effective(&self) -> EffectiveCapture {
        self.effective
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let grabbed = self
            .capture
            .read(&mut self.bgr)
            .map_err(|err| self.read_error(err))?;
        if !grabbed || self.bgr.empty() {
            return empty_read(&self.source);
        }

        imgproc::cvt_color(&self.bgr, &mut self.rgb, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|err| self.read_error(err))?;
        let width = self.rgb.cols() as u32;
        let height = self.rgb.rows() as u32;
        let pixels = self
            .rgb
            .data_bytes()
            .map_err(|err| self.read_error(err))?
            .to_vec();

        Frame::from_rgb(width, height, pixels)
            .map(Some)
            .map_err(|err| CaptureError::Read {
                uri: self.uri.clone(),
                reason: err.to_string(),
            })
    }
}

impl Drop for OpenCvSource {
    fn drop(&mut self) {
        if let Err(err) = self.capture.release() {
            log::warn!("OpenCvSource: release of {} failed: {}", self.uri, err);
        }
    }
}

fn open_video_capture(source: &SourceId) -> Option<VideoCapture> {
    let index = match source {
        SourceId::Index(index) => Some(*index),
        SourceId::Path(path) => path
            .strip_prefix("/dev/video")
            .and_then(|rest| rest.parse::<i32>().ok()),
    };

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        let opened = match (index, source) {
            (Some(index), _) => VideoCapture::new(index, backend),
            (None, SourceId::Path(path)) => VideoCapture::from_file(path, backend),
            (None, SourceId::Index(_)) => continue,
        };
        match opened {
            Ok(cap) if cap.is_opened().unwrap_or(false) => return Some(cap),
            Ok(_) => log::debug!("OpenCvSource: backend {} did not open {}", backend, source),
            Err(err) => log::debug!("OpenCvSource: backend {} failed on {}: {}", backend, source, err),
        }
    }
    None
}

fn configure_camera(cap: &mut VideoCapture, request: &CaptureRequest) {
    if let Some(codec) = request.codec {
        let [a, b, c, d] = codec.fourcc().map(char::from);
        if let Ok(code) = videoio::VideoWriter::fourcc(a, b, c, d) {
            if !matches!(cap.set(videoio::CAP_PROP_FOURCC, code as f64), Ok(true)) {
                log::warn!("OpenCvSource: codec {} not accepted", codec);
            }
        }
    }
    let hints = [
        ("width", videoio::CAP_PROP_FRAME_WIDTH, request.width),
        ("height", videoio::CAP_PROP_FRAME_HEIGHT, request.height),
        ("fps", videoio::CAP_PROP_FPS, request.fps),
    ];
    for (name, prop, value) in hints {
        let Some(value) = value else { continue };
        if !matches!(cap.set(prop, value as f64), Ok(true)) {
            log::warn!("OpenCvSource: {} {} not accepted", name, value);
        }
    }
}

fn query_effective(cap: &VideoCapture) -> EffectiveCapture {
    let get = |prop| cap.get(prop).unwrap_or(0.0);
    let fps = get(videoio::CAP_PROP_FPS);
    let fourcc = (get(videoio::CAP_PROP_FOURCC) as i64 as u32).to_le_bytes();
    EffectiveCapture {
        width: get(videoio::CAP_PROP_FRAME_WIDTH).max(0.0) as u32,
        height: get(videoio::CAP_PROP_FRAME_HEIGHT).max(0.0) as u32,
        fps: (fps > 0.0).then_some(fps as f32),
        codec: Codec::from_fourcc(fourcc),
    }
}
