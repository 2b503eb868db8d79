//! V4L2 frame source.
//!
//! Opens a local device node (e.g. /dev/video0), requests the capture hints
//! (MJPEG 1280x720 @ 30 fps on Linux hosts), then reads the format and frame
//! interval back from the driver. Buffers are decoded to RGB24 according to
//! the codec the driver settled on.

use ouroboros::self_referencing;

use super::normalize::normalize_to_frame;
use crate::frame::Frame;
use crate::ingest::{CaptureError, EffectiveCapture, FrameSource};
use crate::platform::{CaptureRequest, Codec, SourceId};

const MMAP_BUFFERS: u32 = 4;

pub struct V4l2Source {
    uri: String,
    state: V4l2State,
    effective: EffectiveCapture,
    codec: Codec,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn open(source: &SourceId, request: &CaptureRequest) -> Result<Self, CaptureError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let uri = source.to_string();
        let unavailable = |reason: String| CaptureError::Unavailable {
            uri: uri.clone(),
            reason,
        };

        let mut device = match source {
            SourceId::Index(index) => v4l::Device::new(*index as usize),
            SourceId::Path(path) => v4l::Device::with_path(path),
        }
        .map_err(|err| unavailable(err.to_string()))?;

        let mut format = device
            .format()
            .map_err(|err| unavailable(format!("read format: {err}")))?;
        if let Some(width) = request.width {
            format.width = width;
        }
        if let Some(height) = request.height {
            format.height = height;
        }
        if let Some(codec) = request.codec {
            format.fourcc = v4l::FourCC::new(&codec.fourcc());
        }
        if let Err(err) = device.set_format(&format) {
            log::warn!("V4l2Source: failed to set format on {}: {}", uri, err);
        }

        if let Some(fps) = request.fps.filter(|fps| *fps > 0) {
            let params = v4l::video::capture::Parameters::with_fps(fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", uri, err);
            }
        }

        // Re-query: the driver may have adjusted any of the requested values.
        let format = device
            .format()
            .map_err(|err| unavailable(format!("re-read format: {err}")))?;
        let fps = device.params().ok().and_then(|params| {
            let interval = params.interval;
            (interval.numerator > 0).then(|| interval.denominator as f32 / interval.numerator as f32)
        });
        let codec = Codec::from_fourcc(format.fourcc.repr).ok_or_else(|| {
            unavailable(format!("unsupported pixel format {}", format.fourcc))
        })?;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, MMAP_BUFFERS)
            },
        }
        .try_build()
        .map_err(|err| unavailable(format!("create buffer stream: {err}")))?;

        let effective = EffectiveCapture {
            width: format.width,
            height: format.height,
            fps,
            codec: Some(codec),
        };
        log::info!("V4l2Source: connected to {} ({})", uri, effective);

        Ok(Self {
            uri,
            state,
            effective,
            codec,
        })
    }
}

impl FrameSource for V4l2Source {
    fn effective(&self) -> EffectiveCapture {
        self.effective
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let (width, height, codec) = (self.effective.width, self.effective.height, self.codec);
        let frame = self
            .state
            .with_mut(|fields| {
                let (buf, meta) = fields.stream.next()?;
                let used = match meta.bytesused as usize {
                    0 => buf.len(),
                    n => n.min(buf.len()),
                };
                normalize_to_frame(&buf[..used], width, height, codec).map_err(|err| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
                })
            })
            .map_err(|err| CaptureError::Read {
                uri: self.uri.clone(),
                reason: err.to_string(),
            })?;
        Ok(Some(frame))
    }
}
