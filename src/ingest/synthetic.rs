//! Synthetic frame source for `stub://` URIs.
//!
//! `stub://<name>?frames=N&width=W&height=H&fail_after=K`
//!
//! - `frames`: end of stream after N frames (unbounded when absent)
//! - `width`/`height`: frame size, otherwise the capture hint, otherwise 640x480
//! - `fail_after`: the read after K frames fails
//!
//! `stub://unavailable` never opens.

use crate::frame::Frame;
use crate::ingest::{CaptureError, EffectiveCapture, FrameSource};
use crate::platform::{CaptureRequest, Codec};

pub const STUB_SCHEME: &str = "stub://";

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 30;

#[derive(Clone, Debug)]
pub struct SyntheticSource {
    uri: String,
    width: u32,
    height: u32,
    fps: u32,
    codec: Codec,
    frame_limit: Option<u64>,
    fail_after: Option<u64>,
    frame_count: u64,
    /// Changes every 50 frames to simulate scene motion.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn open(uri: &str, request: &CaptureRequest) -> Result<Self, CaptureError> {
        let rest = uri.strip_prefix(STUB_SCHEME).unwrap_or(uri);
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        if name == "unavailable" {
            return Err(CaptureError::Unavailable {
                uri: uri.to_string(),
                reason: "synthetic device configured as unavailable".to_string(),
            });
        }

        let mut source = Self {
            uri: uri.to_string(),
            width: request.width.unwrap_or(DEFAULT_WIDTH),
            height: request.height.unwrap_or(DEFAULT_HEIGHT),
            fps: request.fps.unwrap_or(DEFAULT_FPS),
            codec: request.codec.unwrap_or(Codec::Rgb24),
            frame_limit: None,
            fail_after: None,
            frame_count: 0,
            scene_state: 0,
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let parsed = value.parse::<u64>().map_err(|_| CaptureError::Unavailable {
                uri: uri.to_string(),
                reason: format!("invalid value for '{key}': '{value}'"),
            })?;
            match key {
                "frames" => source.frame_limit = Some(parsed),
                "fail_after" => source.fail_after = Some(parsed),
                "width" => source.width = parsed as u32,
                "height" => source.height = parsed as u32,
                "fps" => source.fps = parsed as u32,
                other => log::debug!("stub source: ignoring unknown parameter '{other}'"),
            }
        }

        if source.width == 0 || source.height == 0 {
            return Err(CaptureError::Unavailable {
                uri: uri.to_string(),
                reason: "frame dimensions must be non-zero".to_string(),
            });
        }

        log::info!("stub source: connected to {} (synthetic)", source.uri);
        Ok(source)
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let len = self.width as usize * self.height as usize * 3;
        (0..len)
            .map(|i| ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn effective(&self) -> EffectiveCapture {
        EffectiveCapture {
            width: self.width,
            height: self.height,
            fps: Some(self.fps as f32),
            codec: Some(self.codec),
        }
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.fail_after == Some(self.frame_count) {
            return Err(CaptureError::Read {
                uri: self.uri.clone(),
                reason: "synthetic read failure".to_string(),
            });
        }
        if self.frame_limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }

        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(self.width, self.height, pixels)
            .map(Some)
            .map_err(|err| CaptureError::Read {
                uri: self.uri.clone(),
                reason: err.to_string(),
            })
    }
}
