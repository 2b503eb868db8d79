//! Display targets for annotated frames.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;

use crate::frame::Frame;

const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewerEvent {
    Continue,
    Quit,
}

const KEY_ESC: i32 = 27;

/// `q` or ESC. HighGUI may set modifier bits above the low byte.
#[cfg_attr(not(feature = "opencv"), allow(dead_code))]
pub(crate) fn is_quit_key(key: i32) -> bool {
    if key < 0 {
        return false;
    }
    let code = key & 0xFF;
    code == 'q' as i32 || code == KEY_ESC
}

/// Shows one frame and polls for a quit request without blocking.
pub trait FrameViewer {
    fn show(&mut self, frame_index: u64, frame: &Frame) -> Result<ViewerEvent>;
}

/// Writes every frame to `<dir>/frame_NNNNNN.jpg`. Never requests a quit.
#[derive(Debug)]
pub struct JpegDirectoryViewer {
    dir: PathBuf,
    quality: u8,
    written: u64,
}

impl JpegDirectoryViewer {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            quality: DEFAULT_JPEG_QUALITY,
            written: 0,
        })
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path_for(&self, frame_index: u64) -> PathBuf {
        self.dir.join(format!("frame_{frame_index:06}.jpg"))
    }
}

impl FrameViewer for JpegDirectoryViewer {
    fn show(&mut self, frame_index: u64, frame: &Frame) -> Result<ViewerEvent> {
        let path = self.path_for(frame_index);
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        JpegEncoder::new_with_quality(BufWriter::new(file), self.quality)
            .encode_image(&frame.to_image())
            .map_err(|err| anyhow!("JPEG encode failed for {}: {}", path.display(), err))?;
        self.written += 1;
        Ok(ViewerEvent::Continue)
    }
}

impl Drop for JpegDirectoryViewer {
    fn drop(&mut self) {
        log::info!(
            "saved {} annotated frames to {}",
            self.written,
            self.dir.display()
        );
    }
}

#[cfg(feature = "opencv")]
pub use window::WindowViewer;

#[cfg(feature = "opencv")]
mod window {
    use anyhow::{Context, Result};
    use opencv::{
        core::{Mat, Scalar, CV_8UC3},
        highgui, imgproc,
        prelude::*,
    };

    use super::{is_quit_key, FrameViewer, ViewerEvent};
    use crate::frame::Frame;

    /// HighGUI window. Closes on `q` or ESC; destroyed on drop.
    pub struct WindowViewer {
        title: String,
        bgr: Mat,
    }

    impl WindowViewer {
        pub fn open(title: &str) -> Result<Self> {
            highgui::named_window(title, highgui::WINDOW_AUTOSIZE)
                .with_context(|| format!("failed to open window '{title}'"))?;
            Ok(Self {
                title: title.to_string(),
                bgr: Mat::default(),
            })
        }
    }

    impl FrameViewer for WindowViewer {
        fn show(&mut self, _frame_index: u64, frame: &Frame) -> Result<ViewerEvent> {
            let mut rgb = Mat::new_rows_cols_with_default(
                frame.height() as i32,
                frame.width() as i32,
                CV_8UC3,
                Scalar::all(0.0),
            )?;
            rgb.data_bytes_mut()?.copy_from_slice(frame.pixels());
            imgproc::cvt_color(&rgb, &mut self.bgr, imgproc::COLOR_RGB2BGR, 0)?;
            highgui::imshow(&self.title, &self.bgr)?;

            let key = highgui::wait_key(1)?;
            if is_quit_key(key) {
                log::info!("window: quit key pressed");
                return Ok(ViewerEvent::Quit);
            }
            Ok(ViewerEvent::Continue)
        }
    }

    impl Drop for WindowViewer {
        fn drop(&mut self) {
            if let Err(err) = highgui::destroy_all_windows() {
                log::warn!("window: failed to destroy '{}': {}", self.title, err);
            }
        }
    }
}
