//! Owned RGB24 frames.
//!
//! Every capture backend normalizes to packed RGB24 before handing a frame to
//! the detector or a sink. Pixel data is row-major, three bytes per pixel.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    /// Wrap packed RGB24 pixels. The buffer length must match the dimensions.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Uniform frame, mostly for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let pixels = rgb.iter().copied().cycle().take(len).collect();
        Self::from_rgb(width, height, pixels)
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Copy into an `image` buffer for drawing or encoding.
    pub fn to_image(&self) -> RgbImage {
        // Length was validated at construction, so this cannot fail.
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
