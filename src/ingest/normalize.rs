use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::platform::Codec;

/// Convert a raw V4L2 buffer in `codec` to an RGB24 frame.
///
/// MJPEG buffers carry their own dimensions, which win over the negotiated ones.
pub(crate) fn normalize_to_frame(
    buffer: &[u8],
    width: u32,
    height: u32,
    codec: Codec,
) -> Result<Frame> {
    match codec {
        Codec::Mjpeg => {
            let decoded = image::load_from_memory_with_format(buffer, image::ImageFormat::Jpeg)
                .map_err(|err| anyhow!("MJPEG decode failed: {}", err))?
                .to_rgb8();
            if decoded.dimensions() != (width, height) {
                log::debug!(
                    "normalize: MJPEG frame is {:?}, negotiated {}x{}",
                    decoded.dimensions(),
                    width,
                    height
                );
            }
            Ok(Frame::from_image(decoded))
        }
        Codec::Rgb24 | Codec::Yuyv => {
            Frame::from_rgb(width, height, normalize_to_rgb(buffer, width, height, codec)?)
        }
    }
}

fn normalize_to_rgb(buffer: &[u8], width: u32, height: u32, codec: Codec) -> Result<Vec<u8>> {
    match codec {
        Codec::Rgb24 => {
            let expected = crate::frame::rgb_len(width, height)?;
            if buffer.len() < expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    buffer.len()
                ));
            }
            Ok(buffer[..expected].to_vec())
        }
        Codec::Yuyv => yuyv_to_rgb(buffer, width, height),
        Codec::Mjpeg => Err(anyhow!("MJPEG buffers decode straight to frames")),
    }
}

/// Packed 4:2:2, two pixels per `Y0 U Y1 V` quad.
fn yuyv_to_rgb(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    if w % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", w));
    }
    let expected = w
        .checked_mul(h)
        .and_then(|v| v.checked_mul(2))
        .ok_or_else(|| anyhow!("YUYV frame dimensions overflow"))?;
    if buffer.len() < expected {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            buffer.len()
        ));
    }

    let mut rgb = Vec::with_capacity(w * h * 3);
    for quad in buffer[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
