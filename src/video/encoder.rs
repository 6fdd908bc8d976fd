//! Frame encoder: decode, rescale and re-encode to the stream JPEG
//!
//! ```text
//! MJPEG/JPEG ──turbojpeg──> RGB24 ──image (resize)──> RGB24 ──turbojpeg──> JPEG
//! YUYV ──BT.601──────────> RGB24
//! ```

use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::RgbImage;
use turbojpeg::{Compressor, Decompressor, Image, PixelFormat as TJPixelFormat, Subsamp};

use super::format::{PixelFormat, Resolution};
use super::frame::RawFrame;
use crate::error::{AppError, Result};

/// Turns a raw device frame into the encoded stream payload
pub trait FrameEncoder: Send {
    fn encode(&mut self, raw: &RawFrame) -> Result<Bytes>;

    /// Output resolution
    fn resolution(&self) -> Resolution;
}

/// JPEG encoder backed by libjpeg-turbo
///
/// Not thread-safe (turbojpeg handles); owned by the acquisition loop.
pub struct JpegEncoder {
    decompressor: Decompressor,
    compressor: Compressor,
    target: Resolution,
    quality: u8,
}

impl JpegEncoder {
    pub fn new(target: Resolution, quality: u8) -> Result<Self> {
        if !target.is_valid() {
            return Err(AppError::VideoError(format!(
                "Invalid stream resolution {}",
                target
            )));
        }

        let decompressor = Decompressor::new().map_err(|e| {
            AppError::VideoError(format!("Failed to create turbojpeg decoder: {}", e))
        })?;
        let mut compressor = Compressor::new().map_err(|e| {
            AppError::VideoError(format!("Failed to create turbojpeg compressor: {}", e))
        })?;

        let quality = quality.clamp(1, 100);
        compressor
            .set_quality(quality as i32)
            .map_err(|e| AppError::VideoError(format!("Failed to set JPEG quality: {}", e)))?;
        compressor
            .set_subsamp(Subsamp::Sub2x2)
            .map_err(|e| AppError::VideoError(format!("Failed to set subsampling: {}", e)))?;

        Ok(Self {
            decompressor,
            compressor,
            target,
            quality,
        })
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    fn decode_to_rgb(&mut self, jpeg: &[u8]) -> Result<RgbImage> {
        let header = self
            .decompressor
            .read_header(jpeg)
            .map_err(|e| AppError::VideoError(format!("turbojpeg read_header failed: {}", e)))?;

        let pitch = header.width * 3;
        let mut image = Image {
            pixels: vec![0u8; header.height * pitch],
            width: header.width,
            pitch,
            height: header.height,
            format: TJPixelFormat::RGB,
        };

        self.decompressor
            .decompress(jpeg, image.as_deref_mut())
            .map_err(|e| AppError::VideoError(format!("turbojpeg decode failed: {}", e)))?;

        RgbImage::from_raw(header.width as u32, header.height as u32, image.pixels)
            .ok_or_else(|| AppError::VideoError("Decoded buffer size mismatch".to_string()))
    }

    fn raw_to_rgb(&mut self, raw: &RawFrame) -> Result<RgbImage> {
        let (width, height) = (raw.resolution.width, raw.resolution.height);
        let rgb = match raw.format {
            PixelFormat::Mjpeg | PixelFormat::Jpeg => return self.decode_to_rgb(&raw.data),
            PixelFormat::Rgb24 => raw_payload(raw)?.to_vec(),
            PixelFormat::Yuyv => {
                if width % 2 != 0 {
                    return Err(AppError::VideoError(format!(
                        "YUYV needs an even width, got {}",
                        width
                    )));
                }
                yuyv_to_rgb(raw_payload(raw)?)
            }
        };
        RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| AppError::VideoError("RGB buffer size mismatch".to_string()))
    }
}

/// The part of an uncompressed frame covering the full picture
fn raw_payload(raw: &RawFrame) -> Result<&[u8]> {
    let expected = raw.format.frame_size(raw.resolution).unwrap_or(0);
    if raw.data.len() < expected {
        return Err(AppError::VideoError(format!(
            "{} data too small: {} < {}",
            raw.format,
            raw.data.len(),
            expected
        )));
    }
    Ok(&raw.data[..expected])
}

/// BT.601 limited-range YUYV to packed RGB, integer math
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for quad in yuyv.chunks_exact(4) {
        let d = quad[1] as i32 - 128;
        let e = quad[3] as i32 - 128;
        for y in [quad[0], quad[2]] {
            let c = 298 * (y as i32 - 16) + 128;
            rgb.push(((c + 409 * e) >> 8).clamp(0, 255) as u8);
            rgb.push(((c - 100 * d - 208 * e) >> 8).clamp(0, 255) as u8);
            rgb.push(((c + 516 * d) >> 8).clamp(0, 255) as u8);
        }
    }
    rgb
}

impl FrameEncoder for JpegEncoder {
    fn encode(&mut self, raw: &RawFrame) -> Result<Bytes> {
        let mut rgb = self.raw_to_rgb(raw)?;

        if rgb.width() != self.target.width || rgb.height() != self.target.height {
            rgb = imageops::resize(&rgb, self.target.width, self.target.height, FilterType::Triangle);
        }

        let width = rgb.width() as usize;
        let height = rgb.height() as usize;
        let image = Image {
            pixels: rgb.as_raw().as_slice(),
            width,
            pitch: width * 3,
            height,
            format: TJPixelFormat::RGB,
        };

        let jpeg = self
            .compressor
            .compress_to_vec(image)
            .map_err(|e| AppError::VideoError(format!("JPEG compression failed: {}", e)))?;

        Ok(Bytes::from(jpeg))
    }

    fn resolution(&self) -> Resolution {
        self.target
    }
}
