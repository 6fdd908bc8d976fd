//! Pixel format and resolution types

use serde::{Deserialize, Serialize};
use std::fmt;
use v4l::FourCC;

/// Pixel formats the acquisition loop understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// MJPEG compressed format (preferred for capture cards)
    Mjpeg,
    /// JPEG compressed format
    Jpeg,
    /// RGB24 format (3 bytes per pixel)
    Rgb24,
    /// Packed YUV 4:2:2, Y0 U Y1 V (2 bytes per pixel)
    Yuyv,
}

impl PixelFormat {
    pub fn to_fourcc(&self) -> FourCC {
        match self {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Jpeg => FourCC::new(b"JPEG"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
        }
    }

    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"JPEG" => Some(PixelFormat::Jpeg),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            _ => None,
        }
    }

    /// Check if format is compressed (JPEG/MJPEG)
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg | PixelFormat::Jpeg)
    }

    /// Expected frame size, `None` for compressed formats
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        match self {
            PixelFormat::Mjpeg | PixelFormat::Jpeg => None,
            PixelFormat::Rgb24 => Some(resolution.pixels() as usize * 3),
            PixelFormat::Yuyv => Some(resolution.pixels() as usize * 2),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::Jpeg => "JPEG",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Yuyv => "YUYV",
        };
        write!(f, "{}", name)
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.width <= 15360 && self.height <= 8640
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_mapping() {
        for format in [
            PixelFormat::Mjpeg,
            PixelFormat::Jpeg,
            PixelFormat::Rgb24,
            PixelFormat::Yuyv,
        ] {
            assert_eq!(PixelFormat::from_fourcc(format.to_fourcc()), Some(format));
        }
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"NV12")), None);
    }

    #[test]
    fn test_frame_size() {
        let res = Resolution::new(512, 288);
        assert_eq!(PixelFormat::Rgb24.frame_size(res), Some(512 * 288 * 3));
        assert_eq!(PixelFormat::Yuyv.frame_size(res), Some(512 * 288 * 2));
        assert_eq!(PixelFormat::Mjpeg.frame_size(res), None);
        assert!(res.is_valid());
        assert!(!Resolution::new(0, 288).is_valid());
    }
}
