//! V4L2 capture device discovery

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use v4l::capability::Flags;
use v4l::prelude::*;
use v4l::video::Capture;

use super::format::PixelFormat;
use crate::error::{AppError, Result};

/// Highest `/dev/videoN` index scanned
const MAX_DEVICE_INDEX: u32 = 9;

/// A video device that can capture
#[derive(Debug, Clone, Serialize)]
pub struct VideoDeviceInfo {
    pub path: PathBuf,
    /// Card name reported by the driver
    pub name: String,
    pub driver: String,
    pub bus_info: String,
    /// Formats this gateway can consume
    pub formats: Vec<PixelFormat>,
}

impl VideoDeviceInfo {
    pub fn supports_mjpeg(&self) -> bool {
        self.formats.iter().any(|f| f.is_compressed())
    }
}

/// Inspect one device node
pub fn inspect_device(path: impl AsRef<Path>) -> Result<VideoDeviceInfo> {
    let path = path.as_ref();
    let device = Device::with_path(path)
        .map_err(|e| AppError::device_unavailable(path.display().to_string(), e))?;

    let caps = device
        .query_caps()
        .map_err(|e| AppError::VideoError(format!("Failed to query capabilities: {}", e)))?;

    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Err(AppError::VideoError(format!(
            "{} is not a capture device",
            path.display()
        )));
    }

    let formats = device
        .enum_formats()
        .map_err(|e| AppError::VideoError(format!("Failed to enumerate formats: {}", e)))?
        .into_iter()
        .filter_map(|desc| PixelFormat::from_fourcc(desc.fourcc))
        .collect();

    Ok(VideoDeviceInfo {
        path: path.to_path_buf(),
        name: caps.card,
        driver: caps.driver,
        bus_info: caps.bus,
        formats,
    })
}

/// List `/dev/video0..9` nodes that open and report capture capability
pub fn enumerate_devices() -> Vec<VideoDeviceInfo> {
    (0..=MAX_DEVICE_INDEX)
        .map(|i| PathBuf::from(format!("/dev/video{}", i)))
        .filter(|path| path.exists())
        .filter_map(|path| match inspect_device(&path) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_missing_device() {
        assert!(matches!(
            inspect_device("/nonexistent/video42"),
            Err(AppError::DeviceUnavailable { .. })
        ));
    }
}
