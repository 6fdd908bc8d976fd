//! Capture device abstraction and the V4L2 implementation

use bytes::Bytes;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;

use super::format::{PixelFormat, Resolution};
use super::frame::RawFrame;
use crate::error::{AppError, Result};

/// Number of mmap buffers; two keeps driver-side queueing latency low
const BUFFER_COUNT: u32 = 2;
/// Frames smaller than this are driver garbage (no signal, partial DMA)
const MIN_FRAME_SIZE: usize = 128;

/// A source of raw frames
///
/// `read_frame` blocks until a frame is available or the device's own
/// timeout expires.
pub trait CaptureDevice: Send {
    fn read_frame(&mut self) -> io::Result<RawFrame>;

    /// Human readable device identifier for logs
    fn name(&self) -> String;
}

/// V4L2 camera streaming through mmap buffers
pub struct V4l2Camera {
    path: String,
    stream: MmapStream<'static>,
    resolution: Resolution,
    format: PixelFormat,
    // Keep the device handle alive for as long as the stream
    _device: Device,
}

impl V4l2Camera {
    /// Open `path` requesting MJPEG at `resolution` and `fps`
    ///
    /// The driver may pick a different size; the encoder rescales.
    pub fn open(
        path: impl AsRef<Path>,
        resolution: Resolution,
        fps: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();

        let device =
            Device::with_path(path).map_err(|e| AppError::device_unavailable(&name, e))?;

        let mut fmt = device
            .format()
            .map_err(|e| AppError::device_unavailable(&name, e))?;
        fmt.width = resolution.width;
        fmt.height = resolution.height;
        fmt.fourcc = PixelFormat::Mjpeg.to_fourcc();
        let fmt = device
            .set_format(&fmt)
            .map_err(|e| AppError::device_unavailable(&name, e))?;

        let format = PixelFormat::from_fourcc(fmt.fourcc).ok_or_else(|| {
            AppError::device_unavailable(&name, format!("unsupported pixel format {}", fmt.fourcc))
        })?;

        if fps > 0 {
            if let Err(e) = device.set_params(&Parameters::with_fps(fps)) {
                debug!("Device {} refused {} fps: {}", name, fps, e);
            }
        }

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| AppError::device_unavailable(&name, e))?;
        stream.set_timeout(timeout);

        let actual = Resolution::new(fmt.width, fmt.height);
        info!("Opened {} at {} {}", name, actual, format);

        Ok(Self {
            path: name,
            stream,
            resolution: actual,
            format,
            _device: device,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }
}

impl CaptureDevice for V4l2Camera {
    fn read_frame(&mut self) -> io::Result<RawFrame> {
        let (buf, meta) = self.stream.next()?;
        // Use bytes actually written, not the buffer size
        let used = (meta.bytesused as usize).min(buf.len());
        if used < MIN_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("short frame ({} bytes)", used),
            ));
        }
        Ok(RawFrame {
            data: Bytes::copy_from_slice(&buf[..used]),
            resolution: self.resolution,
            format: self.format,
        })
    }

    fn name(&self) -> String {
        self.path.clone()
    }
}
