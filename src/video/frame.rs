//! Raw and encoded frame types

use bytes::Bytes;
use std::time::{Duration, Instant};

use super::format::{PixelFormat, Resolution};

/// Frame as delivered by a capture device, before resize/encode
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub resolution: Resolution,
    pub format: PixelFormat,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, resolution: Resolution, format: PixelFormat) -> Self {
        Self {
            data: data.into(),
            resolution,
            format,
        }
    }
}

/// An encoded frame published by the frame source
///
/// Cloning is cheap: the JPEG payload is reference counted.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    /// Stream resolution
    pub resolution: Resolution,
    /// Publish generation, starting at 1 and increasing by one per publish
    pub sequence: u64,
    /// When the raw frame was read from the device
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(data: Bytes, resolution: Resolution, sequence: u64, captured_at: Instant) -> Self {
        Self {
            data,
            resolution,
            sequence,
            captured_at,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload as `Bytes` (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Time since capture
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}
