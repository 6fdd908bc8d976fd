//! Video capture: V4L2 device, JPEG encoder and the latest-wins frame source

pub mod capture;
pub mod device;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod slot;
pub mod source;

pub use capture::{CaptureDevice, V4l2Camera};
pub use device::{enumerate_devices, VideoDeviceInfo};
pub use encoder::{FrameEncoder, JpegEncoder};
pub use format::{PixelFormat, Resolution};
pub use frame::{Frame, RawFrame};
pub use slot::{FrameReader, FrameSlot};
pub use source::{FrameSource, FrameSourceStats, SourceState};
