//! Viewer-facing media delivery

pub mod gateway;
pub mod viewers;

pub use gateway::{create_mjpeg_part, MediaGateway, MJPEG_BOUNDARY};
pub use viewers::{FpsCalculator, ViewerGuard, ViewerId, ViewerRegistry, ViewerStats};
