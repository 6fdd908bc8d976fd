//! Teleop Gateway - low-latency teleoperation relay
//!
//! Captures video and audio from a capture card, serves them to browser
//! viewers, and relays their gamepad input to a remote receiver as compact
//! UDP packets.

pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod input;
pub mod state;
pub mod stream;
pub mod utils;
pub mod video;
pub mod web;

pub use error::{AppError, Result};
