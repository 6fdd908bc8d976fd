//! Audio capture and push fan-out
//!
//! The source reads fixed-size S16 chunks from ALSA on a blocking thread and
//! broadcasts each one; [`playback`] holds the viewer-side conversion and
//! scheduling rules.

pub mod capture;
pub mod device;
pub mod playback;

pub use capture::{
    AlsaCapture, AudioChunk, AudioDevice, AudioSource, AudioState, AudioStats, ChunkFormat,
};
pub use device::{enumerate_audio_devices, AudioDeviceInfo};
pub use playback::{pcm_to_f32, PlaybackScheduler, GUARD_INTERVAL_SECS};
