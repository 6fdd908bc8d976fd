//! Viewer-side playback contract
//!
//! Chunks are pushed as little-endian S16 PCM. A player converts each chunk
//! to floats in [-1, 1) and schedules it back to back, never earlier than a
//! small guard interval ahead of its clock. When the schedule has fallen
//! behind (network stall) it jumps forward instead of queueing a backlog.

/// Lead time added to "now" when the schedule has fallen behind, in seconds
pub const GUARD_INTERVAL_SECS: f64 = 0.02;

/// Convert little-endian S16 PCM to floats by dividing by 32768
///
/// A trailing odd byte is ignored.
pub fn pcm_to_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Gapless jitter-buffer scheduling of consecutive chunks
#[derive(Debug, Clone)]
pub struct PlaybackScheduler {
    sample_rate: u32,
    channels: u32,
    guard: f64,
    next_start: f64,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32, channels: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            guard: GUARD_INTERVAL_SECS,
            next_start: 0.0,
        }
    }

    pub fn with_guard(mut self, guard_secs: f64) -> Self {
        self.guard = guard_secs.max(0.0);
        self
    }

    /// Duration of a chunk holding `samples` interleaved samples
    pub fn chunk_duration(&self, samples: usize) -> f64 {
        samples as f64 / self.channels as f64 / self.sample_rate as f64
    }

    /// Start time for the next chunk given the player clock `now`
    ///
    /// Returns `max(next_start, now + guard)` and advances `next_start` by
    /// the chunk's duration.
    pub fn schedule(&mut self, now: f64, samples: usize) -> f64 {
        let start = self.next_start.max(now + self.guard);
        self.next_start = start + self.chunk_duration(samples);
        start
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }
}
