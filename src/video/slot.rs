//! Single-slot, latest-wins frame buffer
//!
//! The acquisition loop is the only writer. Every publish replaces the
//! previous frame and wakes all waiting readers at once; a reader that was
//! busy simply skips whatever it missed.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use super::frame::Frame;

#[derive(Default)]
struct SlotInner {
    frame: Option<Frame>,
    generation: u64,
}

/// Latest-wins frame store shared by the source and its readers
#[derive(Default)]
pub struct FrameSlot {
    inner: Mutex<SlotInner>,
    ready: Notify,
}

impl FrameSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the current frame and release every waiting reader
    ///
    /// Returns the new generation.
    pub fn publish(&self, frame: Frame) -> u64 {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.frame = Some(frame);
            inner.generation
        };
        self.ready.notify_waiters();
        generation
    }

    /// Current frame without waiting
    pub fn current(&self) -> Option<Frame> {
        self.inner.lock().frame.clone()
    }

    /// Number of frames published so far
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    fn newer_than(&self, seen: u64) -> Option<(u64, Frame)> {
        let inner = self.inner.lock();
        if inner.generation > seen {
            inner.frame.clone().map(|frame| (inner.generation, frame))
        } else {
            None
        }
    }

    /// Create a reader that has seen nothing yet
    pub fn reader(self: &Arc<Self>) -> FrameReader {
        FrameReader {
            slot: Arc::clone(self),
            last_seen: 0,
        }
    }
}

/// One consumer's view of a [`FrameSlot`]
pub struct FrameReader {
    slot: Arc<FrameSlot>,
    last_seen: u64,
}

impl FrameReader {
    /// Wait for a frame newer than the last one this reader returned
    ///
    /// Returns `None` when `timeout` elapses first.
    pub async fn latest(&mut self, timeout: Duration) -> Option<Frame> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a publish in between is not lost
            let notified = self.slot.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some((generation, frame)) = self.slot.newer_than(self.last_seen) {
                self.last_seen = generation;
                return Some(frame);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Generation of the last frame returned
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }
}
