//! Frame source: owns the capture device and runs the acquisition loop
//!
//! read -> resize/encode -> publish into the [`FrameSlot`] -> short yield.
//! The loop runs on a blocking thread and only ends on `stop()`.

use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::capture::{CaptureDevice, V4l2Camera};
use super::encoder::{FrameEncoder, JpegEncoder};
use super::format::Resolution;
use super::frame::Frame;
use super::slot::{FrameReader, FrameSlot};
use crate::config::VideoConfig;
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;

/// Back-off after a failed device read
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Pause after each publish so the loop never spins
const FRAME_YIELD: Duration = Duration::from_millis(5);
/// Driver-side read timeout
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Acquisition state shared by the frame and audio sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Stopped,
    Running,
    /// Device open but not delivering (e.g. HDMI cable unplugged)
    NoSignal,
    Error,
}

/// Frame source counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameSourceStats {
    pub frames: u64,
    pub read_errors: u64,
    pub encode_errors: u64,
    pub current_fps: f32,
}

/// Owns the capture device and publishes the latest encoded frame
pub struct FrameSource {
    slot: Arc<FrameSlot>,
    state: Arc<watch::Sender<SourceState>>,
    state_rx: watch::Receiver<SourceState>,
    stats: Arc<Mutex<FrameSourceStats>>,
    stop_flag: Arc<AtomicBool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Default for FrameSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(SourceState::Stopped);
        Self {
            slot: FrameSlot::new(),
            state: Arc::new(state_tx),
            state_rx,
            stats: Arc::new(Mutex::new(FrameSourceStats::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Open the configured V4L2 device and start acquiring
    ///
    /// Fails with `DeviceUnavailable` if the device cannot be opened; the
    /// source then stays stopped.
    pub async fn start(&self, config: &VideoConfig) -> Result<()> {
        if matches!(self.state(), SourceState::Running | SourceState::NoSignal) {
            return Err(AppError::VideoError("Frame source already running".to_string()));
        }
        let result = self.open_and_start(config).await;
        if result.is_err() {
            let _ = self.state.send(SourceState::Error);
        }
        result
    }

    async fn open_and_start(&self, config: &VideoConfig) -> Result<()> {
        let target = Resolution::new(config.width, config.height);
        let path = config.device_path();
        let fps = config.fps;

        info!(
            "Starting frame source on {} -> {} q{} @{}fps",
            path.display(),
            target,
            config.effective_quality(),
            fps
        );

        let camera = tokio::task::spawn_blocking(move || {
            V4l2Camera::open(&path, target, fps, READ_TIMEOUT)
        })
        .await
        .map_err(|e| AppError::VideoError(format!("Open task failed: {}", e)))??;

        if camera.resolution() != target {
            info!(
                "Device delivers {} {}, rescaling to {}",
                camera.resolution(),
                camera.format(),
                target
            );
        }

        let encoder = JpegEncoder::new(target, config.effective_quality())?;

        self.start_with(Box::new(camera), Box::new(encoder)).await
    }

    /// Start the loop over an already opened device
    pub async fn start_with(
        &self,
        device: Box<dyn CaptureDevice>,
        encoder: Box<dyn FrameEncoder>,
    ) -> Result<()> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(AppError::VideoError("Frame source already running".to_string()));
        }

        self.stop_flag.store(false, Ordering::SeqCst);
        *self.stats.lock() = FrameSourceStats::default();
        let _ = self.state.send(SourceState::Running);

        let ctx = LoopContext {
            slot: self.slot.clone(),
            state: self.state.clone(),
            stats: self.stats.clone(),
            stop_flag: self.stop_flag.clone(),
        };

        *handle = Some(tokio::task::spawn_blocking(move || {
            acquisition_loop(ctx, device, encoder);
        }));

        Ok(())
    }

    /// Ask the loop to stop and wait for it
    ///
    /// An in-flight device read is not interrupted; the loop exits after it.
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            info!("Stopping frame source");
            if let Err(e) = handle.await {
                warn!("Frame acquisition task ended abnormally: {}", e);
            }
        }
        let _ = self.state.send(SourceState::Stopped);
    }

    /// A fresh reader over the latest-frame slot
    pub fn reader(&self) -> FrameReader {
        self.slot.reader()
    }

    /// Most recent frame, without waiting
    pub fn current(&self) -> Option<Frame> {
        self.slot.current()
    }

    pub fn state(&self) -> SourceState {
        *self.state_rx.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<SourceState> {
        self.state_rx.clone()
    }

    pub fn stats(&self) -> FrameSourceStats {
        self.stats.lock().clone()
    }
}

struct LoopContext {
    slot: Arc<FrameSlot>,
    state: Arc<watch::Sender<SourceState>>,
    stats: Arc<Mutex<FrameSourceStats>>,
    stop_flag: Arc<AtomicBool>,
}

fn acquisition_loop(
    ctx: LoopContext,
    mut device: Box<dyn CaptureDevice>,
    mut encoder: Box<dyn FrameEncoder>,
) {
    let name = device.name();
    let throttler = LogThrottler::default();
    let mut sequence = 0u64;
    let mut fps_frames = 0u64;
    let mut fps_window_start = Instant::now();

    info!("Frame acquisition started on {}", name);

    while !ctx.stop_flag.load(Ordering::Relaxed) {
        let raw = match device.read_frame() {
            Ok(raw) => raw,
            Err(e) => {
                ctx.stats.lock().read_errors += 1;
                if e.kind() == io::ErrorKind::TimedOut {
                    ctx.state.send_if_modified(|s| replace_state(s, SourceState::NoSignal));
                    crate::warn_throttled!(throttler, "timeout", "Capture timeout on {} - no signal?", name);
                } else {
                    crate::warn_throttled!(throttler, "read", "Capture read failed on {}: {}", name, e);
                }
                std::thread::sleep(READ_RETRY_DELAY);
                continue;
            }
        };
        let captured_at = Instant::now();
        throttler.clear("timeout");
        throttler.clear("read");

        let data = match encoder.encode(&raw) {
            Ok(data) => data,
            Err(e) => {
                ctx.stats.lock().encode_errors += 1;
                crate::error_throttled!(throttler, "encode", "Frame encode failed: {}", e);
                continue;
            }
        };

        sequence += 1;
        ctx.slot
            .publish(Frame::new(data, encoder.resolution(), sequence, captured_at));
        ctx.state.send_if_modified(|s| replace_state(s, SourceState::Running));

        {
            let mut stats = ctx.stats.lock();
            stats.frames += 1;
            fps_frames += 1;
            let elapsed = fps_window_start.elapsed();
            if elapsed >= Duration::from_secs(1) {
                stats.current_fps = fps_frames as f32 / elapsed.as_secs_f32();
                fps_frames = 0;
                fps_window_start = Instant::now();
            }
        }

        std::thread::sleep(FRAME_YIELD);
    }

    debug!("Frame acquisition on {} stopped after {} frames", name, sequence);
}

fn replace_state(current: &mut SourceState, next: SourceState) -> bool {
    if *current == next {
        false
    } else {
        *current = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::format::PixelFormat;
    use crate::video::frame::RawFrame;
    use bytes::Bytes;
    use std::collections::VecDeque;

    /// Replays a script, then reports timeouts
    struct ScriptedDevice {
        script: VecDeque<io::Result<RawFrame>>,
    }

    impl CaptureDevice for ScriptedDevice {
        fn read_frame(&mut self) -> io::Result<RawFrame> {
            match self.script.pop_front() {
                Some(item) => item,
                None => {
                    std::thread::sleep(Duration::from_millis(10));
                    Err(io::Error::new(io::ErrorKind::TimedOut, "timeout"))
                }
            }
        }

        fn name(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Passes the payload through, failing on payloads starting with 0xEE
    struct PassthroughEncoder;

    impl FrameEncoder for PassthroughEncoder {
        fn encode(&mut self, raw: &RawFrame) -> Result<Bytes> {
            if raw.data.first() == Some(&0xEE) {
                return Err(AppError::VideoError("bad frame".to_string()));
            }
            Ok(raw.data.clone())
        }

        fn resolution(&self) -> Resolution {
            Resolution::new(8, 8)
        }
    }

    fn raw(byte: u8) -> io::Result<RawFrame> {
        Ok(RawFrame::new(
            vec![byte; 16],
            Resolution::new(8, 8),
            PixelFormat::Mjpeg,
        ))
    }

    fn scripted(items: Vec<io::Result<RawFrame>>) -> Box<dyn CaptureDevice> {
        Box::new(ScriptedDevice {
            script: items.into(),
        })
    }

    #[tokio::test]
    async fn test_loop_survives_read_and_encode_errors() {
        let source = FrameSource::new();
        let mut reader = source.reader();
        source
            .start_with(
                scripted(vec![
                    raw(1),
                    Err(io::Error::new(io::ErrorKind::Other, "dqbuf failed")),
                    raw(0xEE),
                    raw(2),
                ]),
                Box::new(PassthroughEncoder),
            )
            .await
            .unwrap();

        let mut last = None;
        while let Some(frame) = reader.latest(Duration::from_secs(2)).await {
            let done = frame.data()[0] == 2;
            last = Some(frame);
            if done {
                break;
            }
        }
        let last = last.unwrap();
        assert_eq!(last.data()[0], 2);
        assert_eq!(last.sequence, 2);

        let stats = source.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.encode_errors, 1);
        assert!(stats.read_errors >= 1);

        source.stop().await;
        assert_eq!(source.state(), SourceState::Stopped);
    }

    #[tokio::test]
    async fn test_timeouts_report_no_signal() {
        let source = FrameSource::new();
        let mut state = source.state_watch();
        source
            .start_with(scripted(vec![]), Box::new(PassthroughEncoder))
            .await
            .unwrap();

        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == SourceState::NoSignal),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(source.current().is_none());

        source.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let source = FrameSource::new();
        source
            .start_with(scripted(vec![]), Box::new(PassthroughEncoder))
            .await
            .unwrap();
        assert!(source
            .start_with(scripted(vec![]), Box::new(PassthroughEncoder))
            .await
            .is_err());

        // A refused restart leaves the running state alone
        assert!(source.start(&VideoConfig::default()).await.is_err());
        assert_ne!(source.state(), SourceState::Error);
        source.stop().await;
    }

    #[tokio::test]
    async fn test_missing_device_is_unavailable() {
        let source = FrameSource::new();
        let config = VideoConfig {
            device: "/nonexistent/video99".to_string(),
            ..Default::default()
        };
        match source.start(&config).await {
            Err(AppError::DeviceUnavailable { device, .. }) => {
                assert_eq!(device, "/nonexistent/video99")
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(source.state(), SourceState::Error);

        // The failure is not sticky: a working device still starts
        source
            .start_with(scripted(vec![raw(1)]), Box::new(PassthroughEncoder))
            .await
            .unwrap();
        assert_ne!(source.state(), SourceState::Error);
        source.stop().await;
        assert_eq!(source.state(), SourceState::Stopped);
    }
}
