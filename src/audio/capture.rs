//! Audio source: ALSA capture loop broadcasting fixed-size PCM chunks

use alsa::pcm::{Access, Format, HwParams, State};
use alsa::{Direction, ValueOr, PCM};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::playback::pcm_to_f32;
use crate::config::AudioConfig;
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;

/// Back-off after a failed read
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);
/// Only the newest chunk is retained per subscriber
const BROADCAST_CAPACITY: usize = 1;

/// Sample layout of the chunks a source produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkFormat {
    pub sample_rate: u32,
    pub channels: u32,
    /// Frames per chunk
    pub chunk_size: u32,
}

impl ChunkFormat {
    /// Interleaved samples per chunk
    pub fn samples_per_chunk(&self) -> usize {
        (self.chunk_size * self.channels.max(1)) as usize
    }
}

impl From<&AudioConfig> for ChunkFormat {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            chunk_size: config.chunk_size,
        }
    }
}

/// One chunk of S16LE PCM
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Little-endian interleaved samples
    pub data: Bytes,
    pub sample_rate: u32,
    pub channels: u32,
    pub sequence: u64,
    pub timestamp: Instant,
}

impl AudioChunk {
    pub fn from_samples(samples: &[i16], format: ChunkFormat, sequence: u64) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            data: Bytes::from(data),
            sample_rate: format.sample_rate,
            channels: format.channels,
            sequence,
            timestamp: Instant::now(),
        }
    }

    /// Interleaved sample count
    pub fn samples(&self) -> usize {
        self.data.len() / 2
    }

    /// Samples as floats in [-1, 1)
    pub fn to_f32(&self) -> Vec<f32> {
        pcm_to_f32(&self.data)
    }
}

/// Blocking source of PCM samples
pub trait AudioDevice: Send {
    /// Fill `buf` completely; a partially filled buffer is an error
    fn read_chunk(&mut self, buf: &mut [i16]) -> Result<()>;

    fn name(&self) -> String;
}

/// ALSA capture PCM configured for S16 interleaved
pub struct AlsaCapture {
    name: String,
    pcm: PCM,
    channels: u32,
}

impl AlsaCapture {
    pub fn open(device: &str, format: ChunkFormat) -> Result<Self> {
        let pcm = PCM::new(device, Direction::Capture, false)
            .map_err(|e| AppError::device_unavailable(device, e))?;

        let unavailable = |what: &str, e: alsa::Error| {
            AppError::device_unavailable(device, format!("{}: {}", what, e))
        };
        {
            let hwp = HwParams::any(&pcm).map_err(|e| unavailable("no hw params", e))?;
            hwp.set_channels(format.channels)
                .map_err(|e| unavailable("channels", e))?;
            hwp.set_rate(format.sample_rate, ValueOr::Nearest)
                .map_err(|e| unavailable("sample rate", e))?;
            hwp.set_format(Format::s16())
                .map_err(|e| unavailable("sample format", e))?;
            hwp.set_access(Access::RWInterleaved)
                .map_err(|e| unavailable("access", e))?;
            hwp.set_period_size_near(format.chunk_size as alsa::pcm::Frames, ValueOr::Nearest)
                .map_err(|e| unavailable("period size", e))?;
            pcm.hw_params(&hwp)
                .map_err(|e| unavailable("hw params", e))?;
        }

        let actual_rate = pcm
            .hw_params_current()
            .and_then(|h| h.get_rate())
            .unwrap_or(format.sample_rate);
        if actual_rate != format.sample_rate {
            warn!(
                "Audio device {} runs at {}Hz (requested {}Hz)",
                device, actual_rate, format.sample_rate
            );
        }

        pcm.prepare().map_err(|e| unavailable("prepare", e))?;

        info!(
            "Opened audio device {} at {}Hz {}ch",
            device, actual_rate, format.channels
        );

        Ok(Self {
            name: device.to_string(),
            pcm,
            channels: format.channels.max(1),
        })
    }
}

impl AudioDevice for AlsaCapture {
    fn read_chunk(&mut self, buf: &mut [i16]) -> Result<()> {
        if matches!(self.pcm.state(), State::XRun | State::Suspended) {
            let _ = self.pcm.prepare();
        }

        let io = self
            .pcm
            .io_i16()
            .map_err(|e| AppError::AudioError(format!("PCM is not S16: {}", e)))?;

        let mut filled = 0;
        while filled < buf.len() {
            match io.readi(&mut buf[filled..]) {
                Ok(0) => continue,
                Ok(frames) => filled += frames * self.channels as usize,
                Err(e) => {
                    let err = AppError::AudioError(format!("Audio read failed: {}", e));
                    // Recover from overrun/suspend; the partial chunk is discarded
                    let _ = self.pcm.try_recover(e, true);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Audio source state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioState {
    Stopped,
    Running,
    Error,
}

/// Audio source counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioStats {
    pub chunks: u64,
    pub read_errors: u64,
}

/// Owns the audio input device and fans chunks out to all subscribers
pub struct AudioSource {
    chunk_tx: broadcast::Sender<AudioChunk>,
    format: Mutex<Option<ChunkFormat>>,
    state: Arc<watch::Sender<AudioState>>,
    state_rx: watch::Receiver<AudioState>,
    stats: Arc<Mutex<AudioStats>>,
    stop_flag: Arc<AtomicBool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Default for AudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource {
    pub fn new() -> Self {
        let (chunk_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, state_rx) = watch::channel(AudioState::Stopped);
        Self {
            chunk_tx,
            format: Mutex::new(None),
            state: Arc::new(state_tx),
            state_rx,
            stats: Arc::new(Mutex::new(AudioStats::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Open the configured ALSA device and start the capture loop
    ///
    /// On failure the state becomes `Error` and no loop runs.
    pub async fn start(&self, config: &AudioConfig) -> Result<()> {
        if self.is_running() {
            return Err(AppError::AudioError("Audio source already running".to_string()));
        }
        let result = self.open_and_start(config).await;
        if result.is_err() {
            let _ = self.state.send(AudioState::Error);
        }
        result
    }

    async fn open_and_start(&self, config: &AudioConfig) -> Result<()> {
        let format = ChunkFormat::from(config);
        if format.chunk_size == 0 {
            return Err(AppError::Config("Audio chunk size must be > 0".to_string()));
        }
        let device = config.device.clone();

        info!(
            "Starting audio source on {} at {}Hz {}ch, {} frames/chunk",
            device, format.sample_rate, format.channels, format.chunk_size
        );

        let capture = tokio::task::spawn_blocking(move || AlsaCapture::open(&device, format))
            .await
            .map_err(|e| AppError::AudioError(format!("Open task failed: {}", e)))??;

        self.start_with(Box::new(capture), format).await
    }

    /// Start the loop over an already opened device
    pub async fn start_with(&self, device: Box<dyn AudioDevice>, format: ChunkFormat) -> Result<()> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(AppError::AudioError("Audio source already running".to_string()));
        }

        self.stop_flag.store(false, Ordering::SeqCst);
        *self.format.lock() = Some(format);
        let _ = self.state.send(AudioState::Running);

        let chunk_tx = self.chunk_tx.clone();
        let stats = self.stats.clone();
        let stop_flag = self.stop_flag.clone();

        *handle = Some(tokio::task::spawn_blocking(move || {
            capture_loop(device, format, chunk_tx, stats, stop_flag);
        }));

        Ok(())
    }

    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            info!("Stopping audio source");
            if let Err(e) = handle.await {
                warn!("Audio capture task ended abnormally: {}", e);
            }
        }
        let _ = self.state.send(AudioState::Stopped);
    }

    /// Receive every chunk produced from now on
    ///
    /// A receiver that falls behind gets `Lagged` and resumes at the newest chunk.
    pub fn subscribe(&self) -> broadcast::Receiver<AudioChunk> {
        self.chunk_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.chunk_tx.receiver_count()
    }

    /// Format of the running capture, `None` until started
    pub fn format(&self) -> Option<ChunkFormat> {
        *self.format.lock()
    }

    pub fn state(&self) -> AudioState {
        *self.state_rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == AudioState::Running
    }

    pub fn stats(&self) -> AudioStats {
        self.stats.lock().clone()
    }
}

fn capture_loop(
    mut device: Box<dyn AudioDevice>,
    format: ChunkFormat,
    chunk_tx: broadcast::Sender<AudioChunk>,
    stats: Arc<Mutex<AudioStats>>,
    stop_flag: Arc<AtomicBool>,
) {
    let name = device.name();
    let throttler = LogThrottler::default();
    let mut buf = vec![0i16; format.samples_per_chunk()];
    let mut sequence = 0u64;

    info!("Audio capture started on {}", name);

    while !stop_flag.load(Ordering::Relaxed) {
        if let Err(e) = device.read_chunk(&mut buf) {
            stats.lock().read_errors += 1;
            crate::warn_throttled!(throttler, "read", "Audio read error on {}: {}", name, e);
            std::thread::sleep(READ_RETRY_DELAY);
            continue;
        }
        throttler.clear("read");

        sequence += 1;
        // No subscribers is not an error; the chunk is simply gone
        let _ = chunk_tx.send(AudioChunk::from_samples(&buf, format, sequence));
        stats.lock().chunks += 1;
    }

    debug!("Audio capture on {} stopped after {} chunks", name, sequence);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedAudio {
        script: VecDeque<Result<Vec<i16>>>,
    }

    impl AudioDevice for ScriptedAudio {
        fn read_chunk(&mut self, buf: &mut [i16]) -> Result<()> {
            match self.script.pop_front() {
                Some(Ok(samples)) => {
                    buf.copy_from_slice(&samples);
                    Ok(())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(Duration::from_millis(10));
                    Err(AppError::AudioError("drained".to_string()))
                }
            }
        }

        fn name(&self) -> String {
            "scripted".to_string()
        }
    }

    fn format(chunk_size: u32) -> ChunkFormat {
        ChunkFormat {
            sample_rate: 48000,
            channels: 1,
            chunk_size,
        }
    }

    #[tokio::test]
    async fn test_chunk_broadcast_to_all_subscribers() {
        let source = AudioSource::new();
        let mut a = source.subscribe();
        let mut b = source.subscribe();

        let device = ScriptedAudio {
            script: vec![Ok(vec![100, -100, 200, -200])].into(),
        };
        source.start_with(Box::new(device), format(4)).await.unwrap();

        for rx in [&mut a, &mut b] {
            let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(chunk.samples(), 4);
            assert_eq!(
                chunk.to_f32(),
                vec![100.0 / 32768.0, -100.0 / 32768.0, 200.0 / 32768.0, -200.0 / 32768.0]
            );
        }

        source.stop().await;
        assert_eq!(source.state(), AudioState::Stopped);
    }

    #[tokio::test]
    async fn test_read_error_is_not_forwarded() {
        let source = AudioSource::new();
        let mut rx = source.subscribe();

        let device = ScriptedAudio {
            script: vec![
                Err(AppError::AudioError("overrun".to_string())),
                Ok(vec![1, 2]),
            ]
            .into(),
        };
        source.start_with(Box::new(device), format(2)).await.unwrap();

        let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chunk.sequence, 1);
        assert_eq!(&chunk.data[..], &[1, 0, 2, 0]);
        assert!(source.stats().read_errors >= 1);

        source.stop().await;
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_to_newest() {
        let source = AudioSource::new();
        let mut rx = source.subscribe();

        let device = ScriptedAudio {
            script: vec![Ok(vec![1]), Ok(vec![2]), Ok(vec![3])].into(),
        };
        source.start_with(Box::new(device), format(1)).await.unwrap();

        // Let all three chunks go out before reading
        tokio::time::sleep(Duration::from_millis(100)).await;
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert_eq!(n, 2),
            other => panic!("expected lag, got {:?}", other.map(|c| c.sequence)),
        }
        assert_eq!(rx.recv().await.unwrap().sequence, 3);

        source.stop().await;
    }

    #[tokio::test]
    async fn test_missing_device_is_unavailable() {
        let source = AudioSource::new();
        let config = AudioConfig {
            device: "hw:97,0".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            source.start(&config).await,
            Err(AppError::DeviceUnavailable { .. })
        ));
        assert_eq!(source.state(), AudioState::Error);
        assert!(source.format().is_none());
    }

    #[test]
    fn test_rejected_layout_is_unavailable() {
        // Whether or not "default" exists here, zero channels never opens
        let format = ChunkFormat {
            sample_rate: 48000,
            channels: 0,
            chunk_size: 2048,
        };
        assert!(matches!(
            AlsaCapture::open("default", format),
            Err(AppError::DeviceUnavailable { .. })
        ));
    }
}
