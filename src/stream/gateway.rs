//! Media gateway: per-viewer frame delivery and audio fan-out

use bytes::{BufMut, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::viewers::{ViewerGuard, ViewerId, ViewerRegistry};
use crate::audio::{AudioChunk, AudioSource};
use crate::video::{Frame, FrameSource};

/// Multipart boundary used by the MJPEG endpoint
pub const MJPEG_BOUNDARY: &str = "frame";

/// Connects viewers to the frame and audio sources
pub struct MediaGateway {
    frames: Arc<FrameSource>,
    audio: Arc<AudioSource>,
    viewers: Arc<ViewerRegistry>,
    shutdown_tx: broadcast::Sender<()>,
}

impl MediaGateway {
    pub fn new(
        frames: Arc<FrameSource>,
        audio: Arc<AudioSource>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            frames,
            audio,
            viewers: ViewerRegistry::new(),
            shutdown_tx,
        }
    }

    pub fn frames(&self) -> &Arc<FrameSource> {
        &self.frames
    }

    pub fn audio(&self) -> &Arc<AudioSource> {
        &self.audio
    }

    pub fn viewers(&self) -> &Arc<ViewerRegistry> {
        &self.viewers
    }

    /// Endless sequence of the newest frames for one viewer
    ///
    /// A timeout just means no new frame this tick; the sequence only ends on
    /// gateway shutdown or when the consumer drops it. Frames published while
    /// the consumer was busy are skipped.
    pub fn serve_frames(&self, timeout_per_frame: Duration) -> impl Stream<Item = Frame> + Send + 'static {
        let mut reader = self.frames.reader();
        let mut shutdown = self.shutdown_tx.subscribe();

        async_stream::stream! {
            loop {
                let next = tokio::select! {
                    _ = shutdown.recv() => None,
                    frame = reader.latest(timeout_per_frame) => Some(frame),
                };
                match next {
                    None => break,
                    Some(Some(frame)) => yield frame,
                    Some(None) => continue,
                }
            }
        }
    }

    /// Multipart body stream for one MJPEG viewer
    ///
    /// The viewer is registered for as long as the stream is alive.
    pub fn mjpeg_stream(
        &self,
        viewer_id: ViewerId,
        timeout_per_frame: Duration,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let guard = ViewerGuard::new(viewer_id, self.viewers.clone());
        let registry = self.viewers.clone();
        let frames = self.serve_frames(timeout_per_frame);

        async_stream::stream! {
            let guard = guard;
            futures::pin_mut!(frames);
            while let Some(frame) = frames.next().await {
                yield Ok(create_mjpeg_part(frame.data()));
                // Counted once the part has been handed to the transport
                registry.record_frame_sent(guard.id());
            }
        }
    }

    /// Receive audio chunks pushed from now on
    pub fn subscribe_audio(&self) -> broadcast::Receiver<AudioChunk> {
        self.audio.subscribe()
    }

    /// Receiver that fires when the gateway shuts down
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// End every frame sequence and viewer session
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// One multipart part carrying a JPEG
pub fn create_mjpeg_part(jpeg_data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + jpeg_data.len());

    buf.put_slice(b"--");
    buf.put_slice(MJPEG_BOUNDARY.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Content-Type: image/jpeg\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n", jpeg_data.len()).as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(jpeg_data);
    buf.put_slice(b"\r\n");

    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::video::{CaptureDevice, FrameEncoder, PixelFormat, RawFrame, Resolution};
    use std::io;
    use std::sync::mpsc;

    /// Delivers whatever the test pushes; times out otherwise
    struct ChannelDevice(mpsc::Receiver<u8>);

    impl CaptureDevice for ChannelDevice {
        fn read_frame(&mut self) -> io::Result<RawFrame> {
            match self.0.recv_timeout(Duration::from_millis(20)) {
                Ok(byte) => Ok(RawFrame::new(
                    vec![byte; 8],
                    Resolution::new(2, 2),
                    PixelFormat::Mjpeg,
                )),
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
            }
        }

        fn name(&self) -> String {
            "channel".to_string()
        }
    }

    struct Passthrough;

    impl FrameEncoder for Passthrough {
        fn encode(&mut self, raw: &RawFrame) -> Result<Bytes> {
            Ok(raw.data.clone())
        }

        fn resolution(&self) -> Resolution {
            Resolution::new(2, 2)
        }
    }

    async fn gateway() -> (MediaGateway, mpsc::Sender<u8>) {
        let (tx, rx) = mpsc::channel();
        let frames = Arc::new(FrameSource::new());
        frames
            .start_with(Box::new(ChannelDevice(rx)), Box::new(Passthrough))
            .await
            .unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);
        let gateway = MediaGateway::new(frames, Arc::new(AudioSource::new()), shutdown_tx);
        (gateway, tx)
    }

    #[tokio::test]
    async fn test_serve_frames_survives_timeouts() {
        let (gateway, tx) = gateway().await;
        let frames = gateway.serve_frames(Duration::from_millis(20));
        futures::pin_mut!(frames);

        // Several per-frame timeouts pass without ending the sequence
        assert!(tokio::time::timeout(Duration::from_millis(100), frames.next())
            .await
            .is_err());

        tx.send(7).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), frames.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.data()[0], 7);

        gateway.frames().stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_ends_streams() {
        let (gateway, _tx) = gateway().await;
        let body = gateway.mjpeg_stream("viewer-1".to_string(), Duration::from_millis(20));
        futures::pin_mut!(body);

        let gateway_viewers = gateway.viewers().clone();
        assert_eq!(gateway_viewers.count(), 1);

        gateway.shutdown();
        let end = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap();
        assert!(end.is_none());

        gateway.frames().stop().await;
    }

    #[tokio::test]
    async fn test_mjpeg_stream_counts_frames() {
        let (gateway, tx) = gateway().await;
        let body = gateway.mjpeg_stream("viewer-2".to_string(), Duration::from_millis(50));
        futures::pin_mut!(body);

        tx.send(1).unwrap();
        let part = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(part.starts_with(b"--frame\r\n"));

        tx.send(2).unwrap();
        tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap();
        assert_eq!(gateway.viewers().stats()[0].frames_sent, 1);

        gateway.frames().stop().await;
    }

    #[test]
    fn test_mjpeg_part_layout() {
        let part = create_mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let mut expected =
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n".to_vec();
        expected.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(&part[..], &expected[..]);
    }
}
