//! Registry of connected MJPEG viewers and their delivery stats

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Viewer ID type (UUID string unless the client supplied one)
pub type ViewerId = String;

/// Rolling window FPS calculator
#[derive(Debug, Clone)]
pub struct FpsCalculator {
    frame_times: VecDeque<Instant>,
    window: Duration,
}

impl FpsCalculator {
    /// 1-second window
    pub fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(120),
            window: Duration::from_secs(1),
        }
    }

    pub fn record_frame(&mut self) {
        self.record_frame_at(Instant::now());
    }

    fn record_frame_at(&mut self, now: Instant) {
        self.frame_times.push_back(now);
        while let Some(&oldest) = self.frame_times.front() {
            if now.duration_since(oldest) > self.window {
                self.frame_times.pop_front();
            } else {
                break;
            }
        }
    }

    /// Frames recorded in the last window
    pub fn current_fps(&self) -> u32 {
        self.frame_times.len() as u32
    }
}

impl Default for FpsCalculator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct ViewerSession {
    connected_at: Instant,
    frames_sent: u64,
    fps: FpsCalculator,
}

/// Per-viewer statistics exposed over the status API
#[derive(Debug, Clone, Serialize)]
pub struct ViewerStats {
    pub id: ViewerId,
    pub frames_sent: u64,
    pub fps: u32,
    pub connected_secs: u64,
}

/// Tracks connected viewers
#[derive(Default)]
pub struct ViewerRegistry {
    viewers: RwLock<HashMap<ViewerId, ViewerSession>>,
}

impl ViewerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.viewers.read().len()
    }

    fn register(&self, id: &str) {
        let count = {
            let mut viewers = self.viewers.write();
            viewers.insert(
                id.to_string(),
                ViewerSession {
                    connected_at: Instant::now(),
                    frames_sent: 0,
                    fps: FpsCalculator::new(),
                },
            );
            viewers.len()
        };
        info!("Viewer {} connected (total: {})", id, count);
    }

    fn unregister(&self, id: &str) {
        if let Some(session) = self.viewers.write().remove(id) {
            let secs = session.connected_at.elapsed().as_secs_f32();
            let avg_fps = if secs > 0.1 {
                session.frames_sent as f32 / secs
            } else {
                0.0
            };
            info!(
                "Viewer {} disconnected after {:.1}s ({} frames, {:.1} avg FPS)",
                id, secs, session.frames_sent, avg_fps
            );
        }
    }

    /// Record one frame handed to the viewer's transport
    pub fn record_frame_sent(&self, id: &str) {
        if let Some(session) = self.viewers.write().get_mut(id) {
            session.frames_sent += 1;
            session.fps.record_frame();
        }
    }

    pub fn stats(&self) -> Vec<ViewerStats> {
        let mut stats: Vec<_> = self
            .viewers
            .read()
            .iter()
            .map(|(id, session)| ViewerStats {
                id: id.clone(),
                frames_sent: session.frames_sent,
                fps: session.fps.current_fps(),
                connected_secs: session.connected_at.elapsed().as_secs(),
            })
            .collect();
        stats.sort_by(|a, b| a.id.cmp(&b.id));
        stats
    }
}

/// Registers a viewer for its lifetime, including on abrupt disconnect
pub struct ViewerGuard {
    id: ViewerId,
    registry: Arc<ViewerRegistry>,
}

impl ViewerGuard {
    pub fn new(id: ViewerId, registry: Arc<ViewerRegistry>) -> Self {
        registry.register(&id);
        Self { id, registry }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_window() {
        let mut calc = FpsCalculator::new();
        assert_eq!(calc.current_fps(), 0);

        let start = Instant::now();
        for i in 0..30 {
            calc.record_frame_at(start + Duration::from_millis(i * 10));
        }
        assert_eq!(calc.current_fps(), 30);

        // Two seconds later only the newest frame is inside the window
        calc.record_frame_at(start + Duration::from_secs(2));
        assert_eq!(calc.current_fps(), 1);
    }

    #[test]
    fn test_guard_lifecycle() {
        let registry = ViewerRegistry::new();
        {
            let guard = ViewerGuard::new("viewer-a".to_string(), registry.clone());
            registry.record_frame_sent(guard.id());
            registry.record_frame_sent(guard.id());
            let _other = ViewerGuard::new("viewer-b".to_string(), registry.clone());

            let stats = registry.stats();
            assert_eq!(stats.len(), 2);
            assert_eq!(stats[0].id, "viewer-a");
            assert_eq!(stats[0].frames_sent, 2);
            assert_eq!(stats[1].frames_sent, 0);
        }
        assert_eq!(registry.count(), 0);
    }
}
