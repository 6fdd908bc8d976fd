use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::ConfigStore;
use crate::control::{ControlRelay, RemapRegistry};
use crate::stream::MediaGateway;

/// Application-wide state shared across handlers
///
/// Media goes through `gateway` (frame sequences, audio subscriptions,
/// viewer registry); control input goes through `relay`.
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Frame and audio delivery to viewers
    pub gateway: MediaGateway,
    /// UDP relay to the remote receiver
    pub relay: Arc<ControlRelay>,
    /// Profiles with a remap in progress
    pub remaps: Arc<RemapRegistry>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        gateway: MediaGateway,
        relay: Arc<ControlRelay>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            gateway,
            relay,
            remaps: RemapRegistry::new(),
            shutdown_tx,
        })
    }

    /// Stop both acquisition loops
    pub async fn stop_sources(&self) {
        self.gateway.frames().stop().await;
        self.gateway.audio().stop().await;
    }
}
