//! Per-viewer control session
//!
//! Decodes the JSON messages a viewer sends over its duplex channel, runs
//! raw gamepad snapshots through the profile's [`InputMapper`] and relays
//! the resulting samples. Transport-agnostic: the WebSocket handler feeds
//! text in and writes the returned replies out.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::relay::ControlRelay;
use crate::config::{ConfigChange, ConfigStore};
use crate::error::{AppError, Result};
use crate::input::{GamepadState, InputMapper, InputSample, Mapping, RemapTarget, TickOutcome};
use crate::utils::LogThrottler;

/// Messages a viewer may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// An already normalized sample
    Input(InputSample),
    /// A raw controller snapshot to normalize server-side
    Gamepad {
        #[serde(default)]
        axes: Vec<f64>,
        #[serde(default)]
        buttons: Vec<bool>,
        #[serde(default)]
        player: Option<u8>,
    },
    Remap {
        target: RemapTarget,
    },
    CancelRemap,
    ResetMapping,
    /// Toggle audio push for this viewer
    Audio {
        enabled: bool,
    },
}

/// Remap state as reported to the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapStatus {
    Idle,
    Listening,
    Bound,
    Cancelled,
}

/// Messages sent back to the viewer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Mapping {
        profile: String,
        mapping: Mapping,
    },
    Remap {
        status: RemapStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<RemapTarget>,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    Audio {
        enabled: bool,
    },
    Error {
        message: String,
    },
}

/// Profiles with a remap in progress, shared by every session and the HTTP API
#[derive(Debug, Default)]
pub struct RemapRegistry {
    listening: Mutex<HashMap<String, usize>>,
}

impl RemapRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_listening(&self, profile: &str) -> bool {
        self.listening.lock().contains_key(profile)
    }

    fn enter(&self, profile: &str) {
        *self.listening.lock().entry(profile.to_string()).or_insert(0) += 1;
    }

    fn leave(&self, profile: &str) {
        let mut listening = self.listening.lock();
        if let Some(count) = listening.get_mut(profile) {
            *count -= 1;
            if *count == 0 {
                listening.remove(profile);
            }
        }
    }

    fn check_idle(&self, profile: &str) -> Result<()> {
        if self.is_listening(profile) {
            return Err(AppError::BadRequest(format!(
                "Profile '{}' has a remap pending, cancel it first",
                profile
            )));
        }
        Ok(())
    }
}

/// Control state for one connected viewer
pub struct ControlSession {
    profile: String,
    player: u8,
    mapper: InputMapper,
    relay: Arc<ControlRelay>,
    store: ConfigStore,
    /// Latest raw snapshot, used as the baseline when a remap begins
    last_gamepad: GamepadState,
    /// Players this session has driven, released on close
    players: BTreeSet<u8>,
    audio_enabled: bool,
    remaps: Arc<RemapRegistry>,
    /// Whether this session currently counts in `remaps`
    registered: bool,
    throttler: LogThrottler,
}

impl ControlSession {
    /// Open a session, loading the saved mapping for `profile`
    pub async fn open(
        profile: impl Into<String>,
        player: u8,
        relay: Arc<ControlRelay>,
        store: ConfigStore,
        remaps: Arc<RemapRegistry>,
    ) -> Result<Self> {
        let profile = profile.into();
        let mapping = store.load_mapping(&profile).await?.unwrap_or_default();
        debug!("Control session opened for profile '{}'", profile);

        Ok(Self {
            profile,
            player,
            mapper: InputMapper::new(mapping),
            relay,
            store,
            last_gamepad: GamepadState::default(),
            players: BTreeSet::new(),
            audio_enabled: true,
            remaps,
            registered: false,
            throttler: LogThrottler::default(),
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn mapping(&self) -> &Mapping {
        self.mapper.mapping()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled
    }

    /// Current mapping, sent when the channel opens
    pub fn mapping_message(&self) -> ServerMessage {
        ServerMessage::Mapping {
            profile: self.profile.clone(),
            mapping: *self.mapper.mapping(),
        }
    }

    /// Handle one text frame; malformed input yields an error reply
    pub async fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                crate::warn_throttled!(
                    self.throttler,
                    "malformed",
                    "Malformed control message on profile '{}': {}",
                    self.profile,
                    e
                );
                return vec![ServerMessage::Error {
                    message: format!("Malformed message: {}", e),
                }];
            }
        };

        match self.handle(message).await {
            Ok(replies) => replies,
            Err(e) => vec![ServerMessage::Error {
                message: e.to_string(),
            }],
        }
    }

    pub async fn handle(&mut self, message: ClientMessage) -> Result<Vec<ServerMessage>> {
        let result = self.dispatch(message).await;
        self.sync_remap_registration();
        result
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<Vec<ServerMessage>> {
        match message {
            ClientMessage::Input(sample) => {
                self.relay.send(&sample)?;
                self.players.insert(sample.player);
                Ok(vec![])
            }
            ClientMessage::Gamepad {
                axes,
                buttons,
                player,
            } => {
                self.last_gamepad = GamepadState { axes, buttons };
                let player = player.unwrap_or(self.player);
                self.on_gamepad(player).await
            }
            ClientMessage::Remap { target } => {
                self.mapper.begin_remap(target, &self.last_gamepad)?;
                info!("Profile '{}' listening for {:?}", self.profile, target);
                Ok(vec![ServerMessage::Remap {
                    status: RemapStatus::Listening,
                    target: Some(target),
                    index: None,
                }])
            }
            ClientMessage::CancelRemap => {
                let status = if self.mapper.cancel_remap() {
                    RemapStatus::Cancelled
                } else {
                    RemapStatus::Idle
                };
                Ok(vec![ServerMessage::Remap {
                    status,
                    target: None,
                    index: None,
                }])
            }
            ClientMessage::ResetMapping => {
                self.remaps.check_idle(&self.profile)?;
                self.mapper.reset_to_defaults()?;
                self.store.save_mapping(&self.profile, self.mapper.mapping()).await?;
                info!("Profile '{}' mapping reset to defaults", self.profile);
                Ok(vec![self.mapping_message()])
            }
            ClientMessage::Audio { enabled } => {
                self.audio_enabled = enabled;
                Ok(vec![ServerMessage::Audio { enabled }])
            }
        }
    }

    async fn on_gamepad(&mut self, player: u8) -> Result<Vec<ServerMessage>> {
        match self.mapper.tick(&self.last_gamepad, player) {
            TickOutcome::Sample(sample) => {
                self.relay.send(&sample)?;
                self.players.insert(sample.player);
                Ok(vec![])
            }
            TickOutcome::Listening => Ok(vec![]),
            TickOutcome::Bound { target, index } => {
                self.store.save_mapping(&self.profile, self.mapper.mapping()).await?;
                info!(
                    "Profile '{}': {:?} bound to physical index {}",
                    self.profile, target, index
                );
                Ok(vec![
                    ServerMessage::Remap {
                        status: RemapStatus::Bound,
                        target: Some(target),
                        index: Some(index),
                    },
                    self.mapping_message(),
                ])
            }
        }
    }

    fn sync_remap_registration(&mut self) {
        let listening = self.mapper.is_listening();
        if listening && !self.registered {
            self.remaps.enter(&self.profile);
        } else if !listening && self.registered {
            self.remaps.leave(&self.profile);
        }
        self.registered = listening;
    }

    /// Pick up a mapping another session or the HTTP API stored for this profile
    ///
    /// Returns the new mapping message when the stored mapping differs from
    /// the one in use; changes to other keys are ignored.
    pub async fn apply_change(&mut self, change: &ConfigChange) -> Result<Vec<ServerMessage>> {
        if !change.is_mapping_of(&self.profile) {
            return Ok(vec![]);
        }
        self.reload_mapping().await
    }

    /// Re-read the stored mapping, used when change events were missed
    pub async fn reload_mapping(&mut self) -> Result<Vec<ServerMessage>> {
        let stored = self
            .store
            .load_mapping(&self.profile)
            .await?
            .unwrap_or_default();
        if stored == *self.mapper.mapping() {
            return Ok(vec![]);
        }
        debug!("Profile '{}' mapping changed elsewhere, reloading", self.profile);
        self.mapper.replace_mapping(stored);
        Ok(vec![self.mapping_message()])
    }

    /// Release every player this session drove
    pub async fn close(self) {
        for player in &self.players {
            self.relay.release(*player);
        }
        debug!("Control session for profile '{}' closed", self.profile);
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        if self.registered {
            self.remaps.leave(&self.profile);
        }
    }
}

/// Reset a stored profile to the default mapping
///
/// Rejected while any session is remapping the profile.
pub async fn reset_profile(
    store: &ConfigStore,
    remaps: &RemapRegistry,
    profile: &str,
) -> Result<Mapping> {
    if profile.is_empty() {
        return Err(AppError::BadRequest("Empty profile name".to_string()));
    }
    remaps.check_idle(profile)?;
    let mapping = Mapping::default();
    store.save_mapping(profile, &mapping).await?;
    Ok(mapping)
}

/// Forget a stored profile so it falls back to the default mapping
pub async fn delete_profile(
    store: &ConfigStore,
    remaps: &RemapRegistry,
    profile: &str,
) -> Result<()> {
    remaps.check_idle(profile)?;
    if !store.delete_mapping(profile).await? {
        return Err(AppError::NotFound(format!(
            "No stored mapping for profile '{}'",
            profile
        )));
    }
    Ok(())
}
