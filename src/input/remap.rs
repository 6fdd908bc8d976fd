//! Per-viewer input mapper with the remap state machine

use super::normalize::sample_from_state;
use super::types::{GamepadState, InputSample, Mapping, RemapTarget};
use crate::error::{AppError, Result};

/// Minimum axis travel away from the baseline that counts as "moved"
pub const AXIS_REMAP_THRESHOLD: f64 = 0.5;

/// Remap state
#[derive(Debug, Clone, PartialEq)]
pub enum RemapState {
    Idle,
    Listening {
        target: RemapTarget,
        /// Controller snapshot taken when listening began
        baseline: GamepadState,
    },
}

/// Result of feeding one controller snapshot to the mapper
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Normal operation: a sample ready to relay
    Sample(InputSample),
    /// Listening, nothing has moved enough yet
    Listening,
    /// A physical index was bound; the caller should persist the mapping
    Bound { target: RemapTarget, index: usize },
}

/// Turns raw controller snapshots into samples and owns the mapping for one profile
#[derive(Debug, Clone)]
pub struct InputMapper {
    mapping: Mapping,
    state: RemapState,
}

impl Default for InputMapper {
    fn default() -> Self {
        Self::new(Mapping::default())
    }
}

impl InputMapper {
    pub fn new(mapping: Mapping) -> Self {
        Self {
            mapping,
            state: RemapState::Idle,
        }
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    /// Swap in a mapping saved elsewhere; a pending remap stays pending
    pub fn replace_mapping(&mut self, mapping: Mapping) {
        self.mapping = mapping;
    }

    pub fn state(&self) -> &RemapState {
        &self.state
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.state, RemapState::Listening { .. })
    }

    /// Start listening for `target`, snapshotting `current` as the baseline
    ///
    /// Starting a new remap while one is pending replaces it.
    pub fn begin_remap(&mut self, target: RemapTarget, current: &GamepadState) -> Result<()> {
        target.validate()?;
        self.state = RemapState::Listening {
            target,
            baseline: current.clone(),
        };
        Ok(())
    }

    /// Abandon a pending remap; returns whether one was pending
    pub fn cancel_remap(&mut self) -> bool {
        let was_listening = self.is_listening();
        self.state = RemapState::Idle;
        was_listening
    }

    /// Restore default axis and button maps (only while idle)
    pub fn reset_to_defaults(&mut self) -> Result<()> {
        if self.is_listening() {
            return Err(AppError::BadRequest(
                "Cannot reset mapping while a remap is pending".to_string(),
            ));
        }
        self.mapping = Mapping::default();
        Ok(())
    }

    /// Feed one controller snapshot
    pub fn tick(&mut self, current: &GamepadState, player: u8) -> TickOutcome {
        let (target, baseline) = match &self.state {
            RemapState::Idle => {
                return TickOutcome::Sample(sample_from_state(&self.mapping, current, player))
            }
            RemapState::Listening { target, baseline } => (*target, baseline),
        };

        let found = match target {
            RemapTarget::Axis(_) => current
                .axes
                .iter()
                .enumerate()
                .find(|(i, v)| (**v - baseline.axis(*i)).abs() > AXIS_REMAP_THRESHOLD)
                .map(|(i, _)| i),
            RemapTarget::Button(_) => current
                .buttons
                .iter()
                .enumerate()
                .find(|(i, pressed)| **pressed && !baseline.pressed(*i))
                .map(|(i, _)| i),
        };

        let Some(index) = found else {
            return TickOutcome::Listening;
        };

        match target {
            RemapTarget::Axis(axis) => self.mapping.axes.set(axis, index),
            RemapTarget::Button(bit) => {
                // Target was validated in begin_remap
                if let Err(e) = self.mapping.buttons.set(bit, index) {
                    tracing::warn!("Dropping remap result: {}", e);
                }
            }
        }
        self.state = RemapState::Idle;
        TickOutcome::Bound { target, index }
    }
}
