//! Controller mapping and input sample types

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::error::{AppError, Result};

/// Number of canonical button bits carried in a sample
pub const BUTTON_COUNT: usize = 16;

/// Neutral (centered) wire value for an axis
pub const AXIS_CENTER: u8 = 128;

/// Canonical stick axis
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisName {
    Lx,
    Ly,
    Rx,
    Ry,
}

impl AxisName {
    pub const ALL: [AxisName; 4] = [AxisName::Lx, AxisName::Ly, AxisName::Rx, AxisName::Ry];

    pub fn as_str(&self) -> &'static str {
        match self {
            AxisName::Lx => "lx",
            AxisName::Ly => "ly",
            AxisName::Rx => "rx",
            AxisName::Ry => "ry",
        }
    }
}

/// Canonical axis name -> physical axis index
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisMap {
    pub lx: usize,
    pub ly: usize,
    pub rx: usize,
    pub ry: usize,
}

impl Default for AxisMap {
    fn default() -> Self {
        Self {
            lx: 0,
            ly: 1,
            rx: 2,
            ry: 3,
        }
    }
}

impl AxisMap {
    pub fn get(&self, axis: AxisName) -> usize {
        match axis {
            AxisName::Lx => self.lx,
            AxisName::Ly => self.ly,
            AxisName::Rx => self.rx,
            AxisName::Ry => self.ry,
        }
    }

    pub fn set(&mut self, axis: AxisName, index: usize) {
        match axis {
            AxisName::Lx => self.lx = index,
            AxisName::Ly => self.ly = index,
            AxisName::Rx => self.rx = index,
            AxisName::Ry => self.ry = index,
        }
    }
}

/// Canonical button bit (0..16) -> physical button index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ButtonMap([usize; BUTTON_COUNT]);

impl Default for ButtonMap {
    fn default() -> Self {
        let mut map = [0usize; BUTTON_COUNT];
        for (bit, slot) in map.iter_mut().enumerate() {
            *slot = bit;
        }
        Self(map)
    }
}

impl ButtonMap {
    /// Physical index bound to `bit`, `None` for bits outside 0..16
    pub fn get(&self, bit: usize) -> Option<usize> {
        self.0.get(bit).copied()
    }

    pub fn set(&mut self, bit: usize, index: usize) -> Result<()> {
        let slot = self
            .0
            .get_mut(bit)
            .ok_or_else(|| AppError::InvalidInput(format!("Button bit out of range: {}", bit)))?;
        *slot = index;
        Ok(())
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }
}

/// Full controller mapping for one profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub axes: AxisMap,
    pub buttons: ButtonMap,
}

/// What a remap is listening for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemapTarget {
    Axis(AxisName),
    Button(usize),
}

impl RemapTarget {
    pub fn validate(&self) -> Result<()> {
        match self {
            RemapTarget::Button(bit) if *bit >= BUTTON_COUNT => Err(AppError::InvalidInput(
                format!("Button bit out of range: {}", bit),
            )),
            _ => Ok(()),
        }
    }
}

/// Raw controller snapshot as read by the browser Gamepad API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GamepadState {
    /// Axis values in [-1, 1]
    #[serde(default)]
    pub axes: Vec<f64>,
    /// Pressed state per physical button
    #[serde(default)]
    pub buttons: Vec<bool>,
}

impl GamepadState {
    pub fn axis(&self, index: usize) -> f64 {
        self.axes.get(index).copied().unwrap_or(0.0)
    }

    pub fn pressed(&self, index: usize) -> bool {
        self.buttons.get(index).copied().unwrap_or(false)
    }
}

/// One instant of normalized input
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSample {
    /// Player id (1 or 2); ignored by the single-player layout
    #[serde(default = "default_player")]
    pub player: u8,
    pub buttons: u16,
    pub lx: u8,
    pub ly: u8,
    pub rx: u8,
    pub ry: u8,
}

fn default_player() -> u8 {
    1
}

impl InputSample {
    /// Sample with no buttons held and both sticks centered
    pub fn neutral(player: u8) -> Self {
        Self {
            player,
            buttons: 0,
            lx: AXIS_CENTER,
            ly: AXIS_CENTER,
            rx: AXIS_CENTER,
            ry: AXIS_CENTER,
        }
    }

    pub fn is_pressed(&self, bit: usize) -> bool {
        bit < BUTTON_COUNT && self.buttons & (1 << bit) != 0
    }
}
