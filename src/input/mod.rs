//! Controller input normalization and remapping
//!
//! Raw browser gamepad snapshots are normalized into [`InputSample`]s through
//! a per-profile [`Mapping`]. The [`InputMapper`] also runs the remap state
//! machine that rebinds canonical axes/buttons to physical indices.

pub mod normalize;
pub mod remap;
pub mod types;

pub use normalize::{button_mask, normalize_axis, sample_from_state, DEADZONE};
pub use remap::{InputMapper, RemapState, TickOutcome, AXIS_REMAP_THRESHOLD};
pub use types::{
    AxisMap, AxisName, ButtonMap, GamepadState, InputSample, Mapping, RemapTarget, AXIS_CENTER,
    BUTTON_COUNT,
};
