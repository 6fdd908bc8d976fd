//! Axis deadzone/scaling and button bitmask construction

use super::types::{AxisName, ButtonMap, GamepadState, InputSample, Mapping, BUTTON_COUNT};

/// Radius around center treated as exactly neutral
pub const DEADZONE: f64 = 0.15;

/// Map a raw axis value in [-1, 1] to the 0..=255 wire range
///
/// Values inside the deadzone land on 128; the remaining travel is rescaled
/// so the full wire range stays reachable. Non-finite input is treated as
/// centered.
pub fn normalize_axis(value: f64) -> u8 {
    let v = if !value.is_finite() || value.abs() < DEADZONE {
        0.0
    } else if value > 0.0 {
        (value - DEADZONE) / (1.0 - DEADZONE)
    } else {
        (value + DEADZONE) / (1.0 - DEADZONE)
    };

    ((v + 1.0) * 127.5).floor().clamp(0.0, 255.0) as u8
}

/// Build the 16-bit mask: bit `b` is set iff physical button `map[b]` is held
pub fn button_mask(map: &ButtonMap, state: &GamepadState) -> u16 {
    (0..BUTTON_COUNT).fold(0u16, |mask, bit| match map.get(bit) {
        Some(index) if state.pressed(index) => mask | (1 << bit),
        _ => mask,
    })
}

/// Produce a wire-ready sample from a raw controller snapshot
pub fn sample_from_state(mapping: &Mapping, state: &GamepadState, player: u8) -> InputSample {
    let axis = |name: AxisName| normalize_axis(state.axis(mapping.axes.get(name)));
    InputSample {
        player,
        buttons: button_mask(&mapping.buttons, state),
        lx: axis(AxisName::Lx),
        ly: axis(AxisName::Ly),
        rx: axis(AxisName::Rx),
        ry: axis(AxisName::Ry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_and_deadzone() {
        assert_eq!(normalize_axis(0.0), 128);
        for v in [0.01, -0.01, 0.1, -0.149, 0.149] {
            assert_eq!(normalize_axis(v), 128, "value {}", v);
        }
        assert_eq!(normalize_axis(f64::NAN), 128);
    }

    #[test]
    fn test_extremes() {
        assert_eq!(normalize_axis(1.0), 255);
        assert_eq!(normalize_axis(-1.0), 0);
        // Out-of-range input still lands inside the wire range
        assert_eq!(normalize_axis(3.0), 255);
        assert_eq!(normalize_axis(-3.0), 0);
    }

    #[test]
    fn test_scaling_matches_double_precision() {
        // Single precision rounds this one up to 30
        assert_eq!(normalize_axis(-0.8), 29);
    }

    #[test]
    fn test_monotonic_outside_deadzone() {
        let mut prev = 0u8;
        let mut v = -1.0f64;
        while v <= 1.0 {
            let out = normalize_axis(v);
            assert!(out >= prev, "normalize({}) = {} < {}", v, out, prev);
            prev = out;
            v += 0.001;
        }
    }

    #[test]
    fn test_button_mask_follows_map() {
        let mut map = ButtonMap::default();
        let state = GamepadState {
            axes: vec![],
            buttons: vec![true, false, true, false, false, false, false, true],
        };
        assert_eq!(button_mask(&map, &state), 0b1000_0101);

        // Bit 1 now reads physical button 7
        map.set(1, 7).unwrap();
        assert_eq!(button_mask(&map, &state), 0b1000_0111);
    }

    #[test]
    fn test_sample_from_state_uses_axis_map() {
        let mut mapping = Mapping::default();
        mapping.axes.set(AxisName::Lx, 3);
        let state = GamepadState {
            axes: vec![0.0, -1.0, 1.0, 1.0],
            buttons: vec![false, true],
        };
        let sample = sample_from_state(&mapping, &state, 2);
        assert_eq!(sample.player, 2);
        assert_eq!(sample.buttons, 0b10);
        assert_eq!(sample.lx, 255);
        assert_eq!(sample.ly, 0);
        assert_eq!(sample.rx, 255);
        assert_eq!(sample.ry, 255);
    }
}
