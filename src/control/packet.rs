//! Control packet codecs
//!
//! Little-endian, fixed-length layouts:
//!
//! ```text
//! single (7 bytes):          buttons:u16 | 0x08 | lx | ly | rx | ry
//! multi  (8 bytes): player:u8 | buttons:u16 | 0x08 | lx | ly | rx | ry
//! ```

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::error::{AppError, Result};
use crate::input::InputSample;

/// Constant hat/format marker byte
pub const FORMAT_MARKER: u8 = 8;

/// Packet layout understood by the remote receiver
#[typeshare]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVariant {
    /// 7-byte packet, no player id
    #[serde(rename = "single")]
    SinglePlayer,
    /// 8-byte packet with a leading player id
    #[default]
    #[serde(rename = "multi")]
    MultiPlayer,
}

impl ProtocolVariant {
    pub fn codec(&self) -> &'static dyn PacketCodec {
        match self {
            ProtocolVariant::SinglePlayer => &SinglePlayerCodec,
            ProtocolVariant::MultiPlayer => &MultiPlayerCodec,
        }
    }

    pub fn packet_len(&self) -> usize {
        self.codec().packet_len()
    }
}

impl std::fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolVariant::SinglePlayer => write!(f, "single"),
            ProtocolVariant::MultiPlayer => write!(f, "multi"),
        }
    }
}

impl std::str::FromStr for ProtocolVariant {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(ProtocolVariant::SinglePlayer),
            "multi" => Ok(ProtocolVariant::MultiPlayer),
            _ => Err(AppError::Config(format!("Unknown protocol variant: {}", s))),
        }
    }
}

/// Encode/decode one layout of the control packet
pub trait PacketCodec: Send + Sync {
    fn variant(&self) -> ProtocolVariant;

    fn packet_len(&self) -> usize;

    /// Check a sample can be represented by this layout
    fn validate(&self, sample: &InputSample) -> Result<()>;

    /// Encode a sample. Axis and button fields are already at wire width.
    fn encode(&self, sample: &InputSample) -> Vec<u8>;

    fn decode(&self, data: &[u8]) -> Result<InputSample>;
}

fn write_body(buf: &mut Vec<u8>, sample: &InputSample) {
    buf.extend_from_slice(&sample.buttons.to_le_bytes());
    buf.push(FORMAT_MARKER);
    buf.extend_from_slice(&[sample.lx, sample.ly, sample.rx, sample.ry]);
}

fn read_body(player: u8, body: &[u8]) -> Result<InputSample> {
    if body[2] != FORMAT_MARKER {
        return Err(AppError::InvalidInput(format!(
            "Bad format marker: 0x{:02x}",
            body[2]
        )));
    }
    Ok(InputSample {
        player,
        buttons: u16::from_le_bytes([body[0], body[1]]),
        lx: body[3],
        ly: body[4],
        rx: body[5],
        ry: body[6],
    })
}

fn check_len(data: &[u8], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(AppError::InvalidInput(format!(
            "Packet length {} (expected {})",
            data.len(),
            expected
        )));
    }
    Ok(())
}

/// 7-byte layout for a single receiver-side player
#[derive(Debug, Clone, Copy, Default)]
pub struct SinglePlayerCodec;

impl PacketCodec for SinglePlayerCodec {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::SinglePlayer
    }

    fn packet_len(&self) -> usize {
        7
    }

    fn validate(&self, _sample: &InputSample) -> Result<()> {
        Ok(())
    }

    fn encode(&self, sample: &InputSample) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.packet_len());
        write_body(&mut buf, sample);
        buf
    }

    /// Decoded samples report player 1
    fn decode(&self, data: &[u8]) -> Result<InputSample> {
        check_len(data, self.packet_len())?;
        read_body(1, data)
    }
}

/// 8-byte layout with a leading player id (1 or 2)
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiPlayerCodec;

impl MultiPlayerCodec {
    fn check_player(player: u8) -> Result<()> {
        match player {
            1 | 2 => Ok(()),
            _ => Err(AppError::InvalidInput(format!(
                "Invalid player id: {}",
                player
            ))),
        }
    }
}

impl PacketCodec for MultiPlayerCodec {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::MultiPlayer
    }

    fn packet_len(&self) -> usize {
        8
    }

    fn validate(&self, sample: &InputSample) -> Result<()> {
        Self::check_player(sample.player)
    }

    fn encode(&self, sample: &InputSample) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.packet_len());
        buf.push(sample.player);
        write_body(&mut buf, sample);
        buf
    }

    fn decode(&self, data: &[u8]) -> Result<InputSample> {
        check_len(data, self.packet_len())?;
        Self::check_player(data[0])?;
        read_body(data[0], &data[1..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(player: u8) -> InputSample {
        InputSample {
            player,
            buttons: 0b0000_0000_0000_0101,
            lx: 128,
            ly: 0,
            rx: 255,
            ry: 64,
        }
    }

    #[test]
    fn test_single_golden_bytes() {
        let codec = SinglePlayerCodec;
        let bytes = codec.encode(&sample(1));
        assert_eq!(bytes, [0x05, 0x00, 0x08, 0x80, 0x00, 0xFF, 0x40]);
        assert_eq!(codec.decode(&bytes).unwrap(), sample(1));
    }

    #[test]
    fn test_multi_golden_bytes() {
        let codec = MultiPlayerCodec;
        let bytes = codec.encode(&sample(2));
        assert_eq!(bytes, [0x02, 0x05, 0x00, 0x08, 0x80, 0x00, 0xFF, 0x40]);
        assert_eq!(codec.decode(&bytes).unwrap(), sample(2));
    }

    #[test]
    fn test_buttons_little_endian() {
        let mut s = sample(1);
        s.buttons = 0x8001;
        let bytes = SinglePlayerCodec.encode(&s);
        assert_eq!(&bytes[..2], &[0x01, 0x80]);
    }

    #[test]
    fn test_round_trip_edges() {
        for variant in [ProtocolVariant::SinglePlayer, ProtocolVariant::MultiPlayer] {
            let codec = variant.codec();
            for (buttons, axis) in [(0u16, 0u8), (u16::MAX, 255), (0x5a5a, 127)] {
                let s = InputSample {
                    player: 2,
                    buttons,
                    lx: axis,
                    ly: 255 - axis,
                    rx: axis,
                    ry: 128,
                };
                let bytes = codec.encode(&s);
                assert_eq!(bytes.len(), variant.packet_len());
                let decoded = codec.decode(&bytes).unwrap();
                let expected_player = match variant {
                    ProtocolVariant::SinglePlayer => 1,
                    ProtocolVariant::MultiPlayer => 2,
                };
                assert_eq!(decoded, InputSample { player: expected_player, ..s });
            }
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let single = SinglePlayerCodec;
        assert!(single.decode(&[0x05, 0x00, 0x08, 0x80, 0x00, 0xFF]).is_err());
        assert!(single
            .decode(&[0x05, 0x00, 0x07, 0x80, 0x00, 0xFF, 0x40])
            .is_err());

        let multi = MultiPlayerCodec;
        assert!(multi
            .decode(&[0x03, 0x05, 0x00, 0x08, 0x80, 0x00, 0xFF, 0x40])
            .is_err());
        assert!(multi
            .decode(&[0x05, 0x00, 0x08, 0x80, 0x00, 0xFF, 0x40])
            .is_err());
    }

    #[test]
    fn test_validate_player() {
        assert!(MultiPlayerCodec.validate(&sample(0)).is_err());
        assert!(MultiPlayerCodec.validate(&sample(3)).is_err());
        assert!(MultiPlayerCodec.validate(&sample(1)).is_ok());
        assert!(SinglePlayerCodec.validate(&sample(7)).is_ok());
    }

    #[test]
    fn test_variant_parse() {
        assert_eq!(
            "single".parse::<ProtocolVariant>().unwrap(),
            ProtocolVariant::SinglePlayer
        );
        assert_eq!(
            "MULTI".parse::<ProtocolVariant>().unwrap(),
            ProtocolVariant::MultiPlayer
        );
        assert!("dual".parse::<ProtocolVariant>().is_err());
        assert_eq!(
            serde_json::to_string(&ProtocolVariant::SinglePlayer).unwrap(),
            "\"single\""
        );
    }
}
