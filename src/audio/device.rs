//! ALSA capture device discovery

use alsa::pcm::HwParams;
use alsa::{Direction, PCM};
use serde::Serialize;
use tracing::debug;

/// Devices tried per card
const MAX_DEVICES_PER_CARD: i32 = 8;

/// An ALSA PCM that opens for capture
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    /// ALSA name (e.g. "hw:1,0")
    pub name: String,
    pub description: String,
    /// Sample rates from a common set the hardware accepts
    pub sample_rates: Vec<u32>,
    /// Channel counts the hardware accepts
    pub channels: Vec<u32>,
    /// Card name suggests an HDMI/USB capture card
    pub is_hdmi: bool,
}

impl AudioDeviceInfo {
    pub fn supports(&self, sample_rate: u32, channels: u32) -> bool {
        self.sample_rates.contains(&sample_rate) && self.channels.contains(&channels)
    }
}

fn query_caps(pcm: &PCM) -> (Vec<u32>, Vec<u32>) {
    let Ok(hwp) = HwParams::any(pcm) else {
        return (vec![], vec![]);
    };

    let rates = [16000, 44100, 48000, 96000]
        .into_iter()
        .filter(|rate| hwp.test_rate(*rate).is_ok())
        .collect();
    let channels = (1..=2).filter(|ch| hwp.test_channels(*ch).is_ok()).collect();

    (rates, channels)
}

/// List capture PCMs on every card, plus "default" when it opens
pub fn enumerate_audio_devices() -> Vec<AudioDeviceInfo> {
    let mut devices = Vec::new();

    for card in alsa::card::Iter::new() {
        let card = match card {
            Ok(card) => card,
            Err(e) => {
                debug!("Error iterating sound cards: {}", e);
                continue;
            }
        };

        let index = card.get_index();
        let longname = card
            .get_longname()
            .or_else(|_| card.get_name())
            .unwrap_or_else(|_| "Unknown".to_string());
        let lower = longname.to_lowercase();
        let is_hdmi = lower.contains("hdmi") || lower.contains("capture") || lower.contains("usb");

        for device in 0..MAX_DEVICES_PER_CARD {
            let name = format!("hw:{},{}", index, device);
            // Non-blocking open so a busy device does not stall enumeration
            let Ok(pcm) = PCM::new(&name, Direction::Capture, true) else {
                continue;
            };
            let (sample_rates, channels) = query_caps(&pcm);
            if sample_rates.is_empty() || channels.is_empty() {
                continue;
            }
            devices.push(AudioDeviceInfo {
                name,
                description: format!("{} - Device {}", longname, device),
                sample_rates,
                channels,
                is_hdmi,
            });
        }
    }

    if let Ok(pcm) = PCM::new("default", Direction::Capture, true) {
        let (sample_rates, channels) = query_caps(&pcm);
        if !sample_rates.is_empty() {
            devices.insert(
                0,
                AudioDeviceInfo {
                    name: "default".to_string(),
                    description: "Default Audio Device".to_string(),
                    sample_rates,
                    channels,
                    is_hdmi: false,
                },
            );
        }
    }

    debug!("Found {} audio capture devices", devices.len());
    devices
}
