use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use typeshare::typeshare;

// Re-export the packet layout selector so the config surface owns one name for it
pub use crate::control::ProtocolVariant;

/// Main application configuration
#[typeshare]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Video capture settings
    pub video: VideoConfig,
    /// Audio capture settings
    pub audio: AudioConfig,
    /// Remote receiver (control packet) settings
    pub control: ControlConfig,
    /// Web server settings
    pub web: WebConfig,
}

/// Video capture configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Video device path (e.g., /dev/video0)
    pub device: String,
    /// Stream width after resize
    pub width: u32,
    /// Stream height after resize
    pub height: u32,
    /// JPEG quality (1-100)
    pub quality: u32,
    /// Requested capture frame rate
    pub fps: u32,
    /// How long a viewer waits for a new frame before trying again
    pub frame_timeout_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 512,
            height: 288,
            quality: 25,
            fps: 60,
            frame_timeout_ms: 1000,
        }
    }
}

impl VideoConfig {
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(&self.device)
    }

    /// Quality clamped to the range libjpeg accepts
    pub fn effective_quality(&self) -> u8 {
        self.quality.clamp(1, 100) as u8
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms.max(1))
    }
}

/// Audio capture configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Enable audio capture
    pub enabled: bool,
    /// ALSA device name (e.g., "hw:1,0" or "default")
    pub device: String,
    /// Sample rate in Hz. HDMI capture cards run natively at 48000 or 96000.
    pub sample_rate: u32,
    /// Channel count
    pub channels: u32,
    /// Frames per chunk pushed to viewers
    pub chunk_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: "default".to_string(),
            sample_rate: 48000,
            channels: 1,
            chunk_size: 2048,
        }
    }
}

/// Remote receiver configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Receiver host name or IP address
    pub remote_host: String,
    /// Receiver UDP port
    pub remote_port: u16,
    /// Packet layout understood by the receiver
    pub variant: ProtocolVariant,
    /// Local address the relay socket binds to
    pub bind_address: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            remote_host: "192.168.1.100".to_string(),
            remote_port: 4210,
            variant: ProtocolVariant::MultiPlayer,
            bind_address: "0.0.0.0:0".to_string(),
        }
    }
}

impl ControlConfig {
    pub fn bind_addr(&self) -> crate::error::Result<SocketAddr> {
        self.bind_address.parse().map_err(|_| {
            crate::error::AppError::Config(format!(
                "Invalid control bind address: {}",
                self.bind_address
            ))
        })
    }
}

/// Web server configuration
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebConfig {
    /// HTTP port
    pub http_port: u16,
    /// Bind address
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            http_port: 8801,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}
