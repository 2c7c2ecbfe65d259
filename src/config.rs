use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Link and pipeline configuration.
///
/// Every field has a usable default; a TOML file can override any subset
/// of them.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Serial device carrying the link (e.g. "/dev/ttyUSB0")
    pub serial_port: String,
    /// Link baud rate
    pub baud_rate: u32,
    /// Per-byte read timeout on the receive thread, in ms
    pub read_timeout_ms: u64,

    /// ALSA capture device name
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Capture sample rate (mono S16LE)
    pub capture_sample_rate: u32,
    /// Playback sample rate (stereo S16LE)
    pub playback_sample_rate: u32,
    /// Bytes of captured PCM per outgoing audio frame
    pub capture_frame_bytes: usize,

    /// Capacity of the compressed-input staging window
    pub staging_capacity: usize,
    /// Minimum staged bytes before a decode attempt
    pub min_decode_bytes: usize,
    /// Consecutive decode failures before forcing a resync
    pub error_streak_threshold: u32,
    /// Upper bound on the blind-skip fallback when no sync marker is found.
    /// Policy, not wire format; tune per deployment.
    pub resync_max_skip: usize,
    /// Ceiling on the decoder output scratch buffer, in samples
    pub max_scratch_samples: usize,

    /// Capture-thread poll delay while not recording, in ms
    pub idle_poll_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 921_600,
            read_timeout_ms: 10,
            capture_device: "default".to_string(),
            playback_device: "default".to_string(),
            capture_sample_rate: 16_000,
            playback_sample_rate: 44_100,
            capture_frame_bytes: 512,
            staging_capacity: 4096,
            min_decode_bytes: 128,
            error_streak_threshold: 5,
            resync_max_skip: 1024,
            max_scratch_samples: 65_536,
            idle_poll_ms: 10,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load from `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::from_file(path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    return config;
                }
                Err(e) => {
                    log::error!("{:#}; using defaults", e);
                }
            }
        }
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.baud_rate, 921_600);
        assert_eq!(config.staging_capacity, 4096);
        assert_eq!(config.min_decode_bytes, 128);
        assert_eq!(config.error_streak_threshold, 5);
        assert_eq!(config.capture_frame_bytes, 512);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: Config =
            toml::from_str("serial_port = \"/dev/ttyACM1\"\nstaging_capacity = 8192\n")
                .unwrap();
        assert_eq!(config.serial_port, "/dev/ttyACM1");
        assert_eq!(config.staging_capacity, 8192);
        // Untouched fields keep their defaults.
        assert_eq!(config.baud_rate, 921_600);
    }
}
