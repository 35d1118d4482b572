use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Capture defaults supplied by the surrounding application.
///
/// Deserializes from the `audio` section of the recorder's JSON config;
/// any missing field takes its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfiguration {
    /// Sample rate used when no loopback device dictates one (default: 44100).
    pub sample_rate: u32,

    /// Output channel count (default: 2).
    pub channels: u16,

    /// Frames per capture block requested from backends (default: 1024).
    pub chunk_size: u32,

    /// Output PCM bit depth. Only 16 is written.
    #[serde(alias = "format_bits")]
    pub bit_depth: u16,

    /// Preferred microphone by device name, or None for the default input.
    pub microphone_device: Option<String>,

    /// Preferred application by display or process name.
    pub application_device: Option<String>,

    /// Upper bound on waiting for a capture thread to exit on stop.
    pub stop_timeout_ms: u64,
}

impl CaptureConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        if self.chunk_size == 0 {
            return Err("chunk size must be positive".into());
        }
        if self.bit_depth != 16 {
            return Err(format!("unsupported bit depth: {}", self.bit_depth));
        }
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn from_json_str(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("invalid config: {}", e)))?;
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        let json = fs::read_to_string(path).map_err(|e| {
            CaptureError::ConfigurationFailed(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            chunk_size: 1024,
            bit_depth: 16,
            microphone_device: None,
            application_device: None,
            stop_timeout_ms: 2000,
        }
    }
}
