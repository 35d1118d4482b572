use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Index offset applied to devices reported by the loopback backend so its
/// handles never collide with the primary backend's.
pub const LOOPBACK_INDEX_OFFSET: u32 = 1000;

/// Which enumeration backend a device came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Generic cross-platform backend.
    Primary,
    /// Loopback-capable backend (WASAPI, Windows only).
    Loopback,
}

/// An audio endpoint as reported by one enumeration pass.
///
/// Identity is the `(backend, index)` pair. Names may repeat across backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub index: u32,
    pub backend: BackendKind,
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub is_loopback: bool,
}

impl AudioDevice {
    /// The handle the owning backend knows this device by.
    pub fn native_index(&self) -> u32 {
        match self.backend {
            BackendKind::Primary => self.index,
            BackendKind::Loopback => self.index.saturating_sub(LOOPBACK_INDEX_OFFSET),
        }
    }

    pub fn id(&self) -> (BackendKind, u32) {
        (self.backend, self.index)
    }
}

/// A running application that may be producing audio.
///
/// `process_id` is only meaningful while the process lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioApplication {
    pub display_name: String,
    pub process_name: String,
    pub process_id: u32,
    pub executable_path: PathBuf,
    pub is_playing_audio: bool,
    pub session_id: Option<String>,
}

/// An OS audio session as seen by the session provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSessionInfo {
    pub session_id: String,
    pub process_id: u32,
    pub process_name: String,
    pub display_name: String,
    pub is_active: bool,
    /// Mix rate of the endpoint the session renders to, when known.
    pub sample_rate: Option<u32>,
}

/// Where loopback audio for a recording comes from.
///
/// Resolved fresh for every recording; sessions die with their process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEndpoint {
    Session {
        application: AudioApplication,
        session: AudioSessionInfo,
    },
    SystemLoopback(AudioDevice),
    Unavailable,
}

impl CaptureEndpoint {
    pub fn is_available(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

/// Fallback tier that produced the loopback audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopbackTier {
    ApplicationSession,
    SystemLoopback,
}

impl fmt::Display for LoopbackTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplicationSession => f.write_str("application session"),
            Self::SystemLoopback => f.write_str("system loopback"),
        }
    }
}

/// Which recorder a level reading or track belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Microphone,
    Application,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Microphone => "microphone",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level reading delivered to observers once per capture block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioLevel {
    pub rms: f32,
    pub peak: f32,
    /// Display scalar in `[0, 1]` over a -60 dB..0 dB range.
    pub normalized: f32,
    /// Seconds since the recorder's stream started.
    pub timestamp: f64,
}

/// One block of interleaved samples as delivered by a backend callback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub sequence: u64,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioChunk {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// Sample rates a device accepted during a capability probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub sample_rates: Vec<u32>,
}

/// A track contributing to a finished recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub source: SourceTag,
    pub device_name: String,
    pub channels: u16,
    pub frames: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: u32, backend: BackendKind) -> AudioDevice {
        AudioDevice {
            index,
            backend,
            name: "Speakers".into(),
            channels: 2,
            sample_rate: 48000,
            is_input: false,
            is_output: true,
            is_default: false,
            is_loopback: false,
        }
    }

    #[test]
    fn native_index_strips_loopback_offset() {
        assert_eq!(device(3, BackendKind::Primary).native_index(), 3);
        assert_eq!(device(LOOPBACK_INDEX_OFFSET + 3, BackendKind::Loopback).native_index(), 3);
    }

    #[test]
    fn chunk_frames_accounts_for_channels() {
        let chunk = AudioChunk {
            sequence: 0,
            channels: 2,
            samples: vec![0.0; 2048],
        };
        assert_eq!(chunk.frames(), 1024);
    }

    #[test]
    fn source_tag_serializes_lowercase() {
        let json = serde_json::to_string(&SourceTag::Application).unwrap();
        assert_eq!(json, "\"application\"");
    }
}
