use thiserror::Error;

/// Errors produced by the capture core.
///
/// `SessionNotFound` and `StreamOpenFailed` are normally recovered inside the
/// loopback tier ladder; callers only see them when no tier is left to try.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("audio backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to open stream: {0}")]
    StreamOpenFailed(String),

    #[error("capture thread did not stop in time: {0}")]
    StopTimedOut(String),

    #[error("no audio session found for {0}")]
    SessionNotFound(String),

    #[error("no loopback device available")]
    NoLoopbackDevice,

    #[error("a recording is already active")]
    AlreadyActive,

    #[error("no audio data was captured")]
    NoAudioData,

    #[error("no audio source configured")]
    NoSourcesConfigured,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl CaptureError {
    /// Whether the loopback ladder may fall through to the next tier.
    pub fn is_recoverable_by_fallback(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_)
                | Self::StreamOpenFailed(_)
                | Self::DeviceNotFound(_)
                | Self::BackendUnavailable(_)
        )
    }
}
