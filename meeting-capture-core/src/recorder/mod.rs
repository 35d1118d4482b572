//! Source recorders: one capture endpoint each, behind [`SourceRecorder`].
//!
//! [`SourceRecorder`]: crate::traits::source_recorder::SourceRecorder

pub mod loopback;
pub mod mic;
pub(crate) mod stream_capture;

use std::time::Duration;

use crate::models::config::CaptureConfiguration;

/// Stream parameters a recorder is bound to at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    /// Output channel count of `drain`.
    pub channels: u16,
    pub frames_per_buffer: u32,
    pub stop_timeout: Duration,
}

impl CaptureFormat {
    pub fn from_config(config: &CaptureConfiguration) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frames_per_buffer: config.chunk_size,
            stop_timeout: config.stop_timeout(),
        }
    }

    pub fn with_sample_rate(self, sample_rate: u32) -> Self {
        Self { sample_rate, ..self }
    }
}
