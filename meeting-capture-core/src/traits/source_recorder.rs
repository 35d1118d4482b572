use std::sync::Arc;

use crate::models::audio_models::{LoopbackTier, SourceTag};
use crate::models::error::CaptureError;
use crate::models::state::RecorderState;
use crate::traits::capture_delegate::CaptureDelegate;

/// What a recorder actually opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    /// Rate of the opened stream, which may differ from the requested one.
    pub sample_rate: u32,
    /// Channels the stream delivers, before drain-time adaptation.
    pub channels: u16,
    pub device_name: String,
    /// Set by loopback recorders only.
    pub tier: Option<LoopbackTier>,
}

/// One capture endpoint wrapped in the recorder state machine.
///
/// Implemented by:
/// - `MicRecorder` (generic input device)
/// - `LoopbackRecorder` (application session or system loopback)
pub trait SourceRecorder: Send {
    fn source(&self) -> SourceTag;

    fn state(&self) -> RecorderState;

    /// Open the stream and begin buffering. Idempotent while recording.
    /// Any failure leaves the recorder idle.
    fn start(&mut self) -> Result<Started, CaptureError>;

    /// Close the stream. Idempotent. Buffered audio stays available to `drain`.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Take every buffered block in arrival order, adapted to the output
    /// channel count.
    fn drain(&mut self) -> Vec<f32>;

    /// Negotiated rate, or the opened rate once started.
    fn sample_rate(&self) -> u32;

    /// Channel count `drain` produces.
    fn output_channels(&self) -> u16;

    /// Observer for levels, captured at the next `start`.
    fn set_delegate(&mut self, delegate: Option<Arc<dyn CaptureDelegate>>);
}
