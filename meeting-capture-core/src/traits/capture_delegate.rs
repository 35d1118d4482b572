use crate::models::audio_models::{AudioLevel, LoopbackTier, SourceTag};
use crate::models::recording_result::RecordingResult;

/// Observer for capture notifications.
///
/// `on_level` is called from backend audio threads once per block and must
/// not block. The other methods run on the thread driving the session.
/// Closures of the form `Fn(SourceTag, &AudioLevel)` implement this trait.
pub trait CaptureDelegate: Send + Sync {
    /// Called for every captured block with that block's level.
    fn on_level(&self, source: SourceTag, level: &AudioLevel);

    /// Called when the loopback recorder settles on a fallback tier.
    fn on_tier_activated(&self, _tier: LoopbackTier) {}

    /// Called after the mix-down has been written.
    fn on_capture_finished(&self, _result: &RecordingResult) {}
}

impl<F> CaptureDelegate for F
where
    F: Fn(SourceTag, &AudioLevel) + Send + Sync,
{
    fn on_level(&self, source: SourceTag, level: &AudioLevel) {
        self(source, level)
    }
}
