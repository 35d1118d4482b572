use std::sync::Arc;

use parking_lot::Mutex;

use meeting_capture_core::{AudioLevel, CaptureDelegate, LoopbackTier, RecordingResult, SourceTag};

#[derive(Debug, Default, Clone, Copy)]
struct SourcePeaks {
    peak: f32,
    blocks: u64,
}

/// Delegate that keeps per-source peak levels for the end-of-run summary.
#[derive(Default)]
pub struct PeakMeter {
    mic: Mutex<SourcePeaks>,
    application: Mutex<SourcePeaks>,
    tier: Mutex<Option<LoopbackTier>>,
}

impl PeakMeter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slot(&self, source: SourceTag) -> &Mutex<SourcePeaks> {
        match source {
            SourceTag::Microphone => &self.mic,
            SourceTag::Application => &self.application,
        }
    }

    /// `(peak dBFS, blocks seen)` for a source, or None if it never delivered.
    pub fn summary(&self, source: SourceTag) -> Option<(f32, u64)> {
        let peaks = *self.slot(source).lock();
        if peaks.blocks == 0 {
            return None;
        }
        let db = if peaks.peak > 0.0 { 20.0 * peaks.peak.log10() } else { f32::NEG_INFINITY };
        Some((db, peaks.blocks))
    }

    pub fn tier(&self) -> Option<LoopbackTier> {
        *self.tier.lock()
    }
}

impl CaptureDelegate for PeakMeter {
    fn on_level(&self, source: SourceTag, level: &AudioLevel) {
        let mut peaks = self.slot(source).lock();
        peaks.peak = peaks.peak.max(level.peak);
        peaks.blocks += 1;
    }

    fn on_tier_activated(&self, tier: LoopbackTier) {
        log::info!("Loopback capturing via {}", tier);
        *self.tier.lock() = Some(tier);
    }

    fn on_capture_finished(&self, result: &RecordingResult) {
        log::debug!("Recording {} finished", result.metadata.id);
    }
}
