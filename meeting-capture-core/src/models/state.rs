use std::path::PathBuf;

/// Per-recorder stream state.
///
/// ```text
/// idle → starting → recording → stopping → idle
///           ↓
///         idle (open failed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecorderState {
    #[default]
    Idle,
    Starting,
    Recording,
    Stopping,
}

impl RecorderState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }
}

/// Snapshot of a capture session for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSessionInfo {
    pub source_count: usize,
    pub effective_sample_rate: u32,
    pub channels: u16,
    pub is_active: bool,
    pub output_path: Option<PathBuf>,
}
