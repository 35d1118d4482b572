use crate::models::audio_models::AudioSessionInfo;
use crate::models::error::CaptureError;
use crate::traits::backend::{CaptureStream, FrameCallback, StreamRequest};

/// OS audio-session API: per-process session lookup and scoped capture.
///
/// `native_index` in the request is ignored; the session determines the
/// endpoint.
pub trait AudioSessionProvider: Send + Sync {
    /// Snapshot of the audio sessions currently known to the OS.
    fn sessions(&self) -> Result<Vec<AudioSessionInfo>, CaptureError>;

    /// Open a stream carrying only the audio of `session`'s process.
    fn open_session_stream(
        &self,
        session: &AudioSessionInfo,
        request: &StreamRequest,
        callback: FrameCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;
}
