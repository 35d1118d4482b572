//! # meeting-capture-core
//!
//! Platform-agnostic capture core of the meeting recorder.
//!
//! Records a microphone and an application (or the whole system mix) at the
//! same time, then mixes both into one 16-bit WAV file. Native audio
//! libraries plug in through the `AudioBackend` and `AudioSessionProvider`
//! traits; `meeting-capture-cpal` and `meeting-capture-windows` provide them.
//!
//! ## Architecture
//!
//! ```text
//! meeting-capture-core (this crate)
//! ├── traits/       ← AudioBackend, CaptureStream, AudioSessionProvider, SourceRecorder, CaptureDelegate
//! ├── models/       ← CaptureError, AudioDevice, CaptureEndpoint, CaptureConfiguration, RecordingResult
//! ├── discovery/    ← DeviceCatalog, ApplicationTargetResolver
//! ├── recorder/     ← MicRecorder, LoopbackRecorder (tier ladder)
//! ├── session/      ← CaptureSession (negotiation, start/stop, mix-down)
//! ├── processing/   ← level meter, chunk buffer, channel adaptation, Mixer, WAV header
//! ├── runtime/      ← CancellationToken, CaptureWorker (bounded stop)
//! └── storage/      ← WavFileWriter
//! ```

pub mod discovery;
pub mod models;
pub mod processing;
pub mod recorder;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export key types at crate root for convenience.
pub use discovery::device_catalog::DeviceCatalog;
pub use discovery::target_resolver::ApplicationTargetResolver;
pub use models::audio_models::{
    AudioApplication, AudioDevice, AudioLevel, AudioSessionInfo, AudioTrack, BackendKind, CaptureEndpoint,
    DeviceCapabilities, LoopbackTier, SourceTag, LOOPBACK_INDEX_OFFSET,
};
pub use models::config::CaptureConfiguration;
pub use models::error::CaptureError;
pub use models::recording_result::{RecordingMetadata, RecordingResult};
pub use models::state::{RecorderState, RecordingSessionInfo};
pub use processing::mixer::Mixer;
pub use recorder::loopback::{ActiveLoopback, LoopbackRecorder};
pub use recorder::mic::MicRecorder;
pub use recorder::CaptureFormat;
pub use runtime::cancel::CancellationToken;
pub use runtime::worker::CaptureWorker;
pub use session::capture_session::{CaptureSession, LoopbackSource};
pub use storage::wav_writer::WavFileWriter;
pub use traits::backend::{AudioBackend, CaptureStream, FrameCallback, StreamRequest};
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::session_provider::AudioSessionProvider;
pub use traits::source_recorder::{SourceRecorder, Started};
