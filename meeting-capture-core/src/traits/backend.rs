use std::time::Duration;

use crate::models::audio_models::{AudioDevice, BackendKind};
use crate::models::error::CaptureError;

/// Callback invoked by a backend for every captured block.
///
/// Receives interleaved f32 samples in `[-1, 1]` and their channel count.
/// Runs on the backend's own audio thread; calls for one stream are
/// serialized, never concurrent.
pub type FrameCallback = Box<dyn FnMut(&[f32], u16) + Send + 'static>;

/// Parameters for opening one capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Device handle in the backend's own index namespace.
    pub native_index: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_buffer: u32,
    /// Capture the device's render mix instead of its input.
    pub loopback: bool,
}

/// An open capture stream.
///
/// Dropping without `close` is allowed but leaves quiescing to the backend.
pub trait CaptureStream: Send {
    /// Rate the stream was actually opened at.
    fn sample_rate(&self) -> u32;

    /// Channel count the callback delivers.
    fn channels(&self) -> u16;

    /// Stop the stream. Once this returns `Ok`, the frame callback has run
    /// for the last time. `StopTimedOut` means the capture thread was
    /// detached still running.
    fn close(&mut self, timeout: Duration) -> Result<(), CaptureError>;
}

/// A native audio library handle that can enumerate and open devices.
///
/// Implemented by:
/// - `CpalBackend` (generic, all platforms)
/// - `WasapiBackend` (loopback-capable, Windows)
pub trait AudioBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// List devices using the backend's own index namespace.
    fn enumerate(&self) -> Result<Vec<AudioDevice>, CaptureError>;

    /// Whether the device would accept a stream at `sample_rate`.
    fn supports_sample_rate(&self, native_index: u32, sample_rate: u32, is_input: bool) -> bool;

    /// Open and start a stream, delivering blocks via `callback`.
    fn open_stream(
        &self,
        request: &StreamRequest,
        callback: FrameCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;
}
