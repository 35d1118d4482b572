use thiserror::Error;

use meeting_capture_core::CaptureError;

/// Failures inside the WASAPI layer, before they cross into the core.
#[derive(Debug, Error)]
pub enum WasapiError {
    #[error("{call} failed: {source}")]
    Com {
        call: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("unsupported mix format: {0}")]
    UnsupportedFormat(String),

    #[error("process {0} has no capturable audio")]
    ProcessUnavailable(u32),

    #[error("activation timed out")]
    ActivationTimedOut,
}

impl WasapiError {
    pub fn com(call: &'static str, source: windows::core::Error) -> Self {
        Self::Com { call, source }
    }
}

impl From<WasapiError> for CaptureError {
    fn from(e: WasapiError) -> Self {
        match e {
            WasapiError::EndpointNotFound(id) => CaptureError::DeviceNotFound(id),
            WasapiError::ProcessUnavailable(pid) => CaptureError::SessionNotFound(format!("pid {}", pid)),
            other => CaptureError::StreamOpenFailed(other.to_string()),
        }
    }
}
