//! Backend wiring for the host platform.

use std::sync::Arc;

use meeting_capture_core::{
    ApplicationTargetResolver, AudioBackend, AudioSessionProvider, CaptureError, DeviceCatalog,
};
use meeting_capture_cpal::CpalBackend;

pub struct Platform {
    pub catalog: Arc<DeviceCatalog>,
    pub resolver: Arc<ApplicationTargetResolver>,
}

impl Platform {
    /// Initialize every backend available here. Missing ones degrade to
    /// absent rather than failing.
    pub fn init() -> Self {
        let primary = CpalBackend::new().map(|b| Arc::new(b) as Arc<dyn AudioBackend>);
        let catalog = Arc::new(DeviceCatalog::from_init(primary, loopback_backend()));

        let sessions = match session_provider() {
            Ok(provider) => Some(provider),
            Err(e) => {
                log::debug!("No audio session provider: {}", e);
                None
            }
        };
        let resolver = Arc::new(ApplicationTargetResolver::new(sessions, Arc::clone(&catalog)));
        Self { catalog, resolver }
    }
}

#[cfg(target_os = "windows")]
fn loopback_backend() -> Result<Arc<dyn AudioBackend>, CaptureError> {
    meeting_capture_windows::WasapiBackend::new().map(|b| Arc::new(b) as Arc<dyn AudioBackend>)
}

#[cfg(not(target_os = "windows"))]
fn loopback_backend() -> Result<Arc<dyn AudioBackend>, CaptureError> {
    Err(CaptureError::BackendUnavailable("WASAPI requires Windows".into()))
}

#[cfg(target_os = "windows")]
fn session_provider() -> Result<Arc<dyn AudioSessionProvider>, CaptureError> {
    meeting_capture_windows::WasapiSessionProvider::new().map(|p| Arc::new(p) as Arc<dyn AudioSessionProvider>)
}

#[cfg(not(target_os = "windows"))]
fn session_provider() -> Result<Arc<dyn AudioSessionProvider>, CaptureError> {
    Err(CaptureError::BackendUnavailable("audio sessions require Windows".into()))
}
