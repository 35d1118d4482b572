use std::sync::Arc;

use crate::discovery::device_catalog::DeviceCatalog;
use crate::models::audio_models::{AudioApplication, AudioDevice, AudioSessionInfo, CaptureEndpoint};
use crate::models::error::CaptureError;
use crate::traits::session_provider::AudioSessionProvider;

/// Everything a resolution strategy may look at.
pub struct Attempt<'a> {
    pub application: &'a AudioApplication,
    pub sessions: &'a [AudioSessionInfo],
    pub system_loopback: Option<&'a AudioDevice>,
}

/// One rung of the resolution ladder.
pub type Strategy = fn(&Attempt<'_>) -> Result<CaptureEndpoint, CaptureError>;

/// Strategies in the order they are tried.
pub const STRATEGIES: [(&str, Strategy); 3] = [
    ("process id", match_by_pid),
    ("process name", match_by_name),
    ("system loopback", system_loopback_endpoint),
];

/// Maps a selected application to the endpoint its audio can be captured from.
///
/// Sessions are transient, so nothing is cached: every call takes a fresh
/// snapshot from the session provider.
pub struct ApplicationTargetResolver {
    sessions: Option<Arc<dyn AudioSessionProvider>>,
    catalog: Arc<DeviceCatalog>,
}

impl ApplicationTargetResolver {
    pub fn new(sessions: Option<Arc<dyn AudioSessionProvider>>, catalog: Arc<DeviceCatalog>) -> Self {
        Self { sessions, catalog }
    }

    pub fn catalog(&self) -> &Arc<DeviceCatalog> {
        &self.catalog
    }

    pub fn session_provider(&self) -> Option<&Arc<dyn AudioSessionProvider>> {
        self.sessions.as_ref()
    }

    /// Run the strategy ladder. Only returns `Unavailable` when no output
    /// device exists to fall back to.
    pub fn resolve(&self, application: &AudioApplication) -> CaptureEndpoint {
        let sessions = self.session_snapshot();
        let system_loopback = self.system_loopback().ok();
        let attempt = Attempt {
            application,
            sessions: &sessions,
            system_loopback: system_loopback.as_ref(),
        };

        for (name, strategy) in STRATEGIES {
            match strategy(&attempt) {
                Ok(endpoint) => {
                    log::debug!("Resolved '{}' by {}", application.display_name, name);
                    return endpoint;
                }
                Err(reason) => log::debug!("No match for '{}' by {}: {}", application.display_name, name, reason),
            }
        }
        CaptureEndpoint::Unavailable
    }

    /// Session-only resolution: process id, then process name.
    pub fn resolve_session(&self, application: &AudioApplication) -> Result<AudioSessionInfo, CaptureError> {
        let sessions = self.session_snapshot();
        let attempt = Attempt {
            application,
            sessions: &sessions,
            system_loopback: None,
        };

        match match_by_pid(&attempt).or_else(|_| match_by_name(&attempt))? {
            CaptureEndpoint::Session { session, .. } => Ok(session),
            _ => Err(CaptureError::SessionNotFound(application.process_name.clone())),
        }
    }

    /// The device whose render mix stands in for a missing session.
    ///
    /// A loopback-backend device flagged default wins; otherwise the default
    /// output device, to be opened in loopback mode.
    pub fn system_loopback(&self) -> Result<AudioDevice, CaptureError> {
        let loopbacks = self.catalog.list_loopbacks();
        if let Some(device) = loopbacks.iter().find(|d| d.is_default) {
            return Ok(device.clone());
        }

        let output = self.catalog.default_output().ok_or(CaptureError::NoLoopbackDevice)?;
        let mirrored = loopbacks.into_iter().find(|d| d.name.starts_with(&output.name));
        Ok(mirrored.unwrap_or(output))
    }

    fn session_snapshot(&self) -> Vec<AudioSessionInfo> {
        let Some(provider) = &self.sessions else {
            return Vec::new();
        };
        provider.sessions().unwrap_or_else(|e| {
            log::warn!("Audio session enumeration failed: {}", e);
            Vec::new()
        })
    }
}

pub fn match_by_pid(attempt: &Attempt<'_>) -> Result<CaptureEndpoint, CaptureError> {
    let pid = attempt.application.process_id;
    if pid == 0 {
        return Err(CaptureError::SessionNotFound("no process id".into()));
    }
    best_session(attempt, |s| s.process_id == pid)
        .ok_or_else(|| CaptureError::SessionNotFound(format!("pid {}", pid)))
}

/// Case-insensitive match on the executable name.
pub fn match_by_name(attempt: &Attempt<'_>) -> Result<CaptureEndpoint, CaptureError> {
    let name = attempt.application.process_name.to_lowercase();
    if name.is_empty() {
        return Err(CaptureError::SessionNotFound("no process name".into()));
    }
    best_session(attempt, |s| s.process_name.to_lowercase() == name)
        .ok_or_else(|| CaptureError::SessionNotFound(attempt.application.process_name.clone()))
}

pub fn system_loopback_endpoint(attempt: &Attempt<'_>) -> Result<CaptureEndpoint, CaptureError> {
    attempt
        .system_loopback
        .map(|device| CaptureEndpoint::SystemLoopback(device.clone()))
        .ok_or(CaptureError::NoLoopbackDevice)
}

/// Active sessions beat inactive ones; otherwise the first match wins.
fn best_session(attempt: &Attempt<'_>, matches: impl Fn(&AudioSessionInfo) -> bool) -> Option<CaptureEndpoint> {
    let mut candidates = attempt.sessions.iter().filter(|s| matches(s));
    let first = candidates.next()?;
    let chosen = if first.is_active {
        first
    } else {
        candidates.find(|s| s.is_active).unwrap_or(first)
    };

    Some(CaptureEndpoint::Session {
        application: attempt.application.clone(),
        session: chosen.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audio_models::BackendKind;
    use crate::test_support::{application, input_device, loopback_device, output_device, session, FakeBackend, FakeSessionProvider};
    use crate::traits::backend::AudioBackend;

    fn catalog_with_output() -> Arc<DeviceCatalog> {
        let mut speakers = output_device(1, "Speakers", 48000);
        speakers.is_default = true;
        let backend = FakeBackend::new(
            BackendKind::Primary,
            vec![input_device(0, "Mic", 48000, 1), output_device(2, "HDMI", 44100), speakers],
        );
        Arc::new(DeviceCatalog::new(Some(Arc::new(backend) as Arc<dyn AudioBackend>), None).with_loopback_platform(false))
    }

    fn resolver(sessions: Vec<AudioSessionInfo>) -> ApplicationTargetResolver {
        let provider = Arc::new(FakeSessionProvider::new(sessions)) as Arc<dyn AudioSessionProvider>;
        ApplicationTargetResolver::new(Some(provider), catalog_with_output())
    }

    #[test]
    fn pid_match_wins() {
        let resolver = resolver(vec![session(7, "other.exe", None), session(42, "zoom.exe", Some(48000))]);

        match resolver.resolve(&application(42, "Zoom.exe")) {
            CaptureEndpoint::Session { session, .. } => assert_eq!(session.process_id, 42),
            other => panic!("expected session, got {:?}", other),
        }
    }

    #[test]
    fn respawned_process_matches_by_name() {
        let resolver = resolver(vec![session(99, "zoom.exe", None)]);

        match resolver.resolve(&application(42, "ZOOM.EXE")) {
            CaptureEndpoint::Session { session, application } => {
                assert_eq!(session.process_id, 99);
                assert_eq!(application.process_id, 42);
            }
            other => panic!("expected session, got {:?}", other),
        }
    }

    #[test]
    fn active_session_preferred() {
        let mut idle = session(42, "teams.exe", None);
        idle.is_active = false;
        idle.session_id = "idle".into();
        let resolver = resolver(vec![idle, session(42, "teams.exe", None)]);

        let found = resolver.resolve_session(&application(42, "teams.exe")).unwrap();
        assert_eq!(found.session_id, "session-42");
    }

    #[test]
    fn unmatched_application_falls_back_to_default_output() {
        let resolver = resolver(vec![session(7, "spotify.exe", None)]);

        match resolver.resolve(&application(42, "zoom.exe")) {
            CaptureEndpoint::SystemLoopback(device) => {
                assert_eq!(device.name, "Speakers");
                assert!(device.is_default);
            }
            other => panic!("expected system loopback, got {:?}", other),
        }
    }

    #[test]
    fn missing_session_provider_still_resolves() {
        let resolver = ApplicationTargetResolver::new(None, catalog_with_output());
        assert!(matches!(
            resolver.resolve(&application(42, "zoom.exe")),
            CaptureEndpoint::SystemLoopback(_)
        ));
        assert!(matches!(
            resolver.resolve_session(&application(42, "zoom.exe")),
            Err(CaptureError::SessionNotFound(_))
        ));
    }

    #[test]
    fn unavailable_without_outputs() {
        let catalog = Arc::new(DeviceCatalog::new(None, None));
        let resolver = ApplicationTargetResolver::new(None, catalog);

        assert_eq!(resolver.resolve(&application(42, "zoom.exe")), CaptureEndpoint::Unavailable);
        assert_eq!(resolver.system_loopback(), Err(CaptureError::NoLoopbackDevice));
    }

    #[test]
    fn system_loopback_prefers_loopback_backend_device() {
        let mut primary_speakers = output_device(1, "Speakers", 48000);
        primary_speakers.is_default = true;
        let primary = FakeBackend::new(BackendKind::Primary, vec![primary_speakers]);
        let loopback = FakeBackend::new(BackendKind::Loopback, vec![loopback_device(0, "Speakers [Loopback]", 48000)]);
        let catalog = DeviceCatalog::new(
            Some(Arc::new(primary) as Arc<dyn AudioBackend>),
            Some(Arc::new(loopback) as Arc<dyn AudioBackend>),
        )
        .with_loopback_platform(true);
        let resolver = ApplicationTargetResolver::new(None, Arc::new(catalog));

        let device = resolver.system_loopback().unwrap();
        assert_eq!(device.name, "Speakers [Loopback]");
        assert_eq!(device.backend, BackendKind::Loopback);
    }

    #[test]
    fn strategies_are_independent() {
        let app = application(42, "zoom.exe");
        let sessions = vec![session(42, "zoom.exe", None)];
        let attempt = Attempt {
            application: &app,
            sessions: &sessions,
            system_loopback: None,
        };

        assert!(match_by_pid(&attempt).is_ok());
        assert!(match_by_name(&attempt).is_ok());
        assert_eq!(system_loopback_endpoint(&attempt), Err(CaptureError::NoLoopbackDevice));
    }
}
