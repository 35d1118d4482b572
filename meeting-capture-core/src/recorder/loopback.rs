use std::sync::Arc;

use crate::discovery::target_resolver::ApplicationTargetResolver;
use crate::models::audio_models::{
    AudioApplication, AudioDevice, AudioSessionInfo, CaptureEndpoint, LoopbackTier, SourceTag,
};
use crate::models::error::CaptureError;
use crate::models::state::RecorderState;
use crate::recorder::stream_capture::StreamCapture;
use crate::recorder::CaptureFormat;
use crate::traits::backend::{CaptureStream, StreamRequest};
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::source_recorder::{SourceRecorder, Started};

/// Fallback tiers in the order they are attempted.
pub const TIER_LADDER: [LoopbackTier; 2] = [LoopbackTier::ApplicationSession, LoopbackTier::SystemLoopback];

/// Capture strategy that actually opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveLoopback {
    /// Stream scoped to the target application's audio session.
    Direct { session: AudioSessionInfo },
    /// Full render mix of a playback device.
    Fallback { device: AudioDevice },
}

impl ActiveLoopback {
    pub fn tier(&self) -> LoopbackTier {
        match self {
            Self::Direct { .. } => LoopbackTier::ApplicationSession,
            Self::Fallback { .. } => LoopbackTier::SystemLoopback,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Direct { session } => format!("{} (pid {})", session.display_name, session.process_id),
            Self::Fallback { device } => device.name.clone(),
        }
    }
}

/// Records an application's audio, or all system audio when no application
/// is selected or its session cannot be captured.
///
/// ```text
/// start → [application session] ──fail──→ [system loopback] ──fail──→ NoLoopbackDevice
/// ```
///
/// The target is resolved again on every start; a pid from an earlier
/// recording may belong to a process that no longer exists.
pub struct LoopbackRecorder {
    resolver: Arc<ApplicationTargetResolver>,
    application: Option<AudioApplication>,
    format: CaptureFormat,
    capture: StreamCapture,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    active: Option<ActiveLoopback>,
    started: Option<Started>,
}

impl LoopbackRecorder {
    pub fn new(
        resolver: Arc<ApplicationTargetResolver>,
        application: Option<AudioApplication>,
        format: CaptureFormat,
    ) -> Self {
        Self {
            resolver,
            application,
            format,
            capture: StreamCapture::new(SourceTag::Application),
            delegate: None,
            active: None,
            started: None,
        }
    }

    pub fn application(&self) -> Option<&AudioApplication> {
        self.application.as_ref()
    }

    /// Strategy of the current or last recording.
    pub fn active(&self) -> Option<&ActiveLoopback> {
        self.active.as_ref()
    }

    /// Rebind to a new rate. Only takes effect on the next start.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.format = self.format.with_sample_rate(sample_rate);
    }

    /// Native rate of the endpoint the next start would most likely open.
    ///
    /// A session without a known rate renders into the system mix, so the
    /// system loopback device's rate stands in for it.
    pub fn probe_native_rate(&self) -> Option<u32> {
        let endpoint = match &self.application {
            Some(app) => self.resolver.resolve(app),
            None => self
                .resolver
                .system_loopback()
                .map(CaptureEndpoint::SystemLoopback)
                .unwrap_or(CaptureEndpoint::Unavailable),
        };

        match endpoint {
            CaptureEndpoint::Session { session, .. } => session
                .sample_rate
                .or_else(|| self.resolver.system_loopback().ok().map(|d| d.sample_rate)),
            CaptureEndpoint::SystemLoopback(device) => Some(device.sample_rate),
            CaptureEndpoint::Unavailable => None,
        }
    }

    fn open_tier(&self, tier: LoopbackTier) -> Result<(Box<dyn CaptureStream>, ActiveLoopback), CaptureError> {
        match tier {
            LoopbackTier::ApplicationSession => self.open_session(),
            LoopbackTier::SystemLoopback => self.open_system_loopback(),
        }
    }

    fn open_session(&self) -> Result<(Box<dyn CaptureStream>, ActiveLoopback), CaptureError> {
        let app = self
            .application
            .as_ref()
            .ok_or_else(|| CaptureError::SessionNotFound("no application selected".into()))?;
        let provider = self
            .resolver
            .session_provider()
            .ok_or_else(|| CaptureError::BackendUnavailable("audio session API not available".into()))?;
        let session = self.resolver.resolve_session(app)?;

        let request = StreamRequest {
            native_index: 0,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            frames_per_buffer: self.format.frames_per_buffer,
            loopback: true,
        };
        let callback = self.capture.frame_callback(self.delegate.clone());
        let stream = provider.open_session_stream(&session, &request, callback)?;
        Ok((stream, ActiveLoopback::Direct { session }))
    }

    fn open_system_loopback(&self) -> Result<(Box<dyn CaptureStream>, ActiveLoopback), CaptureError> {
        let device = self.resolver.system_loopback()?;
        let backend = self
            .resolver
            .catalog()
            .backend(device.backend)
            .ok_or_else(|| CaptureError::BackendUnavailable(format!("no backend for '{}'", device.name)))?;

        let request = StreamRequest {
            native_index: device.native_index(),
            sample_rate: device.sample_rate,
            channels: self.format.channels.min(device.channels).max(1),
            frames_per_buffer: self.format.frames_per_buffer,
            loopback: true,
        };
        let callback = self.capture.frame_callback(self.delegate.clone());
        let stream = backend.open_stream(&request, callback)?;
        Ok((stream, ActiveLoopback::Fallback { device }))
    }

    fn climb_ladder(&mut self) -> Result<Started, CaptureError> {
        for tier in TIER_LADDER {
            let (stream, active) = match self.open_tier(tier) {
                Ok(opened) => opened,
                Err(e) if e.is_recoverable_by_fallback() => {
                    log::info!("Loopback tier '{}' unavailable: {}", tier, e);
                    continue;
                }
                Err(e) => {
                    log::warn!("Loopback tier '{}' failed: {}", tier, e);
                    continue;
                }
            };

            let started = Started {
                sample_rate: stream.sample_rate(),
                channels: stream.channels(),
                device_name: active.describe(),
                tier: Some(tier),
            };
            log::info!(
                "Loopback capture active on tier '{}': {} at {} Hz, {} ch",
                tier,
                started.device_name,
                started.sample_rate,
                started.channels
            );

            self.capture.attach(stream);
            self.active = Some(active);
            if let Some(delegate) = &self.delegate {
                delegate.on_tier_activated(tier);
            }
            return Ok(started);
        }

        Err(CaptureError::NoLoopbackDevice)
    }
}

impl SourceRecorder for LoopbackRecorder {
    fn source(&self) -> SourceTag {
        SourceTag::Application
    }

    fn state(&self) -> RecorderState {
        self.capture.state()
    }

    fn start(&mut self) -> Result<Started, CaptureError> {
        if let (RecorderState::Recording, Some(started)) = (self.capture.state(), &self.started) {
            return Ok(started.clone());
        }

        self.capture.begin_start();
        self.active = None;
        match self.climb_ladder() {
            Ok(started) => {
                self.started = Some(started.clone());
                Ok(started)
            }
            Err(e) => {
                self.capture.fail_start();
                log::error!("All loopback tiers exhausted");
                Err(e)
            }
        }
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.capture.stop(self.format.stop_timeout)
    }

    fn drain(&mut self) -> Vec<f32> {
        self.capture.take_samples(self.format.channels)
    }

    fn sample_rate(&self) -> u32 {
        match (&self.started, self.capture.state()) {
            (Some(started), RecorderState::Recording) => started.sample_rate,
            _ => self.format.sample_rate,
        }
    }

    fn output_channels(&self) -> u16 {
        self.format.channels
    }

    fn set_delegate(&mut self, delegate: Option<Arc<dyn CaptureDelegate>>) {
        self.delegate = delegate;
    }
}
