use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::discovery::device_catalog::DeviceCatalog;
use crate::discovery::target_resolver::ApplicationTargetResolver;
use crate::models::audio_models::{AudioApplication, AudioDevice, AudioTrack, SourceTag};
use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::recording_result::{RecordingMetadata, RecordingResult};
use crate::models::state::RecordingSessionInfo;
use crate::processing::mixer::Mixer;
use crate::processing::wav_format::PcmFormat;
use crate::recorder::loopback::LoopbackRecorder;
use crate::recorder::mic::MicRecorder;
use crate::recorder::CaptureFormat;
use crate::storage::wav_writer::write_wav;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::source_recorder::{SourceRecorder, Started};

/// What the loopback recorder should follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopbackSource {
    Application(AudioApplication),
    /// Everything the default playback device renders.
    SystemAudio,
}

/// Orchestrates up to one microphone and one loopback recorder.
///
/// ```text
/// [MicRecorder]      → drain ─┐
///                             ├→ [Mixer] → 16-bit PCM → [WAV file]
/// [LoopbackRecorder] → drain ─┘
/// ```
///
/// One rate is negotiated before any stream opens and holds for the whole
/// recording; nothing is resampled. `start`/`stop` must be called from a
/// single orchestrating thread.
pub struct CaptureSession {
    catalog: Arc<DeviceCatalog>,
    resolver: Arc<ApplicationTargetResolver>,
    config: CaptureConfiguration,
    mic: Option<MicRecorder>,
    loopback: Option<LoopbackRecorder>,
    effective_sample_rate: u32,
    is_active: bool,
    output_path: Option<PathBuf>,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    mic_started: Option<Started>,
    loopback_started: Option<Started>,
}

impl CaptureSession {
    pub fn new(
        catalog: Arc<DeviceCatalog>,
        resolver: Arc<ApplicationTargetResolver>,
        config: CaptureConfiguration,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(Self {
            catalog,
            resolver,
            effective_sample_rate: config.sample_rate,
            config,
            mic: None,
            loopback: None,
            is_active: false,
            output_path: None,
            delegate: None,
            mic_started: None,
            loopback_started: None,
        })
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn CaptureDelegate>) {
        self.delegate = Some(delegate);
        self.bind_delegate();
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn effective_sample_rate(&self) -> u32 {
        self.effective_sample_rate
    }

    pub fn config(&self) -> &CaptureConfiguration {
        &self.config
    }

    pub fn info(&self) -> RecordingSessionInfo {
        RecordingSessionInfo {
            source_count: self.mic.is_some() as usize + self.loopback.is_some() as usize,
            effective_sample_rate: self.effective_sample_rate,
            channels: self.config.channels,
            is_active: self.is_active,
            output_path: self.output_path.clone(),
        }
    }

    /// The configured microphone by name, or the default input.
    pub fn preferred_microphone(&self) -> Option<AudioDevice> {
        if let Some(name) = &self.config.microphone_device {
            match self.catalog.find_by_name(name) {
                Some(device) => return Some(device),
                None => log::warn!("Configured microphone '{}' not found; using default input", name),
            }
        }
        self.catalog.default_input()
    }

    /// Select sources. Selecting an application makes the loopback
    /// endpoint's native rate the session rate.
    pub fn configure(&mut self, mic: Option<AudioDevice>, app: Option<AudioApplication>) -> Result<(), CaptureError> {
        self.configure_sources(mic, app.map(LoopbackSource::Application))
    }

    pub fn configure_sources(
        &mut self,
        mic: Option<AudioDevice>,
        loopback: Option<LoopbackSource>,
    ) -> Result<(), CaptureError> {
        if self.is_active {
            log::warn!("Ignoring configure while a recording is active");
            return Err(CaptureError::AlreadyActive);
        }

        let format = CaptureFormat::from_config(&self.config);
        let mut rate = self.config.sample_rate;

        let mut loopback = loopback.map(|source| {
            let application = match source {
                LoopbackSource::Application(app) => Some(app),
                LoopbackSource::SystemAudio => None,
            };
            LoopbackRecorder::new(Arc::clone(&self.resolver), application, format)
        });

        if let Some(recorder) = loopback.as_mut() {
            match recorder.probe_native_rate() {
                Some(native) if native != rate => {
                    log::info!("Session rate renegotiated {} Hz -> {} Hz to match loopback endpoint", rate, native);
                    rate = native;
                }
                Some(_) => {}
                None => log::warn!("Could not probe loopback endpoint rate; keeping {} Hz", rate),
            }
            recorder.set_sample_rate(rate);
        }

        if let Some(device) = mic.as_ref().filter(|d| !self.catalog.supports_sample_rate(d, rate)) {
            if loopback.is_some() {
                log::warn!(
                    "Microphone '{}' cannot run at the loopback rate of {} Hz (its own rate is {} Hz)",
                    device.name,
                    rate,
                    device.sample_rate
                );
                return Err(CaptureError::ConfigurationFailed(format!(
                    "microphone '{}' does not support the loopback rate of {} Hz (native {} Hz)",
                    device.name, rate, device.sample_rate
                )));
            }
            log::info!(
                "Microphone '{}' does not support {} Hz; using its own {} Hz",
                device.name,
                rate,
                device.sample_rate
            );
            rate = device.sample_rate;
        }

        self.mic = mic.map(|device| MicRecorder::new(Arc::clone(&self.catalog), device, format.with_sample_rate(rate)));
        self.loopback = loopback;
        self.effective_sample_rate = rate;
        self.bind_delegate();

        log::debug!(
            "Configured {} source(s) at {} Hz, {} ch",
            self.info().source_count,
            rate,
            self.config.channels
        );
        Ok(())
    }

    /// Open every configured source. On failure nothing is left open.
    pub fn start(&mut self, output_path: &Path) -> Result<(), CaptureError> {
        if self.is_active {
            return Err(CaptureError::AlreadyActive);
        }
        if self.mic.is_none() && self.loopback.is_none() {
            return Err(CaptureError::NoSourcesConfigured);
        }

        if let Some(actual) = self.start_sources()? {
            log::info!("Retrying start with the session rebound to {} Hz", actual);
            self.rebind_rate(actual);
            if let Some(again) = self.start_sources()? {
                return Err(CaptureError::ConfigurationFailed(format!(
                    "loopback opened at {} Hz after renegotiating to {} Hz",
                    again, actual
                )));
            }
        }

        self.is_active = true;
        self.output_path = Some(output_path.to_path_buf());
        log::info!(
            "Recording started: {} source(s) at {} Hz -> {}",
            self.info().source_count,
            self.effective_sample_rate,
            output_path.display()
        );
        Ok(())
    }

    /// Stop both sources, mix and write the file.
    ///
    /// Returns `Ok(None)` when nothing was recording. A source that fails to
    /// stop cleanly still contributes what it captured.
    pub fn stop(&mut self) -> Result<Option<RecordingResult>, CaptureError> {
        if !self.is_active {
            return Ok(None);
        }
        self.is_active = false;

        let output_path = self
            .output_path
            .take()
            .ok_or_else(|| CaptureError::StorageError("no output path for active recording".into()))?;
        let channels = self.config.channels;
        let rate = self.effective_sample_rate;
        let mut tracks = Vec::new();

        let mic_samples = match self.mic.as_mut() {
            Some(mic) => {
                if let Err(e) = mic.stop() {
                    log::warn!("Microphone stop failed, keeping its audio: {}", e);
                }
                let samples = mic.drain();
                push_track(&mut tracks, SourceTag::Microphone, self.mic_started.as_ref(), &samples, channels);
                samples
            }
            None => Vec::new(),
        };

        let loopback_samples = match self.loopback.as_mut() {
            Some(loopback) => {
                if let Err(e) = loopback.stop() {
                    log::warn!("Loopback stop failed, keeping its audio: {}", e);
                }
                let samples = loopback.drain();
                push_track(&mut tracks, SourceTag::Application, self.loopback_started.as_ref(), &samples, channels);
                samples
            }
            None => Vec::new(),
        };

        let mix = Mixer::new(channels).mix_down(&mic_samples, &loopback_samples).map_err(|e| {
            log::warn!("Neither source captured audio; nothing written");
            e
        })?;
        if mix.sources == 2 {
            let dropped = (mic_samples.len().max(loopback_samples.len()) - mix.samples.len()) / channels as usize;
            if dropped > 0 {
                log::debug!("Truncated {} trailing frames from the longer source", dropped);
            }
        }

        let summary = write_wav(&output_path, &mix.samples, PcmFormat::pcm16(rate, channels))?;
        let duration_secs = summary.frames as f64 / rate as f64;
        let tier = self.loopback_started.as_ref().and_then(|s| s.tier);

        let metadata = RecordingMetadata::new(
            duration_secs,
            &output_path.to_string_lossy(),
            &summary.checksum,
            rate,
            channels,
            tracks,
            tier,
        );
        let result = RecordingResult {
            file_path: output_path,
            frames: summary.frames,
            sample_rate: rate,
            channels,
            duration_secs,
            checksum: summary.checksum,
            metadata,
        };

        log::info!(
            "Recording saved: {} ({} frames, {:.1}s)",
            result.file_path.display(),
            result.frames,
            result.duration_secs
        );
        if let Some(delegate) = &self.delegate {
            delegate.on_capture_finished(&result);
        }
        Ok(Some(result))
    }

    /// Start mic then loopback. `Ok(Some(rate))` means the loopback opened
    /// at `rate` instead of the negotiated one and everything was rolled back.
    fn start_sources(&mut self) -> Result<Option<u32>, CaptureError> {
        let rate = self.effective_sample_rate;
        self.mic_started = None;
        self.loopback_started = None;

        if let Some(mic) = self.mic.as_mut() {
            self.mic_started = Some(mic.start()?);
        }

        if let Some(loopback) = self.loopback.as_mut() {
            match loopback.start() {
                Ok(started) => {
                    let actual = started.sample_rate;
                    self.loopback_started = Some(started);
                    if actual != rate {
                        log::warn!("Loopback opened at {} Hz but the session negotiated {} Hz", actual, rate);
                        self.rollback();
                        return Ok(Some(actual));
                    }
                }
                Err(e) => {
                    if self.mic_started.is_some() {
                        log::warn!("Loopback failed to start; closing microphone");
                    }
                    self.rollback();
                    return Err(e);
                }
            }
        }

        let mic_rate = self.mic_started.as_ref().map(|s| s.sample_rate);
        if let Some(actual) = mic_rate.filter(|&actual| actual != rate) {
            if self.loopback.is_none() {
                log::info!("Microphone opened at {} Hz; using it as the session rate", actual);
                self.effective_sample_rate = actual;
            } else {
                self.rollback();
                return Err(CaptureError::StreamOpenFailed(format!(
                    "microphone opened at {} Hz, session requires {} Hz",
                    actual, rate
                )));
            }
        }

        Ok(None)
    }

    fn rollback(&mut self) {
        if let Some(loopback) = self.loopback.as_mut() {
            let _ = loopback.stop();
            loopback.drain();
        }
        if let Some(mic) = self.mic.as_mut() {
            let _ = mic.stop();
            mic.drain();
        }
        self.mic_started = None;
        self.loopback_started = None;
    }

    /// Streams cannot change rate once open, so the mic is rebuilt.
    fn rebind_rate(&mut self, rate: u32) {
        self.effective_sample_rate = rate;
        if let Some(mic) = self.mic.take() {
            let format = mic.format().with_sample_rate(rate);
            self.mic = Some(MicRecorder::new(Arc::clone(&self.catalog), mic.device().clone(), format));
        }
        if let Some(loopback) = self.loopback.as_mut() {
            loopback.set_sample_rate(rate);
        }
        self.bind_delegate();
    }

    fn bind_delegate(&mut self) {
        if let Some(mic) = self.mic.as_mut() {
            mic.set_delegate(self.delegate.clone());
        }
        if let Some(loopback) = self.loopback.as_mut() {
            loopback.set_delegate(self.delegate.clone());
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.is_active {
            log::warn!("Capture session dropped while recording; discarding audio");
            self.rollback();
        }
    }
}

fn push_track(tracks: &mut Vec<AudioTrack>, source: SourceTag, started: Option<&Started>, samples: &[f32], channels: u16) {
    if samples.is_empty() {
        return;
    }
    tracks.push(AudioTrack {
        source,
        device_name: started.map(|s| s.device_name.clone()).unwrap_or_default(),
        channels: started.map(|s| s.channels).unwrap_or(channels),
        frames: (samples.len() / channels.max(1) as usize) as u64,
    });
}
