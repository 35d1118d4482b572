use std::sync::Arc;

use crate::discovery::device_catalog::DeviceCatalog;
use crate::models::audio_models::{AudioDevice, SourceTag};
use crate::models::error::CaptureError;
use crate::models::state::RecorderState;
use crate::recorder::stream_capture::StreamCapture;
use crate::recorder::CaptureFormat;
use crate::traits::backend::StreamRequest;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::source_recorder::{SourceRecorder, Started};

/// Records a generic input device through its owning backend.
///
/// Bound to one rate at construction; a new rate means a new recorder.
pub struct MicRecorder {
    catalog: Arc<DeviceCatalog>,
    device: AudioDevice,
    format: CaptureFormat,
    capture: StreamCapture,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    started: Option<Started>,
}

impl MicRecorder {
    pub fn new(catalog: Arc<DeviceCatalog>, device: AudioDevice, format: CaptureFormat) -> Self {
        Self {
            catalog,
            device,
            format,
            capture: StreamCapture::new(SourceTag::Microphone),
            delegate: None,
            started: None,
        }
    }

    pub fn device(&self) -> &AudioDevice {
        &self.device
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    fn open(&mut self) -> Result<Started, CaptureError> {
        let backend = self
            .catalog
            .backend(self.device.backend)
            .ok_or_else(|| CaptureError::BackendUnavailable(format!("no backend for '{}'", self.device.name)))?;

        let request = StreamRequest {
            native_index: self.device.native_index(),
            sample_rate: self.format.sample_rate,
            channels: self.format.channels.min(self.device.channels).max(1),
            frames_per_buffer: self.format.frames_per_buffer,
            loopback: false,
        };
        let callback = self.capture.frame_callback(self.delegate.clone());
        let stream = backend.open_stream(&request, callback)?;

        let started = Started {
            sample_rate: stream.sample_rate(),
            channels: stream.channels(),
            device_name: self.device.name.clone(),
            tier: None,
        };
        self.capture.attach(stream);
        Ok(started)
    }
}

impl SourceRecorder for MicRecorder {
    fn source(&self) -> SourceTag {
        SourceTag::Microphone
    }

    fn state(&self) -> RecorderState {
        self.capture.state()
    }

    fn start(&mut self) -> Result<Started, CaptureError> {
        if let (RecorderState::Recording, Some(started)) = (self.capture.state(), &self.started) {
            return Ok(started.clone());
        }

        self.capture.begin_start();
        match self.open() {
            Ok(started) => {
                log::info!(
                    "Microphone '{}' recording at {} Hz, {} ch",
                    started.device_name,
                    started.sample_rate,
                    started.channels
                );
                self.started = Some(started.clone());
                Ok(started)
            }
            Err(e) => {
                self.capture.fail_start();
                log::error!("Failed to open microphone '{}': {}", self.device.name, e);
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::audio_models::BackendKind;
    use crate::test_support::{input_device, FakeBackend};
    use crate::traits::backend::AudioBackend;

    fn setup() -> (Arc<FakeBackend>, Arc<DeviceCatalog>) {
        let backend = Arc::new(FakeBackend::new(BackendKind::Primary, vec![input_device(0, "USB Mic", 48000, 1)]));
        let catalog = Arc::new(DeviceCatalog::new(Some(backend.clone() as Arc<dyn AudioBackend>), None));
        (backend, catalog)
    }

    fn format(sample_rate: u32) -> CaptureFormat {
        CaptureFormat {
            sample_rate,
            channels: 2,
            frames_per_buffer: 1024,
            stop_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn records_and_drains_in_order() {
        let (backend, catalog) = setup();
        let device = catalog.find_by_name("USB Mic").unwrap();
        let mut mic = MicRecorder::new(catalog, device, format(44100));

        let started = mic.start().unwrap();
        assert_eq!(started.sample_rate, 44100);
        assert_eq!(started.channels, 1);
        assert_eq!(mic.state(), RecorderState::Recording);

        backend.push(0, &[0.1, 0.2]);
        backend.push(0, &[0.3]);
        mic.stop().unwrap();

        assert_eq!(backend.open_count(), 0);
        assert_eq!(mic.drain(), vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn start_is_idempotent() {
        let (backend, catalog) = setup();
        let device = catalog.find_by_name("USB Mic").unwrap();
        let mut mic = MicRecorder::new(catalog, device, format(48000));

        mic.start().unwrap();
        mic.start().unwrap();
        assert_eq!(backend.open_count(), 1);

        mic.stop().unwrap();
        mic.stop().unwrap();
        assert_eq!(mic.state(), RecorderState::Idle);
    }

    #[test]
    fn failed_open_returns_to_idle() {
        let (backend, catalog) = setup();
        backend.fail_open(0);
        let device = catalog.find_by_name("USB Mic").unwrap();
        let mut mic = MicRecorder::new(catalog, device, format(48000));

        assert!(matches!(mic.start(), Err(CaptureError::StreamOpenFailed(_))));
        assert_eq!(mic.state(), RecorderState::Idle);
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn restart_clears_previous_frames() {
        let (backend, catalog) = setup();
        let device = catalog.find_by_name("USB Mic").unwrap();
        let mut mic = MicRecorder::new(catalog, device, format(48000));

        mic.start().unwrap();
        backend.push(0, &[0.5]);
        mic.stop().unwrap();

        mic.start().unwrap();
        backend.push(0, &[0.25]);
        mic.stop().unwrap();

        assert_eq!(mic.drain(), vec![0.25, 0.25]);
    }

    #[test]
    fn stop_with_no_frames_drains_empty() {
        let (_backend, catalog) = setup();
        let device = catalog.find_by_name("USB Mic").unwrap();
        let mut mic = MicRecorder::new(catalog, device, format(48000));

        mic.start().unwrap();
        mic.stop().unwrap();
        assert!(mic.drain().is_empty());
    }
}
