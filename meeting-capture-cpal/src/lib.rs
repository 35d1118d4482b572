//! # meeting-capture-cpal
//!
//! Generic cross-platform backend built on `cpal`.
//!
//! `cpal::Stream` is not `Send`, so every stream is built, played and dropped
//! on its own `CaptureWorker` thread; the returned `CaptureStream` only holds
//! the worker.
//!
//! Loopback requests on an output device build an input stream on that
//! device, which cpal supports on WASAPI. Elsewhere the open fails and the
//! loopback ladder moves on.

use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, FromSample, SampleFormat, SizedSample, StreamConfig, SupportedBufferSize, SupportedStreamConfig};
use parking_lot::Mutex;

use meeting_capture_core::{
    AudioBackend, AudioDevice, BackendKind, CaptureError, CaptureStream, CaptureWorker, FrameCallback, StreamRequest,
};

/// Upper bound on waiting for a stream to build and start playing.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval at which an idle capture thread checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a native index maps back to a cpal device.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeviceKey {
    name: String,
    is_input: bool,
}

/// Backend A: every input and output device of one cpal host.
///
/// Native indices are positions in the last enumeration; inputs are listed
/// before outputs.
pub struct CpalBackend {
    host_id: cpal::HostId,
    name: String,
    keys: Mutex<Vec<DeviceKey>>,
}

impl CpalBackend {
    /// Use the platform's default host.
    pub fn new() -> Result<Self, CaptureError> {
        Self::with_host(cpal::default_host().id())
    }

    pub fn with_host(host_id: cpal::HostId) -> Result<Self, CaptureError> {
        cpal::host_from_id(host_id)
            .map_err(|e| CaptureError::BackendUnavailable(format!("cpal host {:?}: {}", host_id, e)))?;
        Ok(Self {
            host_id,
            name: format!("cpal/{}", host_id.name()),
            keys: Mutex::new(Vec::new()),
        })
    }

    fn host(&self) -> Result<cpal::Host, CaptureError> {
        cpal::host_from_id(self.host_id).map_err(|e| CaptureError::BackendUnavailable(e.to_string()))
    }

    fn key(&self, native_index: u32) -> Result<DeviceKey, CaptureError> {
        if self.keys.lock().is_empty() {
            self.enumerate()?;
        }
        self.keys
            .lock()
            .get(native_index as usize)
            .cloned()
            .ok_or_else(|| CaptureError::DeviceNotFound(format!("cpal device {}", native_index)))
    }

    fn find_device(&self, key: &DeviceKey) -> Result<cpal::Device, CaptureError> {
        let host = self.host()?;
        let matches = |d: &cpal::Device| d.name().map(|n| n == key.name).unwrap_or(false);
        let found = if key.is_input {
            host.input_devices()
                .map_err(|e| CaptureError::BackendUnavailable(e.to_string()))?
                .find(matches)
        } else {
            host.output_devices()
                .map_err(|e| CaptureError::BackendUnavailable(e.to_string()))?
                .find(matches)
        };
        found.ok_or_else(|| CaptureError::DeviceNotFound(key.name.clone()))
    }

    fn stream_config(
        &self,
        device: &cpal::Device,
        key: &DeviceKey,
        request: &StreamRequest,
    ) -> Result<SupportedStreamConfig, CaptureError> {
        let open_err = |e: String| CaptureError::StreamOpenFailed(format!("'{}': {}", key.name, e));

        // Loopback on an output device runs at the mix format.
        if !key.is_input {
            return device.default_output_config().map_err(|e| open_err(e.to_string()));
        }

        let ranges: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| open_err(e.to_string()))?
            .filter(|c| c.min_sample_rate().0 <= request.sample_rate && request.sample_rate <= c.max_sample_rate().0)
            .collect();

        let best = ranges
            .into_iter()
            .min_by_key(|c| (c.channels() != request.channels, format_rank(c.sample_format())));
        match best {
            Some(range) => Ok(range.with_sample_rate(cpal::SampleRate(request.sample_rate))),
            None => {
                log::warn!(
                    "'{}' does not support {} Hz; opening at its default rate",
                    key.name,
                    request.sample_rate
                );
                device.default_input_config().map_err(|e| open_err(e.to_string()))
            }
        }
    }
}

impl AudioBackend for CpalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Primary
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn enumerate(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        let host = self.host()?;
        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        let mut devices = Vec::new();
        let mut keys = Vec::new();

        let inputs = host
            .input_devices()
            .map_err(|e| CaptureError::BackendUnavailable(e.to_string()))?;
        for device in inputs {
            let Ok(name) = device.name() else { continue };
            let config = match device.default_input_config() {
                Ok(config) => config,
                Err(e) => {
                    log::debug!("Skipping input '{}': {}", name, e);
                    continue;
                }
            };
            devices.push(AudioDevice {
                index: keys.len() as u32,
                backend: BackendKind::Primary,
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
                is_input: true,
                is_output: false,
                is_default: default_input.as_deref() == Some(name.as_str()),
                is_loopback: false,
                name: name.clone(),
            });
            keys.push(DeviceKey { name, is_input: true });
        }

        let outputs = host
            .output_devices()
            .map_err(|e| CaptureError::BackendUnavailable(e.to_string()))?;
        for device in outputs {
            let Ok(name) = device.name() else { continue };
            let config = match device.default_output_config() {
                Ok(config) => config,
                Err(e) => {
                    log::debug!("Skipping output '{}': {}", name, e);
                    continue;
                }
            };
            devices.push(AudioDevice {
                index: keys.len() as u32,
                backend: BackendKind::Primary,
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
                is_input: false,
                is_output: true,
                is_default: default_output.as_deref() == Some(name.as_str()),
                is_loopback: false,
                name: name.clone(),
            });
            keys.push(DeviceKey { name, is_input: false });
        }

        *self.keys.lock() = keys;
        Ok(devices)
    }

    fn supports_sample_rate(&self, native_index: u32, sample_rate: u32, is_input: bool) -> bool {
        let Ok(key) = self.key(native_index) else {
            return false;
        };
        let Ok(device) = self.find_device(&key) else {
            return false;
        };

        let in_range = |min: cpal::SampleRate, max: cpal::SampleRate| min.0 <= sample_rate && sample_rate <= max.0;
        if is_input && key.is_input {
            device
                .supported_input_configs()
                .map(|mut ranges| ranges.any(|c| in_range(c.min_sample_rate(), c.max_sample_rate())))
                .unwrap_or(false)
        } else {
            device
                .supported_output_configs()
                .map(|mut ranges| ranges.any(|c| in_range(c.min_sample_rate(), c.max_sample_rate())))
                .unwrap_or(false)
        }
    }

    fn open_stream(
        &self,
        request: &StreamRequest,
        callback: FrameCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let key = self.key(request.native_index)?;
        if !key.is_input && !request.loopback {
            return Err(CaptureError::StreamOpenFailed(format!("'{}' is not an input device", key.name)));
        }

        let device = self.find_device(&key)?;
        let supported = self.stream_config(&device, &key, request)?;
        let sample_format = supported.sample_format();
        let buffer_size = buffer_size_for(request.frames_per_buffer, supported.buffer_size());
        if buffer_size == BufferSize::Default {
            log::debug!(
                "'{}' does not report a buffer range; ignoring the {}-frame request",
                key.name,
                request.frames_per_buffer
            );
        }
        let mut config: StreamConfig = supported.into();
        config.buffer_size = buffer_size;
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        log::debug!(
            "Opening '{}' at {} Hz, {} ch, {:?}{}",
            key.name,
            sample_rate,
            channels,
            sample_format,
            if request.loopback { " (loopback)" } else { "" }
        );

        let (ready_tx, ready_rx) = mpsc::channel();
        let device_name = key.name.clone();
        let worker = CaptureWorker::spawn(&format!("cpal-{}", key.name), move |token| {
            let stream = match build_stream(&device, &config, sample_format, callback, &device_name) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CaptureError::StreamOpenFailed(e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while !token.is_cancelled() {
                std::thread::park_timeout(POLL_INTERVAL);
            }
            drop(stream);
            log::debug!("Capture stream '{}' released", device_name);
        })?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(CaptureError::StreamOpenFailed(format!(
                    "'{}' did not start within {:?}",
                    key.name, OPEN_TIMEOUT
                )))
            }
        }

        Ok(Box::new(CpalStream {
            worker,
            name: key.name,
            sample_rate,
            channels,
        }))
    }
}

/// A running cpal stream owned by its worker thread.
pub struct CpalStream {
    worker: CaptureWorker,
    name: String,
    sample_rate: u32,
    channels: u16,
}

impl CaptureStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn close(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        if self.worker.stop(timeout) {
            Ok(())
        } else {
            Err(CaptureError::StopTimedOut(self.name.clone()))
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    callback: FrameCallback,
    name: &str,
) -> Result<cpal::Stream, CaptureError> {
    match sample_format {
        SampleFormat::F32 => build_typed::<f32>(device, config, callback, name),
        SampleFormat::I16 => build_typed::<i16>(device, config, callback, name),
        SampleFormat::U16 => build_typed::<u16>(device, config, callback, name),
        SampleFormat::I32 => build_typed::<i32>(device, config, callback, name),
        other => Err(CaptureError::StreamOpenFailed(format!(
            "'{}' uses unsupported sample format {:?}",
            name, other
        ))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut callback: FrameCallback,
    name: &str,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels;
    let mut scratch: Vec<f32> = Vec::new();
    let err_name = name.to_string();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| <f32 as FromSample<T>>::from_sample_(s)));
                callback(&scratch, channels);
            },
            move |err| log::error!("Audio stream error on '{}': {}", err_name, err),
            None,
        )
        .map_err(|e| CaptureError::StreamOpenFailed(format!("'{}': {}", name, e)))
}

/// The requested block size, clamped to what the device reports.
fn buffer_size_for(frames_per_buffer: u32, supported: &SupportedBufferSize) -> BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } if frames_per_buffer > 0 && min <= max => {
            BufferSize::Fixed(frames_per_buffer.clamp(*min, *max))
        }
        _ => BufferSize::Default,
    }
}

/// Lower is preferred when several configs fit.
fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::F32 => 0,
        SampleFormat::I16 => 1,
        SampleFormat::I32 => 2,
        SampleFormat::U16 => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_formats_rank_first() {
        assert!(format_rank(SampleFormat::F32) < format_rank(SampleFormat::I16));
        assert!(format_rank(SampleFormat::I16) < format_rank(SampleFormat::U16));
    }

    #[test]
    fn buffer_request_is_clamped_to_the_device_range() {
        let range = SupportedBufferSize::Range { min: 256, max: 4096 };
        assert_eq!(buffer_size_for(1024, &range), BufferSize::Fixed(1024));
        assert_eq!(buffer_size_for(64, &range), BufferSize::Fixed(256));
        assert_eq!(buffer_size_for(16384, &range), BufferSize::Fixed(4096));
    }

    #[test]
    fn unknown_buffer_range_uses_the_host_default() {
        assert_eq!(buffer_size_for(1024, &SupportedBufferSize::Unknown), BufferSize::Default);
        let range = SupportedBufferSize::Range { min: 256, max: 4096 };
        assert_eq!(buffer_size_for(0, &range), BufferSize::Default);
    }

    #[test]
    fn unknown_index_is_device_not_found() {
        let backend = CpalBackend {
            host_id: cpal::default_host().id(),
            name: "cpal/test".into(),
            keys: Mutex::new(vec![DeviceKey {
                name: "Mic".into(),
                is_input: true,
            }]),
        };
        assert!(matches!(backend.key(5), Err(CaptureError::DeviceNotFound(_))));
        assert_eq!(backend.key(0).unwrap().name, "Mic");
    }
}
