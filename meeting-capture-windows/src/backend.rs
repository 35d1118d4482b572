//! Backend B: WASAPI endpoints, with every render endpoint also offered as
//! a loopback source.

use parking_lot::Mutex;
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, IMMDevice, AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM,
    AUDCLNT_STREAMFLAGS_LOOPBACK, AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY, WAVEFORMATEX,
};
use windows::Win32::Foundation::S_OK;
use windows::Win32::System::Com::{CoTaskMemFree, CLSCTX_ALL};

use meeting_capture_core::{
    AudioBackend, AudioDevice, BackendKind, CaptureError, CaptureStream, FrameCallback, StreamRequest,
};

use crate::capture_loop::{encoding_of, float_format, spawn_capture, PreparedCapture};
use crate::com::ComGuard;
use crate::endpoints::{mix_format, EndpointEnumerator, EndpointInfo, Flow};
use crate::error::WasapiError;
use crate::pcm::{buffer_duration, SampleEncoding};

/// Suffix that marks render endpoints offered for loopback capture.
const LOOPBACK_SUFFIX: &str = " [Loopback]";

#[derive(Debug, Clone, PartialEq, Eq)]
struct EndpointKey {
    id: String,
    name: String,
    flow: Flow,
}

/// WASAPI shared-mode backend.
///
/// Native indices are positions in the last enumeration: capture endpoints
/// first, then render endpoints as loopback devices.
pub struct WasapiBackend {
    keys: Mutex<Vec<EndpointKey>>,
}

impl WasapiBackend {
    pub fn new() -> Result<Self, CaptureError> {
        let _com = ComGuard::init().map_err(unavailable)?;
        EndpointEnumerator::new().map_err(unavailable)?;
        Ok(Self {
            keys: Mutex::new(Vec::new()),
        })
    }

    fn key(&self, native_index: u32) -> Result<EndpointKey, CaptureError> {
        if self.keys.lock().is_empty() {
            self.enumerate()?;
        }
        self.keys
            .lock()
            .get(native_index as usize)
            .cloned()
            .ok_or_else(|| CaptureError::DeviceNotFound(format!("WASAPI endpoint {}", native_index)))
    }
}

fn unavailable(e: WasapiError) -> CaptureError {
    CaptureError::BackendUnavailable(format!("WASAPI: {}", e))
}

fn to_device(index: u32, endpoint: &EndpointInfo) -> AudioDevice {
    let is_render = endpoint.flow == Flow::Render;
    AudioDevice {
        index,
        backend: BackendKind::Loopback,
        name: if is_render {
            format!("{}{}", endpoint.name, LOOPBACK_SUFFIX)
        } else {
            endpoint.name.clone()
        },
        channels: endpoint.channels,
        sample_rate: endpoint.sample_rate,
        is_input: true,
        is_output: false,
        is_default: endpoint.is_default,
        is_loopback: is_render,
    }
}

impl AudioBackend for WasapiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Loopback
    }

    fn name(&self) -> &str {
        "wasapi"
    }

    fn enumerate(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        let _com = ComGuard::init().map_err(unavailable)?;
        let enumerator = EndpointEnumerator::new().map_err(unavailable)?;

        let mut endpoints = enumerator.list(Flow::Capture)?;
        endpoints.extend(enumerator.list(Flow::Render)?);

        let devices = endpoints
            .iter()
            .enumerate()
            .map(|(i, endpoint)| to_device(i as u32, endpoint))
            .collect();
        *self.keys.lock() = endpoints
            .into_iter()
            .map(|e| EndpointKey {
                id: e.id,
                name: e.name,
                flow: e.flow,
            })
            .collect();
        Ok(devices)
    }

    fn supports_sample_rate(&self, native_index: u32, sample_rate: u32, _is_input: bool) -> bool {
        let Ok(key) = self.key(native_index) else {
            return false;
        };
        let probe = || -> Result<bool, WasapiError> {
            let _com = ComGuard::init()?;
            let device = EndpointEnumerator::new()?.device(&key.id)?;
            let (channels, mix_rate) = mix_format(&device)?;
            if key.flow == Flow::Render {
                // Loopback always runs at the mix rate.
                return Ok(mix_rate == sample_rate);
            }
            let client = activate(&device)?;
            let format = float_format(sample_rate, channels);
            let mut closest: *mut WAVEFORMATEX = std::ptr::null_mut();
            let hr = unsafe { client.IsFormatSupported(AUDCLNT_SHAREMODE_SHARED, &format, Some(&mut closest)) };
            if !closest.is_null() {
                unsafe { CoTaskMemFree(Some(closest as *const _)) };
            }
            Ok(hr == S_OK)
        };
        probe().unwrap_or_else(|e| {
            log::debug!("Rate probe on '{}' failed: {}", key.name, e);
            false
        })
    }

    fn open_stream(
        &self,
        request: &StreamRequest,
        callback: FrameCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let key = self.key(request.native_index)?;
        let loopback = match (key.flow, request.loopback) {
            (Flow::Render, _) => true,
            (Flow::Capture, false) => false,
            (Flow::Capture, true) => {
                return Err(CaptureError::StreamOpenFailed(format!(
                    "'{}' is a capture endpoint, not a render endpoint",
                    key.name
                )))
            }
        };

        log::debug!(
            "Opening WASAPI '{}' at {} Hz{}",
            key.name,
            request.sample_rate,
            if loopback { " (loopback, mix rate)" } else { "" }
        );

        let request = request.clone();
        let id = key.id.clone();
        spawn_capture(
            &key.name,
            move || {
                let device = EndpointEnumerator::new()?.device(&id)?;
                if loopback {
                    prepare_loopback(&device, request.frames_per_buffer)
                } else {
                    prepare_input(&device, &request)
                }
            },
            callback,
        )
    }
}

fn activate(device: &IMMDevice) -> Result<IAudioClient, WasapiError> {
    unsafe { device.Activate(CLSCTX_ALL, None) }.map_err(|e| WasapiError::com("IMMDevice::Activate", e))
}

/// Microphone capture at the requested rate; the engine resamples.
fn prepare_input(device: &IMMDevice, request: &StreamRequest) -> Result<PreparedCapture, WasapiError> {
    let (mix_channels, _) = mix_format(device)?;
    let channels = request.channels.clamp(1, mix_channels.max(1));
    let format = float_format(request.sample_rate, channels);
    let client = activate(device)?;
    unsafe {
        client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY,
            buffer_duration(request.frames_per_buffer, request.sample_rate),
            0,
            &format,
            None,
        )
    }
    .map_err(|e| WasapiError::com("IAudioClient::Initialize", e))?;

    let capture: IAudioCaptureClient =
        unsafe { client.GetService() }.map_err(|e| WasapiError::com("IAudioClient::GetService", e))?;
    Ok(PreparedCapture {
        client,
        capture,
        encoding: SampleEncoding::Float32,
        channels,
        sample_rate: request.sample_rate,
        frames_per_buffer: request.frames_per_buffer,
        event: None,
    })
}

/// Render-endpoint loopback at the endpoint's own mix format.
fn prepare_loopback(device: &IMMDevice, frames_per_buffer: u32) -> Result<PreparedCapture, WasapiError> {
    let client = activate(device)?;
    unsafe {
        let format_ptr = client.GetMixFormat().map_err(|e| WasapiError::com("GetMixFormat", e))?;
        let result = (|| -> Result<_, WasapiError> {
            let encoding = encoding_of(format_ptr)?;
            let format = std::ptr::read_unaligned(format_ptr);
            let duration = buffer_duration(frames_per_buffer, format.nSamplesPerSec);
            client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_LOOPBACK,
                    duration,
                    0,
                    format_ptr,
                    None,
                )
                .map_err(|e| WasapiError::com("IAudioClient::Initialize(loopback)", e))?;
            Ok((encoding, format.nChannels, format.nSamplesPerSec))
        })();
        CoTaskMemFree(Some(format_ptr as *const _));
        let (encoding, channels, sample_rate) = result?;

        let capture: IAudioCaptureClient =
            client.GetService().map_err(|e| WasapiError::com("IAudioClient::GetService", e))?;
        Ok(PreparedCapture {
            client,
            capture,
            encoding,
            channels,
            sample_rate,
            frames_per_buffer,
            event: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(flow: Flow, name: &str) -> EndpointInfo {
        EndpointInfo {
            id: format!("{{0.0.0.00000000}}.{}", name),
            name: name.into(),
            flow,
            channels: 2,
            sample_rate: 48000,
            is_default: true,
        }
    }

    #[test]
    fn render_endpoints_become_loopback_inputs() {
        let device = to_device(4, &endpoint(Flow::Render, "Speakers"));
        assert_eq!(device.name, "Speakers [Loopback]");
        assert!(device.is_loopback && device.is_input && !device.is_output);
        assert_eq!(device.backend, BackendKind::Loopback);
        assert_eq!(device.index, 4);
    }

    #[test]
    fn capture_endpoints_keep_their_name() {
        let device = to_device(0, &endpoint(Flow::Capture, "Headset Microphone"));
        assert_eq!(device.name, "Headset Microphone");
        assert!(!device.is_loopback);
    }
}
