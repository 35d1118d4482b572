//! Endpoint enumeration via the MMDevice API.

use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, EDataFlow, IAudioClient, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator,
    DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_ALL};

use crate::com::{as_pcwstr, device_id, friendly_name, wide};
use crate::error::WasapiError;

/// Which side of the audio graph an endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Capture,
    Render,
}

impl Flow {
    fn data_flow(self) -> EDataFlow {
        match self {
            Self::Capture => eCapture,
            Self::Render => eRender,
        }
    }
}

/// One active endpoint and its shared-mode mix format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub id: String,
    pub name: String,
    pub flow: Flow,
    pub channels: u16,
    pub sample_rate: u32,
    pub is_default: bool,
}

/// `IMMDeviceEnumerator` wrapper. Requires COM on the calling thread.
pub struct EndpointEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl EndpointEnumerator {
    pub fn new() -> Result<Self, WasapiError> {
        let enumerator = unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
            .map_err(|e| WasapiError::com("CoCreateInstance(MMDeviceEnumerator)", e))?;
        Ok(Self { enumerator })
    }

    pub fn list(&self, flow: Flow) -> Result<Vec<EndpointInfo>, WasapiError> {
        let collection = unsafe { self.enumerator.EnumAudioEndpoints(flow.data_flow(), DEVICE_STATE_ACTIVE) }
            .map_err(|e| WasapiError::com("EnumAudioEndpoints", e))?;
        let count = unsafe { collection.GetCount() }.map_err(|e| WasapiError::com("GetCount", e))?;

        let default_id = self.default_device(flow).ok().and_then(|d| device_id(&d).ok());

        let mut endpoints = Vec::new();
        for i in 0..count {
            let Ok(device) = (unsafe { collection.Item(i) }) else { continue };
            let Ok(id) = device_id(&device) else { continue };
            let (channels, sample_rate) = match mix_format(&device) {
                Ok(format) => format,
                Err(e) => {
                    log::debug!("Skipping endpoint {}: {}", id, e);
                    continue;
                }
            };

            endpoints.push(EndpointInfo {
                name: friendly_name(&device).unwrap_or_else(|| format!("Device {}", i)),
                is_default: default_id.as_deref() == Some(id.as_str()),
                id,
                flow,
                channels,
                sample_rate,
            });
        }
        Ok(endpoints)
    }

    pub fn default_device(&self, flow: Flow) -> Result<IMMDevice, WasapiError> {
        unsafe { self.enumerator.GetDefaultAudioEndpoint(flow.data_flow(), eConsole) }
            .map_err(|e| WasapiError::com("GetDefaultAudioEndpoint", e))
    }

    pub fn device(&self, id: &str) -> Result<IMMDevice, WasapiError> {
        let wide_id = wide(id);
        unsafe { self.enumerator.GetDevice(as_pcwstr(&wide_id)) }
            .map_err(|_| WasapiError::EndpointNotFound(id.to_string()))
    }
}

/// Channels and rate of the device's shared-mode mix format.
pub fn mix_format(device: &IMMDevice) -> Result<(u16, u32), WasapiError> {
    unsafe {
        let client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| WasapiError::com("IMMDevice::Activate", e))?;
        let format_ptr = client.GetMixFormat().map_err(|e| WasapiError::com("GetMixFormat", e))?;
        let format = *format_ptr;
        CoTaskMemFree(Some(format_ptr as *const _));
        Ok((format.nChannels, format.nSamplesPerSec))
    }
}
