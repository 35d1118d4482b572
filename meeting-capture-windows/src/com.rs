//! COM apartment handling and string helpers shared by the WASAPI modules.

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::IMMDevice;
use windows::Win32::System::Com::{CoInitializeEx, CoTaskMemFree, CoUninitialize, COINIT_MULTITHREADED, STGM_READ};

use crate::error::WasapiError;

/// Keeps COM initialized on the current thread for its lifetime.
///
/// A thread already in an STA keeps its apartment; the guard then leaves it
/// alone on drop.
pub struct ComGuard {
    owns_apartment: bool,
}

impl ComGuard {
    pub fn init() -> Result<Self, WasapiError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { owns_apartment: false });
        }
        hr.ok().map_err(|e| WasapiError::com("CoInitializeEx", e))?;
        Ok(Self { owns_apartment: true })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.owns_apartment {
            unsafe { CoUninitialize() };
        }
    }
}

/// NUL-terminated UTF-16 copy of `s`. Keep it alive while the PCWSTR is used.
pub fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

pub fn as_pcwstr(buffer: &[u16]) -> PCWSTR {
    PCWSTR(buffer.as_ptr())
}

/// Copy a COM-allocated string and free it.
pub fn take_pwstr(value: PWSTR) -> String {
    if value.is_null() {
        return String::new();
    }
    let text = unsafe { value.to_string() }.unwrap_or_default();
    unsafe { CoTaskMemFree(Some(value.0 as *const _)) };
    text
}

pub fn device_id(device: &IMMDevice) -> Result<String, WasapiError> {
    let id = unsafe { device.GetId() }.map_err(|e| WasapiError::com("IMMDevice::GetId", e))?;
    Ok(take_pwstr(id))
}

/// PKEY_Device_FriendlyName, or None if the store has no string for it.
pub fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = value.to_string();
        (!name.is_empty()).then_some(name)
    }
}
