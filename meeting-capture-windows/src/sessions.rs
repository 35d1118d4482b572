//! Per-process audio sessions and process-loopback capture.
//!
//! Sessions are read from the default render endpoint's session manager.
//! A session stream is a virtual process-loopback client (Windows 10 build
//! 20348 and later) that carries only the target process tree's audio.

use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use windows::core::{implement, Interface, Ref, HRESULT, IUnknown, PROPVARIANT, PWSTR};
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::Media::Audio::{
    ActivateAudioInterfaceAsync, AudioSessionStateActive, IActivateAudioInterfaceAsyncOperation,
    IActivateAudioInterfaceCompletionHandler, IActivateAudioInterfaceCompletionHandler_Impl, IAudioCaptureClient,
    IAudioClient, IAudioSessionControl2, IAudioSessionManager2, AUDCLNT_SHAREMODE_SHARED,
    AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM, AUDCLNT_STREAMFLAGS_EVENTCALLBACK, AUDCLNT_STREAMFLAGS_LOOPBACK,
    AUDIOCLIENT_ACTIVATION_PARAMS, AUDIOCLIENT_ACTIVATION_PARAMS_0, AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK,
    AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS, PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE,
    VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
};
use windows::Win32::System::Com::CLSCTX_ALL;
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::System::Variant::VT_BLOB;

use meeting_capture_core::{
    AudioSessionInfo, AudioSessionProvider, CaptureError, CaptureStream, FrameCallback, StreamRequest,
};

use crate::capture_loop::{float_format, spawn_capture, OwnedEvent, PreparedCapture};
use crate::com::{take_pwstr, ComGuard};
use crate::endpoints::{mix_format, EndpointEnumerator, Flow};
use crate::error::WasapiError;
use crate::pcm::{buffer_duration, SampleEncoding};

const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(5);

/// `PROPVARIANT` holding a `VT_BLOB`, laid out as the OS expects.
#[repr(C)]
struct BlobVariant {
    vt: u16,
    reserved: [u16; 3],
    size: u32,
    data: *mut u8,
}

/// Session provider backed by `IAudioSessionManager2`.
pub struct WasapiSessionProvider;

impl WasapiSessionProvider {
    pub fn new() -> Result<Self, CaptureError> {
        let _com = ComGuard::init()?;
        EndpointEnumerator::new()
            .and_then(|e| e.default_device(Flow::Render))
            .map_err(|e| CaptureError::BackendUnavailable(format!("audio sessions: {}", e)))?;
        Ok(Self)
    }
}

impl AudioSessionProvider for WasapiSessionProvider {
    fn sessions(&self) -> Result<Vec<AudioSessionInfo>, CaptureError> {
        let _com = ComGuard::init()?;
        Ok(list_sessions()?)
    }

    fn open_session_stream(
        &self,
        session: &AudioSessionInfo,
        request: &StreamRequest,
        callback: FrameCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let pid = session.process_id;
        if pid == 0 {
            return Err(WasapiError::ProcessUnavailable(pid).into());
        }
        log::debug!(
            "Opening process loopback for '{}' (pid {}) at {} Hz",
            session.process_name,
            pid,
            request.sample_rate
        );

        let request = request.clone();
        spawn_capture(
            &format!("{}-{}", session.process_name, pid),
            move || prepare_process_loopback(pid, &request),
            callback,
        )
    }
}

fn list_sessions() -> Result<Vec<AudioSessionInfo>, WasapiError> {
    let device = EndpointEnumerator::new()?.default_device(Flow::Render)?;
    let (_, mix_rate) = mix_format(&device)?;
    let manager: IAudioSessionManager2 = unsafe { device.Activate(CLSCTX_ALL, None) }
        .map_err(|e| WasapiError::com("Activate(IAudioSessionManager2)", e))?;
    let entries = unsafe { manager.GetSessionEnumerator() }.map_err(|e| WasapiError::com("GetSessionEnumerator", e))?;
    let count = unsafe { entries.GetCount() }.map_err(|e| WasapiError::com("GetCount", e))?;

    let mut sessions = Vec::new();
    for i in 0..count {
        let Ok(control) = (unsafe { entries.GetSession(i) }) else { continue };
        let Ok(control2) = control.cast::<IAudioSessionControl2>() else { continue };

        // Zero is the system-sounds session, shared by no single process.
        let pid = unsafe { control2.GetProcessId() }.unwrap_or(0);
        if pid == 0 {
            continue;
        }

        let is_active = unsafe { control.GetState() }.map(|s| s == AudioSessionStateActive).unwrap_or(false);
        let session_id = unsafe { control2.GetSessionInstanceIdentifier() }
            .map(take_pwstr)
            .unwrap_or_else(|_| format!("pid-{}", pid));
        let path = process_image_path(pid);
        let process_name = path
            .as_deref()
            .and_then(|p| Path::new(p).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let display_name = unsafe { control.GetDisplayName() }.map(take_pwstr).unwrap_or_default();
        let display_name = if display_name.is_empty() || display_name.starts_with('@') {
            Path::new(&process_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("Process {}", pid))
        } else {
            display_name
        };

        sessions.push(AudioSessionInfo {
            session_id,
            process_id: pid,
            process_name,
            display_name,
            is_active,
            sample_rate: Some(mix_rate),
        });
    }
    Ok(sessions)
}

/// Full image path of a process, if it is still alive and queryable.
fn process_image_path(pid: u32) -> Option<String> {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
        let mut buffer = [0u16; 1024];
        let mut len = buffer.len() as u32;
        let queried = QueryFullProcessImageNameW(handle, PROCESS_NAME_WIN32, PWSTR(buffer.as_mut_ptr()), &mut len);
        let _ = CloseHandle(handle);
        queried.ok()?;
        Some(String::from_utf16_lossy(&buffer[..len as usize]))
    }
}

#[implement(IActivateAudioInterfaceCompletionHandler)]
struct ActivationHandler {
    done: mpsc::Sender<()>,
}

impl IActivateAudioInterfaceCompletionHandler_Impl for ActivationHandler_Impl {
    fn ActivateCompleted(&self, _operation: Ref<'_, IActivateAudioInterfaceAsyncOperation>) -> windows::core::Result<()> {
        let _ = self.done.send(());
        Ok(())
    }
}

/// Activate a process-loopback client for `pid` and initialize it
/// event-driven at the requested format.
fn prepare_process_loopback(pid: u32, request: &StreamRequest) -> Result<PreparedCapture, WasapiError> {
    let mut params = AUDIOCLIENT_ACTIVATION_PARAMS {
        ActivationType: AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK,
        Anonymous: AUDIOCLIENT_ACTIVATION_PARAMS_0 {
            ProcessLoopbackParams: AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS {
                TargetProcessId: pid,
                ProcessLoopbackMode: PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE,
            },
        },
    };
    let variant = BlobVariant {
        vt: VT_BLOB.0,
        reserved: [0; 3],
        size: std::mem::size_of::<AUDIOCLIENT_ACTIVATION_PARAMS>() as u32,
        data: &mut params as *mut AUDIOCLIENT_ACTIVATION_PARAMS as *mut u8,
    };

    let (done_tx, done_rx) = mpsc::channel();
    let handler: IActivateAudioInterfaceCompletionHandler = ActivationHandler { done: done_tx }.into();

    let operation = unsafe {
        ActivateAudioInterfaceAsync(
            VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
            &IAudioClient::IID,
            Some(&variant as *const BlobVariant as *const PROPVARIANT),
            &handler,
        )
    }
    .map_err(|e| WasapiError::com("ActivateAudioInterfaceAsync", e))?;

    done_rx
        .recv_timeout(ACTIVATION_TIMEOUT)
        .map_err(|_| WasapiError::ActivationTimedOut)?;

    let mut activate_result = HRESULT(0);
    let mut activated: Option<IUnknown> = None;
    unsafe { operation.GetActivateResult(&mut activate_result, &mut activated) }
        .map_err(|e| WasapiError::com("GetActivateResult", e))?;
    activate_result
        .ok()
        .map_err(|e| WasapiError::com("process loopback activation", e))?;
    let client: IAudioClient = activated
        .ok_or(WasapiError::ProcessUnavailable(pid))?
        .cast()
        .map_err(|e| WasapiError::com("cast IAudioClient", e))?;

    // Virtual clients have no mix format; the engine converts to ours.
    let channels = request.channels.max(1);
    let format = float_format(request.sample_rate, channels);
    unsafe {
        client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_EVENTCALLBACK | AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM,
            buffer_duration(request.frames_per_buffer, request.sample_rate),
            0,
            &format,
            None,
        )
    }
    .map_err(|e| WasapiError::com("IAudioClient::Initialize(process loopback)", e))?;

    let event = OwnedEvent::new()?;
    unsafe { client.SetEventHandle(event.handle()) }.map_err(|e| WasapiError::com("SetEventHandle", e))?;
    let capture: IAudioCaptureClient =
        unsafe { client.GetService() }.map_err(|e| WasapiError::com("IAudioClient::GetService", e))?;

    Ok(PreparedCapture {
        client,
        capture,
        encoding: SampleEncoding::Float32,
        channels,
        sample_rate: request.sample_rate,
        frames_per_buffer: request.frames_per_buffer,
        event: Some(event),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_variant_matches_propvariant_layout() {
        assert_eq!(std::mem::size_of::<BlobVariant>(), std::mem::size_of::<PROPVARIANT>());
    }
}
