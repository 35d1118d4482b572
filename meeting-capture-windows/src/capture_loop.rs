//! Shared packet-drain loop for every WASAPI capture stream.
//!
//! COM objects are not `Send`, so the audio client is created, started and
//! released on the worker thread. Only the `CaptureWorker` crosses back.

use std::sync::mpsc;
use std::time::Duration;

use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, AUDCLNT_BUFFERFLAGS_SILENT, WAVEFORMATEX, WAVEFORMATEXTENSIBLE,
};
use windows::Win32::Media::KernelStreaming::KSDATAFORMAT_SUBTYPE_IEEE_FLOAT;
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW, CreateEventW, WaitForSingleObject,
};

use meeting_capture_core::{CancellationToken, CaptureError, CaptureStream, CaptureWorker, FrameCallback};

use crate::com::ComGuard;
use crate::error::WasapiError;
use crate::pcm::{decode_into, SampleEncoding, WAVE_FORMAT_EXTENSIBLE, WAVE_FORMAT_IEEE_FLOAT};

/// Upper bound on waiting for the worker to initialize the client.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between polls, and the wait bound for event-driven streams.
const POLL_INTERVAL_MS: u32 = 10;

/// Auto-reset event closed on drop.
pub(crate) struct OwnedEvent(HANDLE);

impl OwnedEvent {
    pub fn new() -> Result<Self, WasapiError> {
        let handle = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .map_err(|e| WasapiError::com("CreateEventW", e))?;
        Ok(Self(handle))
    }

    pub fn handle(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedEvent {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.0) };
    }
}

/// An initialized, not yet started audio client.
pub(crate) struct PreparedCapture {
    pub client: IAudioClient,
    pub capture: IAudioCaptureClient,
    pub encoding: SampleEncoding,
    pub channels: u16,
    pub sample_rate: u32,
    /// Largest block handed to the callback, in frames.
    pub frames_per_buffer: u32,
    /// Set for event-driven clients; polled otherwise.
    pub event: Option<OwnedEvent>,
}

/// A float32 interleaved format at the given rate and channel count.
pub(crate) fn float_format(sample_rate: u32, channels: u16) -> WAVEFORMATEX {
    let block_align = channels * 4;
    WAVEFORMATEX {
        wFormatTag: WAVE_FORMAT_IEEE_FLOAT,
        nChannels: channels,
        nSamplesPerSec: sample_rate,
        nAvgBytesPerSec: sample_rate * block_align as u32,
        nBlockAlign: block_align,
        wBitsPerSample: 32,
        cbSize: 0,
    }
}

/// Read the encoding of a format returned by WASAPI.
///
/// # Safety
/// `format` must point at a valid `WAVEFORMATEX`, extended to a
/// `WAVEFORMATEXTENSIBLE` when its tag says so.
pub(crate) unsafe fn encoding_of(format: *const WAVEFORMATEX) -> Result<SampleEncoding, WasapiError> {
    let header = std::ptr::read_unaligned(format);
    let tag = header.wFormatTag;
    let bits = header.wBitsPerSample;
    let extensible_is_float = tag == WAVE_FORMAT_EXTENSIBLE && {
        let ext = format as *const WAVEFORMATEXTENSIBLE;
        let sub_format = std::ptr::addr_of!((*ext).SubFormat).read_unaligned();
        sub_format == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT
    };
    SampleEncoding::from_format(tag, bits, extensible_is_float)
        .ok_or_else(|| WasapiError::UnsupportedFormat(format!("tag {:#06x}, {} bits", tag, bits)))
}

/// Run `prepare` on a new worker and start draining packets into `callback`.
///
/// Returns once the client is started, or with the preparation error.
pub(crate) fn spawn_capture<F>(
    name: &str,
    prepare: F,
    callback: FrameCallback,
) -> Result<Box<dyn CaptureStream>, CaptureError>
where
    F: FnOnce() -> Result<PreparedCapture, WasapiError> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel();
    let thread_name = format!("wasapi-{}", name);
    let loop_name = name.to_string();

    let worker = CaptureWorker::spawn(&thread_name, move |token| {
        let _com = match ComGuard::init() {
            Ok(guard) => guard,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let prepared = match prepare().and_then(|p| {
            unsafe { p.client.Start() }.map_err(|e| WasapiError::com("IAudioClient::Start", e))?;
            Ok(p)
        }) {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let _ = ready_tx.send(Ok((prepared.sample_rate, prepared.channels)));

        if let Err(e) = run_loop(&prepared, callback, &token) {
            log::error!("Capture loop '{}' stopped: {}", loop_name, e);
        }
        let _ = unsafe { prepared.client.Stop() };
        log::debug!("WASAPI stream '{}' released", loop_name);
    })?;

    let (sample_rate, channels) = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
        Ok(Ok(format)) => format,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(CaptureError::StreamOpenFailed(format!(
                "'{}' did not start within {:?}",
                name, OPEN_TIMEOUT
            )))
        }
    };

    Ok(Box::new(WasapiStream {
        worker,
        name: name.to_string(),
        sample_rate,
        channels,
    }))
}

fn run_loop(prepared: &PreparedCapture, mut callback: FrameCallback, token: &CancellationToken) -> Result<(), WasapiError> {
    let mut task_index = 0u32;
    let mmcss = unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) };
    if let Err(e) = &mmcss {
        log::debug!("MMCSS registration failed: {}", e);
    }

    let mut scratch = Vec::new();
    let result = loop {
        if token.is_cancelled() {
            break Ok(());
        }
        match &prepared.event {
            Some(event) => {
                // Timeouts are expected; they bound cancellation latency.
                let woke = unsafe { WaitForSingleObject(event.handle(), POLL_INTERVAL_MS) };
                if woke != WAIT_OBJECT_0 {
                    continue;
                }
            }
            None => std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS as u64)),
        }
        if let Err(e) = drain_packets(prepared, &mut callback, &mut scratch) {
            break Err(e);
        }
    };

    if let Ok(handle) = mmcss {
        let _ = unsafe { AvRevertMmThreadCharacteristics(handle) };
    }
    result
}

fn drain_packets(
    prepared: &PreparedCapture,
    callback: &mut FrameCallback,
    scratch: &mut Vec<f32>,
) -> Result<(), WasapiError> {
    let channels = prepared.channels as usize;
    let frame_bytes = prepared.encoding.bytes_per_sample() * channels;

    loop {
        let pending = unsafe { prepared.capture.GetNextPacketSize() }
            .map_err(|e| WasapiError::com("GetNextPacketSize", e))?;
        if pending == 0 {
            return Ok(());
        }

        let mut data: *mut u8 = std::ptr::null_mut();
        let mut frames = 0u32;
        let mut flags = 0u32;
        unsafe { prepared.capture.GetBuffer(&mut data, &mut frames, &mut flags, None, None) }
            .map_err(|e| WasapiError::com("GetBuffer", e))?;

        if frames > 0 {
            scratch.clear();
            if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 || data.is_null() {
                scratch.resize(frames as usize * channels, 0.0);
            } else {
                let bytes = unsafe { std::slice::from_raw_parts(data, frames as usize * frame_bytes) };
                decode_into(bytes, prepared.encoding, scratch);
            }
            let block = prepared.frames_per_buffer.max(1) as usize * channels;
            for chunk in scratch.chunks(block) {
                callback(chunk, prepared.channels);
            }
        }

        unsafe { prepared.capture.ReleaseBuffer(frames) }.map_err(|e| WasapiError::com("ReleaseBuffer", e))?;
    }
}

/// A running WASAPI client owned by its worker thread.
pub struct WasapiStream {
    worker: CaptureWorker,
    name: String,
    sample_rate: u32,
    channels: u16,
}

impl CaptureStream for WasapiStream {
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
