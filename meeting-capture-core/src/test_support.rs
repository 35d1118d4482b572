//! Scripted backends for unit tests. Callbacks are driven synchronously by
//! the test through `push`, so no audio hardware or threads are involved.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_models::{AudioApplication, AudioDevice, AudioSessionInfo, BackendKind};
use crate::models::error::CaptureError;
use crate::traits::backend::{AudioBackend, CaptureStream, FrameCallback, StreamRequest};
use crate::traits::session_provider::AudioSessionProvider;

pub fn input_device(index: u32, name: &str, sample_rate: u32, channels: u16) -> AudioDevice {
    AudioDevice {
        index,
        backend: BackendKind::Primary,
        name: name.into(),
        channels,
        sample_rate,
        is_input: true,
        is_output: false,
        is_default: false,
        is_loopback: false,
    }
}

pub fn output_device(index: u32, name: &str, sample_rate: u32) -> AudioDevice {
    AudioDevice {
        is_input: false,
        is_output: true,
        ..input_device(index, name, sample_rate, 2)
    }
}

pub fn loopback_device(index: u32, name: &str, sample_rate: u32) -> AudioDevice {
    AudioDevice {
        backend: BackendKind::Loopback,
        is_input: true,
        is_loopback: true,
        ..input_device(index, name, sample_rate, 2)
    }
}

pub fn application(pid: u32, process_name: &str) -> AudioApplication {
    AudioApplication {
        display_name: process_name.trim_end_matches(".exe").to_string(),
        process_name: process_name.into(),
        process_id: pid,
        executable_path: PathBuf::from(format!("C:\\Apps\\{}", process_name)),
        is_playing_audio: true,
        session_id: None,
    }
}

pub fn session(pid: u32, process_name: &str, sample_rate: Option<u32>) -> AudioSessionInfo {
    AudioSessionInfo {
        session_id: format!("session-{}", pid),
        process_id: pid,
        process_name: process_name.into(),
        display_name: process_name.into(),
        is_active: true,
        sample_rate,
    }
}

struct OpenSlot {
    key: u32,
    channels: u16,
    callback: FrameCallback,
}

/// Open streams keyed by stream id, shared with the stream handles.
#[derive(Default, Clone)]
pub struct StreamRegistry {
    slots: Arc<Mutex<HashMap<u64, OpenSlot>>>,
    next_id: Arc<AtomicU64>,
}

impl StreamRegistry {
    fn register(&self, key: u32, callback: FrameCallback, sample_rate: u32, channels: u16) -> FakeStream {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.slots.lock().insert(id, OpenSlot { key, channels, callback });
        FakeStream {
            id,
            slots: Arc::clone(&self.slots),
            sample_rate,
            channels,
        }
    }

    /// Deliver a block to every open stream registered under `key`.
    pub fn push(&self, key: u32, samples: &[f32]) -> usize {
        let mut slots = self.slots.lock();
        let mut delivered = 0;
        for slot in slots.values_mut().filter(|s| s.key == key) {
            (slot.callback)(samples, slot.channels);
            delivered += 1;
        }
        delivered
    }

    pub fn open_count(&self) -> usize {
        self.slots.lock().len()
    }
}

pub struct FakeStream {
    id: u64,
    slots: Arc<Mutex<HashMap<u64, OpenSlot>>>,
    sample_rate: u32,
    channels: u16,
}

impl CaptureStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn close(&mut self, _timeout: Duration) -> Result<(), CaptureError> {
        self.slots.lock().remove(&self.id);
        Ok(())
    }
}

/// In-memory backend with a fixed device list.
pub struct FakeBackend {
    kind: BackendKind,
    devices: Mutex<Vec<AudioDevice>>,
    supported_rates: Mutex<Vec<u32>>,
    failing: Mutex<HashSet<u32>>,
    failing_close: Mutex<HashSet<u32>>,
    enumerations: AtomicUsize,
    pub registry: StreamRegistry,
}

impl FakeBackend {
    /// `devices` use native indices.
    pub fn new(kind: BackendKind, devices: Vec<AudioDevice>) -> Self {
        Self {
            kind,
            devices: Mutex::new(devices),
            supported_rates: Mutex::new(vec![16000, 32000, 44100, 48000]),
            failing: Mutex::new(HashSet::new()),
            failing_close: Mutex::new(HashSet::new()),
            enumerations: AtomicUsize::new(0),
            registry: StreamRegistry::default(),
        }
    }

    pub fn fail_open(&self, native_index: u32) {
        self.failing.lock().insert(native_index);
    }

    /// Rates every device accepts. Input opens at any other rate fall back
    /// to the device's own rate.
    pub fn set_supported_rates(&self, rates: Vec<u32>) {
        *self.supported_rates.lock() = rates;
    }

    pub fn fail_close(&self, native_index: u32) {
        self.failing_close.lock().insert(native_index);
    }

    pub fn set_devices(&self, devices: Vec<AudioDevice>) {
        *self.devices.lock() = devices;
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn push(&self, native_index: u32, samples: &[f32]) -> usize {
        self.registry.push(native_index, samples)
    }

    pub fn open_count(&self) -> usize {
        self.registry.open_count()
    }
}

impl AudioBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn name(&self) -> &str {
        match self.kind {
            BackendKind::Primary => "fake-primary",
            BackendKind::Loopback => "fake-loopback",
        }
    }

    fn enumerate(&self) -> Result<Vec<AudioDevice>, CaptureError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().clone())
    }

    fn supports_sample_rate(&self, native_index: u32, sample_rate: u32, _is_input: bool) -> bool {
        self.devices.lock().iter().any(|d| d.index == native_index) && self.supported_rates.lock().contains(&sample_rate)
    }

    fn open_stream(
        &self,
        request: &StreamRequest,
        callback: FrameCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        if self.failing.lock().contains(&request.native_index) {
            return Err(CaptureError::StreamOpenFailed(format!(
                "device {} refused to open",
                request.native_index
            )));
        }
        let device = self
            .devices
            .lock()
            .iter()
            .find(|d| d.index == request.native_index)
            .cloned()
            .ok_or_else(|| CaptureError::DeviceNotFound(format!("index {}", request.native_index)))?;

        // Loopback streams run at the device mix rate, like WASAPI shared mode.
        let supported = self.supported_rates.lock().contains(&request.sample_rate);
        let sample_rate = if request.loopback || !supported {
            device.sample_rate
        } else {
            request.sample_rate
        };
        let channels = request.channels.min(device.channels).max(1);
        let stream = self.registry.register(request.native_index, callback, sample_rate, channels);

        if self.failing_close.lock().contains(&request.native_index) {
            return Ok(Box::new(FailingCloseStream(stream)));
        }
        Ok(Box::new(stream))
    }
}

/// Closes the underlying stream but still reports a failure.
struct FailingCloseStream(FakeStream);

impl CaptureStream for FailingCloseStream {
    fn sample_rate(&self) -> u32 {
        self.0.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.0.channels()
    }

    fn close(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        self.0.close(timeout)?;
        Err(CaptureError::StopTimedOut("device did not acknowledge stop".into()))
    }
}

/// Session provider with a scripted session list. Streams are keyed by pid.
pub struct FakeSessionProvider {
    sessions: Mutex<Vec<AudioSessionInfo>>,
    fail_open: Mutex<bool>,
    pub registry: StreamRegistry,
}

impl FakeSessionProvider {
    pub fn new(sessions: Vec<AudioSessionInfo>) -> Self {
        Self {
            sessions: Mutex::new(sessions),
            fail_open: Mutex::new(false),
            registry: StreamRegistry::default(),
        }
    }

    pub fn set_fail_open(&self, fail: bool) {
        *self.fail_open.lock() = fail;
    }

    pub fn push(&self, pid: u32, samples: &[f32]) -> usize {
        self.registry.push(pid, samples)
    }
}

impl AudioSessionProvider for FakeSessionProvider {
    fn sessions(&self) -> Result<Vec<AudioSessionInfo>, CaptureError> {
        Ok(self.sessions.lock().clone())
    }

    fn open_session_stream(
        &self,
        session: &AudioSessionInfo,
        request: &StreamRequest,
        callback: FrameCallback,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        if *self.fail_open.lock() {
            return Err(CaptureError::StreamOpenFailed("process loopback not supported".into()));
        }
        let rate = session.sample_rate.unwrap_or(request.sample_rate);
        Ok(Box::new(self.registry.register(session.process_id, callback, rate, request.channels)))
    }
}
