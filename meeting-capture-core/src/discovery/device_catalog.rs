use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::{AudioDevice, BackendKind, DeviceCapabilities, LOOPBACK_INDEX_OFFSET};
use crate::models::error::CaptureError;
use crate::traits::backend::AudioBackend;

/// Sample rates tried by [`DeviceCatalog::capabilities`].
pub const CANDIDATE_SAMPLE_RATES: [u32; 8] = [8000, 11025, 16000, 22050, 44100, 48000, 88200, 96000];

/// Device enumeration across the generic backend and, on Windows, the
/// loopback-capable backend.
///
/// Enumeration is lazy and cached: the first query after construction or
/// [`refresh`](Self::refresh) enumerates both backends once, and every later
/// query reads the same immutable snapshot.
///
/// Index namespaces:
/// ```text
/// primary backend     0, 1, 2, ...
/// loopback backend    1000, 1001, ...   (LOOPBACK_INDEX_OFFSET + native index)
/// ```
pub struct DeviceCatalog {
    primary: Option<Arc<dyn AudioBackend>>,
    loopback: Option<Arc<dyn AudioBackend>>,
    loopback_platform: bool,
    cache: Mutex<Option<Arc<Vec<AudioDevice>>>>,
}

impl DeviceCatalog {
    pub fn new(primary: Option<Arc<dyn AudioBackend>>, loopback: Option<Arc<dyn AudioBackend>>) -> Self {
        Self {
            primary,
            loopback,
            loopback_platform: cfg!(target_os = "windows"),
            cache: Mutex::new(None),
        }
    }

    /// Build from backend initialization results. A failed backend is
    /// logged and treated as absent.
    pub fn from_init(
        primary: Result<Arc<dyn AudioBackend>, CaptureError>,
        loopback: Result<Arc<dyn AudioBackend>, CaptureError>,
    ) -> Self {
        Self::new(absent_on_error(primary, "primary"), absent_on_error(loopback, "loopback"))
    }

    /// Override platform detection for the loopback backend.
    pub fn with_loopback_platform(mut self, enabled: bool) -> Self {
        self.loopback_platform = enabled;
        self.refresh();
        self
    }

    pub fn has_primary_backend(&self) -> bool {
        self.primary.is_some()
    }

    pub fn has_loopback_backend(&self) -> bool {
        self.loopback_platform && self.loopback.is_some()
    }

    /// The backend that owns devices of `kind`, if present.
    pub fn backend(&self, kind: BackendKind) -> Option<Arc<dyn AudioBackend>> {
        match kind {
            BackendKind::Primary => self.primary.clone(),
            BackendKind::Loopback if self.loopback_platform => self.loopback.clone(),
            BackendKind::Loopback => None,
        }
    }

    /// Invalidate the cached snapshot. Nothing is enumerated until the next query.
    pub fn refresh(&self) {
        *self.cache.lock() = None;
    }

    /// Every device in the current snapshot.
    pub fn devices(&self) -> Arc<Vec<AudioDevice>> {
        let mut cache = self.cache.lock();
        if let Some(devices) = cache.as_ref() {
            return Arc::clone(devices);
        }
        let devices = Arc::new(self.enumerate());
        log::debug!("Enumerated {} audio devices", devices.len());
        *cache = Some(Arc::clone(&devices));
        devices
    }

    pub fn list_inputs(&self) -> Vec<AudioDevice> {
        self.filtered(|d| d.is_input && !d.is_loopback)
    }

    pub fn list_outputs(&self) -> Vec<AudioDevice> {
        self.filtered(|d| d.is_output && !d.is_loopback)
    }

    /// Always empty where the loopback backend cannot exist.
    pub fn list_loopbacks(&self) -> Vec<AudioDevice> {
        if !self.loopback_platform {
            return Vec::new();
        }
        self.filtered(|d| d.is_loopback)
    }

    pub fn default_input(&self) -> Option<AudioDevice> {
        pick_default(self.list_inputs())
    }

    pub fn default_output(&self) -> Option<AudioDevice> {
        pick_default(self.list_outputs())
    }

    /// Exact name match. Primary devices are listed first, so they win ties.
    pub fn find_by_name(&self, name: &str) -> Option<AudioDevice> {
        self.devices().iter().find(|d| d.name == name).cloned()
    }

    pub fn find_by_index(&self, index: u32) -> Option<AudioDevice> {
        self.devices().iter().find(|d| d.index == index).cloned()
    }

    /// Whether the device's backend would open it at `sample_rate`.
    ///
    /// False when the owning backend is absent.
    pub fn supports_sample_rate(&self, device: &AudioDevice, sample_rate: u32) -> bool {
        self.backend(device.backend)
            .is_some_and(|backend| backend.supports_sample_rate(device.native_index(), sample_rate, device.is_input))
    }

    /// Probe [`CANDIDATE_SAMPLE_RATES`] against the device's owning backend.
    ///
    /// Diagnostic only; opens nothing on the capture path.
    pub fn capabilities(&self, device: &AudioDevice) -> DeviceCapabilities {
        let Some(backend) = self.backend(device.backend) else {
            return DeviceCapabilities::default();
        };
        let native_index = device.native_index();
        let sample_rates = CANDIDATE_SAMPLE_RATES
            .iter()
            .copied()
            .filter(|&rate| backend.supports_sample_rate(native_index, rate, device.is_input))
            .collect();
        DeviceCapabilities { sample_rates }
    }

    fn filtered(&self, keep: impl Fn(&AudioDevice) -> bool) -> Vec<AudioDevice> {
        self.devices().iter().filter(|d| keep(d)).cloned().collect()
    }

    fn enumerate(&self) -> Vec<AudioDevice> {
        let mut devices = Vec::new();

        if let Some(backend) = &self.primary {
            match backend.enumerate() {
                Ok(found) => devices.extend(found.into_iter().map(|mut device| {
                    device.backend = BackendKind::Primary;
                    device
                })),
                Err(e) => log::warn!("{} enumeration failed: {}", backend.name(), e),
            }
        }

        if !self.loopback_platform {
            return devices;
        }

        if let Some(backend) = &self.loopback {
            match backend.enumerate() {
                Ok(found) => {
                    for mut device in found {
                        device.backend = BackendKind::Loopback;
                        device.index += LOOPBACK_INDEX_OFFSET;
                        device.is_loopback = device.is_loopback || device.name.to_lowercase().contains("loopback");

                        let duplicate = devices.iter().any(|d| d.name == device.name);
                        if duplicate && !device.is_loopback {
                            log::debug!("Skipping duplicate device '{}' from {}", device.name, backend.name());
                            continue;
                        }
                        devices.push(device);
                    }
                }
                Err(e) => log::warn!("{} enumeration failed: {}", backend.name(), e),
            }
        }

        devices
    }
}

fn absent_on_error(
    backend: Result<Arc<dyn AudioBackend>, CaptureError>,
    role: &str,
) -> Option<Arc<dyn AudioBackend>> {
    match backend {
        Ok(backend) => {
            log::info!("Using {} as {} audio backend", backend.name(), role);
            Some(backend)
        }
        Err(e) => {
            log::warn!("{} audio backend unavailable: {}", role, e);
            None
        }
    }
}

fn pick_default(devices: Vec<AudioDevice>) -> Option<AudioDevice> {
    let flagged = devices.iter().position(|d| d.is_default);
    devices.into_iter().nth(flagged.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{input_device, loopback_device, output_device, FakeBackend};

    fn primary() -> Arc<FakeBackend> {
        let mut mic = input_device(0, "USB Mic", 48000, 1);
        mic.is_default = true;
        Arc::new(FakeBackend::new(
            BackendKind::Primary,
            vec![
                input_device(1, "Headset Mic", 16000, 1),
                mic,
                output_device(2, "Speakers", 48000),
            ],
        ))
    }

    fn loopback() -> Arc<FakeBackend> {
        let mut plain = input_device(0, "USB Mic", 48000, 1);
        plain.backend = BackendKind::Loopback;
        Arc::new(FakeBackend::new(
            BackendKind::Loopback,
            vec![
                plain,
                loopback_device(1, "Speakers", 48000),
                AudioDevice {
                    is_loopback: false,
                    ..loopback_device(2, "Stereo Mix (Loopback)", 44100)
                },
            ],
        ))
    }

    fn catalog(primary: &Arc<FakeBackend>, loopback: Option<&Arc<FakeBackend>>) -> DeviceCatalog {
        DeviceCatalog::new(
            Some(primary.clone() as Arc<dyn AudioBackend>),
            loopback.map(|b| b.clone() as Arc<dyn AudioBackend>),
        )
        .with_loopback_platform(true)
    }

    #[test]
    fn repeated_queries_reuse_one_snapshot() {
        let backend = primary();
        let catalog = catalog(&backend, None);

        let first = catalog.list_inputs();
        let second = catalog.list_inputs();

        assert_eq!(first, second);
        assert_eq!(backend.enumerations(), 1);
    }

    #[test]
    fn refresh_is_lazy() {
        let backend = primary();
        let catalog = catalog(&backend, None);
        catalog.list_outputs();

        catalog.refresh();
        assert_eq!(backend.enumerations(), 1);

        backend.set_devices(vec![input_device(0, "Only Mic", 44100, 2)]);
        let inputs = catalog.list_inputs();
        assert_eq!(backend.enumerations(), 2);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].name, "Only Mic");
    }

    #[test]
    fn loopback_backend_uses_offset_namespace() {
        let catalog = catalog(&primary(), Some(&loopback()));

        let loopbacks = catalog.list_loopbacks();
        assert!(loopbacks.iter().all(|d| d.index >= LOOPBACK_INDEX_OFFSET));
        assert!(loopbacks.iter().all(|d| d.backend == BackendKind::Loopback));

        let speakers = catalog.find_by_index(LOOPBACK_INDEX_OFFSET + 1).unwrap();
        assert_eq!(speakers.native_index(), 1);
    }

    #[test]
    fn duplicate_names_survive_only_as_loopback() {
        let catalog = catalog(&primary(), Some(&loopback()));
        let devices = catalog.devices();

        let mics: Vec<_> = devices.iter().filter(|d| d.name == "USB Mic").collect();
        assert_eq!(mics.len(), 1);
        assert_eq!(mics[0].backend, BackendKind::Primary);

        let speakers: Vec<_> = devices.iter().filter(|d| d.name == "Speakers").collect();
        assert_eq!(speakers.len(), 2);
        assert!(speakers.iter().any(|d| d.is_loopback));
    }

    #[test]
    fn loopback_in_name_marks_device() {
        let catalog = catalog(&primary(), Some(&loopback()));
        let mix = catalog.find_by_name("Stereo Mix (Loopback)").unwrap();
        assert!(mix.is_loopback);
    }

    #[test]
    fn loopbacks_empty_off_platform() {
        let backend = loopback();
        let catalog = catalog(&primary(), Some(&backend)).with_loopback_platform(false);

        assert!(catalog.list_loopbacks().is_empty());
        assert!(!catalog.has_loopback_backend());
        assert_eq!(backend.enumerations(), 0);
    }

    #[test]
    fn default_prefers_flag_then_first() {
        let catalog = catalog(&primary(), None);
        assert_eq!(catalog.default_input().unwrap().name, "USB Mic");
        assert_eq!(catalog.default_output().unwrap().name, "Speakers");
    }

    #[test]
    fn defaults_absent_without_devices() {
        let catalog = DeviceCatalog::new(None, None);
        assert!(catalog.default_input().is_none());
        assert!(catalog.default_output().is_none());
        assert!(catalog.find_by_name("USB Mic").is_none());
    }

    #[test]
    fn failed_backend_init_degrades_to_absent() {
        let catalog = DeviceCatalog::from_init(
            Ok(primary() as Arc<dyn AudioBackend>),
            Err(CaptureError::BackendUnavailable("wasapi missing".into())),
        )
        .with_loopback_platform(true);

        assert!(catalog.has_primary_backend());
        assert!(!catalog.has_loopback_backend());
        assert_eq!(catalog.list_inputs().len(), 2);
    }

    #[test]
    fn capabilities_probe_candidate_rates() {
        let catalog = catalog(&primary(), None);
        let mic = catalog.find_by_name("USB Mic").unwrap();

        let caps = catalog.capabilities(&mic);
        assert_eq!(caps.sample_rates, vec![16000, 44100, 48000]);
    }

    #[test]
    fn single_rate_query_uses_the_owning_backend() {
        let primary = primary();
        primary.set_supported_rates(vec![44100]);
        let catalog = catalog(&primary, None);
        let mic = catalog.find_by_name("USB Mic").unwrap();

        assert!(catalog.supports_sample_rate(&mic, 44100));
        assert!(!catalog.supports_sample_rate(&mic, 48000));

        let orphan = AudioDevice {
            backend: BackendKind::Loopback,
            ..mic
        };
        assert!(!catalog.supports_sample_rate(&orphan, 44100));
    }
}
