//! # meeting-capture-windows
//!
//! WASAPI pieces of meeting-capture:
//! - `WasapiBackend` is the loopback-capable backend. Capture endpoints are
//!   listed as inputs and render endpoints as `"<name> [Loopback]"` devices.
//! - `WasapiSessionProvider` lists per-process audio sessions and opens
//!   process-loopback streams scoped to one application.
//!
//! ## Platform Requirements
//! - Windows 10 build 20348+ for process loopback. Older builds fail the
//!   session stream and the recorder falls back to system loopback.
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use meeting_capture_core::{ApplicationTargetResolver, DeviceCatalog};
//! use meeting_capture_windows::{WasapiBackend, WasapiSessionProvider};
//!
//! let catalog = Arc::new(DeviceCatalog::from_init(
//!     meeting_capture_cpal::CpalBackend::new().map(|b| Arc::new(b) as _),
//!     WasapiBackend::new().map(|b| Arc::new(b) as _),
//! ));
//! let sessions = WasapiSessionProvider::new().ok().map(|p| Arc::new(p) as _);
//! let resolver = ApplicationTargetResolver::new(sessions, catalog);
//! ```

pub mod pcm;

#[cfg(target_os = "windows")]
mod backend;
#[cfg(target_os = "windows")]
mod capture_loop;
#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod endpoints;
#[cfg(target_os = "windows")]
pub mod error;
#[cfg(target_os = "windows")]
mod sessions;

#[cfg(target_os = "windows")]
pub use backend::WasapiBackend;
#[cfg(target_os = "windows")]
pub use capture_loop::WasapiStream;
#[cfg(target_os = "windows")]
pub use error::WasapiError;
#[cfg(target_os = "windows")]
pub use sessions::WasapiSessionProvider;
