//! Camera capture sources.
//!
//! This module provides one capture interface over several hardware backends:
//! - Pi camera via the libcamera still-capture program (`libcamera`)
//! - USB cameras via fswebcam, or V4L2 directly with the `usb-v4l2` feature (`usb`)
//! - Synthetic source for `stub://` device paths (testing, dry runs)
//!
//! `CameraSource` owns the backends and implements the selection policy. The
//! backend chosen at open time is kept open across captures and only reopened after
//! a capture failure. Frames are opaque JPEG bytes.

pub mod libcamera;
pub mod stub;
pub mod usb;

pub use libcamera::PiCamera;
pub use stub::SyntheticCamera;
pub use usb::UsbCamera;

pub use crate::config::CameraType;
use crate::config::CameraSettings;
use crate::error::CameraError;

/// Encoded image as produced by a backend.
pub type ImageBytes = Vec<u8>;

/// One capture backend.
///
/// `open` does the expensive probing; `capture` must be bounded by the configured
/// capture timeout.
pub trait CameraBackend: Send {
    fn name(&self) -> &'static str;

    fn open(&mut self) -> Result<(), CameraError>;

    fn capture(&mut self) -> Result<ImageBytes, CameraError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Pi,
    Usb,
}

/// Identifies the backend selected by [`CameraSource::open`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraHandle {
    slot: Slot,
    backend: &'static str,
}

impl CameraHandle {
    pub fn backend(&self) -> &'static str {
        self.backend
    }
}

/// Capture counters, copied into every heartbeat.
#[derive(Clone, Debug, Default)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub reopens: u64,
}

pub struct CameraSource {
    preferred: CameraType,
    pi: Box<dyn CameraBackend>,
    usb: Box<dyn CameraBackend>,
    active: Option<CameraHandle>,
    reopen_attempts: u32,
    stats: CameraStats,
}

impl CameraSource {
    /// Build the source from configuration. Nothing is opened yet.
    pub fn from_settings(preferred: CameraType, settings: &CameraSettings) -> Self {
        let pi: Box<dyn CameraBackend> = if settings.pi_command.starts_with("stub://") {
            Box::new(SyntheticCamera::new("pi", &settings.pi_command))
        } else {
            Box::new(PiCamera::new(settings.clone()))
        };
        let usb: Box<dyn CameraBackend> = if settings.usb_device.starts_with("stub://") {
            Box::new(SyntheticCamera::new("usb", &settings.usb_device))
        } else {
            Box::new(UsbCamera::new(settings.clone()))
        };
        Self::with_backends(preferred, pi, usb, settings.reopen_attempts)
    }

    pub fn with_backends(
        preferred: CameraType,
        pi: Box<dyn CameraBackend>,
        usb: Box<dyn CameraBackend>,
        reopen_attempts: u32,
    ) -> Self {
        Self {
            preferred,
            pi,
            usb,
            active: None,
            reopen_attempts,
            stats: CameraStats::default(),
        }
    }

    /// Name of the backend currently open, if any.
    pub fn active_backend(&self) -> Option<&'static str> {
        self.active.map(|handle| handle.backend)
    }

    pub fn stats(&self) -> &CameraStats {
        &self.stats
    }

    /// Open a backend according to `preferred`.
    ///
    /// `Auto` tries the Pi camera first and falls back to USB; `Pi` and `Usb` try only
    /// their own backend. An already open backend is closed first.
    pub fn open(&mut self, preferred: CameraType) -> Result<CameraHandle, CameraError> {
        self.close();
        let order: &[Slot] = match preferred {
            CameraType::Auto => &[Slot::Pi, Slot::Usb],
            CameraType::Pi => &[Slot::Pi],
            CameraType::Usb => &[Slot::Usb],
        };

        let mut tried = Vec::with_capacity(order.len());
        let mut last_err = None;
        for &slot in order {
            let backend = self.backend_mut(slot);
            let name = backend.name();
            tried.push(name);
            match backend.open() {
                Ok(()) => {
                    log::info!("camera: {} backend opened", name);
                    let handle = CameraHandle {
                        slot,
                        backend: name,
                    };
                    self.active = Some(handle);
                    return Ok(handle);
                }
                Err(err) => {
                    log::warn!("camera: {} backend failed to open: {}", name, err);
                    last_err = Some(err);
                }
            }
        }

        match (preferred, last_err) {
            (CameraType::Auto, _) | (_, None) => Err(CameraError::NoCameraAvailable { tried }),
            (_, Some(err)) => Err(err),
        }
    }

    /// Capture one frame from an open handle.
    pub fn capture_frame(&mut self, handle: CameraHandle) -> Result<ImageBytes, CameraError> {
        if self.active != Some(handle) {
            return Err(CameraError::NotOpen);
        }
        let result = self.backend_mut(handle.slot).capture();
        match &result {
            Ok(_) => self.stats.frames_captured += 1,
            Err(_) => self.stats.capture_failures += 1,
        }
        result
    }

    /// Release the open backend, if any.
    pub fn close(&mut self) {
        if let Some(handle) = self.active.take() {
            self.backend_mut(handle.slot).close();
            log::debug!("camera: {} backend closed", handle.backend);
        }
    }

    /// Capture with the lifecycle policy applied.
    ///
    /// Opens lazily, keeps the handle across calls, and after a capture failure closes
    /// and reopens up to `reopen_attempts` times. When that also fails the handle is
    /// dropped and the camera reported unavailable; the next call starts over.
    pub fn acquire_frame(&mut self) -> Result<ImageBytes, CameraError> {
        let handle = match self.active {
            Some(handle) => handle,
            None => self.open(self.preferred)?,
        };

        let mut last_err = match self.capture_frame(handle) {
            Ok(frame) => return Ok(frame),
            Err(err) => err,
        };

        for attempt in 1..=self.reopen_attempts {
            log::warn!(
                "camera: capture failed ({}), reopening (attempt {}/{})",
                last_err,
                attempt,
                self.reopen_attempts
            );
            self.stats.reopens += 1;
            let handle = self.open(self.preferred)?;
            match self.capture_frame(handle) {
                Ok(frame) => return Ok(frame),
                Err(err) => last_err = err,
            }
        }

        let backend = handle.backend;
        self.close();
        Err(CameraError::BackendUnavailable {
            backend,
            reason: format!("capture keeps failing: {}", last_err),
        })
    }

    /// Close and reopen the camera on request. Returns the backend now in use.
    pub fn restart(&mut self) -> Result<&'static str, CameraError> {
        log::info!("camera: restart requested");
        self.stats.reopens += 1;
        self.open(self.preferred).map(|handle| handle.backend)
    }

    fn backend_mut(&mut self, slot: Slot) -> &mut dyn CameraBackend {
        match slot {
            Slot::Pi => self.pi.as_mut(),
            Slot::Usb => self.usb.as_mut(),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted backend: open outcomes and capture outcomes are consumed in order.
    pub(crate) struct ScriptedBackend {
        name: &'static str,
        opens: VecDeque<bool>,
        captures: VecDeque<bool>,
        open: bool,
        pub(crate) log: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(name: &'static str, opens: &[bool], captures: &[bool]) -> Self {
            Self {
                name,
                opens: opens.iter().copied().collect(),
                captures: captures.iter().copied().collect(),
                open: false,
                log: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl CameraBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn open(&mut self) -> Result<(), CameraError> {
            self.log.lock().unwrap().push(format!("{}:open", self.name));
            if self.opens.pop_front().unwrap_or(false) {
                self.open = true;
                Ok(())
            } else {
                Err(CameraError::BackendUnavailable {
                    backend: self.name,
                    reason: "scripted".into(),
                })
            }
        }

        fn capture(&mut self) -> Result<ImageBytes, CameraError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:capture", self.name));
            if self.captures.pop_front().unwrap_or(false) {
                Ok(vec![0xFF, 0xD8, 0xFF, 0xD9])
            } else {
                Err(CameraError::Capture {
                    backend: self.name,
                    reason: "scripted".into(),
                })
            }
        }

        fn close(&mut self) {
            self.log.lock().unwrap().push(format!("{}:close", self.name));
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    #[test]
    fn auto_prefers_pi_camera() {
        let mut source = CameraSource::with_backends(
            CameraType::Auto,
            Box::new(ScriptedBackend::new("pi", &[true], &[true])),
            Box::new(ScriptedBackend::new("usb", &[true], &[true])),
            1,
        );
        let handle = source.open(CameraType::Auto).unwrap();
        assert_eq!(handle.backend(), "pi");
    }

    #[test]
    fn auto_falls_back_to_usb() {
        let mut source = CameraSource::with_backends(
            CameraType::Auto,
            Box::new(ScriptedBackend::new("pi", &[false], &[])),
            Box::new(ScriptedBackend::new("usb", &[true], &[true])),
            1,
        );
        let frame = source.acquire_frame().unwrap();
        assert!(!frame.is_empty());
        assert_eq!(source.active_backend(), Some("usb"));
    }

    #[test]
    fn auto_without_any_backend_is_no_camera_available() {
        let mut source = CameraSource::with_backends(
            CameraType::Auto,
            Box::new(ScriptedBackend::new("pi", &[false], &[])),
            Box::new(ScriptedBackend::new("usb", &[false], &[])),
            1,
        );
        match source.open(CameraType::Auto) {
            Err(CameraError::NoCameraAvailable { tried }) => assert_eq!(tried, vec!["pi", "usb"]),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(source.active_backend(), None);
    }

    #[test]
    fn explicit_type_skips_fallback() {
        let usb = ScriptedBackend::new("usb", &[true], &[true]);
        let usb_log = usb.log.clone();
        let mut source = CameraSource::with_backends(
            CameraType::Pi,
            Box::new(ScriptedBackend::new("pi", &[false], &[])),
            Box::new(usb),
            1,
        );
        let err = source.acquire_frame().unwrap_err();
        assert!(err.is_hardware_unavailable());
        assert!(usb_log.lock().unwrap().is_empty());
    }

    #[test]
    fn handle_is_kept_open_across_captures() {
        let usb = ScriptedBackend::new("usb", &[true], &[true, true, true]);
        let log = usb.log.clone();
        let mut source = CameraSource::with_backends(
            CameraType::Usb,
            Box::new(ScriptedBackend::new("pi", &[], &[])),
            Box::new(usb),
            1,
        );
        for _ in 0..3 {
            source.acquire_frame().unwrap();
        }
        let opens = log
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.ends_with(":open"))
            .count();
        assert_eq!(opens, 1);
        assert_eq!(source.stats().frames_captured, 3);
    }

    #[test]
    fn capture_failure_reopens_once_then_reports_unavailable() {
        let usb = ScriptedBackend::new("usb", &[true, true, true], &[false, true, false, false]);
        let log = usb.log.clone();
        let mut source = CameraSource::with_backends(
            CameraType::Usb,
            Box::new(ScriptedBackend::new("pi", &[], &[])),
            Box::new(usb),
            1,
        );

        // First failure is recovered by the reopen.
        source.acquire_frame().unwrap();
        assert_eq!(source.stats().reopens, 1);

        // Failure, reopen, failure again: unavailable and closed.
        let err = source.acquire_frame().unwrap_err();
        assert!(err.is_hardware_unavailable());
        assert_eq!(source.active_backend(), None);
        assert_eq!(
            log.lock().unwrap().last().map(String::as_str),
            Some("usb:close")
        );
    }

    #[test]
    fn restart_closes_and_reopens_the_backend() {
        let usb = ScriptedBackend::new("usb", &[true, true], &[true]);
        let log = usb.log.clone();
        let mut source = CameraSource::with_backends(
            CameraType::Usb,
            Box::new(ScriptedBackend::new("pi", &[], &[])),
            Box::new(usb),
            1,
        );
        source.acquire_frame().unwrap();
        assert_eq!(source.restart().unwrap(), "usb");
        assert_eq!(source.stats().reopens, 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["usb:open", "usb:capture", "usb:close", "usb:open"]
        );
    }

    #[test]
    fn stale_handle_is_rejected() {
        let mut source = CameraSource::with_backends(
            CameraType::Usb,
            Box::new(ScriptedBackend::new("pi", &[], &[])),
            Box::new(ScriptedBackend::new("usb", &[true], &[true])),
            1,
        );
        let handle = source.open(CameraType::Usb).unwrap();
        source.close();
        assert!(matches!(
            source.capture_frame(handle),
            Err(CameraError::NotOpen)
        ));
    }
}
