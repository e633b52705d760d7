//! USB camera backend.
//!
//! Without features this shells out to `fswebcam`, writing the JPEG to stdout.
//! With `usb-v4l2` the device is driven directly through V4L2 using an MJPG mmap
//! stream, which avoids re-negotiating the device on every capture. The stream keeps
//! running between captures, so the buffers already queued hold old frames and are
//! skipped.

use std::path::Path;
#[cfg(not(feature = "usb-v4l2"))]
use std::time::Duration;

use super::{CameraBackend, ImageBytes};
use crate::config::CameraSettings;
use crate::error::CameraError;

const BACKEND: &str = "usb";
/// Buffers in the V4L2 mmap ring.
#[cfg_attr(not(feature = "usb-v4l2"), allow(dead_code))]
const STREAM_BUFFERS: u32 = 2;

/// Pull `stale + 1` frames from `next` and return the last one.
#[cfg_attr(not(feature = "usb-v4l2"), allow(dead_code))]
fn freshest_frame<F>(stale: u32, mut next: F) -> Result<ImageBytes, CameraError>
where
    F: FnMut(bool) -> Result<Option<ImageBytes>, CameraError>,
{
    for _ in 0..stale {
        next(false)?;
    }
    next(true)?.ok_or_else(|| CameraError::Capture {
        backend: BACKEND,
        reason: "no frame returned".to_string(),
    })
}

pub struct UsbCamera {
    settings: CameraSettings,
    #[cfg(not(feature = "usb-v4l2"))]
    open: bool,
    #[cfg(feature = "usb-v4l2")]
    state: Option<v4l2::DeviceState>,
}

impl UsbCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            #[cfg(not(feature = "usb-v4l2"))]
            open: false,
            #[cfg(feature = "usb-v4l2")]
            state: None,
        }
    }

    fn check_device(&self) -> Result<(), CameraError> {
        if !Path::new(&self.settings.usb_device).exists() {
            return Err(CameraError::BackendUnavailable {
                backend: BACKEND,
                reason: format!("device {} not present", self.settings.usb_device),
            });
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// fswebcam
// ----------------------------------------------------------------------------

#[cfg(not(feature = "usb-v4l2"))]
const FSWEBCAM: &str = "fswebcam";
#[cfg(not(feature = "usb-v4l2"))]
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(not(feature = "usb-v4l2"))]
impl UsbCamera {
    fn capture_args(&self) -> Vec<String> {
        vec![
            "--quiet".to_string(),
            "--device".to_string(),
            self.settings.usb_device.clone(),
            "--resolution".to_string(),
            format!("{}x{}", self.settings.width, self.settings.height),
            "--no-banner".to_string(),
            "--jpeg".to_string(),
            "85".to_string(),
            "-".to_string(),
        ]
    }
}

#[cfg(not(feature = "usb-v4l2"))]
impl CameraBackend for UsbCamera {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn open(&mut self) -> Result<(), CameraError> {
        use crate::process::run_with_timeout;

        self.check_device()?;
        run_with_timeout(FSWEBCAM, &["--version".to_string()], None, VERSION_CHECK_TIMEOUT).map_err(
            |err| CameraError::BackendUnavailable {
                backend: BACKEND,
                reason: err.to_string(),
            },
        )?;
        self.open = true;
        log::info!(
            "UsbCamera: using {} via fswebcam ({}x{})",
            self.settings.usb_device,
            self.settings.width,
            self.settings.height
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<ImageBytes, CameraError> {
        use crate::process::{run_with_timeout, ProcessError};

        if !self.open {
            return Err(CameraError::NotOpen);
        }
        let frame = run_with_timeout(
            FSWEBCAM,
            &self.capture_args(),
            None,
            self.settings.capture_timeout,
        )
        .map_err(|err| match err {
            ProcessError::Spawn { .. } => CameraError::BackendUnavailable {
                backend: BACKEND,
                reason: err.to_string(),
            },
            _ => CameraError::Capture {
                backend: BACKEND,
                reason: err.to_string(),
            },
        })?;
        // fswebcam exits 0 with no output when the device stops delivering frames.
        if frame.is_empty() {
            return Err(CameraError::Capture {
                backend: BACKEND,
                reason: "fswebcam produced no image".to_string(),
            });
        }
        Ok(frame)
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

// ----------------------------------------------------------------------------
// V4L2 (feature: usb-v4l2)
// ----------------------------------------------------------------------------

#[cfg(feature = "usb-v4l2")]
mod v4l2 {
    use ouroboros::self_referencing;

    #[self_referencing]
    pub(super) struct DeviceState {
        pub(super) device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        pub(super) stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }
}

#[cfg(feature = "usb-v4l2")]
impl CameraBackend for UsbCamera {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn open(&mut self) -> Result<(), CameraError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        self.check_device()?;
        let unavailable = |reason: String| CameraError::BackendUnavailable {
            backend: BACKEND,
            reason,
        };

        let mut device = v4l::Device::with_path(&self.settings.usb_device).map_err(|err| {
            unavailable(format!("open {}: {}", self.settings.usb_device, err))
        })?;
        let mut format = device
            .format()
            .map_err(|err| unavailable(format!("read format: {}", err)))?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"MJPG");
        let format = device
            .set_format(&format)
            .map_err(|err| unavailable(format!("set format: {}", err)))?;
        if format.fourcc != v4l::FourCC::new(b"MJPG") {
            return Err(unavailable(format!(
                "device {} does not support MJPG",
                self.settings.usb_device
            )));
        }

        let timeout = self.settings.capture_timeout;
        let state = v4l2::DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| unavailable(format!("create buffer stream: {}", err)))?;
                stream.set_timeout(timeout);
                Ok(stream)
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "UsbCamera: connected to {} ({}x{})",
            self.settings.usb_device,
            format.width,
            format.height
        );
        Ok(())
    }

    fn capture(&mut self) -> Result<ImageBytes, CameraError> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or(CameraError::NotOpen)?;
        state.with_mut(|fields| {
            freshest_frame(STREAM_BUFFERS, |keep| {
                let (buf, meta) = fields.stream.next().map_err(|err| CameraError::Capture {
                    backend: BACKEND,
                    reason: err.to_string(),
                })?;
                if !keep {
                    return Ok(None);
                }
                let used = (meta.bytesused as usize).min(buf.len());
                if used == 0 {
                    return Err(CameraError::Capture {
                        backend: BACKEND,
                        reason: "empty buffer".to_string(),
                    });
                }
                Ok(Some(buf[..used].to_vec()))
            })
        })
    }

    fn close(&mut self) {
        self.state = None;
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }
}
