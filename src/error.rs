//! Error classes shared across the agent's component seams.
//!
//! Configuration problems surface as `anyhow` errors from `config` and abort startup.
//! Everything below is recoverable at runtime and is classified so that callers can
//! decide between retrying, queueing and degrading.

use std::time::Duration;

use thiserror::Error;

/// Camera acquisition failures.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Every backend allowed by the configured camera type failed to open.
    #[error("no camera available (tried: {})", tried.join(", "))]
    NoCameraAvailable { tried: Vec<&'static str> },

    /// A specific backend could not be opened.
    #[error("{backend} camera unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// An open handle failed to produce a frame.
    #[error("{backend} capture failed: {reason}")]
    Capture {
        backend: &'static str,
        reason: String,
    },

    #[error("camera not open")]
    NotOpen,
}

impl CameraError {
    /// True when the failure means no hardware could be reached at all.
    pub fn is_hardware_unavailable(&self) -> bool {
        matches!(
            self,
            CameraError::NoCameraAvailable { .. } | CameraError::BackendUnavailable { .. }
        )
    }
}

/// Detector failures. All of them are non-fatal for a capture cycle.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detection timed out after {0:?}")]
    Timeout(Duration),

    #[error("detection failed: {0}")]
    Failed(String),

    /// The detector is still working on a frame that already timed out.
    #[error("detector busy with a previous frame")]
    Busy,
}

/// HTTP transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Timeouts, refused connections, DNS failures and 5xx responses.
    #[error("transient network error: {0}")]
    Transient(String),

    /// 4xx responses: the payload or endpoint does not match what the server expects.
    #[error("server rejected request with status {status}: {body}")]
    Permanent { status: u16, body: String },

    /// A 2xx response whose body could not be understood.
    #[error("unexpected response body: {0}")]
    Decode(String),

    /// Shutdown was raised while waiting between attempts.
    #[error("cancelled by shutdown")]
    Cancelled,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(TransportError::Transient("refused".into()).is_retryable());
        assert!(!TransportError::Permanent {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!TransportError::Decode("x".into()).is_retryable());
        assert!(!TransportError::Cancelled.is_retryable());
    }

    #[test]
    fn no_camera_lists_backends() {
        let err = CameraError::NoCameraAvailable {
            tried: vec!["pi", "usb"],
        };
        assert_eq!(err.to_string(), "no camera available (tried: pi, usb)");
        assert!(err.is_hardware_unavailable());
        assert!(!CameraError::NotOpen.is_hardware_unavailable());
    }
}
