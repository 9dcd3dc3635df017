//! Error taxonomy for the voice session.
//!
//! Device and connect-time failures are fatal to `start()` and carry the
//! host-facing guidance in their display strings; per-frame decode failures
//! and per-tool failures are contained where they occur and never change
//! the session status.

use thiserror::Error;

/// Failures acquiring or driving an audio device.
///
/// The variants are surfaced verbatim to the host, which shows different
/// user guidance for a missing device than for a denied permission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("no audio device found")]
    NotFound,
    #[error("audio device access denied")]
    PermissionDenied,
    #[error("audio device error: {0}")]
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// Remote overload or unavailability; eligible for retry.
    #[error("connection error: service unavailable ({0})")]
    TransientRemote(String),
    #[error("connection error: {0}")]
    FatalRemote(String),
    /// Malformed or truncated inbound audio. Scoped to a single frame.
    #[error("malformed audio frame: {0}")]
    Decode(String),
    /// A tool handler failed. Scoped to a single invocation.
    #[error("tool handler failed: {0}")]
    ToolHandler(String),
}

/// Message fragments that mark a remote failure as worth retrying.
const TRANSIENT_MARKERS: [&str; 6] = [
    "unavailable",
    "overloaded",
    "resource exhausted",
    "429",
    "503",
    "try again",
];

impl VoiceError {
    /// Whether the resilient caller may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientRemote(_))
    }

    /// Classifies a remote failure message as transient or fatal.
    pub fn from_remote(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
            Self::TransientRemote(message)
        } else {
            Self::FatalRemote(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_and_unavailability_classify_as_transient() {
        for message in [
            "model is overloaded",
            "Service Unavailable",
            "HTTP 503",
            "RESOURCE EXHAUSTED: quota",
            "rate limited (429), try again later",
        ] {
            assert!(
                VoiceError::from_remote(message).is_transient(),
                "expected transient: {message}"
            );
        }
    }

    #[test]
    fn other_remote_failures_are_fatal() {
        for message in ["invalid api key", "model not found", "bad request"] {
            let err = VoiceError::from_remote(message);
            assert!(!err.is_transient(), "expected fatal: {message}");
            assert!(matches!(err, VoiceError::FatalRemote(_)));
        }
    }

    #[test]
    fn device_errors_carry_distinct_guidance() {
        let not_found = DeviceError::NotFound.to_string();
        let denied = DeviceError::PermissionDenied.to_string();
        let unknown = DeviceError::Unknown("backend exploded".to_string()).to_string();
        assert_ne!(not_found, denied);
        assert_ne!(denied, unknown);
        assert!(unknown.contains("backend exploded"));
    }

    #[test]
    fn decode_and_tool_errors_are_not_transient() {
        assert!(!VoiceError::Decode("odd byte count".into()).is_transient());
        assert!(!VoiceError::ToolHandler("boom".into()).is_transient());
        assert!(!VoiceError::Device(DeviceError::NotFound).is_transient());
    }
}
