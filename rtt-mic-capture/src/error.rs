//! Error types for the RTT microphone capture tool

use thiserror::Error;

/// Main error type for the capture pipeline
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Probe not found: {0}")]
    ProbeNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("RTT service not ready after {waited_ms} ms")]
    ServiceNotReady { waited_ms: u64 },

    #[error("RTT stream read failed after {bytes_captured} bytes: {reason}")]
    StreamRead { bytes_captured: usize, reason: String },

    #[error("Capture cancelled by operator")]
    Cancelled,

    #[error("RTT channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Audio encoding failed: {0}")]
    Audio(#[from] hound::Error),

    #[error("Probe error: {0}")]
    ProbeError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl CaptureError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CaptureError::Cancelled => 0,
            CaptureError::ProbeNotFound(_)
            | CaptureError::ConnectionFailed(_)
            | CaptureError::ProbeError(_) => 2,
            CaptureError::ServiceNotReady { .. } => 3,
            CaptureError::StreamRead { .. } => 4,
            CaptureError::Audio(_) => 5,
            _ => 1,
        }
    }
}

impl From<probe_rs::Error> for CaptureError {
    fn from(error: probe_rs::Error) -> Self {
        CaptureError::ProbeError(error.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CaptureError>;
