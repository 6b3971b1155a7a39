//! RTT Microphone Capture
//!
//! Streams microphone PCM off an embedded target through a debug probe's
//! RTT up channel and rebuilds it into a playable WAV file. Hardware access
//! goes through probe-rs; the pipeline itself only needs an [`RttTransport`].

pub mod config;
pub mod error;
pub mod utils;
pub mod probe;
pub mod rtt;
pub mod capture;

pub use error::{CaptureError, Result};
pub use config::Config;
pub use capture::{CapturePipeline, CaptureReport};
pub use probe::{ProbeSession, RttTransport};
