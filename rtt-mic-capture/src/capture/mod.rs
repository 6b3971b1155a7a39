//! Capture pipeline
//!
//! Connection → channel discovery → background read → raw dump → WAV.
//! Every stage after the reader runs on the caller's task once the reader
//! has been joined.

pub mod interrupt;
pub mod persist;
pub mod wav;

use std::future::Future;
use std::path::PathBuf;

use chrono::Local;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{CaptureError, Result};
use crate::probe::{ProbeSession, RttTransport};
use crate::rtt::{self, ReadOutcome, ReaderSettings, StopReason, StreamReader};
use crate::utils::capture_stamp;

pub use interrupt::{connect_or_cancel, Interrupt};
pub use persist::{persist, raw_file_name};
pub use wav::{encode, wav_file_name, PcmFormat};

/// Summary of a finished capture
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub target: String,
    pub channel: usize,
    pub raw_path: PathBuf,
    pub wav_path: PathBuf,
    pub bytes_captured: usize,
    pub frames_written: usize,
    pub duration_secs: f64,
    pub stop_reason: StopReason,
}

/// Drives one capture from an open probe session to the two artifacts
#[derive(Debug, Clone)]
pub struct CapturePipeline {
    config: Config,
}

impl CapturePipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run a capture on `session`.
    ///
    /// When `cancel` resolves first the reader is stopped, the session closed
    /// and `CaptureError::Cancelled` returned without writing anything. A
    /// stream error still writes both artifacts from the partial buffer before
    /// the error is returned.
    pub async fn run<T, F>(&self, mut session: ProbeSession<T>, cancel: F) -> Result<CaptureReport>
    where
        T: RttTransport + 'static,
        F: Future<Output = ()>,
    {
        tokio::pin!(cancel);

        let started = tokio::select! {
            started = session.start_rtt(&self.config.rtt) => Some(started),
            _ = &mut cancel => None,
        };
        let Some(started) = started else {
            info!("ctrl-c detected before capture started, exiting...");
            session.close();
            return Err(CaptureError::Cancelled);
        };
        started?;

        let up_channels = rtt::log_channels(session.transport_mut());
        let channel = rtt::resolve_up_channel(
            &up_channels,
            self.config.rtt.channel_name.as_deref(),
            self.config.rtt.channel,
        );

        info!("Capturing {} bytes from {} over {}, up channel {}",
              self.config.capture.samples, session.target(), session.interface(), channel);
        let settings = ReaderSettings::new(channel, &self.config.rtt, &self.config.capture);
        let reader = StreamReader::new(settings);
        let stop = reader.stop_handle();
        let mut handle = reader.spawn(session);

        let joined = tokio::select! {
            joined = &mut handle => Some(joined),
            _ = &mut cancel => None,
        };
        let joined = match joined {
            Some(joined) => joined,
            None => {
                info!("ctrl-c detected, exiting...");
                stop.cancel();
                if let Ok(mut outcome) = handle.await {
                    outcome.session.close();
                }
                return Err(CaptureError::Cancelled);
            }
        };

        let ReadOutcome { mut session, buffer, result } = joined
            .map_err(|e| CaptureError::InternalError(format!("reader task failed: {}", e)))?;
        session.close();

        let stop_reason = match result {
            Ok(StopReason::Cancelled) => return Err(CaptureError::Cancelled),
            Ok(reason) => Ok(reason),
            Err(e) => Err(e),
        };

        match &stop_reason {
            Ok(reason) => info!("Capture stopped ({:?}) with {} bytes, saving PCM file and converting to WAV...",
                                reason, buffer.len()),
            Err(e) => warn!("Capture failed with {} bytes ({}), saving PCM file and converting to WAV...",
                            buffer.len(), e),
        }
        let report = self.write_artifacts(
            session.target(),
            channel,
            &buffer,
            stop_reason.as_ref().copied().unwrap_or(StopReason::Disconnected),
        )?;

        match stop_reason {
            Ok(StopReason::Disconnected) => {
                warn!("Capture ended early: {} of {} bytes",
                      report.bytes_captured, self.config.capture.samples);
                Ok(report)
            }
            Ok(_) => Ok(report),
            Err(e) => {
                error!("Partial capture saved to {} and {}",
                       report.raw_path.display(), report.wav_path.display());
                Err(e)
            }
        }
    }

    fn write_artifacts(
        &self,
        target: &str,
        channel: usize,
        buffer: &[u8],
        stop_reason: StopReason,
    ) -> Result<CaptureReport> {
        let stamp = capture_stamp(&Local::now());
        let dir = &self.config.output.directory;

        let raw_path = persist(buffer, dir, &stamp)?;

        let format = PcmFormat::from(&self.config.audio);
        let wav_path = dir.join(wav_file_name(&stamp));
        let frames_written = encode(buffer, self.config.audio.discard_bytes, &format, &wav_path)?;

        Ok(CaptureReport {
            target: target.to_string(),
            channel,
            raw_path,
            wav_path,
            bytes_captured: buffer.len(),
            frames_written,
            duration_secs: frames_written as f64 / format.sample_rate as f64,
            stop_reason,
        })
    }
}
