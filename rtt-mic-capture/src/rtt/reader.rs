//! Streaming reader
//!
//! Pulls fixed-size chunks from one RTT up channel into an owned buffer on a
//! blocking worker. The session and the buffer move into the worker and come
//! back through the join handle, so nothing else can touch the buffer while
//! the loop is running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::config::{CaptureConfig, RttConfig};
use crate::error::{CaptureError, Result};
use crate::probe::{ProbeSession, RttTransport};

/// How many bytes the capture wants.
///
/// The reader aims at `samples + overshoot_tolerance` and may stop up to
/// `overshoot_tolerance` short of that, so it never stops below `samples`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTarget {
    pub samples: usize,
    pub overshoot_tolerance: usize,
}

impl CaptureTarget {
    /// Upper byte count the reader aims at
    pub fn read_limit(&self) -> usize {
        self.samples.saturating_add(self.overshoot_tolerance)
    }

    /// Whether `len` buffered bytes is within tolerance of the read limit
    pub fn is_reached(&self, len: usize) -> bool {
        len >= self.samples
    }
}

impl From<&CaptureConfig> for CaptureTarget {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            samples: config.samples,
            overshoot_tolerance: config.overshoot_tolerance,
        }
    }
}

/// Why the read loop ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    Disconnected,
    Cancelled,
}

/// Parameters for one capture run
#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    pub channel: usize,
    pub chunk_size: usize,
    /// Pause after an empty pull; zero busy-polls
    pub idle_backoff: Duration,
    pub target: CaptureTarget,
}

impl ReaderSettings {
    pub fn new(channel: usize, rtt: &RttConfig, capture: &CaptureConfig) -> Self {
        Self {
            channel,
            chunk_size: rtt.chunk_size,
            idle_backoff: Duration::from_micros(rtt.idle_backoff_us),
            target: CaptureTarget::from(capture),
        }
    }
}

/// Cancels a running reader from another task
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What the background reader hands back on join
#[derive(Debug)]
pub struct ReadOutcome<T: RttTransport> {
    pub session: ProbeSession<T>,
    pub buffer: Vec<u8>,
    pub result: Result<StopReason>,
}

/// Background RTT read loop
#[derive(Debug)]
pub struct StreamReader {
    settings: ReaderSettings,
    stop: StopHandle,
}

impl StreamReader {
    pub fn new(settings: ReaderSettings) -> Self {
        Self {
            settings,
            stop: StopHandle::default(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Run the loop on a blocking worker, taking ownership of the session
    pub fn spawn<T>(self, mut session: ProbeSession<T>) -> JoinHandle<ReadOutcome<T>>
    where
        T: RttTransport + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut buffer = Vec::with_capacity(self.settings.target.samples);
            let result = self.run(&mut session, &mut buffer);
            ReadOutcome { session, buffer, result }
        })
    }

    /// Read until the target is reached, the link drops, or the stop handle
    /// fires. A pull error ends the loop; bytes already appended stay in
    /// `buffer`.
    pub fn run<T: RttTransport>(
        &self,
        session: &mut ProbeSession<T>,
        buffer: &mut Vec<u8>,
    ) -> Result<StopReason> {
        let ReaderSettings { channel, chunk_size, idle_backoff, target } = self.settings;
        let mut chunk = vec![0u8; chunk_size];
        debug!("Reading RTT up channel {} in {} byte chunks, target {} bytes (limit {})",
               channel, chunk_size, target.samples, target.read_limit());

        loop {
            if self.stop.is_cancelled() {
                info!("Reader cancelled with {} bytes buffered", buffer.len());
                return Ok(StopReason::Cancelled);
            }
            if target.is_reached(buffer.len()) {
                return Ok(StopReason::TargetReached);
            }
            if !session.is_connected() {
                info!("Probe disconnected with {} of {} bytes", buffer.len(), target.samples);
                return Ok(StopReason::Disconnected);
            }

            let read = session.read_chunk(channel, &mut chunk).map_err(|e| {
                error!("IO read loop failed after {} bytes: {}", buffer.len(), e);
                CaptureError::StreamRead {
                    bytes_captured: buffer.len(),
                    reason: e.to_string(),
                }
            })?;

            if read == 0 {
                trace!("Empty pull from channel {}", channel);
                if !idle_backoff.is_zero() {
                    std::thread::sleep(idle_backoff);
                }
                continue;
            }

            buffer.extend_from_slice(&chunk[..read]);
            info!("Got {} Total: {}", read, buffer.len());
        }
    }
}
