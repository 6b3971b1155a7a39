//! Probe connection management
//!
//! [`ProbeSession`] owns one live link to a debug probe for its whole lifetime:
//! it is created after a successful open + attach + reset, brings the RTT
//! service up with a bounded retry, and closes the link on [`ProbeSession::close`]
//! or on drop.

use std::time::{Duration, Instant};

use probe_rs::{
    probe::WireProtocol,
    rtt::{ChannelMode, Rtt, ScanRegion},
    Permissions, Session,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{ChannelDescriptor, ChannelDirection, ProbeDiscovery, RttTransport};
use crate::config::{ProbeConfig, RttConfig};
use crate::error::{CaptureError, Result};

/// Timeout for the connect-time reset
const RESET_TIMEOUT: Duration = Duration::from_millis(500);

/// Wire interface between probe and target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WireInterface {
    Swd,
    Jtag,
}

impl From<WireInterface> for WireProtocol {
    fn from(interface: WireInterface) -> Self {
        match interface {
            WireInterface::Swd => WireProtocol::Swd,
            WireInterface::Jtag => WireProtocol::Jtag,
        }
    }
}

impl std::fmt::Display for WireInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireInterface::Swd => write!(f, "SWD"),
            WireInterface::Jtag => write!(f, "JTAG"),
        }
    }
}

/// One live connection to a debug probe and its target
#[derive(Debug)]
pub struct ProbeSession<T: RttTransport> {
    target: String,
    interface: WireInterface,
    connected: bool,
    rtt_attached: bool,
    transport: T,
}

impl ProbeSession<ProbeRsTransport> {
    /// Open the selected probe, attach to `config.target_cpu` and reset it
    pub fn connect(config: &ProbeConfig, rtt: &RttConfig) -> Result<Self> {
        let scan_region = crate::rtt::elf_parser::scan_region_for(rtt.elf_path.as_deref());
        let transport = ProbeRsTransport::open(config, scan_region)?;
        Ok(Self::new(&config.target_cpu, config.protocol, transport))
    }
}

impl<T: RttTransport> ProbeSession<T> {
    /// Wrap an already opened transport
    pub fn new(target: &str, interface: WireInterface, transport: T) -> Self {
        Self {
            target: target.to_string(),
            interface,
            connected: true,
            rtt_attached: false,
            transport,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn interface(&self) -> WireInterface {
        self.interface
    }

    /// RTT service has reported a valid buffer count
    pub fn is_rtt_attached(&self) -> bool {
        self.rtt_attached
    }

    /// Bring up the RTT service.
    ///
    /// Waits `settle_ms`, then retries start + buffer-count query every
    /// `start_retry_ms` until it succeeds or `start_timeout_ms` elapses.
    /// Returns the (up, down) buffer counts.
    pub async fn start_rtt(&mut self, config: &RttConfig) -> Result<(usize, usize)> {
        if !self.connected {
            return Err(CaptureError::ConnectionFailed("probe session is closed".to_string()));
        }

        tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;

        let started = Instant::now();
        let timeout = Duration::from_millis(config.start_timeout_ms);
        let backoff = Duration::from_millis(config.start_retry_ms);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.query_buffer_counts() {
                Ok((up, down)) => {
                    self.rtt_attached = true;
                    info!("RTT started, {} up bufs, {} down bufs ({} attempts)", up, down, attempts);
                    return Ok((up, down));
                }
                Err(e) => {
                    debug!("RTT not ready yet (attempt {}): {}", attempts, e);
                }
            }

            let waited = started.elapsed();
            if waited >= timeout {
                error!("RTT service did not come up within {} ms", config.start_timeout_ms);
                return Err(CaptureError::ServiceNotReady { waited_ms: waited.as_millis() as u64 });
            }
            tokio::time::sleep(backoff).await;
        }
    }

    fn query_buffer_counts(&mut self) -> Result<(usize, usize)> {
        self.transport.start_rtt()?;
        let up = self.transport.up_channel_count()?;
        let down = self.transport.down_channel_count()?;
        Ok((up, down))
    }

    /// Whether the link is still up. Once the transport reports a drop the
    /// session stays disconnected.
    pub fn is_connected(&mut self) -> bool {
        if self.connected && !self.transport.is_connected() {
            warn!("Probe link to {} dropped", self.target);
            self.connected = false;
        }
        self.connected
    }

    /// Pull one chunk from an up channel
    pub fn read_chunk(&mut self, channel: usize, buf: &mut [u8]) -> Result<usize> {
        if !self.rtt_attached {
            return Err(CaptureError::ServiceNotReady { waited_ms: 0 });
        }
        self.transport.read_up(channel, buf)
    }

    /// Access the transport for read-only queries such as channel discovery
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Close the probe link. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.connected || self.rtt_attached {
            info!("Closing probe session for {}", self.target);
        }
        self.transport.close();
        self.connected = false;
        self.rtt_attached = false;
    }
}

impl<T: RttTransport> Drop for ProbeSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// [`RttTransport`] backed by a probe-rs session
pub struct ProbeRsTransport {
    session: Option<Session>,
    rtt: Option<Rtt>,
    scan_region: ScanRegion,
}

impl std::fmt::Debug for ProbeRsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeRsTransport")
            .field("open", &self.session.is_some())
            .field("rtt_attached", &self.rtt.is_some())
            .field("scan_region", &self.scan_region)
            .finish()
    }
}

impl ProbeRsTransport {
    /// Open a probe, select the wire interface, attach to the target and reset it
    pub fn open(config: &ProbeConfig, scan_region: ScanRegion) -> Result<Self> {
        let probe_info = ProbeDiscovery::select(&config.selector)?;

        info!("Connecting to probe {}...", probe_info.identifier);
        let mut probe = probe_info.open().map_err(|e| {
            error!("Failed to open probe '{}': {}", probe_info.identifier, e);
            CaptureError::ConnectionFailed(format!("Failed to open probe '{}': {}", probe_info.identifier, e))
        })?;

        probe.select_protocol(config.protocol.into()).map_err(|e| {
            CaptureError::ConnectionFailed(format!("Failed to select {}: {}", config.protocol, e))
        })?;

        if let Some(speed) = config.speed_khz {
            let actual = probe.set_speed(speed).map_err(|e| {
                CaptureError::ConnectionFailed(format!("Failed to set speed {} kHz: {}", speed, e))
            })?;
            debug!("Probe speed set to {} kHz", actual);
        }

        info!("Connecting to {}...", config.target_cpu);
        let mut session = probe
            .attach(config.target_cpu.as_str(), Permissions::default())
            .map_err(|e| {
                error!("Failed to attach to target '{}': {}", config.target_cpu, e);
                CaptureError::ConnectionFailed(format!("Failed to attach to target '{}': {}", config.target_cpu, e))
            })?;

        {
            let mut core = session.core(0).map_err(|e| {
                CaptureError::ConnectionFailed(format!("Failed to get core: {}", e))
            })?;
            core.reset_and_halt(RESET_TIMEOUT).map_err(|e| {
                CaptureError::ConnectionFailed(format!("Failed to reset target: {}", e))
            })?;
            if !config.halt_after_reset {
                core.run().map_err(|e| {
                    CaptureError::ConnectionFailed(format!("Failed to run target after reset: {}", e))
                })?;
            }
        }

        info!("Connected to {} over {}", config.target_cpu, config.protocol);
        Ok(Self {
            session: Some(session),
            rtt: None,
            scan_region,
        })
    }

    fn parts(&mut self) -> Result<(&mut Session, &mut Rtt)> {
        match (self.session.as_mut(), self.rtt.as_mut()) {
            (Some(session), Some(rtt)) => Ok((session, rtt)),
            (None, _) => Err(CaptureError::ConnectionFailed("probe session is closed".to_string())),
            (_, None) => Err(CaptureError::ProbeError("RTT not attached".to_string())),
        }
    }
}

fn mode_flags(mode: ChannelMode) -> u32 {
    match mode {
        ChannelMode::NoBlockSkip => 0,
        ChannelMode::NoBlockTrim => 1,
        ChannelMode::BlockIfFull => 2,
    }
}

impl RttTransport for ProbeRsTransport {
    fn start_rtt(&mut self) -> Result<()> {
        if self.rtt.is_some() {
            return Ok(());
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| CaptureError::ConnectionFailed("probe session is closed".to_string()))?;
        let mut core = session.core(0)?;
        let rtt = Rtt::attach_region(&mut core, &self.scan_region)
            .map_err(|e| CaptureError::ProbeError(format!("RTT attach failed: {}", e)))?;
        self.rtt = Some(rtt);
        Ok(())
    }

    fn up_channel_count(&mut self) -> Result<usize> {
        let (_, rtt) = self.parts()?;
        Ok(rtt.up_channels().len())
    }

    fn down_channel_count(&mut self) -> Result<usize> {
        let (_, rtt) = self.parts()?;
        Ok(rtt.down_channels().len())
    }

    fn channel_descriptor(
        &mut self,
        direction: ChannelDirection,
        index: usize,
    ) -> Result<ChannelDescriptor> {
        let (session, rtt) = self.parts()?;
        let not_found = || CaptureError::ChannelNotFound(format!("{} channel {}", direction, index));

        match direction {
            ChannelDirection::Up => {
                let mut core = session.core(0)?;
                let channel = rtt.up_channels().get(index).ok_or_else(not_found)?;
                let flags = channel.mode(&mut core).map(mode_flags).unwrap_or_default();
                Ok(ChannelDescriptor {
                    index,
                    name: channel.name().unwrap_or_default().to_string(),
                    size: channel.buffer_size(),
                    flags,
                    direction,
                })
            }
            ChannelDirection::Down => {
                // Down buffers are never read here, their mode is not queried
                let channel = rtt.down_channels().get(index).ok_or_else(not_found)?;
                Ok(ChannelDescriptor {
                    index,
                    name: channel.name().unwrap_or_default().to_string(),
                    size: channel.buffer_size(),
                    flags: 0,
                    direction,
                })
            }
        }
    }

    fn read_up(&mut self, channel: usize, buf: &mut [u8]) -> Result<usize> {
        let (session, rtt) = self.parts()?;
        let mut core = session.core(0)?;
        let up_channel = rtt
            .up_channels()
            .get_mut(channel)
            .ok_or_else(|| CaptureError::ChannelNotFound(format!("up channel {}", channel)))?;
        up_channel
            .read(&mut core, buf)
            .map_err(|e| CaptureError::ProbeError(format!("RTT read failed: {}", e)))
    }

    fn is_connected(&mut self) -> bool {
        match self.session.as_mut() {
            Some(session) => session.core(0).and_then(|mut core| core.status()).is_ok(),
            None => false,
        }
    }

    fn close(&mut self) {
        self.rtt = None;
        if self.session.take().is_some() {
            debug!("Probe-rs session released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport whose RTT service only comes up after `ready_after` attempts
    struct SlowStart {
        attempts: usize,
        ready_after: Option<usize>,
        closes: usize,
    }

    impl SlowStart {
        fn new(ready_after: Option<usize>) -> Self {
            Self { attempts: 0, ready_after, closes: 0 }
        }
    }

    impl RttTransport for SlowStart {
        fn start_rtt(&mut self) -> Result<()> {
            self.attempts += 1;
            match self.ready_after {
                Some(n) if self.attempts >= n => Ok(()),
                _ => Err(CaptureError::ProbeError("control block not found".into())),
            }
        }
        fn up_channel_count(&mut self) -> Result<usize> { Ok(3) }
        fn down_channel_count(&mut self) -> Result<usize> { Ok(1) }
        fn channel_descriptor(&mut self, _: ChannelDirection, index: usize) -> Result<ChannelDescriptor> {
            Err(CaptureError::ChannelNotFound(index.to_string()))
        }
        fn read_up(&mut self, _: usize, _: &mut [u8]) -> Result<usize> { Ok(0) }
        fn is_connected(&mut self) -> bool { true }
        fn close(&mut self) { self.closes += 1; }
    }

    fn fast_rtt_config(timeout_ms: u64) -> RttConfig {
        RttConfig {
            settle_ms: 0,
            start_retry_ms: 1,
            start_timeout_ms: timeout_ms,
            ..RttConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_rtt_retries_until_ready() {
        let mut session = ProbeSession::new("nRF5340_xxAA", WireInterface::Swd, SlowStart::new(Some(4)));
        let counts = session.start_rtt(&fast_rtt_config(5_000)).await.unwrap();
        assert_eq!(counts, (3, 1));
        assert!(session.is_rtt_attached());
        assert_eq!(session.transport_mut().attempts, 4);
    }

    #[tokio::test]
    async fn test_start_rtt_times_out_with_service_not_ready() {
        let mut session = ProbeSession::new("nRF5340_xxAA", WireInterface::Swd, SlowStart::new(None));
        let err = session.start_rtt(&fast_rtt_config(20)).await.unwrap_err();
        assert!(matches!(err, CaptureError::ServiceNotReady { .. }));
        assert!(!session.is_rtt_attached());
    }

    #[test]
    fn test_read_before_rtt_start_is_refused() {
        let mut session = ProbeSession::new("nRF5340_xxAA", WireInterface::Swd, SlowStart::new(Some(1)));
        let mut buf = [0u8; 16];
        assert!(matches!(
            session.read_chunk(1, &mut buf),
            Err(CaptureError::ServiceNotReady { .. })
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = ProbeSession::new("nRF5340_xxAA", WireInterface::Swd, SlowStart::new(Some(1)));
        session.close();
        session.close();
        assert!(!session.is_connected());
        assert_eq!(session.transport_mut().closes, 2);
    }

    #[test]
    fn test_wire_interface_maps_to_probe_rs() {
        assert_eq!(WireProtocol::from(WireInterface::Swd), WireProtocol::Swd);
        assert_eq!(WireProtocol::from(WireInterface::Jtag), WireProtocol::Jtag);
    }
}
