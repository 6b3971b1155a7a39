//! Debug probe access
//!
//! The capture pipeline only talks to hardware through [`RttTransport`], so the
//! same code path drives a real probe-rs session and the scripted transports
//! used in tests.

pub mod discovery;
pub mod session;

use crate::error::Result;
use serde::Serialize;

pub use discovery::{ProbeDiscovery, ProbeInfo};
pub use session::{ProbeRsTransport, ProbeSession, WireInterface};

/// Direction of an RTT ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelDirection {
    Up,   // Target to Host
    Down, // Host to Target
}

impl std::fmt::Display for ChannelDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelDirection::Up => write!(f, "up"),
            ChannelDirection::Down => write!(f, "down"),
        }
    }
}

/// Read-only metadata for one RTT buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDescriptor {
    pub index: usize,
    pub name: String,
    pub size: usize,
    pub flags: u32,
    pub direction: ChannelDirection,
}

/// Operations the capture pipeline consumes from a debug probe link.
///
/// Implementations are moved into the background reader and handed back after
/// it stops, so they must be `Send`.
pub trait RttTransport: Send {
    /// Start (or restart) the target-side RTT service. May fail while the
    /// firmware is still initialising its control block.
    fn start_rtt(&mut self) -> Result<()>;

    /// Number of up buffers reported by the RTT control block
    fn up_channel_count(&mut self) -> Result<usize>;

    /// Number of down buffers reported by the RTT control block
    fn down_channel_count(&mut self) -> Result<usize>;

    /// Descriptor for one buffer
    fn channel_descriptor(
        &mut self,
        direction: ChannelDirection,
        index: usize,
    ) -> Result<ChannelDescriptor>;

    /// Pull up to `buf.len()` bytes from an up channel. `Ok(0)` means no data yet.
    fn read_up(&mut self, channel: usize, buf: &mut [u8]) -> Result<usize>;

    /// Whether the probe link is still alive
    fn is_connected(&mut self) -> bool;

    /// Release the probe. Must be safe to call more than once.
    fn close(&mut self);
}
