//! RTT (Real-Time Transfer) capture
//!
//! Channel discovery, control block lookup and the background read loop that
//! drains the microphone up channel.

pub mod channels;
pub mod elf_parser;
pub mod reader;

pub use channels::{list_channels, log_channels, resolve_up_channel};
pub use elf_parser::{get_rtt_symbol_from_elf, scan_region_for};
pub use reader::{CaptureTarget, ReadOutcome, ReaderSettings, StopHandle, StopReason, StreamReader};
