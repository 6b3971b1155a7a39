//! ELF symbol lookup for the RTT control block

use crate::error::{CaptureError, Result};
use probe_rs::rtt::ScanRegion;
use std::path::Path;
use tracing::{debug, info, warn};

/// RTT symbol name as defined by SEGGER RTT implementation
const RTT_SYMBOL_NAME: &str = "_SEGGER_RTT";

/// Extract the RTT control block address from a firmware image's symbol table
pub fn get_rtt_symbol_from_elf(elf_path: &Path) -> Result<u64> {
    debug!("Parsing ELF file for RTT symbol: {}", elf_path.display());

    let elf_data = std::fs::read(elf_path).map_err(|e| {
        CaptureError::InvalidConfig(format!("Failed to read ELF file {}: {}", elf_path.display(), e))
    })?;

    let elf = goblin::elf::Elf::parse(&elf_data).map_err(|e| {
        CaptureError::InvalidConfig(format!("Failed to parse ELF file {}: {}", elf_path.display(), e))
    })?;

    let symbol = elf
        .syms
        .iter()
        .find(|sym| elf.strtab.get_at(sym.st_name) == Some(RTT_SYMBOL_NAME));

    match symbol {
        Some(sym) if is_valid_rtt_address(sym.st_value) => {
            info!("Found {} symbol at 0x{:08X}", RTT_SYMBOL_NAME, sym.st_value);
            Ok(sym.st_value)
        }
        Some(sym) => Err(CaptureError::InvalidConfig(format!(
            "{} symbol at 0x{:08X} is outside RAM (0x20000000-0x2FFFFFFF)",
            RTT_SYMBOL_NAME, sym.st_value
        ))),
        None => Err(CaptureError::InvalidConfig(format!(
            "{} symbol not found in {} ({} symbols). RTT may be disabled or symbols stripped.",
            RTT_SYMBOL_NAME,
            elf_path.display(),
            elf.syms.len()
        ))),
    }
}

/// Choose how probe-rs should look for the control block.
///
/// An exact address from the firmware image when one is given and usable,
/// otherwise a scan of target RAM.
pub fn scan_region_for(elf_path: Option<&Path>) -> ScanRegion {
    let Some(path) = elf_path else {
        return ScanRegion::Ram;
    };
    match get_rtt_symbol_from_elf(path) {
        Ok(address) => ScanRegion::Exact(address),
        Err(e) => {
            warn!("ELF symbol detection failed, scanning RAM instead: {}", e);
            ScanRegion::Ram
        }
    }
}

/// RTT control blocks live in RAM on Cortex-M parts
fn is_valid_rtt_address(address: u64) -> bool {
    const RAM_START: u64 = 0x20000000;
    const RAM_END: u64 = 0x2FFFFFFF;

    (RAM_START..=RAM_END).contains(&address)
}
