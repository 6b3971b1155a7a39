//! Utility functions and helper types

use chrono::{DateTime, Local};

/// Probe type enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeType {
    JLink,
    DapLink,
    StLink,
    Blackmagic,
    Ftdi,
    Unknown,
}

impl ProbeType {
    /// Detect probe type from vendor and product IDs
    pub fn from_vid_pid(vendor_id: u16, product_id: u16) -> Self {
        match (vendor_id, product_id) {
            (0x1366, _) => ProbeType::JLink,
            (0x0D28, _) => ProbeType::DapLink,
            (0x0483, 0x374B) | (0x0483, 0x3748) | (0x0483, 0x374A) => ProbeType::StLink,
            (0x1D50, 0x6018) => ProbeType::Blackmagic,
            (0x0403, _) => ProbeType::Ftdi,
            _ => ProbeType::Unknown,
        }
    }
}

impl std::fmt::Display for ProbeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeType::JLink => write!(f, "J-Link"),
            ProbeType::DapLink => write!(f, "DAPLink"),
            ProbeType::StLink => write!(f, "ST-Link"),
            ProbeType::Blackmagic => write!(f, "Black Magic Probe"),
            ProbeType::Ftdi => write!(f, "FTDI"),
            ProbeType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Minute-granularity stamp shared by both capture artifacts (`DD_MM_YYYY-HH-MM`)
pub fn capture_stamp(now: &DateTime<Local>) -> String {
    now.format("%d_%m_%Y-%H-%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_probe_type_detection() {
        assert_eq!(ProbeType::from_vid_pid(0x1366, 0x0101), ProbeType::JLink);
        assert_eq!(ProbeType::from_vid_pid(0x0483, 0x374B), ProbeType::StLink);
        assert_eq!(ProbeType::from_vid_pid(0x0D28, 0x0204), ProbeType::DapLink);
        assert_eq!(ProbeType::from_vid_pid(0xFFFF, 0xFFFF), ProbeType::Unknown);
    }

    #[test]
    fn test_capture_stamp_format() {
        let now = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 59).unwrap();
        assert_eq!(capture_stamp(&now), "07_03_2024-09-05");
    }
}
