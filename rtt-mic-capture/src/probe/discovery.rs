//! Debug probe discovery and selection

use probe_rs::probe::{list::Lister, DebugProbeInfo};
use serde::Serialize;
use crate::error::{CaptureError, Result};
use crate::utils::ProbeType;
use tracing::{debug, info, warn};

/// Information about a discovered debug probe
#[derive(Debug, Clone, Serialize)]
pub struct ProbeInfo {
    pub identifier: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub probe_type: String,
}

impl From<&DebugProbeInfo> for ProbeInfo {
    fn from(probe: &DebugProbeInfo) -> Self {
        let probe_type = ProbeType::from_vid_pid(probe.vendor_id, probe.product_id);
        Self {
            identifier: probe.identifier.clone(),
            vendor_id: probe.vendor_id,
            product_id: probe.product_id,
            serial_number: probe.serial_number.clone(),
            probe_type: probe_type.to_string(),
        }
    }
}

impl ProbeInfo {
    /// Whether this probe matches an operator supplied selector.
    ///
    /// `auto` (any case) and the empty string match every probe; otherwise the
    /// selector must appear in the identifier or the serial number.
    pub fn matches(&self, selector: &str) -> bool {
        if selector.is_empty() || selector.eq_ignore_ascii_case("auto") {
            return true;
        }
        self.identifier.contains(selector)
            || self
                .serial_number
                .as_deref()
                .is_some_and(|serial| serial.contains(selector))
    }
}

/// Debug probe discovery utility
pub struct ProbeDiscovery;

impl ProbeDiscovery {
    /// List all available debug probes
    pub fn list_probes() -> Vec<ProbeInfo> {
        debug!("Discovering debug probes");

        let probes: Vec<ProbeInfo> = Lister::new()
            .list_all()
            .iter()
            .map(ProbeInfo::from)
            .collect();

        info!("Found {} debug probes", probes.len());
        for probe in &probes {
            debug!("  {} - {} ({})",
                   probe.identifier,
                   probe.probe_type,
                   probe.serial_number.as_deref().unwrap_or("no serial"));
        }

        probes
    }

    /// Find the probe matching `selector`, returning the raw probe-rs handle
    /// needed to open it.
    pub fn select(selector: &str) -> Result<DebugProbeInfo> {
        let probes = Lister::new().list_all();
        if probes.is_empty() {
            return Err(CaptureError::ProbeNotFound("No debug probes found".to_string()));
        }

        let index = Self::select_index(
            &probes.iter().map(ProbeInfo::from).collect::<Vec<_>>(),
            selector,
        )?;
        Ok(probes[index].clone())
    }

    /// Pick the index of the first probe matching `selector`
    pub fn select_index(probes: &[ProbeInfo], selector: &str) -> Result<usize> {
        let matching: Vec<usize> = probes
            .iter()
            .enumerate()
            .filter(|(_, probe)| probe.matches(selector))
            .map(|(i, _)| i)
            .collect();

        match matching.as_slice() {
            [] => Err(CaptureError::ProbeNotFound(format!(
                "No probe matches selector '{}'",
                selector
            ))),
            [first, rest @ ..] => {
                if !rest.is_empty() {
                    warn!("{} probes match '{}', using {}",
                          matching.len(), selector, probes[*first].identifier);
                }
                Ok(*first)
            }
        }
    }
}
