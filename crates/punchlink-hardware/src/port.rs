//! Serial port discovery.
//!
//! [`PortSelector`] turns a [`PortSetting`] into a concrete port name. An
//! explicit setting is used as is; `Auto` walks the platform's candidate
//! ports and returns the first one that can be opened.

use std::fmt;
use tracing::{debug, info};

use crate::{HardwareError, Result, config::PortSetting};

type Probe = Box<dyn Fn(&str) -> bool + Send + Sync>;
type Candidates = Box<dyn Fn() -> Vec<String> + Send + Sync>;

/// Finds a usable serial port.
pub struct PortSelector {
    candidates: Candidates,
    probe: Probe,
}

impl fmt::Debug for PortSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortSelector").finish_non_exhaustive()
    }
}

impl Default for PortSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl PortSelector {
    /// Selector over the platform's serial ports, probing with a real open.
    pub fn new() -> Self {
        Self {
            candidates: Box::new(platform_candidates),
            probe: Box::new(probe_open),
        }
    }

    /// Selector over a fixed candidate list with a custom probe.
    ///
    /// # Examples
    ///
    /// ```
    /// use punchlink_hardware::{config::PortSetting, port::PortSelector};
    ///
    /// let selector = PortSelector::with(
    ///     vec!["/dev/ttyUSB0".into(), "/dev/ttyUSB1".into()],
    ///     |port| port.ends_with('1'),
    /// );
    /// assert_eq!(selector.select(&PortSetting::Auto).unwrap(), "/dev/ttyUSB1");
    /// ```
    pub fn with(
        candidates: Vec<String>,
        probe: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            candidates: Box::new(move || candidates.clone()),
            probe: Box::new(probe),
        }
    }

    /// Candidate ports in probing order.
    pub fn candidates(&self) -> Vec<String> {
        (self.candidates)()
    }

    /// Candidates that pass the probe.
    pub fn available(&self) -> Vec<String> {
        self.candidates()
            .into_iter()
            .filter(|port| (self.probe)(port))
            .collect()
    }

    /// Resolve `setting` to a port name.
    ///
    /// # Errors
    /// `HardwareError::Configuration` when `Auto` finds no port that opens.
    pub fn select(&self, setting: &PortSetting) -> Result<String> {
        match setting {
            PortSetting::Explicit(port) => Ok(port.clone()),
            PortSetting::Auto => {
                for port in self.candidates() {
                    if (self.probe)(&port) {
                        info!(port = %port, "serial port selected");
                        return Ok(port);
                    }
                    debug!(port = %port, "port not available");
                }
                Err(HardwareError::configuration("no serial port available"))
            }
        }
    }
}

fn matches_platform(name: &str) -> bool {
    if cfg!(target_os = "windows") {
        name.starts_with("COM")
    } else if cfg!(target_os = "macos") {
        name.starts_with("/dev/cu.usbserial")
    } else {
        name.starts_with("/dev/ttyUSB") || name.starts_with("/dev/ttyACM")
    }
}

/// Platform candidate ports.
///
/// Windows lists `COM1` to `COM64`. Elsewhere the enumerated ports are
/// filtered to USB serial adapters, with a scan of `/dev` when enumeration
/// is unavailable.
pub fn platform_candidates() -> Vec<String> {
    if cfg!(target_os = "windows") {
        return (1..=64).map(|n| format!("COM{n}")).collect();
    }

    let mut ports = enumerated_ports();
    if ports.is_empty() {
        ports = scan_dev();
    }
    ports.retain(|name| matches_platform(name));
    ports.sort();
    ports.dedup();
    ports
}

#[cfg(feature = "serial")]
fn enumerated_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(err) => {
            debug!(error = %err, "port enumeration failed");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "serial"))]
fn enumerated_ports() -> Vec<String> {
    Vec::new()
}

fn scan_dev() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .map(|name| format!("/dev/{name}"))
        .collect()
}

/// Open the port and close it again.
#[cfg(feature = "serial")]
pub fn probe_open(port: &str) -> bool {
    serialport::new(port, 9600)
        .timeout(std::time::Duration::from_millis(100))
        .open()
        .is_ok()
}

#[cfg(not(feature = "serial"))]
pub fn probe_open(port: &str) -> bool {
    std::path::Path::new(port).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(available: &'static [&'static str]) -> PortSelector {
        PortSelector::with(
            vec!["COM1".into(), "COM2".into(), "COM3".into()],
            move |port| available.contains(&port),
        )
    }

    #[test]
    fn test_explicit_port_is_not_probed() {
        let selector = selector(&[]);
        let port = selector
            .select(&PortSetting::Explicit("/dev/ttyS7".into()))
            .unwrap();
        assert_eq!(port, "/dev/ttyS7");
    }

    #[test]
    fn test_auto_takes_first_available() {
        let selector = selector(&["COM2", "COM3"]);
        assert_eq!(selector.select(&PortSetting::Auto).unwrap(), "COM2");
        assert_eq!(selector.available(), vec!["COM2", "COM3"]);
    }

    #[test]
    fn test_auto_without_ports_fails() {
        let selector = selector(&[]);
        assert!(matches!(
            selector.select(&PortSetting::Auto),
            Err(HardwareError::Configuration { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_filter() {
        assert!(matches_platform("/dev/ttyUSB0"));
        assert!(matches_platform("/dev/ttyACM3"));
        assert!(!matches_platform("/dev/ttyS0"));
        assert!(!matches_platform("/dev/null"));
    }
}
