//! Per-family reader configuration.
//!
//! A [`ReaderConfig`] is fixed for the lifetime of the worker that owns the
//! reader. Family defaults come from [`ReaderConfig::for_family`]; callers
//! override individual fields with the `with_*` builders and must call
//! [`ReaderConfig::validate`] before handing the config to an adapter.

use punchlink_core::{
    DeviceFamily,
    constants::{DEFAULT_SERIAL_TIMEOUT_MS, sfr, sportident, sportiduino, srpid},
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

use crate::{HardwareError, Result};

/// Where the serial port comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortSetting {
    /// Probe the platform's candidate ports and take the first one that opens.
    #[default]
    Auto,
    Explicit(String),
}

impl From<String> for PortSetting {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("auto") {
            PortSetting::Auto
        } else {
            PortSetting::Explicit(trimmed.to_string())
        }
    }
}

impl From<PortSetting> for String {
    fn from(value: PortSetting) -> Self {
        match value {
            PortSetting::Auto => "auto".to_string(),
            PortSetting::Explicit(port) => port,
        }
    }
}

impl fmt::Display for PortSetting {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PortSetting::Auto => f.write_str("auto"),
            PortSetting::Explicit(port) => f.write_str(port),
        }
    }
}

/// USB identifiers of a HID reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HidIds {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for HidIds {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Transport parameters for one reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub family: DeviceFamily,
    #[serde(default)]
    pub port: PortSetting,
    /// Baud rates tried in order until the station answers the handshake.
    #[serde(default)]
    pub baud_rates: Vec<u32>,
    /// Response timeout for a full request.
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Pause after opening the port while the station resets.
    #[serde(with = "millis", default)]
    pub settle_delay: Duration,
    /// Trace wire traffic as hex.
    #[serde(default)]
    pub debug: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hid: Option<HidIds>,
}

impl ReaderConfig {
    /// Defaults for a reader family.
    ///
    /// # Examples
    ///
    /// ```
    /// use punchlink_core::DeviceFamily;
    /// use punchlink_hardware::config::ReaderConfig;
    ///
    /// let config = ReaderConfig::for_family(DeviceFamily::Sportident);
    /// assert_eq!(config.baud_rates, vec![38400, 4800]);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn for_family(family: DeviceFamily) -> Self {
        let timeout = Duration::from_millis(DEFAULT_SERIAL_TIMEOUT_MS);
        let base = ReaderConfig {
            family,
            port: PortSetting::Auto,
            baud_rates: Vec::new(),
            timeout,
            settle_delay: Duration::ZERO,
            debug: false,
            hid: None,
        };

        match family {
            DeviceFamily::Sportident => ReaderConfig {
                baud_rates: sportident::BAUD_RATES.to_vec(),
                ..base
            },
            DeviceFamily::Sportiduino => ReaderConfig {
                baud_rates: vec![sportiduino::BAUD_RATE],
                settle_delay: Duration::from_millis(sportiduino::SETTLE_DELAY_MS),
                ..base
            },
            DeviceFamily::Srpid => ReaderConfig {
                baud_rates: vec![srpid::BAUD_RATE],
                settle_delay: Duration::from_millis(srpid::SETTLE_DELAY_MS),
                ..base
            },
            DeviceFamily::Sfr => ReaderConfig {
                hid: Some(HidIds {
                    vendor_id: sfr::VENDOR_ID,
                    product_id: sfr::PRODUCT_ID,
                }),
                ..base
            },
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = PortSetting::from(port.into());
        self
    }

    #[must_use]
    pub fn with_baud_rates(mut self, rates: impl Into<Vec<u32>>) -> Self {
        self.baud_rates = rates.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Response timeout in whole milliseconds, for error reporting.
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// First baud rate of the fallback sequence.
    pub fn primary_baud(&self) -> Result<u32> {
        self.baud_rates
            .first()
            .copied()
            .ok_or_else(|| HardwareError::configuration("no baud rate configured"))
    }

    /// Check the configuration is usable by an adapter of its family.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::Configuration` if:
    /// - the timeout is zero
    /// - a serial family has no baud rate or a zero baud rate
    /// - a HID family has no vendor/product ids
    /// - an explicit port name is empty
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(HardwareError::configuration("timeout must be non-zero"));
        }

        if self.family.is_hid() {
            if self.hid.is_none() {
                return Err(HardwareError::configuration(format!(
                    "{} reader needs HID vendor and product ids",
                    self.family
                )));
            }
        } else {
            if self.baud_rates.is_empty() {
                return Err(HardwareError::configuration(format!(
                    "{} reader needs at least one baud rate",
                    self.family
                )));
            }
            if self.baud_rates.contains(&0) {
                return Err(HardwareError::configuration("baud rate must be non-zero"));
            }
        }

        if let PortSetting::Explicit(port) = &self.port
            && port.is_empty()
        {
            return Err(HardwareError::configuration("port name is empty"));
        }

        Ok(())
    }
}

/// `Duration` as integer milliseconds.
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
