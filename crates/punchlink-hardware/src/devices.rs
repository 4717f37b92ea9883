//! Enum dispatch over the concrete readers.
//!
//! The acquisition worker owns exactly one reader whose family is only known
//! from configuration. [`AnyPunchReader`] holds any of them behind one
//! concrete type, so the worker stays free of generics and trait objects.
//!
//! # Examples
//!
//! ```
//! use punchlink_core::DeviceFamily;
//! use punchlink_hardware::{PunchReader, devices::AnyPunchReader, mock::MockPunchReader};
//!
//! let (reader, _handle) = MockPunchReader::new(DeviceFamily::Srpid);
//! let reader = AnyPunchReader::from(reader);
//! assert_eq!(reader.family(), DeviceFamily::Srpid);
//! ```

use punchlink_core::{DeviceFamily, RawCardRecord};

use crate::{PunchReader, Result, config::ReaderConfig, mock::MockPunchReader};

#[cfg(feature = "hid")]
use crate::{hid::HidApiLink, readers::SfrReader};
#[cfg(feature = "serial")]
use crate::{
    readers::{SportidentReader, SportiduinoReader, SrpidReader},
    transport::SerialTransport,
};

/// Any supported punch reader.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyPunchReader {
    #[cfg(feature = "serial")]
    Sportident(SportidentReader<SerialTransport>),
    #[cfg(feature = "serial")]
    Sportiduino(SportiduinoReader<SerialTransport>),
    #[cfg(feature = "serial")]
    Srpid(SrpidReader<SerialTransport>),
    #[cfg(feature = "hid")]
    Sfr(SfrReader<HidApiLink>),
    /// Scripted reader for development and testing.
    Mock(MockPunchReader),
}

impl AnyPunchReader {
    /// Build the disconnected adapter for `config.family`.
    ///
    /// `port` names the serial port for serial families and is ignored for
    /// HID readers.
    ///
    /// # Errors
    /// `HardwareError::Configuration` if the config is invalid, a serial
    /// family has no port, or the family's transport is compiled out.
    pub fn for_config(config: ReaderConfig, port: Option<&str>) -> Result<Self> {
        config.validate()?;

        #[cfg(feature = "serial")]
        let serial = {
            let family = config.family;
            move |port: Option<&str>| {
                port.map(SerialTransport::new).ok_or_else(|| {
                    crate::HardwareError::configuration(format!(
                        "{family} reader needs a serial port"
                    ))
                })
            }
        };

        match config.family {
            #[cfg(feature = "serial")]
            DeviceFamily::Sportident => Ok(Self::Sportident(SportidentReader::new(
                serial(port)?,
                config,
            ))),
            #[cfg(feature = "serial")]
            DeviceFamily::Sportiduino => Ok(Self::Sportiduino(SportiduinoReader::new(
                serial(port)?,
                config,
            ))),
            #[cfg(feature = "serial")]
            DeviceFamily::Srpid => Ok(Self::Srpid(SrpidReader::new(serial(port)?, config))),
            #[cfg(feature = "hid")]
            DeviceFamily::Sfr => {
                let _ = port;
                let ids = config.hid.ok_or_else(|| {
                    crate::HardwareError::configuration("SFR reader needs HID ids")
                })?;
                Ok(Self::Sfr(SfrReader::new(HidApiLink::new(ids), config)))
            }
            #[allow(unreachable_patterns)]
            family => Err(crate::HardwareError::configuration(format!(
                "{family} support is not compiled in"
            ))),
        }
    }
}

impl From<MockPunchReader> for AnyPunchReader {
    fn from(reader: MockPunchReader) -> Self {
        Self::Mock(reader)
    }
}

macro_rules! dispatch {
    ($self:ident, $reader:ident => $call:expr) => {
        match $self {
            #[cfg(feature = "serial")]
            AnyPunchReader::Sportident($reader) => $call,
            #[cfg(feature = "serial")]
            AnyPunchReader::Sportiduino($reader) => $call,
            #[cfg(feature = "serial")]
            AnyPunchReader::Srpid($reader) => $call,
            #[cfg(feature = "hid")]
            AnyPunchReader::Sfr($reader) => $call,
            AnyPunchReader::Mock($reader) => $call,
        }
    };
}

impl PunchReader for AnyPunchReader {
    fn family(&self) -> DeviceFamily {
        dispatch!(self, reader => reader.family())
    }

    fn connect(&mut self) -> Result<()> {
        dispatch!(self, reader => reader.connect())
    }

    fn poll_presence(&mut self) -> Result<bool> {
        dispatch!(self, reader => reader.poll_presence())
    }

    fn read_record(&mut self) -> Result<RawCardRecord> {
        dispatch!(self, reader => reader.read_record())
    }

    fn acknowledge(&mut self) -> Result<()> {
        dispatch!(self, reader => reader.acknowledge())
    }

    fn disconnect(&mut self) {
        dispatch!(self, reader => reader.disconnect())
    }

    fn is_connected(&self) -> bool {
        dispatch!(self, reader => reader.is_connected())
    }

    fn reconnect(&mut self) -> Result<()> {
        dispatch!(self, reader => reader.reconnect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HardwareError;

    #[test]
    fn test_mock_dispatch() {
        let (reader, handle) = MockPunchReader::new(DeviceFamily::Sfr);
        let mut reader = AnyPunchReader::from(reader);
        reader.connect().unwrap();
        assert!(reader.is_connected());
        assert!(!reader.poll_presence().unwrap());
        reader.disconnect();
        assert_eq!(handle.disconnects(), 1);
    }

    #[cfg(feature = "serial")]
    #[test]
    fn test_serial_family_needs_port() {
        let config = ReaderConfig::for_family(DeviceFamily::Sportiduino);
        let err = AnyPunchReader::for_config(config, None).unwrap_err();
        assert!(matches!(err, HardwareError::Configuration { .. }));
    }

    #[cfg(feature = "serial")]
    #[test]
    fn test_builds_disconnected_serial_reader() {
        let config = ReaderConfig::for_family(DeviceFamily::Srpid);
        let reader = AnyPunchReader::for_config(config, Some("/dev/ttyUSB9")).unwrap();
        assert!(matches!(reader, AnyPunchReader::Srpid(_)));
        assert_eq!(reader.family(), DeviceFamily::Srpid);
        assert!(!reader.is_connected());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ReaderConfig::for_family(DeviceFamily::Sportident).with_baud_rates(vec![]);
        assert!(AnyPunchReader::for_config(config, Some("COM1")).is_err());
    }
}
