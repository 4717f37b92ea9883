//! Error types for punch reader operations.
//!
//! Every adapter reports failures through [`HardwareError`]. The variants
//! split into two groups that drive the acquisition loop:
//!
//! - recoverable per-record errors (checksum, protocol violation, card
//!   swapped mid-read), after which polling simply continues
//! - fatal transport errors, after which the adapter is disconnected and the
//!   worker owning it ends

use punchlink_core::CardType;
use punchlink_protocol::ProtocolError;
use std::io;

/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur while talking to a punch reader.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// No response started within the configured timeout.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A frame arrived with a checksum that does not match its content.
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// A read was requested but no card is on the reader.
    #[error("No card on the reader")]
    CardNotFound,

    /// The card was removed or swapped before the read completed.
    #[error("Card changed during read")]
    CardChangedDuringRead,

    /// The station reported a card this reader cannot decode.
    #[error("Unsupported card type: {card_type}")]
    UnsupportedCardType { card_type: String },

    /// The port or HID device failed. The adapter is disconnected.
    #[error("Transport failure on {device}: {message}")]
    TransportFailure { device: String, message: String },

    /// The device answered with something the protocol does not allow.
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// A request payload exceeds the frame capacity and was not sent.
    #[error("Payload too long: {len} bytes (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    /// Reader configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl HardwareError {
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn unsupported_card(card_type: impl ToString) -> Self {
        Self::UnsupportedCardType {
            card_type: card_type.to_string(),
        }
    }

    pub fn transport(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransportFailure {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` for errors that only spoil the current record.
    ///
    /// The acquisition loop logs these and keeps polling, counting them
    /// towards its consecutive-error limit.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ChecksumMismatch { .. }
                | Self::CardNotFound
                | Self::CardChangedDuringRead
                | Self::UnsupportedCardType { .. }
                | Self::ProtocolViolation { .. }
        )
    }

    /// Returns `true` for errors that end the worker owning the adapter.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TransportFailure { .. } | Self::Configuration { .. })
    }

    /// Returns `true` if the error means the card left the reader.
    pub fn is_card_gone(&self) -> bool {
        matches!(self, Self::CardChangedDuringRead | Self::CardNotFound)
    }
}

impl From<ProtocolError> for HardwareError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::ChecksumMismatch { expected, actual } => {
                Self::ChecksumMismatch { expected, actual }
            }
            ProtocolError::PayloadTooLong { len, max } => Self::PayloadTooLong { len, max },
            ProtocolError::Io(e) => Self::from(e),
            ProtocolError::DeviceError { code, message } => {
                Self::violation(format!("device error {code:#04x}: {message}"))
            }
            other => Self::violation(other.to_string()),
        }
    }
}

impl From<io::Error> for HardwareError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::timeout(0),
            _ => Self::transport("port", err.to_string()),
        }
    }
}

impl From<CardType> for HardwareError {
    fn from(card_type: CardType) -> Self {
        Self::unsupported_card(card_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_timeout_display() {
        let error = HardwareError::timeout(500);
        assert_eq!(error.to_string(), "Operation timeout after 500ms");
    }

    #[test]
    fn test_transport_failure_is_fatal() {
        let error = HardwareError::transport("/dev/ttyUSB0", "device unplugged");
        assert!(error.is_fatal());
        assert!(!error.is_recoverable());
        assert_eq!(
            error.to_string(),
            "Transport failure on /dev/ttyUSB0: device unplugged"
        );
    }

    #[rstest]
    #[case(HardwareError::ChecksumMismatch { expected: 1, actual: 2 })]
    #[case(HardwareError::violation("unknown code 0x99"))]
    #[case(HardwareError::CardChangedDuringRead)]
    #[case(HardwareError::timeout(100))]
    fn test_per_record_errors_are_recoverable(#[case] error: HardwareError) {
        assert!(error.is_recoverable());
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_checksum_keeps_values() {
        let error = HardwareError::from(ProtocolError::checksum8(0x10, 0x11));
        assert!(matches!(
            error,
            HardwareError::ChecksumMismatch {
                expected: 0x10,
                actual: 0x11
            }
        ));
    }

    #[test]
    fn test_fragment_errors_become_violations() {
        let error = HardwareError::from(ProtocolError::FragmentOutOfOrder {
            expected: 1,
            actual: 3,
        });
        assert!(matches!(error, HardwareError::ProtocolViolation { .. }));
    }

    #[test]
    fn test_payload_too_long_is_not_recoverable() {
        let error = HardwareError::from(ProtocolError::PayloadTooLong { len: 40, max: 28 });
        assert!(matches!(error, HardwareError::PayloadTooLong { len: 40, max: 28 }));
        assert!(!error.is_recoverable());
    }

    #[rstest]
    #[case(io::ErrorKind::TimedOut, true)]
    #[case(io::ErrorKind::BrokenPipe, false)]
    #[case(io::ErrorKind::NotFound, false)]
    fn test_io_errors(#[case] kind: io::ErrorKind, #[case] is_timeout: bool) {
        let error = HardwareError::from(io::Error::new(kind, "boom"));
        assert_eq!(matches!(error, HardwareError::Timeout { .. }), is_timeout);
        assert_eq!(error.is_fatal(), !is_timeout);
    }

    #[test]
    fn test_unsupported_card_from_type() {
        let error = HardwareError::from(CardType::Si8);
        assert_eq!(error.to_string(), "Unsupported card type: SI8");
    }
}
