use thiserror::Error;

/// Errors raised while framing or decoding device traffic.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("Fragment out of order: expected {expected}, got {actual}")]
    FragmentOutOfOrder { expected: u8, actual: u8 },

    #[error("Fragment code changed mid-response: expected {expected:#04x}, got {actual:#04x}")]
    FragmentCodeMismatch { expected: u8, actual: u8 },

    #[error("Payload too long: {len} bytes (max {max})")]
    PayloadTooLong { len: usize, max: usize },

    #[error("Truncated data: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Unexpected response code {actual:#04x} (expected {expected:#04x})")]
    UnexpectedResponse { expected: u8, actual: u8 },

    #[error("Device reported error {code:#04x}: {message}")]
    DeviceError { code: u8, message: &'static str },

    #[error("Invalid card data: {0}")]
    InvalidCardData(String),

    #[error("Frame too large: {size} bytes (max {max_size})")]
    FrameTooLarge { size: usize, max_size: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Helper for checksum errors on single-byte checksums.
    pub fn checksum8(expected: u8, actual: u8) -> Self {
        Self::ChecksumMismatch {
            expected: u16::from(expected),
            actual: u16::from(actual),
        }
    }

    pub fn invalid_card(message: impl Into<String>) -> Self {
        Self::InvalidCardData(message.into())
    }

    /// Returns `true` for errors that mean the byte stream itself broke the
    /// protocol rules (fragments, unknown codes, malformed frames).
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            Self::FragmentOutOfOrder { .. }
                | Self::FragmentCodeMismatch { .. }
                | Self::InvalidFrame(_)
                | Self::UnexpectedResponse { .. }
                | Self::InvalidCardData(_)
                | Self::Truncated { .. }
                | Self::FrameTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum8_display() {
        let err = ProtocolError::checksum8(0x1A, 0x1B);
        assert_eq!(err.to_string(), "Checksum mismatch: expected 0x001a, got 0x001b");
    }

    #[test]
    fn test_violation_classification() {
        assert!(ProtocolError::FragmentOutOfOrder { expected: 1, actual: 2 }.is_violation());
        assert!(ProtocolError::invalid_card("short").is_violation());
        assert!(!ProtocolError::checksum8(0, 1).is_violation());
        assert!(!ProtocolError::PayloadTooLong { len: 29, max: 28 }.is_violation());
    }
}
