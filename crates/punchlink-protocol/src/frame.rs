use bytes::Bytes;
use std::fmt;

use punchlink_core::constants::{sportident, sportiduino, srpid};

/// Shape of a length-prefixed serial frame.
///
/// All three serial protocols share the header `START CODE LEN`; they differ
/// in the start byte, in what follows the data, and in whether the `LEN`
/// byte can announce a continuation fragment.
///
/// ```text
/// START  CODE  LEN  DATA[data_len(LEN)]  TRAILER[trailer_len]
/// ```
///
/// # Examples
///
/// ```
/// use punchlink_protocol::FrameLayout;
///
/// let layout = FrameLayout::SPORTIDUINO;
/// assert_eq!(layout.data_len(5), 5);
/// assert_eq!(layout.data_len(0x1F), 28); // fragment 1 carries a full frame
/// assert_eq!(layout.fragment_index(0x1F), Some(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Byte that opens every frame. Anything before it is discarded.
    pub start: u8,
    /// Bytes after the data: checksum, CRC or end marker.
    pub trailer_len: usize,
    /// `LEN` values at or above this mark a continuation fragment.
    pub fragment_offset: Option<u8>,
    /// Data length of a continuation fragment.
    pub fragment_data_len: usize,
}

impl FrameLayout {
    /// `0xFE CODE LEN DATA CS`, fragments from `LEN = 0x1E`.
    pub const SPORTIDUINO: FrameLayout = FrameLayout {
        start: sportiduino::START_BYTE,
        trailer_len: 1,
        fragment_offset: Some(sportiduino::FRAGMENT_OFFSET),
        fragment_data_len: sportiduino::MAX_DATA_LEN,
    };

    /// `0xEC CODE LEN DATA CS` (responses only).
    pub const SRPID: FrameLayout = FrameLayout {
        start: srpid::RESPONSE_START,
        trailer_len: 1,
        fragment_offset: None,
        fragment_data_len: 0,
    };

    /// `STX CMD LEN DATA CRC_HI CRC_LO ETX`.
    pub const SPORTIDENT: FrameLayout = FrameLayout {
        start: sportident::STX,
        trailer_len: 3,
        fragment_offset: None,
        fragment_data_len: 0,
    };

    /// Fragment index announced by a `LEN` byte, if it announces one.
    #[inline]
    #[must_use]
    pub fn fragment_index(&self, len: u8) -> Option<u8> {
        match self.fragment_offset {
            Some(offset) if len >= offset => Some(len - offset),
            _ => None,
        }
    }

    /// Number of data bytes that follow a `LEN` byte.
    #[inline]
    #[must_use]
    pub fn data_len(&self, len: u8) -> usize {
        if self.fragment_index(len).is_some() {
            self.fragment_data_len
        } else {
            usize::from(len)
        }
    }
}

/// One frame as cut from the byte stream, before checksum verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub code: u8,
    /// The `LEN` byte as transmitted.
    pub len: u8,
    pub data: Bytes,
    pub trailer: Bytes,
    /// Continuation fragment index, when `LEN` announced one.
    pub fragment: Option<u8>,
}

impl RawFrame {
    /// Bytes covered by the checksum of every serial protocol: `CODE LEN DATA`.
    #[must_use]
    pub fn checked_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.data.len());
        bytes.push(self.code);
        bytes.push(self.len);
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Total size on the wire, start byte included.
    #[must_use]
    pub fn size(&self) -> usize {
        3 + self.data.len() + self.trailer.len()
    }
}

/// A complete, verified response: response code plus reassembled data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u8,
    pub data: Bytes,
}

impl Response {
    pub fn new(code: u8, data: impl Into<Bytes>) -> Self {
        Response {
            code,
            data: data.into(),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "code {:#04x}, {} bytes", self.code, self.data.len())
    }
}

/// Hex dump for wire traces, e.g. `fe 46 00 46`.
#[must_use]
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x00, None, 0)]
    #[case(0x1C, None, 28)]
    #[case(0x1D, None, 29)]
    #[case(0x1E, Some(0), 28)]
    #[case(0x21, Some(3), 28)]
    fn test_sportiduino_len_byte(
        #[case] len: u8,
        #[case] fragment: Option<u8>,
        #[case] data_len: usize,
    ) {
        let layout = FrameLayout::SPORTIDUINO;
        assert_eq!(layout.fragment_index(len), fragment);
        assert_eq!(layout.data_len(len), data_len);
    }

    #[test]
    fn test_layouts_without_fragments_use_len_as_is() {
        assert_eq!(FrameLayout::SRPID.data_len(0xFF), 255);
        assert_eq!(FrameLayout::SPORTIDENT.fragment_index(0x80), None);
    }

    #[test]
    fn test_checked_bytes_and_size() {
        let frame = RawFrame {
            code: 0x63,
            len: 2,
            data: Bytes::from_static(&[0x00, 0x11]),
            trailer: Bytes::from_static(&[0x76]),
            fragment: None,
        };
        assert_eq!(frame.checked_bytes(), vec![0x63, 0x02, 0x00, 0x11]);
        assert_eq!(frame.size(), 6);
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0xFE, 0x46, 0x00]), "fe 46 00");
        assert_eq!(hex(&[]), "");
    }
}
