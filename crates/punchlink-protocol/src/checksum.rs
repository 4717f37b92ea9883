//! Checksums of the supported wire protocols.

use punchlink_core::constants::sportident::CRC_POLYNOMIAL;

/// Sum of all bytes modulo 256.
///
/// Used by Sportiduino (over `CODE LEN DATA`) and SRPid (over everything
/// between the start byte and the checksum).
///
/// # Examples
///
/// ```
/// use punchlink_protocol::checksum::sum8;
///
/// assert_eq!(sum8(&[0x46, 0x00]), 0x46);
/// assert_eq!(sum8(&[0xFF, 0x02]), 0x01);
/// ```
#[inline]
#[must_use]
pub fn sum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Byte sum with end-around carry, as used by SFR readers.
///
/// Each addition that overflows eight bits folds the carry back into the
/// low byte.
///
/// # Examples
///
/// ```
/// use punchlink_protocol::checksum::carry_add;
///
/// // Beep request checksum
/// assert_eq!(carry_add(&[0x03, 0x01]), 0x04);
/// assert_eq!(carry_add(&[0xFF, 0x02]), 0x02);
/// ```
#[must_use]
pub fn carry_add(bytes: &[u8]) -> u8 {
    let mut acc: u16 = 0;
    for &b in bytes {
        let sum = acc + u16::from(b);
        acc = (sum & 0xFF) + (sum >> 8);
    }
    // acc <= 0xFF after every fold
    (acc & 0xFF) as u8
}

/// SPORTident extended protocol CRC-16.
///
/// The first two bytes seed the register. The remainder is zero padded to
/// an even length (plus one extra zero word if it already was even) and
/// shifted through the register one 16-bit word at a time, polynomial
/// `0x8005`, with the incoming data bit rotated into bit 0.
///
/// The CRC covers `CMD LEN DATA` of a frame.
///
/// # Examples
///
/// ```
/// use punchlink_protocol::checksum::crc16;
///
/// // "set master/slave direct" request: FF 02 F0 01 4D 6D 0A 03
/// assert_eq!(crc16(&[0xF0, 0x01, 0x4D]), 0x6D0A);
/// ```
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    match bytes {
        [] => 0,
        [only] => u16::from(*only),
        [hi, lo, rest @ ..] => {
            let mut crc = u16::from_be_bytes([*hi, *lo]);
            if rest.is_empty() {
                return crc;
            }

            let mut padded = rest.to_vec();
            if padded.len() % 2 == 0 {
                padded.extend_from_slice(&[0, 0]);
            } else {
                padded.push(0);
            }

            for word in padded.chunks_exact(2) {
                let mut val = u16::from_be_bytes([word[0], word[1]]);
                for _ in 0..16 {
                    let carry = crc & 0x8000 != 0;
                    crc <<= 1;
                    if val & 0x8000 != 0 {
                        crc |= 1;
                    }
                    if carry {
                        crc ^= CRC_POLYNOMIAL;
                    }
                    val <<= 1;
                }
            }
            crc
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[0xF0, 0x01, 0x4D], 0x6D0A)]
    #[case(&[0xB1, 0x00], 0xB100)]
    #[case(&[0x83, 0x02, 0x74, 0x01], 0x0414)]
    #[case(&[], 0x0000)]
    #[case(&[0x42], 0x0042)]
    fn test_crc16_vectors(#[case] input: &[u8], #[case] expected: u16) {
        assert_eq!(crc16(input), expected);
    }

    #[test]
    fn test_sum8_wraps() {
        assert_eq!(sum8(&[0x80, 0x80, 0x01]), 0x01);
        assert_eq!(sum8(&[]), 0);
    }

    #[rstest]
    #[case(&[0x01, 0x01], 0x02)]
    #[case(&[0x01, 0x05], 0x06)]
    #[case(&[0x80, 0x80], 0x01)]
    #[case(&[0xFF, 0xFF], 0xFF)]
    fn test_carry_add(#[case] input: &[u8], #[case] expected: u8) {
        assert_eq!(carry_add(input), expected);
    }
}
