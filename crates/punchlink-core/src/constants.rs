//! Wire-level and timing constants for the supported punch devices.
//!
//! Every byte value in this module is part of a device's wire protocol and
//! must be kept bit-exact. Changing one breaks communication with the
//! physical station.
//!
//! # Device families
//!
//! | Family | Transport | Framing | Checksum |
//! |--------|-----------|---------|----------|
//! | SPORTident | serial, 38400 then 4800 baud | `STX CMD LEN DATA CRC16 ETX` | CRC-16, polynomial 0x8005 |
//! | Sportiduino | serial, 9600 baud | `0xFE CODE LEN DATA CS` | sum mod 256 |
//! | SRPid | serial, 9600 baud | `0xC1 CODE 00x6 0xCE CS` / `0xEC CODE LEN DATA CS` | sum mod 256 |
//! | SFR | USB HID, 64-byte reports | `0x3F 0x05 0xFD CODE ARG CS 0xFE` | add with end-around carry |
//!
//! Constants are grouped in one submodule per family:
//!
//! ```
//! use punchlink_core::constants::{sportiduino, srpid};
//!
//! assert_eq!(sportiduino::START_BYTE, 0xFE);
//! assert_eq!(srpid::RESPONSE_START, 0xEC);
//! ```

// ============================================================================
// Pipeline timing
// ============================================================================

/// Default interval between two card presence polls, in milliseconds.
///
/// Cancellation latency of the acquisition worker is bounded by this value.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Presence poll interval for SFR HID readers, in milliseconds.
///
/// The HID round trip is cheap, so SFR readers are polled faster.
pub const SFR_POLL_INTERVAL_MS: u64 = 200;

/// Bounded wait of the normalization worker on the hand-off queue, in
/// milliseconds.
///
/// When the queue stays empty this long the worker re-checks the stop flag.
pub const DEFAULT_QUEUE_WAIT_MS: u64 = 5000;

/// Number of consecutive recoverable errors after which the acquisition
/// worker gives up on the device.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Default serial read timeout, in milliseconds.
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 5000;

/// Short timeout used for presence polls, in milliseconds.
///
/// A poll that times out means "no card in the reader".
pub const PRESENCE_POLL_TIMEOUT_MS: u64 = 500;

/// Default race zero time as `(hour, minute, second)`.
pub const DEFAULT_ZERO_TIME: (u32, u32, u32) = (8, 0, 0);

/// Seconds in half a day.
pub const HALF_DAY_SECS: u32 = 12 * 3600;

/// Seconds in a day.
pub const DAY_SECS: u32 = 24 * 3600;

// ============================================================================
// Backup log
// ============================================================================

/// Markers of one block in the backup log.
///
/// ```text
/// start
/// <card_number>
/// <start hh:mm:ss or empty>
/// <finish hh:mm:ss or empty>
/// split_start
/// <code> <hh:mm:ss>
/// split_end
/// end
/// ```
pub mod backup {
    pub const BLOCK_START: &str = "start";
    pub const BLOCK_END: &str = "end";
    pub const SPLITS_START: &str = "split_start";
    pub const SPLITS_END: &str = "split_end";

    /// File name prefix; the full name is `si<YYYYMMDD>.log`.
    pub const FILE_PREFIX: &str = "si";
    pub const FILE_EXTENSION: &str = "log";

    /// `chrono` format of the time columns.
    pub const TIME_FORMAT: &str = "%H:%M:%S";
}

// ============================================================================
// SPORTident extended protocol
// ============================================================================

/// SPORTident BSM/BSF station, extended protocol.
///
/// ```text
/// 0xFF STX CMD LEN DATA... CRC_HI CRC_LO ETX
/// ^^^^ wake-up byte, outgoing frames only
/// ```
pub mod sportident {
    /// Wake-up byte prepended to every outgoing frame.
    pub const WAKEUP: u8 = 0xFF;
    pub const STX: u8 = 0x02;
    pub const ETX: u8 = 0x03;
    /// Single-byte acknowledgement; the station beeps on receipt.
    pub const ACK: u8 = 0x06;
    pub const NAK: u8 = 0x15;

    /// CRC-16 polynomial of the extended protocol.
    pub const CRC_POLYNOMIAL: u16 = 0x8005;

    /// Baud rates tried in order during connect.
    pub const BAUD_RATES: [u32; 2] = [38400, 4800];

    /// Set master/slave mode.
    pub const CMD_SET_MS: u8 = 0xF0;
    /// Argument of [`CMD_SET_MS`]: station talks directly to the host.
    pub const MS_DIRECT: u8 = 0x4D;

    /// Read SI card 5 memory.
    pub const CMD_READ_SI5: u8 = 0xB1;

    /// Station event: SI card 5 inserted.
    pub const EVT_SI5_DETECTED: u8 = 0xE5;
    /// Station event: SI card 6 inserted.
    pub const EVT_SI6_DETECTED: u8 = 0xE6;
    /// Station event: card removed.
    pub const EVT_CARD_REMOVED: u8 = 0xE7;
    /// Station event: SI card 8/9/10/11 or pCard inserted.
    pub const EVT_SI8_DETECTED: u8 = 0xE8;

    /// Size of the SI card 5 memory dump.
    pub const SI5_MEMORY_LEN: usize = 128;
    /// Station number bytes preceding the memory dump in a read response.
    pub const STATION_PREFIX_LEN: usize = 2;

    /// Marker for "no time recorded" in SI card 5 memory.
    pub const NO_TIME: u16 = 0xEEEE;

    /// Maximum number of timed punches on an SI card 5.
    pub const SI5_MAX_PUNCHES: usize = 30;

    // SI card 5 memory layout
    pub const SI5_CN_OFFSET: usize = 4;
    pub const SI5_SERIES_OFFSET: usize = 6;
    pub const SI5_START_OFFSET: usize = 19;
    pub const SI5_FINISH_OFFSET: usize = 21;
    pub const SI5_PUNCH_COUNT_OFFSET: usize = 23;
    pub const SI5_CHECK_OFFSET: usize = 25;
    pub const SI5_PUNCHES_OFFSET: usize = 32;
    pub const SI5_PUNCH_LEN: usize = 3;
}

// ============================================================================
// Sportiduino
// ============================================================================

/// Sportiduino master station.
///
/// ```text
/// 0xFE CODE LEN DATA(<= 28) CS
/// ```
///
/// `LEN >= 0x1E` marks a continuation fragment carrying exactly
/// [`MAX_DATA_LEN`](sportiduino::MAX_DATA_LEN) bytes; its index is
/// `LEN - 0x1E`.
pub mod sportiduino {
    pub const START_BYTE: u8 = 0xFE;
    /// Fragment marker threshold for the `LEN` byte.
    pub const FRAGMENT_OFFSET: u8 = 0x1E;
    /// Capacity of one frame's data field.
    pub const MAX_DATA_LEN: usize = 28;

    pub const BAUD_RATE: u32 = 9600;
    /// The master station resets when the port opens.
    pub const SETTLE_DELAY_MS: u64 = 2000;

    pub const START_STATION: u8 = 240;
    pub const FINISH_STATION: u8 = 245;

    pub const CMD_READ_VERSION: u8 = 0x46;
    pub const CMD_READ_CARD: u8 = 0x4B;
    pub const CMD_BEEP_ERROR: u8 = 0x58;
    pub const CMD_BEEP_OK: u8 = 0x59;

    pub const RESP_CARD_DATA: u8 = 0x63;
    pub const RESP_VERSION: u8 = 0x66;
    pub const RESP_ERROR: u8 = 0x78;
    pub const RESP_OK: u8 = 0x79;

    pub const ERR_COM: u8 = 0x01;
    pub const ERR_WRITE_CARD: u8 = 0x02;
    pub const ERR_READ_CARD: u8 = 0x03;
    pub const ERR_READ_EEPROM: u8 = 0x04;

    /// Card number (2 bytes) plus pages 6 and 7 (4 bytes each).
    pub const CARD_HEADER_LEN: usize = 10;
    /// Station byte plus big-endian unix seconds.
    pub const PUNCH_RECORD_LEN: usize = 5;
}

// ============================================================================
// SRPid
// ============================================================================

/// SRPid chip reader.
///
/// Requests are fixed-size; responses are length-prefixed:
///
/// ```text
/// request:  0xC1 CODE 00 00 00 00 00 00 0xCE CS
/// response: 0xEC CODE LEN DATA CS
/// ```
pub mod srpid {
    pub const REQUEST_START: u8 = 0xC1;
    pub const REQUEST_END: u8 = 0xCE;
    pub const RESPONSE_START: u8 = 0xEC;
    /// Zero padding between code and end marker of a request.
    pub const REQUEST_PADDING: usize = 6;
    /// Total request length including checksum.
    pub const REQUEST_LEN: usize = 10;

    pub const BAUD_RATE: u32 = 9600;
    pub const SETTLE_DELAY_MS: u64 = 3000;

    pub const START_STATION: u8 = 241;
    pub const FINISH_STATION: u8 = 242;

    pub const CMD_READ_CHIP: u8 = 0x2F;
    pub const CMD_READ_VERSION: u8 = 0x32;
    pub const CMD_BEEP_OK: u8 = 0x36;

    pub const RESP_CHIP_DATA: u8 = 0x70;
    pub const RESP_VERSION: u8 = 0x72;
    pub const RESP_OK: u8 = 0x75;
    pub const RESP_ERROR: u8 = 0x76;

    pub const ERR_COM: u8 = 0x01;
    pub const ERR_WRITE_CHIP: u8 = 0x02;
    pub const ERR_READ_CHIP: u8 = 0x03;

    pub const CHIP_NUMBER_OFFSET: usize = 4;
    pub const PUNCHES_OFFSET: usize = 14;
    pub const PUNCH_RECORD_LEN: usize = 5;
}

// ============================================================================
// SFR
// ============================================================================

/// SFR USB HID reader.
///
/// ```text
/// request:  0x3F 0x05 0xFD CODE ARG CS 0xFE   (zero padded to 64 bytes)
/// response: r[3] = echoed CODE, r[4] = record position, r[5..] = record
/// ```
pub mod sfr {
    pub const VENDOR_ID: u16 = 0x2047;
    pub const PRODUCT_ID: u16 = 0x0301;
    pub const REPORT_LEN: usize = 64;

    pub const HEADER: [u8; 3] = [0x3F, 0x05, 0xFD];
    pub const TRAILER: u8 = 0xFE;

    pub const CMD_REQUEST: u8 = 0x01;
    pub const CMD_BEEP: u8 = 0x03;
    /// Complete beep request, checksum included.
    pub const BEEP_REQUEST: [u8; 7] = [0x3F, 0x05, 0xFD, 0x03, 0x01, 0x04, 0xFE];

    pub const CODE_INDEX: usize = 3;
    pub const POSITION_INDEX: usize = 4;
    pub const RECORD_INDEX: usize = 5;

    /// Record positions.
    pub const POS_CARD_ID: u8 = 1;
    pub const POS_BIB: u8 = 3;
    pub const POS_COUNT: u8 = 4;
    pub const POS_FIRST_PUNCH: u8 = 5;

    /// The device ignores beeps spaced closer than this, in milliseconds.
    pub const MIN_BEEP_SPACING_MS: u64 = 300;
}
