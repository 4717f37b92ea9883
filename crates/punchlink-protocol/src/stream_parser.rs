//! Stream parser for length-prefixed serial frames.
//!
//! Serial ports deliver bytes with no message boundaries: one read may hold
//! half a frame, several frames, or line noise left over from the station's
//! power-up. The parser accumulates bytes and cuts complete [`RawFrame`]s
//! using a small state machine driven by a [`FrameLayout`].
//!
//! # Framing
//!
//! ```text
//! START  CODE  LEN  DATA[data_len(LEN)]  TRAILER[trailer_len]
//! ```
//!
//! Checksums are not verified here. The protocol codecs do that, because
//! each protocol computes them differently.
//!
//! # Usage
//!
//! ```
//! use punchlink_protocol::{FrameLayout, StreamParser};
//!
//! let mut parser = StreamParser::new(FrameLayout::SPORTIDUINO);
//!
//! // Noise, then a version response split across two reads
//! parser.feed(&[0x00, 0x13, 0xFE, 0x66]);
//! assert!(parser.next_frame().is_none());
//! parser.feed(&[0x01, 0x6A, 0xD1]);
//!
//! let frame = parser.next_frame().unwrap();
//! assert_eq!(frame.code, 0x66);
//! assert_eq!(&frame.data[..], &[0x6A]);
//! ```

use bytes::BytesMut;
use std::collections::VecDeque;

use crate::frame::{FrameLayout, RawFrame};

/// Maximum buffer size before the parser gives up and resynchronizes.
///
/// The largest legal frame is 3 + 255 + 3 bytes, so a buffer this large
/// can only come from a runaway stream.
const MAX_BUFFER_SIZE: usize = 4 * 1024;

/// Initial buffer capacity; one SPORTident card 5 response fits.
const INITIAL_BUFFER_CAPACITY: usize = 256;

const INITIAL_FRAME_QUEUE_CAPACITY: usize = 4;

/// State machine states for cutting frames out of the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Scanning for the layout's start byte. Everything else is discarded.
    WaitingStart,

    /// Start byte seen, waiting for `CODE` and `LEN`.
    ReadingHeader,

    /// Header complete, waiting for data and trailer.
    ReadingBody { code: u8, len: u8 },
}

/// Stateful parser for one serial protocol.
///
/// ```text
/// ┌─────────────┐ START  ┌──────────────┐ CODE LEN ┌─────────────┐ data+trailer ┌─────────────┐
/// │WaitingStart │───────>│ReadingHeader │─────────>│ReadingBody  │─────────────>│Frame queued │
/// └─────────────┘        └──────────────┘          └─────────────┘              └─────────────┘
///    ^   │ other bytes                                                                 │
///    │   └ (discarded)                                                                 │
///    └─────────────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug)]
pub struct StreamParser {
    layout: FrameLayout,
    buffer: BytesMut,
    state: ParserState,
    frames: VecDeque<RawFrame>,
    discarded: usize,
}

impl StreamParser {
    /// Create a parser for the given frame layout.
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            state: ParserState::WaitingStart,
            frames: VecDeque::with_capacity(INITIAL_FRAME_QUEUE_CAPACITY),
            discarded: 0,
        }
    }

    /// Append bytes read from the port and cut every complete frame.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        while self.try_extract_frame() {}
    }

    /// Next complete frame, in arrival order.
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        self.frames.pop_front()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn frames_available(&self) -> usize {
        self.frames.len()
    }

    /// Bytes thrown away while looking for a start byte since creation.
    pub fn discarded_bytes(&self) -> usize {
        self.discarded
    }

    /// Returns `true` while a frame has been started but not completed.
    pub fn is_mid_frame(&self) -> bool {
        self.state != ParserState::WaitingStart
    }

    /// Drop buffered bytes and queued frames and wait for a new start byte.
    ///
    /// Adapters call this before sending a request so that a late answer to
    /// a previous request can never be taken for the new one.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.frames.clear();
        self.state = ParserState::WaitingStart;
    }

    /// Iterator over the currently queued frames.
    pub fn drain_frames(&mut self) -> DrainFrames<'_> {
        DrainFrames { parser: self }
    }

    fn try_extract_frame(&mut self) -> bool {
        if self.buffer.len() > MAX_BUFFER_SIZE {
            self.discarded += self.buffer.len();
            self.buffer.clear();
            self.state = ParserState::WaitingStart;
            return false;
        }

        loop {
            match self.state {
                ParserState::WaitingStart => {
                    if !self.handle_waiting_start() {
                        return false;
                    }
                }
                ParserState::ReadingHeader => {
                    if !self.handle_reading_header() {
                        return false;
                    }
                }
                ParserState::ReadingBody { code, len } => {
                    return self.handle_reading_body(code, len);
                }
            }
        }
    }

    fn handle_waiting_start(&mut self) -> bool {
        match self.buffer.iter().position(|&b| b == self.layout.start) {
            Some(pos) => {
                self.discarded += pos;
                let _ = self.buffer.split_to(pos + 1);
                self.state = ParserState::ReadingHeader;
                true
            }
            None => {
                self.discarded += self.buffer.len();
                self.buffer.clear();
                false
            }
        }
    }

    fn handle_reading_header(&mut self) -> bool {
        if self.buffer.len() < 2 {
            return false;
        }
        let header = self.buffer.split_to(2);
        self.state = ParserState::ReadingBody {
            code: header[0],
            len: header[1],
        };
        true
    }

    fn handle_reading_body(&mut self, code: u8, len: u8) -> bool {
        let data_len = self.layout.data_len(len);
        let needed = data_len + self.layout.trailer_len;
        if self.buffer.len() < needed {
            return false;
        }

        let data = self.buffer.split_to(data_len).freeze();
        let trailer = self.buffer.split_to(self.layout.trailer_len).freeze();
        self.frames.push_back(RawFrame {
            code,
            len,
            data,
            trailer,
            fragment: self.layout.fragment_index(len),
        });
        self.state = ParserState::WaitingStart;
        true
    }
}

/// Iterator draining the frames queued in a [`StreamParser`].
pub struct DrainFrames<'a> {
    parser: &'a mut StreamParser,
}

impl Iterator for DrainFrames<'_> {
    type Item = RawFrame;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_frame()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.parser.frames_available();
        (len, Some(len))
    }
}
