//! Byte transports and the shared request/response link.
//!
//! [`Transport`] is the blocking byte pipe an adapter talks through.
//! [`SerialTransport`] implements it over `serialport`; tests use
//! [`MockTransport`](crate::mock::MockTransport).
//!
//! [`FramedLink`] pairs a transport with one of the protocol codecs and
//! turns "write these bytes, wait for a frame" into a single call with a
//! deadline. All three serial adapters share it.

use bytes::BytesMut;
use punchlink_protocol::{
    ProtocolError, Response, SportidentCodec, SportiduinoCodec, SrpidCodec, frame::hex,
};
use std::time::{Duration, Instant};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::{HardwareError, Result};

/// Size of the scratch buffer for one transport read.
const READ_CHUNK: usize = 256;

/// Blocking byte pipe to a reader.
///
/// `open` may be called again after `close` to reconnect, possibly at a
/// different baud rate.
pub trait Transport: Send {
    /// Port name, for logs and errors.
    fn name(&self) -> &str;

    /// Open at `baud`. Opening an already open transport reopens it.
    fn open(&mut self, baud: u32) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Write all of `bytes`.
    ///
    /// # Errors
    /// `HardwareError::TransportFailure` if the port is closed or the write fails.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read what is available, waiting at most `timeout` for the first byte.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Drop any bytes already received.
    fn clear_input(&mut self) -> Result<()>;
}

/// Decoders that can be rewound between exchanges.
pub trait FrameCodec: Decoder<Item = Response, Error = ProtocolError> + Send {
    fn reset(&mut self);
}

impl FrameCodec for SportiduinoCodec {
    fn reset(&mut self) {
        SportiduinoCodec::reset(self);
    }
}

impl FrameCodec for SrpidCodec {
    fn reset(&mut self) {
        SrpidCodec::reset(self);
    }
}

impl FrameCodec for SportidentCodec {
    fn reset(&mut self) {
        SportidentCodec::reset(self);
    }
}

/// A transport plus the codec that frames its traffic.
#[derive(Debug)]
pub struct FramedLink<T, C> {
    transport: T,
    codec: C,
    buffer: BytesMut,
    debug: bool,
}

impl<T: Transport, C: FrameCodec> FramedLink<T, C> {
    pub fn new(transport: T, codec: C, debug: bool) -> Self {
        Self {
            transport,
            codec,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            debug,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn name(&self) -> &str {
        self.transport.name()
    }

    /// Forget partial frames and pending input.
    pub fn discard_input(&mut self) -> Result<()> {
        self.codec.reset();
        self.buffer.clear();
        self.transport.clear_input()
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.debug {
            trace!(port = self.transport.name(), tx = %hex(bytes), "write");
        }
        self.transport.write_all(bytes)
    }

    /// Wait for the next complete, verified frame.
    ///
    /// # Errors
    /// - `HardwareError::Timeout` if no frame completes before `timeout`
    /// - `HardwareError::ChecksumMismatch` / `ProtocolViolation` from the codec
    /// - `HardwareError::TransportFailure` if the port fails
    pub fn receive(&mut self, timeout: Duration) -> Result<Response> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(response)) => {
                    if self.debug {
                        trace!(port = self.transport.name(), rx = %response, "frame");
                    }
                    return Ok(response);
                }
                Ok(None) => {}
                Err(err) => {
                    self.codec.reset();
                    return Err(err.into());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(HardwareError::timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }

            let n = self.transport.read(&mut chunk, deadline - now)?;
            if n > 0 {
                if self.debug {
                    trace!(port = self.transport.name(), rx = %hex(&chunk[..n]), "read");
                }
                self.buffer.extend_from_slice(&chunk[..n]);
            }
        }
    }

    /// Clear input, send `request` and wait for one frame.
    pub fn exchange(&mut self, request: &[u8], timeout: Duration) -> Result<Response> {
        self.discard_input()?;
        self.send(request)?;
        self.receive(timeout)
    }
}

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use super::*;
    use serialport::SerialPort;
    use std::io::{ErrorKind, Read, Write};

    /// Transport over a local serial port.
    pub struct SerialTransport {
        path: String,
        port: Option<Box<dyn SerialPort>>,
    }

    impl std::fmt::Debug for SerialTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SerialTransport")
                .field("path", &self.path)
                .field("open", &self.port.is_some())
                .finish()
        }
    }

    impl SerialTransport {
        /// A closed transport for `path`.
        pub fn new(path: impl Into<String>) -> Self {
            Self {
                path: path.into(),
                port: None,
            }
        }

        fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
            let path = &self.path;
            self.port
                .as_mut()
                .ok_or_else(|| HardwareError::transport(path.clone(), "port is closed"))
        }

        fn failure(&self, err: impl ToString) -> HardwareError {
            HardwareError::transport(self.path.clone(), err.to_string())
        }
    }

    impl Transport for SerialTransport {
        fn name(&self) -> &str {
            &self.path
        }

        fn open(&mut self, baud: u32) -> Result<()> {
            self.port = None;
            let port = serialport::new(&self.path, baud)
                .timeout(Duration::from_millis(50))
                .open()
                .map_err(|e| self.failure(e))?;
            self.port = Some(port);
            Ok(())
        }

        fn close(&mut self) {
            self.port = None;
        }

        fn is_open(&self) -> bool {
            self.port.is_some()
        }

        fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
            let port = self.port()?;
            let result = port.write_all(bytes).and_then(|()| port.flush());
            result.map_err(|e| {
                self.port = None;
                self.failure(e)
            })
        }

        fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
            let port = self.port()?;
            let result = port
                .set_timeout(timeout.max(Duration::from_millis(1)))
                .map_err(std::io::Error::from)
                .and_then(|()| port.read(buf));
            match result {
                Ok(n) => Ok(n),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
                Err(e) => {
                    self.port = None;
                    Err(self.failure(e))
                }
            }
        }

        fn clear_input(&mut self) -> Result<()> {
            let port = self.port()?;
            let result = port.clear(serialport::ClearBuffer::Input);
            result.map_err(|e| self.failure(e))
        }
    }
}
