//! Scripted serial transport.
//!
//! Replies are queued ahead of time and released into the input stream by
//! the next write, so request/response exchanges behave like a station that
//! answers each command. Unsolicited bytes (station events) can be pushed
//! at any time.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use crate::{HardwareError, Result, transport::Transport};

/// Longest a read waits when nothing is buffered.
const IDLE_READ: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct State {
    open_baud: Option<u32>,
    open_count: usize,
    input: VecDeque<u8>,
    replies: VecDeque<Option<Vec<u8>>>,
    written: Vec<Vec<u8>>,
    fail_open: bool,
    fail_writes: bool,
    fail_reads: bool,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`Transport`] for tests.
///
/// # Examples
///
/// ```
/// use punchlink_hardware::mock::MockTransport;
/// use punchlink_hardware::transport::Transport;
/// use std::time::Duration;
///
/// let (mut port, handle) = MockTransport::new("/dev/ttyUSB0");
/// port.open(9600).unwrap();
/// handle.queue_reply(vec![0xFE, 0x66, 0x00, 0x66]);
///
/// port.write_all(&[0xFE, 0x46, 0x00, 0x46]).unwrap();
/// let mut buf = [0u8; 8];
/// let n = port.read(&mut buf, Duration::from_millis(10)).unwrap();
/// assert_eq!(&buf[..n], &[0xFE, 0x66, 0x00, 0x66]);
/// ```
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    /// Returns the transport and a handle scripting it.
    pub fn new(name: impl Into<String>) -> (Self, MockTransportHandle) {
        let state = Arc::new(Mutex::new(State::default()));
        let transport = Self {
            name: name.into(),
            state: Arc::clone(&state),
        };
        (transport, MockTransportHandle { state })
    }

    fn failure(&self, message: &str) -> HardwareError {
        HardwareError::transport(self.name.clone(), message)
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, baud: u32) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_open {
            return Err(self.failure("cannot open port"));
        }
        state.open_baud = Some(baud);
        state.open_count += 1;
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.state).open_baud = None;
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open_baud.is_some()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if state.open_baud.is_none() {
            return Err(self.failure("port is closed"));
        }
        if state.fail_writes {
            state.open_baud = None;
            return Err(self.failure("write failed"));
        }
        state.written.push(bytes.to_vec());
        if let Some(Some(reply)) = state.replies.pop_front() {
            state.input.extend(reply);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        {
            let mut state = lock(&self.state);
            if state.open_baud.is_none() {
                return Err(self.failure("port is closed"));
            }
            if state.fail_reads {
                state.open_baud = None;
                return Err(self.failure("read failed"));
            }
            if !state.input.is_empty() {
                let n = buf.len().min(state.input.len());
                for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
        }
        thread::sleep(timeout.min(IDLE_READ));
        Ok(0)
    }

    fn clear_input(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.open_baud.is_none() {
            return Err(self.failure("port is closed"));
        }
        state.input.clear();
        Ok(())
    }
}

/// Scripting side of a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    state: Arc<Mutex<State>>,
}

impl MockTransportHandle {
    /// Bytes released into the input by the next write.
    pub fn queue_reply(&self, bytes: impl AsRef<[u8]>) {
        lock(&self.state)
            .replies
            .push_back(Some(bytes.as_ref().to_vec()));
    }

    /// The next write gets no answer.
    pub fn queue_silence(&self) {
        lock(&self.state).replies.push_back(None);
    }

    /// Bytes readable right away.
    pub fn push_input(&self, bytes: impl AsRef<[u8]>) {
        lock(&self.state).input.extend(bytes.as_ref());
    }

    pub fn fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        lock(&self.state).fail_reads = fail;
    }

    /// Every write so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state).written.clone()
    }

    /// Baud rate of the open port.
    pub fn baud(&self) -> Option<u32> {
        lock(&self.state).open_baud
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state).open_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_released_by_write() {
        let (mut port, handle) = MockTransport::new("mock");
        port.open(4800).unwrap();
        handle.queue_silence();
        handle.queue_reply([1, 2]);

        let mut buf = [0u8; 4];
        port.write_all(&[0]).unwrap();
        assert_eq!(port.read(&mut buf, Duration::ZERO).unwrap(), 0);
        port.write_all(&[0]).unwrap();
        assert_eq!(port.read(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 2]);
    }

    #[test]
    fn test_closed_port_rejects_io() {
        let (mut port, _handle) = MockTransport::new("mock");
        assert!(port.write_all(&[0]).is_err());
        assert!(port.read(&mut [0u8; 1], Duration::ZERO).is_err());
    }

    #[test]
    fn test_failed_read_closes_port() {
        let (mut port, handle) = MockTransport::new("mock");
        port.open(9600).unwrap();
        handle.fail_reads(true);
        assert!(port.read(&mut [0u8; 1], Duration::ZERO).unwrap_err().is_fatal());
        assert!(!port.is_open());
    }
}
