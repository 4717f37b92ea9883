//! Scripted punch reader.
//!
//! [`MockPunchReader`] plays back a queue of scripted card events so the
//! acquisition and controller layers can be tested without any protocol.

use punchlink_core::{DeviceFamily, RawCardRecord};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{HardwareError, PunchReader, Result};

/// What the reader does next.
#[derive(Debug)]
enum Step {
    /// A card is presented and reads cleanly.
    Card(RawCardRecord),
    /// A card is presented and pulled away before the read completes.
    RemovedMidRead(RawCardRecord),
    /// The next poll fails with this error.
    Fail(HardwareError),
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    steps: VecDeque<Step>,
    fail_connect: bool,
    connects: usize,
    disconnects: usize,
    acknowledged: usize,
    polls: usize,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// [`PunchReader`] driven by a [`MockReaderHandle`].
///
/// # Examples
///
/// ```
/// use punchlink_core::{CardNumber, CardType, DeviceFamily, RawCardRecord};
/// use punchlink_hardware::{PunchReader, mock::MockPunchReader};
///
/// let (mut reader, handle) = MockPunchReader::new(DeviceFamily::Sportiduino);
/// reader.connect().unwrap();
///
/// let card = RawCardRecord::new(CardNumber::new(42).unwrap(), CardType::Sportiduino);
/// handle.present(card.clone());
///
/// assert!(reader.poll_presence().unwrap());
/// assert_eq!(reader.read_record().unwrap(), card);
/// assert!(!reader.poll_presence().unwrap());
/// ```
///
/// Clones share the script and the counters of the original.
#[derive(Debug, Clone)]
pub struct MockPunchReader {
    family: DeviceFamily,
    state: Arc<Mutex<State>>,
}

impl MockPunchReader {
    pub fn new(family: DeviceFamily) -> (Self, MockReaderHandle) {
        let state = Arc::new(Mutex::new(State::default()));
        let reader = Self {
            family,
            state: Arc::clone(&state),
        };
        (reader, MockReaderHandle { state })
    }

    fn not_connected(&self) -> HardwareError {
        HardwareError::transport(format!("mock-{}", self.family), "not connected")
    }
}

impl PunchReader for MockPunchReader {
    fn family(&self) -> DeviceFamily {
        self.family
    }

    fn connect(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_connect {
            return Err(HardwareError::transport(
                format!("mock-{}", self.family),
                "no such device",
            ));
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    fn poll_presence(&mut self) -> Result<bool> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(self.not_connected());
        }
        state.polls += 1;
        if !matches!(state.steps.front(), Some(Step::Fail(_))) {
            return Ok(!state.steps.is_empty());
        }
        match state.steps.pop_front() {
            Some(Step::Fail(err)) => {
                if err.is_fatal() {
                    state.connected = false;
                }
                Err(err)
            }
            _ => Ok(false),
        }
    }

    fn read_record(&mut self) -> Result<RawCardRecord> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(self.not_connected());
        }
        match state.steps.pop_front() {
            Some(Step::Card(record)) => Ok(record),
            Some(Step::RemovedMidRead(_)) => Err(HardwareError::CardChangedDuringRead),
            Some(Step::Fail(err)) => Err(err),
            None => Err(HardwareError::CardNotFound),
        }
    }

    fn acknowledge(&mut self) -> Result<()> {
        lock(&self.state).acknowledged += 1;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        state.connected = false;
        state.disconnects += 1;
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}

/// Scripting side of a [`MockPunchReader`].
#[derive(Debug, Clone)]
pub struct MockReaderHandle {
    state: Arc<Mutex<State>>,
}

impl MockReaderHandle {
    /// Present a card that reads cleanly.
    pub fn present(&self, record: RawCardRecord) {
        lock(&self.state).steps.push_back(Step::Card(record));
    }

    /// Present a card that is removed before the read completes.
    pub fn present_and_remove(&self, record: RawCardRecord) {
        lock(&self.state).steps.push_back(Step::RemovedMidRead(record));
    }

    /// Make the next poll fail with `err`.
    pub fn fail_next_poll(&self, err: HardwareError) {
        lock(&self.state).steps.push_back(Step::Fail(err));
    }

    /// Unplug the device: the next poll fails with a transport failure.
    pub fn unplug(&self) {
        self.fail_next_poll(HardwareError::transport("mock", "device unplugged"));
    }

    pub fn fail_connect(&self, fail: bool) {
        lock(&self.state).fail_connect = fail;
    }

    /// Scripted steps not yet consumed.
    pub fn pending(&self) -> usize {
        lock(&self.state).steps.len()
    }

    pub fn acknowledged(&self) -> usize {
        lock(&self.state).acknowledged
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn disconnects(&self) -> usize {
        lock(&self.state).disconnects
    }

    pub fn polls(&self) -> usize {
        lock(&self.state).polls
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }
}
