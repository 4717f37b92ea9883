//! Scripted HID link.
//!
//! A responder closure maps each written report to the input reports the
//! device sends back, which lets a test model a whole card in one place.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use crate::{HardwareError, Result, hid::HidLink};

const IDLE_READ: Duration = Duration::from_millis(5);

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct State {
    open: bool,
    reports: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    responder: Option<Responder>,
    fail_open: bool,
    fail_writes: bool,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`HidLink`] for tests.
pub struct MockHidLink {
    name: String,
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MockHidLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHidLink").field("name", &self.name).finish()
    }
}

impl MockHidLink {
    pub fn new() -> (Self, MockHidHandle) {
        let state = Arc::new(Mutex::new(State::default()));
        let link = Self {
            name: "mock-hid".to_string(),
            state: Arc::clone(&state),
        };
        (link, MockHidHandle { state })
    }

    fn failure(&self, message: &str) -> HardwareError {
        HardwareError::transport(self.name.clone(), message)
    }
}

impl HidLink for MockHidLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_open {
            return Err(self.failure("device not found"));
        }
        state.open = true;
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.state).open = false;
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn write_report(&mut self, report: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(self.failure("device is closed"));
        }
        if state.fail_writes {
            return Err(self.failure("write failed"));
        }
        state.written.push(report.to_vec());
        let replies = state
            .responder
            .as_ref()
            .map(|respond| respond(report))
            .unwrap_or_default();
        state.reports.extend(replies);
        Ok(())
    }

    fn read_report(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        {
            let mut state = lock(&self.state);
            if !state.open {
                return Err(self.failure("device is closed"));
            }
            if let Some(report) = state.reports.pop_front() {
                return Ok(Some(report));
            }
        }
        thread::sleep(timeout.min(IDLE_READ));
        Ok(None)
    }
}

/// Scripting side of a [`MockHidLink`].
#[derive(Clone)]
pub struct MockHidHandle {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for MockHidHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHidHandle").finish_non_exhaustive()
    }
}

impl MockHidHandle {
    /// Answer every written report with the reports `respond` returns.
    pub fn respond_with(&self, respond: impl Fn(&[u8]) -> Vec<Vec<u8>> + Send + 'static) {
        lock(&self.state).responder = Some(Box::new(respond));
    }

    /// An input report that arrives unsolicited.
    pub fn push_report(&self, report: Vec<u8>) {
        lock(&self.state).reports.push_back(report);
    }

    pub fn fail_open(&self, fail: bool) {
        lock(&self.state).fail_open = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state).written.clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }
}
