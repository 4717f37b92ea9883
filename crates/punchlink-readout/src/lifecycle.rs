//! Worker lifecycle state machine.
//!
//! Every worker of a controller sits in a [`WorkerSlot`]. The slot's state
//! only ever changes through [`WorkerState::transition`]:
//!
//! ```text
//! NotStarted ──Spawned──► Running ──Exited──► Finished
//!                            │
//!                            └──Failed/Crashed──► Failed
//! Finished | Failed ──Spawned──► Running
//! ```
//!
//! # Examples
//!
//! ```
//! use punchlink_readout::lifecycle::{WorkerEvent, WorkerState};
//!
//! let state = WorkerState::NotStarted.transition(WorkerEvent::Spawned);
//! assert_eq!(state, WorkerState::Running);
//! assert_eq!(state.transition(WorkerEvent::Failed), WorkerState::Failed);
//! ```

use serde::Serialize;
use std::{
    fmt,
    sync::{Arc, Mutex},
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lifecycle of one worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    NotStarted,
    Running,
    /// Ended on its own terms: stopped, or its queue closed.
    Finished,
    /// Ended because of a device failure or a panic.
    Failed,
}

/// Something that happened to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A task was spawned for the worker.
    Spawned,
    /// The worker returned normally.
    Exited,
    /// The worker returned because its device failed.
    Failed,
    /// The task ended without reporting back.
    Crashed,
}

impl WorkerState {
    /// The one transition function of the lifecycle.
    ///
    /// Events that make no sense in the current state leave it unchanged.
    #[must_use]
    pub fn transition(self, event: WorkerEvent) -> WorkerState {
        match (self, event) {
            (_, WorkerEvent::Spawned) => WorkerState::Running,
            (WorkerState::Running, WorkerEvent::Exited) => WorkerState::Finished,
            (WorkerState::Running, WorkerEvent::Failed | WorkerEvent::Crashed) => {
                WorkerState::Failed
            }
            (state, _) => state,
        }
    }

    pub fn is_running(self) -> bool {
        self == WorkerState::Running
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::NotStarted => "not started",
            WorkerState::Running => "running",
            WorkerState::Finished => "finished",
            WorkerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared cell a worker uses to report its own end.
#[derive(Debug, Clone, Default)]
pub struct StateCell(Arc<Mutex<WorkerState>>);

impl StateCell {
    pub fn get(&self) -> WorkerState {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `event` and return the new state.
    pub fn apply(&self, event: WorkerEvent) -> WorkerState {
        let mut state = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = state.transition(event);
        *state
    }
}

/// A named worker: its task handle and its lifecycle state.
#[derive(Debug)]
pub struct WorkerSlot {
    name: &'static str,
    cell: StateCell,
    task: Option<JoinHandle<()>>,
}

impl WorkerSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: StateCell::default(),
            task: None,
        }
    }

    /// Mark the slot running and hand out the cell the new worker reports
    /// its end through. Call before spawning, then [`attach`](Self::attach)
    /// the task.
    pub fn launch(&mut self) -> StateCell {
        let cell = StateCell::default();
        let state = cell.apply(WorkerEvent::Spawned);
        debug!(worker = self.name, %state, "worker launched");
        self.cell = cell.clone();
        self.task = None;
        cell
    }

    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.task = Some(task);
    }

    /// Current state. A task that ended without reporting counts as failed.
    pub fn state(&self) -> WorkerState {
        let state = self.cell.get();
        let gone = self.task.as_ref().is_none_or(JoinHandle::is_finished);
        if state.is_running() && gone {
            let state = self.cell.apply(WorkerEvent::Crashed);
            warn!(worker = self.name, "worker task ended without reporting");
            return state;
        }
        state
    }

    /// Take the task handle to await it. The slot's state is kept.
    pub fn take_task(&mut self) -> Option<JoinHandle<()>> {
        self.task.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(WorkerState::NotStarted, WorkerEvent::Spawned, WorkerState::Running)]
    #[case(WorkerState::Finished, WorkerEvent::Spawned, WorkerState::Running)]
    #[case(WorkerState::Failed, WorkerEvent::Spawned, WorkerState::Running)]
    #[case(WorkerState::Running, WorkerEvent::Spawned, WorkerState::Running)]
    #[case(WorkerState::Running, WorkerEvent::Exited, WorkerState::Finished)]
    #[case(WorkerState::Running, WorkerEvent::Failed, WorkerState::Failed)]
    #[case(WorkerState::Running, WorkerEvent::Crashed, WorkerState::Failed)]
    #[case(WorkerState::NotStarted, WorkerEvent::Exited, WorkerState::NotStarted)]
    #[case(WorkerState::Finished, WorkerEvent::Crashed, WorkerState::Finished)]
    #[case(WorkerState::Failed, WorkerEvent::Exited, WorkerState::Failed)]
    fn test_transition(
        #[case] from: WorkerState,
        #[case] event: WorkerEvent,
        #[case] expected: WorkerState,
    ) {
        assert_eq!(from.transition(event), expected);
    }

    #[test]
    fn test_slot_without_task_is_not_running() {
        let slot = WorkerSlot::new("test");
        assert_eq!(slot.state(), WorkerState::NotStarted);
    }

    #[tokio::test]
    async fn test_slot_reports_clean_exit() {
        let mut slot = WorkerSlot::new("test");
        let cell = slot.launch();
        let task = tokio::spawn(async move {
            cell.apply(WorkerEvent::Exited);
        });
        slot.attach(task);

        for _ in 0..100 {
            if !slot.state().is_running() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(slot.state(), WorkerState::Finished);
    }

    #[tokio::test]
    async fn test_panicked_task_counts_as_failed() {
        let mut slot = WorkerSlot::new("test");
        let _cell = slot.launch();
        let task = tokio::spawn(async { panic!("worker blew up") });
        slot.attach(task);

        for _ in 0..100 {
            if !slot.state().is_running() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(slot.state(), WorkerState::Failed);
    }
}
