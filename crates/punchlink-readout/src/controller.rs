//! Readout controllers, one per device family.
//!
//! A [`ReadoutController`] owns the pieces of one readout session: the
//! hand-off queue, the stop flag and the two workers.
//! [`ControllerRegistry`] keeps at most one controller per
//! [`DeviceFamily`].
//!
//! ```text
//! PortSelector ─► AcquisitionWorker(reader) ─► queue ─► NormalizationWorker ─► callback
//!                  (blocking thread)                     (async task)        └► backup
//! ```
//!
//! Stopping is cooperative: [`ReadoutController::stop`] only raises the stop
//! flag, and the workers notice it within
//! `max(poll_interval, queue_wait)`. After the acquisition worker ends on a
//! device failure the controller reports itself dead and stays that way
//! until [`ReadoutController::start`] is called again.
//!
//! # Examples
//!
//! ```no_run
//! use punchlink_core::DeviceFamily;
//! use punchlink_hardware::ReaderConfig;
//! use punchlink_readout::{PipelineConfig, ReadoutController};
//!
//! #[tokio::main]
//! async fn main() -> punchlink_readout::Result<()> {
//!     let family = DeviceFamily::Sportiduino;
//!     let mut controller = ReadoutController::new(
//!         ReaderConfig::for_family(family),
//!         PipelineConfig::for_family(family),
//!     )
//!     .with_callback(|result| println!("{} read", result.card_number));
//!
//!     controller.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     controller.stop();
//!     controller.wait().await;
//!     Ok(())
//! }
//! ```

use chrono::Local;
use punchlink_core::{DeviceFamily, DomainResult, FixedRaceClock, RaceClock};
use punchlink_hardware::{AnyPunchReader, PortSelector, ReaderConfig};
use serde::Serialize;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    PipelineConfig, ReadoutError, Result,
    acquisition::AcquisitionWorker,
    backup::BackupWriter,
    lifecycle::{WorkerEvent, WorkerSlot, WorkerState},
    normalization::{NormalizationWorker, ResultCallback},
};

type ReaderFactory = Box<
    dyn Fn(&ReaderConfig, Option<&str>) -> punchlink_hardware::Result<AnyPunchReader>
        + Send
        + Sync,
>;

/// Snapshot of a controller for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub family: DeviceFamily,
    pub alive: bool,
    pub acquisition: WorkerState,
    pub normalization: WorkerState,
    /// Port of the current or last session.
    pub port: Option<String>,
}

/// Lifecycle owner of one family's readout session.
pub struct ReadoutController {
    reader_config: ReaderConfig,
    pipeline: PipelineConfig,
    clock: Arc<dyn RaceClock>,
    callback: Option<ResultCallback>,
    selector: PortSelector,
    factory: ReaderFactory,
    runtime: Option<Handle>,
    stop: Arc<AtomicBool>,
    acquisition: WorkerSlot,
    normalization: WorkerSlot,
    port: Option<String>,
}

impl fmt::Debug for ReadoutController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadoutController")
            .field("family", &self.family())
            .field("reader_config", &self.reader_config)
            .field("pipeline", &self.pipeline)
            .field("acquisition", &self.acquisition)
            .field("normalization", &self.normalization)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

impl ReadoutController {
    /// Controller for `reader_config.family`.
    ///
    /// Workers run on the tokio runtime current at construction, if any,
    /// else on the one current when [`start`](Self::start) is called. The
    /// race clock defaults to today with the pipeline's zero time.
    pub fn new(reader_config: ReaderConfig, pipeline: PipelineConfig) -> Self {
        let clock = FixedRaceClock::new(Local::now().date_naive(), pipeline.zero_time);
        Self {
            reader_config,
            pipeline,
            clock: Arc::new(clock),
            callback: None,
            selector: PortSelector::new(),
            factory: Box::new(|config, port| AnyPunchReader::for_config(config.clone(), port)),
            runtime: Handle::try_current().ok(),
            stop: Arc::new(AtomicBool::new(true)),
            acquisition: WorkerSlot::new("acquisition"),
            normalization: WorkerSlot::new("normalization"),
            port: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn RaceClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_callback(mut self, callback: impl Fn(DomainResult) + Send + Sync + 'static) -> Self {
        self.set_callback(callback);
        self
    }

    pub fn with_port_selector(mut self, selector: PortSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Replace the way readers are built from the config and resolved port.
    pub fn with_reader_factory(
        mut self,
        factory: impl Fn(&ReaderConfig, Option<&str>) -> punchlink_hardware::Result<AnyPunchReader>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Register the result callback. Takes effect on the next start.
    pub fn set_callback(&mut self, callback: impl Fn(DomainResult) + Send + Sync + 'static) {
        self.callback = Some(Arc::new(callback));
    }

    pub fn family(&self) -> DeviceFamily {
        self.reader_config.family
    }

    pub fn reader_config(&self) -> &ReaderConfig {
        &self.reader_config
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    /// Start both workers unless they are already running.
    ///
    /// A start while a stop is still pending, or after a worker ended,
    /// spawns a fresh pair with a new queue and stop flag. Each new worker
    /// first waits for its predecessor to end, so the port is released
    /// before it is opened again and earlier results are delivered first.
    ///
    /// # Errors
    /// - `ReadoutError::NoRuntime` without a tokio runtime
    /// - `ReadoutError::PortUnavailable` if no serial port can be resolved
    /// - `ReadoutError::Hardware` for an invalid reader config
    pub fn start(&mut self) -> Result<()> {
        let family = self.family();
        if self.is_alive() && !self.stop.load(Ordering::Acquire) {
            debug!(%family, "readout already running");
            return Ok(());
        }

        self.reader_config.validate()?;
        let runtime = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok())
            .ok_or(ReadoutError::NoRuntime { family })?;
        let port = self.resolve_port()?;
        let reader = (self.factory)(&self.reader_config, port.as_deref())?;

        self.stop.store(true, Ordering::Release);
        let previous_acquisition = self.acquisition.take_task();
        let previous_normalization = self.normalization.take_task();

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);
        self.port = port;
        let (tx, rx) = mpsc::unbounded_channel();

        let cell = self.acquisition.launch();
        let acquisition = AcquisitionWorker::new(reader, tx, Arc::clone(&stop), self.pipeline.clone());
        self.acquisition.attach(runtime.spawn(async move {
            await_previous(previous_acquisition, "acquisition").await;
            // A panic leaves the cell running; the slot then reports the crash.
            if let Ok(exit) = tokio::task::spawn_blocking(move || acquisition.run()).await {
                let event = if exit.is_failure() {
                    WorkerEvent::Failed
                } else {
                    WorkerEvent::Exited
                };
                cell.apply(event);
            }
        }));

        let mut normalization = NormalizationWorker::new(
            rx,
            stop,
            Arc::clone(&self.clock),
            self.pipeline.queue_wait,
        );
        if let Some(callback) = &self.callback {
            normalization = normalization.with_callback(Arc::clone(callback));
        }
        if let Some(dir) = &self.pipeline.backup_dir {
            normalization = normalization.with_backup(BackupWriter::new(dir));
        }
        let cell = self.normalization.launch();
        self.normalization.attach(runtime.spawn(async move {
            await_previous(previous_normalization, "normalization").await;
            normalization.run().await;
            cell.apply(WorkerEvent::Exited);
        }));

        info!(%family, port = self.port.as_deref().unwrap_or("hid"), "readout started");
        Ok(())
    }

    /// Ask both workers to end. Returns at once.
    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            info!(family = %self.family(), "readout stopping");
        }
    }

    /// Stop when alive, start otherwise. Returns `true` if a start was
    /// requested.
    ///
    /// # Errors
    /// Same as [`start`](Self::start).
    pub fn toggle(&mut self) -> Result<bool> {
        if self.is_alive() {
            self.stop();
            Ok(false)
        } else {
            self.start()?;
            Ok(true)
        }
    }

    /// `true` only while both workers are running.
    pub fn is_alive(&self) -> bool {
        self.acquisition.state().is_running() && self.normalization.state().is_running()
    }

    pub fn status(&self) -> ControllerStatus {
        let acquisition = self.acquisition.state();
        let normalization = self.normalization.state();
        ControllerStatus {
            family: self.family(),
            alive: acquisition.is_running() && normalization.is_running(),
            acquisition,
            normalization,
            port: self.port.clone(),
        }
    }

    /// Wait until both workers have ended.
    pub async fn wait(&mut self) {
        for task in [self.acquisition.take_task(), self.normalization.take_task()]
            .into_iter()
            .flatten()
        {
            if let Err(err) = task.await {
                warn!(family = %self.family(), error = %err, "worker task aborted");
            }
        }
    }

    fn resolve_port(&self) -> Result<Option<String>> {
        let family = self.family();
        if family.is_hid() {
            return Ok(None);
        }
        self.selector
            .select(&self.reader_config.port)
            .map(Some)
            .map_err(|source| ReadoutError::PortUnavailable { family, source })
    }
}

async fn await_previous(task: Option<JoinHandle<()>>, worker: &'static str) {
    if let Some(task) = task {
        debug!(worker, "waiting for previous worker to end");
        if let Err(err) = task.await {
            warn!(worker, error = %err, "previous worker task aborted");
        }
    }
}

impl Drop for ReadoutController {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// At most one [`ReadoutController`] per device family.
#[derive(Debug, Default)]
pub struct ControllerRegistry {
    controllers: HashMap<DeviceFamily, ReadoutController>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `controller` for its family. A controller already
    /// registered for that family is stopped and returned.
    pub fn insert(&mut self, controller: ReadoutController) -> Option<ReadoutController> {
        let previous = self.controllers.insert(controller.family(), controller);
        if let Some(old) = &previous {
            old.stop();
        }
        previous
    }

    pub fn remove(&mut self, family: DeviceFamily) -> Option<ReadoutController> {
        let removed = self.controllers.remove(&family);
        if let Some(controller) = &removed {
            controller.stop();
        }
        removed
    }

    pub fn get(&self, family: DeviceFamily) -> Option<&ReadoutController> {
        self.controllers.get(&family)
    }

    pub fn get_mut(&mut self, family: DeviceFamily) -> Option<&mut ReadoutController> {
        self.controllers.get_mut(&family)
    }

    fn controller(&mut self, family: DeviceFamily) -> Result<&mut ReadoutController> {
        self.controllers
            .get_mut(&family)
            .ok_or(ReadoutError::UnknownFamily(family))
    }

    pub fn start(&mut self, family: DeviceFamily) -> Result<()> {
        self.controller(family)?.start()
    }

    pub fn stop(&mut self, family: DeviceFamily) -> Result<()> {
        self.controller(family)?.stop();
        Ok(())
    }

    pub fn toggle(&mut self, family: DeviceFamily) -> Result<bool> {
        self.controller(family)?.toggle()
    }

    pub fn is_alive(&self, family: DeviceFamily) -> bool {
        self.get(family).is_some_and(ReadoutController::is_alive)
    }

    pub fn stop_all(&self) {
        for controller in self.controllers.values() {
            controller.stop();
        }
    }

    /// Registered families, in a stable order.
    pub fn families(&self) -> Vec<DeviceFamily> {
        let mut families: Vec<_> = self.controllers.keys().copied().collect();
        families.sort();
        families
    }

    pub fn status(&self) -> Vec<ControllerStatus> {
        self.families()
            .into_iter()
            .filter_map(|family| self.get(family).map(ReadoutController::status))
            .collect()
    }
}
