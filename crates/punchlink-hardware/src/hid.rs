//! HID report links.
//!
//! A HID reader answers asynchronously: input reports arrive whenever the
//! device produces them. [`HidApiLink`] runs a pump thread that reads input
//! reports and hands them over a single channel, so the adapter side sees a
//! plain "write a report, wait for a report" interface with a timeout.

use std::time::Duration;

use crate::Result;

/// Report-level connection to a HID reader.
pub trait HidLink: Send {
    /// Device name, for logs and errors.
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<()>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Write one output report.
    ///
    /// # Errors
    /// `HardwareError::TransportFailure` if the device is closed or rejects the write.
    fn write_report(&mut self, report: &[u8]) -> Result<()>;

    /// Next input report, waiting at most `timeout`. `Ok(None)` on timeout.
    fn read_report(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

#[cfg(feature = "hid")]
pub use hidapi_link::HidApiLink;

#[cfg(feature = "hid")]
mod hidapi_link {
    use super::*;
    use crate::{HardwareError, config::HidIds};
    use hidapi::{HidApi, HidDevice};
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
            mpsc,
        },
        thread::{self, JoinHandle},
    };
    use tracing::{debug, warn};

    /// How long the pump holds the device per read attempt.
    const PUMP_READ_MS: i32 = 20;

    /// Input buffer; one byte more than the report for the report id.
    const INPUT_LEN: usize = 65;

    type Shared = Arc<Mutex<HidDevice>>;

    /// Background reader delivering input reports to one channel.
    struct ReportPump {
        stop: Arc<AtomicBool>,
        reports: mpsc::Receiver<std::result::Result<Vec<u8>, String>>,
        thread: Option<JoinHandle<()>>,
    }

    impl ReportPump {
        fn spawn(device: Shared) -> Self {
            let stop = Arc::new(AtomicBool::new(false));
            let (tx, reports) = mpsc::channel();
            let flag = Arc::clone(&stop);

            let thread = thread::spawn(move || {
                let mut buf = [0u8; INPUT_LEN];
                while !flag.load(Ordering::Acquire) {
                    let read = match device.lock() {
                        Ok(dev) => dev.read_timeout(&mut buf, PUMP_READ_MS),
                        Err(_) => break,
                    };
                    match read {
                        Ok(0) => {}
                        Ok(n) => {
                            if tx.send(Ok(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e.to_string()));
                            break;
                        }
                    }
                }
                debug!("HID report pump stopped");
            });

            Self {
                stop,
                reports,
                thread: Some(thread),
            }
        }
    }

    impl Drop for ReportPump {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Release);
            if let Some(thread) = self.thread.take()
                && thread.join().is_err()
            {
                warn!("HID report pump panicked");
            }
        }
    }

    /// HID link backed by `hidapi`.
    pub struct HidApiLink {
        ids: HidIds,
        name: String,
        device: Option<Shared>,
        pump: Option<ReportPump>,
    }

    impl std::fmt::Debug for HidApiLink {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("HidApiLink")
                .field("ids", &self.ids)
                .field("open", &self.device.is_some())
                .finish()
        }
    }

    impl HidApiLink {
        pub fn new(ids: HidIds) -> Self {
            Self {
                ids,
                name: format!("hid:{ids}"),
                device: None,
                pump: None,
            }
        }

        fn failure(&self, message: impl Into<String>) -> HardwareError {
            HardwareError::transport(self.name.clone(), message)
        }
    }

    impl HidLink for HidApiLink {
        fn name(&self) -> &str {
            &self.name
        }

        fn open(&mut self) -> Result<()> {
            self.close();
            let api = HidApi::new().map_err(|e| self.failure(e.to_string()))?;
            let device = api
                .open(self.ids.vendor_id, self.ids.product_id)
                .map_err(|e| self.failure(e.to_string()))?;
            let device = Arc::new(Mutex::new(device));
            self.pump = Some(ReportPump::spawn(Arc::clone(&device)));
            self.device = Some(device);
            debug!(device = %self.name, "HID device opened");
            Ok(())
        }

        fn close(&mut self) {
            // Stop the pump before the device handle goes away.
            self.pump = None;
            self.device = None;
        }

        fn is_open(&self) -> bool {
            self.device.is_some()
        }

        fn write_report(&mut self, report: &[u8]) -> Result<()> {
            let device = self
                .device
                .as_ref()
                .ok_or_else(|| self.failure("device is closed"))?;
            let written = device
                .lock()
                .map_err(|_| self.failure("device lock poisoned"))?
                .write(report);
            written.map(drop).map_err(|e| self.failure(e.to_string()))
        }

        fn read_report(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
            let pump = self
                .pump
                .as_ref()
                .ok_or_else(|| self.failure("device is closed"))?;
            match pump.reports.recv_timeout(timeout) {
                Ok(Ok(report)) => Ok(Some(report)),
                Ok(Err(message)) => Err(self.failure(message)),
                Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    Err(self.failure("report pump stopped"))
                }
            }
        }
    }
}
