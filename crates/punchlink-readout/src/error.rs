use punchlink_core::DeviceFamily;
use punchlink_hardware::HardwareError;
use thiserror::Error;

/// Errors raised by the readout pipeline and its controllers.
#[derive(Error, Debug)]
pub enum ReadoutError {
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("No serial port for {family} reader: {source}")]
    PortUnavailable {
        family: DeviceFamily,
        #[source]
        source: HardwareError,
    },

    #[error("No tokio runtime to run the {family} workers")]
    NoRuntime { family: DeviceFamily },

    #[error("No controller registered for {0}")]
    UnknownFamily(DeviceFamily),

    #[error("Malformed backup log at line {line}: {message}")]
    MalformedBackup { line: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReadoutError {
    pub fn malformed(line: usize, message: impl Into<String>) -> Self {
        Self::MalformedBackup {
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReadoutError>;
