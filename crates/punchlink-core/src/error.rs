use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid card format: {0}")]
    InvalidCardFormat(String),

    #[error("Invalid time: {0}")]
    InvalidTime(String),

    #[error("Unknown device family: {0}")]
    UnknownFamily(String),

    #[error("Unknown card type: {0}")]
    UnknownCardType(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
