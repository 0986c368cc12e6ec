use thiserror::Error;

use crate::wire::WireError;

/// Errors that can occur in the daemon
#[derive(Error, Debug)]
pub enum DdarpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

pub type Result<T> = std::result::Result<T, DdarpError>;
