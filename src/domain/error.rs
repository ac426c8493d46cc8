//! Domain error types

use thiserror::Error;

/// Errors that can occur while managing a USB serial connection.
///
/// The public `ConnectionManager` API collapses these into `bool` results;
/// only errors raised by the background reader reach a listener.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    #[error("No USB serial devices attached")]
    NoDevice,

    #[error("No attached device matches vendor {0}")]
    VendorNotMatched(String),

    #[error("USB permission requested for {0}, waiting for the user")]
    PermissionPending(String),

    #[error("USB permission not granted for {0}")]
    PermissionDenied(String),

    #[error("Port already open")]
    AlreadyOpen,

    #[error("Port not open")]
    NotOpen,

    #[error("Device {0} exposes no serial ports")]
    NoPort(String),

    #[error("Hex decode error: {0}")]
    Hex(String),

    #[error("Serial I/O error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for connection operations
pub type CommResult<T> = Result<T, CommError>;
