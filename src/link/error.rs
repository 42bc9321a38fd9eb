//! Link-layer error types.
//!
//! Kept separate from the session and supervisor errors so the line codec and
//! the serial backend can be tested on their own.

use thiserror::Error;

/// Errors raised by a [`LineLink`](super::LineLink).
///
/// Timeouts and overlong lines are not errors; they come back as
/// [`ReadOutcome`](super::ReadOutcome) variants. Anything here is a link fault.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The named serial device does not exist.
    #[error("Serial device not found: {0}")]
    NotFound(String),

    /// An I/O error occurred while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device rejected its configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The link was used after `close()`.
    #[error("Link '{0}' is closed")]
    Closed(String),
}

impl LinkError {
    /// Create a NotFound error from a device name.
    pub fn not_found(device: impl Into<String>) -> Self {
        Self::NotFound(device.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a Closed error for the named link.
    pub fn closed(device: impl Into<String>) -> Self {
        Self::Closed(device.into())
    }
}

/// Result alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
