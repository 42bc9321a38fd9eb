//! Core traits for line-oriented links.
//!
//! Defines the `LineLink` trait so that real serial devices and the in-memory
//! mock can be used interchangeably by sessions and the arbiter.

use super::error::LinkResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed parameters used when opening a link.
///
/// Nothing here is negotiated with the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Receive buffer size in bytes. Also the longest accepted line.
    pub rx_buffer_size: usize,

    /// Initial capacity of the buffer each outgoing line is assembled in.
    ///
    /// Only a sizing hint: longer lines still go out whole, and the OS-level
    /// transmit buffer is left at its default. Must be non-zero.
    pub tx_buffer_size: usize,

    /// Terminator appended to every written line.
    pub line_ending: String,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 57_600,
            rx_buffer_size: 12_800,
            tx_buffer_size: 12_800,
            line_ending: "\n".to_string(),
        }
    }
}

/// Result of a single bounded `read_line` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line with its terminator (`\n` or `\r\n`) removed.
    /// May be empty.
    Line(Vec<u8>),

    /// No complete line arrived before the timeout. Any partial line stays
    /// buffered until the next read or `clear_input`.
    TimedOut,

    /// A line longer than the receive buffer was dropped. Carries the number
    /// of bytes discarded.
    Overrun(usize),
}

/// Trait for a duplex, newline-delimited byte stream.
///
/// Only `\n` delimits lines. Implementations keep any partially received line
/// across calls so a caller may read in short slices without losing data.
pub trait LineLink: Send + std::fmt::Debug {
    /// Get the device name of this link.
    fn name(&self) -> &str;

    /// Wait up to `timeout` for one complete line.
    fn read_line(&mut self, timeout: Duration) -> LinkResult<ReadOutcome>;

    /// Write `line` followed by the configured line ending.
    fn write_line(&mut self, line: &[u8]) -> LinkResult<()>;

    /// Discard buffered input, including a partially received line.
    fn clear_input(&mut self) -> LinkResult<()>;

    /// Close the link. Closing an already closed link is a no-op.
    fn close(&mut self) -> LinkResult<()>;

    /// Whether `close()` has been called.
    fn is_closed(&self) -> bool;
}

/// Boxed link as stored by sessions and the arbiter.
pub type LinkHandle = Box<dyn LineLink>;
