//! Serial device link.
//!
//! Wraps the `serialport` crate's `SerialPort` trait with our `LineLink`
//! trait, adding line framing and a bounded receive buffer.

use super::error::{LinkError, LinkResult};
use super::line::LineAssembler;
use super::traits::{LineLink, LinkSettings, ReadOutcome};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Serial device opened with 8N1 framing and no flow control.
pub struct SerialLink {
    /// The underlying serial port; `None` once closed.
    port: Option<Box<dyn serialport::SerialPort>>,
    /// The device name/path for identification.
    name: String,
    settings: LinkSettings,
    lines: LineAssembler,
    scratch: Vec<u8>,
    outgoing: Vec<u8>,
}

impl SerialLink {
    /// Open a serial device.
    ///
    /// # Arguments
    /// * `device` - The system path to the device (e.g., "/dev/ttyUSB0" or "COM3")
    /// * `settings` - Baud rate, buffer sizes and line ending
    ///
    /// # Example
    /// ```no_run
    /// use serial_sharer::link::{LinkSettings, SerialLink};
    ///
    /// let link = SerialLink::open("/dev/ttyUSB0", &LinkSettings::default())?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(device: &str, settings: &LinkSettings) -> LinkResult<Self> {
        if settings.rx_buffer_size == 0 || settings.tx_buffer_size == 0 {
            return Err(LinkError::config("buffer sizes must be non-zero"));
        }

        let port = serialport::new(device, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .flow_control(serialport::FlowControl::None)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => LinkError::not_found(device),
                serialport::ErrorKind::InvalidInput => LinkError::config(e.to_string()),
                _ => LinkError::Serial(e),
            })?;

        Ok(Self {
            port: Some(port),
            name: device.to_string(),
            lines: LineAssembler::new(settings.rx_buffer_size),
            scratch: vec![0u8; settings.rx_buffer_size.min(4096)],
            outgoing: Vec::with_capacity(settings.tx_buffer_size),
            settings: settings.clone(),
        })
    }

    /// Settings this link was opened with.
    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }
}

impl LineLink for SerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_line(&mut self, timeout: Duration) -> LinkResult<ReadOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.lines.next_outcome() {
                return Ok(outcome);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(ReadOutcome::TimedOut);
            }

            let port = self
                .port
                .as_mut()
                .ok_or_else(|| LinkError::closed(&self.name))?;
            port.set_timeout(deadline - now)?;

            match port.read(&mut self.scratch) {
                // A zero-length read with time left means the device went away.
                Ok(0) => {
                    return Err(LinkError::Io(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "device returned end of stream",
                    )))
                }
                Ok(n) => self.lines.extend(&self.scratch[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
    }

    fn write_line(&mut self, line: &[u8]) -> LinkResult<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| LinkError::closed(&self.name))?;

        self.outgoing.clear();
        self.outgoing.extend_from_slice(line);
        self.outgoing
            .extend_from_slice(self.settings.line_ending.as_bytes());

        port.write_all(&self.outgoing)?;
        port.flush()?;
        Ok(())
    }

    fn clear_input(&mut self) -> LinkResult<()> {
        self.lines.clear();
        if let Some(port) = self.port.as_mut() {
            port.clear(serialport::ClearBuffer::Input)?;
        }
        Ok(())
    }

    fn close(&mut self) -> LinkResult<()> {
        // Dropping the boxed port releases the OS handle.
        self.port.take();
        self.lines.clear();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.port.is_none()
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("name", &self.name)
            .field("baud_rate", &self.settings.baud_rate)
            .field("closed", &self.port.is_none())
            .field("buffered", &self.lines.buffered())
            .finish()
    }
}
