//! Mock link implementation for testing.
//!
//! Provides a `MockLink` that behaves like a line-oriented serial device
//! without requiring hardware. Reads block (up to their timeout) until a line
//! is pushed, so sessions can be driven from other threads.

use super::error::{LinkError, LinkResult};
use super::line::LineAssembler;
use super::traits::{LineLink, ReadOutcome};
use parking_lot::{Condvar, Mutex};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Shared state behind every clone of a `MockLink`.
struct MockState {
    lines: LineAssembler,
    /// Every line written, without its terminator.
    write_log: Vec<Vec<u8>>,
    /// Computes a reply for each written line, like a device would.
    responder: Option<Responder>,
    fail_next_read: Option<ErrorKind>,
    fail_next_write: Option<ErrorKind>,
    /// Held between the start and end of each `write_line`.
    write_delay: Duration,
    in_flight: usize,
    max_in_flight: usize,
    clear_count: usize,
    close_count: usize,
    closed: bool,
}

/// Mock link implementation for testing.
///
/// This implementation allows you to:
/// - Push lines that subsequent reads will return
/// - Inspect what was written
/// - Attach a responder that plays the part of the shared device
/// - Inject I/O failures
/// - Detect overlapping writes from different threads
///
/// # Example
/// ```
/// use serial_sharer::link::{LineLink, MockLink, ReadOutcome};
/// use std::time::Duration;
///
/// let device = MockLink::new("MOCK0");
/// device.respond_with(|request| Some([b"ACK ".as_slice(), request].concat()));
///
/// let mut link = device.clone();
/// link.write_line(b"PING").unwrap();
/// let reply = link.read_line(Duration::from_millis(10)).unwrap();
/// assert_eq!(reply, ReadOutcome::Line(b"ACK PING".to_vec()));
/// assert_eq!(device.written_lines(), vec!["PING".to_string()]);
/// ```
#[derive(Clone)]
pub struct MockLink {
    name: String,
    state: Arc<(Mutex<MockState>, Condvar)>,
}

impl MockLink {
    /// Create a mock link with the default 12800-byte line bound.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_max_line(name, 12_800)
    }

    /// Create a mock link that drops lines longer than `max_line` bytes.
    pub fn with_max_line(name: impl Into<String>, max_line: usize) -> Self {
        Self {
            name: name.into(),
            state: Arc::new((
                Mutex::new(MockState {
                    lines: LineAssembler::new(max_line),
                    write_log: Vec::new(),
                    responder: None,
                    fail_next_read: None,
                    fail_next_write: None,
                    write_delay: Duration::ZERO,
                    in_flight: 0,
                    max_in_flight: 0,
                    clear_count: 0,
                    close_count: 0,
                    closed: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Queue a line (a `\n` is appended) for subsequent reads.
    pub fn push_line(&self, line: &str) {
        self.push_bytes(format!("{line}\n").as_bytes());
    }

    /// Queue raw bytes for subsequent reads.
    pub fn push_bytes(&self, bytes: &[u8]) {
        let (lock, ready) = &*self.state;
        lock.lock().lines.extend(bytes);
        ready.notify_all();
    }

    /// Answer every written line with whatever `responder` returns.
    ///
    /// Returning `None` simulates a device that never replies.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.state.0.lock().responder = Some(Box::new(responder));
    }

    /// Keep each write "on the wire" for `delay`, widening the window in
    /// which overlapping writes would be detected.
    pub fn set_write_delay(&self, delay: Duration) {
        self.state.0.lock().write_delay = delay;
    }

    /// Make the next read fail with an I/O error of the given kind.
    pub fn fail_next_read(&self, kind: ErrorKind) {
        let (lock, ready) = &*self.state;
        lock.lock().fail_next_read = Some(kind);
        ready.notify_all();
    }

    /// Make the next write fail with an I/O error of the given kind.
    pub fn fail_next_write(&self, kind: ErrorKind) {
        self.state.0.lock().fail_next_write = Some(kind);
    }

    /// Copy of every line written so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.0.lock().write_log.clone()
    }

    /// Written lines decoded as (lossy) UTF-8.
    pub fn written_lines(&self) -> Vec<String> {
        self.state
            .0
            .lock()
            .write_log
            .iter()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Highest number of writes observed in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state.0.lock().max_in_flight
    }

    /// Number of `clear_input` calls.
    pub fn clear_count(&self) -> usize {
        self.state.0.lock().clear_count
    }

    /// Number of `close` calls that actually closed the link.
    pub fn close_count(&self) -> usize {
        self.state.0.lock().close_count
    }

    /// Bytes buffered but not yet returned by a read.
    pub fn buffered_bytes(&self) -> usize {
        self.state.0.lock().lines.buffered()
    }
}

impl LineLink for MockLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_line(&mut self, timeout: Duration) -> LinkResult<ReadOutcome> {
        let deadline = Instant::now() + timeout;
        let (lock, ready) = &*self.state;
        let mut state = lock.lock();
        loop {
            if state.closed {
                return Err(LinkError::closed(&self.name));
            }
            if let Some(kind) = state.fail_next_read.take() {
                return Err(LinkError::Io(std::io::Error::new(kind, "injected read failure")));
            }
            if let Some(outcome) = state.lines.next_outcome() {
                return Ok(outcome);
            }
            if ready.wait_until(&mut state, deadline).timed_out() {
                // One last look so a line pushed right at the deadline is not lost.
                return Ok(state
                    .lines
                    .next_outcome()
                    .unwrap_or(ReadOutcome::TimedOut));
            }
        }
    }

    fn write_line(&mut self, line: &[u8]) -> LinkResult<()> {
        let (lock, ready) = &*self.state;
        let delay = {
            let mut state = lock.lock();
            if state.closed {
                return Err(LinkError::closed(&self.name));
            }
            if let Some(kind) = state.fail_next_write.take() {
                return Err(LinkError::Io(std::io::Error::new(kind, "injected write failure")));
            }
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.write_delay
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = lock.lock();
        state.in_flight -= 1;
        state.write_log.push(line.to_vec());
        let reply = state.responder.as_mut().and_then(|respond| respond(line));
        if let Some(mut reply) = reply {
            reply.push(b'\n');
            state.lines.extend(&reply);
            ready.notify_all();
        }
        Ok(())
    }

    fn clear_input(&mut self) -> LinkResult<()> {
        let mut state = self.state.0.lock();
        state.lines.clear();
        state.clear_count += 1;
        Ok(())
    }

    fn close(&mut self) -> LinkResult<()> {
        let (lock, ready) = &*self.state;
        let mut state = lock.lock();
        if !state.closed {
            state.closed = true;
            state.close_count += 1;
            ready.notify_all();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.0.lock().closed
    }
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("name", &self.name)
            .field("buffered_bytes", &self.buffered_bytes())
            .finish()
    }
}
