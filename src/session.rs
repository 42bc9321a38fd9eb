//! One worker per upstream controller.
//!
//! A `ClientSession` loops through `Idle -> Acquiring -> Forwarding ->
//! Releasing`, servicing at most one request/reply pair per slot tenure.
//! Each pass is exposed as [`ClientSession::run_cycle`] so tests can step the
//! state machine and inspect the arbiter in between.

use crate::arbiter::{Arbiter, ControllerId, SlotPermit};
use crate::error::SessionError;
use crate::link::{LineLink, LinkError, LinkHandle, ReadOutcome};
use crate::shutdown::Shutdown;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Timing knobs for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// How long to wait for a request once the slot is held.
    pub request_timeout: Duration,
    /// How long to wait for the shared device to reply.
    pub reply_timeout: Duration,
    /// Pause after a refused acquisition.
    pub backoff: Duration,
    /// Longest single blocking read; bounds how late a shutdown is noticed.
    pub poll_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(1),
            reply_timeout: Duration::from_secs(1),
            backoff: Duration::from_millis(100),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// What a single pass through the state machine did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another controller held the slot; the session backed off.
    Contended,
    /// The slot was held but the controller had nothing to send.
    Idle,
    /// A request was forwarded and its reply delivered.
    Exchanged { request: Vec<u8>, reply: Vec<u8> },
    /// A request was forwarded but the shared device did not answer in time.
    ReplyTimeout { request: Vec<u8> },
    /// The controller sent a line longer than the receive buffer.
    RequestOverrun { discarded: usize },
    /// The shared device answered with a line longer than the receive buffer.
    ReplyOverrun { request: Vec<u8>, discarded: usize },
    /// Shutdown was requested.
    Cancelled,
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub acquisitions: u64,
    pub contentions: u64,
    pub exchanges: u64,
    pub idle_cycles: u64,
    pub reply_timeouts: u64,
    pub overruns: u64,
}

/// How a session ended.
#[derive(Debug)]
pub struct SessionReport {
    pub controller: ControllerId,
    pub device: String,
    pub stats: SessionStats,
    pub result: Result<(), SessionError>,
}

/// Mediates between one controller link and the shared device.
#[derive(Debug)]
pub struct ClientSession {
    id: ControllerId,
    device: String,
    link: LinkHandle,
    arbiter: Arc<Arbiter>,
    settings: SessionSettings,
    shutdown: Shutdown,
    stats: SessionStats,
}

impl ClientSession {
    pub fn new(
        id: ControllerId,
        link: LinkHandle,
        arbiter: Arc<Arbiter>,
        settings: SessionSettings,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            id,
            device: link.name().to_string(),
            link,
            arbiter,
            settings,
            shutdown,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    /// Device name of the controller link.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Run one pass: acquire, forward at most one exchange, release.
    ///
    /// The slot is always released before this returns, on success and on
    /// error alike.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, SessionError> {
        if self.shutdown.is_triggered() {
            return Ok(CycleOutcome::Cancelled);
        }

        let arbiter = Arc::clone(&self.arbiter);
        let Some(permit) = arbiter.try_permit(self.id) else {
            self.stats.contentions += 1;
            trace!(controller = %self.device, backoff = ?self.settings.backoff, "slot busy, backing off");
            if self.shutdown.sleep(self.settings.backoff) {
                return Ok(CycleOutcome::Cancelled);
            }
            return Ok(CycleOutcome::Contended);
        };

        self.stats.acquisitions += 1;
        let outcome = self.forward(&permit);
        drop(permit);
        outcome
    }

    fn forward(&mut self, permit: &SlotPermit<'_>) -> Result<CycleOutcome, SessionError> {
        let read = read_bounded(
            &mut *self.link,
            self.settings.request_timeout,
            self.settings.poll_interval,
            &self.shutdown,
        )
        .map_err(|e| SessionError::controller(&self.device, e))?;

        let request = match read {
            None => return Ok(CycleOutcome::Cancelled),
            Some(ReadOutcome::Line(line)) if !line.is_empty() => line,
            Some(ReadOutcome::Line(_)) | Some(ReadOutcome::TimedOut) => {
                self.stats.idle_cycles += 1;
                trace!(controller = %self.device, "no request pending");
                return Ok(CycleOutcome::Idle);
            }
            Some(ReadOutcome::Overrun(discarded)) => {
                self.stats.overruns += 1;
                warn!(controller = %self.device, discarded, "request longer than receive buffer, dropped");
                return Ok(CycleOutcome::RequestOverrun { discarded });
            }
        };

        info!(
            controller = %self.device,
            request = %String::from_utf8_lossy(&request),
            "received request"
        );

        let reply = {
            let mut shared = permit.shared_link();
            let shared_name = self.arbiter.shared_name();
            let to_shared = |e: LinkError| SessionError::shared(shared_name, e);

            // Anything already waiting is a late answer to an earlier request.
            shared.clear_input().map_err(to_shared)?;
            shared.write_line(&request).map_err(to_shared)?;
            read_bounded(
                &mut **shared,
                self.settings.reply_timeout,
                self.settings.poll_interval,
                &self.shutdown,
            )
            .map_err(to_shared)?
        };

        match reply {
            None => Ok(CycleOutcome::Cancelled),
            Some(ReadOutcome::Line(reply)) => {
                info!(
                    controller = %self.device,
                    reply = %String::from_utf8_lossy(&reply),
                    "sending reply"
                );
                self.link
                    .write_line(&reply)
                    .map_err(|e| SessionError::controller(&self.device, e))?;
                self.stats.exchanges += 1;
                Ok(CycleOutcome::Exchanged { request, reply })
            }
            Some(ReadOutcome::TimedOut) => {
                self.stats.reply_timeouts += 1;
                warn!(
                    controller = %self.device,
                    shared = %self.arbiter.shared_name(),
                    timeout = ?self.settings.reply_timeout,
                    "shared device did not reply"
                );
                Ok(CycleOutcome::ReplyTimeout { request })
            }
            Some(ReadOutcome::Overrun(discarded)) => {
                self.stats.overruns += 1;
                warn!(controller = %self.device, discarded, "reply longer than receive buffer, dropped");
                Ok(CycleOutcome::ReplyOverrun { request, discarded })
            }
        }
    }

    /// Loop until shutdown or a link fault, then close the controller link.
    pub fn run(mut self) -> SessionReport {
        info!(controller = %self.device, id = %self.id, "session started");

        let result = loop {
            match self.run_cycle() {
                Ok(CycleOutcome::Cancelled) => break Ok(()),
                Ok(_) => {}
                Err(e) => {
                    error!(controller = %self.device, error = %e, "session stopped on link fault");
                    break Err(e);
                }
            }
        };

        if let Err(e) = self.link.close() {
            warn!(controller = %self.device, error = %e, "failed to close controller link");
        }

        debug!(controller = %self.device, stats = ?self.stats, "session finished");
        SessionReport {
            controller: self.id,
            device: self.device,
            stats: self.stats,
            result,
        }
    }
}

/// Read one line within `timeout`, polling in slices of `poll` so shutdown is
/// noticed. Returns `None` on shutdown; a timeout is `Some(TimedOut)`.
fn read_bounded(
    link: &mut dyn LineLink,
    timeout: Duration,
    poll: Duration,
    shutdown: &Shutdown,
) -> Result<Option<ReadOutcome>, LinkError> {
    let deadline = Instant::now() + timeout;
    let poll = poll.max(Duration::from_millis(1));
    loop {
        if shutdown.is_triggered() {
            return Ok(None);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(Some(ReadOutcome::TimedOut));
        }
        match link.read_line(remaining.min(poll))? {
            ReadOutcome::TimedOut => continue,
            outcome => return Ok(Some(outcome)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MockLink;
    use pretty_assertions::assert_eq;

    fn fast() -> SessionSettings {
        SessionSettings {
            request_timeout: Duration::from_millis(40),
            reply_timeout: Duration::from_millis(40),
            backoff: Duration::from_millis(10),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn setup() -> (ClientSession, MockLink, MockLink, Arc<Arbiter>) {
        let controller = MockLink::new("CTRL_A");
        let device = MockLink::new("SHARED");
        let arbiter = Arc::new(Arbiter::new(Box::new(device.clone()), Duration::ZERO));
        let session = ClientSession::new(
            ControllerId(0),
            Box::new(controller.clone()),
            Arc::clone(&arbiter),
            fast(),
            Shutdown::new(),
        );
        (session, controller, device, arbiter)
    }

    #[test]
    fn test_exchange_forwards_request_and_reply() {
        let (mut session, controller, device, arbiter) = setup();
        device.respond_with(|req| (req == b"GET TEMP").then(|| b"23.5".to_vec()));
        controller.push_line("GET TEMP");

        let outcome = session.run_cycle().unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Exchanged {
                request: b"GET TEMP".to_vec(),
                reply: b"23.5".to_vec()
            }
        );
        assert_eq!(device.written_lines(), vec!["GET TEMP"]);
        assert_eq!(controller.written_lines(), vec!["23.5"]);
        assert_eq!(arbiter.holder(), None);
        assert_eq!(session.stats().exchanges, 1);
    }

    #[test]
    fn test_idle_cycle_leaves_shared_link_untouched() {
        let (mut session, _controller, device, arbiter) = setup();

        assert_eq!(session.run_cycle().unwrap(), CycleOutcome::Idle);
        assert!(device.written().is_empty());
        assert_eq!(device.clear_count(), 0);
        assert_eq!(arbiter.holder(), None);
    }

    #[test]
    fn test_blank_line_is_not_a_request() {
        let (mut session, controller, device, _) = setup();
        controller.push_line("");

        assert_eq!(session.run_cycle().unwrap(), CycleOutcome::Idle);
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_crlf_request_is_re_terminated() {
        let (mut session, controller, device, _) = setup();
        device.respond_with(|_| Some(b"OK".to_vec()));
        controller.push_bytes(b"AT\r\n");

        session.run_cycle().unwrap();
        assert_eq!(device.written(), vec![b"AT".to_vec()]);
    }

    #[test]
    fn test_reply_timeout_releases_slot() {
        let (mut session, controller, device, arbiter) = setup();
        device.respond_with(|_| None);
        controller.push_line("PING");

        let started = Instant::now();
        let outcome = session.run_cycle().unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome, CycleOutcome::ReplyTimeout { request: b"PING".to_vec() });
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(40) + Duration::from_millis(500));
        assert!(controller.written().is_empty());
        assert_eq!(arbiter.holder(), None);
        assert_eq!(session.stats().reply_timeouts, 1);
    }

    #[test]
    fn test_stale_reply_is_discarded_before_request() {
        let (mut session, controller, device, _) = setup();
        device.push_line("late answer");
        device.respond_with(|_| Some(b"fresh".to_vec()));
        controller.push_line("Q");

        let outcome = session.run_cycle().unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Exchanged {
                request: b"Q".to_vec(),
                reply: b"fresh".to_vec()
            }
        );
    }

    #[test]
    fn test_contention_backs_off() {
        let (mut session, controller, device, arbiter) = setup();
        controller.push_line("GET TEMP");
        assert!(arbiter.try_acquire(ControllerId(1)));

        let started = Instant::now();
        assert_eq!(session.run_cycle().unwrap(), CycleOutcome::Contended);
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert!(device.written().is_empty());
        assert_eq!(session.stats().contentions, 1);
        assert_eq!(arbiter.holder(), Some(ControllerId(1)));
    }

    #[test]
    fn test_request_overrun() {
        let controller = MockLink::with_max_line("CTRL_A", 4);
        let device = MockLink::new("SHARED");
        let arbiter = Arc::new(Arbiter::new(Box::new(device.clone()), Duration::ZERO));
        let mut session = ClientSession::new(
            ControllerId(0),
            Box::new(controller.clone()),
            Arc::clone(&arbiter),
            fast(),
            Shutdown::new(),
        );
        controller.push_line("far too long");

        assert_eq!(
            session.run_cycle().unwrap(),
            CycleOutcome::RequestOverrun { discarded: 12 }
        );
        assert!(device.written().is_empty());
        assert_eq!(arbiter.holder(), None);
    }

    #[test]
    fn test_shared_write_fault_is_reported_and_slot_released() {
        let (mut session, controller, device, arbiter) = setup();
        device.fail_next_write(std::io::ErrorKind::BrokenPipe);
        controller.push_line("PING");

        let err = session.run_cycle().unwrap_err();
        assert!(err.is_shared());
        assert_eq!(arbiter.holder(), None);
    }

    #[test]
    fn test_controller_fault_is_reported() {
        let (mut session, controller, _device, arbiter) = setup();
        controller.fail_next_read(std::io::ErrorKind::BrokenPipe);

        let err = session.run_cycle().unwrap_err();
        assert!(!err.is_shared());
        assert_eq!(arbiter.holder(), None);
    }

    #[test]
    fn test_cancelled_cycle() {
        let controller = MockLink::new("CTRL_A");
        let device = MockLink::new("SHARED");
        let arbiter = Arc::new(Arbiter::new(Box::new(device), Duration::ZERO));
        let shutdown = Shutdown::new();
        let mut session = ClientSession::new(
            ControllerId(0),
            Box::new(controller),
            arbiter,
            fast(),
            shutdown.clone(),
        );

        shutdown.trigger();
        assert_eq!(session.run_cycle().unwrap(), CycleOutcome::Cancelled);
    }

    #[test]
    fn test_run_closes_controller_link_on_shutdown() {
        let controller = MockLink::new("CTRL_A");
        let device = MockLink::new("SHARED");
        let arbiter = Arc::new(Arbiter::new(Box::new(device), Duration::ZERO));
        let shutdown = Shutdown::new();
        let session = ClientSession::new(
            ControllerId(0),
            Box::new(controller.clone()),
            arbiter,
            fast(),
            shutdown.clone(),
        );

        let handle = std::thread::spawn(move || session.run());
        std::thread::sleep(Duration::from_millis(30));
        shutdown.trigger();

        let report = handle.join().unwrap();
        assert!(report.result.is_ok());
        assert_eq!(report.device, "CTRL_A");
        assert_eq!(controller.close_count(), 1);
    }
}
