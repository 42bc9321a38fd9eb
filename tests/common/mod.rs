//! Shared test utilities for serial-sharer integration tests.
//!
//! This module provides common test infrastructure including:
//! - A rig of mock controller links around one mock shared device
//! - Fast supervisor timings so tests finish quickly
//! - Polling helpers for waiting on cross-thread effects

#![allow(dead_code)]

use parking_lot::Mutex;
use serial_sharer::arbiter::{Arbiter, ControllerId};
use serial_sharer::link::{LinkHandle, MockLink};
use serial_sharer::session::SessionSettings;
use serial_sharer::supervisor::{Supervisor, SupervisorSettings};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for any single wait in these tests.
pub const PATIENCE: Duration = Duration::from_secs(10);

/// Timings small enough to run many cycles per test.
pub fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        session: SessionSettings {
            request_timeout: Duration::from_millis(20),
            reply_timeout: Duration::from_millis(250),
            backoff: Duration::from_millis(5),
            poll_interval: Duration::from_millis(5),
        },
        handoff_window: Duration::from_millis(10),
        stop_on_shared_fault: true,
    }
}

/// A shared device that answers every request with `ACK <request>`.
pub fn ack_device(name: &str) -> MockLink {
    let device = MockLink::new(name);
    device.respond_with(|request| Some([b"ACK ".as_slice(), request].concat()));
    device
}

/// Controller id encoded in a request tagged `C<id> ...`.
pub fn tagged_requester(line: &[u8]) -> Option<ControllerId> {
    let text = std::str::from_utf8(line).ok()?;
    let id = text.strip_prefix('C')?.split(' ').next()?.parse().ok()?;
    Some(ControllerId(id))
}

/// Slot violations seen while links were in use.
pub type Violations = Arc<Mutex<Vec<String>>>;

/// Check the slot at the two points where a session touches a link while
/// forwarding: the request write on the shared device and the reply write
/// back to the controller. Both must happen while that controller holds the
/// slot.
///
/// Requests must be tagged with [`tagged_requester`]'s `C<id>` prefix, and
/// `controllers[i]` must belong to `ControllerId(i)`. The shared device keeps
/// answering `ACK <request>`.
pub fn watch_slot(
    shared: &MockLink,
    controllers: &[MockLink],
    arbiter: &Arc<Arbiter>,
) -> Violations {
    let violations: Violations = Arc::default();

    {
        let arbiter = Arc::clone(arbiter);
        let violations = Arc::clone(&violations);
        shared.respond_with(move |request| {
            let requester = tagged_requester(request);
            let holder = arbiter.holder();
            if requester.is_none() || holder != requester {
                violations.lock().push(format!(
                    "request {:?} written while slot held by {holder:?}",
                    String::from_utf8_lossy(request)
                ));
            }
            Some([b"ACK ".as_slice(), request].concat())
        });
    }

    for (index, controller) in controllers.iter().enumerate() {
        let arbiter = Arc::clone(arbiter);
        let violations = Arc::clone(&violations);
        controller.respond_with(move |reply| {
            let holder = arbiter.holder();
            if holder != Some(ControllerId(index)) {
                violations.lock().push(format!(
                    "reply {:?} delivered to controller {index} while slot held by {holder:?}",
                    String::from_utf8_lossy(reply)
                ));
            }
            None
        });
    }

    violations
}

/// Mock links for one shared device and several controllers.
///
/// The rig keeps clones of every link so tests can inspect them after the
/// supervisor has taken ownership.
pub struct Rig {
    pub shared: MockLink,
    pub controllers: Vec<MockLink>,
}

impl Rig {
    /// `count` controllers named `CTRL0..` around an acknowledging device.
    pub fn new(count: usize) -> Self {
        Self {
            shared: ack_device("SHARED"),
            controllers: (0..count)
                .map(|i| MockLink::new(format!("CTRL{i}")))
                .collect(),
        }
    }

    pub fn supervisor(&self, settings: SupervisorSettings) -> Supervisor {
        let controllers: Vec<LinkHandle> = self
            .controllers
            .iter()
            .map(|c| Box::new(c.clone()) as LinkHandle)
            .collect();
        Supervisor::new(Box::new(self.shared.clone()), controllers, settings)
            .expect("rig always has controllers")
    }

    /// Every link, shared device last.
    pub fn all_links(&self) -> impl Iterator<Item = &MockLink> {
        self.controllers.iter().chain(std::iter::once(&self.shared))
    }
}

/// Poll `condition` from async code until it holds or `PATIENCE` runs out.
pub async fn until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

/// Blocking counterpart of [`until`] for thread-based tests.
pub fn wait_for<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + PATIENCE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
