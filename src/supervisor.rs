//! Starts one session per controller and owns the orderly shutdown.
//!
//! # Architecture
//!
//! ```text
//! controller A ─ ClientSession ─┐
//! controller B ─ ClientSession ─┼──> Arbiter (slot + shared link) ──> shared device
//! controller C ─ ClientSession ─┘
//! ```
//!
//! Sessions do blocking serial I/O, so each runs on tokio's blocking pool.
//! The supervisor itself stays async so it can wait on process signals and
//! session exits at the same time.

use crate::arbiter::{Arbiter, ArbiterStats, ControllerId};
use crate::error::{SharerError, SharerResult};
use crate::link::LinkHandle;
use crate::session::{ClientSession, SessionReport, SessionSettings};
use crate::shutdown::Shutdown;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

/// Settings shared by the supervisor and all of its sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub session: SessionSettings,
    /// See the arbiter's handoff window. Zero disables it.
    pub handoff_window: Duration,
    /// End the whole run when the shared device faults.
    pub stop_on_shared_fault: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        let session = SessionSettings::default();
        Self {
            handoff_window: session.backoff * 2,
            session,
            stop_on_shared_fault: true,
        }
    }
}

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The external shutdown signal fired.
    Signal,
    /// Every session ended without a signal.
    SessionsEnded,
}

/// Outcome of a run that ended without a fatal error.
#[derive(Debug)]
pub struct RunSummary {
    pub reason: StopReason,
    pub sessions: Vec<SessionReport>,
    pub arbiter: ArbiterStats,
}

type SessionExit = (String, std::thread::Result<SessionReport>);

/// Owns the arbiter and the sessions until `run` hands them to workers.
#[derive(Debug)]
pub struct Supervisor {
    arbiter: Arc<Arbiter>,
    sessions: Vec<ClientSession>,
    shutdown: Shutdown,
    stop_on_shared_fault: bool,
}

impl Supervisor {
    /// Wire one session per controller link around a single arbiter.
    ///
    /// Controller ids follow the order of `controllers`.
    pub fn new(
        shared: LinkHandle,
        controllers: Vec<LinkHandle>,
        settings: SupervisorSettings,
    ) -> SharerResult<Self> {
        if controllers.is_empty() {
            return Err(SharerError::NoControllers);
        }

        let arbiter = Arc::new(Arbiter::new(shared, settings.handoff_window));
        let shutdown = Shutdown::new();
        let sessions = controllers
            .into_iter()
            .enumerate()
            .map(|(index, link)| {
                ClientSession::new(
                    ControllerId(index),
                    link,
                    Arc::clone(&arbiter),
                    settings.session,
                    shutdown.clone(),
                )
            })
            .collect();

        Ok(Self {
            arbiter,
            sessions,
            shutdown,
            stop_on_shared_fault: settings.stop_on_shared_fault,
        })
    }

    /// Handle that stops the run when triggered, same as the signal future.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn arbiter(&self) -> Arc<Arbiter> {
        Arc::clone(&self.arbiter)
    }

    /// Run every session until `signal` resolves or all sessions end.
    ///
    /// On the way out every session is cancelled and joined, and the shared
    /// link is closed. Returns an error for a shared-device fault (when
    /// configured to stop on one), a panicking session, or when every
    /// controller session failed.
    pub async fn run<F>(self, signal: F) -> SharerResult<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let Self {
            arbiter,
            sessions,
            shutdown,
            stop_on_shared_fault,
        } = self;
        let total = sessions.len();

        info!(
            shared = %arbiter.shared_name(),
            controllers = total,
            "starting sessions"
        );

        let mut workers: JoinSet<SessionExit> = JoinSet::new();
        for session in sessions {
            let device = session.device().to_string();
            workers.spawn_blocking(move || {
                let report = catch_unwind(AssertUnwindSafe(move || session.run()));
                (device, report)
            });
        }

        tokio::pin!(signal);
        let mut signalled = false;
        let mut failure: Option<SharerError> = None;
        let mut reports = Vec::with_capacity(total);

        loop {
            tokio::select! {
                _ = &mut signal, if !signalled => {
                    signalled = true;
                    info!("shutdown requested, cancelling sessions");
                    shutdown.trigger();
                }
                joined = workers.join_next() => {
                    let Some(joined) = joined else { break };
                    match on_session_exit(joined, stop_on_shared_fault) {
                        Ok(report) => reports.push(report),
                        Err(fatal) => {
                            failure.get_or_insert(fatal);
                            shutdown.trigger();
                        }
                    }
                }
            }
        }

        if let Err(e) = arbiter.close_shared() {
            warn!(shared = %arbiter.shared_name(), error = %e, "failed to close shared link");
        }

        if let Some(fatal) = failure {
            return Err(fatal);
        }

        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        if !signalled && !shutdown.is_triggered() && failed == total {
            return Err(SharerError::AllControllersFailed(total));
        }

        let reason = if signalled {
            StopReason::Signal
        } else {
            StopReason::SessionsEnded
        };
        info!(?reason, sessions = reports.len(), failed, "all sessions stopped");

        Ok(RunSummary {
            reason,
            sessions: reports,
            arbiter: arbiter.stats(),
        })
    }
}

/// Classify a finished worker. `Err` means the whole run must stop.
fn on_session_exit(
    joined: Result<SessionExit, JoinError>,
    stop_on_shared_fault: bool,
) -> Result<SessionReport, SharerError> {
    let (device, outcome) = match joined {
        Ok(exit) => exit,
        Err(e) => {
            error!(error = %e, "session worker failed");
            return Err(SharerError::SessionPanicked(e.to_string()));
        }
    };

    let mut report = match outcome {
        Ok(report) => report,
        Err(_) => {
            error!(controller = %device, "session panicked");
            return Err(SharerError::SessionPanicked(device));
        }
    };

    let fatal = stop_on_shared_fault && matches!(&report.result, Err(e) if e.is_shared());
    if fatal {
        if let Err(e) = std::mem::replace(&mut report.result, Ok(())) {
            error!(controller = %device, error = %e, "shared device failed, stopping");
            return Err(SharerError::Session(e));
        }
    }

    match &report.result {
        Ok(()) => info!(controller = %device, stats = ?report.stats, "session ended"),
        Err(e) => warn!(controller = %device, error = %e, "session ended on link fault, others continue"),
    }
    Ok(report)
}
