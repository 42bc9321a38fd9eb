//! Exclusive access to the shared device.
//!
//! The `Arbiter` owns the shared link and a single holder slot. A controller
//! may touch the shared link only while it holds the slot, and it holds the
//! slot for one request/reply exchange at a time.
//!
//! # Handoff window
//!
//! A holder that releases and immediately asks again would almost always win
//! against controllers that are sleeping in backoff. When some other
//! controller was refused during a tenure, the releasing controller is refused
//! until one of the others takes the slot or the handoff window runs out.
//! A zero window turns this off.

use crate::link::{LinkHandle, LinkResult};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Index of a controller in the configured controller list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(pub usize);

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "controller#{}", self.0)
    }
}

#[derive(Debug)]
struct Handoff {
    releaser: ControllerId,
    until: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    holder: Option<ControllerId>,
    /// Someone other than `holder` was refused during the current tenure.
    contended: bool,
    handoff: Option<Handoff>,
    grants: u64,
    refusals: u64,
}

/// Counters describing how the slot has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArbiterStats {
    pub grants: u64,
    pub refusals: u64,
}

/// Guards the shared link with a single holder slot.
pub struct Arbiter {
    slot: Mutex<Slot>,
    shared: Mutex<LinkHandle>,
    shared_name: String,
    handoff_window: Duration,
}

impl Arbiter {
    /// Create an arbiter owning `shared`.
    pub fn new(shared: LinkHandle, handoff_window: Duration) -> Self {
        let shared_name = shared.name().to_string();
        Self {
            slot: Mutex::new(Slot::default()),
            shared: Mutex::new(shared),
            shared_name,
            handoff_window,
        }
    }

    /// Try to take the slot for `controller` without blocking.
    ///
    /// Succeeds when `controller` already holds the slot, or when the slot is
    /// empty. One exception applies to the empty case: during a handoff
    /// window, the controller that just released a contended tenure is refused
    /// even though nobody holds the slot. Everyone else is unaffected, and a
    /// zero window removes the exception entirely.
    pub fn try_acquire(&self, controller: ControllerId) -> bool {
        let mut slot = self.slot.lock();
        let current = slot.holder;
        match current {
            Some(holder) if holder == controller => true,
            Some(holder) => {
                slot.contended = true;
                slot.refusals += 1;
                trace!(%controller, %holder, "slot busy");
                false
            }
            None => {
                let reserved = slot
                    .handoff
                    .as_ref()
                    .is_some_and(|h| h.releaser == controller && Instant::now() < h.until);
                if reserved {
                    slot.refusals += 1;
                    trace!(%controller, "yielding slot to refused controllers");
                    return false;
                }
                slot.holder = Some(controller);
                slot.contended = false;
                slot.handoff = None;
                slot.grants += 1;
                true
            }
        }
    }

    /// Give the slot back.
    ///
    /// Only clears the slot if `controller` holds it; returns whether it did.
    pub fn release(&self, controller: ControllerId) -> bool {
        let mut slot = self.slot.lock();
        if slot.holder != Some(controller) {
            debug!(%controller, holder = ?slot.holder, "ignoring release of a slot not held");
            return false;
        }

        slot.holder = None;
        if std::mem::take(&mut slot.contended) && !self.handoff_window.is_zero() {
            slot.handoff = Some(Handoff {
                releaser: controller,
                until: Instant::now() + self.handoff_window,
            });
        }
        true
    }

    /// RAII form of [`try_acquire`](Self::try_acquire).
    ///
    /// The permit lends out the shared link and releases the slot when
    /// dropped. A permit taken while `controller` already holds the slot
    /// shares that tenure, so whichever is dropped first ends it.
    pub fn try_permit(&self, controller: ControllerId) -> Option<SlotPermit<'_>> {
        self.try_acquire(controller).then_some(SlotPermit {
            arbiter: self,
            controller,
        })
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<ControllerId> {
        self.slot.lock().holder
    }

    pub fn stats(&self) -> ArbiterStats {
        let slot = self.slot.lock();
        ArbiterStats {
            grants: slot.grants,
            refusals: slot.refusals,
        }
    }

    /// Device name of the shared link.
    pub fn shared_name(&self) -> &str {
        &self.shared_name
    }

    /// Close the shared link. Safe to call more than once.
    pub fn close_shared(&self) -> LinkResult<()> {
        self.shared.lock().close()
    }
}

impl fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arbiter")
            .field("shared", &self.shared_name)
            .field("holder", &self.holder())
            .field("handoff_window", &self.handoff_window)
            .finish()
    }
}

/// Proof of holding the slot.
#[derive(Debug)]
pub struct SlotPermit<'a> {
    arbiter: &'a Arbiter,
    controller: ControllerId,
}

impl SlotPermit<'_> {
    pub fn controller(&self) -> ControllerId {
        self.controller
    }

    /// Borrow the shared link.
    ///
    /// Uncontended while the slot discipline holds; only `close_shared` can
    /// make this wait.
    pub fn shared_link(&self) -> MutexGuard<'_, LinkHandle> {
        self.arbiter.shared.lock()
    }
}

impl Drop for SlotPermit<'_> {
    fn drop(&mut self) {
        self.arbiter.release(self.controller);
    }
}
