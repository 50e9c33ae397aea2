#![forbid(unsafe_code)]

//! Coalescing of element writes into one flush per scheduling cycle.
//!
//! Each [`UpdateTarget`] owns at most one pending slot. Adding again before
//! the flush overwrites the slot (last write wins). The first add after a
//! flush arms exactly one deferred flush on the [`EventLoop`], however many
//! targets end up pending.
//!
//! # Invariants
//!
//! 1. At most one flush is armed at any time.
//! 2. A flush applies at most one value per target: the latest one.
//! 3. Targets that are no longer mounted at flush time are skipped.
//! 4. Pending state is cleared before any value is applied, so writes made
//!    during a flush arm the next one.
//! 5. The scheduler holds targets weakly; a dropped target is skipped.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use bindery_core::Value;

use crate::event_loop::EventLoop;

/// Why an element write was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateReason {
    /// First read-and-write after a binding became active.
    InitialSync,
    /// A subscriber received a published change.
    ModelChanged,
    /// Trailing write released by output rate limiting.
    RateLimited,
}

/// Something the scheduler can write into.
pub trait UpdateTarget {
    /// Whether the target can still be written.
    fn is_mounted(&self) -> bool;

    /// Apply a flushed value.
    fn apply_update(&self, value: Value, reason: UpdateReason);
}

struct PendingUpdate {
    target: Weak<dyn UpdateTarget>,
    value: Value,
    reason: UpdateReason,
}

#[derive(Default)]
struct SchedulerState {
    pending: AHashMap<usize, PendingUpdate>,
    armed: bool,
    flushes: u64,
}

/// Batches element writes per scheduling cycle.
#[derive(Clone)]
pub struct UpdateScheduler {
    event_loop: EventLoop,
    state: Rc<RefCell<SchedulerState>>,
}

impl UpdateScheduler {
    /// Create a scheduler flushing on `event_loop`.
    #[must_use]
    pub fn new(event_loop: EventLoop) -> Self {
        Self {
            event_loop,
            state: Rc::new(RefCell::new(SchedulerState::default())),
        }
    }

    /// Store `value` as the pending write for `target` and arm a flush.
    pub fn add(&self, target: &Rc<dyn UpdateTarget>, value: Value, reason: UpdateReason) {
        let arm = {
            let mut state = self.state.borrow_mut();
            let key = Rc::as_ptr(target).cast::<()>() as usize;
            state.pending.insert(
                key,
                PendingUpdate {
                    target: Rc::downgrade(target),
                    value,
                    reason,
                },
            );
            !std::mem::replace(&mut state.armed, true)
        };
        if arm {
            let state = Rc::downgrade(&self.state);
            self.event_loop.defer(move || {
                if let Some(state) = state.upgrade() {
                    flush(&state);
                }
            });
        }
    }

    /// Targets with a pending write.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Whether a flush is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state.borrow().armed
    }

    /// Flushes run so far.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.state.borrow().flushes
    }
}

fn flush(state: &RefCell<SchedulerState>) {
    let pending = {
        let mut state = state.borrow_mut();
        state.armed = false;
        state.flushes += 1;
        std::mem::take(&mut state.pending)
    };
    tracing::trace!(targets = pending.len(), "flush pending updates");
    for update in pending.into_values() {
        let Some(target) = update.target.upgrade() else {
            continue;
        };
        if !target.is_mounted() {
            tracing::trace!("skip update for unmounted target");
            continue;
        }
        target.apply_update(update.value, update.reason);
    }
}

impl fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("UpdateScheduler")
            .field("pending", &state.pending.len())
            .field("armed", &state.armed)
            .field("flushes", &state.flushes)
            .finish()
    }
}
