#![forbid(unsafe_code)]

//! Host-driven cooperative event loop.
//!
//! Nothing here runs on its own. The host (a browser bridge, a terminal main
//! loop, a test) advances the loop explicitly, which keeps every suspension
//! point of the binding engine deterministic:
//!
//! - [`EventLoop::defer`] queues a task for the next scheduling cycle (the
//!   frame/microtask boundary used for batched element writes and
//!   asynchronous completions).
//! - [`EventLoop::set_timeout`] arms a task on the virtual clock.
//! - [`EventLoop::run_until_idle`] drains cycles without moving the clock;
//!   [`EventLoop::advance`] moves the clock, firing timers in deadline order
//!   and draining cycles between them.
//!
//! # Invariants
//!
//! 1. Tasks deferred while a cycle runs execute in the following cycle.
//! 2. Timers fire in `(deadline, arm order)` order; a cleared timer never fires.
//! 3. No loop state is borrowed while a task runs, so tasks may re-enter the loop.
//!
//! # Failure Modes
//!
//! - A task that defers itself forever is cut off after
//!   [`MAX_IDLE_CYCLES`] cycles with a warning.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use ahash::AHashMap;

/// Work item run by the loop.
pub type Task = Box<dyn FnOnce()>;

/// Upper bound on cycles drained by a single `run_until_idle`.
pub const MAX_IDLE_CYCLES: usize = 10_000;

/// Handle to an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Default)]
struct LoopState {
    now: Duration,
    queue: VecDeque<Task>,
    timers: BTreeMap<(Duration, u64), Task>,
    deadlines: AHashMap<u64, Duration>,
    next_timer: u64,
    cycles: u64,
}

/// Shared handle to a cooperative event loop.
#[derive(Clone, Default)]
pub struct EventLoop {
    state: Rc<RefCell<LoopState>>,
}

impl EventLoop {
    /// Create an idle loop at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Queue `task` for the next scheduling cycle.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.state.borrow_mut().queue.push_back(Box::new(task));
    }

    /// Run `task` once `delay` has elapsed on the virtual clock.
    pub fn set_timeout(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerHandle {
        let mut state = self.state.borrow_mut();
        let id = state.next_timer;
        state.next_timer += 1;
        let deadline = state.now + delay;
        state.timers.insert((deadline, id), Box::new(task));
        state.deadlines.insert(id, deadline);
        TimerHandle(id)
    }

    /// Cancel a timer. Returns `false` if it already fired or was cleared.
    pub fn clear_timeout(&self, handle: TimerHandle) -> bool {
        let mut state = self.state.borrow_mut();
        match state.deadlines.remove(&handle.0) {
            Some(deadline) => state.timers.remove(&(deadline, handle.0)).is_some(),
            None => false,
        }
    }

    /// Run every task queued before this call. Returns how many ran.
    pub fn run_cycle(&self) -> usize {
        let batch: Vec<Task> = {
            let mut state = self.state.borrow_mut();
            if state.queue.is_empty() {
                return 0;
            }
            state.cycles += 1;
            state.queue.drain(..).collect()
        };
        let ran = batch.len();
        for task in batch {
            task();
        }
        ran
    }

    /// Run cycles until no deferred work remains. Returns tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_IDLE_CYCLES {
            let ran = self.run_cycle();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
        tracing::warn!(
            cycles = MAX_IDLE_CYCLES,
            "event loop still busy after cycle limit; yielding"
        );
        total
    }

    /// Move the clock forward by `by`, firing due timers in order.
    pub fn advance(&self, by: Duration) {
        let target = self.now() + by;
        loop {
            self.run_until_idle();
            let due = {
                let mut state = self.state.borrow_mut();
                let next = state.timers.keys().next().copied();
                match next {
                    Some(key) if key.0 <= target => {
                        state.now = key.0;
                        state.deadlines.remove(&key.1);
                        state.timers.remove(&key)
                    }
                    _ => None,
                }
            };
            match due {
                Some(task) => task(),
                None => break,
            }
        }
        self.state.borrow_mut().now = target;
        self.run_until_idle();
    }

    /// Tasks waiting for the next cycle.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Armed timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Number of non-empty cycles run so far.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.state.borrow().cycles
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventLoop")
            .field("now", &state.now)
            .field("queued", &state.queue.len())
            .field("timers", &state.timers.len())
            .field("cycles", &state.cycles)
            .finish()
    }
}
