#![forbid(unsafe_code)]

//! Cooperative runtime for Bindery.
//!
//! Single-threaded and host-driven: the [`EventLoop`] only advances when the
//! host asks it to, and every deferred completion in the binding engine
//! (batched writes, debounce and rate-limit timers, asynchronous model loads)
//! is a task on that loop.

pub mod event_loop;
pub mod reactive;

pub use event_loop::{EventLoop, TimerHandle};
pub use reactive::{
    ChangeObserver, Subscription, SubscriptionId, UpdateReason, UpdateScheduler, UpdateTarget,
};
