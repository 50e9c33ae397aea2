#![forbid(unsafe_code)]

//! Change propagation for Bindery.
//!
//! This module provides the two primitives that move model changes toward
//! elements:
//!
//! - [`ChangeObserver`]: per-model registry of `path -> subscribers` with
//!   explicit publish. Nothing is observed automatically.
//! - [`Subscription`]: RAII guard that automatically unsubscribes on drop.
//! - [`UpdateScheduler`]: per-target pending slot, flushed once per
//!   scheduling cycle of the [`EventLoop`](crate::EventLoop).
//!
//! # Architecture
//!
//! Both primitives use `Rc<RefCell<..>>` for single-threaded shared
//! ownership. Subscribers and update targets are stored as `Weak` pointers
//! and cleaned up lazily, so neither registry extends the lifetime of a model
//! or of a binding.
//!
//! # Invariants
//!
//! 1. `publish` is synchronous: every live subscriber has run when it returns.
//! 2. Dropping a [`Subscription`] removes the callback before the next publish.
//! 3. Within one scheduling cycle the last value added per target wins.
//! 4. At most one flush is armed at a time.

pub mod observer;
pub mod scheduler;

pub use observer::{ChangeObserver, Subscription, SubscriptionId};
pub use scheduler::{UpdateReason, UpdateScheduler, UpdateTarget};
