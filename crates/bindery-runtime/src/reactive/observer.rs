#![forbid(unsafe_code)]

//! Per-model change notification.
//!
//! [`ChangeObserver`] keeps, for every model that has listeners, a table of
//! `property path -> subscribers`. Nothing here observes mutation: callers
//! announce a change with [`ChangeObserver::publish`] after mutating.
//!
//! # Ownership
//!
//! The table never keeps a model alive. Each channel holds a `Weak` to its
//! model and channels whose model died are pruned lazily. Callbacks are owned
//! by the [`Subscription`] guard; the table only holds `Weak` pointers to
//! them, so dropping the guard is enough to stop delivery even if the
//! explicit [`ChangeObserver::unsubscribe`] is never called.
//!
//! # Invariants
//!
//! 1. `publish` invokes every live subscriber of the path exactly once.
//! 2. A subscriber removed (or dropped) before `publish` is not invoked.
//! 3. Callbacks run with no observer state borrowed, so they may publish,
//!    subscribe, or unsubscribe re-entrantly.
//! 4. No ordering between subscribers of one path is promised.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use bindery_core::{Model, ModelRc, Value, model_key};

type Callback = dyn Fn(&Value);

/// Identifier of one subscription within the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Slot {
    id: u64,
    callback: Weak<Callback>,
}

struct Channel {
    model: Weak<dyn Model>,
    topics: AHashMap<String, Vec<Slot>>,
}

impl Channel {
    fn is_live(&self) -> bool {
        self.model.strong_count() > 0
    }
}

#[derive(Default)]
struct ObserverState {
    channels: AHashMap<usize, Channel>,
    next_id: u64,
}

impl ObserverState {
    fn channel_mut(&mut self, model: &ModelRc) -> &mut Channel {
        let key = model_key(model);
        // A dead channel at this address belongs to a previous allocation.
        if self.channels.get(&key).is_some_and(|c| !c.is_live()) {
            self.channels.remove(&key);
        }
        self.channels.entry(key).or_insert_with(|| Channel {
            model: Rc::downgrade(model),
            topics: AHashMap::new(),
        })
    }

    fn remove(&mut self, key: usize, path: &str, id: u64) -> bool {
        let Some(channel) = self.channels.get_mut(&key) else {
            return false;
        };
        let Some(slots) = channel.topics.get_mut(path) else {
            return false;
        };
        let before = slots.len();
        slots.retain(|s| s.id != id);
        let removed = slots.len() != before;
        if slots.is_empty() {
            channel.topics.remove(path);
        }
        if channel.topics.is_empty() {
            self.channels.remove(&key);
        }
        removed
    }
}

/// Registry of change subscribers, keyed by model identity and path.
#[derive(Clone, Default)]
pub struct ChangeObserver {
    state: Rc<RefCell<ObserverState>>,
}

impl ChangeObserver {
    /// Create an empty observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for changes of `path` on `model`.
    ///
    /// Delivery stops when the returned guard is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(
        &self,
        model: &ModelRc,
        path: &str,
        callback: impl Fn(&Value) + 'static,
    ) -> Subscription {
        let callback: Rc<Callback> = Rc::new(callback);
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        state
            .channel_mut(model)
            .topics
            .entry(path.to_owned())
            .or_default()
            .push(Slot {
                id,
                callback: Rc::downgrade(&callback),
            });
        Subscription {
            observer: Rc::downgrade(&self.state),
            model_key: model_key(model),
            path: path.to_owned(),
            id,
            _callback: callback,
        }
    }

    /// Remove a subscription by id. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, model: &ModelRc, path: &str, id: SubscriptionId) -> bool {
        self.state
            .borrow_mut()
            .remove(model_key(model), path, id.0)
    }

    /// Synchronously deliver `value` to every subscriber of `path` on `model`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn publish(&self, model: &ModelRc, path: &str, value: &Value) -> usize {
        let callbacks: Vec<Rc<Callback>> = {
            let mut state = self.state.borrow_mut();
            let key = model_key(model);
            let Some(channel) = state.channels.get_mut(&key) else {
                return 0;
            };
            if !channel.is_live() {
                state.channels.remove(&key);
                return 0;
            }
            let Some(slots) = channel.topics.get_mut(path) else {
                return 0;
            };
            slots.retain(|s| s.callback.strong_count() > 0);
            slots.iter().filter_map(|s| s.callback.upgrade()).collect()
        };
        tracing::trace!(path, subscribers = callbacks.len(), "publish");
        for callback in &callbacks {
            callback(value);
        }
        callbacks.len()
    }

    /// Live subscribers of `path` on `model`.
    #[must_use]
    pub fn subscriber_count(&self, model: &ModelRc, path: &str) -> usize {
        let state = self.state.borrow();
        state
            .channels
            .get(&model_key(model))
            .filter(|c| c.is_live())
            .and_then(|c| c.topics.get(path))
            .map_or(0, |slots| {
                slots.iter().filter(|s| s.callback.strong_count() > 0).count()
            })
    }

    /// Models currently tracked, after pruning channels whose model died.
    #[must_use]
    pub fn tracked_models(&self) -> usize {
        let mut state = self.state.borrow_mut();
        state.channels.retain(|_, c| c.is_live());
        state.channels.len()
    }
}

impl fmt::Debug for ChangeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeObserver")
            .field("channels", &self.state.borrow().channels.len())
            .finish()
    }
}

/// RAII guard for one observer subscription.
///
/// Holds the callback; dropping the guard removes it from the observer.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    observer: Weak<RefCell<ObserverState>>,
    model_key: usize,
    path: String,
    id: u64,
    _callback: Rc<Callback>,
}

impl Subscription {
    /// Identifier usable with [`ChangeObserver::unsubscribe`].
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        SubscriptionId(self.id)
    }

    /// The subscribed path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.observer.upgrade() {
            // try_borrow_mut: a callback may drop its own guard mid-publish.
            if let Ok(mut state) = state.try_borrow_mut() {
                state.remove(self.model_key, &self.path, self.id);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("id", &self.id)
            .finish()
    }
}
