#![forbid(unsafe_code)]

//! Element listeners registered as one abortable unit.
//!
//! A [`ListenerGroup`] collects every listener a directive attaches during
//! one initialization. [`ListenerGroup::abort`] detaches all of them and
//! flips a shared flag so a listener already queued by the host becomes a
//! no-op.
//!
//! # Invariants
//!
//! 1. After `abort()`, no callback registered through the group runs.
//! 2. `abort()` is idempotent; dropping the group aborts it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use bindery_core::{ElementRc, Event, ListenerId};

/// Listeners tied to one initialization.
pub struct ListenerGroup {
    aborted: Rc<Cell<bool>>,
    registrations: RefCell<Vec<(ElementRc, ListenerId)>>,
}

impl ListenerGroup {
    #[must_use]
    pub fn new() -> Self {
        Self {
            aborted: Rc::new(Cell::new(false)),
            registrations: RefCell::new(Vec::new()),
        }
    }

    /// Attach `callback` to `event` on `element`. Ignored once aborted.
    pub fn listen(&self, element: &ElementRc, event: &str, callback: impl Fn(&Event) + 'static) {
        if self.aborted.get() {
            return;
        }
        let aborted = Rc::clone(&self.aborted);
        let id = element.add_listener(
            event,
            Rc::new(move |ev: &Event| {
                if !aborted.get() {
                    callback(ev);
                }
            }),
        );
        self.registrations
            .borrow_mut()
            .push((Rc::clone(element), id));
    }

    /// Detach every listener.
    pub fn abort(&self) {
        if self.aborted.replace(true) {
            return;
        }
        let registrations = std::mem::take(&mut *self.registrations.borrow_mut());
        for (element, id) in registrations {
            element.remove_listener(id);
        }
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }

    /// Listeners still attached.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ListenerGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ListenerGroup {
    fn drop(&mut self) {
        self.abort();
    }
}

impl fmt::Debug for ListenerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGroup")
            .field("aborted", &self.aborted.get())
            .field("listeners", &self.len())
            .finish()
    }
}
