#![forbid(unsafe_code)]

//! The element side of a binding.
//!
//! The engine never inspects concrete toolkit types. An [`Element`] reports
//! its [`Capabilities`] and the read/write procedures pick a strategy from
//! those bits, so any host toolkit can be bound by implementing this trait.
//!
//! # Invariants
//!
//! 1. `children()` returns children in document order.
//! 2. A listener registered with `add_listener` fires for every dispatched
//!    event of that name until `remove_listener` is called with its id.
//! 3. `is_mounted()` is `false` once the element is detached from its tree.

use std::rc::Rc;

use bitflags::bitflags;
use serde_json::Value;

use crate::model::ModelRc;

bitflags! {
    /// What an element can do, as far as bindings are concerned.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        /// Has a user-editable `value`.
        const VALUE = 1 << 0;
        /// Two-state control with a `checked` state.
        const TOGGLE = 1 << 1;
        /// Option list allowing several selected entries.
        const MULTI_SELECT = 1 << 2;
        /// Option list (single or multiple).
        const OPTIONS = 1 << 3;
        /// Accepts inline style and custom properties.
        const STYLE = 1 << 4;
        /// A directive wrapper rather than a bindable target.
        const DIRECTIVE = 1 << 5;
    }
}

/// Shared handle to an element.
pub type ElementRc = Rc<dyn Element>;

/// Callback invoked when an element dispatches an event.
pub type Listener = Rc<dyn Fn(&Event)>;

/// An interaction dispatched by an element.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event name (`"input"`, `"change"`, `"click"`, ...).
    pub name: String,
    /// Raw interaction value carried by the event, if any.
    pub value: Option<Value>,
}

impl Event {
    /// Create an event carrying no value.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Create an event carrying `value`.
    #[must_use]
    pub fn with_value(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
        }
    }
}

/// Handle returned by [`Element::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// One entry of an option list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub selected: bool,
}

/// A UI element that can be bound.
pub trait Element {
    /// Tag or kind name, for diagnostics.
    fn tag(&self) -> String;

    /// Document-unique id, if any.
    fn element_id(&self) -> Option<String>;

    fn capabilities(&self) -> Capabilities;

    /// Read a named property.
    fn property(&self, name: &str) -> Option<Value>;

    /// Whether `name` is a settable property (as opposed to a plain attribute).
    fn has_property(&self, name: &str) -> bool;

    fn set_property(&self, name: &str, value: Value);

    fn attribute(&self, name: &str) -> Option<String>;

    fn set_attribute(&self, name: &str, value: &str);

    fn remove_attribute(&self, name: &str);

    /// Read an inline style or custom property.
    fn style(&self, name: &str) -> Option<String>;

    fn set_style(&self, name: &str, value: &str);

    /// Option list, in control order. Empty for elements without options.
    fn options(&self) -> Vec<SelectOption> {
        Vec::new()
    }

    fn set_option_selected(&self, _index: usize, _selected: bool) {}

    fn children(&self) -> Vec<ElementRc>;

    fn parent(&self) -> Option<ElementRc>;

    fn is_mounted(&self) -> bool;

    fn add_listener(&self, event: &str, listener: Listener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);

    /// View this element as a model, for bindings whose model is another element.
    fn as_model(self: Rc<Self>) -> Option<ModelRc> {
        None
    }
}

/// Identity key of an element: the address of its shared allocation.
#[must_use]
pub fn element_key(element: &ElementRc) -> usize {
    Rc::as_ptr(element).cast::<()>() as usize
}

/// Depth-first search for the element whose id is `id`.
#[must_use]
pub fn find_by_id(root: &ElementRc, id: &str) -> Option<ElementRc> {
    if root.element_id().as_deref() == Some(id) {
        return Some(Rc::clone(root));
    }
    root.children()
        .iter()
        .find_map(|child| find_by_id(child, id))
}

/// Outcome of searching a directive wrapper for its bind target.
#[derive(Clone)]
pub enum TargetSearch {
    /// The first non-wrapper descendant on the first-child chain.
    Found(ElementRc),
    /// The wrapper has no children yet.
    Empty,
    /// Children exist but the chain ends in a wrapper with nothing inside.
    Missing,
}

/// Descend through nested directive wrappers to the first bindable element.
#[must_use]
pub fn find_target(host: &ElementRc) -> TargetSearch {
    let Some(mut node) = host.children().into_iter().next() else {
        return TargetSearch::Empty;
    };
    while node.capabilities().contains(Capabilities::DIRECTIVE) {
        match node.children().into_iter().next() {
            Some(child) => node = child,
            None => return TargetSearch::Missing,
        }
    }
    TargetSearch::Found(node)
}

impl std::fmt::Debug for TargetSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found(el) => f.debug_tuple("Found").field(&el.tag()).finish(),
            Self::Empty => write!(f, "Empty"),
            Self::Missing => write!(f, "Missing"),
        }
    }
}
