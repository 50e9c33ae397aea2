#![forbid(unsafe_code)]

//! Core types for Bindery: values, models, and element capabilities.
//!
//! Everything here is host-independent. The binding engine in `bindery`
//! talks to models through [`Model`] and to UI elements through [`Element`];
//! [`Node`] is the in-memory element tree used by hosts without a native
//! widget layer and by tests.

pub mod element;
pub mod model;
pub mod node;
pub mod path;
pub mod read;
pub mod selector;
pub mod value;
pub mod write;

pub use element::{
    Capabilities, Element, ElementRc, Event, Listener, ListenerId, SelectOption, TargetSearch,
    element_key, find_by_id, find_target,
};
pub use model::{Interaction, Model, ModelFn, ModelRc, ObjectModel, model_key};
pub use node::Node;
pub use path::PathError;
pub use read::read_element;
pub use selector::Selector;
pub use value::{Value, display_string, is_truthy, loose_eq};
pub use write::{WriteTarget, write_element};
