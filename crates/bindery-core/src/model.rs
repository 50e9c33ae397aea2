#![forbid(unsafe_code)]

//! The model side of a binding.
//!
//! A [`Model`] is anything exposing readable/writable dotted-path fields. An
//! element-like model additionally exposes get/set-attribute accessors. Models
//! are shared as [`ModelRc`] and compared by identity, never by value.
//!
//! [`ObjectModel`] is the plain-object model: a JSON document behind a
//! `RefCell`, plus a table of named functions for function-invocation mode.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value;

use crate::path::{self, PathError};

/// Shared handle to a model.
pub type ModelRc = Rc<dyn Model>;

/// A callable resolved from a function path.
pub type ModelFn = Rc<dyn Fn(&Interaction)>;

/// The record handed to a configured function when the bound element fires.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    /// Name of the element event that triggered the call.
    pub event: String,
    /// Value extracted from the element at the time of the event.
    pub value: Value,
    /// Id of the bound element, if it has one.
    pub target_id: Option<String>,
}

/// A data source a directive reads from and writes to.
pub trait Model {
    /// Read the value at a dotted property path.
    fn get(&self, path: &str) -> Option<Value>;

    /// Write the value at a dotted property path.
    fn set(&self, path: &str, value: Value) -> Result<(), PathError>;

    /// Read a named attribute (element-like models only).
    fn get_attribute(&self, _name: &str) -> Option<String> {
        None
    }

    /// Write a named attribute. Returns `false` when the model has no attributes.
    fn set_attribute(&self, _name: &str, _value: &str) -> bool {
        false
    }

    /// Resolve a dotted function path on this model.
    fn function(&self, _path: &str) -> Option<ModelFn> {
        None
    }
}

/// Identity key of a model: the address of its shared allocation.
#[must_use]
pub fn model_key(model: &ModelRc) -> usize {
    Rc::as_ptr(model).cast::<()>() as usize
}

/// Plain-object model backed by a JSON document.
pub struct ObjectModel {
    data: RefCell<Value>,
    functions: RefCell<AHashMap<String, ModelFn>>,
}

impl ObjectModel {
    /// Create a shared model holding `data`.
    #[must_use]
    pub fn new(data: Value) -> Rc<Self> {
        Rc::new(Self {
            data: RefCell::new(data),
            functions: RefCell::new(AHashMap::new()),
        })
    }

    /// Register a function reachable through [`Model::function`].
    pub fn define_function(&self, path: impl Into<String>, f: impl Fn(&Interaction) + 'static) {
        self.functions.borrow_mut().insert(path.into(), Rc::new(f));
    }

    /// Clone of the whole document.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.data.borrow().clone()
    }
}

impl Model for ObjectModel {
    fn get(&self, path: &str) -> Option<Value> {
        path::get_path(&self.data.borrow(), path).cloned()
    }

    fn set(&self, path: &str, value: Value) -> Result<(), PathError> {
        path::set_path(&mut self.data.borrow_mut(), path, value)
    }

    fn function(&self, path: &str) -> Option<ModelFn> {
        self.functions.borrow().get(path).cloned()
    }
}

impl fmt::Debug for ObjectModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectModel")
            .field("data", &self.data.borrow())
            .field("functions", &self.functions.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn object_model_reads_and_writes_paths() {
        let model = ObjectModel::new(json!({"greeting": "Hello"}));
        assert_eq!(model.get("greeting"), Some(json!("Hello")));
        model.set("nested.value", json!(1)).unwrap();
        assert_eq!(model.snapshot(), json!({"greeting": "Hello", "nested": {"value": 1}}));
    }

    #[test]
    fn identity_key_follows_the_allocation() {
        let a: ModelRc = ObjectModel::new(json!({}));
        let b: ModelRc = ObjectModel::new(json!({}));
        let a2 = Rc::clone(&a);
        assert_eq!(model_key(&a), model_key(&a2));
        assert_ne!(model_key(&a), model_key(&b));
    }

    #[test]
    fn functions_resolve_by_path() {
        let model = ObjectModel::new(json!({}));
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        model.define_function("actions.save", move |_| c.set(c.get() + 1));

        let f = model.function("actions.save").expect("registered");
        f(&Interaction {
            event: "click".into(),
            value: Value::Null,
            target_id: None,
        });
        assert_eq!(calls.get(), 1);
        assert!(model.function("actions.load").is_none());
    }

    #[test]
    fn plain_models_have_no_attributes() {
        let model = ObjectModel::new(json!({}));
        assert!(!model.set_attribute("title", "x"));
        assert_eq!(model.get_attribute("title"), None);
    }
}
