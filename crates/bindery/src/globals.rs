#![forbid(unsafe_code)]

//! The global scope: named model instances, model constructors, and
//! functions reachable from `model` references and `func` paths.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use bindery_core::{Interaction, ModelFn, ModelRc};

/// Builds a fresh model instance.
pub type Factory = Rc<dyn Fn() -> ModelRc>;

/// A named entry in the global scope.
#[derive(Clone)]
pub enum GlobalEntry {
    /// A ready instance, shared by every lookup.
    Instance(ModelRc),
    /// A constructor, called once per lookup.
    Constructor(Factory),
}

impl GlobalEntry {
    /// The instance for this entry, constructing one if needed.
    #[must_use]
    pub fn instantiate(&self) -> ModelRc {
        match self {
            Self::Instance(model) => Rc::clone(model),
            Self::Constructor(factory) => factory(),
        }
    }
}

impl fmt::Debug for GlobalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => write!(f, "Instance"),
            Self::Constructor(_) => write!(f, "Constructor"),
        }
    }
}

/// Global scope shared by the loader and function-invocation mode.
#[derive(Default)]
pub struct Globals {
    entries: RefCell<AHashMap<String, GlobalEntry>>,
    functions: RefCell<AHashMap<String, ModelFn>>,
}

impl Globals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a shared instance under `name`.
    pub fn define_instance(&self, name: impl Into<String>, model: ModelRc) {
        self.entries
            .borrow_mut()
            .insert(name.into(), GlobalEntry::Instance(model));
    }

    /// Define a constructor under `name`.
    pub fn define_constructor(&self, name: impl Into<String>, factory: impl Fn() -> ModelRc + 'static) {
        self.entries
            .borrow_mut()
            .insert(name.into(), GlobalEntry::Constructor(Rc::new(factory)));
    }

    /// Define a function under a dotted path.
    pub fn define_function(&self, path: impl Into<String>, f: impl Fn(&Interaction) + 'static) {
        self.functions.borrow_mut().insert(path.into(), Rc::new(f));
    }

    /// Remove a named entry.
    pub fn remove(&self, name: &str) -> Option<GlobalEntry> {
        self.entries.borrow_mut().remove(name)
    }

    /// Look up `name`, instantiating constructors.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ModelRc> {
        let entry = self.entries.borrow().get(name).cloned()?;
        Some(entry.instantiate())
    }

    /// Resolve a function path: first as a global function, then as
    /// `<global instance>.<function path on that instance>`.
    #[must_use]
    pub fn function(&self, path: &str) -> Option<ModelFn> {
        if let Some(f) = self.functions.borrow().get(path) {
            return Some(Rc::clone(f));
        }
        let (head, rest) = path.split_once('.')?;
        let entry = self.entries.borrow().get(head).cloned()?;
        match entry {
            GlobalEntry::Instance(model) => model.function(rest),
            GlobalEntry::Constructor(_) => None,
        }
    }
}

impl fmt::Debug for Globals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Globals")
            .field("entries", &self.entries.borrow().len())
            .field("functions", &self.functions.borrow().len())
            .finish()
    }
}
