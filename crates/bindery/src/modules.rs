#![forbid(unsafe_code)]

//! Dynamically loaded model modules.
//!
//! A module path in a `model` reference is handed to the context's
//! [`ModuleHost`], which completes asynchronously through a callback. The
//! loader picks the `default` export, else the first export, and
//! instantiates constructors.
//!
//! [`StaticModules`] is an in-process host: modules are registered up front
//! and each load completes on the next scheduling cycle.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use bindery_core::{ModelRc, ObjectModel, Value};
use bindery_runtime::EventLoop;

use crate::globals::Factory;

/// One export of a module.
#[derive(Clone)]
pub enum Export {
    /// A ready model instance.
    Instance(ModelRc),
    /// A constructor; instantiated on load.
    Constructor(Factory),
    /// Plain data; wrapped in an [`ObjectModel`] on load.
    Data(Value),
}

impl Export {
    /// Turn the export into a model instance.
    #[must_use]
    pub fn instantiate(&self) -> ModelRc {
        match self {
            Self::Instance(model) => Rc::clone(model),
            Self::Constructor(factory) => factory(),
            Self::Data(value) => ObjectModel::new(value.clone()) as ModelRc,
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => write!(f, "Instance"),
            Self::Constructor(_) => write!(f, "Constructor"),
            Self::Data(v) => f.debug_tuple("Data").field(v).finish(),
        }
    }
}

/// A loaded module: its exports in declaration order.
#[derive(Clone, Debug, Default)]
pub struct Module {
    exports: Vec<(String, Export)>,
}

impl Module {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add the `default` export.
    #[must_use]
    pub fn with_default(self, export: Export) -> Self {
        self.with_export("default", export)
    }

    /// Builder: add a named export.
    #[must_use]
    pub fn with_export(mut self, name: impl Into<String>, export: Export) -> Self {
        self.exports.push((name.into(), export));
        self
    }

    /// The export a model reference resolves to: `default`, else the first.
    #[must_use]
    pub fn entry(&self) -> Option<&Export> {
        self.exports
            .iter()
            .find(|(name, _)| name == "default")
            .or_else(|| self.exports.first())
            .map(|(_, export)| export)
    }
}

/// Completion callback for a module load.
pub type ModuleCallback = Box<dyn FnOnce(Result<Module, String>)>;

/// Loads modules for the model loader.
pub trait ModuleHost {
    /// Start loading `path`; call `done` exactly once, now or later.
    fn load(&self, path: &str, done: ModuleCallback);
}

/// In-process module host completing loads on the next scheduling cycle.
pub struct StaticModules {
    event_loop: EventLoop,
    modules: RefCell<AHashMap<String, Module>>,
    loads: Cell<usize>,
}

impl StaticModules {
    #[must_use]
    pub fn new(event_loop: EventLoop) -> Rc<Self> {
        Rc::new(Self {
            event_loop,
            modules: RefCell::new(AHashMap::new()),
            loads: Cell::new(0),
        })
    }

    /// Register `module` under `path`.
    pub fn register(&self, path: impl Into<String>, module: Module) {
        self.modules.borrow_mut().insert(path.into(), module);
    }

    /// Loads started so far.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.get()
    }
}

impl ModuleHost for StaticModules {
    fn load(&self, path: &str, done: ModuleCallback) {
        self.loads.set(self.loads.get() + 1);
        let result = self
            .modules
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| format!("module '{path}' not found"));
        self.event_loop.defer(move || done(result));
    }
}

impl fmt::Debug for StaticModules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticModules")
            .field("modules", &self.modules.borrow().len())
            .field("loads", &self.loads.get())
            .finish()
    }
}
