#![forbid(unsafe_code)]

//! Model resolution with caching, reference counting, and request merging.
//!
//! A model reference is either a ready instance or a string key. Instances
//! pass through untouched and are never cached or counted. String keys are
//! resolved in this order:
//!
//! 1. Remote locations (`scheme://...`, `//host/...`) are rejected.
//! 2. A local module path (`./x.js`, `../x.mjs`, `/x.js`, extensions from
//!    [`EngineConfig::module_extensions`]) is loaded through the
//!    [`ModuleHost`]; the `default` export (else the first) is used and
//!    constructors are instantiated.
//! 3. Anything else is an element lookup in the document:
//!    * a bare name is an element id, then a global name in [`Globals`];
//!    * a compound selector ([`Selector`]: `#id`, `.class`, `[attr=value]`,
//!      optionally led by a tag) matches the first element in document
//!      order. Tag-led compounds (`app.store`) fall back to a global of the
//!      same name; compounds starting with `#`, `.` or `[` do not.
//!    * anything else (combinators, pseudo-classes) is a global name or
//!      `UnsupportedSelector`.
//!
//! # Invariants
//!
//! 1. Concurrent requests for an uncached key share one underlying load.
//! 2. Every successful string-keyed delivery increments the key's count
//!    before the requester sees the instance.
//! 3. A key's cache entry exists exactly while its count is at least 1;
//!    after the last [`ModelLoader::decrement_ref`] the next resolution
//!    produces a fresh instance.
//! 4. A pending resolution is removed when it completes, succeeds or fails.
//!
//! # Failure Modes
//!
//! | Failure | Behavior |
//! |---------|----------|
//! | remote path | `ResolutionError::RemotePath`, nothing loaded |
//! | module host error | `ResolutionError::ModuleLoad` to every waiter |
//! | module without exports | `ResolutionError::MissingExport` |
//! | lookup miss | `ResolutionError::NotFound` |
//! | selector form not understood | `ResolutionError::UnsupportedSelector` |
//! | timeout elapsed | `ResolutionError::TimedOut`; a late completion is ignored |

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use bindery_core::{ElementRc, ModelRc, Selector, find_by_id};
use bindery_runtime::{EventLoop, TimerHandle};
use regex::Regex;

use crate::error::ResolutionError;
use crate::globals::Globals;
use crate::modules::{Export, ModuleHost};
use crate::settings::EngineConfig;

/// What a consumer asks the loader for.
#[derive(Clone)]
pub enum ModelReference {
    /// An already resolved instance.
    Instance(ModelRc),
    /// A string key: module path, element id, or global name.
    Key(String),
}

impl From<&str> for ModelReference {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for ModelReference {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<ModelRc> for ModelReference {
    fn from(model: ModelRc) -> Self {
        Self::Instance(model)
    }
}

impl fmt::Debug for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => write!(f, "Instance"),
            Self::Key(key) => f.debug_tuple("Key").field(key).finish(),
        }
    }
}

/// A delivered model.
#[derive(Clone)]
pub struct Resolved {
    pub model: ModelRc,
    /// The counted key, for string-keyed resolutions. Pass it back to
    /// [`ModelLoader::decrement_ref`] when the consumer tears down.
    pub key: Option<String>,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved").field("key", &self.key).finish()
    }
}

/// How a string key will be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Remote,
    Module,
    Lookup,
}

type Waiter = Box<dyn FnOnce(Result<Resolved, ResolutionError>)>;

struct PendingResolution {
    load_id: u64,
    waiters: Vec<Waiter>,
    timer: Option<TimerHandle>,
}

#[derive(Default)]
struct LoaderState {
    cache: AHashMap<String, ModelRc>,
    counts: AHashMap<String, usize>,
    pending: AHashMap<String, PendingResolution>,
    next_load: u64,
}

struct LoaderInner {
    event_loop: EventLoop,
    globals: Rc<Globals>,
    document: RefCell<Option<ElementRc>>,
    modules: RefCell<Option<Rc<dyn ModuleHost>>>,
    module_pattern: Option<Regex>,
    remote_pattern: Option<Regex>,
    timeout: Option<Duration>,
    state: RefCell<LoaderState>,
}

/// Shared model loader.
#[derive(Clone)]
pub struct ModelLoader {
    inner: Rc<LoaderInner>,
}

impl ModelLoader {
    /// Create a loader resolving globals from `globals` and scheduling on
    /// `event_loop`.
    #[must_use]
    pub fn new(event_loop: EventLoop, globals: Rc<Globals>, config: &EngineConfig) -> Self {
        let extensions = config
            .module_extensions
            .iter()
            .map(|ext| regex::escape(ext.trim_start_matches('.')))
            .collect::<Vec<_>>()
            .join("|");
        let module_pattern = compile(&format!(
            r"^(?:\.{{1,2}}/|/)(?:[\w\-.]+/)*[\w\-.]+\.(?:{extensions})$"
        ));
        let remote_pattern = compile(r"^(?:[A-Za-z][A-Za-z0-9+.\-]*://|//)");
        Self {
            inner: Rc::new(LoaderInner {
                event_loop,
                globals,
                document: RefCell::new(None),
                modules: RefCell::new(None),
                module_pattern,
                remote_pattern,
                timeout: config.resolve_timeout(),
                state: RefCell::new(LoaderState::default()),
            }),
        }
    }

    /// Root element searched by id lookups.
    pub fn set_document(&self, root: ElementRc) {
        *self.inner.document.borrow_mut() = Some(root);
    }

    /// Host used for module paths.
    pub fn set_module_host(&self, host: Rc<dyn ModuleHost>) {
        *self.inner.modules.borrow_mut() = Some(host);
    }

    /// Classify a string key.
    #[must_use]
    pub fn classify(&self, key: &str) -> Source {
        let matches = |pattern: &Option<Regex>| pattern.as_ref().is_some_and(|re| re.is_match(key));
        if matches(&self.inner.remote_pattern) {
            Source::Remote
        } else if matches(&self.inner.module_pattern) {
            Source::Module
        } else {
            Source::Lookup
        }
    }

    /// Resolve `reference`, calling `done` now (cache hit, passthrough,
    /// synchronous lookup) or later (module load).
    pub fn resolve(
        &self,
        reference: ModelReference,
        done: impl FnOnce(Result<Resolved, ResolutionError>) + 'static,
    ) {
        let key = match reference {
            ModelReference::Instance(model) => {
                done(Ok(Resolved { model, key: None }));
                return;
            }
            ModelReference::Key(key) => key.trim().to_owned(),
        };
        if key.is_empty() {
            done(Err(ResolutionError::NotFound(key)));
            return;
        }

        let cached = {
            let mut state = self.inner.state.borrow_mut();
            let hit = state.cache.get(&key).cloned();
            if hit.is_some() {
                *state.counts.entry(key.clone()).or_insert(0) += 1;
            }
            hit
        };
        if let Some(model) = cached {
            tracing::trace!(%key, "model cache hit");
            done(Ok(Resolved {
                model,
                key: Some(key),
            }));
            return;
        }

        let load_id = {
            let mut state = self.inner.state.borrow_mut();
            if let Some(pending) = state.pending.get_mut(&key) {
                tracing::trace!(%key, "joining in-flight resolution");
                pending.waiters.push(Box::new(done));
                return;
            }
            state.next_load += 1;
            let load_id = state.next_load;
            state.pending.insert(
                key.clone(),
                PendingResolution {
                    load_id,
                    waiters: vec![Box::new(done)],
                    timer: None,
                },
            );
            load_id
        };
        self.start(key, load_id);
    }

    fn start(&self, key: String, load_id: u64) {
        match self.classify(&key) {
            Source::Remote => {
                let err = ResolutionError::RemotePath(key.clone());
                self.complete(&key, load_id, Err(err));
            }
            Source::Lookup => {
                let outcome = self.lookup(&key);
                self.complete(&key, load_id, outcome);
            }
            Source::Module => {
                let host = self.inner.modules.borrow().clone();
                let Some(host) = host else {
                    let err = ResolutionError::NoModuleHost(key.clone());
                    self.complete(&key, load_id, Err(err));
                    return;
                };
                self.arm_timeout(&key, load_id);
                tracing::debug!(%key, "loading model module");
                let weak = Rc::downgrade(&self.inner);
                let path = key.clone();
                host.load(
                    &key,
                    Box::new(move |result| {
                        let Some(loader) = upgrade(&weak) else {
                            return;
                        };
                        let outcome = match result {
                            Ok(module) => module
                                .entry()
                                .map(Export::instantiate)
                                .ok_or_else(|| ResolutionError::MissingExport(path.clone())),
                            Err(reason) => Err(ResolutionError::ModuleLoad {
                                path: path.clone(),
                                reason,
                            }),
                        };
                        loader.complete(&path, load_id, outcome);
                    }),
                );
            }
        }
    }

    fn arm_timeout(&self, key: &str, load_id: u64) {
        let Some(timeout) = self.inner.timeout else {
            return;
        };
        let weak = Rc::downgrade(&self.inner);
        let k = key.to_owned();
        let handle = self.inner.event_loop.set_timeout(timeout, move || {
            if let Some(loader) = upgrade(&weak) {
                tracing::warn!(key = %k, "model resolution timed out");
                loader.complete(&k, load_id, Err(ResolutionError::TimedOut(k.clone())));
            }
        });
        if let Some(pending) = self.inner.state.borrow_mut().pending.get_mut(key) {
            pending.timer = Some(handle);
        }
    }

    fn lookup(&self, key: &str) -> Result<ModelRc, ResolutionError> {
        let Some(selector) = Selector::parse(key) else {
            return self
                .inner
                .globals
                .lookup(key)
                .ok_or_else(|| ResolutionError::UnsupportedSelector(key.to_owned()));
        };
        let document = self.inner.document.borrow().clone();
        let element = document.and_then(|root| match &selector.tag {
            Some(name) if selector.is_bare_name() => find_by_id(&root, name),
            _ => selector.find_first(&root),
        });
        if let Some(model) = element.and_then(|element| element.as_model()) {
            return Ok(model);
        }
        if selector.tag.is_some() {
            if let Some(model) = self.inner.globals.lookup(key) {
                return Ok(model);
            }
        }
        Err(ResolutionError::NotFound(key.to_owned()))
    }

    fn complete(&self, key: &str, load_id: u64, outcome: Result<ModelRc, ResolutionError>) {
        let (waiters, timer) = {
            let mut state = self.inner.state.borrow_mut();
            if state.pending.get(key).is_none_or(|p| p.load_id != load_id) {
                tracing::trace!(%key, "ignoring stale completion");
                return;
            }
            let Some(pending) = state.pending.remove(key) else {
                return;
            };
            if let Ok(model) = &outcome {
                state.cache.insert(key.to_owned(), Rc::clone(model));
                *state.counts.entry(key.to_owned()).or_insert(0) += pending.waiters.len();
            }
            (pending.waiters, pending.timer)
        };
        if let Some(timer) = timer {
            self.inner.event_loop.clear_timeout(timer);
        }
        match &outcome {
            Ok(_) => tracing::debug!(%key, waiters = waiters.len(), "model resolved"),
            Err(err) => tracing::debug!(%key, %err, "model resolution failed"),
        }
        for waiter in waiters {
            waiter(outcome.clone().map(|model| Resolved {
                model,
                key: Some(key.to_owned()),
            }));
        }
    }

    /// Release one consumer of `key`. At zero the cache entry is purged.
    /// Returns the remaining count.
    pub fn decrement_ref(&self, key: &str) -> usize {
        let evicted = {
            let mut state = self.inner.state.borrow_mut();
            let Some(count) = state.counts.get_mut(key) else {
                return 0;
            };
            *count = count.saturating_sub(1);
            if *count > 0 {
                return *count;
            }
            state.counts.remove(key);
            state.cache.remove(key)
        };
        tracing::debug!(%key, "model released; cache entry purged");
        drop(evicted);
        0
    }

    /// Current consumer count of `key`.
    #[must_use]
    pub fn ref_count(&self, key: &str) -> usize {
        self.inner.state.borrow().counts.get(key).copied().unwrap_or(0)
    }

    /// Whether `key` has a cached instance.
    #[must_use]
    pub fn is_cached(&self, key: &str) -> bool {
        self.inner.state.borrow().cache.contains_key(key)
    }

    /// Whether a resolution of `key` is in flight.
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.state.borrow().pending.contains_key(key)
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|err| tracing::error!(%err, "invalid model path pattern"))
        .ok()
}

fn upgrade(weak: &Weak<LoaderInner>) -> Option<ModelLoader> {
    weak.upgrade().map(|inner| ModelLoader { inner })
}

impl fmt::Debug for ModelLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("ModelLoader")
            .field("cached", &state.cache.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}
