#![forbid(unsafe_code)]

//! The binding context: every shared service a directive or group talks to.
//!
//! One [`BindContext`] is created per host application and handed to each
//! [`Directive`](crate::Directive) and [`Group`](crate::Group) explicitly.
//! It owns the event loop, the change observer, the update scheduler, the
//! model loader, the global scope, and the error sink, and it exposes the
//! library operations [`BindContext::update`] and
//! [`BindContext::update_defer`].
//!
//! # Invariants
//!
//! 1. `update` publishes synchronously and never mutates the model.
//! 2. `update_defer` holds the model weakly; a model dropped before the
//!    delay elapses publishes nothing.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use ahash::AHashMap;
use bindery_core::{ElementRc, ModelRc, Value, element_key};
use bindery_runtime::{ChangeObserver, EventLoop, TimerHandle, UpdateScheduler};

use crate::error::{BindError, ErrorSink, TracingSink};
use crate::globals::Globals;
use crate::group::{Group, WeakGroup};
use crate::loader::ModelLoader;
use crate::modules::ModuleHost;
use crate::settings::EngineConfig;

/// Builder for [`BindContext`].
#[derive(Default)]
pub struct BindContextBuilder {
    settings: EngineConfig,
    event_loop: Option<EventLoop>,
    globals: Option<Rc<Globals>>,
    error_sink: Option<Rc<dyn ErrorSink>>,
    module_host: Option<Rc<dyn ModuleHost>>,
    document: Option<ElementRc>,
}

impl BindContextBuilder {
    #[must_use]
    pub fn settings(mut self, settings: EngineConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Share an existing event loop instead of creating one.
    #[must_use]
    pub fn event_loop(mut self, event_loop: EventLoop) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    #[must_use]
    pub fn globals(mut self, globals: Rc<Globals>) -> Self {
        self.globals = Some(globals);
        self
    }

    #[must_use]
    pub fn error_sink(mut self, sink: Rc<dyn ErrorSink>) -> Self {
        self.error_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn module_host(mut self, host: Rc<dyn ModuleHost>) -> Self {
        self.module_host = Some(host);
        self
    }

    #[must_use]
    pub fn document(mut self, root: ElementRc) -> Self {
        self.document = Some(root);
        self
    }

    #[must_use]
    pub fn build(self) -> BindContext {
        let event_loop = self.event_loop.unwrap_or_default();
        let globals = self.globals.unwrap_or_default();
        let loader = ModelLoader::new(event_loop.clone(), Rc::clone(&globals), &self.settings);
        if let Some(host) = self.module_host {
            loader.set_module_host(host);
        }
        if let Some(root) = self.document {
            loader.set_document(root);
        }
        BindContext {
            inner: Rc::new(ContextInner {
                scheduler: UpdateScheduler::new(event_loop.clone()),
                observer: ChangeObserver::new(),
                event_loop,
                loader,
                globals,
                error_sink: self.error_sink.unwrap_or_else(|| Rc::new(TracingSink)),
                groups: RefCell::new(AHashMap::new()),
                settings: self.settings,
            }),
        }
    }
}

struct ContextInner {
    settings: EngineConfig,
    event_loop: EventLoop,
    observer: ChangeObserver,
    scheduler: UpdateScheduler,
    loader: ModelLoader,
    globals: Rc<Globals>,
    error_sink: Rc<dyn ErrorSink>,
    groups: RefCell<AHashMap<usize, WeakGroup>>,
}

/// Shared services for directives and groups.
#[derive(Clone)]
pub struct BindContext {
    inner: Rc<ContextInner>,
}

impl BindContext {
    /// A context with default settings and a tracing error sink.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> BindContextBuilder {
        BindContextBuilder::default()
    }

    #[must_use]
    pub fn settings(&self) -> &EngineConfig {
        &self.inner.settings
    }

    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    #[must_use]
    pub fn observer(&self) -> &ChangeObserver {
        &self.inner.observer
    }

    #[must_use]
    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.inner.scheduler
    }

    #[must_use]
    pub fn loader(&self) -> &ModelLoader {
        &self.inner.loader
    }

    #[must_use]
    pub fn globals(&self) -> &Rc<Globals> {
        &self.inner.globals
    }

    /// Root element searched by `#id` and bare-id model references.
    pub fn set_document(&self, root: ElementRc) {
        self.inner.loader.set_document(root);
    }

    /// Hand an error to the sink.
    pub fn report(&self, error: &BindError) {
        self.inner.error_sink.report(error);
    }

    /// Announce that `path` on `model` now holds `value`. Every directive
    /// subscribed to that path schedules an element write. The model itself
    /// is not touched. Returns the number of subscribers notified.
    pub fn update(&self, model: &ModelRc, path: &str, value: &Value) -> usize {
        tracing::trace!(%path, "update");
        self.inner.observer.publish(model, path, value)
    }

    /// After `delay`, read the current value of `path` on `model` and
    /// publish it.
    pub fn update_defer(&self, model: &ModelRc, path: &str, delay: Duration) -> TimerHandle {
        let weak = Rc::downgrade(model);
        let observer = self.inner.observer.clone();
        let path = path.to_owned();
        self.inner.event_loop.set_timeout(delay, move || {
            let Some(model) = weak.upgrade() else {
                return;
            };
            let value = read_topic(&model, &path, false).unwrap_or(Value::Null);
            tracing::trace!(%path, "deferred update");
            observer.publish(&model, &path, &value);
        })
    }

    pub(crate) fn register_group(&self, host: &ElementRc, group: WeakGroup) {
        self.inner
            .groups
            .borrow_mut()
            .insert(element_key(host), group);
    }

    pub(crate) fn unregister_group(&self, host: &ElementRc) {
        self.inner.groups.borrow_mut().remove(&element_key(host));
    }

    /// Nearest connected group among the ancestors of `host`.
    pub(crate) fn group_for(&self, host: &ElementRc) -> Option<Group> {
        let mut node = host.parent();
        while let Some(current) = node {
            let found = self
                .inner
                .groups
                .borrow()
                .get(&element_key(&current))
                .and_then(WeakGroup::upgrade);
            if found.is_some() {
                return found;
            }
            node = current.parent();
        }
        None
    }
}

impl Default for BindContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BindContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindContext")
            .field("settings", &self.inner.settings)
            .field("loader", &self.inner.loader)
            .field("groups", &self.inner.groups.borrow().len())
            .finish()
    }
}

/// Read a binding topic from a model: an attribute on element-like models
/// when `attribute` is set, else a dotted property path. Property paths fall
/// back to the attribute of the same name.
pub(crate) fn read_topic(model: &ModelRc, topic: &str, attribute: bool) -> Option<Value> {
    if attribute {
        return model.get_attribute(topic).map(Value::String);
    }
    model
        .get(topic)
        .or_else(|| model.get_attribute(topic).map(Value::String))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_core::ObjectModel;
    use serde_json::json;
    use std::cell::Cell;

    #[test]
    fn update_publishes_without_mutating() {
        let ctx = BindContext::new();
        let model: ModelRc = ObjectModel::new(json!({"n": 1}));
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let _sub = ctx
            .observer()
            .subscribe(&model, "n", move |v| s.set(v.as_i64().unwrap_or(-1)));

        assert_eq!(ctx.update(&model, "n", &json!(7)), 1);
        assert_eq!(seen.get(), 7);
        assert_eq!(model.get("n"), Some(json!(1)));
    }

    #[test]
    fn update_defer_reads_the_value_at_fire_time() {
        let ctx = BindContext::new();
        let model: ModelRc = ObjectModel::new(json!({"n": 1}));
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let _sub = ctx
            .observer()
            .subscribe(&model, "n", move |v| s.set(v.as_i64().unwrap_or(-1)));

        ctx.update_defer(&model, "n", Duration::from_millis(30));
        model.set("n", json!(5)).unwrap();
        ctx.event_loop().advance(Duration::from_millis(29));
        assert_eq!(seen.get(), 0);
        ctx.event_loop().advance(Duration::from_millis(1));
        assert_eq!(seen.get(), 5);
    }

    #[test]
    fn update_defer_on_a_dropped_model_is_silent() {
        let ctx = BindContext::new();
        let model: ModelRc = ObjectModel::new(json!({"n": 1}));
        ctx.update_defer(&model, "n", Duration::from_millis(10));
        drop(model);
        ctx.event_loop().advance(Duration::from_millis(10));
        assert_eq!(ctx.event_loop().pending_timers(), 0);
        assert_eq!(ctx.observer().tracked_models(), 0);
    }
}
