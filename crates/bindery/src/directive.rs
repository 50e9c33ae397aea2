#![forbid(unsafe_code)]

//! The binding directive: one model-to-element link.
//!
//! A directive is attached to a wrapper element. Its configuration lives in
//! the wrapper's attributes (see [`crate::config`]); its bind target is the
//! first non-wrapper element on the wrapper's first-child chain.
//!
//! ```text
//! Disconnected ──connected──▶ AwaitingTarget ──children_changed──┐
//!      ▲                           │ (target present)            │
//!      │                           ▼                             ▼
//!      │                      Initializing ──model resolved──▶ Active
//!      │                                                        │  ▲
//!      │                                   attribute_changed    ▼  │
//!      └──────────disconnected──────────────────────── Reinitializing
//! ```
//!
//! `Aborted` is entered on configuration, binding-target, and resolution
//! errors. Only a configuration change leaves it.
//!
//! # Directions
//!
//! * Element to model (unless `pull`): the configured event reads a value
//!   from the target, optionally debounced (trailing, `throttle`), skips the
//!   write when the model already holds a loosely equal value, writes, then
//!   publishes. With `func` the event invokes the function instead.
//! * Model to element (unless `push`): published changes are handed to the
//!   [`UpdateScheduler`](bindery_runtime::UpdateScheduler), optionally rate
//!   limited (leading edge, `throttle`). With `once` only the first element
//!   write happens.
//!
//! The same `throttle` value debounces input (trailing) and rate-limits
//! output (leading, then one trailing write).
//!
//! # Invariants
//!
//! 1. A `push` directive holds no subscription; a `pull` directive holds no
//!    element listener.
//! 2. A `once` directive performs at most one element write in its lifetime.
//! 3. Every callback captured during one initialization carries its
//!    generation; after teardown those callbacks are no-ops.
//! 4. A counted loader key is released exactly once, after the directive's
//!    listeners and subscription are gone.
//! 5. A rebuild whose `model` key is unchanged keeps the instance and its
//!    count; a replaced key is released only after the new source has been
//!    wired or requested.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | no `model` and no enclosing group | `Configuration` error, `Aborted` |
//! | no `property`, `model-attr` or `func` | `Configuration` error, `Aborted` |
//! | wrapper chain ends without an element | `BindingTarget` error, `Aborted` |
//! | model resolution fails | `Resolution` error, `Aborted` |
//! | `func` path unresolved | `ExecutionWarning`, interaction dropped |
//! | model rejects a write | logged at `warn`, nothing published |

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bindery_core::{
    Capabilities, ElementRc, Event, Interaction, ModelRc, TargetSearch, Value, display_string,
    find_target, loose_eq, read_element, write_element,
};
use bindery_runtime::{Subscription, TimerHandle, UpdateReason, UpdateTarget};

use crate::config::{BindingConfig, DIRECTIVE_KEYS};
use crate::context::{BindContext, read_topic};
use crate::error::{BindError, ResolutionError};
use crate::group::Group;
use crate::listeners::ListenerGroup;
use crate::loader::{ModelLoader, ModelReference, Resolved};
use crate::settings::EngineConfig;

static NEXT_DIRECTIVE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle phase of a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Disconnected,
    /// Connected, waiting for a child to appear.
    AwaitingTarget,
    /// First initialization, waiting for a model.
    Initializing,
    /// Rebuilding after a configuration or model change.
    Reinitializing,
    Active,
    /// Stopped on an error until the configuration changes.
    Aborted,
}

impl Phase {
    fn is_initializing(self) -> bool {
        matches!(self, Self::Initializing | Self::Reinitializing)
    }
}

#[derive(Default)]
struct RateLimit {
    last_output: Option<Duration>,
    pending: Option<Value>,
    timer: Option<TimerHandle>,
}

struct DirectiveState {
    phase: Phase,
    connected: bool,
    config: BindingConfig,
    generation: u64,
    explicit_model: Option<ModelRc>,
    target: Option<ElementRc>,
    model: Option<ModelRc>,
    counted_key: Option<String>,
    group: Option<Group>,
    listeners: Option<ListenerGroup>,
    subscription: Option<Subscription>,
    watching_children: bool,
    once_fired: bool,
    element_writes: usize,
    debounce: Option<TimerHandle>,
    rate: RateLimit,
}

pub(crate) struct DirectiveInner {
    id: u64,
    ctx: BindContext,
    host: ElementRc,
    this: Weak<DirectiveInner>,
    state: RefCell<DirectiveState>,
}

/// Weak handle kept by groups.
#[derive(Clone)]
pub(crate) struct WeakDirective {
    id: u64,
    inner: Weak<DirectiveInner>,
}

impl WeakDirective {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn upgrade(&self) -> Option<Directive> {
        self.inner.upgrade().map(|inner| Directive { inner })
    }
}

/// A binding directive attached to a wrapper element.
#[derive(Clone)]
pub struct Directive {
    inner: Rc<DirectiveInner>,
}

impl Directive {
    /// Create a directive for the wrapper `host`. Nothing happens until the
    /// host calls [`Directive::connected`].
    #[must_use]
    pub fn new(ctx: &BindContext, host: ElementRc) -> Self {
        let inner = Rc::new_cyclic(|this| DirectiveInner {
            id: NEXT_DIRECTIVE_ID.fetch_add(1, Ordering::Relaxed),
            ctx: ctx.clone(),
            host,
            this: this.clone(),
            state: RefCell::new(DirectiveState {
                phase: Phase::Disconnected,
                connected: false,
                config: BindingConfig::default(),
                generation: 0,
                explicit_model: None,
                target: None,
                model: None,
                counted_key: None,
                group: None,
                listeners: None,
                subscription: None,
                watching_children: false,
                once_fired: false,
                element_writes: 0,
                debounce: None,
                rate: RateLimit::default(),
            }),
        });
        Self { inner }
    }

    /// Process-unique id, used in log fields.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.state.borrow().phase
    }

    /// The model currently bound, once active.
    #[must_use]
    pub fn model(&self) -> Option<ModelRc> {
        self.inner.state.borrow().model.clone()
    }

    /// The bind target, once found.
    #[must_use]
    pub fn target(&self) -> Option<ElementRc> {
        self.inner.state.borrow().target.clone()
    }

    /// The configuration parsed at the last (re)initialization.
    #[must_use]
    pub fn config(&self) -> BindingConfig {
        self.inner.state.borrow().config.clone()
    }

    /// Element writes performed so far.
    #[must_use]
    pub fn element_writes(&self) -> usize {
        self.inner.state.borrow().element_writes
    }

    #[must_use]
    pub fn host(&self) -> &ElementRc {
        &self.inner.host
    }

    /// Host notification: the wrapper entered the document.
    pub fn connected(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.connected {
                return;
            }
            state.connected = true;
            state.config = BindingConfig::from_element(&*self.inner.host);
        }
        self.lifecycle("connected");
        self.initialize(Phase::Initializing);
    }

    /// Host notification: the wrapper left the document.
    pub fn disconnected(&self) {
        if !self.inner.state.borrow().connected {
            return;
        }
        self.teardown();
        {
            let mut state = self.inner.state.borrow_mut();
            state.connected = false;
            state.phase = Phase::Disconnected;
            state.watching_children = false;
        }
        self.lifecycle("disconnected");
    }

    /// Host notification: attribute `name` of the wrapper changed.
    pub fn attribute_changed(&self, name: &str) {
        if !DIRECTIVE_KEYS.contains(&name) {
            return;
        }
        let config = BindingConfig::from_element(&*self.inner.host);
        let rebuild = {
            let mut state = self.inner.state.borrow_mut();
            if !state.connected || state.config == config {
                return;
            }
            let rebuild = BindingConfig::rewires_on(name) || state.phase == Phase::Aborted;
            state.config = config;
            rebuild
        };
        if rebuild {
            self.lifecycle("configuration changed; rebuilding");
            let held = self.teardown_holding();
            self.initialize_with(Phase::Reinitializing, held);
        } else {
            self.lifecycle("configuration updated in place");
        }
    }

    /// Host notification: the wrapper's children changed. Only acted on
    /// while waiting for a bind target, and only once.
    pub fn children_changed(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if !state.watching_children {
                return;
            }
            state.watching_children = false;
        }
        self.lifecycle("child appeared");
        self.initialize(Phase::Initializing);
    }

    /// Bind to `model` directly, bypassing the loader and any group.
    pub fn set_model(&self, model: ModelRc) {
        let connected = {
            let mut state = self.inner.state.borrow_mut();
            state.explicit_model = Some(model);
            state.connected
        };
        if connected {
            let held = self.teardown_holding();
            self.initialize_with(Phase::Reinitializing, held);
        }
    }

    /// Model supplied by the enclosing group. Only taken while waiting for
    /// one; a group swaps models through [`Directive::detach_group_model`].
    pub(crate) fn assign_model(&self, model: ModelRc) {
        if self.phase().is_initializing() {
            self.activate(model);
        }
    }

    /// The enclosing group is giving up its model: drop every wire to it and
    /// wait, still registered, for the next one.
    pub(crate) fn detach_group_model(&self) {
        if self.phase() != Phase::Active {
            return;
        }
        self.unwire();
        self.inner.state.borrow_mut().phase = Phase::Reinitializing;
        self.lifecycle("group model withdrawn");
    }

    pub(crate) fn downgrade(&self) -> WeakDirective {
        WeakDirective {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn initialize(&self, phase: Phase) {
        self.initialize_with(phase, None);
    }

    /// Initialize, reusing `held` when the configured key still names it.
    /// An unused `held` is released only after the new source is wired or
    /// requested.
    fn initialize_with(&self, phase: Phase, mut held: Option<Resolved>) {
        self.start(phase, &mut held);
        if let Some(unused) = held {
            release(self.inner.ctx.loader(), Ok(unused));
        }
    }

    fn start(&self, phase: Phase, held: &mut Option<Resolved>) {
        let (config, explicit) = {
            let mut state = self.inner.state.borrow_mut();
            state.generation += 1;
            (state.config.clone(), state.explicit_model.clone())
        };

        let group = if explicit.is_none() && config.model_ref.is_none() {
            self.inner.ctx.group_for(&self.inner.host)
        } else {
            None
        };
        if explicit.is_none() && config.model_ref.is_none() && group.is_none() {
            self.abort(BindError::Configuration(
                "directive has no `model` and no enclosing group".into(),
            ));
            return;
        }
        if config.topic().is_none() && config.func.is_none() {
            self.abort(BindError::Configuration(
                "directive needs `property`, `model-attr`, or `func`".into(),
            ));
            return;
        }

        let target = match find_target(&self.inner.host) {
            TargetSearch::Found(target) => target,
            TargetSearch::Empty => {
                let mut state = self.inner.state.borrow_mut();
                state.phase = Phase::AwaitingTarget;
                state.watching_children = true;
                drop(state);
                self.lifecycle("waiting for a bind target");
                return;
            }
            TargetSearch::Missing => {
                self.abort(BindError::BindingTarget(format!(
                    "<{}> contains no bindable element",
                    self.inner.host.tag()
                )));
                return;
            }
        };

        let generation = {
            let mut state = self.inner.state.borrow_mut();
            state.phase = phase;
            state.target = Some(target);
            state.group = group.clone();
            state.generation
        };
        self.lifecycle("initializing");

        if let Some(model) = explicit {
            self.activate(model);
        } else if let Some(group) = group {
            group.register(self);
        } else if let Some(key) = config.model_ref {
            if let Some(kept) = held.take_if(|h| h.key.as_deref() == Some(key.as_str())) {
                self.lifecycle("keeping resolved model");
                self.inner.state.borrow_mut().counted_key = kept.key;
                self.activate(kept.model);
                return;
            }
            let weak = self.inner.this.clone();
            let loader = self.inner.ctx.loader().clone();
            let resolver = loader.clone();
            resolver.resolve(ModelReference::Key(key), move |result| {
                match weak.upgrade() {
                    Some(inner) => Directive { inner }.on_resolved(generation, result),
                    None => release(&loader, result),
                }
            });
        }
    }

    fn on_resolved(&self, generation: u64, result: Result<Resolved, ResolutionError>) {
        let current = {
            let state = self.inner.state.borrow();
            state.connected && state.generation == generation && state.phase.is_initializing()
        };
        if !current {
            release(self.inner.ctx.loader(), result);
            return;
        }
        match result {
            Ok(resolved) => {
                self.inner.state.borrow_mut().counted_key = resolved.key;
                self.activate(resolved.model);
            }
            Err(err) => self.abort(err.into()),
        }
    }

    fn activate(&self, model: ModelRc) {
        let (target, config, generation) = {
            let mut state = self.inner.state.borrow_mut();
            let Some(target) = state.target.clone() else {
                return;
            };
            state.phase = Phase::Active;
            state.model = Some(Rc::clone(&model));
            (target, state.config.clone(), state.generation)
        };
        self.lifecycle("active");

        if !config.pull {
            let event = config
                .event
                .clone()
                .unwrap_or_else(|| default_event(target.capabilities(), self.inner.ctx.settings()));
            let listeners = ListenerGroup::new();
            let weak = self.inner.this.clone();
            listeners.listen(&target, &event, move |ev| {
                if let Some(inner) = weak.upgrade() {
                    Directive { inner }.on_element_event(generation, ev);
                }
            });
            self.inner.state.borrow_mut().listeners = Some(listeners);
        }

        if config.push {
            return;
        }
        let Some(topic) = config.topic() else {
            return;
        };
        let weak = self.inner.this.clone();
        let subscription = self.inner.ctx.observer().subscribe(&model, topic, move |value| {
            if let Some(inner) = weak.upgrade() {
                Directive { inner }.on_model_change(generation, value.clone());
            }
        });
        self.inner.state.borrow_mut().subscription = Some(subscription);

        if let Some(value) = read_topic(&model, topic, config.model_attr.is_some()) {
            self.schedule(value, UpdateReason::InitialSync);
        }
    }

    fn on_element_event(&self, generation: u64, event: &Event) {
        let (target, config) = {
            let state = self.inner.state.borrow();
            if state.generation != generation || state.phase != Phase::Active {
                return;
            }
            let Some(target) = state.target.clone() else {
                return;
            };
            (target, state.config.clone())
        };
        let value = read_element(&*target, config.read_attr(), Some(event));

        let Some(delay) = config.throttle else {
            self.commit(&event.name, value);
            return;
        };
        let weak = self.inner.this.clone();
        let name = event.name.clone();
        let timer = self.inner.ctx.event_loop().set_timeout(delay, move || {
            if let Some(inner) = weak.upgrade() {
                let directive = Directive { inner };
                let current = {
                    let mut state = directive.inner.state.borrow_mut();
                    state.debounce = None;
                    state.generation == generation && state.phase == Phase::Active
                };
                if current {
                    directive.commit(&name, value);
                }
            }
        });
        let previous = self
            .inner
            .state
            .borrow_mut()
            .debounce
            .replace(timer);
        if let Some(previous) = previous {
            self.inner.ctx.event_loop().clear_timeout(previous);
        }
    }

    /// Element-to-model write, or function invocation in `func` mode.
    fn commit(&self, event: &str, value: Value) {
        let (model, target, config) = {
            let state = self.inner.state.borrow();
            let (Some(model), Some(target)) = (state.model.clone(), state.target.clone()) else {
                return;
            };
            (model, target, state.config.clone())
        };

        if let Some(path) = &config.func {
            let function = model
                .function(path)
                .or_else(|| self.inner.ctx.globals().function(path));
            match function {
                Some(function) => {
                    self.lifecycle("invoking function");
                    function(&Interaction {
                        event: event.to_owned(),
                        value,
                        target_id: target.element_id(),
                    });
                }
                None => self.inner.ctx.report(&BindError::ExecutionWarning(format!(
                    "function '{path}' not found on the model or in the global scope"
                ))),
            }
            return;
        }

        let Some(topic) = config.topic() else {
            return;
        };
        let is_attr = config.model_attr.is_some();
        if read_topic(&model, topic, is_attr).is_some_and(|old| loose_eq(&old, &value)) {
            tracing::trace!(directive = self.inner.id, %topic, "model already holds value");
            return;
        }
        if is_attr {
            if !model.set_attribute(topic, &display_string(&value)) {
                tracing::warn!(directive = self.inner.id, %topic, "model has no attributes");
                return;
            }
        } else if let Err(err) = model.set(topic, value.clone()) {
            tracing::warn!(directive = self.inner.id, %topic, %err, "model write rejected");
            return;
        }
        self.inner.ctx.observer().publish(&model, topic, &value);
    }

    fn on_model_change(&self, generation: u64, value: Value) {
        let throttle = {
            let state = self.inner.state.borrow();
            if state.generation != generation || state.phase != Phase::Active || state.once_fired {
                return;
            }
            state.config.throttle
        };
        let Some(interval) = throttle else {
            self.schedule(value, UpdateReason::ModelChanged);
            return;
        };

        let now = self.inner.ctx.event_loop().now();
        let remaining = {
            let mut state = self.inner.state.borrow_mut();
            let elapsed = state.rate.last_output.map(|last| now.saturating_sub(last));
            match elapsed {
                Some(elapsed) if elapsed < interval => {
                    state.rate.pending = Some(value);
                    if state.rate.timer.is_some() {
                        None
                    } else {
                        Some(interval - elapsed)
                    }
                }
                _ => {
                    state.rate.last_output = Some(now);
                    drop(state);
                    self.schedule(value, UpdateReason::ModelChanged);
                    return;
                }
            }
        };
        let Some(remaining) = remaining else {
            return;
        };
        let weak = self.inner.this.clone();
        let timer = self.inner.ctx.event_loop().set_timeout(remaining, move || {
            if let Some(inner) = weak.upgrade() {
                Directive { inner }.release_rate_limited(generation);
            }
        });
        self.inner.state.borrow_mut().rate.timer = Some(timer);
    }

    fn release_rate_limited(&self, generation: u64) {
        let now = self.inner.ctx.event_loop().now();
        let pending = {
            let mut state = self.inner.state.borrow_mut();
            state.rate.timer = None;
            if state.generation != generation || state.phase != Phase::Active {
                return;
            }
            let pending = state.rate.pending.take();
            if pending.is_some() {
                state.rate.last_output = Some(now);
            }
            pending
        };
        if let Some(value) = pending {
            self.schedule(value, UpdateReason::RateLimited);
        }
    }

    fn schedule(&self, value: Value, reason: UpdateReason) {
        let target: Rc<dyn UpdateTarget> = self.inner.clone();
        self.inner.ctx.scheduler().add(&target, value, reason);
    }

    fn abort(&self, error: BindError) {
        self.inner.state.borrow_mut().phase = Phase::Aborted;
        self.lifecycle("aborted");
        self.inner.ctx.report(&error);
    }

    /// Detach listeners, subscription and timers, then release the counted
    /// loader key. Group membership is kept.
    fn unwire(&self) {
        if let Some(held) = self.unwire_holding() {
            release(self.inner.ctx.loader(), Ok(held));
        }
    }

    /// [`Directive::unwire`] without the release: a loader-counted model is
    /// handed back and the caller owes its key.
    fn unwire_holding(&self) -> Option<Resolved> {
        let (listeners, subscription, timers, model, key) = {
            let mut state = self.inner.state.borrow_mut();
            state.generation += 1;
            let timers = [
                state.debounce.take(),
                state.rate.timer.take(),
            ];
            state.rate.pending = None;
            (
                state.listeners.take(),
                state.subscription.take(),
                timers,
                state.model.take(),
                state.counted_key.take(),
            )
        };
        if let Some(listeners) = listeners {
            listeners.abort();
        }
        drop(subscription);
        for timer in timers.into_iter().flatten() {
            self.inner.ctx.event_loop().clear_timeout(timer);
        }
        let key = key?;
        match model {
            Some(model) => Some(Resolved {
                model,
                key: Some(key),
            }),
            None => {
                self.inner.ctx.loader().decrement_ref(&key);
                None
            }
        }
    }

    fn teardown(&self) {
        if let Some(held) = self.teardown_holding() {
            release(self.inner.ctx.loader(), Ok(held));
        }
    }

    /// Full teardown that hands back a loader-counted model instead of
    /// releasing it.
    fn teardown_holding(&self) -> Option<Resolved> {
        let held = self.unwire_holding();
        let group = {
            let mut state = self.inner.state.borrow_mut();
            state.target = None;
            state.group.take()
        };
        if let Some(group) = group {
            group.unregister(self);
        }
        held
    }

    fn lifecycle(&self, what: &str) {
        let (phase, debug) = {
            let state = self.inner.state.borrow();
            (state.phase, state.config.debug || self.inner.ctx.settings().debug)
        };
        if debug {
            tracing::debug!(directive = self.inner.id, ?phase, "{what}");
        } else {
            tracing::trace!(directive = self.inner.id, ?phase, "{what}");
        }
    }
}

impl UpdateTarget for DirectiveInner {
    fn is_mounted(&self) -> bool {
        let state = self.state.borrow();
        state.connected
            && state.phase == Phase::Active
            && state.target.as_ref().is_some_and(|t| t.is_mounted())
    }

    fn apply_update(&self, value: Value, reason: UpdateReason) {
        let (target, attrs) = {
            let state = self.state.borrow();
            if state.once_fired {
                return;
            }
            let Some(target) = state.target.clone() else {
                return;
            };
            let attrs: Vec<Option<String>> = if state.config.elem_attrs.is_empty() {
                vec![None]
            } else {
                state.config.elem_attrs.iter().cloned().map(Some).collect()
            };
            (target, attrs)
        };
        let delimiter = self.ctx.settings().list_delimiter;
        let mut wrote = false;
        for attr in &attrs {
            let attr = attr.as_deref();
            if renders_same(&read_element(&*target, attr, None), &value) {
                continue;
            }
            write_element(&*target, attr, &value, delimiter);
            wrote = true;
        }
        if !wrote {
            tracing::trace!(directive = self.id, ?reason, "element already up to date");
            return;
        }
        let mut state = self.state.borrow_mut();
        state.element_writes += 1;
        if state.config.once {
            state.once_fired = true;
        }
        tracing::trace!(directive = self.id, ?reason, writes = state.element_writes, "element written");
    }
}

impl Drop for DirectiveInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(listeners) = state.listeners.take() {
            listeners.abort();
        }
        state.subscription = None;
        if let Some(key) = state.counted_key.take() {
            self.ctx.loader().decrement_ref(&key);
        }
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Directive")
            .field("id", &self.inner.id)
            .field("phase", &state.phase)
            .field("model_ref", &state.config.model_ref)
            .field("topic", &state.config.topic())
            .field("element_writes", &state.element_writes)
            .finish()
    }
}

/// Event listened for when `event` is not configured.
fn default_event(caps: Capabilities, settings: &EngineConfig) -> String {
    if caps.intersects(Capabilities::TOGGLE | Capabilities::OPTIONS | Capabilities::MULTI_SELECT) {
        settings.change_event.clone()
    } else {
        settings.input_event.clone()
    }
}

/// Whether an element showing `current` already shows `value`. Stricter
/// than [`loose_eq`]: `""` and `0` differ here.
fn renders_same(current: &Value, value: &Value) -> bool {
    current == value || display_string(current) == display_string(value)
}

/// Give back a counted key delivered to a directive that no longer wants it.
fn release(loader: &ModelLoader, result: Result<Resolved, ResolutionError>) {
    if let Ok(Resolved { key: Some(key), .. }) = result {
        loader.decrement_ref(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectingSink;
    use bindery_core::{Node, ObjectModel};
    use serde_json::json;
    use tracing_test::traced_test;

    struct Fixture {
        ctx: BindContext,
        sink: Rc<CollectingSink>,
        doc: Rc<Node>,
    }

    fn fixture() -> Fixture {
        let sink = Rc::new(CollectingSink::new());
        let doc = Node::document();
        let ctx = BindContext::builder()
            .error_sink(sink.clone())
            .document(doc.as_element())
            .build();
        Fixture { ctx, sink, doc }
    }

    fn wrap(doc: &Rc<Node>, attrs: &[(&str, &str)], child: Option<&Rc<Node>>) -> Rc<Node> {
        let wrapper = Node::wrapper("bind-value");
        for (k, v) in attrs {
            bindery_core::Element::set_attribute(&*wrapper, k, v);
        }
        if let Some(child) = child {
            wrapper.append_child(child);
        }
        doc.append_child(&wrapper);
        wrapper
    }

    #[test]
    fn element_comparison_is_by_rendered_text() {
        assert!(loose_eq(&json!(""), &json!(0)));
        assert!(!renders_same(&json!(""), &json!(0)));
        assert!(renders_same(&json!("1"), &json!(1)));
        assert!(renders_same(&json!(["a", "b"]), &json!("a,b")));
    }

    #[test]
    #[traced_test]
    fn debug_flag_logs_lifecycle_at_debug() {
        let f = fixture();
        f.ctx.globals().define_instance("m", ObjectModel::new(json!({"x": 1})));
        let input = Node::new("input");
        let host = wrap(
            &f.doc,
            &[("model", "m"), ("property", "x"), ("debug", "")],
            Some(&input),
        );
        let d = Directive::new(&f.ctx, host.as_element());
        d.connected();
        assert!(logs_contain("DEBUG"));
        assert!(logs_contain("active"));
    }

    #[test]
    fn default_event_follows_capabilities() {
        let settings = EngineConfig::default();
        assert_eq!(default_event(Capabilities::VALUE, &settings), "input");
        assert_eq!(
            default_event(Capabilities::VALUE | Capabilities::TOGGLE, &settings),
            "change"
        );
        assert_eq!(
            default_event(Capabilities::VALUE | Capabilities::OPTIONS, &settings),
            "change"
        );
    }

    #[test]
    fn missing_model_is_a_configuration_error() {
        let f = fixture();
        let input = Node::new("input");
        let host = wrap(&f.doc, &[("property", "name")], Some(&input));
        let d = Directive::new(&f.ctx, host.as_element());
        d.connected();
        assert_eq!(d.phase(), Phase::Aborted);
        assert!(matches!(f.sink.take()[..], [BindError::Configuration(_)]));
    }

    #[test]
    fn wrapper_without_element_is_a_target_error() {
        let f = fixture();
        f.ctx.globals().define_instance("m", ObjectModel::new(json!({})));
        let inner = Node::wrapper("bind-value");
        let host = wrap(&f.doc, &[("model", "m"), ("property", "x")], Some(&inner));
        let d = Directive::new(&f.ctx, host.as_element());
        d.connected();
        assert_eq!(d.phase(), Phase::Aborted);
        assert!(matches!(f.sink.take()[..], [BindError::BindingTarget(_)]));
    }

    #[test]
    fn nested_wrappers_are_skipped() {
        let f = fixture();
        f.ctx
            .globals()
            .define_instance("m", ObjectModel::new(json!({"x": "deep"})));
        let inner = Node::wrapper("bind-value");
        let input = Node::new("input");
        inner.append_child(&input);
        let host = wrap(&f.doc, &[("model", "m"), ("property", "x")], Some(&inner));
        let d = Directive::new(&f.ctx, host.as_element());
        d.connected();
        f.ctx.event_loop().run_until_idle();
        assert_eq!(d.phase(), Phase::Active);
        assert_eq!(input.value(), "deep");
    }

    #[test]
    fn structural_watch_fires_once() {
        let f = fixture();
        f.ctx
            .globals()
            .define_instance("m", ObjectModel::new(json!({"x": "late"})));
        let host = wrap(&f.doc, &[("model", "m"), ("property", "x")], None);
        let d = Directive::new(&f.ctx, host.as_element());
        d.connected();
        assert_eq!(d.phase(), Phase::AwaitingTarget);

        let input = Node::new("input");
        host.append_child(&input);
        d.children_changed();
        f.ctx.event_loop().run_until_idle();
        assert_eq!(d.phase(), Phase::Active);
        assert_eq!(input.value(), "late");
        assert_eq!(input.listener_count(), 1);

        d.children_changed();
        assert_eq!(input.listener_count(), 1);
    }

    #[test]
    fn teardown_releases_everything() {
        let f = fixture();
        f.ctx
            .globals()
            .define_constructor("Store", || ObjectModel::new(json!({"x": 1})) as ModelRc);
        let input = Node::new("input");
        let host = wrap(&f.doc, &[("model", "Store"), ("property", "x")], Some(&input));
        let d = Directive::new(&f.ctx, host.as_element());
        d.connected();
        let model = d.model().unwrap();
        assert_eq!(f.ctx.loader().ref_count("Store"), 1);
        assert_eq!(f.ctx.observer().subscriber_count(&model, "x"), 1);

        d.disconnected();
        assert_eq!(d.phase(), Phase::Disconnected);
        assert_eq!(input.listener_count(), 0);
        assert_eq!(f.ctx.observer().subscriber_count(&model, "x"), 0);
        assert_eq!(f.ctx.loader().ref_count("Store"), 0);
        assert!(!f.ctx.loader().is_cached("Store"));
    }

    #[test]
    fn dropping_a_connected_directive_releases_its_key() {
        let f = fixture();
        f.ctx
            .globals()
            .define_constructor("Store", || ObjectModel::new(json!({})) as ModelRc);
        let input = Node::new("input");
        let host = wrap(&f.doc, &[("model", "Store"), ("property", "x")], Some(&input));
        let d = Directive::new(&f.ctx, host.as_element());
        d.connected();
        assert_eq!(f.ctx.loader().ref_count("Store"), 1);
        drop(d);
        assert_eq!(f.ctx.loader().ref_count("Store"), 0);
        assert_eq!(input.listener_count(), 0);
    }

    #[test]
    fn function_mode_invokes_instead_of_writing() {
        let f = fixture();
        let model = ObjectModel::new(json!({"name": "a"}));
        let calls = Rc::new(RefCell::new(Vec::new()));
        let c = Rc::clone(&calls);
        model.define_function("onInput", move |i: &Interaction| {
            c.borrow_mut().push((i.event.clone(), i.value.clone()));
        });
        let input = Node::new("input").with_id("field");
        let host = wrap(
            &f.doc,
            &[("property", "name"), ("func", "onInput")],
            Some(&input),
        );
        let d = Directive::new(&f.ctx, host.as_element());
        d.set_model(model.clone());
        d.connected();

        input.input("typed");
        assert_eq!(*calls.borrow(), vec![("input".to_owned(), json!("typed"))]);
        assert_eq!(model.snapshot(), json!({"name": "a"}));
    }

    #[test]
    fn unresolved_function_is_a_warning() {
        let f = fixture();
        let input = Node::new("input");
        let host = wrap(&f.doc, &[("func", "nope.missing")], Some(&input));
        let d = Directive::new(&f.ctx, host.as_element());
        d.set_model(ObjectModel::new(json!({})));
        d.connected();
        input.input("x");
        let errors = f.sink.take();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_warning());
        assert_eq!(d.phase(), Phase::Active);
    }
}
