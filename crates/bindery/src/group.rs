#![forbid(unsafe_code)]

//! Grouping container: one shared model for many descendant directives.
//!
//! A group resolves its `model` key once through the loader and hands the
//! instance to every directive registered beneath it. Directives that
//! register after resolution receive the model synchronously.
//!
//! Hosts connect a group before the directives inside it, the same order a
//! document tree delivers connection notifications in.
//!
//! # Invariants
//!
//! 1. A group holds at most one counted loader key and releases it exactly
//!    once per resolution (on disconnect or on a `model` change).
//! 2. Members are held weakly; a dropped directive is skipped.
//! 3. Before the key is released every member is detached from the model,
//!    so no member stays bound to an instance the loader has evicted. If
//!    the next reference fails, members wait without a model.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use bindery_core::{ElementRc, ModelRc};

use crate::config::GroupConfig;
use crate::context::BindContext;
use crate::directive::{Directive, WeakDirective};
use crate::error::{BindError, ResolutionError};
use crate::loader::{ModelReference, Resolved};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct GroupState {
    connected: bool,
    config: GroupConfig,
    generation: u64,
    explicit_model: Option<ModelRc>,
    model: Option<ModelRc>,
    counted_key: Option<String>,
    members: Vec<WeakDirective>,
}

struct GroupInner {
    id: u64,
    ctx: BindContext,
    host: ElementRc,
    this: Weak<GroupInner>,
    state: RefCell<GroupState>,
}

/// Weak handle kept in the context's group registry.
#[derive(Clone)]
pub(crate) struct WeakGroup(Weak<GroupInner>);

impl WeakGroup {
    pub(crate) fn upgrade(&self) -> Option<Group> {
        self.0.upgrade().map(|inner| Group { inner })
    }
}

/// A grouping container attached to a wrapper element.
#[derive(Clone)]
pub struct Group {
    inner: Rc<GroupInner>,
}

impl Group {
    #[must_use]
    pub fn new(ctx: &BindContext, host: ElementRc) -> Self {
        let inner = Rc::new_cyclic(|this| GroupInner {
            id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            ctx: ctx.clone(),
            host,
            this: this.clone(),
            state: RefCell::new(GroupState::default()),
        });
        Self { inner }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The shared model, once resolved.
    #[must_use]
    pub fn model(&self) -> Option<ModelRc> {
        self.inner.state.borrow().model.clone()
    }

    /// Live registered directives.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.inner
            .state
            .borrow()
            .members
            .iter()
            .filter(|m| m.upgrade().is_some())
            .count()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().connected
    }

    /// Host notification: the wrapper entered the document.
    pub fn connected(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.connected {
                return;
            }
            state.connected = true;
            state.config = GroupConfig::from_element(&*self.inner.host);
        }
        self.inner
            .ctx
            .register_group(&self.inner.host, WeakGroup(self.inner.this.clone()));
        self.lifecycle("connected");
        self.resolve();
    }

    /// Host notification: the wrapper left the document.
    ///
    /// Members stay registered; they are detached now and receive the model
    /// again if the group reconnects before they do.
    pub fn disconnected(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if !state.connected {
                return;
            }
            state.connected = false;
        }
        self.inner.ctx.unregister_group(&self.inner.host);
        self.detach_members();
        self.release();
        self.lifecycle("disconnected");
    }

    /// Host notification: attribute `name` of the wrapper changed.
    pub fn attribute_changed(&self, name: &str) {
        let config = GroupConfig::from_element(&*self.inner.host);
        let reresolve = {
            let mut state = self.inner.state.borrow_mut();
            if !state.connected || state.config == config {
                return;
            }
            let reresolve = name == "model" && state.config.model_ref != config.model_ref;
            state.config = config;
            reresolve
        };
        if reresolve {
            self.lifecycle("model reference changed");
            self.detach_members();
            self.release();
            self.resolve();
        }
    }

    /// Share `model` directly, bypassing the loader.
    pub fn set_model(&self, model: ModelRc) {
        let connected = {
            let mut state = self.inner.state.borrow_mut();
            state.explicit_model = Some(model);
            state.connected
        };
        if connected {
            self.detach_members();
            self.release();
            self.resolve();
        }
    }

    /// Add `directive`; it receives the model now if one is resolved.
    pub(crate) fn register(&self, directive: &Directive) {
        let model = {
            let mut state = self.inner.state.borrow_mut();
            let id = directive.id();
            state.members.retain(|m| m.id() != id && m.upgrade().is_some());
            state.members.push(directive.downgrade());
            state.model.clone()
        };
        self.lifecycle("directive registered");
        if let Some(model) = model {
            directive.assign_model(model);
        }
    }

    pub(crate) fn unregister(&self, directive: &Directive) {
        let id = directive.id();
        self.inner
            .state
            .borrow_mut()
            .members
            .retain(|m| m.id() != id);
    }

    fn resolve(&self) {
        let (reference, generation) = {
            let mut state = self.inner.state.borrow_mut();
            state.generation += 1;
            let reference = match (&state.explicit_model, &state.config.model_ref) {
                (Some(model), _) => Some(ModelReference::Instance(Rc::clone(model))),
                (None, Some(key)) => Some(ModelReference::Key(key.clone())),
                (None, None) => None,
            };
            (reference, state.generation)
        };
        let Some(reference) = reference else {
            self.inner.ctx.report(&BindError::Configuration(
                "group has no `model`".into(),
            ));
            return;
        };
        let weak = self.inner.this.clone();
        let loader = self.inner.ctx.loader().clone();
        let resolver = loader.clone();
        resolver.resolve(reference, move |result| match weak.upgrade() {
            Some(inner) => Group { inner }.on_resolved(generation, result),
            None => {
                if let Ok(Resolved { key: Some(key), .. }) = result {
                    loader.decrement_ref(&key);
                }
            }
        });
    }

    fn on_resolved(&self, generation: u64, result: Result<Resolved, ResolutionError>) {
        let current = {
            let state = self.inner.state.borrow();
            state.connected && state.generation == generation
        };
        if !current {
            if let Ok(Resolved { key: Some(key), .. }) = result {
                self.inner.ctx.loader().decrement_ref(&key);
            }
            return;
        }
        let resolved = match result {
            Ok(resolved) => resolved,
            Err(err) => {
                self.lifecycle("resolution failed");
                self.inner.ctx.report(&BindError::from(err));
                return;
            }
        };
        let members: Vec<Directive> = {
            let mut state = self.inner.state.borrow_mut();
            state.model = Some(Rc::clone(&resolved.model));
            state.counted_key = resolved.key;
            state.members.iter().filter_map(WeakDirective::upgrade).collect()
        };
        self.lifecycle("model resolved");
        for member in members {
            member.assign_model(Rc::clone(&resolved.model));
        }
    }

    fn detach_members(&self) {
        let members: Vec<Directive> = {
            let mut state = self.inner.state.borrow_mut();
            state.model = None;
            state.members.iter().filter_map(WeakDirective::upgrade).collect()
        };
        for member in members {
            member.detach_group_model();
        }
    }

    /// Drop the model and give back the counted key.
    fn release(&self) {
        let key = {
            let mut state = self.inner.state.borrow_mut();
            state.generation += 1;
            state.model = None;
            state.counted_key.take()
        };
        if let Some(key) = key {
            self.inner.ctx.loader().decrement_ref(&key);
        }
    }

    fn lifecycle(&self, what: &str) {
        let debug = self.inner.state.borrow().config.debug || self.inner.ctx.settings().debug;
        if debug {
            tracing::debug!(group = self.inner.id, "{what}");
        } else {
            tracing::trace!(group = self.inner.id, "{what}");
        }
    }
}

impl Drop for GroupInner {
    fn drop(&mut self) {
        if let Some(key) = self.state.get_mut().counted_key.take() {
            self.ctx.loader().decrement_ref(&key);
        }
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Group")
            .field("id", &self.inner.id)
            .field("model_ref", &state.config.model_ref)
            .field("resolved", &state.model.is_some())
            .field("members", &state.members.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectingSink;
    use bindery_core::{Element, Node, ObjectModel};
    use serde_json::json;

    #[test]
    fn group_without_model_reports() {
        let sink = Rc::new(CollectingSink::new());
        let ctx = BindContext::builder().error_sink(sink.clone()).build();
        let host = Node::wrapper("bind-group");
        let group = Group::new(&ctx, host.as_element());
        group.connected();
        assert!(group.model().is_none());
        assert!(matches!(sink.take()[..], [BindError::Configuration(_)]));
    }

    #[test]
    fn model_change_releases_the_old_key() {
        let ctx = BindContext::new();
        ctx.globals()
            .define_constructor("A", || ObjectModel::new(json!({})) as ModelRc);
        ctx.globals()
            .define_constructor("B", || ObjectModel::new(json!({})) as ModelRc);
        let host = Node::wrapper("bind-group").with_attr("model", "A");
        let group = Group::new(&ctx, host.as_element());
        group.connected();
        assert_eq!(ctx.loader().ref_count("A"), 1);

        Element::set_attribute(&*host, "model", "B");
        group.attribute_changed("model");
        assert_eq!(ctx.loader().ref_count("A"), 0);
        assert_eq!(ctx.loader().ref_count("B"), 1);

        group.disconnected();
        group.disconnected();
        assert_eq!(ctx.loader().ref_count("B"), 0);
    }

    #[test]
    fn failed_resolution_reports() {
        let sink = Rc::new(CollectingSink::new());
        let ctx = BindContext::builder().error_sink(sink.clone()).build();
        let host = Node::wrapper("bind-group").with_attr("model", "nowhere");
        let group = Group::new(&ctx, host.as_element());
        group.connected();
        assert!(matches!(
            sink.take()[..],
            [BindError::Resolution(ResolutionError::NotFound(_))]
        ));
    }
}
