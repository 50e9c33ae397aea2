#![forbid(unsafe_code)]

//! Bindery: declarative model-to-element binding.
//!
//! A [`Directive`] links one property of a model to one element. Its
//! configuration is read from the attributes of a wrapper element; the bound
//! element is the wrapper's first non-wrapper descendant. A [`Group`] resolves
//! one model and shares it with every directive beneath it.
//!
//! All shared services live in an explicitly passed [`BindContext`]:
//!
//! | Service | Type |
//! |---------|------|
//! | scheduling cycles and timers | [`bindery_runtime::EventLoop`] |
//! | change notification | [`bindery_runtime::ChangeObserver`] |
//! | batched element writes | [`bindery_runtime::UpdateScheduler`] |
//! | model resolution, cache, counts | [`ModelLoader`] |
//! | global names and functions | [`Globals`] |
//! | error reporting | [`ErrorSink`] |
//!
//! Model mutations are never observed automatically. Code that changes a
//! model announces it with [`BindContext::update`] or
//! [`BindContext::update_defer`].
//!
//! ```
//! use bindery::{BindContext, Directive};
//! use bindery_core::{Node, ObjectModel};
//!
//! let ctx = BindContext::new();
//! let model = ObjectModel::new(serde_json::json!({"greeting": "Hello"}));
//! ctx.globals().define_instance("greeter", model.clone());
//!
//! let doc = Node::document();
//! let wrapper = Node::wrapper("bind-value")
//!     .with_attr("model", "greeter")
//!     .with_attr("property", "greeting");
//! let input = Node::new("input");
//! wrapper.append_child(&input);
//! doc.append_child(&wrapper);
//!
//! let directive = Directive::new(&ctx, wrapper.as_element());
//! directive.connected();
//! ctx.event_loop().run_until_idle();
//! assert_eq!(input.value(), "Hello");
//! ```

pub mod config;
pub mod context;
pub mod directive;
pub mod error;
pub mod globals;
pub mod group;
pub mod listeners;
pub mod loader;
pub mod modules;
pub mod settings;

pub use config::{BindingConfig, GroupConfig};
pub use context::{BindContext, BindContextBuilder};
pub use directive::{Directive, Phase};
pub use error::{BindError, CollectingSink, ErrorSink, ResolutionError, TracingSink};
pub use globals::{Factory, GlobalEntry, Globals};
pub use group::Group;
pub use listeners::ListenerGroup;
pub use loader::{ModelLoader, ModelReference, Resolved, Source};
pub use modules::{Export, Module, ModuleCallback, ModuleHost, StaticModules};
pub use settings::{ConfigError, EngineConfig};
