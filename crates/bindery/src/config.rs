#![forbid(unsafe_code)]

//! Declarative configuration read from a wrapper's attributes.
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `model` | model reference: module path, element selector/id, or global name |
//! | `property` | dotted property path on the model |
//! | `model-attr` | attribute on an element-like model, instead of `property` |
//! | `elem-attr` | comma-separated element properties/attributes to write (first one is read) |
//! | `event` | element event that drives model writes |
//! | `func` | dotted function path invoked on interaction instead of writing |
//! | `pull` | model drives element only |
//! | `push` | element drives model only |
//! | `once` | at most one element write |
//! | `throttle` | milliseconds: input debounce and output rate limit |
//! | `debug` | verbose lifecycle logging |
//!
//! Boolean keys are on when present, unless their value is `"false"`.

use std::time::Duration;

use bindery_core::Element;

/// Keys understood by a directive.
pub const DIRECTIVE_KEYS: &[&str] = &[
    "model",
    "property",
    "model-attr",
    "elem-attr",
    "event",
    "func",
    "pull",
    "push",
    "once",
    "throttle",
    "debug",
];

/// Keys whose change tears a live directive down and rebuilds it.
const REWIRE_KEYS: &[&str] = &["model", "property", "model-attr", "event", "pull", "push"];

/// Parsed directive configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingConfig {
    pub model_ref: Option<String>,
    pub property: Option<String>,
    pub model_attr: Option<String>,
    pub elem_attrs: Vec<String>,
    pub event: Option<String>,
    pub func: Option<String>,
    pub pull: bool,
    pub push: bool,
    pub once: bool,
    pub throttle: Option<Duration>,
    pub debug: bool,
}

impl BindingConfig {
    /// Parse from an attribute lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str| {
            get(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };
        let flag = |key: &str| get(key).is_some_and(|v| !v.trim().eq_ignore_ascii_case("false"));

        let throttle = text("throttle").and_then(|raw| match raw.parse::<u64>() {
            Ok(0) => None,
            Ok(ms) => Some(Duration::from_millis(ms)),
            Err(_) => {
                tracing::warn!(throttle = %raw, "ignoring non-numeric throttle");
                None
            }
        });

        Self {
            model_ref: text("model"),
            property: text("property"),
            model_attr: text("model-attr"),
            elem_attrs: text("elem-attr")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            event: text("event"),
            func: text("func"),
            pull: flag("pull"),
            push: flag("push"),
            once: flag("once"),
            throttle,
            debug: flag("debug"),
        }
    }

    /// Parse from the attributes of `element`.
    pub fn from_element(element: &dyn Element) -> Self {
        Self::from_lookup(|key| element.attribute(key))
    }

    /// Observer topic: the model attribute when set, else the property path.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.model_attr.as_deref().or(self.property.as_deref())
    }

    /// First configured element attribute, used for reads.
    #[must_use]
    pub fn read_attr(&self) -> Option<&str> {
        self.elem_attrs.first().map(String::as_str)
    }

    /// Whether a change of `key` requires teardown and reinitialization.
    #[must_use]
    pub fn rewires_on(key: &str) -> bool {
        REWIRE_KEYS.contains(&key)
    }
}

/// Parsed group configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupConfig {
    pub model_ref: Option<String>,
    pub debug: bool,
}

impl GroupConfig {
    pub fn from_element(element: &dyn Element) -> Self {
        Self {
            model_ref: element
                .attribute("model")
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty()),
            debug: element
                .attribute("debug")
                .is_some_and(|v| !v.trim().eq_ignore_ascii_case("false")),
        }
    }
}
