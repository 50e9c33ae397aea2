#![forbid(unsafe_code)]

//! Extracting the bound value from an element after an interaction.

use serde_json::Value;

use crate::element::{Capabilities, Element, Event};

/// Read the value an interaction produced.
///
/// - multi-select: array of selected option values, in control order
/// - toggle: the control's `value` when checked, `false` otherwise
/// - configured attribute: the property of that name, else the attribute
/// - otherwise: the event's raw value, else the `value` property
#[must_use]
pub fn read_element(element: &dyn Element, attr: Option<&str>, event: Option<&Event>) -> Value {
    let caps = element.capabilities();
    let default_attr = matches!(attr, None | Some("value"));

    if caps.contains(Capabilities::MULTI_SELECT) && default_attr {
        return Value::Array(
            element
                .options()
                .into_iter()
                .filter(|o| o.selected)
                .map(|o| Value::String(o.value))
                .collect(),
        );
    }

    if caps.contains(Capabilities::TOGGLE) && matches!(attr, None | Some("value" | "checked")) {
        let checked = element
            .property("checked")
            .is_some_and(|v| v == Value::Bool(true));
        return if checked {
            element.property("value").unwrap_or(Value::Bool(true))
        } else {
            Value::Bool(false)
        };
    }

    if let Some(name) = attr {
        return read_named(element, name);
    }

    if let Some(value) = event.and_then(|e| e.value.clone()) {
        return value;
    }

    element.property("value").unwrap_or(Value::Null)
}

/// Read a named property, falling back to the attribute of the same name.
#[must_use]
pub fn read_named(element: &dyn Element, name: &str) -> Value {
    if let Some(sub) = style_name(name) {
        return element.style(sub).map_or(Value::Null, Value::String);
    }
    if element.has_property(name) {
        return element.property(name).unwrap_or(Value::Null);
    }
    element.attribute(name).map_or(Value::Null, Value::String)
}

/// Style sub-path of a binding attribute: `style.color` -> `color`,
/// `--accent` -> `--accent`.
#[must_use]
pub fn style_name(attr: &str) -> Option<&str> {
    if let Some(sub) = attr.strip_prefix("style.") {
        return Some(sub);
    }
    attr.starts_with("--").then_some(attr)
}
