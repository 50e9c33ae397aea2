#![forbid(unsafe_code)]

//! Writing a model value into an element.
//!
//! The strategy is a tagged [`WriteTarget`] chosen from the element's
//! [`Capabilities`] and the configured attribute, never from the element's
//! concrete type.
//!
//! # Invariants
//!
//! 1. Attribute names in [`ATTRIBUTE_ONLY`] are always written as attributes,
//!    even when the element exposes a property of the same name.
//! 2. Writing a falsy value to a property that currently holds a boolean also
//!    removes the attribute of that name.
//! 3. Multi-select membership uses [`loose_eq`], so `1` selects option `"1"`.

use serde_json::Value;

use crate::element::{Capabilities, Element};
use crate::read::style_name;
use crate::value::{display_string, is_truthy, loose_eq};

/// Reflected or read-only names that must go through attribute assignment.
pub const ATTRIBUTE_ONLY: &[&str] = &[
    "id", "class", "style", "type", "list", "form", "for", "href", "src", "role", "width",
    "height", "slot",
];

/// How a value reaches an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget<'a> {
    /// Inline style or custom property.
    Style(&'a str),
    /// Option membership of a multi-select.
    MultiSelect,
    /// Checked state of a toggle.
    Toggle,
    /// Named property, or attribute when no settable property exists.
    Generic(&'a str),
}

impl<'a> WriteTarget<'a> {
    /// Pick the strategy for `attr` on an element with `caps`.
    #[must_use]
    pub fn select(caps: Capabilities, attr: Option<&'a str>) -> Self {
        if let Some(sub) = attr.and_then(style_name) {
            return Self::Style(sub);
        }
        let default_attr = matches!(attr, None | Some("value"));
        if caps.contains(Capabilities::MULTI_SELECT) && default_attr {
            return Self::MultiSelect;
        }
        if caps.contains(Capabilities::TOGGLE) && matches!(attr, None | Some("value" | "checked"))
        {
            return Self::Toggle;
        }
        match attr {
            Some(name) => Self::Generic(name),
            None if caps.contains(Capabilities::VALUE) => Self::Generic("value"),
            None => Self::Generic("textContent"),
        }
    }
}

/// Write `value` into `element` through `attr` (or the element's default).
///
/// `delimiter` splits string values written to a multi-select.
pub fn write_element(element: &dyn Element, attr: Option<&str>, value: &Value, delimiter: char) {
    let target = WriteTarget::select(element.capabilities(), attr);
    #[cfg(feature = "tracing")]
    tracing::trace!(tag = %element.tag(), ?target, "element write");
    match target {
        WriteTarget::Style(name) => element.set_style(name, &display_string(value)),
        WriteTarget::MultiSelect => write_multi_select(element, value, delimiter),
        WriteTarget::Toggle => write_toggle(element, value),
        WriteTarget::Generic(name) => write_generic(element, name, value),
    }
}

fn write_multi_select(element: &dyn Element, value: &Value, delimiter: char) {
    let wanted: Vec<Value> = match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        Value::String(s) if s.is_empty() => Vec::new(),
        Value::String(s) => s
            .split(delimiter)
            .map(|part| Value::String(part.trim().to_owned()))
            .collect(),
        other => vec![other.clone()],
    };
    for (index, option) in element.options().into_iter().enumerate() {
        let option_value = Value::String(option.value);
        let selected = wanted.iter().any(|w| loose_eq(w, &option_value));
        if selected != option.selected {
            element.set_option_selected(index, selected);
        }
    }
}

fn write_toggle(element: &dyn Element, value: &Value) {
    let own = element
        .property("value")
        .map(|v| display_string(&v))
        .unwrap_or_default();
    let checked = match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true" || (!own.is_empty() && *s == own),
        Value::Null => false,
        other => display_string(other) == own,
    };
    element.set_property("checked", Value::Bool(checked));
}

fn write_generic(element: &dyn Element, name: &str, value: &Value) {
    if !ATTRIBUTE_ONLY.contains(&name) && element.has_property(name) {
        let previous = element.property(name);
        let coerced = match &previous {
            Some(Value::Bool(_)) => Value::Bool(is_truthy(value)),
            Some(Value::String(_)) => Value::String(display_string(value)),
            _ => value.clone(),
        };
        element.set_property(name, coerced);
        if matches!(previous, Some(Value::Bool(_))) && !is_truthy(value) {
            element.remove_attribute(name);
        }
        return;
    }
    match value {
        Value::Null | Value::Bool(false) => element.remove_attribute(name),
        other => element.set_attribute(name, &display_string(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use serde_json::json;

    #[test]
    fn strategy_follows_capabilities() {
        let multi = Capabilities::VALUE | Capabilities::OPTIONS | Capabilities::MULTI_SELECT;
        assert_eq!(WriteTarget::select(multi, None), WriteTarget::MultiSelect);
        assert_eq!(
            WriteTarget::select(Capabilities::VALUE | Capabilities::TOGGLE, Some("checked")),
            WriteTarget::Toggle
        );
        assert_eq!(
            WriteTarget::select(Capabilities::STYLE, Some("style.color")),
            WriteTarget::Style("color")
        );
        assert_eq!(
            WriteTarget::select(Capabilities::STYLE, Some("--accent")),
            WriteTarget::Style("--accent")
        );
        assert_eq!(
            WriteTarget::select(Capabilities::STYLE, None),
            WriteTarget::Generic("textContent")
        );
        assert_eq!(
            WriteTarget::select(Capabilities::VALUE, None),
            WriteTarget::Generic("value")
        );
    }

    #[test]
    fn multi_select_accepts_arrays_and_delimited_strings() {
        let select = Node::new("select")
            .with_attr("multiple", "")
            .with_option("1", false)
            .with_option("2", false)
            .with_option("3", true);
        write_element(&*select, None, &json!([1, 2]), ',');
        let picked: Vec<bool> = select.options().iter().map(|o| o.selected).collect();
        assert_eq!(picked, vec![true, true, false]);

        write_element(&*select, None, &json!("3, 1"), ',');
        let picked: Vec<bool> = select.options().iter().map(|o| o.selected).collect();
        assert_eq!(picked, vec![true, false, true]);
    }

    #[test]
    fn toggle_checks_by_bool_or_matching_value() {
        let check = Node::new("input")
            .with_attr("type", "checkbox")
            .with_attr("value", "yes");
        write_element(&*check, None, &json!(true), ',');
        assert_eq!(check.property("checked"), Some(json!(true)));
        write_element(&*check, None, &json!("no"), ',');
        assert_eq!(check.property("checked"), Some(json!(false)));
        write_element(&*check, None, &json!("yes"), ',');
        assert_eq!(check.property("checked"), Some(json!(true)));
    }

    #[test]
    fn generic_prefers_properties_and_coerces_to_their_type() {
        let span = Node::new("span");
        write_element(&*span, Some("textContent"), &json!(100), ',');
        assert_eq!(span.property("textContent"), Some(json!("100")));
        assert_eq!(span.attribute("textContent"), None);
    }

    #[test]
    fn falsy_write_to_boolean_property_removes_attribute() {
        let button = Node::new("button").with_attr("disabled", "");
        write_element(&*button, Some("disabled"), &json!(1), ',');
        assert_eq!(button.property("disabled"), Some(json!(true)));
        write_element(&*button, Some("disabled"), &json!(0), ',');
        assert_eq!(button.property("disabled"), Some(json!(false)));
        assert_eq!(button.attribute("disabled"), None);
    }

    #[test]
    fn deny_listed_names_are_written_as_attributes() {
        let div = Node::new("div").with_property("id", json!("prop"));
        write_element(&*div, Some("id"), &json!("main"), ',');
        assert_eq!(div.attribute("id").as_deref(), Some("main"));
        assert_eq!(div.property("id"), Some(json!("prop")));

        write_element(&*div, Some("title"), &json!("hint"), ',');
        assert_eq!(div.attribute("title").as_deref(), Some("hint"));
        write_element(&*div, Some("title"), &Value::Null, ',');
        assert_eq!(div.attribute("title"), None);
    }

    #[test]
    fn style_values_go_to_inline_style() {
        let div = Node::new("div");
        write_element(&*div, Some("style.color"), &json!("blue"), ',');
        write_element(&*div, Some("--gap"), &json!(4), ',');
        assert_eq!(div.style("color").as_deref(), Some("blue"));
        assert_eq!(div.style("--gap").as_deref(), Some("4"));
    }
}
