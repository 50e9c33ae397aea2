#![forbid(unsafe_code)]

//! In-memory element tree.
//!
//! [`Node`] is a small host-independent element implementation: properties,
//! attributes, inline style, option lists, listeners, and a parent/child tree
//! with a mounted flag. Hosts that render elsewhere (a terminal, a canvas, a
//! browser bridge) can mirror their widgets into `Node`s or implement
//! [`Element`] directly.
//!
//! Capabilities are derived from the tag and attributes the same way a
//! document would: `<input type="checkbox">` is a toggle, `<select multiple>`
//! is a multi-select, a node built with [`Node::wrapper`] is a directive
//! wrapper.
//!
//! # Failure Modes
//!
//! - `set_option_selected()` with an out-of-range index is ignored.
//! - `remove()` on a detached node is a no-op.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use serde_json::Value;

use crate::element::{
    Capabilities, Element, ElementRc, Event, Listener, ListenerId, SelectOption,
};
use crate::model::{Model, ModelRc};
use crate::path::{self, PathError};
use crate::value::display_string;

/// An in-memory element.
pub struct Node {
    tag: String,
    wrapper: bool,
    this: Weak<Node>,
    parent: RefCell<Weak<Node>>,
    children: RefCell<Vec<Rc<Node>>>,
    mounted: Cell<bool>,
    properties: RefCell<AHashMap<String, Value>>,
    attributes: RefCell<AHashMap<String, String>>,
    styles: RefCell<AHashMap<String, String>>,
    options: RefCell<Vec<SelectOption>>,
    listeners: RefCell<Vec<(ListenerId, String, Listener)>>,
    next_listener: Cell<u64>,
}

impl Node {
    fn build(tag: &str, wrapper: bool, mounted: bool) -> Rc<Self> {
        let tag = tag.to_ascii_lowercase();
        let properties = default_properties(&tag);
        Rc::new_cyclic(|this| Self {
            tag,
            wrapper,
            this: this.clone(),
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            mounted: Cell::new(mounted),
            properties: RefCell::new(properties),
            attributes: RefCell::new(AHashMap::new()),
            styles: RefCell::new(AHashMap::new()),
            options: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(1),
        })
    }

    /// Create a detached element.
    #[must_use]
    pub fn new(tag: &str) -> Rc<Self> {
        Self::build(tag, false, false)
    }

    /// Create a detached directive wrapper.
    #[must_use]
    pub fn wrapper(tag: &str) -> Rc<Self> {
        Self::build(tag, true, false)
    }

    /// Create a mounted document root.
    #[must_use]
    pub fn document() -> Rc<Self> {
        Self::build("document", false, true)
    }

    /// Builder: set an attribute.
    #[must_use]
    pub fn with_attr(self: Rc<Self>, name: &str, value: &str) -> Rc<Self> {
        Element::set_attribute(&*self, name, value);
        self
    }

    /// Builder: set the element id.
    #[must_use]
    pub fn with_id(self: Rc<Self>, id: &str) -> Rc<Self> {
        self.with_attr("id", id)
    }

    /// Builder: set a property.
    #[must_use]
    pub fn with_property(self: Rc<Self>, name: &str, value: Value) -> Rc<Self> {
        self.properties.borrow_mut().insert(name.to_owned(), value);
        self
    }

    /// Builder: append an option entry.
    #[must_use]
    pub fn with_option(self: Rc<Self>, value: &str, selected: bool) -> Rc<Self> {
        self.options.borrow_mut().push(SelectOption {
            value: value.to_owned(),
            selected,
        });
        self
    }

    /// Append `child`, detaching it from any previous parent. The child
    /// subtree becomes mounted when `self` is.
    pub fn append_child(&self, child: &Rc<Node>) {
        child.remove();
        *child.parent.borrow_mut() = self.this.clone();
        self.children.borrow_mut().push(Rc::clone(child));
        child.set_mounted(self.mounted.get());
    }

    /// Detach from the parent and unmount the subtree.
    pub fn remove(&self) {
        let parent = self.parent.replace(Weak::new()).upgrade();
        if let Some(parent) = parent {
            parent
                .children
                .borrow_mut()
                .retain(|c| !std::ptr::eq(Rc::as_ptr(c), self));
        }
        self.set_mounted(false);
    }

    fn set_mounted(&self, mounted: bool) {
        self.mounted.set(mounted);
        for child in self.children.borrow().iter() {
            child.set_mounted(mounted);
        }
    }

    /// This node as a shared element handle.
    #[must_use]
    pub fn as_element(self: &Rc<Self>) -> ElementRc {
        Rc::clone(self) as ElementRc
    }

    /// Deliver an event to every listener registered for its name.
    pub fn dispatch(&self, event: &Event) {
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(_, name, _)| *name == event.name)
            .map(|(_, _, l)| Rc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Simulate typing: set `value` then fire `input`.
    pub fn input(&self, text: &str) {
        let value = Value::String(text.to_owned());
        self.properties
            .borrow_mut()
            .insert("value".into(), value.clone());
        self.dispatch(&Event::with_value("input", value));
    }

    /// Simulate clicking a toggle: set `checked` then fire `change`.
    pub fn toggle(&self, checked: bool) {
        self.properties
            .borrow_mut()
            .insert("checked".into(), Value::Bool(checked));
        self.dispatch(&Event::new("change"));
    }

    /// Simulate picking options: update selection then fire `change`.
    pub fn choose(&self, index: usize, selected: bool) {
        Element::set_option_selected(self, index, selected);
        self.dispatch(&Event::new("change"));
    }

    /// Number of listeners currently registered.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Text content, for assertions.
    #[must_use]
    pub fn text(&self) -> String {
        self.property("textContent")
            .map(|v| display_string(&v))
            .unwrap_or_default()
    }

    /// Current `value` property as text, for assertions.
    #[must_use]
    pub fn value(&self) -> String {
        self.property("value")
            .map(|v| display_string(&v))
            .unwrap_or_default()
    }

    fn is_select(&self) -> bool {
        self.tag == "select"
    }

    fn selected_value(&self) -> Value {
        self.options
            .borrow()
            .iter()
            .find(|o| o.selected)
            .map_or(Value::String(String::new()), |o| {
                Value::String(o.value.clone())
            })
    }

    fn select_by_value(&self, value: &str) {
        let multiple = self.attributes.borrow().contains_key("multiple");
        let mut options = self.options.borrow_mut();
        let mut matched = false;
        for option in options.iter_mut() {
            let hit = option.value == value && (multiple || !matched);
            matched |= hit;
            option.selected = hit;
        }
    }
}

fn default_properties(tag: &str) -> AHashMap<String, Value> {
    let mut props = AHashMap::new();
    props.insert("textContent".to_owned(), Value::String(String::new()));
    props.insert("hidden".to_owned(), Value::Bool(false));
    if matches!(tag, "input" | "textarea" | "select" | "button") {
        props.insert("value".to_owned(), Value::String(String::new()));
        props.insert("disabled".to_owned(), Value::Bool(false));
    }
    if tag == "input" {
        props.insert("checked".to_owned(), Value::Bool(false));
    }
    props
}

impl Element for Node {
    fn tag(&self) -> String {
        self.tag.clone()
    }

    fn element_id(&self) -> Option<String> {
        self.attributes.borrow().get("id").cloned()
    }

    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::STYLE;
        if self.wrapper {
            return caps | Capabilities::DIRECTIVE;
        }
        let attrs = self.attributes.borrow();
        match self.tag.as_str() {
            "input" => {
                caps |= Capabilities::VALUE;
                let kind = attrs.get("type").map(|t| t.to_ascii_lowercase());
                if matches!(kind.as_deref(), Some("checkbox" | "radio")) {
                    caps |= Capabilities::TOGGLE;
                }
            }
            "textarea" => caps |= Capabilities::VALUE,
            "select" => {
                caps |= Capabilities::VALUE | Capabilities::OPTIONS;
                if attrs.contains_key("multiple") {
                    caps |= Capabilities::MULTI_SELECT;
                }
            }
            _ => {}
        }
        caps
    }

    fn property(&self, name: &str) -> Option<Value> {
        if name == "value" && self.is_select() {
            return Some(self.selected_value());
        }
        self.properties.borrow().get(name).cloned()
    }

    fn has_property(&self, name: &str) -> bool {
        self.properties.borrow().contains_key(name)
    }

    fn set_property(&self, name: &str, value: Value) {
        if name == "value" && self.is_select() {
            self.select_by_value(&display_string(&value));
            return;
        }
        self.properties.borrow_mut().insert(name.to_owned(), value);
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.borrow().get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.attributes
            .borrow_mut()
            .insert(name.to_owned(), value.to_owned());
        // Checkbox default value is "on" until the attribute says otherwise.
        if name == "type" && matches!(value, "checkbox" | "radio") {
            let mut props = self.properties.borrow_mut();
            if props.get("value") == Some(&Value::String(String::new())) {
                props.insert("value".to_owned(), Value::String("on".to_owned()));
            }
        }
        if name == "value" && self.tag == "input" {
            self.properties
                .borrow_mut()
                .insert("value".to_owned(), Value::String(value.to_owned()));
        }
    }

    fn remove_attribute(&self, name: &str) {
        self.attributes.borrow_mut().remove(name);
    }

    fn style(&self, name: &str) -> Option<String> {
        self.styles.borrow().get(name).cloned()
    }

    fn set_style(&self, name: &str, value: &str) {
        let mut styles = self.styles.borrow_mut();
        if value.is_empty() {
            styles.remove(name);
        } else {
            styles.insert(name.to_owned(), value.to_owned());
        }
    }

    fn options(&self) -> Vec<SelectOption> {
        self.options.borrow().clone()
    }

    fn set_option_selected(&self, index: usize, selected: bool) {
        let multiple = self.attributes.borrow().contains_key("multiple");
        let mut options = self.options.borrow_mut();
        if index >= options.len() {
            return;
        }
        if selected && !multiple {
            for option in options.iter_mut() {
                option.selected = false;
            }
        }
        options[index].selected = selected;
    }

    fn children(&self) -> Vec<ElementRc> {
        self.children
            .borrow()
            .iter()
            .map(|c| Rc::clone(c) as ElementRc)
            .collect()
    }

    fn parent(&self) -> Option<ElementRc> {
        self.parent
            .borrow()
            .upgrade()
            .map(|p| p as ElementRc)
    }

    fn is_mounted(&self) -> bool {
        self.mounted.get()
    }

    fn add_listener(&self, event: &str, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners
            .borrow_mut()
            .push((id, event.to_owned(), listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(l, _, _)| *l != id);
    }

    fn as_model(self: Rc<Self>) -> Option<ModelRc> {
        Some(self as ModelRc)
    }
}

/// An element used as a model: paths address properties (the first segment
/// names the property, the rest walk into its value), attributes map to
/// element attributes.
impl Model for Node {
    fn get(&self, path: &str) -> Option<Value> {
        let (head, rest) = split_head(path);
        let value = Element::property(self, head)?;
        match rest {
            Some(rest) => path::get_path(&value, rest).cloned(),
            None => Some(value),
        }
    }

    fn set(&self, path: &str, value: Value) -> Result<(), PathError> {
        let (head, rest) = split_head(path);
        if head.is_empty() {
            return Err(PathError::Empty(path.to_owned()));
        }
        match rest {
            None => Element::set_property(self, head, value),
            Some(rest) => {
                let mut current = Element::property(self, head).unwrap_or(Value::Null);
                path::set_path(&mut current, rest, value)?;
                Element::set_property(self, head, current);
            }
        }
        Ok(())
    }

    fn get_attribute(&self, name: &str) -> Option<String> {
        Element::attribute(self, name)
    }

    fn set_attribute(&self, name: &str, value: &str) -> bool {
        Element::set_attribute(self, name, value);
        true
    }
}

fn split_head(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head.trim(), Some(rest)),
        None => (path.trim(), None),
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("tag", &self.tag)
            .field("id", &self.element_id())
            .field("mounted", &self.mounted.get())
            .field("children", &self.children.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{TargetSearch, find_by_id, find_target};
    use serde_json::json;

    #[test]
    fn capabilities_follow_tag_and_type() {
        let text = Node::new("input");
        assert!(text.capabilities().contains(Capabilities::VALUE));
        assert!(!text.capabilities().contains(Capabilities::TOGGLE));

        let check = Node::new("input").with_attr("type", "checkbox");
        assert!(check.capabilities().contains(Capabilities::TOGGLE));
        assert_eq!(check.value(), "on");

        let multi = Node::new("select").with_attr("multiple", "");
        assert!(multi.capabilities().contains(Capabilities::MULTI_SELECT));

        let wrap = Node::wrapper("bind-value");
        assert!(wrap.capabilities().contains(Capabilities::DIRECTIVE));
    }

    #[test]
    fn mounting_follows_the_tree() {
        let doc = Node::document();
        let wrap = Node::wrapper("bind-value");
        let input = Node::new("input");
        wrap.append_child(&input);
        assert!(!input.is_mounted());

        doc.append_child(&wrap);
        assert!(input.is_mounted());

        wrap.remove();
        assert!(!input.is_mounted());
        assert!(doc.children().is_empty());
    }

    #[test]
    fn find_target_skips_nested_wrappers() {
        let outer = Node::wrapper("bind-value");
        let host = outer.as_element();
        assert!(matches!(find_target(&host), TargetSearch::Empty));

        let inner = Node::wrapper("bind-value");
        outer.append_child(&inner);
        assert!(matches!(find_target(&host), TargetSearch::Missing));

        let input = Node::new("input");
        inner.append_child(&input);
        match find_target(&host) {
            TargetSearch::Found(el) => assert_eq!(el.tag(), "input"),
            other => panic!("expected target, got {other:?}"),
        }
    }

    #[test]
    fn listeners_fire_until_removed() {
        let node = Node::new("input");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let id = node.add_listener(
            "input",
            Rc::new(move |e: &Event| s.borrow_mut().push(e.value.clone())),
        );

        node.input("a");
        node.remove_listener(id);
        node.input("b");
        assert_eq!(*seen.borrow(), vec![Some(json!("a"))]);
        assert_eq!(node.listener_count(), 0);
    }

    #[test]
    fn single_select_keeps_one_selection() {
        let select = Node::new("select")
            .with_option("a", true)
            .with_option("b", false);
        select.set_option_selected(1, true);
        assert_eq!(select.property("value"), Some(json!("b")));
        select.set_property("value", json!("a"));
        assert_eq!(
            select.options().iter().filter(|o| o.selected).count(),
            1
        );
    }

    #[test]
    fn element_as_model_exposes_properties_and_attributes() {
        let node = Node::new("div").with_property("state", json!({"count": 1}));
        let model = Rc::clone(&node).as_model().expect("nodes are models");
        assert_eq!(model.get("state.count"), Some(json!(1)));
        model.set("state.count", json!(2)).unwrap();
        assert_eq!(node.property("state"), Some(json!({"count": 2})));
        assert!(model.set_attribute("title", "hi"));
        assert_eq!(node.attribute("title").as_deref(), Some("hi"));
    }

    #[test]
    fn find_by_id_walks_the_tree() {
        let doc = Node::document();
        let wrap = Node::wrapper("bind-group");
        let target = Node::new("span").with_id("status");
        wrap.append_child(&target);
        doc.append_child(&wrap);
        let found = find_by_id(&doc.as_element(), "status").expect("present");
        assert_eq!(found.tag(), "span");
        assert!(find_by_id(&doc.as_element(), "missing").is_none());
    }
}
