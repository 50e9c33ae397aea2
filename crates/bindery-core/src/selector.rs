#![forbid(unsafe_code)]

//! Simple element selectors: one compound of tag, `#id`, `.class` and
//! `[attr]` / `[attr=value]` parts (`section.card`, `#status`,
//! `panel[data-state=open]`).
//!
//! Combinators, pseudo-classes, selector lists and `*` are not supported;
//! [`Selector::parse`] returns `None` for them.

use std::rc::Rc;

use crate::element::{Element, ElementRc};

/// A parsed compound selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    /// Attribute name, and the exact value required if any.
    pub attributes: Vec<(String, Option<String>)>,
}

fn name_len(text: &str) -> usize {
    text.find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(text.len())
}

impl Selector {
    /// Parse one compound selector. `None` for empty or unsupported input.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut selector = Self::default();
        let mut rest = text.trim();
        if rest.is_empty() {
            return None;
        }

        let n = name_len(rest);
        if n > 0 {
            selector.tag = Some(rest[..n].to_owned());
            rest = &rest[n..];
        }

        while let Some(marker) = rest.chars().next() {
            match marker {
                '#' | '.' => {
                    let n = name_len(&rest[1..]);
                    if n == 0 {
                        return None;
                    }
                    let name = rest[1..1 + n].to_owned();
                    if marker == '#' {
                        if selector.id.replace(name).is_some() {
                            return None;
                        }
                    } else {
                        selector.classes.push(name);
                    }
                    rest = &rest[1 + n..];
                }
                '[' => {
                    let end = rest.find(']')?;
                    let body = &rest[1..end];
                    let (name, value) = match body.split_once('=') {
                        Some((name, value)) => {
                            let value = value.trim();
                            let value = value
                                .strip_prefix('"')
                                .and_then(|v| v.strip_suffix('"'))
                                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                                .unwrap_or(value);
                            (name.trim(), Some(value.to_owned()))
                        }
                        None => (body.trim(), None),
                    };
                    if name.is_empty() || name_len(name) != name.len() {
                        return None;
                    }
                    selector.attributes.push((name.to_owned(), value));
                    rest = &rest[end + 1..];
                }
                _ => return None,
            }
        }
        Some(selector)
    }

    /// A bare name with no `#`, `.` or `[...]` part.
    #[must_use]
    pub fn is_bare_name(&self) -> bool {
        self.tag.is_some() && self.id.is_none() && self.classes.is_empty() && self.attributes.is_empty()
    }

    #[must_use]
    pub fn matches(&self, element: &dyn Element) -> bool {
        if self
            .tag
            .as_ref()
            .is_some_and(|tag| !element.tag().eq_ignore_ascii_case(tag))
        {
            return false;
        }
        if self.id.is_some() && element.element_id() != self.id {
            return false;
        }
        if !self.classes.is_empty() {
            let class = element.attribute("class").unwrap_or_default();
            let mut present = class.split_whitespace();
            if !self
                .classes
                .iter()
                .all(|wanted| present.clone().any(|c| c == wanted))
            {
                return false;
            }
        }
        self.attributes.iter().all(|(name, value)| {
            match (element.attribute(name), value) {
                (Some(actual), Some(wanted)) => actual == *wanted,
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
    }

    /// Depth-first search for the first match under (and including) `root`.
    #[must_use]
    pub fn find_first(&self, root: &ElementRc) -> Option<ElementRc> {
        if self.matches(&**root) {
            return Some(Rc::clone(root));
        }
        root.children()
            .iter()
            .find_map(|child| self.find_first(child))
    }
}
