#![forbid(unsafe_code)]

//! Dotted property paths (`"user.address.city"`, `"items.0.label"`).
//!
//! Numeric segments index into arrays; every other segment is an object key.
//! Writes create missing intermediate objects but never overwrite a scalar
//! that sits in the middle of a path.

use core::fmt;

use serde_json::{Map, Value};

/// Errors from writing through a property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path was empty or contained an empty segment.
    Empty(String),
    /// A non-container value blocks the rest of the path.
    NotAContainer { path: String, segment: String },
    /// An array index was past the end of the array.
    IndexOutOfBounds { path: String, index: usize },
    /// The model does not accept writes.
    ReadOnly(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty(path) => write!(f, "invalid property path '{path}'"),
            Self::NotAContainer { path, segment } => {
                write!(f, "'{segment}' in '{path}' is not an object or array")
            }
            Self::IndexOutOfBounds { path, index } => {
                write!(f, "index {index} out of bounds in '{path}'")
            }
            Self::ReadOnly(path) => write!(f, "'{path}' is read-only"),
        }
    }
}

impl std::error::Error for PathError {}

/// Split a path into segments, rejecting empty segments.
pub fn segments(path: &str) -> Result<Vec<&str>, PathError> {
    let parts: Vec<&str> = path.split('.').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(PathError::Empty(path.to_owned()));
    }
    Ok(parts)
}

/// Read the value at `path`, or `None` if any segment is missing.
#[must_use]
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let parts = segments(path).ok()?;
    parts.into_iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `value` at `path`, creating intermediate objects as needed.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    let parts = segments(path)?;
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| PathError::Empty(path.to_owned()))?;

    let mut node = root;
    for segment in parents {
        node = child_mut(node, path, segment)?;
    }

    match node {
        Value::Object(map) => {
            map.insert((*last).to_owned(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = parse_index(path, last)?;
            match index.cmp(&items.len()) {
                core::cmp::Ordering::Less => items[index] = value,
                core::cmp::Ordering::Equal => items.push(value),
                core::cmp::Ordering::Greater => {
                    return Err(PathError::IndexOutOfBounds {
                        path: path.to_owned(),
                        index,
                    });
                }
            }
            Ok(())
        }
        Value::Null => {
            let mut map = Map::new();
            map.insert((*last).to_owned(), value);
            *node = Value::Object(map);
            Ok(())
        }
        _ => Err(PathError::NotAContainer {
            path: path.to_owned(),
            segment: (*last).to_owned(),
        }),
    }
}

fn child_mut<'a>(node: &'a mut Value, path: &str, segment: &str) -> Result<&'a mut Value, PathError> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => Ok(map
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => {
            let index = parse_index(path, segment)?;
            items.get_mut(index).ok_or(PathError::IndexOutOfBounds {
                path: path.to_owned(),
                index,
            })
        }
        _ => Err(PathError::NotAContainer {
            path: path.to_owned(),
            segment: segment.to_owned(),
        }),
    }
}

fn parse_index(path: &str, segment: &str) -> Result<usize, PathError> {
    segment.parse::<usize>().map_err(|_| PathError::NotAContainer {
        path: path.to_owned(),
        segment: segment.to_owned(),
    })
}
