#![forbid(unsafe_code)]

//! Error taxonomy and reporting.
//!
//! No binding error is fatal to the application: each directive or group
//! fails on its own and the error is handed to the context's [`ErrorSink`].
//!
//! # Failure Modes
//!
//! | Error | Cause | Behavior |
//! |-------|-------|----------|
//! | `Configuration` | required key missing | directive aborts, waits for a config change |
//! | `BindingTarget` | no bindable child under the wrapper | directive aborts, waits for a config change |
//! | `Resolution` | load failure, missing export, remote path, lookup miss, unsupported selector, timeout | dependents stay uninitialized until the reference changes |
//! | `ExecutionWarning` | `func` path not found | warning only; the interaction is dropped |

use std::cell::RefCell;
use std::fmt;

/// Why a model reference could not be turned into an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The reference points at a remote location.
    RemotePath(String),
    /// The module host reported a failure.
    ModuleLoad { path: String, reason: String },
    /// The module has neither a default nor any named export.
    MissingExport(String),
    /// A module path was given but no module host is installed.
    NoModuleHost(String),
    /// Neither an element nor a global of that name exists.
    NotFound(String),
    /// The reference is neither a global name nor a supported selector.
    UnsupportedSelector(String),
    /// The resolution did not complete within the configured timeout.
    TimedOut(String),
}

impl fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemotePath(path) => write!(f, "remote model path rejected: {path}"),
            Self::ModuleLoad { path, reason } => {
                write!(f, "failed to load module '{path}': {reason}")
            }
            Self::MissingExport(path) => write!(f, "module '{path}' has no usable export"),
            Self::NoModuleHost(path) => {
                write!(f, "no module host installed to load '{path}'")
            }
            Self::NotFound(name) => write!(f, "no element or global named '{name}'"),
            Self::UnsupportedSelector(selector) => {
                write!(f, "unsupported selector '{selector}'")
            }
            Self::TimedOut(key) => write!(f, "resolution of '{key}' timed out"),
        }
    }
}

impl std::error::Error for ResolutionError {}

/// Errors reported by directives and groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Required configuration is missing or contradictory.
    Configuration(String),
    /// The wrapper contains no bindable element.
    BindingTarget(String),
    /// The model reference could not be resolved.
    Resolution(ResolutionError),
    /// A configured function could not be found. Non-fatal.
    ExecutionWarning(String),
}

impl BindError {
    /// Whether this is a warning rather than an initialization failure.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::ExecutionWarning(_))
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::BindingTarget(msg) => write!(f, "binding target error: {msg}"),
            Self::Resolution(err) => write!(f, "resolution error: {err}"),
            Self::ExecutionWarning(msg) => write!(f, "execution warning: {msg}"),
        }
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resolution(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResolutionError> for BindError {
    fn from(err: ResolutionError) -> Self {
        Self::Resolution(err)
    }
}

/// Destination for reported binding errors.
pub trait ErrorSink {
    fn report(&self, error: &BindError);
}

/// Default sink: logs errors with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, error: &BindError) {
        if error.is_warning() {
            tracing::warn!(%error, "binding warning");
        } else {
            tracing::error!(%error, "binding error");
        }
    }
}

/// Sink that keeps every report, then forwards it to tracing.
#[derive(Debug, Default)]
pub struct CollectingSink {
    errors: RefCell<Vec<BindError>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of everything reported so far.
    #[must_use]
    pub fn errors(&self) -> Vec<BindError> {
        self.errors.borrow().clone()
    }

    /// Drain the reports.
    pub fn take(&self) -> Vec<BindError> {
        std::mem::take(&mut *self.errors.borrow_mut())
    }
}

impl ErrorSink for CollectingSink {
    fn report(&self, error: &BindError) {
        TracingSink.report(error);
        self.errors.borrow_mut().push(error.clone());
    }
}
