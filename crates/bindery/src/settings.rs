#![forbid(unsafe_code)]

//! Engine-wide settings, loadable from TOML.
//!
//! ```toml
//! input_event = "input"
//! change_event = "change"
//! list_delimiter = ","
//! module_extensions = ["js", "mjs"]
//! resolve_timeout_ms = 5000
//! debug = false
//! ```
//!
//! Every field is optional; missing fields take the [`Default`] value.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Errors from loading settings.
#[derive(Debug)]
pub enum ConfigError {
    /// The settings file could not be read.
    Io(std::io::Error),
    /// The settings text is not valid TOML for [`EngineConfig`].
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cannot read settings: {err}"),
            Self::Parse(msg) => write!(f, "invalid settings: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Engine-wide settings shared through the binding context.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Default interaction event for text-like elements.
    pub input_event: String,
    /// Default interaction event for toggles and option lists.
    pub change_event: String,
    /// Separator for string values written to multi-selects.
    pub list_delimiter: char,
    /// Script extensions that mark a model reference as a module path.
    pub module_extensions: Vec<String>,
    /// Fail pending resolutions after this many milliseconds. Unset: no timeout.
    pub resolve_timeout_ms: Option<u64>,
    /// Force verbose lifecycle logging for every directive and group.
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_event: "input".to_owned(),
            change_event: "change".to_owned(),
            list_delimiter: ',',
            module_extensions: vec!["js".to_owned(), "mjs".to_owned()],
            resolve_timeout_ms: None,
            debug: false,
        }
    }
}

impl EngineConfig {
    /// Parse settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Read and parse a settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.as_ref().display(), "loaded engine settings");
        Ok(config)
    }

    /// Resolution timeout as a duration.
    #[must_use]
    pub fn resolve_timeout(&self) -> Option<Duration> {
        self.resolve_timeout_ms.map(Duration::from_millis)
    }
}
