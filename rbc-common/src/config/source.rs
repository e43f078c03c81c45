//! Source tracking for configuration values.

use std::fmt;
use std::path::PathBuf;

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default.
    Default,
    /// A TOML config file.
    File(PathBuf),
    /// An environment variable (name recorded).
    Environment(String),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::File(path) => write!(f, "file {}", path.display()),
            Self::Environment(var) => write!(f, "env {var}"),
        }
    }
}

/// A value paired with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment(var.into()),
        }
    }

    pub fn is_from_env(&self) -> bool {
        matches!(self.source, ConfigSource::Environment(_))
    }

    /// The value if it was set by the environment.
    pub fn env_override(self) -> Option<T> {
        if self.is_from_env() {
            Some(self.value)
        } else {
            None
        }
    }
}
