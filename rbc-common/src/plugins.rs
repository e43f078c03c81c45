//! Plugin list canonicalization.
//!
//! Callers describe plugins in several shapes. All of them normalize to a
//! sorted, de-duplicated list of [`Plugin`] pairs so that logically identical
//! requests produce the same content hash.

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version used when a plugin is named without one.
pub const DEFAULT_PLUGIN_VERSION: &str = "latest";

/// A normalized plugin requirement.
///
/// Field order matters: derived `Ord` sorts by name, then version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    pub version: String,
}

impl Plugin {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// One plugin entry as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginSpec {
    /// `"name@version"` or bare `"name"`.
    Text(String),
    /// `["name", "version"]`
    Pair(String, String),
    /// `{"name": ..., "version": ...}`
    Object {
        name: String,
        #[serde(default)]
        version: Option<String>,
    },
}

impl PluginSpec {
    fn normalize(&self) -> Result<Plugin, ValidationError> {
        let (name, version) = match self {
            Self::Text(text) => split_versioned(text.trim()),
            Self::Pair(name, version) => (name.trim(), version.trim()),
            Self::Object { name, version } => {
                (name.trim(), version.as_deref().map(str::trim).unwrap_or(""))
            }
        };
        plugin(name, version)
    }
}

/// A caller-supplied plugin collection: a list of entries or a
/// `{name: version}` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginList {
    List(Vec<PluginSpec>),
    Map(BTreeMap<String, String>),
}

impl Default for PluginList {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl PluginList {
    /// Canonical form: sorted by name then version, exact duplicates removed.
    pub fn normalize(&self) -> Result<Vec<Plugin>, ValidationError> {
        let mut plugins = match self {
            Self::List(specs) => specs
                .iter()
                .map(PluginSpec::normalize)
                .collect::<Result<Vec<_>, _>>()?,
            Self::Map(map) => map
                .iter()
                .map(|(name, version)| plugin(name.trim(), version.trim()))
                .collect::<Result<Vec<_>, _>>()?,
        };
        plugins.sort();
        plugins.dedup();
        Ok(plugins)
    }
}

impl From<Vec<PluginSpec>> for PluginList {
    fn from(specs: Vec<PluginSpec>) -> Self {
        Self::List(specs)
    }
}

impl From<Vec<&str>> for PluginList {
    fn from(specs: Vec<&str>) -> Self {
        Self::List(specs.into_iter().map(|s| PluginSpec::Text(s.to_string())).collect())
    }
}

/// Splits `name@version`. A leading `@` belongs to a scoped package name.
fn split_versioned(text: &str) -> (&str, &str) {
    match text.rfind('@') {
        Some(idx) if idx > 0 => (&text[..idx], &text[idx + 1..]),
        _ => (text, ""),
    }
}

fn plugin(name: &str, version: &str) -> Result<Plugin, ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::new("plugins", "plugin name must not be empty"));
    }
    let version = if version.is_empty() {
        DEFAULT_PLUGIN_VERSION
    } else {
        version
    };
    Ok(Plugin::new(name, version))
}
