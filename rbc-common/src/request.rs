//! Build requests and their content hash.

use crate::arch::TargetArch;
use crate::errors::ValidationError;
use crate::plugins::{Plugin, PluginList};
use crate::util::content_hash;
use serde::Serialize;
use serde_json::{Map, Value};

/// An immutable request to build `version` for `target_arch`.
///
/// Construct through [`BuildRequest::builder`]; the content hash is derived
/// from the version, the normalized plugin list and the config map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildRequest {
    version: String,
    target_arch: TargetArch,
    plugins: Vec<Plugin>,
    config: Map<String, Value>,
    content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_checksum: Option<String>,
    priority: i32,
    metadata: Map<String, Value>,
}

#[derive(Serialize)]
struct HashInput<'a> {
    version: &'a str,
    plugins: &'a [Plugin],
    config: &'a Map<String, Value>,
}

impl BuildRequest {
    pub fn builder(version: impl Into<String>, target_arch: TargetArch) -> BuildRequestBuilder {
        BuildRequestBuilder {
            version: version.into(),
            target_arch,
            plugins: PluginList::default(),
            config: Map::new(),
            source_checksum: None,
            priority: 0,
            metadata: Map::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn target_arch(&self) -> TargetArch {
        self.target_arch
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    /// Cache key shared by logically identical requests.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn source_checksum(&self) -> Option<&str> {
        self.source_checksum.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequestBuilder {
    version: String,
    target_arch: TargetArch,
    plugins: PluginList,
    config: Map<String, Value>,
    source_checksum: Option<String>,
    priority: i32,
    metadata: Map<String, Value>,
}

impl BuildRequestBuilder {
    pub fn plugins(mut self, plugins: impl Into<PluginList>) -> Self {
        self.plugins = plugins.into();
        self
    }

    pub fn config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    pub fn source_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.source_checksum = Some(checksum.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<BuildRequest, ValidationError> {
        let version = self.version.trim().to_string();
        if version.is_empty() {
            return Err(ValidationError::new("version", "must not be empty"));
        }
        let plugins = self.plugins.normalize()?;
        let content_hash = content_hash(&HashInput {
            version: &version,
            plugins: &plugins,
            config: &self.config,
        })
        .map_err(|e| ValidationError::new("config", e.to_string()))?;

        Ok(BuildRequest {
            version,
            target_arch: self.target_arch,
            plugins,
            config: self.config,
            content_hash,
            source_checksum: self.source_checksum.filter(|s| !s.trim().is_empty()),
            priority: self.priority,
            metadata: self.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::PluginSpec;
    use proptest::prelude::*;
    use serde_json::json;

    fn linux() -> TargetArch {
        "linux-x64".parse().unwrap()
    }

    fn config(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_identical_requests_hash_identically_across_shapes() {
        let a = BuildRequest::builder("1.4.0", linux())
            .plugins(vec!["esbuild@0.20.1", "swc@1.3.0"])
            .config(config(json!({"minify": true, "sourcemap": false})))
            .build()
            .unwrap();
        let b = BuildRequest::builder("1.4.0", linux())
            .plugins(PluginList::List(vec![
                PluginSpec::Pair("swc".into(), "1.3.0".into()),
                PluginSpec::Object {
                    name: "esbuild".into(),
                    version: Some("0.20.1".into()),
                },
            ]))
            .config(config(json!({"sourcemap": false, "minify": true})))
            .build()
            .unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_hash_excludes_target_priority_and_metadata() {
        let a = BuildRequest::builder("2.0.0", linux()).build().unwrap();
        let b = BuildRequest::builder("2.0.0", "darwin-arm64".parse().unwrap())
            .priority(5)
            .metadata("client", "ci")
            .build()
            .unwrap();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_hash_changes_with_version() {
        let a = BuildRequest::builder("2.0.0", linux()).build().unwrap();
        let b = BuildRequest::builder("2.0.1", linux()).build().unwrap();
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_empty_version_rejected() {
        let err = BuildRequest::builder("  ", linux()).build().unwrap_err();
        assert_eq!(err.field, "version");
    }

    #[test]
    fn test_blank_source_checksum_dropped() {
        let req = BuildRequest::builder("1.0.0", linux())
            .source_checksum(" ")
            .build()
            .unwrap();
        assert_eq!(req.source_checksum(), None);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("source_checksum").is_none());
    }

    proptest! {
        #[test]
        fn prop_plugin_order_does_not_change_hash(
            names in proptest::collection::btree_set("[a-z]{1,8}", 0..6)
        ) {
            let forward: Vec<String> = names.iter().map(|n| format!("{n}@1.0.0")).collect();
            let mut reversed = forward.clone();
            reversed.reverse();

            let to_list = |v: Vec<String>| PluginList::List(v.into_iter().map(PluginSpec::Text).collect());
            let a = BuildRequest::builder("1.0.0", linux()).plugins(to_list(forward)).build().unwrap();
            let b = BuildRequest::builder("1.0.0", linux()).plugins(to_list(reversed)).build().unwrap();
            prop_assert_eq!(a.content_hash(), b.content_hash());
        }
    }
}
