//! Configuration bag shared between a provider and its hooks, plus the
//! TOML-loadable sandbox and tool configuration.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{ProviderError, ProviderResult};

/// Key/value settings (credentials included) visible to submitted code.
///
/// Cloning yields another handle to the same map: an update made through
/// any handle is seen by every hook on its next invocation. There is no
/// per-call isolation.
#[derive(Debug, Clone, Default)]
pub struct ConfigBag {
    inner: Arc<RwLock<IndexMap<String, JsonValue>>>,
}

impl ConfigBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(entries: IndexMap<String, JsonValue>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(entries)),
        }
    }

    /// Builds a bag from a JSON object; any other JSON value is rejected.
    pub fn from_json(value: JsonValue) -> ProviderResult<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self::from_map(map.into_iter().collect())),
            other => Err(ProviderError::Configuration(format!(
                "configuration must be an object, got {}",
                other
            ))),
        }
    }

    pub fn from_toml_table(table: &toml::Table) -> ProviderResult<Self> {
        let json = serde_json::to_value(table)
            .map_err(|e| ProviderError::Configuration(format!("invalid configuration table: {}", e)))?;
        Self::from_json(json)
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, JsonValue>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, JsonValue>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<JsonValue> {
        self.read().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<JsonValue> {
        self.write().shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// `api_key` when it is a non-empty string.
    pub fn api_key(&self) -> Option<String> {
        match self.read().get("api_key") {
            Some(JsonValue::String(key)) if !key.is_empty() => Some(key.clone()),
            _ => None,
        }
    }

    /// Copy of the current entries, taken under the read lock.
    pub fn snapshot(&self) -> IndexMap<String, JsonValue> {
        self.read().clone()
    }

    /// Current entries converted to guest values.
    pub fn to_script_values(&self) -> Vec<(String, hookscript::Value)> {
        self.read()
            .iter()
            .map(|(key, value)| (key.clone(), hookscript::json_to_value(value)))
            .collect()
    }

    /// Whether both handles share the same underlying map.
    pub fn same_bag(&self, other: &ConfigBag) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<IndexMap<String, JsonValue>> for ConfigBag {
    fn from(entries: IndexMap<String, JsonValue>) -> Self {
        Self::from_map(entries)
    }
}

impl<K: Into<String>, V: Into<JsonValue>> FromIterator<(K, V)> for ConfigBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Limits and module wiring of the execution sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Guest call depth before `RecursionError`.
    pub max_call_depth: usize,
    /// Bind the SDK modules (`http`, `openai`, `anthropic`) as globals.
    pub preload_sdk_modules: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_call_depth: hookscript::runtime::DEFAULT_MAX_CALL_DEPTH,
            preload_sdk_modules: true,
        }
    }
}

/// `[provider]` section of a tool configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSection {
    pub name: String,
    pub source_file: PathBuf,
    #[serde(default)]
    pub validation_file: Option<PathBuf>,
}

/// Configuration file read by `provider-tool test`.
///
/// ```toml
/// [provider]
/// name = "my-llm"
/// source_file = "provider.hks"
///
/// [config]
/// api_key = "sk-..."
/// max_tokens = 500
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolConfig {
    pub provider: ProviderSection,
    #[serde(default)]
    pub config: toml::Table,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

impl ToolConfig {
    pub fn from_toml_str(content: &str) -> ProviderResult<Self> {
        toml::from_str(content)
            .map_err(|e| ProviderError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Loads the file; relative source paths resolve against its directory.
    pub fn load(path: &Path) -> ProviderResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(dir) = path.parent() {
            config.provider.source_file = dir.join(&config.provider.source_file);
            config.provider.validation_file =
                config.provider.validation_file.map(|file| dir.join(file));
        }
        Ok(config)
    }

    pub fn config_bag(&self) -> ProviderResult<ConfigBag> {
        ConfigBag::from_toml_table(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clones_share_updates() {
        let bag: ConfigBag = [("api_key", "old")].into_iter().collect();
        let handle = bag.clone();
        handle.insert("api_key", "new");
        assert_eq!(bag.api_key(), Some("new".to_string()));
        assert!(bag.same_bag(&handle));
    }

    #[test]
    fn test_empty_api_key_is_absent() {
        let bag: ConfigBag = [("api_key", json!(""))].into_iter().collect();
        assert_eq!(bag.api_key(), None);
        bag.insert("api_key", json!(42));
        assert_eq!(bag.api_key(), None);
    }

    #[test]
    fn test_tool_config_from_toml() {
        let config = ToolConfig::from_toml_str(
            r#"
            [provider]
            name = "echo"
            source_file = "echo.hks"

            [config]
            api_key = "k"
            max_tokens = 64

            [sandbox]
            max_call_depth = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.provider.name, "echo");
        assert_eq!(config.sandbox.max_call_depth, 50);
        assert!(config.sandbox.preload_sdk_modules);
        let bag = config.config_bag().unwrap();
        assert_eq!(bag.keys(), vec!["api_key", "max_tokens"]);
        assert_eq!(bag.get("max_tokens"), Some(json!(64)));
    }

    #[test]
    fn test_non_object_json_rejected() {
        assert!(ConfigBag::from_json(json!([1, 2])).is_err());
    }
}
