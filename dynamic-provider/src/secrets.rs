//! Credential resolution for dynamic providers
//!
//! Resolution order of [`SecretStore`] (higher priority first):
//! 1. Local project secrets (.providers/secrets.toml)
//! 2. Environment variables (global user scope)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};

/// Key under which a resolver is asked for a provider's credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderIdentity {
    pub name: String,
    pub id: Option<i64>,
}

impl ProviderIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Conventional secret name: `my-llm` → `MY_LLM_API_KEY`.
    pub fn secret_name(&self) -> String {
        let stem: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}_API_KEY", stem)
    }
}

/// Supplies the API key of a provider before its code runs.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, identity: &ProviderIdentity) -> Option<String>;
}

impl<F> CredentialResolver for F
where
    F: Fn(&ProviderIdentity) -> Option<String> + Send + Sync,
{
    fn resolve(&self, identity: &ProviderIdentity) -> Option<String> {
        self(identity)
    }
}

/// Secrets file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SecretsFile {
    #[serde(default)]
    secrets: HashMap<String, String>,
    #[serde(default)]
    mappings: HashMap<String, String>,
}

/// Layered secret store with local file and env var fallback
pub struct SecretStore {
    local_path: Option<PathBuf>,
    local_secrets: HashMap<String, String>,
    /// Expected secret name → name actually looked up (e.g. an env var)
    mappings: HashMap<String, String>,
}

impl SecretStore {
    /// Create a new SecretStore, loading from the given project directory
    pub fn new(project_dir: Option<PathBuf>) -> ProviderResult<Self> {
        let local_path = project_dir.map(|p| p.join(".providers").join("secrets.toml"));
        let file = match &local_path {
            Some(path) => Self::load_from_file(path)?,
            None => SecretsFile::default(),
        };
        Ok(Self {
            local_path,
            local_secrets: file.secrets,
            mappings: file.mappings,
        })
    }

    fn load_from_file(path: &Path) -> ProviderResult<SecretsFile> {
        if !path.exists() {
            return Ok(SecretsFile::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            ProviderError::Configuration(format!("Failed to read secrets file: {}", e))
        })?;
        toml::from_str(&content).map_err(|e| {
            ProviderError::Configuration(format!("Failed to parse secrets file: {}", e))
        })
    }

    /// Get a secret by name. Resolution order: local file → env var
    pub fn get(&self, name: &str) -> Option<String> {
        let lookup = self.mappings.get(name).map(String::as_str).unwrap_or(name);
        if let Some(value) = self.local_secrets.get(lookup) {
            return Some(value.clone());
        }
        std::env::var(lookup).ok()
    }

    /// Check if a secret is available (without revealing value)
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn set_local(&mut self, name: &str, value: String) -> ProviderResult<()> {
        self.local_secrets.insert(name.to_string(), value);
        self.save()
    }

    pub fn set_mapping(&mut self, expected_name: &str, actual_name: String) -> ProviderResult<()> {
        self.mappings.insert(expected_name.to_string(), actual_name);
        self.save()
    }

    pub fn save(&self) -> ProviderResult<()> {
        let path = self.local_path.as_ref().ok_or_else(|| {
            ProviderError::Configuration("No local path configured for secrets".to_string())
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ProviderError::Configuration(format!("Failed to create secrets directory: {}", e))
            })?;
        }

        let file = SecretsFile {
            secrets: self.local_secrets.clone(),
            mappings: self.mappings.clone(),
        };
        let content = toml::to_string_pretty(&file).map_err(|e| {
            ProviderError::Configuration(format!("Failed to serialize secrets: {}", e))
        })?;
        fs::write(path, content).map_err(|e| {
            ProviderError::Configuration(format!("Failed to write secrets file: {}", e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
                ProviderError::Configuration(format!("Failed to set file permissions: {}", e))
            })?;
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> ProviderResult<bool> {
        let existed = self.local_secrets.remove(name).is_some();
        if existed {
            self.save()?;
        }
        Ok(existed)
    }

    /// Names stored in the local file; env vars are not listed.
    pub fn list_local(&self) -> Vec<&str> {
        self.local_secrets.keys().map(String::as_str).collect()
    }
}

impl CredentialResolver for SecretStore {
    fn resolve(&self, identity: &ProviderIdentity) -> Option<String> {
        self.get(&identity.secret_name()).filter(|key| !key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_secret_name_convention() {
        assert_eq!(ProviderIdentity::new("my-llm").secret_name(), "MY_LLM_API_KEY");
        assert_eq!(ProviderIdentity::new("groq").secret_name(), "GROQ_API_KEY");
    }

    #[test]
    fn test_env_var_fallback() {
        std::env::set_var("SECRETS_TEST_ENV_ONLY_API_KEY", "env_value");
        let store = SecretStore::new(None).unwrap();
        assert_eq!(
            store.resolve(&ProviderIdentity::new("secrets_test_env_only")),
            Some("env_value".to_string())
        );
        std::env::remove_var("SECRETS_TEST_ENV_ONLY_API_KEY");
    }

    #[test]
    fn test_local_overrides_env() {
        std::env::set_var("SECRETS_TEST_LAYERED", "env_value");
        let dir = tempdir().unwrap();
        let mut store = SecretStore::new(Some(dir.path().to_path_buf())).unwrap();
        store
            .set_local("SECRETS_TEST_LAYERED", "local_value".to_string())
            .unwrap();
        assert_eq!(store.get("SECRETS_TEST_LAYERED"), Some("local_value".to_string()));

        // persisted and reloaded
        let reloaded = SecretStore::new(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(reloaded.get("SECRETS_TEST_LAYERED"), Some("local_value".to_string()));
        std::env::remove_var("SECRETS_TEST_LAYERED");
    }

    #[test]
    fn test_mapping_redirects_lookup() {
        std::env::set_var("SECRETS_TEST_REAL_NAME", "mapped");
        let dir = tempdir().unwrap();
        let mut store = SecretStore::new(Some(dir.path().to_path_buf())).unwrap();
        store
            .set_mapping("ACME_API_KEY", "SECRETS_TEST_REAL_NAME".to_string())
            .unwrap();
        assert_eq!(
            store.resolve(&ProviderIdentity::new("acme")),
            Some("mapped".to_string())
        );
        std::env::remove_var("SECRETS_TEST_REAL_NAME");
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |identity: &ProviderIdentity| identity.id.map(|id| format!("key-{}", id));
        assert_eq!(
            resolver.resolve(&ProviderIdentity::new("x").with_id(7)),
            Some("key-7".to_string())
        );
        assert_eq!(resolver.resolve(&ProviderIdentity::new("x")), None);
    }
}
