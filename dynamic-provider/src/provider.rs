//! The chat capability shared by static and dynamic providers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// How a provider's behaviour is supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Compiled into the service
    Static,
    /// Supplied as submitted hookscript code
    Dynamic,
}

/// Information about a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub kind: ProviderKind,
    /// Hooks bound for dynamic providers; empty for static ones
    pub hooks: Vec<String>,
}

/// Abstract interface for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a reply to `prompt`. `streaming` selects the streaming
    /// path; either way the full reply is returned.
    async fn chat(
        &self,
        model: &str,
        prompt: &str,
        system_prompt: Option<&str>,
        streaming: bool,
    ) -> ProviderResult<String>;

    /// Get provider information
    fn info(&self) -> ProviderInfo;
}

/// Stub provider with deterministic replies, for tests and local wiring.
#[derive(Debug, Clone)]
pub struct StubProvider {
    name: String,
}

impl StubProvider {
    pub const NAME: &'static str = "stub";

    pub fn new() -> Self {
        Self::named(Self::NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(
        &self,
        model: &str,
        prompt: &str,
        system_prompt: Option<&str>,
        streaming: bool,
    ) -> ProviderResult<String> {
        let mode = if streaming { "stream" } else { "sync" };
        Ok(match system_prompt {
            Some(system) => format!("[{}:{}] ({}) {}", model, mode, system, prompt),
            None => format!("[{}:{}] {}", model, mode, prompt),
        })
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.name.clone(),
            kind: ProviderKind::Static,
            hooks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_provider_echoes() {
        let provider = StubProvider::new();
        let reply = provider.chat("m1", "hello", None, false).await.unwrap();
        assert_eq!(reply, "[m1:sync] hello");
        let reply = provider
            .chat("m1", "hello", Some("be brief"), true)
            .await
            .unwrap();
        assert_eq!(reply, "[m1:stream] (be brief) hello");
    }

    #[test]
    fn test_stub_provider_info() {
        let info = StubProvider::named("echo").info();
        assert_eq!(info.name, "echo");
        assert_eq!(info.kind, ProviderKind::Static);
        assert!(info.hooks.is_empty());
    }
}
