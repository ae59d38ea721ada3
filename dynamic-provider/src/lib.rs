//! Dynamic LLM providers.
//!
//! Administrators submit hookscript code describing how to reach an LLM
//! backend. The code is vetted by [`validator::CodeValidator`], executed
//! once by [`sandbox::Sandbox`], and its hooks are located by
//! [`hooks::extract`]. The resulting [`DynamicProvider`] implements the
//! same [`LlmProvider`] interface as compiled-in providers, and
//! [`ProviderRegistry`] builds either kind by name.
//!
//! The sandbox is a restricted namespace inside the service process, not
//! an isolation boundary. Only run code from trusted administrators.

pub mod config;
pub mod dynamic;
pub mod error;
pub mod hooks;
pub mod provider;
pub mod registry;
pub mod sandbox;
pub mod secrets;
pub mod templates;
pub mod validator;

pub use config::{ConfigBag, SandboxConfig, ToolConfig};
pub use dynamic::{DynamicProvider, ProviderOptions};
pub use error::{ProviderError, ProviderResult};
pub use hooks::{extract, Hook, HookName, HookSet};
pub use provider::{LlmProvider, ProviderInfo, ProviderKind, StubProvider};
pub use registry::{
    chat_with_llm, check_dependencies, test_provider, validate_submission, CodeValidationReport,
    DependencyReport, ProviderDefinition, ProviderRegistry, ProviderTestReport,
    ProviderTestRequest,
};
pub use sandbox::{ExecutionNamespace, Sandbox};
pub use secrets::{CredentialResolver, ProviderIdentity, SecretStore};
pub use templates::{available_templates, code_template, CodeTemplate};
pub use validator::{CodeValidator, ValidationVerdict};
