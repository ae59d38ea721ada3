//! Provider lookup by name, plus the management operations an admin
//! surface needs around submissions: validation reports, dependency
//! checks and one-shot test runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::{ConfigBag, SandboxConfig};
use crate::dynamic::{DynamicProvider, ProviderOptions};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{LlmProvider, StubProvider};
use crate::sandbox::{Sandbox, SDK_MODULE_NAMES};
use crate::secrets::CredentialResolver;
use crate::validator::{CodeValidator, PASSED_MESSAGE};

/// Builds a compiled-in provider from a configuration bag.
pub type StaticConstructor =
    Arc<dyn Fn(&ConfigBag) -> ProviderResult<Box<dyn LlmProvider>> + Send + Sync>;

type ProviderBuild = Box<dyn FnOnce() -> ProviderResult<Box<dyn LlmProvider>> + Send>;

fn default_active() -> bool {
    true
}

/// What an external store keeps about a dynamic provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDefinition {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub source: String,
    #[serde(default)]
    pub validation_source: Option<String>,
    #[serde(default)]
    pub required_dependencies: Vec<String>,
    #[serde(default)]
    pub config_schema: JsonValue,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl ProviderDefinition {
    pub fn new(
        name: &str,
        display_name: impl Into<String>,
        source: &str,
    ) -> ProviderResult<Self> {
        Ok(Self {
            name: Self::normalize_name(name)?,
            display_name: display_name.into(),
            id: None,
            base_url: None,
            source: Self::normalize_source(source)?,
            validation_source: None,
            required_dependencies: Vec::new(),
            config_schema: JsonValue::Object(Default::default()),
            is_active: true,
        })
    }

    /// Lower-cased, trimmed name. Only alphanumerics, `_` and `-` are
    /// accepted.
    pub fn normalize_name(name: &str) -> ProviderResult<String> {
        if name.trim().is_empty() {
            return Err(ProviderError::InvalidDefinition(
                "Provider name cannot be empty".to_string(),
            ));
        }
        let stripped: String = name.chars().filter(|c| *c != '_' && *c != '-').collect();
        if stripped.is_empty() || !stripped.chars().all(char::is_alphanumeric) {
            return Err(ProviderError::InvalidDefinition(
                "Provider name must contain only alphanumeric characters, underscores, and hyphens"
                    .to_string(),
            ));
        }
        Ok(name.to_lowercase().trim().to_string())
    }

    pub fn normalize_source(source: &str) -> ProviderResult<String> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(ProviderError::InvalidDefinition(
                "Provider code cannot be empty".to_string(),
            ));
        }
        Ok(trimmed.to_string())
    }

    /// Re-applies the name and source rules, e.g. after deserialising.
    pub fn normalized(mut self) -> ProviderResult<Self> {
        self.name = Self::normalize_name(&self.name)?;
        self.source = Self::normalize_source(&self.source)?;
        Ok(self)
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_validation_source(mut self, source: impl Into<String>) -> Self {
        self.validation_source = Some(source.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config_schema(mut self, schema: JsonValue) -> Self {
        self.config_schema = schema;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Registry of static provider constructors and dynamic definitions.
#[derive(Default)]
pub struct ProviderRegistry {
    static_providers: HashMap<String, StaticConstructor>,
    dynamic_providers: HashMap<String, ProviderDefinition>,
    resolver: Option<Arc<dyn CredentialResolver>>,
    sandbox: SandboxConfig,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_providers())
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in [`StubProvider`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_static(
            StubProvider::NAME,
            Arc::new(|_: &ConfigBag| Ok(Box::new(StubProvider::new()) as Box<dyn LlmProvider>)),
        );
        registry
    }

    /// Consulted for a missing `api_key` on every dynamic build.
    pub fn with_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_sandbox_config(mut self, config: SandboxConfig) -> Self {
        self.sandbox = config;
        self
    }

    pub fn register_static(&mut self, name: &str, constructor: StaticConstructor) {
        self.static_providers.insert(name.to_lowercase(), constructor);
    }

    /// Accepts a dynamic definition once its code validates. Replaces any
    /// previous definition of the same name.
    pub fn register_definition(&mut self, definition: ProviderDefinition) -> ProviderResult<()> {
        let definition = definition.normalized()?;
        let report = validate_submission(
            &definition.source,
            definition.validation_source.as_deref(),
        );
        if !report.is_valid {
            return Err(ProviderError::Validation(report.message));
        }
        tracing::info!(
            provider = %definition.name,
            active = definition.is_active,
            "registered dynamic provider"
        );
        self.dynamic_providers
            .insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<ProviderDefinition> {
        self.dynamic_providers.remove(&name.to_lowercase())
    }

    pub fn definition(&self, name: &str) -> Option<&ProviderDefinition> {
        self.dynamic_providers.get(&name.to_lowercase())
    }

    /// Every registered name, inactive definitions included, sorted.
    pub fn available_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .static_providers
            .keys()
            .chain(self.dynamic_providers.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Builds a dynamic provider by name.
    pub fn create_dynamic(&self, name: &str, config: ConfigBag) -> ProviderResult<DynamicProvider> {
        let (definition, options) = self.prepare_dynamic(name, &config)?;
        DynamicProvider::with_options(&definition.name, &definition.source, config, options)
    }

    /// Builds a provider by name. Dynamic definitions shadow static
    /// constructors of the same name.
    pub fn create_provider(
        &self,
        name: &str,
        config: ConfigBag,
    ) -> ProviderResult<Box<dyn LlmProvider>> {
        let build = self.build_plan(name, config)?;
        build()
    }

    /// Resolves `name` to a deferred build, so callers can run the guest
    /// code off the async executor.
    fn build_plan(&self, name: &str, config: ConfigBag) -> ProviderResult<ProviderBuild> {
        let key = name.to_lowercase();
        if self.dynamic_providers.contains_key(&key) {
            let (definition, options) = self.prepare_dynamic(name, &config)?;
            let name = definition.name.clone();
            let source = definition.source.clone();
            return Ok(Box::new(move || {
                let provider = DynamicProvider::with_options(name, source, config, options)?;
                Ok(Box::new(provider) as Box<dyn LlmProvider>)
            }));
        }
        match self.static_providers.get(&key) {
            Some(constructor) => {
                let constructor = constructor.clone();
                Ok(Box::new(move || constructor(&config)))
            }
            None => Err(self.not_found(name)),
        }
    }

    fn prepare_dynamic(
        &self,
        name: &str,
        config: &ConfigBag,
    ) -> ProviderResult<(&ProviderDefinition, ProviderOptions)> {
        let definition = self
            .dynamic_providers
            .get(&name.to_lowercase())
            .ok_or_else(|| self.not_found(name))?;
        if !definition.is_active {
            return Err(ProviderError::Inactive(definition.name.clone()));
        }
        if let Some(base_url) = &definition.base_url {
            if !config.contains_key("base_url") {
                config.insert("base_url", base_url.clone());
            }
        }
        let options = ProviderOptions {
            validation_source: definition.validation_source.clone(),
            resolver: self.resolver.clone(),
            provider_id: definition.id,
            sandbox: self.sandbox.clone(),
        };
        Ok((definition, options))
    }

    fn not_found(&self, name: &str) -> ProviderError {
        ProviderError::NotFound {
            name: name.to_string(),
            available: self.available_providers(),
        }
    }
}

/// Builds the named provider and sends it one prompt.
pub async fn chat_with_llm(
    registry: &ProviderRegistry,
    name: &str,
    model: &str,
    prompt: &str,
    system_prompt: Option<&str>,
    streaming: bool,
    config: ConfigBag,
) -> ProviderResult<String> {
    let build = registry.build_plan(name, config)?;
    let provider = tokio::task::spawn_blocking(build).await??;
    provider.chat(model, prompt, system_prompt, streaming).await
}

/// Combined verdict on a submission's source and validation source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeValidationReport {
    pub is_valid: bool,
    pub message: String,
    pub errors: Vec<String>,
}

pub fn validate_submission(source: &str, validation_source: Option<&str>) -> CodeValidationReport {
    let mut errors = Vec::new();
    let verdict = CodeValidator::validate(source);
    if !verdict.accepted {
        errors.push(verdict.message);
    }
    if let Some(validation) = validation_source {
        let verdict = CodeValidator::validate(validation);
        if !verdict.accepted {
            errors.push(format!("Validation code: {}", verdict.message));
        }
    }
    CodeValidationReport {
        is_valid: errors.is_empty(),
        message: if errors.is_empty() {
            PASSED_MESSAGE.to_string()
        } else {
            errors.join("; ")
        },
        errors,
    }
}

/// Default sandbox, built once, answering module availability questions.
static REFERENCE_SANDBOX: Lazy<Sandbox> = Lazy::new(Sandbox::default);

/// Which requested modules submissions can import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    pub available: Vec<String>,
    pub missing: Vec<String>,
    pub install_hint: Option<String>,
}

pub fn check_dependencies<S: AsRef<str>>(required: &[S]) -> DependencyReport {
    let (available, missing): (Vec<String>, Vec<String>) = required
        .iter()
        .map(|name| name.as_ref().trim().to_string())
        .filter(|name| !name.is_empty())
        .partition(|name| REFERENCE_SANDBOX.module_available(name));

    let install_hint = if missing.is_empty() {
        None
    } else if missing
        .iter()
        .any(|name| SDK_MODULE_NAMES.contains(&name.split('.').next().unwrap_or(name)))
    {
        Some("Build dynamic-provider with the `sdk-modules` feature to provide http, openai and anthropic".to_string())
    } else {
        Some(format!(
            "No native module provides {}; call the backend through the `http` module instead",
            missing.join(", ")
        ))
    };
    DependencyReport {
        available,
        missing,
        install_hint,
    }
}

fn default_test_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_test_message() -> String {
    "Hello, this is a test message".to_string()
}

/// One-shot run of unsaved provider code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTestRequest {
    pub source: String,
    #[serde(default)]
    pub config: IndexMap<String, JsonValue>,
    #[serde(default = "default_test_model")]
    pub test_model: String,
    #[serde(default = "default_test_message")]
    pub test_message: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub streaming: bool,
}

impl ProviderTestRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            config: IndexMap::new(),
            test_model: default_test_model(),
            test_message: default_test_message(),
            system_prompt: None,
            streaming: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTestReport {
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<String>,
    /// Seconds spent building the provider and running the chat
    pub execution_time: f64,
}

/// Builds a throw-away provider and runs one chat through it. Failures are
/// reported, never returned.
pub async fn test_provider(request: ProviderTestRequest) -> ProviderTestReport {
    let started = Instant::now();
    let ProviderTestRequest {
        source,
        config,
        test_model,
        test_message,
        system_prompt,
        streaming,
    } = request;

    let outcome = async {
        let provider = tokio::task::spawn_blocking(move || {
            DynamicProvider::new("test_provider", source, ConfigBag::from_map(config))
        })
        .await??;
        provider
            .chat(&test_model, &test_message, system_prompt.as_deref(), streaming)
            .await
    }
    .await;

    let execution_time = started.elapsed().as_secs_f64();
    match outcome {
        Ok(response) => ProviderTestReport {
            success: true,
            response: Some(response),
            error: None,
            execution_time,
        },
        Err(err) => {
            tracing::debug!(error = %err, "provider test failed");
            ProviderTestReport {
                success: false,
                response: None,
                error: Some(err.to_string()),
                execution_time,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ECHO: &str =
        "def chat_sync(model, prompt, system_prompt=None):\n    return model + '|' + prompt\n";

    #[test]
    fn test_name_normalisation() {
        assert_eq!(ProviderDefinition::normalize_name("My-LLM_2").unwrap(), "my-llm_2");
        assert!(ProviderDefinition::normalize_name("  ").is_err());
        assert!(ProviderDefinition::normalize_name("has space").is_err());
        assert!(ProviderDefinition::normalize_name("__").is_err());
        assert!(ProviderDefinition::normalize_name("dots.not.ok").is_err());
    }

    #[test]
    fn test_source_trimmed_and_required() {
        let definition = ProviderDefinition::new("echo", "Echo", "\n\n  x = 1  \n").unwrap();
        assert_eq!(definition.source, "x = 1");
        assert!(ProviderDefinition::new("echo", "Echo", " \n ").is_err());
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let mut registry = ProviderRegistry::new();
        let definition = ProviderDefinition::new("bad", "Bad", "open('/etc/passwd')").unwrap();
        let err = registry.register_definition(definition).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Code validation failed: Forbidden function call: open"
        );
        assert!(registry.available_providers().is_empty());
    }

    #[test]
    fn test_not_found_lists_sorted_names() {
        let mut registry = ProviderRegistry::with_defaults();
        registry
            .register_definition(ProviderDefinition::new("echo", "Echo", ECHO).unwrap())
            .unwrap();
        match registry.create_provider("missing", ConfigBag::new()) {
            Err(err) => assert_eq!(
                err.to_string(),
                "Provider 'missing' not found. Available providers: echo, stub"
            ),
            Ok(_) => panic!("lookup should fail"),
        }
    }

    #[test]
    fn test_inactive_definition_refuses_to_build() {
        let mut registry = ProviderRegistry::new();
        registry
            .register_definition(ProviderDefinition::new("echo", "Echo", ECHO).unwrap().inactive())
            .unwrap();
        assert_eq!(registry.available_providers(), vec!["echo".to_string()]);
        assert!(matches!(
            registry.create_provider("echo", ConfigBag::new()),
            Err(ProviderError::Inactive(name)) if name == "echo"
        ));
    }

    #[tokio::test]
    async fn test_dynamic_shadows_static() {
        let mut registry = ProviderRegistry::with_defaults();
        registry
            .register_definition(ProviderDefinition::new("stub", "Shadow", ECHO).unwrap())
            .unwrap();
        let reply = chat_with_llm(&registry, "STUB", "m", "hi", None, false, ConfigBag::new())
            .await
            .unwrap();
        assert_eq!(reply, "m|hi");
    }

    #[tokio::test]
    async fn test_chat_with_llm_builds_off_the_executor() {
        let built_on = Arc::new(std::sync::Mutex::new(None));
        let mut registry = ProviderRegistry::new();
        let record = built_on.clone();
        registry.register_static(
            "recorder",
            Arc::new(move |_: &ConfigBag| {
                *record.lock().unwrap() = Some(std::thread::current().id());
                Ok(Box::new(StubProvider::new()) as Box<dyn LlmProvider>)
            }),
        );
        let reply = chat_with_llm(&registry, "recorder", "m", "hi", None, false, ConfigBag::new())
            .await
            .unwrap();
        assert_eq!(reply, "[m:sync] hi");
        let builder = built_on.lock().unwrap().expect("constructor ran");
        assert_ne!(builder, std::thread::current().id());
    }

    #[test]
    fn test_test_request_from_json() {
        let request: ProviderTestRequest = serde_json::from_value(json!({
            "source": ECHO,
            "config": {"temperature": 0.2, "api_key": "k"}
        }))
        .unwrap();
        assert_eq!(request.test_model, "gpt-3.5-turbo");
        assert_eq!(
            request.config.keys().collect::<Vec<_>>(),
            vec!["temperature", "api_key"]
        );
        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["config"]["api_key"], json!("k"));
    }

    #[test]
    fn test_base_url_seeded_into_config() {
        let mut registry = ProviderRegistry::new();
        registry
            .register_definition(
                ProviderDefinition::new("echo", "Echo", ECHO)
                    .unwrap()
                    .with_base_url("https://llm.internal"),
            )
            .unwrap();
        let provider = registry.create_dynamic("echo", ConfigBag::new()).unwrap();
        assert_eq!(
            provider.config().get("base_url"),
            Some(json!("https://llm.internal"))
        );
    }

    #[test]
    fn test_validation_report_collects_both_sources() {
        let report = validate_submission("x = 1", Some("def validate():\n    return input()\n"));
        assert!(!report.is_valid);
        assert_eq!(
            report.errors,
            vec!["Validation code: Forbidden function call: input".to_string()]
        );
        let report = validate_submission(ECHO, None);
        assert!(report.is_valid);
        assert_eq!(report.message, "Code validation passed");
    }

    #[test]
    fn test_dependency_report() {
        let report = check_dependencies(&["json", "re", "numpy", " "]);
        assert_eq!(report.available, vec!["json".to_string(), "re".to_string()]);
        assert_eq!(report.missing, vec!["numpy".to_string()]);
        assert!(report.install_hint.unwrap().contains("numpy"));
        assert_eq!(check_dependencies::<&str>(&[]).install_hint, None);
    }

    #[tokio::test]
    async fn test_provider_test_run_reports_outcome() {
        let mut request = ProviderTestRequest::new(ECHO);
        request.test_model = "m".to_string();
        request.test_message = "ping".to_string();
        let report = test_provider(request).await;
        assert!(report.success);
        assert_eq!(report.response.as_deref(), Some("m|ping"));
        assert!(report.execution_time >= 0.0);

        let report = test_provider(ProviderTestRequest::new("def chat_sync(:\n")).await;
        assert!(!report.success);
        assert!(report.error.unwrap().starts_with("Code validation failed: Syntax error"));
    }
}
