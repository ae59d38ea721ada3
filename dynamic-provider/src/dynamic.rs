//! Providers whose behaviour is supplied as submitted hookscript code.
//!
//! Construction validates the submission, runs it once in the sandbox and
//! extracts its hooks. `chat` then dispatches to the bound hooks from a
//! blocking worker. Guest code always runs on an interpreter thread with a
//! large stack, never on an async executor thread.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use hookscript::{CallArgs, RuntimeError, Value};
use serde_json::Value as JsonValue;

use crate::config::{ConfigBag, SandboxConfig};
use crate::error::{ProviderError, ProviderResult};
use crate::hooks::{self, Hook, HookName, HookSet};
use crate::provider::{LlmProvider, ProviderInfo, ProviderKind};
use crate::sandbox::{on_interpreter_stack, ExecutionNamespace, Sandbox};
use crate::secrets::{CredentialResolver, ProviderIdentity};
use crate::validator::CodeValidator;

/// Optional inputs of [`DynamicProvider::with_options`].
#[derive(Clone, Default)]
pub struct ProviderOptions {
    pub validation_source: Option<String>,
    pub resolver: Option<Arc<dyn CredentialResolver>>,
    pub provider_id: Option<i64>,
    pub sandbox: SandboxConfig,
}

impl ProviderOptions {
    pub fn validation_source(mut self, source: impl Into<String>) -> Self {
        self.validation_source = Some(source.into());
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn provider_id(mut self, id: i64) -> Self {
        self.provider_id = Some(id);
        self
    }

    pub fn sandbox(mut self, config: SandboxConfig) -> Self {
        self.sandbox = config;
        self
    }
}

impl fmt::Debug for ProviderOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderOptions")
            .field("validation_source", &self.validation_source.is_some())
            .field("resolver", &self.resolver.is_some())
            .field("provider_id", &self.provider_id)
            .field("sandbox", &self.sandbox)
            .finish()
    }
}

enum ClientState {
    Pending,
    /// Whatever `initialize_client` returned; held until teardown.
    Ready(Value),
}

/// Everything a hook call needs, shared with blocking workers.
struct HookState {
    hooks: HookSet,
    namespace: ExecutionNamespace,
    client: Mutex<ClientState>,
}

impl HookState {
    /// Runs `initialize_client` unless a previous call already succeeded.
    /// The lock is held throughout so concurrent first calls initialise once.
    fn ensure_client(&self) -> ProviderResult<()> {
        let mut client = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let ClientState::Ready(_) = *client {
            return Ok(());
        }
        let value = match self.hooks.get(HookName::InitializeClient) {
            Some(hook) => hook
                .invoke(CallArgs::default())
                .map_err(|source| ProviderError::HookFailed {
                    hook: HookName::InitializeClient,
                    source,
                })?,
            None => Value::None,
        };
        tracing::debug!(has_client = !value.is_none(), "client initialised");
        *client = ClientState::Ready(value);
        Ok(())
    }

    fn chat(
        &self,
        model: String,
        prompt: String,
        system_prompt: Option<String>,
        streaming: bool,
    ) -> ProviderResult<String> {
        let name = if streaming {
            HookName::ChatStreaming
        } else {
            HookName::ChatSync
        };
        let hook = self.hooks.require(name)?;
        self.ensure_client()?;

        let args = CallArgs::new(vec![
            Value::Str(model),
            Value::Str(prompt),
            system_prompt.map_or(Value::None, Value::Str),
        ]);
        let result = hook
            .invoke(args)
            .map_err(|source| ProviderError::HookFailed { hook: name, source })?;
        reply_text(hook, result)
    }
}

impl Drop for HookState {
    fn drop(&mut self) {
        let client = self.client.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let ClientState::Ready(Value::Instance(instance)) = client {
            instance.clear();
        }
        self.hooks.clear();
        self.namespace.clear();
    }
}

fn reply_text(hook: &Hook, result: Value) -> ProviderResult<String> {
    match result {
        Value::Str(text) => Ok(text),
        Value::None => Err(ProviderError::InvalidResponse {
            hook: hook.name(),
            message: "hook returned None".to_string(),
        }),
        other => hook
            .render(&other)
            .map_err(|source| ProviderError::HookFailed {
                hook: hook.name(),
                source,
            }),
    }
}

/// A provider built from submitted code.
pub struct DynamicProvider {
    name: String,
    source: String,
    validation_source: Option<String>,
    config: ConfigBag,
    sandbox: Sandbox,
    state: Arc<HookState>,
}

impl fmt::Debug for DynamicProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicProvider")
            .field("name", &self.name)
            .field("config_keys", &self.config.keys())
            .field("hooks", &self.state.hooks.bound())
            .finish()
    }
}

impl DynamicProvider {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        config: ConfigBag,
    ) -> ProviderResult<Self> {
        Self::with_options(name, source, config, ProviderOptions::default())
    }

    /// Resolves missing credentials, validates, executes and extracts, in
    /// that order. Any failure aborts construction.
    pub fn with_options(
        name: impl Into<String>,
        source: impl Into<String>,
        config: ConfigBag,
        options: ProviderOptions,
    ) -> ProviderResult<Self> {
        let name = name.into();
        let source = source.into();
        tracing::info!(provider = %name, config_keys = ?config.keys(), "building dynamic provider");

        if let Some(resolver) = &options.resolver {
            if config.api_key().is_none() {
                let mut identity = ProviderIdentity::new(name.clone());
                identity.id = options.provider_id;
                match resolver.resolve(&identity) {
                    Some(key) => {
                        tracing::debug!(provider = %name, "api_key supplied by credential resolver");
                        config.insert("api_key", key);
                    }
                    None => tracing::debug!(provider = %name, "credential resolver had no api_key"),
                }
            }
        }

        let verdict = CodeValidator::validate(&source);
        if !verdict.accepted {
            tracing::info!(provider = %name, reason = %verdict.message, "submission rejected");
            return Err(ProviderError::Validation(verdict.message));
        }

        let (sandbox, namespace, hooks) =
            on_interpreter_stack(|| load(&source, &config, &options.sandbox))??;
        tracing::info!(provider = %name, hooks = ?hooks.bound(), "dynamic provider ready");

        Ok(Self {
            name,
            source,
            validation_source: options.validation_source,
            config,
            sandbox,
            state: Arc::new(HookState {
                hooks,
                namespace,
                client: Mutex::new(ClientState::Pending),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn validation_source(&self) -> Option<&str> {
        self.validation_source.as_deref()
    }

    /// Shared configuration handle. Changes are seen by the next hook call.
    pub fn config(&self) -> &ConfigBag {
        &self.config
    }

    pub fn hooks(&self) -> &HookSet {
        &self.state.hooks
    }

    /// Runs the validation source against the current configuration.
    /// Never fails: every problem is reported as a negative verdict.
    pub fn validate_configuration(&self) -> (bool, String) {
        let Some(source) = self.validation_source.as_deref() else {
            return (true, "No validation code provided".to_string());
        };
        on_interpreter_stack(|| self.run_validation(source))
            .unwrap_or_else(|err| (false, format!("Validation error: {}", err)))
    }

    fn run_validation(&self, source: &str) -> (bool, String) {
        let verdict = CodeValidator::validate(source);
        if !verdict.accepted {
            return (
                false,
                format!("Validation code rejected: {}", verdict.message),
            );
        }

        let seeded = ConfigBag::from_map(self.config.snapshot());
        seeded.insert(
            "config",
            JsonValue::Object(self.config.snapshot().into_iter().collect()),
        );
        let namespace = match self.sandbox.execute(source, &seeded) {
            Ok(namespace) => namespace,
            Err(ProviderError::Execution { source }) => return validation_error(&source),
            Err(err) => return (false, format!("Validation error: {}", err)),
        };
        let outcome = run_validate(&namespace);
        namespace.clear();
        match outcome {
            Ok(verdict) => verdict,
            Err(err) => validation_error(&err),
        }
    }
}

/// Runs a validated submission and extracts its hooks.
fn load(
    source: &str,
    config: &ConfigBag,
    sandbox_config: &SandboxConfig,
) -> ProviderResult<(Sandbox, ExecutionNamespace, HookSet)> {
    let sandbox = Sandbox::new(sandbox_config.clone());
    let namespace = sandbox.execute(source, config)?;
    match hooks::extract(&namespace, config) {
        Ok(hooks) => Ok((sandbox, namespace, hooks)),
        Err(err) => {
            namespace.clear();
            Err(err)
        }
    }
}

fn validation_error(err: &RuntimeError) -> (bool, String) {
    tracing::warn!(error = %err, "validation code failed");
    (false, format!("Validation error: {}", err.message()))
}

fn run_validate(namespace: &ExecutionNamespace) -> Result<(bool, String), RuntimeError> {
    let Some(validate) = namespace.get("validate").filter(Value::is_callable) else {
        return Ok((true, "No validate function found".to_string()));
    };
    let mut evaluator = namespace.runtime().evaluator();
    let mut result = evaluator.call_value(&validate, CallArgs::default())?;
    if let Value::Coroutine(_) = result {
        result = evaluator.await_value(result)?;
    }

    let pair = match &result {
        Value::Tuple(items) if items.len() == 2 => Some((items[0].clone(), items[1].clone())),
        Value::List(items) => {
            let items = items.read().unwrap_or_else(PoisonError::into_inner);
            (items.len() == 2).then(|| (items[0].clone(), items[1].clone()))
        }
        _ => None,
    };
    match pair {
        Some((ok, message)) => Ok((evaluator.is_truthy(&ok)?, evaluator.str_of(&message)?)),
        None => Ok((
            evaluator.is_truthy(&result)?,
            "Validation completed".to_string(),
        )),
    }
}

#[async_trait]
impl LlmProvider for DynamicProvider {
    async fn chat(
        &self,
        model: &str,
        prompt: &str,
        system_prompt: Option<&str>,
        streaming: bool,
    ) -> ProviderResult<String> {
        let state = self.state.clone();
        let model = model.to_string();
        let prompt = prompt.to_string();
        let system_prompt = system_prompt.map(str::to_string);
        tracing::debug!(provider = %self.name, %model, streaming, "dispatching chat");
        tokio::task::spawn_blocking(move || {
            on_interpreter_stack(move || state.chat(model, prompt, system_prompt, streaming))
                .and_then(|reply| reply)
        })
        .await?
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.name.clone(),
            kind: ProviderKind::Dynamic,
            hooks: self
                .state
                .hooks
                .bound()
                .into_iter()
                .map(|hook| hook.to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ECHO_KEY: &str = "def chat_sync(model, prompt, system_prompt=None):\n    return api_key\n";

    fn keyed(key: &str) -> ConfigBag {
        [("api_key", json!(key))].into_iter().collect()
    }

    #[test]
    fn test_forbidden_code_never_runs() {
        let err = DynamicProvider::new("bad", "x = eval('1')\n", ConfigBag::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Code validation failed: Forbidden function call: eval"
        );
    }

    #[test]
    fn test_execution_failure_aborts_construction() {
        let err =
            DynamicProvider::new("bad", "raise ValueError('nope')\n", ConfigBag::new()).unwrap_err();
        assert!(matches!(err, ProviderError::Execution { .. }));
    }

    #[test]
    fn test_huge_repetition_is_an_execution_error() {
        for source in ["x = 'ab' * (2 ** 62)\n", "x = [1, 2] * (2 ** 62)\n"] {
            match DynamicProvider::new("t", source, ConfigBag::new()) {
                Err(ProviderError::Execution { source }) => {
                    assert_eq!(source.exception_name(), "MemoryError")
                }
                other => panic!("expected an execution error, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[tokio::test]
    async fn test_deep_guest_recursion_within_limit_completes() {
        let provider = DynamicProvider::new(
            "deep",
            "def down(n):\n    if n == 0:\n        return 'bottom'\n    return down(n - 1)\n\ndef chat_sync(model, prompt, system_prompt=None):\n    return down(190)\n",
            ConfigBag::new(),
        )
        .unwrap();
        assert_eq!(provider.chat("m", "p", None, false).await.unwrap(), "bottom");
    }

    #[tokio::test]
    async fn test_runaway_recursion_is_a_hook_error() {
        let provider = DynamicProvider::new(
            "runaway",
            "def down(n):\n    return down(n + 1)\n\ndef chat_sync(model, prompt, system_prompt=None):\n    return down(0)\n",
            ConfigBag::new(),
        )
        .unwrap();
        match provider.chat("m", "p", None, false).await {
            Err(ProviderError::HookFailed { source, .. }) => {
                assert_eq!(source.exception_name(), "RecursionError")
            }
            other => panic!("expected RecursionError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_is_cleared_on_drop() {
        let provider = DynamicProvider::new(
            "client",
            "class Client:\n    def __init__(self):\n        self.me = self\n\ndef initialize_client():\n    return Client()\n\ndef chat_sync(model, prompt, system_prompt=None):\n    return 'ok'\n",
            ConfigBag::new(),
        )
        .unwrap();
        assert_eq!(provider.chat("m", "p", None, false).await.unwrap(), "ok");

        let client = match &*provider.state.client.lock().unwrap() {
            ClientState::Ready(Value::Instance(instance)) => instance.clone(),
            _ => panic!("client not initialised"),
        };
        assert!(client.attrs.read().unwrap().contains_key("me"));

        drop(provider);
        assert!(client.attrs.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fixed_reply_and_missing_streaming_hook() {
        let provider = DynamicProvider::new(
            "echo",
            "def chat_sync(model, prompt, system_prompt=None):\n    return f\"{model}:{prompt}\"\n",
            ConfigBag::new(),
        )
        .unwrap();
        assert_eq!(
            provider.chat("gpt-x", "hello", None, false).await.unwrap(),
            "gpt-x:hello"
        );
        let err = provider.chat("gpt-x", "hello", None, true).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::HookMissing {
                hook: HookName::ChatStreaming
            }
        ));
        // the failed streaming call leaves the sync path intact
        assert!(provider.chat("gpt-x", "again", None, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_resolver_fills_missing_key() {
        let resolver: Arc<dyn CredentialResolver> = Arc::new(|identity: &ProviderIdentity| {
            identity.id.map(|id| format!("resolved-{}", id))
        });
        let provider = DynamicProvider::with_options(
            "keyed",
            ECHO_KEY,
            ConfigBag::new(),
            ProviderOptions::default().resolver(resolver).provider_id(9),
        )
        .unwrap();
        assert_eq!(provider.chat("m", "p", None, false).await.unwrap(), "resolved-9");
    }

    #[tokio::test]
    async fn test_resolver_not_consulted_when_key_present() {
        let resolver: Arc<dyn CredentialResolver> =
            Arc::new(|_: &ProviderIdentity| Some("resolved".to_string()));
        let provider = DynamicProvider::with_options(
            "keyed",
            ECHO_KEY,
            keyed("configured"),
            ProviderOptions::default().resolver(resolver),
        )
        .unwrap();
        assert_eq!(provider.chat("m", "p", None, false).await.unwrap(), "configured");
    }

    #[tokio::test]
    async fn test_none_reply_is_invalid_and_other_values_render() {
        let provider = DynamicProvider::new(
            "odd",
            "def chat_sync(model, prompt, system_prompt=None):\n    return None\n\ndef chat_streaming(model, prompt, system_prompt=None):\n    return [1, 2]\n",
            ConfigBag::new(),
        )
        .unwrap();
        assert!(matches!(
            provider.chat("m", "p", None, false).await,
            Err(ProviderError::InvalidResponse { .. })
        ));
        assert_eq!(provider.chat("m", "p", None, true).await.unwrap(), "[1, 2]");
    }

    #[test]
    fn test_validate_configuration_paths() {
        let cases = [
            (None, (true, "No validation code provided")),
            (Some("x = 1\n"), (true, "No validate function found")),
            (
                Some("def validate():\n    return (len(api_key) > 3, 'key ok')\n"),
                (true, "key ok"),
            ),
            (
                Some("def validate():\n    return config['api_key'] == 'nope'\n"),
                (false, "Validation completed"),
            ),
            (
                Some("def validate():\n    raise ValueError('missing api_key')\n"),
                (false, "Validation error: missing api_key"),
            ),
        ];
        for (validation, expected) in cases {
            let mut options = ProviderOptions::default();
            options.validation_source = validation.map(str::to_string);
            let provider =
                DynamicProvider::with_options("v", ECHO_KEY, keyed("secret"), options).unwrap();
            let (ok, message) = provider.validate_configuration();
            assert_eq!((ok, message.as_str()), expected, "{:?}", validation);
        }
    }

    #[test]
    fn test_rejected_validation_code() {
        let provider = DynamicProvider::with_options(
            "v",
            ECHO_KEY,
            ConfigBag::new(),
            ProviderOptions::default().validation_source("def validate():\n    return exec('1')\n"),
        )
        .unwrap();
        let (ok, message) = provider.validate_configuration();
        assert!(!ok);
        assert_eq!(
            message,
            "Validation code rejected: Forbidden function call: exec"
        );
    }

    #[test]
    fn test_info_lists_bound_hooks() {
        let provider = DynamicProvider::new("echo", ECHO_KEY, ConfigBag::new()).unwrap();
        let info = provider.info();
        assert_eq!(info.kind, ProviderKind::Dynamic);
        assert_eq!(info.hooks, vec!["chat_sync".to_string()]);
    }
}
