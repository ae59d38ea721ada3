//! Hook extraction: finds the three provider hooks in an executed
//! submission and wraps them so each call sees the live configuration.
//!
//! Phase A binds flat functions by exact name. Only when it binds nothing
//! does Phase B walk the defined classes, instantiate them with a fixed
//! ladder of constructor strategies and bind methods by exact name or by
//! the alias table. Phase B is kept for submissions written against the
//! older class-based shape.

use std::fmt;
use std::sync::Arc;

use hookscript::{CallArgs, Class, Environment, Runtime, RuntimeError, RuntimeResult, Value};
use indexmap::IndexMap;

use crate::config::ConfigBag;
use crate::error::{ProviderError, ProviderResult};
use crate::sandbox::ExecutionNamespace;

/// The three extension points a submission can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookName {
    InitializeClient,
    ChatSync,
    ChatStreaming,
}

impl HookName {
    pub const ALL: [HookName; 3] = [
        HookName::InitializeClient,
        HookName::ChatSync,
        HookName::ChatStreaming,
    ];

    pub fn canonical(self) -> &'static str {
        match self {
            HookName::InitializeClient => "initialize_client",
            HookName::ChatSync => "chat_sync",
            HookName::ChatStreaming => "chat_streaming",
        }
    }

    /// Underscore-prefixed spelling used by older submissions.
    pub fn legacy(self) -> &'static str {
        match self {
            HookName::InitializeClient => "_initialize_client",
            HookName::ChatSync => "_chat_sync",
            HookName::ChatStreaming => "_chat_streaming",
        }
    }

    /// Exact names bound for this hook, canonical first.
    pub fn spellings(self) -> [&'static str; 2] {
        [self.canonical(), self.legacy()]
    }

    /// Method names accepted for this hook on class-based submissions.
    pub fn aliases(self) -> &'static [&'static str] {
        HOOK_ALIASES
            .iter()
            .find(|(hook, _)| *hook == self)
            .map(|(_, aliases)| *aliases)
            .unwrap_or(&[])
    }

    pub fn required_signatures() -> &'static str {
        "initialize_client(), chat_sync(model, prompt, system_prompt=None), chat_streaming(model, prompt, system_prompt=None)"
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

/// Alias table for Phase B, in lookup order.
pub const HOOK_ALIASES: &[(HookName, &[&str])] = &[
    (
        HookName::InitializeClient,
        &["initialize", "setup", "init_client"],
    ),
    (HookName::ChatSync, &["chat", "generate", "complete"]),
    (
        HookName::ChatStreaming,
        &["chat_stream", "stream", "generate_stream"],
    ),
];

/// An extracted callable bound to the configuration bag it reads.
#[derive(Clone)]
pub struct Hook {
    name: HookName,
    bound_name: String,
    callable: Value,
    config: ConfigBag,
    runtime: Runtime,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("bound_name", &self.bound_name)
            .finish()
    }
}

/// Module scope a callable resolves free names through, if it has one.
fn captured_scope(callable: &Value) -> Option<Arc<Environment>> {
    match callable {
        Value::Function(function) => Some(function.module.clone()),
        Value::BoundMethod(method) => captured_scope(&method.method),
        _ => None,
    }
}

impl Hook {
    fn new(
        name: HookName,
        bound_name: impl Into<String>,
        callable: Value,
        config: &ConfigBag,
        runtime: &Runtime,
    ) -> Self {
        Self {
            name,
            bound_name: bound_name.into(),
            callable,
            config: config.clone(),
            runtime: runtime.clone(),
        }
    }

    pub fn name(&self) -> HookName {
        self.name
    }

    /// Name the hook was found under, `Class.method` for Phase B hooks.
    pub fn bound_name(&self) -> &str {
        &self.bound_name
    }

    pub fn is_async(&self) -> bool {
        match &self.callable {
            Value::Function(function) => function.is_async(),
            Value::BoundMethod(method) => {
                matches!(&method.method, Value::Function(function) if function.is_async())
            }
            _ => false,
        }
    }

    /// Copies the current configuration into the callable's module scope.
    fn inject_config(&self) {
        if let Some(scope) = captured_scope(&self.callable) {
            scope.merge(self.config.to_script_values());
        }
    }

    /// Calls the hook with the latest configuration visible to it. A
    /// coroutine result is driven to completion before returning.
    pub fn invoke(&self, args: CallArgs) -> RuntimeResult<Value> {
        self.inject_config();
        let mut evaluator = self.runtime.evaluator();
        let result = evaluator.call_value(&self.callable, args)?;
        match result {
            Value::Coroutine(_) => evaluator.await_value(result),
            other => Ok(other),
        }
    }

    /// Text form of a hook result, honouring user `__str__`.
    pub fn render(&self, value: &Value) -> RuntimeResult<String> {
        self.runtime.evaluator().str_of(value)
    }
}

/// Hooks bound for one provider instance. Any of them may be absent.
#[derive(Clone, Debug, Default)]
pub struct HookSet {
    initialize_client: Option<Hook>,
    chat_sync: Option<Hook>,
    chat_streaming: Option<Hook>,
    /// Class instance serving as receiver of Phase B hooks.
    receiver: Option<Value>,
    class_name: Option<String>,
}


impl HookSet {
    pub fn get(&self, name: HookName) -> Option<&Hook> {
        match name {
            HookName::InitializeClient => self.initialize_client.as_ref(),
            HookName::ChatSync => self.chat_sync.as_ref(),
            HookName::ChatStreaming => self.chat_streaming.as_ref(),
        }
    }

    fn slot_mut(&mut self, name: HookName) -> &mut Option<Hook> {
        match name {
            HookName::InitializeClient => &mut self.initialize_client,
            HookName::ChatSync => &mut self.chat_sync,
            HookName::ChatStreaming => &mut self.chat_streaming,
        }
    }

    /// The hook, or `HookMissing` naming it.
    pub fn require(&self, name: HookName) -> ProviderResult<&Hook> {
        self.get(name).ok_or(ProviderError::HookMissing { hook: name })
    }

    /// Fails on the first missing chat hook. `initialize_client` is
    /// optional and never reported.
    pub fn ensure_complete(&self) -> ProviderResult<()> {
        self.require(HookName::ChatSync)?;
        self.require(HookName::ChatStreaming)?;
        Ok(())
    }

    /// Hooks present, in canonical order.
    pub fn bound(&self) -> Vec<HookName> {
        HookName::ALL
            .into_iter()
            .filter(|name| self.get(*name).is_some())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bound().is_empty()
    }

    pub fn receiver(&self) -> Option<&Value> {
        self.receiver.as_ref()
    }

    /// Class the hooks were taken from, for Phase B extractions.
    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// Releases the receiver instance's attributes.
    pub(crate) fn clear(&mut self) {
        if let Some(Value::Instance(instance)) = self.receiver.take() {
            instance.clear();
        }
        self.initialize_client = None;
        self.chat_sync = None;
        self.chat_streaming = None;
    }
}

/// Argument shapes tried, in order, when instantiating a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructorStrategy {
    /// `Class(api_key=<config api_key>)`, when that key is truthy
    ApiKeyKeyword,
    /// `Class(<resolved api key>)`, when that key is truthy
    ApiKeyPositional,
    /// `Class(**config)`
    ConfigKeywords,
    /// `Class()`
    NoArguments,
}

impl ConstructorStrategy {
    pub const ORDER: [ConstructorStrategy; 4] = [
        ConstructorStrategy::ApiKeyKeyword,
        ConstructorStrategy::ApiKeyPositional,
        ConstructorStrategy::ConfigKeywords,
        ConstructorStrategy::NoArguments,
    ];

    /// Call arguments for this strategy, or `None` when it does not apply.
    fn arguments(self, config: &[(String, Value)], resolved_key: Option<&Value>) -> Option<CallArgs> {
        match self {
            ConstructorStrategy::ApiKeyKeyword => config
                .iter()
                .find(|(key, value)| key == "api_key" && value.is_truthy())
                .map(|(_, value)| CallArgs::default().keyword("api_key", value.clone())),
            ConstructorStrategy::ApiKeyPositional => resolved_key
                .filter(|key| key.is_truthy())
                .map(|key| CallArgs::new(vec![key.clone()])),
            ConstructorStrategy::ConfigKeywords => {
                let keywords: IndexMap<String, Value> = config.iter().cloned().collect();
                Some(CallArgs::with_keywords(Vec::new(), keywords))
            }
            ConstructorStrategy::NoArguments => Some(CallArgs::default()),
        }
    }
}

/// Locates hooks in an executed namespace.
pub struct HookExtractor<'a> {
    namespace: &'a ExecutionNamespace,
    config: &'a ConfigBag,
    resolved_key: Option<Value>,
}

impl<'a> HookExtractor<'a> {
    pub fn new(namespace: &'a ExecutionNamespace, config: &'a ConfigBag) -> Self {
        let resolved_key = config.api_key().map(Value::Str);
        Self {
            namespace,
            config,
            resolved_key,
        }
    }

    /// Overrides the key used by the positional constructor strategy.
    pub fn with_resolved_key(mut self, key: Option<String>) -> Self {
        self.resolved_key = key.map(Value::Str);
        self
    }

    pub fn extract(&self) -> ProviderResult<HookSet> {
        let hooks = self.extract_functions();
        if !hooks.is_empty() {
            tracing::debug!(hooks = ?hooks.bound(), "bound flat function hooks");
            return Ok(hooks);
        }
        self.extract_from_classes()
    }

    fn runtime(&self) -> &Runtime {
        self.namespace.runtime()
    }

    /// Phase A: top-level callables under an exact hook name.
    fn extract_functions(&self) -> HookSet {
        let mut hooks = HookSet::default();
        for name in HookName::ALL {
            let found = name.spellings().into_iter().find_map(|spelling| {
                self.namespace
                    .get(spelling)
                    .filter(Value::is_callable)
                    .map(|callable| (spelling, callable))
            });
            if let Some((spelling, callable)) = found {
                *hooks.slot_mut(name) =
                    Some(Hook::new(name, spelling, callable, self.config, self.runtime()));
            }
        }
        hooks
    }

    /// Phase B: the first class, in definition order, contributing a hook.
    /// Only classes written in the submission count; imported SDK classes
    /// such as `OpenAI` are skipped.
    fn extract_from_classes(&self) -> ProviderResult<HookSet> {
        let classes: Vec<(String, Arc<Class>)> = self
            .namespace
            .bindings()
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::Class(class) if class.scripted => Some((name, class)),
                _ => None,
            })
            .collect();
        if classes.is_empty() {
            tracing::debug!("no hook functions or classes defined");
            return Ok(HookSet::default());
        }

        let mut uninstantiable = Vec::new();
        for (name, class) in &classes {
            let Some(instance) = self.instantiate(name, class) else {
                uninstantiable.push(name.clone());
                continue;
            };
            let hooks = self.bind_methods(name, instance);
            if hooks.is_empty() {
                tracing::debug!(class = %name, "class yielded no hooks");
                continue;
            }
            tracing::debug!(class = %name, hooks = ?hooks.bound(), "bound class hooks");
            return Ok(hooks);
        }

        if uninstantiable.len() == classes.len() {
            return Err(ProviderError::InstantiationExhausted {
                classes: uninstantiable,
            });
        }
        Ok(HookSet::default())
    }

    fn instantiate(&self, name: &str, class: &Arc<Class>) -> Option<Value> {
        let config = self.config.to_script_values();
        for strategy in ConstructorStrategy::ORDER {
            let Some(args) = strategy.arguments(&config, self.resolved_key.as_ref()) else {
                continue;
            };
            match self.runtime().evaluator().instantiate(class, args) {
                Ok(instance) => {
                    tracing::debug!(class = %name, ?strategy, "instantiated class");
                    return Some(instance);
                }
                Err(err) => {
                    tracing::debug!(class = %name, ?strategy, error = %err, "instantiation failed");
                }
            }
        }
        None
    }

    fn bind_methods(&self, class_name: &str, instance: Value) -> HookSet {
        let mut hooks = HookSet::default();
        for name in HookName::ALL {
            let candidates = name.spellings().into_iter().chain(name.aliases().iter().copied());
            for method in candidates {
                if let Some(callable) = self.method(&instance, method) {
                    let bound_name = format!("{}.{}", class_name, method);
                    *hooks.slot_mut(name) =
                        Some(Hook::new(name, bound_name, callable, self.config, self.runtime()));
                    break;
                }
            }
        }
        if !hooks.is_empty() {
            hooks.receiver = Some(instance);
            hooks.class_name = Some(class_name.to_string());
        }
        hooks
    }

    fn method(&self, instance: &Value, name: &str) -> Option<Value> {
        match self.runtime().evaluator().get_attribute(instance, name) {
            Ok(value) if value.is_callable() => Some(value),
            Ok(_) | Err(RuntimeError::AttributeError(_)) => None,
            Err(err) => {
                tracing::debug!(method = name, error = %err, "method lookup failed");
                None
            }
        }
    }
}

/// Extracts the hooks of `namespace`, bound to `config`.
pub fn extract(namespace: &ExecutionNamespace, config: &ConfigBag) -> ProviderResult<HookSet> {
    HookExtractor::new(namespace, config).extract()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Sandbox;
    use serde_json::json;

    fn run(source: &str, config: &ConfigBag) -> (ExecutionNamespace, ProviderResult<HookSet>) {
        let namespace = Sandbox::default().execute(source, config).unwrap();
        let hooks = extract(&namespace, config);
        (namespace, hooks)
    }

    fn chat_args() -> CallArgs {
        CallArgs::new(vec![Value::str("m"), Value::str("p"), Value::None])
    }

    #[test]
    fn test_alias_table_lookup() {
        assert_eq!(HookName::ChatSync.aliases(), &["chat", "generate", "complete"]);
        assert_eq!(HookName::InitializeClient.legacy(), "_initialize_client");
        assert_eq!(HookName::ChatStreaming.to_string(), "chat_streaming");
    }

    #[test]
    fn test_flat_functions_bound_by_exact_name() {
        let config = ConfigBag::new();
        let (_ns, hooks) = run(
            "def initialize_client():\n    return 'client'\n\ndef chat_sync(model, prompt, system_prompt=None):\n    return 'fixed'\n\nasync def chat_streaming(model, prompt, system_prompt=None):\n    return 'streamed'\n",
            &config,
        );
        let hooks = hooks.unwrap();
        assert_eq!(hooks.bound(), HookName::ALL.to_vec());
        assert!(hooks.class_name().is_none());
        let sync = hooks.require(HookName::ChatSync).unwrap();
        assert!(matches!(sync.invoke(chat_args()).unwrap(), Value::Str(s) if s == "fixed"));
        let streaming = hooks.require(HookName::ChatStreaming).unwrap();
        assert!(streaming.is_async());
        assert!(matches!(streaming.invoke(chat_args()).unwrap(), Value::Str(s) if s == "streamed"));
    }

    #[test]
    fn test_legacy_spellings_bound() {
        let config = ConfigBag::new();
        let (_ns, hooks) = run(
            "def _chat_sync(model, prompt, system_prompt=None):\n    return 'legacy'\n",
            &config,
        );
        let hooks = hooks.unwrap();
        assert_eq!(hooks.require(HookName::ChatSync).unwrap().bound_name(), "_chat_sync");
        assert!(matches!(
            hooks.require(HookName::ChatStreaming),
            Err(ProviderError::HookMissing { hook: HookName::ChatStreaming })
        ));
    }

    #[test]
    fn test_classes_ignored_when_functions_found() {
        let config = ConfigBag::new();
        let (_ns, hooks) = run(
            "class P:\n    def chat(self, m, p, s=None):\n        return 'class'\n\ndef chat_sync(m, p, s=None):\n    return 'flat'\n",
            &config,
        );
        let hooks = hooks.unwrap();
        assert!(hooks.receiver().is_none());
        assert_eq!(hooks.bound(), vec![HookName::ChatSync]);
    }

    #[test]
    fn test_class_aliases_bound() {
        let config: ConfigBag = [("api_key", json!("k1"))].into_iter().collect();
        let (_ns, hooks) = run(
            "class Provider:\n    def __init__(self, api_key):\n        self.api_key = api_key\n\n    def generate(self, model, prompt, system_prompt=None):\n        return model + ':' + self.api_key\n\n    def stream(self, model, prompt, system_prompt=None):\n        return 'streamed'\n",
            &config,
        );
        let hooks = hooks.unwrap();
        assert_eq!(hooks.class_name(), Some("Provider"));
        let sync = hooks.require(HookName::ChatSync).unwrap();
        assert_eq!(sync.bound_name(), "Provider.generate");
        assert!(matches!(sync.invoke(chat_args()).unwrap(), Value::Str(s) if s == "m:k1"));
        assert_eq!(
            hooks.require(HookName::ChatStreaming).unwrap().bound_name(),
            "Provider.stream"
        );
        assert!(hooks.get(HookName::InitializeClient).is_none());
    }

    #[test]
    fn test_keyword_api_key_preferred_over_positional() {
        let config: ConfigBag = [("api_key", json!("k1"))].into_iter().collect();
        let (_ns, hooks) = run(
            "class P:\n    def __init__(self, key=None, api_key=None):\n        self.how = 'keyword' if api_key else 'positional'\n\n    def chat(self, m, p, s=None):\n        return self.how\n",
            &config,
        );
        let sync = hooks.unwrap();
        let sync = sync.require(HookName::ChatSync).unwrap();
        assert!(matches!(sync.invoke(chat_args()).unwrap(), Value::Str(s) if s == "keyword"));
    }

    #[test]
    fn test_strategy_ladder_falls_through() {
        // no api_key: keyword and positional strategies are skipped, **config fails
        let config: ConfigBag = [("model_hint", json!("x"))].into_iter().collect();
        let (_ns, hooks) = run(
            "class P:\n    def __init__(self):\n        self.ready = True\n\n    def complete(self, m, p, s=None):\n        return str(self.ready)\n",
            &config,
        );
        let hooks = hooks.unwrap();
        let sync = hooks.require(HookName::ChatSync).unwrap();
        assert!(matches!(sync.invoke(chat_args()).unwrap(), Value::Str(s) if s == "True"));
    }

    #[test]
    fn test_first_class_with_hooks_wins() {
        let config = ConfigBag::new();
        let (_ns, hooks) = run(
            "class Helper:\n    def unrelated(self):\n        return 1\n\nclass First:\n    def chat(self, m, p, s=None):\n        return 'first'\n\nclass Second:\n    def chat(self, m, p, s=None):\n        return 'second'\n",
            &config,
        );
        assert_eq!(hooks.unwrap().class_name(), Some("First"));
    }

    #[cfg(feature = "sdk-modules")]
    #[test]
    fn test_imported_sdk_class_not_bound() {
        let config: ConfigBag = [("api_key", json!("k1"))].into_iter().collect();
        let (_ns, hooks) = run(
            "from openai import OpenAI\n\nclass MyProvider:\n    def __init__(self, api_key=None):\n        self.api_key = api_key\n\n    def chat(self, model, prompt, system_prompt=None):\n        return 'mine:' + prompt\n",
            &config,
        );
        let hooks = hooks.unwrap();
        assert_eq!(hooks.class_name(), Some("MyProvider"));
        let sync = hooks.require(HookName::ChatSync).unwrap();
        assert_eq!(sync.bound_name(), "MyProvider.chat");
        assert!(matches!(sync.invoke(chat_args()).unwrap(), Value::Str(s) if s == "mine:p"));
    }

    #[test]
    fn test_imported_classes_alone_yield_no_hooks() {
        let config = ConfigBag::new();
        let (_ns, hooks) = run("from datetime import datetime\n", &config);
        assert!(hooks.unwrap().is_empty());
    }

    #[test]
    fn test_uninstantiable_classes_exhaust() {
        let config = ConfigBag::new();
        let (_ns, hooks) = run(
            "class Broken:\n    def __init__(self, a, b, c):\n        pass\n\n    def chat(self, m, p, s=None):\n        return 'x'\n",
            &config,
        );
        match hooks {
            Err(ProviderError::InstantiationExhausted { classes }) => {
                assert_eq!(classes, vec!["Broken".to_string()])
            }
            other => panic!("expected InstantiationExhausted, got {:?}", other.map(|h| h.bound())),
        }
    }

    #[test]
    fn test_empty_namespace_yields_empty_hook_set() {
        let config = ConfigBag::new();
        let (_ns, hooks) = run("x = 1\n", &config);
        let hooks = hooks.unwrap();
        assert!(hooks.is_empty());
        assert!(matches!(
            hooks.ensure_complete(),
            Err(ProviderError::HookMissing { hook: HookName::ChatSync })
        ));
    }

    #[test]
    fn test_wrapper_injects_latest_config() {
        let config: ConfigBag = [("api_key", json!("old"))].into_iter().collect();
        let (_ns, hooks) = run(
            "def chat_sync(model, prompt, system_prompt=None):\n    return api_key\n",
            &config,
        );
        let hooks = hooks.unwrap();
        let sync = hooks.require(HookName::ChatSync).unwrap();
        assert!(matches!(sync.invoke(chat_args()).unwrap(), Value::Str(s) if s == "old"));
        config.insert("api_key", "new");
        assert!(matches!(sync.invoke(chat_args()).unwrap(), Value::Str(s) if s == "new"));
    }
}
