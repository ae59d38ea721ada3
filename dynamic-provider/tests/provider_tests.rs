use std::sync::Arc;

use dynamic_provider::{
    code_template, extract, CodeValidator, ConfigBag, DynamicProvider, HookName, LlmProvider,
    ProviderDefinition, ProviderError, ProviderIdentity, ProviderOptions, ProviderRegistry,
    Sandbox, ToolConfig,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn config(key: &str) -> ConfigBag {
    [("api_key", json!(key)), ("max_tokens", json!(64))]
        .into_iter()
        .collect()
}

#[test]
fn test_forbidden_call_is_rejected_before_execution() {
    // the top-level print would run if the sandbox were reached
    let source = "print('executed')\nresult = eval('2 + 2')\n";
    let verdict = CodeValidator::validate(source);
    assert!(!verdict.accepted);
    assert!(verdict.message.contains("eval"));

    match DynamicProvider::new("p", source, ConfigBag::new()) {
        Err(ProviderError::Validation(message)) => assert!(message.contains("eval")),
        other => panic!("expected a validation error, got {:?}", other.map(|p| p.info())),
    }
}

#[test]
fn test_syntax_errors_are_reported_not_raised() {
    for source in ["def f(\n", "class :\n", "x = = 1", "if True\n    pass", "'unterminated"] {
        let verdict = CodeValidator::validate(source);
        assert!(!verdict.accepted, "{}", source);
        assert!(verdict.message.starts_with("Syntax error: "), "{}", verdict.message);
    }
}

#[tokio::test]
async fn test_flat_hooks_return_fixed_strings() {
    let source = "def initialize_client():\n    return 'client'\n\ndef chat_sync(model, prompt, system_prompt=None):\n    return 'fixed reply'\n\ndef chat_streaming(model, prompt, system_prompt=None):\n    return 'fixed stream'\n";
    let provider = DynamicProvider::new("fixed", source, ConfigBag::new()).unwrap();
    assert!(provider.hooks().class_name().is_none());
    assert_eq!(provider.chat("m", "p", None, false).await.unwrap(), "fixed reply");
    assert_eq!(provider.chat("m", "p", None, true).await.unwrap(), "fixed stream");
}

#[tokio::test]
async fn test_class_with_alias_methods_is_used() {
    let source = "class Backend:\n    def __init__(self, api_key):\n        self.api_key = api_key\n\n    def chat(self, model, prompt, system_prompt=None):\n        return 'alias:' + model + ':' + prompt\n";
    let provider = DynamicProvider::new("legacy", source, config("k")).unwrap();
    assert_eq!(provider.hooks().class_name(), Some("Backend"));
    assert_eq!(
        provider.hooks().get(HookName::ChatSync).unwrap().bound_name(),
        "Backend.chat"
    );
    assert_eq!(
        provider.chat("m", "hello", None, false).await.unwrap(),
        "alias:m:hello"
    );
}

#[tokio::test]
async fn test_no_hooks_reports_chat_sync_missing() {
    let provider = DynamicProvider::new("empty", "x = 1\ny = [x, 2]\n", ConfigBag::new()).unwrap();
    let err = provider.chat("m", "p", None, false).await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::HookMissing {
            hook: HookName::ChatSync
        }
    ));
    let message = err.to_string();
    assert!(message.starts_with("chat_sync not implemented in provider code."));
    assert!(message.contains("chat_streaming(model, prompt, system_prompt=None)"));
}

#[tokio::test]
async fn test_config_mutation_is_visible_to_the_next_call() {
    let source = "def chat_sync(model, prompt, system_prompt=None):\n    return api_key\n";
    let provider = DynamicProvider::new("echo-key", source, config("first")).unwrap();
    assert_eq!(provider.chat("m", "p", None, false).await.unwrap(), "first");

    provider.config().insert("api_key", "rotated");
    assert_eq!(provider.chat("m", "p", None, false).await.unwrap(), "rotated");
}

#[test]
fn test_failing_validation_code_yields_negative_verdict() {
    let options = ProviderOptions::default()
        .validation_source("def validate():\n    raise ValueError('api_key looks wrong')\n");
    let provider = DynamicProvider::with_options(
        "checked",
        "def chat_sync(model, prompt, system_prompt=None):\n    return 'ok'\n",
        config("k"),
        options,
    )
    .unwrap();
    let (ok, message) = provider.validate_configuration();
    assert!(!ok);
    assert!(message.contains("api_key looks wrong"));
}

#[tokio::test]
async fn test_model_prompt_scenario() {
    let source = "def chat_sync(model, prompt, system_prompt=None):\n    return f\"{model}:{prompt}\"\n";
    let namespace = Sandbox::default().execute(source, &ConfigBag::new()).unwrap();
    let hooks = extract(&namespace, &ConfigBag::new()).unwrap();
    assert_eq!(hooks.bound(), vec![HookName::ChatSync]);

    let provider = DynamicProvider::new("scenario", source, ConfigBag::new()).unwrap();
    assert_eq!(
        provider.chat("gpt-x", "hello", None, false).await.unwrap(),
        "gpt-x:hello"
    );
    assert!(matches!(
        provider.chat("gpt-x", "hello", None, true).await,
        Err(ProviderError::HookMissing {
            hook: HookName::ChatStreaming
        })
    ));
}

#[tokio::test]
async fn test_async_hooks_are_awaited() {
    let source = "import asyncio\n\nasync def chat_streaming(model, prompt, system_prompt=None):\n    parts = await asyncio.gather(asyncio.to_thread(lambda p: p.upper(), prompt), asyncio.sleep(0, 'x'))\n    return parts[0] + parts[1]\n";
    let provider = DynamicProvider::new("async", source, ConfigBag::new()).unwrap();
    assert_eq!(provider.chat("m", "abc", None, true).await.unwrap(), "ABCx");
}

#[tokio::test]
async fn test_system_prompt_is_forwarded() {
    let source = "def chat_sync(model, prompt, system_prompt=None):\n    if system_prompt is None:\n        return 'none'\n    return system_prompt\n";
    let provider = DynamicProvider::new("sys", source, ConfigBag::new()).unwrap();
    assert_eq!(provider.chat("m", "p", None, false).await.unwrap(), "none");
    assert_eq!(
        provider.chat("m", "p", Some("be terse"), false).await.unwrap(),
        "be terse"
    );
}

#[tokio::test]
async fn test_initialize_client_runs_once_and_retries_after_failure() {
    let source = "attempts = 0\n\ndef initialize_client():\n    global attempts\n    attempts += 1\n    if attempts == 1:\n        raise ConnectionError('backend down')\n    return 'client'\n\ndef chat_sync(model, prompt, system_prompt=None):\n    return str(attempts)\n";
    let provider = DynamicProvider::new("init", source, ConfigBag::new()).unwrap();

    let err = provider.chat("m", "p", None, false).await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::HookFailed {
            hook: HookName::InitializeClient,
            ..
        }
    ));
    assert_eq!(provider.chat("m", "p", None, false).await.unwrap(), "2");
    assert_eq!(provider.chat("m", "p", None, false).await.unwrap(), "2");
}

#[tokio::test]
async fn test_hook_errors_do_not_poison_the_instance() {
    let source = "def chat_sync(model, prompt, system_prompt=None):\n    if prompt == 'fail':\n        raise ValueError('bad prompt')\n    return 'ok'\n";
    let provider = DynamicProvider::new("flaky", source, ConfigBag::new()).unwrap();
    let err = provider.chat("m", "fail", None, false).await.unwrap_err();
    assert_eq!(err.to_string(), "chat_sync failed: ValueError: bad prompt");
    assert_eq!(provider.chat("m", "fine", None, false).await.unwrap(), "ok");
}

#[tokio::test]
async fn test_concurrent_calls_share_one_instance() {
    let source = "def chat_sync(model, prompt, system_prompt=None):\n    return prompt[::-1]\n";
    let provider = Arc::new(DynamicProvider::new("rev", source, ConfigBag::new()).unwrap());
    let calls = (0..8).map(|i| {
        let provider = provider.clone();
        tokio::spawn(async move { provider.chat("m", &format!("ab{}", i), None, false).await })
    });
    let replies: Vec<String> = futures::future::join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    assert_eq!(replies[3], "3ba");
    assert_eq!(replies.len(), 8);
}

#[tokio::test]
async fn test_registry_builds_dynamic_providers_with_resolved_keys() {
    let resolver = Arc::new(|identity: &ProviderIdentity| Some(format!("{}-secret", identity.name)));
    let mut registry = ProviderRegistry::with_defaults().with_resolver(resolver);
    registry
        .register_definition(ProviderDefinition::new(
            "Keyed",
            "Keyed provider",
            "def chat_sync(model, prompt, system_prompt=None):\n    return api_key\n",
        )
        .unwrap())
        .unwrap();
    assert_eq!(registry.available_providers(), vec!["keyed", "stub"]);

    let provider = registry.create_provider("keyed", ConfigBag::new()).unwrap();
    assert_eq!(
        provider.chat("m", "p", None, false).await.unwrap(),
        "keyed-secret"
    );
    let stub = registry.create_provider("stub", ConfigBag::new()).unwrap();
    assert_eq!(stub.chat("m", "p", None, false).await.unwrap(), "[m:sync] p");
}

#[test]
fn test_class_based_template_extracts_through_aliases() {
    let template = code_template("class-based");
    let bag = config("k");
    let namespace = Sandbox::default().execute(&template.template, &bag).unwrap();
    let hooks = extract(&namespace, &bag).unwrap();
    assert_eq!(hooks.class_name(), Some("CompletionProvider"));
    assert_eq!(
        hooks.get(HookName::ChatStreaming).unwrap().bound_name(),
        "CompletionProvider.stream"
    );
}

#[cfg(feature = "sdk-modules")]
#[test]
fn test_openai_template_binds_all_hooks() {
    let template = code_template("openai");
    let provider = DynamicProvider::new("tmpl", template.template, config("k")).unwrap();
    assert_eq!(
        provider.info().hooks,
        vec!["initialize_client", "chat_sync", "chat_streaming"]
    );
}

#[test]
fn test_tool_config_loads_relative_sources() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("provider.hks"),
        "def chat_sync(model, prompt, system_prompt=None):\n    return str(max_tokens)\n",
    )
    .unwrap();
    let path = dir.path().join("tool.toml");
    std::fs::write(
        &path,
        "[provider]\nname = \"local\"\nsource_file = \"provider.hks\"\n\n[config]\napi_key = \"k\"\nmax_tokens = 12\n\n[sandbox]\nmax_call_depth = 50\n",
    )
    .unwrap();

    let tool = ToolConfig::load(&path).unwrap();
    assert_eq!(tool.provider.source_file, dir.path().join("provider.hks"));
    assert_eq!(tool.sandbox.max_call_depth, 50);
    let bag = tool.config_bag().unwrap();
    assert_eq!(bag.get("max_tokens"), Some(json!(12)));
}
