//! Execution sandbox: runs a validated submission once in a restricted
//! namespace and hands back what it defined.
//!
//! The restricted namespace trims the builtin surface and pre-binds a few
//! modules; it is not an isolation boundary. `getattr`, `setattr` and class
//! construction remain reachable, imports are not blocked and there is no
//! time or memory quota beyond the call-depth limit.
//!
//! Guest code runs on a dedicated thread with [`INTERPRETER_STACK_SIZE`] of
//! stack, so the parser and evaluator nesting limits are reached before the
//! host stack is exhausted.

use std::sync::Arc;
use std::thread;

use hookscript::runtime::builtins::exception_class_names;
use hookscript::{parse, Environment, Program, Runtime, Value};

use crate::config::{ConfigBag, SandboxConfig};
use crate::error::{ProviderError, ProviderResult};

#[cfg(feature = "sdk-modules")]
mod modules;

/// Stack reserved for threads that parse or run guest code.
pub const INTERPRETER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Runs `work` on a scoped thread with [`INTERPRETER_STACK_SIZE`] of stack
/// and waits for it. A panic in `work` resumes on the caller.
pub fn on_interpreter_stack<T: Send>(work: impl FnOnce() -> T + Send) -> ProviderResult<T> {
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name("hookscript".to_string())
            .stack_size(INTERPRETER_STACK_SIZE)
            .spawn_scoped(scope, work)
            .map_err(|err| {
                ProviderError::TaskJoin(format!("failed to start interpreter thread: {}", err))
            })?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    })
}

/// Target of guest `print` output.
pub const SCRIPT_LOG_TARGET: &str = "provider_script";

/// Builtins visible to submitted code, besides the exception classes.
pub const SAFE_BUILTINS: &[&str] = &[
    "len",
    "str",
    "int",
    "float",
    "bool",
    "list",
    "dict",
    "tuple",
    "set",
    "range",
    "enumerate",
    "zip",
    "print",
    "isinstance",
    "hasattr",
    "getattr",
    "setattr",
    "type",
    "repr",
    "min",
    "max",
    "sorted",
    "abs",
    "round",
    "any",
    "all",
    "callable",
    "object",
    "super",
];

/// Modules bound as globals before the submission runs.
pub const PRELOADED_MODULES: &[&str] = &["asyncio", "typing", "json", "datetime"];

/// `typing` members bound as globals.
pub const TYPING_MARKERS: &[&str] = &["Optional", "Dict", "List", "Any"];

/// Modules the sandbox offers only when built with `sdk-modules`.
pub const SDK_MODULE_NAMES: &[&str] = &["http", "openai", "anthropic"];

/// Names defined by running a submission, plus the scopes they live in.
///
/// Functions capture the local scope, so the scopes stay alive as long as
/// any extracted hook does. [`ExecutionNamespace::clear`] breaks the
/// resulting reference cycles.
pub struct ExecutionNamespace {
    runtime: Runtime,
    globals: Arc<Environment>,
    locals: Arc<Environment>,
}

impl ExecutionNamespace {
    /// Local bindings in definition order. Config entries seeded into the
    /// local scope come first.
    pub fn bindings(&self) -> Vec<(String, Value)> {
        self.locals.snapshot()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.locals.get_local(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.locals.names()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn locals(&self) -> &Arc<Environment> {
        &self.locals
    }

    pub fn globals(&self) -> &Arc<Environment> {
        &self.globals
    }

    /// Drops every binding and empties defined classes so that scopes,
    /// functions and classes referencing each other can be freed.
    pub fn clear(&self) {
        for scope in [&self.locals, &self.globals] {
            for (_, value) in scope.snapshot() {
                match value {
                    Value::Class(class) => class.clear(),
                    Value::Instance(instance) => instance.clear(),
                    _ => {}
                }
            }
            scope.clear();
        }
    }
}

/// Builds restricted runtimes and executes submissions in them.
#[derive(Clone)]
pub struct Sandbox {
    config: SandboxConfig,
    runtime: Runtime,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let names: Vec<&str> = SAFE_BUILTINS
            .iter()
            .copied()
            .chain(exception_class_names())
            .collect();
        let runtime = Runtime::new()
            .with_builtins(&names)
            .with_max_call_depth(config.max_call_depth)
            .with_output(|line: &str| {
                tracing::info!(target: SCRIPT_LOG_TARGET, "{}", line);
            });
        register_sdk_modules(&runtime);
        Self { config, runtime }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Whether `module` (or its top-level package) can be imported inside
    /// the sandbox.
    pub fn module_available(&self, module: &str) -> bool {
        let modules = self.runtime.modules();
        modules.contains(module)
            || module
                .split('.')
                .next()
                .map_or(false, |root| modules.contains(root))
    }

    /// Global scope of a fresh run: preloaded modules, typing markers, SDK
    /// modules when present, then every configuration entry.
    fn build_globals(&self, config: &ConfigBag) -> Arc<Environment> {
        let globals = self.runtime.new_globals();
        let modules = self.runtime.modules();
        for name in PRELOADED_MODULES {
            if let Some(module) = modules.get(name) {
                globals.define(*name, module);
            }
        }
        if let Some(Value::Module(typing)) = modules.get("typing") {
            for marker in TYPING_MARKERS {
                if let Some(value) = typing.get(marker) {
                    globals.define(*marker, value);
                }
            }
        }
        if self.config.preload_sdk_modules {
            for name in SDK_MODULE_NAMES {
                match modules.get(name) {
                    Some(module) => globals.define(*name, module),
                    None => tracing::debug!(module = *name, "SDK module unavailable, skipping"),
                }
            }
        }
        globals.merge(config.to_script_values());
        globals
    }

    /// Runs `source` once. Module-level definitions land in a local scope
    /// seeded with the configuration; lookups fall back to the restricted
    /// globals.
    pub fn execute(&self, source: &str, config: &ConfigBag) -> ProviderResult<ExecutionNamespace> {
        let program = parse(source)?;
        self.execute_program(&program, config)
    }

    pub fn execute_program(
        &self,
        program: &Program,
        config: &ConfigBag,
    ) -> ProviderResult<ExecutionNamespace> {
        let globals = self.build_globals(config);
        let locals = Arc::new(Environment::with_parent(globals.clone()));
        locals.merge(config.to_script_values());
        tracing::debug!(config_keys = ?config.keys(), "executing submission");

        let namespace = ExecutionNamespace {
            runtime: self.runtime.clone(),
            globals,
            locals,
        };
        if let Err(source) = self.runtime.execute(program, &namespace.locals) {
            namespace.clear();
            return Err(ProviderError::Execution { source });
        }
        Ok(namespace)
    }
}

#[cfg(feature = "sdk-modules")]
fn register_sdk_modules(runtime: &Runtime) {
    modules::register(runtime.modules());
}

#[cfg(not(feature = "sdk-modules"))]
fn register_sdk_modules(_runtime: &Runtime) {
    tracing::warn!("built without `sdk-modules`; http, openai and anthropic are unavailable");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag() -> ConfigBag {
        [("api_key", json!("sk-test")), ("max_tokens", json!(256))]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_returns_local_bindings_in_order() {
        let sandbox = Sandbox::default();
        let namespace = sandbox
            .execute("def a():\n    return 1\n\nclass B:\n    pass\n\nc = a()\n", &bag())
            .unwrap();
        assert_eq!(
            namespace.names(),
            vec!["api_key", "max_tokens", "a", "B", "c"]
        );
        assert!(matches!(namespace.get("c"), Some(Value::Int(1))));
        namespace.clear();
    }

    #[test]
    fn test_config_and_preloaded_modules_visible() {
        let sandbox = Sandbox::default();
        let namespace = sandbox
            .execute(
                "out = json.dumps({'key': api_key, 'limit': max_tokens})\nopt = Optional\n",
                &bag(),
            )
            .unwrap();
        assert_eq!(
            namespace.get("out").and_then(|v| v.as_str().map(str::to_string)),
            Some(r#"{"key": "sk-test", "limit": 256}"#.to_string())
        );
        namespace.clear();
    }

    #[test]
    fn test_global_scope_not_returned() {
        let sandbox = Sandbox::default();
        let namespace = sandbox.execute("x = 1\n", &ConfigBag::new()).unwrap();
        assert_eq!(namespace.names(), vec!["x"]);
        assert!(namespace.globals().get_local("asyncio").is_some());
    }

    #[test]
    fn test_restricted_builtins() {
        let sandbox = Sandbox::default();
        for source in ["sum([1, 2])", "map(str, [1])", "next(iter([1]))"] {
            match sandbox.execute(source, &ConfigBag::new()) {
                Err(ProviderError::Execution { source }) => {
                    assert_eq!(source.exception_name(), "NameError")
                }
                _ => panic!("{} should not resolve", source),
            }
        }
        assert!(sandbox
            .execute("class E(ValueError):\n    pass\n", &ConfigBag::new())
            .is_ok());
    }

    #[test]
    fn test_runtime_error_becomes_execution_error() {
        let sandbox = Sandbox::default();
        let err = sandbox
            .execute("raise ValueError('boom')", &ConfigBag::new())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Provider code execution failed: ValueError: boom");
    }

    #[test]
    fn test_call_depth_limit_is_configurable() {
        let sandbox = Sandbox::new(SandboxConfig {
            max_call_depth: 20,
            ..SandboxConfig::default()
        });
        let result = sandbox.execute(
            "def down(n):\n    return down(n + 1)\n\ndown(0)\n",
            &ConfigBag::new(),
        );
        match result {
            Err(ProviderError::Execution { source }) => {
                assert_eq!(source.exception_name(), "RecursionError")
            }
            _ => panic!("expected RecursionError"),
        }
    }

    #[test]
    fn test_module_availability() {
        let sandbox = Sandbox::default();
        assert!(sandbox.module_available("json"));
        assert!(sandbox.module_available("typing"));
        assert!(!sandbox.module_available("numpy"));
        assert_eq!(
            sandbox.module_available("openai"),
            cfg!(feature = "sdk-modules")
        );
    }
}
