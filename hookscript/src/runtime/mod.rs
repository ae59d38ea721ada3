//! Tree-walking runtime for hookscript.
//!
//! [`Runtime`] is the shared, cheaply clonable configuration of an
//! interpreter: builtin scope, builtin classes, native module registry,
//! output sink and limits. [`Evaluator`] carries the per-invocation state
//! (call depth, exceptions being handled) and does the actual work.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::Program;
use crate::parser;

pub mod builtins;
pub mod environment;
pub mod error;
mod evaluator;
pub mod methods;
pub mod modules;
pub mod operators;
pub mod values;

pub use environment::Environment;
pub use error::{RuntimeError, RuntimeResult};
pub use evaluator::Evaluator;
pub use modules::ModuleRegistry;
pub use values::{
    Arity, BuiltinFunction, CallArgs, Class, Coroutine, DictKey, Function, Instance, Module,
    Value,
};

/// Receives each line written by guest `print`.
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

#[derive(Clone)]
pub struct Runtime {
    builtins: Arc<Environment>,
    classes: Arc<IndexMap<String, Arc<Class>>>,
    modules: Arc<ModuleRegistry>,
    output: OutputSink,
    max_call_depth: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Runtime with the full builtin surface and the standard native modules.
    pub fn new() -> Self {
        let classes = builtins::builtin_classes();
        let builtins = builtins::standard_builtins(&classes);
        let modules = ModuleRegistry::with_standard_modules(&classes);
        Self {
            builtins: Arc::new(Environment::from_bindings(None, builtins)),
            classes: Arc::new(classes),
            modules: Arc::new(modules),
            output: Arc::new(|line: &str| println!("{}", line)),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    /// Keeps only the named builtins. Unknown names are ignored.
    pub fn with_builtins(mut self, names: &[&str]) -> Self {
        let selected: IndexMap<String, Value> = names
            .iter()
            .filter_map(|name| {
                self.builtins
                    .get_local(name)
                    .map(|value| (name.to_string(), value))
            })
            .collect();
        self.builtins = Arc::new(Environment::from_bindings(None, selected));
        self
    }

    /// Adds or replaces a builtin binding.
    pub fn with_builtin(self, name: &str, value: Value) -> Self {
        self.builtins.define(name, value);
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_output<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.output = Arc::new(sink);
        self
    }

    pub fn builtins(&self) -> &Arc<Environment> {
        &self.builtins
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Builtin type or exception class by name, whether or not it is
    /// exposed in the builtin scope.
    pub fn class(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.get(name).cloned()
    }

    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    /// Fresh module-global scope whose parent is the builtin scope.
    pub fn new_globals(&self) -> Arc<Environment> {
        Arc::new(Environment::with_parent(self.builtins.clone()))
    }

    pub fn evaluator(&self) -> Evaluator {
        Evaluator::new(self.clone())
    }

    /// Runs `program` with module-level statements binding into `locals`;
    /// lookups fall back to `globals`, then the builtins.
    pub fn execute(&self, program: &Program, locals: &Arc<Environment>) -> RuntimeResult<()> {
        self.evaluator().exec_module(program, locals)
    }

    /// Parses and runs `source` in a fresh module scope and returns it.
    pub fn run(&self, source: &str) -> crate::Result<Arc<Environment>> {
        let program = parser::parse(source)?;
        let module = self.new_globals();
        self.execute(&program, &module)?;
        Ok(module)
    }

    /// Calls a guest callable from the host.
    pub fn call(&self, callee: &Value, args: CallArgs) -> RuntimeResult<Value> {
        self.evaluator().call_value(callee, args)
    }

    /// Drives a coroutine to completion; other values pass through.
    pub fn resolve(&self, value: Value) -> RuntimeResult<Value> {
        match value {
            Value::Coroutine(_) => self.evaluator().await_value(value),
            other => Ok(other),
        }
    }

    pub(crate) fn emit(&self, line: &str) {
        (self.output)(line)
    }
}
