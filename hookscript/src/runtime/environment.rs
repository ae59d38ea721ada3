// Environment for variable bindings and scope management

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use super::values::{read_lock, write_lock, Value};

/// A scope in the lookup chain. Bindings keep insertion order so a module
/// scope can be reported in definition order.
///
/// Environments are shared (`Arc`) and interior-mutable because functions
/// capture their defining scope and hooks may later run on another thread.
#[derive(Debug, Default)]
pub struct Environment {
    parent: Option<Arc<Environment>>,
    bindings: RwLock<IndexMap<String, Value>>,
}

impl Environment {
    /// Creates a new, empty root environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new child environment that inherits from a parent.
    pub fn with_parent(parent: Arc<Environment>) -> Self {
        Environment {
            parent: Some(parent),
            bindings: RwLock::new(IndexMap::new()),
        }
    }

    pub fn from_bindings(parent: Option<Arc<Environment>>, bindings: IndexMap<String, Value>) -> Self {
        Environment {
            parent,
            bindings: RwLock::new(bindings),
        }
    }

    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }

    /// Looks up a name in this scope and then its parents.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = read_lock(&self.bindings).get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    /// Looks up a name in this scope only.
    pub fn get_local(&self, name: &str) -> Option<Value> {
        read_lock(&self.bindings).get(name).cloned()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        read_lock(&self.bindings).contains_key(name)
    }

    /// Defines a new binding or updates an existing one in this scope.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        write_lock(&self.bindings).insert(name.into(), value);
    }

    /// Rebinds `name` in the nearest scope that already holds it; when no
    /// scope does, defines it here.
    pub fn assign_nearest(&self, name: &str, value: Value) {
        if self.contains_local(name) || !self.set_in_parents(name, &value) {
            self.define(name, value);
        }
    }

    fn set_in_parents(&self, name: &str, value: &Value) -> bool {
        let mut current = self.parent.as_ref();
        while let Some(env) = current {
            // builtins are never rebound
            if env.parent.is_none() {
                return false;
            }
            let mut bindings = write_lock(&env.bindings);
            if let Some(slot) = bindings.get_mut(name) {
                *slot = value.clone();
                return true;
            }
            drop(bindings);
            current = env.parent.as_ref();
        }
        false
    }

    /// Removes a binding from this scope, returning it.
    pub fn remove(&self, name: &str) -> Option<Value> {
        write_lock(&self.bindings).shift_remove(name)
    }

    /// Defines every entry, overwriting existing bindings.
    pub fn merge<I, K>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut bindings = write_lock(&self.bindings);
        for (name, value) in entries {
            bindings.insert(name.into(), value);
        }
    }

    /// Bindings of this scope only, in definition order.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        read_lock(&self.bindings)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        read_lock(&self.bindings).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.bindings).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every binding of this scope. Functions capture their defining
    /// scope, so scopes holding functions form reference cycles until
    /// cleared.
    pub fn clear(&self) {
        let drained: Vec<Value> = write_lock(&self.bindings).drain(..).map(|(_, v)| v).collect();
        // values drop after the lock is released
        drop(drained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Arc<Environment>, Arc<Environment>, Arc<Environment>) {
        let builtins = Arc::new(Environment::new());
        builtins.define("len", Value::Int(0));
        let globals = Arc::new(Environment::with_parent(builtins.clone()));
        let locals = Arc::new(Environment::with_parent(globals.clone()));
        (builtins, globals, locals)
    }

    #[test]
    fn test_lookup_walks_parents() {
        let (_, globals, locals) = chain();
        globals.define("g", Value::Int(1));
        assert!(matches!(locals.lookup("g"), Some(Value::Int(1))));
        assert!(matches!(locals.lookup("len"), Some(Value::Int(0))));
        assert!(locals.lookup("missing").is_none());
    }

    #[test]
    fn test_assign_nearest_updates_existing_binding() {
        let (_, globals, locals) = chain();
        globals.define("counter", Value::Int(1));
        locals.assign_nearest("counter", Value::Int(2));
        assert!(matches!(globals.get_local("counter"), Some(Value::Int(2))));
        assert!(!locals.contains_local("counter"));
    }

    #[test]
    fn test_assign_nearest_never_rebinds_builtins() {
        let (builtins, _, locals) = chain();
        locals.assign_nearest("len", Value::Int(5));
        assert!(matches!(builtins.get_local("len"), Some(Value::Int(0))));
        assert!(matches!(locals.get_local("len"), Some(Value::Int(5))));
    }

    #[test]
    fn test_snapshot_keeps_definition_order() {
        let env = Environment::new();
        env.define("b", Value::Int(1));
        env.define("a", Value::Int(2));
        env.merge(vec![("c", Value::Int(3)), ("b", Value::Int(4))]);
        let names: Vec<_> = env.snapshot().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
        env.clear();
        assert!(env.is_empty());
    }
}
