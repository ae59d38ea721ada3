//! Runtime values.
//!
//! Every value is `Send + Sync`: containers are `Arc<RwLock<..>>`, callables
//! hold `Arc`s to their definitions. Locks are never held while guest code
//! runs; callers copy out what they need first.

use std::fmt;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;

use super::environment::Environment;
use super::error::{RuntimeError, RuntimeResult};
use super::Evaluator;
use crate::ast::FunctionDef;

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock_mutex<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Arc<RwLock<Vec<Value>>>),
    Tuple(Arc<Vec<Value>>),
    Dict(Arc<RwLock<IndexMap<DictKey, Value>>>),
    Set(Arc<RwLock<IndexSet<DictKey>>>),
    Function(Arc<Function>),
    Builtin(Arc<BuiltinFunction>),
    Class(Arc<Class>),
    Instance(Arc<Instance>),
    BoundMethod(Arc<BoundMethod>),
    Module(Arc<Module>),
    Coroutine(Arc<Coroutine>),
    Iterator(Arc<Mutex<std::vec::IntoIter<Value>>>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(RwLock::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Arc::new(items))
    }

    pub fn dict(entries: IndexMap<DictKey, Value>) -> Value {
        Value::Dict(Arc::new(RwLock::new(entries)))
    }

    /// Dict with string keys, the common case for keyword arguments and
    /// configuration.
    pub fn str_dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::dict(
            entries
                .into_iter()
                .map(|(k, v)| (DictKey::Str(k.into()), v))
                .collect(),
        )
    }

    pub fn set(items: IndexSet<DictKey>) -> Value {
        Value::Set(Arc::new(RwLock::new(items)))
    }

    pub fn iterator(items: Vec<Value>) -> Value {
        Value::Iterator(Arc::new(Mutex::new(items.into_iter())))
    }

    pub fn builtin<F>(name: &str, arity: Arity, func: F) -> Value
    where
        F: Fn(&mut Evaluator, CallArgs) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Value::Builtin(Arc::new(BuiltinFunction::new(name, arity, func)))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Dict(_) => "dict".into(),
            Value::Set(_) => "set".into(),
            Value::Function(_) => "function".into(),
            Value::Builtin(_) => "builtin_function_or_method".into(),
            Value::Class(_) => "type".into(),
            Value::Instance(instance) => instance.class.name.clone(),
            Value::BoundMethod(_) => "method".into(),
            Value::Module(_) => "module".into(),
            Value::Coroutine(_) => "coroutine".into(),
            Value::Iterator(_) => "iterator".into(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !read_lock(items).is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(entries) => !read_lock(entries).is_empty(),
            Value::Set(items) => !read_lock(items).is_empty(),
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        match self {
            Value::Function(_) | Value::Builtin(_) | Value::Class(_) | Value::BoundMethod(_) => {
                true
            }
            Value::Instance(instance) => instance.class.lookup("__call__").is_some(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Identity comparison (`is`).
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Arc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => Arc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => Arc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
            (Value::Coroutine(a), Value::Coroutine(b)) => Arc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Python-style `repr`, without dispatching to user `__repr__`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote_str(s),
            Value::List(items) => format!("[{}]", read_lock(items).iter().map(Value::repr).join(", ")),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", items.iter().map(Value::repr).join(", ")),
            Value::Dict(entries) => format!(
                "{{{}}}",
                read_lock(entries)
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_value().repr(), v.repr()))
                    .join(", ")
            ),
            Value::Set(items) => {
                let items = read_lock(items);
                if items.is_empty() {
                    "set()".into()
                } else {
                    format!("{{{}}}", items.iter().map(|k| k.to_value().repr()).join(", "))
                }
            }
            Value::Function(f) => format!("<function {}>", f.name()),
            Value::Builtin(b) => format!("<built-in function {}>", b.name),
            Value::Class(c) => format!("<class '{}'>", c.name),
            Value::Instance(i) => format!("<{} object>", i.class.name),
            Value::BoundMethod(m) => format!("<bound method {}>", m.method_name()),
            Value::Module(m) => format!("<module '{}'>", m.name),
            Value::Coroutine(c) => format!("<coroutine object {}>", c.name),
            Value::Iterator(_) => "<iterator object>".into(),
        }
    }

    /// Python-style `str`, without dispatching to user `__str__`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::None)
    }
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".into()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".into() } else { "-inf".into() }
    } else if f == f.trunc() && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else if f.abs() >= 1e16 || (f != 0.0 && f.abs() < 1e-4) {
        let s = format!("{:e}", f);
        // Rust prints `1e20`, Python `1e+20`
        match s.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{:0>2}", mantissa, exp),
            Some((mantissa, exp)) => format!("{}e-{:0>2}", mantissa, &exp[1..]),
            None => s,
        }
    } else {
        format!("{}", f)
    }
}

pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Hashable projection of a value, used for dict keys and set members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Bool(bool),
    Int(i64),
    /// Bit pattern of a non-integral float
    Float(u64),
    Str(String),
    Tuple(Vec<DictKey>),
}

impl DictKey {
    pub fn from_value(value: &Value) -> RuntimeResult<DictKey> {
        match value {
            Value::None => Ok(DictKey::None),
            Value::Bool(b) => Ok(DictKey::Bool(*b)),
            Value::Int(i) => Ok(DictKey::Int(*i)),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Ok(DictKey::Int(*f as i64)),
            Value::Float(f) => Ok(DictKey::Float(f.to_bits())),
            Value::Str(s) => Ok(DictKey::Str(s.clone())),
            Value::Tuple(items) => Ok(DictKey::Tuple(
                items.iter().map(DictKey::from_value).collect::<RuntimeResult<_>>()?,
            )),
            other => Err(RuntimeError::TypeError(format!(
                "unhashable type: '{}'",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::None => Value::None,
            DictKey::Bool(b) => Value::Bool(*b),
            DictKey::Int(i) => Value::Int(*i),
            DictKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            DictKey::Str(s) => Value::Str(s.clone()),
            DictKey::Tuple(items) => Value::tuple(items.iter().map(DictKey::to_value).collect()),
        }
    }
}

impl From<&str> for DictKey {
    fn from(s: &str) -> Self {
        DictKey::Str(s.to_string())
    }
}

/// Positional and keyword arguments of a call.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: IndexMap<String, Value>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: IndexMap::new(),
        }
    }

    pub fn with_keywords(positional: Vec<Value>, keywords: IndexMap<String, Value>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub fn keyword(mut self, name: impl Into<String>, value: Value) -> Self {
        self.keywords.insert(name.into(), value);
        self
    }

    /// Prepends a receiver for method calls.
    pub fn with_receiver(mut self, receiver: Value) -> Self {
        self.positional.insert(0, receiver);
        self
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Positional argument `index`, or the keyword `name` when not passed
    /// positionally.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.keywords.get(name))
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type BuiltinFn = Arc<dyn Fn(&mut Evaluator, CallArgs) -> RuntimeResult<Value> + Send + Sync>;

/// Accepted positional argument counts of a builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Range(usize, usize),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn check(&self, function: &str, actual: usize) -> RuntimeResult<()> {
        let (ok, expected) = match *self {
            Arity::Fixed(n) => (actual == n, n.to_string()),
            Arity::Range(min, max) => (
                actual >= min && actual <= max,
                format!("from {} to {}", min, max),
            ),
            Arity::AtLeast(min) => (actual >= min, format!("at least {}", min)),
            Arity::Any => (true, String::new()),
        };
        if ok {
            Ok(())
        } else {
            Err(RuntimeError::ArityMismatch {
                function: function.to_string(),
                expected,
                actual,
            })
        }
    }
}

pub struct BuiltinFunction {
    pub name: String,
    pub arity: Arity,
    pub func: BuiltinFn,
}

impl BuiltinFunction {
    pub fn new<F>(name: &str, arity: Arity, func: F) -> Self
    where
        F: Fn(&mut Evaluator, CallArgs) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            arity,
            func: Arc::new(func),
        }
    }
}

/// A user function: its definition plus the scope it was defined in.
pub struct Function {
    pub def: Arc<FunctionDef>,
    /// Defining scope; free names resolve through it.
    pub env: Arc<Environment>,
    /// Module scope targeted by `global` declarations.
    pub module: Arc<Environment>,
    /// Default values, evaluated at definition time, aligned with parameters.
    pub defaults: Vec<Option<Value>>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn is_async(&self) -> bool {
        self.def.is_async
    }
}

pub struct Class {
    pub name: String,
    pub bases: Vec<Arc<Class>>,
    pub attrs: RwLock<IndexMap<String, Value>>,
    /// Native constructor for builtin types; replaces instance creation.
    pub constructor: Option<BuiltinFn>,
    /// Created by guest code rather than by a native module.
    pub scripted: bool,
}

impl Class {
    pub fn new(name: impl Into<String>, bases: Vec<Arc<Class>>, attrs: IndexMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            bases,
            attrs: RwLock::new(attrs),
            constructor: None,
            scripted: false,
        }
    }

    /// Class created by a `class` statement or a three-argument `type()`.
    pub fn scripted(name: impl Into<String>, bases: Vec<Arc<Class>>, attrs: IndexMap<String, Value>) -> Self {
        Self {
            scripted: true,
            ..Self::new(name, bases, attrs)
        }
    }

    pub fn native(name: impl Into<String>, bases: Vec<Arc<Class>>, constructor: BuiltinFn) -> Self {
        Self {
            name: name.into(),
            bases,
            attrs: RwLock::new(IndexMap::new()),
            constructor: Some(constructor),
            scripted: false,
        }
    }

    /// Attribute lookup through the class and its bases, depth first and
    /// left to right.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = read_lock(&self.attrs).get(name) {
            return Some(value.clone());
        }
        self.bases.iter().find_map(|base| base.lookup(name))
    }

    pub fn set_attr(&self, name: impl Into<String>, value: Value) {
        write_lock(&self.attrs).insert(name.into(), value);
    }

    pub fn is_subclass_of(self: &Arc<Self>, other: &Arc<Class>) -> bool {
        Arc::ptr_eq(self, other) || self.bases.iter().any(|base| base.is_subclass_of(other))
    }

    /// Clears class attributes; methods capture the module scope, so classes
    /// take part in the same reference cycles.
    pub fn clear(&self) {
        let drained: Vec<Value> = write_lock(&self.attrs).drain(..).map(|(_, v)| v).collect();
        drop(drained);
    }
}

pub struct Instance {
    pub class: Arc<Class>,
    pub attrs: RwLock<IndexMap<String, Value>>,
}

impl Instance {
    pub fn new(class: Arc<Class>) -> Self {
        Self {
            class,
            attrs: RwLock::new(IndexMap::new()),
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<Value> {
        read_lock(&self.attrs).get(name).cloned()
    }

    pub fn set_attr(&self, name: impl Into<String>, value: Value) {
        write_lock(&self.attrs).insert(name.into(), value);
    }

    pub fn remove_attr(&self, name: &str) -> Option<Value> {
        write_lock(&self.attrs).shift_remove(name)
    }

    pub fn clear(&self) {
        let drained: Vec<Value> = write_lock(&self.attrs).drain(..).map(|(_, v)| v).collect();
        drop(drained);
    }
}

pub struct BoundMethod {
    pub receiver: Value,
    pub method: Value,
}

impl BoundMethod {
    pub fn method_name(&self) -> String {
        let method = match &self.method {
            Value::Function(f) => f.name().to_string(),
            Value::Builtin(b) => b.name.clone(),
            other => other.type_name(),
        };
        format!("{}.{}", self.receiver.type_name(), method)
    }
}

pub struct Module {
    pub name: String,
    pub attrs: IndexMap<String, Value>,
}

impl Module {
    pub fn new(name: impl Into<String>, attrs: IndexMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            attrs,
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.get(name).cloned()
    }
}

pub type PendingCall = Box<dyn FnOnce(&mut Evaluator) -> RuntimeResult<Value> + Send>;

/// Deferred computation produced by calling an `async def` function or an
/// awaitable native. Runs when awaited; can be awaited once.
pub struct Coroutine {
    pub name: String,
    pending: Mutex<Option<PendingCall>>,
}

impl Coroutine {
    pub fn new<F>(name: impl Into<String>, pending: F) -> Self
    where
        F: FnOnce(&mut Evaluator) -> RuntimeResult<Value> + Send + 'static,
    {
        Self {
            name: name.into(),
            pending: Mutex::new(Some(Box::new(pending))),
        }
    }

    /// Takes the pending computation; `None` once awaited.
    pub fn take(&self) -> Option<PendingCall> {
        lock_mutex(&self.pending).take()
    }

    pub fn is_consumed(&self) -> bool {
        lock_mutex(&self.pending).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_matches_python_conventions() {
        assert_eq!(Value::Float(1.0).repr(), "1.0");
        assert_eq!(Value::Float(0.5).repr(), "0.5");
        assert_eq!(Value::Float(1e20).repr(), "1e+20");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::str("a\nb").repr(), "'a\\nb'");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(
            Value::str_dict(vec![("a", Value::list(vec![Value::None, Value::Bool(true)]))]).repr(),
            "{'a': [None, True]}"
        );
        assert_eq!(Value::set(IndexSet::new()).repr(), "set()");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.is_truthy());
        assert!(!Value::str("").is_truthy());
        assert!(Value::str("x").is_truthy());
        assert!(!Value::list(vec![]).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(Value::Int(-1).is_truthy());
    }

    #[test]
    fn test_dict_key_normalizes_integral_floats() {
        assert_eq!(DictKey::from_value(&Value::Float(2.0)).unwrap(), DictKey::Int(2));
        assert!(DictKey::from_value(&Value::list(vec![])).is_err());
    }

    #[test]
    fn test_arity_check() {
        assert!(Arity::Range(1, 2).check("f", 2).is_ok());
        let err = Arity::Fixed(1).check("len", 3).unwrap_err();
        assert_eq!(err.exception_name(), "TypeError");
    }

    #[test]
    fn test_coroutine_runs_once() {
        let coroutine = Coroutine::new("c", |_| Ok(Value::Int(1)));
        assert!(coroutine.take().is_some());
        assert!(coroutine.take().is_none());
        assert!(coroutine.is_consumed());
    }

    #[test]
    fn test_values_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Value>();
        assert_send_sync::<Environment>();
    }
}
