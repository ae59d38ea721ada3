//! Native modules importable from guest code.
//!
//! Modules live in a [`ModuleRegistry`] shared by every clone of a runtime;
//! hosts may register their own modules next to the standard ones.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use base64::engine::general_purpose;
use base64::Engine as _;
use indexmap::IndexMap;
use lazy_static::lazy_static;

use super::error::{RuntimeError, RuntimeResult};
use super::values::{format_float, read_lock, write_lock, Arity, CallArgs, Class, DictKey, Module, Value};

mod asyncio;
mod datetime;
#[cfg(feature = "regex")]
mod re;

#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<IndexMap<String, Value>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `json`, `asyncio`, `datetime`, `typing`, `time`, `base64` and, with
    /// the `regex` feature, `re`.
    pub fn with_standard_modules(classes: &IndexMap<String, Arc<Class>>) -> Self {
        let registry = Self::new();
        registry.register(json_module(classes));
        registry.register(asyncio::module(classes));
        registry.register(datetime::module());
        registry.register(typing_module());
        registry.register(time_module());
        registry.register(base64_module());
        #[cfg(feature = "regex")]
        registry.register(re::module(classes));
        registry
    }

    pub fn register(&self, module: Module) {
        let name = module.name.clone();
        write_lock(&self.modules).insert(name, Value::Module(Arc::new(module)));
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        read_lock(&self.modules).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        read_lock(&self.modules).contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        read_lock(&self.modules).keys().cloned().collect()
    }
}

/// Builds a module from `(name, value)` pairs.
pub fn module(name: &str, attrs: Vec<(&str, Value)>) -> Module {
    Module::new(
        name,
        attrs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
    )
}

fn class_value(classes: &IndexMap<String, Arc<Class>>, name: &str) -> Value {
    classes.get(name).cloned().map(Value::Class).unwrap_or(Value::None)
}

// ---- json ----

/// Converts a guest value to JSON. Non-string keys are stringified like
/// Python's `json` module does.
pub fn value_to_json(value: &Value) -> RuntimeResult<serde_json::Value> {
    Ok(match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| {
                RuntimeError::ValueError("Out of range float values are not JSON compliant".into())
            })?,
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => {
            let items = read_lock(items).clone();
            serde_json::Value::Array(items.iter().map(value_to_json).collect::<RuntimeResult<_>>()?)
        }
        Value::Tuple(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect::<RuntimeResult<_>>()?)
        }
        Value::Dict(entries) => {
            let entries = read_lock(entries).clone();
            let mut object = serde_json::Map::with_capacity(entries.len());
            for (key, value) in &entries {
                object.insert(json_key(key)?, value_to_json(value)?);
            }
            serde_json::Value::Object(object)
        }
        other => return Err(not_serializable(other)),
    })
}

pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::list(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::dict(
            map.iter()
                .map(|(k, v)| (DictKey::Str(k.clone()), json_to_value(v)))
                .collect(),
        ),
    }
}

fn json_key(key: &DictKey) -> RuntimeResult<String> {
    match key {
        DictKey::Str(s) => Ok(s.clone()),
        DictKey::Int(i) => Ok(i.to_string()),
        DictKey::Bool(b) => Ok(b.to_string()),
        DictKey::None => Ok("null".into()),
        DictKey::Float(bits) => Ok(format_float(f64::from_bits(*bits))),
        DictKey::Tuple(_) => Err(RuntimeError::TypeError(
            "keys must be str, int, float, bool or None, not tuple".into(),
        )),
    }
}

fn not_serializable(value: &Value) -> RuntimeError {
    RuntimeError::TypeError(format!(
        "Object of type {} is not JSON serializable",
        value.type_name()
    ))
}

/// Python-compatible `json.dumps` layout: `", "`/`": "` separators when
/// compact, newline plus indent otherwise.
fn dumps(value: &Value, indent: Option<usize>, sort_keys: bool) -> RuntimeResult<String> {
    let mut out = String::new();
    write_json(&value_to_json(value)?, indent, sort_keys, 0, &mut out);
    Ok(out)
}

fn write_json(
    json: &serde_json::Value,
    indent: Option<usize>,
    sort_keys: bool,
    level: usize,
    out: &mut String,
) {
    let newline = |out: &mut String, level: usize| {
        if let Some(width) = indent {
            out.push('\n');
            out.push_str(&" ".repeat(width * level));
        }
    };
    let item_sep = if indent.is_some() { "," } else { ", " };
    match json {
        serde_json::Value::Array(items) if !items.is_empty() => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                write_json(item, indent, sort_keys, level + 1, out);
            }
            newline(out, level);
            out.push(']');
        }
        serde_json::Value::Object(map) if !map.is_empty() => {
            let mut entries: Vec<_> = map.iter().collect();
            if sort_keys {
                entries.sort_by(|a, b| a.0.cmp(b.0));
            }
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(item_sep);
                }
                newline(out, level + 1);
                out.push_str(&serde_json::Value::String(key.clone()).to_string());
                out.push_str(": ");
                write_json(item, indent, sort_keys, level + 1, out);
            }
            newline(out, level);
            out.push('}');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn json_module(classes: &IndexMap<String, Arc<Class>>) -> Module {
    module(
        "json",
        vec![
            (
                "dumps",
                Value::builtin("dumps", Arity::Fixed(1), |_, args| {
                    let indent = args
                        .keywords
                        .get("indent")
                        .and_then(Value::as_int)
                        .map(|i| i.max(0) as usize);
                    let sort_keys = args.keywords.get("sort_keys").map(Value::is_truthy).unwrap_or(false);
                    dumps(&args.positional[0], indent, sort_keys).map(Value::Str)
                }),
            ),
            (
                "loads",
                Value::builtin("loads", Arity::Fixed(1), |_, args| {
                    let Some(text) = args.positional[0].as_str() else {
                        return Err(RuntimeError::TypeError(format!(
                            "the JSON object must be str, not {}",
                            args.positional[0].type_name()
                        )));
                    };
                    serde_json::from_str::<serde_json::Value>(text)
                        .map(|json| json_to_value(&json))
                        .map_err(|e| RuntimeError::ValueError(format!("Expecting value: {}", e)))
                }),
            ),
            ("JSONDecodeError", class_value(classes, "ValueError")),
        ],
    )
}

// ---- typing ----

/// Names used in annotations; subscripting one yields the marker itself.
const TYPING_MARKERS: &[&str] = &[
    "Any",
    "Optional",
    "Union",
    "List",
    "Dict",
    "Tuple",
    "Set",
    "Callable",
    "Iterable",
    "Iterator",
    "AsyncIterator",
    "AsyncGenerator",
    "Generator",
    "Sequence",
    "Mapping",
    "Type",
    "Literal",
];

fn typing_module() -> Module {
    let mut attrs: Vec<(&str, Value)> = TYPING_MARKERS
        .iter()
        .map(|name| {
            (
                *name,
                Value::Class(Arc::new(Class::new(*name, Vec::new(), IndexMap::new()))),
            )
        })
        .collect();
    attrs.push(("TYPE_CHECKING", Value::Bool(false)));
    module("typing", attrs)
}

// ---- time ----

lazy_static! {
    static ref MONOTONIC_EPOCH: Instant = Instant::now();
}

fn seconds_arg(value: &Value, function: &str) -> RuntimeResult<Duration> {
    let secs = value.as_float().ok_or_else(|| {
        RuntimeError::TypeError(format!(
            "{}() argument must be a number, not '{}'",
            function,
            value.type_name()
        ))
    })?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(RuntimeError::ValueError(format!(
            "{}() length must be non-negative",
            function
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn time_module() -> Module {
    module(
        "time",
        vec![
            (
                "time",
                Value::builtin("time", Arity::Fixed(0), |_, _| {
                    Ok(Value::Float(chrono::Utc::now().timestamp_micros() as f64 / 1e6))
                }),
            ),
            (
                "monotonic",
                Value::builtin("monotonic", Arity::Fixed(0), |_, _| {
                    Ok(Value::Float(MONOTONIC_EPOCH.elapsed().as_secs_f64()))
                }),
            ),
            (
                "sleep",
                Value::builtin("sleep", Arity::Fixed(1), |_, args| {
                    std::thread::sleep(seconds_arg(&args.positional[0], "sleep")?);
                    Ok(Value::None)
                }),
            ),
        ],
    )
}

// ---- base64 ----

fn text_arg<'a>(args: &'a CallArgs, function: &str) -> RuntimeResult<&'a str> {
    args.positional[0].as_str().ok_or_else(|| {
        RuntimeError::TypeError(format!(
            "{}() argument must be str, not '{}'",
            function,
            args.positional[0].type_name()
        ))
    })
}

fn decoded(bytes: Result<Vec<u8>, base64::DecodeError>) -> RuntimeResult<Value> {
    let bytes = bytes.map_err(|e| RuntimeError::ValueError(e.to_string()))?;
    Ok(Value::Str(String::from_utf8_lossy(&bytes).into_owned()))
}

fn base64_module() -> Module {
    module(
        "base64",
        vec![
            (
                "b64encode",
                Value::builtin("b64encode", Arity::Fixed(1), |_, args| {
                    Ok(Value::Str(general_purpose::STANDARD.encode(text_arg(&args, "b64encode")?)))
                }),
            ),
            (
                "b64decode",
                Value::builtin("b64decode", Arity::Fixed(1), |_, args| {
                    decoded(general_purpose::STANDARD.decode(text_arg(&args, "b64decode")?))
                }),
            ),
            (
                "urlsafe_b64encode",
                Value::builtin("urlsafe_b64encode", Arity::Fixed(1), |_, args| {
                    Ok(Value::Str(
                        general_purpose::URL_SAFE.encode(text_arg(&args, "urlsafe_b64encode")?),
                    ))
                }),
            ),
            (
                "urlsafe_b64decode",
                Value::builtin("urlsafe_b64decode", Arity::Fixed(1), |_, args| {
                    decoded(general_purpose::URL_SAFE.decode(text_arg(&args, "urlsafe_b64decode")?))
                }),
            ),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dumps_matches_python_layout() {
        let value = Value::str_dict(vec![
            ("model", Value::str("gpt-4")),
            ("tags", Value::list(vec![Value::Int(1), Value::Bool(true), Value::None])),
        ]);
        assert_eq!(
            dumps(&value, None, false).unwrap(),
            r#"{"model": "gpt-4", "tags": [1, true, null]}"#
        );
        assert_eq!(
            dumps(&value, Some(2), false).unwrap(),
            "{\n  \"model\": \"gpt-4\",\n  \"tags\": [\n    1,\n    true,\n    null\n  ]\n}"
        );
    }

    #[test]
    fn test_json_round_trip_keeps_key_order() {
        let json: serde_json::Value = serde_json::from_str(r#"{"b": 1, "a": [2.5, "x"]}"#).unwrap();
        let value = json_to_value(&json);
        assert_eq!(value.repr(), "{'b': 1, 'a': [2.5, 'x']}");
        assert_eq!(value_to_json(&value).unwrap(), json);
    }

    #[test]
    fn test_non_serializable_values_are_type_errors() {
        let err = value_to_json(&Value::set(Default::default())).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Object of type set is not JSON serializable");
    }

    #[test]
    fn test_registry_lookup() {
        let classes = super::super::builtins::builtin_classes();
        let registry = ModuleRegistry::with_standard_modules(&classes);
        assert!(registry.contains("json"));
        assert!(registry.contains("asyncio"));
        assert!(registry.get("os").is_none());
        registry.register(module("custom", vec![("answer", Value::Int(42))]));
        assert!(registry.names().contains(&"custom".to_string()));
    }
}
