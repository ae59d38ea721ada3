//! Builtin functions, builtin types and the exception hierarchy.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::error::{RuntimeError, RuntimeResult};
use super::operators;
use super::values::{lock_mutex, quote_str, Arity, CallArgs, Class, DictKey, Instance, Value};
use super::Evaluator;
use crate::ast::BinaryOp;

/// Exception classes and their parents, parents first.
const EXCEPTIONS: &[(&str, &str)] = &[
    ("Exception", "BaseException"),
    ("ArithmeticError", "Exception"),
    ("ZeroDivisionError", "ArithmeticError"),
    ("OverflowError", "ArithmeticError"),
    ("MemoryError", "Exception"),
    ("LookupError", "Exception"),
    ("KeyError", "LookupError"),
    ("IndexError", "LookupError"),
    ("NameError", "Exception"),
    ("TypeError", "Exception"),
    ("ValueError", "Exception"),
    ("AttributeError", "Exception"),
    ("ImportError", "Exception"),
    ("ModuleNotFoundError", "ImportError"),
    ("AssertionError", "Exception"),
    ("StopIteration", "Exception"),
    ("RuntimeError", "Exception"),
    ("NotImplementedError", "RuntimeError"),
    ("RecursionError", "RuntimeError"),
    ("OSError", "Exception"),
    ("ConnectionError", "OSError"),
    ("TimeoutError", "OSError"),
    ("PermissionError", "OSError"),
];

/// Names of the builtin exception classes, `BaseException` first.
pub fn exception_class_names() -> impl Iterator<Item = &'static str> {
    std::iter::once("BaseException").chain(EXCEPTIONS.iter().map(|(name, _)| *name))
}

/// Runtime types that cannot be constructed from guest code.
const OPAQUE_TYPES: &[&str] = &[
    "function",
    "builtin_function_or_method",
    "method",
    "module",
    "coroutine",
    "iterator",
];

fn native<F>(name: &str, bases: Vec<Arc<Class>>, constructor: F) -> Arc<Class>
where
    F: Fn(&mut Evaluator, CallArgs) -> RuntimeResult<Value> + Send + Sync + 'static,
{
    Arc::new(Class::native(name, bases, Arc::new(constructor)))
}

fn expect_at_most(name: &str, args: &CallArgs, max: usize) -> RuntimeResult<()> {
    Arity::Range(0, max).check(name, args.positional.len())
}

/// Builtin types, `object`, `super` and the exception classes, keyed by name.
pub fn builtin_classes() -> IndexMap<String, Arc<Class>> {
    let mut classes: IndexMap<String, Arc<Class>> = IndexMap::new();
    let object = Arc::new(Class::new("object", Vec::new(), IndexMap::new()));
    classes.insert("object".into(), object.clone());
    let base = || vec![object.clone()];

    let int = native("int", base(), int_new);
    classes.insert("bool".into(), native("bool", vec![int.clone()], |ev, args| {
        expect_at_most("bool", &args, 1)?;
        match args.arg(0) {
            Some(value) => Ok(Value::Bool(ev.is_truthy(value)?)),
            None => Ok(Value::Bool(false)),
        }
    }));
    classes.insert("int".into(), int);
    classes.insert("float".into(), native("float", base(), float_new));
    classes.insert("str".into(), native("str", base(), |ev, args| {
        expect_at_most("str", &args, 1)?;
        match args.arg(0) {
            Some(value) => Ok(Value::Str(ev.str_of(value)?)),
            None => Ok(Value::str("")),
        }
    }));
    classes.insert("list".into(), native("list", base(), |ev, args| {
        expect_at_most("list", &args, 1)?;
        match args.arg(0) {
            Some(value) => Ok(Value::list(ev.iterate(value)?)),
            None => Ok(Value::list(Vec::new())),
        }
    }));
    classes.insert("tuple".into(), native("tuple", base(), |ev, args| {
        expect_at_most("tuple", &args, 1)?;
        match args.arg(0) {
            Some(value) => Ok(Value::tuple(ev.iterate(value)?)),
            None => Ok(Value::tuple(Vec::new())),
        }
    }));
    classes.insert("set".into(), native("set", base(), |ev, args| {
        expect_at_most("set", &args, 1)?;
        let mut items = IndexSet::new();
        if let Some(value) = args.arg(0) {
            for item in ev.iterate(value)? {
                items.insert(DictKey::from_value(&item)?);
            }
        }
        Ok(Value::set(items))
    }));
    classes.insert("dict".into(), native("dict", base(), dict_new));
    classes.insert("type".into(), native("type", base(), type_new));
    classes.insert("NoneType".into(), native("NoneType", base(), |_, args| {
        expect_at_most("NoneType", &args, 0)?;
        Ok(Value::None)
    }));
    classes.insert("super".into(), native("super", base(), super_new));
    for name in OPAQUE_TYPES {
        let message = format!("cannot create '{}' instances", name);
        classes.insert(
            name.to_string(),
            native(name, base(), move |_, _| Err(RuntimeError::TypeError(message.clone()))),
        );
    }

    let base_exception = Arc::new(Class::new("BaseException", base(), IndexMap::new()));
    base_exception.set_attr(
        "__init__",
        Value::builtin("__init__", Arity::AtLeast(1), |_, args| {
            if let Some(Value::Instance(instance)) = args.arg(0) {
                instance.set_attr("args", Value::tuple(args.positional[1..].to_vec()));
            }
            Ok(Value::None)
        }),
    );
    classes.insert("BaseException".into(), base_exception);
    for (name, parent) in EXCEPTIONS {
        let bases = classes.get(*parent).cloned().into_iter().collect();
        classes.insert(
            name.to_string(),
            Arc::new(Class::new(*name, bases, IndexMap::new())),
        );
    }
    classes
}

fn int_new(_: &mut Evaluator, args: CallArgs) -> RuntimeResult<Value> {
    expect_at_most("int", &args, 2)?;
    let Some(value) = args.get(0, "x") else {
        return Ok(Value::Int(0));
    };
    let base = args.get(1, "base").and_then(Value::as_int);
    match value {
        Value::Str(s) => {
            let base = base.unwrap_or(10);
            parse_int(s, base as u32).ok_or_else(|| {
                RuntimeError::ValueError(format!(
                    "invalid literal for int() with base {}: {}",
                    base,
                    quote_str(s)
                ))
            })
        }
        _ if base.is_some() => Err(RuntimeError::TypeError(
            "int() can't convert non-string with explicit base".into(),
        )),
        Value::Float(f) if !f.is_finite() => Err(RuntimeError::ValueError(format!(
            "cannot convert float {} to integer",
            f
        ))),
        Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
        other => other.as_int().map(Value::Int).ok_or_else(|| {
            RuntimeError::TypeError(format!(
                "int() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn parse_int(text: &str, base: u32) -> Option<Value> {
    if !(2..=36).contains(&base) {
        return None;
    }
    let text = text.trim().replace('_', "");
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, text.strip_prefix('+').unwrap_or(&text).to_string()),
    };
    let lowered = digits.to_ascii_lowercase();
    let digits = match base {
        16 => lowered.strip_prefix("0x").unwrap_or(&lowered),
        8 => lowered.strip_prefix("0o").unwrap_or(&lowered),
        2 => lowered.strip_prefix("0b").unwrap_or(&lowered),
        _ => lowered.as_str(),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, base).ok()?;
    Some(Value::Int(if negative { -magnitude } else { magnitude }))
}

fn float_new(_: &mut Evaluator, args: CallArgs) -> RuntimeResult<Value> {
    expect_at_most("float", &args, 1)?;
    match args.arg(0) {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => s
            .trim()
            .replace('_', "")
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| {
                RuntimeError::ValueError(format!(
                    "could not convert string to float: {}",
                    quote_str(s)
                ))
            }),
        Some(other) => other.as_float().map(Value::Float).ok_or_else(|| {
            RuntimeError::TypeError(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn dict_new(ev: &mut Evaluator, args: CallArgs) -> RuntimeResult<Value> {
    expect_at_most("dict", &args, 1)?;
    let mut entries = IndexMap::new();
    match args.arg(0) {
        Some(Value::Dict(other)) => {
            entries.extend(
                super::values::read_lock(other)
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        Some(iterable) => {
            for pair in ev.iterate(iterable)? {
                let pair = ev.iterate(&pair)?;
                if pair.len() != 2 {
                    return Err(RuntimeError::ValueError(format!(
                        "dictionary update sequence element has length {}; 2 is required",
                        pair.len()
                    )));
                }
                entries.insert(DictKey::from_value(&pair[0])?, pair[1].clone());
            }
        }
        None => {}
    }
    for (key, value) in args.keywords {
        entries.insert(DictKey::Str(key), value);
    }
    Ok(Value::dict(entries))
}

fn type_new(ev: &mut Evaluator, args: CallArgs) -> RuntimeResult<Value> {
    match args.positional.as_slice() {
        [value] => ev
            .class_of(value)
            .map(Value::Class)
            .ok_or_else(|| RuntimeError::TypeError(format!("unknown type '{}'", value.type_name()))),
        [Value::Str(name), bases, Value::Dict(namespace)] => {
            let mut parents = Vec::new();
            for base in ev.iterate(bases)? {
                match base {
                    Value::Class(class) => parents.push(class),
                    other => {
                        return Err(RuntimeError::TypeError(format!(
                            "bases must be types, not '{}'",
                            other.type_name()
                        )))
                    }
                }
            }
            let attrs = super::values::read_lock(namespace)
                .iter()
                .filter_map(|(k, v)| match k {
                    DictKey::Str(k) => Some((k.clone(), v.clone())),
                    _ => None,
                })
                .collect();
            Ok(Value::Class(Arc::new(Class::scripted(name.clone(), parents, attrs))))
        }
        _ => Err(RuntimeError::TypeError("type() takes 1 or 3 arguments".into())),
    }
}

/// `super(cls, obj)`: attribute lookups start after `cls` and bind to `obj`.
fn super_new(ev: &mut Evaluator, args: CallArgs) -> RuntimeResult<Value> {
    let [Value::Class(class), receiver] = args.positional.as_slice() else {
        return Err(RuntimeError::Generic("super(): no arguments".into()));
    };
    let proxy_class = ev
        .runtime()
        .class("super")
        .ok_or_else(|| RuntimeError::Generic("super is not available".into()))?;
    let proxy = Instance::new(proxy_class);
    proxy.set_attr("__thisclass__", Value::Class(class.clone()));
    proxy.set_attr("__self__", receiver.clone());
    Ok(Value::Instance(Arc::new(proxy)))
}

/// The builtin scope: functions plus every class from `classes` except the
/// runtime-internal ones.
pub fn standard_builtins(classes: &IndexMap<String, Arc<Class>>) -> IndexMap<String, Value> {
    let mut builtins: IndexMap<String, Value> = IndexMap::new();
    let mut add = |value: Value| {
        if let Value::Builtin(b) = &value {
            builtins.insert(b.name.clone(), value);
        }
    };

    add(Value::builtin("print", Arity::Any, |ev, args| {
        let sep = match args.keywords.get("sep") {
            Some(Value::Str(s)) => s.clone(),
            _ => " ".to_string(),
        };
        let mut parts = Vec::with_capacity(args.positional.len());
        for value in &args.positional {
            parts.push(ev.str_of(value)?);
        }
        let mut line = parts.join(&sep);
        if let Some(Value::Str(end)) = args.keywords.get("end") {
            line.push_str(end.trim_end_matches('\n'));
        }
        ev.runtime().emit(&line);
        Ok(Value::None)
    }));
    add(Value::builtin("len", Arity::Fixed(1), |ev, args| len(ev, &args.positional[0])));
    add(Value::builtin("repr", Arity::Fixed(1), |ev, args| {
        ev.repr_of(&args.positional[0]).map(Value::Str)
    }));
    add(Value::builtin("format", Arity::Range(1, 2), |ev, args| {
        let value = &args.positional[0];
        match args.arg(1).and_then(Value::as_str) {
            Some(spec) if !spec.is_empty() => {
                let value = match value {
                    Value::Instance(_) => Value::Str(ev.str_of(value)?),
                    other => other.clone(),
                };
                operators::format_with_spec(&value, spec).map(Value::Str)
            }
            _ => ev.str_of(value).map(Value::Str),
        }
    }));
    add(Value::builtin("abs", Arity::Fixed(1), |_, args| match &args.positional[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => match other.as_int() {
            Some(i) => i.checked_abs().map(Value::Int).ok_or_else(|| {
                RuntimeError::OverflowError("integer overflow".into())
            }),
            None => Err(RuntimeError::TypeError(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
    }));
    add(Value::builtin("min", Arity::AtLeast(1), |ev, args| extremum(ev, args, "min")));
    add(Value::builtin("max", Arity::AtLeast(1), |ev, args| extremum(ev, args, "max")));
    add(Value::builtin("sum", Arity::Range(1, 2), |ev, args| {
        let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
        for item in ev.iterate(&args.positional[0])? {
            total = operators::binary(BinaryOp::Add, &total, &item)?;
        }
        Ok(total)
    }));
    add(Value::builtin("sorted", Arity::Fixed(1), |ev, args| {
        let items = ev.iterate(&args.positional[0])?;
        let reverse = args.keywords.get("reverse").map(Value::is_truthy).unwrap_or(false);
        ev.sort_values(items, args.keywords.get("key"), reverse).map(Value::list)
    }));
    add(Value::builtin("reversed", Arity::Fixed(1), |ev, args| {
        let mut items = ev.iterate(&args.positional[0])?;
        items.reverse();
        Ok(Value::iterator(items))
    }));
    add(Value::builtin("any", Arity::Fixed(1), |ev, args| {
        for item in ev.iterate(&args.positional[0])? {
            if ev.is_truthy(&item)? {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    }));
    add(Value::builtin("all", Arity::Fixed(1), |ev, args| {
        for item in ev.iterate(&args.positional[0])? {
            if !ev.is_truthy(&item)? {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    }));
    add(Value::builtin("round", Arity::Range(1, 2), |_, args| round(&args)));
    add(Value::builtin("map", Arity::AtLeast(2), |ev, args| {
        let func = args.positional[0].clone();
        let mut columns = Vec::new();
        for iterable in &args.positional[1..] {
            columns.push(ev.iterate(iterable)?);
        }
        let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
        let mut out = Vec::with_capacity(rows);
        for row in 0..rows {
            let call_args = columns.iter().map(|column| column[row].clone()).collect();
            out.push(ev.call_value(&func, CallArgs::new(call_args))?);
        }
        Ok(Value::iterator(out))
    }));
    add(Value::builtin("filter", Arity::Fixed(2), |ev, args| {
        let func = args.positional[0].clone();
        let mut out = Vec::new();
        for item in ev.iterate(&args.positional[1])? {
            let keep = if func.is_none() {
                item.clone()
            } else {
                ev.call_value(&func, CallArgs::new(vec![item.clone()]))?
            };
            if ev.is_truthy(&keep)? {
                out.push(item);
            }
        }
        Ok(Value::iterator(out))
    }));
    add(Value::builtin("enumerate", Arity::Range(1, 2), |ev, args| {
        let start = args.get(1, "start").and_then(Value::as_int).unwrap_or(0);
        let items = ev.iterate(&args.positional[0])?;
        Ok(Value::iterator(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| Value::tuple(vec![Value::Int(start + i as i64), item]))
                .collect(),
        ))
    }));
    add(Value::builtin("zip", Arity::Any, |ev, args| {
        let mut columns = Vec::new();
        for iterable in &args.positional {
            columns.push(ev.iterate(iterable)?);
        }
        let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
        Ok(Value::iterator(
            (0..rows)
                .map(|row| Value::tuple(columns.iter().map(|c| c[row].clone()).collect()))
                .collect(),
        ))
    }));
    add(Value::builtin("iter", Arity::Fixed(1), |ev, args| match &args.positional[0] {
        iterator @ Value::Iterator(_) => Ok(iterator.clone()),
        other => ev.iterate(other).map(Value::iterator),
    }));
    add(Value::builtin("next", Arity::Range(1, 2), |_, args| match &args.positional[0] {
        Value::Iterator(iterator) => {
            let next = lock_mutex(iterator).next();
            match (next, args.arg(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(RuntimeError::StopIteration),
            }
        }
        other => Err(RuntimeError::TypeError(format!(
            "'{}' object is not an iterator",
            other.type_name()
        ))),
    }));
    add(Value::builtin("range", Arity::Range(1, 3), |_, args| range(&args)));
    add(Value::builtin("isinstance", Arity::Fixed(2), |ev, args| {
        let classes = class_list(&args.positional[1], "isinstance")?;
        Ok(Value::Bool(
            classes.iter().any(|class| ev.is_instance(&args.positional[0], class)),
        ))
    }));
    add(Value::builtin("issubclass", Arity::Fixed(2), |_, args| {
        let Value::Class(class) = &args.positional[0] else {
            return Err(RuntimeError::TypeError("issubclass() arg 1 must be a class".into()));
        };
        let classes = class_list(&args.positional[1], "issubclass")?;
        Ok(Value::Bool(classes.iter().any(|other| class.is_subclass_of(other))))
    }));
    add(Value::builtin("hasattr", Arity::Fixed(2), |ev, args| {
        let name = attr_name(&args.positional[1], "hasattr")?;
        match ev.get_attribute(&args.positional[0], &name) {
            Ok(_) => Ok(Value::Bool(true)),
            Err(RuntimeError::AttributeError(_)) => Ok(Value::Bool(false)),
            Err(err) => Err(err),
        }
    }));
    add(Value::builtin("getattr", Arity::Range(2, 3), |ev, args| {
        let name = attr_name(&args.positional[1], "getattr")?;
        match (ev.get_attribute(&args.positional[0], &name), args.arg(2)) {
            (Err(RuntimeError::AttributeError(_)), Some(default)) => Ok(default.clone()),
            (result, _) => result,
        }
    }));
    add(Value::builtin("setattr", Arity::Fixed(3), |ev, args| {
        let name = attr_name(&args.positional[1], "setattr")?;
        ev.set_attribute(&args.positional[0], &name, args.positional[2].clone())?;
        Ok(Value::None)
    }));
    add(Value::builtin("callable", Arity::Fixed(1), |_, args| {
        Ok(Value::Bool(args.positional[0].is_callable()))
    }));
    add(Value::builtin("chr", Arity::Fixed(1), |_, args| {
        args.positional[0]
            .as_int()
            .and_then(|i| u32::try_from(i).ok())
            .and_then(char::from_u32)
            .map(|c| Value::Str(c.to_string()))
            .ok_or_else(|| RuntimeError::ValueError("chr() arg not in range(0x110000)".into()))
    }));
    add(Value::builtin("ord", Arity::Fixed(1), |_, args| {
        let text = args.positional[0].as_str().unwrap_or_default();
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Value::Int(c as i64)),
            _ => Err(RuntimeError::TypeError(format!(
                "ord() expected a character, but string of length {} found",
                text.chars().count()
            ))),
        }
    }));

    for (name, class) in classes {
        if !OPAQUE_TYPES.contains(&name.as_str()) && name != "NoneType" {
            builtins.insert(name.clone(), Value::Class(class.clone()));
        }
    }
    builtins
}

fn len(ev: &mut Evaluator, value: &Value) -> RuntimeResult<Value> {
    let n = match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => super::values::read_lock(items).len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(entries) => super::values::read_lock(entries).len(),
        Value::Set(items) => super::values::read_lock(items).len(),
        Value::Instance(instance) => {
            if let Some(method) = instance.class.lookup("__len__") {
                return ev.call_value(&method, CallArgs::new(vec![value.clone()]));
            }
            return Err(no_len(value));
        }
        other => return Err(no_len(other)),
    };
    Ok(Value::Int(n as i64))
}

fn no_len(value: &Value) -> RuntimeError {
    RuntimeError::TypeError(format!("object of type '{}' has no len()", value.type_name()))
}

fn extremum(ev: &mut Evaluator, args: CallArgs, name: &str) -> RuntimeResult<Value> {
    let items = if args.positional.len() == 1 {
        ev.iterate(&args.positional[0])?
    } else {
        args.positional.clone()
    };
    if items.is_empty() {
        return args.keywords.get("default").cloned().ok_or_else(|| {
            RuntimeError::ValueError(format!("{}() arg is an empty sequence", name))
        });
    }
    let sorted = ev.sort_values(items, args.keywords.get("key"), false)?;
    let picked = if name == "min" { sorted.first() } else { sorted.last() };
    Ok(picked.cloned().unwrap_or(Value::None))
}

fn round_half_even(x: f64) -> f64 {
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        x.round()
    }
}

fn round(args: &CallArgs) -> RuntimeResult<Value> {
    let number = &args.positional[0];
    let digits = args.get(1, "ndigits").filter(|v| !v.is_none());
    match (number, digits) {
        (Value::Float(f), None) => Ok(Value::Int(round_half_even(*f) as i64)),
        (Value::Float(f), Some(digits)) => {
            let digits = digits.as_int().unwrap_or(0) as i32;
            let factor = 10f64.powi(digits);
            Ok(Value::Float(round_half_even(f * factor) / factor))
        }
        (other, _) => other.as_int().map(Value::Int).ok_or_else(|| {
            RuntimeError::TypeError(format!(
                "type {} doesn't define __round__ method",
                other.type_name()
            ))
        }),
    }
}

/// Upper bound on `range()` materialization.
const MAX_RANGE_LEN: i64 = 10_000_000;

fn range(args: &CallArgs) -> RuntimeResult<Value> {
    let mut bounds = Vec::with_capacity(3);
    for value in &args.positional {
        bounds.push(value.as_int().ok_or_else(|| {
            RuntimeError::TypeError(format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ))
        })?);
    }
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(RuntimeError::TypeError("range expected 1 to 3 arguments".into())),
    };
    if step == 0 {
        return Err(RuntimeError::ValueError("range() arg 3 must not be zero".into()));
    }
    let len = if step > 0 {
        (stop - start + step - 1) / step
    } else {
        (start - stop - step - 1) / -step
    }
    .max(0);
    if len > MAX_RANGE_LEN {
        return Err(RuntimeError::ValueError("range() too large".into()));
    }
    Ok(Value::list((0..len).map(|i| Value::Int(start + i * step)).collect()))
}

fn class_list(value: &Value, function: &str) -> RuntimeResult<Vec<Arc<Class>>> {
    match value {
        Value::Class(class) => Ok(vec![class.clone()]),
        Value::Tuple(items) => {
            let mut classes = Vec::with_capacity(items.len());
            for item in items.iter() {
                classes.extend(class_list(item, function)?);
            }
            Ok(classes)
        }
        _ => Err(RuntimeError::TypeError(format!(
            "{}() arg 2 must be a type or tuple of types",
            function
        ))),
    }
}

fn attr_name(value: &Value, function: &str) -> RuntimeResult<String> {
    value.as_str().map(str::to_string).ok_or_else(|| {
        RuntimeError::TypeError(format!("{}(): attribute name must be string", function))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_hierarchy() {
        let classes = builtin_classes();
        let key_error = &classes["KeyError"];
        assert!(key_error.is_subclass_of(&classes["LookupError"]));
        assert!(key_error.is_subclass_of(&classes["Exception"]));
        assert!(classes["TimeoutError"].is_subclass_of(&classes["OSError"]));
        assert!(!classes["ValueError"].is_subclass_of(&classes["LookupError"]));
        assert!(classes["bool"].is_subclass_of(&classes["int"]));
    }

    #[test]
    fn test_parse_int_bases() {
        assert!(matches!(parse_int(" 42 ", 10), Some(Value::Int(42))));
        assert!(matches!(parse_int("-0x1f", 16), Some(Value::Int(-31))));
        assert!(matches!(parse_int("1_000", 10), Some(Value::Int(1000))));
        assert!(parse_int("4.2", 10).is_none());
        assert!(parse_int("--1", 10).is_none());
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5), 2.0);
        assert_eq!(round_half_even(3.5), 4.0);
        assert_eq!(round_half_even(-2.5), -2.0);
        assert_eq!(round_half_even(2.6), 3.0);
    }

    #[test]
    fn test_range_lengths() {
        let list = |args: Vec<i64>| {
            let args = CallArgs::new(args.into_iter().map(Value::Int).collect());
            match range(&args).unwrap() {
                Value::List(items) => super::super::values::read_lock(&items).len(),
                _ => unreachable!(),
            }
        };
        assert_eq!(list(vec![5]), 5);
        assert_eq!(list(vec![2, 5]), 3);
        assert_eq!(list(vec![0, 10, 3]), 4);
        assert_eq!(list(vec![5, 0, -2]), 3);
        assert_eq!(list(vec![5, 2]), 0);
    }
}
