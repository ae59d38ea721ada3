//! Methods of the builtin container and string types.
//!
//! `receiver.name` on a non-instance value resolves here to a builtin that
//! has captured the receiver.

use std::sync::{Arc, RwLock};

use indexmap::{IndexMap, IndexSet};

use super::error::{RuntimeError, RuntimeResult};
use super::operators;
use super::values::{read_lock, write_lock, Arity, CallArgs, DictKey, Value};
use super::Evaluator;

type ListRef = Arc<RwLock<Vec<Value>>>;
type DictRef = Arc<RwLock<IndexMap<DictKey, Value>>>;
type SetRef = Arc<RwLock<IndexSet<DictKey>>>;

pub fn builtin_method(receiver: &Value, name: &str) -> Option<Value> {
    match receiver {
        Value::Str(s) => str_method(s, name),
        Value::List(items) => list_method(items, name),
        Value::Dict(entries) => dict_method(entries, name),
        Value::Set(items) => set_method(items, name),
        Value::Tuple(items) => tuple_method(items, name),
        _ => None,
    }
}

/// Builtin closing over `target`.
fn on<T, F>(target: &T, name: &str, arity: Arity, func: F) -> Value
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&mut Evaluator, &T, CallArgs) -> RuntimeResult<Value> + Send + Sync + 'static,
{
    let target = target.clone();
    Value::builtin(name, arity, move |ev, args| func(ev, &target, args))
}

fn str_arg(args: &CallArgs, index: usize, name: &str, method: &str) -> RuntimeResult<Option<String>> {
    match args.get(index, name) {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(RuntimeError::TypeError(format!(
            "{}() argument must be str or None, not {}",
            method,
            other.type_name()
        ))),
    }
}

fn required_str(args: &CallArgs, index: usize, name: &str, method: &str) -> RuntimeResult<String> {
    str_arg(args, index, name, method)?.ok_or_else(|| {
        RuntimeError::TypeError(format!("{}() missing required argument '{}'", method, name))
    })
}

fn int_arg(args: &CallArgs, index: usize, name: &str, default: i64) -> RuntimeResult<i64> {
    match args.get(index, name) {
        None | Some(Value::None) => Ok(default),
        Some(value) => value.as_int().ok_or_else(|| {
            RuntimeError::TypeError(format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ))
        }),
    }
}

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn str_method(s: &str, name: &str) -> Option<Value> {
    let s = s.to_string();
    let method = match name {
        "lower" => on(&s, name, Arity::Fixed(0), |_, s, _| Ok(Value::str(s.to_lowercase()))),
        "upper" => on(&s, name, Arity::Fixed(0), |_, s, _| Ok(Value::str(s.to_uppercase()))),
        "strip" | "lstrip" | "rstrip" => {
            let which = name.to_string();
            on(&s, name, Arity::Range(0, 1), move |_, s, args| {
                let chars = str_arg(&args, 0, "chars", &which)?;
                let matcher = |c: char| match &chars {
                    Some(set) => set.contains(c),
                    None => c.is_whitespace(),
                };
                let out = match which.as_str() {
                    "lstrip" => s.trim_start_matches(matcher),
                    "rstrip" => s.trim_end_matches(matcher),
                    _ => s.trim_matches(matcher),
                };
                Ok(Value::str(out))
            })
        }
        "split" => on(&s, name, Arity::Range(0, 2), |_, s, args| {
            let sep = str_arg(&args, 0, "sep", "split")?;
            let maxsplit = int_arg(&args, 1, "maxsplit", -1)?;
            Ok(Value::list(split(s, sep.as_deref(), maxsplit)?))
        }),
        "splitlines" => on(&s, name, Arity::Range(0, 1), |_, s, _| {
            Ok(Value::list(s.lines().map(Value::str).collect()))
        }),
        "join" => on(&s, name, Arity::Fixed(1), |ev, s, args| {
            let items = ev.iterate(&args.positional[0])?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Str(part) => parts.push(part.as_str()),
                    other => {
                        return Err(RuntimeError::TypeError(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            other.type_name()
                        )))
                    }
                }
            }
            Ok(Value::str(parts.join(s.as_str())))
        }),
        "replace" => on(&s, name, Arity::Range(2, 3), |_, s, args| {
            let old = required_str(&args, 0, "old", "replace")?;
            let new = required_str(&args, 1, "new", "replace")?;
            let count = int_arg(&args, 2, "count", -1)?;
            Ok(Value::str(if count < 0 {
                s.replace(&old, &new)
            } else {
                s.replacen(&old, &new, count as usize)
            }))
        }),
        "startswith" | "endswith" => {
            let which = name.to_string();
            on(&s, name, Arity::Fixed(1), move |_, s, args| {
                let candidates = match &args.positional[0] {
                    Value::Str(p) => vec![p.clone()],
                    Value::Tuple(items) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    other => {
                        return Err(RuntimeError::TypeError(format!(
                            "{} first arg must be str or a tuple of str, not {}",
                            which,
                            other.type_name()
                        )))
                    }
                };
                let hit = candidates.iter().any(|p| {
                    if which == "startswith" {
                        s.starts_with(p.as_str())
                    } else {
                        s.ends_with(p.as_str())
                    }
                });
                Ok(Value::Bool(hit))
            })
        }
        "find" | "index" | "rfind" => {
            let which = name.to_string();
            on(&s, name, Arity::Fixed(1), move |_, s, args| {
                let sub = required_str(&args, 0, "sub", &which)?;
                let found = if which == "rfind" { s.rfind(&sub) } else { s.find(&sub) };
                match found {
                    Some(byte) => Ok(Value::Int(char_index(s, byte))),
                    None if which == "index" => {
                        Err(RuntimeError::ValueError("substring not found".into()))
                    }
                    None => Ok(Value::Int(-1)),
                }
            })
        }
        "count" => on(&s, name, Arity::Fixed(1), |_, s, args| {
            let sub = required_str(&args, 0, "sub", "count")?;
            let count = if sub.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(sub.as_str()).count()
            };
            Ok(Value::Int(count as i64))
        }),
        "format" => on(&s, name, Arity::Any, |ev, s, args| {
            str_format(ev, s, &args).map(Value::Str)
        }),
        // strings double as bytes
        "encode" | "decode" => on(&s, name, Arity::Range(0, 2), |_, s, _| Ok(Value::str(s.clone()))),
        "isdigit" => on(&s, name, Arity::Fixed(0), |_, s, _| {
            Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())))
        }),
        "isalpha" => on(&s, name, Arity::Fixed(0), |_, s, _| {
            Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)))
        }),
        "isalnum" => on(&s, name, Arity::Fixed(0), |_, s, _| {
            Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric)))
        }),
        "isspace" => on(&s, name, Arity::Fixed(0), |_, s, _| {
            Ok(Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)))
        }),
        "isupper" => on(&s, name, Arity::Fixed(0), |_, s, _| {
            Ok(Value::Bool(
                s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase),
            ))
        }),
        "islower" => on(&s, name, Arity::Fixed(0), |_, s, _| {
            Ok(Value::Bool(
                s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase),
            ))
        }),
        "capitalize" => on(&s, name, Arity::Fixed(0), |_, s, _| {
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            };
            Ok(Value::str(out))
        }),
        "title" => on(&s, name, Arity::Fixed(0), |_, s, _| {
            let mut out = String::with_capacity(s.len());
            let mut previous_cased = false;
            for c in s.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            Ok(Value::str(out))
        }),
        "zfill" => on(&s, name, Arity::Fixed(1), |_, s, args| {
            let width = int_arg(&args, 0, "width", 0)?.max(0) as usize;
            let len = s.chars().count();
            if len >= width {
                return Ok(Value::str(s.clone()));
            }
            let (sign, digits) = match s.strip_prefix(['-', '+']) {
                Some(rest) => (&s[..1], rest),
                None => ("", s.as_str()),
            };
            let zeros = operators::padding_width(width - len)?;
            Ok(Value::str(format!("{}{}{}", sign, "0".repeat(zeros), digits)))
        }),
        "ljust" | "rjust" | "center" => {
            let which = name.to_string();
            on(&s, name, Arity::Range(1, 2), move |_, s, args| {
                let width = int_arg(&args, 0, "width", 0)?;
                let fill = str_arg(&args, 1, "fillchar", &which)?
                    .and_then(|f| f.chars().next())
                    .unwrap_or(' ');
                let align = match which.as_str() {
                    "ljust" => '<',
                    "rjust" => '>',
                    _ => '^',
                };
                let spec = format!("{}{}{}", fill, align, width.max(0));
                operators::format_with_spec(&Value::str(s.clone()), &spec).map(Value::Str)
            })
        }
        "partition" => on(&s, name, Arity::Fixed(1), |_, s, args| {
            let sep = required_str(&args, 0, "sep", "partition")?;
            let parts = match s.split_once(sep.as_str()) {
                Some((head, tail)) => vec![Value::str(head), Value::str(sep.clone()), Value::str(tail)],
                None => vec![Value::str(s.clone()), Value::str(""), Value::str("")],
            };
            Ok(Value::tuple(parts))
        }),
        _ => return None,
    };
    Some(method)
}

fn split(s: &str, sep: Option<&str>, maxsplit: i64) -> RuntimeResult<Vec<Value>> {
    let limit = if maxsplit < 0 { usize::MAX } else { maxsplit as usize + 1 };
    let parts: Vec<Value> = match sep {
        Some("") => return Err(RuntimeError::ValueError("empty separator".into())),
        Some(sep) => s.splitn(limit, sep).map(Value::str).collect(),
        None => {
            let mut parts = Vec::new();
            let mut rest = s.trim_start();
            while !rest.is_empty() {
                if parts.len() + 1 == limit {
                    parts.push(Value::str(rest.trim_end()));
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(Value::str(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            parts
        }
    };
    Ok(parts)
}

/// `str.format`: `{}`, `{0}`, `{name}`, with optional `!r` and `:spec`.
fn str_format(ev: &mut Evaluator, template: &str, args: &CallArgs) -> RuntimeResult<String> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(RuntimeError::ValueError(
                        "Single '{' encountered in format string".into(),
                    ));
                }
                let (field, spec) = match field.split_once(':') {
                    Some((field, spec)) => (field.to_string(), Some(spec.to_string())),
                    None => (field, None),
                };
                let (field, conversion) = match field.split_once('!') {
                    Some((field, conv)) => (field.to_string(), conv.chars().next()),
                    None => (field, None),
                };
                let value = if field.is_empty() {
                    let value = args.positional.get(auto_index).cloned();
                    auto_index += 1;
                    value.ok_or_else(|| {
                        RuntimeError::IndexError(format!(
                            "Replacement index {} out of range for positional args tuple",
                            auto_index - 1
                        ))
                    })?
                } else if let Ok(index) = field.parse::<usize>() {
                    args.positional.get(index).cloned().ok_or_else(|| {
                        RuntimeError::IndexError(format!(
                            "Replacement index {} out of range for positional args tuple",
                            index
                        ))
                    })?
                } else {
                    args.keywords
                        .get(&field)
                        .cloned()
                        .ok_or_else(|| RuntimeError::KeyError(format!("'{}'", field)))?
                };
                let value = match conversion {
                    Some('r') => Value::Str(ev.repr_of(&value)?),
                    Some(_) => Value::Str(ev.str_of(&value)?),
                    None => value,
                };
                match spec.as_deref() {
                    None | Some("") => out.push_str(&ev.str_of(&value)?),
                    Some(spec) => {
                        let value = match value {
                            Value::Instance(_) => Value::Str(ev.str_of(&value)?),
                            other => other,
                        };
                        out.push_str(&operators::format_with_spec(&value, spec)?);
                    }
                }
            }
            '}' => {
                return Err(RuntimeError::ValueError(
                    "Single '}' encountered in format string".into(),
                ))
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn list_method(items: &ListRef, name: &str) -> Option<Value> {
    let method = match name {
        "append" => on(items, name, Arity::Fixed(1), |_, items, args| {
            write_lock(items).push(args.positional[0].clone());
            Ok(Value::None)
        }),
        "extend" => on(items, name, Arity::Fixed(1), |ev, items, args| {
            let extra = ev.iterate(&args.positional[0])?;
            write_lock(items).extend(extra);
            Ok(Value::None)
        }),
        "insert" => on(items, name, Arity::Fixed(2), |_, items, args| {
            let index = int_arg(&args, 0, "index", 0)?;
            let mut items = write_lock(items);
            let len = items.len() as i64;
            let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(index as usize, args.positional[1].clone());
            Ok(Value::None)
        }),
        "pop" => on(items, name, Arity::Range(0, 1), |_, items, args| {
            let index = int_arg(&args, 0, "index", -1)?;
            let mut items = write_lock(items);
            if items.is_empty() {
                return Err(RuntimeError::IndexError("pop from empty list".into()));
            }
            let len = items.len() as i64;
            let resolved = if index < 0 { index + len } else { index };
            if resolved < 0 || resolved >= len {
                return Err(RuntimeError::IndexError("pop index out of range".into()));
            }
            Ok(items.remove(resolved as usize))
        }),
        "remove" => on(items, name, Arity::Fixed(1), |_, items, args| {
            let mut items = write_lock(items);
            match items.iter().position(|v| operators::values_equal(v, &args.positional[0])) {
                Some(index) => {
                    items.remove(index);
                    Ok(Value::None)
                }
                None => Err(RuntimeError::ValueError(
                    "list.remove(x): x not in list".into(),
                )),
            }
        }),
        "index" => on(items, name, Arity::Fixed(1), |_, items, args| {
            let needle = &args.positional[0];
            read_lock(items)
                .iter()
                .position(|v| operators::values_equal(v, needle))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| RuntimeError::ValueError(format!("{} is not in list", needle.repr())))
        }),
        "count" => on(items, name, Arity::Fixed(1), |_, items, args| {
            let needle = &args.positional[0];
            let count = read_lock(items)
                .iter()
                .filter(|v| operators::values_equal(v, needle))
                .count();
            Ok(Value::Int(count as i64))
        }),
        "clear" => on(items, name, Arity::Fixed(0), |_, items, _| {
            let drained: Vec<Value> = write_lock(items).drain(..).collect();
            drop(drained);
            Ok(Value::None)
        }),
        "copy" => on(items, name, Arity::Fixed(0), |_, items, _| {
            Ok(Value::list(read_lock(items).clone()))
        }),
        "reverse" => on(items, name, Arity::Fixed(0), |_, items, _| {
            write_lock(items).reverse();
            Ok(Value::None)
        }),
        "sort" => on(items, name, Arity::Fixed(0), |ev, items, args| {
            let snapshot = read_lock(items).clone();
            let reverse = args.keywords.get("reverse").map(Value::is_truthy).unwrap_or(false);
            let sorted = ev.sort_values(snapshot, args.keywords.get("key"), reverse)?;
            *write_lock(items) = sorted;
            Ok(Value::None)
        }),
        _ => return None,
    };
    Some(method)
}

fn tuple_method(items: &Arc<Vec<Value>>, name: &str) -> Option<Value> {
    let method = match name {
        "index" => on(items, name, Arity::Fixed(1), |_, items, args| {
            let needle = &args.positional[0];
            items
                .iter()
                .position(|v| operators::values_equal(v, needle))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| RuntimeError::ValueError("tuple.index(x): x not in tuple".into()))
        }),
        "count" => on(items, name, Arity::Fixed(1), |_, items, args| {
            let needle = &args.positional[0];
            Ok(Value::Int(
                items.iter().filter(|v| operators::values_equal(v, needle)).count() as i64,
            ))
        }),
        _ => return None,
    };
    Some(method)
}

fn dict_method(entries: &DictRef, name: &str) -> Option<Value> {
    let method = match name {
        "get" => on(entries, name, Arity::Range(1, 2), |_, entries, args| {
            let key = DictKey::from_value(&args.positional[0])?;
            let default = args.positional.get(1).cloned().unwrap_or(Value::None);
            Ok(read_lock(entries).get(&key).cloned().unwrap_or(default))
        }),
        "keys" => on(entries, name, Arity::Fixed(0), |_, entries, _| {
            Ok(Value::list(read_lock(entries).keys().map(DictKey::to_value).collect()))
        }),
        "values" => on(entries, name, Arity::Fixed(0), |_, entries, _| {
            Ok(Value::list(read_lock(entries).values().cloned().collect()))
        }),
        "items" => on(entries, name, Arity::Fixed(0), |_, entries, _| {
            Ok(Value::list(
                read_lock(entries)
                    .iter()
                    .map(|(k, v)| Value::tuple(vec![k.to_value(), v.clone()]))
                    .collect(),
            ))
        }),
        "pop" => on(entries, name, Arity::Range(1, 2), |_, entries, args| {
            let key = DictKey::from_value(&args.positional[0])?;
            let removed = write_lock(entries).shift_remove(&key);
            match (removed, args.positional.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(RuntimeError::KeyError(args.positional[0].repr())),
            }
        }),
        "setdefault" => on(entries, name, Arity::Range(1, 2), |_, entries, args| {
            let key = DictKey::from_value(&args.positional[0])?;
            let default = args.positional.get(1).cloned().unwrap_or(Value::None);
            Ok(write_lock(entries).entry(key).or_insert(default).clone())
        }),
        "update" => on(entries, name, Arity::Range(0, 1), |ev, entries, args| {
            let mut updates = Vec::new();
            match args.positional.first() {
                Some(Value::Dict(other)) => {
                    updates.extend(read_lock(other).iter().map(|(k, v)| (k.clone(), v.clone())))
                }
                Some(other) => {
                    for pair in ev.iterate(other)? {
                        let pair = ev.iterate(&pair)?;
                        if pair.len() != 2 {
                            return Err(RuntimeError::ValueError(format!(
                                "dictionary update sequence element has length {}; 2 is required",
                                pair.len()
                            )));
                        }
                        updates.push((DictKey::from_value(&pair[0])?, pair[1].clone()));
                    }
                }
                None => {}
            }
            updates.extend(
                args.keywords
                    .iter()
                    .map(|(k, v)| (DictKey::Str(k.clone()), v.clone())),
            );
            write_lock(entries).extend(updates);
            Ok(Value::None)
        }),
        "copy" => on(entries, name, Arity::Fixed(0), |_, entries, _| {
            Ok(Value::dict(read_lock(entries).clone()))
        }),
        "clear" => on(entries, name, Arity::Fixed(0), |_, entries, _| {
            let drained: Vec<(DictKey, Value)> = write_lock(entries).drain(..).collect();
            drop(drained);
            Ok(Value::None)
        }),
        _ => return None,
    };
    Some(method)
}

fn set_method(items: &SetRef, name: &str) -> Option<Value> {
    let method = match name {
        "add" => on(items, name, Arity::Fixed(1), |_, items, args| {
            let key = DictKey::from_value(&args.positional[0])?;
            write_lock(items).insert(key);
            Ok(Value::None)
        }),
        "discard" => on(items, name, Arity::Fixed(1), |_, items, args| {
            let key = DictKey::from_value(&args.positional[0])?;
            write_lock(items).shift_remove(&key);
            Ok(Value::None)
        }),
        "remove" => on(items, name, Arity::Fixed(1), |_, items, args| {
            let key = DictKey::from_value(&args.positional[0])?;
            if write_lock(items).shift_remove(&key) {
                Ok(Value::None)
            } else {
                Err(RuntimeError::KeyError(args.positional[0].repr()))
            }
        }),
        "copy" => on(items, name, Arity::Fixed(0), |_, items, _| {
            Ok(Value::set(read_lock(items).clone()))
        }),
        _ => return None,
    };
    Some(method)
}
