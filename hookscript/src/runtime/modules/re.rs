//! `re` subset backed by the `regex` crate. Patterns use the crate's syntax,
//! which covers the Python syntax providers rely on except look-around and
//! backreferences.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use regex::{Captures, Regex};

use super::{class_value, module as build_module};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::values::{read_lock, Arity, CallArgs, Class, DictKey, Instance, Module, Value};
use crate::runtime::Evaluator;

const IGNORECASE: i64 = 2;
const MULTILINE: i64 = 8;
const DOTALL: i64 = 16;

/// Classes backing match and compiled-pattern objects.
struct ReClasses {
    matched: Weak<Class>,
    pattern: Weak<Class>,
}

impl ReClasses {
    fn class(weak: &Weak<Class>) -> RuntimeResult<Arc<Class>> {
        weak.upgrade()
            .ok_or_else(|| RuntimeError::Generic("re module was dropped".into()))
    }
}

fn compile(pattern: &str, flags: i64) -> RuntimeResult<Regex> {
    let mut prefix = String::new();
    if flags & IGNORECASE != 0 {
        prefix.push_str("(?i)");
    }
    if flags & MULTILINE != 0 {
        prefix.push_str("(?m)");
    }
    if flags & DOTALL != 0 {
        prefix.push_str("(?s)");
    }
    Regex::new(&format!("{}{}", prefix, pattern))
        .map_err(|e| RuntimeError::ValueError(format!("invalid regular expression: {}", e)))
}

/// Pattern source and flags from a string or a compiled pattern.
fn pattern_parts(value: &Value, flags: Option<&Value>) -> RuntimeResult<(String, i64)> {
    let flags = flags.and_then(Value::as_int).unwrap_or(0);
    match value {
        Value::Str(pattern) => Ok((pattern.clone(), flags)),
        Value::Instance(instance) => {
            let pattern = instance
                .get_attr("pattern")
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| RuntimeError::TypeError("expected a compiled pattern".into()))?;
            let own = instance.get_attr("flags").and_then(|v| v.as_int()).unwrap_or(0);
            Ok((pattern, own | flags))
        }
        other => Err(RuntimeError::TypeError(format!(
            "first argument must be string or compiled pattern, not {}",
            other.type_name()
        ))),
    }
}

fn subject<'a>(args: &'a CallArgs, index: usize, name: &str) -> RuntimeResult<&'a str> {
    args.get(index, name)
        .and_then(Value::as_str)
        .ok_or_else(|| RuntimeError::TypeError(format!("expected string for '{}'", name)))
}

fn match_object(classes: &ReClasses, regex: &Regex, caps: &Captures) -> RuntimeResult<Value> {
    let instance = Instance::new(ReClasses::class(&classes.matched)?);
    let groups: Vec<Value> = caps
        .iter()
        .map(|group| group.map(|m| Value::str(m.as_str())).unwrap_or(Value::None))
        .collect();
    let named: IndexMap<DictKey, Value> = regex
        .capture_names()
        .flatten()
        .map(|name| {
            let value = caps
                .name(name)
                .map(|m| Value::str(m.as_str()))
                .unwrap_or(Value::None);
            (DictKey::from(name), value)
        })
        .collect();
    let whole = caps.get(0);
    instance.set_attr("_groups", Value::tuple(groups));
    instance.set_attr("_named", Value::dict(named));
    instance.set_attr("_start", Value::Int(whole.map(|m| m.start() as i64).unwrap_or(0)));
    instance.set_attr("_end", Value::Int(whole.map(|m| m.end() as i64).unwrap_or(0)));
    Ok(Value::Instance(Arc::new(instance)))
}

fn group_of(receiver: &Instance, key: &Value) -> RuntimeResult<Value> {
    match key {
        Value::Str(name) => {
            let found = match receiver.get_attr("_named") {
                Some(Value::Dict(named)) => {
                    let named = read_lock(&named);
                    named.get(&DictKey::from(name.as_str())).cloned()
                }
                _ => None,
            };
            found.ok_or_else(|| RuntimeError::IndexError("no such group".into()))
        }
        other => {
            let index = other
                .as_int()
                .ok_or_else(|| RuntimeError::IndexError("no such group".into()))?;
            match receiver.get_attr("_groups") {
                Some(Value::Tuple(groups)) => usize::try_from(index)
                    .ok()
                    .and_then(|i| groups.get(i).cloned())
                    .ok_or_else(|| RuntimeError::IndexError("no such group".into())),
                _ => Err(RuntimeError::IndexError("no such group".into())),
            }
        }
    }
}

fn match_receiver(args: &CallArgs) -> RuntimeResult<Arc<Instance>> {
    match args.arg(0) {
        Some(Value::Instance(instance)) => Ok(instance.clone()),
        _ => Err(RuntimeError::TypeError("expected a match object".into())),
    }
}

fn match_class() -> Arc<Class> {
    let class = Arc::new(Class::new("Match", Vec::new(), IndexMap::new()));
    class.set_attr(
        "group",
        Value::builtin("group", Arity::AtLeast(1), |_, args| {
            let receiver = match_receiver(&args)?;
            match &args.positional[1..] {
                [] => group_of(&receiver, &Value::Int(0)),
                [key] => group_of(&receiver, key),
                keys => Ok(Value::tuple(
                    keys.iter()
                        .map(|key| group_of(&receiver, key))
                        .collect::<RuntimeResult<_>>()?,
                )),
            }
        }),
    );
    class.set_attr(
        "groups",
        Value::builtin("groups", Arity::Fixed(1), |_, args| {
            let receiver = match_receiver(&args)?;
            match receiver.get_attr("_groups") {
                Some(Value::Tuple(groups)) => Ok(Value::tuple(groups.iter().skip(1).cloned().collect())),
                _ => Ok(Value::tuple(Vec::new())),
            }
        }),
    );
    class.set_attr(
        "groupdict",
        Value::builtin("groupdict", Arity::Fixed(1), |_, args| {
            let receiver = match_receiver(&args)?;
            Ok(receiver.get_attr("_named").unwrap_or_else(|| Value::dict(IndexMap::new())))
        }),
    );
    for (name, attr) in [("start", "_start"), ("end", "_end")] {
        class.set_attr(
            name,
            Value::builtin(name, Arity::Fixed(1), move |_, args| {
                Ok(match_receiver(&args)?.get_attr(attr).unwrap_or(Value::Int(0)))
            }),
        );
    }
    class
}

/// Search flavours differing in anchoring.
#[derive(Clone, Copy)]
enum Anchor {
    Search,
    Start,
    Full,
}

fn find(
    classes: &ReClasses,
    regex: &Regex,
    text: &str,
    anchor: Anchor,
) -> RuntimeResult<Value> {
    let Some(caps) = regex.captures(text) else {
        return Ok(Value::None);
    };
    let Some(whole) = caps.get(0) else {
        return Ok(Value::None);
    };
    let accepted = match anchor {
        Anchor::Search => true,
        Anchor::Start => whole.start() == 0,
        Anchor::Full => whole.start() == 0 && whole.end() == text.len(),
    };
    if !accepted {
        // a later or shorter leftmost match does not rule out an anchored one
        let anchored = match anchor {
            Anchor::Full => format!(r"\A(?:{})\z", regex.as_str()),
            _ => format!(r"\A(?:{})", regex.as_str()),
        };
        let anchored = Regex::new(&anchored)
            .map_err(|e| RuntimeError::ValueError(format!("invalid regular expression: {}", e)))?;
        return match anchored.captures(text) {
            Some(caps) => match_object(classes, &anchored, &caps),
            None => Ok(Value::None),
        };
    }
    match_object(classes, regex, &caps)
}

fn findall(regex: &Regex, text: &str) -> Value {
    let groups = regex.captures_len() - 1;
    let text_of = |m: Option<regex::Match>| Value::str(m.map(|m| m.as_str()).unwrap_or(""));
    Value::list(
        regex
            .captures_iter(text)
            .map(|caps| match groups {
                0 => text_of(caps.get(0)),
                1 => text_of(caps.get(1)),
                _ => Value::tuple((1..=groups).map(|i| text_of(caps.get(i))).collect()),
            })
            .collect(),
    )
}

/// Rewrites a Python replacement template (`\1`, `\g<name>`) for `regex`.
fn replacement_template(repl: &str) -> String {
    let mut out = String::with_capacity(repl.len());
    let mut chars = repl.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{}}}", group));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|&c| c != '>').collect();
                        out.push_str(&format!("${{{}}}", name));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    out
}

fn substitute(
    ev: &mut Evaluator,
    classes: &ReClasses,
    regex: &Regex,
    repl: &Value,
    text: &str,
    count: usize,
) -> RuntimeResult<Value> {
    let limit = if count == 0 { usize::MAX } else { count };
    match repl {
        Value::Str(template) => {
            let template = replacement_template(template);
            Ok(Value::str(regex.replacen(text, count, template.as_str()).into_owned()))
        }
        callable if callable.is_callable() => {
            let mut out = String::new();
            let mut last = 0;
            for caps in regex.captures_iter(text).take(limit) {
                let Some(whole) = caps.get(0) else { continue };
                out.push_str(&text[last..whole.start()]);
                let matched = match_object(classes, regex, &caps)?;
                let replacement = ev.call_value(callable, CallArgs::new(vec![matched]))?;
                out.push_str(&ev.str_of(&replacement)?);
                last = whole.end();
            }
            out.push_str(&text[last..]);
            Ok(Value::Str(out))
        }
        other => Err(RuntimeError::TypeError(format!(
            "expected str or callable replacement, not {}",
            other.type_name()
        ))),
    }
}

fn split(regex: &Regex, text: &str, maxsplit: usize) -> Value {
    let parts: Vec<Value> = if maxsplit == 0 {
        regex.split(text).map(Value::str).collect()
    } else {
        regex.splitn(text, maxsplit + 1).map(Value::str).collect()
    };
    Value::list(parts)
}

/// Registers `name` as both a module function taking a pattern first and a
/// method of compiled patterns.
fn define<F>(
    functions: &mut Vec<(&'static str, Value)>,
    pattern_class: &Arc<Class>,
    name: &'static str,
    extra_args: usize,
    flags_at: Option<usize>,
    func: F,
) where
    F: Fn(&mut Evaluator, &Regex, &CallArgs) -> RuntimeResult<Value> + Send + Sync + 'static,
{
    let func = Arc::new(func);
    let module_func = func.clone();
    // module form: (pattern, args...), flags positional only where re allows it
    functions.push((
        name,
        Value::builtin(name, Arity::AtLeast(1 + extra_args), move |ev, args| {
            let flags = match flags_at {
                Some(index) => args.get(index, "flags"),
                None => args.keywords.get("flags"),
            };
            let (pattern, flags) = pattern_parts(&args.positional[0], flags)?;
            let regex = compile(&pattern, flags)?;
            module_func(ev, &regex, &args)
        }),
    ));
    // method form: (self, args...)
    pattern_class.set_attr(
        name,
        Value::builtin(name, Arity::AtLeast(1 + extra_args), move |ev, args| {
            let (pattern, flags) = pattern_parts(&args.positional[0], None)?;
            let regex = compile(&pattern, flags)?;
            func(ev, &regex, &args)
        }),
    );
}

pub(super) fn module(classes: &IndexMap<String, Arc<Class>>) -> Module {
    let matched = match_class();
    let pattern = Arc::new(Class::new("Pattern", Vec::new(), IndexMap::new()));
    let re_classes = Arc::new(ReClasses {
        matched: Arc::downgrade(&matched),
        pattern: Arc::downgrade(&pattern),
    });

    let mut functions: Vec<(&'static str, Value)> = Vec::new();
    for (name, anchor) in [
        ("search", Anchor::Search),
        ("match", Anchor::Start),
        ("fullmatch", Anchor::Full),
    ] {
        let re_classes = re_classes.clone();
        define(&mut functions, &pattern, name, 1, Some(2), move |_, regex, args| {
            find(&re_classes, regex, subject(args, 1, "string")?, anchor)
        });
    }
    define(&mut functions, &pattern, "findall", 1, Some(2), |_, regex, args| {
        Ok(findall(regex, subject(args, 1, "string")?))
    });
    define(&mut functions, &pattern, "split", 1, None, |_, regex, args| {
        let maxsplit = args.get(2, "maxsplit").and_then(Value::as_int).unwrap_or(0);
        Ok(split(regex, subject(args, 1, "string")?, maxsplit.max(0) as usize))
    });
    let sub_classes = re_classes.clone();
    define(&mut functions, &pattern, "sub", 2, None, move |ev, regex, args| {
        let count = args.get(3, "count").and_then(Value::as_int).unwrap_or(0).max(0) as usize;
        let text = subject(args, 2, "string")?.to_string();
        substitute(ev, &sub_classes, regex, &args.positional[1], &text, count)
    });

    let compile_classes = re_classes;
    functions.push((
        "compile",
        Value::builtin("compile", Arity::Range(1, 2), move |_, args| {
            let (source, flags) = pattern_parts(&args.positional[0], args.get(1, "flags"))?;
            compile(&source, flags)?;
            let instance = Instance::new(ReClasses::class(&compile_classes.pattern)?);
            instance.set_attr("pattern", Value::Str(source));
            instance.set_attr("flags", Value::Int(flags));
            Ok(Value::Instance(Arc::new(instance)))
        }),
    ));
    functions.push((
        "escape",
        Value::builtin("escape", Arity::Fixed(1), |_, args| {
            Ok(Value::str(regex::escape(args.positional[0].as_str().unwrap_or_default())))
        }),
    ));

    let mut attrs = functions;
    attrs.extend([
        ("IGNORECASE", Value::Int(IGNORECASE)),
        ("I", Value::Int(IGNORECASE)),
        ("MULTILINE", Value::Int(MULTILINE)),
        ("M", Value::Int(MULTILINE)),
        ("DOTALL", Value::Int(DOTALL)),
        ("S", Value::Int(DOTALL)),
        ("error", class_value(classes, "ValueError")),
        ("Match", Value::Class(matched)),
        ("Pattern", Value::Class(pattern)),
    ]);
    build_module("re", attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replacement_template() {
        assert_eq!(replacement_template(r"\1-\2"), "${1}-${2}");
        assert_eq!(replacement_template(r"\g<name>$"), "${name}$$");
        assert_eq!(replacement_template(r"a\nb"), "a\nb");
    }

    #[test]
    fn test_findall_group_shapes() {
        let regex = compile(r"(\w)=(\d)", 0).unwrap();
        assert_eq!(findall(&regex, "a=1 b=2").repr(), "[('a', '1'), ('b', '2')]");
        let regex = compile(r"\d+", 0).unwrap();
        assert_eq!(findall(&regex, "x12y345").repr(), "['12', '345']");
    }

    #[test]
    fn test_flags_prefix() {
        let regex = compile("abc", IGNORECASE).unwrap();
        assert!(regex.is_match("ABC"));
        assert!(compile("(", 0).is_err());
    }
}
