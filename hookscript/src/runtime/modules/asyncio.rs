//! `asyncio` subset. Coroutines run to completion when awaited on the
//! calling thread, so there is no event loop: `gather` awaits in order and
//! `wait_for` does not enforce its timeout.

use std::sync::Arc;

use indexmap::IndexMap;

use super::{class_value, module as build_module, seconds_arg};
use crate::runtime::error::RuntimeError;
use crate::runtime::values::{Arity, CallArgs, Class, Coroutine, Module, Value};

fn coroutine<F>(name: &str, body: F) -> Value
where
    F: FnOnce(&mut crate::runtime::Evaluator) -> crate::runtime::RuntimeResult<Value>
        + Send
        + 'static,
{
    Value::Coroutine(Arc::new(Coroutine::new(name, body)))
}

fn is_async_callable(value: &Value) -> bool {
    match value {
        Value::Function(function) => function.is_async(),
        Value::BoundMethod(method) => is_async_callable(&method.method),
        _ => false,
    }
}

pub(super) fn module(classes: &IndexMap<String, Arc<Class>>) -> Module {
    build_module(
        "asyncio",
        vec![
            (
                "sleep",
                Value::builtin("sleep", Arity::Range(1, 2), |_, args| {
                    let delay = seconds_arg(&args.positional[0], "sleep")?;
                    let result = args.get(1, "result").cloned().unwrap_or(Value::None);
                    Ok(coroutine("sleep", move |_| {
                        std::thread::sleep(delay);
                        Ok(result)
                    }))
                }),
            ),
            (
                "to_thread",
                Value::builtin("to_thread", Arity::AtLeast(1), |_, args| {
                    let CallArgs {
                        mut positional,
                        keywords,
                    } = args;
                    let func = positional.remove(0);
                    Ok(coroutine("to_thread", move |ev| {
                        ev.call_value(&func, CallArgs::with_keywords(positional, keywords))
                    }))
                }),
            ),
            (
                "gather",
                Value::builtin("gather", Arity::Any, |_, args| {
                    let return_exceptions = args
                        .keywords
                        .get("return_exceptions")
                        .map(Value::is_truthy)
                        .unwrap_or(false);
                    let awaitables = args.positional;
                    Ok(coroutine("gather", move |ev| {
                        let mut results = Vec::with_capacity(awaitables.len());
                        for awaitable in awaitables {
                            match ev.await_value(awaitable) {
                                Ok(value) => results.push(value),
                                Err(err) if return_exceptions => {
                                    results.push(ev.exception_value(&err))
                                }
                                Err(err) => return Err(err),
                            }
                        }
                        Ok(Value::list(results))
                    }))
                }),
            ),
            (
                "wait_for",
                Value::builtin("wait_for", Arity::Range(1, 2), |_, args| {
                    let awaitable = args.positional[0].clone();
                    Ok(coroutine("wait_for", move |ev| ev.await_value(awaitable)))
                }),
            ),
            (
                "run",
                Value::builtin("run", Arity::Fixed(1), |ev, args| match &args.positional[0] {
                    coroutine @ Value::Coroutine(_) => ev.await_value(coroutine.clone()),
                    other => Err(RuntimeError::ValueError(format!(
                        "a coroutine was expected, got {}",
                        other.repr()
                    ))),
                }),
            ),
            (
                "iscoroutinefunction",
                Value::builtin("iscoroutinefunction", Arity::Fixed(1), |_, args| {
                    Ok(Value::Bool(is_async_callable(&args.positional[0])))
                }),
            ),
            (
                "iscoroutine",
                Value::builtin("iscoroutine", Arity::Fixed(1), |_, args| {
                    Ok(Value::Bool(matches!(args.positional[0], Value::Coroutine(_))))
                }),
            ),
            ("TimeoutError", class_value(classes, "TimeoutError")),
            ("CancelledError", class_value(classes, "BaseException")),
        ],
    )
}
