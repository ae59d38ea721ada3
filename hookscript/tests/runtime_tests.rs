use std::sync::{Arc, Mutex};

use hookscript::{CallArgs, Environment, Error, Runtime, RuntimeError, Value};
use pretty_assertions::assert_eq;

fn run(source: &str) -> Arc<Environment> {
    Runtime::new()
        .with_output(|_: &str| {})
        .run(source)
        .unwrap_or_else(|err| panic!("{}", err))
}

fn text(scope: &Environment, name: &str) -> String {
    match scope.get_local(name) {
        Some(Value::Str(s)) => s,
        other => panic!("{} is {:?}", name, other),
    }
}

fn int(scope: &Environment, name: &str) -> i64 {
    scope
        .get_local(name)
        .and_then(|v| v.as_int())
        .unwrap_or_else(|| panic!("{} is not an int", name))
}

fn runtime_error(source: &str) -> RuntimeError {
    match Runtime::new().with_output(|_: &str| {}).run(source) {
        Err(Error::Runtime(err)) => err,
        Err(other) => panic!("unexpected {}", other),
        Ok(_) => panic!("expected a runtime error"),
    }
}

#[test]
fn test_closures_and_defaults() {
    let scope = run(
        "def make(prefix, sep=':'):\n    def inner(x):\n        return prefix + sep + x\n    return inner\n\nout = make('a')('b')\nother = make('a', sep='-')('c')\n",
    );
    assert_eq!(text(&scope, "out"), "a:b");
    assert_eq!(text(&scope, "other"), "a-c");
}

#[test]
fn test_varargs_and_kwargs() {
    let scope = run(
        "def f(*args, **kw):\n    return len(args) * 10 + len(kw)\n\nn = f(1, 2, 3, a=1, **{'b': 2})\n",
    );
    assert_eq!(int(&scope, "n"), 32);
}

#[test]
fn test_classes_inheritance_and_super() {
    let scope = run(
        "class Base:\n    kind = 'base'\n    def __init__(self, name):\n        self.name = name\n    def describe(self):\n        return self.kind + ':' + self.name\n\nclass Child(Base):\n    kind = 'child'\n    def __init__(self, name):\n        super().__init__(name.upper())\n\nout = Child('x').describe()\nok = isinstance(Child('y'), Base)\n",
    );
    assert_eq!(text(&scope, "out"), "child:X");
    assert!(matches!(scope.get_local("ok"), Some(Value::Bool(true))));
}

#[test]
fn test_exceptions_are_catchable() {
    let scope = run(
        "class QuotaError(RuntimeError):\n    pass\n\nlog = []\ntry:\n    {}['missing']\nexcept KeyError:\n    log.append('key')\n\ntry:\n    raise QuotaError('over quota')\nexcept RuntimeError as e:\n    log.append(str(e))\nfinally:\n    log.append('done')\n\ntry:\n    1 / 0\nexcept (ValueError, ZeroDivisionError):\n    log.append('zero')\nout = ','.join(log)\n",
    );
    assert_eq!(text(&scope, "out"), "key,over quota,done,zero");
}

#[test]
fn test_uncaught_user_exception_keeps_type() {
    let err = runtime_error("class Boom(ValueError):\n    pass\n\nraise Boom('bad config')\n");
    assert_eq!(err.exception_name(), "Boom");
    assert_eq!(err.message(), "bad config");
    assert_eq!(err.to_string(), "Boom: bad config");
}

#[test]
fn test_name_errors() {
    let err = runtime_error("x = undefined_name\n");
    assert_eq!(err.exception_name(), "NameError");
    assert_eq!(err.message(), "name 'undefined_name' is not defined");
}

#[test]
fn test_async_functions_and_gather() {
    let scope = run(
        "import asyncio\n\nasync def double(x):\n    await asyncio.sleep(0)\n    return x * 2\n\nasync def main():\n    results = await asyncio.gather(double(1), double(2))\n    return sum(results)\n\ntotal = asyncio.run(main())\n",
    );
    assert_eq!(int(&scope, "total"), 6);
}

#[test]
fn test_coroutine_driven_by_host() {
    let runtime = Runtime::new();
    let scope = runtime
        .run("async def reply(model, prompt):\n    return f'{model}:{prompt}'\n")
        .unwrap();
    let reply = scope.get_local("reply").unwrap();
    let pending = runtime
        .call(&reply, CallArgs::new(vec![Value::str("m"), Value::str("p")]))
        .unwrap();
    assert!(matches!(pending, Value::Coroutine(_)));
    let value = runtime.resolve(pending).unwrap();
    assert_eq!(value.as_str(), Some("m:p"));
}

#[test]
fn test_global_statement_rebinds_module_name() {
    let scope = run(
        "count = 0\n\ndef bump():\n    global count\n    count += 1\n    return count\n\nbump()\nbump()\n",
    );
    assert_eq!(int(&scope, "count"), 2);
}

#[test]
fn test_json_round_trip_preserves_order() {
    let scope = run(
        "import json\ndata = json.loads('{\"b\": 1, \"a\": [true, null, 2.5]}')\nout = json.dumps(data)\nfirst = list(data.keys())[0]\n",
    );
    assert_eq!(text(&scope, "out"), r#"{"b": 1, "a": [true, null, 2.5]}"#);
    assert_eq!(text(&scope, "first"), "b");
}

#[test]
fn test_comprehensions_and_string_methods() {
    let scope = run(
        "words = ['Alpha', 'beta', 'Gamma']\nupper = [w.upper() for w in words if w[0].isupper()]\nout = '-'.join(sorted(upper, key=len))\n",
    );
    assert_eq!(text(&scope, "out"), "ALPHA-GAMMA");
}

#[test]
fn test_fstring_formatting() {
    let scope = run("x = 3.14159\nname = 'ab'\nout = f'{x:.2f}|{name!r}|{len(name):>3}'\n");
    assert_eq!(text(&scope, "out"), "3.14|'ab'|  2");
}

#[test]
fn test_unknown_import_fails() {
    let err = runtime_error("import numpy\n");
    assert_eq!(err.exception_name(), "ImportError");
}

#[test]
fn test_restricted_builtins() {
    let runtime = Runtime::new().with_builtins(&["len", "str"]);
    match runtime.run("x = sum([1])\n") {
        Err(Error::Runtime(err)) => assert_eq!(err.exception_name(), "NameError"),
        _ => panic!("sum should not resolve"),
    }
    assert!(runtime.run("x = len(str(10))\n").is_ok());
}

#[test]
fn test_print_goes_to_output_sink() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let runtime = Runtime::new().with_output(move |line: &str| {
        sink.lock().unwrap().push(line.to_string());
    });
    runtime.run("print('a', 1)\nprint('b', end='')\n").unwrap();
    assert_eq!(*lines.lock().unwrap(), vec!["a 1".to_string(), "b".to_string()]);
}

#[test]
fn test_call_depth_limit() {
    let runtime = Runtime::new().with_max_call_depth(30);
    match runtime.run("def f(n):\n    return f(n + 1)\n\nf(0)\n") {
        Err(Error::Runtime(err)) => assert_eq!(err.exception_name(), "RecursionError"),
        _ => panic!("expected RecursionError"),
    }
}

#[test]
fn test_expression_nesting_bounded_across_calls() {
    let outcome = std::thread::Builder::new()
        .stack_size(256 * 1024 * 1024)
        .spawn(|| {
            let runtime = Runtime::new().with_max_call_depth(100_000);
            match runtime.run("def f(n):\n    return f(n + 1)\n\nf(0)\n") {
                Err(Error::Runtime(err)) => (err.exception_name().to_string(), err.message()),
                _ => panic!("expected RecursionError"),
            }
        })
        .unwrap()
        .join()
        .unwrap();
    assert_eq!(outcome.0, "RecursionError");
    assert_eq!(outcome.1, "maximum expression nesting exceeded");
}

#[test]
fn test_host_calls_with_keywords() {
    let runtime = Runtime::new();
    let scope = runtime
        .run("def greet(name, greeting='hi'):\n    return greeting + ' ' + name\n")
        .unwrap();
    let greet = scope.get_local("greet").unwrap();
    let out = runtime
        .call(
            &greet,
            CallArgs::new(vec![Value::str("bob")]).keyword("greeting", Value::str("yo")),
        )
        .unwrap();
    assert_eq!(out.as_str(), Some("yo bob"));
}
