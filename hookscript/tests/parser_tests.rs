use hookscript::ast::{Argument, Constant, FStringPart, StmtKind};
use hookscript::{parse, parse_expression, top_level_bindings, ExprKind};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const PROVIDER: &str = r#"
import json
from typing import Optional

client = None

def initialize_client():
    global client
    client = {"key": api_key}

async def chat_sync(model: str, prompt: str, system_prompt: Optional[str] = None) -> str:
    messages = [{"role": "user", "content": prompt}]
    if system_prompt:
        messages.insert(0, {"role": "system", "content": system_prompt})
    return json.dumps(messages)

class Legacy(object):
    def chat(self, model, prompt, system_prompt=None):
        return f"{model}:{prompt!r:>10}"
"#;

#[test]
fn test_provider_shaped_program_parses() {
    let program = parse(PROVIDER).unwrap();
    assert_eq!(
        top_level_bindings(&program),
        vec!["json", "Optional", "client", "initialize_client", "chat_sync", "Legacy"]
    );
    let StmtKind::FunctionDef(chat) = &program.body[4].kind else {
        panic!("expected chat_sync");
    };
    assert!(chat.is_async);
    assert!(chat.returns.is_some());
    assert_eq!(chat.span.line, 11);
}

#[test]
fn test_syntax_error_positions() {
    let err = parse("def ok():\n    return 1\n\ndef broken(:\n    pass\n").unwrap_err();
    assert_eq!(err.line, 4);
    assert_eq!(err.message, "'(' was never closed");
    assert!(err.to_string().contains("(line 4, column"));

    let err = parse("if x:\n        a = 1\n    b = 2\n").unwrap_err();
    assert_eq!(err.line, 3);
}

#[test]
fn test_decorators_rejected() {
    let err = parse("@cache\ndef f():\n    pass\n").unwrap_err();
    assert_eq!(err.message, "decorators are not supported");
}

#[test]
fn test_fstring_parts() {
    let expr = parse_expression("f\"a{b!r}c{d:.2f}\"").unwrap();
    let ExprKind::FString(parts) = expr.kind else {
        panic!("expected f-string");
    };
    assert_eq!(parts.len(), 4);
    assert_eq!(parts[0], FStringPart::Literal("a".into()));
    match &parts[1] {
        FStringPart::Expr { conversion, .. } => assert_eq!(*conversion, Some('r')),
        other => panic!("unexpected {:?}", other),
    }
    match &parts[3] {
        FStringPart::Expr { format_spec, .. } => assert_eq!(format_spec.as_deref(), Some(".2f")),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_call_argument_forms() {
    let expr = parse_expression("f(1, *rest, key='v', **extra)").unwrap();
    let ExprKind::Call { args, .. } = expr.kind else {
        panic!("expected call");
    };
    let shapes: Vec<&str> = args
        .iter()
        .map(|arg| match arg {
            Argument::Positional(_) => "positional",
            Argument::Star(_) => "star",
            Argument::Keyword { .. } => "keyword",
            Argument::DoubleStar(_) => "double-star",
        })
        .collect();
    assert_eq!(shapes, vec!["positional", "star", "keyword", "double-star"]);
    assert!(parse_expression("f(a=1, 2)").is_err());
}

#[test]
fn test_dotted_names() {
    let expr = parse_expression("urllib.request.urlopen").unwrap();
    assert_eq!(expr.dotted_name().as_deref(), Some("urllib.request.urlopen"));
    let expr = parse_expression("get().system").unwrap();
    assert_eq!(expr.dotted_name(), None);
}

#[test]
fn test_string_literal_forms() {
    for (source, expected) in [
        ("'it\\'s'", "it's"),
        ("\"tab\\there\"", "tab\there"),
        ("r'\\d+'", "\\d+"),
        ("'''multi\nline'''", "multi\nline"),
        ("'a' 'b'", "ab"),
    ] {
        let expr = parse_expression(source).unwrap();
        assert_eq!(expr.kind, ExprKind::Constant(Constant::Str(expected.into())), "{}", source);
    }
}

#[test]
fn test_brackets_join_lines() {
    let program = parse("x = [\n    1,\n    2,\n]\ny = 1 + \\\n    2\n").unwrap();
    assert_eq!(program.body.len(), 2);
}

/// Deep inputs recurse through the parser; give them room in debug builds.
fn with_large_stack<T: Send + 'static>(work: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(work)
        .unwrap()
        .join()
        .unwrap()
}

#[test]
fn test_deep_parentheses_rejected() {
    let source = format!("x = {}1{}\n", "(".repeat(800), ")".repeat(800));
    let err = parse(&source).unwrap_err();
    assert_eq!(err.message, "too many nested parentheses");
    assert_eq!(err.line, 1);
}

#[test]
fn test_deep_unary_chains_rejected() {
    let err = with_large_stack(|| parse(&format!("x = {}y\n", "not ".repeat(2000))).unwrap_err());
    assert_eq!(err.message, "too many nested expressions or blocks");
    let err = with_large_stack(|| parse(&format!("x = {}1\n", "-".repeat(2000))).unwrap_err());
    assert_eq!(err.message, "too many nested expressions or blocks");
}

#[test]
fn test_long_operator_chains() {
    assert!(parse(&format!("x = 1{}\n", " + 1".repeat(100))).is_ok());
    assert!(parse(&format!("x = a{}\n", ".b".repeat(100))).is_ok());
    let err = parse(&format!("x = 1{}\n", " + 1".repeat(5000))).unwrap_err();
    assert_eq!(err.message, "too many nested expressions or blocks");
}

#[test]
fn test_deep_blocks_rejected() {
    let err = with_large_stack(|| {
        let mut source = String::new();
        for level in 0..600 {
            source.push_str(&" ".repeat(level));
            source.push_str("if x:\n");
        }
        source.push_str(&" ".repeat(600));
        source.push_str("pass\n");
        parse(&source).unwrap_err()
    });
    assert_eq!(err.message, "too many nested expressions or blocks");
}

proptest! {
    #[test]
    fn parse_never_panics_on_arbitrary_text(source in "\\PC{0,200}") {
        let _ = parse(&source);
    }

    #[test]
    fn parse_never_panics_on_token_soup(
        tokens in proptest::collection::vec(
            prop_oneof![
                Just("def"), Just("class"), Just("f"), Just("("), Just(")"), Just(":"),
                Just("\n"), Just("    "), Just("return"), Just("'s'"), Just("f'{x}'"),
                Just("1"), Just("+"), Just("["), Just("]"), Just(","), Just("="),
                Just("async"), Just("await"), Just("lambda"), Just("\\"), Just("#c"),
            ],
            0..60,
        )
    ) {
        let source = tokens.join(" ");
        let _ = parse(&source);
    }
}
