//! Static vetting of submitted provider code.
//!
//! The validator parses the submission and walks every node looking for
//! forbidden identifiers and calls. Nothing is executed. Imports are
//! inspected but always permitted: the allow-list below only feeds
//! [`CodeValidator::is_import_allowed`] and dependency reports. Indirection
//! through `getattr` or class construction is not detected; this is a
//! vetting pass for honest mistakes, not an isolation boundary.

use hookscript::ast::{Argument, Expr, ExprKind, ImportAlias, Program, Span};
use hookscript::{parse, Visitor};
use serde::{Deserialize, Serialize};

use crate::sandbox::on_interpreter_stack;

/// Identifiers and dotted calls a submission may not reference.
pub const FORBIDDEN_PATTERNS: &[&str] = &[
    "eval",
    "exec",
    "__import__",
    "compile",
    "globals",
    "locals",
    "open",
    "file",
    "input",
    "raw_input",
    "reload",
    "quit",
    "exit",
    "os.system",
    "subprocess",
    "socket",
    "urllib.request.urlopen",
];

/// Packages submissions are expected to import. Advisory only.
pub const ALLOWED_IMPORTS: &[&str] = &[
    "asyncio",
    "json",
    "typing",
    "dataclasses",
    "datetime",
    "requests",
    "aiohttp",
    "httpx",
    "openai",
    "anthropic",
    "cohere",
    "google.genai",
    "tiktoken",
    "re",
    "base64",
    "urllib.parse",
    "http",
];

pub const PASSED_MESSAGE: &str = "Code validation passed";

/// Outcome of validating one piece of source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub accepted: bool,
    pub message: String,
}

impl ValidationVerdict {
    fn accepted() -> Self {
        Self {
            accepted: true,
            message: PASSED_MESSAGE.to_string(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
        }
    }
}

/// A forbidden reference found in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub message: String,
    pub span: Span,
}

/// An import statement seen while walking, with its advisory status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportUse {
    pub module: String,
    pub allowed: bool,
    pub span: Span,
}

#[derive(Default)]
struct ForbiddenPatternVisitor {
    violations: Vec<Violation>,
    imports: Vec<ImportUse>,
}

impl ForbiddenPatternVisitor {
    fn flag(&mut self, message: String, span: Span) {
        self.violations.push(Violation { message, span });
    }

    fn note_import(&mut self, module: String, span: Span) {
        let allowed = CodeValidator::is_import_allowed(&module);
        if !allowed {
            tracing::debug!(module = %module, "import outside the expected package list");
        }
        self.imports.push(ImportUse {
            module,
            allowed,
            span,
        });
    }
}

fn is_forbidden(name: &str) -> bool {
    FORBIDDEN_PATTERNS.contains(&name)
}

impl Visitor for ForbiddenPatternVisitor {
    fn visit_name(&mut self, name: &str, span: Span) {
        if is_forbidden(name) {
            self.flag(format!("Forbidden name: {}", name), span);
        }
    }

    fn visit_call(&mut self, func: &Expr, _args: &[Argument], span: Span) {
        match &func.kind {
            ExprKind::Name(name) if is_forbidden(name) => {
                self.flag(format!("Forbidden function call: {}", name), span);
            }
            ExprKind::Attribute { attr, .. } => {
                let dotted = func
                    .dotted_name()
                    .unwrap_or_else(|| format!(".{}", attr));
                if is_forbidden(&dotted) {
                    self.flag(format!("Forbidden method call: {}", dotted), span);
                }
            }
            _ => {}
        }
    }

    fn visit_import(&mut self, module: Option<&str>, names: &[ImportAlias], span: Span) {
        match module {
            Some(module) => self.note_import(module.to_string(), span),
            None => {
                for alias in names {
                    self.note_import(alias.name.clone(), span);
                }
            }
        }
    }
}

/// Detailed result of walking a parsed program.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub violations: Vec<Violation>,
    pub imports: Vec<ImportUse>,
}

pub struct CodeValidator;

impl CodeValidator {
    /// Parses and vets `source`. Never panics on malformed input.
    pub fn validate(source: &str) -> ValidationVerdict {
        on_interpreter_stack(|| Self::vet(source))
            .unwrap_or_else(|err| ValidationVerdict::rejected(err.to_string()))
    }

    fn vet(source: &str) -> ValidationVerdict {
        match parse(source) {
            Ok(program) => {
                let analysis = Self::analyze(&program);
                match analysis.violations.first() {
                    Some(violation) => ValidationVerdict::rejected(violation.message.clone()),
                    None => ValidationVerdict::accepted(),
                }
            }
            Err(err) => ValidationVerdict::rejected(format!("Syntax error: {}", err)),
        }
    }

    /// Every violation and import of an already parsed program, in source
    /// order.
    pub fn analyze(program: &Program) -> Analysis {
        let mut visitor = ForbiddenPatternVisitor::default();
        visitor.visit_program(program);
        Analysis {
            violations: visitor.violations,
            imports: visitor.imports,
        }
    }

    /// Whether `module` or one of its parent packages is on the expected
    /// list. Never consulted as a gate.
    pub fn is_import_allowed(module: &str) -> bool {
        ALLOWED_IMPORTS.iter().any(|allowed| {
            module == *allowed
                || module
                    .strip_prefix(allowed)
                    .map_or(false, |rest| rest.starts_with('.'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected_with(source: &str, message: &str) {
        let verdict = CodeValidator::validate(source);
        assert!(!verdict.accepted, "accepted: {}", source);
        assert_eq!(verdict.message, message);
    }

    #[test]
    fn test_clean_code_passes() {
        let verdict = CodeValidator::validate(
            "import json\n\ndef chat_sync(model, prompt, system_prompt=None):\n    return json.dumps([model, prompt])\n",
        );
        assert_eq!(verdict, ValidationVerdict::accepted());
    }

    #[test]
    fn test_direct_forbidden_calls() {
        rejected_with("eval('1 + 1')", "Forbidden function call: eval");
        rejected_with("x = exec", "Forbidden name: exec");
        rejected_with("def f():\n    return open('x')\n", "Forbidden function call: open");
    }

    #[test]
    fn test_dotted_forbidden_calls() {
        rejected_with("import os\nos.system('ls')", "Forbidden method call: os.system");
        rejected_with(
            "import urllib.request\nurllib.request.urlopen('http://x')",
            "Forbidden method call: urllib.request.urlopen",
        );
        // a complex receiver only contributes `.attr`
        assert!(CodeValidator::validate("get_os().system('ls')").accepted);
    }

    #[test]
    fn test_forbidden_module_name_used() {
        rejected_with("import subprocess\nsubprocess.run(['ls'])", "Forbidden name: subprocess");
    }

    #[test]
    fn test_nested_nodes_are_walked() {
        rejected_with(
            "class A:\n    def m(self):\n        return [compile(x) for x in range(3)]\n",
            "Forbidden function call: compile",
        );
        rejected_with("f = lambda: globals()", "Forbidden function call: globals");
        rejected_with("s = f\"{locals()}\"", "Forbidden function call: locals");
    }

    #[test]
    fn test_imports_are_permitted_but_recorded() {
        let program = parse("import socketserver\nfrom os import path\nimport json").unwrap();
        let analysis = CodeValidator::analyze(&program);
        assert!(analysis.violations.is_empty());
        let modules: Vec<(&str, bool)> = analysis
            .imports
            .iter()
            .map(|i| (i.module.as_str(), i.allowed))
            .collect();
        assert_eq!(
            modules,
            vec![("socketserver", false), ("os", false), ("json", true)]
        );
    }

    #[test]
    fn test_syntax_error_verdict() {
        let verdict = CodeValidator::validate("def broken(:\n    pass");
        assert!(!verdict.accepted);
        assert!(verdict.message.starts_with("Syntax error: "));
    }

    #[test]
    fn test_deep_nesting_rejected_without_crashing() {
        let parens = format!("x = {}1{}", "(".repeat(800), ")".repeat(800));
        rejected_with(
            &parens,
            "Syntax error: too many nested parentheses (line 1, column 205)",
        );

        let verdict = CodeValidator::validate(&format!("x = {}1", "-".repeat(5000)));
        assert!(!verdict.accepted);
        assert!(verdict.message.contains("too many nested expressions or blocks"));

        let nested = format!("x = {}1{}", "[".repeat(150), "]".repeat(150));
        assert!(CodeValidator::validate(&nested).accepted);
    }

    #[test]
    fn test_import_allow_list() {
        assert!(CodeValidator::is_import_allowed("json"));
        assert!(CodeValidator::is_import_allowed("google.genai.types"));
        assert!(CodeValidator::is_import_allowed("urllib.parse"));
        assert!(!CodeValidator::is_import_allowed("urllib"));
        assert!(!CodeValidator::is_import_allowed("jsonschema"));
    }
}
