//! Read-only traversal of the syntax tree.
//!
//! Implement [`Visitor`] and override the hooks of interest; the default
//! `visit_*` methods recurse through every child via [`walk_stmt`] and
//! [`walk_expr`], so an implementation that only overrides leaf hooks still
//! sees every node of the program.

use crate::ast::{
    Argument, Expr, ExprKind, FStringPart, FunctionDef, ImportAlias, Parameter, Program, Span,
    Stmt, StmtKind,
};

pub trait Visitor {
    fn visit_program(&mut self, program: &Program) {
        for stmt in &program.body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    /// A name read in load context.
    fn visit_name(&mut self, _name: &str, _span: Span) {}

    /// A name bound by assignment, definition, loop target or import.
    fn visit_store(&mut self, _name: &str, _span: Span) {}

    /// Called before the callee and arguments are walked.
    fn visit_call(&mut self, _func: &Expr, _args: &[Argument], _span: Span) {}

    fn visit_import(&mut self, _module: Option<&str>, _names: &[ImportAlias], _span: Span) {}

    fn visit_function(&mut self, _def: &FunctionDef) {}
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Expr(expr) => visitor.visit_expr(expr),
        StmtKind::Assign { targets, value } => {
            visitor.visit_expr(value);
            for target in targets {
                walk_target(visitor, target);
            }
        }
        StmtKind::AugAssign { target, value, .. } => {
            visitor.visit_expr(value);
            // augmented targets are read as well as written
            visitor.visit_expr(target);
            walk_target(visitor, target);
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
        } => {
            visitor.visit_expr(annotation);
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
            walk_target(visitor, target);
        }
        StmtKind::FunctionDef(def) => {
            visitor.visit_function(def);
            walk_function(visitor, def);
            visitor.visit_store(&def.name, def.span);
        }
        StmtKind::ClassDef(class) => {
            for base in &class.bases {
                visitor.visit_expr(base);
            }
            for stmt in &class.body {
                visitor.visit_stmt(stmt);
            }
            visitor.visit_store(&class.name, class.span);
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            visitor.visit_expr(test);
            for stmt in body.iter().chain(orelse) {
                visitor.visit_stmt(stmt);
            }
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            visitor.visit_expr(iter);
            walk_target(visitor, target);
            for stmt in body.iter().chain(orelse) {
                visitor.visit_stmt(stmt);
            }
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
        StmtKind::Import(names) => {
            visitor.visit_import(None, names, stmt.span);
            for alias in names {
                visitor.visit_store(alias.bound_name(), stmt.span);
            }
        }
        StmtKind::ImportFrom { module, names } => {
            visitor.visit_import(Some(module), names, stmt.span);
            for alias in names {
                visitor.visit_store(alias.bound_name(), stmt.span);
            }
        }
        StmtKind::Global(names) => {
            for name in names {
                visitor.visit_store(name, stmt.span);
            }
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            for stmt in body {
                visitor.visit_stmt(stmt);
            }
            for handler in handlers {
                if let Some(kind) = &handler.kind {
                    visitor.visit_expr(kind);
                }
                if let Some(name) = &handler.name {
                    visitor.visit_store(name, handler.span);
                }
                for stmt in &handler.body {
                    visitor.visit_stmt(stmt);
                }
            }
            for stmt in orelse.iter().chain(finalbody) {
                visitor.visit_stmt(stmt);
            }
        }
        StmtKind::Raise { exc, cause } => {
            if let Some(exc) = exc {
                visitor.visit_expr(exc);
            }
            if let Some(cause) = cause {
                visitor.visit_expr(cause);
            }
        }
        StmtKind::Assert { test, msg } => {
            visitor.visit_expr(test);
            if let Some(msg) = msg {
                visitor.visit_expr(msg);
            }
        }
        StmtKind::Delete(targets) => {
            for target in targets {
                visitor.visit_expr(target);
            }
        }
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Constant(_) => {}
        ExprKind::Name(name) => visitor.visit_name(name, expr.span),
        ExprKind::FString(parts) => {
            for part in parts {
                if let FStringPart::Expr { expr, .. } = part {
                    visitor.visit_expr(expr);
                }
            }
        }
        ExprKind::List(items) | ExprKind::Tuple(items) => {
            for item in items {
                visitor.visit_expr(item);
            }
        }
        ExprKind::Dict(entries) => {
            for (key, value) in entries {
                visitor.visit_expr(key);
                visitor.visit_expr(value);
            }
        }
        ExprKind::Attribute { value, .. } => visitor.visit_expr(value),
        ExprKind::Subscript { value, index } => {
            visitor.visit_expr(value);
            visitor.visit_expr(index);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        ExprKind::Call { func, args } => {
            visitor.visit_call(func, args, expr.span);
            visitor.visit_expr(func);
            for arg in args {
                visitor.visit_expr(arg.value());
            }
        }
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::Unary { operand, .. } => visitor.visit_expr(operand),
        ExprKind::Compare { left, ops } => {
            visitor.visit_expr(left);
            for (_, right) in ops {
                visitor.visit_expr(right);
            }
        }
        ExprKind::IfExp { test, body, orelse } => {
            visitor.visit_expr(test);
            visitor.visit_expr(body);
            visitor.visit_expr(orelse);
        }
        ExprKind::Lambda(def) => {
            visitor.visit_function(def);
            walk_function(visitor, def);
        }
        ExprKind::Await(inner) => visitor.visit_expr(inner),
        ExprKind::ListComp {
            element,
            target,
            iter,
            conditions,
        } => {
            visitor.visit_expr(iter);
            walk_target(visitor, target);
            for condition in conditions {
                visitor.visit_expr(condition);
            }
            visitor.visit_expr(element);
        }
    }
}

fn walk_function<V: Visitor + ?Sized>(visitor: &mut V, def: &FunctionDef) {
    for Parameter {
        name,
        default,
        annotation,
        ..
    } in &def.params
    {
        if let Some(default) = default {
            visitor.visit_expr(default);
        }
        if let Some(annotation) = annotation {
            visitor.visit_expr(annotation);
        }
        visitor.visit_store(name, def.span);
    }
    if let Some(returns) = &def.returns {
        visitor.visit_expr(returns);
    }
    for stmt in &def.body {
        visitor.visit_stmt(stmt);
    }
}

/// Targets report bound names through `visit_store`; attribute and subscript
/// targets still have their object and index expressions walked.
fn walk_target<V: Visitor + ?Sized>(visitor: &mut V, target: &Expr) {
    match &target.kind {
        ExprKind::Name(name) => visitor.visit_store(name, target.span),
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                walk_target(visitor, item);
            }
        }
        ExprKind::Attribute { value, .. } => visitor.visit_expr(value),
        ExprKind::Subscript { value, index } => {
            visitor.visit_expr(value);
            visitor.visit_expr(index);
        }
        _ => visitor.visit_expr(target),
    }
}

/// Names bound at the top level of a program, in definition order.
pub fn top_level_bindings(program: &Program) -> Vec<String> {
    struct Collector(Vec<String>);
    impl Visitor for Collector {
        fn visit_store(&mut self, name: &str, _span: Span) {
            if !self.0.iter().any(|n| n == name) {
                self.0.push(name.to_string());
            }
        }
        // nested scopes are not descended into
        fn visit_stmt(&mut self, stmt: &Stmt) {
            match &stmt.kind {
                StmtKind::FunctionDef(def) => self.visit_store(&def.name, def.span),
                StmtKind::ClassDef(class) => self.visit_store(&class.name, class.span),
                _ => walk_stmt(self, stmt),
            }
        }
        fn visit_expr(&mut self, _expr: &Expr) {}
    }

    let mut collector = Collector(Vec::new());
    collector.visit_program(program);
    collector.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[derive(Default)]
    struct Recorder {
        names: Vec<String>,
        stores: Vec<String>,
        calls: Vec<String>,
        imports: Vec<String>,
    }

    impl Visitor for Recorder {
        fn visit_name(&mut self, name: &str, _span: Span) {
            self.names.push(name.to_string());
        }
        fn visit_store(&mut self, name: &str, _span: Span) {
            self.stores.push(name.to_string());
        }
        fn visit_call(&mut self, func: &Expr, _args: &[Argument], _span: Span) {
            self.calls
                .push(func.dotted_name().unwrap_or_else(|| "<expr>".into()));
        }
        fn visit_import(&mut self, module: Option<&str>, names: &[ImportAlias], _span: Span) {
            for alias in names {
                match module {
                    Some(m) => self.imports.push(format!("{}.{}", m, alias.name)),
                    None => self.imports.push(alias.name.clone()),
                }
            }
        }
    }

    #[test]
    fn test_calls_inside_call_arguments_are_visited() {
        let program = parse("print(eval('1'))\n").unwrap();
        let mut recorder = Recorder::default();
        recorder.visit_program(&program);
        assert_eq!(recorder.calls, vec!["print", "eval"]);
    }

    #[test]
    fn test_function_bodies_and_defaults_are_visited() {
        let src = "def f(x=open):\n    return os.system('ls')\n";
        let program = parse(src).unwrap();
        let mut recorder = Recorder::default();
        recorder.visit_program(&program);
        assert!(recorder.names.contains(&"open".to_string()));
        assert_eq!(recorder.calls, vec!["os.system"]);
        assert!(recorder.stores.contains(&"x".to_string()));
        assert!(recorder.stores.contains(&"f".to_string()));
    }

    #[test]
    fn test_imports_are_reported() {
        let program = parse("import json\nfrom typing import Optional\n").unwrap();
        let mut recorder = Recorder::default();
        recorder.visit_program(&program);
        assert_eq!(recorder.imports, vec!["json", "typing.Optional"]);
        assert_eq!(recorder.stores, vec!["json", "Optional"]);
    }

    #[test]
    fn test_store_targets_are_not_loads() {
        let program = parse("a, b = c\nfor i in items:\n    pass\n").unwrap();
        let mut recorder = Recorder::default();
        recorder.visit_program(&program);
        assert_eq!(recorder.names, vec!["c", "items"]);
        assert_eq!(recorder.stores, vec!["a", "b", "i"]);
    }

    #[test]
    fn test_top_level_bindings() {
        let src = "import json\nclient = None\ndef chat_sync(m):\n    inner = 1\nclass P:\n    pass\n";
        let program = parse(src).unwrap();
        assert_eq!(
            top_level_bindings(&program),
            vec!["json", "client", "chat_sync", "P"]
        );
    }
}
