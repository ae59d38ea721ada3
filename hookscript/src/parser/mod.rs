//! Recursive descent parser for hookscript
//!
//! [`parse`] turns source text into an [`ast::Program`]. Statement parsing
//! lives here, expression parsing in `expressions.rs`.

use std::sync::Arc;

use crate::ast::{
    BinaryOp, ClassDef, ExceptHandler, Expr, ExprKind, FunctionDef, ImportAlias, Parameter,
    ParameterKind, Program, Span, Stmt, StmtKind,
};

mod expressions;
pub mod lexer;

use lexer::{Lexer, Token, TokenKind};

/// Syntax error with the 1-based position it was detected at.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} (line {line}, column {column})")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Deepest syntax tree the parser builds. Brackets alone are capped lower
/// by the lexer.
pub const MAX_NESTING_DEPTH: usize = 500;

/// Parse a complete source file.
pub fn parse(source: &str) -> ParseResult<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

/// Parse a single expression, as used inside f-string replacement fields.
pub fn parse_expression(source: &str) -> ParseResult<Expr> {
    let tokens = Lexer::new(source.trim()).tokenize()?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_testlist()?;
    parser.eat(TokenKind::Newline);
    if !parser.check(TokenKind::Eof) {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Current syntax tree depth: nested expressions, operator chains and blocks
    depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Enters one more level of nesting. Levels taken inside a failed
    /// parse are never returned; the error ends the parse.
    fn descend(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error_here("too many nested expressions or blocks"));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        self.descend()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    pub fn parse_program(&mut self) -> ParseResult<Program> {
        let mut body = Vec::new();
        while !self.check(TokenKind::Eof) {
            if self.eat(TokenKind::Newline) {
                continue;
            }
            if self.check(TokenKind::Indent) {
                return Err(self.error_here("unexpected indent"));
            }
            body.extend(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    // ---- token helpers ----

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("{} {}", kind, context)))
        }
    }

    fn expect_name(&mut self, context: &str) -> ParseResult<String> {
        Ok(self.expect(TokenKind::Name, context)?.text)
    }

    fn span(&self) -> Span {
        let token = self.peek();
        Span::new(token.line, token.col)
    }

    fn error_here(&self, message: &str) -> ParseError {
        let token = self.peek();
        ParseError::new(message, token.line, token.col)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        let found = match token.kind {
            TokenKind::Name | TokenKind::Int | TokenKind::Float => format!("'{}'", token.text),
            other => other.to_string(),
        };
        ParseError::new(
            format!("invalid syntax: expected {}, found {}", expected, found),
            token.line,
            token.col,
        )
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> ParseResult<Vec<Stmt>> {
        let stmt = match self.peek_kind() {
            TokenKind::If => self.parse_if()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::Try => self.parse_try()?,
            TokenKind::Def => self.parse_function_def(false)?,
            TokenKind::Class => self.parse_class_def()?,
            TokenKind::Async => {
                let start = self.span();
                self.advance();
                if !self.check(TokenKind::Def) {
                    return Err(ParseError::new(
                        "only 'async def' is supported",
                        start.line,
                        start.column,
                    ));
                }
                self.parse_function_def(true)?
            }
            TokenKind::At => return Err(self.error_here("decorators are not supported")),
            TokenKind::With => return Err(self.error_here("'with' statements are not supported")),
            _ => return self.parse_simple_statements(),
        };
        Ok(vec![stmt])
    }

    /// `small_stmt (';' small_stmt)* [';'] NEWLINE`
    fn parse_simple_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_small_statement()?];
        while self.eat(TokenKind::Semicolon) {
            if self.check(TokenKind::Newline) || self.check(TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_small_statement()?);
        }
        if !self.eat(TokenKind::Newline) && !self.check(TokenKind::Eof) {
            return Err(self.unexpected("end of statement"));
        }
        Ok(stmts)
    }

    fn parse_small_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        let kind = match self.peek_kind() {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_testlist()?))
                }
            }
            TokenKind::Raise => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Raise {
                        exc: None,
                        cause: None,
                    }
                } else {
                    let exc = self.parse_test()?;
                    let cause = if self.eat(TokenKind::From) {
                        Some(self.parse_test()?)
                    } else {
                        None
                    };
                    StmtKind::Raise {
                        exc: Some(exc),
                        cause,
                    }
                }
            }
            TokenKind::Global => {
                self.advance();
                let mut names = vec![self.expect_name("after 'global'")?];
                while self.eat(TokenKind::Comma) {
                    names.push(self.expect_name("after ','")?);
                }
                StmtKind::Global(names)
            }
            TokenKind::Import => self.parse_import()?,
            TokenKind::From => self.parse_from_import()?,
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat(TokenKind::Comma) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Del => {
                self.advance();
                let mut targets = vec![self.parse_target()?];
                while self.eat(TokenKind::Comma) {
                    if self.at_statement_end() {
                        break;
                    }
                    targets.push(self.parse_target()?);
                }
                for target in &targets {
                    self.validate_target(target)?;
                }
                StmtKind::Delete(targets)
            }
            TokenKind::Yield => return Err(self.error_here("'yield' is not supported")),
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt::new(kind, span))
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }

    fn parse_expression_statement(&mut self) -> ParseResult<StmtKind> {
        let first = self.parse_testlist()?;

        if self.check(TokenKind::Assign) {
            let mut exprs = vec![first];
            while self.eat(TokenKind::Assign) {
                exprs.push(self.parse_testlist()?);
            }
            let value = exprs.pop().ok_or_else(|| self.error_here("missing value"))?;
            for target in &exprs {
                self.validate_target(target)?;
            }
            return Ok(StmtKind::Assign {
                targets: exprs,
                value,
            });
        }

        let aug = match self.peek_kind() {
            TokenKind::PlusAssign => Some(BinaryOp::Add),
            TokenKind::MinusAssign => Some(BinaryOp::Sub),
            TokenKind::StarAssign => Some(BinaryOp::Mul),
            TokenKind::SlashAssign => Some(BinaryOp::Div),
            TokenKind::DoubleSlashAssign => Some(BinaryOp::FloorDiv),
            TokenKind::PercentAssign => Some(BinaryOp::Mod),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(ParseError::new(
                    "illegal expression for augmented assignment",
                    first.span.line,
                    first.span.column,
                ));
            }
            let value = self.parse_testlist()?;
            return Ok(StmtKind::AugAssign {
                target: first,
                op,
                value,
            });
        }

        if self.check(TokenKind::Colon) {
            if !matches!(
                first.kind,
                ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. }
            ) {
                return Err(ParseError::new(
                    "illegal target for annotation",
                    first.span.line,
                    first.span.column,
                ));
            }
            self.advance();
            let annotation = self.parse_test()?;
            let value = if self.eat(TokenKind::Assign) {
                Some(self.parse_testlist()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                annotation,
                value,
            });
        }

        Ok(StmtKind::Expr(first))
    }

    fn validate_target(&self, target: &Expr) -> ParseResult<()> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.validate_target(item)?;
                }
                Ok(())
            }
            _ => Err(ParseError::new(
                "cannot assign to expression",
                target.span.line,
                target.span.column,
            )),
        }
    }

    fn parse_import(&mut self) -> ParseResult<StmtKind> {
        self.expect(TokenKind::Import, "")?;
        let mut names = Vec::new();
        loop {
            let name = self.parse_dotted_name()?;
            let asname = if self.eat(TokenKind::As) {
                Some(self.expect_name("after 'as'")?)
            } else {
                None
            };
            names.push(ImportAlias { name, asname });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn parse_from_import(&mut self) -> ParseResult<StmtKind> {
        self.expect(TokenKind::From, "")?;
        if self.check(TokenKind::Dot) {
            return Err(self.error_here("relative imports are not supported"));
        }
        let module = self.parse_dotted_name()?;
        self.expect(TokenKind::Import, "after module name")?;

        let mut names = Vec::new();
        if self.eat(TokenKind::Star) {
            names.push(ImportAlias {
                name: "*".to_string(),
                asname: None,
            });
            return Ok(StmtKind::ImportFrom { module, names });
        }

        let parenthesized = self.eat(TokenKind::LParen);
        loop {
            if parenthesized && self.check(TokenKind::RParen) {
                break;
            }
            let name = self.expect_name("in import list")?;
            let asname = if self.eat(TokenKind::As) {
                Some(self.expect_name("after 'as'")?)
            } else {
                None
            };
            names.push(ImportAlias { name, asname });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        if parenthesized {
            self.expect(TokenKind::RParen, "to close import list")?;
        }
        if names.is_empty() {
            return Err(self.error_here("empty import list"));
        }
        Ok(StmtKind::ImportFrom { module, names })
    }

    fn parse_dotted_name(&mut self) -> ParseResult<String> {
        let mut name = self.expect_name("in module path")?;
        while self.eat(TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.expect_name("after '.'")?);
        }
        Ok(name)
    }

    /// `':' simple_stmts` or `':' NEWLINE INDENT stmt+ DEDENT`
    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(TokenKind::Colon, "before block")?;
        if !self.eat(TokenKind::Newline) {
            return self.parse_simple_statements();
        }
        if !self.eat(TokenKind::Indent) {
            return Err(self.error_here("expected an indented block"));
        }
        let mut body = Vec::new();
        while !self.check(TokenKind::Dedent) && !self.check(TokenKind::Eof) {
            if self.eat(TokenKind::Newline) {
                continue;
            }
            if self.check(TokenKind::Indent) {
                return Err(self.error_here("unexpected indent"));
            }
            body.extend(self.nested(Self::parse_statement)?);
        }
        self.eat(TokenKind::Dedent);
        Ok(body)
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        // `if` or `elif`
        self.advance();
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = if self.check(TokenKind::Elif) {
            vec![self.parse_if()?]
        } else if self.eat(TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(StmtKind::If { test, body, orelse }, span))
    }

    fn parse_while(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect(TokenKind::While, "")?;
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = if self.eat(TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(StmtKind::While { test, body, orelse }, span))
    }

    fn parse_for(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect(TokenKind::For, "")?;
        let target = self.parse_target_list()?;
        self.validate_target(&target)?;
        self.expect(TokenKind::In, "in 'for' statement")?;
        let iter = self.parse_testlist()?;
        let body = self.parse_block()?;
        let orelse = if self.eat(TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            span,
        ))
    }

    fn parse_try(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect(TokenKind::Try, "")?;
        let body = self.parse_block()?;

        let mut handlers = Vec::new();
        while self.check(TokenKind::Except) {
            let handler_span = self.span();
            self.advance();
            let (kind, name) = if self.check(TokenKind::Colon) {
                (None, None)
            } else {
                let kind = self.parse_test()?;
                let name = if self.eat(TokenKind::As) {
                    Some(self.expect_name("after 'as'")?)
                } else {
                    None
                };
                (Some(kind), name)
            };
            let handler_body = self.parse_block()?;
            handlers.push(ExceptHandler {
                kind,
                name,
                body: handler_body,
                span: handler_span,
            });
        }

        let orelse = if !handlers.is_empty() && self.eat(TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat(TokenKind::Finally) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.unexpected("'except' or 'finally' block"));
        }

        Ok(Stmt::new(
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            span,
        ))
    }

    fn parse_function_def(&mut self, is_async: bool) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect(TokenKind::Def, "")?;
        let name = self.expect_name("after 'def'")?;
        self.expect(TokenKind::LParen, "after function name")?;
        let params = self.parse_parameters(TokenKind::RParen, true)?;
        self.expect(TokenKind::RParen, "to close parameter list")?;
        let returns = if self.eat(TokenKind::Arrow) {
            Some(self.parse_test()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::FunctionDef(Arc::new(FunctionDef {
                name,
                params,
                body,
                is_async,
                returns,
                span,
            })),
            span,
        ))
    }

    /// Parameter list up to (not including) `close`.
    fn parse_parameters(
        &mut self,
        close: TokenKind,
        allow_annotations: bool,
    ) -> ParseResult<Vec<Parameter>> {
        let mut params: Vec<Parameter> = Vec::new();
        let mut keyword_only = false;
        let mut seen_default = false;

        while !self.check(close) {
            let param_span = self.span();
            if self.eat(TokenKind::DoubleStar) {
                let name = self.expect_name("after '**'")?;
                let annotation = self.parse_param_annotation(allow_annotations)?;
                params.push(Parameter {
                    name,
                    kind: ParameterKind::KwArgs,
                    default: None,
                    annotation,
                });
                self.eat(TokenKind::Comma);
                if !self.check(close) {
                    return Err(self.error_here("parameter after '**' parameter"));
                }
                break;
            }

            if self.eat(TokenKind::Star) {
                if keyword_only {
                    return Err(self.error_here("'*' may appear only once in parameters"));
                }
                keyword_only = true;
                if self.check(TokenKind::Name) {
                    let name = self.expect_name("after '*'")?;
                    let annotation = self.parse_param_annotation(allow_annotations)?;
                    params.push(Parameter {
                        name,
                        kind: ParameterKind::VarArgs,
                        default: None,
                        annotation,
                    });
                }
            } else {
                let name = self.expect_name("in parameter list")?;
                let annotation = self.parse_param_annotation(allow_annotations)?;
                let default = if self.eat(TokenKind::Assign) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                if !keyword_only {
                    if default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(ParseError::new(
                            "non-default argument follows default argument",
                            param_span.line,
                            param_span.column,
                        ));
                    }
                }
                if params.iter().any(|p| p.name == name) {
                    return Err(ParseError::new(
                        format!("duplicate argument '{}' in function definition", name),
                        param_span.line,
                        param_span.column,
                    ));
                }
                params.push(Parameter {
                    name,
                    kind: if keyword_only {
                        ParameterKind::KeywordOnly
                    } else {
                        ParameterKind::Positional
                    },
                    default,
                    annotation,
                });
            }

            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_param_annotation(&mut self, allow: bool) -> ParseResult<Option<Expr>> {
        if allow && self.eat(TokenKind::Colon) {
            Ok(Some(self.parse_test()?))
        } else {
            Ok(None)
        }
    }

    fn parse_class_def(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        self.expect(TokenKind::Class, "")?;
        let name = self.expect_name("after 'class'")?;
        let mut bases = Vec::new();
        if self.eat(TokenKind::LParen) {
            while !self.check(TokenKind::RParen) {
                // keyword arguments such as `metaclass=` are accepted and ignored
                if self.check(TokenKind::Name) && self.peek_kind_at(1) == TokenKind::Assign {
                    self.advance();
                    self.advance();
                    self.parse_test()?;
                } else {
                    bases.push(self.parse_test()?);
                }
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen, "to close base list")?;
        }
        let body = self.parse_block()?;
        Ok(Stmt::new(
            StmtKind::ClassDef(Arc::new(ClassDef {
                name,
                bases,
                body,
                span,
            })),
            span,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Argument, Constant};

    #[test]
    fn test_parse_function_with_defaults_and_varargs() {
        let program = parse("def f(a, b=1, *args, c, **kw):\n    return a\n").unwrap();
        let StmtKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("expected function def");
        };
        let kinds: Vec<_> = def.params.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParameterKind::Positional,
                ParameterKind::Positional,
                ParameterKind::VarArgs,
                ParameterKind::KeywordOnly,
                ParameterKind::KwArgs,
            ]
        );
        assert!(def.params[1].default.is_some());
    }

    #[test]
    fn test_non_default_after_default_is_rejected() {
        let err = parse("def f(a=1, b):\n    pass\n").unwrap_err();
        assert!(err.message.contains("non-default"));
    }

    #[test]
    fn test_chained_assignment_and_unpacking() {
        let program = parse("a = b = 1\nx, y = 1, 2\n").unwrap();
        match &program.body[0].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match &program.body[1].kind {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(targets[0].kind, ExprKind::Tuple(_)));
                assert!(matches!(value.kind, ExprKind::Tuple(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_assign_to_call_is_rejected() {
        let err = parse("f() = 1\n").unwrap_err();
        assert!(err.message.contains("cannot assign"));
    }

    #[test]
    fn test_elif_chain_nests_in_orelse() {
        let program = parse("if a:\n    pass\nelif b:\n    pass\nelse:\n    x = 1\n").unwrap();
        let StmtKind::If { orelse, .. } = &program.body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_try_requires_handler_or_finally() {
        assert!(parse("try:\n    pass\n").is_err());
        assert!(parse("try:\n    pass\nfinally:\n    pass\n").is_ok());
    }

    #[test]
    fn test_from_import_with_parens() {
        let program = parse("from typing import (\n    Optional,\n    Dict as D,\n)\n").unwrap();
        let StmtKind::ImportFrom { module, names } = &program.body[0].kind else {
            panic!("expected import");
        };
        assert_eq!(module, "typing");
        assert_eq!(names[1].bound_name(), "D");
    }

    #[test]
    fn test_one_line_block_and_semicolons() {
        let program = parse("if x: a = 1; b = 2\n").unwrap();
        let StmtKind::If { body, .. } = &program.body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(body.len(), 2);
    }

    #[test]
    fn test_class_with_keyword_base_argument() {
        let program = parse("class A(Base, metaclass=Meta):\n    x = 1\n").unwrap();
        let StmtKind::ClassDef(class) = &program.body[0].kind else {
            panic!("expected class");
        };
        assert_eq!(class.bases.len(), 1);
    }

    #[test]
    fn test_parse_expression_entry_point() {
        let expr = parse_expression(" len(x) ").unwrap();
        let ExprKind::Call { args, .. } = expr.kind else {
            panic!("expected call");
        };
        assert!(matches!(
            &args[0],
            Argument::Positional(Expr { kind: ExprKind::Name(_), .. })
        ));
        assert!(parse_expression("1 +").is_err());
        assert_eq!(
            parse_expression("'a'").unwrap().kind,
            ExprKind::Constant(Constant::Str("a".into()))
        );
    }
}
