//! Expression grammar, lowest to highest precedence:
//! lambda, conditional, `or`, `and`, `not`, comparisons, `|`, `&`,
//! additive, multiplicative, unary, `**`, `await`, primary with trailers.

use std::sync::Arc;

use super::lexer::TokenKind;
use super::{parse_expression, ParseError, ParseResult, Parser};
use crate::ast::{
    Argument, BinaryOp, CompareOp, Constant, Expr, ExprKind, FStringPart, FunctionDef, LogicalOp,
    Span, Stmt, StmtKind, UnaryOp,
};

impl Parser {
    /// `test (',' test)* [',']`; more than one element yields a tuple.
    pub(super) fn parse_testlist(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let first = self.parse_test()?;
        if !self.check(TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(TokenKind::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    /// Assignment or loop target: a single target or a bare tuple of them.
    pub(super) fn parse_target_list(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let first = self.parse_target()?;
        if !self.check(TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(TokenKind::Comma) {
            if self.check(TokenKind::In) || !self.starts_expression() {
                break;
            }
            items.push(self.parse_target()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    /// Targets stop below comparisons so `for x in xs` leaves `in` alone.
    pub(super) fn parse_target(&mut self) -> ParseResult<Expr> {
        self.parse_bitor()
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Name
                | TokenKind::Int
                | TokenKind::Float
                | TokenKind::Str
                | TokenKind::FStr
                | TokenKind::None
                | TokenKind::True
                | TokenKind::False
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Tilde
                | TokenKind::Not
                | TokenKind::Lambda
                | TokenKind::Await
        )
    }

    pub(super) fn parse_test(&mut self) -> ParseResult<Expr> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Lambda) {
            return self.parse_lambda();
        }
        let span = self.span();
        let body = self.parse_or()?;
        if self.check(TokenKind::If) {
            self.advance();
            let test = self.parse_or()?;
            self.expect(TokenKind::Else, "in conditional expression")?;
            let orelse = self.parse_test()?;
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                span,
            ));
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        self.expect(TokenKind::Lambda, "")?;
        let params = self.parse_parameters(TokenKind::Colon, false)?;
        self.expect(TokenKind::Colon, "after lambda parameters")?;
        let body_expr = self.parse_test()?;
        let body_span = body_expr.span;
        let def = FunctionDef {
            name: "<lambda>".to_string(),
            params,
            body: vec![Stmt::new(StmtKind::Return(Some(body_expr)), body_span)],
            is_async: false,
            returns: None,
            span,
        };
        Ok(Expr::new(ExprKind::Lambda(Arc::new(def)), span))
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.check(TokenKind::Or) {
            let span = self.span();
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_and()?;
            left = Expr::new(
                ExprKind::Logical {
                    op: LogicalOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_not()?;
        let mut links = 0;
        while self.check(TokenKind::And) {
            let span = self.span();
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_not()?;
            left = Expr::new(
                ExprKind::Logical {
                    op: LogicalOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            );
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Not) {
            let span = self.span();
            self.advance();
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let left = self.parse_bitor()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => CompareOp::Eq,
                TokenKind::NotEq => CompareOp::NotEq,
                TokenKind::Lt => CompareOp::Lt,
                TokenKind::LtE => CompareOp::LtE,
                TokenKind::Gt => CompareOp::Gt,
                TokenKind::GtE => CompareOp::GtE,
                TokenKind::In => CompareOp::In,
                TokenKind::Not if self.peek_kind_at(1) == TokenKind::In => {
                    self.advance();
                    CompareOp::NotIn
                }
                TokenKind::Is => {
                    if self.peek_kind_at(1) == TokenKind::Not {
                        self.advance();
                        CompareOp::IsNot
                    } else {
                        CompareOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.parse_bitor()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
            span,
        ))
    }

    fn parse_bitor(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_bitand()?;
        let mut links = 0;
        while self.check(TokenKind::Pipe) {
            let span = self.span();
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_bitand()?;
            left = binary(left, BinaryOp::BitOr, right, span);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_bitand(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_arith()?;
        let mut links = 0;
        while self.check(TokenKind::Ampersand) {
            let span = self.span();
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_arith()?;
            left = binary(left, BinaryOp::BitAnd, right, span);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_arith(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_term()?;
        let mut links = 0;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.span();
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_term()?;
            left = binary(left, op, right, span);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_term(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_factor()?;
        let mut links = 0;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::DoubleSlash => BinaryOp::FloorDiv,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let span = self.span();
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_factor()?;
            left = binary(left, op, right, span);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_factor(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            TokenKind::Tilde => return Err(self.error_here("'~' is not supported")),
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.nested(Self::parse_factor)?;
        // fold negative literals so `-1` is a constant
        if let (UnaryOp::Neg, ExprKind::Constant(constant)) = (op, &operand.kind) {
            match constant {
                Constant::Int(i) => {
                    return Ok(Expr::new(ExprKind::Constant(Constant::Int(-i)), span))
                }
                Constant::Float(f) => {
                    return Ok(Expr::new(ExprKind::Constant(Constant::Float(-f)), span))
                }
                _ => {}
            }
        }
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_await()?;
        if self.check(TokenKind::DoubleStar) {
            let span = self.span();
            self.advance();
            // right associative, binds tighter than unary minus on the left
            let exponent = self.nested(Self::parse_factor)?;
            return Ok(binary(base, BinaryOp::Pow, exponent, span));
        }
        Ok(base)
    }

    fn parse_await(&mut self) -> ParseResult<Expr> {
        if self.check(TokenKind::Await) {
            let span = self.span();
            self.advance();
            let operand = self.parse_primary()?;
            return Ok(Expr::new(ExprKind::Await(Box::new(operand)), span));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_atom()?;
        let mut links = 0;
        loop {
            if matches!(
                self.peek_kind(),
                TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot
            ) {
                self.descend()?;
                links += 1;
            }
            match self.peek_kind() {
                TokenKind::LParen => {
                    let span = self.span();
                    self.advance();
                    let args = self.parse_call_arguments()?;
                    self.expect(TokenKind::RParen, "to close call")?;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    let span = self.span();
                    self.advance();
                    let index = self.parse_subscript()?;
                    self.expect(TokenKind::RBracket, "to close subscript")?;
                    expr = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::Dot => {
                    let span = self.span();
                    self.advance();
                    let attr = self.expect_name("after '.'")?;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        self.depth -= links;
        Ok(expr)
    }

    fn parse_call_arguments(&mut self) -> ParseResult<Vec<Argument>> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        while !self.check(TokenKind::RParen) {
            let span = self.span();
            if self.eat(TokenKind::DoubleStar) {
                args.push(Argument::DoubleStar(self.parse_test()?));
                seen_keyword = true;
            } else if self.eat(TokenKind::Star) {
                args.push(Argument::Star(self.parse_test()?));
            } else if self.check(TokenKind::Name) && self.peek_kind_at(1) == TokenKind::Assign {
                let name = self.advance().text;
                self.advance();
                let value = self.parse_test()?;
                if args
                    .iter()
                    .any(|a| matches!(a, Argument::Keyword { name: n, .. } if *n == name))
                {
                    return Err(ParseError::new(
                        format!("keyword argument repeated: {}", name),
                        span.line,
                        span.column,
                    ));
                }
                args.push(Argument::Keyword { name, value });
                seen_keyword = true;
            } else {
                let value = self.parse_test()?;
                if self.check(TokenKind::For) {
                    if !args.is_empty() {
                        return Err(ParseError::new(
                            "generator expression must be parenthesized",
                            span.line,
                            span.column,
                        ));
                    }
                    let comp = self.parse_comprehension(value, span)?;
                    args.push(Argument::Positional(comp));
                    if !self.check(TokenKind::RParen) {
                        return Err(self.unexpected("')' after generator expression"));
                    }
                    break;
                }
                if seen_keyword {
                    return Err(ParseError::new(
                        "positional argument follows keyword argument",
                        span.line,
                        span.column,
                    ));
                }
                args.push(Argument::Positional(value));
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn parse_subscript(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let lower = if self.check(TokenKind::Colon) {
            None
        } else {
            let first = self.parse_test()?;
            if !self.check(TokenKind::Colon) {
                if self.check(TokenKind::Comma) {
                    let mut items = vec![first];
                    while self.eat(TokenKind::Comma) {
                        if self.check(TokenKind::RBracket) {
                            break;
                        }
                        items.push(self.parse_test()?);
                    }
                    return Ok(Expr::new(ExprKind::Tuple(items), span));
                }
                return Ok(first);
            }
            Some(Box::new(first))
        };

        self.expect(TokenKind::Colon, "in slice")?;
        let upper = if matches!(self.peek_kind(), TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_test()?))
        };
        let step = if self.eat(TokenKind::Colon) && !self.check(TokenKind::RBracket) {
            Some(Box::new(self.parse_test()?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Slice { lower, upper, step }, span))
    }

    /// `for target in iter [if cond]*` after `element`.
    fn parse_comprehension(&mut self, element: Expr, span: Span) -> ParseResult<Expr> {
        self.expect(TokenKind::For, "in comprehension")?;
        let target = self.parse_target_list()?;
        self.validate_target(&target)?;
        self.expect(TokenKind::In, "in comprehension")?;
        let iter = self.parse_or()?;
        let mut conditions = Vec::new();
        while self.eat(TokenKind::If) {
            conditions.push(self.parse_or()?);
        }
        if self.check(TokenKind::For) {
            return Err(self.error_here("nested comprehensions are not supported"));
        }
        Ok(Expr::new(
            ExprKind::ListComp {
                element: Box::new(element),
                target: Box::new(target),
                iter: Box::new(iter),
                conditions,
            },
            span,
        ))
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let kind = match self.peek_kind() {
            TokenKind::Name => ExprKind::Name(self.advance().text),
            TokenKind::None => {
                self.advance();
                ExprKind::Constant(Constant::None)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Constant(Constant::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Constant(Constant::Bool(false))
            }
            TokenKind::Int => {
                let token = self.advance();
                let value = token.text.parse::<i64>().map_err(|_| {
                    ParseError::new("invalid integer literal", token.line, token.col)
                })?;
                ExprKind::Constant(Constant::Int(value))
            }
            TokenKind::Float => {
                let token = self.advance();
                let value = token.text.parse::<f64>().map_err(|_| {
                    ParseError::new("invalid float literal", token.line, token.col)
                })?;
                ExprKind::Constant(Constant::Float(value))
            }
            TokenKind::Str | TokenKind::FStr => return self.parse_strings(),
            TokenKind::LParen => return self.parse_parenthesized(),
            TokenKind::LBracket => return self.parse_list_display(),
            TokenKind::LBrace => return self.parse_dict_display(),
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr::new(kind, span))
    }

    fn parse_parenthesized(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        self.expect(TokenKind::LParen, "")?;
        if self.eat(TokenKind::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), span));
        }
        let first = self.parse_test()?;
        if self.check(TokenKind::For) {
            let comp = self.parse_comprehension(first, span)?;
            self.expect(TokenKind::RParen, "to close generator expression")?;
            return Ok(comp);
        }
        if self.eat(TokenKind::RParen) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(TokenKind::Comma) {
            if self.check(TokenKind::RParen) {
                break;
            }
            items.push(self.parse_test()?);
        }
        self.expect(TokenKind::RParen, "to close tuple")?;
        Ok(Expr::new(ExprKind::Tuple(items), span))
    }

    fn parse_list_display(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        self.expect(TokenKind::LBracket, "")?;
        if self.eat(TokenKind::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), span));
        }
        let first = self.parse_test()?;
        if self.check(TokenKind::For) {
            let comp = self.parse_comprehension(first, span)?;
            self.expect(TokenKind::RBracket, "to close list comprehension")?;
            return Ok(comp);
        }
        let mut items = vec![first];
        while self.eat(TokenKind::Comma) {
            if self.check(TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_test()?);
        }
        self.expect(TokenKind::RBracket, "to close list")?;
        Ok(Expr::new(ExprKind::List(items), span))
    }

    fn parse_dict_display(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        self.expect(TokenKind::LBrace, "")?;
        let mut entries = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::DoubleStar) {
                return Err(self.error_here("dict unpacking is not supported"));
            }
            let key = self.parse_test()?;
            if !self.check(TokenKind::Colon) {
                return Err(ParseError::new(
                    "set literals are not supported",
                    key.span.line,
                    key.span.column,
                ));
            }
            self.advance();
            let value = self.parse_test()?;
            entries.push((key, value));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "to close dict")?;
        Ok(Expr::new(ExprKind::Dict(entries), span))
    }

    /// Adjacent literals concatenate; any f-string makes the result an f-string.
    fn parse_strings(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;
        while matches!(self.peek_kind(), TokenKind::Str | TokenKind::FStr) {
            let token = self.advance();
            if token.kind == TokenKind::FStr {
                formatted = true;
                parts.extend(parse_fstring_parts(&token.text, token.line, token.col)?);
            } else {
                parts.push(FStringPart::Literal(token.text));
            }
        }

        if !formatted {
            let text: String = parts
                .into_iter()
                .map(|part| match part {
                    FStringPart::Literal(s) => s,
                    FStringPart::Expr { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::new(ExprKind::Constant(Constant::Str(text)), span));
        }

        // merge neighbouring literal chunks
        let mut merged: Vec<FStringPart> = Vec::with_capacity(parts.len());
        for part in parts {
            match (merged.last_mut(), part) {
                (Some(FStringPart::Literal(prev)), FStringPart::Literal(next)) => {
                    prev.push_str(&next)
                }
                (_, part) => merged.push(part),
            }
        }
        Ok(Expr::new(ExprKind::FString(merged), span))
    }
}

fn binary(left: Expr, op: BinaryOp, right: Expr, span: Span) -> Expr {
    Expr::new(
        ExprKind::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        span,
    )
}

/// Splits decoded f-string contents into literal text and replacement fields.
fn parse_fstring_parts(text: &str, line: usize, col: usize) -> ParseResult<Vec<FStringPart>> {
    let chars: Vec<char> = text.chars().collect();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '{' {
            if chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }
            if !literal.is_empty() {
                parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
            }
            let (field, next) = scan_replacement_field(&chars, i + 1, line, col)?;
            parts.push(parse_replacement_field(&field, line, col)?);
            i = next;
            continue;
        }
        if c == '}' {
            if chars.get(i + 1) == Some(&'}') {
                literal.push('}');
                i += 2;
                continue;
            }
            return Err(ParseError::new(
                "f-string: single '}' is not allowed",
                line,
                col,
            ));
        }
        literal.push(c);
        i += 1;
    }
    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }
    Ok(parts)
}

/// Returns the field text between braces and the index after the closing `}`.
fn scan_replacement_field(
    chars: &[char],
    start: usize,
    line: usize,
    col: usize,
) -> ParseResult<(String, usize)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth == 0 => {
                    return Ok((chars[start..i].iter().collect(), i + 1));
                }
                '}' => depth -= 1,
                _ => {}
            },
        }
        i += 1;
    }
    Err(ParseError::new("f-string: expecting '}'", line, col))
}

fn parse_replacement_field(field: &str, line: usize, col: usize) -> ParseResult<FStringPart> {
    // split off `:spec` and `!conv` at bracket depth zero
    let chars: Vec<char> = field.chars().collect();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut expr_end = chars.len();
    let mut conversion = None;
    let mut format_spec = None;

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => {
                expr_end = expr_end.min(i);
                let conv = chars.get(i + 1).copied();
                match conv {
                    Some('r') | Some('s') | Some('a') => conversion = conv,
                    _ => {
                        return Err(ParseError::new(
                            "f-string: invalid conversion character",
                            line,
                            col,
                        ))
                    }
                }
                if let Some(&':') = chars.get(i + 2) {
                    format_spec = Some(chars[i + 3..].iter().collect());
                } else if i + 2 != chars.len() {
                    return Err(ParseError::new(
                        "f-string: expecting '}' after conversion",
                        line,
                        col,
                    ));
                }
                break;
            }
            ':' if depth == 0 => {
                expr_end = i;
                format_spec = Some(chars[i + 1..].iter().collect());
                break;
            }
            _ => {}
        }
        i += 1;
    }

    let source: String = chars[..expr_end].iter().collect();
    if source.trim().is_empty() {
        return Err(ParseError::new(
            "f-string: empty expression not allowed",
            line,
            col,
        ));
    }
    let mut expr = parse_expression(&source)
        .map_err(|e| ParseError::new(format!("f-string: {}", e.message), line, col))?;
    relocate(&mut expr, line, col);
    Ok(FStringPart::Expr {
        expr,
        conversion,
        format_spec,
    })
}

/// Field expressions are parsed standalone; report them at the literal's position.
fn relocate(expr: &mut Expr, line: usize, col: usize) {
    expr.span = Span::new(line, col);
}
