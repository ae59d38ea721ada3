//! Lexer: tokenizes hookscript source
//!
//! Block structure is significant whitespace, so besides the usual
//! identifiers, literals and operators the lexer emits `Newline`, `Indent`
//! and `Dedent` tokens. Line breaks inside brackets are joined, blank and
//! comment-only lines never produce tokens.

use super::{ParseError, ParseResult};

/// Bracket nesting accepted before the lexer gives up.
pub const MAX_BRACKET_DEPTH: usize = 200;

fn closer(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw text for names and numbers, decoded contents for strings
    pub text: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    False,
    None,
    True,
    And,
    As,
    Assert,
    Async,
    Await,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Not,
    Or,
    Pass,
    Raise,
    Return,
    Try,
    While,
    With,
    Yield,

    // Identifiers and literals
    Name,
    Int,
    Float,
    Str,
    FStr,

    // Brackets and punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Arrow,
    At,

    // Operators
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Pipe,
    Ampersand,
    Tilde,
    EqEq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "False" => TokenKind::False,
            "None" => TokenKind::None,
            "True" => TokenKind::True,
            "and" => TokenKind::And,
            "as" => TokenKind::As,
            "assert" => TokenKind::Assert,
            "async" => TokenKind::Async,
            "await" => TokenKind::Await,
            "break" => TokenKind::Break,
            "class" => TokenKind::Class,
            "continue" => TokenKind::Continue,
            "def" => TokenKind::Def,
            "del" => TokenKind::Del,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "except" => TokenKind::Except,
            "finally" => TokenKind::Finally,
            "for" => TokenKind::For,
            "from" => TokenKind::From,
            "global" => TokenKind::Global,
            "if" => TokenKind::If,
            "import" => TokenKind::Import,
            "in" => TokenKind::In,
            "is" => TokenKind::Is,
            "lambda" => TokenKind::Lambda,
            "not" => TokenKind::Not,
            "or" => TokenKind::Or,
            "pass" => TokenKind::Pass,
            "raise" => TokenKind::Raise,
            "return" => TokenKind::Return,
            "try" => TokenKind::Try,
            "while" => TokenKind::While,
            "with" => TokenKind::With,
            "yield" => TokenKind::Yield,
            _ => return None,
        };
        Some(kind)
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::False => "'False'",
            Self::None => "'None'",
            Self::True => "'True'",
            Self::And => "'and'",
            Self::As => "'as'",
            Self::Assert => "'assert'",
            Self::Async => "'async'",
            Self::Await => "'await'",
            Self::Break => "'break'",
            Self::Class => "'class'",
            Self::Continue => "'continue'",
            Self::Def => "'def'",
            Self::Del => "'del'",
            Self::Elif => "'elif'",
            Self::Else => "'else'",
            Self::Except => "'except'",
            Self::Finally => "'finally'",
            Self::For => "'for'",
            Self::From => "'from'",
            Self::Global => "'global'",
            Self::If => "'if'",
            Self::Import => "'import'",
            Self::In => "'in'",
            Self::Is => "'is'",
            Self::Lambda => "'lambda'",
            Self::Not => "'not'",
            Self::Or => "'or'",
            Self::Pass => "'pass'",
            Self::Raise => "'raise'",
            Self::Return => "'return'",
            Self::Try => "'try'",
            Self::While => "'while'",
            Self::With => "'with'",
            Self::Yield => "'yield'",
            Self::Name => "identifier",
            Self::Int => "integer",
            Self::Float => "float",
            Self::Str => "string literal",
            Self::FStr => "f-string",
            Self::LParen => "'('",
            Self::RParen => "')'",
            Self::LBracket => "'['",
            Self::RBracket => "']'",
            Self::LBrace => "'{'",
            Self::RBrace => "'}'",
            Self::Comma => "','",
            Self::Colon => "':'",
            Self::Semicolon => "';'",
            Self::Dot => "'.'",
            Self::Arrow => "'->'",
            Self::At => "'@'",
            Self::Assign => "'='",
            Self::PlusAssign => "'+='",
            Self::MinusAssign => "'-='",
            Self::StarAssign => "'*='",
            Self::SlashAssign => "'/='",
            Self::DoubleSlashAssign => "'//='",
            Self::PercentAssign => "'%='",
            Self::Plus => "'+'",
            Self::Minus => "'-'",
            Self::Star => "'*'",
            Self::DoubleStar => "'**'",
            Self::Slash => "'/'",
            Self::DoubleSlash => "'//'",
            Self::Percent => "'%'",
            Self::Pipe => "'|'",
            Self::Ampersand => "'&'",
            Self::Tilde => "'~'",
            Self::EqEq => "'=='",
            Self::NotEq => "'!='",
            Self::Lt => "'<'",
            Self::LtE => "'<='",
            Self::Gt => "'>'",
            Self::GtE => "'>='",
            Self::Newline => "newline",
            Self::Indent => "indent",
            Self::Dedent => "dedent",
            Self::Eof => "end of input",
        };
        f.write_str(text)
    }
}

/// Lexer for hookscript source
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    indent_stack: Vec<usize>,
    /// Open `(`, `[` and `{` with their positions; newlines are ignored
    /// while any is open
    brackets: Vec<(char, usize, usize)>,
    at_line_start: bool,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            indent_stack: vec![0],
            brackets: Vec::new(),
            at_line_start: true,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> ParseResult<Vec<Token>> {
        let mut tokens: Vec<Token> = Vec::new();

        loop {
            if self.at_line_start && self.brackets.is_empty() {
                self.at_line_start = false;
                if !self.handle_indentation(&mut tokens)? {
                    continue;
                }
            }

            self.skip_inline_whitespace();

            let Some(ch) = self.current() else {
                break;
            };

            match ch {
                '#' => self.skip_comment(),
                '\n' => {
                    self.advance();
                    if self.brackets.is_empty() {
                        let needs_newline = tokens
                            .last()
                            .map(|t| !matches!(t.kind, TokenKind::Newline))
                            .unwrap_or(false);
                        if needs_newline {
                            tokens.push(Token::new(
                                TokenKind::Newline,
                                "",
                                self.line - 1,
                                self.col,
                            ));
                        }
                        self.at_line_start = true;
                    }
                }
                '\r' => {
                    self.advance();
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    // explicit line continuation
                    self.advance();
                    self.advance();
                }
                _ => {
                    let token = self.next_token()?;
                    tokens.push(token);
                }
            }
        }

        let (line, col) = (self.line, self.col);
        if let Some(&(open, open_line, open_col)) = self.brackets.last() {
            return Err(ParseError::new(
                format!("'{}' was never closed", open),
                open_line,
                open_col,
            ));
        }
        if tokens
            .last()
            .map(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::Dedent))
            .unwrap_or(false)
        {
            tokens.push(Token::new(TokenKind::Newline, "", line, col));
        }
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            tokens.push(Token::new(TokenKind::Dedent, "", line, col));
        }
        tokens.push(Token::new(TokenKind::Eof, "", line, col));
        Ok(tokens)
    }

    /// Measures the indentation of a fresh line and emits indent/dedent
    /// tokens. Returns `false` when the line is blank or comment-only and
    /// was consumed entirely.
    fn handle_indentation(&mut self, tokens: &mut Vec<Token>) -> ParseResult<bool> {
        let mut width = 0usize;
        while let Some(ch) = self.current() {
            match ch {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.advance();
        }

        match self.current() {
            None => return Ok(true),
            Some('\n') => {
                self.advance();
                self.at_line_start = true;
                return Ok(false);
            }
            Some('\r') if self.peek_at(1) == Some('\n') => {
                self.advance();
                self.advance();
                self.at_line_start = true;
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                if self.current() == Some('\n') {
                    self.advance();
                }
                self.at_line_start = true;
                return Ok(false);
            }
            _ => {}
        }

        let current = self.indent_stack.last().copied().unwrap_or(0);
        if width > current {
            self.indent_stack.push(width);
            tokens.push(Token::new(TokenKind::Indent, "", self.line, 1));
        } else if width < current {
            while self.indent_stack.last().copied().unwrap_or(0) > width {
                self.indent_stack.pop();
                tokens.push(Token::new(TokenKind::Dedent, "", self.line, 1));
            }
            if self.indent_stack.last().copied().unwrap_or(0) != width {
                return Err(ParseError::new(
                    "unindent does not match any outer indentation level",
                    self.line,
                    self.col,
                ));
            }
        }
        Ok(true)
    }

    fn next_token(&mut self) -> ParseResult<Token> {
        let line = self.line;
        let col = self.col;
        let ch = self.current().unwrap_or('\0');

        if ch.is_alphabetic() || ch == '_' {
            if let Some(token) = self.try_prefixed_string(line, col)? {
                return Ok(token);
            }
            return Ok(self.read_name(line, col));
        }
        if ch.is_ascii_digit() || (ch == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()))
        {
            return self.read_number(line, col);
        }
        if ch == '"' || ch == '\'' {
            let text = self.read_string_body(false, line, col)?;
            return Ok(Token::new(TokenKind::Str, text, line, col));
        }

        let next = self.peek_at(1);
        let third = self.peek_at(2);
        let (kind, len) = match (ch, next, third) {
            ('/', Some('/'), Some('=')) => (TokenKind::DoubleSlashAssign, 3),
            ('*', Some('*'), _) => (TokenKind::DoubleStar, 2),
            ('/', Some('/'), _) => (TokenKind::DoubleSlash, 2),
            ('=', Some('='), _) => (TokenKind::EqEq, 2),
            ('!', Some('='), _) => (TokenKind::NotEq, 2),
            ('<', Some('='), _) => (TokenKind::LtE, 2),
            ('>', Some('='), _) => (TokenKind::GtE, 2),
            ('-', Some('>'), _) => (TokenKind::Arrow, 2),
            ('+', Some('='), _) => (TokenKind::PlusAssign, 2),
            ('-', Some('='), _) => (TokenKind::MinusAssign, 2),
            ('*', Some('='), _) => (TokenKind::StarAssign, 2),
            ('/', Some('='), _) => (TokenKind::SlashAssign, 2),
            ('%', Some('='), _) => (TokenKind::PercentAssign, 2),
            ('(', _, _) => (TokenKind::LParen, 1),
            (')', _, _) => (TokenKind::RParen, 1),
            ('[', _, _) => (TokenKind::LBracket, 1),
            (']', _, _) => (TokenKind::RBracket, 1),
            ('{', _, _) => (TokenKind::LBrace, 1),
            ('}', _, _) => (TokenKind::RBrace, 1),
            (',', _, _) => (TokenKind::Comma, 1),
            (':', _, _) => (TokenKind::Colon, 1),
            (';', _, _) => (TokenKind::Semicolon, 1),
            ('.', _, _) => (TokenKind::Dot, 1),
            ('@', _, _) => (TokenKind::At, 1),
            ('=', _, _) => (TokenKind::Assign, 1),
            ('+', _, _) => (TokenKind::Plus, 1),
            ('-', _, _) => (TokenKind::Minus, 1),
            ('*', _, _) => (TokenKind::Star, 1),
            ('/', _, _) => (TokenKind::Slash, 1),
            ('%', _, _) => (TokenKind::Percent, 1),
            ('|', _, _) => (TokenKind::Pipe, 1),
            ('&', _, _) => (TokenKind::Ampersand, 1),
            ('~', _, _) => (TokenKind::Tilde, 1),
            ('<', _, _) => (TokenKind::Lt, 1),
            ('>', _, _) => (TokenKind::Gt, 1),
            _ => {
                return Err(ParseError::new(
                    format!("unexpected character '{}'", ch),
                    line,
                    col,
                ))
            }
        };

        let mut text = String::with_capacity(len);
        for _ in 0..len {
            if let Some(c) = self.advance() {
                text.push(c);
            }
        }
        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                if self.brackets.len() >= MAX_BRACKET_DEPTH {
                    return Err(ParseError::new("too many nested parentheses", line, col));
                }
                self.brackets.push((ch, line, col));
            }
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                let Some((open, _, _)) = self.brackets.pop() else {
                    return Err(ParseError::new(
                        format!("unmatched '{}'", text),
                        line,
                        col,
                    ));
                };
                if closer(open) != ch {
                    return Err(ParseError::new(
                        format!(
                            "closing parenthesis '{}' does not match opening parenthesis '{}'",
                            ch, open
                        ),
                        line,
                        col,
                    ));
                }
            }
            _ => {}
        }
        Ok(Token::new(kind, text, line, col))
    }

    /// Handles `r"..."`, `f"..."`, `b"..."` and their combinations.
    fn try_prefixed_string(&mut self, line: usize, col: usize) -> ParseResult<Option<Token>> {
        let mut prefix_len = 0;
        while prefix_len < 2
            && self
                .peek_at(prefix_len)
                .is_some_and(|c| matches!(c.to_ascii_lowercase(), 'r' | 'f' | 'b' | 'u'))
        {
            prefix_len += 1;
        }
        if prefix_len == 0 || !matches!(self.peek_at(prefix_len), Some('"') | Some('\'')) {
            return Ok(None);
        }

        let prefix: String = (0..prefix_len)
            .filter_map(|i| self.peek_at(i))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let valid = matches!(
            prefix.as_str(),
            "r" | "f" | "b" | "u" | "rf" | "fr" | "rb" | "br"
        );
        if !valid {
            return Ok(None);
        }
        for _ in 0..prefix_len {
            self.advance();
        }

        let raw = prefix.contains('r');
        let text = self.read_string_body(raw, line, col)?;
        let kind = if prefix.contains('f') {
            TokenKind::FStr
        } else {
            TokenKind::Str
        };
        Ok(Some(Token::new(kind, text, line, col)))
    }

    fn read_string_body(&mut self, raw: bool, line: usize, col: usize) -> ParseResult<String> {
        let quote = self.advance().unwrap_or('"');
        let triple = self.current() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }

        let mut text = String::new();
        loop {
            let Some(c) = self.current() else {
                return Err(ParseError::new("unterminated string literal", line, col));
            };

            if c == quote {
                if !triple {
                    self.advance();
                    return Ok(text);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.advance();
                    self.advance();
                    self.advance();
                    return Ok(text);
                }
                text.push(c);
                self.advance();
                continue;
            }

            if c == '\n' && !triple {
                return Err(ParseError::new("unterminated string literal", line, col));
            }

            if c == '\\' {
                self.advance();
                let Some(escaped) = self.advance() else {
                    return Err(ParseError::new("unterminated string literal", line, col));
                };
                if raw {
                    text.push('\\');
                    text.push(escaped);
                    continue;
                }
                match escaped {
                    '\n' => {}
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    '0' => text.push('\0'),
                    '\\' => text.push('\\'),
                    '\'' => text.push('\''),
                    '"' => text.push('"'),
                    'x' => text.push(self.read_hex_escape(2, line, col)?),
                    'u' => text.push(self.read_hex_escape(4, line, col)?),
                    'U' => text.push(self.read_hex_escape(8, line, col)?),
                    other => {
                        text.push('\\');
                        text.push(other);
                    }
                }
                continue;
            }

            text.push(c);
            self.advance();
        }
    }

    fn read_hex_escape(&mut self, digits: usize, line: usize, col: usize) -> ParseResult<char> {
        let mut value = String::with_capacity(digits);
        for _ in 0..digits {
            match self.current() {
                Some(c) if c.is_ascii_hexdigit() => {
                    value.push(c);
                    self.advance();
                }
                _ => return Err(ParseError::new("truncated escape sequence", line, col)),
            }
        }
        u32::from_str_radix(&value, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| ParseError::new("invalid escape sequence", line, col))
    }

    fn read_name(&mut self, line: usize, col: usize) -> Token {
        let mut text = String::new();
        while let Some(c) = self.current() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = TokenKind::keyword(&text).unwrap_or(TokenKind::Name);
        Token::new(kind, text, line, col)
    }

    fn read_number(&mut self, line: usize, col: usize) -> ParseResult<Token> {
        let mut text = String::new();

        if self.current() == Some('0')
            && matches!(self.peek_at(1), Some('x') | Some('X') | Some('o') | Some('O') | Some('b') | Some('B'))
        {
            let radix_char = self.peek_at(1).unwrap_or('x').to_ascii_lowercase();
            self.advance();
            self.advance();
            let radix = match radix_char {
                'x' => 16,
                'o' => 8,
                _ => 2,
            };
            while let Some(c) = self.current() {
                if c.is_digit(radix) {
                    text.push(c);
                } else if c != '_' {
                    break;
                }
                self.advance();
            }
            let value = i64::from_str_radix(&text, radix)
                .map_err(|_| ParseError::new("invalid integer literal", line, col))?;
            return Ok(Token::new(TokenKind::Int, value.to_string(), line, col));
        }

        let mut is_float = false;
        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                text.push(c);
            } else if c == '_' {
                // digit separator
            } else if c == '.' && !is_float && !text.contains(['e', 'E']) {
                if self.peek_at(1) == Some('.') {
                    break;
                }
                is_float = true;
                text.push(c);
            } else if (c == 'e' || c == 'E') && !text.contains(['e', 'E']) {
                let sign_or_digit = self.peek_at(1);
                let digit_after_sign = self.peek_at(2);
                let valid = match sign_or_digit {
                    Some(d) if d.is_ascii_digit() => true,
                    Some('+') | Some('-') => digit_after_sign.is_some_and(|d| d.is_ascii_digit()),
                    _ => false,
                };
                if !valid {
                    break;
                }
                is_float = true;
                text.push(c);
                self.advance();
                if let Some(sign) = self.current().filter(|s| *s == '+' || *s == '-') {
                    text.push(sign);
                    self.advance();
                }
                continue;
            } else {
                break;
            }
            self.advance();
        }

        if self.current().is_some_and(|c| c.is_alphabetic() || c == '_') {
            return Err(ParseError::new("invalid decimal literal", line, col));
        }

        if is_float {
            text.parse::<f64>()
                .map_err(|_| ParseError::new("invalid float literal", line, col))?;
            Ok(Token::new(TokenKind::Float, text, line, col))
        } else {
            text.parse::<i64>()
                .map_err(|_| ParseError::new("integer literal too large", line, col))?;
            Ok(Token::new(TokenKind::Int, text, line, col))
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while let Some(c) = self.current() {
            if c == ' ' || c == '\t' || c == '\x0c' || (c == '\n' && !self.brackets.is_empty()) {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.current() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .expect("tokenize")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_indent_and_dedent() {
        let src = "def f():\n    return 1\nx = 2\n";
        assert_eq!(
            kinds(src),
            vec![
                TokenKind::Def,
                TokenKind::Name,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Return,
                TokenKind::Int,
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Name,
                TokenKind::Assign,
                TokenKind::Int,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_blank_and_comment_lines_are_ignored() {
        let src = "x = 1\n\n    # indented comment\n\ny = 2";
        let k = kinds(src);
        assert!(!k.contains(&TokenKind::Indent));
        assert_eq!(k.iter().filter(|k| **k == TokenKind::Newline).count(), 2);
    }

    #[test]
    fn test_newlines_inside_brackets_are_joined() {
        let src = "x = call(\n    1,\n    2,\n)\n";
        let k = kinds(src);
        assert_eq!(k.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
        assert!(!k.contains(&TokenKind::Indent));
    }

    #[test]
    fn test_dedent_to_unknown_level_fails() {
        let src = "if x:\n        y = 1\n    z = 2\n";
        let err = Lexer::new(src).tokenize().unwrap_err();
        assert!(err.message.contains("unindent"));
    }

    #[test]
    fn test_unclosed_bracket_reported_where_opened() {
        let src = "x = 1\n\ndef broken(:\n    pass\n\n";
        let err = Lexer::new(src).tokenize().unwrap_err();
        assert_eq!(err.message, "'(' was never closed");
        assert_eq!((err.line, err.column), (3, 11));
    }

    #[test]
    fn test_mismatched_closer() {
        let err = Lexer::new("x = [1, 2)\n").tokenize().unwrap_err();
        assert_eq!(
            err.message,
            "closing parenthesis ')' does not match opening parenthesis '['"
        );
        assert_eq!(err.column, 10);
    }

    #[test]
    fn test_bracket_nesting_limit() {
        let deep = |n: usize| format!("x = {}1{}\n", "(".repeat(n), ")".repeat(n));
        assert!(Lexer::new(&deep(MAX_BRACKET_DEPTH)).tokenize().is_ok());
        let err = Lexer::new(&deep(MAX_BRACKET_DEPTH + 1)).tokenize().unwrap_err();
        assert_eq!(err.message, "too many nested parentheses");
        assert_eq!((err.line, err.column), (1, 5 + MAX_BRACKET_DEPTH));
    }

    #[test]
    fn test_string_prefixes_and_escapes() {
        let tokens = Lexer::new(r#"f"a{b}" r"\n" 'it\'s' """multi
line""""#)
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::FStr);
        assert_eq!(tokens[0].text, "a{b}");
        assert_eq!(tokens[1].kind, TokenKind::Str);
        assert_eq!(tokens[1].text, "\\n");
        assert_eq!(tokens[2].text, "it's");
        assert_eq!(tokens[3].text, "multi\nline");
    }

    #[test]
    fn test_numbers() {
        let tokens = Lexer::new("1_000 3.5 1e3 0x1F .5").tokenize().unwrap();
        assert_eq!(tokens[0].text, "1000");
        assert_eq!(tokens[1].kind, TokenKind::Float);
        assert_eq!(tokens[2].kind, TokenKind::Float);
        assert_eq!(tokens[3].text, "31");
        assert_eq!(tokens[4].text, ".5");
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("x = 'abc\n").tokenize().unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unterminated"));
    }
}
