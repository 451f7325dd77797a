//! Parser boundary: `parse(text) -> Module` or a syntax error carrying
//! line and offset.
//!
//! An indentation-aware lexer feeds a recursive-descent parser covering
//! the subset of Python the tree model names. The rest of the crate
//! consumes only `parse`; the analyzer and the session never see source
//! text.

use crate::errors::{Result, SandboxError};
use crate::tree::{
    BinOp, BoolOpKind, CmpOp, ExceptHandler, Expr, ImportAlias, Module, NameRole, Stmt, UnaryOp,
};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    // keywords
    Def,
    Class,
    Import,
    From,
    As,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Try,
    Except,
    Finally,
    Return,
    Pass,
    Break,
    Continue,
    Raise,
    And,
    Or,
    Not,
    True,
    False,
    None,
    Async,
    // operators and punctuation
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Assign,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    EqEq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    At,
    Arrow,
    Semi,
    // layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Name(n) => format!("name '{}'", n),
            Tok::Int(v) => format!("number '{}'", v),
            Tok::Float(v) => format!("number '{}'", v),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
            other => format!("{:?}", other).to_lowercase(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
    col: usize,
}

fn keyword(word: &str) -> Option<Tok> {
    Some(match word {
        "def" => Tok::Def,
        "class" => Tok::Class,
        "import" => Tok::Import,
        "from" => Tok::From,
        "as" => Tok::As,
        "if" => Tok::If,
        "elif" => Tok::Elif,
        "else" => Tok::Else,
        "while" => Tok::While,
        "for" => Tok::For,
        "in" => Tok::In,
        "try" => Tok::Try,
        "except" => Tok::Except,
        "finally" => Tok::Finally,
        "return" => Tok::Return,
        "pass" => Tok::Pass,
        "break" => Tok::Break,
        "continue" => Tok::Continue,
        "raise" => Tok::Raise,
        "and" => Tok::And,
        "or" => Tok::Or,
        "not" => Tok::Not,
        "True" => Tok::True,
        "False" => Tok::False,
        "None" => Tok::None,
        "async" => Tok::Async,
        _ => return Option::None,
    })
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    paren_depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            paren_depth: 0,
            indents: vec![0],
            at_line_start: true,
        }
    }

    fn err(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::Parse {
            line: self.line,
            offset: self.col,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut out = Vec::new();
        loop {
            if self.at_line_start && self.paren_depth == 0 {
                if !self.handle_line_start(&mut out)? {
                    break;
                }
                continue;
            }
            match self.peek() {
                Option::None => break,
                Some('\n') => {
                    self.bump();
                    if self.paren_depth == 0 {
                        out.push(Token {
                            tok: Tok::Newline,
                            line: self.line - 1,
                            col: self.col,
                        });
                        self.at_line_start = true;
                    }
                }
                Some('#') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(ch) if ch == ' ' || ch == '\t' || ch == '\r' => {
                    self.bump();
                }
                Some('\\') if self.peek2() == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                Some(_) => {
                    let token = self.lex_token()?;
                    out.push(token);
                }
            }
        }
        // close any open suite at end of input
        let line = self.line;
        if !matches!(out.last().map(|t| &t.tok), Some(Tok::Newline) | Option::None) {
            out.push(Token {
                tok: Tok::Newline,
                line,
                col: self.col,
            });
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            out.push(Token {
                tok: Tok::Dedent,
                line,
                col: 1,
            });
        }
        out.push(Token {
            tok: Tok::Eof,
            line,
            col: self.col,
        });
        Ok(out)
    }

    /// Measures indentation and emits Indent/Dedent tokens. Returns false
    /// at end of input.
    fn handle_line_start(&mut self, out: &mut Vec<Token>) -> Result<bool> {
        let mut width = 0usize;
        loop {
            match self.peek() {
                Some(' ') => {
                    width += 1;
                    self.bump();
                }
                Some('\t') => {
                    width += 8 - (width % 8);
                    self.bump();
                }
                Some('\r') => {
                    self.bump();
                }
                Some('\n') => {
                    // blank line, no layout significance
                    self.bump();
                    return Ok(true);
                }
                Some('#') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    return Ok(true);
                }
                Some(_) => break,
                Option::None => return Ok(false),
            }
        }
        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            out.push(Token {
                tok: Tok::Indent,
                line: self.line,
                col: 1,
            });
        } else if width < current {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                out.push(Token {
                    tok: Tok::Dedent,
                    line: self.line,
                    col: 1,
                });
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(self.err("unindent does not match any outer indentation level"));
            }
        }
        self.at_line_start = false;
        Ok(true)
    }

    fn lex_token(&mut self) -> Result<Token> {
        let line = self.line;
        let col = self.col;
        let ch = self.peek().ok_or_else(|| self.err("unexpected end of input"))?;

        if ch.is_ascii_digit() {
            return self.lex_number(line, col);
        }
        if ch.is_alphabetic() || ch == '_' {
            return Ok(self.lex_name(line, col));
        }
        if ch == '\'' || ch == '"' {
            return self.lex_string(line, col);
        }

        self.bump();
        let tok = match ch {
            '+' => self.with_eq(Tok::Plus, Tok::PlusEq),
            '-' => {
                if self.peek() == Some('>') {
                    self.bump();
                    Tok::Arrow
                } else {
                    self.with_eq(Tok::Minus, Tok::MinusEq)
                }
            }
            '*' => {
                if self.peek() == Some('*') {
                    self.bump();
                    Tok::DoubleStar
                } else {
                    self.with_eq(Tok::Star, Tok::StarEq)
                }
            }
            '/' => {
                if self.peek() == Some('/') {
                    self.bump();
                    Tok::DoubleSlash
                } else {
                    self.with_eq(Tok::Slash, Tok::SlashEq)
                }
            }
            '%' => Tok::Percent,
            '=' => self.with_eq(Tok::Assign, Tok::EqEq),
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Tok::NotEq
                } else {
                    return Err(self.err("unexpected character '!'"));
                }
            }
            '<' => self.with_eq(Tok::Lt, Tok::LtE),
            '>' => self.with_eq(Tok::Gt, Tok::GtE),
            '(' => {
                self.paren_depth += 1;
                Tok::LParen
            }
            ')' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RParen
            }
            '[' => {
                self.paren_depth += 1;
                Tok::LBracket
            }
            ']' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RBracket
            }
            '{' => {
                self.paren_depth += 1;
                Tok::LBrace
            }
            '}' => {
                self.paren_depth = self.paren_depth.saturating_sub(1);
                Tok::RBrace
            }
            ',' => Tok::Comma,
            ':' => Tok::Colon,
            '.' => Tok::Dot,
            '@' => Tok::At,
            ';' => Tok::Semi,
            other => return Err(self.err(format!("unexpected character '{}'", other))),
        };
        Ok(Token { tok, line, col })
    }

    fn with_eq(&mut self, plain: Tok, with_eq: Tok) -> Tok {
        if self.peek() == Some('=') {
            self.bump();
            with_eq
        } else {
            plain
        }
    }

    fn lex_number(&mut self, line: usize, col: usize) -> Result<Token> {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '_' {
                if ch != '_' {
                    text.push(ch);
                }
                self.bump();
            } else {
                break;
            }
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek2() != Some('.') {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    text.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            is_float = true;
            text.push('e');
            self.bump();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                text.push(sign);
                self.bump();
            }
            while let Some(ch) = self.peek() {
                if ch.is_ascii_digit() {
                    text.push(ch);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        let tok = if is_float {
            Tok::Float(
                text.parse::<f64>()
                    .map_err(|_| self.err(format!("invalid number literal '{}'", text)))?,
            )
        } else {
            Tok::Int(
                text.parse::<i64>()
                    .map_err(|_| self.err(format!("integer literal out of range '{}'", text)))?,
            )
        };
        Ok(Token { tok, line, col })
    }

    fn lex_name(&mut self, line: usize, col: usize) -> Token {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                text.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        let tok = keyword(&text).unwrap_or(Tok::Name(text));
        Token { tok, line, col }
    }

    fn lex_string(&mut self, line: usize, col: usize) -> Result<Token> {
        let Some(quote) = self.bump() else {
            return Err(self.err("unterminated string literal"));
        };
        let triple = self.peek() == Some(quote) && self.peek2() == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }
        let mut value = String::new();
        loop {
            let Some(ch) = self.peek() else {
                return Err(self.err("unterminated string literal"));
            };
            if triple {
                if ch == quote && self.peek2() == Some(quote) && self.chars.get(self.pos + 2) == Some(&quote)
                {
                    self.bump();
                    self.bump();
                    self.bump();
                    break;
                }
                if ch == '\\' {
                    self.bump();
                    value.push(self.escape()?);
                    continue;
                }
                value.push(ch);
                self.bump();
            } else {
                if ch == quote {
                    self.bump();
                    break;
                }
                if ch == '\n' {
                    return Err(self.err("unterminated string literal"));
                }
                if ch == '\\' {
                    self.bump();
                    value.push(self.escape()?);
                    continue;
                }
                value.push(ch);
                self.bump();
            }
        }
        Ok(Token {
            tok: Tok::Str(value),
            line,
            col,
        })
    }

    fn escape(&mut self) -> Result<char> {
        let Some(ch) = self.bump() else {
            return Err(self.err("unterminated escape sequence"));
        };
        Ok(match ch {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            '0' => '\0',
            other => other,
        })
    }
}

// dead-simple token cursor; errors carry the offending token's position
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, ahead: usize) -> &Tok {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].tok
    }

    fn here(&self) -> (usize, usize) {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        (token.line, token.col)
    }

    fn line(&self) -> usize {
        self.here().0
    }

    fn bump(&mut self) -> Tok {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].tok.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn err(&self, message: impl Into<String>) -> SandboxError {
        let (line, col) = self.here();
        SandboxError::Parse {
            line,
            offset: col,
            message: message.into(),
        }
    }

    fn expect(&mut self, tok: Tok, context: &str) -> Result<()> {
        if self.peek() == &tok {
            self.bump();
            Ok(())
        } else {
            Err(self.err(format!(
                "expected {} {}, found {}",
                tok.describe(),
                context,
                self.peek().describe()
            )))
        }
    }

    fn expect_name(&mut self, context: &str) -> Result<String> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.bump();
                Ok(name)
            }
            other => Err(self.err(format!(
                "expected a name {}, found {}",
                context,
                other.describe()
            ))),
        }
    }

    // ---- statements ----

    fn parse_module(&mut self) -> Result<Module> {
        let mut body = Vec::new();
        while self.peek() != &Tok::Eof {
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.push(self.parse_statement()?);
        }
        Ok(Module { body })
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        match self.peek() {
            Tok::At => self.parse_decorated(),
            Tok::Def | Tok::Async => self.parse_function(Vec::new()),
            Tok::Class => self.parse_class(Vec::new()),
            Tok::If => self.parse_if(),
            Tok::While => self.parse_while(),
            Tok::For => self.parse_for(),
            Tok::Try => self.parse_try(),
            _ => {
                let stmt = self.parse_simple_statement()?;
                self.end_of_simple_statement()?;
                Ok(stmt)
            }
        }
    }

    fn end_of_simple_statement(&mut self) -> Result<()> {
        if self.eat(&Tok::Semi) {
            // trailing semicolon before end of line is fine
            if self.peek() == &Tok::Newline || self.peek() == &Tok::Eof {
                self.eat(&Tok::Newline);
                return Ok(());
            }
            return Err(self.err("only one statement per line is supported after ';'"));
        }
        if self.peek() == &Tok::Eof {
            return Ok(());
        }
        self.expect(Tok::Newline, "after statement")
    }

    fn parse_decorated(&mut self) -> Result<Stmt> {
        let mut decorators = Vec::new();
        while self.eat(&Tok::At) {
            decorators.push(self.parse_postfix_expr()?);
            self.expect(Tok::Newline, "after decorator")?;
            while self.eat(&Tok::Newline) {}
        }
        match self.peek() {
            Tok::Def | Tok::Async => self.parse_function(decorators),
            Tok::Class => self.parse_class(decorators),
            _ => Err(self.err("decorators must be followed by a function or class definition")),
        }
    }

    fn parse_function(&mut self, decorators: Vec<Expr>) -> Result<Stmt> {
        let line = self.line();
        let is_async = self.eat(&Tok::Async);
        self.expect(Tok::Def, "to start a function definition")?;
        let name = self.expect_name("after 'def'")?;
        self.expect(Tok::LParen, "after function name")?;
        let mut params = Vec::new();
        while self.peek() != &Tok::RParen {
            let param = self.expect_name("in parameter list")?;
            if self.eat(&Tok::Colon) {
                // annotation, recorded nowhere: parse and drop
                self.parse_expr()?;
            }
            params.push(param);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen, "to close the parameter list")?;
        let returns = if self.eat(&Tok::Arrow) {
            Some(self.parse_expr()?)
        } else {
            Option::None
        };
        let body = self.parse_block("function body")?;
        Ok(Stmt::FunctionDef {
            name,
            params,
            returns,
            decorators,
            body,
            is_async,
            line,
        })
    }

    fn parse_class(&mut self, decorators: Vec<Expr>) -> Result<Stmt> {
        let line = self.line();
        self.expect(Tok::Class, "to start a class definition")?;
        let name = self.expect_name("after 'class'")?;
        let mut bases = Vec::new();
        if self.eat(&Tok::LParen) {
            while self.peek() != &Tok::RParen {
                bases.push(self.parse_expr()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(Tok::RParen, "to close the base-class list")?;
        }
        let body = self.parse_block("class body")?;
        Ok(Stmt::ClassDef {
            name,
            bases,
            decorators,
            body,
            line,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.bump(); // 'if' or 'elif'
        let test = self.parse_expr()?;
        let body = self.parse_block("if body")?;
        let orelse = if self.peek() == &Tok::Elif {
            vec![self.parse_if()?]
        } else if self.eat(&Tok::Else) {
            self.parse_block("else body")?
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            test,
            body,
            orelse,
            line,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.bump();
        let test = self.parse_expr()?;
        let body = self.parse_block("while body")?;
        Ok(Stmt::While { test, body, line })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.bump();
        let target = self.parse_for_target()?;
        self.expect(Tok::In, "in for statement")?;
        let iter = self.parse_testlist()?;
        let body = self.parse_block("for body")?;
        Ok(Stmt::For {
            target,
            iter,
            body,
            line,
        })
    }

    fn parse_for_target(&mut self) -> Result<Expr> {
        let line = self.line();
        let parenthesized = self.eat(&Tok::LParen);
        let mut names = Vec::new();
        loop {
            let name_line = self.line();
            let id = self.expect_name("as loop target")?;
            names.push(Expr::Name {
                id,
                role: NameRole::Store,
                line: name_line,
            });
            if !self.eat(&Tok::Comma) {
                break;
            }
            if parenthesized && self.peek() == &Tok::RParen {
                break;
            }
        }
        if parenthesized {
            self.expect(Tok::RParen, "to close the loop target")?;
        }
        if !parenthesized && names.len() == 1 {
            if let Some(single) = names.pop() {
                return Ok(single);
            }
        }
        Ok(Expr::Tuple { elts: names, line })
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        let line = self.line();
        self.bump();
        let body = self.parse_block("try body")?;
        let mut handlers = Vec::new();
        while self.peek() == &Tok::Except {
            let handler_line = self.line();
            self.bump();
            let exc_type = if self.peek() != &Tok::Colon && self.peek() != &Tok::As {
                Some(self.parse_expr()?)
            } else {
                Option::None
            };
            let bind = if self.eat(&Tok::As) {
                Some(self.expect_name("after 'as'")?)
            } else {
                Option::None
            };
            let handler_body = self.parse_block("except body")?;
            handlers.push(ExceptHandler {
                exc_type,
                bind,
                body: handler_body,
                line: handler_line,
            });
        }
        let finalbody = if self.eat(&Tok::Finally) {
            self.parse_block("finally body")?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.err("expected 'except' or 'finally' after try body"));
        }
        Ok(Stmt::Try {
            body,
            handlers,
            finalbody,
            line,
        })
    }

    /// `':' NEWLINE INDENT stmts DEDENT` or an inline simple statement.
    fn parse_block(&mut self, context: &str) -> Result<Vec<Stmt>> {
        self.expect(Tok::Colon, &format!("to open {}", context))?;
        if self.eat(&Tok::Newline) {
            self.expect(Tok::Indent, &format!("for {}", context))?;
            let mut body = Vec::new();
            while self.peek() != &Tok::Dedent && self.peek() != &Tok::Eof {
                if self.eat(&Tok::Newline) {
                    continue;
                }
                body.push(self.parse_statement()?);
            }
            self.expect(Tok::Dedent, &format!("to close {}", context))?;
            Ok(body)
        } else {
            let mut body = vec![self.parse_simple_statement()?];
            while self.eat(&Tok::Semi) {
                if self.peek() == &Tok::Newline || self.peek() == &Tok::Eof {
                    break;
                }
                body.push(self.parse_simple_statement()?);
            }
            if self.peek() != &Tok::Eof {
                self.expect(Tok::Newline, "after inline suite")?;
            }
            Ok(body)
        }
    }

    fn parse_simple_statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        match self.peek() {
            Tok::Import => {
                self.bump();
                let names = self.parse_import_aliases()?;
                Ok(Stmt::Import { names, line })
            }
            Tok::From => {
                self.bump();
                let module = self.parse_dotted_name()?;
                self.expect(Tok::Import, "in from-import")?;
                let names = self.parse_import_aliases()?;
                Ok(Stmt::ImportFrom {
                    module,
                    names,
                    line,
                })
            }
            Tok::Return => {
                self.bump();
                let value = if matches!(self.peek(), Tok::Newline | Tok::Semi | Tok::Eof) {
                    Option::None
                } else {
                    Some(self.parse_testlist()?)
                };
                Ok(Stmt::Return { value, line })
            }
            Tok::Raise => {
                self.bump();
                let exc = if matches!(self.peek(), Tok::Newline | Tok::Semi | Tok::Eof) {
                    Option::None
                } else {
                    Some(self.parse_expr()?)
                };
                Ok(Stmt::Raise { exc, line })
            }
            Tok::Pass => {
                self.bump();
                Ok(Stmt::Pass { line })
            }
            Tok::Break => {
                self.bump();
                Ok(Stmt::Break { line })
            }
            Tok::Continue => {
                self.bump();
                Ok(Stmt::Continue { line })
            }
            _ => self.parse_expr_or_assign(line),
        }
    }

    fn parse_import_aliases(&mut self) -> Result<Vec<ImportAlias>> {
        let mut names = Vec::new();
        loop {
            let name = self.parse_dotted_name()?;
            let asname = if self.eat(&Tok::As) {
                Some(self.expect_name("after 'as'")?)
            } else {
                Option::None
            };
            names.push(ImportAlias { name, asname });
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(names)
    }

    fn parse_dotted_name(&mut self) -> Result<String> {
        let mut name = self.expect_name("in import")?;
        while self.peek() == &Tok::Dot {
            self.bump();
            name.push('.');
            name.push_str(&self.expect_name("after '.'")?);
        }
        Ok(name)
    }

    fn parse_expr_or_assign(&mut self, line: usize) -> Result<Stmt> {
        let first = self.parse_testlist()?;
        match self.peek() {
            Tok::Assign => {
                let mut targets = vec![first];
                self.bump();
                loop {
                    let next = self.parse_testlist()?;
                    if self.eat(&Tok::Assign) {
                        targets.push(next);
                        continue;
                    }
                    let targets = targets
                        .into_iter()
                        .map(|t| self.mark_store(t))
                        .collect::<Result<Vec<_>>>()?;
                    return Ok(Stmt::Assign {
                        targets,
                        value: next,
                        line,
                    });
                }
            }
            Tok::PlusEq | Tok::MinusEq | Tok::StarEq | Tok::SlashEq => {
                let op = match self.bump() {
                    Tok::PlusEq => BinOp::Add,
                    Tok::MinusEq => BinOp::Sub,
                    Tok::StarEq => BinOp::Mul,
                    Tok::SlashEq => BinOp::Div,
                    _ => unreachable!("matched above"),
                };
                let value = self.parse_expr()?;
                let target = self.mark_store(first)?;
                Ok(Stmt::AugAssign {
                    target,
                    op,
                    value,
                    line,
                })
            }
            _ => Ok(Stmt::Expr { value: first, line }),
        }
    }

    /// Rewrites load-role names in an assignment target to store role.
    fn mark_store(&self, target: Expr) -> Result<Expr> {
        match target {
            Expr::Name { id, line, .. } => Ok(Expr::Name {
                id,
                role: NameRole::Store,
                line,
            }),
            Expr::Tuple { elts, line } => {
                let elts = elts
                    .into_iter()
                    .map(|e| self.mark_store(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::Tuple { elts, line })
            }
            Expr::List { elts, line } => {
                let elts = elts
                    .into_iter()
                    .map(|e| self.mark_store(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::List { elts, line })
            }
            target @ (Expr::Attribute { .. } | Expr::Subscript { .. }) => Ok(target),
            other => Err(SandboxError::Parse {
                line: other.line(),
                offset: 1,
                message: "invalid assignment target".to_string(),
            }),
        }
    }

    // ---- expressions ----

    /// Expression list that may form an unparenthesized tuple: `1, 2, 3`.
    fn parse_testlist(&mut self) -> Result<Expr> {
        let line = self.line();
        let first = self.parse_expr()?;
        if self.peek() != &Tok::Comma {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat(&Tok::Comma) {
            if matches!(
                self.peek(),
                Tok::Newline | Tok::Eof | Tok::Assign | Tok::RParen | Tok::Colon | Tok::Semi
            ) {
                break;
            }
            elts.push(self.parse_expr()?);
        }
        Ok(Expr::Tuple { elts, line })
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let line = self.line();
        let first = self.parse_and()?;
        if self.peek() != &Tok::Or {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&Tok::Or) {
            values.push(self.parse_and()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOpKind::Or,
            values,
            line,
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let line = self.line();
        let first = self.parse_not()?;
        if self.peek() != &Tok::And {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&Tok::And) {
            values.push(self.parse_not()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOpKind::And,
            values,
            line,
        })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.peek() == &Tok::Not && self.peek_at(1) != &Tok::In {
            let line = self.line();
            self.bump();
            let operand = self.parse_not()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                line,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let line = self.line();
        let left = self.parse_arith()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::EqEq => CmpOp::Eq,
                Tok::NotEq => CmpOp::NotEq,
                Tok::Lt => CmpOp::Lt,
                Tok::LtE => CmpOp::LtE,
                Tok::Gt => CmpOp::Gt,
                Tok::GtE => CmpOp::GtE,
                Tok::In => CmpOp::In,
                Tok::Not if self.peek_at(1) == &Tok::In => CmpOp::NotIn,
                _ => break,
            };
            self.bump();
            if op == CmpOp::NotIn {
                self.bump(); // the 'in'
            }
            ops.push(op);
            comparators.push(self.parse_arith()?);
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
                comparators,
                line,
            })
        }
    }

    fn parse_arith(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            let line = self.line();
            self.bump();
            let right = self.parse_term()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
                line,
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            let line = self.line();
            self.bump();
            let right = self.parse_factor()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
                line,
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        if self.peek() == &Tok::Minus {
            let line = self.line();
            self.bump();
            let operand = self.parse_factor()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                line,
            });
        }
        if self.peek() == &Tok::Plus {
            self.bump();
            return self.parse_factor();
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_postfix_expr()?;
        if self.peek() == &Tok::DoubleStar {
            let line = self.line();
            self.bump();
            let exponent = self.parse_factor()?;
            return Ok(Expr::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
                line,
            });
        }
        Ok(base)
    }

    fn parse_postfix_expr(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    let line = self.line();
                    self.bump();
                    let (args, kwargs) = self.parse_call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                        line,
                    };
                }
                Tok::Dot => {
                    let line = self.line();
                    self.bump();
                    let attr = self.expect_name("after '.'")?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                        line,
                    };
                }
                Tok::LBracket => {
                    let line = self.line();
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(Tok::RBracket, "to close subscript")?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                        line,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while self.peek() != &Tok::RParen {
            if let Tok::Name(name) = self.peek().clone() {
                if self.peek_at(1) == &Tok::Assign {
                    self.bump();
                    self.bump();
                    kwargs.push((name, self.parse_expr()?));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                    continue;
                }
            }
            if !kwargs.is_empty() {
                return Err(self.err("positional argument follows keyword argument"));
            }
            args.push(self.parse_expr()?);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen, "to close call arguments")?;
        Ok((args, kwargs))
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Name(id) => {
                self.bump();
                Ok(Expr::Name {
                    id,
                    role: NameRole::Load,
                    line,
                })
            }
            Tok::Int(value) => {
                self.bump();
                Ok(Expr::Int { value, line })
            }
            Tok::Float(value) => {
                self.bump();
                Ok(Expr::Float { value, line })
            }
            Tok::Str(value) => {
                self.bump();
                Ok(Expr::Str { value, line })
            }
            Tok::True => {
                self.bump();
                Ok(Expr::Bool { value: true, line })
            }
            Tok::False => {
                self.bump();
                Ok(Expr::Bool { value: false, line })
            }
            Tok::None => {
                self.bump();
                Ok(Expr::NoneLit { line })
            }
            Tok::LParen => {
                self.bump();
                if self.eat(&Tok::RParen) {
                    return Ok(Expr::Tuple {
                        elts: Vec::new(),
                        line,
                    });
                }
                let inner = self.parse_testlist()?;
                self.expect(Tok::RParen, "to close parenthesized expression")?;
                Ok(inner)
            }
            Tok::LBracket => {
                self.bump();
                let mut elts = Vec::new();
                while self.peek() != &Tok::RBracket {
                    elts.push(self.parse_expr()?);
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(Tok::RBracket, "to close list literal")?;
                Ok(Expr::List { elts, line })
            }
            Tok::LBrace => {
                self.bump();
                let mut entries = Vec::new();
                while self.peek() != &Tok::RBrace {
                    let key = self.parse_expr()?;
                    self.expect(Tok::Colon, "between dictionary key and value")?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(Tok::RBrace, "to close dictionary literal")?;
                Ok(Expr::Dict { entries, line })
            }
            other => Err(self.err(format!("unexpected {}", other.describe()))),
        }
    }
}

/// Parses a snippet of source text into a module tree.
pub fn parse(source: &str) -> Result<Module> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_module()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree;

    #[test]
    fn parses_assignment_and_expression() {
        let module = parse("x = 5\nx + 1\n").unwrap();
        assert_eq!(module.body.len(), 2);
        match &module.body[0] {
            Stmt::Assign { targets, value, line } => {
                assert_eq!(*line, 1);
                assert_eq!(targets.len(), 1);
                assert!(matches!(
                    &targets[0],
                    Expr::Name { id, role: NameRole::Store, .. } if id == "x"
                ));
                assert!(matches!(value, Expr::Int { value: 5, .. }));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn parses_import_with_alias() {
        let module = parse("import os as o, json\n").unwrap();
        match &module.body[0] {
            Stmt::Import { names, .. } => {
                assert_eq!(names.len(), 2);
                assert_eq!(names[0].name, "os");
                assert_eq!(names[0].asname.as_deref(), Some("o"));
                assert_eq!(names[0].bound_name(), "o");
                assert_eq!(names[1].bound_name(), "json");
            }
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn parses_function_with_docstring_and_decorator() {
        let source = "@wraps\ndef greet(name):\n    \"\"\"Say hello.\"\"\"\n    return 'hi ' + name\n";
        let module = parse(source).unwrap();
        match &module.body[0] {
            Stmt::FunctionDef {
                name,
                params,
                decorators,
                body,
                is_async,
                ..
            } => {
                assert_eq!(name, "greet");
                assert_eq!(params, &vec!["name".to_string()]);
                assert_eq!(decorators.len(), 1);
                assert!(!is_async);
                assert_eq!(tree::docstring(body), Some("Say hello."));
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn parses_nested_blocks_and_elif() {
        let source = "if a:\n    b = 1\nelif c:\n    b = 2\nelse:\n    b = 3\n";
        let module = parse(source).unwrap();
        match &module.body[0] {
            Stmt::If { orelse, .. } => {
                // elif chains nest inside orelse
                assert_eq!(orelse.len(), 1);
                assert!(matches!(&orelse[0], Stmt::If { orelse, .. } if orelse.len() == 1));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn parses_try_except_finally() {
        let source =
            "try:\n    risky()\nexcept ValueError as e:\n    pass\nexcept:\n    pass\nfinally:\n    done()\n";
        let module = parse(source).unwrap();
        match &module.body[0] {
            Stmt::Try {
                handlers,
                finalbody,
                ..
            } => {
                assert_eq!(handlers.len(), 2);
                assert!(handlers[0].exc_type.is_some());
                assert_eq!(handlers[0].bind.as_deref(), Some("e"));
                assert!(handlers[1].exc_type.is_none());
                assert_eq!(finalbody.len(), 1);
            }
            other => panic!("expected try, got {:?}", other),
        }
    }

    #[test]
    fn inline_suite_on_one_line() {
        let module = parse("if x: y = 1\n").unwrap();
        match &module.body[0] {
            Stmt::If { body, orelse, .. } => {
                assert_eq!(body.len(), 1);
                assert!(orelse.is_empty());
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn comparison_chain_and_boolops() {
        let module = parse("ok = 1 < x <= 10 and x != 5\n").unwrap();
        match &module.body[0] {
            Stmt::Assign { value, .. } => match value {
                Expr::BoolOp { op, values, .. } => {
                    assert_eq!(*op, BoolOpKind::And);
                    assert_eq!(values.len(), 2);
                    assert!(matches!(&values[0], Expr::Compare { ops, .. } if ops.len() == 2));
                }
                other => panic!("expected boolop, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn unbalanced_input_reports_line() {
        let err = parse("x = (1 + \n").unwrap_err();
        match err {
            SandboxError::Parse { line, .. } => assert!(line >= 1),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn bad_indent_is_a_parse_error() {
        let err = parse("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert!(matches!(err, SandboxError::Parse { line: 3, .. }));
    }

    #[test]
    fn multiline_call_inside_parens() {
        let module = parse("total = sum([1,\n    2,\n    3])\n").unwrap();
        assert_eq!(module.body.len(), 1);
    }
}
