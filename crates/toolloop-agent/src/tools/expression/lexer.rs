//! Tokenizer for the expression language.
//!
//! Newlines end logical lines except inside brackets. Changes in
//! leading indentation produce `Indent`/`Dedent` tokens; the indentation of
//! the first code line is the base level.

use num_bigint::BigInt;

use super::parser::BinOp;
use super::EvalError;

/// Deepest block nesting accepted.
const MAX_INDENT_LEVELS: usize = 100;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum FPart {
    Lit(String),
    Expr {
        src: String,
        conversion: Option<char>,
        spec: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Keyword {
    True,
    False,
    None,
    And,
    Or,
    Not,
    If,
    Elif,
    Else,
    For,
    While,
    In,
    Is,
    Import,
    From,
    As,
    Def,
    Return,
    Lambda,
    Pass,
    Break,
    Continue,
    Del,
    Global,
    Assert,
    /// Reserved word for a construct the evaluator does not support.
    Unsupported(&'static str),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Tok {
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
    FStr(Vec<FPart>),
    Name(String),
    Kw(Keyword),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    Amp,
    Pipe,
    Caret,
    Tilde,
    LShift,
    RShift,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Arrow,
    Semi,
    Assign,
    AugAssign(BinOp),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Spanned {
    pub tok: Tok,
    pub line: usize,
}

const UNSUPPORTED: &[&str] = &[
    "class", "try", "except", "finally", "with", "nonlocal", "raise", "yield", "async", "await",
];

fn keyword(word: &str) -> Option<Keyword> {
    let kw = match word {
        "True" => Keyword::True,
        "False" => Keyword::False,
        "None" => Keyword::None,
        "and" => Keyword::And,
        "or" => Keyword::Or,
        "not" => Keyword::Not,
        "if" => Keyword::If,
        "elif" => Keyword::Elif,
        "else" => Keyword::Else,
        "for" => Keyword::For,
        "while" => Keyword::While,
        "in" => Keyword::In,
        "is" => Keyword::Is,
        "import" => Keyword::Import,
        "from" => Keyword::From,
        "as" => Keyword::As,
        "def" => Keyword::Def,
        "return" => Keyword::Return,
        "lambda" => Keyword::Lambda,
        "pass" => Keyword::Pass,
        "break" => Keyword::Break,
        "continue" => Keyword::Continue,
        "del" => Keyword::Del,
        "global" => Keyword::Global,
        "assert" => Keyword::Assert,
        other => {
            let reserved = UNSUPPORTED.iter().find(|w| **w == other)?;
            Keyword::Unsupported(*reserved)
        }
    };
    Some(kw)
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, EvalError> {
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: Vec::new(),
        at_line_start: true,
        out: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.out)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    at_line_start: bool,
    out: Vec<Spanned>,
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn push(&mut self, tok: Tok) {
        self.out.push(Spanned {
            tok,
            line: self.line,
        });
    }

    /// Consume the second character of a two-character operator.
    fn take(&mut self, tok: Tok) -> Tok {
        self.pos += 1;
        tok
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn newline(&mut self) {
        let last_is_break = matches!(
            self.out.last(),
            None | Some(Spanned {
                tok: Tok::Newline | Tok::Indent | Tok::Dedent,
                ..
            })
        );
        if !last_is_break {
            self.push(Tok::Newline);
        }
    }

    fn run(&mut self) -> Result<(), EvalError> {
        loop {
            if self.at_line_start && self.depth == 0 {
                self.at_line_start = false;
                self.indentation()?;
            }
            let Some(c) = self.peek() else { break };
            match c {
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '#' => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.pos += 1;
                    }
                }
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.newline();
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                ';' => {
                    if self.depth > 0 {
                        return Err(self.error("';' inside brackets"));
                    }
                    self.pos += 1;
                    self.push(Tok::Semi);
                }
                '0'..='9' => self.number()?,
                '.' if matches!(self.peek_at(1), Some('0'..='9')) => self.number()?,
                '\'' | '"' => self.string(false, false)?,
                c if c.is_alphabetic() || c == '_' => self.word()?,
                _ => self.operator(c)?,
            }
        }
        self.newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Measure the indentation of a new logical line and emit
    /// `Indent`/`Dedent` tokens. Blank and comment-only lines are skipped.
    fn indentation(&mut self) -> Result<(), EvalError> {
        let mut col = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => col += 1,
                '\t' => col = (col / 8 + 1) * 8,
                '\x0c' => col = 0,
                _ => break,
            }
            self.pos += 1;
        }
        if matches!(self.peek(), None | Some('\n' | '\r' | '#')) {
            return Ok(());
        }

        let Some(&current) = self.indents.last() else {
            self.indents.push(col);
            return Ok(());
        };
        if col > current {
            if self.indents.len() > MAX_INDENT_LEVELS {
                return Err(self.error("too many levels of indentation"));
            }
            self.indents.push(col);
            self.push(Tok::Indent);
            return Ok(());
        }
        while self.indents.last().is_some_and(|&level| col < level) {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        if self.indents.last() != Some(&col) {
            return Err(self.error("unindent does not match any outer indentation level"));
        }
        Ok(())
    }

    fn word(&mut self) -> Result<(), EvalError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('\'' | '"')) {
            match word.to_ascii_lowercase().as_str() {
                "f" => return self.string(false, true),
                "r" => return self.string(true, false),
                "rf" | "fr" => return self.string(true, true),
                "b" | "rb" | "br" => return Err(self.error("bytes literals are not supported")),
                _ => {}
            }
        }

        let tok = match keyword(&word) {
            Some(kw) => Tok::Kw(kw),
            None => Tok::Name(word),
        };
        self.push(tok);
        Ok(())
    }

    fn digits(&mut self) {
        while matches!(self.peek(), Some('0'..='9' | '_')) {
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<(), EvalError> {
        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x' | 'X') => Some(16),
                Some('o' | 'O') => Some(8),
                Some('b' | 'B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                return self.radix_number(radix);
            }
        }

        let start = self.pos;
        let mut is_float = false;
        self.digits();
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            self.digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if matches!(self.peek_at(digit_at), Some('0'..='9')) {
                is_float = true;
                self.pos += digit_at;
                self.digits();
            }
        }
        if matches!(self.peek(), Some('j' | 'J')) {
            return Err(self.error("complex numbers are not supported"));
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let invalid = || self.error(format!("invalid number literal '{text}'"));
        let tok = if is_float {
            Tok::Float(text.parse().map_err(|_| invalid())?)
        } else {
            match text.parse::<i64>() {
                Ok(n) => Tok::Int(n),
                Err(_) => Tok::BigInt(text.parse().map_err(|_| invalid())?),
            }
        };
        self.push(tok);
        Ok(())
    }

    /// `0x1f`, `0o17`, `0b1010`, with optional `_` separators.
    fn radix_number(&mut self, radix: u32) -> Result<(), EvalError> {
        self.pos += 2;
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let invalid = || self.error(format!("invalid digit in base-{radix} literal '{digits}'"));
        if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
            return Err(invalid());
        }
        let tok = match i64::from_str_radix(&digits, radix) {
            Ok(n) => Tok::Int(n),
            Err(_) => Tok::BigInt(BigInt::parse_bytes(digits.as_bytes(), radix).ok_or_else(invalid)?),
        };
        self.push(tok);
        Ok(())
    }

    fn string(&mut self, raw: bool, fstring: bool) -> Result<(), EvalError> {
        let start_line = self.line;
        let quote = self.bump().ok_or_else(|| self.error("unexpected end of input"))?;
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.pos += 2;
        }

        let mut s = String::new();
        loop {
            let c = self.bump().ok_or_else(|| EvalError::Syntax {
                line: start_line,
                message: "unterminated string literal".into(),
            })?;
            if c == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.pos += 2;
                    break;
                }
                s.push(c);
                continue;
            }
            if c == '\n' {
                if !triple {
                    return Err(EvalError::Syntax {
                        line: start_line,
                        message: "unterminated string literal".into(),
                    });
                }
                self.line += 1;
                s.push(c);
                continue;
            }
            if c == '\\' && !raw {
                let escaped = self.bump().ok_or_else(|| self.error("unterminated string literal"))?;
                match escaped {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    '0' => s.push('\0'),
                    '\\' => s.push('\\'),
                    '\'' => s.push('\''),
                    '"' => s.push('"'),
                    '\n' => self.line += 1,
                    'x' => s.push(self.hex_escape(2)?),
                    'u' => s.push(self.hex_escape(4)?),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
                continue;
            }
            s.push(c);
        }

        let tok = if fstring {
            Tok::FStr(split_fstring(&s).map_err(|message| EvalError::Syntax {
                line: start_line,
                message,
            })?)
        } else {
            Tok::Str(s)
        };
        self.out.push(Spanned {
            tok,
            line: start_line,
        });
        Ok(())
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, EvalError> {
        let end = self.pos + len;
        let digits: String = self.chars.get(self.pos..end).unwrap_or_default().iter().collect();
        let c = u32::from_str_radix(&digits, 16)
            .ok()
            .filter(|_| digits.len() == len)
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("truncated \\xXX or \\uXXXX escape"))?;
        self.pos = end;
        Ok(c)
    }

    fn operator(&mut self, c: char) -> Result<(), EvalError> {
        self.pos += 1;
        let next = self.peek();
        let tok = match c {
            '+' if next == Some('=') => self.take(Tok::AugAssign(BinOp::Add)),
            '+' => Tok::Plus,
            '-' if next == Some('=') => self.take(Tok::AugAssign(BinOp::Sub)),
            '-' if next == Some('>') => self.take(Tok::Arrow),
            '-' => Tok::Minus,
            '*' if next == Some('*') => {
                self.pos += 1;
                if self.peek() == Some('=') {
                    self.take(Tok::AugAssign(BinOp::Pow))
                } else {
                    Tok::DoubleStar
                }
            }
            '*' if next == Some('=') => self.take(Tok::AugAssign(BinOp::Mul)),
            '*' => Tok::Star,
            '/' if next == Some('/') => {
                self.pos += 1;
                if self.peek() == Some('=') {
                    self.take(Tok::AugAssign(BinOp::FloorDiv))
                } else {
                    Tok::DoubleSlash
                }
            }
            '/' if next == Some('=') => self.take(Tok::AugAssign(BinOp::Div)),
            '/' => Tok::Slash,
            '%' if next == Some('=') => self.take(Tok::AugAssign(BinOp::Mod)),
            '%' => Tok::Percent,
            '&' if next == Some('=') => self.take(Tok::AugAssign(BinOp::BitAnd)),
            '&' => Tok::Amp,
            '|' if next == Some('=') => self.take(Tok::AugAssign(BinOp::BitOr)),
            '|' => Tok::Pipe,
            '^' if next == Some('=') => self.take(Tok::AugAssign(BinOp::BitXor)),
            '^' => Tok::Caret,
            '~' => Tok::Tilde,
            '(' | '[' | '{' => {
                self.depth += 1;
                match c {
                    '(' => Tok::LParen,
                    '[' => Tok::LBracket,
                    _ => Tok::LBrace,
                }
            }
            ')' | ']' | '}' => {
                self.depth = self.depth.saturating_sub(1);
                match c {
                    ')' => Tok::RParen,
                    ']' => Tok::RBracket,
                    _ => Tok::RBrace,
                }
            }
            ',' => Tok::Comma,
            '.' => Tok::Dot,
            ':' => Tok::Colon,
            '=' if next == Some('=') => self.take(Tok::Eq),
            '=' => Tok::Assign,
            '!' if next == Some('=') => self.take(Tok::Ne),
            '<' if next == Some('<') => {
                self.pos += 1;
                if self.peek() == Some('=') {
                    self.take(Tok::AugAssign(BinOp::LShift))
                } else {
                    Tok::LShift
                }
            }
            '<' if next == Some('=') => self.take(Tok::Le),
            '<' => Tok::Lt,
            '>' if next == Some('>') => {
                self.pos += 1;
                if self.peek() == Some('=') {
                    self.take(Tok::AugAssign(BinOp::RShift))
                } else {
                    Tok::RShift
                }
            }
            '>' if next == Some('=') => self.take(Tok::Ge),
            '>' => Tok::Gt,
            other => return Err(self.error(format!("invalid character '{other}'"))),
        };
        self.push(tok);
        Ok(())
    }
}

/// Split an f-string body into literal text and `{expr!conv:spec}` fields.
fn split_fstring(s: &str) -> Result<Vec<FPart>, String> {
    let chars: Vec<char> = s.chars().collect();
    let mut parts = Vec::new();
    let mut lit = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '{' if chars.get(i + 1) == Some(&'{') => {
                lit.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                lit.push('}');
                i += 2;
            }
            '}' => return Err("f-string: single '}' is not allowed".into()),
            '{' => {
                if !lit.is_empty() {
                    parts.push(FPart::Lit(std::mem::take(&mut lit)));
                }
                i += 1;

                let mut src = String::new();
                let mut depth = 0usize;
                let mut quote: Option<char> = None;
                loop {
                    let c = *chars.get(i).ok_or("f-string: expecting '}'")?;
                    if let Some(q) = quote {
                        src.push(c);
                        if c == q {
                            quote = None;
                        }
                        i += 1;
                        continue;
                    }
                    match c {
                        '\'' | '"' => quote = Some(c),
                        '(' | '[' | '{' => depth += 1,
                        ')' | ']' => depth = depth.saturating_sub(1),
                        '}' if depth == 0 => break,
                        '}' => depth -= 1,
                        '!' if chars.get(i + 1) == Some(&'=') => {
                            src.push_str("!=");
                            i += 2;
                            continue;
                        }
                        ':' | '!' if depth == 0 => break,
                        _ => {}
                    }
                    src.push(c);
                    i += 1;
                }

                let mut conversion = None;
                if chars.get(i) == Some(&'!') {
                    let conv = *chars.get(i + 1).ok_or("f-string: expecting '}'")?;
                    if conv != 'r' && conv != 's' {
                        return Err(format!("f-string: invalid conversion character '{conv}'"));
                    }
                    conversion = Some(conv);
                    i += 2;
                }

                let mut spec = String::new();
                if chars.get(i) == Some(&':') {
                    i += 1;
                    while let Some(&c) = chars.get(i) {
                        if c == '}' {
                            break;
                        }
                        spec.push(c);
                        i += 1;
                    }
                }

                if chars.get(i) != Some(&'}') {
                    return Err("f-string: expecting '}'".into());
                }
                i += 1;

                if src.trim().is_empty() {
                    return Err("f-string: empty expression not allowed".into());
                }
                parts.push(FPart::Expr {
                    src,
                    conversion,
                    spec,
                });
            }
            _ => {
                lit.push(c);
                i += 1;
            }
        }
    }
    if !lit.is_empty() {
        parts.push(FPart::Lit(lit));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|s| s.tok).collect()
    }

    #[test]
    fn test_simple_expression() {
        assert_eq!(
            toks("x = 2 ** 10 // 3"),
            vec![
                Tok::Name("x".into()),
                Tok::Assign,
                Tok::Int(2),
                Tok::DoubleStar,
                Tok::Int(10),
                Tok::DoubleSlash,
                Tok::Int(3),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let t = toks("print(1,\n  2)\n\n\nx");
        let newlines = t.iter().filter(|t| **t == Tok::Newline).count();
        assert_eq!(newlines, 2);
        assert!(!t.contains(&Tok::Indent));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(toks("1_000_000")[0], Tok::Int(1_000_000));
        assert_eq!(toks("2.5")[0], Tok::Float(2.5));
        assert_eq!(toks("1e3")[0], Tok::Float(1000.0));
        assert_eq!(toks(".5")[0], Tok::Float(0.5));
        assert_eq!(toks("0x10")[0], Tok::Int(16));
        assert_eq!(toks("0o17")[0], Tok::Int(15));
        assert_eq!(toks("0b1010_1010")[0], Tok::Int(170));
        assert_eq!(
            toks("99999999999999999999")[0],
            Tok::BigInt("99999999999999999999".parse().unwrap())
        );
        assert!(tokenize("0x").is_err());
        assert!(tokenize("0b102").is_err());
        assert!(tokenize("3j").is_err());
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(toks(r#"'a\nb'"#)[0], Tok::Str("a\nb".into()));
        assert_eq!(toks(r#"r'a\nb'"#)[0], Tok::Str("a\\nb".into()));
        assert_eq!(toks("\"\"\"x\ny\"\"\"")[0], Tok::Str("x\ny".into()));
        assert_eq!(toks(r#"'\x41\u00e9'"#)[0], Tok::Str("Aé".into()));
        assert!(tokenize("'open").is_err());
    }

    #[test]
    fn test_fstring_parts() {
        let t = toks("f'{x:.2f} and {{y}} {z!r}'");
        assert_eq!(
            t[0],
            Tok::FStr(vec![
                FPart::Expr {
                    src: "x".into(),
                    conversion: None,
                    spec: ".2f".into()
                },
                FPart::Lit(" and {y} ".into()),
                FPart::Expr {
                    src: "z".into(),
                    conversion: Some('r'),
                    spec: String::new()
                },
            ])
        );
    }

    #[test]
    fn test_keywords() {
        assert_eq!(toks("not None")[..2], [Tok::Kw(Keyword::Not), Tok::Kw(Keyword::None)]);
        assert_eq!(toks("while")[0], Tok::Kw(Keyword::While));
        assert_eq!(toks("class")[0], Tok::Kw(Keyword::Unsupported("class")));
    }

    #[test]
    fn test_bitwise_operators() {
        assert_eq!(
            toks("a << 2 | b & ~c ^ d >> 1")[..10],
            [
                Tok::Name("a".into()),
                Tok::LShift,
                Tok::Int(2),
                Tok::Pipe,
                Tok::Name("b".into()),
                Tok::Amp,
                Tok::Tilde,
                Tok::Name("c".into()),
                Tok::Caret,
                Tok::Name("d".into()),
            ]
        );
        assert_eq!(toks("x |= 1")[1], Tok::AugAssign(BinOp::BitOr));
        assert_eq!(toks("x >>= 1")[1], Tok::AugAssign(BinOp::RShift));
    }

    #[test]
    fn test_comments_and_semicolons() {
        let t = toks("a = 1; b = 2  # trailing");
        assert_eq!(t.iter().filter(|t| **t == Tok::Semi).count(), 1);
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn test_indentation_blocks() {
        let t = toks("if x:\n    y = 1\n\n    # note\n    z = 2\nw");
        assert_eq!(t.iter().filter(|t| **t == Tok::Indent).count(), 1);
        assert_eq!(t.iter().filter(|t| **t == Tok::Dedent).count(), 1);
        let dedent = t.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert_eq!(t[dedent - 1], Tok::Newline);
        assert_eq!(t[dedent + 1], Tok::Name("w".into()));
    }

    #[test]
    fn test_dedents_closed_at_end_of_input() {
        let t = toks("for a in b:\n  for c in d:\n    e");
        assert_eq!(t.iter().filter(|t| **t == Tok::Indent).count(), 2);
        assert_eq!(&t[t.len() - 4..], &[Tok::Newline, Tok::Dedent, Tok::Dedent, Tok::Eof]);
    }

    #[test]
    fn test_uniform_leading_indentation_is_the_base_level() {
        let t = toks("    a = 1\n    b = 2\n");
        assert!(!t.contains(&Tok::Indent));
        assert!(!t.contains(&Tok::Dedent));
    }

    #[test]
    fn test_inconsistent_dedent_is_an_error() {
        let err = tokenize("if x:\n    y\n  z").unwrap_err();
        assert!(matches!(err, EvalError::Syntax { line: 3, .. }));
    }

    #[test]
    fn test_line_numbers() {
        let spanned = tokenize("a\nb\n\nc").unwrap();
        let lines: Vec<usize> = spanned
            .iter()
            .filter(|s| matches!(s.tok, Tok::Name(_)))
            .map(|s| s.line)
            .collect();
        assert_eq!(lines, vec![1, 2, 4]);
    }
}
