//! Recursive-descent parser producing statement and expression trees.

use std::rc::Rc;

use super::lexer::{tokenize, FPart, Keyword, Spanned, Tok};
use super::value::Value;
use super::EvalError;

/// Deepest bracket, unary-operator or conditional nesting accepted.
pub(crate) const MAX_NESTING: usize = 200;

// ─────────────────────────────────────────────
// Syntax tree
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Target {
    Name(String),
    Tuple(Vec<Target>),
    /// `*rest` inside a tuple target.
    Starred(Box<Target>),
    Index(Box<Expr>, Box<Expr>),
    Slice {
        target: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CompClause {
    pub target: Target,
    pub iter: Expr,
    pub conds: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum CompKind {
    /// List comprehensions and generator expressions.
    List,
    Set,
    /// Holds the value expression; the element is the key.
    Dict(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum FSeg {
    Lit(String),
    Field {
        expr: Box<Expr>,
        conversion: Option<char>,
        spec: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// A `def` or `lambda`. A lambda body is a single `return`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FuncDef {
    pub name: String,
    pub params: Vec<Param>,
    pub vararg: Option<String>,
    pub body: Vec<Line>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Expr {
    Const(Value),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    /// `*items` inside a display or call.
    Starred(Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Compare(Box<Expr>, Vec<(CmpOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Slice {
        target: Box<Expr>,
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Comp {
        kind: CompKind,
        elt: Box<Expr>,
        clauses: Vec<CompClause>,
    },
    FString(Vec<FSeg>),
    Lambda(Rc<FuncDef>),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Stmt {
    Expr(Expr),
    Assign(Vec<Target>, Expr),
    AugAssign(Target, BinOp, Expr),
    /// `(module, bound name)` pairs.
    Import(Vec<(String, String)>),
    /// An empty name list means `from module import *`.
    FromImport(String, Vec<(String, String)>),
    If(Vec<(Expr, Vec<Line>)>, Vec<Line>),
    For {
        target: Target,
        iter: Expr,
        body: Vec<Line>,
        orelse: Vec<Line>,
    },
    While {
        cond: Expr,
        body: Vec<Line>,
        orelse: Vec<Line>,
    },
    Def(Rc<FuncDef>),
    Return(Option<Expr>),
    Break,
    Continue,
    Pass,
    Del(Vec<Target>),
    Global(Vec<String>),
    Assert(Expr, Option<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Line {
    pub stmt: Stmt,
    pub line: usize,
}

// ─────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────

/// Parse a whole program.
pub(crate) fn parse_program(src: &str) -> Result<Vec<Line>, EvalError> {
    let mut parser = Parser::new(tokenize(src)?);
    let mut lines = Vec::new();
    while !parser.at(&Tok::Eof) {
        parser.statement(&mut lines)?;
    }
    Ok(lines)
}

/// Parse the body of an f-string field as a single expression.
fn parse_field(src: &str, line: usize) -> Result<Expr, EvalError> {
    let relocate = |e: EvalError| match e {
        EvalError::Syntax { message, .. } => EvalError::Syntax { line, message },
        other => other,
    };
    let mut parser = Parser::new(tokenize(src.trim()).map_err(relocate)?);
    let expr = parser.expr_list().map_err(relocate)?;
    parser.end_of_statement().map_err(relocate)?;
    if !parser.at(&Tok::Eof) {
        return Err(EvalError::Syntax {
            line,
            message: "f-string: invalid expression".into(),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|s| &s.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
            .map(|s| &s.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek(), Tok::Kw(k) if *k == kw)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        if self.at_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> EvalError {
        EvalError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), EvalError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn end_of_statement(&mut self) -> Result<(), EvalError> {
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => Err(self.error("invalid syntax")),
        }
    }

    /// Run `parse` one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, EvalError>) -> Result<T, EvalError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("too many nested parentheses"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    // ── Statements ──

    fn statement(&mut self, out: &mut Vec<Line>) -> Result<(), EvalError> {
        let line = self.line();
        let stmt = match self.peek() {
            Tok::Kw(Keyword::If) => self.if_statement()?,
            Tok::Kw(Keyword::For) => self.for_statement()?,
            Tok::Kw(Keyword::While) => {
                self.advance();
                let cond = self.expr()?;
                let body = self.block()?;
                let orelse = self.else_block()?;
                Stmt::While { cond, body, orelse }
            }
            Tok::Kw(Keyword::Def) => self.def_statement()?,
            Tok::Indent => return Err(self.error("unexpected indent")),
            Tok::Kw(Keyword::Elif | Keyword::Else) => return Err(self.error("invalid syntax")),
            _ => return self.simple_statements(out),
        };
        out.push(Line { stmt, line });
        Ok(())
    }

    /// `stmt (';' stmt)* [';'] NEWLINE`
    fn simple_statements(&mut self, out: &mut Vec<Line>) -> Result<(), EvalError> {
        loop {
            let line = self.line();
            let stmt = self.simple_statement()?;
            out.push(Line { stmt, line });
            if !self.eat(&Tok::Semi) || matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
        }
        self.end_of_statement()
    }

    /// `':'` followed by an indented block or simple statements on the
    /// same line.
    fn block(&mut self) -> Result<Vec<Line>, EvalError> {
        self.expect(&Tok::Colon, "':'")?;
        let mut body = Vec::new();
        if !self.eat(&Tok::Newline) {
            self.simple_statements(&mut body)?;
            return Ok(body);
        }
        if !self.eat(&Tok::Indent) {
            return Err(self.error("expected an indented block"));
        }
        while !self.eat(&Tok::Dedent) && !self.at(&Tok::Eof) {
            self.statement(&mut body)?;
        }
        Ok(body)
    }

    fn else_block(&mut self) -> Result<Vec<Line>, EvalError> {
        if self.eat_kw(Keyword::Else) {
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, EvalError> {
        self.advance();
        let cond = self.expr()?;
        let mut branches = vec![(cond, self.block()?)];
        while self.eat_kw(Keyword::Elif) {
            let cond = self.expr()?;
            branches.push((cond, self.block()?));
        }
        let orelse = self.else_block()?;
        Ok(Stmt::If(branches, orelse))
    }

    fn for_statement(&mut self) -> Result<Stmt, EvalError> {
        self.advance();
        let target = self.comp_target()?;
        if !self.eat_kw(Keyword::In) {
            return Err(self.error("expected 'in' in for statement"));
        }
        let iter = self.expr_list()?;
        let body = self.block()?;
        let orelse = self.else_block()?;
        Ok(Stmt::For {
            target,
            iter,
            body,
            orelse,
        })
    }

    fn def_statement(&mut self) -> Result<Stmt, EvalError> {
        self.advance();
        let name = self.name("function name")?;
        self.expect(&Tok::LParen, "'('")?;
        let (params, vararg) = self.params(&Tok::RParen, true)?;
        self.expect(&Tok::RParen, "')'")?;
        if self.eat(&Tok::Arrow) {
            self.expr()?;
        }
        let body = self.block()?;
        Ok(Stmt::Def(Rc::new(FuncDef {
            name,
            params,
            vararg,
            body,
        })))
    }

    /// Parameter list up to `close`. Annotations are parsed and dropped.
    fn params(&mut self, close: &Tok, annotations: bool) -> Result<(Vec<Param>, Option<String>), EvalError> {
        let mut params: Vec<Param> = Vec::new();
        let mut vararg = None;
        while !self.at(close) {
            if self.eat(&Tok::DoubleStar) {
                return Err(self.error("'**' parameters are not supported"));
            }
            if self.eat(&Tok::Star) {
                if vararg.is_some() {
                    return Err(self.error("duplicate '*' parameter"));
                }
                vararg = Some(self.name("parameter name")?);
            } else {
                if vararg.is_some() {
                    return Err(self.error("keyword-only parameters are not supported"));
                }
                let name = self.name("parameter name")?;
                if params.iter().any(|p| p.name == name) {
                    return Err(self.error(format!("duplicate argument '{name}' in function definition")));
                }
                if annotations && self.eat(&Tok::Colon) {
                    self.expr()?;
                }
                let default = if self.eat(&Tok::Assign) {
                    Some(self.expr()?)
                } else {
                    if params.last().is_some_and(|p| p.default.is_some()) {
                        return Err(self.error("non-default argument follows default argument"));
                    }
                    None
                };
                params.push(Param { name, default });
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok((params, vararg))
    }

    fn simple_statement(&mut self) -> Result<Stmt, EvalError> {
        match self.peek() {
            Tok::Kw(Keyword::Import) => {
                self.advance();
                let mut modules = Vec::new();
                loop {
                    let module = self.name("module name")?;
                    let bound = if self.eat_kw(Keyword::As) {
                        self.name("alias")?
                    } else {
                        module.clone()
                    };
                    modules.push((module, bound));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                return Ok(Stmt::Import(modules));
            }
            Tok::Kw(Keyword::From) => {
                self.advance();
                let module = self.name("module name")?;
                if !self.eat_kw(Keyword::Import) {
                    return Err(self.error("expected 'import'"));
                }
                if self.eat(&Tok::Star) {
                    return Ok(Stmt::FromImport(module, Vec::new()));
                }
                let parens = self.eat(&Tok::LParen);
                let mut names = Vec::new();
                loop {
                    let name = self.name("imported name")?;
                    let bound = if self.eat_kw(Keyword::As) {
                        self.name("alias")?
                    } else {
                        name.clone()
                    };
                    names.push((name, bound));
                    if !self.eat(&Tok::Comma) || (parens && self.at(&Tok::RParen)) {
                        break;
                    }
                }
                if parens {
                    self.expect(&Tok::RParen, "')'")?;
                }
                return Ok(Stmt::FromImport(module, names));
            }
            Tok::Kw(Keyword::Return) => {
                self.advance();
                if matches!(self.peek(), Tok::Newline | Tok::Semi | Tok::Eof) {
                    return Ok(Stmt::Return(None));
                }
                return Ok(Stmt::Return(Some(self.expr_list()?)));
            }
            Tok::Kw(Keyword::Pass) => {
                self.advance();
                return Ok(Stmt::Pass);
            }
            Tok::Kw(Keyword::Break) => {
                self.advance();
                return Ok(Stmt::Break);
            }
            Tok::Kw(Keyword::Continue) => {
                self.advance();
                return Ok(Stmt::Continue);
            }
            Tok::Kw(Keyword::Del) => {
                self.advance();
                let targets = match self.expr_list()? {
                    Expr::Tuple(items) => items,
                    single => vec![single],
                };
                let targets = targets
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Stmt::Del(targets));
            }
            Tok::Kw(Keyword::Global) => {
                self.advance();
                let mut names = vec![self.name("name")?];
                while self.eat(&Tok::Comma) {
                    names.push(self.name("name")?);
                }
                return Ok(Stmt::Global(names));
            }
            Tok::Kw(Keyword::Assert) => {
                self.advance();
                let cond = self.expr()?;
                let message = if self.eat(&Tok::Comma) {
                    Some(self.expr()?)
                } else {
                    None
                };
                return Ok(Stmt::Assert(cond, message));
            }
            Tok::Kw(Keyword::Unsupported(word)) => {
                return Err(self.error(format!("'{word}' is not supported")));
            }
            _ => {}
        }

        let first = self.expr_list()?;
        if let Tok::AugAssign(op) = *self.peek() {
            self.advance();
            let target = match self.to_target(first)? {
                t @ (Target::Name(_) | Target::Index(..)) => t,
                _ => return Err(self.error("illegal expression for augmented assignment")),
            };
            let value = self.expr_list()?;
            return Ok(Stmt::AugAssign(target, op, value));
        }
        if self.at(&Tok::Colon) && matches!(first, Expr::Name(_) | Expr::Index(..) | Expr::Attr(..)) {
            // Annotated assignment; the annotation is ignored.
            self.advance();
            self.expr()?;
            if !self.eat(&Tok::Assign) {
                return Ok(Stmt::Pass);
            }
            let target = self.to_target(first)?;
            return Ok(Stmt::Assign(vec![target], self.expr_list()?));
        }
        if !self.at(&Tok::Assign) {
            return Ok(Stmt::Expr(first));
        }

        let mut exprs = vec![first];
        while self.eat(&Tok::Assign) {
            exprs.push(self.expr_list()?);
        }
        let value = exprs.pop().ok_or_else(|| self.error("invalid syntax"))?;
        let targets = exprs
            .into_iter()
            .map(|e| self.to_target(e))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Stmt::Assign(targets, value))
    }

    fn to_target(&self, expr: Expr) -> Result<Target, EvalError> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Tuple(items) | Expr::List(items) => {
                let targets: Vec<Target> = items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?;
                if targets.iter().filter(|t| matches!(t, Target::Starred(_))).count() > 1 {
                    return Err(self.error("multiple starred expressions in assignment"));
                }
                Ok(Target::Tuple(targets))
            }
            Expr::Starred(inner) => Ok(Target::Starred(Box::new(self.to_target(*inner)?))),
            Expr::Index(target, index) => Ok(Target::Index(target, index)),
            Expr::Slice {
                target,
                lower,
                upper,
                step,
            } => Ok(Target::Slice {
                target,
                lower,
                upper,
                step,
            }),
            Expr::Attr(..) => Err(self.error("attribute assignment is not supported")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn name(&mut self, what: &str) -> Result<String, EvalError> {
        match self.advance() {
            Tok::Name(n) => Ok(n),
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    // ── Expressions ──

    /// `item (',' item)* [',']`; a comma makes a tuple.
    fn expr_list(&mut self) -> Result<Expr, EvalError> {
        let first = self.star_expr()?;
        if !self.at(&Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.starts_expr() {
                items.push(self.star_expr()?);
            } else {
                break;
            }
        }
        Ok(Expr::Tuple(items))
    }

    fn starts_expr(&self) -> bool {
        !matches!(
            self.peek(),
            Tok::Newline
                | Tok::Semi
                | Tok::Eof
                | Tok::Assign
                | Tok::AugAssign(_)
                | Tok::RParen
                | Tok::RBracket
                | Tok::RBrace
                | Tok::Colon
                | Tok::Kw(Keyword::In)
                | Tok::Kw(Keyword::For)
        )
    }

    /// An expression, or `*expr` where unpacking is allowed.
    fn star_expr(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Tok::Star) {
            let inner = self.bit_or()?;
            return Ok(Expr::Starred(Box::new(inner)));
        }
        self.expr()
    }

    /// Conditional expression or lambda.
    fn expr(&mut self) -> Result<Expr, EvalError> {
        if self.at_kw(Keyword::Lambda) {
            return self.lambda();
        }
        let body = self.or_test()?;
        if !self.at_kw(Keyword::If) {
            return Ok(body);
        }
        self.advance();
        let cond = self.or_test()?;
        if !self.eat_kw(Keyword::Else) {
            return Err(self.error("expected 'else' in conditional expression"));
        }
        let otherwise = self.nested(|p| p.expr())?;
        Ok(Expr::IfElse {
            cond: Box::new(cond),
            then: Box::new(body),
            otherwise: Box::new(otherwise),
        })
    }

    fn lambda(&mut self) -> Result<Expr, EvalError> {
        let line = self.line();
        self.advance();
        let (params, vararg) = self.params(&Tok::Colon, false)?;
        self.expect(&Tok::Colon, "':'")?;
        let body = self.nested(|p| p.expr())?;
        Ok(Expr::Lambda(Rc::new(FuncDef {
            name: "<lambda>".into(),
            params,
            vararg,
            body: vec![Line {
                stmt: Stmt::Return(Some(body)),
                line,
            }],
        })))
    }

    fn or_test(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.and_test()?;
        while self.eat_kw(Keyword::Or) {
            let right = self.and_test()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.not_test()?;
        while self.eat_kw(Keyword::And) {
            let right = self.not_test()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, EvalError> {
        if self.eat_kw(Keyword::Not) {
            let operand = self.nested(|p| p.not_test())?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.comparison()
    }

    fn comp_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek() {
            Tok::Eq => CmpOp::Eq,
            Tok::Ne => CmpOp::Ne,
            Tok::Lt => CmpOp::Lt,
            Tok::Le => CmpOp::Le,
            Tok::Gt => CmpOp::Gt,
            Tok::Ge => CmpOp::Ge,
            Tok::Kw(Keyword::In) => CmpOp::In,
            Tok::Kw(Keyword::Not) if matches!(self.peek_next(), Tok::Kw(Keyword::In)) => {
                self.advance();
                CmpOp::NotIn
            }
            Tok::Kw(Keyword::Is) => {
                if matches!(self.peek_next(), Tok::Kw(Keyword::Not)) {
                    self.advance();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn comparison(&mut self) -> Result<Expr, EvalError> {
        let first = self.bit_or()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comp_op() {
            rest.push((op, self.bit_or()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    /// One left-associative binary level: `next (op next)*`.
    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, EvalError>,
        op_of: fn(&Tok) -> Option<BinOp>,
    ) -> Result<Expr, EvalError> {
        let mut left = next(self)?;
        while let Some(op) = op_of(self.peek()) {
            self.advance();
            let right = next(self)?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn bit_or(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(Self::bit_xor, |t| (*t == Tok::Pipe).then_some(BinOp::BitOr))
    }

    fn bit_xor(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(Self::bit_and, |t| (*t == Tok::Caret).then_some(BinOp::BitXor))
    }

    fn bit_and(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(Self::shift, |t| (*t == Tok::Amp).then_some(BinOp::BitAnd))
    }

    fn shift(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(Self::arith, |t| match t {
            Tok::LShift => Some(BinOp::LShift),
            Tok::RShift => Some(BinOp::RShift),
            _ => None,
        })
    }

    fn arith(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(Self::term, |t| match t {
            Tok::Plus => Some(BinOp::Add),
            Tok::Minus => Some(BinOp::Sub),
            _ => None,
        })
    }

    fn term(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(Self::factor, |t| match t {
            Tok::Star => Some(BinOp::Mul),
            Tok::Slash => Some(BinOp::Div),
            Tok::DoubleSlash => Some(BinOp::FloorDiv),
            Tok::Percent => Some(BinOp::Mod),
            _ => None,
        })
    }

    fn factor(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            Tok::Minus => UnaryOp::Neg,
            Tok::Plus => UnaryOp::Pos,
            Tok::Tilde => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.nested(|p| p.factor())?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    /// `**` binds tighter than a unary operator on its left and is
    /// right-associative.
    fn power(&mut self) -> Result<Expr, EvalError> {
        let base = self.postfix()?;
        if self.eat(&Tok::DoubleStar) {
            let exp = self.nested(|p| p.factor())?;
            return Ok(Expr::Binary(Box::new(base), BinOp::Pow, Box::new(exp)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Tok::LParen => {
                    self.advance();
                    let (args, kwargs) = self.nested(|p| p.call_args())?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Tok::LBracket => {
                    self.advance();
                    expr = self.nested(|p| p.subscript(expr))?;
                }
                Tok::Dot => {
                    self.advance();
                    let attr = self.name("attribute name")?;
                    expr = Expr::Attr(Box::new(expr), attr);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), EvalError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.at(&Tok::RParen) {
            if let (Tok::Name(name), Tok::Assign) = (self.peek(), self.peek_next()) {
                let name = name.clone();
                self.advance();
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(format!("keyword argument repeated: {name}")));
                }
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                if self.at(&Tok::DoubleStar) {
                    return Err(self.error("'**' arguments are not supported"));
                }
                let arg = self.star_expr()?;
                if self.at_kw(Keyword::For) {
                    let clauses = self.comp_clauses()?;
                    args.push(Expr::Comp {
                        kind: CompKind::List,
                        elt: Box::new(arg),
                        clauses,
                    });
                } else {
                    args.push(arg);
                }
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self, target: Expr) -> Result<Expr, EvalError> {
        let lower = if self.at(&Tok::Colon) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        if !self.eat(&Tok::Colon) {
            let mut index = *lower.ok_or_else(|| self.error("empty subscript"))?;
            if self.at(&Tok::Comma) {
                let mut items = vec![index];
                while self.eat(&Tok::Comma) && !self.at(&Tok::RBracket) {
                    items.push(self.expr()?);
                }
                index = Expr::Tuple(items);
            }
            self.expect(&Tok::RBracket, "']'")?;
            return Ok(Expr::Index(Box::new(target), Box::new(index)));
        }
        let upper = if matches!(self.peek(), Tok::Colon | Tok::RBracket) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        let step = if self.eat(&Tok::Colon) && !self.at(&Tok::RBracket) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        self.expect(&Tok::RBracket, "']'")?;
        Ok(Expr::Slice {
            target: Box::new(target),
            lower,
            upper,
            step,
        })
    }

    fn comp_target(&mut self) -> Result<Target, EvalError> {
        let mut items = vec![self.comp_target_atom()?];
        while self.eat(&Tok::Comma) {
            if self.at_kw(Keyword::In) {
                break;
            }
            items.push(self.comp_target_atom()?);
        }
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(Target::Tuple(items))
        }
    }

    fn comp_target_atom(&mut self) -> Result<Target, EvalError> {
        if self.eat(&Tok::LParen) {
            let inner = self.nested(|p| p.comp_target())?;
            self.expect(&Tok::RParen, "')'")?;
            return Ok(inner);
        }
        if self.eat(&Tok::LBracket) {
            let inner = self.nested(|p| p.comp_target())?;
            self.expect(&Tok::RBracket, "']'")?;
            return Ok(match inner {
                Target::Tuple(items) => Target::Tuple(items),
                single => Target::Tuple(vec![single]),
            });
        }
        if self.eat(&Tok::Star) {
            return Ok(Target::Starred(Box::new(Target::Name(self.name("loop variable")?))));
        }
        Ok(Target::Name(self.name("loop variable")?))
    }

    fn comp_clauses(&mut self) -> Result<Vec<CompClause>, EvalError> {
        let mut clauses = Vec::new();
        while self.eat_kw(Keyword::For) {
            let target = self.comp_target()?;
            if !self.eat_kw(Keyword::In) {
                return Err(self.error("expected 'in' in comprehension"));
            }
            let iter = self.or_test()?;
            let mut conds = Vec::new();
            while self.eat_kw(Keyword::If) {
                conds.push(self.or_test()?);
            }
            clauses.push(CompClause {
                target,
                iter,
                conds,
            });
        }
        Ok(clauses)
    }

    fn atom(&mut self) -> Result<Expr, EvalError> {
        let line = self.line();
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Const(Value::Int(i))),
            Tok::BigInt(b) => Ok(Expr::Const(Value::BigInt(Rc::new(b)))),
            Tok::Float(f) => Ok(Expr::Const(Value::Float(f))),
            Tok::Str(s) => self.string_tail(vec![FSeg::Lit(s)]),
            Tok::FStr(parts) => {
                let segs = fstring_segments(parts, line)?;
                self.string_tail(segs)
            }
            Tok::Name(n) => Ok(Expr::Name(n)),
            Tok::Kw(Keyword::True) => Ok(Expr::Const(Value::Bool(true))),
            Tok::Kw(Keyword::False) => Ok(Expr::Const(Value::Bool(false))),
            Tok::Kw(Keyword::None) => Ok(Expr::Const(Value::None)),
            Tok::LParen => self.nested(|p| p.paren_display()),
            Tok::LBracket => self.nested(|p| p.list_display()),
            Tok::LBrace => self.nested(|p| p.brace_display()),
            Tok::Kw(Keyword::Unsupported(word)) => Err(EvalError::Syntax {
                line,
                message: format!("'{word}' is not supported"),
            }),
            Tok::Eof | Tok::Newline => Err(EvalError::Syntax {
                line,
                message: "unexpected end of input".into(),
            }),
            _ => Err(EvalError::Syntax {
                line,
                message: "invalid syntax".into(),
            }),
        }
    }

    /// Items after the first of a comma-separated display, up to `close`.
    fn display_items(&mut self, first: Expr, close: &Tok, what: &str) -> Result<Vec<Expr>, EvalError> {
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.at(close) {
                break;
            }
            items.push(self.star_expr()?);
        }
        self.expect(close, what)?;
        Ok(items)
    }

    fn paren_display(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Tok::RParen) {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.star_expr()?;
        if self.at_kw(Keyword::For) {
            let clauses = self.comp_clauses()?;
            self.expect(&Tok::RParen, "')'")?;
            return Ok(Expr::Comp {
                kind: CompKind::List,
                elt: Box::new(first),
                clauses,
            });
        }
        if !matches!(first, Expr::Starred(_)) && self.eat(&Tok::RParen) {
            return Ok(first);
        }
        Ok(Expr::Tuple(self.display_items(first, &Tok::RParen, "')'")?))
    }

    fn list_display(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Tok::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.star_expr()?;
        if self.at_kw(Keyword::For) {
            let clauses = self.comp_clauses()?;
            self.expect(&Tok::RBracket, "']'")?;
            return Ok(Expr::Comp {
                kind: CompKind::List,
                elt: Box::new(first),
                clauses,
            });
        }
        Ok(Expr::List(self.display_items(first, &Tok::RBracket, "']'")?))
    }

    /// `{}`, `{k: v, ...}`, `{a, b}` and their comprehensions.
    fn brace_display(&mut self) -> Result<Expr, EvalError> {
        if self.eat(&Tok::RBrace) {
            return Ok(Expr::Dict(Vec::new()));
        }
        if self.at(&Tok::DoubleStar) {
            return Err(self.error("'**' unpacking is not supported"));
        }
        let first = self.star_expr()?;
        if !self.eat(&Tok::Colon) {
            if self.at_kw(Keyword::For) {
                let clauses = self.comp_clauses()?;
                self.expect(&Tok::RBrace, "'}'")?;
                return Ok(Expr::Comp {
                    kind: CompKind::Set,
                    elt: Box::new(first),
                    clauses,
                });
            }
            return Ok(Expr::Set(self.display_items(first, &Tok::RBrace, "'}'")?));
        }

        let value = self.expr()?;
        if self.at_kw(Keyword::For) {
            let clauses = self.comp_clauses()?;
            self.expect(&Tok::RBrace, "'}'")?;
            return Ok(Expr::Comp {
                kind: CompKind::Dict(Box::new(value)),
                elt: Box::new(first),
                clauses,
            });
        }
        let mut entries = vec![(first, value)];
        while self.eat(&Tok::Comma) {
            if self.at(&Tok::RBrace) {
                break;
            }
            let key = self.expr()?;
            self.expect(&Tok::Colon, "':'")?;
            entries.push((key, self.expr()?));
        }
        self.expect(&Tok::RBrace, "'}'")?;
        Ok(Expr::Dict(entries))
    }

    /// Adjacent string literals concatenate.
    fn string_tail(&mut self, mut segs: Vec<FSeg>) -> Result<Expr, EvalError> {
        loop {
            let line = self.line();
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.advance();
                    segs.push(FSeg::Lit(s));
                }
                Tok::FStr(parts) => {
                    self.advance();
                    segs.extend(fstring_segments(parts, line)?);
                }
                _ => break,
            }
        }
        if segs.iter().all(|s| matches!(s, FSeg::Lit(_))) {
            let text: String = segs
                .into_iter()
                .map(|s| match s {
                    FSeg::Lit(t) => t,
                    FSeg::Field { .. } => String::new(),
                })
                .collect();
            return Ok(Expr::Const(Value::str(text)));
        }
        Ok(Expr::FString(segs))
    }
}

fn fstring_segments(parts: Vec<FPart>, line: usize) -> Result<Vec<FSeg>, EvalError> {
    parts
        .into_iter()
        .map(|part| match part {
            FPart::Lit(s) => Ok(FSeg::Lit(s)),
            FPart::Expr {
                src,
                conversion,
                spec,
            } => Ok(FSeg::Field {
                expr: Box::new(parse_field(&src, line)?),
                conversion,
                spec,
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        match parse_program(src).unwrap().remove(0).stmt {
            Stmt::Expr(e) => e,
            other => panic!("expected expression, got {other:?}"),
        }
    }

    fn int(i: i64) -> Box<Expr> {
        Box::new(Expr::Const(Value::Int(i)))
    }

    fn syntax_message(src: &str) -> String {
        match parse_program(src).unwrap_err() {
            EvalError::Syntax { message, .. } => message,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            expr("1 + 2 * 3"),
            Expr::Binary(
                int(1),
                BinOp::Add,
                Box::new(Expr::Binary(int(2), BinOp::Mul, int(3)))
            )
        );
    }

    #[test]
    fn test_bitwise_precedence() {
        assert_eq!(
            expr("1 | 2 & 3 << 1"),
            Expr::Binary(
                int(1),
                BinOp::BitOr,
                Box::new(Expr::Binary(
                    int(2),
                    BinOp::BitAnd,
                    Box::new(Expr::Binary(int(3), BinOp::LShift, int(1)))
                ))
            )
        );
    }

    #[test]
    fn test_unary_minus_binds_looser_than_power() {
        assert_eq!(
            expr("-2 ** 2"),
            Expr::Unary(
                UnaryOp::Neg,
                Box::new(Expr::Binary(int(2), BinOp::Pow, int(2)))
            )
        );
    }

    #[test]
    fn test_power_is_right_associative() {
        assert_eq!(
            expr("2 ** 3 ** 2"),
            Expr::Binary(
                int(2),
                BinOp::Pow,
                Box::new(Expr::Binary(int(3), BinOp::Pow, int(2)))
            )
        );
    }

    #[test]
    fn test_assignment_forms() {
        let lines = parse_program("a, b = 1, 2\nx = y = 3\nx += 1\nd['k'] -= 2\nfirst, *rest = xs").unwrap();
        assert_eq!(lines.len(), 5);
        assert!(matches!(&lines[0].stmt, Stmt::Assign(t, Expr::Tuple(_)) if matches!(t[0], Target::Tuple(_))));
        assert!(matches!(&lines[1].stmt, Stmt::Assign(t, _) if t.len() == 2));
        assert!(matches!(&lines[2].stmt, Stmt::AugAssign(Target::Name(n), BinOp::Add, _) if n == "x"));
        assert!(matches!(&lines[3].stmt, Stmt::AugAssign(Target::Index(..), BinOp::Sub, _)));
        let Stmt::Assign(targets, _) = &lines[4].stmt else {
            panic!("expected assignment");
        };
        assert!(matches!(&targets[0], Target::Tuple(t) if matches!(t[1], Target::Starred(_))));
        assert_eq!(lines[2].line, 3);
    }

    #[test]
    fn test_item_and_slice_targets() {
        let lines = parse_program("x[0] = 5\ngrid[1][2] = 0\nxs[1:3] = []").unwrap();
        assert!(matches!(&lines[0].stmt, Stmt::Assign(t, _) if matches!(t[0], Target::Index(..))));
        assert!(matches!(&lines[1].stmt, Stmt::Assign(t, _) if matches!(t[0], Target::Index(..))));
        assert!(matches!(&lines[2].stmt, Stmt::Assign(t, _) if matches!(t[0], Target::Slice { .. })));
        assert_eq!(syntax_message("x.y = 1"), "attribute assignment is not supported");
        assert_eq!(syntax_message("f() = 1"), "cannot assign to expression");
    }

    #[test]
    fn test_comprehension_and_generator_argument() {
        assert!(matches!(expr("[x * 2 for x in range(3) if x]"), Expr::Comp { kind: CompKind::List, .. }));
        let Expr::Call { args, .. } = expr("sum(int(d) for d in str(n))") else {
            panic!("expected call");
        };
        assert!(matches!(args[0], Expr::Comp { .. }));
    }

    #[test]
    fn test_dict_and_set_displays() {
        assert!(matches!(expr("{}"), Expr::Dict(e) if e.is_empty()));
        assert!(matches!(expr("{'a': 1, 'b': 2,}"), Expr::Dict(e) if e.len() == 2));
        assert!(matches!(expr("{1, 2, 3}"), Expr::Set(e) if e.len() == 3));
        assert!(matches!(expr("{k: v for k, v in items}"), Expr::Comp { kind: CompKind::Dict(_), .. }));
        assert!(matches!(expr("{c for c in s}"), Expr::Comp { kind: CompKind::Set, .. }));
        assert!(parse_program("{'a': 1, 'b'}").is_err());
    }

    #[test]
    fn test_keyword_and_starred_arguments() {
        let Expr::Call { args, kwargs, .. } = expr("print(1, *rest, sep='-')") else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 2);
        assert!(matches!(args[1], Expr::Starred(_)));
        assert_eq!(kwargs[0].0, "sep");
        assert!(parse_program("f(a=1, a=2)").is_err());
    }

    #[test]
    fn test_slices() {
        assert!(matches!(expr("s[::-1]"), Expr::Slice { lower: None, upper: None, step: Some(_), .. }));
        assert!(matches!(expr("s[1:]"), Expr::Slice { lower: Some(_), upper: None, step: None, .. }));
        assert!(matches!(expr("s[0]"), Expr::Index(..)));
        assert!(matches!(expr("d[1, 2]"), Expr::Index(_, i) if matches!(*i, Expr::Tuple(_))));
    }

    #[test]
    fn test_chained_comparison_and_membership() {
        let Expr::Compare(_, rest) = expr("1 < x not in y") else {
            panic!("expected comparison");
        };
        assert_eq!(rest[0].0, CmpOp::Lt);
        assert_eq!(rest[1].0, CmpOp::NotIn);
    }

    #[test]
    fn test_import_statements() {
        let lines = parse_program("import math\nimport math as m\nfrom math import sqrt, pi as PI\nfrom math import *").unwrap();
        assert_eq!(lines[0].stmt, Stmt::Import(vec![("math".into(), "math".into())]));
        assert_eq!(lines[1].stmt, Stmt::Import(vec![("math".into(), "m".into())]));
        assert_eq!(
            lines[2].stmt,
            Stmt::FromImport(
                "math".into(),
                vec![("sqrt".into(), "sqrt".into()), ("pi".into(), "PI".into())]
            )
        );
        assert_eq!(lines[3].stmt, Stmt::FromImport("math".into(), Vec::new()));
    }

    #[test]
    fn test_block_statements() {
        let src = "x = 1\nfor i in range(3):\n    if i % 2:\n        continue\n    elif i:\n        break\n    else:\n        pass\nelse:\n    x = 2\nwhile x: x -= 1; print(x)\n";
        let lines = parse_program(src).unwrap();
        assert_eq!(lines.len(), 3);
        let Stmt::For { body, orelse, .. } = &lines[1].stmt else {
            panic!("expected for");
        };
        assert_eq!(orelse.len(), 1);
        let Stmt::If(branches, otherwise) = &body[0].stmt else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].1[0].stmt, Stmt::Continue);
        assert_eq!(branches[1].1[0].line, 6);
        assert_eq!(otherwise[0].stmt, Stmt::Pass);
        assert!(matches!(&lines[2].stmt, Stmt::While { body, .. } if body.len() == 2));
    }

    #[test]
    fn test_function_definitions() {
        let src = "def area(w: float, h=2, *more) -> float:\n    return w * h\nsq = lambda x, y=1: x * y";
        let lines = parse_program(src).unwrap();
        let Stmt::Def(def) = &lines[0].stmt else {
            panic!("expected def");
        };
        assert_eq!(def.name, "area");
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].default.is_some());
        assert_eq!(def.vararg.as_deref(), Some("more"));
        assert!(matches!(def.body[0].stmt, Stmt::Return(Some(_))));

        let Stmt::Assign(_, Expr::Lambda(lambda)) = &lines[1].stmt else {
            panic!("expected lambda");
        };
        assert_eq!(lambda.params.len(), 2);
        assert_eq!(syntax_message("def f(a=1, b): pass"), "non-default argument follows default argument");
    }

    #[test]
    fn test_block_errors() {
        assert_eq!(syntax_message("if x:\nprint(1)"), "expected an indented block");
        assert_eq!(syntax_message("x = 1\n    y = 2"), "unexpected indent");
        assert!(parse_program("else:\n    pass").is_err());
        assert!(parse_program("if x: for y in z: pass").is_err());
    }

    /// Debug builds need more than the default test thread stack to reach
    /// the nesting limit.
    fn on_large_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(64 << 20)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_nesting_limit() {
        on_large_stack(|| {
            let deep = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
            assert_eq!(syntax_message(&deep), "too many nested parentheses");

            let minus = format!("print({}1)", "-".repeat(19_000));
            assert_eq!(syntax_message(&minus), "too many nested parentheses");

            let lists = format!("{}{}", "[".repeat(500), "]".repeat(500));
            assert_eq!(syntax_message(&lists), "too many nested parentheses");

            let ok = format!("{}1{}", "(".repeat(MAX_NESTING - 1), ")".repeat(MAX_NESTING - 1));
            assert!(parse_program(&ok).is_ok());
        });
    }

    #[test]
    fn test_invalid_syntax_reports_line() {
        let err = parse_program("x = 1\ny = (2 +\n").unwrap_err();
        assert!(matches!(err, EvalError::Syntax { .. }));
        assert!(parse_program("1 +* 2").is_err());
        assert!(matches!(
            parse_program("x = 1\nclass A: pass").unwrap_err(),
            EvalError::Syntax { line: 2, .. }
        ));
    }

    #[test]
    fn test_fstring_fields_are_parsed() {
        let Expr::FString(segs) = expr("f'{a + 1:.2f}!'") else {
            panic!("expected f-string");
        };
        assert!(matches!(&segs[0], FSeg::Field { spec, .. } if spec == ".2f"));
        assert_eq!(segs[1], FSeg::Lit("!".into()));
    }

    #[test]
    fn test_adjacent_strings_concatenate() {
        assert_eq!(expr("'a' 'b'"), Expr::Const(Value::str("ab")));
    }
}
