//! Tree-walking interpreter with captured stdout and resource guards.
//!
//! Every program runs under three budgets: evaluation steps, bytes
//! allocated for values, and nesting depth (user-function calls plus
//! expression recursion). Exceeding any of them fails the program with a
//! runtime error; an interrupt is polled alongside the step counter.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use num_traits::Signed;
use toolloop_core::Interrupt;

use super::arith;
use super::builtins::{import_module, module_attr, module_names};
use super::format::format_field;
use super::methods::has_method;
use super::parser::{BinOp, CompClause, CompKind, Expr, FSeg, FuncDef, Line, Stmt, Target};
use super::value::{
    check_len, compare, BoundMethod, Builtin, Func, Module, Range, Scope, Table, UserFn, Value,
    ENTRY_SIZE, VALUE_SIZE,
};
use super::EvalError;

/// Captured stdout cap, in bytes.
pub(crate) const MAX_OUTPUT_LEN: usize = 100_000;
/// Evaluation steps before a program is abandoned.
pub(crate) const MAX_OPS: u64 = 5_000_000;
/// Bytes of values a program may allocate.
pub(crate) const MAX_ALLOC: usize = 256 << 20;
const MAX_CALL_DEPTH: usize = 1000;
const MAX_EVAL_DEPTH: usize = 8000;
const INTERRUPT_POLL: u64 = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Limits {
    pub max_ops: u64,
    pub max_alloc: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_ops: MAX_OPS,
            max_alloc: MAX_ALLOC,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Fault {
    /// `line` is filled in by the innermost statement that saw the error.
    Error { message: String, line: Option<usize> },
    Interrupted,
}

impl Fault {
    fn at(self, line: usize) -> Fault {
        match self {
            Fault::Error {
                message,
                line: None,
            } => Fault::Error {
                message,
                line: Some(line),
            },
            other => other,
        }
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Fault::Error {
            message,
            line: None,
        }
    }
}

pub(crate) type Eval<T> = Result<T, Fault>;

pub(crate) fn fail<T>(message: impl Into<String>) -> Eval<T> {
    Err(Fault::from(message.into()))
}

fn recursion_error() -> String {
    "maximum recursion depth exceeded".to_string()
}

/// How a statement finished.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Name resolution context of the running code.
#[derive(Default)]
struct Frame {
    /// Scopes of enclosing functions and comprehensions, outermost first.
    env: Vec<Scope>,
    /// `None` at module level, where names live in the globals.
    locals: Option<Scope>,
    global_names: HashSet<String>,
    /// Active comprehension scopes, innermost last.
    comps: Vec<Scope>,
}

enum Collected {
    Items(Vec<Value>),
    Table(Table),
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct SliceBounds {
    pub lower: Option<i64>,
    pub upper: Option<i64>,
    pub step: Option<i64>,
}

pub(crate) struct Interpreter<'a> {
    globals: Scope,
    frame: Frame,
    calls: usize,
    depth: usize,
    output: String,
    ops: u64,
    allocated: usize,
    limits: Limits,
    interrupt: &'a Interrupt,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(interrupt: &'a Interrupt) -> Self {
        Self::with_limits(interrupt, Limits::default())
    }

    pub(crate) fn with_limits(interrupt: &'a Interrupt, limits: Limits) -> Self {
        let globals = Scope::default();
        globals
            .borrow_mut()
            .insert("math".to_string(), Value::Module(Module::Math));
        Self {
            globals,
            frame: Frame::default(),
            calls: 0,
            depth: 0,
            output: String::new(),
            ops: 0,
            allocated: 0,
            limits,
            interrupt,
        }
    }

    /// Execute a program and return everything it printed.
    pub(crate) fn run(mut self, program: &[Line]) -> Result<String, EvalError> {
        for line in program {
            let flow = self.exec_line(line).map_err(|fault| match fault {
                Fault::Error { message, line: at } => EvalError::Runtime {
                    line: at.unwrap_or(line.line),
                    message,
                },
                Fault::Interrupted => EvalError::Interrupted,
            })?;
            let stray = match flow {
                Flow::Normal => continue,
                Flow::Break => "'break' outside loop",
                Flow::Continue => "'continue' not properly in loop",
                Flow::Return(_) => "'return' outside function",
            };
            return Err(EvalError::Runtime {
                line: line.line,
                message: stray.to_string(),
            });
        }
        Ok(self.output)
    }

    // ── Budgets ──

    fn poll(&self) -> Eval<()> {
        if self.interrupt.is_triggered() {
            return Err(Fault::Interrupted);
        }
        Ok(())
    }

    fn tick(&mut self) -> Eval<()> {
        self.charge_ops(1)
    }

    /// Count `n` evaluation steps, polling the interrupt every
    /// [`INTERRUPT_POLL`] steps.
    pub(super) fn charge_ops(&mut self, n: u64) -> Eval<()> {
        let before = self.ops;
        self.ops = self.ops.saturating_add(n);
        if self.ops > self.limits.max_ops {
            return fail(format!(
                "evaluation step limit exceeded ({} operations)",
                self.limits.max_ops
            ));
        }
        if before / INTERRUPT_POLL != self.ops / INTERRUPT_POLL {
            self.poll()?;
        }
        Ok(())
    }

    /// Fail unless `bytes` more fit in the allocation budget.
    pub(super) fn reserve(&self, bytes: usize) -> Eval<()> {
        if self.allocated.saturating_add(bytes) > self.limits.max_alloc {
            return fail(format!(
                "memory limit exceeded ({} bytes)",
                self.limits.max_alloc
            ));
        }
        Ok(())
    }

    pub(super) fn charge(&mut self, bytes: usize) -> Eval<()> {
        self.reserve(bytes)?;
        self.allocated += bytes;
        Ok(())
    }

    /// Return the bytes of a value that is about to be dropped.
    pub(super) fn credit(&mut self, released: &Value) {
        self.allocated = self.allocated.saturating_sub(released.fresh_size());
    }

    /// Charge a newly built value.
    pub(super) fn fresh(&mut self, v: Value) -> Eval<Value> {
        self.charge(v.fresh_size())?;
        Ok(v)
    }

    /// Check that materialising the elements of `v` fits both the length
    /// cap and the allocation budget.
    pub(super) fn reserve_items(&self, v: &Value) -> Eval<()> {
        if let Some(n) = v.len() {
            check_len(n)?;
            self.reserve(n.saturating_mul(VALUE_SIZE))?;
        }
        Ok(())
    }

    pub(super) fn collect_items(&self, v: &Value) -> Eval<Vec<Value>> {
        self.reserve_items(v)?;
        Ok(v.iterate()?)
    }

    pub(super) fn write(&mut self, text: &str) -> Eval<()> {
        if self.output.len() + text.len() > MAX_OUTPUT_LEN {
            return fail(format!("output limit exceeded ({MAX_OUTPUT_LEN} bytes)"));
        }
        self.output.push_str(text);
        Ok(())
    }

    // ── Names ──

    fn find_name(&self, name: &str) -> Option<Value> {
        let get = |scope: &Scope| scope.borrow().get(name).cloned();
        let frame = &self.frame;
        for scope in frame.comps.iter().rev() {
            if let Some(v) = get(scope) {
                return Some(v);
            }
        }
        if !frame.global_names.contains(name) {
            if let Some(v) = frame.locals.as_ref().and_then(|s| get(s)) {
                return Some(v);
            }
            for scope in frame.env.iter().rev() {
                if let Some(v) = get(scope) {
                    return Some(v);
                }
            }
        }
        get(&self.globals)
    }

    fn lookup(&self, name: &str) -> Eval<Value> {
        if let Some(v) = self.find_name(name) {
            return Ok(v);
        }
        match Builtin::from_name(name) {
            Some(b) => Ok(Value::Func(Func::Builtin(b))),
            None => fail(format!("name '{name}' is not defined")),
        }
    }

    fn target_scope(&self, name: &str) -> Scope {
        let frame = &self.frame;
        if let Some(scope) = frame.comps.last() {
            return Rc::clone(scope);
        }
        match &frame.locals {
            Some(locals) if !frame.global_names.contains(name) => Rc::clone(locals),
            _ => Rc::clone(&self.globals),
        }
    }

    fn set_name(&mut self, name: &str, value: Value) {
        let scope = self.target_scope(name);
        let old = scope.borrow_mut().insert(name.to_string(), value);
        if let Some(old) = old {
            self.credit(&old);
        }
    }

    fn delete_name(&mut self, name: &str) -> Eval<()> {
        let scope = self.target_scope(name);
        let old = scope.borrow_mut().remove(name);
        match old {
            Some(old) => {
                self.credit(&old);
                Ok(())
            }
            None => fail(format!("name '{name}' is not defined")),
        }
    }

    /// Scopes a function defined here closes over.
    fn closure_env(&self) -> Vec<Scope> {
        let frame = &self.frame;
        let mut env = frame.env.clone();
        env.extend(frame.locals.iter().cloned());
        env.extend(frame.comps.iter().cloned());
        env
    }

    // ── Statements ──

    fn exec_line(&mut self, line: &Line) -> Eval<Flow> {
        self.poll()?;
        self.exec(&line.stmt).map_err(|fault| fault.at(line.line))
    }

    fn exec_block(&mut self, lines: &[Line]) -> Eval<Flow> {
        for line in lines {
            let flow = self.exec_line(line)?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Eval<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Assign(targets, expr) => {
                let value = self.eval(expr)?;
                if let [target] = targets.as_slice() {
                    self.bind(target, value)?;
                } else {
                    for target in targets {
                        self.bind(target, value.clone())?;
                    }
                }
            }
            Stmt::AugAssign(target, op, expr) => self.aug_assign(target, *op, expr)?,
            Stmt::Import(modules) => {
                for (module, bound) in modules {
                    let m = import_module(module)?;
                    self.set_name(bound, Value::Module(m));
                }
            }
            Stmt::FromImport(module, names) => {
                let m = import_module(module)?;
                if names.is_empty() {
                    for name in module_names(m) {
                        let v = module_attr(m, name)?;
                        self.set_name(name, v);
                    }
                }
                for (name, bound) in names {
                    let v = module_attr(m, name)
                        .map_err(|_| format!("cannot import name '{name}' from '{module}'"))?;
                    self.set_name(bound, v);
                }
            }
            Stmt::If(branches, otherwise) => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(otherwise);
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
            } => return self.exec_for(target, iter, body, orelse),
            Stmt::While { cond, body, orelse } => {
                while self.eval(cond)?.truthy() {
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse);
            }
            Stmt::Def(def) => {
                let f = self.make_function(def)?;
                self.set_name(&def.name, f);
            }
            Stmt::Return(expr) => {
                let v = match expr {
                    Some(e) => self.eval(e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(v));
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Pass => {}
            Stmt::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            Stmt::Global(names) => {
                if self.frame.locals.is_some() {
                    self.frame.global_names.extend(names.iter().cloned());
                }
            }
            Stmt::Assert(cond, message) => {
                if !self.eval(cond)?.truthy() {
                    let message = match message {
                        Some(m) => format!("AssertionError: {}", self.eval(m)?.to_str()?),
                        None => "AssertionError".to_string(),
                    };
                    return fail(message);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for(&mut self, target: &Target, iter: &Expr, body: &[Line], orelse: &[Line]) -> Eval<Flow> {
        let items = self.eval(iter)?.items()?;
        for item in items {
            self.tick()?;
            self.bind(target, item)?;
            match self.exec_block(body)? {
                Flow::Break => return Ok(Flow::Normal),
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        self.exec_block(orelse)
    }

    fn make_function(&mut self, def: &Rc<FuncDef>) -> Eval<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(e) => Some(self.eval(e)?),
                None => None,
            });
        }
        Ok(Value::Func(Func::User(Rc::new(UserFn {
            def: Rc::clone(def),
            defaults,
            env: self.closure_env(),
        }))))
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, expr: &Expr) -> Eval<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(expr)?;
                if self.update_in_place(op, &current, &rhs)? {
                    return Ok(());
                }
                let updated = self.binary(op, &current, &rhs)?;
                drop(current);
                self.set_name(name, updated);
                Ok(())
            }
            Target::Index(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                let current = index_value(&obj, &index)?;
                let rhs = self.eval(expr)?;
                if self.update_in_place(op, &current, &rhs)? {
                    return Ok(());
                }
                let updated = self.binary(op, &current, &rhs)?;
                drop(current);
                self.set_item(&obj, index, updated)
            }
            _ => fail("illegal expression for augmented assignment"),
        }
    }

    /// Mutating forms of `+=`, `*=` and `|=` on lists, dicts and sets.
    fn update_in_place(&mut self, op: BinOp, current: &Value, rhs: &Value) -> Eval<bool> {
        match (op, current, rhs) {
            (BinOp::Add, Value::List(list), _) => {
                let items = self.collect_items(rhs)?;
                self.charge(items.len() * VALUE_SIZE)?;
                list.items_mut()?.extend(items);
                Ok(true)
            }
            (BinOp::Mul, Value::List(list), n) if n.is_int() => {
                let repeated = self.binary(op, current, n)?;
                if let Value::List(new) = &repeated {
                    let items = new.snapshot();
                    let old = std::mem::replace(&mut *list.items_mut()?, items);
                    drop(old);
                }
                Ok(true)
            }
            (BinOp::BitOr, Value::Dict(d), Value::Dict(_)) => {
                self.update_dict(d, rhs)?;
                Ok(true)
            }
            (
                BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor,
                Value::Set(s),
                Value::Set(other),
            ) => {
                let result = arith::set_binary(op, &s.table(), &other.table())?;
                self.charge(result.len().saturating_sub(s.len()) * ENTRY_SIZE)?;
                let old = std::mem::replace(&mut *s.table_mut()?, result);
                drop(old);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn bind(&mut self, target: &Target, value: Value) -> Eval<()> {
        match target {
            Target::Name(name) => {
                self.set_name(name, value);
                Ok(())
            }
            Target::Tuple(targets) => self.unpack(targets, value),
            Target::Starred(_) => fail("starred assignment target must be in a list or tuple"),
            Target::Index(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                self.set_item(&obj, index, value)
            }
            Target::Slice {
                target,
                lower,
                upper,
                step,
            } => {
                let obj = self.eval(target)?;
                let bounds = self.slice_bounds(lower.as_deref(), upper.as_deref(), step.as_deref())?;
                self.set_slice(&obj, bounds, value)
            }
        }
    }

    fn unpack(&mut self, targets: &[Target], value: Value) -> Eval<()> {
        let mut items = self.collect_items(&value)?;
        drop(value);
        let n = targets.len();
        let Some(star) = targets.iter().position(|t| matches!(t, Target::Starred(_))) else {
            if items.len() < n {
                return fail(format!(
                    "not enough values to unpack (expected {n}, got {})",
                    items.len()
                ));
            }
            if items.len() > n {
                return fail(format!("too many values to unpack (expected {n})"));
            }
            for (target, item) in targets.iter().zip(items) {
                self.bind(target, item)?;
            }
            return Ok(());
        };
        if items.len() < n - 1 {
            return fail(format!(
                "not enough values to unpack (expected at least {}, got {})",
                n - 1,
                items.len()
            ));
        }
        let tail = items.split_off(items.len() - (n - star - 1));
        let middle = items.split_off(star);
        for (target, item) in targets[..star].iter().zip(items) {
            self.bind(target, item)?;
        }
        if let Target::Starred(inner) = &targets[star] {
            self.charge(middle.len() * VALUE_SIZE)?;
            self.bind(inner, Value::list(middle))?;
        }
        for (target, item) in targets[star + 1..].iter().zip(tail) {
            self.bind(target, item)?;
        }
        Ok(())
    }

    pub(super) fn set_item(&mut self, obj: &Value, index: Value, value: Value) -> Eval<()> {
        match obj {
            Value::List(list) => {
                let mut items = list.items_mut()?;
                let i = normalize_index(&index, items.len(), "list", "list assignment")?;
                let old = std::mem::replace(&mut items[i], value);
                drop(items);
                self.credit(&old);
                Ok(())
            }
            Value::Dict(d) => {
                let new = d.table_mut()?.insert(index, value)?;
                if new {
                    self.charge(ENTRY_SIZE)?;
                }
                Ok(())
            }
            other => fail(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            )),
        }
    }

    fn set_slice(&mut self, obj: &Value, bounds: SliceBounds, value: Value) -> Eval<()> {
        let Value::List(list) = obj else {
            return fail(format!(
                "'{}' object does not support item assignment",
                obj.type_name()
            ));
        };
        let items = self.collect_items(&value)?;
        drop(value);
        let len = list.len();
        let (start, step, count) = slice_indices(len, bounds)?;
        if step == 1 {
            self.charge(items.len().saturating_sub(count) * VALUE_SIZE)?;
            let start = start as usize;
            let removed: Vec<Value> = list.items_mut()?.splice(start..start + count, items).collect();
            drop(removed);
            return Ok(());
        }
        if items.len() != count {
            return fail(format!(
                "attempt to assign sequence of size {} to extended slice of size {count}",
                items.len()
            ));
        }
        let mut vec = list.items_mut()?;
        let mut replaced = Vec::with_capacity(count);
        for (k, item) in items.into_iter().enumerate() {
            let i = (start + k as i64 * step) as usize;
            replaced.push(std::mem::replace(&mut vec[i], item));
        }
        drop(vec);
        drop(replaced);
        Ok(())
    }

    fn delete(&mut self, target: &Target) -> Eval<()> {
        match target {
            Target::Name(name) => self.delete_name(name),
            Target::Tuple(targets) => {
                for t in targets {
                    self.delete(t)?;
                }
                Ok(())
            }
            Target::Starred(_) => fail("cannot delete starred"),
            Target::Index(obj, index) => {
                let obj = self.eval(obj)?;
                let index = self.eval(index)?;
                let removed = match &obj {
                    Value::List(list) => {
                        let mut items = list.items_mut()?;
                        let i = normalize_index(&index, items.len(), "list", "list assignment")?;
                        items.remove(i)
                    }
                    Value::Dict(d) => {
                        let removed = d.table_mut()?.remove(&index)?;
                        match removed {
                            Some((_, v)) => v,
                            None => return fail(key_error(&index)),
                        }
                    }
                    other => {
                        return fail(format!(
                            "'{}' object doesn't support item deletion",
                            other.type_name()
                        ))
                    }
                };
                self.credit(&removed);
                Ok(())
            }
            Target::Slice {
                target,
                lower,
                upper,
                step,
            } => {
                let obj = self.eval(target)?;
                let bounds = self.slice_bounds(lower.as_deref(), upper.as_deref(), step.as_deref())?;
                let Value::List(list) = &obj else {
                    return fail(format!(
                        "'{}' object doesn't support item deletion",
                        obj.type_name()
                    ));
                };
                let mut items = list.items_mut()?;
                let (start, step, count) = slice_indices(items.len(), bounds)?;
                let mut removed = Vec::with_capacity(count);
                let mut positions: Vec<usize> = (0..count)
                    .map(|k| (start + k as i64 * step) as usize)
                    .collect();
                positions.sort_unstable();
                for i in positions.into_iter().rev() {
                    removed.push(items.remove(i));
                }
                drop(items);
                Ok(())
            }
        }
    }

    // ── Expressions ──

    /// Evaluate with the step counter and expression depth guard.
    pub(super) fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        self.tick()?;
        if self.depth >= MAX_EVAL_DEPTH {
            return fail(recursion_error());
        }
        self.depth += 1;
        let result = self.eval_expr(expr);
        self.depth -= 1;
        result
    }

    fn eval_expr(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Const(v) => Ok(v.clone()),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let items = self.eval_items(items)?;
                self.fresh(Value::list(items))
            }
            Expr::Tuple(items) => {
                let items = self.eval_items(items)?;
                self.fresh(Value::tuple(items))
            }
            Expr::Set(items) => {
                let items = self.eval_items(items)?;
                self.fresh(Value::set(Table::from_keys(items)?))
            }
            Expr::Dict(pairs) => {
                let mut table = Table::default();
                for (k, v) in pairs {
                    let k = self.eval(k)?;
                    let v = self.eval(v)?;
                    table.insert(k, v)?;
                }
                self.fresh(Value::dict(table))
            }
            Expr::Starred(_) => fail("can't use starred expression here"),
            Expr::Binary(l, op, r) => {
                let l = self.eval(l)?;
                let r = self.eval(r)?;
                self.binary(*op, &l, &r)
            }
            Expr::Unary(op, operand) => {
                let v = self.eval(operand)?;
                let result = arith::unary(*op, &v)?;
                self.fresh(result)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, e) in rest {
                    let right = self.eval(e)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(a, b) => {
                let l = self.eval(a)?;
                if !l.truthy() {
                    return Ok(l);
                }
                self.eval(b)
            }
            Expr::Or(a, b) => {
                let l = self.eval(a)?;
                if l.truthy() {
                    return Ok(l);
                }
                self.eval(b)
            }
            Expr::IfElse {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::Attr(obj, name) => {
                let v = self.eval(obj)?;
                Ok(attribute(v, name)?)
            }
            Expr::Index(target, index) => {
                let t = self.eval(target)?;
                let i = self.eval(index)?;
                Ok(index_value(&t, &i)?)
            }
            Expr::Slice {
                target,
                lower,
                upper,
                step,
            } => {
                let t = self.eval(target)?;
                let bounds = self.slice_bounds(lower.as_deref(), upper.as_deref(), step.as_deref())?;
                let v = slice_value(&t, bounds)?;
                self.fresh(v)
            }
            Expr::Comp { kind, elt, clauses } => self.comprehension(kind, elt, clauses),
            Expr::FString(segs) => self.fstring(segs),
            Expr::Lambda(def) => self.make_function(def),
        }
    }

    /// `l op r`, checked against the allocation budget before building.
    pub(super) fn binary(&mut self, op: BinOp, l: &Value, r: &Value) -> Eval<Value> {
        self.reserve(arith::sequence_result_size(op, l, r))?;
        let v = arith::binary(op, l, r)?;
        self.fresh(v)
    }

    /// Evaluate display or call items, expanding `*iterable`.
    fn eval_items(&mut self, exprs: &[Expr]) -> Eval<Vec<Value>> {
        let mut out = Vec::with_capacity(exprs.len());
        for e in exprs {
            match e {
                Expr::Starred(inner) => {
                    let v = self.eval(inner)?;
                    check_len(out.len() + v.len().unwrap_or(0))?;
                    out.extend(self.collect_items(&v)?);
                }
                other => out.push(self.eval(other)?),
            }
        }
        Ok(out)
    }

    fn fstring(&mut self, segs: &[FSeg]) -> Eval<Value> {
        let mut out = String::new();
        for seg in segs {
            match seg {
                FSeg::Lit(s) => out.push_str(s),
                FSeg::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let v = self.eval(expr)?;
                    out.push_str(&format_field(&v, *conversion, spec)?);
                    check_len(out.len())?;
                }
            }
        }
        self.fresh(Value::str(out))
    }

    fn slice_bound(&mut self, expr: Option<&Expr>) -> Eval<Option<i64>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr)? {
            Value::None => Ok(None),
            Value::BigInt(b) => Ok(Some(if b.is_negative() {
                i64::MIN
            } else {
                i64::MAX
            })),
            v => v.as_int().map(Some).ok_or_else(|| {
                Fault::from(
                    "slice indices must be integers or None or have an __index__ method"
                        .to_string(),
                )
            }),
        }
    }

    fn slice_bounds(
        &mut self,
        lower: Option<&Expr>,
        upper: Option<&Expr>,
        step: Option<&Expr>,
    ) -> Eval<SliceBounds> {
        Ok(SliceBounds {
            lower: self.slice_bound(lower)?,
            upper: self.slice_bound(upper)?,
            step: self.slice_bound(step)?,
        })
    }

    fn comprehension(&mut self, kind: &CompKind, elt: &Expr, clauses: &[CompClause]) -> Eval<Value> {
        self.frame.comps.push(Scope::default());
        let mut out = match kind {
            CompKind::List => Collected::Items(Vec::new()),
            CompKind::Set | CompKind::Dict(_) => Collected::Table(Table::default()),
        };
        let result = self.comp_clauses(kind, elt, clauses, &mut out);
        self.frame.comps.pop();
        result?;
        Ok(match (kind, out) {
            (CompKind::Set, Collected::Table(t)) => Value::set(t),
            (_, Collected::Table(t)) => Value::dict(t),
            (_, Collected::Items(items)) => Value::list(items),
        })
    }

    fn comp_clauses(
        &mut self,
        kind: &CompKind,
        elt: &Expr,
        clauses: &[CompClause],
        out: &mut Collected,
    ) -> Eval<()> {
        let Some((clause, rest)) = clauses.split_first() else {
            return self.comp_element(kind, elt, out);
        };
        let items = self.eval(&clause.iter)?.items()?;
        'items: for item in items {
            self.tick()?;
            self.bind(&clause.target, item)?;
            for cond in &clause.conds {
                if !self.eval(cond)?.truthy() {
                    continue 'items;
                }
            }
            self.comp_clauses(kind, elt, rest, out)?;
        }
        Ok(())
    }

    fn comp_element(&mut self, kind: &CompKind, elt: &Expr, out: &mut Collected) -> Eval<()> {
        match out {
            Collected::Items(items) => {
                check_len(items.len() + 1)?;
                self.charge(VALUE_SIZE)?;
                let v = self.eval(elt)?;
                items.push(v);
            }
            Collected::Table(table) => {
                let key = self.eval(elt)?;
                let value = match kind {
                    CompKind::Dict(value) => self.eval(value)?,
                    _ => Value::None,
                };
                if table.insert(key, value)? {
                    self.charge(ENTRY_SIZE)?;
                }
            }
        }
        Ok(())
    }

    // ── Calls ──

    fn eval_call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> Eval<Value> {
        if let Expr::Attr(obj, name) = func {
            let receiver = self.eval(obj)?;
            let plain = !matches!(
                &receiver,
                Value::Module(_) | Value::Func(Func::Builtin(_))
            );
            if plain {
                let (args, kwargs) = self.eval_args(args, kwargs)?;
                let result = self.call_method(&receiver, name, args, kwargs)?;
                return self.fresh(result);
            }
            let callee = attribute(receiver, name)?;
            let (args, kwargs) = self.eval_args(args, kwargs)?;
            return self.call(callee, args, kwargs);
        }
        let callee = self.eval(func)?;
        let (args, kwargs) = self.eval_args(args, kwargs)?;
        self.call(callee, args, kwargs)
    }

    fn eval_args(
        &mut self,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Eval<(Vec<Value>, Vec<(String, Value)>)> {
        let args = self.eval_items(args)?;
        let mut evaluated = Vec::with_capacity(kwargs.len());
        for (name, e) in kwargs {
            evaluated.push((name.clone(), self.eval(e)?));
        }
        Ok((args, evaluated))
    }

    pub(super) fn call(&mut self, callee: Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Eval<Value> {
        let Value::Func(func) = callee else {
            return fail(format!("'{}' object is not callable", callee.type_name()));
        };
        let result = match func {
            Func::User(f) => return self.call_user(&f, args, kwargs),
            Func::Builtin(b) => self.call_builtin(b, args, kwargs)?,
            Func::Math(m) => self.call_math(m, args, kwargs)?,
            Func::Method(m) => self.call_method(&m.receiver, &m.name, args, kwargs)?,
            Func::Unbound(ty, name) => {
                let mut args = args.into_iter();
                let Some(receiver) = args.next() else {
                    return fail(format!(
                        "unbound method {}.{name}() needs an argument",
                        ty.name()
                    ));
                };
                if receiver.type_name() != ty.name() {
                    return fail(format!(
                        "descriptor '{name}' for '{}' objects doesn't apply to a '{}' object",
                        ty.name(),
                        receiver.type_name()
                    ));
                }
                self.call_method(&receiver, &name, args.collect(), kwargs)?
            }
        };
        self.fresh(result)
    }

    fn call_user(&mut self, f: &Rc<UserFn>, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Eval<Value> {
        if self.calls >= MAX_CALL_DEPTH {
            return fail(recursion_error());
        }
        let locals = bind_arguments(f, args, kwargs)?;
        let frame = Frame {
            env: f.env.clone(),
            locals: Some(Rc::new(RefCell::new(locals))),
            ..Frame::default()
        };
        let caller = std::mem::replace(&mut self.frame, frame);
        self.calls += 1;
        let result = self.exec_block(&f.def.body);
        self.calls -= 1;
        let finished = std::mem::replace(&mut self.frame, caller);
        self.release_frame(finished);
        match result? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::None),
            Flow::Break => fail("'break' outside loop"),
            Flow::Continue => fail("'continue' not properly in loop"),
        }
    }

    fn release_frame(&mut self, frame: Frame) {
        let Some(locals) = frame.locals else {
            return;
        };
        if let Ok(cell) = Rc::try_unwrap(locals) {
            for value in cell.into_inner().into_values() {
                self.credit(&value);
            }
        }
    }
}

/// Match call arguments to a user function's parameters.
fn bind_arguments(
    f: &UserFn,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<HashMap<String, Value>, String> {
    let def = &f.def;
    let n = def.params.len();
    let mut slots: Vec<Option<Value>> = vec![None; n];
    let mut extra = Vec::new();
    let given = args.len();
    for (i, arg) in args.into_iter().enumerate() {
        if i < n {
            slots[i] = Some(arg);
        } else {
            extra.push(arg);
        }
    }
    if !extra.is_empty() && def.vararg.is_none() {
        return Err(format!(
            "{}() takes {n} positional argument{} but {given} were given",
            def.name,
            if n == 1 { "" } else { "s" }
        ));
    }
    for (name, value) in kwargs {
        let Some(i) = def.params.iter().position(|p| p.name == name) else {
            return Err(format!(
                "{}() got an unexpected keyword argument '{name}'",
                def.name
            ));
        };
        if slots[i].is_some() {
            return Err(format!(
                "{}() got multiple values for argument '{name}'",
                def.name
            ));
        }
        slots[i] = Some(value);
    }
    let mut locals = HashMap::with_capacity(n + 1);
    for ((param, slot), default) in def.params.iter().zip(slots).zip(&f.defaults) {
        let Some(value) = slot.or_else(|| default.clone()) else {
            return Err(format!(
                "{}() missing required argument: '{}'",
                def.name, param.name
            ));
        };
        locals.insert(param.name.clone(), value);
    }
    if let Some(name) = &def.vararg {
        locals.insert(name.clone(), Value::tuple(extra));
    }
    Ok(locals)
}

/// `value.name` outside a call.
fn attribute(value: Value, name: &str) -> Result<Value, String> {
    match &value {
        Value::Module(m) => module_attr(*m, name),
        Value::Func(Func::Builtin(b)) if b.is_type() && has_method(b.name(), name) => {
            Ok(Value::Func(Func::Unbound(*b, Rc::from(name))))
        }
        v if has_method(v.type_name(), name) => Ok(Value::Func(Func::Method(Rc::new(BoundMethod {
            receiver: value.clone(),
            name: name.to_string(),
        })))),
        v => Err(format!(
            "'{}' object has no attribute '{name}'",
            v.type_name()
        )),
    }
}

// ─────────────────────────────────────────────
// Subscripts
// ─────────────────────────────────────────────

pub(crate) fn key_error(key: &Value) -> String {
    format!("KeyError: {}", key.describe())
}

/// Resolve a possibly negative index against `len`.
pub(crate) fn normalize_index(index: &Value, len: usize, container: &str, what: &str) -> Result<usize, String> {
    let i = match index {
        Value::Bool(b) => *b as i64,
        Value::Int(i) => *i,
        Value::BigInt(_) => return Err(format!("{what} index out of range")),
        other => {
            return Err(format!(
                "{container} indices must be integers or slices, not {}",
                other.type_name()
            ))
        }
    };
    let pos = if i < 0 { i + len as i64 } else { i };
    if pos < 0 || pos >= len as i64 {
        return Err(format!("{what} index out of range"));
    }
    Ok(pos as usize)
}

fn char_at(s: &str, i: usize) -> Value {
    if s.is_ascii() {
        return Value::str(&s[i..i + 1]);
    }
    Value::str(s.chars().nth(i).map(String::from).unwrap_or_default())
}

pub(crate) fn index_value(obj: &Value, index: &Value) -> Result<Value, String> {
    match obj {
        Value::List(l) => {
            let items = l.items();
            let i = normalize_index(index, items.len(), "list", "list")?;
            Ok(items[i].clone())
        }
        Value::Tuple(t) => {
            let i = normalize_index(index, t.items().len(), "tuple", "tuple")?;
            Ok(t.items()[i].clone())
        }
        Value::Str(s) => {
            let len = if s.is_ascii() { s.len() } else { s.chars().count() };
            let i = normalize_index(index, len, "string", "string")?;
            Ok(char_at(s, i))
        }
        Value::Range(r) => {
            let i = normalize_index(index, r.len(), "range", "range object")?;
            Ok(Value::Int(r.get(i)))
        }
        Value::Dict(d) => d.table().get(index)?.ok_or_else(|| key_error(index)),
        other => Err(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        )),
    }
}

/// Start, step and element count of a slice over `len` items.
pub(crate) fn slice_indices(len: usize, bounds: SliceBounds) -> Result<(i64, i64, usize), String> {
    let len = len as i64;
    let step = bounds.step.unwrap_or(1).max(-i64::MAX);
    if step == 0 {
        return Err("slice step cannot be zero".into());
    }
    let adjust = |v: Option<i64>, default: i64, low: i64, high: i64| match v {
        None => default,
        Some(i) if i < 0 => i.saturating_add(len).max(low),
        Some(i) => i.min(high),
    };
    let (start, stop) = if step > 0 {
        (adjust(bounds.lower, 0, 0, len), adjust(bounds.upper, len, 0, len))
    } else {
        (
            adjust(bounds.lower, len - 1, -1, len - 1),
            adjust(bounds.upper, -1, -1, len - 1),
        )
    };
    let count = if step > 0 && stop > start {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / -step + 1
    } else {
        0
    };
    Ok((start, step, count as usize))
}

pub(crate) fn slice_value(obj: &Value, bounds: SliceBounds) -> Result<Value, String> {
    let pick = |len: usize| -> Result<Vec<usize>, String> {
        let (start, step, count) = slice_indices(len, bounds)?;
        Ok((0..count).map(|k| (start + k as i64 * step) as usize).collect())
    };
    match obj {
        Value::List(l) => {
            let items = l.items();
            Ok(Value::list(pick(items.len())?.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Tuple(t) => {
            let items = t.items();
            Ok(Value::tuple(pick(items.len())?.into_iter().map(|i| items[i].clone()).collect()))
        }
        Value::Str(s) if s.is_ascii() => {
            let bytes = s.as_bytes();
            let picked: Vec<u8> = pick(bytes.len())?.into_iter().map(|i| bytes[i]).collect();
            Ok(Value::str(String::from_utf8_lossy(&picked).into_owned()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::str(
                pick(chars.len())?.into_iter().map(|i| chars[i]).collect::<String>(),
            ))
        }
        Value::Range(r) => {
            let (start, step, count) = slice_indices(r.len(), bounds)?;
            let new_step = r.step as i128 * step as i128;
            let new_start = r.start as i128 + start as i128 * r.step as i128;
            let new_stop = new_start + count as i128 * new_step;
            let fit = |v: i128| {
                i64::try_from(v).map_err(|_| "Python int too large to convert to C ssize_t".to_string())
            };
            Ok(Value::Range(Range {
                start: fit(new_start)?,
                stop: fit(new_stop)?,
                step: fit(new_step)?,
            }))
        }
        other => Err(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::expression::parser::parse_program;
    use crate::tools::expression::{evaluate, on_eval_thread};

    fn run(src: &str) -> Result<String, EvalError> {
        evaluate(src, &Interrupt::new())
    }

    fn run_with(src: &str, limits: Limits) -> Result<String, EvalError> {
        let src = src.to_string();
        on_eval_thread(move || {
            let interrupt = Interrupt::new();
            let program = parse_program(&src)?;
            Interpreter::with_limits(&interrupt, limits).run(&program)
        })
    }

    fn out(src: &str) -> String {
        run(src).unwrap()
    }

    fn runtime_message(src: &str) -> String {
        match run(src).unwrap_err() {
            EvalError::Runtime { message, .. } => message,
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn test_print_captures_stdout() {
        assert_eq!(out("print((2**10 + 3**5) * 7 - 100)"), "8769\n");
        assert_eq!(out("print(1, 'a', None, sep='-', end='')"), "1-a-None");
    }

    #[test]
    fn test_bare_expression_prints_nothing() {
        assert_eq!(out("2 + 2"), "");
    }

    #[test]
    fn test_assignment_forms() {
        assert_eq!(out("x = 5\nx += 2\nx *= 3\nprint(x)"), "21\n");
        assert_eq!(out("a, b = 1, 2; a, b = b, a; print(a, b)"), "2 1\n");
        assert_eq!(out("first, *rest = [1, 2, 3]\nprint(first, rest)"), "1 [2, 3]\n");
        assert_eq!(out("*init, last = 'abc'\nprint(init, last)"), "['a', 'b'] c\n");
        assert_eq!(out("a = b = 0\nprint(a, b)"), "0 0\n");
        assert_eq!(
            runtime_message("a, b = [1, 2, 3]"),
            "too many values to unpack (expected 2)"
        );
    }

    #[test]
    fn test_containers_are_shared() {
        assert_eq!(out("a = [1]\nb = a\nb.append(2)\nprint(a, a is b)"), "[1, 2] True\n");
        assert_eq!(out("a = []\nb = a\na += [1]\nprint(b)"), "[1]\n");
        assert_eq!(out("a = [1]\nb = a + [2]\nprint(a, b, a is b)"), "[1] [1, 2] False\n");
        assert_eq!(out("xs = [1]\nxs.append(xs)\nprint(xs)"), "[1, [...]]\n");
    }

    #[test]
    fn test_item_and_slice_assignment() {
        assert_eq!(out("x = [1, 2, 3]\nx[0] = 5\nx[-1] += 10\nprint(x)"), "[5, 2, 13]\n");
        assert_eq!(out("d = {}\nd['k'] = 1\nd['k'] += 1\nprint(d)"), "{'k': 2}\n");
        assert_eq!(out("xs = [0, 1, 2, 3]\nxs[1:3] = 'ab'\nprint(xs)"), "[0, 'a', 'b', 3]\n");
        assert_eq!(out("xs = list(range(6))\nxs[::2] = [9, 9, 9]\nprint(xs)"), "[9, 1, 9, 3, 9, 5]\n");
        assert_eq!(out("xs = [1, 2, 3, 4]\ndel xs[0]\ndel xs[::2]\nprint(xs)"), "[3]\n");
        assert_eq!(out("d = {'a': 1, 'b': 2}\ndel d['a']\nprint(d)"), "{'b': 2}\n");
        assert_eq!(runtime_message("t = (1, 2)\nt[0] = 3"), "'tuple' object does not support item assignment");
        assert_eq!(runtime_message("d = {}\nprint(d['missing'])"), "KeyError: 'missing'");
        assert_eq!(runtime_message("xs = [1]\nxs[3] = 0"), "list assignment index out of range");
    }

    #[test]
    fn test_float_formatting_matches_python() {
        assert_eq!(out("print(7 / 2, 6 / 3, 0.1 + 0.2)"), "3.5 2.0 0.30000000000000004\n");
        assert_eq!(out("print(math.sqrt(16))"), "4.0\n");
    }

    #[test]
    fn test_comprehensions() {
        assert_eq!(out("print([x * x for x in range(5) if x % 2 == 0])"), "[0, 4, 16]\n");
        assert_eq!(out("print(sum(int(d) for d in str(2**15)))"), "26\n");
        assert_eq!(out("print([(i, c) for i, c in enumerate('ab')])"), "[(0, 'a'), (1, 'b')]\n");
        assert_eq!(out("print([a + b for a in [1, 2] for b in [10, 20]])"), "[11, 21, 12, 22]\n");
        assert_eq!(out("print({x % 3 for x in range(10)})"), "{0, 1, 2}\n");
        assert_eq!(out("print({w: len(w) for w in ['a', 'bb']})"), "{'a': 1, 'bb': 2}\n");
    }

    #[test]
    fn test_comprehension_variables_do_not_leak() {
        let msg = runtime_message("[i for i in range(3)]\nprint(i)");
        assert_eq!(msg, "name 'i' is not defined");
    }

    #[test]
    fn test_blocks() {
        let src = "\
total = 0
for i in range(10):
    if i == 7:
        break
    elif i % 2:
        continue
    else:
        total += i
else:
    total = -1
print(total)
n = 0
while n < 3:
    n += 1
else:
    print('done', n)
";
        assert_eq!(out(src), "12\ndone 3\n");
        assert_eq!(out("for x in []:\n    pass\nelse:\n    print('empty')"), "empty\n");
    }

    #[test]
    fn test_functions() {
        let src = "\
def fib(n):
    return n if n < 2 else fib(n - 1) + fib(n - 2)

def greet(name, greeting='hi', *rest):
    return f'{greeting} {name}' + ''.join(rest)

print(fib(15), greet('bo'), greet('al', greeting='yo'), greet('x', 'y', '!', '?'))
";
        assert_eq!(out(src), "610 hi bo yo al y x!?\n");
        assert_eq!(out("square = lambda x: x * x\nprint(sorted([3, -4, 1], key=square))"), "[1, 3, -4]\n");
        assert_eq!(
            runtime_message("def f(a):\n    return a\nf()"),
            "f() missing required argument: 'a'"
        );
        assert_eq!(
            runtime_message("def f(a):\n    return a\nf(1, 2)"),
            "f() takes 1 positional argument but 2 were given"
        );
    }

    #[test]
    fn test_closures_and_globals() {
        let src = "\
def counter():
    count = [0]
    def bump():
        count[0] += 1
        return count[0]
    return bump

c = counter()
c(); c()
print(c())
total = 0
def add(n):
    global total
    total += n
add(5); add(6)
print(total)
adders = [lambda x, i=i: x + i for i in range(3)]
print([f(10) for f in adders])
";
        assert_eq!(out(src), "3\n11\n[10, 11, 12]\n");
    }

    #[test]
    fn test_recursion_limits() {
        let deep = "def depth(n):\n    return 0 if n == 0 else 1 + depth(n - 1)\nprint(depth(900))";
        assert_eq!(out(deep), "900\n");
        let endless = "def f(n):\n    return f(n + 1)\nf(0)";
        assert_eq!(runtime_message(endless), "maximum recursion depth exceeded");
    }

    #[test]
    fn test_expression_depth_is_bounded() {
        let src = format!("def f(n):\n    return {}f(n + 1)\nf(0)", "-".repeat(150));
        assert_eq!(runtime_message(&src), "maximum recursion depth exceeded");
    }

    #[test]
    fn test_big_integers() {
        assert_eq!(out("print(2**100)"), "1267650600228229401496703205376\n");
        assert_eq!(out("print(2**63, -2**63 - 1)"), "9223372036854775808 -9223372036854775809\n");
        assert_eq!(out("print(math.factorial(21))"), "51090942171709440000\n");
        assert_eq!(out("print(1_000_000 + 0x10)"), "1000016\n");
    }

    #[test]
    fn test_runtime_errors() {
        assert_eq!(runtime_message("print(1 / 0)"), "division by zero");
        assert_eq!(runtime_message("print(undefined_name)"), "name 'undefined_name' is not defined");
        assert_eq!(runtime_message("[1, 2][5]"), "list index out of range");
        assert!(runtime_message("import os").contains("not supported"));
        assert_eq!(runtime_message("return 1"), "'return' outside function");
        assert_eq!(runtime_message("assert 1 > 2, 'nope'"), "AssertionError: nope");
        assert_eq!(runtime_message("x = 1\nx.foo"), "'int' object has no attribute 'foo'");
    }

    #[test]
    fn test_runtime_error_reports_line() {
        let err = run("a = 1\nb = 2\nc = a / 0").unwrap_err();
        assert_eq!(
            err,
            EvalError::Runtime {
                line: 3,
                message: "division by zero".into()
            }
        );
        let err = run("def f():\n    x = 1\n    return x / 0\n\nf()").unwrap_err();
        assert!(matches!(err, EvalError::Runtime { line: 3, .. }));
    }

    #[test]
    fn test_output_before_error_is_discarded() {
        assert!(run("print('partial')\n1 / 0").is_err());
    }

    #[test]
    fn test_ranges_are_lazy() {
        assert!(runtime_message("list(range(10**9))").contains("too large"));
        assert_eq!(out("print(len(range(10**9)), range(10**9)[-1])"), "1000000000 999999999\n");
        assert_eq!(out("for i in range(10**9):\n    if i == 3:\n        break\nprint(i)"), "3\n");
        assert_eq!(out("print(range(10)[2:8:3], 5 in range(0, 10, 5))"), "range(2, 8, 3) True\n");
    }

    #[test]
    fn test_step_limit() {
        let msg = runtime_message("x = [i for i in range(1000000) for j in range(10)]");
        assert!(msg.contains("step limit"));
    }

    #[test]
    fn test_repetition_shares_memory() {
        assert_eq!(out("s = 'a' * 10**6\nx = [s] * 10**4\nprint(len(x))"), "10000\n");
        assert_eq!(
            out("x = [[0] * 10**6] * 10**6\nprint(len(x), len(x[0]))"),
            "1000000 1000000\n"
        );
    }

    #[test]
    fn test_memory_limit() {
        let limits = Limits {
            max_ops: MAX_OPS,
            max_alloc: 1 << 20,
        };
        let err = run_with("xs = ['x' * 1000 for _ in range(2000)]", limits).unwrap_err();
        assert!(
            matches!(&err, EvalError::Runtime { message, .. } if message.contains("memory limit exceeded")),
            "{err:?}"
        );
        assert!(runtime_message("x = [0] * 10**8").contains("memory limit exceeded"));
    }

    #[test]
    fn test_rebinding_returns_memory() {
        let limits = Limits {
            max_ops: MAX_OPS,
            max_alloc: 1 << 20,
        };
        let src = "s = ''\nfor i in range(20000):\n    s += 'x'\nprint(len(s))";
        assert_eq!(run_with(src, limits).unwrap(), "20000\n");
    }

    #[test]
    fn test_deeply_nested_data_is_released() {
        let src = "x = []\nfor i in range(100000):\n    x = [x]\nprint(len(x))";
        assert_eq!(out(src), "1\n");
    }

    #[test]
    fn test_interrupt_stops_evaluation() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        assert_eq!(evaluate("print(1)", &interrupt).unwrap_err(), EvalError::Interrupted);
    }

    #[test]
    fn test_interrupt_during_long_comprehension() {
        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        let worker = std::thread::spawn(move || {
            on_eval_thread(move || {
                let limits = Limits {
                    max_ops: u64::MAX,
                    max_alloc: usize::MAX,
                };
                let program = parse_program("[i for i in range(10**6) for j in range(10**6) if j < 0]")?;
                Interpreter::with_limits(&interrupt, limits).run(&program)
            })
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        trigger.trigger();
        assert_eq!(worker.join().unwrap().unwrap_err(), EvalError::Interrupted);
    }
}
