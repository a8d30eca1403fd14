//! Builtin functions and the `math` module.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::arith::{self, float_to_int, gcd_big, real, MAX_INT_BITS};
use super::interpreter::{fail, Eval, Fault, Interpreter};
use super::parser::BinOp;
use super::value::{
    self, parse_decimal, Builtin, Func, MathFn, Module, Range, Table, Value, VALUE_SIZE,
};

// ─────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────

/// Keyword arguments of a builtin call, consumed by name.
pub(super) struct Kwargs<'n> {
    func: &'n str,
    pub(super) items: Vec<(String, Value)>,
}

impl<'n> Kwargs<'n> {
    pub(super) fn new(func: &'n str, items: Vec<(String, Value)>) -> Self {
        Self { func, items }
    }

    pub(super) fn take(&mut self, name: &str) -> Option<Value> {
        let idx = self.items.iter().position(|(k, _)| k == name)?;
        Some(self.items.remove(idx).1)
    }

    pub(super) fn take_str(&mut self, name: &str, default: &str) -> Result<String, String> {
        match self.take(name) {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(Value::Str(s)) => Ok(s.to_string()),
            Some(other) => Err(format!(
                "{name} must be None or a string, not {}",
                other.type_name()
            )),
        }
    }

    /// Reject whatever was not consumed.
    pub(super) fn finish(self) -> Result<(), String> {
        match self.items.first() {
            Some((k, _)) => Err(format!(
                "'{k}' is an invalid keyword argument for {}()",
                self.func
            )),
            None => Ok(()),
        }
    }
}

pub(super) fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), String> {
    let n = args.len();
    if n >= min && n <= max {
        return Ok(());
    }
    let expected = if min == max {
        format!("exactly {min}")
    } else if n < min {
        format!("at least {min}")
    } else {
        format!("at most {max}")
    };
    Err(format!("{name}() takes {expected} argument(s) ({n} given)"))
}

/// An `int` argument used as a count or position.
pub(super) fn index_arg(v: &Value) -> Result<i64, String> {
    match v {
        Value::BigInt(_) => Err("Python int too large to convert to C ssize_t".into()),
        other => other.as_int().ok_or_else(|| {
            format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            )
        }),
    }
}

fn int_value(v: &Value) -> Result<BigInt, String> {
    v.to_bigint().ok_or_else(|| {
        format!(
            "'{}' object cannot be interpreted as an integer",
            v.type_name()
        )
    })
}

fn too_large() -> String {
    format!("integer too large (limit {MAX_INT_BITS} bits)")
}

fn check_bits(n: &BigInt) -> Result<(), String> {
    if n.bits() > MAX_INT_BITS {
        return Err(too_large());
    }
    Ok(())
}

// ─────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────

const MATH_NAMES: &[&str] = &[
    "pi", "e", "tau", "inf", "nan", "sqrt", "floor", "ceil", "trunc", "pow", "log", "log10",
    "log2", "exp", "sin", "cos", "tan", "asin", "acos", "atan", "atan2", "hypot", "degrees",
    "radians", "fabs", "factorial", "gcd", "lcm", "isqrt", "comb", "perm", "prod", "fsum",
    "isclose", "isnan", "isinf",
];

pub(crate) fn import_module(name: &str) -> Result<Module, String> {
    Module::from_name(name).ok_or_else(|| {
        format!("import of module '{name}' is not supported; only 'math' is available")
    })
}

/// Names bound by `from module import *`.
pub(crate) fn module_names(module: Module) -> &'static [&'static str] {
    match module {
        Module::Math => MATH_NAMES,
    }
}

pub(crate) fn module_attr(module: Module, name: &str) -> Result<Value, String> {
    match module {
        Module::Math => {
            let constant = match name {
                "pi" => std::f64::consts::PI,
                "e" => std::f64::consts::E,
                "tau" => std::f64::consts::TAU,
                "inf" => f64::INFINITY,
                "nan" => f64::NAN,
                other => {
                    return MathFn::from_name(other)
                        .map(|f| Value::Func(Func::Math(f)))
                        .ok_or_else(|| format!("module 'math' has no attribute '{other}'"))
                }
            };
            Ok(Value::Float(constant))
        }
    }
}

// ─────────────────────────────────────────────
// Builtins
// ─────────────────────────────────────────────

impl Interpreter<'_> {
    pub(super) fn call_builtin(
        &mut self,
        b: Builtin,
        mut args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let name = b.name();
        let mut kw = Kwargs::new(name, kwargs);
        match b {
            Builtin::Print => {
                let sep = kw.take_str("sep", " ")?;
                let end = kw.take_str("end", "\n")?;
                kw.take("flush");
                kw.finish()?;
                let mut text = String::new();
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        text.push_str(&sep);
                    }
                    text.push_str(&arg.to_str()?);
                }
                text.push_str(&end);
                self.write(&text)?;
                Ok(Value::None)
            }
            Builtin::Min | Builtin::Max => {
                let key = kw.take("key");
                let default = kw.take("default");
                kw.finish()?;
                self.min_max(b, args, key, default)
            }
            Builtin::Sorted => {
                let key = kw.take("key");
                let reverse = kw.take("reverse").is_some_and(|v| v.truthy());
                kw.finish()?;
                arity(name, &args, 1, 1)?;
                let items = self.collect_items(&args[0])?;
                Ok(Value::list(self.sorted_values(items, key, reverse)?))
            }
            Builtin::Dict => {
                let extra = std::mem::take(&mut kw.items);
                arity(name, &args, 0, 1)?;
                let mut table = match args.first() {
                    Some(source) => self.dict_from(source)?,
                    None => Table::default(),
                };
                for (k, v) in extra {
                    table.insert(Value::str(k), v)?;
                }
                Ok(Value::dict(table))
            }
            _ => {
                // Keyword forms of trailing positional parameters.
                let trailing = match b {
                    Builtin::Sum | Builtin::Enumerate => "start",
                    Builtin::Round => "ndigits",
                    Builtin::Int => "base",
                    _ => "",
                };
                if !trailing.is_empty() {
                    if let Some(v) = kw.take(trailing) {
                        args.push(v);
                    }
                }
                kw.finish()?;
                self.call_positional(b, args)
            }
        }
    }

    fn call_positional(&mut self, b: Builtin, mut args: Vec<Value>) -> Eval<Value> {
        let name = b.name();
        match b {
            Builtin::Abs => {
                arity(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    Value::BigInt(n) => Ok(Value::int(n.abs())),
                    v => match v.as_int() {
                        Some(i) => Ok(i
                            .checked_abs()
                            .map(Value::Int)
                            .unwrap_or_else(|| Value::int(BigInt::from(i).abs()))),
                        None => fail(format!("bad operand type for abs(): '{}'", v.type_name())),
                    },
                }
            }
            Builtin::Len => {
                arity(name, &args, 1, 1)?;
                match args[0].len() {
                    Some(n) => Ok(Value::Int(n as i64)),
                    None => fail(format!(
                        "object of type '{}' has no len()",
                        args[0].type_name()
                    )),
                }
            }
            Builtin::Range => Ok(range(&args)?),
            Builtin::Round => Ok(round(&args)?),
            Builtin::Int => Ok(int_of(&args)?),
            Builtin::Float => {
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(Value::Str(s)) => Ok(parse_float(s)?),
                    Some(v) => match v.num() {
                        Some(n) => Ok(Value::Float(arith::to_float(n)?)),
                        None => fail(format!(
                            "float() argument must be a string or a real number, not '{}'",
                            v.type_name()
                        )),
                    },
                }
            }
            Builtin::Str => {
                arity(name, &args, 0, 1)?;
                match args.first() {
                    Some(v) => Ok(Value::str(v.to_str()?)),
                    None => Ok(Value::str("")),
                }
            }
            Builtin::Repr => {
                arity(name, &args, 1, 1)?;
                Ok(Value::str(args[0].repr()?))
            }
            Builtin::Bool => {
                arity(name, &args, 0, 1)?;
                Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
            }
            Builtin::List | Builtin::Tuple | Builtin::Set => {
                arity(name, &args, 0, 1)?;
                let items = match args.first() {
                    Some(v) => self.collect_items(v)?,
                    None => Vec::new(),
                };
                Ok(match b {
                    Builtin::List => Value::list(items),
                    Builtin::Tuple => Value::tuple(items),
                    _ => Value::set(Table::from_keys(items)?),
                })
            }
            Builtin::Reversed => {
                arity(name, &args, 1, 1)?;
                if args[0].len().is_none() {
                    return fail(format!(
                        "'{}' object is not reversible",
                        args[0].type_name()
                    ));
                }
                let mut items = self.collect_items(&args[0])?;
                items.reverse();
                Ok(Value::list(items))
            }
            Builtin::Pow => {
                arity(name, &args, 2, 3)?;
                if args.len() == 2 {
                    return self.binary(BinOp::Pow, &args[0], &args[1]);
                }
                if !args.iter().all(Value::is_int) {
                    return fail("pow() 3rd argument not allowed unless all arguments are integers");
                }
                Ok(mod_pow(
                    &int_value(&args[0])?,
                    &int_value(&args[1])?,
                    &int_value(&args[2])?,
                )?)
            }
            Builtin::Sum => {
                arity(name, &args, 1, 2)?;
                let mut acc = args.get(1).cloned().unwrap_or(Value::Int(0));
                if matches!(acc, Value::Str(_)) {
                    return fail("sum() can't sum strings [use ''.join(seq) instead]");
                }
                for item in args[0].items()? {
                    self.tick_item()?;
                    acc = self.binary(BinOp::Add, &acc, &item)?;
                }
                Ok(acc)
            }
            Builtin::Any | Builtin::All => {
                arity(name, &args, 1, 1)?;
                let want = b == Builtin::Any;
                for item in args[0].items()? {
                    self.tick_item()?;
                    if item.truthy() == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            Builtin::Enumerate => {
                arity(name, &args, 1, 2)?;
                let start = match args.get(1) {
                    Some(v) => index_arg(v)?,
                    None => 0,
                };
                let items = self.collect_items(&args[0])?;
                self.charge(items.len() * 2 * VALUE_SIZE)?;
                Ok(Value::list(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| {
                            Value::tuple(vec![Value::Int(start.saturating_add(i as i64)), v])
                        })
                        .collect(),
                ))
            }
            Builtin::Zip => {
                let mut seqs = Vec::with_capacity(args.len());
                for arg in &args {
                    seqs.push(self.collect_items(arg)?);
                }
                let n = seqs.iter().map(Vec::len).min().unwrap_or(0);
                self.charge(n * seqs.len() * VALUE_SIZE)?;
                Ok(Value::list(
                    (0..n)
                        .map(|i| Value::tuple(seqs.iter().map(|s| s[i].clone()).collect()))
                        .collect(),
                ))
            }
            Builtin::Map => {
                if args.len() < 2 {
                    return fail("map() must have at least two arguments.");
                }
                let f = args.remove(0);
                let mut seqs = Vec::with_capacity(args.len());
                for arg in &args {
                    seqs.push(self.collect_items(arg)?);
                }
                let n = seqs.iter().map(Vec::len).min().unwrap_or(0);
                let mut out = Vec::with_capacity(n);
                for i in 0..n {
                    let call_args = seqs.iter().map(|s| s[i].clone()).collect();
                    out.push(self.call(f.clone(), call_args, Vec::new())?);
                }
                Ok(Value::list(out))
            }
            Builtin::Filter => {
                arity(name, &args, 2, 2)?;
                let mut out = Vec::new();
                for item in self.collect_items(&args[1])? {
                    let keep = match &args[0] {
                        Value::None => item.truthy(),
                        f => self.call(f.clone(), vec![item.clone()], Vec::new())?.truthy(),
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Value::list(out))
            }
            Builtin::Divmod => {
                arity(name, &args, 2, 2)?;
                let q = self.binary(BinOp::FloorDiv, &args[0], &args[1])?;
                let r = self.binary(BinOp::Mod, &args[0], &args[1])?;
                Ok(Value::tuple(vec![q, r]))
            }
            Builtin::Isinstance => {
                arity(name, &args, 2, 2)?;
                let types = match &args[1] {
                    Value::Tuple(t) => t.items().to_vec(),
                    other => vec![other.clone()],
                };
                let mut hit = false;
                for t in &types {
                    match t {
                        Value::Func(Func::Builtin(ty)) if ty.is_type() => {
                            hit |= instance_of(&args[0], *ty);
                        }
                        _ => {
                            return fail(
                                "isinstance() arg 2 must be a type, a tuple of types, or a union",
                            )
                        }
                    }
                }
                Ok(Value::Bool(hit))
            }
            Builtin::Chr => {
                arity(name, &args, 1, 1)?;
                let code = index_arg(&args[0])?;
                u32::try_from(code)
                    .ok()
                    .and_then(char::from_u32)
                    .map(|c| Value::str(c.to_string()))
                    .ok_or_else(|| Fault::from("chr() arg not in range(0x110000)".to_string()))
            }
            Builtin::Ord => {
                arity(name, &args, 1, 1)?;
                let Value::Str(s) = &args[0] else {
                    return fail(format!(
                        "ord() expected string of length 1, but {} found",
                        args[0].type_name()
                    ));
                };
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Int(c as i64)),
                    _ => fail(format!(
                        "ord() expected a character, but string of length {} found",
                        s.chars().count()
                    )),
                }
            }
            Builtin::Hex | Builtin::Bin | Builtin::Oct => {
                arity(name, &args, 1, 1)?;
                let n = int_value(&args[0])?;
                let (radix, prefix) = match b {
                    Builtin::Hex => (16, "0x"),
                    Builtin::Bin => (2, "0b"),
                    _ => (8, "0o"),
                };
                let sign = if n.is_negative() { "-" } else { "" };
                Ok(Value::str(format!(
                    "{sign}{prefix}{}",
                    n.abs().to_str_radix(radix)
                )))
            }
            Builtin::Print
            | Builtin::Min
            | Builtin::Max
            | Builtin::Sorted
            | Builtin::Dict => fail(format!("{name}() cannot be called here")),
        }
    }

    /// One step of a builtin that walks its argument.
    fn tick_item(&mut self) -> Eval<()> {
        self.charge_ops(1)
    }

    fn key_of(&mut self, key: &Option<Value>, item: &Value) -> Eval<Value> {
        match key {
            Some(f) if !matches!(f, Value::None) => {
                self.call(f.clone(), vec![item.clone()], Vec::new())
            }
            _ => Ok(item.clone()),
        }
    }

    fn min_max(
        &mut self,
        b: Builtin,
        args: Vec<Value>,
        key: Option<Value>,
        default: Option<Value>,
    ) -> Eval<Value> {
        let name = b.name();
        let items = match args.len() {
            0 => return fail(format!("{name} expected at least 1 argument, got 0")),
            1 => self.collect_items(&args[0])?,
            _ if default.is_some() => {
                return fail(format!(
                    "Cannot specify a default for {name}() with multiple positional arguments"
                ))
            }
            _ => args,
        };
        if items.is_empty() {
            return default.ok_or_else(|| Fault::from(format!("{name}() arg is an empty sequence")));
        }
        let want = if b == Builtin::Max {
            Ordering::Greater
        } else {
            Ordering::Less
        };
        let mut best: Option<(Value, Value)> = None;
        for item in items {
            self.tick_item()?;
            let k = self.key_of(&key, &item)?;
            let replace = match &best {
                None => true,
                Some((best_key, _)) => value::ordering(&k, best_key)? == want,
            };
            if replace {
                best = Some((k, item));
            }
        }
        Ok(best.map(|(_, v)| v).unwrap_or(Value::None))
    }

    /// Stable sort by `key`, as `sorted()` and `list.sort()` do.
    pub(super) fn sorted_values(
        &mut self,
        items: Vec<Value>,
        key: Option<Value>,
        reverse: bool,
    ) -> Eval<Vec<Value>> {
        self.charge_ops(items.len() as u64)?;
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let k = self.key_of(&key, &item)?;
            keyed.push((k, item));
        }
        let mut failure = None;
        keyed.sort_by(|(a, _), (b, _)| {
            let ord = if reverse {
                value::ordering(b, a)
            } else {
                value::ordering(a, b)
            };
            ord.unwrap_or_else(|e| {
                failure.get_or_insert(e);
                Ordering::Equal
            })
        });
        if let Some(e) = failure {
            return fail(e);
        }
        Ok(keyed.into_iter().map(|(_, v)| v).collect())
    }

    /// Entries for `dict(source)` and `dict.update(source)`.
    pub(super) fn dict_from(&mut self, source: &Value) -> Eval<Table> {
        if let Value::Dict(d) = source {
            return Ok(d.table().copy());
        }
        let mut table = Table::default();
        for (i, item) in self.collect_items(source)?.into_iter().enumerate() {
            self.tick_item()?;
            let pair = item.iterate().map_err(|_| {
                format!("cannot convert dictionary update sequence element #{i} to a sequence")
            })?;
            let [k, v] = <[Value; 2]>::try_from(pair).map_err(|p| {
                format!(
                    "dictionary update sequence element #{i} has length {}; 2 is required",
                    p.len()
                )
            })?;
            table.insert(k, v)?;
        }
        Ok(table)
    }

    // ── math ──

    pub(super) fn call_math(
        &mut self,
        f: MathFn,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let name = f.name();
        let mut kw = Kwargs::new(name, kwargs);
        match f {
            MathFn::Isclose => {
                let rel_tol = kw.take("rel_tol");
                let abs_tol = kw.take("abs_tol");
                kw.finish()?;
                arity(name, &args, 2, 2)?;
                let rel_tol = rel_tol.as_ref().map(real).transpose()?.unwrap_or(1e-9);
                let abs_tol = abs_tol.as_ref().map(real).transpose()?.unwrap_or(0.0);
                Ok(Value::Bool(isclose(
                    real(&args[0])?,
                    real(&args[1])?,
                    rel_tol,
                    abs_tol,
                )?))
            }
            MathFn::Prod => {
                let start = kw.take("start");
                kw.finish()?;
                arity(name, &args, 1, 1)?;
                let mut acc = start.unwrap_or(Value::Int(1));
                for item in args[0].items()? {
                    self.tick_item()?;
                    acc = self.binary(BinOp::Mul, &acc, &item)?;
                }
                Ok(acc)
            }
            MathFn::Fsum => {
                kw.finish()?;
                arity(name, &args, 1, 1)?;
                let mut values = Vec::new();
                for item in args[0].items()? {
                    self.tick_item()?;
                    values.push(real(&item)?);
                }
                Ok(Value::Float(fsum(&values)?))
            }
            MathFn::Factorial | MathFn::Comb | MathFn::Perm => {
                kw.finish()?;
                if f == MathFn::Factorial {
                    arity(name, &args, 1, 1)?;
                } else {
                    arity(name, &args, 1 + (f == MathFn::Comb) as usize, 2)?;
                }
                let n = int_value(&args[0])?;
                let k = args.get(1).filter(|v| !matches!(v, Value::None));
                if n.is_negative() {
                    return fail(match f {
                        MathFn::Factorial => "factorial() not defined for negative values",
                        _ => "n must be a non-negative integer",
                    });
                }
                let Some(k) = k else {
                    let n = index_arg(&args[0])?;
                    self.charge_ops(n as u64)?;
                    return Ok(Value::int(falling_product(&BigInt::from(n), n)?));
                };
                let k = int_value(k)?;
                if k.is_negative() {
                    return fail("k must be a non-negative integer");
                }
                if k > n {
                    return Ok(Value::Int(0));
                }
                let k = if f == MathFn::Comb {
                    std::cmp::min(k.clone(), &n - &k)
                } else {
                    k
                };
                let k = k.to_i64().ok_or_else(too_large)?;
                self.charge_ops(k as u64)?;
                let product = falling_product(&n, k)?;
                if f == MathFn::Perm {
                    return Ok(Value::int(product));
                }
                Ok(Value::int(product / falling_product(&BigInt::from(k), k)?))
            }
            _ => {
                kw.finish()?;
                Ok(math_function(f, &args)?)
            }
        }
    }
}

fn instance_of(v: &Value, ty: Builtin) -> bool {
    match ty {
        Builtin::Int => v.is_int(),
        other => v.type_name() == other.name(),
    }
}

fn range(args: &[Value]) -> Result<Value, String> {
    arity("range", args, 1, 3)?;
    let ints = args.iter().map(index_arg).collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err("range expected at most 3 arguments".into()),
    };
    if step == 0 {
        return Err("range() arg 3 must not be zero".into());
    }
    Ok(Value::Range(Range { start, stop, step }))
}

fn round(args: &[Value]) -> Result<Value, String> {
    arity("round", args, 1, 2)?;
    let ndigits = match args.get(1) {
        None | Some(Value::None) => None,
        Some(v) => Some(index_arg(v)?),
    };
    match (&args[0], ndigits) {
        (Value::Float(f), None) => float_to_int(f.round_ties_even()),
        (Value::Float(f), Some(n)) => Ok(Value::Float(round_float(*f, n))),
        (v, nd) if v.is_int() => {
            let n = int_value(v)?;
            Ok(match nd {
                Some(nd) if nd < 0 => round_int(&n, nd),
                _ => Value::int(n),
            })
        }
        (v, _) => Err(format!(
            "type {} doesn't define __round__ method",
            v.type_name()
        )),
    }
}

/// Round half to even on the exact binary value.
fn round_float(x: f64, n: i64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    if n >= 0 {
        let digits = n.min(320) as usize;
        format!("{:.*}", digits, x).parse().unwrap_or(x)
    } else {
        let factor = 10f64.powi((-n).min(308) as i32);
        (x / factor).round_ties_even() * factor
    }
}

fn round_int(n: &BigInt, ndigits: i64) -> Value {
    let Some(exp) = u32::try_from(-ndigits).ok().filter(|&e| u64::from(e) <= n.bits()) else {
        return Value::Int(0);
    };
    let factor = BigInt::from(10).pow(exp);
    let mut q = n / &factor;
    let mut r = n - &q * &factor;
    if r.is_negative() {
        q -= 1;
        r += &factor;
    }
    let twice = &r * 2;
    let odd = !(&q % BigInt::from(2)).is_zero();
    if twice > factor || (twice == factor && odd) {
        q += 1;
    }
    Value::int(q * factor)
}

/// Parse `text` the way `int(text, base)` does; `None` for a bad literal.
fn parse_int(text: &str, base: u32) -> Option<Result<Value, String>> {
    let t = text.trim();
    let (neg, t) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let lower = t.to_ascii_lowercase();
    let (base, digits) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => (10, lower.as_str()),
        (b, _) => (b, lower.as_str()),
    };
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return None;
    }
    let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
    if !cleaned.chars().all(|c| c.is_digit(base)) {
        return None;
    }
    if base == 10 {
        let signed = if neg { format!("-{cleaned}") } else { cleaned };
        return parse_decimal(&signed);
    }
    let magnitude = BigInt::parse_bytes(cleaned.as_bytes(), base)?;
    if let Err(e) = check_bits(&magnitude) {
        return Some(Err(e));
    }
    Some(Ok(Value::int(if neg { -magnitude } else { magnitude })))
}

fn int_of(args: &[Value]) -> Result<Value, String> {
    arity("int", args, 0, 2)?;
    let Some(v) = args.first() else {
        return Ok(Value::Int(0));
    };
    let invalid = |base: i64| format!("invalid literal for int() with base {base}: {}", v.describe());
    if let Some(base) = args.get(1) {
        let Value::Str(s) = v else {
            return Err("int() can't convert non-string with explicit base".into());
        };
        let base = index_arg(base)?;
        if base != 0 && !(2..=36).contains(&base) {
            return Err("int() base must be >= 2 and <= 36, or 0".into());
        }
        return parse_int(s, base as u32).unwrap_or_else(|| Err(invalid(base)));
    }
    match v {
        Value::Float(f) => float_to_int(*f),
        Value::Str(s) => parse_int(s, 10).unwrap_or_else(|| Err(invalid(10))),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Int(_) | Value::BigInt(_) => Ok(v.clone()),
        other => Err(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        )),
    }
}

fn parse_float(s: &str) -> Result<Value, String> {
    let t = s.trim().to_ascii_lowercase();
    let f = match t.as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => f64::INFINITY,
        "-inf" | "-infinity" => f64::NEG_INFINITY,
        "nan" | "+nan" | "-nan" => f64::NAN,
        _ => t.replace('_', "").parse::<f64>().map_err(|_| {
            format!(
                "could not convert string to float: {}",
                Value::str(s).describe()
            )
        })?,
    };
    Ok(Value::Float(f))
}

fn mod_floor(a: &BigInt, m: &BigInt) -> BigInt {
    let r = a % m;
    if r.is_negative() {
        r + m
    } else {
        r
    }
}

/// Inverse of `a` modulo a positive `m`, when one exists.
fn mod_inverse(a: &BigInt, m: &BigInt) -> Option<BigInt> {
    let (mut old_r, mut r) = (mod_floor(a, m), m.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    while !r.is_zero() {
        let q = &old_r / &r;
        (old_r, r) = (r.clone(), &old_r - &q * &r);
        (old_s, s) = (s.clone(), &old_s - &q * &s);
    }
    old_r.is_one().then(|| mod_floor(&old_s, m))
}

fn mod_pow(base: &BigInt, exp: &BigInt, modulus: &BigInt) -> Result<Value, String> {
    if modulus.is_zero() {
        return Err("pow() 3rd argument cannot be 0".into());
    }
    let (base, exp) = if exp.is_negative() {
        let inverse = mod_inverse(base, &modulus.abs())
            .ok_or_else(|| "base is not invertible for the given modulus".to_string())?;
        (inverse, -exp)
    } else {
        (base.clone(), exp.clone())
    };
    Ok(Value::int(base.modpow(&exp, modulus)))
}

// ─────────────────────────────────────────────
// math functions
// ─────────────────────────────────────────────

fn domain_error() -> String {
    "math domain error".into()
}

fn range_error() -> String {
    "math range error".into()
}

/// `n * (n - 1) * ... * (n - k + 1)`.
fn falling_product(n: &BigInt, k: i64) -> Result<BigInt, String> {
    let mut acc = BigInt::one();
    let mut factor = n.clone();
    for _ in 0..k {
        acc *= &factor;
        check_bits(&acc)?;
        factor -= 1;
    }
    Ok(acc)
}

/// Logarithm that also accepts ints beyond the float range.
fn log_of(v: &Value, log: fn(f64) -> f64, per_bit: f64) -> Result<f64, String> {
    if let Value::BigInt(b) = v {
        if !b.is_positive() {
            return Err(domain_error());
        }
        let shift = b.bits().saturating_sub(64);
        let top = (&**b >> shift).to_f64().unwrap_or(f64::MAX);
        return Ok(log(top) + shift as f64 * per_bit);
    }
    let x = real(v)?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    Ok(log(x))
}

fn isclose(a: f64, b: f64, rel_tol: f64, abs_tol: f64) -> Result<bool, String> {
    if rel_tol < 0.0 || abs_tol < 0.0 {
        return Err("tolerances must be non-negative".into());
    }
    if a == b {
        return Ok(true);
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(false);
    }
    let diff = (b - a).abs();
    Ok(diff <= (rel_tol * b).abs() || diff <= (rel_tol * a).abs() || diff <= abs_tol)
}

/// Exact float summation over non-overlapping partial sums.
fn fsum(values: &[f64]) -> Result<f64, String> {
    let mut partials: Vec<f64> = Vec::new();
    let mut special = 0.0;
    for &v in values {
        if !v.is_finite() {
            special += v;
            continue;
        }
        let mut x = v;
        let mut i = 0;
        for j in 0..partials.len() {
            let mut y = partials[j];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            let lo = y - (hi - x);
            if lo != 0.0 {
                partials[i] = lo;
                i += 1;
            }
            x = hi;
        }
        if !x.is_finite() {
            return Err("intermediate overflow in fsum".into());
        }
        partials.truncate(i);
        partials.push(x);
    }
    if special != 0.0 || special.is_nan() {
        return Ok(special);
    }
    Ok(partials.iter().rev().sum())
}

fn math_function(f: MathFn, args: &[Value]) -> Result<Value, String> {
    let name = f.name();
    let one = |args: &[Value]| -> Result<f64, String> {
        arity(name, args, 1, 1)?;
        real(&args[0])
    };
    let v = match f {
        MathFn::Sqrt => {
            let x = one(args)?;
            if x < 0.0 {
                return Err(domain_error());
            }
            x.sqrt()
        }
        MathFn::Floor | MathFn::Ceil | MathFn::Trunc => {
            arity(name, args, 1, 1)?;
            if args[0].is_int() {
                return Ok(Value::int(int_value(&args[0])?));
            }
            let x = real(&args[0])?;
            return float_to_int(match f {
                MathFn::Floor => x.floor(),
                MathFn::Ceil => x.ceil(),
                _ => x.trunc(),
            });
        }
        MathFn::Pow => {
            arity(name, args, 2, 2)?;
            let (x, y) = (real(&args[0])?, real(&args[1])?);
            if (x == 0.0 && y < 0.0) || (x < 0.0 && y.is_finite() && y.fract() != 0.0) {
                return Err(domain_error());
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err(range_error());
            }
            r
        }
        MathFn::Log => {
            arity(name, args, 1, 2)?;
            let ln = log_of(&args[0], f64::ln, std::f64::consts::LN_2)?;
            match args.get(1) {
                Some(base) => {
                    let ln_base = log_of(base, f64::ln, std::f64::consts::LN_2)?;
                    if ln_base == 0.0 {
                        return Err("float division by zero".into());
                    }
                    ln / ln_base
                }
                None => ln,
            }
        }
        MathFn::Log10 => {
            arity(name, args, 1, 1)?;
            log_of(&args[0], f64::log10, std::f64::consts::LOG10_2)?
        }
        MathFn::Log2 => {
            arity(name, args, 1, 1)?;
            log_of(&args[0], f64::log2, 1.0)?
        }
        MathFn::Exp => {
            let x = one(args)?;
            let r = x.exp();
            if r.is_infinite() && x.is_finite() {
                return Err(range_error());
            }
            r
        }
        MathFn::Sin | MathFn::Cos | MathFn::Tan => {
            let x = one(args)?;
            if x.is_infinite() {
                return Err(domain_error());
            }
            match f {
                MathFn::Sin => x.sin(),
                MathFn::Cos => x.cos(),
                _ => x.tan(),
            }
        }
        MathFn::Asin | MathFn::Acos => {
            let x = one(args)?;
            if !(-1.0..=1.0).contains(&x) {
                return Err(domain_error());
            }
            if f == MathFn::Asin {
                x.asin()
            } else {
                x.acos()
            }
        }
        MathFn::Atan => one(args)?.atan(),
        MathFn::Atan2 => {
            arity(name, args, 2, 2)?;
            real(&args[0])?.atan2(real(&args[1])?)
        }
        MathFn::Hypot => {
            let mut acc = 0.0f64;
            for a in args {
                acc = acc.hypot(real(a)?);
            }
            acc
        }
        MathFn::Degrees => one(args)?.to_degrees(),
        MathFn::Radians => one(args)?.to_radians(),
        MathFn::Fabs => one(args)?.abs(),
        MathFn::Isnan => return Ok(Value::Bool(one(args)?.is_nan())),
        MathFn::Isinf => return Ok(Value::Bool(one(args)?.is_infinite())),
        MathFn::Gcd => {
            let mut acc = BigInt::zero();
            for a in args {
                acc = gcd_big(&acc, &int_value(a)?);
            }
            return Ok(Value::int(acc));
        }
        MathFn::Lcm => {
            let mut acc = BigInt::one();
            for a in args {
                let n = int_value(a)?;
                if acc.is_zero() || n.is_zero() {
                    acc = BigInt::zero();
                    continue;
                }
                let g = gcd_big(&acc, &n);
                acc = (&acc * &n).abs() / g;
                check_bits(&acc)?;
            }
            return Ok(Value::int(acc));
        }
        MathFn::Isqrt => {
            arity(name, args, 1, 1)?;
            let n = int_value(&args[0])?;
            if n.is_negative() {
                return Err("isqrt() argument must be nonnegative".into());
            }
            return Ok(Value::int(n.sqrt()));
        }
        MathFn::Factorial
        | MathFn::Comb
        | MathFn::Perm
        | MathFn::Prod
        | MathFn::Fsum
        | MathFn::Isclose => return Err(format!("{name}() cannot be called here")),
    };
    Ok(Value::Float(v))
}
