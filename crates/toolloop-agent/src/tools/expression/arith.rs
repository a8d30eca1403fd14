//! Arithmetic, bitwise, set and sequence operators.
//!
//! Integers stay in `i64` until an operation overflows, then continue as
//! arbitrary-precision values capped at [`MAX_INT_BITS`].

use num_bigint::BigInt;
use num_traits::{FromPrimitive, One, Signed, ToPrimitive, Zero};

use super::format::percent_format;
use super::parser::{BinOp, UnaryOp};
use super::value::{check_len, Num, Table, Value, VALUE_SIZE};

/// Widest integer the evaluator will build.
pub(crate) const MAX_INT_BITS: u64 = 1 << 20;

pub(crate) fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "** or pow()",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::LShift => "<<",
        BinOp::RShift => ">>",
    }
}

fn unsupported(op: BinOp, l: &Value, r: &Value) -> String {
    format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op_symbol(op),
        l.type_name(),
        r.type_name()
    )
}

fn too_large() -> String {
    format!("integer too large (limit {MAX_INT_BITS} bits)")
}

fn check_bits(bits: u64) -> Result<(), String> {
    if bits > MAX_INT_BITS {
        Err(too_large())
    } else {
        Ok(())
    }
}

pub(crate) fn to_big(n: Num<'_>) -> BigInt {
    match n {
        Num::Int(i) => BigInt::from(i),
        Num::Big(b) => b.clone(),
        Num::Float(f) => BigInt::from_f64(f.trunc()).unwrap_or_default(),
    }
}

pub(crate) fn to_float(n: Num<'_>) -> Result<f64, String> {
    match n {
        Num::Int(i) => Ok(i as f64),
        Num::Float(f) => Ok(f),
        Num::Big(b) => b
            .to_f64()
            .filter(|f| f.is_finite())
            .ok_or_else(|| "int too large to convert to float".to_string()),
    }
}

/// Float argument of a math function.
pub(crate) fn real(v: &Value) -> Result<f64, String> {
    match v.num() {
        Some(n) => to_float(n),
        None => Err(format!("must be real number, not {}", v.type_name())),
    }
}

/// Truncate a float to an `int`.
pub(crate) fn float_to_int(f: f64) -> Result<Value, String> {
    if f.is_nan() {
        return Err("cannot convert float NaN to integer".into());
    }
    if f.is_infinite() {
        return Err("cannot convert float infinity to integer".into());
    }
    let t = f.trunc();
    if t.abs() < 9.0e18 {
        return Ok(Value::Int(t as i64));
    }
    Ok(Value::int(BigInt::from_f64(t).unwrap_or_default()))
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn py_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

fn floor_div_big(x: &BigInt, y: &BigInt) -> BigInt {
    let q = x / y;
    let r = x % y;
    if !r.is_zero() && (r.is_negative() != y.is_negative()) {
        q - BigInt::one()
    } else {
        q
    }
}

fn mod_big(x: &BigInt, y: &BigInt) -> BigInt {
    let r = x % y;
    if !r.is_zero() && (r.is_negative() != y.is_negative()) {
        r + y
    } else {
        r
    }
}

pub(crate) fn gcd_big(a: &BigInt, b: &BigInt) -> BigInt {
    let (mut a, mut b) = (a.abs(), b.abs());
    while !b.is_zero() {
        let r = &a % &b;
        a = b;
        b = r;
    }
    a
}

/// Correctly scaled `x / y` for integers of any size.
fn int_true_div(x: &BigInt, y: &BigInt) -> Result<f64, String> {
    if y.is_zero() {
        return Err("division by zero".into());
    }
    let (fx, fy) = (x.to_f64().unwrap_or(f64::INFINITY), y.to_f64().unwrap_or(f64::INFINITY));
    let q = if fx.is_finite() && fy.is_finite() {
        fx / fy
    } else {
        let shift = x.bits().max(y.bits()).saturating_sub(1000) as usize;
        let (sx, sy) = (x >> shift, y >> shift);
        let sx = sx.to_f64().unwrap_or(f64::INFINITY);
        let sy = sy.to_f64().unwrap_or(f64::INFINITY);
        sx / sy
    };
    if q.is_finite() {
        Ok(q)
    } else {
        Err("integer division result too large for a float".into())
    }
}

fn negative_power(x: f64, y: f64) -> Result<Value, String> {
    if x == 0.0 {
        return Err("0.0 cannot be raised to a negative power".into());
    }
    Ok(Value::Float(x.powf(y)))
}

fn int_binary(op: BinOp, x: i64, y: i64) -> Result<Value, String> {
    let fast = match op {
        BinOp::Add => x.checked_add(y),
        BinOp::Sub => x.checked_sub(y),
        BinOp::Mul => x.checked_mul(y),
        BinOp::Div => {
            const EXACT: i64 = 1 << 53;
            if y == 0 {
                return Err("division by zero".into());
            }
            if (-EXACT..=EXACT).contains(&x) && (-EXACT..=EXACT).contains(&y) {
                return Ok(Value::Float(x as f64 / y as f64));
            }
            None
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err("integer division or modulo by zero".into());
            }
            floor_div(x, y)
        }
        BinOp::Mod => {
            if y == 0 {
                return Err("integer modulo by zero".into());
            }
            py_mod(x, y)
        }
        BinOp::Pow => {
            if y < 0 {
                return negative_power(x as f64, y as f64);
            }
            u32::try_from(y).ok().and_then(|e| x.checked_pow(e))
        }
        BinOp::BitAnd => Some(x & y),
        BinOp::BitOr => Some(x | y),
        BinOp::BitXor => Some(x ^ y),
        BinOp::LShift => {
            if y < 0 {
                return Err("negative shift count".into());
            }
            if x == 0 {
                Some(0)
            } else if y < 63 && (x << y) >> y == x {
                Some(x << y)
            } else {
                None
            }
        }
        BinOp::RShift => {
            if y < 0 {
                return Err("negative shift count".into());
            }
            Some(if y >= 64 { x >> 63 } else { x >> y })
        }
    };
    match fast {
        Some(v) => Ok(Value::Int(v)),
        None => big_binary(op, &BigInt::from(x), &BigInt::from(y)),
    }
}

fn big_binary(op: BinOp, x: &BigInt, y: &BigInt) -> Result<Value, String> {
    let v = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => {
            check_bits(x.bits() + y.bits())?;
            x * y
        }
        BinOp::Div => return int_true_div(x, y).map(Value::Float),
        BinOp::FloorDiv => {
            if y.is_zero() {
                return Err("integer division or modulo by zero".into());
            }
            floor_div_big(x, y)
        }
        BinOp::Mod => {
            if y.is_zero() {
                return Err("integer modulo by zero".into());
            }
            mod_big(x, y)
        }
        BinOp::Pow => {
            if y.is_negative() {
                return negative_power(to_float(Num::Big(x))?, to_float(Num::Big(y))?);
            }
            if x.is_zero() || x.is_one() {
                return Ok(Value::int(if y.is_zero() { BigInt::one() } else { x.clone() }));
            }
            if x.abs().is_one() {
                let odd = (y % BigInt::from(2)).is_one();
                return Ok(Value::Int(if odd { -1 } else { 1 }));
            }
            let e = y.to_u32().ok_or_else(too_large)?;
            check_bits((x.bits() - 1).saturating_mul(u64::from(e)))?;
            x.pow(e)
        }
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
        BinOp::LShift => {
            if y.is_negative() {
                return Err("negative shift count".into());
            }
            if x.is_zero() {
                return Ok(Value::Int(0));
            }
            let s = y.to_u64().ok_or_else(too_large)?;
            check_bits(x.bits().saturating_add(s))?;
            x << (s as usize)
        }
        BinOp::RShift => {
            if y.is_negative() {
                return Err("negative shift count".into());
            }
            match y.to_usize() {
                Some(s) => x >> s,
                None if x.is_negative() => BigInt::from(-1),
                None => BigInt::zero(),
            }
        }
    };
    check_bits(v.bits())?;
    Ok(Value::int(v))
}

fn float_binary(op: BinOp, x: f64, y: f64) -> Result<Value, String> {
    let v = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err("float division by zero".into());
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err("float floor division by zero".into());
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err("float modulo by zero".into());
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err("0.0 cannot be raised to a negative power".into());
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err("negative number cannot be raised to a fractional power".into());
            }
            let r = x.powf(y);
            if r.is_infinite() && x.is_finite() && y.is_finite() {
                return Err("(34, 'Numerical result out of range')".into());
            }
            r
        }
        // Callers reject bitwise operators on floats.
        _ => f64::NAN,
    };
    Ok(Value::Float(v))
}

fn is_bitwise(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::LShift | BinOp::RShift
    )
}

/// Repetition count for `seq * n`; negative counts give an empty result.
fn repeat_count(n: &Value, item_len: usize) -> Result<usize, String> {
    let times = match n {
        Value::BigInt(b) if b.is_negative() => 0,
        Value::BigInt(_) => usize::MAX,
        other => other.as_int().unwrap_or(0).max(0) as usize,
    };
    if item_len == 0 {
        return Ok(0);
    }
    check_len(item_len.saturating_mul(times))?;
    Ok(times)
}

fn repeat(items: &[Value], n: &Value) -> Result<Vec<Value>, String> {
    let times = repeat_count(n, items.len())?;
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    Ok(out)
}

/// `|`, `&`, `-` and `^` on set tables.
pub(crate) fn set_binary(op: BinOp, a: &Table, b: &Table) -> Result<Table, String> {
    let mut out = Table::default();
    match op {
        BinOp::BitOr => {
            for k in a.keys().chain(b.keys()) {
                out.insert(k.clone(), Value::None)?;
            }
        }
        BinOp::BitAnd => {
            for k in a.keys() {
                if b.contains(k)? {
                    out.insert(k.clone(), Value::None)?;
                }
            }
        }
        BinOp::Sub => {
            for k in a.keys() {
                if !b.contains(k)? {
                    out.insert(k.clone(), Value::None)?;
                }
            }
        }
        _ => {
            for k in a.keys() {
                if !b.contains(k)? {
                    out.insert(k.clone(), Value::None)?;
                }
            }
            for k in b.keys() {
                if !a.contains(k)? {
                    out.insert(k.clone(), Value::None)?;
                }
            }
        }
    }
    Ok(out)
}

fn sequence_len(v: &Value) -> Option<(usize, usize)> {
    match v {
        Value::Str(s) => Some((s.len(), 1)),
        Value::List(l) => Some((l.len(), VALUE_SIZE)),
        Value::Tuple(t) => Some((t.items().len(), VALUE_SIZE)),
        _ => None,
    }
}

/// Bytes a sequence `+` or `*` would allocate, known before building it.
pub(crate) fn sequence_result_size(op: BinOp, l: &Value, r: &Value) -> usize {
    match op {
        BinOp::Add => match (sequence_len(l), sequence_len(r)) {
            (Some((a, unit)), Some((b, _))) => (a + b).saturating_mul(unit),
            _ => 0,
        },
        BinOp::Mul => {
            let (seq, n) = if sequence_len(l).is_some() { (l, r) } else { (r, l) };
            match (sequence_len(seq), n) {
                (Some((len, unit)), Value::Int(k)) if *k > 0 => {
                    len.saturating_mul(*k as usize).saturating_mul(unit)
                }
                (Some((len, _)), Value::BigInt(b)) if b.is_positive() && len > 0 => usize::MAX,
                _ => 0,
            }
        }
        _ => 0,
    }
}

/// Apply a binary operator.
pub(crate) fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, String> {
    match (op, l, r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            check_len(a.len() + b.len())?;
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            return Ok(Value::str(s));
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let (a, b) = (a.items(), b.items());
            check_len(a.len() + b.len())?;
            return Ok(Value::list(a.iter().chain(b.iter()).cloned().collect()));
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let (a, b) = (a.items(), b.items());
            check_len(a.len() + b.len())?;
            return Ok(Value::tuple(a.iter().chain(b).cloned().collect()));
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.is_int() => {
            let times = repeat_count(n, s.len())?;
            return Ok(Value::str(s.repeat(times)));
        }
        (BinOp::Mul, Value::List(v), n) | (BinOp::Mul, n, Value::List(v)) if n.is_int() => {
            let items = repeat(&v.items(), n)?;
            return Ok(Value::list(items));
        }
        (BinOp::Mul, Value::Tuple(v), n) | (BinOp::Mul, n, Value::Tuple(v)) if n.is_int() => {
            return Ok(Value::tuple(repeat(v.items(), n)?));
        }
        (BinOp::Mod, Value::Str(s), args) => return percent_format(s, args).map(Value::str),
        (BinOp::Sub | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor, Value::Set(a), Value::Set(b)) => {
            return set_binary(op, &a.table(), &b.table()).map(Value::set);
        }
        (BinOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
            let mut merged = a.table().copy();
            for (k, v) in b.table().iter() {
                merged.insert(k.clone(), v.clone())?;
            }
            return Ok(Value::dict(merged));
        }
        _ => {}
    }

    let (a, b) = match (l.num(), r.num()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(unsupported(op, l, r)),
    };
    match (a, b) {
        (Num::Float(_), _) | (_, Num::Float(_)) => {
            if is_bitwise(op) {
                return Err(unsupported(op, l, r));
            }
            float_binary(op, to_float(a)?, to_float(b)?)
        }
        (Num::Int(x), Num::Int(y)) => int_binary(op, x, y),
        _ => big_binary(op, &to_big(a), &to_big(b)),
    }
}

/// Apply a unary operator.
pub(crate) fn unary(op: UnaryOp, v: &Value) -> Result<Value, String> {
    let symbol = match op {
        UnaryOp::Not => return Ok(Value::Bool(!v.truthy())),
        UnaryOp::Neg => "-",
        UnaryOp::Pos => "+",
        UnaryOp::Invert => "~",
    };
    match (op, v.num()) {
        (UnaryOp::Neg, Some(Num::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Some(Num::Float(f))) => Ok(Value::Float(f)),
        (UnaryOp::Neg, Some(Num::Int(i))) => Ok(match i.checked_neg() {
            Some(n) => Value::Int(n),
            None => Value::int(-BigInt::from(i)),
        }),
        (UnaryOp::Pos, Some(Num::Int(i))) => Ok(Value::Int(i)),
        (UnaryOp::Invert, Some(Num::Int(i))) => Ok(Value::Int(!i)),
        (UnaryOp::Neg, Some(Num::Big(b))) => Ok(Value::int(-b)),
        (UnaryOp::Pos, Some(Num::Big(b))) => Ok(Value::int(b.clone())),
        (UnaryOp::Invert, Some(Num::Big(b))) => Ok(Value::int(-(b + BigInt::one()))),
        _ => Err(format!(
            "bad operand type for unary {symbol}: '{}'",
            v.type_name()
        )),
    }
}
