//! Runtime values for the expression evaluator, with Python-compatible
//! formatting, truthiness, equality, hashing and ordering.
//!
//! Lists, dicts and sets are shared through `Rc`, so assignment aliases
//! them the way Python does. Reference cycles (`xs.append(xs)`) are never
//! reclaimed; the evaluator's allocation budget bounds what they can hold.

use std::cell::{Ref, RefCell, RefMut};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive};

use super::parser::{CmpOp, FuncDef};

/// Largest sequence or string the evaluator will materialise.
pub(crate) const MAX_SEQUENCE_LEN: usize = 10_000_000;
/// Deepest container nesting walked by equality, hashing, ordering and repr.
pub(crate) const MAX_RECURSION: usize = 500;
/// Longest decimal rendering of an `int`.
pub(crate) const MAX_INT_DIGITS: usize = 4300;
pub(crate) const VALUE_SIZE: usize = std::mem::size_of::<Value>();
/// Accounting size of one dict or set entry.
pub(crate) const ENTRY_SIZE: usize = 2 * VALUE_SIZE + 16;

/// Variables of one function activation or comprehension.
pub(crate) type Scope = Rc<RefCell<HashMap<String, Value>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Module {
    Math,
}

impl Module {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "math" => Some(Module::Math),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Builtin {
    Print,
    Abs,
    Min,
    Max,
    Sum,
    Len,
    Range,
    Round,
    Int,
    Float,
    Str,
    Bool,
    List,
    Tuple,
    Dict,
    Set,
    Sorted,
    Reversed,
    Pow,
    Enumerate,
    Zip,
    Map,
    Filter,
    Any,
    All,
    Divmod,
    Isinstance,
    Chr,
    Ord,
    Hex,
    Bin,
    Oct,
    Repr,
}

impl Builtin {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        let b = match name {
            "print" => Builtin::Print,
            "abs" => Builtin::Abs,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "sum" => Builtin::Sum,
            "len" => Builtin::Len,
            "range" => Builtin::Range,
            "round" => Builtin::Round,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "str" => Builtin::Str,
            "bool" => Builtin::Bool,
            "list" => Builtin::List,
            "tuple" => Builtin::Tuple,
            "dict" => Builtin::Dict,
            "set" => Builtin::Set,
            "sorted" => Builtin::Sorted,
            "reversed" => Builtin::Reversed,
            "pow" => Builtin::Pow,
            "enumerate" => Builtin::Enumerate,
            "zip" => Builtin::Zip,
            "map" => Builtin::Map,
            "filter" => Builtin::Filter,
            "any" => Builtin::Any,
            "all" => Builtin::All,
            "divmod" => Builtin::Divmod,
            "isinstance" => Builtin::Isinstance,
            "chr" => Builtin::Chr,
            "ord" => Builtin::Ord,
            "hex" => Builtin::Hex,
            "bin" => Builtin::Bin,
            "oct" => Builtin::Oct,
            "repr" => Builtin::Repr,
            _ => return None,
        };
        Some(b)
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sum => "sum",
            Builtin::Len => "len",
            Builtin::Range => "range",
            Builtin::Round => "round",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Set => "set",
            Builtin::Sorted => "sorted",
            Builtin::Reversed => "reversed",
            Builtin::Pow => "pow",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Map => "map",
            Builtin::Filter => "filter",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Divmod => "divmod",
            Builtin::Isinstance => "isinstance",
            Builtin::Chr => "chr",
            Builtin::Ord => "ord",
            Builtin::Hex => "hex",
            Builtin::Bin => "bin",
            Builtin::Oct => "oct",
            Builtin::Repr => "repr",
        }
    }

    /// Builtins that are also types (`int`, `list`, ...).
    pub(crate) fn is_type(self) -> bool {
        matches!(
            self,
            Builtin::Int
                | Builtin::Float
                | Builtin::Str
                | Builtin::Bool
                | Builtin::List
                | Builtin::Tuple
                | Builtin::Dict
                | Builtin::Set
                | Builtin::Range
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MathFn {
    Sqrt,
    Floor,
    Ceil,
    Trunc,
    Pow,
    Log,
    Log10,
    Log2,
    Exp,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Hypot,
    Degrees,
    Radians,
    Fabs,
    Factorial,
    Gcd,
    Lcm,
    Isqrt,
    Comb,
    Perm,
    Prod,
    Fsum,
    Isclose,
    Isnan,
    Isinf,
}

impl MathFn {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        let f = match name {
            "sqrt" => MathFn::Sqrt,
            "floor" => MathFn::Floor,
            "ceil" => MathFn::Ceil,
            "trunc" => MathFn::Trunc,
            "pow" => MathFn::Pow,
            "log" => MathFn::Log,
            "log10" => MathFn::Log10,
            "log2" => MathFn::Log2,
            "exp" => MathFn::Exp,
            "sin" => MathFn::Sin,
            "cos" => MathFn::Cos,
            "tan" => MathFn::Tan,
            "asin" => MathFn::Asin,
            "acos" => MathFn::Acos,
            "atan" => MathFn::Atan,
            "atan2" => MathFn::Atan2,
            "hypot" => MathFn::Hypot,
            "degrees" => MathFn::Degrees,
            "radians" => MathFn::Radians,
            "fabs" => MathFn::Fabs,
            "factorial" => MathFn::Factorial,
            "gcd" => MathFn::Gcd,
            "lcm" => MathFn::Lcm,
            "isqrt" => MathFn::Isqrt,
            "comb" => MathFn::Comb,
            "perm" => MathFn::Perm,
            "prod" => MathFn::Prod,
            "fsum" => MathFn::Fsum,
            "isclose" => MathFn::Isclose,
            "isnan" => MathFn::Isnan,
            "isinf" => MathFn::Isinf,
            _ => return None,
        };
        Some(f)
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            MathFn::Sqrt => "sqrt",
            MathFn::Floor => "floor",
            MathFn::Ceil => "ceil",
            MathFn::Trunc => "trunc",
            MathFn::Pow => "pow",
            MathFn::Log => "log",
            MathFn::Log10 => "log10",
            MathFn::Log2 => "log2",
            MathFn::Exp => "exp",
            MathFn::Sin => "sin",
            MathFn::Cos => "cos",
            MathFn::Tan => "tan",
            MathFn::Asin => "asin",
            MathFn::Acos => "acos",
            MathFn::Atan => "atan",
            MathFn::Atan2 => "atan2",
            MathFn::Hypot => "hypot",
            MathFn::Degrees => "degrees",
            MathFn::Radians => "radians",
            MathFn::Fabs => "fabs",
            MathFn::Factorial => "factorial",
            MathFn::Gcd => "gcd",
            MathFn::Lcm => "lcm",
            MathFn::Isqrt => "isqrt",
            MathFn::Comb => "comb",
            MathFn::Perm => "perm",
            MathFn::Prod => "prod",
            MathFn::Fsum => "fsum",
            MathFn::Isclose => "isclose",
            MathFn::Isnan => "isnan",
            MathFn::Isinf => "isinf",
        }
    }
}

// ─────────────────────────────────────────────
// Functions
// ─────────────────────────────────────────────

/// A user function: `def` or `lambda`, closed over its defining scopes.
pub(crate) struct UserFn {
    pub def: Rc<FuncDef>,
    /// One slot per parameter; `None` for parameters without a default.
    pub defaults: Vec<Option<Value>>,
    pub env: Vec<Scope>,
}

/// A method looked up on a value, e.g. `d.get`.
pub(crate) struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

#[derive(Clone)]
pub(crate) enum Func {
    Builtin(Builtin),
    Math(MathFn),
    Method(Rc<BoundMethod>),
    /// A method looked up on a type, e.g. `str.lower`.
    Unbound(Builtin, Rc<str>),
    User(Rc<UserFn>),
}

impl Func {
    pub(crate) fn name(&self) -> &str {
        match self {
            Func::Builtin(b) => b.name(),
            Func::Math(m) => m.name(),
            Func::Method(m) => &m.name,
            Func::Unbound(_, name) => name,
            Func::User(f) => &f.def.name,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Func::Builtin(b) if b.is_type() => "type",
            Func::Builtin(_) | Func::Math(_) | Func::Method(_) => "builtin_function_or_method",
            Func::Unbound(..) => "method_descriptor",
            Func::User(_) => "function",
        }
    }

    fn same(&self, other: &Func) -> bool {
        match (self, other) {
            (Func::Builtin(a), Func::Builtin(b)) => a == b,
            (Func::Math(a), Func::Math(b)) => a == b,
            (Func::Method(a), Func::Method(b)) => {
                Rc::ptr_eq(a, b) || (a.name == b.name && is_same(&a.receiver, &b.receiver))
            }
            (Func::Unbound(a, x), Func::Unbound(b, y)) => a == b && x == y,
            (Func::User(a), Func::User(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn repr(&self) -> String {
        match self {
            Func::Builtin(b) if b.is_type() => format!("<class '{}'>", b.name()),
            Func::Builtin(b) => format!("<built-in function {}>", b.name()),
            Func::Math(m) => format!("<built-in function {}>", m.name()),
            Func::Method(m) => format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            ),
            Func::Unbound(b, name) => format!("<method '{name}' of '{}' objects>", b.name()),
            Func::User(f) => format!("<function {}>", f.def.name),
        }
    }
}

// ─────────────────────────────────────────────
// Containers
// ─────────────────────────────────────────────

/// Backing store of a `list`. A `RefMut` is never held across evaluation.
#[derive(Default)]
pub(crate) struct ListObj(RefCell<Vec<Value>>);

impl ListObj {
    pub(crate) fn items(&self) -> Ref<'_, Vec<Value>> {
        self.0.borrow()
    }

    pub(crate) fn items_mut(&self) -> Result<RefMut<'_, Vec<Value>>, String> {
        self.0
            .try_borrow_mut()
            .map_err(|_| "list modified during iteration".to_string())
    }

    pub(crate) fn len(&self) -> usize {
        self.0.try_borrow().map(|v| v.len()).unwrap_or(0)
    }

    pub(crate) fn snapshot(&self) -> Vec<Value> {
        self.items().clone()
    }
}

#[derive(Default)]
pub(crate) struct TupleObj(Vec<Value>);

impl TupleObj {
    pub(crate) fn items(&self) -> &[Value] {
        &self.0
    }
}

struct Entry {
    hash: u64,
    key: Value,
    value: Value,
}

/// Insertion-ordered hash table behind `dict` and `set`. Sets store `None`
/// as every value.
#[derive(Default)]
pub(crate) struct Table {
    entries: Vec<Option<Entry>>,
    index: HashMap<u64, Vec<usize>>,
    live: usize,
}

impl Table {
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> + '_ {
        self.entries
            .iter()
            .flatten()
            .map(|e| (&e.key, &e.value))
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.iter().map(|(_, v)| v)
    }

    fn find(&self, key: &Value, hash: u64) -> Result<Option<usize>, String> {
        let Some(slots) = self.index.get(&hash) else {
            return Ok(None);
        };
        for &slot in slots {
            if let Some(entry) = &self.entries[slot] {
                if py_eq(&entry.key, key)? {
                    return Ok(Some(slot));
                }
            }
        }
        Ok(None)
    }

    pub(crate) fn get(&self, key: &Value) -> Result<Option<Value>, String> {
        let hash = hash_key(key)?;
        Ok(self
            .find(key, hash)?
            .and_then(|slot| self.entries[slot].as_ref())
            .map(|e| e.value.clone()))
    }

    pub(crate) fn contains(&self, key: &Value) -> Result<bool, String> {
        let hash = hash_key(key)?;
        Ok(self.find(key, hash)?.is_some())
    }

    /// Insert or overwrite. Returns `true` when the key is new; an existing
    /// key object is kept.
    pub(crate) fn insert(&mut self, key: Value, value: Value) -> Result<bool, String> {
        let hash = hash_key(&key)?;
        if let Some(slot) = self.find(&key, hash)? {
            if let Some(entry) = self.entries[slot].as_mut() {
                entry.value = value;
            }
            return Ok(false);
        }
        self.index.entry(hash).or_default().push(self.entries.len());
        self.entries.push(Some(Entry { hash, key, value }));
        self.live += 1;
        Ok(true)
    }

    pub(crate) fn remove(&mut self, key: &Value) -> Result<Option<(Value, Value)>, String> {
        let hash = hash_key(key)?;
        Ok(self.find(key, hash)?.and_then(|slot| self.take_slot(slot)))
    }

    fn take_slot(&mut self, slot: usize) -> Option<(Value, Value)> {
        let entry = self.entries.get_mut(slot)?.take()?;
        if let Some(slots) = self.index.get_mut(&entry.hash) {
            slots.retain(|&s| s != slot);
            if slots.is_empty() {
                self.index.remove(&entry.hash);
            }
        }
        self.live -= 1;
        while matches!(self.entries.last(), Some(None)) {
            self.entries.pop();
        }
        if self.entries.len() > 2 * self.live + 8 {
            self.compact();
        }
        Some((entry.key, entry.value))
    }

    fn compact(&mut self) {
        self.entries.retain(Option::is_some);
        self.index.clear();
        for (slot, entry) in self.entries.iter().enumerate() {
            if let Some(e) = entry {
                self.index.entry(e.hash).or_default().push(slot);
            }
        }
    }

    /// Remove the most recently inserted entry.
    pub(crate) fn pop_last(&mut self) -> Option<(Value, Value)> {
        let slot = self.entries.iter().rposition(Option::is_some)?;
        self.take_slot(slot)
    }

    /// Remove the oldest entry.
    pub(crate) fn pop_first(&mut self) -> Option<(Value, Value)> {
        let slot = self.entries.iter().position(Option::is_some)?;
        self.take_slot(slot)
    }

    pub(crate) fn clear(&mut self) -> Vec<Value> {
        self.index.clear();
        self.live = 0;
        self.drain()
    }

    fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::with_capacity(self.live * 2);
        for entry in std::mem::take(&mut self.entries).into_iter().flatten() {
            out.push(entry.key);
            out.push(entry.value);
        }
        out
    }

    /// Shallow copy.
    pub(crate) fn copy(&self) -> Table {
        let mut index: HashMap<u64, Vec<usize>> = HashMap::with_capacity(self.live);
        let mut entries = Vec::with_capacity(self.live);
        for entry in self.entries.iter().flatten() {
            index.entry(entry.hash).or_default().push(entries.len());
            entries.push(Some(Entry {
                hash: entry.hash,
                key: entry.key.clone(),
                value: entry.value.clone(),
            }));
        }
        Table {
            entries,
            index,
            live: self.live,
        }
    }

    /// A set table from `keys`; duplicates collapse.
    pub(crate) fn from_keys(keys: impl IntoIterator<Item = Value>) -> Result<Table, String> {
        let mut table = Table::default();
        for key in keys {
            table.insert(key, Value::None)?;
        }
        Ok(table)
    }
}

/// Backing store of a `dict` or `set`.
#[derive(Default)]
pub(crate) struct DictObj(RefCell<Table>);

impl DictObj {
    pub(crate) fn table(&self) -> Ref<'_, Table> {
        self.0.borrow()
    }

    pub(crate) fn table_mut(&self) -> Result<RefMut<'_, Table>, String> {
        self.0
            .try_borrow_mut()
            .map_err(|_| "dictionary changed size during iteration".to_string())
    }

    pub(crate) fn len(&self) -> usize {
        self.0.try_borrow().map(|t| t.len()).unwrap_or(0)
    }
}

/// Drop values without recursing through nested containers, so deeply
/// nested data cannot exhaust the stack on the way out.
fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::List(rc) => {
                if let Ok(mut list) = Rc::try_unwrap(rc) {
                    pending.append(list.0.get_mut());
                }
            }
            Value::Tuple(rc) => {
                if let Ok(mut tuple) = Rc::try_unwrap(rc) {
                    pending.append(&mut tuple.0);
                }
            }
            Value::Dict(rc) | Value::Set(rc) => {
                if let Ok(mut dict) = Rc::try_unwrap(rc) {
                    pending.extend(dict.0.get_mut().drain());
                }
            }
            Value::Func(Func::Method(rc)) => {
                if let Ok(mut method) = Rc::try_unwrap(rc) {
                    pending.push(std::mem::replace(&mut method.receiver, Value::None));
                }
            }
            Value::Func(Func::User(rc)) => {
                if let Ok(mut func) = Rc::try_unwrap(rc) {
                    pending.extend(func.take_values());
                }
            }
            _ => {}
        }
    }
}

impl UserFn {
    fn take_values(&mut self) -> Vec<Value> {
        let mut out: Vec<Value> = self.defaults.drain(..).flatten().collect();
        for scope in self.env.drain(..) {
            if let Ok(cell) = Rc::try_unwrap(scope) {
                out.extend(cell.into_inner().into_values());
            }
        }
        out
    }
}

impl Drop for ListObj {
    fn drop(&mut self) {
        release(std::mem::take(self.0.get_mut()));
    }
}

impl Drop for TupleObj {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.0));
    }
}

impl Drop for DictObj {
    fn drop(&mut self) {
        release(self.0.get_mut().drain());
    }
}

impl Drop for BoundMethod {
    fn drop(&mut self) {
        release(vec![std::mem::replace(&mut self.receiver, Value::None)]);
    }
}

impl Drop for UserFn {
    fn drop(&mut self) {
        let values = self.take_values();
        release(values);
    }
}

// ─────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub(crate) fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let n = if step > 0 && stop > start {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        usize::try_from(n).unwrap_or(usize::MAX)
    }

    /// The `i`-th element; `i` must be below `len()`.
    pub(crate) fn get(&self, i: usize) -> i64 {
        (self.start as i128 + i as i128 * self.step as i128) as i64
    }

    pub(crate) fn contains(&self, n: i64) -> bool {
        let (n, start, stop, step) = (n as i128, self.start as i128, self.stop as i128, self.step as i128);
        let inside = if step > 0 {
            start <= n && n < stop
        } else {
            stop < n && n <= start
        };
        inside && (n - start) % step == 0
    }
}

#[derive(Clone)]
pub(crate) enum Value {
    None,
    Bool(bool),
    Int(i64),
    /// Only for magnitudes outside `i64`; see [`Value::int`].
    BigInt(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    List(Rc<ListObj>),
    Tuple(Rc<TupleObj>),
    Dict(Rc<DictObj>),
    Set(Rc<DictObj>),
    Range(Range),
    Func(Func),
    Module(Module),
}

/// Numeric view of a value; `bool` counts as `int`.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Num<'a> {
    Int(i64),
    Big(&'a BigInt),
    Float(f64),
}

/// Iteration over a value without materialising ranges.
pub(crate) enum Items {
    Values(std::vec::IntoIter<Value>),
    Range { range: Range, next: usize, len: usize },
}

impl Iterator for Items {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Items::Values(it) => it.next(),
            Items::Range { range, next, len } => {
                if *next >= *len {
                    return None;
                }
                let v = range.get(*next);
                *next += 1;
                Some(Value::Int(v))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = match self {
            Items::Values(it) => it.len(),
            Items::Range { next, len, .. } => len - next,
        };
        (n, Some(n))
    }
}

impl Value {
    pub(crate) fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub(crate) fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(ListObj(RefCell::new(items))))
    }

    pub(crate) fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(TupleObj(items)))
    }

    pub(crate) fn dict(table: Table) -> Value {
        Value::Dict(Rc::new(DictObj(RefCell::new(table))))
    }

    pub(crate) fn set(table: Table) -> Value {
        Value::Set(Rc::new(DictObj(RefCell::new(table))))
    }

    /// An `int`, stored inline when it fits in 64 bits.
    pub(crate) fn int(b: BigInt) -> Value {
        match b.to_i64() {
            Some(i) => Value::Int(i),
            None => Value::BigInt(Rc::new(b)),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::BigInt(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range(_) => "range",
            Value::Func(f) => f.type_name(),
            Value::Module(_) => "module",
        }
    }

    pub(crate) fn num(&self) -> Option<Num<'_>> {
        match self {
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            Value::Int(i) => Some(Num::Int(*i)),
            Value::BigInt(b) => Some(Num::Big(b)),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    /// Small-integer view (`int` within 64 bits, or `bool`).
    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn is_int(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::BigInt(_))
    }

    pub(crate) fn to_bigint(&self) -> Option<BigInt> {
        match self {
            Value::BigInt(b) => Some(BigInt::clone(b)),
            other => other.as_int().map(BigInt::from),
        }
    }

    /// Float view of any number; huge ints become infinite.
    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self.num()? {
            Num::Int(i) => Some(i as f64),
            Num::Big(b) => Some(b.to_f64().unwrap_or(f64::INFINITY)),
            Num::Float(f) => Some(f),
        }
    }

    pub(crate) fn is_number(&self) -> bool {
        self.num().is_some()
    }

    pub(crate) fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::BigInt(_) => true,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => l.len() > 0,
            Value::Tuple(t) => !t.items().is_empty(),
            Value::Dict(d) | Value::Set(d) => d.len() > 0,
            Value::Range(r) => r.len() > 0,
            Value::Func(_) | Value::Module(_) => true,
        }
    }

    /// Element count of a sized value.
    pub(crate) fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::List(l) => Some(l.len()),
            Value::Tuple(t) => Some(t.items().len()),
            Value::Dict(d) | Value::Set(d) => Some(d.len()),
            Value::Range(r) => Some(r.len()),
            _ => None,
        }
    }

    /// Bytes owned by a value nothing else references yet; zero when shared.
    pub(crate) fn fresh_size(&self) -> usize {
        match self {
            Value::Str(s) if Rc::strong_count(s) == 1 => s.len(),
            Value::BigInt(b) if Rc::strong_count(b) == 1 => (b.bits() / 8) as usize,
            Value::List(l) if Rc::strong_count(l) == 1 => l.len() * VALUE_SIZE,
            Value::Tuple(t) if Rc::strong_count(t) == 1 => t.items().len() * VALUE_SIZE,
            Value::Dict(d) | Value::Set(d) if Rc::strong_count(d) == 1 => d.len() * ENTRY_SIZE,
            _ => 0,
        }
    }

    /// Iterate lazily over ranges, eagerly over everything else.
    pub(crate) fn items(&self) -> Result<Items, String> {
        match self {
            Value::Range(r) => Ok(Items::Range {
                range: *r,
                next: 0,
                len: r.len(),
            }),
            other => Ok(Items::Values(other.iterate()?.into_iter())),
        }
    }

    /// Elements of an iterable value.
    pub(crate) fn iterate(&self) -> Result<Vec<Value>, String> {
        match self {
            Value::List(l) => Ok(l.snapshot()),
            Value::Tuple(t) => Ok(t.items().to_vec()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            Value::Dict(d) | Value::Set(d) => Ok(d.table().keys().cloned().collect()),
            Value::Range(r) => {
                let n = r.len();
                check_len(n)?;
                Ok((0..n).map(|i| Value::Int(r.get(i))).collect())
            }
            other => Err(format!("'{}' object is not iterable", other.type_name())),
        }
    }

    /// Python `str()`.
    pub(crate) fn to_str(&self) -> Result<String, String> {
        render(self, MAX_SEQUENCE_LEN, true).map_err(RenderError::into_message)
    }

    /// Python `repr()`.
    pub(crate) fn repr(&self) -> Result<String, String> {
        render(self, MAX_SEQUENCE_LEN, false).map_err(RenderError::into_message)
    }

    /// Short `repr()` for error messages.
    pub(crate) fn describe(&self) -> String {
        match render(self, 200, false) {
            Ok(s) => s,
            Err(_) => format!("<{} object>", self.type_name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Same type and Python-equal; containers compare by content.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.type_name() == other.type_name() && py_eq(self, other).unwrap_or(false)
    }
}

// ─────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub(crate) enum RenderError {
    /// The text would exceed the caller's limit.
    TooLarge,
    Failed(String),
}

impl RenderError {
    pub(crate) fn into_message(self) -> String {
        match self {
            RenderError::TooLarge => {
                format!("string too large (limit {MAX_SEQUENCE_LEN} bytes)")
            }
            RenderError::Failed(message) => message,
        }
    }
}

/// Render `v` as `repr()`, or as `str()` when `raw_str` is set, failing once
/// the text passes `limit` bytes.
pub(crate) fn render(v: &Value, limit: usize, raw_str: bool) -> Result<String, RenderError> {
    if let (true, Value::Str(s)) = (raw_str, v) {
        if s.len() > limit {
            return Err(RenderError::TooLarge);
        }
        return Ok(s.to_string());
    }
    let mut renderer = Renderer {
        out: String::new(),
        limit,
        active: Vec::new(),
    };
    renderer.value(v, 0)?;
    Ok(renderer.out)
}

struct Renderer {
    out: String,
    limit: usize,
    /// Containers currently being rendered, by address.
    active: Vec<usize>,
}

impl Renderer {
    fn push(&mut self, s: &str) -> Result<(), RenderError> {
        if self.out.len() + s.len() > self.limit {
            return Err(RenderError::TooLarge);
        }
        self.out.push_str(s);
        Ok(())
    }

    fn enter(&mut self, id: usize) -> bool {
        if self.active.contains(&id) {
            return false;
        }
        self.active.push(id);
        true
    }

    fn seq(&mut self, items: &[Value], depth: usize) -> Result<(), RenderError> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(", ")?;
            }
            self.value(item, depth + 1)?;
        }
        Ok(())
    }

    fn value(&mut self, v: &Value, depth: usize) -> Result<(), RenderError> {
        if depth > MAX_RECURSION {
            return Err(RenderError::Failed(
                "maximum recursion depth exceeded while getting the repr of an object".into(),
            ));
        }
        match v {
            Value::None => self.push("None"),
            Value::Bool(true) => self.push("True"),
            Value::Bool(false) => self.push("False"),
            Value::Int(i) => self.push(&i.to_string()),
            Value::BigInt(b) => {
                let text = int_to_string(b).map_err(RenderError::Failed)?;
                self.push(&text)
            }
            Value::Float(f) => self.push(&format_float(*f)),
            Value::Str(s) => {
                if self.out.len() + s.len() > self.limit {
                    return Err(RenderError::TooLarge);
                }
                self.push(&quote_str(s))
            }
            Value::List(l) => {
                let id = Rc::as_ptr(l) as usize;
                if !self.enter(id) {
                    return self.push("[...]");
                }
                self.push("[")?;
                self.seq(&l.items(), depth)?;
                self.active.pop();
                self.push("]")
            }
            Value::Tuple(t) => {
                self.push("(")?;
                self.seq(t.items(), depth)?;
                if t.items().len() == 1 {
                    self.push(",")?;
                }
                self.push(")")
            }
            Value::Dict(d) => {
                let id = Rc::as_ptr(d) as usize;
                if !self.enter(id) {
                    return self.push("{...}");
                }
                self.push("{")?;
                for (i, (k, val)) in d.table().iter().enumerate() {
                    if i > 0 {
                        self.push(", ")?;
                    }
                    self.value(k, depth + 1)?;
                    self.push(": ")?;
                    self.value(val, depth + 1)?;
                }
                self.active.pop();
                self.push("}")
            }
            Value::Set(s) => {
                let table = s.table();
                if table.len() == 0 {
                    return self.push("set()");
                }
                self.push("{")?;
                for (i, k) in table.keys().enumerate() {
                    if i > 0 {
                        self.push(", ")?;
                    }
                    self.value(k, depth + 1)?;
                }
                self.push("}")
            }
            Value::Range(r) => {
                let text = if r.step == 1 {
                    format!("range({}, {})", r.start, r.stop)
                } else {
                    format!("range({}, {}, {})", r.start, r.stop, r.step)
                };
                self.push(&text)
            }
            Value::Func(f) => self.push(&f.repr()),
            Value::Module(Module::Math) => self.push("<module 'math' (built-in)>"),
        }
    }
}

fn digits_error() -> String {
    format!("Exceeds the limit ({MAX_INT_DIGITS} digits) for integer string conversion")
}

/// Decimal text of a big integer, refusing more than [`MAX_INT_DIGITS`].
pub(crate) fn int_to_string(b: &BigInt) -> Result<String, String> {
    if b.bits() as f64 * std::f64::consts::LOG10_2 > (MAX_INT_DIGITS + 1) as f64 {
        return Err(digits_error());
    }
    let text = b.to_string();
    if text.trim_start_matches('-').len() > MAX_INT_DIGITS {
        return Err(digits_error());
    }
    Ok(text)
}

/// Parse decimal digits, refusing more than [`MAX_INT_DIGITS`].
pub(crate) fn parse_decimal(digits: &str) -> Option<Result<Value, String>> {
    if digits.trim_start_matches(['-', '+']).len() > MAX_INT_DIGITS {
        return Some(Err(digits_error()));
    }
    if let Ok(i) = digits.parse::<i64>() {
        return Some(Ok(Value::Int(i)));
    }
    digits.parse::<BigInt>().ok().map(|b| Ok(Value::int(b)))
}

/// Python float repr: shortest round-trip digits, `.0` on integral values,
/// scientific notation outside `[1e-4, 1e16)`.
pub(crate) fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0".into() } else { "0.0".into() };
    }
    let abs = f.abs();
    if !(1e-4..1e16).contains(&abs) {
        return python_exponent(&format!("{:e}", f));
    }
    let s = format!("{}", f);
    if s.contains('.') {
        s
    } else {
        format!("{s}.0")
    }
}

/// Rewrite Rust's `1.5e-7` exponent form as Python's `1.5e-07`.
pub(crate) fn python_exponent(s: &str) -> String {
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => s.to_string(),
    }
}

pub(crate) fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

pub(crate) fn check_len(n: usize) -> Result<(), String> {
    if n > MAX_SEQUENCE_LEN {
        Err(format!("sequence too large ({n} items, limit {MAX_SEQUENCE_LEN})"))
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Equality, hashing, ordering
// ─────────────────────────────────────────────

fn recursion_error(context: &str) -> String {
    format!("maximum recursion depth exceeded {context}")
}

fn big_float_cmp(b: &BigInt, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    if f.is_infinite() {
        return Some(if f > 0.0 { Ordering::Less } else { Ordering::Greater });
    }
    let whole = BigInt::from_f64(f.trunc())?;
    Some(match b.cmp(&whole) {
        Ordering::Equal => {
            let frac = f.fract();
            if frac > 0.0 {
                Ordering::Less
            } else if frac < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        o => o,
    })
}

fn int_float_cmp(i: i64, f: f64) -> Option<Ordering> {
    const EXACT: i64 = 1 << 53;
    if (-EXACT..=EXACT).contains(&i) {
        return (i as f64).partial_cmp(&f);
    }
    big_float_cmp(&BigInt::from(i), f)
}

/// Exact comparison across `int` and `float`; `None` involves NaN.
pub(crate) fn num_cmp(a: Num<'_>, b: Num<'_>) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        (Num::Big(x), Num::Big(y)) => Some(x.cmp(y)),
        (Num::Int(_), Num::Big(y)) => Some(if y.is_positive() {
            Ordering::Less
        } else {
            Ordering::Greater
        }),
        (Num::Big(x), Num::Int(_)) => Some(if x.is_positive() {
            Ordering::Greater
        } else {
            Ordering::Less
        }),
        (Num::Float(x), Num::Float(y)) => x.partial_cmp(&y),
        (Num::Int(x), Num::Float(y)) => int_float_cmp(x, y),
        (Num::Float(x), Num::Int(y)) => int_float_cmp(y, x).map(Ordering::reverse),
        (Num::Big(x), Num::Float(y)) => big_float_cmp(x, y),
        (Num::Float(x), Num::Big(y)) => big_float_cmp(y, x).map(Ordering::reverse),
    }
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> Result<bool, String> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !eq_at(x, y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eq_at(l: &Value, r: &Value, depth: usize) -> Result<bool, String> {
    if depth > MAX_RECURSION {
        return Err(recursion_error("in comparison"));
    }
    if let (Some(a), Some(b)) = (l.num(), r.num()) {
        return Ok(num_cmp(a, b) == Some(Ordering::Equal));
    }
    Ok(match (l, r) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            Rc::ptr_eq(a, b) || seq_eq(&a.items(), &b.items(), depth)?
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            Rc::ptr_eq(a, b) || seq_eq(a.items(), b.items(), depth)?
        }
        (Value::Dict(a), Value::Dict(b)) => {
            if Rc::ptr_eq(a, b) {
                return Ok(true);
            }
            let (a, b) = (a.table(), b.table());
            if a.len() != b.len() {
                return Ok(false);
            }
            for (k, v) in a.iter() {
                match b.get(k)? {
                    Some(other) if eq_at(v, &other, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Set(a), Value::Set(b)) => {
            let (a, b) = (a.table(), b.table());
            a.len() == b.len() && is_subset(&a, &b)?
        }
        (Value::Range(a), Value::Range(b)) => {
            let n = a.len();
            n == b.len() && (n == 0 || (a.start == b.start && (n == 1 || a.step == b.step)))
        }
        (Value::Func(a), Value::Func(b)) => a.same(b),
        (Value::Module(a), Value::Module(b)) => a == b,
        _ => false,
    })
}

/// Python `==`. Fails only on runaway nesting.
pub(crate) fn py_eq(l: &Value, r: &Value) -> Result<bool, String> {
    eq_at(l, r, 0)
}

pub(crate) fn is_subset(a: &Table, b: &Table) -> Result<bool, String> {
    for k in a.keys() {
        if !b.contains(k)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn hash_int(i: i64, h: &mut DefaultHasher) {
    0u8.hash(h);
    i.hash(h);
}

fn hash_big(b: &BigInt, h: &mut DefaultHasher) {
    1u8.hash(h);
    b.hash(h);
}

fn hash_at(v: &Value, h: &mut DefaultHasher, depth: usize) -> Result<(), String> {
    if depth > MAX_RECURSION {
        return Err(recursion_error("while hashing"));
    }
    match v {
        Value::None => 2u8.hash(h),
        Value::Bool(b) => hash_int(*b as i64, h),
        Value::Int(i) => hash_int(*i, h),
        Value::BigInt(b) => hash_big(b, h),
        Value::Float(f) => {
            // Integral floats hash like the equal int.
            const BOUND: f64 = 9_223_372_036_854_775_808.0;
            if f.is_finite() && f.fract() == 0.0 {
                if (-BOUND..BOUND).contains(f) {
                    hash_int(*f as i64, h);
                } else if let Some(b) = BigInt::from_f64(*f) {
                    hash_big(&b, h);
                }
            } else {
                3u8.hash(h);
                f.to_bits().hash(h);
            }
        }
        Value::Str(s) => {
            4u8.hash(h);
            s.hash(h);
        }
        Value::Tuple(t) => {
            5u8.hash(h);
            t.items().len().hash(h);
            for item in t.items() {
                hash_at(item, h, depth + 1)?;
            }
        }
        Value::Range(r) => {
            6u8.hash(h);
            let n = r.len();
            n.hash(h);
            if n > 0 {
                r.start.hash(h);
            }
            if n > 1 {
                r.step.hash(h);
            }
        }
        Value::Func(f) => {
            7u8.hash(h);
            f.name().hash(h);
        }
        Value::Module(m) => {
            8u8.hash(h);
            (*m as u8).hash(h);
        }
        Value::List(_) | Value::Dict(_) | Value::Set(_) => {
            return Err(format!("unhashable type: '{}'", v.type_name()));
        }
    }
    Ok(())
}

/// Hash consistent with [`py_eq`]: `1`, `1.0` and `True` hash alike.
pub(crate) fn hash_key(v: &Value) -> Result<u64, String> {
    let mut h = DefaultHasher::new();
    hash_at(v, &mut h, 0)?;
    Ok(h.finish())
}

fn ordering_at(l: &Value, r: &Value, depth: usize) -> Result<Ordering, String> {
    if depth > MAX_RECURSION {
        return Err(recursion_error("in comparison"));
    }
    if let (Some(a), Some(b)) = (l.num(), r.num()) {
        return Ok(num_cmp(a, b).unwrap_or(Ordering::Equal));
    }
    let lexicographic = |a: &[Value], b: &[Value]| -> Result<Ordering, String> {
        for (x, y) in a.iter().zip(b) {
            if !eq_at(x, y, depth + 1)? {
                return ordering_at(x, y, depth + 1);
            }
        }
        Ok(a.len().cmp(&b.len()))
    };
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => lexicographic(&a.items(), &b.items()),
        (Value::Tuple(a), Value::Tuple(b)) => lexicographic(a.items(), b.items()),
        _ => Err(format!(
            "'<' not supported between instances of '{}' and '{}'",
            l.type_name(),
            r.type_name()
        )),
    }
}

/// Total ordering used by `<`, `sorted`, `min`, `max`.
pub(crate) fn ordering(l: &Value, r: &Value) -> Result<Ordering, String> {
    ordering_at(l, r, 0)
}

fn contains(container: &Value, item: &Value) -> Result<bool, String> {
    match container {
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(&**sub)),
            other => Err(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            )),
        },
        Value::List(l) => {
            for x in l.items().iter() {
                if py_eq(x, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Tuple(t) => {
            for x in t.items() {
                if py_eq(x, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Dict(d) | Value::Set(d) => d.table().contains(item),
        Value::Range(r) => Ok(match item.num() {
            Some(Num::Int(i)) => r.contains(i),
            Some(Num::Float(f)) if f.fract() == 0.0 && f.abs() < 9.2e18 => r.contains(f as i64),
            _ => false,
        }),
        other => Err(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        )),
    }
}

/// Python `is`: identity for containers and functions, value for scalars.
pub(crate) fn is_same(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) | (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
        (Value::Func(a), Value::Func(b)) => a.same(b),
        _ => l.type_name() == r.type_name() && py_eq(l, r).unwrap_or(false),
    }
}

fn set_compare(op: CmpOp, a: &Table, b: &Table) -> Result<bool, String> {
    Ok(match op {
        CmpOp::Lt => a.len() < b.len() && is_subset(a, b)?,
        CmpOp::Le => is_subset(a, b)?,
        CmpOp::Gt => a.len() > b.len() && is_subset(b, a)?,
        _ => is_subset(b, a)?,
    })
}

/// Apply one comparison operator.
pub(crate) fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<bool, String> {
    match op {
        CmpOp::Eq => return py_eq(l, r),
        CmpOp::Ne => return py_eq(l, r).map(|b| !b),
        CmpOp::In => return contains(r, l),
        CmpOp::NotIn => return contains(r, l).map(|b| !b),
        CmpOp::Is => return Ok(is_same(l, r)),
        CmpOp::IsNot => return Ok(!is_same(l, r)),
        _ => {}
    }
    let ord = if let (Some(a), Some(b)) = (l.num(), r.num()) {
        match num_cmp(a, b) {
            Some(o) => o,
            None => return Ok(false),
        }
    } else if let (Value::Set(a), Value::Set(b)) = (l, r) {
        return set_compare(op, &a.table(), &b.table());
    } else {
        ordering(l, r)?
    };
    Ok(match op {
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        _ => ord != Ordering::Less,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(items: &[i64]) -> Value {
        Value::list(items.iter().map(|&i| Value::Int(i)).collect())
    }

    fn nested(depth: usize) -> Value {
        let mut v = Value::list(Vec::new());
        for _ in 0..depth {
            v = Value::list(vec![v]);
        }
        v
    }

    #[test]
    fn test_float_repr() {
        assert_eq!(format_float(89.0), "89.0");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(1.0 / 3.0), "0.3333333333333333");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn test_repr_collections() {
        let v = Value::list(vec![
            Value::str("invalid"),
            Value::Int(3),
            Value::Bool(true),
            Value::None,
        ]);
        assert_eq!(v.repr().unwrap(), "['invalid', 3, True, None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr().unwrap(), "(1,)");
        assert_eq!(Value::str("it's").repr().unwrap(), "\"it's\"");
        assert_eq!(Value::str("a\nb").to_str().unwrap(), "a\nb");
        assert_eq!(Value::set(Table::default()).repr().unwrap(), "set()");
        assert_eq!(
            Value::Range(Range { start: 0, stop: 10, step: 2 }).repr().unwrap(),
            "range(0, 10, 2)"
        );

        let mut table = Table::default();
        table.insert(Value::str("b"), Value::Int(1)).unwrap();
        table.insert(Value::str("a"), ints(&[2])).unwrap();
        assert_eq!(Value::dict(table).repr().unwrap(), "{'b': 1, 'a': [2]}");
    }

    #[test]
    fn test_repr_of_self_referencing_list() {
        let xs = ints(&[1]);
        if let Value::List(l) = &xs {
            l.items_mut().unwrap().push(xs.clone());
        }
        assert_eq!(xs.repr().unwrap(), "[1, [...]]");
    }

    #[test]
    fn test_render_limit() {
        let v = Value::list(vec![Value::str("x".repeat(100)); 10]);
        assert_eq!(render(&v, 500, false), Err(RenderError::TooLarge));
        assert!(render(&v, 5000, false).is_ok());
    }

    #[test]
    fn test_deep_nesting_fails_cleanly() {
        let a = nested(10_000);
        let b = nested(10_000);
        assert!(a.repr().unwrap_err().contains("maximum recursion depth"));
        assert!(py_eq(&a, &b).unwrap_err().contains("maximum recursion depth"));
        assert!(py_eq(&nested(100), &nested(100)).unwrap());
        // Dropping `a` and `b` must not recurse 10 000 frames deep.
    }

    #[test]
    fn test_numeric_equality_and_hashing() {
        let one = [Value::Int(1), Value::Float(1.0), Value::Bool(true)];
        for x in &one {
            for y in &one {
                assert!(py_eq(x, y).unwrap());
                assert_eq!(hash_key(x).unwrap(), hash_key(y).unwrap());
            }
        }
        let big = Value::int(BigInt::from(1u64 << 63));
        assert!(matches!(big, Value::BigInt(_)));
        let as_float = Value::Float(9_223_372_036_854_775_808.0);
        assert!(py_eq(&big, &as_float).unwrap());
        assert_eq!(hash_key(&big).unwrap(), hash_key(&as_float).unwrap());
        assert!(!py_eq(&Value::Int((1 << 53) + 1), &Value::Float((1u64 << 53) as f64)).unwrap());
    }

    #[test]
    fn test_unhashable_keys() {
        assert_eq!(hash_key(&ints(&[1])).unwrap_err(), "unhashable type: 'list'");
        let key = Value::tuple(vec![Value::Int(1), ints(&[2])]);
        assert!(Table::default().insert(key, Value::None).is_err());
    }

    #[test]
    fn test_table_keeps_insertion_order() {
        let mut t = Table::default();
        for k in ["c", "a", "b"] {
            assert!(t.insert(Value::str(k), Value::Int(0)).unwrap());
        }
        assert!(!t.insert(Value::str("a"), Value::Int(5)).unwrap());
        assert_eq!(t.get(&Value::str("a")).unwrap(), Some(Value::Int(5)));
        t.remove(&Value::str("c")).unwrap();
        let keys: Vec<String> = t.keys().map(|k| k.to_str().unwrap()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(t.pop_last().map(|(k, _)| k), Some(Value::str("b")));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_table_survives_many_removals() {
        let mut t = Table::default();
        for i in 0..1000 {
            t.insert(Value::Int(i), Value::Int(i * 2)).unwrap();
        }
        for i in 0..990 {
            t.remove(&Value::Int(i)).unwrap();
        }
        assert_eq!(t.len(), 10);
        assert_eq!(t.get(&Value::Float(995.0)).unwrap(), Some(Value::Int(1990)));
        assert_eq!(t.keys().next(), Some(&Value::Int(990)));
    }

    #[test]
    fn test_range() {
        let r = Range { start: 10, stop: 0, step: -3 };
        assert_eq!(r.len(), 4);
        assert_eq!(r.get(3), 1);
        assert!(r.contains(7) && !r.contains(8) && !r.contains(0));
        assert_eq!(Range { start: 0, stop: i64::MAX, step: 1 }.len(), i64::MAX as usize);
    }

    #[test]
    fn test_int_digit_limit() {
        let big = BigInt::from(10).pow(5000);
        assert!(int_to_string(&big).unwrap_err().contains("4300 digits"));
        assert_eq!(int_to_string(&BigInt::from(10).pow(20)).unwrap(), format!("1{}", "0".repeat(20)));
    }

    #[test]
    fn test_comparisons() {
        assert!(compare(CmpOp::Eq, &Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(!compare(CmpOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap());
        assert!(compare(CmpOp::In, &Value::str("b"), &Value::str("abc")).unwrap());
        assert!(compare(CmpOp::In, &Value::Int(2), &ints(&[1, 2])).unwrap());
        assert!(compare(CmpOp::Is, &Value::None, &Value::None).unwrap());
        assert!(compare(CmpOp::Lt, &Value::str("a"), &Value::Int(1)).is_err());

        let small = Value::set(Table::from_keys([Value::Int(1)]).unwrap());
        let large = Value::set(Table::from_keys([Value::Int(1), Value::Int(2)]).unwrap());
        assert!(compare(CmpOp::Lt, &small, &large).unwrap());
        assert!(!compare(CmpOp::Lt, &large, &large).unwrap());
    }

    #[test]
    fn test_identity_of_containers() {
        let a = ints(&[1]);
        let b = ints(&[1]);
        assert!(is_same(&a, &a.clone()));
        assert!(!is_same(&a, &b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_list_ordering() {
        assert_eq!(ordering(&ints(&[1, 2]), &ints(&[1, 3])), Ok(Ordering::Less));
        assert_eq!(ordering(&ints(&[1, 2]), &ints(&[1])), Ok(Ordering::Greater));
    }
}
