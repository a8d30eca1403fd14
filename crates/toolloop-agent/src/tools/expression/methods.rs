//! Methods of the builtin types.

use std::rc::Rc;

use super::arith;
use super::builtins::{arity, index_arg, Kwargs};
use super::format::str_format;
use super::interpreter::{fail, key_error, Eval, Interpreter};
use super::parser::BinOp;
use super::value::{is_subset, py_eq, DictObj, ListObj, Table, Value, ENTRY_SIZE, VALUE_SIZE};

const STR_METHODS: &[&str] = &[
    "upper", "lower", "casefold", "title", "capitalize", "swapcase", "strip", "lstrip", "rstrip",
    "split", "rsplit", "splitlines", "join", "replace", "startswith", "endswith", "find", "rfind",
    "index", "rindex", "count", "format", "isdigit", "isdecimal", "isnumeric", "isalpha",
    "isalnum", "isspace", "isupper", "islower", "center", "ljust", "rjust", "zfill", "partition",
    "rpartition", "removeprefix", "removesuffix",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "sort", "reverse", "clear", "copy", "index",
    "count",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "popitem", "setdefault", "update", "clear", "copy",
];
const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "update", "union", "intersection", "difference",
    "symmetric_difference", "intersection_update", "difference_update",
    "symmetric_difference_update", "issubset", "issuperset", "isdisjoint", "clear", "copy",
];

pub(crate) fn has_method(type_name: &str, name: &str) -> bool {
    let table: &[&str] = match type_name {
        "str" => STR_METHODS,
        "list" => LIST_METHODS,
        "tuple" => TUPLE_METHODS,
        "dict" => DICT_METHODS,
        "set" => SET_METHODS,
        "int" | "bool" => &["bit_length"],
        "float" => &["is_integer"],
        _ => &[],
    };
    table.contains(&name)
}

impl Interpreter<'_> {
    pub(super) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        if !has_method(receiver.type_name(), name) {
            return fail(format!(
                "'{}' object has no attribute '{name}'",
                receiver.type_name()
            ));
        }
        let qualified = format!("{}.{name}", receiver.type_name());
        let mut kw = Kwargs::new(&qualified, kwargs);
        match receiver {
            Value::Str(s) => {
                let split_kw = matches!(name, "split" | "rsplit");
                let mut args = args;
                if split_kw {
                    let sep = kw.take("sep");
                    let maxsplit = kw.take("maxsplit");
                    if sep.is_some() || maxsplit.is_some() {
                        args.truncate(0);
                        args.push(sep.unwrap_or(Value::None));
                        args.extend(maxsplit);
                    }
                }
                if name == "format" {
                    let kwargs = std::mem::take(&mut kw.items);
                    return Ok(Value::str(str_format(s, &args, &kwargs)?));
                }
                let keepends = kw.take("keepends");
                kw.finish()?;
                if let Some(k) = keepends {
                    args.push(k);
                }
                self.str_method(s, name, &args)
            }
            Value::List(l) if name == "sort" => {
                let key = kw.take("key");
                let reverse = kw.take("reverse").is_some_and(|v| v.truthy());
                kw.finish()?;
                arity(&qualified, &args, 0, 0)?;
                let sorted = self.sorted_values(l.snapshot(), key, reverse)?;
                let old = std::mem::replace(&mut *l.items_mut()?, sorted);
                drop(old);
                Ok(Value::None)
            }
            Value::Dict(d) if name == "update" => {
                let extra = std::mem::take(&mut kw.items);
                arity(&qualified, &args, 0, 1)?;
                if let Some(source) = args.first() {
                    self.update_dict(d, source)?;
                }
                self.charge(extra.len() * ENTRY_SIZE)?;
                let mut table = d.table_mut()?;
                for (k, v) in extra {
                    table.insert(Value::str(k), v)?;
                }
                Ok(Value::None)
            }
            _ => {
                kw.finish()?;
                match receiver {
                    Value::List(l) => self.list_method(l, name, &qualified, args),
                    Value::Tuple(t) => {
                        seq_search(t.items(), name, &qualified, &args, "tuple")
                    }
                    Value::Dict(d) => self.dict_method(d, name, &qualified, args),
                    Value::Set(s) => self.set_method(s, name, &qualified, args),
                    Value::Float(f) => {
                        arity(&qualified, &args, 0, 0)?;
                        Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
                    }
                    other => {
                        arity(&qualified, &args, 0, 0)?;
                        let n = other.to_bigint().unwrap_or_default();
                        Ok(Value::Int(n.bits() as i64))
                    }
                }
            }
        }
    }

    /// Merge the entries of `source` into `d`.
    pub(super) fn update_dict(&mut self, d: &DictObj, source: &Value) -> Eval<()> {
        let entries = self.dict_from(source)?;
        self.charge(entries.len() * ENTRY_SIZE)?;
        let mut table = d.table_mut()?;
        for (k, v) in entries.iter() {
            table.insert(k.clone(), v.clone())?;
        }
        Ok(())
    }

    // ── str ──

    fn str_method(&mut self, s: &str, name: &str, args: &[Value]) -> Eval<Value> {
        let qualified = format!("str.{name}");
        let q = qualified.as_str();
        let text = |v: String| -> Eval<Value> { Ok(Value::str(v)) };
        match name {
            "upper" | "lower" | "casefold" | "title" | "capitalize" | "swapcase" => {
                arity(q, args, 0, 0)?;
                text(match name {
                    "upper" => s.to_uppercase(),
                    "lower" | "casefold" => s.to_lowercase(),
                    "title" => title_case(s),
                    "capitalize" => {
                        let mut chars = s.chars();
                        match chars.next() {
                            Some(first) => {
                                first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect()
                            }
                            None => String::new(),
                        }
                    }
                    _ => s
                        .chars()
                        .flat_map(|c| {
                            if c.is_uppercase() {
                                c.to_lowercase().collect::<Vec<_>>()
                            } else {
                                c.to_uppercase().collect::<Vec<_>>()
                            }
                        })
                        .collect(),
                })
            }
            "strip" | "lstrip" | "rstrip" => {
                arity(q, args, 0, 1)?;
                let chars = match args.first() {
                    None | Some(Value::None) => None,
                    Some(v) => Some(str_arg(v, q)?),
                };
                let strip = |c: char| match &chars {
                    Some(set) => set.contains(c),
                    None => c.is_whitespace(),
                };
                text(match name {
                    "strip" => s.trim_matches(strip),
                    "lstrip" => s.trim_start_matches(strip),
                    _ => s.trim_end_matches(strip),
                }
                .to_string())
            }
            "split" | "rsplit" => {
                arity(q, args, 0, 2)?;
                let maxsplit = match args.get(1) {
                    Some(v) => usize::try_from(index_arg(v)?).ok(),
                    None => None,
                };
                let parts = match args.first() {
                    None | Some(Value::None) if name == "split" => split_whitespace(s, maxsplit),
                    None | Some(Value::None) => rsplit_whitespace(s, maxsplit),
                    Some(sep) => {
                        let sep = str_arg(sep, q)?;
                        if sep.is_empty() {
                            return fail("empty separator");
                        }
                        match (name, maxsplit) {
                            ("split", Some(m)) => s.splitn(m + 1, &sep).map(str::to_string).collect(),
                            ("split", None) => s.split(sep.as_str()).map(str::to_string).collect(),
                            (_, Some(m)) => {
                                let mut parts: Vec<String> = s.rsplitn(m + 1, &sep).map(str::to_string).collect();
                                parts.reverse();
                                parts
                            }
                            (_, None) => s.split(sep.as_str()).map(str::to_string).collect(),
                        }
                    }
                };
                self.reserve(parts.len() * VALUE_SIZE)?;
                Ok(Value::list(parts.into_iter().map(Value::str).collect()))
            }
            "splitlines" => {
                arity(q, args, 0, 1)?;
                let keepends = args.first().is_some_and(Value::truthy);
                Ok(Value::list(split_lines(s, keepends).into_iter().map(Value::str).collect()))
            }
            "join" => {
                arity(q, args, 1, 1)?;
                let items = self.collect_items(&args[0])?;
                let mut parts = Vec::with_capacity(items.len());
                let mut total = 0usize;
                for (i, item) in items.iter().enumerate() {
                    let Value::Str(part) = item else {
                        return fail(format!(
                            "sequence item {i}: expected str instance, {} found",
                            item.type_name()
                        ));
                    };
                    total = total.saturating_add(part.len() + s.len());
                    parts.push(part.as_ref());
                }
                self.reserve(total)?;
                text(parts.join(s))
            }
            "replace" => {
                arity(q, args, 2, 3)?;
                let old = str_arg(&args[0], q)?;
                let new = str_arg(&args[1], q)?;
                let count = match args.get(2) {
                    Some(v) => usize::try_from(index_arg(v)?).ok(),
                    None => None,
                };
                let hits = if old.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(old.as_str()).count()
                };
                let hits = count.map_or(hits, |c| c.min(hits));
                self.reserve(s.len().saturating_add(hits.saturating_mul(new.len())))?;
                text(match count {
                    Some(c) => s.replacen(old.as_str(), &new, c),
                    None => s.replace(old.as_str(), &new),
                })
            }
            "startswith" | "endswith" => {
                arity(q, args, 1, 3)?;
                let Some((window, _)) = window(s, args.get(1), args.get(2))? else {
                    return Ok(Value::Bool(false));
                };
                let candidates = match &args[0] {
                    Value::Tuple(t) => t.items().to_vec(),
                    other => vec![other.clone()],
                };
                for c in &candidates {
                    let Value::Str(c) = c else {
                        return fail(format!(
                            "{name} first arg must be str or a tuple of str, not {}",
                            c.type_name()
                        ));
                    };
                    let hit = if name == "startswith" {
                        window.starts_with(c.as_ref())
                    } else {
                        window.ends_with(c.as_ref())
                    };
                    if hit {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "find" | "rfind" | "index" | "rindex" => {
                arity(q, args, 1, 3)?;
                let sub = str_arg(&args[0], q)?;
                let found = window(s, args.get(1), args.get(2))?.and_then(|(w, offset)| {
                    let at = if name.starts_with('r') { w.rfind(sub.as_str()) } else { w.find(sub.as_str()) };
                    at.map(|b| offset + w[..b].chars().count())
                });
                match found {
                    Some(i) => Ok(Value::Int(i as i64)),
                    None if name.ends_with("find") => Ok(Value::Int(-1)),
                    None => fail("substring not found"),
                }
            }
            "count" => {
                arity(q, args, 1, 3)?;
                let sub = str_arg(&args[0], q)?;
                let n = match window(s, args.get(1), args.get(2))? {
                    None => 0,
                    Some((w, _)) if sub.is_empty() => w.chars().count() + 1,
                    Some((w, _)) => w.matches(sub.as_str()).count(),
                };
                Ok(Value::Int(n as i64))
            }
            "isdigit" | "isdecimal" | "isnumeric" | "isalpha" | "isalnum" | "isspace" => {
                arity(q, args, 0, 0)?;
                let test: fn(char) -> bool = match name {
                    "isdigit" | "isdecimal" => |c: char| c.is_ascii_digit(),
                    "isnumeric" => char::is_numeric,
                    "isalpha" => char::is_alphabetic,
                    "isalnum" => char::is_alphanumeric,
                    _ => char::is_whitespace,
                };
                Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
            }
            "isupper" | "islower" => {
                arity(q, args, 0, 0)?;
                let (want, unwanted): (fn(char) -> bool, fn(char) -> bool) = if name == "isupper" {
                    (char::is_uppercase, char::is_lowercase)
                } else {
                    (char::is_lowercase, char::is_uppercase)
                };
                Ok(Value::Bool(s.chars().any(want) && !s.chars().any(unwanted)))
            }
            "center" | "ljust" | "rjust" => {
                arity(q, args, 1, 2)?;
                let width = usize::try_from(index_arg(&args[0])?).unwrap_or(0);
                let fill = match args.get(1) {
                    Some(v) => {
                        let f = str_arg(v, q)?;
                        let mut chars = f.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => c,
                            _ => return fail("The fill character must be exactly one character long"),
                        }
                    }
                    None => ' ',
                };
                let len = s.chars().count();
                if width <= len {
                    return text(s.to_string());
                }
                self.reserve(width.saturating_mul(fill.len_utf8()))?;
                let margin = width - len;
                let left = match name {
                    "center" => margin / 2 + (margin & width & 1),
                    "rjust" => margin,
                    _ => 0,
                };
                let pad = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
                text(format!("{}{s}{}", pad(left), pad(margin - left)))
            }
            "zfill" => {
                arity(q, args, 1, 1)?;
                let width = usize::try_from(index_arg(&args[0])?).unwrap_or(0);
                let len = s.chars().count();
                if width <= len {
                    return text(s.to_string());
                }
                self.reserve(width)?;
                let (sign, digits) = match s.chars().next() {
                    Some(c @ ('+' | '-')) => (c.to_string(), &s[1..]),
                    _ => (String::new(), s),
                };
                text(format!("{sign}{}{digits}", "0".repeat(width - len)))
            }
            "partition" | "rpartition" => {
                arity(q, args, 1, 1)?;
                let sep = str_arg(&args[0], q)?;
                if sep.is_empty() {
                    return fail("empty separator");
                }
                let at = if name == "partition" { s.find(sep.as_str()) } else { s.rfind(sep.as_str()) };
                let parts = match at {
                    Some(i) => [&s[..i], sep.as_str(), &s[i + sep.len()..]],
                    None if name == "partition" => [s, "", ""],
                    None => ["", "", s],
                };
                Ok(Value::tuple(parts.iter().map(|p| Value::str(*p)).collect()))
            }
            "removeprefix" | "removesuffix" => {
                arity(q, args, 1, 1)?;
                let affix = str_arg(&args[0], q)?;
                let stripped = if name == "removeprefix" {
                    s.strip_prefix(affix.as_str())
                } else {
                    s.strip_suffix(affix.as_str())
                };
                text(stripped.unwrap_or(s).to_string())
            }
            _ => fail(format!("'str' object has no attribute '{name}'")),
        }
    }

    // ── list ──

    fn list_method(&mut self, l: &Rc<ListObj>, name: &str, q: &str, args: Vec<Value>) -> Eval<Value> {
        match name {
            "append" => {
                arity(q, &args, 1, 1)?;
                self.charge(VALUE_SIZE)?;
                l.items_mut()?.extend(args);
                Ok(Value::None)
            }
            "extend" => {
                arity(q, &args, 1, 1)?;
                let items = self.collect_items(&args[0])?;
                self.charge(items.len() * VALUE_SIZE)?;
                l.items_mut()?.extend(items);
                Ok(Value::None)
            }
            "insert" => {
                arity(q, &args, 2, 2)?;
                let i = index_arg(&args[0])?;
                self.charge(VALUE_SIZE)?;
                let mut items = l.items_mut()?;
                let len = items.len() as i64;
                let at = if i < 0 { (len + i).max(0) } else { i.min(len) };
                items.insert(at as usize, args[1].clone());
                Ok(Value::None)
            }
            "pop" => {
                arity(q, &args, 0, 1)?;
                let mut items = l.items_mut()?;
                if items.is_empty() {
                    return fail("pop from empty list");
                }
                let len = items.len() as i64;
                let i = match args.first() {
                    Some(v) => index_arg(v)?,
                    None => -1,
                };
                let at = if i < 0 { len + i } else { i };
                if !(0..len).contains(&at) {
                    return fail("pop index out of range");
                }
                Ok(items.remove(at as usize))
            }
            "remove" => {
                arity(q, &args, 1, 1)?;
                let Some(at) = position(&l.snapshot(), &args[0])? else {
                    return fail("list.remove(x): x not in list");
                };
                let removed = l.items_mut()?.remove(at);
                self.credit(&removed);
                Ok(Value::None)
            }
            "reverse" => {
                arity(q, &args, 0, 0)?;
                l.items_mut()?.reverse();
                Ok(Value::None)
            }
            "clear" => {
                arity(q, &args, 0, 0)?;
                let old = std::mem::take(&mut *l.items_mut()?);
                for v in &old {
                    self.credit(v);
                }
                drop(old);
                Ok(Value::None)
            }
            "copy" => {
                arity(q, &args, 0, 0)?;
                Ok(Value::list(l.snapshot()))
            }
            _ => seq_search(&l.snapshot(), name, q, &args, "list"),
        }
    }

    // ── dict ──

    fn dict_method(&mut self, d: &Rc<DictObj>, name: &str, q: &str, args: Vec<Value>) -> Eval<Value> {
        match name {
            "get" => {
                arity(q, &args, 1, 2)?;
                let found = d.table().get(&args[0])?;
                Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
            }
            "keys" | "values" | "items" => {
                arity(q, &args, 0, 0)?;
                let table = d.table();
                let per_entry = if name == "items" { 3 } else { 1 };
                self.reserve(table.len() * per_entry * VALUE_SIZE)?;
                Ok(Value::list(match name {
                    "keys" => table.keys().cloned().collect(),
                    "values" => table.values().cloned().collect(),
                    _ => table
                        .iter()
                        .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                        .collect(),
                }))
            }
            "pop" => {
                arity(q, &args, 1, 2)?;
                let removed = d.table_mut()?.remove(&args[0])?;
                match (removed, args.get(1)) {
                    (Some((_, v)), _) => Ok(v),
                    (None, Some(default)) => Ok(default.clone()),
                    (None, None) => fail(key_error(&args[0])),
                }
            }
            "popitem" => {
                arity(q, &args, 0, 0)?;
                let last = d.table_mut()?.pop_last();
                match last {
                    Some((k, v)) => Ok(Value::tuple(vec![k, v])),
                    None => fail("KeyError: 'popitem(): dictionary is empty'"),
                }
            }
            "setdefault" => {
                arity(q, &args, 1, 2)?;
                if let Some(v) = d.table().get(&args[0])? {
                    return Ok(v);
                }
                let value = args.get(1).cloned().unwrap_or(Value::None);
                self.charge(ENTRY_SIZE)?;
                d.table_mut()?.insert(args[0].clone(), value.clone())?;
                Ok(value)
            }
            "clear" => {
                arity(q, &args, 0, 0)?;
                let released = d.table_mut()?.clear();
                drop(released);
                Ok(Value::None)
            }
            "copy" => {
                arity(q, &args, 0, 0)?;
                Ok(Value::dict(d.table().copy()))
            }
            _ => fail(format!("'dict' object has no attribute '{name}'")),
        }
    }

    // ── set ──

    /// A set table from any iterable argument.
    fn set_operand(&mut self, v: &Value) -> Eval<Table> {
        match v {
            Value::Set(s) => Ok(s.table().copy()),
            other => Ok(Table::from_keys(self.collect_items(other)?)?),
        }
    }

    fn set_method(&mut self, s: &Rc<DictObj>, name: &str, q: &str, args: Vec<Value>) -> Eval<Value> {
        match name {
            "add" => {
                arity(q, &args, 1, 1)?;
                if d_insert(s, args[0].clone())? {
                    self.charge(ENTRY_SIZE)?;
                }
                Ok(Value::None)
            }
            "remove" | "discard" => {
                arity(q, &args, 1, 1)?;
                let removed = s.table_mut()?.remove(&args[0])?;
                if removed.is_none() && name == "remove" {
                    return fail(key_error(&args[0]));
                }
                Ok(Value::None)
            }
            "pop" => {
                arity(q, &args, 0, 0)?;
                let first = s.table_mut()?.pop_first();
                match first {
                    Some((k, _)) => Ok(k),
                    None => fail("KeyError: 'pop from an empty set'"),
                }
            }
            "update" => {
                for arg in &args {
                    for key in self.collect_items(arg)? {
                        if d_insert(s, key)? {
                            self.charge(ENTRY_SIZE)?;
                        }
                    }
                }
                Ok(Value::None)
            }
            "union" | "intersection" | "difference" | "symmetric_difference"
            | "intersection_update" | "difference_update" | "symmetric_difference_update" => {
                let op = match name.trim_end_matches("_update") {
                    "union" => BinOp::BitOr,
                    "intersection" => BinOp::BitAnd,
                    "difference" => BinOp::Sub,
                    _ => BinOp::BitXor,
                };
                if name == "symmetric_difference" || name == "symmetric_difference_update" {
                    arity(q, &args, 1, 1)?;
                }
                let mut acc = s.table().copy();
                for arg in &args {
                    self.charge_ops(1)?;
                    let other = self.set_operand(arg)?;
                    acc = arith::set_binary(op, &acc, &other)?;
                }
                if name.ends_with("_update") {
                    self.charge(acc.len().saturating_sub(s.len()) * ENTRY_SIZE)?;
                    let old = std::mem::replace(&mut *s.table_mut()?, acc);
                    drop(old);
                    return Ok(Value::None);
                }
                Ok(Value::set(acc))
            }
            "issubset" | "issuperset" | "isdisjoint" => {
                arity(q, &args, 1, 1)?;
                let other = self.set_operand(&args[0])?;
                let mine = s.table();
                Ok(Value::Bool(match name {
                    "issubset" => is_subset(&mine, &other)?,
                    "issuperset" => is_subset(&other, &mine)?,
                    _ => {
                        let mut disjoint = true;
                        for k in mine.keys() {
                            if other.contains(k)? {
                                disjoint = false;
                                break;
                            }
                        }
                        disjoint
                    }
                }))
            }
            "clear" => {
                arity(q, &args, 0, 0)?;
                let released = s.table_mut()?.clear();
                drop(released);
                Ok(Value::None)
            }
            "copy" => {
                arity(q, &args, 0, 0)?;
                Ok(Value::set(s.table().copy()))
            }
            _ => fail(format!("'set' object has no attribute '{name}'")),
        }
    }
}

fn d_insert(s: &DictObj, key: Value) -> Result<bool, String> {
    s.table_mut()?.insert(key, Value::None)
}

fn str_arg(v: &Value, method: &str) -> Result<String, String> {
    match v {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(format!(
            "{method}() argument must be str, not {}",
            other.type_name()
        )),
    }
}

fn position(items: &[Value], target: &Value) -> Result<Option<usize>, String> {
    for (i, item) in items.iter().enumerate() {
        if py_eq(item, target)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// `index` and `count` shared by lists and tuples.
fn seq_search(items: &[Value], name: &str, q: &str, args: &[Value], kind: &str) -> Eval<Value> {
    arity(q, args, 1, if name == "index" { 3 } else { 1 })?;
    if name == "count" {
        let mut n = 0;
        for item in items {
            if py_eq(item, &args[0])? {
                n += 1;
            }
        }
        return Ok(Value::Int(n));
    }
    let len = items.len() as i64;
    let bound = |v: Option<&Value>, default: i64| -> Result<usize, String> {
        let i = match v {
            Some(v) => index_arg(v)?,
            None => default,
        };
        Ok((if i < 0 { (len + i).max(0) } else { i.min(len) }) as usize)
    };
    let start = bound(args.get(1), 0)?;
    let end = bound(args.get(2), len)?;
    if start < end {
        if let Some(i) = position(&items[start..end], &args[0])? {
            return Ok(Value::Int((start + i) as i64));
        }
    }
    match kind {
        "list" => fail(format!("{} is not in list", args[0].describe())),
        _ => fail("tuple.index(x): x not in tuple"),
    }
}

/// The slice of `s` selected by optional start/end char positions, with
/// its char offset.
fn window<'s>(
    s: &'s str,
    start: Option<&Value>,
    end: Option<&Value>,
) -> Result<Option<(&'s str, usize)>, String> {
    let len = s.chars().count() as i64;
    let bound = |v: Option<&Value>, default: i64| -> Result<i64, String> {
        match v {
            None | Some(Value::None) => Ok(default),
            Some(v) => {
                let i = index_arg(v)?;
                Ok(if i < 0 { (len + i).max(0) } else { i })
            }
        }
    };
    let start = bound(start, 0)?;
    let end = bound(end, len)?.min(len);
    if start > end {
        return Ok(None);
    }
    let byte = |c: i64| s.char_indices().nth(c as usize).map_or(s.len(), |(b, _)| b);
    Ok(Some((&s[byte(start)..byte(end)], start as usize)))
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

fn split_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|m| out.len() >= m) {
            out.push(rest.to_string());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                out.push(rest[..i].to_string());
                rest = rest[i..].trim_start();
            }
            None => {
                out.push(rest.to_string());
                break;
            }
        }
    }
    out
}

fn rsplit_whitespace(s: &str, maxsplit: Option<usize>) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s.trim_end();
    while !rest.is_empty() {
        if maxsplit.is_some_and(|m| out.len() >= m) {
            out.push(rest.to_string());
            break;
        }
        match rest.rfind(char::is_whitespace) {
            Some(i) => {
                let ws_len = rest[i..].chars().next().map_or(1, char::len_utf8);
                out.push(rest[i + ws_len..].to_string());
                rest = rest[..i].trim_end();
            }
            None => {
                out.push(rest.to_string());
                break;
            }
        }
    }
    out.reverse();
    out
}

fn split_lines(s: &str, keepends: bool) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let end_len = match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => 2,
            b'\n' | b'\r' => 1,
            _ => 0,
        };
        if end_len == 0 {
            i += 1;
            continue;
        }
        let stop = if keepends { i + end_len } else { i };
        out.push(s[start..stop].to_string());
        i += end_len;
        start = i;
    }
    if start < s.len() {
        out.push(s[start..].to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::expression::{evaluate, EvalError};
    use toolloop_core::Interrupt;

    fn out(src: &str) -> String {
        evaluate(src, &Interrupt::new()).unwrap()
    }

    fn runtime_message(src: &str) -> String {
        match evaluate(src, &Interrupt::new()).unwrap_err() {
            EvalError::Runtime { message, .. } => message,
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(out("print('a,b,,c'.split(','), '  x  y '.split(), 'a b c'.split(maxsplit=1))"), "['a', 'b', '', 'c'] ['x', 'y'] ['a', 'b c']\n");
        assert_eq!(out("print('a b c'.rsplit(None, 1), 'k=v=w'.rsplit('=', 1))"), "['a b', 'c'] ['k=v', 'w']\n");
        assert_eq!(out("print('-'.join(['a', 'b']), ' hi '.strip(), 'xxhixx'.strip('x'))"), "a-b hi hi\n");
        assert_eq!(out("print('hello world'.title(), 'abc'.upper(), 'ABC'.lower(), 'aBc'.swapcase())"), "Hello World ABC abc AbC\n");
        assert_eq!(out("print('abcabc'.find('c'), 'abcabc'.rfind('c'), 'abc'.find('z'), 'abcabc'.count('ab'))"), "2 5 -1 2\n");
        assert_eq!(out("print('héllo'.find('l'), 'abcabc'.find('a', 1), 'abc'.index('c'))"), "2 3 2\n");
        assert_eq!(out("print('abc'.startswith(('x', 'a')), 'file.py'.endswith('.py'), 'abc'.startswith('b', 1))"), "True True True\n");
        assert_eq!(out("print('aaa'.replace('a', 'b', 2), 'ab'.replace('', '-'))"), "bba -a-b-\n");
        assert_eq!(out("print('ab'.center(5, '*'), 'ab'.ljust(4) + '|', '7'.rjust(3, '0'), '-42'.zfill(6))"), "**ab* ab  | 007 -00042\n");
        assert_eq!(out("print('a=b=c'.partition('='), 'a=b=c'.rpartition('='), 'abc'.partition('x'))"), "('a', '=', 'b=c') ('a=b', '=', 'c') ('abc', '', '')\n");
        assert_eq!(out("print('123'.isdigit(), ''.isdigit(), 'ABC'.isupper(), 'a1'.isalnum())"), "True False True True\n");
        assert_eq!(out("print('a\\nb\\r\\nc'.splitlines(), 'x\\n'.splitlines(True))"), "['a', 'b', 'c'] ['x\\n']\n");
        assert_eq!(out("print('{} + {x}'.format(1, x=2), 'prefix_a'.removeprefix('prefix_'))"), "1 + 2 a\n");
        assert_eq!(runtime_message("'abc'.index('z')"), "substring not found");
        assert_eq!(runtime_message("'-'.join([1])"), "sequence item 0: expected str instance, int found");
        assert_eq!(runtime_message("'x'.nope()"), "'str' object has no attribute 'nope'");
    }

    #[test]
    fn test_list_methods() {
        let src = "xs = [3, 1, 2]\nxs.append(4)\nxs.extend([5])\nxs.insert(0, 9)\nprint(xs, xs.pop(), xs.pop(0), xs)";
        assert_eq!(out(src), "[3, 1, 2, 4] 5 9 [3, 1, 2, 4]\n");
        let src = "xs = ['b', 'A', 'c']\nxs.sort(key=str.lower, reverse=True)\nprint(xs)\nxs.reverse()\nprint(xs, xs.index('c'), xs.count('A'))";
        assert_eq!(out(src), "['c', 'b', 'A']\n['A', 'b', 'c'] 2 1\n");
        let src = "xs = [1, 2, 1]\nxs.remove(1)\nys = xs.copy()\nxs.clear()\nprint(xs, ys)";
        assert_eq!(out(src), "[] [2, 1]\n");
        assert_eq!(out("xs = [1]\nxs.extend(xs)\nprint(xs)"), "[1, 1]\n");
        assert_eq!(runtime_message("[].pop()"), "pop from empty list");
        assert_eq!(runtime_message("[1].index(5)"), "5 is not in list");
        assert_eq!(runtime_message("[1].remove(5)"), "list.remove(x): x not in list");
    }

    #[test]
    fn test_dict_methods() {
        let src = "d = {'a': 1}\nd.update({'b': 2}, c=3)\nprint(d.get('a'), d.get('z', 0), d.keys(), d.values())\nprint(d.items())";
        assert_eq!(out(src), "1 0 ['a', 'b', 'c'] [1, 2, 3]\n[('a', 1), ('b', 2), ('c', 3)]\n");
        let src = "d = {}\nfor w in 'a b a'.split():\n    d.setdefault(w, []).append(1)\nprint(d, d.pop('b'), d.pop('z', None), d.popitem(), d)";
        assert_eq!(out(src), "{} [1] None ('a', [1, 1]) {}\n");
        assert_eq!(out("d = {'x': 1}\ne = d.copy()\nd.clear()\nprint(d, e)"), "{} {'x': 1}\n");
        assert_eq!(runtime_message("{}.pop('k')"), "KeyError: 'k'");
    }

    #[test]
    fn test_set_methods() {
        let src = "s = {1, 2}\ns.add(3)\ns.discard(9)\ns.update([4], (5,))\nprint(s, s.union([6]), s.intersection({1, 5, 7}))";
        assert_eq!(out(src), "{1, 2, 3, 4, 5} {1, 2, 3, 4, 5, 6} {1, 5}\n");
        let src = "s = {1, 2, 3}\nprint(s.difference([1]), s.symmetric_difference({3, 4}), {1}.issubset(s), s.issuperset([4]), s.isdisjoint({9}))";
        assert_eq!(out(src), "{2, 3} {1, 2, 4} True False True\n");
        assert_eq!(out("s = {1, 2, 3}\ns.intersection_update([2, 3, 4])\nprint(s, s.pop(), s)"), "{3} 2 {3}\n");
        assert_eq!(runtime_message("s = set()\ns.remove(1)"), "KeyError: 1");
    }

    #[test]
    fn test_number_methods() {
        assert_eq!(out("print((255).bit_length(), (2**100).bit_length(), (1.0).is_integer(), (1.5).is_integer())"), "8 101 True False\n");
        assert!(has_method("int", "bit_length"));
        assert!(!has_method("NoneType", "bit_length"));
    }

    #[test]
    fn test_split_helpers() {
        assert_eq!(split_whitespace("  a b  c ", Some(1)), vec!["a", "b  c "]);
        assert_eq!(rsplit_whitespace(" a b  c ", Some(1)), vec![" a b", "c"]);
        assert_eq!(split_lines("a\r\rb", false), vec!["a", "", "b"]);
        assert_eq!(title_case("they're 2nd"), "They'Re 2Nd");
    }
}
