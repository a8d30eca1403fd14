//! String formatting: the format-spec mini-language, `str.format` and
//! `%`-interpolation.

use num_traits::{Signed, ToPrimitive};

use super::arith::{float_to_int, to_float};
use super::value::{format_float, int_to_string, python_exponent, Value};

struct Spec {
    fill: char,
    align: Option<char>,
    sign: Option<char>,
    alt: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    ty: Option<char>,
}

fn parse_spec(spec: &str) -> Result<Spec, String> {
    let invalid = || "Invalid format specifier".to_string();
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    let (fill, align) = match (chars.first(), chars.get(1)) {
        (Some(&f), Some(&a)) if is_align(a) => {
            i = 2;
            (f, Some(a))
        }
        (Some(&a), _) if is_align(a) => {
            i = 1;
            (' ', Some(a))
        }
        _ => (' ', None),
    };
    let sign = match chars.get(i) {
        Some(&c @ ('+' | '-' | ' ')) => {
            i += 1;
            Some(c)
        }
        _ => None,
    };
    let alt = chars.get(i) == Some(&'#');
    if alt {
        i += 1;
    }
    let zero = chars.get(i) == Some(&'0');
    if zero {
        i += 1;
    }
    let digits = |i: &mut usize| -> Option<usize> {
        let start = *i;
        while chars.get(*i).is_some_and(|c| c.is_ascii_digit()) {
            *i += 1;
        }
        chars[start..*i].iter().collect::<String>().parse().ok()
    };
    let width = digits(&mut i).unwrap_or(0);
    let grouping = match chars.get(i) {
        Some(&c @ (',' | '_')) => {
            i += 1;
            Some(c)
        }
        _ => None,
    };
    let precision = if chars.get(i) == Some(&'.') {
        i += 1;
        Some(digits(&mut i).ok_or_else(|| "Format specifier missing precision".to_string())?)
    } else {
        None
    };
    let ty = chars.get(i).copied();
    if ty.is_some() {
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid());
    }
    Ok(Spec {
        fill,
        align,
        sign,
        alt,
        zero,
        width,
        grouping,
        precision,
        ty,
    })
}

/// Insert `sep` every `every` digits of the leading digit run.
fn group(digits: &str, sep: Option<char>, every: usize) -> String {
    let Some(sep) = sep else {
        return digits.to_string();
    };
    let end = digits
        .find(|c: char| if every == 4 { !c.is_ascii_hexdigit() } else { !c.is_ascii_digit() })
        .unwrap_or(digits.len());
    let (int_part, rest) = digits.split_at(end);
    let mut out = String::with_capacity(digits.len() + digits.len() / every);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(c);
    }
    out.push_str(rest);
    out
}

fn strip_zeros(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

/// `g`-style formatting of a non-negative finite float. `point` keeps a
/// trailing `.0` the way a spec without a type does.
fn general(x: f64, precision: Option<usize>, alt: bool, point: bool) -> String {
    let p = precision.unwrap_or(6).max(1);
    let sci = format!("{:.*e}", p - 1, x);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i64 = exp.parse().unwrap_or(0);
    if exp >= -4 && exp < p as i64 {
        let decimals = (p as i64 - 1 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, x);
        let mut s = if alt { fixed } else { strip_zeros(&fixed) };
        if point && !s.contains('.') {
            s.push_str(".0");
        }
        s
    } else {
        let m = if alt { mantissa.to_string() } else { strip_zeros(mantissa) };
        python_exponent(&format!("{m}e{exp}"))
    }
}

/// Sign, radix prefix and digits of a number under `spec`.
fn number_parts(v: &Value, spec: &Spec) -> Result<(bool, String, String), String> {
    let unknown = |c: char| {
        format!(
            "Unknown format code '{c}' for object of type '{}'",
            v.type_name()
        )
    };
    match spec.ty {
        Some(c @ ('d' | 'n' | 'b' | 'o' | 'x' | 'X' | 'c')) => {
            let n = v.to_bigint().ok_or_else(|| unknown(c))?;
            if c == 'c' {
                let ch = n
                    .to_u32()
                    .and_then(char::from_u32)
                    .ok_or_else(|| "%c arg not in range(0x110000)".to_string())?;
                return Ok((false, String::new(), ch.to_string()));
            }
            let (radix, prefix) = match c {
                'b' => (2, "0b"),
                'o' => (8, "0o"),
                'x' | 'X' => (16, "0x"),
                _ => (10, ""),
            };
            let mag = n.abs();
            let mut digits = if radix == 10 {
                int_to_string(&mag)?
            } else {
                mag.to_str_radix(radix)
            };
            let mut prefix = if spec.alt { prefix.to_string() } else { String::new() };
            if c == 'X' {
                digits = digits.to_uppercase();
                prefix = prefix.to_uppercase();
            }
            let every = if radix == 10 { 3 } else { 4 };
            Ok((n.is_negative(), prefix, group(&digits, spec.grouping, every)))
        }
        Some(c @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%')) => {
            let x = to_float(v.num().ok_or_else(|| unknown(c))?)?;
            let neg = x.is_sign_negative() && !x.is_nan();
            let a = x.abs();
            let p = spec.precision.unwrap_or(6);
            let body = if !a.is_finite() {
                format_float(a)
            } else {
                match c {
                    'f' | 'F' => format!("{:.*}", p, a),
                    '%' => format!("{:.*}%", p, a * 100.0),
                    'e' | 'E' => python_exponent(&format!("{:.*e}", p, a)),
                    _ => general(a, spec.precision, spec.alt, false),
                }
            };
            let body = group(&body, spec.grouping, 3);
            let upper = matches!(c, 'F' | 'E' | 'G');
            Ok((neg, String::new(), if upper { body.to_uppercase() } else { body }))
        }
        None => match v {
            Value::Float(x) => {
                let neg = x.is_sign_negative() && !x.is_nan();
                let a = x.abs();
                let body = match spec.precision {
                    Some(_) if a.is_finite() => general(a, spec.precision, spec.alt, true),
                    _ => format_float(a),
                };
                Ok((neg, String::new(), group(&body, spec.grouping, 3)))
            }
            _ => {
                let n = v.to_bigint().ok_or_else(|| unknown('d'))?;
                if spec.precision.is_some() {
                    return Err("Precision not allowed in integer format specifier".into());
                }
                let digits = int_to_string(&n.abs())?;
                Ok((n.is_negative(), String::new(), group(&digits, spec.grouping, 3)))
            }
        },
        Some(c) => Err(unknown(c)),
    }
}

fn pad(body: String, spec: &Spec, default_align: char) -> String {
    let len = body.chars().count();
    if len >= spec.width {
        return body;
    }
    let fill: String = std::iter::repeat(spec.fill).take(spec.width - len).collect();
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{body}{fill}"),
        '^' => {
            let left = (spec.width - len) / 2;
            let (l, r) = fill.split_at(left * spec.fill.len_utf8());
            format!("{l}{body}{r}")
        }
        _ => format!("{fill}{body}"),
    }
}

/// Format a value under a format spec, as `format(v, spec)` does.
pub(crate) fn format_spec(v: &Value, spec: &str) -> Result<String, String> {
    if spec.is_empty() {
        return v.to_str();
    }
    let mut spec = parse_spec(spec)?;
    match v {
        Value::Str(s) => {
            if !matches!(spec.ty, None | Some('s')) {
                return Err(format!(
                    "Unknown format code '{}' for object of type 'str'",
                    spec.ty.unwrap_or('s')
                ));
            }
            if spec.sign.is_some() {
                return Err("Sign not allowed in string format specifier".into());
            }
            if spec.align == Some('=') {
                return Err("'=' alignment not allowed in string format specifier".into());
            }
            let body = match spec.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.to_string(),
            };
            Ok(pad(body, &spec, '<'))
        }
        v if v.is_number() => {
            let (neg, prefix, digits) = number_parts(v, &spec)?;
            let sign = match (neg, spec.sign) {
                (true, _) => "-",
                (false, Some('+')) => "+",
                (false, Some(' ')) => " ",
                _ => "",
            };
            if spec.zero && spec.align.is_none() {
                spec.fill = '0';
                spec.align = Some('=');
            }
            if spec.align == Some('=') {
                let used = sign.len() + prefix.len() + digits.chars().count();
                let fill: String = std::iter::repeat(spec.fill)
                    .take(spec.width.saturating_sub(used))
                    .collect();
                return Ok(format!("{sign}{prefix}{fill}{digits}"));
            }
            Ok(pad(format!("{sign}{prefix}{digits}"), &spec, '>'))
        }
        other => {
            if spec.ty.is_some() || spec.sign.is_some() || spec.precision.is_some() {
                return Err(format!(
                    "unsupported format string passed to {}.__format__",
                    other.type_name()
                ));
            }
            Ok(pad(other.to_str()?, &spec, '<'))
        }
    }
}

/// One replacement field: `!r`/`!s` conversion, then the spec.
pub(crate) fn format_field(v: &Value, conversion: Option<char>, spec: &str) -> Result<String, String> {
    match conversion {
        Some('r') | Some('a') => format_spec(&Value::str(v.repr()?), spec),
        Some(_) => format_spec(&Value::str(v.to_str()?), spec),
        None => format_spec(v, spec),
    }
}

/// `template.format(*args, **kwargs)`.
pub(crate) fn str_format(template: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto: Option<usize> = None;
    let mut manual = false;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err("Single '}' encountered in format string".into()),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => {
                            return Err("nested replacement fields are not supported".into())
                        }
                        Some(ch) => field.push(ch),
                        None => return Err("Single '{' encountered in format string".into()),
                    }
                }
                let (head, spec) = match field.split_once(':') {
                    Some((h, s)) => (h, s),
                    None => (field.as_str(), ""),
                };
                let (name, conversion) = match head.split_once('!') {
                    Some((n, conv)) => {
                        let mut it = conv.chars();
                        match (it.next(), it.next()) {
                            (Some(c @ ('r' | 's' | 'a')), None) => (n, Some(c)),
                            _ => return Err("Unknown conversion specifier".into()),
                        }
                    }
                    None => (head, None),
                };
                let value = if name.is_empty() {
                    if manual {
                        return Err("cannot switch from manual field specification to automatic field numbering".into());
                    }
                    let i = auto.map_or(0, |i| i + 1);
                    auto = Some(i);
                    args.get(i).ok_or_else(|| {
                        format!("Replacement index {i} out of range for positional args tuple")
                    })?
                } else if let Ok(i) = name.parse::<usize>() {
                    if auto.is_some() {
                        return Err("cannot switch from automatic field numbering to manual field specification".into());
                    }
                    manual = true;
                    args.get(i).ok_or_else(|| {
                        format!("Replacement index {i} out of range for positional args tuple")
                    })?
                } else {
                    kwargs
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v)
                        .ok_or_else(|| format!("'{name}'"))?
                };
                out.push_str(&format_field(value, conversion, spec)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// `template % args`.
pub(crate) fn percent_format(template: &str, args: &Value) -> Result<String, String> {
    let (positional, mapping) = match args {
        Value::Tuple(t) => (t.items().to_vec(), None),
        Value::Dict(_) => (Vec::new(), Some(args)),
        other => (vec![other.clone()], None),
    };
    let mut next = 0;
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut key = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let name: String = chars.by_ref().take_while(|&c| c != ')').collect();
            key = Some(name);
        }
        let mut flags = String::new();
        while let Some(&f @ ('-' | '+' | ' ' | '0' | '#')) = chars.peek() {
            flags.push(f);
            chars.next();
        }
        let mut width = String::new();
        while let Some(&d) = chars.peek().filter(|c| c.is_ascii_digit()) {
            width.push(d);
            chars.next();
        }
        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = String::new();
            while let Some(&d) = chars.peek().filter(|c| c.is_ascii_digit()) {
                p.push(d);
                chars.next();
            }
            precision = Some(p);
        }
        let Some(conv) = chars.next() else {
            return Err("incomplete format".into());
        };
        if conv == '%' {
            out.push('%');
            continue;
        }
        let value = match (&key, mapping) {
            (Some(name), Some(Value::Dict(d))) => d
                .table()
                .get(&Value::str(name.as_str()))?
                .ok_or_else(|| format!("'{name}'"))?,
            (Some(_), _) => return Err("format requires a mapping".into()),
            (None, _) => {
                let v = positional
                    .get(next)
                    .cloned()
                    .ok_or_else(|| "not enough arguments for format string".to_string())?;
                next += 1;
                v
            }
        };

        let align = if flags.contains('-') { "<" } else { "" };
        let sign = if flags.contains('+') {
            "+"
        } else if flags.contains(' ') {
            " "
        } else {
            ""
        };
        let alt = if flags.contains('#') { "#" } else { "" };
        let zero = if flags.contains('0') && align.is_empty() { "0" } else { "" };
        let text = match conv {
            's' | 'r' | 'a' => {
                let s = if conv == 's' { value.to_str()? } else { value.repr()? };
                let s: String = match precision.as_deref().and_then(|p| p.parse::<usize>().ok()) {
                    Some(p) => s.chars().take(p).collect(),
                    None => s,
                };
                format_spec(&Value::str(s), &format!("{align}{width}"))?
            }
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) => float_to_int(*f)?,
                    v if v.is_int() => v.clone(),
                    v => {
                        return Err(format!(
                            "%{conv} format: a real number is required, not {}",
                            v.type_name()
                        ))
                    }
                };
                format_spec(&n, &format!("{align}{sign}{zero}{width}d"))?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' | 'c' => {
                let p = precision.as_deref().map(|p| format!(".{}", if p.is_empty() { "0" } else { p }));
                let p = if matches!(conv, 'x' | 'X' | 'o' | 'c') { None } else { p };
                format_spec(
                    &value,
                    &format!("{align}{sign}{alt}{zero}{width}{}{conv}", p.unwrap_or_default()),
                )?
            }
            other => {
                return Err(format!(
                    "unsupported format character '{other}' (0x{:x})",
                    other as u32
                ))
            }
        };
        out.push_str(&text);
    }
    if mapping.is_none() && next < positional.len() {
        return Err("not all arguments converted during string formatting".into());
    }
    Ok(out)
}
