//! Answer normalisation: render a submitted answer the way Python's `str()`
//! would, so it can be compared with an expected string.
//!
//! Lossy on purpose: `"8769"` and `8769` both normalise to `8769`.
//! Object keys keep the order the model sent them in (serde_json's
//! `preserve_order`), matching Python's dict ordering.

use serde_json::{Number, Value};

use toolloop_core::types::LoopOutcome;

/// Normalise a run outcome. `NotSubmitted` becomes `"None"`.
pub fn normalize_outcome(outcome: &LoopOutcome) -> String {
    match outcome {
        LoopOutcome::Submitted(answer) => normalize_answer(answer),
        LoopOutcome::NotSubmitted => "None".to_string(),
    }
}

/// `str(value)`: top-level strings are raw, everything else is `repr`.
pub fn normalize_answer(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => repr(other),
    }
}

fn repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => number(n),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(repr).collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", quote(k), repr(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

fn number(n: &Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) => float(f),
        None => n.to_string(),
    }
}

fn float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        // Python switches to exponent form outside this range: 1e+20, 1.5e-05.
        let text = format!("{f:e}");
        return match text.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{mantissa}e{sign}{digits:0>2}")
            }
            None => text,
        };
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

fn quote(s: &str) -> String {
    let q = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(q);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == q => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(q);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(normalize_answer(&json!(8769)), "8769");
        assert_eq!(normalize_answer(&json!("8769")), "8769");
        assert_eq!(normalize_answer(&json!("positive")), "positive");
        assert_eq!(normalize_answer(&json!(true)), "True");
        assert_eq!(normalize_answer(&Value::Null), "None");
        assert_eq!(normalize_answer(&json!(-3)), "-3");
    }

    #[test]
    fn test_floats() {
        assert_eq!(normalize_answer(&json!(89.0)), "89.0");
        assert_eq!(normalize_answer(&json!(2.5)), "2.5");
        assert_eq!(normalize_answer(&json!(0.1)), "0.1");
        assert_eq!(normalize_answer(&json!(1e20)), "1e+20");
        assert_eq!(normalize_answer(&json!(1.5e-5)), "1.5e-05");
    }

    #[test]
    fn test_lists_quote_nested_strings() {
        let answer = json!(["invalid", "valid", "invalid", "valid"]);
        assert_eq!(
            normalize_answer(&answer),
            "['invalid', 'valid', 'invalid', 'valid']"
        );
        assert_eq!(normalize_answer(&json!([1, [2.0, null]])), "[1, [2.0, None]]");
        assert_eq!(normalize_answer(&json!([])), "[]");
    }

    #[test]
    fn test_string_quoting() {
        assert_eq!(normalize_answer(&json!(["it's"])), "[\"it's\"]");
        assert_eq!(normalize_answer(&json!(["a'b\"c"])), "['a\\'b\"c']");
        assert_eq!(normalize_answer(&json!(["line\nbreak"])), "['line\\nbreak']");
    }

    #[test]
    fn test_objects() {
        let answer = json!({"name": "Bob", "ok": false});
        assert_eq!(normalize_answer(&answer), "{'name': 'Bob', 'ok': False}");
    }

    #[test]
    fn test_object_keys_keep_submission_order() {
        let answer: Value = serde_json::from_str(r#"{"ok": false, "name": "Bob", "a": [1]}"#).unwrap();
        assert_eq!(normalize_answer(&answer), "{'ok': False, 'name': 'Bob', 'a': [1]}");
    }

    #[test]
    fn test_outcomes() {
        assert_eq!(normalize_outcome(&LoopOutcome::NotSubmitted), "None");
        assert_eq!(
            normalize_outcome(&LoopOutcome::Submitted(json!(["Thai"]))),
            "['Thai']"
        );
    }
}
