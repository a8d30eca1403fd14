//! `python_expression`: sandboxed evaluation of a Python-flavoured
//! statement language.
//!
//! Programs run with no filesystem, network, or import access beyond the
//! `math` module. `print()` output is captured and returned as the tool's
//! `result`; any failure is returned as `error` with an empty `result`.
//! Only an interrupt, or an evaluator that cannot be started, escapes as a
//! tool failure.
//!
//! The language covers arbitrary-precision `int`, `float`, `str`, `bool`,
//! `None`, list, tuple, dict and set values with shared (reference)
//! semantics; assignment to names, items, slices and unpacking targets;
//! `if`/`for`/`while` blocks, `def`, `lambda` and closures; comprehensions,
//! f-strings and `str.format`; and a set of builtins and type methods.
//!
//! Every program runs on its own thread with a large stack, under an
//! evaluation step budget, a value memory budget and a nesting limit.

mod arith;
mod builtins;
mod format;
mod interpreter;
mod lexer;
mod methods;
mod parser;
mod value;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use toolloop_core::error::ToolError;
use toolloop_core::interrupt::Interrupt;
use toolloop_core::schema::{FieldKind, InputSchema};
use toolloop_core::types::ToolSpec;

use super::base::{require_str, Tool};

/// Longest accepted program, in characters.
pub const MAX_SOURCE_LEN: usize = 20_000;

/// Stack size of the evaluation thread.
pub(crate) const EVAL_STACK_SIZE: usize = 256 << 20;

/// Why a program did not run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { line: usize, message: String },

    #[error("{message} (line {line})")]
    Runtime { line: usize, message: String },

    #[error("program too long ({len} characters, limit {limit})")]
    TooLong { len: usize, limit: usize },

    #[error("interrupted")]
    Interrupted,

    #[error("evaluator unavailable: {0}")]
    Unavailable(String),
}

/// Run `f` on a dedicated thread sized for deep evaluation.
pub(crate) fn on_eval_thread<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, EvalError> + Send + 'static,
) -> Result<T, EvalError> {
    let handle = std::thread::Builder::new()
        .name("python-eval".into())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(f)
        .map_err(|e| EvalError::Unavailable(format!("cannot start evaluator thread: {e}")))?;
    handle
        .join()
        .map_err(|_| EvalError::Unavailable("evaluator thread panicked".into()))?
}

/// Parse and run `source`, returning captured stdout.
pub fn evaluate(source: &str, interrupt: &Interrupt) -> Result<String, EvalError> {
    let len = source.chars().count();
    if len > MAX_SOURCE_LEN {
        return Err(EvalError::TooLong {
            len,
            limit: MAX_SOURCE_LEN,
        });
    }
    let source = source.to_string();
    let interrupt = interrupt.clone();
    on_eval_thread(move || {
        let program = parser::parse_program(&source)?;
        interpreter::Interpreter::new(&interrupt).run(&program)
    })
}

// ─────────────────────────────────────────────
// Tool
// ─────────────────────────────────────────────

pub struct ExpressionTool {
    interrupt: Interrupt,
}

impl ExpressionTool {
    pub const NAME: &'static str = "python_expression";

    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }

    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            Self::NAME,
            "Evaluates a Python expression",
            InputSchema::new().required(
                "expression",
                FieldKind::String,
                "Will be passed to exec(). Use print() to output something. Returns stdout.",
            ),
        )
    }
}

#[async_trait]
impl Tool for ExpressionTool {
    async fn execute(&self, args: &Map<String, Value>) -> Result<Value, ToolError> {
        let source = require_str(args, "expression")?.to_string();
        let interrupt = self.interrupt.clone();

        let outcome = tokio::task::spawn_blocking(move || evaluate(&source, &interrupt))
            .await
            .map_err(|e| ToolError::failed(format!("evaluator task failed: {e}")))?;

        match outcome {
            Ok(stdout) => {
                debug!(bytes = stdout.len(), "expression evaluated");
                Ok(json!({ "result": stdout, "error": null }))
            }
            Err(EvalError::Interrupted) => Err(ToolError::Interrupted),
            Err(EvalError::Unavailable(reason)) => {
                warn!(%reason, "expression evaluator unavailable");
                Err(ToolError::failed(reason))
            }
            Err(e) => {
                debug!(error = %e, "expression failed");
                Ok(json!({ "result": null, "error": e.to_string() }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(expr: &str) -> Map<String, Value> {
        json!({ "expression": expr }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_eighty_nine() {
        let tool = ExpressionTool::new(Interrupt::new());
        let out = tool.execute(&args("print((2**3 + 3**4) * 1)")).await.unwrap();
        assert_eq!(out, json!({"result": "89\n", "error": null}));
    }

    #[tokio::test]
    async fn test_error_payload() {
        let tool = ExpressionTool::new(Interrupt::new());
        let out = tool.execute(&args("print(1)\nprint(1/0)")).await.unwrap();
        assert_eq!(out["result"], Value::Null);
        assert_eq!(out["error"], "division by zero (line 2)");
    }

    #[tokio::test]
    async fn test_syntax_error_payload() {
        let tool = ExpressionTool::new(Interrupt::new());
        let out = tool.execute(&args("print(")).await.unwrap();
        assert!(out["error"].as_str().unwrap().starts_with("SyntaxError"));
    }

    #[tokio::test]
    async fn test_interrupt_propagates() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let tool = ExpressionTool::new(interrupt);
        let err = tool.execute(&args("print(1)")).await.unwrap_err();
        assert_eq!(err, ToolError::Interrupted);
    }

    #[test]
    fn test_source_length_cap() {
        let long = "1\n".repeat(MAX_SOURCE_LEN);
        let err = evaluate(&long, &Interrupt::new()).unwrap_err();
        assert!(matches!(err, EvalError::TooLong { .. }));
    }

    #[test]
    fn test_sample_task_programs() {
        let interrupt = Interrupt::new();
        let phones = r#"
numbers = ['123-456-7890', '12-345-678', '(555) 555-5555', '555.555.5555']
digits = [''.join(c for c in n if c.isdigit()) for n in numbers]
print(['valid' if len(d) == 10 else 'invalid' for d in digits])
"#;
        assert_eq!(
            evaluate(phones, &interrupt).unwrap(),
            "['valid', 'invalid', 'valid', 'valid']\n"
        );

        let count = "words = 'the cat and the hat'.split()\nprint(words.count('the'), len(words))";
        assert_eq!(evaluate(count, &interrupt).unwrap(), "2 5\n");
    }

    #[test]
    fn test_block_programs() {
        let interrupt = Interrupt::new();
        let src = r#"
counts = {}
for word in 'a b a c a'.split():
    if word in counts:
        counts[word] += 1
    else:
        counts[word] = 1
seen = {w for w in counts if counts[w] > 1}
x = [0, 1]
x[0] = 5
print(counts, seen, x)
"#;
        assert_eq!(
            evaluate(src, &interrupt).unwrap(),
            "{'a': 3, 'b': 1, 'c': 1} {'a'} [5, 1]\n"
        );

        let numbers = "import math\nprint(2**63, math.factorial(21), 1_000_000, 0x10)";
        assert_eq!(
            evaluate(numbers, &interrupt).unwrap(),
            "9223372036854775808 51090942171709440000 1000000 16\n"
        );

        let shared = "s = 'a' * 10**6\nx = [s] * 10**4\nprint(len(x), len(x[-1]))";
        assert_eq!(evaluate(shared, &interrupt).unwrap(), "10000 1000000\n");
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let interrupt = Interrupt::new();
        let parens = format!("print({}1{})", "(".repeat(9000), ")".repeat(9000));
        let minus = format!("print({}1)", "-".repeat(19000));
        for src in [parens, minus] {
            match evaluate(&src, &interrupt).unwrap_err() {
                EvalError::Syntax { message, line } => {
                    assert_eq!(message, "too many nested parentheses");
                    assert_eq!(line, 1);
                }
                other => panic!("expected syntax error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_memory_limit_is_a_runtime_error() {
        let err = evaluate("x = [0] * 10**8", &Interrupt::new()).unwrap_err();
        match err {
            EvalError::Runtime { message, .. } => {
                assert!(message.starts_with("memory limit exceeded"), "{message}")
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn test_eval_thread_reports_panics() {
        let err = on_eval_thread::<()>(|| panic!("boom")).unwrap_err();
        assert_eq!(err, EvalError::Unavailable("evaluator thread panicked".into()));
    }

    #[test]
    fn test_spec_shape() {
        let spec = ExpressionTool::spec();
        assert_eq!(spec.name, "python_expression");
        assert_eq!(spec.description, "Evaluates a Python expression");
        assert!(spec.input_schema.field("expression").unwrap().required);
    }
}
