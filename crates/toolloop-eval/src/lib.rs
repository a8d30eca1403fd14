//! toolloop evaluation harness.
//!
//! - [`suite`]: built-in prompts with expected answers
//! - [`normalize`]: Python `str()`-style rendering of submitted answers
//! - [`harness`]: repeated sequential runs and pass-rate reports

pub mod harness;
pub mod normalize;
pub mod suite;

pub use harness::{EvalReport, Harness, RunRecord, RunStatus};
pub use normalize::{normalize_answer, normalize_outcome};
pub use suite::{builtin_cases, find_case, EvalCase};
