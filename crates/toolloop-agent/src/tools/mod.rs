//! Tool modules for the toolloop agent.

pub mod base;
pub mod expression;
pub mod registry;
pub mod submit;

pub use base::{require_str, require_value, Tool, ToolRole};
pub use expression::ExpressionTool;
pub use registry::{RegisteredTool, ToolRegistry};
pub use submit::SubmitAnswerTool;
