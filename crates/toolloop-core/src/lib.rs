//! toolloop core: transcript types, tool schemas, errors, configuration.

pub mod config;
pub mod error;
pub mod interrupt;
pub mod schema;
pub mod types;
pub mod utils;

pub use error::{AgentError, ProviderError, ToolError};
pub use interrupt::Interrupt;
pub use schema::{FieldKind, FieldSpec, InputSchema};
pub use types::{
    Block, LlmResponse, LoopOutcome, StopReason, ToolCall, ToolResult, ToolSpec, Turn,
    UsageInfo, UserContent,
};
