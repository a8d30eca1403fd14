//! toolloop Agent: the tool-calling loop and its tools.
//!
//! This crate contains:
//! - **tools**: Tool trait, registry, `python_expression` and `submit_answer`
//! - **invoker**: argument validation and dispatch of one tool call
//! - **conversation**: the append-only transcript for a single run
//! - **agent_loop**: the model ↔ tool step loop

pub mod agent_loop;
pub mod conversation;
pub mod invoker;
pub mod tools;

pub use agent_loop::{run_loop, AgentLoop, LoopReport};
pub use conversation::Conversation;
pub use invoker::{Invocation, ToolInvoker, UnknownToolPolicy};
pub use tools::{Tool, ToolRegistry, ToolRole};
