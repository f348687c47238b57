//! # agent-core
//!
//! Tool-orchestration loop for a multimodal assistant: a language model
//! decides which tools to call, the tools run in parallel, and the results
//! are fed back to the model until it produces a final answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agent                              │
//! │  ┌────────────┐   ┌──────────────┐   ┌────────────────────┐  │
//! │  │  Reasoner  │──▶│ ToolExecutor │──▶│    CallLogger      │  │
//! │  │ (REASON)   │◀──│  (EXECUTE)   │   │  (JSON audit log)  │  │
//! │  └────────────┘   └──────────────┘   └────────────────────┘  │
//! │        │                                                     │
//! │  ┌────────────┐   ┌──────────────┐                           │
//! │  │LlmProvider │   │ Checkpointer │  per-thread state         │
//! │  └────────────┘   └──────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait keeps the loop independent of the model backend;
//! the `Tool` trait does the same for the imaging tools.

pub mod agent;
pub mod checkpoint;
pub mod error;
pub mod executor;
pub mod logger;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod tool;

#[cfg(test)]
mod testing;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, TurnEvent, TurnOutcome, TurnStream, TurnUpdate, UserInput,
};
pub use checkpoint::{Checkpointer, FileCheckpointer, MemoryCheckpointer, ThreadId};
pub use error::{AgentError, Result};
pub use executor::ToolExecutor;
pub use logger::{CallLogger, JsonFileCallLogger, NoopCallLogger};
pub use message::{
    AssistantMessage, ConversationState, Message, PromptMessage, Role, ToolCallRequest,
    ToolResultMessage,
};
pub use provider::{GenerationOptions, LlmProvider};
pub use reasoning::Reasoner;
pub use tool::{ParameterSchema, Tool, ToolOutput, ToolRegistry, ToolSchema};
