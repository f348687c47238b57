//! # agent-runtime
//!
//! Runtime providers for the MedRAX agent.
//!
//! ## Providers
//!
//! - **Ollama** (default): local inference with native function calling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::{select_model, OllamaProvider};
//!
//! let provider = Arc::new(OllamaProvider::from_env()?);
//! let model = select_model(provider.as_ref(), &["qwen2.5:7b", "mistral:latest"]).await?;
//! let agent = Agent::builder()
//!     .provider(provider)
//!     .model(model)
//!     .build()?;
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;
pub mod selection;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};
pub use selection::select_model;

// Re-export core types for convenience
pub use agent_core::{Agent, AgentError, LlmProvider, Message, Result, Role, Tool, ToolRegistry};
