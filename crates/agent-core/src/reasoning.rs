//! Reasoning Step
//!
//! One model invocation: the configured system instruction followed by the
//! whole conversation goes in, one assistant message comes out. The step
//! never mutates the conversation and never retries; a provider failure is
//! returned to the caller as is.

use std::sync::Arc;

use crate::error::Result;
use crate::message::{AssistantMessage, ConversationState, PromptMessage};
use crate::provider::{GenerationOptions, LlmProvider};
use crate::tool::ToolSchema;

/// Invokes the language model for one REASON phase
#[derive(Clone)]
pub struct Reasoner {
    provider: Arc<dyn LlmProvider>,
    system_prompt: String,
    tools: Arc<[ToolSchema]>,
    generation: GenerationOptions,
}

impl std::fmt::Debug for Reasoner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reasoner")
            .field("model", &self.generation.model)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl Reasoner {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        system_prompt: impl Into<String>,
        tools: Vec<ToolSchema>,
        generation: GenerationOptions,
    ) -> Self {
        Self {
            provider,
            system_prompt: system_prompt.into(),
            tools: tools.into(),
            generation,
        }
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub const fn generation(&self) -> &GenerationOptions {
        &self.generation
    }

    /// Prompt for `state`: the system instruction (if any) as a virtual
    /// leading message, then every stored message in order.
    pub fn prompt<'a>(&'a self, state: &'a ConversationState) -> Vec<PromptMessage<'a>> {
        let system = (!self.system_prompt.is_empty())
            .then_some(PromptMessage::System(self.system_prompt.as_str()));
        system
            .into_iter()
            .chain(state.messages().iter().map(PromptMessage::Conversation))
            .collect()
    }

    /// Run the model once over `state`
    pub async fn reason(&self, state: &ConversationState) -> Result<AssistantMessage> {
        let prompt = self.prompt(state);
        let completion = self
            .provider
            .complete(&prompt, &self.tools, &self.generation)
            .await?;

        if let Some(usage) = &completion.usage {
            tracing::debug!(
                model = %completion.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                tool_calls = completion.message.tool_calls.len(),
                "Reasoning step finished"
            );
        }

        Ok(completion.message)
    }
}
