//! Test doubles shared across this crate's unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::message::{AssistantMessage, PromptMessage, Role, ToolCallRequest};
use crate::provider::{Completion, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo};
use crate::tool::{ParameterSchema, Tool, ToolOutput, ToolSchema};

/// Provider that replays a script of responses and records every prompt.
///
/// Once the script runs out it repeats `fallback` if set, or errors.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<AssistantMessage>>>,
    fallback: Option<AssistantMessage>,
    prompts: Mutex<Vec<Vec<(Role, String)>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<AssistantMessage>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    pub fn with_results(script: Vec<Result<AssistantMessage>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Always answers with `message`
    pub fn repeating(message: AssistantMessage) -> Self {
        Self {
            fallback: Some(message),
            ..Default::default()
        }
    }

    /// Prompts seen so far, as (role, text) pairs
    pub fn prompts(&self) -> Vec<Vec<(Role, String)>> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: "scripted".into(),
            models: self.list_models().await?,
            supports_tools: true,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(
        &self,
        messages: &[PromptMessage<'_>],
        _tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let seen = messages
            .iter()
            .map(|m| {
                let text = match m {
                    PromptMessage::System(s) => (*s).to_string(),
                    PromptMessage::Conversation(c) => c.text().to_string(),
                };
                (m.role(), text)
            })
            .collect();
        self.prompts.lock().unwrap().push(seen);

        let next = self.script.lock().unwrap().pop_front();
        let message = match next {
            Some(result) => result?,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| AgentError::Provider("script exhausted".into()))?,
        };

        Ok(Completion {
            message,
            model: options.model.clone(),
            usage: None,
            finish_reason: None,
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted".into(),
            name: "scripted".into(),
            context_length: None,
        }])
    }
}

pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

fn schema(name: &str, parameters: Vec<ParameterSchema>) -> ToolSchema {
    ToolSchema {
        name: name.into(),
        description: format!("test tool {name}"),
        parameters,
        category: None,
    }
}

/// Returns its arguments; requires `image_path`
pub struct EchoTool(String);

impl EchoTool {
    pub fn named(name: &str) -> Self {
        Self(name.into())
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        schema(
            &self.0,
            vec![ParameterSchema::required("image_path", "string", "image")],
        )
    }

    async fn invoke(&self, args: &serde_json::Value) -> Result<ToolOutput> {
        Ok(ToolOutput::new(args.clone()))
    }
}

/// Always returns the same payload, optionally with an artifact
pub struct FixedTool {
    name: String,
    payload: serde_json::Value,
    artifact: Option<String>,
}

impl FixedTool {
    pub fn new(name: &str, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: &str) -> Self {
        self.artifact = Some(artifact.into());
        self
    }
}

#[async_trait]
impl Tool for FixedTool {
    fn schema(&self) -> ToolSchema {
        schema(&self.name, Vec::new())
    }

    async fn invoke(&self, _args: &serde_json::Value) -> Result<ToolOutput> {
        let mut output = ToolOutput::new(self.payload.clone());
        output.artifact.clone_from(&self.artifact);
        Ok(output)
    }
}

/// Always fails with the given description
pub struct FailingTool {
    name: String,
    error: String,
}

impl FailingTool {
    pub fn new(name: &str, error: &str) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn schema(&self) -> ToolSchema {
        schema(&self.name, Vec::new())
    }

    async fn invoke(&self, _args: &serde_json::Value) -> Result<ToolOutput> {
        Err(AgentError::ToolExecution(self.error.clone()))
    }
}

pub struct PanickingTool(String);

impl PanickingTool {
    pub fn named(name: &str) -> Self {
        Self(name.into())
    }
}

#[async_trait]
impl Tool for PanickingTool {
    fn schema(&self) -> ToolSchema {
        schema(&self.0, Vec::new())
    }

    async fn invoke(&self, _args: &serde_json::Value) -> Result<ToolOutput> {
        panic!("model weights missing")
    }
}

/// Sleeps, tracking how many invocations overlap
pub struct SlowTool {
    name: String,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl SlowTool {
    pub fn new(
        name: &str,
        delay: Duration,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            name: name.into(),
            delay,
            in_flight,
            peak,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn schema(&self) -> ToolSchema {
        schema(&self.name, Vec::new())
    }

    async fn invoke(&self, _args: &serde_json::Value) -> Result<ToolOutput> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ToolOutput::text("done"))
    }
}
