//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference using the
//! native `/api/chat` function-calling API.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, PromptMessage, UserContent, UserMessage},
    provider::{
        Completion, FinishReason, GenerationOptions, LlmProvider, ModelInfo, ProviderInfo,
        TokenUsage,
    },
    tool::ToolSchema,
    AssistantMessage, ToolCallRequest,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 300,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self {
            host,
            port,
            ..Default::default()
        }
    }

    /// Base URL, e.g. `http://localhost:11434`
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        // OLLAMA_HOST is often set to "host:port" already
        if host.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok()) {
            host.to_string()
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

// Wire types for /api/chat and /api/tags

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    options: WireOptions,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    message: WireMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Ollama LLM provider
#[derive(Clone, Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
            ..Default::default()
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self> {
        Self::from_config(OllamaConfig::default())
    }

    pub const fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url())
    }

    /// Convert prompt messages to Ollama format
    fn convert_messages(messages: &[PromptMessage<'_>]) -> Vec<WireMessage> {
        messages.iter().map(Self::convert_message).collect()
    }

    fn convert_message(message: &PromptMessage<'_>) -> WireMessage {
        let message = match message {
            PromptMessage::System(text) => {
                return WireMessage {
                    role: "system".into(),
                    content: (*text).to_string(),
                    ..Default::default()
                };
            }
            PromptMessage::Conversation(m) => *m,
        };

        match message {
            Message::User(UserMessage {
                content: UserContent::Text { text },
            }) => WireMessage {
                role: "user".into(),
                content: text.clone(),
                ..Default::default()
            },
            // The model never sees pixels; it passes the path on to the tools.
            Message::User(UserMessage {
                content: UserContent::Image { path },
            }) => WireMessage {
                role: "user".into(),
                content: format!("image_path: {path}"),
                ..Default::default()
            },
            Message::Assistant(a) => WireMessage {
                role: "assistant".into(),
                content: a.content.clone(),
                tool_calls: a
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: Some(c.id.clone()),
                        function: WireFunction {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect(),
                tool_name: None,
            },
            Message::Tool(r) => WireMessage {
                role: "tool".into(),
                content: r.content.clone(),
                tool_calls: Vec::new(),
                tool_name: Some(r.tool_name.clone()),
            },
        }
    }

    fn convert_tools(tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.to_json_schema(),
                    }
                })
            })
            .collect()
    }

    /// Convert Ollama response to agent completion
    fn convert_completion(response: ChatResponse, requested_model: &str) -> Completion {
        let tool_calls: Vec<_> = response
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let id = call.id.unwrap_or_else(|| Uuid::new_v4().to_string());
                ToolCallRequest::new(id, call.function.name, parse_arguments(call.function.arguments))
            })
            .collect();

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolUse
        } else if response.done_reason.as_deref() == Some("length") {
            FinishReason::Length
        } else {
            FinishReason::Stop
        };

        let usage = match (response.prompt_eval_count, response.eval_count) {
            (None, None) => None,
            (prompt, eval) => {
                let prompt_tokens = prompt.unwrap_or(0);
                let completion_tokens = eval.unwrap_or(0);
                Some(TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens.saturating_add(completion_tokens),
                })
            }
        };

        let model = if response.model.is_empty() {
            requested_model.to_string()
        } else {
            response.model
        };

        Completion {
            message: AssistantMessage::new(response.message.content).with_tool_calls(tool_calls),
            model,
            usage,
            finish_reason: Some(finish_reason),
        }
    }

    fn error_from_status(status: StatusCode, body: &str) -> AgentError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return AgentError::RateLimited(format!("Ollama rate limited: {body}"));
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return AgentError::ProviderUnavailable(format!("Ollama unavailable ({status})"));
        }
        if body.trim().is_empty() {
            AgentError::Provider(format!("Ollama request failed with status {status}"))
        } else {
            AgentError::Provider(format!("Ollama request failed ({status}): {body}"))
        }
    }

    fn map_reqwest_error(err: reqwest::Error) -> AgentError {
        if err.is_connect() || err.is_timeout() {
            AgentError::ProviderUnavailable(err.to_string())
        } else {
            AgentError::Provider(err.to_string())
        }
    }

    async fn tags(&self) -> Result<TagsResponse> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error_from_status(status, &body));
        }
        response.json().await.map_err(Self::map_reqwest_error)
    }
}

/// Some models return arguments as a JSON-encoded string
fn parse_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let models = self.list_models().await.unwrap_or_default();

        Ok(ProviderInfo {
            name: "Ollama".into(),
            models,
            supports_tools: true,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.tags().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[PromptMessage<'_>],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let request = ChatRequest {
            model: &options.model,
            messages: Self::convert_messages(messages),
            tools: Self::convert_tools(tools),
            options: WireOptions {
                temperature: options.temperature,
                top_p: options.top_p,
                num_predict: options.max_tokens,
            },
            stream: false,
        };

        tracing::debug!(
            model = %options.model,
            messages = messages.len(),
            tools = tools.len(),
            "Sending chat request to Ollama"
        );

        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| e.to_string());
            return Err(Self::error_from_status(status, &body));
        }

        let bytes = response.bytes().await.map_err(Self::map_reqwest_error)?;
        let response: ChatResponse = serde_json::from_slice(&bytes)?;

        Ok(Self::convert_completion(response, &options.model))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let tags = self.tags().await?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::ToolResultMessage;
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.host, "http://localhost");
        assert_eq!(config.port, 11434);
        assert_eq!(config.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_base_url_keeps_explicit_port() {
        let config = OllamaConfig {
            host: "http://gpu-box:11500/".into(),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "http://gpu-box:11500");
    }

    #[test]
    fn test_message_conversion() {
        let call = ToolCallRequest::new("c1", "chest_xray_classifier", json!({"image_path": "a.png"}));
        let conversation = vec![
            Message::user_image("/uploads/a.png"),
            Message::user("Is there an effusion?"),
            AssistantMessage::new("").with_tool_calls(vec![call.clone()]).into(),
            ToolResultMessage::for_call(&call, r#"{"Effusion":0.8}"#).into(),
        ];
        let mut prompt = vec![PromptMessage::System("You are helpful.")];
        prompt.extend(conversation.iter().map(PromptMessage::Conversation));

        let converted = OllamaProvider::convert_messages(&prompt);
        let roles: Vec<_> = converted.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "user", "assistant", "tool"]);
        assert_eq!(converted[1].content, "image_path: /uploads/a.png");
        assert_eq!(converted[3].tool_calls[0].function.name, "chest_xray_classifier");
        assert_eq!(converted[4].tool_name.as_deref(), Some("chest_xray_classifier"));
    }

    #[test]
    fn test_tool_definitions() {
        let schema = ToolSchema {
            name: "chest_xray_classifier".into(),
            description: "Classify".into(),
            parameters: vec![agent_core::ParameterSchema::required(
                "image_path",
                "string",
                "Path to the image",
            )],
            category: None,
        };
        let tools = OllamaProvider::convert_tools(&[schema]);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["parameters"]["required"][0], "image_path");
    }

    #[test]
    fn test_response_with_tool_calls() {
        let raw = json!({
            "model": "qwen2.5:7b",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [
                    {"function": {"name": "chest_xray_classifier", "arguments": {"image_path": "a.png"}}},
                    {"function": {"name": "chest_xray_segmentation", "arguments": "{\"image_path\": \"a.png\"}"}}
                ]
            },
            "done": true,
            "prompt_eval_count": 120,
            "eval_count": 30
        });
        let response: ChatResponse = serde_json::from_value(raw).unwrap();
        let completion = OllamaProvider::convert_completion(response, "qwen2.5:7b");

        let calls = &completion.message.tool_calls;
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].id, calls[1].id);
        assert_eq!(calls[1].arguments["image_path"], "a.png");
        assert_eq!(completion.finish_reason, Some(FinishReason::ToolUse));
        assert_eq!(completion.usage.unwrap().total_tokens, 150);
    }

    #[test]
    fn test_response_final_answer() {
        let raw = json!({
            "message": {"role": "assistant", "content": "No acute findings."},
            "done": true,
            "done_reason": "stop"
        });
        let response: ChatResponse = serde_json::from_value(raw).unwrap();
        let completion = OllamaProvider::convert_completion(response, "mistral:latest");

        assert!(!completion.message.has_tool_calls());
        assert_eq!(completion.model, "mistral:latest");
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
        assert!(completion.usage.is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            OllamaProvider::error_from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            AgentError::RateLimited(_)
        ));
        assert!(matches!(
            OllamaProvider::error_from_status(StatusCode::NOT_FOUND, "model not found"),
            AgentError::Provider(msg) if msg.contains("model not found")
        ));
    }
}
