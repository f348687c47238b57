//! Conversation Messages
//!
//! The closed set of messages a conversation is made of, and the
//! append-only [`ConversationState`] that holds them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result (injected as context)
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// What a user turn carries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    /// Plain text
    Text { text: String },
    /// Reference to an uploaded image (path or URL), never the pixels
    Image { path: String },
}

/// A user turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: UserContent,
}

/// Tool invocation requested by the reasoning step
///
/// Never mutated after the reasoning step produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique within the assistant turn that issued it
    pub id: String,

    /// Tool name as registered
    pub name: String,

    /// Structured arguments
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// An assistant turn: either a final answer or a batch of tool calls
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Give every call a distinct id, suffixing repeats (`call_0` becomes
    /// `call_0-1`). Returns how many ids were rewritten.
    pub fn dedupe_call_ids(&mut self) -> usize {
        let mut seen: HashSet<String> = HashSet::with_capacity(self.tool_calls.len());
        let mut rewritten = 0;
        for idx in 0..self.tool_calls.len() {
            let id = self.tool_calls[idx].id.clone();
            if seen.insert(id.clone()) {
                continue;
            }
            let taken = |candidate: &str, seen: &HashSet<String>| {
                seen.contains(candidate) || self.tool_calls.iter().any(|c| c.id == candidate)
            };
            let mut n = 1;
            let mut candidate = format!("{id}-{n}");
            while taken(&candidate, &seen) {
                n += 1;
                candidate = format!("{id}-{n}");
            }
            seen.insert(candidate.clone());
            self.tool_calls[idx].id = candidate;
            rewritten += 1;
        }
        rewritten
    }
}

/// Result of one tool call, linked to its request by `call_id`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub content: String,

    /// Display artifact produced by the tool (e.g. an overlay image path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

impl ToolResultMessage {
    /// Result for `call` with the given text content
    pub fn for_call(call: &ToolCallRequest, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            content: content.into(),
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Option<String>) -> Self {
        self.artifact = artifact;
        self
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    Tool(ToolResultMessage),
}

impl Message {
    /// Create a text user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: UserContent::Text { text: text.into() },
        })
    }

    /// Create an image-reference user message
    pub fn user_image(path: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: UserContent::Image { path: path.into() },
        })
    }

    /// Create an assistant message without tool calls
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(AssistantMessage::new(content))
    }

    pub const fn role(&self) -> Role {
        match self {
            Self::User(_) => Role::User,
            Self::Assistant(_) => Role::Assistant,
            Self::Tool(_) => Role::Tool,
        }
    }

    /// Text shown to the model for this message
    pub fn text(&self) -> &str {
        match self {
            Self::User(UserMessage {
                content: UserContent::Text { text },
            }) => text,
            Self::User(UserMessage {
                content: UserContent::Image { path },
            }) => path,
            Self::Assistant(a) => &a.content,
            Self::Tool(t) => &t.content,
        }
    }

    pub const fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Self::Assistant(a) => Some(a),
            _ => None,
        }
    }
}

impl From<AssistantMessage> for Message {
    fn from(msg: AssistantMessage) -> Self {
        Self::Assistant(msg)
    }
}

impl From<ToolResultMessage> for Message {
    fn from(msg: ToolResultMessage) -> Self {
        Self::Tool(msg)
    }
}

/// Borrowed view of what is sent to the model.
///
/// The system instruction is only ever a prompt message; it is never stored
/// in [`ConversationState`].
#[derive(Clone, Copy, Debug)]
pub enum PromptMessage<'a> {
    System(&'a str),
    Conversation(&'a Message),
}

impl PromptMessage<'_> {
    pub const fn role(&self) -> Role {
        match self {
            PromptMessage::System(_) => Role::System,
            PromptMessage::Conversation(m) => m.role(),
        }
    }
}

/// Conversation history, append-only
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message
    pub fn push(&mut self, message: impl Into<Message>) {
        self.messages.push(message.into());
    }

    /// Add several messages, in order
    pub fn extend<I>(&mut self, messages: I)
    where
        I: IntoIterator,
        I::Item: Into<Message>,
    {
        self.messages.extend(messages.into_iter().map(Into::into));
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent assistant message, if any
    pub fn last_assistant(&self) -> Option<&AssistantMessage> {
        self.messages.iter().rev().find_map(Message::as_assistant)
    }

    /// Calls of the trailing assistant turn that have no result yet
    pub fn pending_tool_calls(&self) -> Vec<&ToolCallRequest> {
        let answered: HashSet<&str> = self
            .messages
            .iter()
            .rev()
            .map_while(|m| match m {
                Message::Tool(r) => Some(r.call_id.as_str()),
                _ => None,
            })
            .collect();
        let batch = self.messages[..self.messages.len() - answered.len()]
            .last()
            .and_then(Message::as_assistant);

        batch
            .map(|a| {
                a.tool_calls
                    .iter()
                    .filter(|c| !answered.contains(c.id.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check that every tool result answers a call from the assistant turn
    /// right before it, exactly once, and that no tool call is left
    /// unanswered when the next non-tool message arrives or the history ends.
    pub fn validate_alignment(&self) -> Result<()> {
        let mut open: Option<HashSet<&str>> = None;

        for (idx, message) in self.messages.iter().enumerate() {
            if let Message::Tool(result) = message {
                let pending = open.as_mut().ok_or_else(|| {
                    AgentError::InvalidState(format!(
                        "tool result '{}' at {idx} has no preceding tool call",
                        result.call_id
                    ))
                })?;
                if !pending.remove(result.call_id.as_str()) {
                    return Err(AgentError::InvalidState(format!(
                        "tool result '{}' at {idx} is unknown or duplicated",
                        result.call_id
                    )));
                }
                continue;
            }

            ensure_answered(open.as_ref(), idx)?;
            open = match message {
                Message::Assistant(a) if a.has_tool_calls() => {
                    let mut ids = HashSet::with_capacity(a.tool_calls.len());
                    for call in &a.tool_calls {
                        if !ids.insert(call.id.as_str()) {
                            return Err(AgentError::InvalidState(format!(
                                "duplicate tool call id '{}' at {idx}",
                                call.id
                            )));
                        }
                    }
                    Some(ids)
                }
                _ => None,
            };
        }

        ensure_answered(open.as_ref(), self.messages.len())
    }
}

fn ensure_answered(open: Option<&HashSet<&str>>, idx: usize) -> Result<()> {
    match open {
        Some(pending) if !pending.is_empty() => {
            let mut ids: Vec<_> = pending.iter().copied().collect();
            ids.sort_unstable();
            Err(AgentError::InvalidState(format!(
                "tool calls [{}] unanswered before position {idx}",
                ids.join(", ")
            )))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "classifier", json!({"image_path": "x.png"}))
    }

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role(), Role::User);
        assert_eq!(msg.text(), "Hello");

        let img = Message::user_image("/uploads/cxr.png");
        assert_eq!(img.role(), Role::User);
        assert_eq!(img.text(), "/uploads/cxr.png");
    }

    #[test]
    fn test_dedupe_call_ids() {
        let mut message =
            AssistantMessage::new("").with_tool_calls(vec![call("call_0"), call("call_0"), call("call_0-1")]);

        assert_eq!(message.dedupe_call_ids(), 1);
        let ids: Vec<_> = message.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["call_0", "call_0-2", "call_0-1"]);

        assert_eq!(message.dedupe_call_ids(), 0);
    }

    #[test]
    fn test_pending_tool_calls() {
        let mut state = ConversationState::new();
        assert!(state.pending_tool_calls().is_empty());

        state.push(Message::user("hi"));
        state.push(AssistantMessage::new("").with_tool_calls(vec![call("1"), call("2")]));
        assert_eq!(state.pending_tool_calls().len(), 2);

        state.push(ToolResultMessage::for_call(&call("2"), "ok"));
        let pending: Vec<_> = state.pending_tool_calls().into_iter().map(|c| c.id.as_str()).collect();
        assert_eq!(pending, vec!["1"]);

        state.push(ToolResultMessage::for_call(&call("1"), "ok"));
        assert!(state.pending_tool_calls().is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let msg: Message = AssistantMessage::new("checking")
            .with_tool_calls(vec![call("1")])
            .into();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["id"], "1");

        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);

        let user = serde_json::to_value(Message::user_image("a.png")).unwrap();
        assert_eq!(user["role"], "user");
        assert_eq!(user["content"]["type"], "image");
    }

    #[test]
    fn test_final_assistant_omits_tool_calls() {
        let value = serde_json::to_value(Message::assistant("done")).unwrap();
        assert!(value.get("tool_calls").is_none());
    }

    #[test]
    fn test_conversation() {
        let mut conv = ConversationState::new();
        conv.push(Message::user("Hi"));
        conv.push(AssistantMessage::new("Hello!"));

        assert_eq!(conv.len(), 2);
        assert_eq!(conv.last().unwrap().role(), Role::Assistant);
        assert_eq!(conv.last_assistant().unwrap().content, "Hello!");
    }

    #[test]
    fn test_alignment_accepts_answered_batch_in_any_order() {
        let mut conv = ConversationState::new();
        conv.push(Message::user("look"));
        conv.push(AssistantMessage::new("").with_tool_calls(vec![call("1"), call("2")]));
        conv.push(ToolResultMessage::for_call(&call("2"), "b"));
        conv.push(ToolResultMessage::for_call(&call("1"), "a"));
        conv.push(AssistantMessage::new("done"));

        assert!(conv.validate_alignment().is_ok());
    }

    #[test]
    fn test_alignment_rejects_unanswered_calls() {
        let mut conv = ConversationState::new();
        conv.push(Message::user("look"));
        conv.push(AssistantMessage::new("").with_tool_calls(vec![call("1"), call("2")]));
        conv.push(ToolResultMessage::for_call(&call("1"), "a"));

        let err = conv.validate_alignment().unwrap_err();
        assert!(matches!(err, AgentError::InvalidState(_)));
        assert!(err.to_string().contains('2'));
    }

    #[test]
    fn test_alignment_rejects_duplicate_and_orphan_results() {
        let mut conv = ConversationState::new();
        conv.push(AssistantMessage::new("").with_tool_calls(vec![call("1")]));
        conv.push(ToolResultMessage::for_call(&call("1"), "a"));
        conv.push(ToolResultMessage::for_call(&call("1"), "a"));
        assert!(conv.validate_alignment().is_err());

        let mut orphan = ConversationState::new();
        orphan.push(Message::user("hi"));
        orphan.push(ToolResultMessage::for_call(&call("9"), "?"));
        assert!(orphan.validate_alignment().is_err());
    }
}
