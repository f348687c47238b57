//! HTTP/SSE Handlers

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use agent_core::{AgentError, Message, ThreadId, TurnUpdate, UserInput};

use crate::state::{AppState, StaticDirs};

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub ollama_connected: bool,
    pub backend_connected: bool,
    pub model: String,
    pub tools: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub thread_id: String,
    pub response: String,
    pub messages: Vec<Message>,
    pub display_path: Option<String>,
    pub cycles: usize,
    pub hit_cycle_cap: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    pub thread_id: String,
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub thread_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Where the file was saved; pass this as `image_path`
    pub original_path: String,
    /// URL of the saved file for previews
    pub display_path: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// One SSE `data:` payload
#[derive(Debug, Serialize)]
struct StreamPayload<'a> {
    thread_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<&'a [Message]>,
    display_path: Option<&'a str>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'a agent_core::TurnEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
}

fn agent_error(e: &AgentError) -> ApiError {
    tracing::error!("Agent error: {}", e);
    let (status, code) = match e {
        AgentError::ProviderUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "PROVIDER_UNAVAILABLE"),
        AgentError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
        AgentError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
        AgentError::Checkpoint(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CHECKPOINT_ERROR"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "AGENT_ERROR"),
    };
    api_error(status, code, e.user_message())
}

impl ChatRequest {
    fn into_turn(self) -> Result<(ThreadId, UserInput), ApiError> {
        let image = self.image_path.filter(|p| !p.trim().is_empty());
        if self.message.trim().is_empty() && image.is_none() {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "EMPTY_MESSAGE",
                "Provide a message or an image",
            ));
        }

        let thread = self
            .thread_id
            .filter(|t| !t.trim().is_empty())
            .map_or_else(ThreadId::new, ThreadId::from_string);
        let mut input = UserInput::text(self.message);
        input.image = image;
        Ok((thread, input))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ollama_connected = state.agent.provider().health_check().await.unwrap_or(false);
    let backend_connected = state.backend.health_check().await;

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        ollama_connected,
        backend_connected,
        model: state.model.clone(),
        tools: state
            .agent
            .tools()
            .names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

/// Run a turn and return the final state
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let (thread, input) = payload.into_turn()?;

    let outcome = state
        .agent
        .run_turn(&thread, input)
        .await
        .map_err(|e| agent_error(&e))?;

    Ok(Json(ChatResponse {
        thread_id: outcome.thread_id.to_string(),
        response: outcome.final_message.content,
        messages: outcome.history,
        display_path: outcome.display.map(|p| state.dirs.display_url(&p)),
        cycles: outcome.cycles,
        hit_cycle_cap: outcome.hit_cycle_cap,
    }))
}

fn update_event(update: &TurnUpdate, dirs: &StaticDirs) -> Event {
    let display = update.display.as_deref().map(|p| dirs.display_url(p));
    let payload = StreamPayload {
        thread_id: update.thread_id.as_str(),
        messages: Some(update.history.as_slice()),
        display_path: display.as_deref(),
        status: if update.event.is_terminal() {
            "completed"
        } else {
            "streaming"
        },
        event: Some(&update.event),
        error: None,
    };
    Event::default().data(serde_json::to_string(&payload).unwrap_or_default())
}

fn error_event(thread: &ThreadId, e: &AgentError) -> Event {
    tracing::error!(thread = %thread, "Turn failed: {}", e);
    let payload = StreamPayload {
        thread_id: thread.as_str(),
        messages: None,
        display_path: None,
        status: "error",
        event: None,
        error: Some(e.user_message()),
    };
    Event::default().data(serde_json::to_string(&payload).unwrap_or_default())
}

/// Run a turn, streaming one event per REASON/EXECUTE step
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (thread, input) = payload.into_turn()?;

    let updates = state.agent.stream_turn(thread.clone(), input);
    let dirs = state.dirs.clone();
    let events = updates.map(move |item| {
        Ok(match item {
            Ok(update) => update_event(&update, &dirs),
            Err(e) => error_event(&thread, &e),
        })
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// Forget a thread
pub async fn clear_handler(
    State(state): State<AppState>,
    Json(payload): Json<ClearRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let thread = ThreadId::from_string(payload.thread_id);
    state
        .agent
        .clear_thread(&thread)
        .await
        .map_err(|e| agent_error(&e))?;
    Ok(Json(serde_json::json!({ "success": true, "thread_id": thread })))
}

/// Current checkpointed history of a thread
pub async fn thread_handler(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ThreadResponse>, ApiError> {
    let thread = ThreadId::from_string(thread_id);
    let messages = state
        .agent
        .history(&thread)
        .await
        .map_err(|e| agent_error(&e))?;
    if messages.is_empty() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "THREAD_NOT_FOUND",
            format!("No conversation for thread {thread}"),
        ));
    }
    Ok(Json(ThreadResponse {
        thread_id: thread.to_string(),
        messages,
    }))
}

/// Save an uploaded image under the upload directory
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let bad_request = |e: axum::extract::multipart::MultipartError| {
        api_error(StatusCode::BAD_REQUEST, "INVALID_UPLOAD", e.body_text())
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(bad_request)?;

        let ext = std::path::Path::new(&file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        let saved = format!(
            "upload_{}_{}{ext}",
            chrono::Utc::now().timestamp(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let path = state.dirs.uploads.join(&saved);

        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            tracing::error!(path = %path.display(), "Upload write failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "UPLOAD_FAILED", "Could not save the upload")
        })?;
        tracing::info!(file = %file_name, saved = %path.display(), size = bytes.len(), "Stored upload");

        return Ok(Json(UploadResponse {
            original_path: path.to_string_lossy().into_owned(),
            display_path: format!("/uploads/{saved}"),
        }));
    }

    Err(api_error(StatusCode::BAD_REQUEST, "NO_FILE", "No file uploaded"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agent_core::message::PromptMessage;
    use agent_core::provider::{Completion, GenerationOptions, ModelInfo, ProviderInfo};
    use agent_core::{Agent, AssistantMessage, LlmProvider, ToolCallRequest, ToolSchema};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use medrax_tools::{MockBackend, ToolSelection};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    /// Odd calls request `tool`, even calls answer.
    struct TwoStepProvider {
        tool: &'static str,
        calls: AtomicUsize,
    }

    impl TwoStepProvider {
        fn calling(tool: &'static str) -> Self {
            Self {
                tool,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for TwoStepProvider {
        async fn info(&self) -> agent_core::Result<ProviderInfo> {
            Ok(ProviderInfo {
                name: "stub".into(),
                models: Vec::new(),
                supports_tools: true,
            })
        }

        async fn health_check(&self) -> agent_core::Result<bool> {
            Ok(true)
        }

        async fn complete(
            &self,
            _messages: &[PromptMessage<'_>],
            _tools: &[ToolSchema],
            options: &GenerationOptions,
        ) -> agent_core::Result<Completion> {
            let message = if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                AssistantMessage::new("").with_tool_calls(vec![ToolCallRequest::new(
                    "call-1",
                    self.tool,
                    json!({"image_path": "/uploads/cxr.png"}),
                )])
            } else {
                AssistantMessage::new("Findings suggest a left pleural effusion.")
            };
            Ok(Completion {
                message,
                model: options.model.clone(),
                usage: None,
                finish_reason: None,
            })
        }

        async fn list_models(&self) -> agent_core::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    struct TestApp {
        router: axum::Router,
        // Keeps the served directories alive for the test
        _temp: tempfile::TempDir,
        uploads: tempfile::TempDir,
    }

    fn app_calling(tool: &'static str) -> TestApp {
        let temp = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let backend: Arc<dyn medrax_tools::InferenceBackend> =
            Arc::new(MockBackend::new(temp.path()));
        let agent = Agent::builder()
            .provider(Arc::new(TwoStepProvider::calling(tool)))
            .tools(ToolSelection::all().build_registry(&backend))
            .build()
            .unwrap();
        let state = AppState {
            agent: Arc::new(agent),
            model: "qwen2.5:7b".into(),
            backend,
            dirs: StaticDirs {
                temp: temp.path().to_path_buf(),
                uploads: uploads.path().to_path_buf(),
            },
        };
        TestApp {
            router: crate::router(state),
            _temp: temp,
            uploads,
        }
    }

    fn app() -> axum::Router {
        app_calling("chest_xray_classifier").router
    }

    fn post(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_lists_tools() {
        let response = app()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["tools"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_chat_runs_tools_and_keeps_thread() {
        let app = app();
        let response = app
            .clone()
            .oneshot(post(
                "/api/chat",
                &json!({"message": "Any effusion?", "thread_id": "t-1", "image_path": "/uploads/cxr.png"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["thread_id"], "t-1");
        assert_eq!(body["response"], "Findings suggest a left pleural effusion.");
        assert_eq!(body["cycles"], 2);
        assert_eq!(body["messages"][3]["role"], "tool");

        let response = app
            .clone()
            .oneshot(Request::get("/api/threads/t-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["messages"].as_array().unwrap().len(), 5);

        let response = app
            .clone()
            .oneshot(post("/api/chat/clear", &json!({"thread_id": "t-1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/api/threads/t-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chat_display_path_is_a_served_url() {
        let app = app_calling("chest_xray_segmentation");
        let response = app
            .router
            .oneshot(post("/api/chat", &json!({"message": "Segment the heart"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let display = body["display_path"].as_str().unwrap();
        assert!(display.starts_with("/temp/segmentation_"), "{display}");
        assert!(display.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_upload_saves_and_serves_file() {
        let app = app_calling("chest_xray_classifier");
        let boundary = "medrax-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"CXR.PNG\"\r\n\
             Content-Type: image/png\r\n\r\n\
             fake-png-bytes\r\n\
             --{boundary}--\r\n"
        );
        let request = Request::post("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        let original = std::path::PathBuf::from(body["original_path"].as_str().unwrap());
        assert_eq!(original.parent(), Some(app.uploads.path()));
        assert_eq!(std::fs::read(&original).unwrap(), b"fake-png-bytes");

        let display = body["display_path"].as_str().unwrap().to_string();
        assert!(display.starts_with("/uploads/upload_"));
        assert!(display.ends_with(".png"));

        let response = app
            .router
            .oneshot(Request::get(display.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"fake-png-bytes");
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let boundary = "medrax-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"note\"\r\n\r\n\
             hello\r\n\
             --{boundary}--\r\n"
        );
        let request = Request::post("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "NO_FILE");
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let response = app()
            .oneshot(post("/api/chat", &json!({"message": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "EMPTY_MESSAGE");
    }

    #[tokio::test]
    async fn test_stream_ends_with_completed_event() {
        let response = app()
            .oneshot(post("/api/chat/stream", &json!({"message": "Any effusion?", "thread_id": "s"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let events: Vec<Value> = text
            .lines()
            .filter_map(|l| l.strip_prefix("data: "))
            .map(|d| serde_json::from_str(d).unwrap())
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["status"], "streaming");
        assert_eq!(events[0]["event"]["type"], "tool_calls_requested");
        assert_eq!(events[1]["event"]["type"], "tool_results");
        assert_eq!(events[2]["status"], "completed");
        assert_eq!(events[2]["thread_id"], "s");
    }
}
