//! MedRAX HTTP Server
//!
//! Axum-based server exposing the chest X-ray agent over REST and SSE.
//! Uploaded images are served from `/uploads` and rendered visualizations
//! written by the tools from `/temp`.

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::{Agent, Checkpointer, FileCheckpointer, JsonFileCallLogger, MemoryCheckpointer};
use agent_runtime::{LlmProvider, OllamaProvider, select_model};
use medrax_tools::{
    DEFAULT_MEDICAL_ASSISTANT_PROMPT, HttpBackend, InferenceBackend, MockBackend, ToolSelection,
    prompts::load_prompt,
};

use crate::config::ServerConfig;
use crate::handlers::{
    chat_handler, chat_stream_handler, clear_handler, health_check, thread_handler, upload_handler,
};
use crate::state::{AppState, StaticDirs};

/// DICOM studies routinely exceed axum's 2 MB default
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Routes, static files and middleware
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/stream", post(chat_stream_handler))
        .route("/api/chat/clear", post(clear_handler))
        .route("/api/threads/{thread_id}", get(thread_handler))
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .nest_service("/uploads", ServeDir::new(&state.dirs.uploads))
        .nest_service("/temp", ServeDir::new(&state.dirs.temp))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn pick_model(provider: &OllamaProvider, candidates: &[String]) -> String {
    match provider.health_check().await {
        Ok(true) => tracing::info!("✓ Connected to Ollama"),
        Ok(false) | Err(_) => {
            tracing::warn!("⚠ Ollama not available - turns will fail until it is");
            tracing::warn!("  Make sure Ollama is running: ollama serve");
        }
    }

    match select_model(provider, candidates).await {
        Ok(model) => model,
        Err(e) => {
            // `from_lookup` guarantees at least one candidate
            let fallback = candidates.first().cloned().unwrap_or_default();
            tracing::warn!("{}; falling back to {}", e, fallback);
            fallback
        }
    }
}

fn system_prompt(config: &ServerConfig) -> anyhow::Result<String> {
    let Some(path) = &config.prompt_file else {
        return Ok(DEFAULT_MEDICAL_ASSISTANT_PROMPT.to_string());
    };
    let prompt = load_prompt(path, &config.prompt_name)?;
    tracing::info!("Loaded prompt {} from {}", config.prompt_name, path.display());
    Ok(prompt)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    std::fs::create_dir_all(&config.temp_dir)?;
    std::fs::create_dir_all(&config.upload_dir)?;

    // LLM provider
    let provider = Arc::new(OllamaProvider::from_config(config.ollama.clone())?);
    let model = pick_model(&provider, &config.models).await;
    tracing::info!("Using model {}", model);

    // Imaging backend
    let backend: Arc<dyn InferenceBackend> = match &config.backend_url {
        Some(url) => {
            let timeout = config.tool_timeout.unwrap_or(std::time::Duration::from_secs(300));
            let http = HttpBackend::new(url.as_str(), timeout)?;
            if !http.health_check().await {
                tracing::warn!("⚠ Inference backend at {} is not responding", url);
            }
            Arc::new(http)
        }
        None => {
            tracing::warn!("⚠ MEDRAX_BACKEND_URL not set - using mock imaging backend");
            Arc::new(MockBackend::new(config.temp_dir.clone()))
        }
    };

    // Tools
    let selection = config
        .tools
        .as_ref()
        .map_or_else(ToolSelection::all, |names| ToolSelection::from_names(names));
    let tools = selection.build_registry(&backend);
    tracing::info!("Registered {} tools:", tools.len());
    for name in tools.names() {
        tracing::info!("  • {}", name);
    }

    // Checkpoints
    let checkpointer: Arc<dyn Checkpointer> = match &config.checkpoint_dir {
        Some(dir) => {
            tracing::info!("Checkpoints in {}", dir.display());
            Arc::new(FileCheckpointer::new(dir)?)
        }
        None => Arc::new(MemoryCheckpointer::new()),
    };

    let agent = Agent::builder()
        .provider(provider)
        .tools(tools)
        .checkpointer(checkpointer)
        .call_logger(Arc::new(JsonFileCallLogger::new(&config.log_dir)))
        .system_prompt(system_prompt(&config)?)
        .model(model.clone())
        .max_cycles(config.max_cycles)
        .tool_concurrency(config.tool_concurrency)
        .tool_timeout(config.tool_timeout)
        .strict_checkpoints(config.strict_checkpoints)
        .build()?;

    let state = AppState {
        agent: Arc::new(agent),
        model,
        backend,
        dirs: StaticDirs {
            temp: config.temp_dir.clone(),
            uploads: config.upload_dir.clone(),
        },
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🩻 MedRAX server running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /api/health              - Health check");
    tracing::info!("  POST /api/chat               - Run a turn");
    tracing::info!("  POST /api/chat/stream        - Run a turn (SSE)");
    tracing::info!("  POST /api/chat/clear         - Forget a thread");
    tracing::info!("  GET  /api/threads/{{thread_id}} - Thread history");
    tracing::info!("  POST /upload                 - Upload an X-ray");
    tracing::info!("  GET  /uploads/*              - Uploaded images");
    tracing::info!("  GET  /temp/*                 - Rendered visualizations");

    axum::serve(listener, app).await?;

    Ok(())
}
