//! Server configuration from the environment

use std::path::PathBuf;
use std::time::Duration;

use agent_runtime::OllamaConfig;
use anyhow::Context;
use medrax_tools::DEFAULT_PROMPT_NAME;

const DEFAULT_MODELS: &[&str] = &["qwen2.5:7b", "mistral:latest"];

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub ollama: OllamaConfig,
    /// Candidate models, tried in order
    pub models: Vec<String>,
    /// Tool names to load; `None` loads all
    pub tools: Option<Vec<String>>,
    pub prompt_file: Option<PathBuf>,
    pub prompt_name: String,
    /// Inference server; `None` uses the mock backend
    pub backend_url: Option<String>,
    pub log_dir: PathBuf,
    /// `None` keeps checkpoints in memory
    pub checkpoint_dir: Option<PathBuf>,
    pub temp_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub max_cycles: usize,
    pub tool_concurrency: usize,
    pub tool_timeout: Option<Duration>,
    pub strict_checkpoints: bool,
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| get(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str, default: u64| -> anyhow::Result<u64> {
            var(key).map_or(Ok(default), |v| {
                v.trim()
                    .parse()
                    .with_context(|| format!("{key} must be a non-negative integer, got '{v}'"))
            })
        };

        let mut ollama = OllamaConfig::default();
        if let Some(host) = var("OLLAMA_HOST") {
            ollama.host = host;
        }
        if let Some(port) = var("OLLAMA_PORT") {
            ollama.port = port
                .trim()
                .parse()
                .with_context(|| format!("OLLAMA_PORT must be a port number, got '{port}'"))?;
        }

        let models = var("MEDRAX_MODELS").map_or_else(
            || DEFAULT_MODELS.iter().map(|m| (*m).to_string()).collect(),
            |v| list(&v),
        );
        anyhow::ensure!(!models.is_empty(), "MEDRAX_MODELS lists no models");

        let timeout_secs = number("TOOL_TIMEOUT_SECS", 300)?;

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8585".into()),
            ollama,
            models,
            tools: var("MEDRAX_TOOLS").map(|v| list(&v)),
            prompt_file: var("MEDRAX_PROMPT_FILE").map(PathBuf::from),
            prompt_name: var("MEDRAX_PROMPT_NAME").unwrap_or_else(|| DEFAULT_PROMPT_NAME.into()),
            backend_url: var("MEDRAX_BACKEND_URL"),
            log_dir: var("MEDRAX_LOG_DIR").map_or_else(|| PathBuf::from("logs"), PathBuf::from),
            checkpoint_dir: var("MEDRAX_CHECKPOINT_DIR").map(PathBuf::from),
            temp_dir: var("MEDRAX_TEMP_DIR").map_or_else(|| PathBuf::from("temp"), PathBuf::from),
            upload_dir: var("MEDRAX_UPLOAD_DIR")
                .map_or_else(|| PathBuf::from("data/uploads"), PathBuf::from),
            max_cycles: usize::try_from(number("MAX_CYCLES", 25)?)?,
            tool_concurrency: usize::try_from(number("TOOL_CONCURRENCY", 4)?)?,
            // 0 disables the timeout
            tool_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            strict_checkpoints: var("MEDRAX_STRICT_CHECKPOINTS")
                .is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes")),
        })
    }
}
