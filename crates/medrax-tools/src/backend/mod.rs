//! Inference Backends
//!
//! The imaging models run out of process. A backend takes a task and a JSON
//! request and returns the model's JSON output.

mod http;
mod mock;

pub use http::HttpBackend;
pub use mock::MockBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Model task served by the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceTask {
    Classification,
    Segmentation,
    ReportGeneration,
    VisualQuestionAnswering,
    PhraseGrounding,
}

impl InferenceTask {
    /// Path segment under `/v1/`
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Classification => "classify",
            Self::Segmentation => "segment",
            Self::ReportGeneration => "report",
            Self::VisualQuestionAnswering => "vqa",
            Self::PhraseGrounding => "ground",
        }
    }
}

impl std::fmt::Display for InferenceTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inference backend trait (Strategy pattern)
///
/// Implementations are shared by every tool and called concurrently.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one task
    async fn infer(&self, task: InferenceTask, request: &serde_json::Value)
    -> Result<serde_json::Value>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Backend name
    fn name(&self) -> &str;
}
