//! HTTP Inference Backend
//!
//! Posts JSON requests to an inference server at `{base_url}/v1/{task}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use super::{InferenceBackend, InferenceTask};
use crate::error::{Result, ToolError};

/// Backend talking to a remote model server
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, task: InferenceTask) -> String {
        format!("{}/v1/{}", self.base_url, task.as_str())
    }

    fn error_from_status(task: InferenceTask, status: StatusCode, body: &str) -> ToolError {
        if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::BAD_GATEWAY {
            return ToolError::BackendUnavailable(format!("{task}: {status}"));
        }
        // Servers usually answer {"error": "..."}
        let detail = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        if detail.is_empty() {
            ToolError::Backend(format!("{task} failed with status {status}"))
        } else {
            ToolError::Backend(detail)
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn infer(&self, task: InferenceTask, request: &Value) -> Result<Value> {
        tracing::debug!(%task, url = %self.endpoint(task), "Calling inference backend");

        let response = self
            .client
            .post(self.endpoint(task))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ToolError::BackendUnavailable(e.to_string())
                } else {
                    ToolError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error_from_status(task, status, &body));
        }

        Ok(response.json().await?)
    }

    async fn health_check(&self) -> bool {
        match self.client.get(format!("{}/health", self.base_url)).send().await {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                tracing::warn!("Inference backend health check failed: {}", e);
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "HTTP"
    }
}
