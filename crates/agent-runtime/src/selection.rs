//! Startup model selection
//!
//! Tries each candidate function-calling model in order and settles on the
//! first one the server has installed.

use agent_core::{AgentError, LlmProvider, Result};

/// Ollama tags look like `qwen2.5:7b`; a candidate without a tag matches
/// any installed tag of that model.
fn matches(candidate: &str, installed: &str) -> bool {
    if candidate == installed {
        return true;
    }
    if candidate.contains(':') {
        return false;
    }
    installed
        .split_once(':')
        .is_some_and(|(name, _)| name == candidate)
}

/// First of `candidates` that `provider` reports as installed
pub async fn select_model<S: AsRef<str>>(
    provider: &dyn LlmProvider,
    candidates: &[S],
) -> Result<String> {
    let installed = provider.list_models().await?;

    for candidate in candidates.iter().map(AsRef::as_ref) {
        if let Some(model) = installed.iter().find(|m| matches(candidate, &m.id)) {
            tracing::info!(candidate, model = %model.id, "Selected model");
            return Ok(model.id.clone());
        }
        tracing::warn!(candidate, "Model not installed, trying next candidate");
    }

    Err(AgentError::Config(format!(
        "None of the candidate models are installed: [{}]",
        candidates
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::message::PromptMessage;
    use agent_core::provider::{Completion, GenerationOptions, ModelInfo, ProviderInfo};
    use agent_core::tool::ToolSchema;
    use async_trait::async_trait;

    struct Installed(Vec<&'static str>);

    #[async_trait]
    impl LlmProvider for Installed {
        async fn info(&self) -> Result<ProviderInfo> {
            Ok(ProviderInfo {
                name: "fake".into(),
                models: self.list_models().await?,
                supports_tools: true,
            })
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(
            &self,
            _messages: &[PromptMessage<'_>],
            _tools: &[ToolSchema],
            _options: &GenerationOptions,
        ) -> Result<Completion> {
            Err(AgentError::Provider("not used".into()))
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(self
                .0
                .iter()
                .map(|id| ModelInfo {
                    id: (*id).to_string(),
                    name: (*id).to_string(),
                    context_length: None,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let provider = Installed(vec!["llama3:8b", "mistral:latest"]);
        let model = select_model(&provider, &["qwen2.5:7b", "mistral:latest"])
            .await
            .unwrap();
        assert_eq!(model, "mistral:latest");
    }

    #[tokio::test]
    async fn test_untagged_candidate_matches_any_tag() {
        let provider = Installed(vec!["qwen2.5:14b"]);
        let model = select_model(&provider, &["qwen2.5"]).await.unwrap();
        assert_eq!(model, "qwen2.5:14b");
    }

    #[tokio::test]
    async fn test_no_candidate_installed() {
        let provider = Installed(vec!["llama3:8b"]);
        let err = select_model(&provider, &["qwen2.5:7b"]).await.unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
