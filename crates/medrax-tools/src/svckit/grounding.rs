//! X-ray Phrase Grounding Tool
//!
//! Locates a described finding in the image. Boxes are relative
//! `[x_topleft, y_topleft, x_bottomright, y_bottomright]` in `0..=1`.

use std::sync::Arc;

use agent_core::{ParameterSchema, Result as CoreResult, Tool, ToolOutput, ToolSchema};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{completed, image_arg, image_param, required_str, run_task};
use crate::backend::{InferenceBackend, InferenceTask};
use crate::model::Grounding;

const DEFAULT_MAX_NEW_TOKENS: u64 = 300;

pub struct XRayPhraseGroundingTool {
    backend: Arc<dyn InferenceBackend>,
}

impl XRayPhraseGroundingTool {
    pub const NAME: &'static str = "xray_phrase_grounding";

    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for XRayPhraseGroundingTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.into(),
            description: "Locates and visualizes specific medical findings in chest X-ray images. \
                Takes a chest X-ray and a medical phrase to locate (e.g. 'Pleural effusion', \
                'Cardiomegaly'). Returns bounding boxes as [x_topleft, y_topleft, \
                x_bottomright, y_bottomright] with values between 0 and 1, and a \
                visualization of the finding's location."
                .into(),
            parameters: vec![
                image_param(),
                ParameterSchema::required(
                    "phrase",
                    "string",
                    "Medical finding or condition to locate in the image",
                ),
                ParameterSchema::optional(
                    "max_new_tokens",
                    "integer",
                    "Maximum number of new tokens to generate",
                    json!(DEFAULT_MAX_NEW_TOKENS),
                ),
            ],
            category: Some("grounding".into()),
        }
    }

    fn validate(&self, args: &Value) -> CoreResult<()> {
        image_arg(args)?;
        required_str(args, "phrase")?;
        Ok(())
    }

    async fn invoke(&self, args: &Value) -> CoreResult<ToolOutput> {
        let image = image_arg(args)?;
        let phrase = required_str(args, "phrase")?;
        let max_new_tokens = args
            .get("max_new_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_NEW_TOKENS);

        let grounding: Grounding = run_task(
            self.backend.as_ref(),
            InferenceTask::PhraseGrounding,
            &json!({
                "image_path": image.path,
                "phrase": phrase,
                "max_new_tokens": max_new_tokens,
            }),
        )
        .await?;

        let mut metadata = completed(&image, self.backend.as_ref());
        metadata["phrase"] = json!(phrase);
        if grounding.is_empty() {
            metadata["analysis_status"] = json!("completed_no_finding");
        }

        let mut output =
            ToolOutput::new(serde_json::to_value(&grounding)?).with_metadata(metadata);
        if let Some(viz) = grounding.visualization_path {
            output = output.with_artifact(viz);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::AgentError;

    use crate::backend::MockBackend;

    #[tokio::test]
    async fn test_grounding_surfaces_visualization() {
        let tool = XRayPhraseGroundingTool::new(Arc::new(MockBackend::new("temp")));
        let output = tool
            .invoke(&json!({"image_path": "a.png", "phrase": "Pleural effusion"}))
            .await
            .unwrap();

        assert_eq!(output.payload["predictions"][0]["phrase"], "Pleural effusion");
        assert!(output.artifact.unwrap().contains("grounding_"));
        assert_eq!(output.metadata["analysis_status"], "completed");
    }

    #[test]
    fn test_phrase_is_required() {
        let tool = XRayPhraseGroundingTool::new(Arc::new(MockBackend::default()));
        let err = tool
            .validate(&json!({"image_path": "a.png", "phrase": "  "}))
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolValidation(_)));
    }
}
