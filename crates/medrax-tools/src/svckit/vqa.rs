//! Chest X-ray Expert (visual question answering)

use std::sync::Arc;

use agent_core::{ParameterSchema, Result as CoreResult, Tool, ToolOutput, ToolSchema};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{completed, image_arg, image_param, required_str, run_task};
use crate::backend::{InferenceBackend, InferenceTask};
use crate::model::VqaAnswer;

const DEFAULT_MAX_NEW_TOKENS: u64 = 512;

pub struct XRayVqaTool {
    backend: Arc<dyn InferenceBackend>,
}

impl XRayVqaTool {
    pub const NAME: &'static str = "chest_xray_expert";

    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for XRayVqaTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.into(),
            description: "A chest X-ray expert that answers complex questions about an image: \
                detailed findings, differential diagnoses, comparison between regions and \
                the reasoning behind an interpretation."
                .into(),
            parameters: vec![
                image_param(),
                ParameterSchema::required("question", "string", "Question about the chest X-ray"),
                ParameterSchema::optional(
                    "max_new_tokens",
                    "integer",
                    "Maximum length of the answer in tokens",
                    json!(DEFAULT_MAX_NEW_TOKENS),
                ),
            ],
            category: Some("vqa".into()),
        }
    }

    fn validate(&self, args: &Value) -> CoreResult<()> {
        image_arg(args)?;
        required_str(args, "question")?;
        Ok(())
    }

    async fn invoke(&self, args: &Value) -> CoreResult<ToolOutput> {
        let image = image_arg(args)?;
        let question = required_str(args, "question")?;
        let max_new_tokens = args
            .get("max_new_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_NEW_TOKENS);

        let answer: VqaAnswer = run_task(
            self.backend.as_ref(),
            InferenceTask::VisualQuestionAnswering,
            &json!({
                "image_path": image.path,
                "question": question,
                "max_new_tokens": max_new_tokens,
            }),
        )
        .await?;

        let mut metadata = completed(&image, self.backend.as_ref());
        metadata["question"] = json!(question);
        Ok(ToolOutput::new(json!({ "response": answer.answer })).with_metadata(metadata))
    }
}
