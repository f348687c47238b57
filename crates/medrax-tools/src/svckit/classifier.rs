//! Chest X-ray Classifier Tool
//!
//! Probabilities for 18 common chest pathologies.

use std::sync::Arc;

use agent_core::{Result as CoreResult, Tool, ToolOutput, ToolSchema};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{completed, image_arg, image_param, run_task};
use crate::backend::{InferenceBackend, InferenceTask};
use crate::model::Classification;

pub struct ChestXRayClassifierTool {
    backend: Arc<dyn InferenceBackend>,
}

impl ChestXRayClassifierTool {
    pub const NAME: &'static str = "chest_xray_classifier";

    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ChestXRayClassifierTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.into(),
            description: "A tool that classifies chest X-ray images for 18 different pathologies. \
                Returns a dictionary of pathologies and their predicted probabilities (0 to 1), \
                for example Atelectasis, Cardiomegaly, Consolidation, Edema, Effusion, \
                Pneumonia and Pneumothorax. Higher values indicate a higher likelihood."
                .into(),
            parameters: vec![image_param()],
            category: Some("classification".into()),
        }
    }

    fn validate(&self, args: &Value) -> CoreResult<()> {
        image_arg(args)?;
        Ok(())
    }

    async fn invoke(&self, args: &Value) -> CoreResult<ToolOutput> {
        let image = image_arg(args)?;
        let request = json!({ "image_path": image.path });
        let result: Classification =
            run_task(self.backend.as_ref(), InferenceTask::Classification, &request).await?;

        tracing::debug!(findings = result.0.len(), "Classification finished");
        Ok(ToolOutput::new(serde_json::to_value(&result)?)
            .with_metadata(completed(&image, self.backend.as_ref())))
    }
}
