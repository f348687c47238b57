//! Chest X-ray Report Generator Tool

use std::sync::Arc;

use agent_core::{Result as CoreResult, Tool, ToolOutput, ToolSchema};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{completed, image_arg, image_param, run_task};
use crate::backend::{InferenceBackend, InferenceTask};
use crate::model::Report;

pub struct ChestXRayReportGeneratorTool {
    backend: Arc<dyn InferenceBackend>,
}

impl ChestXRayReportGeneratorTool {
    pub const NAME: &'static str = "chest_xray_report_generator";

    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ChestXRayReportGeneratorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.into(),
            description: "Generates a structured radiology report for a chest X-ray with a \
                FINDINGS section (detailed observations) and an IMPRESSION section \
                (summary of the key findings)."
                .into(),
            parameters: vec![image_param()],
            category: Some("report".into()),
        }
    }

    fn validate(&self, args: &Value) -> CoreResult<()> {
        image_arg(args)?;
        Ok(())
    }

    async fn invoke(&self, args: &Value) -> CoreResult<ToolOutput> {
        let image = image_arg(args)?;
        let report: Report = run_task(
            self.backend.as_ref(),
            InferenceTask::ReportGeneration,
            &json!({ "image_path": image.path }),
        )
        .await?;

        let text = format!(
            "CHEST X-RAY REPORT\n\nFINDINGS:\n{}\n\nIMPRESSION:\n{}",
            report.findings.trim(),
            report.impression.trim()
        );
        Ok(ToolOutput::text(text).with_metadata(completed(&image, self.backend.as_ref())))
    }
}
