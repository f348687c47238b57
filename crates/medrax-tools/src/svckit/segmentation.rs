//! Chest X-ray Segmentation Tool
//!
//! Segments anatomical structures and reports per-structure metrics. The
//! rendered overlay becomes the display artifact.

use std::sync::Arc;

use agent_core::{ParameterSchema, Result as CoreResult, Tool, ToolOutput, ToolSchema};
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{completed, image_arg, image_param, run_task};
use crate::backend::{InferenceBackend, InferenceTask};
use crate::error::ToolError;
use crate::model::Segmentation;

const STRUCTURES: &[&str] = &[
    "Left Clavicle",
    "Right Clavicle",
    "Left Scapula",
    "Right Scapula",
    "Left Lung",
    "Right Lung",
    "Left Hilus Pulmonis",
    "Right Hilus Pulmonis",
    "Heart",
    "Aorta",
    "Facies Diaphragmatica",
    "Mediastinum",
    "Weasand",
    "Spine",
];

pub struct ChestXRaySegmentationTool {
    backend: Arc<dyn InferenceBackend>,
}

impl ChestXRaySegmentationTool {
    pub const NAME: &'static str = "chest_xray_segmentation";

    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }

    fn organs(args: &Value) -> Result<Option<Vec<String>>, ToolError> {
        let Some(list) = args.get("organs").filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let names = list
            .as_array()
            .ok_or_else(|| ToolError::InvalidArgument("'organs' must be a list".into()))?;

        names
            .iter()
            .map(|n| {
                n.as_str()
                    .and_then(|n| STRUCTURES.iter().find(|s| s.eq_ignore_ascii_case(n)))
                    .map(|s| (*s).to_string())
                    .ok_or_else(|| ToolError::InvalidArgument(format!("unknown structure {n}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

#[async_trait]
impl Tool for ChestXRaySegmentationTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME.into(),
            description: "Segments chest X-ray images into anatomical structures and returns, \
                per structure, its area in pixels and cm2, centroid, bounding box and \
                confidence, plus a visualization of the segmentation masks."
                .into(),
            parameters: vec![
                image_param(),
                ParameterSchema {
                    name: "organs".into(),
                    param_type: "array".into(),
                    description: format!(
                        "Structures to segment; all of them when omitted. One of: {}",
                        STRUCTURES.join(", ")
                    ),
                    required: false,
                    default: None,
                    enum_values: None,
                },
            ],
            category: Some("segmentation".into()),
        }
    }

    fn validate(&self, args: &Value) -> CoreResult<()> {
        image_arg(args)?;
        Self::organs(args)?;
        Ok(())
    }

    async fn invoke(&self, args: &Value) -> CoreResult<ToolOutput> {
        let image = image_arg(args)?;
        let request = json!({
            "image_path": image.path,
            "organs": Self::organs(args)?,
        });
        let result: Segmentation =
            run_task(self.backend.as_ref(), InferenceTask::Segmentation, &request).await?;

        let mut output = ToolOutput::new(serde_json::to_value(&result)?)
            .with_metadata(completed(&image, self.backend.as_ref()));
        if let Some(viz) = result.visualization_path {
            output = output.with_artifact(viz);
        }
        Ok(output)
    }
}
