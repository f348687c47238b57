//! Service Kit - Agent Tools
//!
//! Chest X-ray tools that implement `agent_core::Tool` on top of an
//! [`InferenceBackend`].

mod classifier;
mod grounding;
mod report;
mod segmentation;
mod vqa;

pub use classifier::ChestXRayClassifierTool;
pub use grounding::XRayPhraseGroundingTool;
pub use report::ChestXRayReportGeneratorTool;
pub use segmentation::ChestXRaySegmentationTool;
pub use vqa::XRayVqaTool;

use agent_core::ParameterSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::backend::{InferenceBackend, InferenceTask};
use crate::error::{Result, ToolError};
use crate::model::ImagePath;

pub(crate) fn image_param() -> ParameterSchema {
    ParameterSchema::required(
        "image_path",
        "string",
        "Path to the chest X-ray image file, only supports JPG, PNG or DICOM images",
    )
}

/// Required non-empty string argument
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArgument(format!("'{key}' must be a non-empty string")))
}

pub(crate) fn image_arg(args: &Value) -> Result<ImagePath> {
    ImagePath::parse(required_str(args, "image_path")?)
}

/// Run `task` and decode its output
pub(crate) async fn run_task<T: DeserializeOwned>(
    backend: &dyn InferenceBackend,
    task: InferenceTask,
    request: &Value,
) -> Result<T> {
    let raw = backend.infer(task, request).await?;
    serde_json::from_value(raw).map_err(|e| ToolError::MalformedResponse(format!("{task}: {e}")))
}

/// Metadata attached to every successful result
pub(crate) fn completed(image: &ImagePath, backend: &dyn InferenceBackend) -> Value {
    json!({
        "image_path": image.path,
        "analysis_status": "completed",
        "backend": backend.name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_str() {
        let args = json!({"image_path": "  a.png ", "phrase": "", "n": 3});
        assert_eq!(required_str(&args, "image_path").unwrap(), "a.png");
        assert!(required_str(&args, "phrase").is_err());
        assert!(required_str(&args, "n").is_err());
        assert!(required_str(&args, "missing").is_err());
    }
}
