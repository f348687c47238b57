//! Mock Inference Backend
//!
//! For testing and demo purposes. Returns plausible static outputs and can be
//! told to fail specific tasks.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Value, json};
use uuid::Uuid;

use super::{InferenceBackend, InferenceTask};
use crate::error::{Result, ToolError};

/// Mock backend with canned outputs
#[derive(Clone, Debug)]
pub struct MockBackend {
    /// Where visualization paths point
    temp_dir: PathBuf,
    failures: HashMap<InferenceTask, String>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new("temp")
    }
}

impl MockBackend {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            failures: HashMap::new(),
        }
    }

    /// Make `task` fail with `message`
    #[must_use]
    pub fn failing(mut self, task: InferenceTask, message: impl Into<String>) -> Self {
        self.failures.insert(task, message.into());
        self
    }

    fn artifact(&self, prefix: &str) -> String {
        self.temp_dir
            .join(format!("{prefix}_{}.png", Uuid::new_v4().simple()))
            .to_string_lossy()
            .into_owned()
    }

    fn canned(&self, task: InferenceTask, request: &Value) -> Value {
        match task {
            InferenceTask::Classification => json!({
                "Atelectasis": 0.32,
                "Cardiomegaly": 0.64,
                "Consolidation": 0.12,
                "Edema": 0.21,
                "Effusion": 0.81,
                "Pneumonia": 0.09,
                "Pneumothorax": 0.05,
            }),
            InferenceTask::Segmentation => json!({
                "organs": {
                    "Left Lung": {
                        "area_pixels": 48213,
                        "area_cm2": 120.5,
                        "centroid": [312.4, 260.1],
                        "bbox": [210, 120, 420, 410],
                        "confidence": 0.93,
                    },
                    "Right Lung": {
                        "area_pixels": 52877,
                        "area_cm2": 132.2,
                        "centroid": [128.9, 255.7],
                        "bbox": [30, 118, 230, 405],
                        "confidence": 0.95,
                    },
                    "Heart": {
                        "area_pixels": 21034,
                        "area_cm2": 52.6,
                        "centroid": [250.2, 300.8],
                        "bbox": [180, 230, 330, 380],
                        "confidence": 0.91,
                    },
                },
                "visualization_path": self.artifact("segmentation"),
            }),
            InferenceTask::ReportGeneration => json!({
                "findings": "There is a moderate left pleural effusion with adjacent atelectasis. \
                             The cardiac silhouette is mildly enlarged. No pneumothorax.",
                "impression": "1. Moderate left pleural effusion. 2. Mild cardiomegaly.",
            }),
            InferenceTask::VisualQuestionAnswering => {
                let question = request
                    .get("question")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                json!({
                    "answer": format!(
                        "Regarding \"{question}\": the image shows blunting of the left \
                         costophrenic angle consistent with a pleural effusion."
                    ),
                })
            }
            InferenceTask::PhraseGrounding => {
                let phrase = request
                    .get("phrase")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                json!({
                    "predictions": [{
                        "phrase": phrase,
                        "bounding_boxes": [[0.55, 0.58, 0.92, 0.88]],
                    }],
                    "visualization_path": self.artifact("grounding"),
                })
            }
        }
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn infer(&self, task: InferenceTask, request: &Value) -> Result<Value> {
        if let Some(message) = self.failures.get(&task) {
            return Err(ToolError::Backend(message.clone()));
        }
        Ok(self.canned(task, request))
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Mock"
    }
}
