//! Error Types for the MedRAX tools

use agent_core::AgentError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Inference backend error: {0}")]
    Backend(String),

    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported image '{0}': only JPG, PNG or DICOM files are accepted")]
    UnsupportedImage(String),

    #[error("Unexpected backend response: {0}")]
    MalformedResponse(String),

    #[error("Prompt '{0}' not found")]
    PromptNotFound(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ToolError> for AgentError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::InvalidArgument(_) | ToolError::UnsupportedImage(_) => {
                Self::ToolValidation(err.to_string())
            }
            ToolError::PromptNotFound(_) => Self::Config(err.to_string()),
            other => Self::ToolExecution(other.to_string()),
        }
    }
}
