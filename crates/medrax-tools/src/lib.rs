//! # medrax-tools
//!
//! Chest X-ray analysis tools for the MedRAX agent.
//!
//! Each tool validates its arguments, calls an [`InferenceBackend`] that
//! hosts the actual imaging model, and hands back a typed payload plus
//! metadata. Segmentation and grounding also return the path of a rendered
//! visualization, which the agent forwards as the display artifact.
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────┐
//! │ chest_xray_classifier        │      │  InferenceBackend    │
//! │ chest_xray_segmentation      │      │  ├─ HttpBackend      │
//! │ chest_xray_report_generator  │─────▶│  │   POST /v1/{task} │
//! │ chest_xray_expert            │      │  └─ MockBackend      │
//! │ xray_phrase_grounding        │      └──────────────────────┘
//! └──────────────────────────────┘
//! ```

pub mod backend;
pub mod error;
pub mod model;
pub mod prompts;
pub mod selection;
pub mod svckit;

pub use backend::{HttpBackend, InferenceBackend, InferenceTask, MockBackend};
pub use error::{Result, ToolError};
pub use prompts::{DEFAULT_MEDICAL_ASSISTANT_PROMPT, DEFAULT_PROMPT_NAME};
pub use selection::{ToolKind, ToolSelection};

/// Re-export tools for easy registration
pub mod tools {
    pub use crate::svckit::{
        ChestXRayClassifierTool, ChestXRayReportGeneratorTool, ChestXRaySegmentationTool,
        XRayPhraseGroundingTool, XRayVqaTool,
    };
}
