//! Domain Models
//!
//! Typed payloads exchanged with the inference backend. Every tool result is
//! one of these, serialized to JSON for the model.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolError};

/// Accepted image file kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Dicom,
}

/// A validated reference to a chest X-ray on disk (or behind a URL)
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImagePath {
    pub path: String,
    pub format: ImageFormat,
}

impl ImagePath {
    /// Accepts `.jpg`, `.jpeg`, `.png` and `.dcm`, case-insensitively
    pub fn parse(path: &str) -> Result<Self> {
        let path = path.trim();
        if path.is_empty() {
            return Err(ToolError::InvalidArgument("image_path must not be empty".into()));
        }

        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let format = match ext.as_deref() {
            Some("jpg" | "jpeg") => ImageFormat::Jpeg,
            Some("png") => ImageFormat::Png,
            Some("dcm" | "dicom") => ImageFormat::Dicom,
            _ => return Err(ToolError::UnsupportedImage(path.to_string())),
        };

        Ok(Self {
            path: path.to_string(),
            format,
        })
    }
}

/// Pathology probabilities from the DenseNet classifier, keyed by finding
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Classification(pub BTreeMap<String, f64>);

impl Classification {
    /// Findings at or above `threshold`, most likely first
    pub fn positives(&self, threshold: f64) -> Vec<(&str, f64)> {
        let mut found: Vec<_> = self
            .0
            .iter()
            .filter(|(_, p)| **p >= threshold)
            .map(|(k, p)| (k.as_str(), *p))
            .collect();
        found.sort_by(|a, b| b.1.total_cmp(&a.1));
        found
    }
}

/// Per-structure measurements from anatomical segmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrganMetrics {
    pub area_pixels: u64,
    pub area_cm2: f64,
    /// (x, y) in pixels
    pub centroid: [f64; 2],
    /// [x_min, y_min, x_max, y_max] in pixels
    pub bbox: [u32; 4],
    pub confidence: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Segmentation {
    pub organs: BTreeMap<String, OrganMetrics>,
    /// Rendered mask overlay
    #[serde(default)]
    pub visualization_path: Option<String>,
}

/// Radiology report split the way radiologists write it
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub findings: String,
    pub impression: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VqaAnswer {
    pub answer: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundedPhrase {
    pub phrase: String,
    /// Relative boxes, [x_topleft, y_topleft, x_bottomright, y_bottomright] in 0..=1
    pub bounding_boxes: Vec<[f64; 4]>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Grounding {
    pub predictions: Vec<GroundedPhrase>,
    #[serde(default)]
    pub visualization_path: Option<String>,
}

impl Grounding {
    pub fn is_empty(&self) -> bool {
        self.predictions.iter().all(|p| p.bounding_boxes.is_empty())
    }
}
