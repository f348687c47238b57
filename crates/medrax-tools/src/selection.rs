//! Tool selection
//!
//! Builds the registry from a configured list of tool names. Both the names
//! the model sees (`chest_xray_classifier`) and the class-style aliases used
//! in deployment configs (`ChestXRayClassifierTool`) are accepted.

use std::sync::Arc;

use agent_core::ToolRegistry;

use crate::backend::InferenceBackend;
use crate::tools::{
    ChestXRayClassifierTool, ChestXRayReportGeneratorTool, ChestXRaySegmentationTool,
    XRayPhraseGroundingTool, XRayVqaTool,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Classifier,
    Segmentation,
    ReportGenerator,
    Vqa,
    PhraseGrounding,
}

impl ToolKind {
    pub const ALL: [Self; 5] = [
        Self::Classifier,
        Self::Segmentation,
        Self::ReportGenerator,
        Self::Vqa,
        Self::PhraseGrounding,
    ];

    /// Name exposed to the model
    pub const fn name(self) -> &'static str {
        match self {
            Self::Classifier => ChestXRayClassifierTool::NAME,
            Self::Segmentation => ChestXRaySegmentationTool::NAME,
            Self::ReportGenerator => ChestXRayReportGeneratorTool::NAME,
            Self::Vqa => XRayVqaTool::NAME,
            Self::PhraseGrounding => XRayPhraseGroundingTool::NAME,
        }
    }

    const fn alias(self) -> &'static str {
        match self {
            Self::Classifier => "ChestXRayClassifierTool",
            Self::Segmentation => "ChestXRaySegmentationTool",
            Self::ReportGenerator => "ChestXRayReportGeneratorTool",
            Self::Vqa => "XRayVQATool",
            Self::PhraseGrounding => "XRayPhraseGroundingTool",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name || k.alias().eq_ignore_ascii_case(name))
    }

    fn instantiate(self, backend: Arc<dyn InferenceBackend>) -> Arc<dyn agent_core::Tool> {
        match self {
            Self::Classifier => Arc::new(ChestXRayClassifierTool::new(backend)),
            Self::Segmentation => Arc::new(ChestXRaySegmentationTool::new(backend)),
            Self::ReportGenerator => Arc::new(ChestXRayReportGeneratorTool::new(backend)),
            Self::Vqa => Arc::new(XRayVqaTool::new(backend)),
            Self::PhraseGrounding => Arc::new(XRayPhraseGroundingTool::new(backend)),
        }
    }
}

/// Which tools to load
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSelection {
    kinds: Vec<ToolKind>,
}

impl Default for ToolSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl ToolSelection {
    pub fn all() -> Self {
        Self {
            kinds: ToolKind::ALL.to_vec(),
        }
    }

    /// Unknown names are skipped with a warning; duplicates collapse
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kinds = Vec::new();
        for name in names {
            let name = name.as_ref();
            if name.trim().is_empty() {
                continue;
            }
            match ToolKind::from_name(name) {
                Some(kind) if !kinds.contains(&kind) => kinds.push(kind),
                Some(_) => {}
                None => tracing::warn!(tool = name, "Unknown tool in selection, skipping"),
            }
        }
        Self { kinds }
    }

    pub fn kinds(&self) -> &[ToolKind] {
        &self.kinds
    }

    pub fn build_registry(&self, backend: &Arc<dyn InferenceBackend>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for kind in &self.kinds {
            tracing::info!(tool = kind.name(), backend = backend.name(), "Loading tool");
            registry.register_shared(kind.instantiate(Arc::clone(backend)));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    #[test]
    fn test_names_and_aliases() {
        assert_eq!(ToolKind::from_name("chest_xray_expert"), Some(ToolKind::Vqa));
        assert_eq!(ToolKind::from_name("XRayVQATool"), Some(ToolKind::Vqa));
        assert_eq!(
            ToolKind::from_name("ChestXRayClassifierTool"),
            Some(ToolKind::Classifier)
        );
        assert_eq!(ToolKind::from_name("ChestXRayGeneratorTool"), None);
    }

    #[test]
    fn test_selection_skips_unknown_and_duplicates() {
        let selection = ToolSelection::from_names([
            "ChestXRayClassifierTool",
            "ImageVisualizerTool",
            "chest_xray_classifier",
            "xray_phrase_grounding",
            "",
        ]);
        assert_eq!(
            selection.kinds(),
            &[ToolKind::Classifier, ToolKind::PhraseGrounding]
        );
    }

    #[test]
    fn test_registry_contains_selected_tools() {
        let backend: Arc<dyn InferenceBackend> = Arc::new(MockBackend::default());
        let registry = ToolSelection::all().build_registry(&backend);

        assert_eq!(registry.len(), 5);
        assert_eq!(
            registry.names(),
            vec![
                "chest_xray_classifier",
                "chest_xray_expert",
                "chest_xray_report_generator",
                "chest_xray_segmentation",
                "xray_phrase_grounding",
            ]
        );
    }
}
