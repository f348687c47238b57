//! Application State

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::Agent;
use medrax_tools::InferenceBackend;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The orchestration agent (provider, tools and checkpoints inside)
    pub agent: Arc<Agent>,

    /// Model selected at startup
    pub model: String,

    /// Backend hosting the imaging models
    pub backend: Arc<dyn InferenceBackend>,

    /// Directories served as static files
    pub dirs: StaticDirs,
}

/// Directories exposed over HTTP
#[derive(Clone, Debug)]
pub struct StaticDirs {
    /// Tool visualizations, served at `/temp`
    pub temp: PathBuf,
    /// Uploaded images, served at `/uploads`
    pub uploads: PathBuf,
}

impl StaticDirs {
    /// URL a browser can fetch for `path`.
    ///
    /// Files under the temp or upload directory map to `/temp/..` and
    /// `/uploads/..`; anything else (already a URL, or outside both) is
    /// returned as is.
    pub fn display_url(&self, path: &str) -> String {
        let file = Path::new(path);
        [(&self.temp, "/temp"), (&self.uploads, "/uploads")]
            .into_iter()
            .find_map(|(dir, prefix)| {
                let rel = file.strip_prefix(dir).ok()?;
                let parts: Vec<_> = rel.iter().map(|c| c.to_string_lossy()).collect();
                (!parts.is_empty()).then(|| format!("{prefix}/{}", parts.join("/")))
            })
            .unwrap_or_else(|| path.to_string())
    }
}
