use std::path::{Path, PathBuf};

use crate::error::{DetectError, Result};
use crate::models::IndexedResult;

/// Extension of model manifests understood by the built-in detector
pub const MODEL_EXTENSION: &str = "toml";

/// The inference backend, seen from the orchestrator.
///
/// `load` produces an explicit handle that is threaded through every `infer`
/// call. `infer` yields exactly one result per requested asset; a failure on
/// one image becomes a `Failed` result for that image. Results may arrive in
/// any order, the index says which asset each belongs to.
pub trait DetectionCapability {
    type Handle;

    fn load(&self, model_identifier: &str) -> Result<Self::Handle>;

    fn infer<'a>(
        &'a self,
        handle: &'a Self::Handle,
        assets: &'a [PathBuf],
    ) -> Box<dyn Iterator<Item = IndexedResult> + Send + 'a>;
}

/// Directory of model files, listed to offer model choices
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sorted file names of the manifests in the store. A missing directory
    /// is an empty store.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DetectError::Io(e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_manifest = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION))
                .unwrap_or(false);
            if path.is_file() && is_manifest {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Path of a model identifier inside the store. Identifiers that are
    /// already paths to an existing file are used as-is.
    pub fn resolve(&self, model_identifier: &str) -> PathBuf {
        let direct = Path::new(model_identifier);
        if direct.components().count() > 1 && direct.is_file() {
            return direct.to_path_buf();
        }
        self.root.join(model_identifier)
    }
}
