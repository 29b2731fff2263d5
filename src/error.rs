use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while preparing or running a detection batch.
///
/// Only `NoModelSelected`, `EmptyAssetSet`, `ModelLoad` and
/// `RunAlreadyInProgress` are fatal to a run. The remaining kinds are reported
/// per item and end up in the run's event stream.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("no model selected")]
    NoModelSelected,

    #[error("no assets selected")]
    EmptyAssetSet,

    #[error("no images found in {}", folder.display())]
    EmptySelection { folder: PathBuf },

    #[error("rejected {}: {reason}", path.display())]
    InvalidAsset { path: PathBuf, reason: String },

    #[error("failed to load model '{model}': {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("inference failed for {}: {reason}", path.display())]
    AssetInference { path: PathBuf, reason: String },

    #[error("failed to write {}: {reason}", path.display())]
    OutputWrite { path: PathBuf, reason: String },

    #[error("failed to render plot {}: {reason}", path.display())]
    PlotRender { path: PathBuf, reason: String },

    #[error("a run is already in progress")]
    RunAlreadyInProgress,

    #[error("invalid configuration in {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DetectError {
    /// Errors that abort a run before any output is produced.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoModelSelected
                | Self::EmptyAssetSet
                | Self::ModelLoad { .. }
                | Self::RunAlreadyInProgress
        )
    }

    pub(crate) fn output_write(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::OutputWrite {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;
