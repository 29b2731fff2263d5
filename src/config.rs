use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DetectError, Result};

/// File looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "detectbatch.toml";

/// Options for a single run. Built once before the run starts and never
/// changed while it is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub save_labels: bool,
    pub save_confidence: bool,
    pub save_crops: bool,
    pub save_plots: bool,
    pub hide_labels: bool,
    pub hide_confidence: bool,
    pub auto_open_output: bool,
    pub model_identifier: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            save_labels: true,
            save_confidence: false,
            save_crops: false,
            save_plots: false,
            hide_labels: false,
            hide_confidence: false,
            auto_open_output: true,
            model_identifier: String::new(),
        }
    }
}

impl RunConfig {
    pub fn builder(model_identifier: impl Into<String>) -> RunConfigBuilder {
        RunConfigBuilder {
            config: RunConfig {
                model_identifier: model_identifier.into(),
                ..RunConfig::default()
            },
        }
    }

    /// Check a config that did not come through the builder, e.g. one
    /// deserialized from a file.
    pub fn validate(&self) -> Result<()> {
        if self.model_identifier.trim().is_empty() {
            return Err(DetectError::NoModelSelected);
        }
        Ok(())
    }
}

pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn with_save_labels(mut self, enabled: bool) -> Self {
        self.config.save_labels = enabled;
        self
    }

    pub fn with_save_confidence(mut self, enabled: bool) -> Self {
        self.config.save_confidence = enabled;
        self
    }

    pub fn with_save_crops(mut self, enabled: bool) -> Self {
        self.config.save_crops = enabled;
        self
    }

    pub fn with_save_plots(mut self, enabled: bool) -> Self {
        self.config.save_plots = enabled;
        self
    }

    pub fn with_hide_labels(mut self, enabled: bool) -> Self {
        self.config.hide_labels = enabled;
        self
    }

    pub fn with_hide_confidence(mut self, enabled: bool) -> Self {
        self.config.hide_confidence = enabled;
        self
    }

    pub fn with_auto_open_output(mut self, enabled: bool) -> Self {
        self.config.auto_open_output = enabled;
        self
    }

    pub fn build(self) -> Result<RunConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Application-level settings read from `detectbatch.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding model manifests
    pub models_dir: PathBuf,
    /// Parent of every `detection_<timestamp>` run directory
    pub results_dir: PathBuf,
    /// Inference worker threads for the built-in detector
    pub workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            results_dir: PathBuf::from("results"),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl AppConfig {
    /// Load from an explicit file. Unlike [`AppConfig::discover`], a missing or
    /// malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DetectError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut config: AppConfig = toml::from_str(&content).map_err(|e| DetectError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.workers = config.workers.max(1);
        Ok(config)
    }

    /// Load `detectbatch.toml` from the working directory when it exists,
    /// falling back to defaults otherwise.
    pub fn discover() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_FILE);
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
