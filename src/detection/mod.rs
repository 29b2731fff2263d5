//! Built-in classical shape detector.
//!
//! Models are TOML manifests in the model store. Each image goes through
//! grayscale, blur, Canny edges and connected-component contours; round
//! contours of plausible size become detections, split into a dark and a
//! bright class by their mean brightness.

pub mod contours;
pub mod preprocessing;
pub mod shapes;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use image::DynamicImage;
use serde::Deserialize;
use tracing::debug;

use crate::capability::{DetectionCapability, MODEL_EXTENSION, ModelStore};
use crate::error::{DetectError, Result};
use crate::models::{Detection, DetectionResult, IndexedResult};

/// Parameters of one contour model
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelManifest {
    /// Names for the dark and the bright class, in that order
    pub class_names: Vec<String>,
    pub blur_sigma: f32,
    pub low_threshold: f32,
    pub high_threshold: f32,
    pub min_area: u32,
    pub min_radius: f32,
    pub max_radius: f32,
    pub circularity_threshold: f32,
    pub brightness_threshold: f32,
    pub min_confidence: f32,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            class_names: vec!["shape".to_string(), "bright_shape".to_string()],
            blur_sigma: 1.5,
            low_threshold: 50.0,
            high_threshold: 100.0,
            min_area: 10,
            min_radius: 10.0,
            max_radius: 200.0,
            circularity_threshold: 2.0,
            brightness_threshold: 200.0,
            min_confidence: 0.25,
        }
    }
}

impl ModelManifest {
    pub fn parse(source: &str) -> std::result::Result<Self, String> {
        let manifest: ModelManifest = toml::from_str(source).map_err(|e| e.to_string())?;
        if manifest.class_names.len() < 2 {
            return Err("class_names needs a name for the dark and the bright class".to_string());
        }
        if let Some(bad) = manifest.class_names.iter().find(|name| !is_plain_name(name)) {
            return Err(format!("class name {bad:?} cannot be used as a directory name"));
        }
        if manifest.low_threshold > manifest.high_threshold {
            return Err("low_threshold is above high_threshold".to_string());
        }
        Ok(manifest)
    }
}

/// Class names double as crop directory names
fn is_plain_name(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Loaded model, threaded through every `infer` call
#[derive(Debug, Clone)]
pub struct ContourModel {
    pub identifier: String,
    pub manifest: Arc<ModelManifest>,
}

/// Run the shape detector on an already decoded image
pub fn detect(manifest: &ModelManifest, img: &DynamicImage) -> Vec<Detection> {
    let gray = preprocessing::to_grayscale(img);
    let edges = preprocessing::edge_map(
        &gray,
        manifest.blur_sigma,
        manifest.low_threshold,
        manifest.high_threshold,
    );
    let found = contours::find_contours(&edges, manifest.min_area);
    shapes::classify(&found, &gray, manifest)
}

/// Decode and detect one file; decode errors become a `Failed` result
pub fn detect_image(manifest: &ModelManifest, path: &Path) -> DetectionResult {
    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            let err = DetectError::AssetInference {
                path: path.to_path_buf(),
                reason: e.to_string(),
            };
            return DetectionResult::failed(path, err.to_string());
        }
    };
    let detections = detect(manifest, &img);
    DetectionResult::success(path, (img.width(), img.height()), detections)
}

/// [`DetectionCapability`] backed by [`ModelManifest`] files and a pool of
/// worker threads
#[derive(Debug, Clone)]
pub struct ContourDetector {
    store: ModelStore,
    workers: usize,
}

impl ContourDetector {
    pub fn new(store: ModelStore, workers: usize) -> Self {
        Self {
            store,
            workers: workers.max(1),
        }
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }
}

impl DetectionCapability for ContourDetector {
    type Handle = ContourModel;

    fn load(&self, model_identifier: &str) -> Result<ContourModel> {
        let load_err = |reason: String| DetectError::ModelLoad {
            model: model_identifier.to_string(),
            reason,
        };

        let path = self.store.resolve(model_identifier);
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION))
            .unwrap_or(false);
        if !supported {
            return Err(load_err(format!(
                "unsupported model format (expected a .{MODEL_EXTENSION} manifest)"
            )));
        }

        let source = std::fs::read_to_string(&path)
            .map_err(|e| load_err(format!("{}: {e}", path.display())))?;
        let manifest = ModelManifest::parse(&source).map_err(load_err)?;
        debug!("loaded model {} from {}", model_identifier, path.display());

        Ok(ContourModel {
            identifier: model_identifier.to_string(),
            manifest: Arc::new(manifest),
        })
    }

    fn infer<'a>(
        &'a self,
        handle: &'a ContourModel,
        assets: &'a [PathBuf],
    ) -> Box<dyn Iterator<Item = IndexedResult> + Send + 'a> {
        let queue: VecDeque<(usize, PathBuf)> = assets.iter().cloned().enumerate().collect();
        let queue = Arc::new(Mutex::new(queue));
        let (sender, receiver) = mpsc::channel();

        let workers = self.workers.min(assets.len()).max(1);
        debug!("running {} on {} assets with {} workers", handle.identifier, assets.len(), workers);

        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let manifest = Arc::clone(&handle.manifest);
            let sender = sender.clone();
            thread::spawn(move || {
                loop {
                    let next = match queue.lock() {
                        Ok(mut queue) => queue.pop_front(),
                        Err(_) => None,
                    };
                    let Some((index, path)) = next else {
                        break;
                    };
                    let result = detect_image(&manifest, &path);
                    if sender.send(IndexedResult { index, result }).is_err() {
                        break;
                    }
                }
            });
        }

        // The iterator ends once every worker has dropped its sender.
        drop(sender);
        Box::new(receiver.into_iter())
    }
}
