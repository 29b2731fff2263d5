use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use detectbatch::progress::Progress;
use detectbatch::{
    BoundingBox, Detection, DetectError, DetectionCapability, DetectionResult, IndexedResult,
    ProgressReporter, RunConfig, RunEvent,
};
use image::{ImageBuffer, Luma, Rgb};
use imageproc::drawing::draw_filled_circle_mut;

/// Side length of the images written by [`write_image`]
pub const TEST_IMAGE_SIZE: u32 = 32;

/// Writes a small solid-colour image; the format follows the extension.
pub fn write_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create image directory");
    }
    let img = ImageBuffer::from_fn(TEST_IMAGE_SIZE, TEST_IMAGE_SIZE, |x, y| {
        Rgb([(x * 8) as u8, (y * 8) as u8, 128u8])
    });
    img.save(&path).expect("Failed to save test image");
    path
}

/// Writes a file with an image extension that no decoder accepts.
pub fn write_garbage(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"definitely not an image").expect("Failed to write garbage file");
    path
}

/// Black 100x100 PNG with a filled white disc of radius 20 in the middle.
pub fn write_disc_image(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let mut img = ImageBuffer::from_pixel(100, 100, Luma([0u8]));
    draw_filled_circle_mut(&mut img, (50, 50), 20, Luma([255u8]));
    img.save(&path).expect("Failed to save disc image");
    path
}

/// Detection with a box in the middle of a [`TEST_IMAGE_SIZE`] image
pub fn det(class_id: usize, class_name: &str, confidence: f32) -> Detection {
    Detection::new(class_id, class_name, confidence, BoundingBox::new(8, 8, 16, 16))
}

enum Script {
    Detections(Vec<Detection>),
    Fail(String),
}

/// Detection capability that answers from a table keyed by file name.
/// Unknown files succeed with no detections.
#[derive(Default)]
pub struct ScriptedDetector {
    scripts: HashMap<String, Script>,
    reverse: bool,
    fail_load: bool,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, file_name: &str, detections: Vec<Detection>) -> Self {
        self.scripts.insert(file_name.to_string(), Script::Detections(detections));
        self
    }

    pub fn failing(mut self, file_name: &str, reason: &str) -> Self {
        self.scripts.insert(file_name.to_string(), Script::Fail(reason.to_string()));
        self
    }

    /// Deliver results last-to-first, like a parallel backend might
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }
}

impl DetectionCapability for ScriptedDetector {
    type Handle = String;

    fn load(&self, model_identifier: &str) -> Result<String, DetectError> {
        if self.fail_load {
            return Err(DetectError::ModelLoad {
                model: model_identifier.to_string(),
                reason: "weights are corrupt".to_string(),
            });
        }
        Ok(model_identifier.to_string())
    }

    fn infer<'a>(
        &'a self,
        _handle: &'a String,
        assets: &'a [PathBuf],
    ) -> Box<dyn Iterator<Item = IndexedResult> + Send + 'a> {
        let mut items: Vec<IndexedResult> = assets
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let size = (TEST_IMAGE_SIZE, TEST_IMAGE_SIZE);
                let result = match self.scripts.get(&name) {
                    Some(Script::Detections(detections)) => {
                        DetectionResult::success(path, size, detections.clone())
                    }
                    Some(Script::Fail(reason)) => DetectionResult::failed(path, reason.clone()),
                    None => DetectionResult::success(path, size, Vec::new()),
                };
                IndexedResult { index, result }
            })
            .collect();
        if self.reverse {
            items.reverse();
        }
        Box::new(items.into_iter())
    }
}

/// Keeps every event it receives
#[derive(Clone, Default)]
pub struct RecordingReporter {
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().expect("reporter lock poisoned").clone()
    }

    pub fn progress(&self) -> Vec<Progress> {
        self.events()
            .iter()
            .filter_map(|e| e.as_progress().cloned())
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: RunEvent) {
        self.events.lock().expect("reporter lock poisoned").push(event);
    }
}

/// Config with plots and auto-open off, everything else at defaults
pub fn quiet_config() -> RunConfig {
    RunConfig::builder("test-model.toml")
        .with_auto_open_output(false)
        .build()
        .expect("valid config")
}
