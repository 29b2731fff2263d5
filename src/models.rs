use std::path::{Path, PathBuf};

use serde::Serialize;

/// Bounding box in pixel coordinates of the source image
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Clamp the box so it lies entirely inside a `width` x `height` image.
    /// Returns `None` when nothing of the box remains.
    pub fn clamped(&self, width: u32, height: u32) -> Option<BoundingBox> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(BoundingBox::new(self.x, self.y, w, h))
    }

    /// Center x, center y, width, height, each divided by the image size.
    pub fn normalized(&self, image_width: u32, image_height: u32) -> (f64, f64, f64, f64) {
        let iw = image_width.max(1) as f64;
        let ih = image_height.max(1) as f64;
        let cx = (self.x as f64 + self.width as f64 / 2.0) / iw;
        let cy = (self.y as f64 + self.height as f64 / 2.0) / ih;
        (cx, cy, self.width as f64 / iw, self.height as f64 / ih)
    }
}

/// One predicted object instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: usize, class_name: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            class_name: class_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            bbox,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AssetStatus {
    Success,
    Failed(String),
}

impl AssetStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, AssetStatus::Success)
    }
}

/// Outcome of running detection on a single asset
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub asset_path: PathBuf,
    /// Width and height of the decoded image, when decoding got that far
    pub image_size: Option<(u32, u32)>,
    pub detections: Vec<Detection>,
    pub status: AssetStatus,
}

impl DetectionResult {
    pub fn success(asset_path: impl Into<PathBuf>, image_size: (u32, u32), detections: Vec<Detection>) -> Self {
        Self {
            asset_path: asset_path.into(),
            image_size: Some(image_size),
            detections,
            status: AssetStatus::Success,
        }
    }

    pub fn failed(asset_path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            asset_path: asset_path.into(),
            image_size: None,
            detections: Vec::new(),
            status: AssetStatus::Failed(reason.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.asset_path
    }
}

/// A result tagged with the position of its asset in the request
#[derive(Debug, Clone)]
pub struct IndexedResult {
    pub index: usize,
    pub result: DetectionResult,
}
