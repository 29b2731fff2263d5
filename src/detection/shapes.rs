use image::GrayImage;

use super::ModelManifest;
use super::contours::Contour;
use crate::models::Detection;

/// Class id used for regions darker than the brightness threshold
pub const SHAPE_CLASS: usize = 0;
/// Class id used for regions at or above the brightness threshold
pub const BRIGHT_SHAPE_CLASS: usize = 1;

/// Keep roughly round contours of plausible size
pub fn is_candidate(contour: &Contour, manifest: &ModelManifest) -> bool {
    let radius = contour.radius();
    let aspect = contour.aspect_ratio();
    let circularity = contour.circularity();

    radius >= manifest.min_radius
        && radius <= manifest.max_radius
        && (0.7..=1.4).contains(&aspect)
        && circularity > 0.0
        && circularity <= manifest.circularity_threshold
}

/// 1.0 for a perfect circle, falling off as the outline gets less round
pub fn confidence(contour: &Contour) -> f32 {
    let circularity = contour.circularity();
    if circularity <= 0.0 {
        return 0.0;
    }
    (1.0 / circularity).clamp(0.0, 1.0)
}

/// Turn contours into detections, most confident first
pub fn classify(contours: &[Contour], gray: &GrayImage, manifest: &ModelManifest) -> Vec<Detection> {
    let mut detections: Vec<Detection> = contours
        .iter()
        .filter(|c| is_candidate(c, manifest))
        .filter_map(|c| {
            let confidence = confidence(c);
            if confidence < manifest.min_confidence {
                return None;
            }
            let class_id = if c.mean_brightness(gray) >= manifest.brightness_threshold {
                BRIGHT_SHAPE_CLASS
            } else {
                SHAPE_CLASS
            };
            Some(Detection::new(
                class_id,
                manifest.class_names[class_id].clone(),
                confidence,
                c.bbox,
            ))
        })
        .collect();

    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
}
