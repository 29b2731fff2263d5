use image::{DynamicImage, GrayImage};
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;

pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Gaussian blur followed by Canny. A non-positive sigma skips the blur.
pub fn edge_map(gray: &GrayImage, sigma: f32, low_threshold: f32, high_threshold: f32) -> GrayImage {
    if sigma > 0.0 {
        canny(&gaussian_blur_f32(gray, sigma), low_threshold, high_threshold)
    } else {
        canny(gray, low_threshold, high_threshold)
    }
}
