use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::models::Detection;

const PALETTE: [Rgb<u8>; 10] = [
    Rgb([255, 56, 56]),
    Rgb([255, 157, 151]),
    Rgb([255, 112, 31]),
    Rgb([255, 178, 29]),
    Rgb([207, 210, 49]),
    Rgb([72, 249, 10]),
    Rgb([26, 147, 52]),
    Rgb([0, 212, 187]),
    Rgb([44, 153, 168]),
    Rgb([0, 194, 255]),
];

const TAB_HEIGHT: u32 = 8;
const CONFIDENCE_FILL: Rgb<u8> = Rgb([255, 255, 255]);

pub fn class_color(class_id: usize) -> Rgb<u8> {
    PALETTE[class_id % PALETTE.len()]
}

/// How detections are drawn onto the output image
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotationStyle {
    pub hide_labels: bool,
    pub hide_confidence: bool,
    pub line_width: u32,
}

impl AnnotationStyle {
    pub fn new(hide_labels: bool, hide_confidence: bool) -> Self {
        Self {
            hide_labels,
            hide_confidence,
            line_width: 2,
        }
    }
}

/// Draw every detection onto a copy of `image`.
///
/// Each box gets a class-coloured outline. Unless labels are hidden, a tab in
/// the class colour sits on top of the box; unless confidence is hidden too,
/// a white bar inside the tab shows the confidence as a fraction of the box
/// width.
pub fn annotate(image: &DynamicImage, detections: &[Detection], style: AnnotationStyle) -> DynamicImage {
    let mut canvas: RgbImage = image.to_rgb8();
    let (width, height) = canvas.dimensions();

    for detection in detections {
        let Some(bbox) = detection.bbox.clamped(width, height) else {
            continue;
        };
        let color = class_color(detection.class_id);

        for inset in 0..style.line_width.max(1) {
            if bbox.width <= 2 * inset || bbox.height <= 2 * inset {
                break;
            }
            let rect = Rect::at((bbox.x + inset) as i32, (bbox.y + inset) as i32)
                .of_size(bbox.width - 2 * inset, bbox.height - 2 * inset);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        if style.hide_labels {
            continue;
        }

        let tab_y = bbox.y.saturating_sub(TAB_HEIGHT);
        let tab_h = (bbox.y - tab_y).max(1).min(height - tab_y);
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(bbox.x as i32, tab_y as i32).of_size(bbox.width, tab_h),
            color,
        );

        if !style.hide_confidence && tab_h > 2 {
            let fill_w = ((bbox.width as f32 - 2.0) * detection.confidence).round() as u32;
            if fill_w > 0 {
                draw_filled_rect_mut(
                    &mut canvas,
                    Rect::at(bbox.x as i32 + 1, tab_y as i32 + 1).of_size(fill_w, tab_h - 2),
                    CONFIDENCE_FILL,
                );
            }
        }
    }

    DynamicImage::ImageRgb8(canvas)
}
