//! Minimal PNG charts for run statistics, drawn with `imageproc`.

use std::path::Path;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::annotate::class_color;
use crate::error::{DetectError, Result};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const MARGIN: u32 = 40;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);
const HISTOGRAM_FILL: Rgb<u8> = Rgb([33, 150, 243]);

/// Count `values` into `bins` equal-width buckets over [0, 1].
/// Values outside the range land in the first or last bucket.
pub fn histogram(values: &[f32], bins: usize) -> Vec<usize> {
    let bins = bins.max(1);
    let mut counts = vec![0; bins];
    for value in values {
        let idx = (value.clamp(0.0, 1.0) * bins as f32) as usize;
        counts[idx.min(bins - 1)] += 1;
    }
    counts
}

/// Histogram of confidence values over [0, 1]
pub fn render_histogram(values: &[f32], bins: usize, path: &Path) -> Result<()> {
    let counts = histogram(values, bins);
    let bars: Vec<(usize, Rgb<u8>)> = counts.into_iter().map(|c| (c, HISTOGRAM_FILL)).collect();
    save(draw_bars(&bars), path)
}

/// One bar per `(label, count)` pair, coloured per class
pub fn render_bar_chart(entries: &[(&str, usize)], path: &Path) -> Result<()> {
    let bars: Vec<(usize, Rgb<u8>)> = entries
        .iter()
        .enumerate()
        .map(|(i, (_, count))| (*count, class_color(i)))
        .collect();
    save(draw_bars(&bars), path)
}

fn draw_bars(bars: &[(usize, Rgb<u8>)]) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
    let plot_w = WIDTH - 2 * MARGIN;
    let plot_h = HEIGHT - 2 * MARGIN;
    let baseline = (HEIGHT - MARGIN) as f32;

    draw_line_segment_mut(&mut canvas, (MARGIN as f32, MARGIN as f32), (MARGIN as f32, baseline), AXIS);
    draw_line_segment_mut(&mut canvas, (MARGIN as f32, baseline), ((WIDTH - MARGIN) as f32, baseline), AXIS);

    let max = bars.iter().map(|(count, _)| *count).max().unwrap_or(0);
    if bars.is_empty() || max == 0 {
        return canvas;
    }

    let slot = plot_w / bars.len() as u32;
    let gap = (slot / 8).max(1);
    let bar_w = slot.saturating_sub(2 * gap).max(1);

    for (i, (count, color)) in bars.iter().enumerate() {
        if *count == 0 {
            continue;
        }
        let bar_h = ((*count as f32 / max as f32) * plot_h as f32).round().max(1.0) as u32;
        let x = MARGIN + i as u32 * slot + gap;
        let y = HEIGHT - MARGIN - bar_h;
        let rect = Rect::at(x as i32, y as i32).of_size(bar_w, bar_h);
        draw_filled_rect_mut(&mut canvas, rect, *color);
        draw_hollow_rect_mut(&mut canvas, rect, AXIS);
    }

    canvas
}

fn save(canvas: RgbImage, path: &Path) -> Result<()> {
    let render_err = |reason: String| DetectError::PlotRender {
        path: path.to_path_buf(),
        reason,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| render_err(e.to_string()))?;
    }
    canvas
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| render_err(e.to_string()))
}
