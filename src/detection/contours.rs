use std::f32::consts::PI;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::models::BoundingBox;

/// One connected run of edge pixels
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub label: u32,
    pub bbox: BoundingBox,
    pub pixel_count: u32,
}

impl Contour {
    /// Half the mean side length of the bounding box
    pub fn radius(&self) -> f32 {
        (self.bbox.width + self.bbox.height) as f32 / 4.0
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.bbox.width as f32 / self.bbox.height.max(1) as f32
    }

    /// Isoperimetric ratio of the bounding box, 4/π for a square and larger
    /// the more elongated the box is
    pub fn circularity(&self) -> f32 {
        let w = self.bbox.width as f32;
        let h = self.bbox.height as f32;
        if w == 0.0 || h == 0.0 {
            return 0.0;
        }
        let perimeter = 2.0 * (w + h);
        perimeter * perimeter / (4.0 * PI * w * h)
    }

    /// Mean luma inside the circle inscribed in the bounding box
    pub fn mean_brightness(&self, gray: &GrayImage) -> f32 {
        let Some(area) = self.bbox.clamped(gray.width(), gray.height()) else {
            return 0.0;
        };
        let cx = self.bbox.x as f32 + (self.bbox.width - 1) as f32 / 2.0;
        let cy = self.bbox.y as f32 + (self.bbox.height - 1) as f32 / 2.0;
        let r2 = self.radius() * self.radius();

        let (sum, count) = (area.y..area.y + area.height)
            .flat_map(|y| (area.x..area.x + area.width).map(move |x| (x, y)))
            .filter(|&(x, y)| {
                let (dx, dy) = (x as f32 - cx, y as f32 - cy);
                dx * dx + dy * dy <= r2
            })
            .fold((0u64, 0u64), |(sum, count), (x, y)| {
                (sum + u64::from(gray.get_pixel(x, y)[0]), count + 1)
            });

        if count == 0 { 0.0 } else { sum as f32 / count as f32 }
    }
}

/// Running extent of one label while the image is scanned
struct Extent {
    min: (u32, u32),
    max: (u32, u32),
    pixels: u32,
}

impl Extent {
    fn at(x: u32, y: u32) -> Self {
        Self {
            min: (x, y),
            max: (x, y),
            pixels: 1,
        }
    }

    fn include(&mut self, x: u32, y: u32) {
        self.min = (self.min.0.min(x), self.min.1.min(y));
        self.max = (self.max.0.max(x), self.max.1.max(y));
        self.pixels += 1;
    }

    fn into_contour(self, label: u32) -> Contour {
        let bbox = BoundingBox::new(
            self.min.0,
            self.min.1,
            self.max.0 - self.min.0 + 1,
            self.max.1 - self.min.1 + 1,
        );
        Contour {
            label,
            bbox,
            pixel_count: self.pixels,
        }
    }
}

/// Label 8-connected edge pixels and return every region with at least
/// `min_area` pixels, in label order
pub fn find_contours(edges: &GrayImage, min_area: u32) -> Vec<Contour> {
    let labels = connected_components(edges, Connectivity::Eight, Luma([0u8]));

    // Slot `label - 1` holds the extent of each region
    let mut extents: Vec<Option<Extent>> = Vec::new();
    for (x, y, pixel) in labels.enumerate_pixels() {
        let label = pixel[0] as usize;
        if label == 0 {
            continue;
        }
        if extents.len() < label {
            extents.resize_with(label, || None);
        }
        match &mut extents[label - 1] {
            Some(extent) => extent.include(x, y),
            empty => *empty = Some(Extent::at(x, y)),
        }
    }

    extents
        .into_iter()
        .zip(1u32..)
        .filter_map(|(extent, label)| extent.map(|e| (e, label)))
        .filter(|(extent, _)| extent.pixels >= min_area)
        .map(|(extent, label)| extent.into_contour(label))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contour(width: u32, height: u32) -> Contour {
        Contour {
            label: 1,
            bbox: BoundingBox::new(0, 0, width, height),
            pixel_count: width * height,
        }
    }

    #[test]
    fn square_box_is_roundest() {
        let square = contour(20, 20);
        let wide = contour(40, 10);
        assert!((square.circularity() - 4.0 / PI).abs() < 1e-4);
        assert!(wide.circularity() > square.circularity());
        assert_eq!(square.aspect_ratio(), 1.0);
        assert_eq!(square.radius(), 10.0);
    }

    #[test]
    fn finds_separate_regions_in_label_order() {
        let mut edges = GrayImage::new(20, 10);
        for x in 1..5 {
            edges.put_pixel(x, 2, Luma([255]));
        }
        for y in 3..9 {
            edges.put_pixel(15, y, Luma([255]));
        }
        edges.put_pixel(10, 0, Luma([255]));

        let found = find_contours(&edges, 2);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].bbox, BoundingBox::new(1, 2, 4, 1));
        assert_eq!(found[0].pixel_count, 4);
        assert_eq!(found[1].bbox, BoundingBox::new(15, 3, 1, 6));
        assert!(found[0].label < found[1].label);
    }

    #[test]
    fn mean_brightness_samples_inscribed_circle() {
        let mut gray = GrayImage::new(10, 10);
        for (x, y, pixel) in gray.enumerate_pixels_mut() {
            let (dx, dy) = (x as f32 - 4.5, y as f32 - 4.5);
            if dx * dx + dy * dy <= 16.0 {
                *pixel = Luma([250]);
            }
        }
        let bright = Contour {
            label: 1,
            bbox: BoundingBox::new(1, 1, 8, 8),
            pixel_count: 28,
        };
        assert!(bright.mean_brightness(&gray) > 200.0);
    }
}
