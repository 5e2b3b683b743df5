//! Box geometry shared by the matcher and the field extractor.
//!
//! Coordinates are image pixels with the origin at the top-left corner and
//! `y` growing downwards.

use serde::{Deserialize, Serialize};

/// Four corner points in order: top-left, top-right, bottom-right, bottom-left.
///
/// Serializes as `[[x, y], [x, y], [x, y], [x, y]]`, the layout most OCR
/// engines emit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quad(pub [(f32, f32); 4]);

impl Quad {
    /// Axis-aligned quad spanning `(x1, y1)`–`(x2, y2)`.
    pub fn from_rect(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self([(x1, y1), (x2, y1), (x2, y2), (x1, y2)])
    }

    pub fn top_left(&self) -> (f32, f32) {
        self.0[0]
    }

    pub fn top_right(&self) -> (f32, f32) {
        self.0[1]
    }

    pub fn bottom_right(&self) -> (f32, f32) {
        self.0[2]
    }

    /// Top edge, taken from the top-left corner.
    pub fn top(&self) -> f32 {
        self.0[0].1
    }

    /// Bottom edge, taken from the bottom-right corner.
    pub fn bottom(&self) -> f32 {
        self.0[2].1
    }

    /// Left edge, taken from the top-left corner.
    pub fn left(&self) -> f32 {
        self.0[0].0
    }

    /// Vertical centre: midpoint of the top-left and bottom-right corners.
    pub fn center_y(&self) -> f32 {
        (self.0[0].1 + self.0[2].1) / 2.0
    }

    /// Horizontal centre of the top edge.
    pub fn center_x(&self) -> f32 {
        (self.0[0].0 + self.0[1].0) / 2.0
    }

    /// Smallest axis-aligned quad containing every corner of every input.
    ///
    /// Returns `None` for an empty iterator.
    pub fn bounding<'a>(quads: impl IntoIterator<Item = &'a Quad>) -> Option<Quad> {
        let mut extent: Option<(f32, f32, f32, f32)> = None;
        for quad in quads {
            for &(x, y) in &quad.0 {
                extent = Some(match extent {
                    None => (x, y, x, y),
                    Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
                });
            }
        }
        extent.map(|(x1, y1, x2, y2)| Quad::from_rect(x1, y1, x2, y2))
    }
}

/// Distance from the bottom of `upper` down to the top of `lower`.
///
/// Negative when `lower` starts above the bottom edge of `upper`.
pub fn vertical_gap(upper: &Quad, lower: &Quad) -> f32 {
    lower.top() - upper.bottom()
}

/// Absolute distance between the horizontal centres of two quads.
pub fn horizontal_offset(a: &Quad, b: &Quad) -> f32 {
    (a.center_x() - b.center_x()).abs()
}

/// Face bounding box reported by a face locator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Integer pixel rectangle, already clipped to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Grow the box by `margin` times its own width/height on every side,
    /// truncate to whole pixels and clip to a `image_width × image_height`
    /// image.
    ///
    /// Returns `None` when nothing of the box remains inside the image.
    pub fn expand(&self, margin: f32, image_width: u32, image_height: u32) -> Option<PixelRect> {
        let mx = self.width() * margin;
        let my = self.height() * margin;

        // `as i64` truncates toward zero before clipping.
        let x1 = ((self.x1 - mx) as i64).max(0);
        let y1 = ((self.y1 - my) as i64).max(0);
        let x2 = ((self.x2 + mx) as i64).min(image_width as i64);
        let y2 = ((self.y2 + my) as i64).min(image_height as i64);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(PixelRect {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_centers() {
        let q = Quad::from_rect(10.0, 20.0, 50.0, 40.0);
        assert_eq!(q.center_y(), 30.0);
        assert_eq!(q.center_x(), 30.0);
        assert_eq!(q.top(), 20.0);
        assert_eq!(q.bottom(), 40.0);
    }

    #[test]
    fn test_bounding_covers_all_corners() {
        let a = Quad::from_rect(10.0, 10.0, 20.0, 20.0);
        // Slightly rotated quad: bottom-left corner pokes out further left.
        let b = Quad([(30.0, 8.0), (60.0, 9.0), (61.0, 25.0), (5.0, 24.0)]);
        let bound = Quad::bounding([&a, &b]).unwrap();
        assert_eq!(bound, Quad::from_rect(5.0, 8.0, 61.0, 25.0));
    }

    #[test]
    fn test_bounding_empty() {
        assert!(Quad::bounding(std::iter::empty()).is_none());
    }

    #[test]
    fn test_vertical_gap_and_offset() {
        let anchor = Quad::from_rect(100.0, 100.0, 160.0, 120.0);
        let value = Quad::from_rect(110.0, 150.0, 190.0, 170.0);
        assert_eq!(vertical_gap(&anchor, &value), 30.0);
        assert_eq!(horizontal_offset(&anchor, &value), 20.0);
    }

    #[test]
    fn test_face_expand_clips_to_image() {
        let face = FaceBox { x1: 10.0, y1: 20.0, x2: 110.0, y2: 140.0 };
        let rect = face.expand(0.5, 200, 150).unwrap();
        // 100×120 box grows by 50/60: x 10-50 → 0, y 20-60 → 0, x2 160, y2 200 → 150.
        assert_eq!(rect, PixelRect { x: 0, y: 0, width: 160, height: 150 });
    }

    #[test]
    fn test_face_expand_zero_margin() {
        let face = FaceBox { x1: 10.7, y1: 20.2, x2: 50.9, y2: 60.5 };
        let rect = face.expand(0.0, 100, 100).unwrap();
        assert_eq!(rect, PixelRect { x: 10, y: 20, width: 40, height: 40 });
    }

    #[test]
    fn test_face_expand_outside_image() {
        let face = FaceBox { x1: 300.0, y1: 300.0, x2: 320.0, y2: 320.0 };
        assert!(face.expand(0.1, 100, 100).is_none());
    }
}
