mod font;
mod geom;
mod merge;
mod parse;
mod render;
mod tesseract;

use serde::{Deserialize, Serialize};

pub use font::{FontMetrics, load_font_metrics};
pub use merge::{DEFAULT_TOLERANCE, cap_boxes, merge_boxes};
pub use render::{OverlayRenderer, crop_regions, paste_background};
pub(crate) use render::text_fill;
pub use tesseract::{TesseractDetector, TesseractReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// A detected text region. Corners are stored as
/// `[top_left, top_right, bottom_right, bottom_left]`; only the two diagonal
/// corners carry information, the other two are derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub corners: [Point; 4],
    pub confidence: f32,
}

impl BoundingBox {
    pub fn from_rect(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> Self {
        Self {
            corners: [
                Point { x: x1, y: y1 },
                Point { x: x2, y: y1 },
                Point { x: x2, y: y2 },
                Point { x: x1, y: y2 },
            ],
            confidence,
        }
    }

    pub fn top_left(&self) -> Point {
        self.corners[0]
    }

    pub fn bottom_right(&self) -> Point {
        self.corners[2]
    }

    pub fn width(&self) -> i64 {
        self.bottom_right().x as i64 - self.top_left().x as i64
    }

    pub fn height(&self) -> i64 {
        self.bottom_right().y as i64 - self.top_left().y as i64
    }

    /// `(x1, y1, x2, y2)` of the diagonal corners.
    pub fn rect(&self) -> (i32, i32, i32, i32) {
        let tl = self.top_left();
        let br = self.bottom_right();
        (tl.x, tl.y, br.x, br.y)
    }
}
