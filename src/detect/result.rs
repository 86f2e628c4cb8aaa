use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// Detector class label (COCO numbering).
pub type ClassId = u32;

/// COCO class id for "person".
pub const PERSON_CLASS_ID: ClassId = 0;

/// Axis-aligned box in frame-pixel space (`x1,y1` top-left, `x2,y2` bottom-right).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from center, width and height.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> Point {
        Point::new(
            (f64::from(self.x1) + f64::from(self.x2)) / 2.0,
            (f64::from(self.y1) + f64::from(self.y2)) / 2.0,
        )
    }

    pub fn bottom_center(&self) -> Point {
        Point::new(
            (f64::from(self.x1) + f64::from(self.x2)) / 2.0,
            f64::from(self.y2),
        )
    }

    /// Finite coordinates and strictly positive extent.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    /// Intersection over union; 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &Self) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// One detector observation for a single frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: ClassId,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class_id: ClassId, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
        }
    }

    /// Shorthand for a person detection.
    pub fn person(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self::new(BoundingBox::new(x1, y1, x2, y2), PERSON_CLASS_ID, confidence)
    }

    /// Confidence is finite and within `[0, 1]`.
    pub fn has_valid_confidence(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }

    /// Usable by the tracker: sane confidence and a non-degenerate box.
    pub fn is_well_formed(&self) -> bool {
        self.has_valid_confidence() && self.bbox.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_identical_and_disjoint() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        let iou = a.iou(&b);
        assert!((iou - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn reference_points() {
        let b = BoundingBox::new(100.0, 200.0, 300.0, 600.0);
        assert_eq!(b.center(), Point::new(200.0, 400.0));
        assert_eq!(b.bottom_center(), Point::new(200.0, 600.0));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        assert!(!Detection::person(0.0, 0.0, 1.0, 1.0, 1.5).has_valid_confidence());
        assert!(!Detection::person(0.0, 0.0, 1.0, 1.0, -0.1).has_valid_confidence());
        assert!(!Detection::person(0.0, 0.0, 1.0, 1.0, f32::NAN).has_valid_confidence());
        assert!(Detection::person(0.0, 0.0, 1.0, 1.0, 0.9).is_well_formed());
        assert!(!Detection::person(5.0, 0.0, 1.0, 1.0, 0.9).is_well_formed());
    }
}
