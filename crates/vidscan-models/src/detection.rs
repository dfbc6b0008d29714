//! Detection results produced by the detector for a single frame.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Model class id that marks an abnormal region.
pub const ABNORMAL_CLASS_ID: u32 = 1;

/// Normal/abnormal classification derived from the model class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionClass {
    Normal,
    Abnormal,
}

impl DetectionClass {
    /// Classify a raw model class id.
    pub fn from_class_id(class_id: u32) -> Self {
        if class_id == ABNORMAL_CLASS_ID {
            DetectionClass::Abnormal
        } else {
            DetectionClass::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionClass::Normal => "Normal",
            DetectionClass::Abnormal => "Abnormal",
        }
    }

    pub fn is_abnormal(&self) -> bool {
        matches!(self, DetectionClass::Abnormal)
    }
}

impl fmt::Display for DetectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Axis-aligned bounding box in integer pixel coordinates.
///
/// Always satisfies `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    /// Create a box from two corners, in any order.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1) as u32
    }

    /// Clamp the box to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as i32;
        let max_y = height.saturating_sub(1) as i32;
        Self::new(
            self.x1.clamp(0, max_x),
            self.y1.clamp(0, max_y),
            self.x2.clamp(0, max_x),
            self.y2.clamp(0, max_y),
        )
    }
}

/// One model-produced classification with its bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Raw model class id
    pub class_id: u32,
    /// Normal/abnormal classification (derived from `class_id`)
    pub class_name: DetectionClass,
    /// Detection confidence [0, 1]
    pub confidence: f32,
    /// Pixel bounding box
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            class_id,
            class_name: DetectionClass::from_class_id(class_id),
            confidence,
            bbox,
        }
    }

    pub fn is_abnormal(&self) -> bool {
        self.class_name.is_abnormal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_from_id() {
        assert_eq!(DetectionClass::from_class_id(0), DetectionClass::Normal);
        assert_eq!(DetectionClass::from_class_id(1), DetectionClass::Abnormal);
        assert_eq!(DetectionClass::from_class_id(7), DetectionClass::Normal);
    }

    #[test]
    fn test_bbox_normalizes_corners() {
        let bbox = BoundingBox::new(50, 80, 10, 20);
        assert_eq!(bbox, BoundingBox { x1: 10, y1: 20, x2: 50, y2: 80 });
        assert_eq!(bbox.width(), 40);
        assert_eq!(bbox.height(), 60);
    }

    #[test]
    fn test_bbox_clamp() {
        let bbox = BoundingBox::new(-5, -5, 700, 500).clamp_to(640, 480);
        assert_eq!(bbox, BoundingBox::new(0, 0, 639, 479));
    }

    #[test]
    fn test_detection_confidence_clamped() {
        let bbox = BoundingBox::new(0, 0, 1, 1);
        assert_eq!(Detection::new(1, 1.7, bbox).confidence, 1.0);
        assert_eq!(Detection::new(1, -0.2, bbox).confidence, 0.0);
        assert_eq!(Detection::new(1, f32::NAN, bbox).confidence, 0.0);
        assert!(Detection::new(1, 0.5, bbox).is_abnormal());
    }

    #[test]
    fn test_class_serializes_as_name() {
        let json = serde_json::to_string(&DetectionClass::Abnormal).unwrap();
        assert_eq!(json, "\"Abnormal\"");
    }
}
