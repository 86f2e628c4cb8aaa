use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::result::Detection;

/// Confidence and NMS settings shared by every backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectParams {
    /// Candidates below this confidence are dropped before NMS.
    pub confidence_threshold: f32,
    /// Suppress overlapping boxes regardless of class.
    pub agnostic_nms: bool,
    /// Overlap above which the lower-scoring box is suppressed.
    pub nms_iou_threshold: f32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            agnostic_nms: true,
            nms_iou_threshold: 0.45,
        }
    }
}

impl DetectParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "detector confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if !(self.nms_iou_threshold > 0.0 && self.nms_iou_threshold <= 1.0) {
            return Err(anyhow!(
                "detector nms_iou_threshold must be within (0, 1], got {}",
                self.nms_iou_threshold
            ));
        }
        Ok(())
    }
}

/// Apply the confidence threshold, then greedy non-max suppression.
///
/// Output is ordered by descending confidence.
pub fn postprocess(raw: Vec<Detection>, params: &DetectParams) -> Vec<Detection> {
    let mut candidates: Vec<Detection> = raw
        .into_iter()
        .filter(|d| d.is_well_formed() && d.confidence >= params.confidence_threshold)
        .collect();

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            (params.agnostic_nms || k.class_id == candidate.class_id)
                && k.bbox.iou(&candidate.bbox) > params.nms_iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
