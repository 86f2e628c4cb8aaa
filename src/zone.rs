//! Zone membership for tracked objects.

use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::ZoneSettings;
use crate::detect::{BoundingBox, ClassId};
use crate::geometry::{Point, Polygon};
use crate::track::{TrackState, TrackedObject, TrackerId};

/// Which point of a box decides membership.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Where the object stands on the floor.
    #[default]
    BottomCenter,
    Center,
}

impl Anchor {
    pub fn point(self, bbox: &BoundingBox) -> Point {
        match self {
            Self::BottomCenter => bbox.bottom_center(),
            Self::Center => bbox.center(),
        }
    }
}

impl std::str::FromStr for Anchor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bottom_center" | "bottom-center" | "bottom" => Ok(Self::BottomCenter),
            "center" | "centre" => Ok(Self::Center),
            other => Err(anyhow!(
                "unknown anchor '{}': expected 'bottom_center' or 'center'",
                other
            )),
        }
    }
}

/// Polygon in frame-pixel space plus the class it counts. Fixed for a run.
#[derive(Clone, Debug)]
pub struct Zone {
    polygon: Polygon,
    target_class: ClassId,
    anchor: Anchor,
}

impl Zone {
    pub fn new(polygon: Polygon, target_class: ClassId, anchor: Anchor) -> Self {
        Self {
            polygon,
            target_class,
            anchor,
        }
    }

    /// Build from settings, scaling normalized vertices by the frame size.
    pub fn from_settings(settings: &ZoneSettings, width: u32, height: u32) -> Result<Self> {
        let raw = Polygon::from_pairs(&settings.polygon).context("invalid zone polygon")?;
        let polygon = if settings.normalized {
            if let Some(v) = raw
                .vertices()
                .iter()
                .find(|v| !(0.0..=1.0).contains(&v.x) || !(0.0..=1.0).contains(&v.y))
            {
                return Err(anyhow!(
                    "normalized zone vertex ({}, {}) is outside [0, 1]",
                    v.x,
                    v.y
                ));
            }
            let (w, h) = (f64::from(width), f64::from(height));
            raw.map(|p| Point::new(p.x * w, p.y * h))
                .context("zone polygon degenerate after scaling")?
        } else {
            raw
        };
        Ok(Self::new(polygon, settings.target_class, settings.anchor))
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    pub fn target_class(&self) -> ClassId {
        self.target_class
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    fn counts(&self, obj: &TrackedObject) -> bool {
        obj.class_id == self.target_class
            && obj.state != TrackState::Lost
            && self.polygon.contains(self.anchor.point(&obj.bbox))
    }

    /// IDs of target-class, currently observed objects whose anchor is in the zone.
    pub fn evaluate(&self, objects: &[TrackedObject]) -> BTreeSet<TrackerId> {
        objects
            .iter()
            .filter(|obj| self.counts(obj))
            .map(|obj| obj.id)
            .collect()
    }

    /// Per-object inside/outside flags, in snapshot order.
    pub fn membership(&self, objects: &[TrackedObject]) -> Vec<(TrackerId, bool)> {
        objects
            .iter()
            .map(|obj| (obj.id, self.counts(obj)))
            .collect()
    }
}
