//! Cross-frame identity tracking.
//!
//! ByteTrack-style association: high-confidence detections are matched
//! against every live track first, then low-confidence detections get a second
//! chance against tracks that were still being observed. Matching is greedy on
//! IoU between the predicted track box and the detection box.
//!
//! New tracks start tentative and only receive a public [`TrackerId`] once
//! they have been matched on `minimum_consecutive_frames` consecutive frames.
//! Snapshots only ever contain confirmed tracks, so every emitted object has an
//! ID.

mod filter;

use std::fmt;
use std::num::NonZeroU64;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::{BoundingBox, ClassId, Detection};

pub use filter::BoxFilter;

const FILTER_PROCESS_NOISE: f32 = 1.0;
const FILTER_MEASUREMENT_NOISE: f32 = 10.0;

/// Identity assigned to a confirmed track. Never reused within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrackerId(NonZeroU64);

impl TrackerId {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TrackState {
    /// Matched on the most recent frame.
    Tracked,
    /// Unmatched; the box is a prediction.
    Lost,
}

/// Snapshot of one confirmed track.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedObject {
    pub id: TrackerId,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub class_id: ClassId,
    /// Consecutive frames without a match.
    pub frames_lost: u32,
    /// Total frames matched.
    pub hits: u32,
    pub state: TrackState,
    pub last_seen_frame: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Minimum confidence for a detection to start a track or take part in
    /// the first matching pass.
    pub track_activation_threshold: f32,
    /// Frames a lost track is kept before it is retired.
    pub lost_track_buffer: u32,
    /// Maximum matching cost (`1 - IoU`) between a predicted track box and a
    /// detection. The default of 0.8 accepts pairs with IoU of 0.2 or more.
    pub minimum_matching_threshold: f32,
    /// Consecutive matched frames before a new track is confirmed.
    pub minimum_consecutive_frames: u32,
    /// Detections below this confidence are ignored entirely.
    pub low_confidence_floor: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_activation_threshold: 0.25,
            lost_track_buffer: 30,
            minimum_matching_threshold: 0.8,
            minimum_consecutive_frames: 1,
            low_confidence_floor: 0.1,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.track_activation_threshold) {
            return Err(anyhow!(
                "tracker track_activation_threshold must be within [0, 1], got {}",
                self.track_activation_threshold
            ));
        }
        if !(self.minimum_matching_threshold > 0.0 && self.minimum_matching_threshold <= 1.0) {
            return Err(anyhow!(
                "tracker minimum_matching_threshold must be within (0, 1], got {}",
                self.minimum_matching_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.low_confidence_floor)
            || self.low_confidence_floor > self.track_activation_threshold
        {
            return Err(anyhow!(
                "tracker low_confidence_floor must be within [0, track_activation_threshold], got {}",
                self.low_confidence_floor
            ));
        }
        if self.minimum_consecutive_frames == 0 {
            return Err(anyhow!("tracker minimum_consecutive_frames must be at least 1"));
        }
        Ok(())
    }
}

struct Track {
    /// `None` while tentative.
    id: Option<TrackerId>,
    filter: BoxFilter,
    predicted: BoundingBox,
    bbox: BoundingBox,
    confidence: f32,
    class_id: ClassId,
    frames_lost: u32,
    hits: u32,
    streak: u32,
    state: TrackState,
    last_seen_frame: u64,
}

impl Track {
    fn new(det: &Detection, frame_index: u64) -> Self {
        Self {
            id: None,
            filter: BoxFilter::new(&det.bbox, FILTER_PROCESS_NOISE, FILTER_MEASUREMENT_NOISE),
            predicted: det.bbox,
            bbox: det.bbox,
            confidence: det.confidence,
            class_id: det.class_id,
            frames_lost: 0,
            hits: 1,
            streak: 1,
            state: TrackState::Tracked,
            last_seen_frame: frame_index,
        }
    }

    fn refresh(&mut self, det: &Detection, frame_index: u64) {
        self.filter.update(&det.bbox);
        self.bbox = det.bbox;
        self.confidence = det.confidence;
        self.class_id = det.class_id;
        self.frames_lost = 0;
        self.hits += 1;
        self.streak += 1;
        self.state = TrackState::Tracked;
        self.last_seen_frame = frame_index;
    }

    fn mark_lost(&mut self) {
        self.bbox = self.predicted;
        self.frames_lost += 1;
        self.streak = 0;
        self.state = TrackState::Lost;
    }

    fn snapshot(&self) -> Option<TrackedObject> {
        Some(TrackedObject {
            id: self.id?,
            bbox: self.bbox,
            confidence: self.confidence,
            class_id: self.class_id,
            frames_lost: self.frames_lost,
            hits: self.hits,
            state: self.state,
            last_seen_frame: self.last_seen_frame,
        })
    }
}

/// Maintains track identities across frames.
pub struct IdentityTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    last_id: u64,
}

impl IdentityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            last_id: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Live tracks, tentative ones included.
    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Feed one observed frame and return the confirmed snapshot, ordered by ID.
    pub fn update(&mut self, detections: &[Detection], frame_index: u64) -> Vec<TrackedObject> {
        let usable: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.is_well_formed() && d.confidence >= self.config.low_confidence_floor)
            .collect();

        for track in &mut self.tracks {
            track.predicted = track.filter.predict();
        }

        let (high, low): (Vec<&Detection>, Vec<&Detection>) = usable
            .into_iter()
            .partition(|d| d.confidence >= self.config.track_activation_threshold);

        let mut track_matched = vec![false; self.tracks.len()];
        let max_cost = self.config.minimum_matching_threshold;

        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let first = greedy_assign(&self.tracks, &all_tracks, &high, max_cost);
        let mut high_matched = vec![false; high.len()];
        for &(ti, di) in &first {
            track_matched[ti] = true;
            high_matched[di] = true;
        }

        let rescue_pool: Vec<usize> = (0..self.tracks.len())
            .filter(|&ti| !track_matched[ti] && self.tracks[ti].state == TrackState::Tracked)
            .collect();
        let second = greedy_assign(&self.tracks, &rescue_pool, &low, max_cost);
        for &(ti, _) in &second {
            track_matched[ti] = true;
        }

        for &(ti, di) in &first {
            self.tracks[ti].refresh(high[di], frame_index);
        }
        for &(ti, di) in &second {
            self.tracks[ti].refresh(low[di], frame_index);
        }

        let mut keep = vec![true; self.tracks.len()];
        for (ti, track) in self.tracks.iter_mut().enumerate() {
            if track_matched[ti] {
                continue;
            }
            let Some(id) = track.id else {
                keep[ti] = false;
                continue;
            };
            track.mark_lost();
            if track.frames_lost > self.config.lost_track_buffer {
                log::debug!("retiring track {} after {} lost frames", id, track.frames_lost);
                keep[ti] = false;
            }
        }
        let mut flags = keep.into_iter();
        self.tracks.retain(|_| flags.next().unwrap_or(false));

        for (di, det) in high.iter().enumerate() {
            if !high_matched[di] {
                self.tracks.push(Track::new(det, frame_index));
            }
        }

        let min_streak = self.config.minimum_consecutive_frames;
        for track in &mut self.tracks {
            if track.id.is_none() && track.streak >= min_streak {
                self.last_id += 1;
                track.id = TrackerId::new(self.last_id);
            }
        }

        let mut snapshot: Vec<TrackedObject> =
            self.tracks.iter().filter_map(Track::snapshot).collect();
        snapshot.sort_by_key(|t| t.id);
        debug_assert!(
            snapshot.windows(2).all(|w| w[0].id != w[1].id),
            "duplicate live tracker id"
        );
        snapshot
    }
}

/// One-to-one greedy assignment by descending IoU.
///
/// Returns `(track_index, detection_index)` pairs. A pair matches only when
/// the boxes overlap and `1 - IoU <= max_cost`.
fn greedy_assign(
    tracks: &[Track],
    pool: &[usize],
    detections: &[&Detection],
    max_cost: f32,
) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
    for &ti in pool {
        for (di, det) in detections.iter().enumerate() {
            let affinity = tracks[ti].predicted.iou(&det.bbox);
            if affinity > 0.0 && 1.0 - affinity <= max_cost {
                pairs.push((ti, di, affinity));
            }
        }
    }
    pairs.sort_by(|a, b| {
        b.2.total_cmp(&a.2)
            .then(a.0.cmp(&b.0))
            .then(a.1.cmp(&b.1))
    });

    let mut used_tracks = Vec::new();
    let mut used_dets = Vec::new();
    let mut out = Vec::new();
    for (ti, di, _) in pairs {
        if used_tracks.contains(&ti) || used_dets.contains(&di) {
            continue;
        }
        used_tracks.push(ti);
        used_dets.push(di);
        out.push((ti, di));
    }
    out
}
