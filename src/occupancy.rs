//! Edge-triggered occupancy change detection.
//!
//! `check` is pure: it never touches the state. The caller records a count
//! with [`OccupancyState::mark_reported`] only once the event has actually
//! been dispatched, so a failed publish is retried on the next frame.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::track::TrackerId;

/// Last count handed to the sink. `None` until the first dispatch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OccupancyState {
    last_reported: Option<usize>,
}

impl OccupancyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_reported(&self) -> Option<usize> {
        self.last_reported
    }

    pub fn mark_reported(&mut self, count: usize) {
        self.last_reported = Some(count);
    }
}

/// Wire payload: `{"count":N,"timestamp":T}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyEvent {
    pub count: usize,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl OccupancyEvent {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Event for the current wall-clock time if the count changed.
pub fn check(in_zone: &BTreeSet<TrackerId>, state: &OccupancyState) -> Option<OccupancyEvent> {
    check_at(in_zone, state, unix_now())
}

pub fn check_at(
    in_zone: &BTreeSet<TrackerId>,
    state: &OccupancyState,
    timestamp: u64,
) -> Option<OccupancyEvent> {
    let count = in_zone.len();
    if state.last_reported == Some(count) {
        return None;
    }
    Some(OccupancyEvent { count, timestamp })
}
