//! Zone occupancy pipeline
//!
//! Tracks people across video frames, counts how many distinct tracked
//! individuals stand inside a configured polygon, and publishes an event only
//! when that count changes.
//!
//! # Invariants
//!
//! 1. **Stable identity**: a `TrackerId` is unique among live tracks and never
//!    reused within a run. Unconfirmed tracks are never emitted.
//! 2. **Fixed zone**: the polygon is validated and scaled once at startup.
//! 3. **Edge-triggered events**: an event is dispatched iff the distinct
//!    in-zone count differs from the last successfully dispatched count.
//! 4. **No phantom frames**: skipped or undetectable frames never advance the
//!    tracker.
//!
//! # Module Structure
//!
//! - `geometry`: point-in-polygon containment
//! - `detect`: detector boundary, NMS, stub/scripted/ONNX backends
//! - `track`: ByteTrack-style identity tracker
//! - `zone`: per-object zone membership
//! - `occupancy`: change detection and the event payload
//! - `publish`: event sinks (MQTT, in-memory)
//! - `pipeline`: the per-frame loop
//! - `frame` / `ingest`: raw frames and their sources
//! - `config` / `transport`: startup configuration and broker plumbing

pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod occupancy;
pub mod pipeline;
pub mod publish;
pub mod render;
pub mod track;
pub mod transport;
pub mod zone;

pub use config::OccupancyConfig;
pub use detect::{build_backend, BoundingBox, Detection, DetectorBackend, PERSON_CLASS_ID};
pub use frame::RawFrame;
pub use geometry::{Point, Polygon};
pub use ingest::{Acquired, FrameSource, VideoSource};
pub use occupancy::{check, check_at, OccupancyEvent, OccupancyState};
pub use pipeline::{FrameOutcome, Pipeline, PipelineConfig, PublishOutcome, RunStats, StopReason};
pub use publish::{EventSink, MemorySink, MqttPublisher, PublishError};
pub use render::{FrameRenderer, LogRenderer, NullRenderer};
pub use track::{IdentityTracker, TrackState, TrackedObject, TrackerConfig, TrackerId};
pub use zone::{Anchor, Zone};
