//! Occupancy event sinks.
//!
//! - `EventSink`: the dispatch seam used by the frame loop.
//! - `MqttPublisher`: QoS 1 retained publish via rumqttc.
//! - `MemorySink`: in-process recorder for dry runs and tests.

mod mqtt;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::occupancy::OccupancyEvent;

pub use mqtt::MqttPublisher;

/// Topic suffix for the availability (Last Will) topic.
pub const AVAILABILITY_TOPIC_SUFFIX: &str = "status";
pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Why an event was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The broker never accepted the connection.
    NotConnected,
    /// The outbound request queue is full.
    QueueFull,
    /// The connection dropped; the client is reconnecting.
    Disconnected,
    /// The event could not be encoded.
    Serialize(String),
}

impl PublishError {
    /// Transient failures are retried by the frame loop on a later frame.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull | Self::Disconnected)
    }
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "broker not connected"),
            Self::QueueFull => write!(f, "publish queue full"),
            Self::Disconnected => write!(f, "broker connection lost"),
            Self::Serialize(reason) => write!(f, "failed to encode event: {}", reason),
        }
    }
}

impl std::error::Error for PublishError {}

/// Destination for occupancy events.
///
/// `publish` returns once the event is dispatched (handed to the transport).
/// It must not block on delivery acknowledgement.
pub trait EventSink: Send {
    fn name(&self) -> &'static str;

    fn publish(&mut self, event: &OccupancyEvent) -> Result<(), PublishError>;
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn publish(&mut self, event: &OccupancyEvent) -> Result<(), PublishError> {
        (**self).publish(event)
    }
}

#[derive(Default)]
struct MemoryInner {
    events: Vec<OccupancyEvent>,
    failures_pending: usize,
    fail_with: Option<PublishError>,
}

/// Records dispatched events. Clones share the same log.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
    log_events: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log every event at `info`. Used for `--dry-run`.
    pub fn logging() -> Self {
        Self {
            log_events: true,
            ..Self::default()
        }
    }

    /// Fail the next `n` publishes with `error`.
    pub fn fail_next(&self, n: usize, error: PublishError) {
        let mut inner = self.lock();
        inner.failures_pending = n;
        inner.fail_with = Some(error);
    }

    pub fn events(&self) -> Vec<OccupancyEvent> {
        self.lock().events.clone()
    }

    pub fn counts(&self) -> Vec<usize> {
        self.lock().events.iter().map(|e| e.count).collect()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn publish(&mut self, event: &OccupancyEvent) -> Result<(), PublishError> {
        let mut inner = self.lock();
        if inner.failures_pending > 0 {
            inner.failures_pending -= 1;
            return Err(inner.fail_with.clone().unwrap_or(PublishError::Disconnected));
        }
        inner.events.push(*event);
        drop(inner);

        if self.log_events {
            log::info!(
                "[dry-run] occupancy count={} timestamp={}",
                event.count,
                event.timestamp
            );
        }
        Ok(())
    }
}
