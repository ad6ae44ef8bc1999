//! Job lifecycle events and the recent-failure log.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with two bounded
//! ring buffers: the latest events, which back the admin activity view, and
//! the latest failures, which back the admin error view.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ids::JobId;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

/// Maximum number of failure records retained.
const MAX_RECENT_FAILURES: usize = 200;

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ConversionQueued {
        job_id: JobId,
    },
    ConversionStarted {
        job_id: JobId,
    },
    ConversionRetrying {
        job_id: JobId,
        attempt: u32,
        reason: String,
    },
    ConversionCompleted {
        job_id: JobId,
        attempts: u32,
    },
    ConversionFailed {
        job_id: JobId,
        code: String,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub payload: EventPayload,
}

impl Event {
    /// Create a new event with a fresh UUID and the current timestamp.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// One entry of the recent-failure log.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub job_id: Option<JobId>,
    pub code: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with bounded ring buffers of recent events and failures.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
    failures: RwLock<VecDeque<FailureRecord>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffers, which are fixed).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
            failures: RwLock::new(VecDeque::with_capacity(MAX_RECENT_FAILURES)),
        }
    }

    /// Subscribe to the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer. `ConversionFailed` events are also appended to the
    /// failure log.
    pub fn broadcast(&self, payload: EventPayload) {
        if let EventPayload::ConversionFailed {
            job_id, code, error, ..
        } = &payload
        {
            self.record_failure(Some(*job_id), code.clone(), error.clone());
        }

        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // Ignore send errors (no subscribers).
        let _ = self.tx.send(event);
    }

    /// Append a failure that is not tied to a job lifecycle event, such as
    /// a rejected submission.
    pub fn record_failure(
        &self,
        job_id: Option<JobId>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) {
        let record = FailureRecord {
            timestamp: Utc::now(),
            job_id,
            code: code.into(),
            message: message.into(),
        };
        let mut failures = self.failures.write();
        if failures.len() >= MAX_RECENT_FAILURES {
            failures.pop_back();
        }
        failures.push_front(record);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }

    /// Return the `n` most recent failures (newest first).
    pub fn recent_failures(&self, n: usize) -> Vec<FailureRecord> {
        let failures = self.failures.read();
        failures.iter().take(n).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
