//! Batch progress events
//!
//! The orchestrator publishes [`BatchEvent`]s on an [`EventBus`]; the batch
//! CLI (and tests) subscribe. Emission never blocks analysis work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Batch lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BatchEvent {
    BatchStarted {
        batch_id: Uuid,
        total_files: usize,
        /// "sequential" or "worker_pool(N)"
        strategy: String,
        timestamp: DateTime<Utc>,
    },

    FileStarted {
        batch_id: Uuid,
        /// Position in the input list (0-based)
        index: usize,
        track: String,
        file_path: String,
        timestamp: DateTime<Utc>,
    },

    FileCompleted {
        batch_id: Uuid,
        index: usize,
        track: String,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Result already present and overwrite disabled
    FileSkipped {
        batch_id: Uuid,
        index: usize,
        track: String,
        timestamp: DateTime<Utc>,
    },

    FileFailed {
        batch_id: Uuid,
        index: usize,
        track: Option<String>,
        error_kind: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Optional visualization/sonification step failed or timed out
    RenderFailed {
        batch_id: Uuid,
        track: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    BatchCompleted {
        batch_id: Uuid,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast channel for [`BatchEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BatchEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: BatchEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
