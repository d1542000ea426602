//! Event types and broadcast bus for the paddock sync pipeline
//!
//! Sync-run lifecycle notifications for observability consumers (admin
//! dashboards, notification glue). Events are advisory: nothing in the
//! pipeline depends on a subscriber being present.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Paddock event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PaddockEvent {
    /// A sync run left the queue and started executing
    SyncRunStarted {
        run_id: Uuid,
        task: String,
        timestamp: DateTime<Utc>,
    },

    /// A sync run moved to a new state (Fetching, Reconciling, ...)
    SyncRunStateChanged {
        run_id: Uuid,
        state: String,
        timestamp: DateTime<Utc>,
    },

    /// One reconcile unit (a season or a round) finished
    SyncUnitFinished {
        run_id: Uuid,
        unit: String,
        ok: bool,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A sync run reached a terminal state
    SyncRunFinished {
        run_id: Uuid,
        state: String,
        created: u64,
        updated: u64,
        skipped: u64,
        failed_units: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast event bus
///
/// Wraps a `tokio::sync::broadcast` channel. Slow subscribers lag and drop
/// old events rather than backpressuring the sync pipeline.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PaddockEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PaddockEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscribers case
    ///
    /// The sync pipeline must not fail because nobody is listening.
    pub fn emit_lossy(&self, event: PaddockEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
