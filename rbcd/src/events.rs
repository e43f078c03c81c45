//! Event broadcast for registry and dispatch activity.
//!
//! Live subscribers get each event as a JSON line; the most recent events
//! are also kept for `GET /events`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_BUFFER: usize = 256;

/// Kinds of events published on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NodeRegistered,
    NodeDeregistered,
    NodeOffline,
    JobDispatched,
    JobDispatchFailed,
    JobCompleted,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NodeRegistered => "node_registered",
            Self::NodeDeregistered => "node_deregistered",
            Self::NodeOffline => "node_offline",
            Self::JobDispatched => "job_dispatched",
            Self::JobDispatchFailed => "job_dispatch_failed",
            Self::JobCompleted => "job_completed",
        }
    }
}

/// Broadcast channel for daemon events (JSON lines) with a bounded history.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<String>,
    history: Arc<Mutex<VecDeque<Value>>>,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus. The buffer is clamped to at least
    /// `DEFAULT_BUFFER` entries and also bounds the history.
    pub fn new(buffer: usize) -> Self {
        let capacity = buffer.max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Up to `limit` of the most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Value> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Emit a structured event with payload. The event is recorded in the
    /// history even when nobody is subscribed.
    pub fn emit<T: Serialize>(&self, kind: EventKind, data: &T) {
        let payload = json!({
            "event": kind.as_str(),
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&payload) {
            Ok(serialized) => {
                self.remember(payload);
                let _ = self.sender.send(serialized);
            }
            Err(err) => warn!(event = kind.as_str(), "Failed to serialize event: {}", err),
        }
    }

    fn remember(&self, event: Value) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}
