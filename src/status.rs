//! Operator-facing status surface.
//!
//! The engine publishes a [`StatusSnapshot`] on a `watch` channel and appends
//! human-readable lines to a bounded [`LogRing`]. The UI renders both however
//! it likes; nothing here knows about colours or widgets.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall state of the sync service process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Running,
    Error,
}

/// Reachability of one endpoint (the MySQL source or the MongoDB target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointStatus {
    NotInitialized,
    Disconnected,
    Connected,
    Error,
}

/// Point-in-time view of the service, published after every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub server_status: ServerStatus,
    pub source_status: EndpointStatus,
    pub target_status: EndpointStatus,
    pub is_syncing: bool,
    pub is_bulk_syncing: bool,
    pub auto_sync_enabled: bool,
    /// Free-form progress line for the bulk backfill, e.g. "2024-03-11 (38%)".
    pub bulk_sync_progress: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            server_status: ServerStatus::Stopped,
            source_status: EndpointStatus::NotInitialized,
            target_status: EndpointStatus::NotInitialized,
            is_syncing: false,
            is_bulk_syncing: false,
            auto_sync_enabled: false,
            bulk_sync_progress: None,
        }
    }
}

/// One line in the operator log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Append-only in-memory log with a fixed capacity; the oldest line is
/// dropped once the ring is full. Shared across workers behind a mutex,
/// drained by the UI task.
pub struct LogRing {
    lines: Mutex<VecDeque<LogLine>>,
    capacity: usize,
}

pub const LOG_RING_CAPACITY: usize = 100;

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, message: impl Into<String>) {
        let mut lines = self.lines.lock().expect("log ring poisoned");
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(LogLine {
            at: Utc::now(),
            message: message.into(),
        });
    }

    /// The UI matches on these prefixes to colour lines.
    pub fn error(&self, message: impl AsRef<str>) {
        self.push(format!("ERROR: {}", message.as_ref()));
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.push(format!("WARNING: {}", message.as_ref()));
    }

    pub fn success(&self, message: impl AsRef<str>) {
        self.push(format!("SUCCESS: {}", message.as_ref()));
    }

    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .expect("log ring poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().expect("log ring poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(LOG_RING_CAPACITY)
    }
}
