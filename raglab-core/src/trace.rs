//! Structured execution tracing for technique runs.
//!
//! Every technique run appends ordered [`TraceEvent`]s to a
//! [`TraceRecorder`]. The recorder is single-writer — one per run, never
//! shared between concurrent techniques — but interior-mutable so the
//! dispatcher can keep a handle and salvage the partial trace of a run
//! that timed out or was canceled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap on events per run so trace storage stays bounded.
const MAX_EVENTS: usize = 512;

/// One structured step in a technique's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Strictly increasing sequence number, starting at 0.
    pub seq: u64,
    /// Short stage identifier, e.g. `retrieve_complete`.
    pub step: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details for the step.
    pub details: serde_json::Value,
    /// Wall-clock timestamp of the event.
    pub at: DateTime<Utc>,
}

/// Append-only event log for a single technique run.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    events: Mutex<Vec<TraceEvent>>,
    seq: AtomicU64,
}

impl TraceRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event with the next sequence number.
    ///
    /// Messages are truncated to keep the serialized trace bounded; past
    /// [`MAX_EVENTS`] a single `trace_truncated` marker is written and
    /// further events are dropped.
    pub fn log(&self, step: &str, message: impl Into<String>, details: serde_json::Value) {
        let mut events = self.events.lock().expect("trace recorder poisoned");
        if events.len() >= MAX_EVENTS {
            if events.len() == MAX_EVENTS {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                events.push(TraceEvent {
                    seq,
                    step: "trace_truncated".into(),
                    message: format!("trace exceeded {MAX_EVENTS} events; further steps dropped"),
                    details: serde_json::Value::Null,
                    at: Utc::now(),
                });
            }
            return;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        events.push(TraceEvent {
            seq,
            step: step.to_string(),
            message: preview(&message.into(), 300),
            details,
            at: Utc::now(),
        });
    }

    /// Clone the events recorded so far.
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.events.lock().expect("trace recorder poisoned").clone()
    }

    /// Number of events recorded so far.
    pub fn len(&self) -> usize {
        self.events.lock().expect("trace recorder poisoned").len()
    }

    /// Whether the recorder holds no events yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Truncate `text` to at most `max_chars` characters, marking elision.
///
/// Operates on character boundaries so multi-byte text never splits.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

/// Round a score to 4 decimal places for trace output.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
