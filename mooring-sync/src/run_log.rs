//! Run-scoped event accumulator.
//!
//! One [`RunLog`] per sync run, threaded explicitly through the orchestrator
//! and mount controller. Events are emitted live at `debug` and kept in a
//! ring capped at [`DEFAULT_EVENT_CAPACITY`], so a chatty run cannot grow
//! without bound. [`RunLog::flush`] writes the whole record as one line.

use std::collections::VecDeque;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use mooring_core::SyncResult;

pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEvent {
    pub elapsed_ms: u64,
    pub event: String,
    pub data: Value,
}

#[derive(Debug)]
pub struct RunLog {
    run_id: String,
    started_at: DateTime<Utc>,
    started: Instant,
    events: VecDeque<RunEvent>,
    capacity: usize,
    dropped: usize,
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let run_id = Uuid::new_v4().simple().to_string();
        Self {
            run_id: run_id[..8].to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            events: VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_CAPACITY)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Append an event, evicting the oldest when full.
    pub fn record(&mut self, event: &str, data: Value) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        tracing::debug!(run_id = %self.run_id, elapsed_ms, event, data = %data, "sync event");

        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(RunEvent {
            elapsed_ms,
            event: event.to_string(),
            data,
        });
    }

    pub fn events(&self) -> impl Iterator<Item = &RunEvent> {
        self.events.iter()
    }

    pub fn event_names(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.event.as_str()).collect()
    }

    /// Events evicted to respect the cap.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// The record and its final result as one JSON document.
    pub fn bundle(&self, result: &SyncResult) -> Value {
        json!({
            "run_id": self.run_id,
            "started_at": self.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "duration_ms": self.started.elapsed().as_millis() as u64,
            "dropped_events": self.dropped,
            "events": self.events,
            "result": result,
        })
    }

    /// Emit the bundle as a single log entry.
    pub fn flush(&self, result: &SyncResult) {
        tracing::info!(
            run_id = %self.run_id,
            success = result.success,
            bundle = %self.bundle(result),
            "sync run log",
        );
    }
}
