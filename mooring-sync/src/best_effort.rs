//! Operations that must never block or fail the critical path.
//!
//! Unmount recovery, kills of timed-out processes, and diagnostic capture
//! all go through [`best_effort`]: the outcome is returned for logging and
//! never propagated.

use std::fmt::Display;
use std::future::Future;

/// Outcome of a best-effort operation.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort<T = ()> {
    Done(T),
    Failed(String),
}

impl<T> BestEffort<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, BestEffort::Done(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            BestEffort::Done(value) => Some(value),
            BestEffort::Failed(_) => None,
        }
    }
}

/// Await `op`, logging a failure under `label` instead of returning it.
pub async fn best_effort<F, T, E>(label: &str, op: F) -> BestEffort<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match op.await {
        Ok(value) => BestEffort::Done(value),
        Err(err) => {
            tracing::warn!(operation = label, error = %err, "best-effort operation failed");
            BestEffort::Failed(err.to_string())
        }
    }
}
