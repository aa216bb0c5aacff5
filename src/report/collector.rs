//! Batch outcome collector.

use super::{CrawlerError, PartialSuccessReport};
use crate::health::SystemHealthSummary;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Outcomes {
    successes: usize,
    errors: Vec<CrawlerError>,
}

/// Accumulates per-operation outcomes from concurrent ingestion tasks.
///
/// Shared by reference (or `Arc`) across the tasks of one run; each task
/// records exactly one outcome per operation.
#[derive(Debug)]
pub struct OutcomeCollector {
    execution_id: String,
    outcomes: Mutex<Outcomes>,
}

impl OutcomeCollector {
    /// New collector with a random execution id.
    pub fn new() -> Self {
        Self::with_execution_id(Uuid::new_v4().to_string())
    }

    pub fn with_execution_id(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            outcomes: Mutex::new(Outcomes::default()),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    fn lock(&self) -> MutexGuard<'_, Outcomes> {
        self.outcomes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_success(&self) {
        self.lock().successes += 1;
    }

    pub fn record_failure(&self, error: CrawlerError) {
        self.lock().errors.push(error);
    }

    /// Record a failure surfaced by one of the executors, classifying it by message.
    pub fn record_error(&self, url: impl Into<String>, err: &crate::Error) {
        self.record_failure(CrawlerError::from_error(url, err));
    }

    /// Record the outcome of an executor call and hand the value back on success.
    pub fn record<T>(&self, url: impl Into<String>, result: crate::Result<T>) -> Option<T> {
        match result {
            Ok(v) => {
                self.record_success();
                Some(v)
            }
            Err(e) => {
                self.record_error(url, &e);
                None
            }
        }
    }

    pub fn success_count(&self) -> usize {
        self.lock().successes
    }

    pub fn failure_count(&self) -> usize {
        self.lock().errors.len()
    }

    pub fn total(&self) -> usize {
        let o = self.lock();
        o.successes + o.errors.len()
    }

    pub fn errors(&self) -> Vec<CrawlerError> {
        self.lock().errors.clone()
    }

    pub fn report(&self, system_health: SystemHealthSummary) -> PartialSuccessReport {
        let o = self.lock();
        PartialSuccessReport::build(
            o.successes + o.errors.len(),
            o.successes,
            &o.errors,
            self.execution_id.clone(),
            system_health,
        )
    }
}

impl Default for OutcomeCollector {
    fn default() -> Self {
        Self::new()
    }
}
