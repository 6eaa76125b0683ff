//! Metrics collection for clipcam
//!
//! Tracks recording cycles (start → artifact, or discard) and a short error
//! history. Used for diagnostics; nothing here affects session behaviour.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of finished cycles to retain in history
const MAX_CYCLE_HISTORY: usize = 50;

/// Maximum number of errors to retain in history
const MAX_ERROR_HISTORY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleOutcome {
    Completed,
    Discarded,
    Failed,
}

/// Metrics for a finished recording cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleMetrics {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Duration reported by the session clock (whole seconds)
    pub recorded_secs: u64,
    /// Wall time from start request to the end of the cycle
    pub wall_ms: u64,
    pub fragment_count: usize,
    pub artifact_size_bytes: usize,
    pub outcome: CycleOutcome,
}

/// Record of an error reported on the session's error channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    /// Category of error (e.g., "not-found", "encoder-start")
    pub error_type: String,
    pub message: String,
    pub session_id: Option<Uuid>,
}

/// Summary statistics across all recorded cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub total_cycles: u64,
    pub completed_cycles: u64,
    pub discarded_cycles: u64,
    pub failed_cycles: u64,
    pub acquisitions: u64,
    pub avg_recorded_secs: u64,
    pub last_error: Option<ErrorRecord>,
}

struct CycleInProgress {
    session_id: Uuid,
    started: Instant,
    started_at: DateTime<Utc>,
    fragment_count: usize,
}

impl CycleInProgress {
    fn finish(self, outcome: CycleOutcome, recorded_secs: u64, size: usize) -> CycleMetrics {
        CycleMetrics {
            session_id: self.session_id,
            started_at: self.started_at,
            recorded_secs,
            wall_ms: self.started.elapsed().as_millis() as u64,
            fragment_count: self.fragment_count,
            artifact_size_bytes: size,
            outcome,
        }
    }
}

/// Collects metrics for recording cycles
#[derive(Default)]
pub struct SessionMetrics {
    /// Finished cycles (newest first)
    history: VecDeque<CycleMetrics>,
    /// Errors (newest first)
    errors: VecDeque<ErrorRecord>,
    current: Option<CycleInProgress>,
    total_cycles: u64,
    completed_cycles: u64,
    discarded_cycles: u64,
    failed_cycles: u64,
    acquisitions: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquisition_requested(&mut self) {
        self.acquisitions += 1;
    }

    /// Start tracking a new cycle. A cycle still in progress is recorded as
    /// discarded.
    pub fn cycle_started(&mut self, session_id: Uuid) {
        if let Some(old) = self.current.take() {
            log::warn!(
                "Metrics: discarding in-progress cycle {} to start {}",
                old.session_id,
                session_id
            );
            self.discarded_cycles += 1;
            let metrics = old.finish(CycleOutcome::Discarded, 0, 0);
            self.push_history(metrics);
        }

        log::debug!("Metrics: starting cycle {}", session_id);
        self.current = Some(CycleInProgress {
            session_id,
            started: Instant::now(),
            started_at: Utc::now(),
            fragment_count: 0,
        });
        self.total_cycles += 1;
    }

    pub fn fragment_received(&mut self) {
        if let Some(cycle) = self.current.as_mut() {
            cycle.fragment_count += 1;
        }
    }

    pub fn cycle_completed(&mut self, recorded_secs: u64, artifact_size_bytes: usize) {
        if let Some(cycle) = self.current.take() {
            self.completed_cycles += 1;
            let metrics = cycle.finish(CycleOutcome::Completed, recorded_secs, artifact_size_bytes);
            log::info!(
                "Metrics: cycle {} completed - {}s, {} fragments, {} bytes",
                metrics.session_id,
                metrics.recorded_secs,
                metrics.fragment_count,
                metrics.artifact_size_bytes
            );
            self.push_history(metrics);
        }
    }

    pub fn cycle_discarded(&mut self) {
        if let Some(cycle) = self.current.take() {
            self.discarded_cycles += 1;
            log::debug!("Metrics: cycle {} discarded", cycle.session_id);
            let metrics = cycle.finish(CycleOutcome::Discarded, 0, 0);
            self.push_history(metrics);
        }
    }

    pub fn cycle_failed(&mut self) {
        if let Some(cycle) = self.current.take() {
            self.failed_cycles += 1;
            let metrics = cycle.finish(CycleOutcome::Failed, 0, 0);
            self.push_history(metrics);
        }
    }

    pub fn is_active_cycle(&self, session_id: Uuid) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.session_id == session_id)
    }

    pub fn record_error(&mut self, error_type: &str, message: String) {
        let record = ErrorRecord {
            timestamp: Utc::now(),
            error_type: error_type.to_string(),
            message,
            session_id: self.current.as_ref().map(|c| c.session_id),
        };
        self.errors.push_front(record);
        self.errors.truncate(MAX_ERROR_HISTORY);
    }

    pub fn history(&self) -> impl Iterator<Item = &CycleMetrics> {
        self.history.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter()
    }

    pub fn summary(&self) -> MetricsSummary {
        let completed: Vec<_> = self
            .history
            .iter()
            .filter(|c| c.outcome == CycleOutcome::Completed)
            .collect();
        let avg_recorded_secs = if completed.is_empty() {
            0
        } else {
            completed.iter().map(|c| c.recorded_secs).sum::<u64>() / completed.len() as u64
        };

        MetricsSummary {
            total_cycles: self.total_cycles,
            completed_cycles: self.completed_cycles,
            discarded_cycles: self.discarded_cycles,
            failed_cycles: self.failed_cycles,
            acquisitions: self.acquisitions,
            avg_recorded_secs,
            last_error: self.errors.front().cloned(),
        }
    }

    fn push_history(&mut self, metrics: CycleMetrics) {
        self.history.push_front(metrics);
        self.history.truncate(MAX_CYCLE_HISTORY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_cycle_is_recorded_with_fragments() {
        let mut m = SessionMetrics::new();
        let id = Uuid::new_v4();
        m.cycle_started(id);
        assert!(m.is_active_cycle(id));
        m.fragment_received();
        m.fragment_received();
        m.cycle_completed(4, 128);

        let last = m.history().next().unwrap();
        assert_eq!(last.session_id, id);
        assert_eq!(last.fragment_count, 2);
        assert_eq!(last.outcome, CycleOutcome::Completed);
        assert!(!m.is_active_cycle(id));

        let summary = m.summary();
        assert_eq!(summary.total_cycles, 1);
        assert_eq!(summary.completed_cycles, 1);
        assert_eq!(summary.avg_recorded_secs, 4);
    }

    #[test]
    fn starting_over_an_active_cycle_discards_it() {
        let mut m = SessionMetrics::new();
        m.cycle_started(Uuid::new_v4());
        m.cycle_started(Uuid::new_v4());
        assert_eq!(m.summary().discarded_cycles, 1);
        assert_eq!(m.summary().total_cycles, 2);
    }

    #[test]
    fn finishing_without_a_cycle_is_ignored() {
        let mut m = SessionMetrics::new();
        m.cycle_completed(1, 1);
        m.cycle_discarded();
        m.cycle_failed();
        assert_eq!(m.history().count(), 0);
    }

    #[test]
    fn error_history_is_bounded_newest_first() {
        let mut m = SessionMetrics::new();
        for i in 0..(MAX_ERROR_HISTORY + 5) {
            m.record_error("no-device", format!("error {}", i));
        }
        assert_eq!(m.errors().count(), MAX_ERROR_HISTORY);
        let last = m.summary().last_error.unwrap();
        assert_eq!(last.message, format!("error {}", MAX_ERROR_HISTORY + 4));
    }
}
