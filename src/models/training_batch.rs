use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::BatchStatus;

/// Metrics reported by the training process on completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub accuracy: f32,
    /// Improvement delta over the previous model.
    pub improvement: f32,
}

/// A named group of approved training cases submitted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingBatch {
    pub id: String,
    pub name: String,
    pub case_ids: Vec<String>,
    pub status: BatchStatus,
    /// 0-100, present only while `status = training`.
    pub progress: Option<u8>,
    /// Present only when `status = completed`.
    pub metrics: Option<BatchMetrics>,
    /// Why the batch failed (training error or cancellation).
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TrainingBatch {
    pub fn cases_count(&self) -> usize {
        self.case_ids.len()
    }

    pub fn contains(&self, case_id: &str) -> bool {
        self.case_ids.iter().any(|id| id == case_id)
    }

    /// progress iff training, metrics iff completed.
    pub fn invariants_hold(&self) -> bool {
        let progress_ok = self.progress.is_some() == (self.status == BatchStatus::Training);
        let metrics_ok = self.metrics.is_some() == (self.status == BatchStatus::Completed);
        progress_ok && metrics_ok
    }
}
