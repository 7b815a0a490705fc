//! Training batch state machine.
//!
//! ```text
//! draft ──mark_ready──▶ ready ──start──▶ training ──progress 100──▶ completed
//!   ▲ add_cases / remove_case               │
//!                                           └──fail / cancel──▶ failed
//! ```
//!
//! Functions check the observed batch and return the conditional write. The
//! move to `completed` is a `StoreOp::CompleteBatch`, which also flips every
//! member case to `trained` in the same store transaction.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{StaleStateError, ValidationError};
use crate::models::{BatchMetrics, BatchStatus, CaseStatus, TrainingBatch, TrainingCase};
use crate::store::{BatchPatch, StoreOp};

/// Prefix of the failure reason recorded for an operator cancellation.
pub const CANCELLED_PREFIX: &str = "cancelled";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error(transparent)]
    Stale(#[from] StaleStateError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Case {case_id} is {status}; only approved cases can join a batch")]
    CaseNotApproved { case_id: String, status: CaseStatus },

    #[error("Case {case_id} already belongs to open batch {batch_id}")]
    CaseInOpenBatch { case_id: String, batch_id: String },

    #[error("Case {0} not found")]
    UnknownCase(String),

    #[error("Case {case_id} is not part of batch {batch_id}")]
    NotAMember { case_id: String, batch_id: String },

    #[error("Progress cannot go backwards ({current} -> {reported})")]
    ProgressRegressed { current: u8, reported: u8 },

    #[error("Batch {0} reached 100% without metrics")]
    MissingMetrics(String),
}

fn expect_status(
    batch: &TrainingBatch,
    expected: BatchStatus,
    attempted: &str,
) -> Result<(), StaleStateError> {
    if batch.status != expected {
        return Err(StaleStateError::new(
            "training_batch",
            &batch.id,
            expected,
            batch.status,
            attempted,
        ));
    }
    Ok(())
}

/// Patch that keeps the status and clears the status-bound fields.
fn patch(expected: BatchStatus, status: BatchStatus) -> BatchPatch {
    BatchPatch {
        expected_status: expected,
        status,
        case_ids: None,
        progress: None,
        metrics: None,
        failure_reason: None,
        started_at: None,
        finished_at: None,
    }
}

// ═══════════════════════════════════════════════════════════
// Composition (draft only)
// ═══════════════════════════════════════════════════════════

pub fn new_batch(name: &str, at: DateTime<Utc>) -> TrainingBatch {
    TrainingBatch {
        id: Uuid::new_v4().to_string(),
        name: name.trim().to_string(),
        case_ids: Vec::new(),
        status: BatchStatus::Draft,
        progress: None,
        metrics: None,
        failure_reason: None,
        created_at: at,
        started_at: None,
        finished_at: None,
    }
}

/// Approved cases not claimed by any open batch.
pub fn eligible_cases<'a>(
    cases: &'a [TrainingCase],
    batches: &[TrainingBatch],
) -> Vec<&'a TrainingCase> {
    cases
        .iter()
        .filter(|c| c.status == CaseStatus::Approved)
        .filter(|c| !batches.iter().any(|b| b.status.is_open() && b.contains(&c.id)))
        .collect()
}

/// Add approved cases to a draft. Ids already in the batch are skipped.
pub fn add_cases<S: AsRef<str>>(
    batch: &TrainingBatch,
    case_ids: &[S],
    cases: &[TrainingCase],
    batches: &[TrainingBatch],
) -> Result<BatchPatch, BatchError> {
    expect_status(batch, BatchStatus::Draft, "add_cases")?;

    let mut next = batch.case_ids.clone();
    for case_id in case_ids.iter().map(|id| id.as_ref()) {
        if next.iter().any(|id| id == case_id) {
            continue;
        }
        let case = cases
            .iter()
            .find(|c| c.id == case_id)
            .ok_or_else(|| BatchError::UnknownCase(case_id.to_string()))?;
        if case.status != CaseStatus::Approved {
            return Err(BatchError::CaseNotApproved {
                case_id: case_id.to_string(),
                status: case.status,
            });
        }
        if let Some(other) = batches
            .iter()
            .find(|b| b.id != batch.id && b.status.is_open() && b.contains(case_id))
        {
            return Err(BatchError::CaseInOpenBatch {
                case_id: case_id.to_string(),
                batch_id: other.id.clone(),
            });
        }
        next.push(case_id.to_string());
    }

    Ok(BatchPatch {
        case_ids: Some(next),
        ..patch(BatchStatus::Draft, BatchStatus::Draft)
    })
}

pub fn remove_case(batch: &TrainingBatch, case_id: &str) -> Result<BatchPatch, BatchError> {
    expect_status(batch, BatchStatus::Draft, "remove_case")?;
    if !batch.contains(case_id) {
        return Err(BatchError::NotAMember {
            case_id: case_id.to_string(),
            batch_id: batch.id.clone(),
        });
    }
    let next = batch
        .case_ids
        .iter()
        .filter(|id| *id != case_id)
        .cloned()
        .collect();
    Ok(BatchPatch {
        case_ids: Some(next),
        ..patch(BatchStatus::Draft, BatchStatus::Draft)
    })
}

// ═══════════════════════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════════════════════

/// Freeze the case list. An empty batch cannot be promoted.
pub fn mark_ready(batch: &TrainingBatch) -> Result<BatchPatch, BatchError> {
    expect_status(batch, BatchStatus::Draft, "mark_ready")?;
    if batch.case_ids.is_empty() {
        return Err(ValidationError::EmptyBatch {
            batch_id: batch.id.clone(),
        }
        .into());
    }
    Ok(patch(BatchStatus::Draft, BatchStatus::Ready))
}

pub fn start(batch: &TrainingBatch, at: DateTime<Utc>) -> Result<BatchPatch, BatchError> {
    expect_status(batch, BatchStatus::Ready, "start")?;
    Ok(BatchPatch {
        progress: Some(0),
        started_at: Some(at),
        ..patch(BatchStatus::Ready, BatchStatus::Training)
    })
}

/// Record reported progress.
///
/// Returns `None` when nothing changes. Progress 100 yields the completion
/// op, which needs `metrics`.
pub fn advance(
    batch: &TrainingBatch,
    progress: u8,
    metrics: Option<BatchMetrics>,
    at: DateTime<Utc>,
) -> Result<Option<StoreOp>, BatchError> {
    expect_status(batch, BatchStatus::Training, "advance")?;
    if progress > 100 {
        return Err(ValidationError::ProgressOutOfRange { value: progress }.into());
    }
    let current = batch.progress.unwrap_or(0);
    if progress < current {
        return Err(BatchError::ProgressRegressed {
            current,
            reported: progress,
        });
    }

    if progress == 100 {
        let metrics = metrics.ok_or_else(|| BatchError::MissingMetrics(batch.id.clone()))?;
        return Ok(Some(StoreOp::CompleteBatch {
            id: batch.id.clone(),
            patch: BatchPatch {
                metrics: Some(metrics),
                finished_at: Some(at),
                ..patch(BatchStatus::Training, BatchStatus::Completed)
            },
        }));
    }
    if progress == current {
        return Ok(None);
    }
    Ok(Some(StoreOp::UpdateBatch {
        id: batch.id.clone(),
        patch: BatchPatch {
            progress: Some(progress),
            ..patch(BatchStatus::Training, BatchStatus::Training)
        },
    }))
}

/// Shorthand for `advance(batch, 100, Some(metrics), at)`.
pub fn complete(
    batch: &TrainingBatch,
    metrics: BatchMetrics,
    at: DateTime<Utc>,
) -> Result<StoreOp, BatchError> {
    advance(batch, 100, Some(metrics), at)?
        .ok_or_else(|| BatchError::MissingMetrics(batch.id.clone()))
}

/// External failure at any progress. Cases stay approved.
pub fn fail(
    batch: &TrainingBatch,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<BatchPatch, BatchError> {
    expect_status(batch, BatchStatus::Training, "fail")?;
    let reason = reason.trim();
    Ok(BatchPatch {
        failure_reason: Some(if reason.is_empty() {
            "training failed".to_string()
        } else {
            reason.to_string()
        }),
        finished_at: Some(at),
        ..patch(BatchStatus::Training, BatchStatus::Failed)
    })
}

pub fn cancel(
    batch: &TrainingBatch,
    reason: &str,
    at: DateTime<Utc>,
) -> Result<BatchPatch, BatchError> {
    fail(batch, &cancellation_reason(reason), at)
}

pub fn cancellation_reason(reason: &str) -> String {
    let reason = reason.trim();
    if reason.is_empty() {
        CANCELLED_PREFIX.to_string()
    } else {
        format!("{CANCELLED_PREFIX}: {reason}")
    }
}
