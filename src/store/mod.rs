//! Item Store boundary.
//!
//! The store owns review items, training cases, batches and saved filters.
//! Every write carries the state the caller last observed; a store that finds
//! a different state refuses the write with `StoreError::Conflict`.
//!
//! ```text
//! session ──StoreOp──▶ driver ──execute()──▶ ItemStore
//!    ▲                                         │
//!    └──────── SessionEvent::Completed ◀───────┘
//! ```

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::StaleStateError;
use crate::models::*;

pub use memory::InMemoryItemStore;
pub use sqlite::SqliteItemStore;

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Write conflict: {0}")]
    Conflict(#[from] StaleStateError),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal lock error")]
    LockPoisoned,
}

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity_type, id } => StoreError::NotFound {
                entity: entity_label(&entity_type),
                id,
            },
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl StoreError {
    pub fn stale(&self) -> Option<&StaleStateError> {
        match self {
            StoreError::Conflict(stale) => Some(stale),
            _ => None,
        }
    }
}

fn entity_label(entity_type: &str) -> &'static str {
    match entity_type {
        "review_item" => "review_item",
        "training_case" => "training_case",
        "training_batch" => "training_batch",
        "saved_filter" => "saved_filter",
        _ => "entity",
    }
}

// ═══════════════════════════════════════════════════════════
// Conditional patches
// ═══════════════════════════════════════════════════════════

/// Conditional update of a review item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    /// Transition name, reported when the write turns out stale.
    pub operation: String,
    /// The write applies only if the stored status still equals this.
    pub expected_status: ItemStatus,
    pub status: Option<ItemStatus>,
    /// `Some(None)` clears the assignee.
    pub assignee: Option<Option<String>>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl ItemPatch {
    pub fn expecting(status: ItemStatus, operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            expected_status: status,
            status: None,
            assignee: None,
            reviewed_by: None,
            reviewed_at: None,
        }
    }

    pub fn check(&self, item: &ReviewItem, attempted: &str) -> Result<(), StaleStateError> {
        if item.status != self.expected_status {
            return Err(StaleStateError::new(
                "review_item",
                &item.id,
                self.expected_status,
                item.status,
                attempted,
            ));
        }
        Ok(())
    }

    pub fn apply_to(&self, item: &mut ReviewItem) {
        if let Some(status) = self.status {
            item.status = status;
        }
        if let Some(assignee) = &self.assignee {
            item.assignee = assignee.clone();
        }
        if let (Some(by), Some(at)) = (&self.reviewed_by, self.reviewed_at) {
            item.reviewed_by = Some(by.clone());
            item.reviewed_at = Some(at);
        }
    }
}

/// Conditional update of a training case. Decision record and ratings travel
/// with the status change in one write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasePatch {
    pub operation: String,
    pub expected_status: CaseStatus,
    pub status: CaseStatus,
    pub append_reviewer: Option<ReviewerRecord>,
    pub ratings: Option<QualityRatings>,
}

impl CasePatch {
    pub fn check(&self, case: &TrainingCase, attempted: &str) -> Result<(), StaleStateError> {
        if case.status != self.expected_status {
            return Err(StaleStateError::new(
                "training_case",
                &case.id,
                self.expected_status,
                case.status,
                attempted,
            ));
        }
        Ok(())
    }

    pub fn apply_to(&self, case: &mut TrainingCase) {
        case.status = self.status;
        if let Some(record) = &self.append_reviewer {
            case.reviewers.push(record.clone());
        }
        if let Some(ratings) = self.ratings {
            case.ratings = Some(ratings);
        }
    }
}

/// Conditional update of a training batch. `progress`, `metrics` and
/// `failure_reason` are written as-is so they follow the new status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPatch {
    pub expected_status: BatchStatus,
    pub status: BatchStatus,
    pub case_ids: Option<Vec<String>>,
    pub progress: Option<u8>,
    pub metrics: Option<BatchMetrics>,
    pub failure_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchPatch {
    pub fn check(&self, batch: &TrainingBatch, attempted: &str) -> Result<(), StaleStateError> {
        if batch.status != self.expected_status {
            return Err(StaleStateError::new(
                "training_batch",
                &batch.id,
                self.expected_status,
                batch.status,
                attempted,
            ));
        }
        Ok(())
    }

    pub fn apply_to(&self, batch: &mut TrainingBatch) {
        batch.status = self.status;
        if let Some(case_ids) = &self.case_ids {
            batch.case_ids = case_ids.clone();
        }
        batch.progress = self.progress;
        batch.metrics = self.metrics;
        batch.failure_reason = self.failure_reason.clone();
        if self.started_at.is_some() {
            batch.started_at = self.started_at;
        }
        if self.finished_at.is_some() {
            batch.finished_at = self.finished_at;
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Store trait
// ═══════════════════════════════════════════════════════════

/// Read source and write sink for everything the engine reviews.
pub trait ItemStore: Send + Sync {
    fn list_review_items(&self) -> Result<Vec<ReviewItem>, StoreError>;

    fn list_training_cases(&self) -> Result<Vec<TrainingCase>, StoreError>;

    fn list_batches(&self) -> Result<Vec<TrainingBatch>, StoreError>;

    /// Saved filters in creation order.
    fn list_saved_filters(&self) -> Result<Vec<SavedFilter>, StoreError>;

    fn update_review_item(&self, id: &str, patch: &ItemPatch) -> Result<ReviewItem, StoreError>;

    fn update_training_case(&self, id: &str, patch: &CasePatch)
        -> Result<TrainingCase, StoreError>;

    fn create_saved_filter(&self, filter: &SavedFilter) -> Result<(), StoreError>;

    fn delete_saved_filter(&self, id: &str) -> Result<(), StoreError>;

    fn create_batch(&self, batch: &TrainingBatch) -> Result<(), StoreError>;

    fn update_batch(&self, id: &str, patch: &BatchPatch) -> Result<TrainingBatch, StoreError>;

    /// Move a batch to `completed` and every one of its cases from `approved`
    /// to `trained`, all or nothing.
    fn complete_batch(
        &self,
        id: &str,
        patch: &BatchPatch,
    ) -> Result<(TrainingBatch, Vec<TrainingCase>), StoreError>;
}

// ═══════════════════════════════════════════════════════════
// Request / reply
// ═══════════════════════════════════════════════════════════

/// Everything the store holds, read in one pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub items: Vec<ReviewItem>,
    pub cases: Vec<TrainingCase>,
    pub batches: Vec<TrainingBatch>,
    pub saved_filters: Vec<SavedFilter>,
}

pub fn load_snapshot(store: &dyn ItemStore) -> Result<StoreSnapshot, StoreError> {
    Ok(StoreSnapshot {
        items: store.list_review_items()?,
        cases: store.list_training_cases()?,
        batches: store.list_batches()?,
        saved_filters: store.list_saved_filters()?,
    })
}

/// A write (or reload) handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreOp {
    Reload,
    UpdateItem { id: String, patch: ItemPatch },
    UpdateCase { id: String, patch: CasePatch },
    CreateSavedFilter { filter: SavedFilter },
    DeleteSavedFilter { id: String },
    CreateBatch { batch: TrainingBatch },
    UpdateBatch { id: String, patch: BatchPatch },
    CompleteBatch { id: String, patch: BatchPatch },
}

impl StoreOp {
    /// Id of the entity this op writes, if any.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            StoreOp::Reload => None,
            StoreOp::UpdateItem { id, .. }
            | StoreOp::UpdateCase { id, .. }
            | StoreOp::DeleteSavedFilter { id }
            | StoreOp::UpdateBatch { id, .. }
            | StoreOp::CompleteBatch { id, .. } => Some(id),
            StoreOp::CreateSavedFilter { filter } => Some(&filter.id),
            StoreOp::CreateBatch { batch } => Some(&batch.id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreOp::Reload => "reload",
            StoreOp::UpdateItem { .. } => "update_item",
            StoreOp::UpdateCase { .. } => "update_case",
            StoreOp::CreateSavedFilter { .. } => "create_saved_filter",
            StoreOp::DeleteSavedFilter { .. } => "delete_saved_filter",
            StoreOp::CreateBatch { .. } => "create_batch",
            StoreOp::UpdateBatch { .. } => "update_batch",
            StoreOp::CompleteBatch { .. } => "complete_batch",
        }
    }
}

/// What the store handed back for a successful op.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreReply {
    Snapshot(Box<StoreSnapshot>),
    Item(ReviewItem),
    Case(TrainingCase),
    SavedFilterCreated(SavedFilter),
    SavedFilterDeleted(String),
    BatchCreated(TrainingBatch),
    Batch(TrainingBatch),
    BatchCompleted { batch: TrainingBatch, cases: Vec<TrainingCase> },
}

/// Run one op against the store. Blocking; the driver calls this off the
/// session's event loop.
pub fn execute(store: &dyn ItemStore, op: &StoreOp) -> Result<StoreReply, StoreError> {
    match op {
        StoreOp::Reload => {
            let snapshot = load_snapshot(store)?;
            Ok(StoreReply::Snapshot(Box::new(snapshot)))
        }
        StoreOp::UpdateItem { id, patch } => store.update_review_item(id, patch).map(StoreReply::Item),
        StoreOp::UpdateCase { id, patch } => store.update_training_case(id, patch).map(StoreReply::Case),
        StoreOp::CreateSavedFilter { filter } => {
            store.create_saved_filter(filter)?;
            Ok(StoreReply::SavedFilterCreated(filter.clone()))
        }
        StoreOp::DeleteSavedFilter { id } => {
            store.delete_saved_filter(id)?;
            Ok(StoreReply::SavedFilterDeleted(id.clone()))
        }
        StoreOp::CreateBatch { batch } => {
            store.create_batch(batch)?;
            Ok(StoreReply::BatchCreated(batch.clone()))
        }
        StoreOp::UpdateBatch { id, patch } => store.update_batch(id, patch).map(StoreReply::Batch),
        StoreOp::CompleteBatch { id, patch } => {
            let (batch, cases) = store.complete_batch(id, patch)?;
            Ok(StoreReply::BatchCompleted { batch, cases })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{review_item, training_case};

    #[test]
    fn item_patch_check_reports_stale() {
        let mut item = review_item("r-1");
        item.status = ItemStatus::Escalated;
        let patch = ItemPatch::expecting(ItemStatus::Pending, "escalate");
        let err = patch.check(&item, &patch.operation).unwrap_err();
        assert_eq!(err.actual, "escalated");
        assert_eq!(err.expected, "pending");
    }

    #[test]
    fn item_patch_sets_review_pair_together() {
        let mut item = review_item("r-1");
        let patch = ItemPatch {
            status: Some(ItemStatus::Reviewed),
            reviewed_by: Some("rev-1".into()),
            reviewed_at: None,
            ..ItemPatch::expecting(ItemStatus::Pending, "mark_reviewed")
        };
        patch.apply_to(&mut item);
        assert_eq!(item.status, ItemStatus::Reviewed);
        // Half a pair is never written.
        assert!(item.reviewed_by.is_none());
    }

    #[test]
    fn case_patch_appends_trail() {
        let mut case = training_case("c-1", CaseStatus::Pending);
        let patch = CasePatch {
            operation: "approve".into(),
            expected_status: CaseStatus::Pending,
            status: CaseStatus::Approved,
            append_reviewer: Some(ReviewerRecord {
                reviewer_id: "rev-2".into(),
                decision: ReviewDecision::Approved,
                timestamp: Utc::now(),
                comment: None,
            }),
            ratings: Some(QualityRatings { accuracy: 4, completeness: 4, tone: 5 }),
        };
        patch.check(&case, &patch.operation).unwrap();
        patch.apply_to(&mut case);
        assert_eq!(case.status, CaseStatus::Approved);
        assert_eq!(case.reviewers.len(), 1);
        assert!(case.ratings.is_some());
    }

    #[test]
    fn op_target_ids() {
        let op = StoreOp::DeleteSavedFilter { id: "sf-1".into() };
        assert_eq!(op.target_id(), Some("sf-1"));
        assert_eq!(op.kind(), "delete_saved_filter");
        assert_eq!(StoreOp::Reload.target_id(), None);
    }
}
