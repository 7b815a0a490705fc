//! Review state machines.
//!
//! Training cases: `pending → approved | rejected`, and `approved → trained`
//! which only happens inside batch completion (`ItemStore::complete_batch`).
//! Review items: the triage transitions used by the queue and bulk actions.
//!
//! Nothing here writes. Each function checks the precondition against the
//! state the caller last observed and returns a conditional patch; the store
//! re-checks that state when the patch lands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{StaleStateError, ValidationError};
use crate::models::{
    CaseStatus, ItemStatus, QualityRatings, ReviewDecision, ReviewItem, ReviewerRecord,
    TrainingCase,
};
use crate::store::{CasePatch, ItemPatch};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReviewError {
    #[error(transparent)]
    Stale(#[from] StaleStateError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// ---------------------------------------------------------------------------
// Training cases
// ---------------------------------------------------------------------------

/// One reviewer's verdict on a case, with optional ratings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDecision {
    pub reviewer_id: String,
    pub decision: ReviewDecision,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub ratings: Option<QualityRatings>,
}

impl CaseDecision {
    pub fn approve(reviewer_id: &str) -> Self {
        Self {
            reviewer_id: reviewer_id.to_string(),
            decision: ReviewDecision::Approved,
            comment: None,
            ratings: None,
        }
    }

    pub fn reject(reviewer_id: &str) -> Self {
        Self {
            decision: ReviewDecision::Rejected,
            ..Self::approve(reviewer_id)
        }
    }

    pub fn with_ratings(mut self, ratings: QualityRatings) -> Self {
        self.ratings = Some(ratings);
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    fn target(&self) -> CaseStatus {
        match self.decision {
            ReviewDecision::Approved => CaseStatus::Approved,
            ReviewDecision::Rejected => CaseStatus::Rejected,
        }
    }

    fn attempted(&self) -> &'static str {
        match self.decision {
            ReviewDecision::Approved => "approve",
            ReviewDecision::Rejected => "reject",
        }
    }
}

/// Legal case edges. `approved → trained` is listed but only batch
/// completion takes it.
pub fn case_transition_allowed(from: CaseStatus, to: CaseStatus) -> bool {
    matches!(
        (from, to),
        (CaseStatus::Pending, CaseStatus::Approved)
            | (CaseStatus::Pending, CaseStatus::Rejected)
            | (CaseStatus::Approved, CaseStatus::Trained)
    )
}

/// Validate a decision against the observed case and build the write.
///
/// Status, audit record and ratings travel in one patch.
pub fn decide(
    case: &TrainingCase,
    decision: &CaseDecision,
    at: DateTime<Utc>,
) -> Result<CasePatch, ReviewError> {
    if case.status != CaseStatus::Pending {
        return Err(StaleStateError::new(
            "training_case",
            &case.id,
            CaseStatus::Pending,
            case.status,
            decision.attempted(),
        )
        .into());
    }
    let reviewer = decision.reviewer_id.trim();
    if reviewer.is_empty() {
        return Err(ValidationError::MissingReviewer.into());
    }
    if let Some(ratings) = &decision.ratings {
        if !ratings.is_valid() {
            return Err(ValidationError::InvalidRatings.into());
        }
    }

    Ok(CasePatch {
        operation: decision.attempted().to_string(),
        expected_status: CaseStatus::Pending,
        status: decision.target(),
        append_reviewer: Some(ReviewerRecord {
            reviewer_id: reviewer.to_string(),
            decision: decision.decision,
            timestamp: at,
            comment: decision.comment.clone().filter(|c| !c.trim().is_empty()),
        }),
        ratings: decision.ratings,
    })
}

pub fn approve(
    case: &TrainingCase,
    reviewer_id: &str,
    ratings: Option<QualityRatings>,
    at: DateTime<Utc>,
) -> Result<CasePatch, ReviewError> {
    let mut decision = CaseDecision::approve(reviewer_id);
    decision.ratings = ratings;
    decide(case, &decision, at)
}

pub fn reject(
    case: &TrainingCase,
    reviewer_id: &str,
    comment: Option<&str>,
    at: DateTime<Utc>,
) -> Result<CasePatch, ReviewError> {
    let mut decision = CaseDecision::reject(reviewer_id);
    decision.comment = comment.map(str::to_string);
    decide(case, &decision, at)
}

// ---------------------------------------------------------------------------
// Review items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum ItemTransition {
    /// `None` clears the assignee.
    Assign { assignee: Option<String> },
    StartReview { reviewer: String },
    MarkReviewed { reviewer: String },
    Escalate,
    PromoteToTraining,
}

impl ItemTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Assign { .. } => "assign",
            Self::StartReview { .. } => "start_review",
            Self::MarkReviewed { .. } => "mark_reviewed",
            Self::Escalate => "escalate",
            Self::PromoteToTraining => "promote_to_training",
        }
    }

    /// States the transition may start from.
    pub fn allowed_from(&self) -> &'static [ItemStatus] {
        use ItemStatus::*;
        match self {
            Self::Assign { .. } => &[Pending, InReview, Escalated],
            Self::StartReview { .. } => &[Pending],
            Self::MarkReviewed { .. } => &[Pending, InReview],
            Self::Escalate => &[Pending, InReview, Reviewed],
            Self::PromoteToTraining => &[Reviewed, Escalated],
        }
    }
}

/// Check `transition` against the observed item and build the write.
pub fn plan_item(
    item: &ReviewItem,
    transition: &ItemTransition,
    at: DateTime<Utc>,
) -> Result<ItemPatch, ReviewError> {
    let allowed = transition.allowed_from();
    if !allowed.contains(&item.status) {
        let expected = allowed
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join("|");
        return Err(StaleStateError::new(
            "review_item",
            &item.id,
            expected,
            item.status,
            transition.name(),
        )
        .into());
    }

    let mut patch = ItemPatch::expecting(item.status, transition.name());
    match transition {
        ItemTransition::Assign { assignee } => {
            patch.assignee = Some(assignee.as_deref().map(str::trim).map(str::to_string));
        }
        ItemTransition::StartReview { reviewer } => {
            let reviewer = require_reviewer(reviewer)?;
            patch.status = Some(ItemStatus::InReview);
            patch.assignee = Some(Some(reviewer));
        }
        ItemTransition::MarkReviewed { reviewer } => {
            let reviewer = require_reviewer(reviewer)?;
            patch.status = Some(ItemStatus::Reviewed);
            patch.reviewed_by = Some(reviewer);
            patch.reviewed_at = Some(at);
        }
        ItemTransition::Escalate => patch.status = Some(ItemStatus::Escalated),
        ItemTransition::PromoteToTraining => patch.status = Some(ItemStatus::Training),
    }
    Ok(patch)
}

fn require_reviewer(reviewer: &str) -> Result<String, ValidationError> {
    let reviewer = reviewer.trim();
    if reviewer.is_empty() {
        return Err(ValidationError::MissingReviewer);
    }
    Ok(reviewer.to_string())
}

pub fn assign(item: &ReviewItem, assignee: Option<&str>) -> Result<ItemPatch, ReviewError> {
    let transition = ItemTransition::Assign {
        assignee: assignee.map(str::to_string),
    };
    plan_item(item, &transition, Utc::now())
}

pub fn start_review(item: &ReviewItem, reviewer: &str) -> Result<ItemPatch, ReviewError> {
    let transition = ItemTransition::StartReview {
        reviewer: reviewer.to_string(),
    };
    plan_item(item, &transition, Utc::now())
}

pub fn mark_reviewed(
    item: &ReviewItem,
    reviewer: &str,
    at: DateTime<Utc>,
) -> Result<ItemPatch, ReviewError> {
    let transition = ItemTransition::MarkReviewed {
        reviewer: reviewer.to_string(),
    };
    plan_item(item, &transition, at)
}

pub fn escalate(item: &ReviewItem) -> Result<ItemPatch, ReviewError> {
    plan_item(item, &ItemTransition::Escalate, Utc::now())
}

pub fn promote_to_training(item: &ReviewItem) -> Result<ItemPatch, ReviewError> {
    plan_item(item, &ItemTransition::PromoteToTraining, Utc::now())
}
