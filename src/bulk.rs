//! Bulk action coordinator.
//!
//! A bulk action runs the single-item transition for every selected id that
//! still resolves in the live list. Items fail independently; a failure never
//! stops its siblings. Afterwards only the succeeded ids leave the selection.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StaleStateError, ValidationError};
use crate::models::{QualityRatings, ReviewItem, TrainingCase};
use crate::review::{self, CaseDecision, ItemTransition, ReviewError};
use crate::selection::Selection;
use crate::store::{self, ItemStore, StoreError, StoreOp};

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkAction {
    Approve {
        reviewer: String,
        #[serde(default)]
        ratings: Option<QualityRatings>,
    },
    Reject {
        reviewer: String,
        #[serde(default)]
        comment: Option<String>,
    },
    Assign { assignee: Option<String> },
    StartReview { reviewer: String },
    MarkReviewed { reviewer: String },
    Escalate,
    PromoteToTraining,
}

impl BulkAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Assign { .. } => "assign",
            Self::StartReview { .. } => "start_review",
            Self::MarkReviewed { .. } => "mark_reviewed",
            Self::Escalate => "escalate",
            Self::PromoteToTraining => "promote_to_training",
        }
    }

    /// Approve and reject act on training cases; the rest on review items.
    pub fn targets_cases(&self) -> bool {
        matches!(self, Self::Approve { .. } | Self::Reject { .. })
    }

    fn item_transition(&self) -> Option<ItemTransition> {
        Some(match self {
            Self::Assign { assignee } => ItemTransition::Assign {
                assignee: assignee.clone(),
            },
            Self::StartReview { reviewer } => ItemTransition::StartReview {
                reviewer: reviewer.clone(),
            },
            Self::MarkReviewed { reviewer } => ItemTransition::MarkReviewed {
                reviewer: reviewer.clone(),
            },
            Self::Escalate => ItemTransition::Escalate,
            Self::PromoteToTraining => ItemTransition::PromoteToTraining,
            Self::Approve { .. } | Self::Reject { .. } => return None,
        })
    }

    fn case_decision(&self) -> Option<CaseDecision> {
        match self {
            Self::Approve { reviewer, ratings } => {
                let mut decision = CaseDecision::approve(reviewer);
                decision.ratings = *ratings;
                Some(decision)
            }
            Self::Reject { reviewer, comment } => {
                let mut decision = CaseDecision::reject(reviewer);
                decision.comment = comment.clone();
                Some(decision)
            }
            _ => None,
        }
    }
}

/// Why one member of a bulk action failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BulkFailure {
    Stale { error: StaleStateError },
    Invalid { error: ValidationError },
    Store { message: String },
}

impl BulkFailure {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

impl From<ReviewError> for BulkFailure {
    fn from(e: ReviewError) -> Self {
        match e {
            ReviewError::Stale(error) => Self::Stale { error },
            ReviewError::Validation(error) => Self::Invalid { error },
        }
    }
}

impl From<StoreError> for BulkFailure {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(error) => Self::Stale { error },
            other => Self::Store {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, BulkFailure)>,
}

impl BulkOutcome {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failed.iter().map(|(id, _)| id.as_str()).collect()
    }
}

/// Current local state of the entities a bulk action may touch.
#[derive(Debug, Clone, Copy)]
pub struct Subjects<'a> {
    pub items: &'a [ReviewItem],
    pub cases: &'a [TrainingCase],
}

/// Requests to send plus members already refused by the local precheck.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkPlan {
    pub action: &'static str,
    /// Every member, in list order.
    pub order: Vec<String>,
    pub requests: Vec<(String, StoreOp)>,
    pub rejected: Vec<(String, BulkFailure)>,
}

// ═══════════════════════════════════════════════════════════
// Planning
// ═══════════════════════════════════════════════════════════

/// Check each target against local state and build its conditional write.
///
/// `targets` must already be the selection ∩ live list; ids not found in
/// `subjects` are dropped.
pub fn plan_bulk<S: AsRef<str>>(
    action: &BulkAction,
    targets: &[S],
    subjects: Subjects<'_>,
    at: DateTime<Utc>,
) -> BulkPlan {
    let mut plan = BulkPlan {
        action: action.name(),
        order: Vec::new(),
        requests: Vec::new(),
        rejected: Vec::new(),
    };

    for id in targets.iter().map(|t| t.as_ref()) {
        let planned = if let Some(decision) = action.case_decision() {
            let Some(case) = subjects.cases.iter().find(|c| c.id == id) else {
                continue;
            };
            review::decide(case, &decision, at).map(|patch| StoreOp::UpdateCase {
                id: id.to_string(),
                patch,
            })
        } else if let Some(transition) = action.item_transition() {
            let Some(item) = subjects.items.iter().find(|i| i.id == id) else {
                continue;
            };
            review::plan_item(item, &transition, at).map(|patch| StoreOp::UpdateItem {
                id: id.to_string(),
                patch,
            })
        } else {
            continue;
        };

        plan.order.push(id.to_string());
        match planned {
            Ok(op) => plan.requests.push((id.to_string(), op)),
            Err(e) => plan.rejected.push((id.to_string(), e.into())),
        }
    }
    plan
}

// ═══════════════════════════════════════════════════════════
// Tracking
// ═══════════════════════════════════════════════════════════

/// Collects per-member results of an in-flight bulk action.
#[derive(Debug, Clone)]
pub struct BulkTracker {
    action: &'static str,
    order: Vec<String>,
    awaiting: BTreeSet<String>,
    succeeded: BTreeSet<String>,
    failed: BTreeMap<String, BulkFailure>,
}

impl BulkTracker {
    /// Start tracking. Pre-rejected members count as failed already.
    pub fn new(plan: &BulkPlan) -> Self {
        Self {
            action: plan.action,
            order: plan.order.clone(),
            awaiting: plan.requests.iter().map(|(id, _)| id.clone()).collect(),
            succeeded: BTreeSet::new(),
            failed: plan.rejected.iter().cloned().collect(),
        }
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    pub fn awaits(&self, id: &str) -> bool {
        self.awaiting.contains(id)
    }

    pub fn record(&mut self, id: &str, result: Result<(), BulkFailure>) {
        if !self.awaiting.remove(id) {
            return;
        }
        match result {
            Ok(()) => {
                self.succeeded.insert(id.to_string());
            }
            Err(failure) => {
                self.failed.insert(id.to_string(), failure);
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.awaiting.is_empty()
    }

    /// Results in list order.
    pub fn finish(mut self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for id in self.order {
            if self.succeeded.contains(&id) {
                outcome.succeeded.push(id);
            } else if let Some(failure) = self.failed.remove(&id) {
                outcome.failed.push((id, failure));
            }
        }
        outcome
    }
}

// ═══════════════════════════════════════════════════════════
// Synchronous apply
// ═══════════════════════════════════════════════════════════

/// Run a bulk action directly against a store, one conditional write per
/// member, then drop the succeeded ids from `selection`.
///
/// For embedders without an event loop; the session issues the same writes
/// as requests instead.
pub fn apply_bulk(
    action: &BulkAction,
    selection: &mut Selection,
    live: &[String],
    subjects: Subjects<'_>,
    store: &dyn ItemStore,
    at: DateTime<Utc>,
) -> BulkOutcome {
    let targets = selection.intersect_live(live);
    let plan = plan_bulk(action, &targets, subjects, at);
    let mut tracker = BulkTracker::new(&plan);

    for (id, op) in &plan.requests {
        let result = store::execute(store, op).map(|_| ()).map_err(BulkFailure::from);
        if let Err(failure) = &result {
            tracing::warn!(item_id = %id, action = plan.action, ?failure, "Bulk member failed");
        }
        tracker.record(id, result);
    }

    let outcome = tracker.finish();
    selection.remove_many(&outcome.succeeded);
    tracing::info!(
        action = plan.action,
        succeeded = outcome.succeeded.len(),
        failed = outcome.failed.len(),
        "Bulk action finished"
    );
    outcome
}
