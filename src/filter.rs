//! Filter predicate evaluator.
//!
//! `matches` is total and side-effect free: the AND of independent per-facet
//! checks. Malformed specs never panic or error here; they simply match
//! nothing. Call-boundary validation lives in `validate`.

use crate::error::ValidationError;
use crate::models::{
    AssigneeSelector, CaseFilter, FilterSpec, ReviewItem, TrainingCase,
};

// ═══════════════════════════════════════════════════════════
// Evaluation
// ═══════════════════════════════════════════════════════════

/// Does `item` pass every facet of `spec`?
pub fn matches(item: &ReviewItem, spec: &FilterSpec) -> bool {
    status_ok(item, spec)
        && service_ok(item, spec)
        && score_ok(item, spec)
        && has_issues_ok(item, spec)
        && categories_ok(item, spec)
        && priority_ok(item, spec)
        && assignee_ok(item, spec)
        && date_ok(item, spec)
        && search_ok(item, spec)
}

/// Filter a slice, preserving input order.
pub fn apply<'a>(items: &'a [ReviewItem], spec: &FilterSpec) -> Vec<&'a ReviewItem> {
    items.iter().filter(|item| matches(item, spec)).collect()
}

fn status_ok(item: &ReviewItem, spec: &FilterSpec) -> bool {
    spec.statuses.is_empty() || spec.statuses.contains(&item.status)
}

fn service_ok(item: &ReviewItem, spec: &FilterSpec) -> bool {
    spec.services.is_empty() || spec.services.contains(&item.service)
}

fn score_ok(item: &ReviewItem, spec: &FilterSpec) -> bool {
    // An inverted range contains nothing, which is the degrade-to-empty rule.
    spec.score_range.contains(item.score)
}

fn has_issues_ok(item: &ReviewItem, spec: &FilterSpec) -> bool {
    match spec.has_issues {
        None => true,
        Some(want) => item.has_issues() == want,
    }
}

fn categories_ok(item: &ReviewItem, spec: &FilterSpec) -> bool {
    spec.issue_categories.is_empty()
        || item
            .issues
            .iter()
            .any(|issue| spec.issue_categories.contains(&issue.category))
}

fn priority_ok(item: &ReviewItem, spec: &FilterSpec) -> bool {
    spec.priorities.is_empty() || spec.priorities.contains(&item.priority)
}

fn assignee_ok(item: &ReviewItem, spec: &FilterSpec) -> bool {
    match &spec.assigned_to {
        None => true,
        Some(AssigneeSelector::Unassigned) => item.assignee.is_none(),
        Some(AssigneeSelector::Exact(id)) => item.assignee.as_deref() == Some(id.as_str()),
        // Unresolved sentinel: the evaluator has no session identity.
        Some(AssigneeSelector::CurrentUser) => false,
    }
}

fn date_ok(item: &ReviewItem, spec: &FilterSpec) -> bool {
    match &spec.date_range {
        None => true,
        Some(range) => range.contains(item.created_at),
    }
}

fn search_ok(item: &ReviewItem, spec: &FilterSpec) -> bool {
    let token = spec.search.trim();
    if token.is_empty() {
        return true;
    }
    let needle = token.to_lowercase();
    [item.id.as_str(), item.title.as_str()]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
}

// ═══════════════════════════════════════════════════════════
// Call-boundary helpers
// ═══════════════════════════════════════════════════════════

/// Replace the `current_user` sentinel with a concrete identity.
pub fn resolve_current_user(spec: &FilterSpec, user_id: &str) -> FilterSpec {
    let mut resolved = spec.clone();
    if resolved.assigned_to == Some(AssigneeSelector::CurrentUser) {
        resolved.assigned_to = Some(AssigneeSelector::Exact(user_id.to_string()));
    }
    resolved
}

/// Reject malformed specs before they are installed.
///
/// The `current_user` sentinel is allowed here; it is resolved right before
/// evaluation.
pub fn validate(spec: &FilterSpec) -> Result<(), ValidationError> {
    let range = spec.score_range;
    if range.hi > 100 {
        return Err(ValidationError::ScoreOutOfRange { value: range.hi });
    }
    if !range.is_well_formed() {
        return Err(ValidationError::InvertedScoreRange { lo: range.lo, hi: range.hi });
    }
    if let Some(dates) = &spec.date_range {
        if !dates.is_well_formed() {
            return Err(ValidationError::InvertedDateRange);
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Case queue
// ═══════════════════════════════════════════════════════════

pub fn matches_case(case: &TrainingCase, filter: &CaseFilter) -> bool {
    if !filter.statuses.is_empty() && !filter.statuses.contains(&case.status) {
        return false;
    }
    if !filter.categories.is_empty() && !filter.categories.contains(&case.error_category) {
        return false;
    }
    let token = filter.search.trim();
    if token.is_empty() {
        return true;
    }
    let needle = token.to_lowercase();
    [case.id.as_str(), case.user_message.as_str(), case.ai_response.as_str()]
        .iter()
        .any(|field| field.to_lowercase().contains(&needle))
}
