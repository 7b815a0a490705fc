use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{ErrorCategory, IssueSeverity, ItemStatus, Priority};

/// One issue flagged on a message of a reviewed conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedIssue {
    pub message_id: String,
    pub category: ErrorCategory,
    pub severity: IssueSeverity,
    pub description: String,
}

/// One AI-handled conversation awaiting (or past) human triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: String,
    /// Display name shown in the queue; searchable alongside `id`.
    pub title: String,
    /// Categorical service tag (e.g. "billing", "support").
    pub service: String,
    /// Quality score, 0-100.
    pub score: u8,
    pub issues: Vec<FlaggedIssue>,
    pub status: ItemStatus,
    pub assignee: Option<String>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Risk score, 0-100.
    pub risk_score: u8,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl ReviewItem {
    /// Count of distinct flagged message ids across `issues`.
    pub fn flagged_messages_count(&self) -> usize {
        self.issues
            .iter()
            .map(|issue| issue.message_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Set of categories present across the item's issues.
    pub fn issue_categories(&self) -> BTreeSet<ErrorCategory> {
        self.issues.iter().map(|issue| issue.category).collect()
    }

    /// `reviewed` implies a reviewer and a review timestamp, recorded together.
    pub fn attribution_consistent(&self) -> bool {
        match self.status {
            ItemStatus::Reviewed => self.reviewed_by.is_some() && self.reviewed_at.is_some(),
            _ => self.reviewed_by.is_some() == self.reviewed_at.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::review_item;

    fn issue(message_id: &str, category: ErrorCategory) -> FlaggedIssue {
        FlaggedIssue {
            message_id: message_id.into(),
            category,
            severity: IssueSeverity::Medium,
            description: "wrong refund window".into(),
        }
    }

    #[test]
    fn flagged_count_dedups_message_ids() {
        let mut item = review_item("r-1");
        item.issues = vec![
            issue("m-1", ErrorCategory::Inaccuracy),
            issue("m-1", ErrorCategory::Empathy),
            issue("m-4", ErrorCategory::Inaccuracy),
        ];
        assert_eq!(item.flagged_messages_count(), 2);
        assert_eq!(item.issue_categories().len(), 2);
    }

    #[test]
    fn empty_issues() {
        let item = review_item("r-1");
        assert!(!item.has_issues());
        assert_eq!(item.flagged_messages_count(), 0);
    }

    #[test]
    fn reviewed_requires_attribution() {
        let mut item = review_item("r-1");
        item.status = ItemStatus::Reviewed;
        assert!(!item.attribution_consistent());
        item.reviewed_by = Some("rev-1".into());
        item.reviewed_at = Some(Utc::now());
        assert!(item.attribution_consistent());
    }
}
