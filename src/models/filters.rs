use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{CaseStatus, ErrorCategory, ItemStatus, Priority};

/// Inclusive score range `[lo, hi]`. `[0, 100]` is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub lo: u8,
    pub hi: u8,
}

impl ScoreRange {
    pub const FULL: ScoreRange = ScoreRange { lo: 0, hi: 100 };

    pub fn new(lo: u8, hi: u8) -> Self {
        Self { lo, hi }
    }

    pub fn is_well_formed(&self) -> bool {
        self.lo <= self.hi
    }

    pub fn contains(&self, score: u8) -> bool {
        self.lo <= score && score <= self.hi
    }
}

impl Default for ScoreRange {
    fn default() -> Self {
        Self::FULL
    }
}

/// Which assignee an item must have.
///
/// Serialized as a bare string: `"unassigned"`, `"current_user"`, or an
/// exact assignee id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssigneeSelector {
    Exact(String),
    Unassigned,
    /// Must be resolved to `Exact` by the caller before evaluation.
    CurrentUser,
}

impl From<String> for AssigneeSelector {
    fn from(s: String) -> Self {
        match s.as_str() {
            "unassigned" => Self::Unassigned,
            "current_user" => Self::CurrentUser,
            _ => Self::Exact(s),
        }
    }
}

impl From<AssigneeSelector> for String {
    fn from(sel: AssigneeSelector) -> Self {
        match sel {
            AssigneeSelector::Exact(id) => id,
            AssigneeSelector::Unassigned => "unassigned".into(),
            AssigneeSelector::CurrentUser => "current_user".into(),
        }
    }
}

/// Inclusive creation-date window; either bound may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn is_well_formed(&self) -> bool {
        match (self.from, self.to) {
            (Some(from), Some(to)) => from <= to,
            _ => true,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// Composite predicate over review items.
///
/// Every empty/absent facet imposes no constraint, so `FilterSpec::default()`
/// matches every item. Specs are values: edits build a new spec.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    pub statuses: BTreeSet<ItemStatus>,
    pub services: BTreeSet<String>,
    pub score_range: ScoreRange,
    pub has_issues: Option<bool>,
    pub issue_categories: BTreeSet<ErrorCategory>,
    pub priorities: BTreeSet<Priority>,
    pub assigned_to: Option<AssigneeSelector>,
    pub date_range: Option<DateRange>,
    pub search: String,
}

impl FilterSpec {
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = ItemStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_services<S: Into<String>>(mut self, services: impl IntoIterator<Item = S>) -> Self {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_score_range(mut self, lo: u8, hi: u8) -> Self {
        self.score_range = ScoreRange::new(lo, hi);
        self
    }

    pub fn with_has_issues(mut self, has_issues: Option<bool>) -> Self {
        self.has_issues = has_issues;
        self
    }

    pub fn with_issue_categories(
        mut self,
        categories: impl IntoIterator<Item = ErrorCategory>,
    ) -> Self {
        self.issue_categories = categories.into_iter().collect();
        self
    }

    pub fn with_priorities(mut self, priorities: impl IntoIterator<Item = Priority>) -> Self {
        self.priorities = priorities.into_iter().collect();
        self
    }

    pub fn with_assignee(mut self, selector: Option<AssigneeSelector>) -> Self {
        self.assigned_to = selector;
        self
    }

    pub fn with_date_range(mut self, range: Option<DateRange>) -> Self {
        self.date_range = range;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    /// True when no facet constrains anything.
    pub fn is_identity(&self) -> bool {
        *self == FilterSpec::default()
    }
}

/// A named, persisted FilterSpec preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedFilter {
    pub id: String,
    pub name: String,
    pub spec: FilterSpec,
    pub created_by: String,
    /// Advisory: the engine does not enforce one default per creator.
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// Filter over the training-case queue.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseFilter {
    pub statuses: BTreeSet<CaseStatus>,
    pub categories: BTreeSet<ErrorCategory>,
    pub search: String,
}
