use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{CaseStatus, ErrorCategory, MessageRole, ReviewDecision};

/// A prior message of the conversation, kept for fine-tuning context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Reviewer quality ratings, each on a 1-5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityRatings {
    pub accuracy: u8,
    pub completeness: u8,
    pub tone: u8,
}

impl QualityRatings {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn is_valid(&self) -> bool {
        [self.accuracy, self.completeness, self.tone]
            .iter()
            .all(|v| (Self::MIN..=Self::MAX).contains(v))
    }
}

/// One entry in a case's reviewer audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerRecord {
    pub reviewer_id: String,
    pub decision: ReviewDecision,
    pub timestamp: DateTime<Utc>,
    pub comment: Option<String>,
}

/// A flagged AI response promoted for fine-tuning review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingCase {
    pub id: String,
    /// Review item the flagged message came from.
    pub review_item_id: String,
    pub message_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub corrected_response: String,
    pub error_category: ErrorCategory,
    /// Detector confidence, 0.0-1.0.
    pub confidence: f32,
    pub context: Vec<ContextMessage>,
    pub status: CaseStatus,
    pub ratings: Option<QualityRatings>,
    pub reviewers: Vec<ReviewerRecord>,
    pub created_at: DateTime<Utc>,
}

impl TrainingCase {
    pub fn last_decision(&self) -> Option<&ReviewerRecord> {
        self.reviewers.last()
    }

    /// `approved`/`rejected` imply at least one reviewer record.
    pub fn audit_consistent(&self) -> bool {
        match self.status {
            CaseStatus::Approved | CaseStatus::Rejected => !self.reviewers.is_empty(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::training_case;

    #[test]
    fn ratings_bounds() {
        let ok = QualityRatings { accuracy: 1, completeness: 5, tone: 3 };
        assert!(ok.is_valid());
        let zero = QualityRatings { accuracy: 0, completeness: 5, tone: 3 };
        assert!(!zero.is_valid());
        let six = QualityRatings { accuracy: 2, completeness: 6, tone: 3 };
        assert!(!six.is_valid());
    }

    #[test]
    fn approved_without_reviewer_is_inconsistent() {
        let mut case = training_case("c-1", CaseStatus::Pending);
        assert!(case.audit_consistent());
        case.status = CaseStatus::Approved;
        assert!(!case.audit_consistent());
    }
}
