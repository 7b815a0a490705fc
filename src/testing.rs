//! Shared test fixtures.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::models::*;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn review_item(id: &str) -> ReviewItem {
    ReviewItem {
        id: id.into(),
        title: format!("Conversation {id}"),
        service: "support".into(),
        score: 70,
        issues: vec![],
        status: ItemStatus::Pending,
        assignee: None,
        priority: Priority::Medium,
        created_at: base_time(),
        ended_at: None,
        risk_score: 10,
        reviewed_by: None,
        reviewed_at: None,
    }
}

fn issue(message_id: &str, category: ErrorCategory, severity: IssueSeverity) -> FlaggedIssue {
    FlaggedIssue {
        message_id: message_id.into(),
        category,
        severity,
        description: format!("{category} on {message_id}"),
    }
}

/// Twelve items; exactly conv-03 and conv-09 are pending, score <= 50 and
/// critical/high priority.
pub fn fixture_items() -> Vec<ReviewItem> {
    let rows: [(&str, ItemStatus, u8, Priority, &str, &str); 12] = [
        ("conv-01", ItemStatus::Pending, 80, Priority::High, "billing", "Refund request"),
        ("conv-02", ItemStatus::InReview, 30, Priority::Critical, "support", "Password reset loop"),
        ("conv-03", ItemStatus::Pending, 45, Priority::Critical, "billing", "Refund after 40 days"),
        ("conv-04", ItemStatus::Pending, 20, Priority::Medium, "support", "Shipping delay"),
        ("conv-05", ItemStatus::Reviewed, 10, Priority::High, "billing", "Duplicate charge"),
        ("conv-06", ItemStatus::Pending, 51, Priority::High, "sales", "Plan upgrade"),
        ("conv-07", ItemStatus::Escalated, 40, Priority::Critical, "support", "Account takeover"),
        ("conv-08", ItemStatus::Pending, 70, Priority::Low, "billing", "Invoice copy"),
        ("conv-09", ItemStatus::Pending, 50, Priority::High, "support", "Cancel subscription"),
        ("conv-10", ItemStatus::Pending, 35, Priority::Low, "sales", "Discount code"),
        ("conv-11", ItemStatus::Training, 5, Priority::Critical, "billing", "Chargeback threat"),
        ("conv-12", ItemStatus::InReview, 90, Priority::Medium, "sales", "Demo booking"),
    ];

    rows.iter()
        .enumerate()
        .map(|(i, (id, status, score, priority, service, title))| {
            let mut item = review_item(id);
            item.status = *status;
            item.score = *score;
            item.priority = *priority;
            item.service = (*service).into();
            item.title = (*title).into();
            item.created_at = base_time() + Duration::hours(i as i64);
            item.risk_score = 100 - *score;
            if *score < 50 {
                item.issues = vec![
                    issue("m-2", ErrorCategory::Inaccuracy, IssueSeverity::High),
                    issue("m-5", ErrorCategory::Protocol, IssueSeverity::Medium),
                ];
            }
            if *status == ItemStatus::Reviewed {
                item.reviewed_by = Some("rev-7".into());
                item.reviewed_at = Some(item.created_at + Duration::hours(2));
            }
            item
        })
        .collect()
}

pub fn training_case(id: &str, status: CaseStatus) -> TrainingCase {
    let reviewers = match status {
        CaseStatus::Approved | CaseStatus::Trained => vec![ReviewerRecord {
            reviewer_id: "rev-7".into(),
            decision: ReviewDecision::Approved,
            timestamp: base_time(),
            comment: None,
        }],
        CaseStatus::Rejected => vec![ReviewerRecord {
            reviewer_id: "rev-7".into(),
            decision: ReviewDecision::Rejected,
            timestamp: base_time(),
            comment: Some("not a model error".into()),
        }],
        CaseStatus::Pending => vec![],
    };
    TrainingCase {
        id: id.into(),
        review_item_id: "conv-03".into(),
        message_id: "m-2".into(),
        user_message: "Can I still get my money back?".into(),
        ai_response: "Refunds are available for 90 days.".into(),
        corrected_response: "Refunds are available for 30 days after purchase.".into(),
        error_category: ErrorCategory::Inaccuracy,
        confidence: 0.82,
        context: vec![ContextMessage {
            role: MessageRole::User,
            content: "I bought the annual plan last month.".into(),
        }],
        status,
        ratings: None,
        reviewers,
        created_at: base_time(),
    }
}

pub fn batch(id: &str, case_ids: &[&str], status: BatchStatus) -> TrainingBatch {
    TrainingBatch {
        id: id.into(),
        name: format!("Batch {id}"),
        case_ids: case_ids.iter().map(|s| s.to_string()).collect(),
        status,
        progress: (status == BatchStatus::Training).then_some(0),
        metrics: (status == BatchStatus::Completed).then_some(BatchMetrics {
            accuracy: 0.91,
            improvement: 0.04,
        }),
        failure_reason: None,
        created_at: base_time(),
        started_at: None,
        finished_at: None,
    }
}
