//! SQLite-backed `ItemStore`.
//!
//! Conditional writes are `UPDATE ... WHERE id = ? AND status = ?`; a zero row
//! count is resolved into NotFound or Conflict by re-reading the row.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{BatchPatch, CasePatch, ItemPatch, ItemStore, StoreError};
use crate::db::{self, format_ts, parse_opt_ts, parse_ts, DatabaseError};
use crate::error::StaleStateError;
use crate::models::*;

pub struct SqliteItemStore {
    conn: Mutex<Connection>,
}

impl SqliteItemStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = db::open_database(path)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = db::open_memory_database()?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Ingest a review item produced by the upstream conversation pipeline.
    pub fn insert_review_item(&self, item: &ReviewItem) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO review_items
             (id, title, service, score, issues, status, assignee, priority,
              created_at, ended_at, risk_score, reviewed_by, reviewed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                item.id,
                item.title,
                item.service,
                item.score,
                serde_json::to_string(&item.issues)?,
                item.status.as_str(),
                item.assignee,
                item.priority.as_str(),
                format_ts(&item.created_at),
                item.ended_at.as_ref().map(format_ts),
                item.risk_score,
                item.reviewed_by,
                item.reviewed_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    /// Ingest a training case derived from a flagged message.
    pub fn insert_training_case(&self, case: &TrainingCase) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO training_cases
             (id, review_item_id, message_id, user_message, ai_response, corrected_response,
              error_category, confidence, context, status, ratings, reviewers, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                case.id,
                case.review_item_id,
                case.message_id,
                case.user_message,
                case.ai_response,
                case.corrected_response,
                case.error_category.as_str(),
                case.confidence as f64,
                serde_json::to_string(&case.context)?,
                case.status.as_str(),
                case.ratings.map(|r| serde_json::to_string(&r)).transpose()?,
                serde_json::to_string(&case.reviewers)?,
                format_ts(&case.created_at),
            ],
        )?;
        Ok(())
    }
}

// ═══════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════

const ITEM_COLUMNS: &str = "id, title, service, score, issues, status, assignee, priority,
     created_at, ended_at, risk_score, reviewed_by, reviewed_at";

const CASE_COLUMNS: &str = "id, review_item_id, message_id, user_message, ai_response,
     corrected_response, error_category, confidence, context, status, ratings, reviewers,
     created_at";

const BATCH_COLUMNS: &str = "id, name, case_ids, status, progress, metrics, failure_reason,
     created_at, started_at, finished_at";

struct ItemRow {
    id: String,
    title: String,
    service: String,
    score: u8,
    issues: String,
    status: String,
    assignee: Option<String>,
    priority: String,
    created_at: String,
    ended_at: Option<String>,
    risk_score: u8,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
}

impl ItemRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            service: row.get(2)?,
            score: row.get(3)?,
            issues: row.get(4)?,
            status: row.get(5)?,
            assignee: row.get(6)?,
            priority: row.get(7)?,
            created_at: row.get(8)?,
            ended_at: row.get(9)?,
            risk_score: row.get(10)?,
            reviewed_by: row.get(11)?,
            reviewed_at: row.get(12)?,
        })
    }

    fn into_item(self) -> Result<ReviewItem, StoreError> {
        Ok(ReviewItem {
            issues: serde_json::from_str(&self.issues)?,
            status: ItemStatus::from_str(&self.status)?,
            priority: Priority::from_str(&self.priority)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            ended_at: parse_opt_ts("ended_at", self.ended_at)?,
            reviewed_at: parse_opt_ts("reviewed_at", self.reviewed_at)?,
            id: self.id,
            title: self.title,
            service: self.service,
            score: self.score,
            assignee: self.assignee,
            risk_score: self.risk_score,
            reviewed_by: self.reviewed_by,
        })
    }
}

struct CaseRow {
    id: String,
    review_item_id: String,
    message_id: String,
    user_message: String,
    ai_response: String,
    corrected_response: String,
    error_category: String,
    confidence: f64,
    context: String,
    status: String,
    ratings: Option<String>,
    reviewers: String,
    created_at: String,
}

impl CaseRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            review_item_id: row.get(1)?,
            message_id: row.get(2)?,
            user_message: row.get(3)?,
            ai_response: row.get(4)?,
            corrected_response: row.get(5)?,
            error_category: row.get(6)?,
            confidence: row.get(7)?,
            context: row.get(8)?,
            status: row.get(9)?,
            ratings: row.get(10)?,
            reviewers: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_case(self) -> Result<TrainingCase, StoreError> {
        Ok(TrainingCase {
            error_category: ErrorCategory::from_str(&self.error_category)?,
            confidence: self.confidence as f32,
            context: serde_json::from_str(&self.context)?,
            status: CaseStatus::from_str(&self.status)?,
            ratings: self.ratings.as_deref().map(serde_json::from_str).transpose()?,
            reviewers: serde_json::from_str(&self.reviewers)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            id: self.id,
            review_item_id: self.review_item_id,
            message_id: self.message_id,
            user_message: self.user_message,
            ai_response: self.ai_response,
            corrected_response: self.corrected_response,
        })
    }
}

struct BatchRow {
    id: String,
    name: String,
    case_ids: String,
    status: String,
    progress: Option<u8>,
    metrics: Option<String>,
    failure_reason: Option<String>,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
}

impl BatchRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            case_ids: row.get(2)?,
            status: row.get(3)?,
            progress: row.get(4)?,
            metrics: row.get(5)?,
            failure_reason: row.get(6)?,
            created_at: row.get(7)?,
            started_at: row.get(8)?,
            finished_at: row.get(9)?,
        })
    }

    fn into_batch(self) -> Result<TrainingBatch, StoreError> {
        Ok(TrainingBatch {
            case_ids: serde_json::from_str(&self.case_ids)?,
            status: BatchStatus::from_str(&self.status)?,
            metrics: self.metrics.as_deref().map(serde_json::from_str).transpose()?,
            created_at: parse_ts("created_at", &self.created_at)?,
            started_at: parse_opt_ts("started_at", self.started_at)?,
            finished_at: parse_opt_ts("finished_at", self.finished_at)?,
            id: self.id,
            name: self.name,
            progress: self.progress,
            failure_reason: self.failure_reason,
        })
    }
}

fn fetch_item(conn: &Connection, id: &str) -> Result<Option<ReviewItem>, StoreError> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM review_items WHERE id = ?1");
    conn.query_row(&sql, params![id], ItemRow::read)
        .optional()?
        .map(ItemRow::into_item)
        .transpose()
}

fn fetch_case(conn: &Connection, id: &str) -> Result<Option<TrainingCase>, StoreError> {
    let sql = format!("SELECT {CASE_COLUMNS} FROM training_cases WHERE id = ?1");
    conn.query_row(&sql, params![id], CaseRow::read)
        .optional()?
        .map(CaseRow::into_case)
        .transpose()
}

fn fetch_batch(conn: &Connection, id: &str) -> Result<Option<TrainingBatch>, StoreError> {
    let sql = format!("SELECT {BATCH_COLUMNS} FROM training_batches WHERE id = ?1");
    conn.query_row(&sql, params![id], BatchRow::read)
        .optional()?
        .map(BatchRow::into_batch)
        .transpose()
}

fn not_found(entity: &'static str, id: &str) -> StoreError {
    DatabaseError::NotFound {
        entity_type: entity.to_string(),
        id: id.to_string(),
    }
    .into()
}

fn write_batch(conn: &Connection, id: &str, patch: &BatchPatch) -> Result<usize, StoreError> {
    let case_ids = patch
        .case_ids
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let metrics = patch.metrics.map(|m| serde_json::to_string(&m)).transpose()?;
    let changed = conn.execute(
        "UPDATE training_batches
         SET status = ?1,
             case_ids = COALESCE(?2, case_ids),
             progress = ?3,
             metrics = ?4,
             failure_reason = ?5,
             started_at = COALESCE(?6, started_at),
             finished_at = COALESCE(?7, finished_at)
         WHERE id = ?8 AND status = ?9",
        params![
            patch.status.as_str(),
            case_ids,
            patch.progress,
            metrics,
            patch.failure_reason,
            patch.started_at.as_ref().map(format_ts),
            patch.finished_at.as_ref().map(format_ts),
            id,
            patch.expected_status.as_str(),
        ],
    )?;
    Ok(changed)
}

/// Conditional write of an already patched item. Zero rows means the
/// stored status moved away from `patch.expected_status`.
fn write_item(conn: &Connection, next: &ReviewItem, patch: &ItemPatch) -> Result<usize, StoreError> {
    let changed = conn.execute(
        "UPDATE review_items
         SET status = ?1, assignee = ?2, reviewed_by = ?3, reviewed_at = ?4
         WHERE id = ?5 AND status = ?6",
        params![
            next.status.as_str(),
            next.assignee,
            next.reviewed_by,
            next.reviewed_at.as_ref().map(format_ts),
            next.id,
            patch.expected_status.as_str(),
        ],
    )?;
    Ok(changed)
}

fn write_case(conn: &Connection, next: &TrainingCase, patch: &CasePatch) -> Result<usize, StoreError> {
    let changed = conn.execute(
        "UPDATE training_cases SET status = ?1, ratings = ?2, reviewers = ?3
         WHERE id = ?4 AND status = ?5",
        params![
            next.status.as_str(),
            next.ratings.map(|r| serde_json::to_string(&r)).transpose()?,
            serde_json::to_string(&next.reviewers)?,
            next.id,
            patch.expected_status.as_str(),
        ],
    )?;
    Ok(changed)
}

fn item_miss(conn: &Connection, id: &str, patch: &ItemPatch) -> StoreError {
    match fetch_item(conn, id) {
        Ok(Some(current)) => StaleStateError::new(
            "review_item",
            id,
            patch.expected_status,
            current.status,
            patch.operation.as_str(),
        )
        .into(),
        Ok(None) => not_found("review_item", id),
        Err(e) => e,
    }
}

fn case_miss(conn: &Connection, id: &str, patch: &CasePatch) -> StoreError {
    match fetch_case(conn, id) {
        Ok(Some(current)) => StaleStateError::new(
            "training_case",
            id,
            patch.expected_status,
            current.status,
            patch.operation.as_str(),
        )
        .into(),
        Ok(None) => not_found("training_case", id),
        Err(e) => e,
    }
}

/// Explain a zero-row conditional batch write.
fn batch_miss(conn: &Connection, id: &str, patch: &BatchPatch, attempted: &str) -> StoreError {
    match fetch_batch(conn, id) {
        Ok(Some(current)) => StaleStateError::new(
            "training_batch",
            id,
            patch.expected_status,
            current.status,
            attempted,
        )
        .into(),
        Ok(None) => not_found("training_batch", id),
        Err(e) => e,
    }
}

// ═══════════════════════════════════════════
// ItemStore impl
// ═══════════════════════════════════════════

impl ItemStore for SqliteItemStore {
    fn list_review_items(&self) -> Result<Vec<ReviewItem>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {ITEM_COLUMNS} FROM review_items ORDER BY created_at ASC, id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], ItemRow::read)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?.into_item()?);
        }
        Ok(items)
    }

    fn list_training_cases(&self) -> Result<Vec<TrainingCase>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {CASE_COLUMNS} FROM training_cases ORDER BY created_at ASC, id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], CaseRow::read)?;
        let mut cases = Vec::new();
        for row in rows {
            cases.push(row?.into_case()?);
        }
        Ok(cases)
    }

    fn list_batches(&self) -> Result<Vec<TrainingBatch>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {BATCH_COLUMNS} FROM training_batches ORDER BY created_at ASC, id ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], BatchRow::read)?;
        let mut batches = Vec::new();
        for row in rows {
            batches.push(row?.into_batch()?);
        }
        Ok(batches)
    }

    fn list_saved_filters(&self) -> Result<Vec<SavedFilter>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, spec, created_by, is_default, created_at
             FROM saved_filters ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut filters = Vec::new();
        for row in rows {
            let (id, name, spec, created_by, is_default, created_at) = row?;
            filters.push(SavedFilter {
                spec: serde_json::from_str(&spec)?,
                created_at: parse_ts("created_at", &created_at)?,
                id,
                name,
                created_by,
                is_default,
            });
        }
        Ok(filters)
    }

    fn update_review_item(&self, id: &str, patch: &ItemPatch) -> Result<ReviewItem, StoreError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let current = fetch_item(&tx, id)?.ok_or_else(|| not_found("review_item", id))?;
        patch.check(&current, &patch.operation)?;

        let mut next = current;
        patch.apply_to(&mut next);
        if write_item(&tx, &next, patch)? == 0 {
            return Err(item_miss(&tx, id, patch));
        }
        tx.commit()?;
        Ok(next)
    }

    fn update_training_case(
        &self,
        id: &str,
        patch: &CasePatch,
    ) -> Result<TrainingCase, StoreError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let current = fetch_case(&tx, id)?.ok_or_else(|| not_found("training_case", id))?;
        patch.check(&current, &patch.operation)?;

        let mut next = current;
        patch.apply_to(&mut next);
        if write_case(&tx, &next, patch)? == 0 {
            return Err(case_miss(&tx, id, patch));
        }
        tx.commit()?;
        Ok(next)
    }

    fn create_saved_filter(&self, filter: &SavedFilter) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO saved_filters (id, name, spec, created_by, is_default, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                filter.id,
                filter.name,
                serde_json::to_string(&filter.spec)?,
                filter.created_by,
                filter.is_default,
                format_ts(&filter.created_at),
            ],
        )?;
        Ok(())
    }

    fn delete_saved_filter(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM saved_filters WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(not_found("saved_filter", id));
        }
        Ok(())
    }

    fn create_batch(&self, batch: &TrainingBatch) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO training_batches
             (id, name, case_ids, status, progress, metrics, failure_reason,
              created_at, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                batch.id,
                batch.name,
                serde_json::to_string(&batch.case_ids)?,
                batch.status.as_str(),
                batch.progress,
                batch.metrics.map(|m| serde_json::to_string(&m)).transpose()?,
                batch.failure_reason,
                format_ts(&batch.created_at),
                batch.started_at.as_ref().map(format_ts),
                batch.finished_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    fn update_batch(&self, id: &str, patch: &BatchPatch) -> Result<TrainingBatch, StoreError> {
        let conn = self.conn()?;
        if write_batch(&conn, id, patch)? == 0 {
            return Err(batch_miss(&conn, id, patch, patch.status.as_str()));
        }
        fetch_batch(&conn, id)?.ok_or_else(|| not_found("training_batch", id))
    }

    fn complete_batch(
        &self,
        id: &str,
        patch: &BatchPatch,
    ) -> Result<(TrainingBatch, Vec<TrainingCase>), StoreError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        if write_batch(&tx, id, patch)? == 0 {
            return Err(batch_miss(&tx, id, patch, "complete"));
        }
        let batch = fetch_batch(&tx, id)?.ok_or_else(|| not_found("training_batch", id))?;

        let mut trained = Vec::with_capacity(batch.case_ids.len());
        for case_id in &batch.case_ids {
            let changed = tx.execute(
                "UPDATE training_cases SET status = 'trained' WHERE id = ?1 AND status = 'approved'",
                params![case_id],
            )?;
            if changed == 0 {
                // Dropping `tx` without commit rolls back the batch write too.
                let actual = fetch_case(&tx, case_id)?
                    .ok_or_else(|| not_found("training_case", case_id))?;
                return Err(StaleStateError::new(
                    "training_case",
                    case_id,
                    CaseStatus::Approved,
                    actual.status,
                    "mark_trained",
                )
                .into());
            }
            if let Some(case) = fetch_case(&tx, case_id)? {
                trained.push(case);
            }
        }

        tx.commit()?;
        tracing::debug!(batch_id = id, cases = trained.len(), "Batch completion committed");
        Ok((batch, trained))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{batch, fixture_items, training_case};
    use chrono::Utc;

    fn seeded() -> SqliteItemStore {
        let store = SqliteItemStore::open_in_memory().unwrap();
        for item in fixture_items() {
            store.insert_review_item(&item).unwrap();
        }
        store
    }

    #[test]
    fn items_round_trip_in_creation_order() {
        let store = seeded();
        let items = store.list_review_items().unwrap();
        assert_eq!(items, fixture_items());
    }

    #[test]
    fn conditional_item_update() {
        let store = seeded();
        let patch = ItemPatch {
            status: Some(ItemStatus::Escalated),
            ..ItemPatch::expecting(ItemStatus::Pending, "escalate")
        };
        let updated = store.update_review_item("conv-01", &patch).unwrap();
        assert_eq!(updated.status, ItemStatus::Escalated);

        // Same patch again: the row is no longer pending.
        let err = store.update_review_item("conv-01", &patch).unwrap_err();
        let stale = err.stale().expect("conflict");
        assert_eq!(stale.actual, "escalated");
    }

    #[test]
    fn update_missing_item_is_not_found() {
        let store = seeded();
        let err = store
            .update_review_item("conv-99", &ItemPatch::expecting(ItemStatus::Pending, "escalate"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "review_item", .. }));
    }

    #[test]
    fn zero_row_item_write_is_a_conflict() {
        let store = seeded();
        let conn = store.conn().unwrap();
        let mut next = fetch_item(&conn, "conv-01").unwrap().unwrap();
        conn.execute(
            "UPDATE review_items SET status = 'escalated' WHERE id = 'conv-01'",
            params![],
        )
        .unwrap();

        let patch = ItemPatch {
            status: Some(ItemStatus::InReview),
            ..ItemPatch::expecting(ItemStatus::Pending, "start_review")
        };
        patch.apply_to(&mut next);
        assert_eq!(write_item(&conn, &next, &patch).unwrap(), 0);

        let err = item_miss(&conn, "conv-01", &patch);
        let stale = err.stale().expect("conflict");
        assert_eq!(stale.actual, "escalated");
        assert_eq!(stale.attempted, "start_review");
        let stored = fetch_item(&conn, "conv-01").unwrap().unwrap();
        assert_eq!(stored.status, ItemStatus::Escalated);
    }

    #[test]
    fn zero_row_case_write_is_a_conflict() {
        let store = SqliteItemStore::open_in_memory().unwrap();
        store.insert_training_case(&training_case("c-1", CaseStatus::Pending)).unwrap();
        let conn = store.conn().unwrap();
        let mut next = fetch_case(&conn, "c-1").unwrap().unwrap();
        conn.execute(
            "UPDATE training_cases SET status = 'rejected' WHERE id = 'c-1'",
            params![],
        )
        .unwrap();

        let patch = CasePatch {
            operation: "approve".into(),
            expected_status: CaseStatus::Pending,
            status: CaseStatus::Approved,
            append_reviewer: None,
            ratings: None,
        };
        patch.apply_to(&mut next);
        assert_eq!(write_case(&conn, &next, &patch).unwrap(), 0);

        let err = case_miss(&conn, "c-1", &patch);
        let stale = err.stale().expect("conflict");
        assert_eq!(stale.actual, "rejected");
        assert_eq!(stale.attempted, "approve");
    }

    #[test]
    fn case_decision_persists_trail_and_ratings() {
        let store = SqliteItemStore::open_in_memory().unwrap();
        store.insert_training_case(&training_case("c-1", CaseStatus::Pending)).unwrap();

        let patch = CasePatch {
            operation: "approve".into(),
            expected_status: CaseStatus::Pending,
            status: CaseStatus::Approved,
            append_reviewer: Some(ReviewerRecord {
                reviewer_id: "rev-1".into(),
                decision: ReviewDecision::Approved,
                timestamp: Utc::now(),
                comment: Some("clear correction".into()),
            }),
            ratings: Some(QualityRatings { accuracy: 5, completeness: 4, tone: 4 }),
        };
        store.update_training_case("c-1", &patch).unwrap();

        let cases = store.list_training_cases().unwrap();
        assert_eq!(cases[0].status, CaseStatus::Approved);
        assert_eq!(cases[0].reviewers.len(), 1);
        assert_eq!(cases[0].ratings.unwrap().accuracy, 5);
    }

    #[test]
    fn saved_filters_keep_creation_order() {
        let store = SqliteItemStore::open_in_memory().unwrap();
        for name in ["zeta", "alpha", "alpha"] {
            store
                .create_saved_filter(&SavedFilter {
                    id: uuid::Uuid::new_v4().to_string(),
                    name: name.into(),
                    spec: FilterSpec::default().with_search(name),
                    created_by: "rev-1".into(),
                    is_default: false,
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        let names: Vec<String> = store
            .list_saved_filters()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "alpha"]);
    }

    #[test]
    fn complete_batch_rolls_back_on_stale_case() {
        let store = SqliteItemStore::open_in_memory().unwrap();
        store.insert_training_case(&training_case("c-1", CaseStatus::Approved)).unwrap();
        store.insert_training_case(&training_case("c-2", CaseStatus::Pending)).unwrap();
        store.create_batch(&batch("b-1", &["c-1", "c-2"], BatchStatus::Training)).unwrap();

        let patch = BatchPatch {
            expected_status: BatchStatus::Training,
            status: BatchStatus::Completed,
            case_ids: None,
            progress: None,
            metrics: Some(BatchMetrics { accuracy: 0.88, improvement: 0.02 }),
            failure_reason: None,
            started_at: None,
            finished_at: Some(Utc::now()),
        };
        let err = store.complete_batch("b-1", &patch).unwrap_err();
        assert!(err.stale().is_some());

        let batches = store.list_batches().unwrap();
        assert_eq!(batches[0].status, BatchStatus::Training);
        assert_eq!(batches[0].progress, Some(0));
        let cases = store.list_training_cases().unwrap();
        assert_eq!(cases[0].status, CaseStatus::Approved);
    }

    #[test]
    fn batch_update_conflict_when_status_moved() {
        let store = SqliteItemStore::open_in_memory().unwrap();
        store.create_batch(&batch("b-1", &["c-1"], BatchStatus::Ready)).unwrap();
        let patch = BatchPatch {
            expected_status: BatchStatus::Draft,
            status: BatchStatus::Ready,
            case_ids: None,
            progress: None,
            metrics: None,
            failure_reason: None,
            started_at: None,
            finished_at: None,
        };
        let err = store.update_batch("b-1", &patch).unwrap_err();
        assert_eq!(err.stale().unwrap().actual, "ready");
    }
}
