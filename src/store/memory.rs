//! In-process `ItemStore`, used by embedders that keep their own persistence
//! and by the test suite.

use std::sync::{Mutex, MutexGuard};

use super::{BatchPatch, CasePatch, ItemPatch, ItemStore, StoreError};
use crate::error::StaleStateError;
use crate::models::*;

#[derive(Debug, Default)]
struct Inner {
    items: Vec<ReviewItem>,
    cases: Vec<TrainingCase>,
    batches: Vec<TrainingBatch>,
    saved_filters: Vec<SavedFilter>,
    unavailable: bool,
}

/// Mutex-guarded vectors; every write is checked and applied under one lock.
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    inner: Mutex<Inner>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(
        items: Vec<ReviewItem>,
        cases: Vec<TrainingCase>,
        batches: Vec<TrainingBatch>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items,
                cases,
                batches,
                ..Default::default()
            }),
        }
    }

    /// Simulate an outage: every subsequent call fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }

    /// Overwrite a stored case, bypassing the state machine. Stands in for
    /// another reviewer's session writing to the shared store.
    pub fn put_case(&self, case: TrainingCase) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        match inner.cases.iter_mut().find(|c| c.id == case.id) {
            Some(slot) => *slot = case,
            None => inner.cases.push(case),
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::LockPoisoned)?;
        if inner.unavailable {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }
        Ok(inner)
    }
}

fn not_found(entity: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

impl ItemStore for InMemoryItemStore {
    fn list_review_items(&self) -> Result<Vec<ReviewItem>, StoreError> {
        Ok(self.lock()?.items.clone())
    }

    fn list_training_cases(&self) -> Result<Vec<TrainingCase>, StoreError> {
        Ok(self.lock()?.cases.clone())
    }

    fn list_batches(&self) -> Result<Vec<TrainingBatch>, StoreError> {
        Ok(self.lock()?.batches.clone())
    }

    fn list_saved_filters(&self) -> Result<Vec<SavedFilter>, StoreError> {
        Ok(self.lock()?.saved_filters.clone())
    }

    fn update_review_item(&self, id: &str, patch: &ItemPatch) -> Result<ReviewItem, StoreError> {
        let mut inner = self.lock()?;
        let item = inner
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| not_found("review_item", id))?;
        patch.check(item, &patch.operation)?;
        patch.apply_to(item);
        Ok(item.clone())
    }

    fn update_training_case(
        &self,
        id: &str,
        patch: &CasePatch,
    ) -> Result<TrainingCase, StoreError> {
        let mut inner = self.lock()?;
        let case = inner
            .cases
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found("training_case", id))?;
        patch.check(case, &patch.operation)?;
        patch.apply_to(case);
        Ok(case.clone())
    }

    fn create_saved_filter(&self, filter: &SavedFilter) -> Result<(), StoreError> {
        self.lock()?.saved_filters.push(filter.clone());
        Ok(())
    }

    fn delete_saved_filter(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let before = inner.saved_filters.len();
        inner.saved_filters.retain(|f| f.id != id);
        if inner.saved_filters.len() == before {
            return Err(not_found("saved_filter", id));
        }
        Ok(())
    }

    fn create_batch(&self, batch: &TrainingBatch) -> Result<(), StoreError> {
        self.lock()?.batches.push(batch.clone());
        Ok(())
    }

    fn update_batch(&self, id: &str, patch: &BatchPatch) -> Result<TrainingBatch, StoreError> {
        let mut inner = self.lock()?;
        let batch = inner
            .batches
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| not_found("training_batch", id))?;
        patch.check(batch, patch.status.as_str())?;
        patch.apply_to(batch);
        Ok(batch.clone())
    }

    fn complete_batch(
        &self,
        id: &str,
        patch: &BatchPatch,
    ) -> Result<(TrainingBatch, Vec<TrainingCase>), StoreError> {
        let mut inner = self.lock()?;
        let batch_idx = inner
            .batches
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| not_found("training_batch", id))?;
        patch.check(&inner.batches[batch_idx], "complete")?;

        let case_ids = inner.batches[batch_idx].case_ids.clone();

        // Validate every case before touching any of them.
        for case_id in &case_ids {
            let case = inner
                .cases
                .iter()
                .find(|c| &c.id == case_id)
                .ok_or_else(|| not_found("training_case", case_id))?;
            if case.status != CaseStatus::Approved {
                return Err(StaleStateError::new(
                    "training_case",
                    case_id,
                    CaseStatus::Approved,
                    case.status,
                    "mark_trained",
                )
                .into());
            }
        }

        patch.apply_to(&mut inner.batches[batch_idx]);
        let mut trained = Vec::with_capacity(case_ids.len());
        for case in inner.cases.iter_mut().filter(|c| case_ids.contains(&c.id)) {
            case.status = CaseStatus::Trained;
            trained.push(case.clone());
        }
        Ok((inner.batches[batch_idx].clone(), trained))
    }
}
