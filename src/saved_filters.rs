//! Saved filter presets.
//!
//! The session keeps a mirror of the store's saved-filter collection in
//! creation order. Writes go to the store first; the mirror changes only after
//! the store accepted the write, so a failed persist leaves everything as it was.

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::filter;
use crate::models::{FilterSpec, SavedFilter};
use crate::store::{ItemStore, StoreError};

#[derive(Error, Debug, Clone)]
pub enum SavedFilterError {
    #[error("Invalid filter: {0}")]
    Validation(#[from] ValidationError),

    #[error("Saved filter not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default)]
pub struct SavedFilterStore {
    filters: Vec<SavedFilter>,
}

impl SavedFilterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a list already in creation order.
    pub fn from_filters(filters: Vec<SavedFilter>) -> Self {
        Self { filters }
    }

    pub fn load(store: &dyn ItemStore) -> Result<Self, StoreError> {
        Ok(Self::from_filters(store.list_saved_filters()?))
    }

    /// Build a preset without persisting it. Used by the session, which hands
    /// the result to the store as a request and inserts it on confirmation.
    pub fn prepare(
        name: &str,
        spec: &FilterSpec,
        creator: &str,
        is_default: bool,
    ) -> Result<SavedFilter, ValidationError> {
        filter::validate(spec)?;
        Ok(SavedFilter {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            spec: spec.clone(),
            created_by: creator.to_string(),
            is_default,
            created_at: Utc::now(),
        })
    }

    /// Persist a new preset, then append it.
    pub fn create(
        &mut self,
        store: &dyn ItemStore,
        name: &str,
        spec: &FilterSpec,
        creator: &str,
    ) -> Result<SavedFilter, SavedFilterError> {
        let saved = Self::prepare(name, spec, creator, false)?;
        store.create_saved_filter(&saved)?;
        tracing::debug!(filter_id = %saved.id, creator, "Saved filter created");
        self.insert_confirmed(saved.clone());
        Ok(saved)
    }

    /// Delete from the store, then from the mirror.
    pub fn remove(&mut self, store: &dyn ItemStore, id: &str) -> Result<(), SavedFilterError> {
        if self.get(id).is_none() {
            return Err(SavedFilterError::NotFound(id.to_string()));
        }
        store.delete_saved_filter(id)?;
        self.remove_confirmed(id);
        Ok(())
    }

    pub fn insert_confirmed(&mut self, filter: SavedFilter) {
        if self.get(&filter.id).is_none() {
            self.filters.push(filter);
        }
    }

    pub fn remove_confirmed(&mut self, id: &str) {
        self.filters.retain(|f| f.id != id);
    }

    /// Creation order.
    pub fn list(&self) -> &[SavedFilter] {
        &self.filters
    }

    pub fn get(&self, id: &str) -> Option<&SavedFilter> {
        self.filters.iter().find(|f| f.id == id)
    }

    /// The spec a preset stands for. Pure.
    pub fn apply(filter: &SavedFilter) -> FilterSpec {
        filter.spec.clone()
    }

    /// First preset the creator flagged as default.
    pub fn default_for(&self, creator: &str) -> Option<&SavedFilter> {
        self.filters
            .iter()
            .find(|f| f.is_default && f.created_by == creator)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
