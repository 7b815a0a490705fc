//! Sort engine.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::models::{ReviewItem, SortDirection, SortField};

/// Stable, non-destructive sort. Ties keep their input order in both
/// directions.
pub fn sort<'a>(
    items: &[&'a ReviewItem],
    field: SortField,
    direction: SortDirection,
) -> Vec<&'a ReviewItem> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| {
        let ord = compare(a, b, field);
        match direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
    sorted
}

/// Ascending order for `field`. Priority ranks critical first.
pub fn compare(a: &ReviewItem, b: &ReviewItem, field: SortField) -> Ordering {
    match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::Score => a.score.cmp(&b.score),
        SortField::Priority => a.priority.cmp(&b.priority),
        SortField::Status => a.status.cmp(&b.status),
        SortField::Service => a.service.cmp(&b.service),
        SortField::RiskScore => a.risk_score.cmp(&b.risk_score),
    }
}

/// Current sort column and direction of a list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortState {
    fn default() -> Self {
        Self {
            field: SortField::CreatedAt,
            direction: SortDirection::Descending,
        }
    }
}

impl SortState {
    pub fn new(field: SortField) -> Self {
        Self {
            field,
            direction: SortDirection::Descending,
        }
    }

    /// Same field flips direction; a new field starts descending.
    pub fn select(&mut self, field: SortField) {
        if self.field == field {
            self.direction = self.direction.flipped();
        } else {
            *self = Self::new(field);
        }
    }

    pub fn apply<'a>(&self, items: &[&'a ReviewItem]) -> Vec<&'a ReviewItem> {
        sort(items, self.field, self.direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_items;

    fn ids(items: &[&ReviewItem]) -> Vec<String> {
        items.iter().map(|i| i.id.clone()).collect()
    }

    #[test]
    fn priority_ascending_puts_critical_first_and_is_stable() {
        let items = fixture_items();
        let refs: Vec<&ReviewItem> = items.iter().collect();
        let sorted = sort(&refs, SortField::Priority, SortDirection::Ascending);
        assert_eq!(
            ids(&sorted)[..4],
            ["conv-02", "conv-03", "conv-07", "conv-11"].map(String::from)
        );
    }

    #[test]
    fn sorting_twice_yields_identical_order() {
        let items = fixture_items();
        let refs: Vec<&ReviewItem> = items.iter().collect();
        let once = sort(&refs, SortField::Priority, SortDirection::Descending);
        let twice = sort(&once, SortField::Priority, SortDirection::Descending);
        assert_eq!(ids(&once), ids(&twice));
    }

    #[test]
    fn reversing_direction_reverses_distinct_keys() {
        let items = fixture_items();
        let refs: Vec<&ReviewItem> = items.iter().collect();
        let asc = sort(&refs, SortField::CreatedAt, SortDirection::Ascending);
        let mut desc = ids(&sort(&refs, SortField::CreatedAt, SortDirection::Descending));
        desc.reverse();
        assert_eq!(ids(&asc), desc);
    }

    #[test]
    fn input_is_not_mutated() {
        let items = fixture_items();
        let refs: Vec<&ReviewItem> = items.iter().collect();
        let before = ids(&refs);
        let _ = sort(&refs, SortField::Score, SortDirection::Ascending);
        assert_eq!(ids(&refs), before);
    }

    #[test]
    fn sort_state_toggles_and_resets() {
        let mut state = SortState::default();
        state.select(SortField::Score);
        assert_eq!(state.direction, SortDirection::Descending);
        state.select(SortField::Score);
        assert_eq!(state.direction, SortDirection::Ascending);
        state.select(SortField::Priority);
        assert_eq!(state, SortState::new(SortField::Priority));
    }
}
