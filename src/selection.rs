//! Selection manager.
//!
//! The selected set is independent of what the active filter shows: ids stay
//! selected when they scroll out of view. Anything acting on the selection
//! goes through `intersect_live` first.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `id` is selected afterwards.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    /// Select-all toggle over the visible list.
    ///
    /// Every visible id already selected: the visible ids are deselected.
    /// Otherwise every visible id is added. Selected ids outside `visible`
    /// are left alone either way.
    pub fn select_all<S: AsRef<str>>(&mut self, visible: &[S]) {
        if visible.is_empty() {
            return;
        }
        if self.all_selected(visible) {
            for id in visible {
                self.ids.remove(id.as_ref());
            }
        } else {
            self.ids
                .extend(visible.iter().map(|id| id.as_ref().to_string()));
        }
    }

    pub fn all_selected<S: AsRef<str>>(&self, visible: &[S]) -> bool {
        !visible.is_empty() && visible.iter().all(|id| self.ids.contains(id.as_ref()))
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Selected ids that still resolve, in `live` order.
    pub fn intersect_live<'a, S: AsRef<str>>(&self, live: &'a [S]) -> Vec<&'a str> {
        live.iter()
            .map(|id| id.as_ref())
            .filter(|id| self.ids.contains(*id))
            .collect()
    }

    pub fn remove_many<S: AsRef<str>>(&mut self, ids: &[S]) {
        for id in ids {
            self.ids.remove(id.as_ref());
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
