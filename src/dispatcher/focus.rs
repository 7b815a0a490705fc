/// Cursor into the live list. `None` only while the list is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FocusCursor {
    index: Option<usize>,
}

impl FocusCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<usize> {
        self.index
    }

    /// Render form: -1 for an empty list.
    pub fn as_view_index(&self) -> i64 {
        self.index.map_or(-1, |i| i as i64)
    }

    /// Re-fit to a list of `len` items.
    pub fn clamp(&mut self, len: usize) {
        self.index = match (self.index, len) {
            (_, 0) => None,
            (None, _) => Some(0),
            (Some(i), len) => Some(i.min(len - 1)),
        };
    }

    pub fn next(&mut self, len: usize) {
        self.clamp(len);
        if let Some(i) = self.index {
            self.index = Some((i + 1).min(len - 1));
        }
    }

    pub fn previous(&mut self, len: usize) {
        self.clamp(len);
        if let Some(i) = self.index {
            self.index = Some(i.saturating_sub(1));
        }
    }

    pub fn first(&mut self, len: usize) {
        self.index = (len > 0).then_some(0);
    }

    pub fn last(&mut self, len: usize) {
        self.index = len.checked_sub(1);
    }

    pub fn set(&mut self, index: usize, len: usize) {
        self.index = Some(index);
        self.clamp(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_minus_one() {
        let mut cursor = FocusCursor::new();
        cursor.clamp(0);
        assert_eq!(cursor.as_view_index(), -1);
        cursor.next(0);
        assert_eq!(cursor.get(), None);
    }

    #[test]
    fn navigation_clamps_without_wrapping() {
        let mut cursor = FocusCursor::new();
        cursor.previous(3);
        assert_eq!(cursor.get(), Some(0));
        cursor.next(3);
        cursor.next(3);
        cursor.next(3);
        assert_eq!(cursor.get(), Some(2));
    }

    #[test]
    fn shrinking_list_pulls_focus_in() {
        let mut cursor = FocusCursor::new();
        cursor.last(10);
        cursor.clamp(4);
        assert_eq!(cursor.get(), Some(3));
        cursor.clamp(0);
        assert_eq!(cursor.get(), None);
        cursor.clamp(5);
        assert_eq!(cursor.get(), Some(0));
    }
}
