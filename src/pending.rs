use std::collections::VecDeque;

/// Log entry ids folded into the [`crate::aggregator::Aggregator`] but not
/// yet acknowledged.
///
/// A `VecDeque` rather than a `Vec`: the total-failure path in
/// [`crate::flush::FlushCoordinator`] prepends a whole batch of ids back
/// onto the front, which is O(1) amortized here and O(n) on a `Vec`.
#[derive(Debug, Default)]
pub struct PendingIds {
    ids: VecDeque<String>,
}

impl PendingIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: String) {
        self.ids.push_back(id);
    }

    pub fn extend(&mut self, ids: impl IntoIterator<Item = String>) {
        self.ids.extend(ids);
    }

    /// Take the current contents, leaving this list empty.
    pub fn snapshot_and_clear(&mut self) -> Vec<String> {
        self.ids.drain(..).collect()
    }

    /// Put a previously-snapshotted batch back at the front, in order.
    pub fn prepend(&mut self, ids: Vec<String>) {
        for id in ids.into_iter().rev() {
            self.ids.push_front(id);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_clears_and_returns_in_order() {
        let mut p = PendingIds::new();
        p.push("1-0".to_string());
        p.push("2-0".to_string());
        let snap = p.snapshot_and_clear();
        assert_eq!(snap, vec!["1-0", "2-0"]);
        assert!(p.is_empty());
    }

    #[test]
    fn prepend_restores_order_ahead_of_newer_ids() {
        let mut p = PendingIds::new();
        p.push("3-0".to_string());
        p.prepend(vec!["1-0".to_string(), "2-0".to_string()]);
        assert_eq!(
            p.snapshot_and_clear(),
            vec!["1-0".to_string(), "2-0".to_string(), "3-0".to_string()]
        );
    }
}
