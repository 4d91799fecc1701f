use std::collections::VecDeque;

/// Capped rolling window of records, oldest first
///
/// Appending past capacity evicts the oldest entry. Owned by a single cycle
/// runner, so no interior locking.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedHistory<T> {
    /// Create a new history
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of entries to keep (at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, removing the oldest if full
    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Copy of all entries, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_history() {
        let history: BoundedHistory<u32> = BoundedHistory::new(30);
        assert_eq!(history.capacity(), 30);
        assert!(history.is_empty());
        assert!(history.latest().is_none());
    }

    #[test]
    fn test_zero_capacity_is_floored() {
        let mut history = BoundedHistory::new(0);
        history.push(1);
        history.push(2);
        assert_eq!(history.snapshot(), vec![2]);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut history = BoundedHistory::new(5);

        for i in 0..10 {
            history.push(i);
        }

        // Should only keep the last 5
        assert_eq!(history.len(), 5);
        assert_eq!(history.snapshot(), vec![5, 6, 7, 8, 9]);
        assert_eq!(history.latest(), Some(&9));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut history = BoundedHistory::new(3);
        history.push("a".to_string());

        let snapshot = history.snapshot();
        history.push("b".to_string());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(history.len(), 2);
    }
}
