use std::collections::BTreeMap;

use wordledger_core::EditDelta;

/// Word deltas counted but not yet written to the device log.  Keyed by the
/// day each edit was captured, so a burst that crosses midnight lands on the
/// day it actually happened instead of the day the flush fires.
#[derive(Debug, Default)]
pub struct PendingDeltas {
    days: BTreeMap<String, EditDelta>,
}

impl PendingDeltas {
    pub fn add(&mut self, date: &str, delta: EditDelta) {
        self.days.entry(date.to_string()).or_default().merge(delta);
    }

    /// Drain everything, oldest day first.
    pub fn take_all(&mut self) -> BTreeMap<String, EditDelta> {
        std::mem::take(&mut self.days)
    }

    pub fn remove_day(&mut self, date: &str) -> Option<EditDelta> {
        self.days.remove(date)
    }

    /// Copy of the current counters for read-side aggregation.
    pub fn snapshot(&self) -> BTreeMap<String, EditDelta> {
        self.days.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_day_deltas_accumulate() {
        let mut pending = PendingDeltas::default();
        pending.add("2024-01-01", EditDelta { words_added: 3, words_deleted: 0 });
        pending.add("2024-01-01", EditDelta { words_added: 2, words_deleted: 1 });

        let days = pending.snapshot();
        assert_eq!(days.len(), 1);
        assert_eq!(days["2024-01-01"].words_added, 5);
        assert_eq!(days["2024-01-01"].words_deleted, 1);
    }

    #[test]
    fn days_stay_separate_across_midnight() {
        let mut pending = PendingDeltas::default();
        pending.add("2024-01-01", EditDelta { words_added: 3, words_deleted: 0 });
        pending.add("2024-01-02", EditDelta { words_added: 4, words_deleted: 0 });

        let days = pending.take_all();
        assert_eq!(days.len(), 2);
        assert_eq!(days["2024-01-01"].words_added, 3);
        assert_eq!(days["2024-01-02"].words_added, 4);
        assert!(pending.is_empty());
    }

    #[test]
    fn remove_day_only_touches_that_day() {
        let mut pending = PendingDeltas::default();
        pending.add("2024-01-01", EditDelta { words_added: 3, words_deleted: 0 });
        pending.add("2024-01-02", EditDelta { words_added: 4, words_deleted: 2 });

        let removed = pending.remove_day("2024-01-02");
        assert_eq!(removed, Some(EditDelta { words_added: 4, words_deleted: 2 }));
        assert_eq!(pending.remove_day("2024-01-02"), None);
        assert_eq!(pending.snapshot().len(), 1);
    }
}
