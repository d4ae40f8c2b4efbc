//! Pure folds from increments to per-day totals, plus the queries the
//! presentation layer feeds on.  Nothing here touches storage.

use std::collections::{BTreeMap, HashSet};

use crate::dates;
use crate::types::{DailySummary, Increment};
use crate::words::EditDelta;

/// Add raw counts to a day's summary, creating it when absent.  The fold is
/// commutative and associative, so the order increments arrive in never
/// changes the totals.
pub fn fold_delta(
    totals: &mut BTreeMap<String, DailySummary>,
    date: &str,
    words_added: u64,
    words_deleted: u64,
) {
    let entry = totals
        .entry(date.to_string())
        .or_insert_with(|| DailySummary::empty(date));
    entry.words_added += words_added;
    entry.words_deleted += words_deleted;
    entry.recompute_net();
}

pub fn fold_increment(totals: &mut BTreeMap<String, DailySummary>, increment: &Increment) {
    fold_delta(
        totals,
        &increment.date,
        increment.words_added,
        increment.words_deleted,
    );
}

/// Combine the three places a word can live into one per-day view: compacted
/// summaries, live increments, and pending unflushed deltas.
///
/// Increments sharing a timestamp are counted once, so callers may chain
/// overlapping sources (their own live log plus a merge snapshot that still
/// contains it) without double counting.  Inputs are never mutated.
pub fn build_totals<'a>(
    compacted: &BTreeMap<String, DailySummary>,
    increments: impl IntoIterator<Item = &'a Increment>,
    pending: &BTreeMap<String, EditDelta>,
) -> BTreeMap<String, DailySummary> {
    let mut totals = compacted.clone();
    let mut seen = HashSet::new();
    for increment in increments {
        if seen.insert(increment.timestamp) {
            fold_increment(&mut totals, increment);
        }
    }
    for (date, delta) in pending {
        if !delta.is_empty() {
            fold_delta(&mut totals, date, delta.words_added, delta.words_deleted);
        }
    }
    totals
}

/// Consecutive days before `today`, walking backward from yesterday, whose
/// net words met `daily_goal`.  Today never counts (it is still in progress).
/// A goal of `0` means goal tracking is off and the streak is `0`.
pub fn streak(totals: &BTreeMap<String, DailySummary>, daily_goal: u32, today: &str) -> u32 {
    if daily_goal == 0 {
        return 0;
    }
    let mut count = 0;
    let mut day = match dates::previous_day(today) {
        Some(day) => day,
        None => return 0,
    };
    while let Some(summary) = totals.get(&day) {
        if summary.net_words < i64::from(daily_goal) {
            break;
        }
        count += 1;
        match dates::previous_day(&day) {
            Some(previous) => day = previous,
            None => break,
        }
    }
    count
}

/// Daily summaries newest-first, for history lists and recent-activity bars.
pub fn history(totals: &BTreeMap<String, DailySummary>) -> Vec<DailySummary> {
    totals.values().rev().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inc(timestamp: i64, date: &str, added: u64, deleted: u64) -> Increment {
        Increment {
            timestamp,
            date: date.to_string(),
            words_added: added,
            words_deleted: deleted,
        }
    }

    #[test]
    fn fold_order_does_not_change_totals() {
        let increments = vec![
            inc(1, "2024-01-01", 50, 0),
            inc(2, "2024-01-01", 30, 10),
            inc(3, "2024-01-02", 5, 25),
            inc(4, "2024-01-01", 0, 7),
        ];

        let mut forward = BTreeMap::new();
        for i in &increments {
            fold_increment(&mut forward, i);
        }
        let mut backward = BTreeMap::new();
        for i in increments.iter().rev() {
            fold_increment(&mut backward, i);
        }

        assert_eq!(forward, backward);
        assert_eq!(forward["2024-01-01"].words_added, 80);
        assert_eq!(forward["2024-01-01"].words_deleted, 17);
        assert_eq!(forward["2024-01-01"].net_words, 63);
        assert_eq!(forward["2024-01-02"].net_words, -20);
    }

    #[test]
    fn build_totals_combines_all_three_sources() {
        let mut compacted = BTreeMap::new();
        fold_delta(&mut compacted, "2024-01-01", 100, 10);

        let live = vec![inc(10, "2024-01-02", 40, 0)];
        let mut pending = BTreeMap::new();
        pending.insert("2024-01-02".to_string(), EditDelta::from_change("", "five words of pending text"));

        let totals = build_totals(&compacted, &live, &pending);
        assert_eq!(totals["2024-01-01"].net_words, 90);
        assert_eq!(totals["2024-01-02"].words_added, 45);
        assert_eq!(totals["2024-01-02"].net_words, 45);
        // Inputs untouched.
        assert_eq!(compacted["2024-01-01"].words_added, 100);
        assert_eq!(compacted.len(), 1);
    }

    #[test]
    fn build_totals_counts_duplicate_timestamps_once() {
        let own = inc(77, "2024-01-01", 50, 0);
        let merged_copy = own.clone();
        let other_device = inc(78, "2024-01-01", 30, 10);

        let totals = build_totals(
            &BTreeMap::new(),
            [&own, &merged_copy, &other_device],
            &BTreeMap::new(),
        );
        assert_eq!(totals["2024-01-01"].words_added, 80);
        assert_eq!(totals["2024-01-01"].words_deleted, 10);
        assert_eq!(totals["2024-01-01"].net_words, 70);
    }

    #[test]
    fn streak_stops_at_first_day_under_goal() {
        let today = dates::today_local();
        let mut totals = BTreeMap::new();
        for (days_back, net) in [(1u32, 600u64), (2, 520), (3, 480), (4, 700)] {
            let day = dates::days_ago_local(days_back);
            fold_delta(&mut totals, &day, net, 0);
        }
        assert_eq!(streak(&totals, 500, &today), 2);
    }

    #[test]
    fn streak_is_zero_without_goal_or_yesterday() {
        let today = dates::today_local();
        let mut totals = BTreeMap::new();
        fold_delta(&mut totals, &dates::days_ago_local(1), 1_000, 0);
        assert_eq!(streak(&totals, 0, &today), 0);

        let no_yesterday = BTreeMap::new();
        assert_eq!(streak(&no_yesterday, 500, &today), 0);
    }

    #[test]
    fn streak_ignores_today_and_missing_days() {
        let today = dates::today_local();
        let mut totals = BTreeMap::new();
        // A huge total today must not count while yesterday is missing.
        fold_delta(&mut totals, &today, 5_000, 0);
        assert_eq!(streak(&totals, 500, &today), 0);

        // Gap two days back limits the streak to one.
        fold_delta(&mut totals, &dates::days_ago_local(1), 800, 0);
        fold_delta(&mut totals, &dates::days_ago_local(3), 800, 0);
        assert_eq!(streak(&totals, 500, &today), 1);
    }

    #[test]
    fn deletions_can_push_a_day_below_goal() {
        let today = dates::today_local();
        let mut totals = BTreeMap::new();
        fold_delta(&mut totals, &dates::days_ago_local(1), 600, 200);
        assert_eq!(streak(&totals, 500, &today), 0);
        assert_eq!(streak(&totals, 400, &today), 1);
    }

    #[test]
    fn history_is_newest_first() {
        let mut totals = BTreeMap::new();
        fold_delta(&mut totals, "2024-01-02", 1, 0);
        fold_delta(&mut totals, "2024-03-01", 2, 0);
        fold_delta(&mut totals, "2023-12-31", 3, 0);

        let summaries = history(&totals);
        let days: Vec<&str> = summaries.iter().map(|s| s.date.as_str()).collect();
        assert_eq!(days, vec!["2024-03-01", "2024-01-02", "2023-12-31"]);
    }
}
