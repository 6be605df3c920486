//! Capacity eviction policy.
//!
//! Least-frequently-used, oldest first: the victim is the entry with the
//! lowest access count, ties broken by earliest creation time, then by
//! insertion sequence. Recency of access is not tracked, so this is not
//! an LRU.

use std::time::{Duration, Instant};

/// Accounting kept for every durable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStats {
    /// Lookups plus the insert itself
    pub access_count: u64,

    pub created_at: Instant,

    /// Monotonic insertion number, unique per cache
    pub sequence: u64,
}

impl EntryStats {
    /// Stats for a fresh insert.
    pub fn new(created_at: Instant, sequence: u64) -> Self {
        Self {
            access_count: 1,
            created_at,
            sequence,
        }
    }

    /// Record a successful lookup.
    pub fn touch(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Ordering key; the minimum is evicted first.
    pub fn eviction_rank(&self) -> (u64, Instant, u64) {
        (self.access_count, self.created_at, self.sequence)
    }

    /// Whether the periodic sweep should reclaim this entry.
    pub fn is_stale(&self, now: Instant, stale_after: Duration) -> bool {
        now.saturating_duration_since(self.created_at) > stale_after
    }
}

/// Pick the entry to evict.
///
/// Returns `None` only for an empty input.
pub fn select_victim<'a, K, I>(entries: I) -> Option<&'a K>
where
    K: 'a,
    I: IntoIterator<Item = (&'a K, &'a EntryStats)>,
{
    entries
        .into_iter()
        .min_by_key(|(_, stats)| stats.eviction_rank())
        .map(|(key, _)| key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_lowest_access_count_wins() {
        let t0 = Instant::now();
        let mut a = EntryStats::new(t0, 0);
        a.touch();
        let b = EntryStats::new(t0 + Duration::from_millis(1), 1);

        let entries = vec![("a", a), ("b", b)];
        let victim = select_victim(entries.iter().map(|(k, s)| (k, s)));
        assert_eq!(victim, Some(&"b"));
    }

    #[test]
    fn test_ties_go_to_oldest() {
        let t0 = Instant::now();
        let older = EntryStats::new(t0, 5);
        let newer = EntryStats::new(t0 + Duration::from_secs(1), 2);

        let mut map = HashMap::new();
        map.insert("newer", newer);
        map.insert("older", older);
        assert_eq!(select_victim(&map), Some(&"older"));
    }

    #[test]
    fn test_same_instant_uses_sequence() {
        let t0 = Instant::now();
        let mut map = HashMap::new();
        map.insert("second", EntryStats::new(t0, 8));
        map.insert("first", EntryStats::new(t0, 7));
        assert_eq!(select_victim(&map), Some(&"first"));
    }

    #[test]
    fn test_empty() {
        let map: HashMap<&str, EntryStats> = HashMap::new();
        assert_eq!(select_victim(&map), None);
    }

    #[test]
    fn test_staleness_is_strict() {
        let t0 = Instant::now();
        let stats = EntryStats::new(t0, 0);
        let limit = Duration::from_secs(60);
        assert!(!stats.is_stale(t0 + limit, limit));
        assert!(stats.is_stale(t0 + limit + Duration::from_millis(1), limit));
    }

    proptest! {
        #[test]
        fn prop_no_remaining_entry_ranks_below_victim(
            entries in prop::collection::vec((1u64..5, 0u64..20), 1..40)
        ) {
            let t0 = Instant::now();
            let map: HashMap<usize, EntryStats> = entries
                .iter()
                .enumerate()
                .map(|(i, (count, offset))| {
                    let mut stats = EntryStats::new(t0 + Duration::from_millis(*offset), i as u64);
                    stats.access_count = *count;
                    (i, stats)
                })
                .collect();

            let victim = *select_victim(&map).unwrap();
            let victim_rank = map[&victim].eviction_rank();
            for (key, stats) in &map {
                if *key != victim {
                    let rank = stats.eviction_rank();
                    prop_assert!((rank.0, rank.1) >= (victim_rank.0, victim_rank.1));
                }
            }
        }
    }
}
