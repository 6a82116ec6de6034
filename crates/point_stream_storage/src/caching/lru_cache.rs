use crate::{SmallKeyHashMap, SmallKeyHashSet};

use core::hash::Hash;

/// A cost-bounded cache that evicts the Least Recently Used entries as soon as an insertion pushes the total cost over the
/// budget.
///
/// Every insertion and touch stamps the entry with a new, strictly increasing sequence number, so the LRU order is total
/// and two entries can never tie.
///
/// Entries touched since the last call to `begin_frame` form the *protected set*. They are never evicted, even if they are
/// the coldest entries. Callers are expected to touch everything they are about to use before inserting anything new.
#[derive(Clone, Debug)]
pub struct LruCache<K, V> {
    store: SmallKeyHashMap<K, CacheEntry<V>>,
    order: LruList<K>,
    protected: SmallKeyHashSet<K>,
    // Protected keys already reported as eviction candidates this frame.
    reported: SmallKeyHashSet<K>,
    next_sequence: u64,
    total_cost: u64,
    budget: u64,
}

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    cost: u64,
    sequence: u64,
    list_index: usize,
}

/// Anomalies noticed while evicting. None of these stop the cache from doing the best it can.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CacheWarning<K> {
    /// Eviction could not bring the total cost down to the budget, e.g. because a single entry costs more than the whole
    /// budget or because everything else is protected.
    BudgetViolation { total_cost: u64, budget: u64 },
    /// A protected entry was the next eviction candidate. It was skipped. Reported once per frame.
    EvictionOfVisibleNode(K),
}

/// What an insertion or an explicit eviction pass did to the cache.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EvictionReport<K, V> {
    /// Evicted entries, coldest first.
    pub evicted: Vec<(K, V)>,
    /// The previous value for the inserted key, if there was one.
    pub replaced: Option<V>,
    pub warnings: Vec<CacheWarning<K>>,
}

impl<K, V> Default for EvictionReport<K, V> {
    fn default() -> Self {
        Self {
            evicted: Vec::new(),
            replaced: None,
            warnings: Vec::new(),
        }
    }
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
{
    pub fn new(budget: u64) -> Self {
        Self {
            store: SmallKeyHashMap::default(),
            order: LruList::new(),
            protected: SmallKeyHashSet::default(),
            reported: SmallKeyHashSet::default(),
            next_sequence: 1,
            total_cost: 0,
            budget,
        }
    }

    /// Forgets the protected set of the previous frame.
    #[inline]
    pub fn begin_frame(&mut self) {
        self.protected.clear();
        self.reported.clear();
    }

    /// Marks `key` as most recently used and protects it until the next `begin_frame`. Returns `false` if `key` is not
    /// resident.
    #[inline]
    pub fn touch(&mut self, key: &K) -> bool {
        let Self {
            store,
            order,
            protected,
            next_sequence,
            ..
        } = self;

        if let Some(entry) = store.get_mut(key) {
            order.move_to_front(entry.list_index);
            entry.sequence = take_sequence(next_sequence);
            protected.insert(key.clone());

            true
        } else {
            false
        }
    }

    /// Registers `value` for `key` as the most recently used entry, then evicts the coldest unprotected entries until the
    /// total cost is back within budget. The entry just inserted is never evicted by its own insertion.
    pub fn insert(&mut self, key: K, value: V, cost: u64) -> EvictionReport<K, V> {
        let sequence = take_sequence(&mut self.next_sequence);
        let replaced = if let Some(entry) = self.store.get_mut(&key) {
            self.order.move_to_front(entry.list_index);
            self.total_cost = self.total_cost - entry.cost + cost;
            entry.cost = cost;
            entry.sequence = sequence;

            Some(std::mem::replace(&mut entry.value, value))
        } else {
            let list_index = self.order.push_front(key.clone());
            self.store.insert(
                key.clone(),
                CacheEntry {
                    value,
                    cost,
                    sequence,
                    list_index,
                },
            );
            self.total_cost += cost;

            None
        };

        let mut report = self.evict_over_budget(Some(&key));
        report.replaced = replaced;

        report
    }

    /// Evicts the coldest unprotected entries until the total cost is within budget.
    pub fn free_memory(&mut self) -> EvictionReport<K, V> {
        self.evict_over_budget(None)
    }

    /// Changes the budget. Does not evict by itself; follow with `free_memory`.
    #[inline]
    pub fn set_budget(&mut self, budget: u64) {
        self.budget = budget;
    }

    /// Removes `key` regardless of its protection, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.store.remove(key)?;
        self.order.remove(entry.list_index);
        self.protected.remove(key);
        self.total_cost -= entry.cost;

        Some(entry.value)
    }

    /// Removes every entry whose key satisfies `predicate`, coldest first.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&K) -> bool) -> Vec<(K, V)> {
        let doomed: Vec<K> = self
            .order
            .iter_back_to_front()
            .filter(|key| predicate(key))
            .cloned()
            .collect();

        doomed
            .into_iter()
            .filter_map(|key| self.remove(&key).map(|value| (key, value)))
            .collect()
    }

    /// Borrow the value for `key`. This will not update the LRU order.
    #[inline]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.store.get(key).map(|entry| &entry.value)
    }

    /// The last-access sequence number of `key`.
    #[inline]
    pub fn sequence(&self, key: &K) -> Option<u64> {
        self.store.get(key).map(|entry| entry.sequence)
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.store.contains_key(key)
    }

    #[inline]
    pub fn is_protected(&self, key: &K) -> bool {
        self.protected.contains(key)
    }

    #[inline]
    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    #[inline]
    pub fn budget(&self) -> u64 {
        self.budget
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Keys from least to most recently used.
    pub fn keys_coldest_first(&self) -> impl Iterator<Item = &K> {
        self.order.iter_back_to_front()
    }

    fn evict_over_budget(&mut self, just_inserted: Option<&K>) -> EvictionReport<K, V> {
        let mut report = EvictionReport::default();

        let mut cursor = self.order.back();
        while self.total_cost > self.budget {
            let key = match self.order.get(cursor) {
                Some(key) => key.clone(),
                None => break,
            };
            let previous = self.order.prev(cursor);

            if Some(&key) == just_inserted {
                // Skip.
            } else if self.protected.contains(&key) {
                if self.reported.insert(key.clone()) {
                    tracing::error!(?key, "eviction candidate is in the protected set; skipping it");
                    report
                        .warnings
                        .push(CacheWarning::EvictionOfVisibleNode(key));
                }
            } else if let Some(value) = self.remove(&key) {
                tracing::trace!(?key, total_cost = self.total_cost, "evicted");
                report.evicted.push((key, value));
            }

            cursor = previous;
        }

        if self.total_cost > self.budget {
            tracing::warn!(
                total_cost = self.total_cost,
                budget = self.budget,
                "cannot evict enough to satisfy the budget"
            );
            report.warnings.push(CacheWarning::BudgetViolation {
                total_cost: self.total_cost,
                budget: self.budget,
            });
        }

        report
    }
}

#[inline]
fn take_sequence(next: &mut u64) -> u64 {
    let sequence = *next;
    *next += 1;

    sequence
}

/// Doubly-linked list using Vec as storage.
#[derive(Clone, Debug)]
struct LruList<T> {
    entries: Vec<ListEntry<T>>,
}

#[derive(Clone, Debug)]
struct ListEntry<T> {
    value: Option<T>,
    next: usize,
    prev: usize,
}

/// Free and occupied cells are each linked into a cyclic list with one auxiliary cell.
/// Cell #0 is on the list of free cells, element #1 is on the list of occupied cells.
impl<T> LruList<T> {
    const FREE: usize = 0;
    const OCCUPIED: usize = 1;

    fn new() -> LruList<T> {
        let mut entries = Vec::with_capacity(2);
        entries.push(ListEntry::<T> {
            value: None,
            next: Self::FREE,
            prev: Self::FREE,
        });
        entries.push(ListEntry::<T> {
            value: None,
            next: Self::OCCUPIED,
            prev: Self::OCCUPIED,
        });

        LruList { entries }
    }

    fn unlink(&mut self, index: usize) {
        let prev = self.entries[index].prev;
        let next = self.entries[index].next;
        self.entries[prev].next = next;
        self.entries[next].prev = prev;
    }

    fn link_after(&mut self, index: usize, prev: usize) {
        let next = self.entries[prev].next;
        self.entries[index].prev = prev;
        self.entries[index].next = next;
        self.entries[prev].next = index;
        self.entries[next].prev = index;
    }

    fn move_to_front(&mut self, index: usize) {
        self.unlink(index);
        self.link_after(index, Self::OCCUPIED);
    }

    fn push_front(&mut self, value: T) -> usize {
        if self.entries[Self::FREE].next == Self::FREE {
            self.entries.push(ListEntry::<T> {
                value: None,
                next: Self::FREE,
                prev: Self::FREE,
            });
            self.entries[Self::FREE].next = self.entries.len() - 1;
        }
        let index = self.entries[Self::FREE].next;
        self.entries[index].value = Some(value);
        self.unlink(index);
        self.link_after(index, Self::OCCUPIED);

        index
    }

    fn remove(&mut self, index: usize) -> Option<T> {
        self.unlink(index);
        self.link_after(index, Self::FREE);

        self.entries[index].value.take()
    }

    /// The coldest cell, or the `OCCUPIED` sentinel if the list is empty.
    fn back(&self) -> usize {
        self.entries[Self::OCCUPIED].prev
    }

    fn prev(&self, index: usize) -> usize {
        self.entries[index].prev
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.entries[index].value.as_ref()
    }

    fn iter_back_to_front(&self) -> impl Iterator<Item = &T> {
        let mut cursor = self.back();

        std::iter::from_fn(move || {
            let value = self.get(cursor)?;
            cursor = self.prev(cursor);

            Some(value)
        })
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rand::prelude::*;

    fn evicted_keys<K: Clone, V>(report: &EvictionReport<K, V>) -> Vec<K> {
        report.evicted.iter().map(|(k, _)| k.clone()).collect()
    }

    #[test]
    fn third_insert_evicts_the_first() {
        let mut cache = LruCache::new(100);

        assert!(cache.insert("A", (), 40).evicted.is_empty());
        assert!(cache.insert("B", (), 40).evicted.is_empty());
        let report = cache.insert("C", (), 40);

        assert_eq!(evicted_keys(&report), vec!["A"]);
        assert!(report.warnings.is_empty());
        assert_eq!(cache.total_cost(), 80);
        assert!(!cache.contains(&"A"));
        assert!(cache.contains(&"B") && cache.contains(&"C"));
    }

    #[test]
    fn evicts_smallest_sequence_numbers_first() {
        let mut cache = LruCache::new(50);

        cache.insert('P', 1, 10);
        cache.insert('Q', 2, 10);
        cache.insert('R', 3, 10);
        cache.insert('S', 4, 10);
        cache.touch(&'Q');
        cache.touch(&'S');
        cache.touch(&'S');
        cache.begin_frame();

        let sequences: Vec<_> = ['P', 'Q', 'R', 'S']
            .iter()
            .map(|k| cache.sequence(k).unwrap())
            .collect();
        assert_eq!(sequences, vec![1, 5, 3, 7]);

        let report = cache.insert('U', 5, 30);

        assert_eq!(report.evicted, vec![('P', 1), ('R', 3)]);
        assert_eq!(cache.total_cost(), 50);
    }

    #[test]
    fn exceeding_budget_by_one_evicts_only_the_coldest() {
        let mut cache = LruCache::new(30);

        cache.insert(1, (), 10);
        cache.insert(2, (), 10);
        cache.insert(3, (), 10);
        let report = cache.insert(4, (), 1);

        assert_eq!(evicted_keys(&report), vec![1]);
        assert_eq!(cache.total_cost(), 21);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn never_evicts_protected_entries() {
        let mut cache = LruCache::new(30);

        cache.insert(1, (), 10);
        cache.insert(2, (), 10);
        cache.insert(3, (), 10);
        cache.begin_frame();
        cache.touch(&1);

        let report = cache.insert(4, (), 10);

        assert_eq!(evicted_keys(&report), vec![2]);
        assert!(cache.contains(&1));
        assert!(cache.is_protected(&1));
    }

    #[test]
    fn protected_coldest_entry_is_skipped_with_warning() {
        let mut cache = LruCache::new(20);

        cache.insert(1, (), 10);
        cache.insert(2, (), 10);
        cache.begin_frame();
        cache.touch(&1);
        cache.touch(&2);
        // Protected order is now 1 (coldest) then 2. Lowering the budget forces the cache to consider both.
        cache.set_budget(10);
        let report = cache.free_memory();

        assert!(report.evicted.is_empty());
        assert_eq!(
            report.warnings,
            vec![
                CacheWarning::EvictionOfVisibleNode(1),
                CacheWarning::EvictionOfVisibleNode(2),
                CacheWarning::BudgetViolation {
                    total_cost: 20,
                    budget: 10
                },
            ]
        );

        cache.begin_frame();
        let report = cache.free_memory();
        assert_eq!(evicted_keys(&report), vec![1]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn protected_entry_is_reported_once_per_frame() {
        let mut cache = LruCache::new(20);

        cache.insert(1, (), 10);
        cache.insert(2, (), 10);
        cache.begin_frame();
        cache.touch(&1);
        cache.touch(&2);
        cache.set_budget(10);

        let report = cache.insert(3, (), 10);
        assert!(report.evicted.is_empty());
        assert_eq!(
            report.warnings,
            vec![
                CacheWarning::EvictionOfVisibleNode(1),
                CacheWarning::EvictionOfVisibleNode(2),
                CacheWarning::BudgetViolation {
                    total_cost: 30,
                    budget: 10
                },
            ]
        );

        let report = cache.insert(4, (), 10);
        assert_eq!(evicted_keys(&report), vec![3]);
        assert_eq!(
            report.warnings,
            vec![CacheWarning::BudgetViolation {
                total_cost: 30,
                budget: 10
            }]
        );

        // A new frame reports again.
        cache.begin_frame();
        cache.touch(&1);
        cache.touch(&2);
        let report = cache.free_memory();
        assert_eq!(evicted_keys(&report), vec![4]);
        assert_eq!(
            report.warnings,
            vec![
                CacheWarning::EvictionOfVisibleNode(1),
                CacheWarning::EvictionOfVisibleNode(2),
                CacheWarning::BudgetViolation {
                    total_cost: 20,
                    budget: 10
                },
            ]
        );
    }

    #[test]
    fn oversized_entry_is_kept_and_reported() {
        let mut cache = LruCache::new(10);

        cache.insert(1, (), 5);
        let report = cache.insert(2, (), 15);

        assert_eq!(evicted_keys(&report), vec![1]);
        assert_eq!(
            report.warnings,
            vec![CacheWarning::BudgetViolation {
                total_cost: 15,
                budget: 10
            }]
        );
        assert!(cache.contains(&2));
    }

    #[test]
    fn remove_where_takes_matching_entries() {
        let mut cache = LruCache::new(100);

        for k in 0..6 {
            cache.insert(k, k * 10, 1);
        }
        cache.touch(&0);

        let removed = cache.remove_where(|k| k % 2 == 0);

        assert_eq!(removed, vec![(2, 20), (4, 40), (0, 0)]);
        assert_eq!(cache.total_cost(), 3);
        assert_eq!(
            cache.keys_coldest_first().copied().collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
    }

    #[test]
    fn reinsert_replaces_value_and_cost() {
        let mut cache = LruCache::new(100);

        cache.insert(1, "old", 10);
        let report = cache.insert(1, "new", 30);

        assert_eq!(report.replaced, Some("old"));
        assert_eq!(cache.get(&1), Some(&"new"));
        assert_eq!(cache.total_cost(), 30);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn random_operations_respect_budget() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let budget = 1_000;
        let mut cache = LruCache::new(budget);

        for frame in 0..200 {
            cache.begin_frame();
            for _ in 0..20 {
                let key = rng.gen_range(0..64u32);
                match rng.gen_range(0..3) {
                    0 => {
                        cache.touch(&key);
                    }
                    1 => {
                        cache.remove(&key);
                    }
                    _ => {
                        // Nothing is protected, so the budget can always be met.
                        cache.begin_frame();
                        cache.insert(key, frame, rng.gen_range(0..=budget / 4));
                        assert!(
                            cache.total_cost() <= budget,
                            "total {} over budget",
                            cache.total_cost()
                        );
                    }
                }
            }

            let mut last_sequence = 0;
            let mut sum = 0;
            for key in cache.keys_coldest_first() {
                let sequence = cache.sequence(key).unwrap();
                assert!(sequence > last_sequence);
                last_sequence = sequence;
                sum += cache.store.get(key).unwrap().cost;
            }
            assert_eq!(sum, cache.total_cost());
        }
    }
}
