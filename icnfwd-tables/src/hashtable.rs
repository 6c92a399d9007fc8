//! Open-addressed hash table with in-bucket chaining and overflow buckets.
//!
//! Each bucket has a fixed number of slots. When a bucket fills up, its
//! last slot is repurposed as a pointer to a pool-allocated overflow
//! bucket, forming a chain. Deletion is deferred: a deleted entry becomes
//! a tombstone and its slot is reclaimed only by a later sweep, so
//! iteration and eviction callbacks never invalidate the chain they are
//! walking.
//!
//! Sweeps are the opportunistic-expiry mechanism: walking one bucket chain
//! evicts entries whose compressed expiry tag has passed, then compacts on
//! the way back up, returning empty overflow buckets to the pool and
//! pulling surviving entries toward the chain head.

use icnfwd_common::ticks::{ExpiryTag, TimerSnapshot};
use std::mem;

/// Keys supply their own hash so callers can reuse precomputed name hashes.
pub trait TableKey: Eq {
    fn table_hash(&self) -> u64;
}

/// Slots per bucket. The final slot doubles as the overflow pointer.
pub const BUCKET_SLOTS: usize = 8;
const OVERFLOW_SLOT: usize = BUCKET_SLOTS - 1;

/// Overflow buckets kept around for reuse instead of being freed.
const POOL_RETAIN: usize = 64;

/// Default bound on the number of buckets in one chain.
const DEFAULT_MAX_CHAIN: usize = 8;

/// Why an insert was refused. The table is left untouched either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// An entry with an equal key is already present.
    Duplicate,
    /// The bucket chain is at its depth limit.
    Exhausted,
}

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    expiry: Option<ExpiryTag>,
}

#[derive(Debug)]
enum Slot<K, V> {
    Empty,
    /// Deferred delete: reclaimed by the next sweep of this chain.
    Tombstone,
    Entry(Entry<K, V>),
    /// Only ever stored in the final slot of a bucket.
    Overflow(Box<Bucket<K, V>>),
}

#[derive(Debug)]
struct Bucket<K, V> {
    slots: [Slot<K, V>; BUCKET_SLOTS],
}

impl<K, V> Bucket<K, V> {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::Empty),
        }
    }

    fn entry_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Entry(_)))
            .count()
    }
}

struct OverflowPool<K, V> {
    free: Vec<Box<Bucket<K, V>>>,
}

impl<K, V> OverflowPool<K, V> {
    fn new() -> Self {
        Self { free: Vec::new() }
    }

    fn acquire(&mut self) -> Box<Bucket<K, V>> {
        self.free.pop().unwrap_or_else(|| Box::new(Bucket::new()))
    }

    fn release(&mut self, bucket: Box<Bucket<K, V>>) {
        debug_assert_eq!(bucket.entry_count(), 0);
        if self.free.len() < POOL_RETAIN {
            let mut bucket = bucket;
            for slot in bucket.slots.iter_mut() {
                *slot = Slot::Empty;
            }
            self.free.push(bucket);
        }
    }

    fn available(&self) -> usize {
        self.free.len()
    }
}

/// The table proper.
pub struct HashTable<K: TableKey, V> {
    buckets: Vec<Bucket<K, V>>,
    mask: usize,
    len: usize,
    max_chain: usize,
    pool: OverflowPool<K, V>,
    sweep_cursor: usize,
}

impl<K: TableKey, V> HashTable<K, V> {
    /// A table with at least `buckets` head buckets, rounded up to a power
    /// of two.
    pub fn new(buckets: usize) -> Self {
        let count = buckets.max(1).next_power_of_two();
        Self {
            buckets: (0..count).map(|_| Bucket::new()).collect(),
            mask: count - 1,
            len: 0,
            max_chain: DEFAULT_MAX_CHAIN,
            pool: OverflowPool::new(),
            sweep_cursor: 0,
        }
    }

    pub fn with_max_chain(mut self, max_chain: usize) -> Self {
        self.max_chain = max_chain.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn index_of(&self, key: &K) -> usize {
        (key.table_hash() as usize) & self.mask
    }

    /// Place an entry. `expiry` of `None` exempts it from expiry sweeps.
    pub fn insert(
        &mut self,
        key: K,
        value: V,
        expiry: Option<ExpiryTag>,
    ) -> Result<(), InsertError> {
        let idx = self.index_of(&key);
        if chain_contains(&self.buckets[idx], &key) {
            return Err(InsertError::Duplicate);
        }
        place(
            &mut self.buckets[idx],
            self.max_chain,
            &mut self.pool,
            Entry { key, value, expiry },
        )?;
        self.len += 1;
        Ok(())
    }

    pub fn lookup(&self, key: &K) -> Option<&V> {
        let mut bucket = &self.buckets[self.index_of(key)];
        loop {
            for slot in &bucket.slots {
                if let Slot::Entry(entry) = slot {
                    if entry.key == *key {
                        return Some(&entry.value);
                    }
                }
            }
            match &bucket.slots[OVERFLOW_SLOT] {
                Slot::Overflow(child) => bucket = child,
                _ => return None,
            }
        }
    }

    pub fn lookup_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.index_of(key);
        lookup_in_mut(&mut self.buckets[idx], key).map(|entry| &mut entry.value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.lookup(key).is_some()
    }

    /// Replace the expiry tag of an existing entry.
    pub fn retag(&mut self, key: &K, expiry: Option<ExpiryTag>) -> bool {
        let idx = self.index_of(key);
        match lookup_in_mut(&mut self.buckets[idx], key) {
            Some(entry) => {
                entry.expiry = expiry;
                true
            }
            None => false,
        }
    }

    /// Deferred delete: the entry is handed back to the caller and its slot
    /// becomes a tombstone until the next sweep of this chain.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let idx = self.index_of(key);
        let value = delete_in(&mut self.buckets[idx], key)?;
        self.len -= 1;
        Some(value)
    }

    /// Sweep the chain that `hash` maps to.
    pub fn sweep_bucket(
        &mut self,
        hash: u64,
        now: TimerSnapshot,
        evict: &mut dyn FnMut(K, V),
    ) {
        self.sweep_index((hash as usize) & self.mask, now, evict);
    }

    /// Sweep one head bucket by index. Evicted entries are handed to
    /// `evict`, which must not touch this table (side indices are fine).
    pub fn sweep_index(&mut self, idx: usize, now: TimerSnapshot, evict: &mut dyn FnMut(K, V)) {
        let removed = sweep_chain(&mut self.buckets[idx], Some(now), &mut self.pool, evict);
        self.len -= removed;
    }

    /// Sweep the next `buckets` chains in round-robin order. This is the
    /// opportunistic-expiry drip the owner runs from its timer window.
    pub fn sweep_step(
        &mut self,
        buckets: usize,
        now: TimerSnapshot,
        evict: &mut dyn FnMut(K, V),
    ) {
        for _ in 0..buckets.min(self.buckets.len()) {
            let idx = self.sweep_cursor & self.mask;
            self.sweep_cursor = self.sweep_cursor.wrapping_add(1);
            self.sweep_index(idx, now, evict);
        }
    }

    /// Reclaim tombstones and compact one chain without expiring anything.
    pub fn compact_index(&mut self, idx: usize) {
        let mut nothing = |_key: K, _value: V| {};
        let removed = sweep_chain(&mut self.buckets[idx], None, &mut self.pool, &mut nothing);
        debug_assert_eq!(removed, 0);
    }

    /// Keep only entries for which `keep` returns true. Deletion happens
    /// through tombstones and a compaction pass per chain, so `keep` may
    /// inspect entries freely while the walk is in progress.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &mut V) -> bool) {
        for idx in 0..self.buckets.len() {
            let mut removed = 0;
            mark_chain(&mut self.buckets[idx], &mut keep, &mut removed);
            self.len -= removed;
            self.compact_index(idx);
        }
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            table: self,
            bucket_idx: 0,
            current: self.buckets.first(),
            slot: 0,
        }
    }

    /// Number of overflow buckets currently parked in the pool.
    pub fn pool_available(&self) -> usize {
        self.pool.available()
    }
}

fn chain_contains<K: TableKey, V>(bucket: &Bucket<K, V>, key: &K) -> bool {
    let mut bucket = bucket;
    loop {
        for slot in &bucket.slots {
            if let Slot::Entry(entry) = slot {
                if entry.key == *key {
                    return true;
                }
            }
        }
        match &bucket.slots[OVERFLOW_SLOT] {
            Slot::Overflow(child) => bucket = child,
            _ => return false,
        }
    }
}

fn lookup_in_mut<'a, K: TableKey, V>(
    bucket: &'a mut Bucket<K, V>,
    key: &K,
) -> Option<&'a mut Entry<K, V>> {
    let mut found = None;
    for (i, slot) in bucket.slots.iter().enumerate() {
        if let Slot::Entry(entry) = slot {
            if entry.key == *key {
                found = Some(i);
                break;
            }
        }
    }
    if let Some(i) = found {
        match &mut bucket.slots[i] {
            Slot::Entry(entry) => return Some(entry),
            _ => unreachable!(),
        }
    }
    match &mut bucket.slots[OVERFLOW_SLOT] {
        Slot::Overflow(child) => lookup_in_mut(child, key),
        _ => None,
    }
}

fn delete_in<K: TableKey, V>(bucket: &mut Bucket<K, V>, key: &K) -> Option<V> {
    for i in 0..BUCKET_SLOTS {
        let matches = match &bucket.slots[i] {
            Slot::Entry(entry) => entry.key == *key,
            _ => false,
        };
        if matches {
            match mem::replace(&mut bucket.slots[i], Slot::Tombstone) {
                Slot::Entry(entry) => return Some(entry.value),
                _ => unreachable!(),
            }
        }
    }
    match &mut bucket.slots[OVERFLOW_SLOT] {
        Slot::Overflow(child) => delete_in(child, key),
        _ => None,
    }
}

fn place<K: TableKey, V>(
    bucket: &mut Bucket<K, V>,
    chain_left: usize,
    pool: &mut OverflowPool<K, V>,
    entry: Entry<K, V>,
) -> Result<(), InsertError> {
    for slot in bucket.slots.iter_mut() {
        if matches!(slot, Slot::Empty | Slot::Tombstone) {
            *slot = Slot::Entry(entry);
            return Ok(());
        }
    }
    // No free slot: the final slot is either an entry to displace or an
    // existing overflow pointer to follow.
    match &mut bucket.slots[OVERFLOW_SLOT] {
        Slot::Overflow(child) => place(child, chain_left - 1, pool, entry),
        Slot::Entry(_) => {
            if chain_left <= 1 {
                return Err(InsertError::Exhausted);
            }
            let mut child = pool.acquire();
            child.slots[0] = mem::replace(&mut bucket.slots[OVERFLOW_SLOT], Slot::Empty);
            child.slots[1] = Slot::Entry(entry);
            bucket.slots[OVERFLOW_SLOT] = Slot::Overflow(child);
            Ok(())
        }
        _ => unreachable!(),
    }
}

fn mark_chain<K: TableKey, V>(
    bucket: &mut Bucket<K, V>,
    keep: &mut impl FnMut(&K, &mut V) -> bool,
    removed: &mut usize,
) {
    for i in 0..BUCKET_SLOTS {
        let keep_entry = match &mut bucket.slots[i] {
            Slot::Entry(entry) => keep(&entry.key, &mut entry.value),
            _ => continue,
        };
        if !keep_entry {
            bucket.slots[i] = Slot::Tombstone;
            *removed += 1;
        }
    }
    if let Slot::Overflow(child) = &mut bucket.slots[OVERFLOW_SLOT] {
        mark_chain(child, keep, removed);
    }
}

/// One recursive sweep pass: evict, descend, pull up, compact.
fn sweep_chain<K: TableKey, V>(
    bucket: &mut Bucket<K, V>,
    now: Option<TimerSnapshot>,
    pool: &mut OverflowPool<K, V>,
    evict: &mut dyn FnMut(K, V),
) -> usize {
    let mut removed = 0;

    // Evict expired entries and reclaim tombstones in this bucket.
    for slot in bucket.slots.iter_mut() {
        match slot {
            Slot::Tombstone => *slot = Slot::Empty,
            Slot::Entry(entry) => {
                let expired = match (now, entry.expiry) {
                    (Some(snapshot), Some(tag)) => snapshot.is_expired(tag),
                    _ => false,
                };
                if expired {
                    match mem::replace(slot, Slot::Empty) {
                        Slot::Entry(entry) => {
                            evict(entry.key, entry.value);
                            removed += 1;
                        }
                        _ => unreachable!(),
                    }
                }
            }
            _ => {}
        }
    }

    // Recurse into the overflow child, then compact on the way back up.
    if matches!(bucket.slots[OVERFLOW_SLOT], Slot::Overflow(_)) {
        let mut child = match mem::replace(&mut bucket.slots[OVERFLOW_SLOT], Slot::Empty) {
            Slot::Overflow(child) => child,
            _ => unreachable!(),
        };
        removed += sweep_chain(&mut child, now, pool, evict);

        // Pull child entries up into our empty slots.
        for i in 0..BUCKET_SLOTS {
            if !matches!(child.slots[i], Slot::Entry(_)) {
                continue;
            }
            match (0..OVERFLOW_SLOT).find(|&j| matches!(bucket.slots[j], Slot::Empty)) {
                Some(j) => bucket.slots[j] = mem::replace(&mut child.slots[i], Slot::Empty),
                None => break,
            }
        }

        let child_entries = child.entry_count();
        let child_has_overflow = matches!(child.slots[OVERFLOW_SLOT], Slot::Overflow(_));
        if child_entries == 0 && !child_has_overflow {
            pool.release(child);
        } else if child_entries == 1 && !child_has_overflow {
            // Collapse the single survivor into our final slot.
            let i = (0..BUCKET_SLOTS)
                .find(|&i| matches!(child.slots[i], Slot::Entry(_)))
                .unwrap();
            bucket.slots[OVERFLOW_SLOT] = mem::replace(&mut child.slots[i], Slot::Empty);
            pool.release(child);
        } else {
            bucket.slots[OVERFLOW_SLOT] = Slot::Overflow(child);
        }
    }

    // Pack surviving entries toward the front of the bucket.
    let limit = if matches!(bucket.slots[OVERFLOW_SLOT], Slot::Overflow(_)) {
        OVERFLOW_SLOT
    } else {
        BUCKET_SLOTS
    };
    let mut write = 0;
    for read in 0..limit {
        if matches!(bucket.slots[read], Slot::Entry(_)) {
            if read != write {
                bucket.slots.swap(read, write);
            }
            write += 1;
        }
    }

    removed
}

/// Iterator over all live entries; tombstones are skipped.
pub struct Iter<'a, K: TableKey, V> {
    table: &'a HashTable<K, V>,
    bucket_idx: usize,
    current: Option<&'a Bucket<K, V>>,
    slot: usize,
}

impl<'a, K: TableKey, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let bucket = self.current?;
            if self.slot >= BUCKET_SLOTS {
                self.bucket_idx += 1;
                self.current = self.table.buckets.get(self.bucket_idx);
                self.slot = 0;
                continue;
            }
            let slot = &bucket.slots[self.slot];
            self.slot += 1;
            match slot {
                Slot::Entry(entry) => return Some((&entry.key, &entry.value)),
                Slot::Overflow(child) => {
                    self.current = Some(child);
                    self.slot = 0;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icnfwd_common::ticks::TimerClass;

    /// Key with a fixed hash so collision layouts are deterministic.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Key {
        hash: u64,
        id: u32,
    }

    impl TableKey for Key {
        fn table_hash(&self) -> u64 {
            self.hash
        }
    }

    fn key(hash: u64, id: u32) -> Key {
        Key { hash, id }
    }

    fn fast_tag(tag: u16) -> Option<ExpiryTag> {
        Some(ExpiryTag {
            class: TimerClass::Fast,
            tag,
        })
    }

    fn snapshot(fast: u16) -> TimerSnapshot {
        TimerSnapshot { fast, slow: 0 }
    }

    impl<K: TableKey, V> HashTable<K, V> {
        /// Chain structure checks used by the tests below.
        fn assert_chain_shape(&self, idx: usize, compact: bool) {
            let mut bucket = &self.buckets[idx];
            loop {
                // Overflow pointers only ever live in the final slot.
                for slot in &bucket.slots[..OVERFLOW_SLOT] {
                    assert!(!matches!(slot, Slot::Overflow(_)));
                }
                if compact {
                    // No empty slot before a present one in the same bucket.
                    let mut seen_gap = false;
                    for slot in &bucket.slots {
                        match slot {
                            Slot::Empty | Slot::Tombstone => seen_gap = true,
                            Slot::Entry(_) => {
                                assert!(!seen_gap, "present entry after a gap")
                            }
                            Slot::Overflow(_) => {}
                        }
                    }
                }
                match &bucket.slots[OVERFLOW_SLOT] {
                    Slot::Overflow(child) => bucket = child,
                    _ => break,
                }
            }
        }

        fn chain_buckets(&self, idx: usize) -> usize {
            let mut count = 1;
            let mut bucket = &self.buckets[idx];
            while let Slot::Overflow(child) = &bucket.slots[OVERFLOW_SLOT] {
                count += 1;
                bucket = child;
            }
            count
        }
    }

    #[test]
    fn insert_lookup_delete() {
        let mut table: HashTable<Key, &str> = HashTable::new(16);
        assert!(table.insert(key(1, 1), "one", None).is_ok());
        assert!(table.insert(key(2, 2), "two", None).is_ok());
        assert_eq!(
            table.insert(key(1, 1), "dup", None),
            Err(InsertError::Duplicate)
        );

        assert_eq!(table.lookup(&key(1, 1)), Some(&"one"));
        assert_eq!(table.lookup(&key(3, 3)), None);
        assert_eq!(table.len(), 2);

        assert_eq!(table.delete(&key(1, 1)), Some("one"));
        assert_eq!(table.delete(&key(1, 1)), None);
        assert_eq!(table.lookup(&key(1, 1)), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn tombstone_slot_is_reusable() {
        let mut table: HashTable<Key, u32> = HashTable::new(4);
        table.insert(key(0, 1), 1, None).unwrap();
        table.delete(&key(0, 1)).unwrap();
        // Same bucket, new key lands in the tombstoned slot.
        table.insert(key(0, 2), 2, None).unwrap();
        assert_eq!(table.lookup(&key(0, 2)), Some(&2));
        assert_eq!(table.chain_buckets(0), 1);
    }

    #[test]
    fn colliding_inserts_grow_an_overflow_chain() {
        let mut table: HashTable<Key, u32> = HashTable::new(4);
        for id in 0..12 {
            table.insert(key(0, id), id, None).unwrap();
        }
        assert_eq!(table.len(), 12);
        assert_eq!(table.chain_buckets(0), 2);
        table.assert_chain_shape(0, false);
        for id in 0..12 {
            assert_eq!(table.lookup(&key(0, id)), Some(&id));
        }
        // Other buckets untouched.
        assert_eq!(table.chain_buckets(1), 1);
    }

    #[test]
    fn chain_depth_limit_fails_cleanly() {
        let mut table: HashTable<Key, u32> = HashTable::new(1).with_max_chain(2);
        // 2 buckets * 8 slots, one slot consumed per bucket by the overflow
        // pointer except the tail: 7 + 8 entries fit.
        let mut stored = 0;
        let mut exhausted = false;
        for id in 0..100 {
            match table.insert(key(0, id), id, None) {
                Ok(()) => stored += 1,
                Err(InsertError::Exhausted) => {
                    exhausted = true;
                    break;
                }
                Err(other) => panic!("unexpected {:?}", other),
            }
        }
        assert!(exhausted);
        assert_eq!(stored, 15);
        assert_eq!(table.len(), 15);
        // The failed insert left every stored entry reachable.
        for id in 0..15 {
            assert_eq!(table.lookup(&key(0, id)), Some(&id));
        }
    }

    #[test]
    fn sweep_evicts_expired_and_returns_overflow_to_pool() {
        let mut table: HashTable<Key, u32> = HashTable::new(4);
        // 12 colliding entries: 7 in the head bucket, 5 in one overflow.
        for id in 0..12 {
            // Entries 0..7 stay alive, the rest expire at fast tick 5.
            let tag = if id < 7 { fast_tag(100) } else { fast_tag(5) };
            table.insert(key(0, id), id, tag).unwrap();
        }
        assert_eq!(table.chain_buckets(0), 2);

        let mut evicted = Vec::new();
        table.sweep_bucket(0, snapshot(10), &mut |k, _v| evicted.push(k.id));
        evicted.sort_unstable();
        assert_eq!(evicted, vec![7, 8, 9, 10, 11]);
        assert_eq!(table.len(), 7);

        // The emptied overflow bucket went back to the pool and the head
        // bucket is compact again.
        assert_eq!(table.chain_buckets(0), 1);
        assert_eq!(table.pool_available(), 1);
        table.assert_chain_shape(0, true);
        for id in 0..7 {
            assert_eq!(table.lookup(&key(0, id)), Some(&id));
        }
    }

    #[test]
    fn sweep_pulls_survivors_up_from_overflow() {
        let mut table: HashTable<Key, u32> = HashTable::new(4);
        for id in 0..12 {
            // Expire most of the head bucket, keep the overflow entries.
            let tag = if id < 6 { fast_tag(5) } else { fast_tag(100) };
            table.insert(key(0, id), id, tag).unwrap();
        }

        let mut evicted = 0;
        table.sweep_bucket(0, snapshot(10), &mut |_k, _v| evicted += 1);
        assert_eq!(evicted, 6);
        assert_eq!(table.len(), 6);
        // Survivors 6..12 all fit in the head bucket now.
        assert_eq!(table.chain_buckets(0), 1);
        table.assert_chain_shape(0, true);
        for id in 6..12 {
            assert_eq!(table.lookup(&key(0, id)), Some(&id));
        }
    }

    #[test]
    fn sweep_reclaims_tombstones() {
        let mut table: HashTable<Key, u32> = HashTable::new(4);
        for id in 0..6 {
            table.insert(key(0, id), id, None).unwrap();
        }
        table.delete(&key(0, 2)).unwrap();
        table.delete(&key(0, 4)).unwrap();

        table.sweep_bucket(0, snapshot(0), &mut |_k, _v| {
            panic!("nothing should expire")
        });
        table.assert_chain_shape(0, true);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn slow_class_tags_expire_against_the_slow_counter() {
        let mut table: HashTable<Key, u32> = HashTable::new(4);
        table
            .insert(
                key(0, 1),
                1,
                Some(ExpiryTag {
                    class: TimerClass::Slow,
                    tag: 3,
                }),
            )
            .unwrap();

        let mut evicted = 0;
        // Fast counter way past 3, slow counter not there yet: survives.
        table.sweep_index(0, TimerSnapshot { fast: 500, slow: 2 }, &mut |_k, _v| {
            evicted += 1
        });
        assert_eq!(evicted, 0);
        table.sweep_index(0, TimerSnapshot { fast: 500, slow: 3 }, &mut |_k, _v| {
            evicted += 1
        });
        assert_eq!(evicted, 1);
    }

    #[test]
    fn retain_removes_and_compacts() {
        let mut table: HashTable<Key, u32> = HashTable::new(4);
        for id in 0..20 {
            table.insert(key(id as u64 % 4, id), id, None).unwrap();
        }
        table.retain(|_k, v| *v % 2 == 0);
        assert_eq!(table.len(), 10);
        for idx in 0..4 {
            table.assert_chain_shape(idx, true);
        }
        assert_eq!(table.lookup(&key(1, 1)), None);
        assert_eq!(table.lookup(&key(2, 2)), Some(&2));
    }

    #[test]
    fn iter_visits_every_entry_once() {
        let mut table: HashTable<Key, u32> = HashTable::new(2);
        for id in 0..20 {
            table.insert(key(id as u64 % 2, id), id, None).unwrap();
        }
        table.delete(&key(1, 19)).unwrap();

        let mut seen: Vec<u32> = table.iter().map(|(_k, v)| *v).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..19).collect::<Vec<_>>());
    }

    #[test]
    fn pool_reuses_released_buckets() {
        let mut table: HashTable<Key, u32> = HashTable::new(1);
        for id in 0..12 {
            table.insert(key(0, id), id, fast_tag(1)).unwrap();
        }
        table.sweep_index(0, snapshot(2), &mut |_k, _v| {});
        assert_eq!(table.len(), 0);
        assert_eq!(table.pool_available(), 1);

        // Growing the chain again consumes the pooled bucket.
        for id in 0..12 {
            table.insert(key(0, id), id, fast_tag(10)).unwrap();
        }
        assert_eq!(table.pool_available(), 0);
    }
}
