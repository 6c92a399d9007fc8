//! Content Store: a bounded cache of ContentObjects.
//!
//! Objects live in a slab and are reachable through three fingerprint
//! indices (name, name+keyid, name+hash), an LRU list threaded through the
//! slab entries, a by-expiry index, and a by-recommended-cache-time index.
//! Eviction order when over capacity: expired first, then past the
//! recommended cache time, then the LRU tail.

use crate::fingerprint::FingerprintKey;
use crate::hashtable::HashTable;
use icnfwd_common::{Message, Name, Ticks, Timebase, TimerSnapshot};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

const NIL: u32 = u32::MAX;

/// Outcome of [`ContentStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsPutResult {
    /// Cached. `replaced` means a same-name entry was overwritten;
    /// `evicted` counts entries dropped during this put (expired sweeps
    /// plus capacity evictions), never the replaced one.
    Stored { replaced: bool, evicted: usize },
    Rejected,
}

/// Which index already dropped its reference before a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweptIndex {
    None,
    Name,
    KeyId,
    Hash,
    Expiry,
}

#[derive(Debug)]
struct CsEntry {
    object: Arc<Message>,
    creation: Ticks,
    expiry: Option<Ticks>,
    cache_until: Option<Ticks>,
    indexed_keyid: bool,
    indexed_hash: bool,
    lru_prev: u32,
    lru_next: u32,
}

pub struct ContentStore {
    entries: Vec<Option<CsEntry>>,
    free: Vec<u32>,
    by_name: HashTable<FingerprintKey, u32>,
    by_keyid: HashTable<FingerprintKey, u32>,
    by_hash: HashTable<FingerprintKey, u32>,
    by_expiry: BTreeSet<(Ticks, u32)>,
    by_cache_time: BTreeSet<(Ticks, u32)>,
    lru_head: u32,
    lru_tail: u32,
    capacity: usize,
    len: usize,
    store_enabled: bool,
    serve_enabled: bool,
    wall_offset: u64,
}

impl ContentStore {
    pub fn new(capacity: usize) -> Self {
        let buckets = (capacity / 4).clamp(16, 1 << 16);
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            by_name: HashTable::new(buckets),
            by_keyid: HashTable::new(buckets / 4),
            by_hash: HashTable::new(buckets / 4),
            by_expiry: BTreeSet::new(),
            by_cache_time: BTreeSet::new(),
            lru_head: NIL,
            lru_tail: NIL,
            capacity,
            len: 0,
            store_enabled: true,
            serve_enabled: true,
            wall_offset: 0,
        }
    }

    /// Wall-clock milliseconds at tick zero, used to convert declared
    /// expiry times into ticks.
    pub fn set_wall_offset(&mut self, wall_ms: u64) {
        self.wall_offset = wall_ms;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize, now: Ticks) {
        self.capacity = capacity;
        while self.len > self.capacity {
            if !self.evict_one(now) {
                break;
            }
        }
    }

    pub fn set_store_enabled(&mut self, enabled: bool) {
        self.store_enabled = enabled;
    }

    pub fn set_serve_enabled(&mut self, enabled: bool) {
        self.serve_enabled = enabled;
    }

    /// Cache a ContentObject. Replaces any object already cached under the
    /// same exact name.
    pub fn put(&mut self, object: Arc<Message>, timebase: &Timebase) -> CsPutResult {
        if !self.store_enabled || self.capacity == 0 {
            return CsPutResult::Rejected;
        }
        let now = timebase.now();
        let mut evicted = self.sweep_expired(now);

        let name_key = FingerprintKey::name_key(object.name());
        let mut replaced = false;
        if let Some(&stale) = self.by_name.lookup(&name_key) {
            self.release(stale, SweptIndex::None);
            replaced = true;
        }

        let expiry = object
            .expiry_ms()
            .map(|wall| wall.saturating_sub(self.wall_offset));
        let cache_until = object.recommended_cache_ms().map(|delta| now + delta);

        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.entries.push(None);
                (self.entries.len() - 1) as u32
            }
        };

        let tag = expiry.map(|e| timebase.tag_for_expiry(e));
        if let Err(err) = self.by_name.insert(name_key, idx, tag) {
            warn!("cs: name index refused {}: {:?}", object.name(), err);
            self.free.push(idx);
            return CsPutResult::Rejected;
        }

        let mut indexed_keyid = false;
        if let Some(key_id) = object.key_id() {
            let key = FingerprintKey::keyid_key(object.name(), key_id);
            indexed_keyid = self.by_keyid.insert(key, idx, tag).is_ok();
        }
        let mut indexed_hash = false;
        if let Some(hash) = object.object_hash() {
            let key = FingerprintKey::hash_key(object.name(), hash);
            indexed_hash = self.by_hash.insert(key, idx, tag).is_ok();
        }

        if let Some(expiry) = expiry {
            self.by_expiry.insert((expiry, idx));
        }
        if let Some(until) = cache_until {
            self.by_cache_time.insert((until, idx));
        }

        self.entries[idx as usize] = Some(CsEntry {
            object,
            creation: now,
            expiry,
            cache_until,
            indexed_keyid,
            indexed_hash,
            lru_prev: NIL,
            lru_next: NIL,
        });
        self.lru_push_front(idx);
        self.len += 1;

        while self.len > self.capacity {
            if !self.evict_one(now) {
                break;
            }
            evicted += 1;
        }
        CsPutResult::Stored { replaced, evicted }
    }

    /// First unexpired object matching the Interest's fingerprint, promoted
    /// to the LRU head.
    pub fn match_interest(
        &mut self,
        interest: &Message,
        timebase: &Timebase,
    ) -> Option<Arc<Message>> {
        if !self.serve_enabled {
            return None;
        }
        let now = timebase.now();
        let idx = if let Some(hash) = interest.hash_restriction() {
            self.by_hash
                .lookup(&FingerprintKey::hash_key(interest.name(), hash))
        } else if let Some(key_id) = interest.key_id_restriction() {
            self.by_keyid
                .lookup(&FingerprintKey::keyid_key(interest.name(), key_id))
        } else {
            self.by_name
                .lookup(&FingerprintKey::name_key(interest.name()))
        }
        .copied()?;

        let expired = {
            let entry = self.entries[idx as usize].as_ref()?;
            matches!(entry.expiry, Some(expiry) if now >= expiry)
        };
        if expired {
            self.release(idx, SweptIndex::None);
            return None;
        }

        self.lru_detach(idx);
        self.lru_push_front(idx);
        self.entries[idx as usize]
            .as_ref()
            .map(|entry| entry.object.clone())
    }

    /// Best-effort removal of the object cached under `name`.
    pub fn remove(&mut self, name: &Name) {
        if let Some(&idx) = self.by_name.lookup(&FingerprintKey::name_key(name)) {
            self.release(idx, SweptIndex::None);
        }
    }

    /// Evict every entry whose expiry tick has passed. Returns the number
    /// evicted.
    pub fn sweep_expired(&mut self, now: Ticks) -> usize {
        let mut evicted = 0;
        while let Some(&(expiry, idx)) = self.by_expiry.iter().next() {
            if expiry > now {
                break;
            }
            self.by_expiry.remove(&(expiry, idx));
            self.release(idx, SweptIndex::Expiry);
            evicted += 1;
        }
        if evicted > 0 {
            debug!("cs: swept {} expired objects", evicted);
        }
        evicted
    }

    /// Opportunistic bucket sweep over the fingerprint indices: evicts
    /// entries whose compressed expiry tags have passed and reclaims
    /// tombstones left by deferred deletes.
    pub fn sweep_buckets(&mut self, snapshot: TimerSnapshot, buckets: usize) {
        let mut expired: Vec<u32> = Vec::new();
        self.by_name
            .sweep_step(buckets, snapshot, &mut |_key, idx| expired.push(idx));
        for idx in expired.drain(..) {
            self.release(idx, SweptIndex::Name);
        }
        self.by_keyid
            .sweep_step(buckets, snapshot, &mut |_key, idx| expired.push(idx));
        for idx in expired.drain(..) {
            self.release(idx, SweptIndex::KeyId);
        }
        self.by_hash
            .sweep_step(buckets, snapshot, &mut |_key, idx| expired.push(idx));
        for idx in expired.drain(..) {
            self.release(idx, SweptIndex::Hash);
        }
    }

    /// Drop one entry to make room: expired first, then past its
    /// recommended cache time, then the LRU tail.
    fn evict_one(&mut self, now: Ticks) -> bool {
        if let Some(&(expiry, idx)) = self.by_expiry.iter().next() {
            if expiry <= now {
                self.by_expiry.remove(&(expiry, idx));
                self.release(idx, SweptIndex::Expiry);
                return true;
            }
        }
        if let Some(&(until, idx)) = self.by_cache_time.iter().next() {
            if until <= now {
                self.release(idx, SweptIndex::None);
                return true;
            }
        }
        if self.lru_tail != NIL {
            self.release(self.lru_tail, SweptIndex::None);
            return true;
        }
        false
    }

    /// Unlink an entry from every structure except the one that already
    /// dropped it, and free its slab slot.
    fn release(&mut self, idx: u32, swept: SweptIndex) {
        let Some(entry) = self.entries[idx as usize].take() else {
            return;
        };

        if swept != SweptIndex::Name {
            self.by_name
                .delete(&FingerprintKey::name_key(entry.object.name()));
        }
        if entry.indexed_keyid && swept != SweptIndex::KeyId {
            if let Some(key_id) = entry.object.key_id() {
                self.by_keyid
                    .delete(&FingerprintKey::keyid_key(entry.object.name(), key_id));
            }
        }
        if entry.indexed_hash && swept != SweptIndex::Hash {
            if let Some(hash) = entry.object.object_hash() {
                self.by_hash
                    .delete(&FingerprintKey::hash_key(entry.object.name(), hash));
            }
        }
        if swept != SweptIndex::Expiry {
            if let Some(expiry) = entry.expiry {
                self.by_expiry.remove(&(expiry, idx));
            }
        }
        if let Some(until) = entry.cache_until {
            self.by_cache_time.remove(&(until, idx));
        }

        // LRU unlink using the links stored on the removed entry.
        if entry.lru_prev != NIL {
            if let Some(prev) = self.entries[entry.lru_prev as usize].as_mut() {
                prev.lru_next = entry.lru_next;
            }
        } else {
            self.lru_head = entry.lru_next;
        }
        if entry.lru_next != NIL {
            if let Some(next) = self.entries[entry.lru_next as usize].as_mut() {
                next.lru_prev = entry.lru_prev;
            }
        } else {
            self.lru_tail = entry.lru_prev;
        }

        self.free.push(idx);
        self.len -= 1;
    }

    fn lru_push_front(&mut self, idx: u32) {
        let old_head = self.lru_head;
        if let Some(entry) = self.entries[idx as usize].as_mut() {
            entry.lru_prev = NIL;
            entry.lru_next = old_head;
        }
        if old_head != NIL {
            if let Some(head) = self.entries[old_head as usize].as_mut() {
                head.lru_prev = idx;
            }
        } else {
            self.lru_tail = idx;
        }
        self.lru_head = idx;
    }

    fn lru_detach(&mut self, idx: u32) {
        let (prev, next) = match self.entries[idx as usize].as_ref() {
            Some(entry) => (entry.lru_prev, entry.lru_next),
            None => return,
        };
        if prev != NIL {
            if let Some(entry) = self.entries[prev as usize].as_mut() {
                entry.lru_next = next;
            }
        } else {
            self.lru_head = next;
        }
        if next != NIL {
            if let Some(entry) = self.entries[next as usize].as_mut() {
                entry.lru_prev = prev;
            }
        } else {
            self.lru_tail = prev;
        }
        if let Some(entry) = self.entries[idx as usize].as_mut() {
            entry.lru_prev = NIL;
            entry.lru_next = NIL;
        }
    }

    /// Age of the oldest cached object, for diagnostics.
    pub fn oldest_creation(&self) -> Option<Ticks> {
        if self.lru_tail == NIL {
            return None;
        }
        self.entries[self.lru_tail as usize]
            .as_ref()
            .map(|entry| entry.creation)
    }
}
