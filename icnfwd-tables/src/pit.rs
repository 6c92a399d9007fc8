//! Pending Interest Table.
//!
//! Reverse-path state: one entry per outstanding fingerprint, tracking the
//! connections waiting for a response (ingress set) and the connections
//! the Interest went out to (egress set). Entries are shared
//! (`Rc<RefCell<..>>`) across up to three fingerprint indices and expire
//! through the hash tables' compressed tags, reaped by opportunistic
//! bucket sweeps.

use crate::fib::FibEntryRef;
use crate::fingerprint::FingerprintKey;
use crate::hashtable::{HashTable, InsertError};
use icnfwd_common::message::DEFAULT_INTEREST_LIFETIME_MS;
use icnfwd_common::{
    ConnectionId, Error, Message, Ticks, Timebase, TimerSnapshot, MAX_INTEREST_LIFETIME_MS,
};
use log::trace;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Arc;

/// Reverse-path state for one outstanding Interest fingerprint.
#[derive(Debug)]
pub struct PitEntry {
    interest: Arc<Message>,
    ingress: BTreeSet<ConnectionId>,
    egress: BTreeSet<ConnectionId>,
    fib_entry: Option<FibEntryRef>,
    creation: Ticks,
    expiry: Ticks,
}

impl PitEntry {
    pub fn interest(&self) -> &Arc<Message> {
        &self.interest
    }

    pub fn ingress(&self) -> &BTreeSet<ConnectionId> {
        &self.ingress
    }

    pub fn egress(&self) -> &BTreeSet<ConnectionId> {
        &self.egress
    }

    pub fn add_egress(&mut self, connection: ConnectionId) {
        self.egress.insert(connection);
    }

    /// The FIB entry the Interest was forwarded under. Set once; later
    /// retransmissions reuse the same (live) entry.
    pub fn fib_entry(&self) -> Option<&FibEntryRef> {
        self.fib_entry.as_ref()
    }

    pub fn set_fib_entry(&mut self, fib_entry: FibEntryRef) {
        if self.fib_entry.is_none() {
            self.fib_entry = Some(fib_entry);
        }
    }

    pub fn creation(&self) -> Ticks {
        self.creation
    }

    pub fn expiry(&self) -> Ticks {
        self.expiry
    }
}

pub type PitEntryRef = Rc<RefCell<PitEntry>>;

/// Outcome of [`Pit::receive_interest`].
#[derive(Debug)]
pub enum PitVerdict {
    /// A retransmission from a connection already waiting: re-forward per
    /// strategy.
    Forward(PitEntryRef),
    /// Joined an existing entry's ingress set: suppress forwarding.
    Aggregate,
    /// First Interest for this fingerprint: consult the FIB and forward.
    Miss(PitEntryRef),
}

pub struct Pit {
    by_name: HashTable<FingerprintKey, PitEntryRef>,
    by_keyid: HashTable<FingerprintKey, PitEntryRef>,
    by_hash: HashTable<FingerprintKey, PitEntryRef>,
    default_lifetime_ms: u64,
    max_lifetime_ms: u64,
}

impl Pit {
    pub fn new(buckets: usize) -> Self {
        Self {
            by_name: HashTable::new(buckets),
            by_keyid: HashTable::new(buckets / 4),
            by_hash: HashTable::new(buckets / 4),
            default_lifetime_ms: DEFAULT_INTEREST_LIFETIME_MS,
            max_lifetime_ms: MAX_INTEREST_LIFETIME_MS,
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn effective_lifetime(&self, interest: &Message) -> u64 {
        let lifetime = interest.lifetime_ms();
        let lifetime = if lifetime == 0 {
            self.default_lifetime_ms
        } else {
            lifetime
        };
        lifetime.min(self.max_lifetime_ms)
    }

    fn keys_for(
        interest: &Message,
    ) -> (
        FingerprintKey,
        Option<FingerprintKey>,
        Option<FingerprintKey>,
    ) {
        let name_key = FingerprintKey::name_key(interest.name());
        let keyid_key = interest
            .key_id_restriction()
            .map(|key_id| FingerprintKey::keyid_key(interest.name(), key_id));
        let hash_key = interest
            .hash_restriction()
            .map(|hash| FingerprintKey::hash_key(interest.name(), hash));
        (name_key, keyid_key, hash_key)
    }

    /// Handle one arriving Interest.
    ///
    /// The fingerprint trio is consulted in priority order name,
    /// name+keyid, name+hash. Joining an existing entry extends its
    /// lifetime; a connection already in the ingress set means the peer
    /// retransmitted and the verdict is [`PitVerdict::Forward`].
    pub fn receive_interest(
        &mut self,
        interest: &Arc<Message>,
        timebase: &Timebase,
    ) -> Result<PitVerdict, Error> {
        let now = timebase.now();
        let (name_key, keyid_key, hash_key) = Self::keys_for(interest);

        let existing = self
            .by_name
            .lookup(&name_key)
            .or_else(|| {
                keyid_key
                    .as_ref()
                    .and_then(|key| self.by_keyid.lookup(key))
            })
            .or_else(|| hash_key.as_ref().and_then(|key| self.by_hash.lookup(key)))
            .cloned();

        if let Some(entry) = existing {
            if entry.borrow().expiry <= now {
                // Stale entry the sweep has not reaped yet.
                self.remove_entry(&entry);
            } else {
                let ingress = interest.ingress();
                let retransmission = {
                    let mut inner = entry.borrow_mut();
                    let new_expiry = (now + self.effective_lifetime(interest)).max(inner.expiry);
                    inner.expiry = new_expiry;
                    !inner.ingress.insert(ingress)
                };
                self.retag_entry(&entry, timebase);
                return Ok(if retransmission {
                    trace!("pit: retransmission of {} from {}", interest.name(), ingress);
                    PitVerdict::Forward(entry)
                } else {
                    trace!("pit: aggregated {} onto existing entry", interest.name());
                    PitVerdict::Aggregate
                });
            }
        }

        // Miss: build a fresh entry and register every fingerprint the
        // Interest carries.
        let expiry = now + self.effective_lifetime(interest);
        let tag = Some(timebase.tag_for_expiry(expiry));
        let entry: PitEntryRef = Rc::new(RefCell::new(PitEntry {
            interest: interest.clone(),
            ingress: BTreeSet::from([interest.ingress()]),
            egress: BTreeSet::new(),
            fib_entry: None,
            creation: now,
            expiry,
        }));

        self.by_name
            .insert(name_key.clone(), entry.clone(), tag)
            .map_err(|err| Self::insert_error(err))?;
        if let Some(key) = &keyid_key {
            if let Err(err) = self.by_keyid.insert(key.clone(), entry.clone(), tag) {
                self.by_name.delete(&name_key);
                return Err(Self::insert_error(err));
            }
        }
        if let Some(key) = &hash_key {
            if let Err(err) = self.by_hash.insert(key.clone(), entry.clone(), tag) {
                self.by_name.delete(&name_key);
                if let Some(key) = &keyid_key {
                    self.by_keyid.delete(key);
                }
                return Err(Self::insert_error(err));
            }
        }

        Ok(PitVerdict::Miss(entry))
    }

    fn insert_error(err: InsertError) -> Error {
        match err {
            InsertError::Exhausted => Error::Exhausted("pit bucket chain full".into()),
            InsertError::Duplicate => Error::Other("pit fingerprint raced itself".into()),
        }
    }

    /// Collect and remove every entry this ContentObject satisfies.
    /// Returns the union of their ingress sets.
    pub fn satisfy_interest(&mut self, object: &Arc<Message>, now: Ticks) -> Vec<ConnectionId> {
        let mut matched: Vec<PitEntryRef> = Vec::new();
        let mut push_unique = |matched: &mut Vec<PitEntryRef>, entry: &PitEntryRef| {
            if !matched.iter().any(|seen| Rc::ptr_eq(seen, entry)) {
                matched.push(entry.clone());
            }
        };

        if let Some(entry) = self
            .by_name
            .lookup(&FingerprintKey::name_key(object.name()))
        {
            let entry = entry.clone();
            push_unique(&mut matched, &entry);
        }
        if let Some(key_id) = object.key_id() {
            if let Some(entry) = self
                .by_keyid
                .lookup(&FingerprintKey::keyid_key(object.name(), key_id))
            {
                let entry = entry.clone();
                push_unique(&mut matched, &entry);
            }
        }
        if let Some(hash) = object.object_hash() {
            if let Some(entry) = self
                .by_hash
                .lookup(&FingerprintKey::hash_key(object.name(), hash))
            {
                let entry = entry.clone();
                push_unique(&mut matched, &entry);
            }
        }

        let mut reverse: BTreeSet<ConnectionId> = BTreeSet::new();
        for entry in matched {
            self.remove_entry(&entry);
            let inner = entry.borrow();
            if inner.expiry > now {
                reverse.extend(inner.ingress.iter().copied());
            }
        }
        reverse.into_iter().collect()
    }

    /// Drop an entry from every index it was registered in.
    fn remove_entry(&mut self, entry: &PitEntryRef) {
        let (name_key, keyid_key, hash_key) = Self::keys_for(&entry.borrow().interest);
        self.by_name.delete(&name_key);
        if let Some(key) = keyid_key {
            self.by_keyid.delete(&key);
        }
        if let Some(key) = hash_key {
            self.by_hash.delete(&key);
        }
    }

    fn retag_entry(&mut self, entry: &PitEntryRef, timebase: &Timebase) {
        let (name_key, keyid_key, hash_key) = Self::keys_for(&entry.borrow().interest);
        let tag = Some(timebase.tag_for_expiry(entry.borrow().expiry));
        self.by_name.retag(&name_key, tag);
        if let Some(key) = keyid_key {
            self.by_keyid.retag(&key, tag);
        }
        if let Some(key) = hash_key {
            self.by_hash.retag(&key, tag);
        }
    }

    /// Opportunistic expiry: sweep the next `buckets` chains of each
    /// index. Returns the number of entries that expired.
    pub fn sweep(&mut self, snapshot: TimerSnapshot, buckets: usize) -> usize {
        let mut expired_total = 0;

        let mut evicted: Vec<PitEntryRef> = Vec::new();
        self.by_name
            .sweep_step(buckets, snapshot, &mut |_key, entry| evicted.push(entry));
        for entry in evicted.drain(..) {
            let (_, keyid_key, hash_key) = Self::keys_for(&entry.borrow().interest);
            if let Some(key) = keyid_key {
                self.by_keyid.delete(&key);
            }
            if let Some(key) = hash_key {
                self.by_hash.delete(&key);
            }
            expired_total += 1;
        }

        self.by_keyid
            .sweep_step(buckets, snapshot, &mut |_key, entry| evicted.push(entry));
        for entry in evicted.drain(..) {
            let (name_key, _, hash_key) = Self::keys_for(&entry.borrow().interest);
            if self.by_name.delete(&name_key).is_some() {
                expired_total += 1;
            }
            if let Some(key) = hash_key {
                self.by_hash.delete(&key);
            }
        }

        self.by_hash
            .sweep_step(buckets, snapshot, &mut |_key, entry| evicted.push(entry));
        for entry in evicted.drain(..) {
            let (name_key, keyid_key, _) = Self::keys_for(&entry.borrow().interest);
            if self.by_name.delete(&name_key).is_some() {
                expired_total += 1;
            }
            if let Some(key) = keyid_key {
                self.by_keyid.delete(&key);
            }
        }

        expired_total
    }

    /// A connection went away: strip it from every entry; entries whose
    /// ingress set empties are removed outright.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> usize {
        let mut orphaned: Vec<PitEntryRef> = Vec::new();
        self.by_name.retain(|_key, entry| {
            let mut inner = entry.borrow_mut();
            inner.ingress.remove(&connection);
            inner.egress.remove(&connection);
            if inner.ingress.is_empty() {
                drop(inner);
                orphaned.push(entry.clone());
                false
            } else {
                true
            }
        });
        let removed = orphaned.len();
        for entry in orphaned {
            let (_, keyid_key, hash_key) = Self::keys_for(&entry.borrow().interest);
            if let Some(key) = keyid_key {
                self.by_keyid.delete(&key);
            }
            if let Some(key) = hash_key {
                self.by_hash.delete(&key);
            }
        }
        removed
    }
}
