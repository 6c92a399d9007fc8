//! Forwarding Information Base.
//!
//! Longest-prefix match from name prefixes to sets of next-hop
//! connections. Organized as one hash map per prefix length, scanned
//! longest-first; the probes reuse the per-prefix hashes every [`Name`]
//! caches, so a lookup never rehashes segments.
//!
//! Entries are shared (`Rc<RefCell<..>>`): a PIT entry holds the live FIB
//! entry it was forwarded under, so retransmissions observe control-plane
//! updates made in the meantime.

use crate::strategy::{strategy_by_name, BestPath, Strategy};
use icnfwd_common::{ConnectionId, Name};
use log::debug;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One next hop with its route cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextHop {
    pub connection: ConnectionId,
    pub cost: u8,
}

/// A prefix's forwarding state.
#[derive(Debug)]
pub struct FibEntry {
    prefix: Name,
    nexthops: Vec<NextHop>,
    strategy: Box<dyn Strategy>,
}

impl FibEntry {
    fn new(prefix: Name) -> Self {
        Self {
            prefix,
            nexthops: Vec::new(),
            strategy: Box::new(BestPath),
        }
    }

    pub fn prefix(&self) -> &Name {
        &self.prefix
    }

    pub fn nexthops(&self) -> &[NextHop] {
        &self.nexthops
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }
}

pub type FibEntryRef = Rc<RefCell<FibEntry>>;

/// A route listing row for the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub prefix: String,
    pub connection: ConnectionId,
    pub cost: u8,
    pub strategy: String,
}

/// The FIB: one `HashMap` per prefix length, entries shared by reference.
pub struct Fib {
    by_len: Vec<HashMap<u64, Vec<FibEntryRef>>>,
    entry_count: usize,
}

impl Fib {
    pub fn new() -> Self {
        Self {
            by_len: Vec::new(),
            entry_count: 0,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    fn find(&self, prefix: &Name) -> Option<FibEntryRef> {
        let table = self.by_len.get(prefix.len())?;
        let candidates = table.get(&prefix.full_hash())?;
        candidates
            .iter()
            .find(|entry| entry.borrow().prefix == *prefix)
            .cloned()
    }

    /// Add `connection` as a next hop for `prefix`, creating the entry if
    /// needed. Adding the same (prefix, connection) again only refreshes
    /// the cost.
    pub fn add_route(&mut self, prefix: Name, connection: ConnectionId, cost: u8) {
        if let Some(entry) = self.find(&prefix) {
            let mut entry = entry.borrow_mut();
            match entry
                .nexthops
                .iter_mut()
                .find(|hop| hop.connection == connection)
            {
                Some(hop) => hop.cost = cost,
                None => entry.nexthops.push(NextHop { connection, cost }),
            }
            return;
        }

        debug!("fib: new prefix {}", prefix);
        while self.by_len.len() <= prefix.len() {
            self.by_len.push(HashMap::new());
        }
        let hash = prefix.full_hash();
        let mut entry = FibEntry::new(prefix.clone());
        entry.nexthops.push(NextHop { connection, cost });
        self.by_len[prefix.len()]
            .entry(hash)
            .or_default()
            .push(Rc::new(RefCell::new(entry)));
        self.entry_count += 1;
    }

    /// Remove `connection` from `prefix`'s next hops; the entry goes away
    /// when its last next hop does. Returns false when nothing matched.
    pub fn remove_route(&mut self, prefix: &Name, connection: ConnectionId) -> bool {
        let Some(entry) = self.find(prefix) else {
            return false;
        };
        let now_empty = {
            let mut entry = entry.borrow_mut();
            let before = entry.nexthops.len();
            entry.nexthops.retain(|hop| hop.connection != connection);
            if entry.nexthops.len() == before {
                return false;
            }
            entry.nexthops.is_empty()
        };
        if now_empty {
            self.drop_entry(prefix);
        }
        true
    }

    /// Replace the strategy on an existing prefix.
    pub fn set_strategy(&mut self, prefix: &Name, strategy_name: &str) -> bool {
        let Some(strategy) = strategy_by_name(strategy_name) else {
            return false;
        };
        let Some(entry) = self.find(prefix) else {
            return false;
        };
        entry.borrow_mut().strategy = strategy;
        true
    }

    /// Longest-prefix match: the entry for the longest registered prefix
    /// of `name`.
    pub fn lookup(&self, name: &Name) -> Option<FibEntryRef> {
        if self.by_len.is_empty() {
            return None;
        }
        let longest = name.len().min(self.by_len.len() - 1);
        for len in (0..=longest).rev() {
            let hash = name.hash_at(len);
            let Some(candidates) = self.by_len[len].get(&hash) else {
                continue;
            };
            for entry in candidates {
                if entry.borrow().prefix.is_prefix_of(name) {
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    /// Strip a vanished connection from every entry; entries left without
    /// next hops are removed.
    pub fn remove_connection(&mut self, connection: ConnectionId) {
        let mut emptied: Vec<Name> = Vec::new();
        for table in &self.by_len {
            for candidates in table.values() {
                for entry in candidates {
                    let mut entry = entry.borrow_mut();
                    entry.nexthops.retain(|hop| hop.connection != connection);
                    if entry.nexthops.is_empty() {
                        emptied.push(entry.prefix.clone());
                    }
                }
            }
        }
        for prefix in emptied {
            self.drop_entry(&prefix);
        }
    }

    /// All routes, one row per (prefix, next hop).
    pub fn routes(&self) -> Vec<RouteInfo> {
        let mut out = Vec::new();
        for table in &self.by_len {
            for candidates in table.values() {
                for entry in candidates {
                    let entry = entry.borrow();
                    for hop in &entry.nexthops {
                        out.push(RouteInfo {
                            prefix: entry.prefix.to_string(),
                            connection: hop.connection,
                            cost: hop.cost,
                            strategy: entry.strategy.name().to_string(),
                        });
                    }
                }
            }
        }
        out.sort_by(|a, b| (&a.prefix, a.connection).cmp(&(&b.prefix, b.connection)));
        out
    }

    fn drop_entry(&mut self, prefix: &Name) {
        let Some(table) = self.by_len.get_mut(prefix.len()) else {
            return;
        };
        let hash = prefix.full_hash();
        if let Some(candidates) = table.get_mut(&hash) {
            let before = candidates.len();
            candidates.retain(|entry| entry.borrow().prefix != *prefix);
            self.entry_count -= before - candidates.len();
            if candidates.is_empty() {
                table.remove(&hash);
            }
        }
    }
}

impl Default for Fib {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let mut fib = Fib::new();
        fib.add_route(Name::from_uri("/a"), 1, 1);
        fib.add_route(Name::from_uri("/a/b"), 2, 1);
        fib.add_route(Name::root(), 9, 1);

        let hit = fib.lookup(&Name::from_uri("/a/b/c")).unwrap();
        assert_eq!(hit.borrow().prefix(), &Name::from_uri("/a/b"));

        let hit = fib.lookup(&Name::from_uri("/a/x")).unwrap();
        assert_eq!(hit.borrow().prefix(), &Name::from_uri("/a"));

        // Falls through to the default route.
        let hit = fib.lookup(&Name::from_uri("/zzz")).unwrap();
        assert_eq!(hit.borrow().prefix(), &Name::root());
    }

    #[test]
    fn lookup_misses_without_default_route() {
        let mut fib = Fib::new();
        fib.add_route(Name::from_uri("/a/b"), 1, 1);
        assert!(fib.lookup(&Name::from_uri("/a")).is_none());
        assert!(fib.lookup(&Name::from_uri("/c")).is_none());
    }

    #[test]
    fn add_route_is_idempotent() {
        let mut fib = Fib::new();
        fib.add_route(Name::from_uri("/a"), 1, 5);
        fib.add_route(Name::from_uri("/a"), 1, 5);
        assert_eq!(fib.entry_count(), 1);
        let entry = fib.lookup(&Name::from_uri("/a")).unwrap();
        assert_eq!(entry.borrow().nexthops().len(), 1);

        // Re-adding with a different cost refreshes it.
        fib.add_route(Name::from_uri("/a"), 1, 2);
        assert_eq!(entry.borrow().nexthops()[0].cost, 2);
    }

    #[test]
    fn remove_route_is_idempotent_and_drops_empty_entries() {
        let mut fib = Fib::new();
        fib.add_route(Name::from_uri("/a"), 1, 1);
        fib.add_route(Name::from_uri("/a"), 2, 1);

        assert!(fib.remove_route(&Name::from_uri("/a"), 1));
        assert!(!fib.remove_route(&Name::from_uri("/a"), 1));
        assert_eq!(fib.entry_count(), 1);

        assert!(fib.remove_route(&Name::from_uri("/a"), 2));
        assert_eq!(fib.entry_count(), 0);
        assert!(fib.lookup(&Name::from_uri("/a")).is_none());
    }

    #[test]
    fn live_entry_observes_route_updates() {
        let mut fib = Fib::new();
        fib.add_route(Name::from_uri("/a"), 1, 1);
        // A PIT entry would hold this handle across a control-plane update.
        let held = fib.lookup(&Name::from_uri("/a")).unwrap();
        fib.add_route(Name::from_uri("/a"), 7, 1);
        assert_eq!(held.borrow().nexthops().len(), 2);
    }

    #[test]
    fn remove_connection_sweeps_all_prefixes() {
        let mut fib = Fib::new();
        fib.add_route(Name::from_uri("/a"), 1, 1);
        fib.add_route(Name::from_uri("/b"), 1, 1);
        fib.add_route(Name::from_uri("/b"), 2, 1);

        fib.remove_connection(1);
        assert!(fib.lookup(&Name::from_uri("/a")).is_none());
        let entry = fib.lookup(&Name::from_uri("/b")).unwrap();
        assert_eq!(entry.borrow().nexthops()[0].connection, 2);
    }

    #[test]
    fn strategy_switch() {
        let mut fib = Fib::new();
        fib.add_route(Name::from_uri("/a"), 1, 1);
        assert!(fib.set_strategy(&Name::from_uri("/a"), "multicast"));
        assert!(!fib.set_strategy(&Name::from_uri("/a"), "bogus"));
        assert!(!fib.set_strategy(&Name::from_uri("/missing"), "multicast"));
        let entry = fib.lookup(&Name::from_uri("/a")).unwrap();
        assert_eq!(entry.borrow().strategy().name(), "multicast");
    }

    #[test]
    fn routes_listing() {
        let mut fib = Fib::new();
        fib.add_route(Name::from_uri("/a"), 2, 1);
        fib.add_route(Name::from_uri("/a"), 1, 3);
        let routes = fib.routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].connection, 1);
        assert_eq!(routes[0].cost, 3);
        assert_eq!(routes[0].strategy, "best-path");
    }
}
