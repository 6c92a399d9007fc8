//! Forwarding state for the icnfwd forwarder.
//!
//! The tables that make up the data plane: the generic open-addressed
//! [`hashtable`] with overflow buckets and opportunistic expiry sweeps,
//! the longest-prefix-match [`fib`], the LRU-bounded [`cs`], and the
//! reverse-path [`pit`], plus the per-entry forwarding [`strategy`] seam.

pub mod cs;
pub mod fib;
mod fingerprint;
pub mod hashtable;
pub mod pit;
pub mod strategy;

pub use cs::{ContentStore, CsPutResult};
pub use fib::{Fib, FibEntry, FibEntryRef, NextHop, RouteInfo};
pub use fingerprint::FingerprintKey;
pub use hashtable::{HashTable, InsertError, TableKey, BUCKET_SLOTS};
pub use pit::{Pit, PitEntry, PitEntryRef, PitVerdict};
pub use strategy::{strategy_by_name, BestPath, Multicast, Strategy};
