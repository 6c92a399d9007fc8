//! Forwarding strategies.
//!
//! Each FIB entry holds a strategy that narrows the entry's next-hop set
//! for one Interest. Strategies see the candidate next hops and the
//! Interest; the processor applies the self-loop rule afterwards.

use crate::fib::NextHop;
use icnfwd_common::{ConnectionId, Message};
use std::fmt;

pub trait Strategy: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Select the subset of `nexthops` this Interest should go to.
    fn choose_nexthops(&self, nexthops: &[NextHop], interest: &Message) -> Vec<ConnectionId>;
}

/// Forward to the single lowest-cost next hop, lowest connection id on a
/// tie.
#[derive(Debug, Default)]
pub struct BestPath;

impl Strategy for BestPath {
    fn name(&self) -> &'static str {
        "best-path"
    }

    fn choose_nexthops(&self, nexthops: &[NextHop], _interest: &Message) -> Vec<ConnectionId> {
        nexthops
            .iter()
            .min_by_key(|hop| (hop.cost, hop.connection))
            .map(|hop| vec![hop.connection])
            .unwrap_or_default()
    }
}

/// Forward to every next hop.
#[derive(Debug, Default)]
pub struct Multicast;

impl Strategy for Multicast {
    fn name(&self) -> &'static str {
        "multicast"
    }

    fn choose_nexthops(&self, nexthops: &[NextHop], _interest: &Message) -> Vec<ConnectionId> {
        nexthops.iter().map(|hop| hop.connection).collect()
    }
}

/// Look a strategy up by its control-plane name.
pub fn strategy_by_name(name: &str) -> Option<Box<dyn Strategy>> {
    match name {
        "best-path" => Some(Box::new(BestPath)),
        "multicast" => Some(Box::new(Multicast)),
        _ => None,
    }
}
