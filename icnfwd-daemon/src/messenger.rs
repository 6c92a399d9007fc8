//! The missive bus for connection lifecycle events.
//!
//! Components enqueue missives at any time; the dispatcher drains the
//! queue at the start of the next tick and routes each missive to the
//! interested components. Because delivery happens one tick after
//! submission, emitting a missive while another is being delivered is
//! well-defined: it simply lands in the next batch. This deferral is a
//! hard contract, not an optimization.

use icnfwd_common::ConnectionId;
use log::trace;
use std::collections::VecDeque;

/// What happened to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissiveKind {
    ConnectionUp,
    ConnectionDestroyed,
}

/// One lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Missive {
    pub kind: MissiveKind,
    pub connection: ConnectionId,
}

#[derive(Debug, Default)]
pub struct Messenger {
    queue: VecDeque<Missive>,
}

impl Messenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue for delivery on the next dispatcher tick.
    pub fn send(&mut self, missive: Missive) {
        trace!(
            "missive queued: {:?} connection {}",
            missive.kind,
            missive.connection
        );
        self.queue.push_back(missive);
    }

    /// Take everything queued so far. Missives sent while the returned
    /// batch is being delivered go into a fresh queue for the next drain.
    pub fn drain(&mut self) -> VecDeque<Missive> {
        std::mem::take(&mut self.queue)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_is_deferred_one_drain() {
        let mut messenger = Messenger::new();
        messenger.send(Missive {
            kind: MissiveKind::ConnectionUp,
            connection: 1,
        });

        let batch = messenger.drain();
        assert_eq!(batch.len(), 1);

        // A missive emitted during delivery of the first batch is not part
        // of that batch.
        for _missive in &batch {
            messenger.send(Missive {
                kind: MissiveKind::ConnectionDestroyed,
                connection: 1,
            });
        }
        assert_eq!(batch.len(), 1);

        let next = messenger.drain();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].kind, MissiveKind::ConnectionDestroyed);
        assert!(messenger.drain().is_empty());
    }

    #[test]
    fn order_is_preserved() {
        let mut messenger = Messenger::new();
        for connection in 0..5 {
            messenger.send(Missive {
                kind: MissiveKind::ConnectionUp,
                connection,
            });
        }
        let batch = messenger.drain();
        let order: Vec<ConnectionId> = batch.iter().map(|m| m.connection).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }
}
