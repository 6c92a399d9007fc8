//! Forwarder metrics.
//!
//! Counters and gauges are plain relaxed atomics; everything that mutates
//! them runs on the dispatcher thread, the atomics only exist so read-side
//! consumers (the control socket's `stats` verb) need no locking.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/* ---------------------------------------------------------------- *
 * Counter
 * ---------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        let c = Counter::new();
        c.value.store(self.value(), Ordering::Relaxed);
        c
    }
}

/* ---------------------------------------------------------------- *
 * Gauge
 * ---------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        let g = Gauge::new();
        g.set(self.value());
        g
    }
}

/* ---------------------------------------------------------------- *
 * Aggregate metrics for the forwarder
 * ---------------------------------------------------------------- */

#[derive(Debug, Default, Clone)]
pub struct ForwarderMetrics {
    // Interest pipeline
    pub interests_received: Counter,
    pub interests_forwarded: Counter,
    pub interests_aggregated: Counter,
    pub interests_dropped: Counter,

    // ContentObject pipeline
    pub objects_received: Counter,
    pub objects_forwarded: Counter,
    pub objects_unsolicited: Counter,

    // Content store
    pub cs_hits: Counter,
    pub cs_misses: Counter,
    pub cs_inserts: Counter,
    pub cs_evictions: Counter,
    pub cs_size: Gauge,

    // PIT
    pub pit_inserts: Counter,
    pub pit_satisfied: Counter,
    pub pit_expirations: Counter,
    pub pit_size: Gauge,

    // Errors
    pub malformed_packets: Counter,
    pub nacks_sent: Counter,

    // Control plane
    pub control_commands: Counter,

    // Connections
    pub connections_created: Counter,
    pub connections_destroyed: Counter,
}

/// A point-in-time copy of every metric, serializable for the `stats`
/// control reply.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub interests_received: u64,
    pub interests_forwarded: u64,
    pub interests_aggregated: u64,
    pub interests_dropped: u64,
    pub objects_received: u64,
    pub objects_forwarded: u64,
    pub objects_unsolicited: u64,
    pub cs_hits: u64,
    pub cs_misses: u64,
    pub cs_inserts: u64,
    pub cs_evictions: u64,
    pub cs_size: u64,
    pub pit_inserts: u64,
    pub pit_satisfied: u64,
    pub pit_expirations: u64,
    pub pit_size: u64,
    pub malformed_packets: u64,
    pub nacks_sent: u64,
    pub control_commands: u64,
    pub connections_created: u64,
    pub connections_destroyed: u64,
}

impl ForwarderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            interests_received: self.interests_received.value(),
            interests_forwarded: self.interests_forwarded.value(),
            interests_aggregated: self.interests_aggregated.value(),
            interests_dropped: self.interests_dropped.value(),
            objects_received: self.objects_received.value(),
            objects_forwarded: self.objects_forwarded.value(),
            objects_unsolicited: self.objects_unsolicited.value(),
            cs_hits: self.cs_hits.value(),
            cs_misses: self.cs_misses.value(),
            cs_inserts: self.cs_inserts.value(),
            cs_evictions: self.cs_evictions.value(),
            cs_size: self.cs_size.value(),
            pit_inserts: self.pit_inserts.value(),
            pit_satisfied: self.pit_satisfied.value(),
            pit_expirations: self.pit_expirations.value(),
            pit_size: self.pit_size.value(),
            malformed_packets: self.malformed_packets.value(),
            nacks_sent: self.nacks_sent.value(),
            control_commands: self.control_commands.value(),
            connections_created: self.connections_created.value(),
            connections_destroyed: self.connections_destroyed.value(),
        }
    }

    /// One-line summary for periodic debug logging and shutdown.
    pub fn summary(&self) -> String {
        format!(
            "interests rx={} fwd={} agg={} drop={} | objects rx={} fwd={} unsol={} | \
             cs hit={} miss={} size={} | pit ins={} sat={} exp={} size={}",
            self.interests_received.value(),
            self.interests_forwarded.value(),
            self.interests_aggregated.value(),
            self.interests_dropped.value(),
            self.objects_received.value(),
            self.objects_forwarded.value(),
            self.objects_unsolicited.value(),
            self.cs_hits.value(),
            self.cs_misses.value(),
            self.cs_size.value(),
            self.pit_inserts.value(),
            self.pit_satisfied.value(),
            self.pit_expirations.value(),
            self.pit_size.value(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = ForwarderMetrics::new();
        metrics.interests_received.increment();
        metrics.interests_received.add(2);
        metrics.pit_size.set(5);
        metrics.pit_size.decrement();

        let snap = metrics.snapshot();
        assert_eq!(snap.interests_received, 3);
        assert_eq!(snap.pit_size, 4);
    }
}
