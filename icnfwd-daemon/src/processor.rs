//! The per-packet forwarding pipeline.
//!
//! One receive path per packet kind: Interests consult the Content Store,
//! then the PIT, then the FIB and the entry's strategy; ContentObjects
//! satisfy the PIT, feed the Content Store, and fan out along the reverse
//! path. Control packets are not handled here; the configuration layer
//! (the forwarder) applies them.

use crate::connections::ConnectionTable;
use bytes::Bytes;
use icnfwd_common::metrics::ForwarderMetrics;
use icnfwd_common::{Message, MessageKind, Timebase};
use icnfwd_tables::cs::CsPutResult;
use icnfwd_tables::{ContentStore, Fib, Pit, PitVerdict};
use log::{debug, trace, warn};
use std::sync::Arc;

/// Default PIT head-bucket count.
const PIT_BUCKETS: usize = 1_024;

pub struct MessageProcessor {
    pub pit: Pit,
    pub cs: ContentStore,
    pub fib: Fib,
    metrics: Arc<ForwarderMetrics>,
    nack_on_no_route: bool,
}

impl MessageProcessor {
    pub fn new(cs_capacity: usize, metrics: Arc<ForwarderMetrics>) -> Self {
        Self {
            pit: Pit::new(PIT_BUCKETS),
            cs: ContentStore::new(cs_capacity),
            fib: Fib::new(),
            metrics,
            nack_on_no_route: false,
        }
    }

    /// Whether a failed route lookup (or an unusable next-hop set) answers
    /// with a NACK instead of a silent drop.
    pub fn set_nack_on_no_route(&mut self, enabled: bool) {
        self.nack_on_no_route = enabled;
    }

    /// The pipeline entry point: one fully parsed message from `ingress`.
    pub fn receive(
        &mut self,
        message: Arc<Message>,
        connections: &mut ConnectionTable,
        timebase: &Timebase,
    ) {
        match message.kind() {
            MessageKind::Interest => self.receive_interest(message, connections, timebase),
            MessageKind::ContentObject => self.receive_object(message, connections, timebase),
            MessageKind::Control => {
                // Routed by the configuration layer before it gets here.
                debug!("processor: ignoring stray control packet");
            }
        }
        self.metrics.pit_size.set(self.pit.len() as u64);
        self.metrics.cs_size.set(self.cs.len() as u64);
    }

    fn receive_interest(
        &mut self,
        message: Arc<Message>,
        connections: &mut ConnectionTable,
        timebase: &Timebase,
    ) {
        self.metrics.interests_received.increment();

        // Hop limit drops by one on arrival from another forwarder; local
        // applications are exempt.
        let ingress_local = connections
            .get(message.ingress())
            .map(|connection| connection.is_local())
            .unwrap_or(false);
        let hop_limit = if ingress_local {
            message.hop_limit()
        } else {
            message.hop_limit().saturating_sub(1)
        };

        if let Some(hit) = self.cs.match_interest(&message, timebase) {
            self.metrics.cs_hits.increment();
            trace!("cs hit for {}", message.name());
            self.send(connections, message.ingress(), &hit);
            return;
        }
        self.metrics.cs_misses.increment();

        let verdict = match self.pit.receive_interest(&message, timebase) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!("pit refused {}: {}", message.name(), err);
                self.metrics.interests_dropped.increment();
                return;
            }
        };
        let entry = match verdict {
            PitVerdict::Aggregate => {
                self.metrics.interests_aggregated.increment();
                trace!("aggregated {}", message.name());
                return;
            }
            PitVerdict::Forward(entry) => entry,
            PitVerdict::Miss(entry) => {
                self.metrics.pit_inserts.increment();
                entry
            }
        };

        // A retransmission keeps following the FIB entry it was first
        // forwarded under; a fresh entry takes the current lookup.
        let fib_entry = entry
            .borrow()
            .fib_entry()
            .cloned()
            .or_else(|| self.fib.lookup(message.name()));
        let Some(fib_entry) = fib_entry else {
            self.metrics.interests_dropped.increment();
            self.deny(connections, &message, "no-route");
            return;
        };
        entry.borrow_mut().set_fib_entry(fib_entry.clone());

        let chosen = {
            let fib_entry = fib_entry.borrow();
            fib_entry
                .strategy()
                .choose_nexthops(fib_entry.nexthops(), &message)
        };
        let out = Arc::new((*message).clone().with_hop_limit(hop_limit));

        let mut forwarded = 0usize;
        for next in chosen {
            if next == message.ingress() {
                // Never back out the ingress interface.
                continue;
            }
            let next_local = connections
                .get(next)
                .map(|connection| connection.is_local())
                .unwrap_or(false);
            if hop_limit == 0 && !next_local {
                trace!("hop limit exhausted for {} toward {}", message.name(), next);
                continue;
            }
            if connections.send_message(next, &out).is_ok() {
                entry.borrow_mut().add_egress(next);
                self.metrics.interests_forwarded.increment();
                forwarded += 1;
            }
        }

        if forwarded == 0 {
            debug!("interest {} had no usable next hop", message.name());
            self.metrics.interests_dropped.increment();
            self.deny(connections, &message, "no-nexthop");
        }
    }

    fn receive_object(
        &mut self,
        message: Arc<Message>,
        connections: &mut ConnectionTable,
        timebase: &Timebase,
    ) {
        self.metrics.objects_received.increment();

        let reverse = self.pit.satisfy_interest(&message, timebase.now());
        if reverse.is_empty() {
            self.metrics.objects_unsolicited.increment();
            debug!(
                "unsolicited {} from connection {}",
                message.name(),
                message.ingress()
            );
            return;
        }
        self.metrics.pit_satisfied.increment();

        match self.cs.put(message.clone(), timebase) {
            CsPutResult::Stored { evicted, .. } => {
                self.metrics.cs_inserts.increment();
                if evicted > 0 {
                    self.metrics.cs_evictions.add(evicted as u64);
                }
            }
            CsPutResult::Rejected => {}
        }

        for target in reverse {
            if target == message.ingress() {
                continue;
            }
            self.send(connections, target, &message);
            self.metrics.objects_forwarded.increment();
        }
    }

    fn send(&self, connections: &mut ConnectionTable, target: u32, message: &Arc<Message>) {
        if let Err(err) = connections.send_message(target, message) {
            debug!("egress to {} failed: {}", target, err);
        }
    }

    fn deny(&self, connections: &mut ConnectionTable, message: &Arc<Message>, reason: &str) {
        if !self.nack_on_no_route {
            return;
        }
        let payload = format!("nack {} {}", reason, message.name());
        let nack = Arc::new(Message::control(Bytes::from(payload)));
        self.metrics.nacks_sent.increment();
        self.send(connections, message.ingress(), &nack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::testing::RecordingSink;
    use crate::connections::ConnKind;
    use crate::messenger::Messenger;
    use icnfwd_common::codec::{DefaultCodec, WireCodec};
    use icnfwd_common::{Name, Ticks};
    use std::net::SocketAddr;

    struct Harness {
        processor: MessageProcessor,
        connections: ConnectionTable,
        messenger: Messenger,
        timebase: Timebase,
    }

    impl Harness {
        fn new() -> Self {
            let metrics = Arc::new(ForwarderMetrics::new());
            let mut harness = Self {
                processor: MessageProcessor::new(16, metrics),
                connections: ConnectionTable::new(),
                messenger: Messenger::new(),
                timebase: Timebase::new(),
            };
            harness.timebase.advance(10);
            harness
        }

        fn connection(&mut self, port: u16, local: bool) -> (u32, RecordingSink) {
            let sink = RecordingSink::default();
            let addr: SocketAddr = if local {
                format!("127.0.0.1:{}", port).parse().unwrap()
            } else {
                format!("192.0.2.{}:{}", port % 250 + 1, port).parse().unwrap()
            };
            let id = self.connections.add(
                ConnKind::Tcp,
                addr,
                None,
                Box::new(sink.clone()),
                &mut self.messenger,
            );
            (id, sink)
        }

        fn interest(&mut self, uri: &str, ingress: u32) -> Arc<Message> {
            Arc::new(
                Message::interest(Name::from_uri(uri))
                    .with_ingress(ingress)
                    .with_receive_tick(self.timebase.now()),
            )
        }

        fn object(&mut self, uri: &str, ingress: u32) -> Arc<Message> {
            Arc::new(
                Message::content_object(Name::from_uri(uri), &b"payload"[..])
                    .with_ingress(ingress)
                    .with_receive_tick(self.timebase.now()),
            )
        }

        fn receive(&mut self, message: Arc<Message>) {
            self.processor
                .receive(message, &mut self.connections, &self.timebase);
        }

        fn advance(&mut self, now: Ticks) {
            self.timebase.advance(now);
        }
    }

    fn decoded(sink: &RecordingSink) -> Vec<Message> {
        sink.sent
            .borrow()
            .iter()
            .map(|bytes| DefaultCodec.decode(bytes.clone(), 0, 0).unwrap())
            .collect()
    }

    #[test]
    fn aggregation_round_trip() {
        let mut h = Harness::new();
        let (a, sink_a) = h.connection(1, false);
        let (b, sink_b) = h.connection(2, false);
        let (c, sink_c) = h.connection(3, false);
        let (d, sink_d) = h.connection(4, false);
        h.processor.fib.add_route(Name::from_uri("/x"), d, 1);

        // A asks: one egress to D.
        let interest = h.interest("/x", a);
        h.receive(interest);
        assert_eq!(sink_d.sent.borrow().len(), 1);

        // B asks 100ms later: aggregated, no new egress.
        h.advance(110);
        let interest = h.interest("/x", b);
        h.receive(interest);
        assert_eq!(sink_d.sent.borrow().len(), 1);

        // D answers: both A and B get the object, D does not.
        let object = h.object("/x", d);
        h.receive(object);
        assert_eq!(sink_a.sent.borrow().len(), 1);
        assert_eq!(sink_b.sent.borrow().len(), 1);
        assert_eq!(sink_d.sent.borrow().len(), 1);

        // C asks after the reply: served from the content store.
        let interest = h.interest("/x", c);
        h.receive(interest);
        assert_eq!(sink_c.sent.borrow().len(), 1);
        assert_eq!(sink_d.sent.borrow().len(), 1);
        let served = decoded(&sink_c);
        assert_eq!(served[0].kind(), MessageKind::ContentObject);
        assert_eq!(served[0].name(), &Name::from_uri("/x"));
    }

    #[test]
    fn expired_entry_makes_reply_unsolicited() {
        let mut h = Harness::new();
        let (a, _sink_a) = h.connection(1, false);
        let (d, sink_d) = h.connection(2, false);
        h.processor.fib.add_route(Name::from_uri("/x"), d, 1);

        let interest = Arc::new(
            Message::interest(Name::from_uri("/x"))
                .with_ingress(a)
                .with_lifetime_ms(500),
        );
        h.receive(interest);
        assert_eq!(sink_d.sent.borrow().len(), 1);

        // Past the lifetime; the late reply is dropped as unsolicited.
        h.advance(700);
        let object = h.object("/x", d);
        h.receive(object);
        assert_eq!(
            h.processor.metrics.objects_unsolicited.value(),
            1,
            "late reply must be unsolicited"
        );
        assert_eq!(h.processor.cs.len(), 0);
    }

    #[test]
    fn hop_limit_exhausted_reaches_only_local_producers() {
        let mut h = Harness::new();
        let (a, _sink_a) = h.connection(1, false);
        let (remote, sink_remote) = h.connection(2, false);
        let (local, sink_local) = h.connection(3, true);
        h.processor.fib.add_route(Name::from_uri("/x"), remote, 1);
        h.processor.fib.add_route(Name::from_uri("/x"), local, 1);
        h.processor
            .fib
            .set_strategy(&Name::from_uri("/x"), "multicast");

        let interest = Arc::new(
            Message::interest(Name::from_uri("/x"))
                .with_ingress(a)
                .with_hop_limit(1),
        );
        h.receive(interest);

        assert!(sink_remote.sent.borrow().is_empty());
        let local_out = decoded(&sink_local);
        assert_eq!(local_out.len(), 1);
        assert_eq!(local_out[0].hop_limit(), 0);
    }

    #[test]
    fn never_forwards_back_to_ingress() {
        let mut h = Harness::new();
        let (a, sink_a) = h.connection(1, false);
        h.processor.fib.add_route(Name::from_uri("/x"), a, 1);

        let interest = h.interest("/x", a);
        h.receive(interest);
        assert!(sink_a.sent.borrow().is_empty());
        assert_eq!(h.processor.metrics.interests_dropped.value(), 1);
    }

    #[test]
    fn no_route_drops_silently_by_default() {
        let mut h = Harness::new();
        let (a, sink_a) = h.connection(1, false);
        let interest = h.interest("/nowhere", a);
        h.receive(interest);
        assert!(sink_a.sent.borrow().is_empty());
        assert_eq!(h.processor.metrics.interests_dropped.value(), 1);
    }

    #[test]
    fn no_route_nacks_when_configured() {
        let mut h = Harness::new();
        h.processor.set_nack_on_no_route(true);
        let (a, sink_a) = h.connection(1, false);
        let interest = h.interest("/nowhere", a);
        h.receive(interest);

        let replies = decoded(&sink_a);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind(), MessageKind::Control);
        let payload = String::from_utf8(replies[0].payload().to_vec()).unwrap();
        assert!(payload.starts_with("nack no-route"), "got '{}'", payload);
        assert_eq!(h.processor.metrics.nacks_sent.value(), 1);
    }

    #[test]
    fn republishing_a_name_is_not_counted_as_an_eviction() {
        let mut h = Harness::new();
        // Serving from the cache would short-circuit the second Interest,
        // so make every Interest reach the PIT.
        h.processor.cs.set_serve_enabled(false);
        let (a, _sink_a) = h.connection(1, false);
        let (d, _sink_d) = h.connection(2, false);
        h.processor.fib.add_route(Name::from_uri("/x"), d, 1);

        let interest = h.interest("/x", a);
        h.receive(interest);
        let object = h.object("/x", d);
        h.receive(object);

        h.advance(200);
        let interest = h.interest("/x", a);
        h.receive(interest);
        let object = h.object("/x", d);
        h.receive(object);

        assert_eq!(h.processor.metrics.cs_inserts.value(), 2);
        assert_eq!(h.processor.cs.len(), 1);
        assert_eq!(
            h.processor.metrics.cs_evictions.value(),
            0,
            "a same-name replace under capacity is not an eviction"
        );
    }

    #[test]
    fn retransmission_reforwards() {
        let mut h = Harness::new();
        let (a, _sink_a) = h.connection(1, false);
        let (d, sink_d) = h.connection(2, false);
        h.processor.fib.add_route(Name::from_uri("/x"), d, 1);

        let interest = h.interest("/x", a);
        h.receive(interest.clone());
        assert_eq!(sink_d.sent.borrow().len(), 1);

        // Same connection asks again before any reply: forwarded again.
        h.advance(200);
        let retry = h.interest("/x", a);
        h.receive(retry);
        assert_eq!(sink_d.sent.borrow().len(), 2);
    }

    #[test]
    fn reply_is_not_sent_back_to_its_producer_when_producer_asked() {
        let mut h = Harness::new();
        let (a, sink_a) = h.connection(1, false);
        let (d, sink_d) = h.connection(2, false);
        h.processor.fib.add_route(Name::from_uri("/x"), d, 1);

        // Both A and D are waiting on /x.
        let interest = h.interest("/x", a);
        h.receive(interest);
        let interest = h.interest("/x", d);
        h.receive(interest);

        // D produces the object: only A gets it.
        let object = h.object("/x", d);
        h.receive(object);
        assert_eq!(sink_a.sent.borrow().len(), 1);
        assert_eq!(sink_d.sent.borrow().len(), 1, "only the original egress");
    }
}
