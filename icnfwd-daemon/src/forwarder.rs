//! The forwarder: owns all single-threaded state and routes events.
//!
//! Connectors deliver raw frames and lifecycle events through the
//! dispatcher; this layer resolves connections, decodes packets, hands
//! Interests and ContentObjects to the [`MessageProcessor`], and applies
//! control-plane commands (the configuration role). Missives drained at
//! each tick drive the deferred reactions to connection lifecycle: PIT
//! orphan sweeps and FIB route removal happen one tick after teardown.

use crate::connections::{ConnKind, ConnectionTable};
use crate::control::ControlReply;
use crate::dispatcher::Event;
use crate::io::{self, DatagramSink};
use crate::messenger::{Messenger, MissiveKind};
use crate::processor::MessageProcessor;
use icnfwd_common::codec::{DefaultCodec, WireCodec};
use icnfwd_common::control::{ControlCommand, Proto};
use icnfwd_common::metrics::ForwarderMetrics;
use icnfwd_common::{ConnectionId, Message, MessageKind, Ticks, Timebase};
use log::{debug, info};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc;

/// PIT bucket chains swept per tick (the expiry drip).
const PIT_SWEEP_PER_TICK: usize = 2;

/// CS bucket chains swept per fast-timer window.
const CS_SWEEP_PER_WINDOW: usize = 16;

#[derive(Debug, Clone, Serialize)]
pub struct ListenerInfo {
    pub name: String,
    pub proto: Proto,
    pub addr: SocketAddr,
}

pub struct Forwarder {
    timebase: Timebase,
    pub connections: ConnectionTable,
    pub processor: MessageProcessor,
    pub messenger: Messenger,
    pub metrics: Arc<ForwarderMetrics>,
    codec: DefaultCodec,
    listeners: Vec<ListenerInfo>,
    events_tx: mpsc::Sender<Event>,
}

impl Forwarder {
    pub fn new(
        events_tx: mpsc::Sender<Event>,
        cs_capacity: usize,
        metrics: Arc<ForwarderMetrics>,
    ) -> Self {
        Self {
            timebase: Timebase::new(),
            connections: ConnectionTable::new(),
            processor: MessageProcessor::new(cs_capacity, metrics.clone()),
            messenger: Messenger::new(),
            metrics,
            codec: DefaultCodec,
            listeners: Vec::new(),
            events_tx,
        }
    }

    pub fn timebase(&self) -> &Timebase {
        &self.timebase
    }

    /// Wall-clock milliseconds at tick zero; feeds ContentObject expiry
    /// conversion.
    pub fn set_wall_offset(&mut self, wall_ms: u64) {
        self.processor.cs.set_wall_offset(wall_ms);
    }

    /// One dispatcher tick: advance the clock, deliver last tick's
    /// missives, and run the expiry drips.
    pub fn on_tick(&mut self, now: Ticks) {
        let step = self.timebase.advance(now);

        for missive in self.messenger.drain() {
            match missive.kind {
                MissiveKind::ConnectionUp => {
                    debug!("missive: connection {} up", missive.connection);
                }
                MissiveKind::ConnectionDestroyed => {
                    self.metrics.connections_destroyed.increment();
                    let orphaned = self.processor.pit.remove_connection(missive.connection);
                    if orphaned > 0 {
                        debug!(
                            "pit: removed {} entries orphaned by connection {}",
                            orphaned, missive.connection
                        );
                    }
                    self.processor.fib.remove_connection(missive.connection);
                }
            }
        }

        let snapshot = self.timebase.snapshot();
        let expired = self.processor.pit.sweep(snapshot, PIT_SWEEP_PER_TICK);
        if expired > 0 {
            self.metrics.pit_expirations.add(expired as u64);
            self.metrics.pit_size.set(self.processor.pit.len() as u64);
        }

        if step.fast_rolled {
            let evicted = self.processor.cs.sweep_expired(self.timebase.now());
            if evicted > 0 {
                self.metrics.cs_evictions.add(evicted as u64);
            }
            self.processor.cs.sweep_buckets(snapshot, CS_SWEEP_PER_WINDOW);
            self.metrics.cs_size.set(self.processor.cs.len() as u64);
        }
    }

    /// One event from a connector or the control socket.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::StreamOpened {
                name,
                kind,
                peer,
                sink,
                id_tx,
            } => {
                let id = self
                    .connections
                    .add(kind, peer, name, sink, &mut self.messenger);
                self.metrics.connections_created.increment();
                let _ = id_tx.send(id);
            }
            Event::StreamClosed { connection } => {
                self.close_connection(connection);
            }
            Event::Frame { connection, bytes } => {
                self.handle_packet(connection, bytes);
            }
            Event::Datagram {
                local: _,
                peer,
                bytes,
                writer,
            } => {
                let connection = match self.connections.id_by_addr(ConnKind::Udp, peer) {
                    Some(id) => id,
                    None => {
                        let sink = Box::new(DatagramSink::new(peer, writer));
                        let id = self.connections.add(
                            ConnKind::Udp,
                            peer,
                            None,
                            sink,
                            &mut self.messenger,
                        );
                        self.metrics.connections_created.increment();
                        id
                    }
                };
                self.handle_packet(connection, bytes);
            }
            Event::Control { line, reply } => {
                let _ = reply.send(self.apply_control_line(&line));
            }
        }
    }

    /// Peer closed or errored: tear down now, clean tables next tick via
    /// the missive.
    pub fn close_connection(&mut self, connection: ConnectionId) {
        self.connections.remove(connection, &mut self.messenger);
    }

    fn handle_packet(&mut self, connection: ConnectionId, bytes: bytes::Bytes) {
        let message = match self.codec.decode(bytes, connection, self.timebase.now()) {
            Ok(message) => message,
            Err(err) => {
                self.metrics.malformed_packets.increment();
                if let Some(conn) = self.connections.get_mut(connection) {
                    conn.counters.malformed += 1;
                }
                debug!("connection {}: dropped malformed packet: {}", connection, err);
                return;
            }
        };
        if let Some(conn) = self.connections.get_mut(connection) {
            conn.counters.packets_received += 1;
        }

        let message = Arc::new(message);
        match message.kind() {
            MessageKind::Control => self.handle_wire_control(message),
            _ => self
                .processor
                .receive(message, &mut self.connections, &self.timebase),
        }
    }

    /// A Control packet on a regular connection: responses and NACKs are
    /// consumed, command verbs are applied and answered in-band.
    fn handle_wire_control(&mut self, message: Arc<Message>) {
        let line = String::from_utf8_lossy(message.payload()).into_owned();
        let word = line.split_whitespace().next().unwrap_or("");
        if word == "ack" || word == "nack" || word.starts_with("ack:") || word.starts_with("nack:")
        {
            debug!(
                "connection {}: control response '{}'",
                message.ingress(),
                line
            );
            return;
        }
        let reply = self.apply_control_line(&line);
        let response = Message::control(reply.to_frame());
        let _ = self.connections.send_message(message.ingress(), &response);
    }

    /// Parse and apply one control line.
    pub fn apply_control_line(&mut self, line: &str) -> ControlReply {
        self.metrics.control_commands.increment();
        match ControlCommand::parse(line) {
            Ok(Some(command)) => self.apply_command(command),
            Ok(None) => ControlReply::ack(),
            Err(err) => ControlReply::nack(err.to_string()),
        }
    }

    /// Apply one parsed control verb.
    pub fn apply_command(&mut self, command: ControlCommand) -> ControlReply {
        match command {
            ControlCommand::AddListener {
                name,
                proto,
                addr,
                port,
            } => self.add_listener(name, proto, &addr, port),
            ControlCommand::AddConnection {
                name,
                proto,
                local,
                remote,
            } => self.add_connection(name, proto, &local, &remote),
            ControlCommand::AddRoute {
                connection,
                prefix,
                cost,
            } => match self.connections.resolve(&connection) {
                Some(id) => {
                    info!("route {} -> connection {} cost {}", prefix, id, cost);
                    self.processor.fib.add_route(prefix, id, cost);
                    ControlReply::ack()
                }
                None => ControlReply::nack(format!("unknown connection '{}'", connection)),
            },
            ControlCommand::RemoveRoute { connection, prefix } => {
                match self.connections.resolve(&connection) {
                    Some(id) => {
                        if self.processor.fib.remove_route(&prefix, id) {
                            ControlReply::ack()
                        } else {
                            ControlReply::nack(format!("no route {} via '{}'", prefix, connection))
                        }
                    }
                    None => ControlReply::nack(format!("unknown connection '{}'", connection)),
                }
            }
            ControlCommand::SetStrategy { prefix, strategy } => {
                if self.processor.fib.set_strategy(&prefix, &strategy) {
                    ControlReply::ack()
                } else {
                    ControlReply::nack(format!("unknown prefix {} or strategy {}", prefix, strategy))
                }
            }
            ControlCommand::SetNack(enabled) => {
                self.processor.set_nack_on_no_route(enabled);
                ControlReply::ack()
            }
            ControlCommand::CacheSize(capacity) => {
                self.processor.cs.set_capacity(capacity, self.timebase.now());
                ControlReply::ack()
            }
            ControlCommand::CacheStore(enabled) => {
                self.processor.cs.set_store_enabled(enabled);
                ControlReply::ack()
            }
            ControlCommand::CacheServe(enabled) => {
                self.processor.cs.set_serve_enabled(enabled);
                ControlReply::ack()
            }
            ControlCommand::ListConnections => match serde_json::to_string(&self.connections.list())
            {
                Ok(json) => ControlReply::ack_with(json),
                Err(err) => ControlReply::nack(err.to_string()),
            },
            ControlCommand::ListRoutes => match serde_json::to_string(&self.processor.fib.routes())
            {
                Ok(json) => ControlReply::ack_with(json),
                Err(err) => ControlReply::nack(err.to_string()),
            },
            ControlCommand::Stats => match serde_json::to_string(&self.metrics.snapshot()) {
                Ok(json) => ControlReply::ack_with(json),
                Err(err) => ControlReply::nack(err.to_string()),
            },
        }
    }

    fn add_listener(&mut self, name: String, proto: Proto, addr: &str, port: u16) -> ControlReply {
        let ip: IpAddr = match addr.parse() {
            Ok(ip) => ip,
            Err(_) => return ControlReply::nack(format!("bad listen address '{}'", addr)),
        };
        let socket_addr = SocketAddr::new(ip, port);
        let bound = match proto {
            Proto::Tcp => io::bind_tcp(socket_addr, self.events_tx.clone())
                .map(|listener| Box::new(listener) as Box<dyn io::Listener>),
            Proto::Udp => io::bind_udp(socket_addr, self.events_tx.clone())
                .map(|listener| Box::new(listener) as Box<dyn io::Listener>),
        };
        match bound {
            Ok(listener) => {
                let addr = listener.local_addr();
                io::spawn_listener(listener);
                self.listeners.push(ListenerInfo {
                    name,
                    proto,
                    addr,
                });
                ControlReply::ack()
            }
            Err(err) => ControlReply::nack(err.to_string()),
        }
    }

    fn add_connection(
        &mut self,
        name: String,
        proto: Proto,
        local: &str,
        remote: &str,
    ) -> ControlReply {
        let remote_addr: SocketAddr = match remote.parse() {
            Ok(addr) => addr,
            Err(_) => return ControlReply::nack(format!("bad remote address '{}'", remote)),
        };
        match proto {
            Proto::Tcp => {
                io::spawn_outbound_tcp(name, remote_addr, self.events_tx.clone());
                ControlReply::ack()
            }
            Proto::Udp => {
                let local_addr: SocketAddr = match local.parse() {
                    Ok(addr) => addr,
                    Err(_) => return ControlReply::nack(format!("bad local address '{}'", local)),
                };
                match io::spawn_outbound_udp(name, local_addr, remote_addr, self.events_tx.clone())
                {
                    Ok(()) => ControlReply::ack(),
                    Err(err) => ControlReply::nack(err.to_string()),
                }
            }
        }
    }

    /// Without a configuration file, listen for packets on TCP and UDP.
    pub fn setup_default_listeners(&mut self, port: u16) -> anyhow::Result<()> {
        let any: IpAddr = "0.0.0.0".parse().expect("static address");
        for (name, proto) in [("tcp0", Proto::Tcp), ("udp0", Proto::Udp)] {
            match self.add_listener(name.to_string(), proto, &any.to_string(), port) {
                ControlReply::Ack(_) => {}
                ControlReply::Nack(reason) => {
                    anyhow::bail!("default {} listener on port {}: {}", name, port, reason)
                }
            }
        }
        Ok(())
    }

    pub fn listeners(&self) -> &[ListenerInfo] {
        &self.listeners
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::testing::RecordingSink;
    use bytes::Bytes;
    use icnfwd_common::Name;

    fn forwarder() -> Forwarder {
        let (events_tx, _events_rx) = mpsc::channel(8);
        Forwarder::new(events_tx, 16, Arc::new(ForwarderMetrics::new()))
    }

    fn add_connection(fwd: &mut Forwarder, port: u16, name: Option<&str>) -> (u32, RecordingSink) {
        let sink = RecordingSink::default();
        let id = fwd.connections.add(
            ConnKind::Tcp,
            format!("192.0.2.9:{}", port).parse().unwrap(),
            name.map(String::from),
            Box::new(sink.clone()),
            &mut fwd.messenger,
        );
        (id, sink)
    }

    fn encoded_interest(uri: &str) -> Bytes {
        DefaultCodec
            .encode(&Message::interest(Name::from_uri(uri)))
            .unwrap()
    }

    #[test]
    fn frames_flow_through_decode_into_the_pit() {
        let mut fwd = forwarder();
        let (a, _sink_a) = add_connection(&mut fwd, 1, None);
        let (d, sink_d) = add_connection(&mut fwd, 2, None);
        fwd.processor.fib.add_route(Name::from_uri("/x"), d, 1);
        fwd.on_tick(1);

        fwd.handle_packet(a, encoded_interest("/x/1"));
        assert_eq!(fwd.processor.pit.len(), 1);
        assert_eq!(sink_d.sent.borrow().len(), 1);
        assert_eq!(
            fwd.connections.get(a).unwrap().counters.packets_received,
            1
        );
    }

    #[test]
    fn malformed_frames_count_per_connection() {
        let mut fwd = forwarder();
        let (a, _sink) = add_connection(&mut fwd, 1, None);
        fwd.handle_packet(a, Bytes::from_static(b"\xff\xff\xff"));
        assert_eq!(fwd.metrics.malformed_packets.value(), 1);
        assert_eq!(fwd.connections.get(a).unwrap().counters.malformed, 1);
        assert_eq!(fwd.processor.pit.len(), 0);
    }

    #[test]
    fn teardown_sweeps_orphaned_pit_entries_next_tick() {
        let mut fwd = forwarder();
        let (a, _sink_a) = add_connection(&mut fwd, 1, None);
        let (b, _sink_b) = add_connection(&mut fwd, 2, None);
        let (d, _sink_d) = add_connection(&mut fwd, 3, None);
        fwd.processor.fib.add_route(Name::root(), d, 1);
        fwd.on_tick(1);

        // 50 entries with A as the only ingress, one shared with B.
        for i in 0..50 {
            fwd.handle_packet(a, encoded_interest(&format!("/solo/{}", i)));
        }
        fwd.handle_packet(a, encoded_interest("/shared"));
        fwd.handle_packet(b, encoded_interest("/shared"));
        assert_eq!(fwd.processor.pit.len(), 51);

        fwd.handle_event(Event::StreamClosed { connection: a });
        // Cleanup is missive-driven: nothing happens until the next tick.
        assert_eq!(fwd.processor.pit.len(), 51);
        fwd.on_tick(2);
        assert_eq!(fwd.processor.pit.len(), 1);
        assert!(fwd.connections.get(a).is_none());
    }

    #[test]
    fn control_verbs_apply_routes_and_report() {
        let mut fwd = forwarder();
        let (id, _sink) = add_connection(&mut fwd, 1, Some("conn1"));

        let reply = fwd.apply_control_line("add route conn1 /edge 2");
        assert_eq!(reply, ControlReply::ack());

        let reply = fwd.apply_control_line("list routes");
        let ControlReply::Ack(Some(json)) = reply else {
            panic!("expected payload");
        };
        let routes: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(routes[0]["connection"], id);
        assert_eq!(routes[0]["prefix"], "/edge");

        let reply = fwd.apply_control_line("remove route conn1 /edge");
        assert_eq!(reply, ControlReply::ack());
        let reply = fwd.apply_control_line("remove route conn1 /edge");
        assert!(matches!(reply, ControlReply::Nack(_)));

        let reply = fwd.apply_control_line("add route ghost /edge 2");
        assert!(matches!(reply, ControlReply::Nack(_)));

        let reply = fwd.apply_control_line("stats");
        let ControlReply::Ack(Some(json)) = reply else {
            panic!("expected stats payload");
        };
        let stats: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(stats["control_commands"].as_u64().unwrap() >= 1);
    }

    #[test]
    fn cache_verbs_reconfigure_the_content_store() {
        let mut fwd = forwarder();
        assert_eq!(fwd.apply_control_line("cache size 2"), ControlReply::ack());
        assert_eq!(fwd.processor.cs.capacity(), 2);
        assert_eq!(
            fwd.apply_control_line("cache store off"),
            ControlReply::ack()
        );
        assert_eq!(
            fwd.apply_control_line("cache serve off"),
            ControlReply::ack()
        );
        assert_eq!(fwd.apply_control_line("set nack on"), ControlReply::ack());
        assert!(matches!(
            fwd.apply_control_line("cache store sideways"),
            ControlReply::Nack(_)
        ));
    }

    #[test]
    fn wire_control_acks_commands_and_swallows_responses() {
        let mut fwd = forwarder();
        let (a, sink_a) = add_connection(&mut fwd, 1, Some("peer"));

        let command = DefaultCodec
            .encode(&Message::control(Bytes::from_static(b"list routes")))
            .unwrap();
        fwd.handle_packet(a, command);
        assert_eq!(sink_a.sent.borrow().len(), 1, "command gets a reply");

        // A NACK echoed back by a peer must not generate another reply.
        let nack = DefaultCodec
            .encode(&Message::control(Bytes::from_static(b"nack no-route /x")))
            .unwrap();
        fwd.handle_packet(a, nack);
        assert_eq!(sink_a.sent.borrow().len(), 1);
    }
}
