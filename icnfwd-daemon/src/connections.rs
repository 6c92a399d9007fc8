//! Connection table.
//!
//! Owns every connection's egress sink and the bookkeeping around it:
//! dense monotonic ids, a peer-address back-index for datagram peers, a
//! symbolic-name index for the control plane, and per-connection counters.
//! Adding or removing a connection emits a missive through the messenger;
//! nothing else reacts synchronously.

use crate::messenger::{Messenger, Missive, MissiveKind};
use bytes::Bytes;
use icnfwd_common::codec::{DefaultCodec, WireCodec};
use icnfwd_common::{ConnectionId, Error, Message};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Transport family of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnKind {
    Tcp,
    Udp,
}

/// Why a sink refused a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The egress queue is full; the packet is dropped, the connection
    /// stays up.
    Full,
    /// The peer is gone; the connection must be torn down.
    Closed,
}

/// The egress side of a connection. Production sinks push onto a bounded
/// writer queue; tests record.
pub trait ConnectionSink {
    fn send(&self, bytes: Bytes) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ConnCounters {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub send_drops: u64,
    pub malformed: u64,
}

pub struct Connection {
    id: ConnectionId,
    name: Option<String>,
    kind: ConnKind,
    peer: SocketAddr,
    is_local: bool,
    sink: Box<dyn ConnectionSink>,
    pub counters: ConnCounters,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> ConnKind {
        self.kind
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Local-app connections (loopback peers) are exempt from hop-limit
    /// decrement and may receive hop-limit-zero Interests.
    pub fn is_local(&self) -> bool {
        self.is_local
    }
}

/// A row of `list connections` output.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub name: Option<String>,
    pub kind: ConnKind,
    pub peer: String,
    pub is_local: bool,
    pub counters: ConnCounters,
}

pub struct ConnectionTable {
    by_id: HashMap<ConnectionId, Connection>,
    by_addr: HashMap<(ConnKind, SocketAddr), ConnectionId>,
    by_name: HashMap<String, ConnectionId>,
    next_id: ConnectionId,
    codec: DefaultCodec,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_addr: HashMap::new(),
            by_name: HashMap::new(),
            next_id: 0,
            codec: DefaultCodec,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Register a connection, assign it the next dense id, and announce it.
    pub fn add(
        &mut self,
        kind: ConnKind,
        peer: SocketAddr,
        name: Option<String>,
        sink: Box<dyn ConnectionSink>,
        messenger: &mut Messenger,
    ) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;

        let is_local = peer.ip().is_loopback();
        info!(
            "connection {} up: {:?} peer {}{}",
            id,
            kind,
            peer,
            if is_local { " (local)" } else { "" }
        );

        self.by_addr.insert((kind, peer), id);
        if let Some(name) = &name {
            self.by_name.insert(name.clone(), id);
        }
        self.by_id.insert(
            id,
            Connection {
                id,
                name,
                kind,
                peer,
                is_local,
                sink,
                counters: ConnCounters::default(),
            },
        );
        messenger.send(Missive {
            kind: MissiveKind::ConnectionUp,
            connection: id,
        });
        id
    }

    /// Tear a connection down and announce its destruction.
    pub fn remove(&mut self, id: ConnectionId, messenger: &mut Messenger) -> bool {
        let Some(connection) = self.by_id.remove(&id) else {
            return false;
        };
        info!("connection {} destroyed: peer {}", id, connection.peer);
        self.by_addr.remove(&(connection.kind, connection.peer));
        if let Some(name) = &connection.name {
            self.by_name.remove(name);
        }
        messenger.send(Missive {
            kind: MissiveKind::ConnectionDestroyed,
            connection: id,
        });
        true
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.by_id.get_mut(&id)
    }

    pub fn id_by_addr(&self, kind: ConnKind, peer: SocketAddr) -> Option<ConnectionId> {
        self.by_addr.get(&(kind, peer)).copied()
    }

    /// Resolve a control-plane connection reference: a symbolic name, or a
    /// numeric id as a fallback.
    pub fn resolve(&self, reference: &str) -> Option<ConnectionId> {
        if let Some(&id) = self.by_name.get(reference) {
            return Some(id);
        }
        reference
            .parse::<ConnectionId>()
            .ok()
            .filter(|id| self.by_id.contains_key(id))
    }

    /// Encode and queue one message for egress. `Err(PeerClosed)` means
    /// the caller should tear the connection down.
    pub fn send_message(&mut self, id: ConnectionId, message: &Message) -> Result<(), Error> {
        let Some(connection) = self.by_id.get_mut(&id) else {
            return Err(Error::Other(format!("no connection {}", id)));
        };
        let bytes = self.codec.encode(message)?;
        match connection.sink.send(bytes) {
            Ok(()) => {
                connection.counters.packets_sent += 1;
                Ok(())
            }
            Err(SinkError::Full) => {
                connection.counters.send_drops += 1;
                warn!("connection {}: egress queue full, packet dropped", id);
                Ok(())
            }
            Err(SinkError::Closed) => {
                debug!("connection {}: sink closed", id);
                Err(Error::PeerClosed)
            }
        }
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut rows: Vec<ConnectionInfo> = self
            .by_id
            .values()
            .map(|connection| ConnectionInfo {
                id: connection.id,
                name: connection.name.clone(),
                kind: connection.kind,
                peer: connection.peer.to_string(),
                is_local: connection.is_local,
                counters: connection.counters,
            })
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}
