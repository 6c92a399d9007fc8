//! Parsed packets.
//!
//! A [`Message`] is the unit the forwarding pipeline operates on. It is
//! built once by the wire codec (or by a test) and never mutated
//! afterwards; holders share it behind an `Arc`.

use crate::name::Name;
use crate::ticks::Ticks;
use crate::ConnectionId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default Interest lifetime when the packet does not carry one.
pub const DEFAULT_INTEREST_LIFETIME_MS: u64 = 4_000;
/// Hop limit assigned when the packet does not carry one.
pub const DEFAULT_HOP_LIMIT: u8 = 255;

/// The three packet kinds the processor dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Interest,
    ContentObject,
    Control,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Interest => write!(f, "Interest"),
            MessageKind::ContentObject => write!(f, "ContentObject"),
            MessageKind::Control => write!(f, "Control"),
        }
    }
}

/// An immutable parsed packet plus its ingress bookkeeping.
#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    name: Name,
    key_id_restriction: Option<Bytes>,
    hash_restriction: Option<Bytes>,
    key_id: Option<Bytes>,
    object_hash: Option<Bytes>,
    lifetime_ms: u64,
    hop_limit: u8,
    expiry_ms: Option<u64>,
    recommended_cache_ms: Option<u64>,
    payload: Bytes,
    ingress: ConnectionId,
    receive_tick: Ticks,
}

impl Message {
    /// Start an Interest for `name` with the default lifetime and hop limit.
    pub fn interest(name: Name) -> Self {
        Self {
            kind: MessageKind::Interest,
            name,
            key_id_restriction: None,
            hash_restriction: None,
            key_id: None,
            object_hash: None,
            lifetime_ms: DEFAULT_INTEREST_LIFETIME_MS,
            hop_limit: DEFAULT_HOP_LIMIT,
            expiry_ms: None,
            recommended_cache_ms: None,
            payload: Bytes::new(),
            ingress: 0,
            receive_tick: 0,
        }
    }

    /// Start a ContentObject carrying `payload` under `name`.
    pub fn content_object(name: Name, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::ContentObject,
            name,
            key_id_restriction: None,
            hash_restriction: None,
            key_id: None,
            object_hash: None,
            lifetime_ms: 0,
            hop_limit: DEFAULT_HOP_LIMIT,
            expiry_ms: None,
            recommended_cache_ms: None,
            payload: payload.into(),
            ingress: 0,
            receive_tick: 0,
        }
    }

    /// Start a Control message whose payload is one verb line.
    pub fn control(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Control,
            name: Name::root(),
            key_id_restriction: None,
            hash_restriction: None,
            key_id: None,
            object_hash: None,
            lifetime_ms: 0,
            hop_limit: DEFAULT_HOP_LIMIT,
            expiry_ms: None,
            recommended_cache_ms: None,
            payload: payload.into(),
            ingress: 0,
            receive_tick: 0,
        }
    }

    pub fn with_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.lifetime_ms = lifetime_ms;
        self
    }

    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn with_key_id_restriction(mut self, key_id: impl Into<Bytes>) -> Self {
        self.key_id_restriction = Some(key_id.into());
        self
    }

    pub fn with_hash_restriction(mut self, hash: impl Into<Bytes>) -> Self {
        self.hash_restriction = Some(hash.into());
        self
    }

    pub fn with_key_id(mut self, key_id: impl Into<Bytes>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    pub fn with_object_hash(mut self, hash: impl Into<Bytes>) -> Self {
        self.object_hash = Some(hash.into());
        self
    }

    pub fn with_expiry_ms(mut self, expiry_ms: u64) -> Self {
        self.expiry_ms = Some(expiry_ms);
        self
    }

    pub fn with_recommended_cache_ms(mut self, cache_ms: u64) -> Self {
        self.recommended_cache_ms = Some(cache_ms);
        self
    }

    pub fn with_ingress(mut self, ingress: ConnectionId) -> Self {
        self.ingress = ingress;
        self
    }

    pub fn with_receive_tick(mut self, tick: Ticks) -> Self {
        self.receive_tick = tick;
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn key_id_restriction(&self) -> Option<&Bytes> {
        self.key_id_restriction.as_ref()
    }

    pub fn hash_restriction(&self) -> Option<&Bytes> {
        self.hash_restriction.as_ref()
    }

    pub fn key_id(&self) -> Option<&Bytes> {
        self.key_id.as_ref()
    }

    pub fn object_hash(&self) -> Option<&Bytes> {
        self.object_hash.as_ref()
    }

    pub fn lifetime_ms(&self) -> u64 {
        self.lifetime_ms
    }

    pub fn hop_limit(&self) -> u8 {
        self.hop_limit
    }

    pub fn expiry_ms(&self) -> Option<u64> {
        self.expiry_ms
    }

    pub fn recommended_cache_ms(&self) -> Option<u64> {
        self.recommended_cache_ms
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn ingress(&self) -> ConnectionId {
        self.ingress
    }

    pub fn receive_tick(&self) -> Ticks {
        self.receive_tick
    }

    /// A ContentObject is expired once the wall clock reaches its declared
    /// expiry millisecond. Objects without one never expire this way.
    pub fn is_expired_at(&self, wall_ms: u64) -> bool {
        matches!(self.expiry_ms, Some(expiry) if wall_ms >= expiry)
    }

    /// A copy of this message re-stamped for a different ingress and time.
    /// Used by connectors when the same bytes arrive again.
    pub fn restamped(&self, ingress: ConnectionId, receive_tick: Ticks) -> Self {
        let mut copy = self.clone();
        copy.ingress = ingress;
        copy.receive_tick = receive_tick;
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_defaults() {
        let interest = Message::interest(Name::from_uri("/a/b"));
        assert_eq!(interest.kind(), MessageKind::Interest);
        assert_eq!(interest.lifetime_ms(), DEFAULT_INTEREST_LIFETIME_MS);
        assert_eq!(interest.hop_limit(), DEFAULT_HOP_LIMIT);
        assert!(interest.key_id_restriction().is_none());
    }

    #[test]
    fn expiry_is_inclusive() {
        let object = Message::content_object(Name::from_uri("/a"), &b"x"[..]).with_expiry_ms(1_000);
        assert!(!object.is_expired_at(999));
        assert!(object.is_expired_at(1_000));
        assert!(object.is_expired_at(2_000));

        let no_expiry = Message::content_object(Name::from_uri("/a"), &b"x"[..]);
        assert!(!no_expiry.is_expired_at(u64::MAX));
    }
}
