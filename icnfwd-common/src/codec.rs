//! Default wire codec.
//!
//! The forwarding core is wire-format agnostic; connectors hand it parsed
//! [`Message`]s and ask a codec to re-encode them on egress. This module
//! provides the default codec: a four-byte fixed header
//! `[version, kind, hop_limit, flags]` followed by TLV elements. The only
//! observable rules the core relies on are that hop-limit is a single
//! header byte and that encode/parse round-trips to an equivalent message.

use crate::error::Error;
use crate::message::{Message, MessageKind};
use crate::name::{Name, NameSegment, MAX_NAME_SEGMENTS};
use crate::ticks::Ticks;
use crate::tlv::{self, TlvElement};
use crate::ConnectionId;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Wire format version emitted by this codec.
pub const WIRE_VERSION: u8 = 1;
/// Maximum accepted packet size.
pub const MAX_PACKET_SIZE: usize = 8_800;

const KIND_INTEREST: u8 = 0x01;
const KIND_CONTENT_OBJECT: u8 = 0x02;
const KIND_CONTROL: u8 = 0x03;

/// The codec seam between connectors and the core.
pub trait WireCodec {
    /// Parse one packet, stamping it with its ingress connection and
    /// receive tick.
    fn decode(&self, bytes: Bytes, ingress: ConnectionId, now: Ticks) -> Result<Message, Error>;

    /// Re-encode a message for transmission.
    fn encode(&self, message: &Message) -> Result<Bytes, Error>;
}

/// The default fixed-header + TLV codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCodec;

impl WireCodec for DefaultCodec {
    fn decode(&self, bytes: Bytes, ingress: ConnectionId, now: Ticks) -> Result<Message, Error> {
        if bytes.len() > MAX_PACKET_SIZE {
            return Err(Error::Malformed(format!(
                "packet of {} bytes exceeds maximum",
                bytes.len()
            )));
        }
        let mut buf = bytes;
        if buf.remaining() < 4 {
            return Err(Error::Malformed("truncated fixed header".into()));
        }
        let version = buf.get_u8();
        if version != WIRE_VERSION {
            return Err(Error::Malformed(format!("unknown wire version {}", version)));
        }
        let kind_byte = buf.get_u8();
        let hop_limit = buf.get_u8();
        let _flags = buf.get_u8();

        let mut name = None;
        let mut key_id_restriction = None;
        let mut hash_restriction = None;
        let mut key_id = None;
        let mut object_hash = None;
        let mut lifetime_ms = None;
        let mut expiry_ms = None;
        let mut cache_ms = None;
        let mut payload = Bytes::new();

        while buf.has_remaining() {
            let element = TlvElement::decode(&mut buf)?;
            match element.tlv_type {
                tlv::TLV_NAME => name = Some(decode_name(&element)?),
                tlv::TLV_KEYID_RESTRICTION => key_id_restriction = Some(element.value),
                tlv::TLV_HASH_RESTRICTION => hash_restriction = Some(element.value),
                tlv::TLV_KEYID => key_id = Some(element.value),
                tlv::TLV_OBJECT_HASH => object_hash = Some(element.value),
                tlv::TLV_LIFETIME => lifetime_ms = Some(element.as_u64()?),
                tlv::TLV_EXPIRY => expiry_ms = Some(element.as_u64()?),
                tlv::TLV_CACHE_TIME => cache_ms = Some(element.as_u64()?),
                tlv::TLV_PAYLOAD => payload = element.value,
                other => {
                    // Unknown elements are skipped, not fatal.
                    log::trace!("skipping unknown TLV type {}", other);
                }
            }
        }

        let message = match kind_byte {
            KIND_INTEREST => {
                let name =
                    name.ok_or_else(|| Error::Malformed("Interest without a name".into()))?;
                let mut msg = Message::interest(name).with_hop_limit(hop_limit);
                if let Some(lifetime) = lifetime_ms {
                    msg = msg.with_lifetime_ms(lifetime);
                }
                if let Some(restriction) = key_id_restriction {
                    msg = msg.with_key_id_restriction(restriction);
                }
                if let Some(restriction) = hash_restriction {
                    msg = msg.with_hash_restriction(restriction);
                }
                msg
            }
            KIND_CONTENT_OBJECT => {
                let name =
                    name.ok_or_else(|| Error::Malformed("ContentObject without a name".into()))?;
                let mut msg = Message::content_object(name, payload).with_hop_limit(hop_limit);
                if let Some(id) = key_id {
                    msg = msg.with_key_id(id);
                }
                if let Some(hash) = object_hash {
                    msg = msg.with_object_hash(hash);
                }
                if let Some(expiry) = expiry_ms {
                    msg = msg.with_expiry_ms(expiry);
                }
                if let Some(cache) = cache_ms {
                    msg = msg.with_recommended_cache_ms(cache);
                }
                msg
            }
            KIND_CONTROL => Message::control(payload).with_hop_limit(hop_limit),
            other => {
                return Err(Error::Malformed(format!("unknown packet kind {}", other)));
            }
        };

        Ok(message.with_ingress(ingress).with_receive_tick(now))
    }

    fn encode(&self, message: &Message) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(64 + message.payload().len());
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(match message.kind() {
            MessageKind::Interest => KIND_INTEREST,
            MessageKind::ContentObject => KIND_CONTENT_OBJECT,
            MessageKind::Control => KIND_CONTROL,
        });
        buf.put_u8(message.hop_limit());
        buf.put_u8(0);

        match message.kind() {
            MessageKind::Interest => {
                encode_name(message.name(), &mut buf);
                TlvElement::from_u64(tlv::TLV_LIFETIME, message.lifetime_ms()).encode(&mut buf);
                if let Some(restriction) = message.key_id_restriction() {
                    TlvElement::new(tlv::TLV_KEYID_RESTRICTION, restriction.clone())
                        .encode(&mut buf);
                }
                if let Some(restriction) = message.hash_restriction() {
                    TlvElement::new(tlv::TLV_HASH_RESTRICTION, restriction.clone())
                        .encode(&mut buf);
                }
            }
            MessageKind::ContentObject => {
                encode_name(message.name(), &mut buf);
                if let Some(id) = message.key_id() {
                    TlvElement::new(tlv::TLV_KEYID, id.clone()).encode(&mut buf);
                }
                if let Some(hash) = message.object_hash() {
                    TlvElement::new(tlv::TLV_OBJECT_HASH, hash.clone()).encode(&mut buf);
                }
                if let Some(expiry) = message.expiry_ms() {
                    TlvElement::from_u64(tlv::TLV_EXPIRY, expiry).encode(&mut buf);
                }
                if let Some(cache) = message.recommended_cache_ms() {
                    TlvElement::from_u64(tlv::TLV_CACHE_TIME, cache).encode(&mut buf);
                }
                if !message.payload().is_empty() {
                    TlvElement::new(tlv::TLV_PAYLOAD, message.payload().clone()).encode(&mut buf);
                }
            }
            MessageKind::Control => {
                TlvElement::new(tlv::TLV_PAYLOAD, message.payload().clone()).encode(&mut buf);
            }
        }

        if buf.len() > MAX_PACKET_SIZE {
            return Err(Error::Exhausted(format!(
                "encoded packet of {} bytes exceeds maximum",
                buf.len()
            )));
        }
        Ok(buf.freeze())
    }
}

fn encode_name(name: &Name, buf: &mut BytesMut) {
    let mut inner = BytesMut::new();
    for segment in name.segments() {
        TlvElement::new(tlv::TLV_SEGMENT, segment.0.clone()).encode(&mut inner);
    }
    TlvElement::new(tlv::TLV_NAME, inner.freeze()).encode(buf);
}

fn decode_name(element: &TlvElement) -> Result<Name, Error> {
    let mut name = Name::root();
    let mut buf = element.value.clone();
    while buf.has_remaining() {
        let segment = TlvElement::decode(&mut buf)?;
        if segment.tlv_type != tlv::TLV_SEGMENT {
            return Err(Error::Malformed(format!(
                "expected name segment TLV, got type {}",
                segment.tlv_type
            )));
        }
        if name.len() == MAX_NAME_SEGMENTS {
            return Err(Error::Malformed("name has too many segments".into()));
        }
        name.push(NameSegment(segment.value));
    }
    Ok(name)
}
