//! TLV (Type-Length-Value) encoding and decoding utilities.
//!
//! The default wire codec expresses every optional packet field as a TLV
//! element after the fixed header. Lengths use the usual variable
//! encoding: one byte below 253, `253` + u16, or `254` + u32.

use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// TLV element types used by the default codec.
pub const TLV_NAME: u8 = 0x01;
pub const TLV_SEGMENT: u8 = 0x02;
pub const TLV_KEYID_RESTRICTION: u8 = 0x03;
pub const TLV_HASH_RESTRICTION: u8 = 0x04;
pub const TLV_KEYID: u8 = 0x05;
pub const TLV_OBJECT_HASH: u8 = 0x06;
pub const TLV_LIFETIME: u8 = 0x07;
pub const TLV_EXPIRY: u8 = 0x08;
pub const TLV_CACHE_TIME: u8 = 0x09;
pub const TLV_PAYLOAD: u8 = 0x0a;

/// Encodes a TLV length field.
pub fn encode_tlv_length(length: usize, buf: &mut BytesMut) {
    if length < 253 {
        buf.put_u8(length as u8);
    } else if length <= 65_535 {
        buf.put_u8(253);
        buf.put_u16(length as u16);
    } else {
        buf.put_u8(254);
        buf.put_u32(length as u32);
    }
}

/// Decodes a TLV length field.
pub fn decode_tlv_length(buf: &mut impl Buf) -> Result<usize, Error> {
    if !buf.has_remaining() {
        return Err(Error::Malformed("truncated TLV length".into()));
    }
    match buf.get_u8() {
        n @ 0..=252 => Ok(n as usize),
        253 => {
            if buf.remaining() < 2 {
                return Err(Error::Malformed("truncated 16-bit TLV length".into()));
            }
            Ok(buf.get_u16() as usize)
        }
        254 => {
            if buf.remaining() < 4 {
                return Err(Error::Malformed("truncated 32-bit TLV length".into()));
            }
            Ok(buf.get_u32() as usize)
        }
        255 => Err(Error::Malformed("64-bit TLV lengths not supported".into())),
    }
}

/// A generic TLV element consisting of a type, length, and value.
#[derive(Debug, Clone, PartialEq)]
pub struct TlvElement {
    pub tlv_type: u8,
    pub value: Bytes,
}

impl TlvElement {
    pub fn new(tlv_type: u8, value: impl Into<Bytes>) -> Self {
        Self {
            tlv_type,
            value: value.into(),
        }
    }

    /// A TLV whose value is a minimally encoded big-endian integer.
    pub fn from_u64(tlv_type: u8, value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
        Self::new(tlv_type, bytes[skip..].to_vec())
    }

    /// Interpret the value as a big-endian integer of up to 8 bytes.
    pub fn as_u64(&self) -> Result<u64, Error> {
        if self.value.len() > 8 {
            return Err(Error::Malformed(format!(
                "integer TLV {} is {} bytes long",
                self.tlv_type,
                self.value.len()
            )));
        }
        let mut out = 0u64;
        for &b in &self.value {
            out = (out << 8) | b as u64;
        }
        Ok(out)
    }

    /// Total length of this element when encoded.
    pub fn encoded_len(&self) -> usize {
        let value_len = self.value.len();
        let length_len = if value_len < 253 {
            1
        } else if value_len <= 65_535 {
            3
        } else {
            5
        };
        1 + length_len + value_len
    }

    /// Encodes this TLV element into the provided buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tlv_type);
        encode_tlv_length(self.value.len(), buf);
        buf.extend_from_slice(&self.value);
    }

    /// Decodes a TLV element from the provided buffer.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, Error> {
        if !buf.has_remaining() {
            return Err(Error::Malformed("truncated TLV type".into()));
        }
        let tlv_type = buf.get_u8();
        let length = decode_tlv_length(buf)?;
        if buf.remaining() < length {
            return Err(Error::Malformed(format!(
                "TLV value needs {} bytes, {} available",
                length,
                buf.remaining()
            )));
        }
        Ok(Self {
            tlv_type,
            value: buf.copy_to_bytes(length),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_round_trip() {
        let element = TlvElement::new(TLV_PAYLOAD, &b"hello"[..]);
        let mut buf = BytesMut::new();
        element.encode(&mut buf);
        assert_eq!(buf.len(), element.encoded_len());

        let mut bytes = buf.freeze();
        let decoded = TlvElement::decode(&mut bytes).unwrap();
        assert_eq!(decoded, element);
        assert!(!bytes.has_remaining());
    }

    #[test]
    fn length_markers() {
        let mut buf = BytesMut::new();
        encode_tlv_length(252, &mut buf);
        assert_eq!(&buf[..], &[252]);

        buf.clear();
        encode_tlv_length(300, &mut buf);
        assert_eq!(buf[0], 253);
        assert_eq!(decode_tlv_length(&mut buf.clone().freeze()).unwrap(), 300);

        buf.clear();
        encode_tlv_length(70_000, &mut buf);
        assert_eq!(buf[0], 254);
        assert_eq!(decode_tlv_length(&mut buf.clone().freeze()).unwrap(), 70_000);
    }

    #[test]
    fn integer_values() {
        let element = TlvElement::from_u64(TLV_LIFETIME, 4_000);
        assert_eq!(element.value.len(), 2);
        assert_eq!(element.as_u64().unwrap(), 4_000);

        let zero = TlvElement::from_u64(TLV_LIFETIME, 0);
        assert_eq!(zero.value.len(), 1);
        assert_eq!(zero.as_u64().unwrap(), 0);
    }

    #[test]
    fn truncated_value_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u8(TLV_PAYLOAD);
        buf.put_u8(10);
        buf.extend_from_slice(b"abc");
        assert!(TlvElement::decode(&mut buf.freeze()).is_err());
    }
}
