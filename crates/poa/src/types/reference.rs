//! Object references
//!
//! An object reference names one object in one adapter of one server. The
//! binary layout follows the encapsulation convention: a leading byte-order
//! octet, then the body in that byte order.
//!
//! ```text
//! +-------+-----------+-------+-----------+---------+------+---------+-------+-----------+
//! | order | magic u32 | flags | server_id | type_id | path | [stamp] | id    |           |
//! |  u8   |  "POA1"   |  u8   | string    | string  | seq  |  u64    | octets|           |
//! +-------+-----------+-------+-----------+---------+------+---------+-------+-----------+
//! ```
//!
//! Strings and octet sequences are `u32` length-prefixed; the path is a
//! `u32` count followed by that many strings.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{PoaError, Result};
use super::object_id::{AdapterPath, ObjectId};

/// Reference signature ("POA1" in little-endian)
pub const REFERENCE_MAGIC: u32 = 0x3141_4F50;

/// Prefix of the stringified form
pub const STRINGIFIED_PREFIX: &str = "IOR:";

const FLAG_TRANSIENT: u8 = 0x01;

/// Upper bound on any single length field, guards against hostile input
const MAX_FIELD_LEN: usize = 64 * 1024;

/// Reference to an object hosted by an adapter
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectReference {
    server_id: String,
    type_id: String,
    adapter_path: AdapterPath,
    adapter_stamp: Option<u64>,
    object_id: ObjectId,
}

impl ObjectReference {
    /// Create a new reference
    ///
    /// `adapter_stamp` is set for references created by TRANSIENT adapters.
    pub fn new(
        server_id: impl Into<String>,
        type_id: impl Into<String>,
        adapter_path: AdapterPath,
        adapter_stamp: Option<u64>,
        object_id: ObjectId,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            type_id: type_id.into(),
            adapter_path,
            adapter_stamp,
            object_id,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Repository id of the object's interface
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn adapter_path(&self) -> &AdapterPath {
        &self.adapter_path
    }

    pub fn adapter_stamp(&self) -> Option<u64> {
        self.adapter_stamp
    }

    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn is_transient(&self) -> bool {
        self.adapter_stamp.is_some()
    }

    /// Encode to buffer (without the byte-order octet)
    pub fn encode<B: BufMut>(&self, buf: &mut B, little_endian: bool) {
        put_u32(buf, REFERENCE_MAGIC, little_endian);
        buf.put_u8(if self.adapter_stamp.is_some() { FLAG_TRANSIENT } else { 0 });
        put_octets(buf, self.server_id.as_bytes(), little_endian);
        put_octets(buf, self.type_id.as_bytes(), little_endian);
        put_u32(buf, self.adapter_path.depth() as u32, little_endian);
        for segment in self.adapter_path.segments() {
            put_octets(buf, segment.as_bytes(), little_endian);
        }
        if let Some(stamp) = self.adapter_stamp {
            if little_endian {
                buf.put_u64_le(stamp);
            } else {
                buf.put_u64(stamp);
            }
        }
        put_octets(buf, self.object_id.as_bytes(), little_endian);
    }

    /// Decode from buffer (after the byte-order octet has been read)
    pub fn decode<B: Buf>(buf: &mut B, little_endian: bool) -> Result<Self> {
        let magic = get_u32(buf, little_endian)?;
        if magic != REFERENCE_MAGIC {
            return Err(PoaError::InvalidReference(format!(
                "bad signature 0x{:08x}",
                magic
            )));
        }
        ensure(buf, 1)?;
        let flags = buf.get_u8();
        let server_id = get_string(buf, little_endian)?;
        let type_id = get_string(buf, little_endian)?;

        let depth = get_u32(buf, little_endian)? as usize;
        if depth == 0 || depth > MAX_FIELD_LEN {
            return Err(PoaError::InvalidReference(format!("bad adapter path depth {}", depth)));
        }
        let mut segments = Vec::with_capacity(depth);
        for _ in 0..depth {
            segments.push(get_string(buf, little_endian)?);
        }

        let adapter_stamp = if flags & FLAG_TRANSIENT != 0 {
            ensure(buf, 8)?;
            Some(if little_endian { buf.get_u64_le() } else { buf.get_u64() })
        } else {
            None
        };
        let object_id = ObjectId::new(get_octets(buf, little_endian)?);

        Ok(Self {
            server_id,
            type_id,
            adapter_path: AdapterPath::from_segments(segments),
            adapter_stamp,
            object_id,
        })
    }

    /// Encode with a leading byte-order octet (1 = little-endian)
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.object_id.len());
        buf.put_u8(1);
        self.encode(&mut buf, true);
        buf.freeze()
    }

    /// Decode the form produced by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        ensure(&buf, 1)?;
        let little_endian = match buf.get_u8() {
            0 => false,
            1 => true,
            other => {
                return Err(PoaError::InvalidReference(format!("bad byte order flag {}", other)))
            }
        };
        let reference = Self::decode(&mut buf, little_endian)?;
        if buf.has_remaining() {
            return Err(PoaError::InvalidReference(format!(
                "{} trailing bytes",
                buf.remaining()
            )));
        }
        Ok(reference)
    }

    /// Parse the `IOR:<hex>` stringified form
    pub fn parse(s: &str) -> Result<Self> {
        let hex = s
            .strip_prefix(STRINGIFIED_PREFIX)
            .ok_or_else(|| PoaError::InvalidReference("missing IOR: prefix".to_string()))?;
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PoaError::InvalidReference("non-hex character".to_string()));
        }
        if hex.len() % 2 != 0 {
            return Err(PoaError::InvalidReference("odd hex length".to_string()));
        }
        let bytes: Vec<u8> = hex
            .as_bytes()
            .chunks(2)
            .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
            .collect();
        Self::from_bytes(&bytes)
    }
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

impl fmt::Display for ObjectReference {
    /// Stringified `IOR:<hex>` form
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(STRINGIFIED_PREFIX)?;
        for b in self.to_bytes().iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Converts references to and from their wire form
///
/// The transport layer may install its own encoder; the default is
/// [`BinaryReferenceEncoder`].
pub trait ReferenceEncoder: Send + Sync {
    fn encode(&self, reference: &ObjectReference) -> Bytes;
    fn decode(&self, bytes: &[u8]) -> Result<ObjectReference>;
}

/// Encoder using [`ObjectReference::to_bytes`]
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryReferenceEncoder;

impl ReferenceEncoder for BinaryReferenceEncoder {
    fn encode(&self, reference: &ObjectReference) -> Bytes {
        reference.to_bytes()
    }

    fn decode(&self, bytes: &[u8]) -> Result<ObjectReference> {
        ObjectReference::from_bytes(bytes)
    }
}

fn ensure<B: Buf>(buf: &B, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(PoaError::BufferUnderflow {
            needed,
            have: buf.remaining(),
        });
    }
    Ok(())
}

fn put_u32<B: BufMut>(buf: &mut B, value: u32, little_endian: bool) {
    if little_endian {
        buf.put_u32_le(value);
    } else {
        buf.put_u32(value);
    }
}

fn get_u32<B: Buf>(buf: &mut B, little_endian: bool) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(if little_endian { buf.get_u32_le() } else { buf.get_u32() })
}

fn put_octets<B: BufMut>(buf: &mut B, data: &[u8], little_endian: bool) {
    put_u32(buf, data.len() as u32, little_endian);
    buf.put_slice(data);
}

fn get_octets<B: Buf>(buf: &mut B, little_endian: bool) -> Result<Bytes> {
    let len = get_u32(buf, little_endian)? as usize;
    if len > MAX_FIELD_LEN {
        return Err(PoaError::InvalidReference(format!("field length {} too large", len)));
    }
    ensure(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

fn get_string<B: Buf>(buf: &mut B, little_endian: bool) -> Result<String> {
    let raw = get_octets(buf, little_endian)?;
    String::from_utf8(raw.to_vec()).map_err(|e| PoaError::InvalidReference(e.to_string()))
}
