//! Object identifiers
//!
//! - `ObjectId`: opaque byte string naming an object within one adapter
//! - `AdapterPath`: names of the adapters from the root down to one adapter
//! - `IdGenerator`: system-assigned ids for SYSTEM_ID adapters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::policy::LifespanPolicy;

/// Opaque object identifier
#[derive(Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ObjectId(Bytes);

impl ObjectId {
    /// Create an id from raw bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Create an id from a static byte string
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    /// Raw bytes of the id
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the id, returning its bytes
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn is_printable(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ')
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(Bytes::from(s.into_bytes()))
    }
}

impl From<&[u8]> for ObjectId {
    fn from(b: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(b))
    }
}

impl From<Vec<u8>> for ObjectId {
    fn from(b: Vec<u8>) -> Self {
        Self(Bytes::from(b))
    }
}

impl From<Bytes> for ObjectId {
    fn from(b: Bytes) -> Self {
        Self(b)
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_printable() {
            // Printable ids were checked to be ASCII
            f.write_str(&String::from_utf8_lossy(&self.0))
        } else {
            for b in self.0.iter() {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        }
    }
}

/// Path of adapter names from the root adapter down
///
/// The root adapter has depth 1.
#[derive(Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct AdapterPath(Vec<String>);

impl AdapterPath {
    /// Separator used by `Display` and `parse`
    pub const SEPARATOR: char = '/';

    /// Path of a root adapter
    pub fn root(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Build a path from its segments
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a `/`-separated path; empty segments are skipped
    pub fn parse(s: &str) -> Self {
        Self(
            s.split(Self::SEPARATOR)
                .filter(|seg| !seg.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Path of a child adapter
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// Path of the parent adapter, `None` for a root path
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Name of the adapter this path designates
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether `self` equals `prefix` or lies below it
    pub fn starts_with(&self, prefix: &AdapterPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Debug for AdapterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AdapterPath({})", self)
    }
}

impl fmt::Display for AdapterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", Self::SEPARATOR)?;
            }
            f.write_str(seg)?;
        }
        Ok(())
    }
}

/// Length of a system-generated object id
pub const SYSTEM_ID_LEN: usize = 16;

/// Generate a creation stamp distinguishing adapter incarnations
pub fn generate_stamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    // Mix with process ID so two processes started together differ
    let pid = std::process::id() as u64;
    timestamp ^ (pid << 48) ^ seq.rotate_left(32)
}

/// System id allocator for one adapter
///
/// Ids are `prefix:u64 BE` followed by `counter:u64 BE`. Transient adapters
/// use their creation stamp as prefix, so ids from an earlier incarnation of
/// the same adapter are recognised as foreign.
#[derive(Debug)]
pub struct IdGenerator {
    lifespan: LifespanPolicy,
    prefix: u64,
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new(lifespan: LifespanPolicy, prefix: u64) -> Self {
        Self {
            lifespan,
            prefix,
            next: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh id
    pub fn next_id(&self) -> ObjectId {
        let counter = self.next.fetch_add(1, Ordering::SeqCst);
        let mut buf = BytesMut::with_capacity(SYSTEM_ID_LEN);
        buf.put_u64(self.prefix);
        buf.put_u64(counter);
        ObjectId(buf.freeze())
    }

    /// Check whether `id` could have been produced by this generator
    pub fn is_valid(&self, id: &ObjectId) -> bool {
        if id.len() != SYSTEM_ID_LEN {
            return false;
        }
        let mut buf = id.as_bytes();
        let prefix = buf.get_u64();
        let counter = buf.get_u64();
        match self.lifespan {
            LifespanPolicy::Transient => {
                prefix == self.prefix && counter > 0 && counter < self.next.load(Ordering::SeqCst)
            }
            // Persistent ids may come from an earlier run of the server
            LifespanPolicy::Persistent => counter > 0,
        }
    }
}
