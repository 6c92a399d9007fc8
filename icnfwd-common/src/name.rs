//! Hierarchical content names.
//!
//! A [`Name`] is an ordered sequence of opaque byte segments. Names are
//! immutable once constructed and cache the hash of every prefix, so a
//! longest-prefix-match table can probe `hash_at(k)` for each k without
//! rehashing the segments.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Maximum number of segments in a name.
pub const MAX_NAME_SEGMENTS: usize = 64;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(mut state: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        state ^= b as u64;
        state = state.wrapping_mul(FNV_PRIME);
    }
    state
}

/* ---------------------------------------------------------------- *\
 * NameSegment
\* ---------------------------------------------------------------- */

/// One opaque segment of a hierarchical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameSegment(pub Bytes);

impl NameSegment {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NameSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printable = self.0.iter().all(|&b| b.is_ascii_graphic() || b == b' ');
        if printable && !self.0.is_empty() {
            write!(f, "{}", String::from_utf8_lossy(&self.0))
        } else {
            write!(f, "0x")?;
            for &b in &self.0 {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        }
    }
}

/* ---------------------------------------------------------------- *\
 * Name
\* ---------------------------------------------------------------- */

/// Helper used only for deserialisation of `Name`.
#[derive(Deserialize)]
struct NameHelper {
    segments: Vec<NameSegment>,
}

/// A hierarchical name with a per-prefix hash cache.
///
/// `prefix_hashes[k-1]` holds the hash of the first `k` segments, so both
/// the FIB's per-length probes and the full-name fingerprint are O(1).
#[derive(Debug, Clone, Serialize)]
pub struct Name {
    segments: Vec<NameSegment>,
    #[serde(skip_serializing)]
    prefix_hashes: Vec<u64>,
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let helper = NameHelper::deserialize(deserializer)?;
        let mut name = Name::root();
        for segment in helper.segments {
            name.push(segment);
        }
        Ok(name)
    }
}

impl Name {
    /// The empty (root) name.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
            prefix_hashes: Vec::new(),
        }
    }

    /// Parse a `/a/b/c` style URI. Empty path components are skipped.
    pub fn from_uri(s: &str) -> Self {
        let mut name = Self::root();
        for segment in s.split('/').filter(|seg| !seg.is_empty()) {
            name.push(NameSegment::new(segment.as_bytes().to_vec()));
        }
        name
    }

    /// Append a segment, extending the prefix hash cache.
    pub fn push(&mut self, segment: NameSegment) -> &mut Self {
        let state = self.prefix_hashes.last().copied().unwrap_or(FNV_OFFSET);
        let state = fnv1a(state, &(segment.len() as u32).to_be_bytes());
        let state = fnv1a(state, &segment.0);
        self.prefix_hashes.push(state);
        self.segments.push(segment);
        self
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NameSegment> {
        self.segments.get(index)
    }

    pub fn segments(&self) -> impl Iterator<Item = &NameSegment> {
        self.segments.iter()
    }

    /// The name consisting of the first `len` segments.
    pub fn prefix(&self, len: usize) -> Self {
        let len = len.min(self.segments.len());
        Self {
            segments: self.segments[..len].to_vec(),
            prefix_hashes: self.prefix_hashes[..len].to_vec(),
        }
    }

    /// True when every segment of `self` equals the corresponding segment
    /// of `other`. The root name is a prefix of everything.
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// Hash of the first `k` segments; `hash_at(0)` is the root hash.
    ///
    /// Panics if `k` exceeds the segment count.
    pub fn hash_at(&self, k: usize) -> u64 {
        if k == 0 {
            FNV_OFFSET
        } else {
            self.prefix_hashes[k - 1]
        }
    }

    /// Hash of the whole name.
    pub fn full_hash(&self) -> u64 {
        self.hash_at(self.segments.len())
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.full_hash());
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::root()
    }
}
