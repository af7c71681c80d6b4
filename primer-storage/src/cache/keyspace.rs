//! Byte layout of the LMDB keyspace.
//!
//! Every record lives in a single unnamed database. The first byte selects
//! the namespace, followed by a separator byte:
//!
//! ```text
//! 'v' 0xFF <cache key>                        -> serialized value
//! 'k' 0xFF <cache key>                        -> encoded attribute list
//! 'a' 0xFF <encoded attribute> <cache key>    -> empty
//! ```
//!
//! Attributes are encoded self-delimiting (segment count, then each segment
//! length-prefixed), so a prefix scan over `'a' 0xFF <encoded attribute>`
//! yields exactly the keys related to that attribute and never the keys of
//! an attribute that merely extends it.
//!
//! LMDB keys are limited to 511 bytes. Cache keys are at most
//! [`MAX_KEY_LEN`](primer_core::key::MAX_KEY_LEN) bytes; an attribute whose
//! encoding exceeds [`MAX_INLINE_ATTRIBUTE`] bytes is replaced in reverse
//! entries by `u32::MAX` (as a segment count no inline encoding can carry)
//! followed by the SHA-256 digest of its encoding. Lookups through a digest
//! are confirmed against the forward relation.

use primer_core::{Attribute, CacheKey};
use sha2::{Digest, Sha256};

/// Separator byte between the namespace tag and the rest of the key.
const SEPARATOR: u8 = 0xFF;

/// Longest attribute encoding stored inline in a reverse entry.
pub const MAX_INLINE_ATTRIBUTE: usize = 248;

const DIGEST_MARKER: [u8; 4] = u32::MAX.to_le_bytes();

/// Record namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Stored values.
    Value,
    /// Forward relation: key to its attributes.
    Dependencies,
    /// Reverse relation: attribute to its keys.
    Dependents,
}

impl Namespace {
    fn tag(self) -> u8 {
        match self {
            Namespace::Value => b'v',
            Namespace::Dependencies => b'k',
            Namespace::Dependents => b'a',
        }
    }

    /// Prefix shared by every record in this namespace.
    pub fn prefix(self) -> [u8; 2] {
        [self.tag(), SEPARATOR]
    }
}

/// Key of the value stored under `key`.
pub fn value_key(key: &CacheKey) -> Vec<u8> {
    keyed(Namespace::Value, key)
}

/// Key of the attribute list `key` depends on.
pub fn dependencies_key(key: &CacheKey) -> Vec<u8> {
    keyed(Namespace::Dependencies, key)
}

/// Prefix shared by every reverse-relation entry of `attribute`.
pub fn dependents_prefix(attribute: &Attribute) -> Vec<u8> {
    let encoded = encode_attribute(attribute);
    let mut bytes = Namespace::Dependents.prefix().to_vec();
    if encoded.len() <= MAX_INLINE_ATTRIBUTE {
        bytes.extend_from_slice(&encoded);
    } else {
        bytes.extend_from_slice(&DIGEST_MARKER);
        bytes.extend_from_slice(&Sha256::digest(&encoded));
    }
    bytes
}

/// Returns true if reverse entries of `attribute` are keyed by digest, so a
/// prefix match has to be confirmed.
pub fn is_digested(attribute: &Attribute) -> bool {
    encode_attribute(attribute).len() > MAX_INLINE_ATTRIBUTE
}

/// Reverse-relation entry linking `attribute` to `key`.
pub fn dependent_key(attribute: &Attribute, key: &CacheKey) -> Vec<u8> {
    let mut bytes = dependents_prefix(attribute);
    bytes.extend_from_slice(key.as_str().as_bytes());
    bytes
}

/// Recover the cache key from a reverse-relation entry found by scanning
/// `prefix`.
pub fn key_from_dependent(prefix: &[u8], entry: &[u8]) -> Option<CacheKey> {
    let rest = entry.strip_prefix(prefix)?;
    let key = std::str::from_utf8(rest).ok()?;
    CacheKey::parse(key).ok()
}

fn keyed(namespace: Namespace, key: &CacheKey) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + key.as_str().len());
    bytes.extend_from_slice(&namespace.prefix());
    bytes.extend_from_slice(key.as_str().as_bytes());
    bytes
}

fn put_len(len: usize, out: &mut Vec<u8>) {
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

fn take_len(bytes: &[u8]) -> Option<(usize, &[u8])> {
    let (head, rest) = bytes.split_first_chunk::<4>()?;
    Some((u32::from_le_bytes(*head) as usize, rest))
}

fn encode_attribute_into(attribute: &Attribute, out: &mut Vec<u8>) {
    put_len(attribute.len(), out);
    for segment in attribute.segments() {
        put_len(segment.len(), out);
        out.extend_from_slice(segment.as_bytes());
    }
}

/// Encode one attribute.
pub fn encode_attribute(attribute: &Attribute) -> Vec<u8> {
    let mut out = Vec::new();
    encode_attribute_into(attribute, &mut out);
    out
}

/// Decode one attribute from the front of `bytes`, returning the remainder.
pub fn decode_attribute(bytes: &[u8]) -> Option<(Attribute, &[u8])> {
    let (count, mut rest) = take_len(bytes)?;
    let mut segments = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let (len, tail) = take_len(rest)?;
        if tail.len() < len {
            return None;
        }
        let (segment, tail) = tail.split_at(len);
        segments.push(String::from_utf8(segment.to_vec()).ok()?);
        rest = tail;
    }
    Some((Attribute::new(segments), rest))
}

/// Encode a key's full attribute list.
pub fn encode_attributes<'a, I>(attributes: I) -> Vec<u8>
where
    I: ExactSizeIterator<Item = &'a Attribute>,
{
    let mut out = Vec::new();
    put_len(attributes.len(), &mut out);
    for attribute in attributes {
        encode_attribute_into(attribute, &mut out);
    }
    out
}

/// Decode an attribute list written by [`encode_attributes`].
///
/// Returns `None` on truncated or trailing bytes.
pub fn decode_attributes(bytes: &[u8]) -> Option<Vec<Attribute>> {
    let (count, mut rest) = take_len(bytes)?;
    let mut attributes = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let (attribute, tail) = decode_attribute(rest)?;
        attributes.push(attribute);
        rest = tail;
    }
    rest.is_empty().then_some(attributes)
}
