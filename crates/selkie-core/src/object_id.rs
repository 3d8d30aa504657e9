//! Object identity for selkie
//!
//! TigerStyle: Explicit validation, immutable after creation.

use crate::constants::{OBJECT_ID_LENGTH_BYTES_MAX, SYSTEM_OBJECT_ID_LENGTH_BYTES};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::fmt;

/// Opaque byte identity naming a remote-invocable object within an adapter
///
/// Equality and hashing are structural (byte-for-byte): two independently
/// allocated identities with equal contents are interchangeable as map keys.
///
/// # TigerStyle
/// - Explicit length validation on construction
/// - Immutable after creation
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ObjectId {
    bytes: Bytes,
}

impl ObjectId {
    /// Create a new ObjectId with validation
    ///
    /// # Errors
    /// Returns an error if the identity is empty or exceeds the length limit.
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();

        if bytes.is_empty() {
            return Err(Error::InvalidObjectId {
                reason: "identity must not be empty".into(),
            });
        }

        if bytes.len() > OBJECT_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidObjectId {
                reason: format!(
                    "length {} exceeds limit {}",
                    bytes.len(),
                    OBJECT_ID_LENGTH_BYTES_MAX
                ),
            });
        }

        Ok(Self { bytes })
    }

    /// Create a system-assigned ObjectId from the owning adapter's ordinal
    /// and a monotonically increasing sequence number
    ///
    /// The encoding is a fixed-width big-endian pair: 4 bytes of adapter
    /// ordinal followed by 4 bytes of sequence.
    pub fn from_parts(adapter_ordinal: u32, sequence: u32) -> Self {
        let mut buf = [0u8; SYSTEM_OBJECT_ID_LENGTH_BYTES];
        buf[..4].copy_from_slice(&adapter_ordinal.to_be_bytes());
        buf[4..].copy_from_slice(&sequence.to_be_bytes());

        debug_assert!(buf.len() == SYSTEM_OBJECT_ID_LENGTH_BYTES);
        Self {
            bytes: Bytes::copy_from_slice(&buf),
        }
    }

    /// Get the raw identity bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the identity in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the identity is empty (never true for validated identities)
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Display for ObjectId {
    /// Hex bytes joined by `:`. Cosmetic only - the identity is the raw
    /// byte sequence, not any textual rendering of it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl TryFrom<&[u8]> for ObjectId {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::new(Bytes::copy_from_slice(bytes))
    }
}

impl TryFrom<&str> for ObjectId {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}
