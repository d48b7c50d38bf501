//! Content fingerprints of chunks.
//!
//! Two chunks with the same fingerprint are treated as the same chunk. A
//! BLAKE3 collision would therefore merge two distinct chunks; this is an
//! accepted limitation and is not guarded against.

use core::fmt;

use serde::{Deserialize, Serialize};

/// The content-addressable ID of a chunk.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn of(contents: &[u8]) -> Self {
        Self(*blake3::hash(contents).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", base16ct::HexDisplay(&self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(BLAKE3:{:x})", base16ct::HexDisplay(&self.0))
    }
}
