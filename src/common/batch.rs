//! # Image Batches
//!
//! [`ImageBlob`] is an immutable image payload. It is backed by [`Bytes`], so every shard
//! and every retry can hold the same candidates without copying them.
//!
//! [`CompareBatch`] is one client's request: a reference image plus ordered candidates.
//! Candidate order is the global index space that answers refer to, so nothing here
//! reorders them.

use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Raw image bytes exactly as the client sent them.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlob {
    bytes: Bytes,
}

impl ImageBlob {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageBlob({} bytes)", self.bytes.len())
    }
}

impl AsRef<[u8]> for ImageBlob {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for ImageBlob {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

// Images travel inside JSON RPC messages as base64 strings.
impl Serialize for ImageBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(&self.bytes))
    }
}

impl<'de> Deserialize<'de> for ImageBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(Self::new(decoded))
    }
}

/// One reference image and its ordered candidates.
#[derive(Debug, Clone)]
pub struct CompareBatch {
    pub reference: ImageBlob,
    pub candidates: Vec<ImageBlob>,
}

impl CompareBatch {
    pub fn new(reference: ImageBlob, candidates: Vec<ImageBlob>) -> Self {
        Self {
            reference,
            candidates,
        }
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Total payload size, used for logging only.
    pub fn total_bytes(&self) -> usize {
        self.reference.len() + self.candidates.iter().map(ImageBlob::len).sum::<usize>()
    }
}
