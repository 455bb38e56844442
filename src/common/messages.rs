//! # RPC Message Protocol
//!
//! Messages exchanged between the dispatcher and comparator workers.
//!
//! Messages are serialized to JSON and sent over TCP with a 4-byte length prefix
//! (see [`Connection`](super::connection::Connection)). Image payloads are carried as
//! base64 strings.

use serde::{Deserialize, Serialize};

use super::batch::ImageBlob;
use super::frame::DEFAULT_MAX_FRAME_BYTES;

/// Default cap on one RPC message. Two maximum-size frames, base64 encoded, fit inside it.
pub const DEFAULT_MAX_RPC_BYTES: usize = 3 * DEFAULT_MAX_FRAME_BYTES;

/// JSON envelope of a `CompareRequest` without its images, with room for a 20-digit id.
const REQUEST_OVERHEAD: usize = 128;

/// Quotes and separator around each base64 string.
const PER_IMAGE_OVERHEAD: usize = 3;

/// Length of the standard, padded base64 encoding of `len` bytes.
pub fn base64_len(len: usize) -> usize {
    (len + 2) / 3 * 4
}

/// Serialized size of one image inside a `CompareRequest`, separators included.
pub fn encoded_image_size(len: usize) -> usize {
    base64_len(len) + PER_IMAGE_OVERHEAD
}

/// Upper bound on the serialized size of a `CompareRequest` carrying a reference of
/// `reference_len` bytes and candidates of the given sizes.
pub fn compare_request_size_bound<I>(reference_len: usize, candidate_lens: I) -> usize
where
    I: IntoIterator<Item = usize>,
{
    candidate_lens
        .into_iter()
        .map(encoded_image_size)
        .sum::<usize>()
        + REQUEST_OVERHEAD
        + encoded_image_size(reference_len)
}

// ============================================================================
// MESSAGE TYPES - Dispatcher <-> Comparator Worker
// ============================================================================

/// Core message enum for all dispatcher/worker communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// **Compare Request**
    ///
    /// Sent by the dispatcher with one shard of a client batch.
    ///
    /// # Fields
    /// - `request_id`: Unique ID for matching the response to this call
    /// - `reference`: The reference ("color") image
    /// - `candidates`: The shard's candidate images, in original order
    CompareRequest {
        request_id: u64,
        reference: ImageBlob,
        candidates: Vec<ImageBlob>,
    },

    /// **Compare Response**
    ///
    /// Worker's answer to a `CompareRequest`.
    ///
    /// # Fields
    /// - `request_id`: ID of the request being answered
    /// - `matching_index`: Lowest local index that matched, if any
    /// - `skipped`: Local indices of candidates that could not be decoded
    /// - `reference_error`: Set when the reference itself could not be decoded
    CompareResponse {
        request_id: u64,
        matching_index: Option<u32>,
        skipped: Vec<u32>,
        reference_error: Option<String>,
    },
}

impl Message {
    /// Serialize a message to JSON bytes for transmission over the network.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a message from JSON bytes received from the network.
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_request_survives_json() {
        let msg = Message::CompareRequest {
            request_id: 42,
            reference: ImageBlob::from(vec![1u8, 2, 3]),
            candidates: vec![ImageBlob::from(vec![4u8]), ImageBlob::from(vec![5u8, 6])],
        };

        match Message::from_bytes(&msg.to_bytes().unwrap()).unwrap() {
            Message::CompareRequest {
                request_id,
                reference,
                candidates,
            } => {
                assert_eq!(request_id, 42);
                assert_eq!(reference.as_bytes(), &[1, 2, 3]);
                assert_eq!(candidates.len(), 2);
                assert_eq!(candidates[1].as_bytes(), &[5, 6]);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn size_bound_covers_serialized_request() {
        let reference = ImageBlob::from(vec![9u8; 1000]);
        let candidates: Vec<ImageBlob> = (1..=7)
            .map(|i| ImageBlob::from(vec![i as u8; 97 * i]))
            .collect();
        let msg = Message::CompareRequest {
            request_id: u64::MAX,
            reference: reference.clone(),
            candidates: candidates.clone(),
        };

        let actual = msg.to_bytes().unwrap().len();
        let bound = compare_request_size_bound(reference.len(), candidates.iter().map(ImageBlob::len));
        assert!(bound >= actual, "bound {} < actual {}", bound, actual);
        assert!(bound - actual < 256, "bound {} far above actual {}", bound, actual);
    }

    #[test]
    fn base64_length_is_padded() {
        assert_eq!(base64_len(0), 0);
        assert_eq!(base64_len(1), 4);
        assert_eq!(base64_len(3), 4);
        assert_eq!(base64_len(4), 8);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Message::from_bytes(b"{\"Nope\":{}}").is_err());
    }
}
