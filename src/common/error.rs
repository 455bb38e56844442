//! # Error Taxonomy
//!
//! Typed errors for every failure class the dispatcher distinguishes:
//!
//! - [`IngestError`]: the client's byte stream was cut short or malformed. Local to one
//!   session; the session aborts without answering.
//! - [`WorkerError`]: a comparator worker could not answer. Recoverable; the shard is
//!   reassigned to another worker.
//! - [`DecodeError`]: an image inside a shard could not be decoded. Recoverable at the
//!   worker; that candidate is skipped.
//! - [`ConfigError`]: the configuration is unusable. Fatal at startup.
//! - [`SessionError`]: anything that ends a session without a written answer.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure while reading a client's image batch.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The connection closed part way through a frame.
    #[error("truncated frame: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },

    /// The connection closed before the next frame started.
    #[error("connection closed before end of batch")]
    ConnectionClosed,

    /// The declared frame length exceeds the configured limit.
    #[error("frame of {length} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },

    /// The batch terminator arrived where the reference image was expected.
    #[error("batch terminator received in place of the reference image")]
    MissingReference,

    /// The batch holds more candidates than a 4-byte answer can address.
    #[error("batch exceeds {max} candidates")]
    TooManyCandidates { max: usize },

    #[error("i/o error while reading frame: {0}")]
    Io(#[from] io::Error),
}

/// Failure of a single comparator worker call.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("worker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rpc failure: {0}")]
    Rpc(String),

    #[error("malformed worker response: {0}")]
    MalformedResponse(String),

    #[error("worker closed the connection without answering")]
    Closed,
}

/// An image that could not be decoded by the comparator.
#[derive(Debug, Error)]
#[error("failed to decode image: {0}")]
pub struct DecodeError(#[from] pub image::ImageError);

/// Unusable configuration, detected at startup or on reload.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no comparator workers configured")]
    NoWorkers,

    #[error("invalid worker endpoint {0}")]
    InvalidEndpoint(String),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Anything that ends a client session without a response.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("ingestion failed: {0}")]
    Ingest(#[from] IngestError),

    #[error("failed to write response: {0}")]
    Respond(#[source] io::Error),
}
