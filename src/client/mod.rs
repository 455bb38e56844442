//! # Client
//!
//! Library side of the `client` binary: frames a batch, sends it to a dispatcher and
//! decodes the answer.

pub mod client;

pub use client::MatchClient;
