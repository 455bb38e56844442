//! # Common Components
//!
//! Shared utilities and data structures used by the dispatcher, the comparator worker
//! and the client.
//!
//! ## Modules
//!
//! - [`frame`]: Length-prefixed framing of the client wire protocol
//! - [`batch`]: Image payloads and client batches
//! - [`messages`]: Dispatcher/worker RPC message definitions
//! - [`connection`]: TCP connection abstraction with message framing
//! - [`config`]: Configuration parsing and validation
//! - [`error`]: Error types shared across components
//! - [`logging`]: Logger setup for the binaries

pub mod batch;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod logging;
pub mod messages;
