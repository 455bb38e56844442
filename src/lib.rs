//! # histmatch
//!
//! Distributed first-match search over images. A dispatcher receives a reference
//! image and ordered candidates, splits the candidates across comparator workers and
//! answers with the position of the first candidate whose grayscale histogram
//! correlates with the reference.
//!
//! - [`common`]: framing, RPC messages, configuration and errors
//! - [`processing`]: the histogram comparison
//! - [`worker`]: the comparator worker and the client used to call it
//! - [`server`]: the dispatcher
//! - [`client`]: the client for the dispatcher's protocol

pub mod client;
pub mod common;
pub mod processing;
pub mod server;
pub mod worker;
