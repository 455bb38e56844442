//! # Comparator Worker
//!
//! Both ends of the dispatcher/worker RPC:
//!
//! - [`client`]: the stub the dispatcher calls ([`ComparatorClient`])
//! - [`server`]: the worker process that runs the histogram comparison

pub mod client;
pub mod server;

pub use client::{ComparatorClient, RpcComparatorClient};
pub use server::ComparatorServer;
