//! # Dispatcher
//!
//! The client-facing side of the system, bottom-up:
//!
//! - [`registry`]: configured comparator workers and per-round reachability
//! - [`partition`]: contiguous shards and their initial workers
//! - [`dispatcher`]: concurrent fan-out with timeouts and reassignment
//! - [`aggregate`]: first-match reduction over shard answers
//! - [`session`]: one client connection from ingestion to answer
//! - [`server`]: accept loop and periodic stats
//! - [`metrics`]: shared counters

pub mod aggregate;
pub mod dispatcher;
pub mod metrics;
pub mod partition;
pub mod registry;
pub mod server;
pub mod session;

pub use aggregate::AggregateResult;
pub use dispatcher::Dispatcher;
pub use metrics::DispatchMetrics;
pub use registry::{RegistryHandle, WorkerRegistry};
pub use server::DispatchServer;
pub use session::Session;
