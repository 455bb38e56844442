//! # Worker Registry
//!
//! The ordered set of comparator workers, loaded once from configuration.
//!
//! A [`WorkerRegistry`] is immutable. Each session takes a snapshot from the
//! [`RegistryHandle`] at start, and a config reload swaps in a new snapshot without
//! touching sessions already running.
//!
//! Reachability is tracked per dispatch round only, through [`DispatchRound`]. Nothing
//! carries over between rounds: every round starts by trusting every configured worker,
//! and calling a worker is the health check.

use std::sync::{Arc, Mutex, RwLock};

use crate::common::config::{WorkerEndpoint, WorkersConfig};
use crate::common::error::ConfigError;

/// Immutable, ordered list of worker endpoints.
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    endpoints: Vec<WorkerEndpoint>,
}

impl WorkerRegistry {
    /// Build a registry, rejecting an empty or invalid endpoint list.
    pub fn new(endpoints: Vec<WorkerEndpoint>) -> Result<Self, ConfigError> {
        if endpoints.is_empty() {
            return Err(ConfigError::NoWorkers);
        }
        for endpoint in &endpoints {
            endpoint.validate()?;
        }
        Ok(Self { endpoints })
    }

    pub fn from_config(config: &WorkersConfig) -> Result<Self, ConfigError> {
        Self::new(config.endpoints.clone())
    }

    /// Endpoints in configuration order. The order is stable, which keeps shard
    /// assignment deterministic.
    pub fn list_endpoints(&self) -> &[WorkerEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Start a dispatch round with every worker considered reachable.
    pub fn begin_round(&self) -> DispatchRound<'_> {
        DispatchRound {
            registry: self,
            unreachable: Mutex::new(vec![false; self.endpoints.len()]),
        }
    }
}

/// Reachability view for one batch's dispatch.
///
/// Shards of the same batch run concurrently and share this view, so a worker that
/// fails for one shard is skipped by the others' reassignment.
#[derive(Debug)]
pub struct DispatchRound<'a> {
    registry: &'a WorkerRegistry,
    unreachable: Mutex<Vec<bool>>,
}

impl<'a> DispatchRound<'a> {
    pub fn endpoints(&self) -> &'a [WorkerEndpoint] {
        self.registry.list_endpoints()
    }

    pub fn endpoint(&self, slot: usize) -> &'a WorkerEndpoint {
        &self.registry.list_endpoints()[slot]
    }

    /// Record that the worker in `slot` failed during this round.
    pub fn mark_unreachable(&self, slot: usize) {
        let mut unreachable = self.unreachable.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(flag) = unreachable.get_mut(slot) {
            *flag = true;
        }
    }

    pub fn is_unreachable(&self, slot: usize) -> bool {
        let unreachable = self.unreachable.lock().unwrap_or_else(|e| e.into_inner());
        unreachable.get(slot).copied().unwrap_or(true)
    }

    /// Number of workers that have not failed yet in this round.
    pub fn reachable_count(&self) -> usize {
        let unreachable = self.unreachable.lock().unwrap_or_else(|e| e.into_inner());
        unreachable.iter().filter(|failed| !**failed).count()
    }
}

/// Shared, swappable pointer to the current registry snapshot.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    current: Arc<RwLock<Arc<WorkerRegistry>>>,
}

impl RegistryHandle {
    pub fn new(registry: WorkerRegistry) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// The registry new sessions should use.
    pub fn snapshot(&self) -> Arc<WorkerRegistry> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    /// Atomically replace the registry. Sessions holding an older snapshot keep it.
    pub fn replace(&self, registry: WorkerRegistry) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(registry);
    }
}
