//! # Dispatch Server
//!
//! Accepts client connections and runs one [`Session`] per connection.
//!
//! ## Tasks
//!
//! - **Listener**: accepts connections; a semaphore bounds how many sessions run at once
//! - **Reporter**: logs a JSON snapshot of [`DispatchMetrics`] at a fixed interval
//!
//! Every session takes its own snapshot of the worker registry when it is accepted,
//! so a reload through [`RegistryHandle::replace`] only affects later sessions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::common::config::DispatcherConfig;
use crate::common::error::ConfigError;
use crate::server::dispatcher::Dispatcher;
use crate::server::metrics::DispatchMetrics;
use crate::server::registry::{RegistryHandle, WorkerRegistry};
use crate::server::session::Session;
use crate::worker::client::ComparatorClient;

/// The client-facing dispatcher process.
pub struct DispatchServer<C> {
    config: DispatcherConfig,
    registry: RegistryHandle,
    dispatcher: Arc<Dispatcher<C>>,
    metrics: DispatchMetrics,
    /// Permits for concurrently running sessions
    sessions: Arc<Semaphore>,
}

impl<C: ComparatorClient + 'static> DispatchServer<C> {
    /// Build the server from a validated configuration.
    ///
    /// # Errors
    /// Fails if the worker list is empty or contains an invalid endpoint.
    pub fn new(config: DispatcherConfig, client: C) -> Result<Self, ConfigError> {
        let registry = RegistryHandle::new(WorkerRegistry::from_config(&config.workers)?);
        let metrics = DispatchMetrics::new();
        let dispatcher = Arc::new(
            Dispatcher::new(client, config.dispatch.call_timeout(), metrics.clone())
                .with_max_rpc_bytes(config.dispatch.max_rpc_bytes),
        );
        let sessions = Arc::new(Semaphore::new(config.server.max_concurrent_sessions));

        Ok(Self {
            config,
            registry,
            dispatcher,
            metrics,
            sessions,
        })
    }

    /// Handle used to swap the worker registry at runtime.
    pub fn registry(&self) -> RegistryHandle {
        self.registry.clone()
    }

    pub fn metrics(&self) -> DispatchMetrics {
        self.metrics.clone()
    }

    /// Bind the configured address and serve forever.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.server.address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(
            "🚀 Dispatcher listening on {} with {} workers",
            listener.local_addr()?,
            self.registry.snapshot().len()
        );

        tokio::select! {
            _ = Arc::clone(&self).accept_loop(listener) => error!("❌ Listener task terminated"),
            _ = self.report_loop() => error!("❌ Reporter task terminated"),
        }
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let permit = match Arc::clone(&self.sessions).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("❌ Session limiter closed: {}", e);
                    return;
                }
            };

            match listener.accept().await {
                Ok((socket, addr)) => {
                    debug!("🔗 Accepted client connection from {}", addr);
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        server.handle_connection(socket).await;
                    });
                }
                Err(e) => error!("❌ Accept error: {}", e),
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream) {
        let session = Session::new(
            self.registry.snapshot(),
            Arc::clone(&self.dispatcher),
            self.metrics.clone(),
            self.config.server.max_frame_bytes,
        );
        let id = session.id();

        if let Err(e) = session.run(socket).await {
            warn!("⚠️  [{}] Session ended without an answer: {}", id, e);
        }
    }

    async fn report_loop(&self) {
        let interval = Duration::from_secs(self.config.server.report_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            match serde_json::to_string(&self.metrics.snapshot()) {
                Ok(json) => info!("📊 Dispatch stats: {}", json),
                Err(e) => warn!("⚠️  Failed to serialize stats: {}", e),
            }
        }
    }
}
