//! # Match Client
//!
//! Submits one batch to a dispatcher and waits for the answer.
//!
//! ```rust,ignore
//! use histmatch::client::MatchClient;
//!
//! let client = MatchClient::new("127.0.0.1:7000");
//! let index = client.submit(&reference, &candidates).await?;
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::common::frame::{read_answer, write_frame, write_terminator};
use crate::server::aggregate::AggregateResult;

/// Client for the dispatcher's framed protocol.
#[derive(Debug, Clone)]
pub struct MatchClient {
    address: String,
    timeout: Option<Duration>,
}

impl MatchClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: None,
        }
    }

    /// Give up if the whole exchange takes longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send the reference and candidates, then wait for the answer.
    ///
    /// # Returns
    /// - `Ok(Some(index))`: zero-based index of the first matching candidate
    /// - `Ok(None)`: no candidate matched
    ///
    /// Empty images are rejected before anything is sent, since a zero-length frame
    /// would end the batch early.
    pub async fn submit<R, C>(&self, reference: R, candidates: &[C]) -> Result<Option<usize>>
    where
        R: AsRef<[u8]>,
        C: AsRef<[u8]>,
    {
        if reference.as_ref().is_empty() {
            bail!("reference image is empty");
        }
        if let Some(position) = candidates.iter().position(|c| c.as_ref().is_empty()) {
            bail!("candidate {} is empty", position);
        }

        let exchange = self.exchange(reference.as_ref(), candidates);
        let answer = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .with_context(|| format!("no answer from {} within {:?}", self.address, limit))??,
            None => exchange.await?,
        };

        let result = AggregateResult::from_wire(answer);
        if let AggregateResult::Match(index) = result {
            if index >= candidates.len() {
                bail!(
                    "dispatcher answered {} for a batch of {} candidates",
                    answer,
                    candidates.len()
                );
            }
        }
        Ok(result.index())
    }

    async fn exchange<C: AsRef<[u8]>>(&self, reference: &[u8], candidates: &[C]) -> Result<u32> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("failed to connect to dispatcher at {}", self.address))?;
        debug!(
            "🔗 Connected to {}, sending {} candidates",
            self.address,
            candidates.len()
        );

        write_frame(&mut stream, reference).await?;
        for candidate in candidates {
            write_frame(&mut stream, candidate.as_ref()).await?;
        }
        write_terminator(&mut stream).await?;

        let answer = read_answer(&mut stream)
            .await
            .context("dispatcher closed the connection without answering")?;
        stream.shutdown().await.ok();

        info!("📨 Dispatcher answered {}", answer);
        Ok(answer)
    }
}
