//! Request dispatch seam.
//!
//! The scheduler hands [`MaterializationRequest`]s to a [`RequestDispatcher`]
//! and never waits for the materialization itself. Dispatch failures are
//! reported per request; the tick carries on with the remaining requests.

use std::collections::HashSet;

use async_trait::async_trait;
use automat_core::{AssetKey, MaterializationRequest};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Errors returned by a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Execution layer refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Execution layer could not be reached
    #[error("dispatcher unavailable: {0}")]
    Unavailable(String),
}

/// Hands requests to the execution layer.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    /// Submit one request.
    async fn dispatch(&self, request: &MaterializationRequest) -> Result<(), DispatchError>;
}

/// Records every request in memory. Used by tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryDispatcher {
    requests: RwLock<Vec<MaterializationRequest>>,
    failing: RwLock<HashSet<AssetKey>>,
}

impl MemoryDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every future request for `asset`.
    pub async fn fail_asset(&self, asset: impl Into<AssetKey>) {
        self.failing.write().await.insert(asset.into());
    }

    /// Accepted requests, in dispatch order.
    pub async fn requests(&self) -> Vec<MaterializationRequest> {
        self.requests.read().await.clone()
    }

    /// Remove and return accepted requests.
    pub async fn drain(&self) -> Vec<MaterializationRequest> {
        std::mem::take(&mut *self.requests.write().await)
    }
}

#[async_trait]
impl RequestDispatcher for MemoryDispatcher {
    async fn dispatch(&self, request: &MaterializationRequest) -> Result<(), DispatchError> {
        if self.failing.read().await.contains(&request.asset_partition.asset) {
            return Err(DispatchError::Rejected(format!(
                "{} is configured to fail",
                request.asset_partition.asset
            )));
        }

        debug!("Accepted request {} for {}", request.id, request.asset_partition);
        self.requests.write().await.push(request.clone());
        Ok(())
    }
}
