//! Seam to the statistics-aggregation collaborator.
//!
//! The dashboard treats every result as an opaque JSON context value; what
//! the numbers mean is the collaborator's business.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("statistics source unavailable: {message}")]
    Unavailable { message: String },
    #[error("statistics fetch timed out")]
    Timeout,
    #[error("statistics payload could not be decoded: {message}")]
    Decode { message: String },
}

impl StatsError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// Asynchronous statistics provider.
///
/// Production wires an HTTP client against the aggregation service; tests
/// install in-memory fakes.
#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Current pool-wide statistics snapshot.
    async fn global_stats(&self) -> Result<Value, StatsError>;

    /// Balance summary for one miner address.
    async fn balance_by_address(&self, address: &str) -> Result<Value, StatsError>;

    /// Per-coin overview used by the shares pages.
    async fn coins(&self) -> Result<Value, StatsError>;

    /// Share totals for one coin, optionally filtered.
    async fn coin_totals(&self, coin: &str, filter: Option<&str>) -> Result<Value, StatsError>;

    /// Pending payout amount for one miner address.
    async fn payout(&self, address: &str) -> Result<Value, StatsError>;
}
