//! HTTP client for the statistics-aggregation collaborator.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::application::stats::{StatsError, StatsProvider};
use crate::infra::error::InfraError;

pub struct HttpStatsClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatsClient {
    /// `base_url` is the aggregation service root, without a trailing slash.
    /// `timeout` bounds every fetch, so a stalled collaborator surfaces as a
    /// `StatsError::Timeout` instead of wedging the periodic loop.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, StatsError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    StatsError::Timeout
                } else {
                    StatsError::unavailable(err.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(StatsError::unavailable(format!(
                "{path} answered {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| StatsError::decode(err.to_string()))
    }
}

#[async_trait]
impl StatsProvider for HttpStatsClient {
    async fn global_stats(&self) -> Result<Value, StatsError> {
        self.get_json("/stats", &[]).await
    }

    async fn balance_by_address(&self, address: &str) -> Result<Value, StatsError> {
        self.get_json(&format!("/balances/{address}"), &[]).await
    }

    async fn coins(&self) -> Result<Value, StatsError> {
        self.get_json("/coins", &[]).await
    }

    async fn coin_totals(&self, coin: &str, filter: Option<&str>) -> Result<Value, StatsError> {
        let query: Vec<(&str, &str)> = filter.map(|f| ("filter", f)).into_iter().collect();
        self.get_json(&format!("/coins/{coin}/totals"), &query).await
    }

    async fn payout(&self, address: &str) -> Result<Value, StatsError> {
        self.get_json(&format!("/payouts/{address}"), &[]).await
    }
}
