//! JSON-RPC client for the per-coin daemons.
//!
//! Each configured coin names one daemon endpoint; the only call this tier
//! makes is `dumpprivkey` against the coin's funding address, and only while
//! backfilling version bytes the store does not have yet.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::application::resolver::{DaemonRpc, RpcError};
use crate::infra::error::InfraError;

#[derive(Debug, Clone)]
pub struct DaemonEndpoint {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<Value>,
}

pub struct HttpDaemonRpc {
    client: reqwest::Client,
    daemons: HashMap<String, DaemonEndpoint>,
}

impl HttpDaemonRpc {
    /// Build a client over the configured daemon endpoints, keyed by
    /// lower-cased coin symbol. `timeout` bounds every call.
    pub fn new(
        daemons: HashMap<String, DaemonEndpoint>,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;
        Ok(Self { client, daemons })
    }
}

#[async_trait]
impl DaemonRpc for HttpDaemonRpc {
    async fn dump_priv_key(&self, coin: &str, address: &str) -> Result<String, RpcError> {
        let daemon = self
            .daemons
            .get(&coin.to_lowercase())
            .ok_or_else(|| RpcError::NotConfigured {
                coin: coin.to_string(),
            })?;

        let mut request = self.client.post(&daemon.url).json(&json!({
            "jsonrpc": "1.0",
            "id": "pooldash",
            "method": "dumpprivkey",
            "params": [address],
        }));
        if let Some(username) = &daemon.username {
            request = request.basic_auth(username, daemon.password.as_deref());
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                RpcError::Timeout
            } else {
                RpcError::transport(err.to_string())
            }
        })?;

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|err| RpcError::transport(err.to_string()))?;

        if let Some(error) = envelope.error {
            if !error.is_null() {
                return Err(RpcError::daemon(error.to_string()));
            }
        }

        match envelope.result {
            Some(Value::String(wif)) => Ok(wif),
            _ => Err(RpcError::MissingResult),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_coin_is_rejected_without_io() {
        let rpc = HttpDaemonRpc::new(HashMap::new(), Duration::from_secs(1)).expect("client");
        let err = rpc
            .dump_priv_key("ltc", "Laddress")
            .await
            .expect_err("must fail");
        assert!(matches!(err, RpcError::NotConfigured { coin } if coin == "ltc"));
    }
}
