//! Cache-aside resolution of per-coin address version bytes.
//!
//! A chain's version bytes never change, so the pipeline is strictly
//! append-only: read everything the store already has, backfill only the
//! configured coins it is missing by asking each coin's daemon to reveal
//! the funding address's key material, persist the new pairs in one batch,
//! and render the key-derivation page from the merged mapping. Per-coin
//! failures cost that coin one run; only an unreachable store aborts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use metrics::counter;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{address::version_byte_pair, template::Template, types::VersionBytePair};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version byte store unavailable: {message}")]
    Unavailable { message: String },
    #[error("version byte store returned an undecodable entry: {message}")]
    Encoding { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("no daemon configured for coin `{coin}`")]
    NotConfigured { coin: String },
    #[error("daemon transport failure: {message}")]
    Transport { message: String },
    #[error("daemon call timed out")]
    Timeout,
    #[error("daemon rejected the call: {message}")]
    Daemon { message: String },
    #[error("daemon response carried no result")]
    MissingResult,
}

impl RpcError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn daemon(message: impl Into<String>) -> Self {
        Self::Daemon {
            message: message.into(),
        }
    }
}

/// Persistent mapping of lower-cased coin symbol to version byte pair.
#[async_trait]
pub trait VersionByteStore: Send + Sync {
    async fn load_all(&self) -> Result<BTreeMap<String, VersionBytePair>, StoreError>;

    /// Write a batch of newly resolved pairs. Called with a non-empty batch
    /// only; expected to apply as a single logical unit.
    async fn persist(&self, batch: &BTreeMap<String, VersionBytePair>) -> Result<(), StoreError>;
}

/// Per-coin daemon command interface.
#[async_trait]
pub trait DaemonRpc: Send + Sync {
    /// Ask the coin's daemon to reveal the WIF private key behind `address`.
    async fn dump_priv_key(&self, coin: &str, address: &str) -> Result<String, RpcError>;
}

/// What the resolver needs to know about one configured coin.
#[derive(Debug, Clone)]
pub struct CoinEndpoint {
    pub symbol: String,
    pub funding_address: String,
}

pub struct VersionByteResolver {
    store: Arc<dyn VersionByteStore>,
    rpc: Arc<dyn DaemonRpc>,
    coins: Vec<CoinEndpoint>,
    rpc_timeout: Duration,
}

impl VersionByteResolver {
    pub fn new(
        store: Arc<dyn VersionByteStore>,
        rpc: Arc<dyn DaemonRpc>,
        coins: Vec<CoinEndpoint>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            store,
            rpc,
            coins,
            rpc_timeout,
        }
    }

    /// Resolve the version byte pair of every configured coin.
    ///
    /// Coins already in the store are returned as-is with no RPC traffic.
    /// Missing coins are fetched concurrently; a coin whose fetch or decode
    /// fails is logged and omitted from this run. Newly resolved pairs are
    /// persisted in one batch before the merged mapping is returned.
    pub async fn resolve(&self) -> Result<BTreeMap<String, VersionBytePair>, StoreError> {
        let existing = self.store.load_all().await?;

        let missing: Vec<&CoinEndpoint> = self
            .coins
            .iter()
            .filter(|coin| !existing.contains_key(&coin.symbol.to_lowercase()))
            .collect();

        let fetched =
            futures::future::join_all(missing.iter().map(|coin| self.resolve_coin(coin))).await;
        let fresh: BTreeMap<String, VersionBytePair> = fetched.into_iter().flatten().collect();

        if !fresh.is_empty() {
            self.store.persist(&fresh).await?;
            info!(resolved = fresh.len(), "Persisted new version byte pairs");
        }

        let mut merged = existing;
        merged.extend(fresh);
        Ok(merged)
    }

    async fn resolve_coin(&self, coin: &CoinEndpoint) -> Option<(String, VersionBytePair)> {
        let symbol = coin.symbol.to_lowercase();

        let wif = match tokio::time::timeout(
            self.rpc_timeout,
            self.rpc.dump_priv_key(&coin.symbol, &coin.funding_address),
        )
        .await
        {
            Ok(Ok(wif)) => wif,
            Ok(Err(error)) => {
                counter!("pooldash_resolver_rpc_failure_total").increment(1);
                warn!(coin = %symbol, %error, "Version byte resolution failed; coin skipped");
                return None;
            }
            Err(_) => {
                counter!("pooldash_resolver_rpc_failure_total").increment(1);
                warn!(coin = %symbol, error = %RpcError::Timeout, "Version byte resolution failed; coin skipped");
                return None;
            }
        };

        match version_byte_pair(&coin.funding_address, &wif) {
            Ok(pair) => Some((symbol, pair)),
            Err(error) => {
                counter!("pooldash_resolver_rpc_failure_total").increment(1);
                warn!(coin = %symbol, %error, "Version byte decode failed; coin skipped");
                None
            }
        }
    }
}

/// The rendered key-derivation page, held outside the page cache because it
/// depends on the resolver's output rather than on statistics.
pub struct KeyPage {
    rendered: ArcSwapOption<String>,
}

impl KeyPage {
    pub fn new() -> Self {
        Self {
            rendered: ArcSwapOption::empty(),
        }
    }

    pub fn publish(&self, html: String) {
        self.rendered.store(Some(Arc::new(html)));
    }

    /// `None` until a resolver run has produced a render.
    pub fn get(&self) -> Option<Arc<String>> {
        self.rendered.load_full()
    }
}

impl Default for KeyPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one resolution pass and publish the key-derivation page.
pub async fn resolve_and_render(
    resolver: &VersionByteResolver,
    template: &Template,
    key_page: &KeyPage,
) -> Result<(), StoreError> {
    let coins = resolver.resolve().await?;
    key_page.publish(template.render(&json!({ "coins": coins })));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_page_is_unavailable_until_published() {
        let page = KeyPage::new();
        assert!(page.get().is_none());
        page.publish("<html></html>".to_string());
        assert_eq!(page.get().expect("published").as_str(), "<html></html>");
    }
}
