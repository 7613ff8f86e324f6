//! Periodic statistics refresh: the full-rebuild invalidation path.
//!
//! Each tick fetches a fresh statistics snapshot, republishes every page,
//! and pushes the serialized snapshot to live subscribers. A failed or
//! timed-out fetch skips the tick and keeps the previous generation in
//! service; the loop itself never dies.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{live::LiveBroadcaster, pages::PageCache, stats::StatsProvider};

/// Run one refresh tick. Exposed separately from the loop so the behavior
/// is drivable in tests.
pub async fn refresh_once(
    cache: &PageCache,
    stats: &dyn StatsProvider,
    live: &LiveBroadcaster,
    fetch_timeout: Duration,
) {
    let snapshot = match timeout(fetch_timeout, stats.global_stats()).await {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(error)) => {
            counter!("pooldash_stats_fetch_failure_total").increment(1);
            warn!(%error, "Statistics fetch failed; keeping previous render");
            return;
        }
        Err(_) => {
            counter!("pooldash_stats_fetch_failure_total").increment(1);
            warn!("Statistics fetch timed out; keeping previous render");
            return;
        }
    };

    let payload = match serde_json::to_string(&snapshot) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(%error, "Statistics snapshot could not be serialized; keeping previous render");
            return;
        }
    };

    cache.rebuild_all(snapshot);
    let delivered = live.broadcast(&payload);
    debug!(delivered, "Periodic refresh published");
}

/// Spawn the refresh loop for the process lifetime.
pub fn spawn(
    cache: Arc<PageCache>,
    stats: Arc<dyn StatsProvider>,
    live: Arc<LiveBroadcaster>,
    update_interval: Duration,
    fetch_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(update_interval);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            refresh_once(&cache, stats.as_ref(), &live, fetch_timeout).await;
        }
    })
}
