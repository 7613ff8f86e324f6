//! Live update broadcasting.
//!
//! Subscribers register an opaque write sink (in production: the sending
//! half of an SSE channel) and receive one serialized statistics payload
//! per successful periodic rebuild. The registry is the sole owner of the
//! sinks; a sink whose write fails is dropped without disturbing delivery
//! to the rest.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use metrics::{counter, gauge};
use thiserror::Error;
use tracing::debug;

/// Identifies one live connection for the registry's lifetime.
pub type ConnectionId = u64;

/// The sink's receiving side has gone away.
#[derive(Debug, Error)]
#[error("live connection closed")]
pub struct SinkClosed;

/// Anything that can accept a pushed payload. Transport-agnostic by design
/// so the broadcaster never learns what an HTTP response is.
pub trait StatSink: Send + Sync {
    fn write(&self, payload: &str) -> Result<(), SinkClosed>;
}

pub struct LiveBroadcaster {
    sinks: DashMap<ConnectionId, Box<dyn StatSink>>,
    next_id: AtomicU64,
}

impl LiveBroadcaster {
    pub fn new() -> Self {
        Self {
            sinks: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, sink: Box<dyn StatSink>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sinks.insert(id, sink);
        gauge!("pooldash_live_connections").increment(1.0);
        debug!(connection = id, "Live connection subscribed");
        id
    }

    pub fn unsubscribe(&self, id: ConnectionId) {
        if self.sinks.remove(&id).is_some() {
            gauge!("pooldash_live_connections").decrement(1.0);
            debug!(connection = id, "Live connection unsubscribed");
        }
    }

    /// Deliver `payload` to every registered sink, in no particular order.
    ///
    /// A failing sink is unsubscribed; the rest still receive the payload.
    /// Returns the number of successful deliveries.
    pub fn broadcast(&self, payload: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for entry in self.sinks.iter() {
            match entry.value().write(payload) {
                Ok(()) => delivered += 1,
                Err(SinkClosed) => failed.push(*entry.key()),
            }
        }

        for id in failed {
            counter!("pooldash_broadcast_dropped_total").increment(1);
            self.unsubscribe(id);
        }

        counter!("pooldash_broadcast_delivered_total").increment(delivered as u64);
        delivered
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Default for LiveBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct RecordingSink {
        received: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl StatSink for RecordingSink {
        fn write(&self, payload: &str) -> Result<(), SinkClosed> {
            if self.fail {
                return Err(SinkClosed);
            }
            self.received
                .lock()
                .expect("recording lock")
                .push(payload.to_string());
            Ok(())
        }
    }

    fn sink(fail: bool) -> (Box<dyn StatSink>, Arc<Mutex<Vec<String>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(RecordingSink {
                received: received.clone(),
                fail,
            }),
            received,
        )
    }

    #[test]
    fn broadcast_reaches_every_sink() {
        let live = LiveBroadcaster::new();
        let (a, got_a) = sink(false);
        let (b, got_b) = sink(false);
        live.subscribe(a);
        live.subscribe(b);

        assert_eq!(live.broadcast("{\"miners\":1}"), 2);
        assert_eq!(got_a.lock().expect("lock").len(), 1);
        assert_eq!(got_b.lock().expect("lock").len(), 1);
    }

    #[test]
    fn failing_sink_is_dropped_without_aborting_delivery() {
        let live = LiveBroadcaster::new();
        let (first, got_first) = sink(false);
        let (second, _) = sink(true);
        let (third, got_third) = sink(false);
        live.subscribe(first);
        live.subscribe(second);
        live.subscribe(third);

        assert_eq!(live.broadcast("payload"), 2);
        assert_eq!(got_first.lock().expect("lock").len(), 1);
        assert_eq!(got_third.lock().expect("lock").len(), 1);
        assert_eq!(live.len(), 2);

        // The failed connection is gone; a second broadcast only reaches two.
        assert_eq!(live.broadcast("payload"), 2);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let live = LiveBroadcaster::new();
        let (s, _) = sink(false);
        let id = live.subscribe(s);
        live.unsubscribe(id);
        live.unsubscribe(id);
        assert!(live.is_empty());
    }
}
