//! Live broadcaster delivery isolation.

use std::sync::{Arc, Mutex};

use pooldash::application::live::{LiveBroadcaster, SinkClosed, StatSink};

struct RecordingSink {
    received: Arc<Mutex<Vec<String>>>,
}

impl StatSink for RecordingSink {
    fn write(&self, payload: &str) -> Result<(), SinkClosed> {
        self.received
            .lock()
            .expect("recording lock")
            .push(payload.to_string());
        Ok(())
    }
}

struct BrokenSink;

impl StatSink for BrokenSink {
    fn write(&self, _payload: &str) -> Result<(), SinkClosed> {
        Err(SinkClosed)
    }
}

fn recording(live: &LiveBroadcaster) -> Arc<Mutex<Vec<String>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    live.subscribe(Box::new(RecordingSink {
        received: received.clone(),
    }));
    received
}

#[test]
fn middle_sink_failure_does_not_abort_delivery() {
    let live = LiveBroadcaster::new();

    let first = recording(&live);
    live.subscribe(Box::new(BrokenSink));
    let third = recording(&live);

    let delivered = live.broadcast(r#"{"minerCount":42}"#);

    assert_eq!(delivered, 2);
    assert_eq!(first.lock().expect("lock").as_slice(), [r#"{"minerCount":42}"#]);
    assert_eq!(third.lock().expect("lock").as_slice(), [r#"{"minerCount":42}"#]);

    // The broken connection was unsubscribed during the broadcast.
    assert_eq!(live.len(), 2);
}

#[test]
fn explicit_unsubscribe_stops_delivery() {
    let live = LiveBroadcaster::new();

    let kept = recording(&live);
    let dropped = Arc::new(Mutex::new(Vec::new()));
    let id = live.subscribe(Box::new(RecordingSink {
        received: dropped.clone(),
    }));

    live.unsubscribe(id);
    live.broadcast("payload");

    assert_eq!(kept.lock().expect("lock").len(), 1);
    assert!(dropped.lock().expect("lock").is_empty());
}
