//! End-to-end synchronization scenarios against a scripted snapshot source.
//!
//! The source hands out snapshots only when the test pushes one, which lets
//! each scenario observe the buffering window between issuing a fetch and
//! applying it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use gdax_book::orderbook::{DiffOutcome, ResyncReason, SnapshotSource, SyncEvent, SyncMode};
use gdax_book::types::{BookSnapshot, FeedMessage, RawDiff, Side};
use gdax_book::{Config, Error, Result, SyncCoordinator};
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, mpsc, Mutex};

const BTC: &str = "BTC-USD";
const ETH: &str = "ETH-USD";

/// Snapshot source whose responses are pushed by the test
struct ScriptedSource {
    responses: Mutex<mpsc::UnboundedReceiver<Result<BookSnapshot>>>,
    calls: AtomicUsize,
}

#[async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch_snapshot(&self, _product_id: &str) -> Result<BookSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().await;
        responses.recv().await.unwrap_or(Err(Error::ConnectionClosed))
    }
}

struct Harness {
    sync: SyncCoordinator<Arc<ScriptedSource>>,
    source: Arc<ScriptedSource>,
    snapshots: mpsc::UnboundedSender<Result<BookSnapshot>>,
    events: broadcast::Receiver<SyncEvent>,
}

impl Harness {
    fn new(config: Config) -> Self {
        let (snapshots, rx) = mpsc::unbounded_channel();
        let source = Arc::new(ScriptedSource {
            responses: Mutex::new(rx),
            calls: AtomicUsize::new(0),
        });
        let sync = SyncCoordinator::new(Arc::clone(&source), &config);
        let events = sync.subscribe();
        Self {
            sync,
            source,
            snapshots,
            events,
        }
    }

    fn calls(&self) -> usize {
        self.source.calls.load(Ordering::SeqCst)
    }

    fn push(&self, snapshot: Result<BookSnapshot>) {
        self.snapshots.send(snapshot).expect("source dropped");
    }

    /// Wait for the first event matching `pred`, skipping others
    async fn wait_for<F>(&mut self, pred: F) -> SyncEvent
    where
        F: Fn(&SyncEvent) -> bool,
    {
        let events = &mut self.events;
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event channel failed: {}", e),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn wait_synced(&mut self, product: &str) -> SyncEvent {
        let product = product.to_string();
        self.wait_for(move |e| matches!(e, SyncEvent::Synced { product_id, .. } if *product_id == product))
            .await
    }

    /// Let spawned fetch tasks reach the source
    async fn settle_calls(&self, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.calls() < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("fetch was never issued");
    }
}

fn bid_a_at_50() -> BookSnapshot {
    BookSnapshot::new(50).with_bid(dec!(100), dec!(5), "A")
}

#[tokio::test]
async fn test_match_then_gap_leaves_book_untouched_until_resync() {
    let mut h = Harness::new(Config::new());

    h.sync.track(BTC);
    h.push(Ok(bid_a_at_50()));
    h.wait_synced(BTC).await;

    let outcome = h.sync.handle(RawDiff::matched(BTC, 51, "A", dec!(2)));
    assert!(outcome.advanced());
    assert_eq!(h.sync.best_bid(BTC), Some((dec!(100), dec!(3))));
    assert_eq!(h.sync.sequence(BTC), Some(51));

    let outcome = h.sync.handle(RawDiff::done(BTC, 53, "A"));
    assert_eq!(outcome.gap(), Some((52, 53)));
    assert!(!h.sync.is_synced(BTC));
    assert_eq!(h.sync.mode(BTC), Some(SyncMode::Loading));
    // Stale but still readable
    assert_eq!(h.sync.best_bid(BTC), Some((dec!(100), dec!(3))));
    assert!(h.sync.snapshot(BTC).is_none());

    let event = h
        .wait_for(|e| matches!(e, SyncEvent::ResyncRequested { .. }))
        .await;
    assert!(matches!(
        event,
        SyncEvent::ResyncRequested {
            reason: ResyncReason::Gap {
                expected: 52,
                got: 53
            },
            ..
        }
    ));
    h.settle_calls(2).await;
}

#[tokio::test]
async fn test_exactly_one_fetch_while_loading() {
    let mut h = Harness::new(Config::new());

    // Bootstrap from the first diff, then keep feeding while the fetch hangs
    for seq in 48..=53 {
        let outcome = h.sync.handle(RawDiff::matched(BTC, seq, "A", dec!(1)));
        assert!(matches!(outcome, DiffOutcome::Buffered));
    }
    h.settle_calls(1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.calls(), 1);
    assert_eq!(h.sync.pending_len(BTC), Some(6));

    h.push(Ok(bid_a_at_50()));
    let event = h.wait_synced(BTC).await;
    assert!(matches!(
        event,
        SyncEvent::Synced {
            snapshot_sequence: 50,
            replayed: 3,
            discarded: 3,
            ..
        }
    ));
    assert_eq!(h.sync.sequence(BTC), Some(53));
    assert_eq!(h.sync.best_bid(BTC), Some((dec!(100), dec!(2))));
    assert_eq!(h.sync.pending_len(BTC), Some(0));
    assert_eq!(h.calls(), 1);
}

#[tokio::test]
async fn test_resync_drops_orders_missing_from_new_snapshot() {
    let mut h = Harness::new(Config::new());

    h.sync.track(BTC);
    h.push(Ok(BookSnapshot::new(10)
        .with_bid(dec!(100), dec!(1), "OLD")
        .with_ask(dec!(101), dec!(1), "ASK")));
    h.wait_synced(BTC).await;

    // Order opened at 11, then the feed jumps
    h.sync
        .handle(RawDiff::open(BTC, 11, "NEW", Side::Buy, dec!(100.5), dec!(2)));
    h.sync.handle(RawDiff::done(BTC, 20, "ASK"));
    h.settle_calls(2).await;

    // Arrives while the resync is in flight
    h.sync.handle(RawDiff::change(BTC, 26, "NEW", dec!(1)));

    h.push(Ok(BookSnapshot::new(25)
        .with_bid(dec!(100.5), dec!(2), "NEW")
        .with_ask(dec!(102), dec!(3), "LATE")));
    h.wait_synced(BTC).await;

    let book = h.sync.book(BTC).unwrap();
    assert!(!book.contains("OLD"));
    assert!(!book.contains("ASK"));
    assert_eq!(book.order("NEW").unwrap().size, dec!(1));
    assert_eq!(h.sync.best_ask(BTC), Some((dec!(102), dec!(3))));
    assert_eq!(h.sync.sequence(BTC), Some(26));
    assert_eq!(h.sync.spread(BTC), Some(dec!(1.5)));
}

#[tokio::test]
async fn test_products_sync_independently() {
    let mut h = Harness::new(Config::new());

    h.sync.track(BTC);
    h.push(Ok(bid_a_at_50()));
    h.wait_synced(BTC).await;

    h.sync.track(ETH);
    h.settle_calls(2).await;

    // ETH is still loading; BTC keeps applying
    h.sync.handle(RawDiff::open(ETH, 7, "E1", Side::Sell, dec!(10), dec!(1)));
    let outcome = h.sync.handle(RawDiff::matched(BTC, 51, "A", dec!(1)));
    assert!(matches!(outcome, DiffOutcome::Applied { .. }));
    assert_eq!(h.sync.pending_len(ETH), Some(1));
    assert!(h.sync.is_synced(BTC));
    assert!(!h.sync.is_synced(ETH));

    let mut products = h.sync.products();
    products.sort();
    assert_eq!(products, vec![BTC.to_string(), ETH.to_string()]);
}

#[tokio::test]
async fn test_manual_resync_and_untrack() {
    let mut h = Harness::new(Config::new());

    h.sync.track(BTC);
    h.push(Ok(bid_a_at_50()));
    h.wait_synced(BTC).await;

    h.sync.resync(BTC).unwrap();
    assert_eq!(h.sync.mode(BTC), Some(SyncMode::Loading));
    // A second request while loading is a no-op
    h.sync.resync(BTC).unwrap();
    h.settle_calls(2).await;

    // Untracking abandons the in-flight fetch
    assert!(h.sync.untrack(BTC));
    h.push(Ok(bid_a_at_50()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.sync.mode(BTC), None);
    assert!(h.sync.best_bid(BTC).is_none());
    assert!(h.sync.is_empty());
}

#[tokio::test]
async fn test_retryable_failure_keeps_loading() {
    let config = Config::new().with_retry_policy(
        gdax_book::config::RetryPolicy::new()
            .initial_delay_ms(1)
            .max_delay_ms(5)
            .jitter(0.0),
    );
    let mut h = Harness::new(config);

    h.sync.handle(RawDiff::matched(BTC, 51, "A", dec!(1)));
    h.push(Err(Error::Timeout));

    let event = h
        .wait_for(|e| matches!(e, SyncEvent::SnapshotFailed { .. }))
        .await;
    assert!(matches!(
        event,
        SyncEvent::SnapshotFailed {
            will_retry: true,
            attempt: 1,
            ..
        }
    ));
    assert_eq!(h.sync.mode(BTC), Some(SyncMode::Loading));

    h.push(Ok(bid_a_at_50()));
    h.wait_synced(BTC).await;
    assert_eq!(h.calls(), 2);
    assert_eq!(h.sync.best_bid(BTC), Some((dec!(100), dec!(4))));
}

#[tokio::test]
async fn test_run_consumes_stream_and_skips_errors() {
    let mut h = Harness::new(Config::new());
    h.sync.track(BTC);
    h.push(Ok(bid_a_at_50()));
    h.wait_synced(BTC).await;

    let diffs = stream::iter(vec![
        Ok(RawDiff::matched(BTC, 51, "A", dec!(1))),
        Err(Error::Feed("transient".to_string())),
        Ok(RawDiff::new("teleport", BTC, 52)),
        Ok(RawDiff::matched(BTC, 53, "A", dec!(1))),
    ]);
    h.sync.run(diffs).await;

    let rejected = h
        .wait_for(|e| matches!(e, SyncEvent::Rejected { .. }))
        .await;
    assert!(matches!(rejected, SyncEvent::Rejected { sequence: 52, .. }));
    assert_eq!(h.sync.sequence(BTC), Some(53));
    assert_eq!(h.sync.best_bid(BTC), Some((dec!(100), dec!(3))));
}

/// Decode a feed frame the way the WebSocket client does
fn frame(text: &str) -> Result<RawDiff> {
    match FeedMessage::parse(text)? {
        FeedMessage::Diff(diff) => Ok(diff),
        other => panic!("Expected a diff frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreadable_payload_is_rejected_without_resync() {
    let mut h = Harness::new(Config::new());
    h.sync.track(BTC);
    h.push(Ok(bid_a_at_50()));
    h.wait_synced(BTC).await;

    let diffs = stream::iter(vec![
        frame(r#"{"type":"open","product_id":"BTC-USD","sequence":51,"order_id":"B","side":"buy","price":"not-a-number","remaining_size":"1"}"#),
        frame(r#"{"type":"match","product_id":"BTC-USD","sequence":52,"maker_order_id":"A","size":"1.5"}"#),
    ]);
    h.sync.run(diffs).await;

    let rejected = h
        .wait_for(|e| matches!(e, SyncEvent::Rejected { .. }))
        .await;
    assert!(matches!(rejected, SyncEvent::Rejected { sequence: 51, .. }));
    assert!(h.sync.is_synced(BTC));
    assert_eq!(h.sync.sequence(BTC), Some(52));
    assert_eq!(h.sync.best_bid(BTC), Some((dec!(100), dec!(3.5))));
    assert!(!h.sync.book(BTC).unwrap().contains("B"));
    assert_eq!(h.calls(), 1);
}
