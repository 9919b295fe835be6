//! Multi-product synchronization coordinator.
//!
//! The coordinator routes diffs to per-product [`ProductSyncState`]s,
//! starts products on first sight and issues at most one snapshot fetch per
//! product at a time. Fetches run as Tokio tasks against a
//! [`SnapshotSource`]; their results are applied under the product's lock so
//! loading and replay are atomic with respect to new diffs.
//!
//! # Example
//!
//! ```rust,no_run
//! use gdax_book::{Config, GdaxClient};
//!
//! #[tokio::main]
//! async fn main() -> gdax_book::Result<()> {
//!     let client = GdaxClient::new(Config::new())?;
//!     let sync = client.book_sync();
//!     let mut events = sync.subscribe();
//!
//!     let mut feed = client.connect_feed().await?;
//!     feed.subscribe(&["BTC-USD"]).await?;
//!     tokio::spawn({
//!         let sync = sync.clone();
//!         async move { sync.run(feed.into_diffs()).await }
//!     });
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::book::PriceLevelBook;
use super::sync::{BookEffect, DiffOutcome, ProductSyncState, SnapshotLoad, SyncMode};
use crate::config::{Config, RetryPolicy};
use crate::error::Error;
use crate::types::{BookEvent, BookSnapshot, Price, RawDiff, Sequence, Size};
use crate::Result;

/// Anything that can produce a full-depth snapshot for a product
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// Fetch the current order-level book and its sequence number
    async fn fetch_snapshot(&self, product_id: &str) -> Result<BookSnapshot>;
}

#[async_trait]
impl<S: SnapshotSource + ?Sized> SnapshotSource for Arc<S> {
    async fn fetch_snapshot(&self, product_id: &str) -> Result<BookSnapshot> {
        (**self).fetch_snapshot(product_id).await
    }
}

/// Why a snapshot fetch was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// First diff (or `track`) for a product
    Bootstrap,
    /// Missed messages
    Gap {
        /// Sequence that was due
        expected: Sequence,
        /// Sequence that arrived
        got: Sequence,
    },
    /// Requested through [`SyncCoordinator::resync`]
    Manual,
    /// A previous fetch gave up and a new diff arrived
    Retry,
}

/// Notification emitted by the coordinator
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A diff was applied to a synced book
    Applied {
        /// Product
        product_id: String,
        /// Sequence now current
        sequence: Sequence,
        /// Decoded event
        event: BookEvent,
        /// What changed
        effect: BookEffect,
    },
    /// A diff was sequenced but could not be applied
    Rejected {
        /// Product
        product_id: String,
        /// Sequence now current
        sequence: Sequence,
        /// Error description
        reason: String,
    },
    /// A snapshot fetch was issued
    ResyncRequested {
        /// Product
        product_id: String,
        /// Why
        reason: ResyncReason,
    },
    /// A snapshot was applied and buffered diffs replayed
    Synced {
        /// Product
        product_id: String,
        /// Snapshot sequence
        snapshot_sequence: Sequence,
        /// Buffered diffs applied on top of the snapshot
        replayed: usize,
        /// Buffered diffs the snapshot already covered
        discarded: usize,
    },
    /// A snapshot fetch attempt failed
    SnapshotFailed {
        /// Product
        product_id: String,
        /// Error description
        reason: String,
        /// Attempt number, starting at 1
        attempt: u32,
        /// Whether another attempt is scheduled
        will_retry: bool,
    },
}

impl SyncEvent {
    /// Product the event concerns
    pub fn product_id(&self) -> &str {
        match self {
            SyncEvent::Applied { product_id, .. }
            | SyncEvent::Rejected { product_id, .. }
            | SyncEvent::ResyncRequested { product_id, .. }
            | SyncEvent::Synced { product_id, .. }
            | SyncEvent::SnapshotFailed { product_id, .. } => product_id,
        }
    }
}

type ProductCell = Arc<Mutex<ProductSyncState>>;

struct Shared<S> {
    source: S,
    products: RwLock<FxHashMap<String, ProductCell>>,
    events: broadcast::Sender<SyncEvent>,
    retry: RetryPolicy,
    max_pending: usize,
}

/// Keeps one order book replica per product in sync with the exchange
///
/// # Thread Safety
///
/// The coordinator is cheap to clone and every clone shares the same
/// products. Diffs for different products can be handled concurrently;
/// diffs for one product are serialized by that product's lock.
///
/// Every method that may issue a snapshot fetch spawns a Tokio task and must
/// be called from within a Tokio runtime.
pub struct SyncCoordinator<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for SyncCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: SnapshotSource> SyncCoordinator<S> {
    /// Create a coordinator fetching snapshots from `source`
    pub fn new(source: S, config: &Config) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity());
        Self {
            shared: Arc::new(Shared {
                source,
                products: RwLock::new(FxHashMap::default()),
                events,
                retry: config.retry_policy().clone(),
                max_pending: config.max_pending(),
            }),
        }
    }

    /// Subscribe to sync events
    ///
    /// Lagging receivers lose the oldest events, see
    /// [`broadcast`](tokio::sync::broadcast).
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Start tracking a product and fetch its first snapshot
    ///
    /// Does nothing if the product is already tracked.
    pub fn track(&self, product_id: &str) {
        let (cell, created) = self.shared.cell_or_insert(product_id);
        if created {
            let mut state = cell.lock();
            self.shared
                .start_fetch(&cell, &mut state, ResyncReason::Bootstrap);
        }
    }

    /// Stop tracking a product, dropping its book
    ///
    /// A fetch in flight for it is ignored when it completes. Returns `false`
    /// if the product was not tracked.
    pub fn untrack(&self, product_id: &str) -> bool {
        let removed = self.shared.products.write().remove(product_id).is_some();
        if removed {
            info!(product_id, "product untracked");
        }
        removed
    }

    /// Throw away a product's sequencing state and fetch a fresh snapshot
    ///
    /// Does nothing if a fetch is already in flight.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProduct`] if the product is not tracked.
    pub fn resync(&self, product_id: &str) -> Result<()> {
        let cell = self
            .shared
            .cell(product_id)
            .ok_or_else(|| Error::UnknownProduct(product_id.to_string()))?;
        let mut state = cell.lock();
        self.shared
            .start_fetch(&cell, &mut state, ResyncReason::Manual);
        Ok(())
    }

    /// Route one diff to its product
    ///
    /// The first diff for an unknown product starts tracking it. The returned
    /// outcome is also broadcast as a [`SyncEvent`] where relevant.
    pub fn handle(&self, diff: RawDiff) -> DiffOutcome {
        let (cell, created) = self.shared.cell_or_insert(&diff.product_id);
        let mut state = cell.lock();

        let outcome = state.on_diff(diff);
        let product_id = state.product_id().to_string();
        self.shared.publish_outcome(&product_id, &outcome);

        // Unsynced after a diff means bootstrap, a gap or an aborted fetch
        if state.mode() == SyncMode::Unsynced {
            let reason = match (&outcome, created) {
                (DiffOutcome::Gap { expected, got }, _) => ResyncReason::Gap {
                    expected: *expected,
                    got: *got,
                },
                (_, true) => ResyncReason::Bootstrap,
                _ => ResyncReason::Retry,
            };
            self.shared.start_fetch(&cell, &mut state, reason);
        }

        outcome
    }

    /// Consume a diff stream until it ends
    ///
    /// Stream errors are logged and skipped.
    pub async fn run<St>(&self, diffs: St)
    where
        St: Stream<Item = Result<RawDiff>>,
    {
        tokio::pin!(diffs);
        while let Some(item) = diffs.next().await {
            match item {
                Ok(diff) => {
                    self.handle(diff);
                }
                Err(e) => warn!(error = %e, "diff stream error"),
            }
        }
        debug!("diff stream ended");
    }

    /// Tracked product ids
    pub fn products(&self) -> Vec<String> {
        self.shared.products.read().keys().cloned().collect()
    }

    /// Number of tracked products
    pub fn len(&self) -> usize {
        self.shared.products.read().len()
    }

    /// Whether no product is tracked
    pub fn is_empty(&self) -> bool {
        self.shared.products.read().is_empty()
    }

    /// Current mode of a product
    pub fn mode(&self, product_id: &str) -> Option<SyncMode> {
        self.with_state(product_id, ProductSyncState::mode)
    }

    /// Whether a product's book is live
    pub fn is_synced(&self, product_id: &str) -> bool {
        self.with_state(product_id, ProductSyncState::is_synced)
            .unwrap_or(false)
    }

    /// Last applied sequence of a product
    pub fn sequence(&self, product_id: &str) -> Option<Sequence> {
        self.with_state(product_id, ProductSyncState::sequence)
            .flatten()
    }

    /// Number of diffs buffered for a product
    pub fn pending_len(&self, product_id: &str) -> Option<usize> {
        self.with_state(product_id, ProductSyncState::pending_len)
    }

    /// Best bid as `(price, aggregate size)`
    pub fn best_bid(&self, product_id: &str) -> Option<(Price, Size)> {
        self.with_book(product_id, PriceLevelBook::best_bid).flatten()
    }

    /// Best ask as `(price, aggregate size)`
    pub fn best_ask(&self, product_id: &str) -> Option<(Price, Size)> {
        self.with_book(product_id, PriceLevelBook::best_ask).flatten()
    }

    /// Best ask minus best bid
    pub fn spread(&self, product_id: &str) -> Option<Price> {
        self.with_book(product_id, PriceLevelBook::spread).flatten()
    }

    /// Average of best bid and best ask
    pub fn mid_price(&self, product_id: &str) -> Option<Price> {
        self.with_book(product_id, PriceLevelBook::mid_price).flatten()
    }

    /// Top `levels` bid and ask levels as `(price, aggregate size)`
    pub fn depth(&self, product_id: &str, levels: usize) -> Option<(Vec<(Price, Size)>, Vec<(Price, Size)>)> {
        self.with_state(product_id, |state| {
            (state.book().top_bids(levels), state.book().top_asks(levels))
        })
    }

    /// Copy of a product's book, synced or not
    pub fn book(&self, product_id: &str) -> Option<PriceLevelBook> {
        self.with_state(product_id, |state| state.book().clone())
    }

    /// Full-depth readout of a synced book at its current sequence
    ///
    /// Returns `None` unless the product is synced.
    pub fn snapshot(&self, product_id: &str) -> Option<BookSnapshot> {
        self.with_state(product_id, |state| {
            state
                .sequence()
                .filter(|_| state.is_synced())
                .map(|sequence| state.book().to_snapshot(sequence))
        })
        .flatten()
    }

    /// Run a closure against a product's book while holding its lock
    pub fn with_book<F, R>(&self, product_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&PriceLevelBook) -> R,
    {
        self.with_state(product_id, |state| f(state.book()))
    }

    fn with_state<F, R>(&self, product_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&ProductSyncState) -> R,
    {
        let cell = self.shared.cell(product_id)?;
        let state = cell.lock();
        Some(f(&state))
    }
}

impl<S: SnapshotSource> Shared<S> {
    fn cell(&self, product_id: &str) -> Option<ProductCell> {
        self.products.read().get(product_id).cloned()
    }

    fn cell_or_insert(&self, product_id: &str) -> (ProductCell, bool) {
        if let Some(cell) = self.cell(product_id) {
            return (cell, false);
        }

        let mut products = self.products.write();
        // Another caller may have inserted while we waited for the write lock
        if let Some(cell) = products.get(product_id) {
            return (Arc::clone(cell), false);
        }
        let cell = Arc::new(Mutex::new(ProductSyncState::with_max_pending(
            product_id,
            self.max_pending,
        )));
        products.insert(product_id.to_string(), Arc::clone(&cell));
        info!(product_id, "tracking product");
        (cell, true)
    }

    /// Whether `cell` is still the tracked state for its product
    fn is_current(&self, product_id: &str, cell: &ProductCell) -> bool {
        self.products
            .read()
            .get(product_id)
            .is_some_and(|current| Arc::ptr_eq(current, cell))
    }

    fn emit(&self, event: SyncEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn publish_outcome(&self, product_id: &str, outcome: &DiffOutcome) {
        match outcome {
            DiffOutcome::Applied {
                sequence,
                event,
                effect,
            } => self.emit(SyncEvent::Applied {
                product_id: product_id.to_string(),
                sequence: *sequence,
                event: event.clone(),
                effect: effect.clone(),
            }),
            DiffOutcome::Rejected { sequence, error } => self.emit(SyncEvent::Rejected {
                product_id: product_id.to_string(),
                sequence: *sequence,
                reason: error.to_string(),
            }),
            DiffOutcome::Buffered | DiffOutcome::Stale { .. } | DiffOutcome::Gap { .. } => {}
        }
    }

    fn publish_load(&self, product_id: &str, load: &SnapshotLoad) {
        for outcome in &load.outcomes {
            self.publish_outcome(product_id, outcome);
        }
        self.emit(SyncEvent::Synced {
            product_id: product_id.to_string(),
            snapshot_sequence: load.snapshot_sequence,
            replayed: load.replayed(),
            discarded: load.discarded,
        });
    }

    /// Issue a fetch unless one is already in flight. Caller holds the lock.
    fn start_fetch(self: &Arc<Self>, cell: &ProductCell, state: &mut ProductSyncState, reason: ResyncReason) {
        let Some(epoch) = state.begin_loading() else {
            debug!(product_id = state.product_id(), "snapshot fetch already in flight");
            return;
        };

        let product_id = state.product_id().to_string();
        info!(product_id = %product_id, epoch, ?reason, "requesting snapshot");
        self.emit(SyncEvent::ResyncRequested {
            product_id: product_id.clone(),
            reason,
        });

        let shared = Arc::clone(self);
        let cell = Arc::clone(cell);
        tokio::spawn(async move {
            shared.fetch_loop(product_id, cell, epoch).await;
        });
    }

    async fn fetch_loop(self: Arc<Self>, product_id: String, cell: ProductCell, epoch: u64) {
        let mut attempt: u32 = 0;
        loop {
            if !self.is_current(&product_id, &cell) || cell.lock().epoch() != epoch {
                debug!(product_id = %product_id, epoch, "fetch superseded before completion");
                return;
            }

            match self.source.fetch_snapshot(&product_id).await {
                Ok(snapshot) => {
                    self.complete(&product_id, &cell, epoch, snapshot);
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    // The first fetch is not a retry
                    let will_retry = e.is_retryable() && self.retry.allows(attempt - 1);
                    warn!(
                        product_id = %product_id,
                        attempt,
                        will_retry,
                        error = %e,
                        "snapshot fetch failed"
                    );
                    self.emit(SyncEvent::SnapshotFailed {
                        product_id: product_id.clone(),
                        reason: e.to_string(),
                        attempt,
                        will_retry,
                    });

                    if !will_retry {
                        cell.lock().abort_loading(epoch);
                        return;
                    }
                    tokio::time::sleep(self.backoff(&e, attempt - 1)).await;
                }
            }
        }
    }

    fn backoff(&self, error: &Error, attempt: u32) -> Duration {
        let delay = self.retry.jittered_delay(attempt);
        match error {
            Error::RateLimited {
                retry_after_ms: Some(ms),
            } => delay.max(Duration::from_millis(*ms)),
            _ => delay,
        }
    }

    fn complete(self: &Arc<Self>, product_id: &str, cell: &ProductCell, epoch: u64, snapshot: BookSnapshot) {
        if !self.is_current(product_id, cell) {
            debug!(product_id, "dropping snapshot for untracked product");
            return;
        }

        let mut state = cell.lock();
        let Some(load) = state.complete_snapshot(epoch, snapshot) else {
            return;
        };
        self.publish_load(product_id, &load);

        if let Some((expected, got)) = load.gap() {
            self.start_fetch(cell, &mut state, ResyncReason::Gap { expected, got });
        }
    }
}
