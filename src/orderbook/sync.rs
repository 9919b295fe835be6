//! Per-product synchronization state.
//!
//! A product starts out [`SyncMode::Unsynced`]. Diffs that arrive before a
//! snapshot has been applied are buffered; once the snapshot lands, buffered
//! diffs newer than the snapshot are replayed in sequence order and the
//! product becomes [`SyncMode::Synced`]. From then on each diff must carry
//! exactly the next sequence number. A jump forward is a gap: the buffer and
//! the trust in the book are dropped and a new snapshot is required.
//!
//! This type is synchronous and does no I/O. Issuing snapshot fetches is the
//! job of [`SyncCoordinator`](super::SyncCoordinator).

use std::collections::VecDeque;

use tracing::{debug, info, trace, warn};

use super::book::PriceLevelBook;
use crate::error::Error;
use crate::types::{BookEvent, BookSnapshot, RawDiff, Sequence, Size};

/// Default cap on diffs buffered before a snapshot is applied
pub const DEFAULT_MAX_PENDING: usize = 100_000;

/// Synchronization mode of one product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// No trusted book; a snapshot is needed
    #[default]
    Unsynced,
    /// A snapshot fetch is in flight; diffs are being buffered
    Loading,
    /// Book is live and diffs are applied in sequence
    Synced,
}

impl SyncMode {
    /// Whether the book reflects the exchange
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncMode::Synced)
    }

    /// Whether incoming diffs are buffered instead of applied
    pub fn is_buffering(&self) -> bool {
        !self.is_synced()
    }
}

/// What applying an event did to the book
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookEffect {
    /// A new order was inserted
    Added,
    /// An order left the book
    Removed,
    /// A match left some size on the maker order
    Reduced {
        /// Size still resting
        remaining: Size,
    },
    /// An order was resized in place
    Resized {
        /// Size before the change
        previous: Size,
    },
    /// `done` or `change` for an order that is not resting, e.g. one that
    /// was never on the book
    NotResting,
    /// The event has no book effect
    Unchanged,
}

/// Result of offering one diff to a [`ProductSyncState`]
#[derive(Debug)]
pub enum DiffOutcome {
    /// Held until a snapshot is applied
    Buffered,
    /// Sequence at or below the last applied one; dropped
    Stale {
        /// Sequence of the dropped diff
        sequence: Sequence,
        /// Last applied sequence
        current: Sequence,
    },
    /// Applied to the book
    Applied {
        /// Sequence now current
        sequence: Sequence,
        /// Decoded event
        event: BookEvent,
        /// What changed
        effect: BookEffect,
    },
    /// Sequence accepted but the event could not be applied. The sequence
    /// still advances.
    Rejected {
        /// Sequence now current
        sequence: Sequence,
        /// Why the event was rejected
        error: Error,
    },
    /// Missed messages; the product is unsynced and needs a snapshot
    Gap {
        /// Sequence that was due
        expected: Sequence,
        /// Sequence that arrived
        got: Sequence,
    },
}

impl DiffOutcome {
    /// Whether the outcome advanced the product's sequence
    pub fn advanced(&self) -> bool {
        matches!(self, DiffOutcome::Applied { .. } | DiffOutcome::Rejected { .. })
    }

    /// Gap bounds, if this is a gap
    pub fn gap(&self) -> Option<(Sequence, Sequence)> {
        match self {
            DiffOutcome::Gap { expected, got } => Some((*expected, *got)),
            _ => None,
        }
    }
}

/// Summary of a completed snapshot load
#[derive(Debug)]
pub struct SnapshotLoad {
    /// Sequence of the snapshot
    pub snapshot_sequence: Sequence,
    /// Buffered diffs dropped because the snapshot already covered them
    pub discarded: usize,
    /// Outcomes of the replayed diffs, in sequence order
    pub outcomes: Vec<DiffOutcome>,
}

impl SnapshotLoad {
    /// Number of buffered diffs that advanced the sequence during replay
    pub fn replayed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.advanced()).count()
    }

    /// Gap hit while replaying, if any
    pub fn gap(&self) -> Option<(Sequence, Sequence)> {
        self.outcomes.iter().find_map(DiffOutcome::gap)
    }
}

/// Sequencing state and book replica for one product
#[derive(Debug, Clone)]
pub struct ProductSyncState {
    product_id: String,
    sequence: Option<Sequence>,
    pending: VecDeque<RawDiff>,
    mode: SyncMode,
    book: PriceLevelBook,
    /// Bumped on every `begin_loading`; stale fetch results carry an old value
    epoch: u64,
    max_pending: usize,
}

impl ProductSyncState {
    /// Create an unsynced product with an empty book
    pub fn new(product_id: impl Into<String>) -> Self {
        Self::with_max_pending(product_id, DEFAULT_MAX_PENDING)
    }

    /// Create an unsynced product with a custom buffer cap (minimum 1)
    pub fn with_max_pending(product_id: impl Into<String>, max_pending: usize) -> Self {
        Self {
            product_id: product_id.into(),
            sequence: None,
            pending: VecDeque::new(),
            mode: SyncMode::Unsynced,
            book: PriceLevelBook::new(),
            epoch: 0,
            max_pending: max_pending.max(1),
        }
    }

    /// Product id
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    /// Last applied sequence, unset until a snapshot is applied
    pub fn sequence(&self) -> Option<Sequence> {
        self.sequence
    }

    /// Current mode
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Whether the book is live
    pub fn is_synced(&self) -> bool {
        self.mode.is_synced()
    }

    /// The book replica. It is stale unless [`is_synced`](Self::is_synced).
    pub fn book(&self) -> &PriceLevelBook {
        &self.book
    }

    /// Number of buffered diffs
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Current load epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Offer one diff for this product
    pub fn on_diff(&mut self, diff: RawDiff) -> DiffOutcome {
        if self.mode.is_buffering() {
            self.buffer(diff);
            return DiffOutcome::Buffered;
        }
        self.apply_sequenced(diff)
    }

    /// Mark a snapshot fetch as started
    ///
    /// Returns the epoch the fetch result must present to
    /// [`complete_snapshot`](Self::complete_snapshot), or `None` if a fetch is
    /// already in flight. Starting from [`SyncMode::Synced`] drops the book's
    /// trust first, as a manual resync does.
    pub fn begin_loading(&mut self) -> Option<u64> {
        match self.mode {
            SyncMode::Loading => None,
            SyncMode::Synced => {
                self.invalidate();
                Some(self.start_epoch())
            }
            SyncMode::Unsynced => Some(self.start_epoch()),
        }
    }

    /// Give up on the fetch for `epoch`, going back to unsynced
    ///
    /// Buffered diffs are kept so a later snapshot can still use them.
    /// Returns `false` if the fetch had already been superseded.
    pub fn abort_loading(&mut self, epoch: u64) -> bool {
        if self.mode != SyncMode::Loading || epoch != self.epoch {
            return false;
        }
        self.mode = SyncMode::Unsynced;
        true
    }

    /// Apply a fetched snapshot and replay buffered diffs on top of it
    ///
    /// Returns `None` without touching anything if `epoch` is not the
    /// current load (the product was reset or resynced since the fetch was
    /// issued). If replay hits a gap the product ends up unsynced again and
    /// [`SnapshotLoad::gap`] reports it.
    pub fn complete_snapshot(&mut self, epoch: u64, snapshot: BookSnapshot) -> Option<SnapshotLoad> {
        if self.mode != SyncMode::Loading || epoch != self.epoch {
            debug!(
                product_id = %self.product_id,
                epoch,
                current_epoch = self.epoch,
                "ignoring superseded snapshot"
            );
            return None;
        }

        let snapshot_sequence = snapshot.sequence;
        self.book.load_snapshot(&snapshot.bids, &snapshot.asks);
        self.sequence = Some(snapshot_sequence);
        self.mode = SyncMode::Synced;

        let mut pending: Vec<RawDiff> = self.pending.drain(..).collect();
        let buffered = pending.len();
        pending.retain(|diff| diff.sequence > snapshot_sequence);
        let mut discarded = buffered - pending.len();
        // Stable, so equal sequences keep arrival order and later copies go stale
        pending.sort_by_key(|diff| diff.sequence);

        let mut outcomes = Vec::with_capacity(pending.len());
        for diff in pending {
            let outcome = self.apply_sequenced(diff);
            let gap = outcome.gap().is_some();
            if matches!(outcome, DiffOutcome::Stale { .. }) {
                discarded += 1;
            }
            outcomes.push(outcome);
            if gap {
                break;
            }
        }

        let load = SnapshotLoad {
            snapshot_sequence,
            discarded,
            outcomes,
        };

        info!(
            product_id = %self.product_id,
            snapshot_sequence,
            replayed = load.replayed(),
            discarded = load.discarded,
            sequence = ?self.sequence,
            synced = self.is_synced(),
            "snapshot applied"
        );

        Some(load)
    }

    fn start_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.mode = SyncMode::Loading;
        self.epoch
    }

    /// Drop sequencing trust; the book stays readable but stale
    fn invalidate(&mut self) {
        self.mode = SyncMode::Unsynced;
        self.sequence = None;
        self.pending.clear();
    }

    fn buffer(&mut self, diff: RawDiff) {
        if self.pending.len() >= self.max_pending {
            if let Some(dropped) = self.pending.pop_front() {
                warn!(
                    product_id = %self.product_id,
                    dropped_sequence = dropped.sequence,
                    max_pending = self.max_pending,
                    "pending buffer full, dropping oldest diff"
                );
            }
        }
        trace!(product_id = %self.product_id, sequence = diff.sequence, "buffered diff");
        self.pending.push_back(diff);
    }

    fn apply_sequenced(&mut self, diff: RawDiff) -> DiffOutcome {
        let Some(current) = self.sequence else {
            self.buffer(diff);
            return DiffOutcome::Buffered;
        };

        let sequence = diff.sequence;
        if sequence <= current {
            trace!(product_id = %self.product_id, sequence, current, "stale diff");
            return DiffOutcome::Stale { sequence, current };
        }

        let expected = current + 1;
        if sequence > expected {
            warn!(
                product_id = %self.product_id,
                expected,
                got = sequence,
                "sequence gap, book needs resync"
            );
            self.invalidate();
            return DiffOutcome::Gap {
                expected,
                got: sequence,
            };
        }

        self.sequence = Some(sequence);
        match diff.decode() {
            Ok(event) => self.apply_event(sequence, event),
            Err(error) => {
                warn!(product_id = %self.product_id, sequence, %error, "skipping malformed diff");
                DiffOutcome::Rejected { sequence, error }
            }
        }
    }

    fn apply_event(&mut self, sequence: Sequence, event: BookEvent) -> DiffOutcome {
        let result = match &event {
            BookEvent::Open {
                order_id,
                side,
                price,
                size,
            } => self
                .book
                .add_order(*side, *price, *size, order_id.clone())
                .map(|()| BookEffect::Added),
            BookEvent::Done { order_id } => Ok(match self.book.remove_order(order_id) {
                Some(_) => BookEffect::Removed,
                None => BookEffect::NotResting,
            }),
            BookEvent::Match {
                maker_order_id,
                size,
            } => self
                .book
                .match_order(maker_order_id, *size)
                .map(|remaining| {
                    if remaining.is_zero() {
                        BookEffect::Removed
                    } else {
                        BookEffect::Reduced { remaining }
                    }
                }),
            BookEvent::Change { order_id, new_size } => {
                Ok(match self.book.change_order(order_id, *new_size) {
                    Some(previous) => BookEffect::Resized { previous },
                    None => BookEffect::NotResting,
                })
            }
            BookEvent::Noop => Ok(BookEffect::Unchanged),
        };

        match result {
            Ok(effect) => {
                if effect == BookEffect::NotResting {
                    debug!(
                        product_id = %self.product_id,
                        sequence,
                        kind = event.kind(),
                        "event for order not on the book"
                    );
                }
                DiffOutcome::Applied {
                    sequence,
                    event,
                    effect,
                }
            }
            Err(error) => {
                warn!(product_id = %self.product_id, sequence, %error, "book rejected event");
                DiffOutcome::Rejected { sequence, error }
            }
        }
    }
}
