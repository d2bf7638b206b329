//! An unbounded, ordered Level-2 price ladder.
//!
//! ## Thread-safety
//!
//! `OrderedBook` itself is not thread-safe — it is meant to be owned by exactly one
//! [`crate::session::BookSession`] and wrapped in a lock (`parking_lot::RwLock`) that
//! is acquired for the duration of a single diff application or one read pass. The
//! book never performs I/O or large allocation while that lock is held.
//!
//! Bids and asks are each backed by a `BTreeMap`, giving O(log n) upsert/delete and
//! O(1) access to the best price on either side — an ordered map, not a hash map,
//! because the hot path needs the nearest-to-top levels in sorted order.

pub mod depth;

use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

pub use depth::{DepthBucketizer, DepthBuckets};

/// The L2 ladder for a single exchange/pair. Bids are keyed by `Reverse<Decimal>` so
/// that `first_key_value` always yields the highest bid; asks are keyed by `Decimal`
/// directly so `first_key_value` yields the lowest ask.
#[derive(Debug, Clone, Default)]
pub struct OrderedBook {
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl OrderedBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a bid level. `size == 0` is equivalent to [`Self::delete_bid`].
    pub fn upsert_bid(&mut self, price: Decimal, size: Decimal) {
        if size.is_zero() {
            self.delete_bid(price);
        } else {
            self.bids.insert(Reverse(price), size);
        }
    }

    /// Upsert an ask level. `size == 0` is equivalent to [`Self::delete_ask`].
    pub fn upsert_ask(&mut self, price: Decimal, size: Decimal) {
        if size.is_zero() {
            self.delete_ask(price);
        } else {
            self.asks.insert(price, size);
        }
    }

    /// Delete a bid level. Deleting an absent level is a no-op, not an error.
    pub fn delete_bid(&mut self, price: Decimal) {
        self.bids.remove(&Reverse(price));
    }

    /// Delete an ask level. Deleting an absent level is a no-op, not an error.
    pub fn delete_ask(&mut self, price: Decimal) {
        self.asks.remove(&price);
    }

    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.iter().next().map(|(Reverse(p), s)| (*p, *s))
    }

    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.iter().next().map(|(p, s)| (*p, *s))
    }

    /// Iterate bid levels from the top (highest price first).
    pub fn iter_bids_from_top(&self) -> impl Iterator<Item = (Decimal, Decimal)> + '_ {
        self.bids.iter().map(|(Reverse(p), s)| (*p, *s))
    }

    /// Iterate ask levels from the top (lowest price first).
    pub fn iter_asks_from_top(&self) -> impl Iterator<Item = (Decimal, Decimal)> + '_ {
        self.asks.iter().map(|(p, s)| (*p, *s))
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Replace the entire ladder with a fresh snapshot. Levels with `size == 0` in the
    /// snapshot are simply omitted rather than inserted then deleted.
    pub fn load_snapshot<I, J>(&mut self, bids: I, asks: J)
    where
        I: IntoIterator<Item = (Decimal, Decimal)>,
        J: IntoIterator<Item = (Decimal, Decimal)>,
    {
        self.clear();
        for (price, size) in bids {
            if !size.is_zero() {
                self.bids.insert(Reverse(price), size);
            }
        }
        for (price, size) in asks {
            if !size.is_zero() {
                self.asks.insert(price, size);
            }
        }
    }

    /// `true` when both sides are non-empty and `best_bid >= best_ask`.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    /// No zero-size levels are ever retained, and prices are never negative — this
    /// only has anything to check if callers bypass `upsert_*`/`load_snapshot`, but is
    /// kept as a cheap sanity check for tests and diagnostics.
    pub fn is_valid(&self) -> bool {
        self.bids.values().all(|s| !s.is_zero())
            && self.asks.values().all(|s| !s.is_zero())
            && self.bids.keys().all(|Reverse(p)| *p > Decimal::ZERO)
            && self.asks.keys().all(|p| *p > Decimal::ZERO)
    }
}
