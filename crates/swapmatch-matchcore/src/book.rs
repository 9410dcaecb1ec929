//! The order book for a single market.
//!
//! Buys and sells live in separate ordered maps so the best order on
//! either side is a constant-time peek and insertion/removal are
//! logarithmic. Priority is strict and deterministic: price, then earlier
//! server stamp, then lexicographic order ID. The same set of orders
//! yields the same book regardless of insertion order.
//!
//! Orders are owned by an arena keyed by order ID; the side maps, the
//! user index, and the account tracker all refer to orders by ID. A
//! single reader-writer lock guards every operation; iterator callbacks
//! run under the read lock and must not call back into the book.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use swapmatch_types::{AccountId, LimitOrder, OrderId};
use tracing::warn;

use crate::account_tracker::{AccountTracker, AccountTracking};

/// Priority rank of a buy: highest rate first, then earliest stamp, then
/// order ID bytes.
type BuyRank = (Reverse<u64>, i64, OrderId);
/// Priority rank of a sell: lowest rate first, then earliest stamp, then
/// order ID bytes.
type SellRank = (u64, i64, OrderId);

#[derive(Debug, Clone, Copy)]
enum Rank {
    Buy(BuyRank),
    Sell(SellRank),
}

fn buy_rank(lo: &LimitOrder) -> BuyRank {
    (Reverse(lo.rate), lo.prefix.server_time_ms(), lo.id())
}

fn sell_rank(lo: &LimitOrder) -> SellRank {
    (lo.rate, lo.prefix.server_time_ms(), lo.id())
}

/// Outcome of filling a booked maker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillResult {
    /// The maker remains booked with this remaining quantity.
    Partial(u64),
    /// The maker filled completely and was removed from the book.
    Filled(LimitOrder),
}

#[derive(Debug, Default)]
struct BookInner {
    /// The order arena. Everything else refers into it by ID.
    orders: HashMap<OrderId, LimitOrder>,
    buys: BTreeMap<BuyRank, OrderId>,
    sells: BTreeMap<SellRank, OrderId>,
    ranks: HashMap<OrderId, Rank>,
    users: HashMap<AccountId, HashSet<OrderId>>,
    tracker: AccountTracker,
}

impl BookInner {
    fn insert(&mut self, lo: LimitOrder) -> bool {
        let oid = lo.id();
        if self.ranks.contains_key(&oid) {
            warn!(order = %oid, "refusing to insert duplicate order");
            return false;
        }
        let rank = if lo.trade.sell {
            self.sells.insert(sell_rank(&lo), oid);
            Rank::Sell(sell_rank(&lo))
        } else {
            self.buys.insert(buy_rank(&lo), oid);
            Rank::Buy(buy_rank(&lo))
        };
        self.ranks.insert(oid, rank);
        self.users
            .entry(lo.prefix.account_id)
            .or_default()
            .insert(oid);
        self.tracker.add(&lo);
        self.orders.insert(oid, lo);
        true
    }

    fn take(&mut self, oid: &OrderId) -> Option<LimitOrder> {
        let rank = self.ranks.remove(oid)?;
        match rank {
            Rank::Buy(r) => {
                self.buys.remove(&r);
            }
            Rank::Sell(r) => {
                self.sells.remove(&r);
            }
        }
        let lo = self.orders.remove(oid)?;
        if let Some(set) = self.users.get_mut(&lo.prefix.account_id) {
            set.remove(oid);
            if set.is_empty() {
                self.users.remove(&lo.prefix.account_id);
            }
        }
        self.tracker.remove(&lo);
        Some(lo)
    }
}

/// A market's order book.
#[derive(Debug)]
pub struct Book {
    lot_size: u64,
    tracking: AccountTracking,
    inner: RwLock<BookInner>,
}

impl Book {
    /// Create an order book with the given lot size and account tracking.
    #[must_use]
    pub fn new(lot_size: u64, tracking: AccountTracking) -> Self {
        Self {
            lot_size,
            tracking,
            inner: RwLock::new(BookInner {
                orders: HashMap::with_capacity(
                    2 * swapmatch_types::constants::BOOK_HALF_CAPACITY,
                ),
                tracker: AccountTracker::new(tracking),
                ..BookInner::default()
            }),
        }
    }

    /// Reset the book to empty with its configured capacity.
    pub fn clear(&self) {
        let mut inner = self.write();
        *inner = BookInner {
            orders: HashMap::with_capacity(2 * swapmatch_types::constants::BOOK_HALF_CAPACITY),
            tracker: AccountTracker::new(self.tracking),
            ..BookInner::default()
        };
    }

    /// The book's lot size in atoms of the base asset.
    #[must_use]
    pub fn lot_size(&self) -> u64 {
        self.lot_size
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BookInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BookInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a stamped limit order, returning whether it was placed.
    /// Orders with a quantity that is not a multiple of the lot size, and
    /// orders whose ID is already present, are refused.
    pub fn insert(&self, lo: LimitOrder) -> bool {
        if lo.trade.quantity % self.lot_size != 0 {
            warn!(
                order = %lo.id(),
                qty = lo.trade.quantity,
                lot = self.lot_size,
                "refusing order with non-lot-multiple quantity"
            );
            return false;
        }
        self.write().insert(lo)
    }

    /// Remove the order with the given ID from whichever side holds it.
    pub fn remove(&self, oid: &OrderId) -> Option<LimitOrder> {
        self.write().take(oid)
    }

    /// Remove all of a user's orders, returning `(buys, sells)`.
    pub fn remove_user_orders(&self, user: &AccountId) -> (Vec<LimitOrder>, Vec<LimitOrder>) {
        let mut inner = self.write();
        let ids: Vec<OrderId> = inner
            .users
            .get(user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        let mut buys = Vec::new();
        let mut sells = Vec::new();
        for oid in ids {
            if let Some(lo) = inner.take(&oid) {
                if lo.trade.sell {
                    sells.push(lo);
                } else {
                    buys.push(lo);
                }
            }
        }
        (buys, sells)
    }

    /// Reduce a booked maker by `qty`. Removes the maker when its
    /// remaining quantity reaches zero.
    pub fn fill(&self, oid: &OrderId, qty: u64) -> Option<FillResult> {
        let mut inner = self.write();
        let lo = inner.orders.get_mut(oid)?;
        lo.trade.filled = lo.trade.filled.saturating_add(qty).min(lo.trade.quantity);
        if lo.trade.remaining() == 0 {
            let lo = inner.take(oid)?;
            return Some(FillResult::Filled(lo));
        }
        Some(FillResult::Partial(lo.trade.remaining()))
    }

    /// Peek the best (highest-rate) buy. The order is not removed.
    #[must_use]
    pub fn best_buy(&self) -> Option<LimitOrder> {
        let inner = self.read();
        let (_, oid) = inner.buys.first_key_value()?;
        inner.orders.get(oid).cloned()
    }

    /// Peek the best (lowest-rate) sell. The order is not removed.
    #[must_use]
    pub fn best_sell(&self) -> Option<LimitOrder> {
        let inner = self.read();
        let (_, oid) = inner.sells.first_key_value()?;
        inner.orders.get(oid).cloned()
    }

    /// Peek both sides at once under one lock acquisition.
    #[must_use]
    pub fn best(&self) -> (Option<LimitOrder>, Option<LimitOrder>) {
        let inner = self.read();
        let buy = inner
            .buys
            .first_key_value()
            .and_then(|(_, oid)| inner.orders.get(oid).cloned());
        let sell = inner
            .sells
            .first_key_value()
            .and_then(|(_, oid)| inner.orders.get(oid).cloned());
        (buy, sell)
    }

    /// The mid-gap rate: halfway between the best buy and best sell.
    /// Zero when either side is empty.
    #[must_use]
    pub fn mid_gap(&self) -> u64 {
        let (buy, sell) = self.best();
        match (buy, sell) {
            (Some(b), Some(s)) => (b.rate + s.rate) / 2,
            _ => 0,
        }
    }

    #[must_use]
    pub fn have_order(&self, oid: &OrderId) -> bool {
        self.read().ranks.contains_key(oid)
    }

    /// Copy out an order by ID.
    #[must_use]
    pub fn order(&self, oid: &OrderId) -> Option<LimitOrder> {
        self.read().orders.get(oid).cloned()
    }

    #[must_use]
    pub fn buy_count(&self) -> usize {
        self.read().buys.len()
    }

    #[must_use]
    pub fn sell_count(&self) -> usize {
        self.read().sells.len()
    }

    /// Copy out the N best buys, sorted.
    #[must_use]
    pub fn buy_orders_n(&self, n: usize) -> Vec<LimitOrder> {
        let inner = self.read();
        inner
            .buys
            .values()
            .take(n)
            .filter_map(|oid| inner.orders.get(oid).cloned())
            .collect()
    }

    /// Copy out the N best sells, sorted.
    #[must_use]
    pub fn sell_orders_n(&self, n: usize) -> Vec<LimitOrder> {
        let inner = self.read();
        inner
            .sells
            .values()
            .take(n)
            .filter_map(|oid| inner.orders.get(oid).cloned())
            .collect()
    }

    /// Copy out all buys, sorted.
    #[must_use]
    pub fn buy_orders(&self) -> Vec<LimitOrder> {
        self.buy_orders_n(usize::MAX)
    }

    /// Copy out all sells, sorted.
    #[must_use]
    pub fn sell_orders(&self) -> Vec<LimitOrder> {
        self.sell_orders_n(usize::MAX)
    }

    /// Total remaining amount and order count for a user, per side:
    /// `(buy_amt, sell_amt, buy_count, sell_count)`.
    #[must_use]
    pub fn user_order_totals(&self, user: &AccountId) -> (u64, u64, u64, u64) {
        let inner = self.read();
        let (mut buy_amt, mut sell_amt, mut buy_count, mut sell_count) = (0u64, 0u64, 0u64, 0u64);
        if let Some(ids) = inner.users.get(user) {
            for oid in ids {
                if let Some(lo) = inner.orders.get(oid) {
                    if lo.trade.sell {
                        sell_amt += lo.remaining();
                        sell_count += 1;
                    } else {
                        buy_amt += lo.remaining();
                        buy_count += 1;
                    }
                }
            }
        }
        (buy_amt, sell_amt, buy_count, sell_count)
    }

    /// A user's completely unfilled buys.
    #[must_use]
    pub fn unfilled_user_buys(&self, user: &AccountId) -> Vec<LimitOrder> {
        self.unfilled_user_orders(user, false)
    }

    /// A user's completely unfilled sells.
    #[must_use]
    pub fn unfilled_user_sells(&self, user: &AccountId) -> Vec<LimitOrder> {
        self.unfilled_user_orders(user, true)
    }

    fn unfilled_user_orders(&self, user: &AccountId, sell: bool) -> Vec<LimitOrder> {
        let inner = self.read();
        inner
            .users
            .get(user)
            .map(|ids| {
                ids.iter()
                    .filter_map(|oid| inner.orders.get(oid))
                    .filter(|lo| lo.trade.sell == sell && lo.trade.filled == 0)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Visit every tracked order backed by (or paying into) the given
    /// base-asset account. Runs under the read lock: `f` must not call
    /// back into the book.
    pub fn iterate_base_account(&self, addr: &str, mut f: impl FnMut(&LimitOrder)) {
        let inner = self.read();
        for oid in inner.tracker.base_account_orders(addr) {
            if let Some(lo) = inner.orders.get(&oid) {
                f(lo);
            }
        }
    }

    /// The quote-asset mirror of [`Book::iterate_base_account`].
    pub fn iterate_quote_account(&self, addr: &str, mut f: impl FnMut(&LimitOrder)) {
        let inner = self.read();
        for oid in inner.tracker.quote_account_orders(addr) {
            if let Some(lo) = inner.orders.get(&oid) {
                f(lo);
            }
        }
    }
}
