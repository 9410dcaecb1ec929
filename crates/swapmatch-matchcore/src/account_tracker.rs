//! Secondary index from account address to the booked orders using that
//! address, kept per side of the trade pair's assets.
//!
//! The tracker stores order IDs, not orders: the book's arena owns the
//! orders, and the book resolves IDs on iteration. Only markets with an
//! account-based base or quote asset enable the corresponding side.

use std::collections::{HashMap, HashSet};

use swapmatch_types::{LimitOrder, OrderId};

/// Which sides of the market need account tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountTracking {
    pub base: bool,
    pub quote: bool,
}

impl AccountTracking {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn both() -> Self {
        Self {
            base: true,
            quote: true,
        }
    }
}

/// The base-asset account address an order is backed by or pays into:
/// sellers fund with base, buyers receive base.
#[must_use]
pub fn base_account(lo: &LimitOrder) -> String {
    if lo.trade.sell {
        lo.trade.from_account()
    } else {
        lo.trade.to_account().to_string()
    }
}

/// The quote-asset account address, the mirror of [`base_account`].
#[must_use]
pub fn quote_account(lo: &LimitOrder) -> String {
    if lo.trade.sell {
        lo.trade.to_account().to_string()
    } else {
        lo.trade.from_account()
    }
}

/// Address → order-ID index for one or both assets of a market.
#[derive(Debug, Default)]
pub struct AccountTracker {
    tracking: AccountTracking,
    base_accts: HashMap<String, HashSet<OrderId>>,
    quote_accts: HashMap<String, HashSet<OrderId>>,
}

impl AccountTracker {
    #[must_use]
    pub fn new(tracking: AccountTracking) -> Self {
        Self {
            tracking,
            base_accts: HashMap::new(),
            quote_accts: HashMap::new(),
        }
    }

    pub fn add(&mut self, lo: &LimitOrder) {
        let oid = lo.id();
        if self.tracking.base {
            self.base_accts
                .entry(base_account(lo))
                .or_default()
                .insert(oid);
        }
        if self.tracking.quote {
            self.quote_accts
                .entry(quote_account(lo))
                .or_default()
                .insert(oid);
        }
    }

    pub fn remove(&mut self, lo: &LimitOrder) {
        let oid = lo.id();
        if self.tracking.base {
            if let Some(set) = self.base_accts.get_mut(&base_account(lo)) {
                set.remove(&oid);
                if set.is_empty() {
                    self.base_accts.remove(&base_account(lo));
                }
            }
        }
        if self.tracking.quote {
            if let Some(set) = self.quote_accts.get_mut(&quote_account(lo)) {
                set.remove(&oid);
                if set.is_empty() {
                    self.quote_accts.remove(&quote_account(lo));
                }
            }
        }
    }

    #[must_use]
    pub fn base_account_orders(&self, addr: &str) -> Vec<OrderId> {
        self.base_accts
            .get(addr)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn quote_account_orders(&self, addr: &str) -> Vec<OrderId> {
        self.quote_accts
            .get(addr)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}
