//! The epoch queue: the set of orders collected within one epoch window.

use std::collections::HashMap;

use swapmatch_types::epoch::{epoch_index, epoch_start_ms};
use swapmatch_types::{DexError, Order, OrderId, OrderType, Result, TimeInForce};

/// One epoch's worth of orders, frozen at close and handed to the
/// preimage round.
#[derive(Debug)]
pub struct Epoch {
    pub idx: i64,
    pub dur_ms: u64,
    orders: HashMap<OrderId, Order>,
}

impl Epoch {
    /// The epoch bucket containing `now_ms`.
    #[must_use]
    pub fn for_time(now_ms: i64, dur_ms: u64) -> Self {
        Self::new(epoch_index(now_ms, dur_ms), dur_ms)
    }

    #[must_use]
    pub fn new(idx: i64, dur_ms: u64) -> Self {
        Self {
            idx,
            dur_ms,
            orders: HashMap::new(),
        }
    }

    /// Millisecond timestamp at which this epoch opens.
    #[must_use]
    pub fn start_ms(&self) -> i64 {
        epoch_start_ms(self.idx, self.dur_ms)
    }

    /// Millisecond timestamp at which this epoch closes.
    #[must_use]
    pub fn end_ms(&self) -> i64 {
        epoch_start_ms(self.idx + 1, self.dur_ms)
    }

    /// Whether `now_ms` falls inside this epoch's window.
    #[must_use]
    pub fn includes_time(&self, now_ms: i64) -> bool {
        now_ms >= self.start_ms() && now_ms < self.end_ms()
    }

    /// Add a stamped order to the epoch.
    ///
    /// # Errors
    /// Returns `DuplicateOrder` for a repeated ID, or `RpcInternal` for an
    /// unstamped order, which indicates a pipeline bug.
    pub fn insert(&mut self, order: Order) -> Result<()> {
        if !order.is_stamped() {
            return Err(DexError::RpcInternal("unstamped order in epoch".into()));
        }
        let oid = order.id();
        if self.orders.contains_key(&oid) {
            return Err(DexError::DuplicateOrder(oid));
        }
        self.orders.insert(oid, order);
        Ok(())
    }

    #[must_use]
    pub fn includes(&self, oid: &OrderId) -> bool {
        self.orders.contains_key(oid)
    }

    /// Whether the epoch holds a standing limit with this ID: the queue
    /// half of the cancelable check. Ownership is enforced at match time.
    #[must_use]
    pub fn standing_limit(&self, oid: &OrderId) -> bool {
        matches!(
            self.orders.get(oid),
            Some(Order::Limit(lo)) if lo.force == TimeInForce::Standing
        )
    }

    /// Whether the epoch holds a standing limit with this ID belonging to
    /// the given user.
    #[must_use]
    pub fn cancelable(&self, oid: &OrderId, user: &swapmatch_types::AccountId) -> bool {
        match self.orders.get(oid) {
            Some(Order::Limit(lo)) => {
                lo.force == TimeInForce::Standing && lo.prefix.account_id == *user
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Epoch order IDs in sorted order, the canonical order for the
    /// commitment checksum and seed.
    #[must_use]
    pub fn sorted_order_ids(&self) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self.orders.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn order(&self, oid: &OrderId) -> Option<&Order> {
        self.orders.get(oid)
    }

    /// Iterate the queued orders in no particular order.
    pub fn orders_iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Consume the epoch, yielding its orders.
    #[must_use]
    pub fn into_orders(self) -> HashMap<OrderId, Order> {
        self.orders
    }

    /// Count of orders by type, for the close log line.
    #[must_use]
    pub fn type_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for order in self.orders.values() {
            match order.order_type() {
                OrderType::Limit => counts.0 += 1,
                OrderType::Market => counts.1 += 1,
                OrderType::Cancel => counts.2 += 1,
            }
        }
        counts
    }
}
