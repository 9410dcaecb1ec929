//! Process-wide funding-coin lock registry.
//!
//! Every order entering an epoch queue locks its funding coins here, and
//! a swap re-locks them under the match ID when negotiation begins. At
//! any instant a given `(asset, coin)` has at most one holder.

use std::collections::HashMap;
use std::sync::Mutex;

use swapmatch_types::{AssetId, CoinId, DexError, MatchId, OrderId, Result};
use tracing::debug;

/// What holds a coin lock: the order that committed the coin, or the
/// match whose swap is spending it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockHolder {
    Order(OrderId),
    Match(MatchId),
}

impl LockHolder {
    fn order_id(&self) -> OrderId {
        match self {
            Self::Order(oid) => *oid,
            // For error reporting only; a match-held coin reports the
            // zero order ID.
            Self::Match(_) => OrderId::default(),
        }
    }
}

/// The lock table. Injected into the router and every market; never a
/// global.
#[derive(Debug, Default)]
pub struct CoinLocker {
    locks: Mutex<HashMap<(AssetId, CoinId), LockHolder>>,
}

impl CoinLocker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<(AssetId, CoinId), LockHolder>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock a single coin for a holder.
    ///
    /// # Errors
    /// Returns `CoinLocked` if the coin is already held.
    pub fn lock(&self, asset: AssetId, coin: CoinId, holder: LockHolder) -> Result<()> {
        let mut table = self.table();
        if let Some(existing) = table.get(&(asset, coin.clone())) {
            return Err(DexError::CoinLocked {
                coin,
                holder: existing.order_id(),
            });
        }
        table.insert((asset, coin), holder);
        Ok(())
    }

    /// Atomically lock all of an order's funding coins. If any coin is
    /// already held, nothing is locked.
    ///
    /// # Errors
    /// Returns `CoinLocked` naming the first conflicting coin.
    pub fn lock_order_coins(
        &self,
        asset: AssetId,
        coins: &[CoinId],
        order_id: OrderId,
    ) -> Result<()> {
        let mut table = self.table();
        for coin in coins {
            if let Some(existing) = table.get(&(asset, coin.clone())) {
                return Err(DexError::CoinLocked {
                    coin: coin.clone(),
                    holder: existing.order_id(),
                });
            }
        }
        for coin in coins {
            table.insert((asset, coin.clone()), LockHolder::Order(order_id));
        }
        debug!(asset = %asset, order = %order_id, coins = coins.len(), "coins locked");
        Ok(())
    }

    /// Release one coin. Returns the holder it was released from.
    pub fn release(&self, asset: AssetId, coin: &CoinId) -> Option<LockHolder> {
        self.table().remove(&(asset, coin.clone()))
    }

    /// Release every listed coin.
    pub fn release_coins(&self, asset: AssetId, coins: &[CoinId]) {
        let mut table = self.table();
        for coin in coins {
            table.remove(&(asset, coin.clone()));
        }
    }

    /// Move an order's coins under the match that is now spending them.
    ///
    /// # Errors
    /// Returns `CoinLocked` if a coin is held by a different order.
    pub fn transfer_to_match(
        &self,
        asset: AssetId,
        coins: &[CoinId],
        from: OrderId,
        to: MatchId,
    ) -> Result<()> {
        let mut table = self.table();
        for coin in coins {
            match table.get(&(asset, coin.clone())) {
                Some(LockHolder::Order(oid)) if *oid == from => {}
                Some(existing) => {
                    return Err(DexError::CoinLocked {
                        coin: coin.clone(),
                        holder: existing.order_id(),
                    })
                }
                // A vanished lock is tolerated; the transfer recreates it.
                None => {}
            }
        }
        for coin in coins {
            table.insert((asset, coin.clone()), LockHolder::Match(to));
        }
        Ok(())
    }

    #[must_use]
    pub fn locked(&self, asset: AssetId, coin: &CoinId) -> bool {
        self.table().contains_key(&(asset, coin.clone()))
    }

    #[must_use]
    pub fn holder(&self, asset: AssetId, coin: &CoinId) -> Option<LockHolder> {
        self.table().get(&(asset, coin.clone())).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSET: AssetId = AssetId(42);

    fn coin(n: u8) -> CoinId {
        CoinId::from_bytes(vec![n, n, n])
    }

    #[test]
    fn lock_and_release() {
        let locker = CoinLocker::new();
        let oid = OrderId::from_bytes([1; 32]);
        locker.lock(ASSET, coin(1), LockHolder::Order(oid)).unwrap();
        assert!(locker.locked(ASSET, &coin(1)));
        assert!(!locker.locked(ASSET, &coin(2)));
        assert!(!locker.locked(AssetId(7), &coin(1)));

        assert_eq!(
            locker.release(ASSET, &coin(1)),
            Some(LockHolder::Order(oid))
        );
        assert!(!locker.locked(ASSET, &coin(1)));
    }

    #[test]
    fn double_lock_fails() {
        let locker = CoinLocker::new();
        let oid = OrderId::from_bytes([1; 32]);
        locker.lock(ASSET, coin(1), LockHolder::Order(oid)).unwrap();
        let err = locker
            .lock(ASSET, coin(1), LockHolder::Order(OrderId::from_bytes([2; 32])))
            .unwrap_err();
        assert!(matches!(err, DexError::CoinLocked { .. }));
    }

    #[test]
    fn order_lock_is_all_or_nothing() {
        let locker = CoinLocker::new();
        let holder = OrderId::from_bytes([1; 32]);
        locker
            .lock(ASSET, coin(2), LockHolder::Order(holder))
            .unwrap();

        let oid = OrderId::from_bytes([3; 32]);
        let err = locker
            .lock_order_coins(ASSET, &[coin(1), coin(2)], oid)
            .unwrap_err();
        assert!(matches!(err, DexError::CoinLocked { .. }));
        // The non-conflicting coin must not have been locked.
        assert!(!locker.locked(ASSET, &coin(1)));
    }

    #[test]
    fn transfer_to_match_swaps_holder() {
        let locker = CoinLocker::new();
        let oid = OrderId::from_bytes([1; 32]);
        let mid = MatchId::from_bytes([2; 32]);
        locker
            .lock_order_coins(ASSET, &[coin(1), coin(2)], oid)
            .unwrap();
        locker
            .transfer_to_match(ASSET, &[coin(1), coin(2)], oid, mid)
            .unwrap();
        assert_eq!(locker.holder(ASSET, &coin(1)), Some(LockHolder::Match(mid)));
    }

    #[test]
    fn transfer_rejects_foreign_holder() {
        let locker = CoinLocker::new();
        let owner = OrderId::from_bytes([1; 32]);
        locker
            .lock_order_coins(ASSET, &[coin(1)], owner)
            .unwrap();
        let err = locker
            .transfer_to_match(
                ASSET,
                &[coin(1)],
                OrderId::from_bytes([9; 32]),
                MatchId::from_bytes([2; 32]),
            )
            .unwrap_err();
        assert!(matches!(err, DexError::CoinLocked { .. }));
        assert_eq!(
            locker.holder(ASSET, &coin(1)),
            Some(LockHolder::Order(owner))
        );
    }

    #[test]
    fn release_coins_clears_order() {
        let locker = CoinLocker::new();
        let oid = OrderId::from_bytes([1; 32]);
        locker
            .lock_order_coins(ASSET, &[coin(1), coin(2)], oid)
            .unwrap();
        locker.release_coins(ASSET, &[coin(1), coin(2)]);
        assert!(locker.is_empty());
    }
}
