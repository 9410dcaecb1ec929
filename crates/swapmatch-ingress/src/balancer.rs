//! The DEX balancer: bounds a user's worst-case outstanding commitments
//! per account-based asset across every market.
//!
//! Unlike UTXO funding, an account balance is shared by all of a user's
//! orders at once, so each new order must be checked against the sum of
//! everything already committed (booked orders, epoch-queued orders,
//! and active matches) plus worst-case swap and redemption fees. The
//! check never mutates state: the router calls it during ingress and the
//! commitment lands only when the order submits.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use swapmatch_types::{AssetId, BackedAsset};
use tracing::debug;

/// One source's running totals for an `(account, asset)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountCommitments {
    /// Atoms of the asset committed as order funding.
    pub qty: u64,
    /// Funding lots (each budgets one swap transaction's fees).
    pub lots: u64,
    /// Redemptions that will pay their fees in this asset.
    pub redeems: u64,
}

impl AccountCommitments {
    pub fn absorb(&mut self, other: AccountCommitments) {
        self.qty = self.qty.saturating_add(other.qty);
        self.lots = self.lots.saturating_add(other.lots);
        self.redeems = self.redeems.saturating_add(other.redeems);
    }
}

/// A provider of per-account commitment totals: each market reports over
/// its book, its epoch queue, and its active matches.
pub trait BalanceSource: Send + Sync {
    fn account_commitments(&self, acct_addr: &str, asset: AssetId) -> AccountCommitments;
}

/// The process-wide balancer, injected into the order router.
pub struct DexBalancer {
    assets: HashMap<AssetId, BackedAsset>,
    sources: RwLock<Vec<Arc<dyn BalanceSource>>>,
}

impl DexBalancer {
    /// Build a balancer over the account-based assets. Non-account
    /// entries are tolerated and simply never consulted.
    #[must_use]
    pub fn new(assets: HashMap<AssetId, BackedAsset>) -> Self {
        Self {
            assets,
            sources: RwLock::new(Vec::new()),
        }
    }

    /// Register a market as a commitment source.
    pub fn add_source(&self, source: Arc<dyn BalanceSource>) {
        self.sources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(source);
    }

    /// Whether granting `(add_qty, add_lots, add_redeems)` against
    /// `asset` keeps the account solvent under worst-case fees.
    /// `add_redeems` counts only when the order redeems into the same
    /// asset it is being checked against.
    #[must_use]
    pub fn check_balance(
        &self,
        acct_addr: &str,
        asset: AssetId,
        redeem_asset: AssetId,
        add_qty: u64,
        add_lots: u64,
        add_redeems: u64,
    ) -> bool {
        let Some(backed) = self.assets.get(&asset) else {
            return false;
        };
        let Some(balancer) = backed.backend.account_balancer() else {
            return false;
        };
        let balance = match balancer.account_balance(acct_addr) {
            Ok(bal) => bal,
            Err(err) => {
                debug!(acct = acct_addr, asset = %asset, %err, "balance query failed");
                return false;
            }
        };

        let mut total = AccountCommitments {
            qty: add_qty,
            lots: add_lots,
            redeems: if redeem_asset == asset { add_redeems } else { 0 },
        };
        for source in self
            .sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            total.absorb(source.account_commitments(acct_addr, asset));
        }

        let info = &backed.asset;
        let swap_fees = total
            .lots
            .saturating_mul(info.swap_size)
            .saturating_mul(info.max_fee_rate);
        let redeem_fees = total
            .redeems
            .saturating_mul(info.redeem_size)
            .saturating_mul(info.max_fee_rate);
        let required = total
            .qty
            .saturating_add(swap_fees)
            .saturating_add(redeem_fees);

        let ok = balance >= required;
        debug!(
            acct = acct_addr,
            asset = %asset,
            balance,
            required,
            ok,
            "balance check"
        );
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use swapmatch_types::{test_account_asset, AccountBalancer, Backend, CoinId, DexError, Result};

    struct FakeAccountBackend {
        balances: Mutex<HashMap<String, u64>>,
    }

    impl Backend for FakeAccountBackend {
        fn validate_coin_id(&self, coin_id: &CoinId) -> Result<String> {
            Ok(coin_id.to_string())
        }
        fn check_address(&self, _addr: &str) -> bool {
            true
        }
        fn account_balancer(&self) -> Option<&dyn AccountBalancer> {
            Some(self)
        }
    }

    impl AccountBalancer for FakeAccountBackend {
        fn account_balance(&self, addr: &str) -> Result<u64> {
            self.balances
                .lock()
                .unwrap()
                .get(addr)
                .copied()
                .ok_or_else(|| DexError::Funding(format!("unknown account {addr}")))
        }
        fn validate_signature(
            &self,
            _addr: &str,
            _pubkey: &[u8],
            _msg: &[u8],
            _sig: &[u8],
        ) -> Result<()> {
            Ok(())
        }
    }

    struct FixedSource(AccountCommitments);

    impl BalanceSource for FixedSource {
        fn account_commitments(&self, _acct: &str, _asset: AssetId) -> AccountCommitments {
            self.0
        }
    }

    fn balancer_with(balance: u64) -> (DexBalancer, AssetId) {
        let asset = test_account_asset();
        let id = asset.id;
        let backend = Arc::new(FakeAccountBackend {
            balances: Mutex::new(HashMap::from([("alice".to_string(), balance)])),
        });
        let backed = BackedAsset {
            asset,
            backend,
        };
        (DexBalancer::new(HashMap::from([(id, backed)])), id)
    }

    #[test]
    fn covers_quantity_plus_fees() {
        let info = test_account_asset();
        let lot_fee = info.swap_size * info.max_fee_rate;
        let (bal, id) = balancer_with(1_000_000 + lot_fee);
        assert!(bal.check_balance("alice", id, AssetId(0), 1_000_000, 1, 0));
        // One atom short of one more lot's fees.
        assert!(!bal.check_balance("alice", id, AssetId(0), 1_000_000, 2, 0));
    }

    #[test]
    fn redeems_count_only_for_matching_asset() {
        let info = test_account_asset();
        let redeem_fee = info.redeem_size * info.max_fee_rate;
        let (bal, id) = balancer_with(redeem_fee);
        // Redeeming into this asset consumes the fee headroom.
        assert!(bal.check_balance("alice", id, id, 0, 0, 1));
        assert!(!bal.check_balance("alice", id, id, 1, 0, 1));
        // Redeeming into another asset costs nothing here.
        assert!(bal.check_balance("alice", id, AssetId(0), redeem_fee, 0, 1));
    }

    #[test]
    fn sources_aggregate_existing_commitments() {
        let info = test_account_asset();
        let lot_fee = info.swap_size * info.max_fee_rate;
        let (bal, id) = balancer_with(2_000_000 + 2 * lot_fee);
        bal.add_source(Arc::new(FixedSource(AccountCommitments {
            qty: 1_000_000,
            lots: 1,
            redeems: 0,
        })));
        assert!(bal.check_balance("alice", id, AssetId(0), 1_000_000, 1, 0));
        assert!(!bal.check_balance("alice", id, AssetId(0), 1_000_001, 1, 0));
    }

    #[test]
    fn unknown_account_fails_closed() {
        let (bal, id) = balancer_with(u64::MAX);
        assert!(!bal.check_balance("mallory", id, AssetId(0), 1, 0, 0));
    }

    #[test]
    fn unknown_asset_fails_closed() {
        let (bal, _) = balancer_with(u64::MAX);
        assert!(!bal.check_balance("alice", AssetId(999), AssetId(0), 1, 0, 0));
    }
}
