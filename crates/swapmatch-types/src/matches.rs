//! Match types: the unit of settlement handed to the swap coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::order::ser;
use crate::{calc, AccountId, CoinId, MatchId, Order, OrderId, OrderType};

/// Domain-separation tag for match hashing.
const MATCH_DOMAIN: &[u8] = b"swapmatch:match:v1:";

/// Progress of a match through the atomic-swap protocol.
///
/// The happy path advances top to bottom. `Refunded` is reachable from any
/// non-terminal state once the relevant contract's lock time expires
/// without counterparty progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum MatchStatus {
    /// Created at epoch close; maker must broadcast first.
    NewlyMatched,
    /// Maker broadcast their contract.
    MakerSwapCast,
    /// Taker audited the maker's contract and broadcast their own.
    TakerSwapCast,
    /// Maker redeemed the taker's contract, revealing the secret.
    MakerRedeemed,
    /// Taker redeemed with the revealed secret. Terminal.
    MatchComplete,
    /// A lock time passed without progress; the waiting side refunded.
    /// Terminal.
    Refunded,
}

impl MatchStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::MatchComplete | Self::Refunded)
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewlyMatched => write!(f, "NewlyMatched"),
            Self::MakerSwapCast => write!(f, "MakerSwapCast"),
            Self::TakerSwapCast => write!(f, "TakerSwapCast"),
            Self::MakerRedeemed => write!(f, "MakerRedeemed"),
            Self::MatchComplete => write!(f, "MatchComplete"),
            Self::Refunded => write!(f, "Refunded"),
        }
    }
}

/// A pairing of a resting maker with an incoming taker, or of a cancel
/// order with its target (a zero-quantity record kept for bookkeeping).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub maker_order: OrderId,
    pub maker_user: AccountId,
    pub taker_order: OrderId,
    pub taker_user: AccountId,
    /// Cancel matches carry `OrderType::Cancel` here; trade matches carry
    /// the taker's type.
    pub taker_type: OrderType,
    /// The resting maker's rate. Price-time priority favors the maker.
    pub rate: u64,
    /// Matched base-asset quantity. Zero for cancel matches.
    pub quantity: u64,
    pub base_qty: u64,
    pub quote_qty: u64,
    pub status: MatchStatus,
    /// Whether the maker is the seller of the base asset.
    pub maker_sell: bool,
    /// The epoch that produced this match.
    pub epoch_idx: i64,
    pub matched_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Maker's contract output.
    pub maker_swap_coin: Option<CoinId>,
    /// Taker's contract output.
    pub taker_swap_coin: Option<CoinId>,
    /// Maker's redemption of the taker's contract (reveals the secret).
    pub maker_redeem_coin: Option<CoinId>,
    /// Taker's redemption of the maker's contract.
    pub taker_redeem_coin: Option<CoinId>,
}

impl Match {
    /// Build a trade match between a resting maker and a taker at the
    /// maker's rate.
    #[must_use]
    pub fn trade(
        maker: &crate::LimitOrder,
        taker: &Order,
        quantity: u64,
        epoch_idx: i64,
        matched_at: DateTime<Utc>,
    ) -> Self {
        let rate = maker.rate;
        let quote_qty = calc::base_to_quote(rate, quantity);
        let maker_oid = maker.id();
        let taker_oid = taker.id();
        Self {
            id: match_id(&maker_oid, &taker_oid, rate, quantity),
            maker_order: maker_oid,
            maker_user: maker.prefix.account_id,
            taker_order: taker_oid,
            taker_user: taker.user(),
            taker_type: taker.order_type(),
            rate,
            quantity,
            base_qty: quantity,
            quote_qty,
            status: MatchStatus::NewlyMatched,
            maker_sell: maker.trade.sell,
            epoch_idx,
            matched_at,
            updated_at: matched_at,
            maker_swap_coin: None,
            taker_swap_coin: None,
            maker_redeem_coin: None,
            taker_redeem_coin: None,
        }
    }

    /// Build a zero-quantity cancel match pairing a cancel order with the
    /// standing limit it removed.
    #[must_use]
    pub fn cancellation(
        target: &crate::LimitOrder,
        cancel: &crate::CancelOrder,
        epoch_idx: i64,
        matched_at: DateTime<Utc>,
    ) -> Self {
        let maker_oid = target.id();
        let taker_oid = cancel.id();
        Self {
            id: match_id(&maker_oid, &taker_oid, 0, 0),
            maker_order: maker_oid,
            maker_user: target.prefix.account_id,
            taker_order: taker_oid,
            taker_user: cancel.prefix.account_id,
            taker_type: OrderType::Cancel,
            rate: 0,
            quantity: 0,
            base_qty: 0,
            quote_qty: 0,
            status: MatchStatus::MatchComplete,
            maker_sell: target.trade.sell,
            epoch_idx,
            matched_at,
            updated_at: matched_at,
            maker_swap_coin: None,
            taker_swap_coin: None,
            maker_redeem_coin: None,
            taker_redeem_coin: None,
        }
    }

    /// Whether this record is a cancellation rather than a trade.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.taker_type == OrderType::Cancel
    }
}

/// Deterministic match ID over the pairing terms. Every node and auditor
/// derives the same ID for the same match.
#[must_use]
pub fn match_id(maker: &OrderId, taker: &OrderId, rate: u64, quantity: u64) -> MatchId {
    let mut hasher = Sha256::new();
    hasher.update(MATCH_DOMAIN);
    hasher.update(maker.as_bytes());
    hasher.update(taker.as_bytes());
    let mut terms = Vec::with_capacity(16);
    ser::push_u64(&mut terms, rate);
    ser::push_u64(&mut terms, quantity);
    hasher.update(&terms);
    MatchId(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::test_orders;
    use crate::Commitment;

    #[test]
    fn match_id_deterministic() {
        let a = OrderId::from_bytes([1; 32]);
        let b = OrderId::from_bytes([2; 32]);
        assert_eq!(match_id(&a, &b, 5, 10), match_id(&a, &b, 5, 10));
        assert_ne!(match_id(&a, &b, 5, 10), match_id(&b, &a, 5, 10));
        assert_ne!(match_id(&a, &b, 5, 10), match_id(&a, &b, 5, 11));
    }

    #[test]
    fn trade_match_carries_maker_rate() {
        let maker = test_orders::limit(1, true, 2 * calc::RATE_ENCODING_FACTOR, 100, 1_000);
        let taker = Order::Market(test_orders::market(2, false, 300, 2_000));
        let m = Match::trade(&maker, &taker, 100, 7, crate::order::from_unix_ms(2_500));
        assert_eq!(m.rate, maker.rate);
        assert_eq!(m.quantity, 100);
        assert_eq!(m.quote_qty, 200);
        assert_eq!(m.status, MatchStatus::NewlyMatched);
        assert!(m.maker_sell);
        assert!(!m.is_cancellation());
    }

    #[test]
    fn cancel_match_is_terminal_and_empty() {
        let target = test_orders::limit(1, false, 1_000_000, 100, 1_000);
        let cancel = crate::CancelOrder {
            prefix: crate::Prefix {
                account_id: target.prefix.account_id,
                base: target.prefix.base,
                quote: target.prefix.quote,
                order_type: OrderType::Cancel,
                client_time: crate::order::from_unix_ms(3_000),
                server_time: Some(crate::order::from_unix_ms(3_010)),
                commit: Commitment::default(),
            },
            target_order_id: target.id(),
        };
        let m = Match::cancellation(&target, &cancel, 9, crate::order::from_unix_ms(3_020));
        assert!(m.is_cancellation());
        assert_eq!(m.quantity, 0);
        assert!(m.status.is_terminal());
    }

    #[test]
    fn status_terminality() {
        assert!(!MatchStatus::NewlyMatched.is_terminal());
        assert!(!MatchStatus::MakerRedeemed.is_terminal());
        assert!(MatchStatus::MatchComplete.is_terminal());
        assert!(MatchStatus::Refunded.is_terminal());
    }
}
