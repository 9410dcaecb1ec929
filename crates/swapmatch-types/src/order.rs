//! Order types for the swapmatch epoch auction.
//!
//! Orders are immutable on the server once stamped: the epoch pipeline
//! assigns the server timestamp, and the order ID is the SHA-256 of the
//! canonical serialization including that timestamp. The same bytes are
//! the message the client signs (with a zero server time), so the ID is
//! reproducible by any auditor.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{AccountId, AssetId, CoinId, OrderId};

/// Domain-separation tag for order hashing.
const ORDER_DOMAIN: &[u8] = b"swapmatch:order:v1:";

// ---------------------------------------------------------------------------
// Canonical byte serialization helpers
// ---------------------------------------------------------------------------

/// Canonical encoding building blocks: integers big-endian, byte strings
/// length-prefixed with a u16, optionals led by a presence flag byte.
pub(crate) mod ser {
    pub fn push_u16(out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&v.to_be_bytes());
    }

    pub fn push_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_be_bytes());
    }

    pub fn push_u64(out: &mut Vec<u8>, v: u64) {
        out.extend_from_slice(&v.to_be_bytes());
    }

    pub fn push_bytes(out: &mut Vec<u8>, b: &[u8]) {
        debug_assert!(b.len() <= usize::from(u16::MAX));
        push_u16(out, b.len() as u16);
        out.extend_from_slice(b);
    }
}

/// Milliseconds since the Unix epoch, the wire and storage time unit.
#[must_use]
pub fn unix_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// The inverse of [`unix_ms`]. Out-of-range values clamp to the epoch.
#[must_use]
pub fn from_unix_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
}

// ---------------------------------------------------------------------------
// Commitment / preimage
// ---------------------------------------------------------------------------

/// The 32-byte hash a client binds at submission. The preimage is revealed
/// after epoch close and feeds the verifiable shuffle.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct Commitment(pub [u8; 32]);

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A revealed order preimage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Preimage(pub [u8; 32]);

impl Preimage {
    /// The commitment this preimage opens: `SHA-256(preimage)`.
    #[must_use]
    pub fn commitment(&self) -> Commitment {
        let digest = Sha256::digest(self.0);
        Commitment(digest.into())
    }
}

// ---------------------------------------------------------------------------
// Order components
// ---------------------------------------------------------------------------

/// The type of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    Cancel,
}

impl OrderType {
    /// Stable wire code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Limit => 1,
            Self::Market => 2,
            Self::Cancel => 3,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Limit),
            2 => Some(Self::Market),
            3 => Some(Self::Cancel),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit => write!(f, "LIMIT"),
            Self::Market => write!(f, "MARKET"),
            Self::Cancel => write!(f, "CANCEL"),
        }
    }
}

/// How long a limit order may rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Match this epoch or die.
    Immediate,
    /// Residual quantity promotes to the book.
    Standing,
}

impl TimeInForce {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Immediate => 0,
            Self::Standing => 1,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Immediate),
            1 => Some(Self::Standing),
            _ => None,
        }
    }
}

/// Fields common to all orders. Stamped by the epoch pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefix {
    pub account_id: AccountId,
    pub base: AssetId,
    pub quote: AssetId,
    pub order_type: OrderType,
    pub client_time: DateTime<Utc>,
    /// Assigned under the epoch lock; `None` until stamped.
    pub server_time: Option<DateTime<Utc>>,
    pub commit: Commitment,
}

impl Prefix {
    /// Canonical serialization: account, base, quote, type, client time,
    /// server time (zero when unstamped), commitment.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(96);
        out.extend_from_slice(self.account_id.as_bytes());
        ser::push_u32(&mut out, self.base.0);
        ser::push_u32(&mut out, self.quote.0);
        out.push(self.order_type.code());
        ser::push_u64(&mut out, unix_ms(self.client_time) as u64);
        let stamp = self.server_time.map_or(0, |t| unix_ms(t) as u64);
        ser::push_u64(&mut out, stamp);
        out.extend_from_slice(&self.commit.0);
        out
    }

    /// Milliseconds form of the server stamp, zero when unstamped.
    #[must_use]
    pub fn server_time_ms(&self) -> i64 {
        self.server_time.map_or(0, unix_ms)
    }
}

/// The trade payload shared by limit and market orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Funding coin IDs backing the order.
    pub coins: Vec<CoinId>,
    pub sell: bool,
    /// Base-asset atoms, except for market buys, which are denominated in
    /// the quote asset.
    pub quantity: u64,
    /// Address (or account) receiving the redeemed funds.
    pub address: String,
    /// Quantity already matched. For market buys this is quote atoms
    /// consumed; for everything else, base atoms.
    #[serde(default)]
    pub filled: u64,
}

impl Trade {
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.quantity.saturating_sub(self.filled)
    }

    /// The receiving account address for account-based redemption.
    #[must_use]
    pub fn to_account(&self) -> &str {
        &self.address
    }

    /// The funding account address for account-funded orders, recovered
    /// from the single coin proof.
    #[must_use]
    pub fn from_account(&self) -> String {
        self.coins
            .first()
            .map(|c| hex::encode(c.as_slice()))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.coins.len() * 40);
        out.push(u8::from(self.sell));
        ser::push_u64(&mut out, self.quantity);
        ser::push_u16(&mut out, self.coins.len() as u16);
        for coin in &self.coins {
            ser::push_bytes(&mut out, coin.as_slice());
        }
        ser::push_bytes(&mut out, self.address.as_bytes());
        out
    }
}

// ---------------------------------------------------------------------------
// The three order kinds
// ---------------------------------------------------------------------------

/// A limit order with a rate and a time-in-force.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub prefix: Prefix,
    pub trade: Trade,
    /// Quote atoms per rate-encoding unit of base. Must be a positive
    /// multiple of the market's rate step.
    pub rate: u64,
    pub force: TimeInForce,
}

impl LimitOrder {
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.prefix.serialize();
        out.extend_from_slice(&self.trade.serialize());
        ser::push_u64(&mut out, self.rate);
        out.push(self.force.code());
        out
    }

    #[must_use]
    pub fn id(&self) -> OrderId {
        order_id(&self.serialize())
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.trade.remaining()
    }
}

/// A market order. Sells are base-denominated; buys are quote-denominated
/// and subject to the market-buy buffer at ingress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub prefix: Prefix,
    pub trade: Trade,
}

impl MarketOrder {
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.prefix.serialize();
        out.extend_from_slice(&self.trade.serialize());
        out
    }

    #[must_use]
    pub fn id(&self) -> OrderId {
        order_id(&self.serialize())
    }
}

/// A cancellation of a standing limit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub prefix: Prefix,
    pub target_order_id: OrderId,
}

impl CancelOrder {
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.prefix.serialize();
        out.extend_from_slice(self.target_order_id.as_bytes());
        out
    }

    #[must_use]
    pub fn id(&self) -> OrderId {
        order_id(&self.serialize())
    }
}

fn order_id(canonical: &[u8]) -> OrderId {
    let mut hasher = Sha256::new();
    hasher.update(ORDER_DOMAIN);
    hasher.update(canonical);
    OrderId(hasher.finalize().into())
}

// ---------------------------------------------------------------------------
// Order: the closed set of order kinds
// ---------------------------------------------------------------------------

/// Any order accepted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Limit(LimitOrder),
    Market(MarketOrder),
    Cancel(CancelOrder),
}

impl Order {
    #[must_use]
    pub fn prefix(&self) -> &Prefix {
        match self {
            Self::Limit(o) => &o.prefix,
            Self::Market(o) => &o.prefix,
            Self::Cancel(o) => &o.prefix,
        }
    }

    fn prefix_mut(&mut self) -> &mut Prefix {
        match self {
            Self::Limit(o) => &mut o.prefix,
            Self::Market(o) => &mut o.prefix,
            Self::Cancel(o) => &mut o.prefix,
        }
    }

    /// The trade payload, absent for cancels.
    #[must_use]
    pub fn trade(&self) -> Option<&Trade> {
        match self {
            Self::Limit(o) => Some(&o.trade),
            Self::Market(o) => Some(&o.trade),
            Self::Cancel(_) => None,
        }
    }

    #[must_use]
    pub fn user(&self) -> AccountId {
        self.prefix().account_id
    }

    #[must_use]
    pub fn order_type(&self) -> OrderType {
        self.prefix().order_type
    }

    #[must_use]
    pub fn commitment(&self) -> Commitment {
        self.prefix().commit
    }

    /// Whether the order takes funding from the base asset.
    #[must_use]
    pub fn funds_with_base(&self) -> bool {
        self.trade().is_some_and(|t| t.sell)
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Self::Limit(o) => o.serialize(),
            Self::Market(o) => o.serialize(),
            Self::Cancel(o) => o.serialize(),
        }
    }

    /// The order ID. Only meaningful once the server time is stamped.
    #[must_use]
    pub fn id(&self) -> OrderId {
        order_id(&self.serialize())
    }

    /// Assign the server timestamp. Called exactly once, under the epoch
    /// queue's lock, so stamps within an epoch are monotonic per market.
    pub fn stamp(&mut self, server_time: DateTime<Utc>) {
        self.prefix_mut().server_time = Some(server_time);
    }

    #[must_use]
    pub fn is_stamped(&self) -> bool {
        self.prefix().server_time.is_some()
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_orders {
    use super::*;

    /// A stamped standing limit order with deterministic times.
    #[must_use]
    pub fn limit(user_byte: u8, sell: bool, rate: u64, qty: u64, stamp_ms: i64) -> LimitOrder {
        LimitOrder {
            prefix: Prefix {
                account_id: AccountId::from_bytes([user_byte; 32]),
                base: AssetId(42),
                quote: AssetId(0),
                order_type: OrderType::Limit,
                client_time: from_unix_ms(stamp_ms - 25),
                server_time: Some(from_unix_ms(stamp_ms)),
                commit: Preimage([user_byte; 32]).commitment(),
            },
            trade: Trade {
                coins: vec![CoinId::from_bytes(vec![user_byte, u8::from(sell), 9])],
                sell,
                quantity: qty,
                address: format!("addr-{user_byte}"),
                filled: 0,
            },
            rate,
            force: TimeInForce::Standing,
        }
    }

    /// A stamped market order.
    #[must_use]
    pub fn market(user_byte: u8, sell: bool, qty: u64, stamp_ms: i64) -> MarketOrder {
        MarketOrder {
            prefix: Prefix {
                account_id: AccountId::from_bytes([user_byte; 32]),
                base: AssetId(42),
                quote: AssetId(0),
                order_type: OrderType::Market,
                client_time: from_unix_ms(stamp_ms - 25),
                server_time: Some(from_unix_ms(stamp_ms)),
                commit: Preimage([user_byte; 32]).commitment(),
            },
            trade: Trade {
                coins: vec![CoinId::from_bytes(vec![user_byte, 2, u8::from(sell)])],
                sell,
                quantity: qty,
                address: format!("addr-{user_byte}"),
                filled: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preimage_opens_commitment() {
        let pi = Preimage([3; 32]);
        let commit = pi.commitment();
        assert_eq!(Preimage([3; 32]).commitment(), commit);
        assert_ne!(Preimage([4; 32]).commitment(), commit);
    }

    #[test]
    fn order_type_codes_round_trip() {
        for ot in [OrderType::Limit, OrderType::Market, OrderType::Cancel] {
            assert_eq!(OrderType::from_code(ot.code()), Some(ot));
        }
        assert_eq!(OrderType::from_code(9), None);
    }

    #[test]
    fn stamping_changes_the_id() {
        let lo = test_orders::limit(1, true, 1_000_000, 100_000_000, 1_700_000_000_000);
        let mut unstamped = Order::Limit(lo.clone());
        unstamped.prefix_mut().server_time = None;
        let before = unstamped.id();
        unstamped.stamp(from_unix_ms(1_700_000_000_000));
        assert_ne!(before, unstamped.id());
        assert_eq!(unstamped.id(), lo.id());
    }

    #[test]
    fn id_is_reproducible() {
        let lo = test_orders::limit(7, false, 2_000_000, 300_000_000, 1_700_000_000_777);
        assert_eq!(lo.id(), lo.clone().id());
    }

    #[test]
    fn ids_differ_across_fields() {
        let a = test_orders::limit(1, true, 1_000_000, 100_000_000, 1_700_000_000_000);
        let mut b = a.clone();
        b.rate += 1;
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn filled_never_exceeds_remaining_arithmetic() {
        let mut t = test_orders::limit(1, true, 1, 100, 0).trade;
        t.filled = 150;
        assert_eq!(t.remaining(), 0);
    }

    #[test]
    fn serialization_is_stable() {
        let lo = test_orders::limit(9, true, 5_000_000, 400_000_000, 1_700_000_123_456);
        let bytes_a = lo.serialize();
        let bytes_b = lo.serialize();
        assert_eq!(bytes_a, bytes_b);
        // Prefix is 32 + 4 + 4 + 1 + 8 + 8 + 32 = 89 bytes.
        assert!(bytes_a.len() > 89);
    }

    #[test]
    fn cancel_serialization_embeds_target() {
        let target = OrderId::from_bytes([0xee; 32]);
        let co = CancelOrder {
            prefix: Prefix {
                account_id: AccountId::from_bytes([1; 32]),
                base: AssetId(42),
                quote: AssetId(0),
                order_type: OrderType::Cancel,
                client_time: from_unix_ms(1_700_000_000_000),
                server_time: None,
                commit: Commitment::default(),
            },
            target_order_id: target,
        };
        let bytes = co.serialize();
        assert!(bytes
            .windows(32)
            .any(|w| w == target.as_bytes().as_slice()));
    }
}
