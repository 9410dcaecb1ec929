//! Wire messages for the client comms link.
//!
//! Every message on the link is a [`Message`]: a `Request` expecting a
//! single `Response`, a `Response`, or a one-way `Notification`. Messages
//! carry an integer ID (unique per peer), a route string, and a JSON
//! payload. Signable payloads define a deterministic byte serialization,
//! the same bytes an unstamped order serializes to, so a signature made
//! by the client verifies against the order the server constructs.

use serde::{Deserialize, Serialize};

use crate::epoch::{EpochResults, EpochStats};
use crate::{
    AccountId, AssetId, CancelOrder, CoinId, Commitment, DexError, LimitOrder, MarketOrder,
    MatchId, MatchStatus, Order, OrderId, OrderType, Preimage, Prefix, Result, TimeInForce, Trade,
};

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

// Server-authoritative routes (accepted from clients).
pub const LIMIT_ROUTE: &str = "limit";
pub const MARKET_ROUTE: &str = "market";
pub const CANCEL_ROUTE: &str = "cancel";
pub const INIT_ROUTE: &str = "init";
pub const REDEEM_ROUTE: &str = "redeem";
pub const MATCH_STATUS_ROUTE: &str = "match_status";
pub const CONNECT_ROUTE: &str = "connect";
pub const PREIMAGE_RESP_ROUTE: &str = "preimage_resp";

// Client-authoritative routes (server pushes).
pub const PREIMAGE_ROUTE: &str = "preimage";
pub const AUDIT_ROUTE: &str = "audit";
pub const MATCH_PROOF_ROUTE: &str = "match_proof";
pub const NOTIFY_FEE_ROUTE: &str = "notify_fee";
pub const NOMATCH_ROUTE: &str = "nomatch";
pub const UNMARKET_ROUTE: &str = "unmarket";
pub const SUSPENSION_ROUTE: &str = "suspension";
pub const EPOCH_REPORT_ROUTE: &str = "epoch_report";
pub const BOOK_ORDER_ROUTE: &str = "book_order";
pub const UNBOOK_ORDER_ROUTE: &str = "unbook_order";
pub const EPOCH_ORDER_ROUTE: &str = "epoch_order";
pub const UPDATE_REMAINING_ROUTE: &str = "update_remaining";
pub const SPOTS_ROUTE: &str = "spots";
pub const CANDLE_UPDATE_ROUTE: &str = "candle_update";
pub const REVOKE_MATCH_ROUTE: &str = "revoke_match";

/// Wire code for a buy-side trade.
pub const SIDE_BUY: u8 = 0;
/// Wire code for a sell-side trade.
pub const SIDE_SELL: u8 = 1;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The kind of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Notification,
}

/// A framed wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub mtype: MessageType,
    /// Peer-unique message ID; zero for notifications.
    pub id: u64,
    /// Empty for responses (the ID pairs them with their request).
    #[serde(default)]
    pub route: String,
    pub payload: serde_json::Value,
}

/// The error half of a response payload. `code` is stable; `message` is
/// advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: u16,
    pub message: String,
}

impl From<&DexError> for WireError {
    fn from(err: &DexError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// The payload of every `Response` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<WireError>,
}

impl Message {
    /// # Errors
    /// Returns `Parse` if the payload cannot serialize, which indicates a
    /// programming error in the payload type.
    pub fn request<T: Serialize>(id: u64, route: &str, payload: &T) -> Result<Self> {
        Ok(Self {
            mtype: MessageType::Request,
            id,
            route: route.into(),
            payload: to_value(payload)?,
        })
    }

    /// # Errors
    /// Returns `Parse` if the payload cannot serialize.
    pub fn notification<T: Serialize>(route: &str, payload: &T) -> Result<Self> {
        Ok(Self {
            mtype: MessageType::Notification,
            id: 0,
            route: route.into(),
            payload: to_value(payload)?,
        })
    }

    /// # Errors
    /// Returns `Parse` if the result cannot serialize.
    pub fn response<T: Serialize>(id: u64, result: &T) -> Result<Self> {
        let payload = ResponsePayload {
            result: Some(to_value(result)?),
            error: None,
        };
        Ok(Self {
            mtype: MessageType::Response,
            id,
            route: String::new(),
            payload: to_value(&payload)?,
        })
    }

    /// An error response for a failed request.
    #[must_use]
    pub fn error_response(id: u64, err: &DexError) -> Self {
        let payload = ResponsePayload {
            result: None,
            error: Some(WireError::from(err)),
        };
        Self {
            mtype: MessageType::Response,
            id,
            route: String::new(),
            // ResponsePayload with concrete fields cannot fail to serialize.
            payload: serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Decode the payload as `T`.
    ///
    /// # Errors
    /// Returns `Parse` on a malformed payload.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| DexError::Parse(format!("route {}: {e}", self.route)))
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<serde_json::Value> {
    serde_json::to_value(v).map_err(|e| DexError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Order submission payloads
// ---------------------------------------------------------------------------

/// A funding coin and the proof the submitter controls it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinProof {
    pub id: CoinId,
    #[serde(default)]
    pub pubkeys: Vec<Vec<u8>>,
    #[serde(default)]
    pub sigs: Vec<Vec<u8>>,
    /// Redeem script for pay-to-script outputs; empty otherwise.
    #[serde(default)]
    pub redeem: Vec<u8>,
}

/// Proof that the client controls the receiving account of an
/// account-based redemption asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemSig {
    pub pubkey: Vec<u8>,
    pub sig: Vec<u8>,
}

/// Prefix fields common to the three order payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixWire {
    pub account_id: AccountId,
    pub base: AssetId,
    pub quote: AssetId,
    pub order_type: u8,
    /// Milliseconds since the Unix epoch.
    pub client_time: u64,
    /// Must be zero in requests; the server stamps it.
    #[serde(default)]
    pub server_time: u64,
    pub commit: Commitment,
}

/// Trade fields common to limit and market payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeWire {
    pub coins: Vec<CoinProof>,
    pub side: u8,
    pub quantity: u64,
    pub address: String,
}

/// The `limit` request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPayload {
    #[serde(flatten)]
    pub prefix: PrefixWire,
    #[serde(flatten)]
    pub trade: TradeWire,
    pub rate: u64,
    pub tif: u8,
    #[serde(default)]
    pub redeem_sig: Option<RedeemSig>,
    pub sig: Vec<u8>,
}

/// The `market` request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPayload {
    #[serde(flatten)]
    pub prefix: PrefixWire,
    #[serde(flatten)]
    pub trade: TradeWire,
    #[serde(default)]
    pub redeem_sig: Option<RedeemSig>,
    pub sig: Vec<u8>,
}

/// The `cancel` request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelPayload {
    #[serde(flatten)]
    pub prefix: PrefixWire,
    pub target_id: OrderId,
    pub sig: Vec<u8>,
}

fn wire_prefix(w: &PrefixWire, want: OrderType) -> Result<Prefix> {
    let order_type = OrderType::from_code(w.order_type)
        .ok_or_else(|| DexError::OrderParameter(format!("unknown order type {}", w.order_type)))?;
    if order_type != want {
        return Err(DexError::OrderParameter(format!(
            "wrong order type: wanted {want}, got {order_type}"
        )));
    }
    Ok(Prefix {
        account_id: w.account_id,
        base: w.base,
        quote: w.quote,
        order_type,
        client_time: crate::order::from_unix_ms(w.client_time as i64),
        server_time: None,
        commit: w.commit,
    })
}

fn wire_trade(w: &TradeWire) -> Result<Trade> {
    let sell = match w.side {
        SIDE_BUY => false,
        SIDE_SELL => true,
        other => {
            return Err(DexError::OrderParameter(format!(
                "invalid side value {other}"
            )))
        }
    };
    Ok(Trade {
        coins: w.coins.iter().map(|c| c.id.clone()).collect(),
        sell,
        quantity: w.quantity,
        address: w.address.clone(),
        filled: 0,
    })
}

impl LimitPayload {
    /// Construct the unstamped order this payload describes.
    ///
    /// # Errors
    /// Returns `OrderParameter` on an invalid type, side, or TiF code.
    pub fn to_order(&self) -> Result<LimitOrder> {
        let force = TimeInForce::from_code(self.tif)
            .ok_or_else(|| DexError::OrderParameter("unknown time-in-force".into()))?;
        Ok(LimitOrder {
            prefix: wire_prefix(&self.prefix, OrderType::Limit)?,
            trade: wire_trade(&self.trade)?,
            rate: self.rate,
            force,
        })
    }

    /// The bytes the client signed: the unstamped order serialization.
    ///
    /// # Errors
    /// Returns `OrderParameter` if the payload doesn't describe an order.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.to_order()?.serialize())
    }
}

impl MarketPayload {
    /// # Errors
    /// Returns `OrderParameter` on an invalid type or side code.
    pub fn to_order(&self) -> Result<MarketOrder> {
        Ok(MarketOrder {
            prefix: wire_prefix(&self.prefix, OrderType::Market)?,
            trade: wire_trade(&self.trade)?,
        })
    }

    /// # Errors
    /// Returns `OrderParameter` if the payload doesn't describe an order.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.to_order()?.serialize())
    }
}

impl CancelPayload {
    /// # Errors
    /// Returns `OrderParameter` on an invalid type code.
    pub fn to_order(&self) -> Result<CancelOrder> {
        Ok(CancelOrder {
            prefix: wire_prefix(&self.prefix, OrderType::Cancel)?,
            target_order_id: self.target_id,
        })
    }

    /// # Errors
    /// Returns `OrderParameter` if the payload doesn't describe an order.
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.to_order()?.serialize())
    }
}

/// The result sent back for an accepted order: the stamped times and the
/// now-valid order ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: OrderId,
    pub server_time: u64,
}

impl OrderResult {
    #[must_use]
    pub fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id(),
            server_time: order.prefix().server_time_ms() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Preimage round
// ---------------------------------------------------------------------------

/// Server→client request for an epoch order's preimage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreimageRequest {
    pub order_id: OrderId,
}

/// Client→server reply carrying the revealed preimage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreimageResponse {
    pub preimage: Preimage,
}

// ---------------------------------------------------------------------------
// Swap negotiation payloads
// ---------------------------------------------------------------------------

/// Client notification that it broadcast its swap contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitPayload {
    pub order_id: OrderId,
    pub match_id: MatchId,
    pub coin_id: CoinId,
    /// The serialized contract (script or call data).
    pub contract: Vec<u8>,
    pub sig: Vec<u8>,
}

/// Client notification that it redeemed the counterparty contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemPayload {
    pub order_id: OrderId,
    pub match_id: MatchId,
    pub coin_id: CoinId,
    /// The revealed swap secret. Empty in the taker's redeem.
    #[serde(default)]
    pub secret: Vec<u8>,
    pub sig: Vec<u8>,
}

/// Server→counterparty notification of an observed contract broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditNote {
    pub match_id: MatchId,
    pub order_id: OrderId,
    pub coin_id: CoinId,
    pub contract: Vec<u8>,
    pub time: u64,
}

/// Server→counterparty notification of an observed redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionNote {
    pub match_id: MatchId,
    pub order_id: OrderId,
    pub coin_id: CoinId,
    #[serde(default)]
    pub secret: Vec<u8>,
}

/// Server notification that a match was revoked for a missed deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeMatchNote {
    pub match_id: MatchId,
    pub order_id: OrderId,
}

/// A single entry in the `match_status` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStatusResult {
    pub match_id: MatchId,
    pub status: MatchStatus,
    #[serde(default)]
    pub maker_swap: Option<CoinId>,
    #[serde(default)]
    pub taker_swap: Option<CoinId>,
    #[serde(default)]
    pub maker_redeem: Option<CoinId>,
    #[serde(default)]
    pub taker_redeem: Option<CoinId>,
}

/// The `match_status` request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStatusRequest {
    pub match_ids: Vec<MatchId>,
}

/// The `connect` request: authenticates the session for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPayload {
    pub account_id: AccountId,
    /// Signature over the canonical serialization: account ID followed
    /// by the big-endian millisecond timestamp.
    pub time: u64,
    pub sig: Vec<u8>,
}

impl ConnectPayload {
    /// The bytes the client signs.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(40);
        out.extend_from_slice(self.account_id.as_bytes());
        crate::order::ser::push_u64(&mut out, self.time);
        out
    }
}

// ---------------------------------------------------------------------------
// Market data notifications
// ---------------------------------------------------------------------------

/// Epoch-close proof: everything an auditor needs to replay the shuffle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchProofNote {
    pub market: String,
    pub epoch_idx: i64,
    pub csum: [u8; 32],
    pub seed: [u8; 32],
    /// Revealed preimages in sorted-order-ID order.
    pub preimages: Vec<Preimage>,
    pub misses: Vec<OrderId>,
}

/// An order failed to match and was not booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoMatchNote {
    pub order_id: OrderId,
}

/// A standing order entered the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookOrderNote {
    pub market: String,
    pub order_id: OrderId,
    pub side: u8,
    pub rate: u64,
    pub quantity: u64,
    pub time: u64,
}

/// An order left the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbookOrderNote {
    pub market: String,
    pub order_id: OrderId,
}

/// An order was accepted into the current epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochOrderNote {
    pub market: String,
    pub epoch_idx: i64,
    pub order_id: OrderId,
    pub order_type: u8,
    pub side: u8,
    pub rate: u64,
    pub quantity: u64,
}

/// A booked order was partially filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRemainingNote {
    pub market: String,
    pub order_id: OrderId,
    pub remaining: u64,
}

/// Mid-gap spot rate after an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotsNote {
    pub market: String,
    pub epoch_idx: i64,
    pub rate: u64,
}

/// Rolling candle update for a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleUpdateNote {
    pub market: String,
    pub dur_ms: u64,
    pub stats: EpochStats,
}

/// Updated fee rate for an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyFeeNote {
    pub asset_id: AssetId,
    pub fee_rate: u64,
}

/// Scheduled or immediate market suspension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspensionNote {
    pub market: String,
    pub final_epoch: i64,
    pub suspend_time: u64,
    pub persist_book: bool,
}

/// A market was removed from service entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmarketNote {
    pub market: String,
}

/// The `epoch_report` notification payload is the full [`EpochResults`].
pub type EpochReportNote = EpochResults;
