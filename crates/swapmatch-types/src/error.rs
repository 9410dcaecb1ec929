//! Error types for the swapmatch server.
//!
//! All errors use the `SM_ERR_` prefix convention for easy grepping in logs.
//! The numeric code embedded in each message is also the stable wire code
//! returned in error responses (see [`DexError::code`]). Codes are grouped
//! by subsystem:
//! - 1xx: request / order validation errors
//! - 2xx: funding and balance errors
//! - 3xx: market / epoch errors
//! - 4xx: swap negotiation errors
//! - 9xx: internal errors (never exposed in detail)

use thiserror::Error;

use crate::{AccountId, CoinId, MatchId, OrderId};

/// Central error enum for all swapmatch operations.
#[derive(Debug, Error)]
pub enum DexError {
    // =================================================================
    // Request / order validation (1xx)
    // =================================================================
    /// The request payload could not be decoded.
    #[error("SM_ERR_100: parse error: {0}")]
    Parse(String),

    /// A signature on a signed message failed verification.
    #[error("SM_ERR_101: signature error: {0}")]
    Signature(String),

    /// Schema-valid but contract-violating order fields.
    #[error("SM_ERR_102: order parameter error: {0}")]
    OrderParameter(String),

    /// The base/quote pair is not served.
    #[error("SM_ERR_103: unknown market {0}")]
    UnknownMarket(String),

    /// The market exists but is not accepting this request.
    #[error("SM_ERR_104: market not running: {0}")]
    MarketNotRunning(String),

    /// Client clock offset exceeds the allowed range.
    #[error("SM_ERR_105: clock offset of {offset_ms} ms exceeds maximum {max_ms} ms")]
    ClockRange { offset_ms: i64, max_ms: i64 },

    /// An order with this ID already exists.
    #[error("SM_ERR_106: order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// The requested order was not found.
    #[error("SM_ERR_107: order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order quantity exceeds the user's settling limit.
    #[error("SM_ERR_108: order quantity too high for user {0}")]
    QuantityTooHigh(AccountId),

    // =================================================================
    // Funding and balance (2xx)
    // =================================================================
    /// Missing, insufficient, or locked funds.
    #[error("SM_ERR_200: funding error: {0}")]
    Funding(String),

    /// A funding coin is not controlled by the claimed pubkeys.
    #[error("SM_ERR_201: coin authorization failed for coin {0}")]
    CoinAuth(CoinId),

    /// A funding coin never appeared within the funding-wait window.
    #[error("SM_ERR_202: transaction undiscovered: {0}")]
    TransactionUndiscovered(String),

    /// The coin was not found by the backend (retryable inside the router).
    #[error("SM_ERR_203: coin not found: {0}")]
    CoinNotFound(CoinId),

    /// A backend query exceeded its deadline (retryable inside the router).
    #[error("SM_ERR_204: backend request timed out")]
    RequestTimeout,

    /// The coin is already committed to an active order or match.
    #[error("SM_ERR_205: coin {coin} is locked by order {holder}")]
    CoinLocked { coin: CoinId, holder: OrderId },

    // =================================================================
    // Market / epoch (3xx)
    // =================================================================
    /// A preimage response did not hash to the recorded commitment.
    #[error("SM_ERR_300: preimage does not match commitment for order {0}")]
    PreimageMismatch(OrderId),

    /// The epoch is closed to new orders.
    #[error("SM_ERR_301: epoch {0} is closed")]
    EpochClosed(i64),

    // =================================================================
    // Swap negotiation (4xx)
    // =================================================================
    /// The match is unknown or no longer active.
    #[error("SM_ERR_400: match not found: {0}")]
    MatchNotFound(MatchId),

    /// The acknowledged action does not apply in the match's current state.
    #[error("SM_ERR_401: wrong match state for {match_id}: {detail}")]
    WrongMatchState { match_id: MatchId, detail: String },

    /// The match was revoked after a missed broadcast deadline.
    #[error("SM_ERR_402: match revoked: {0}")]
    MatchRevoked(MatchId),

    // =================================================================
    // Internal (9xx): details are logged, never sent to clients
    // =================================================================
    /// Operator-side failure. The display string is safe for the wire.
    #[error("SM_ERR_900: internal server error")]
    RpcInternal(String),

    /// The archive rejected a write; the owning market must shut down.
    #[error("SM_ERR_901: archive failure")]
    ArchiveFailure(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("SM_ERR_902: configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, network).
    #[error("SM_ERR_903: I/O error: {0}")]
    Io(String),
}

impl DexError {
    /// The stable numeric wire code for this error. Internal variants all
    /// map to the `RpcInternal` code so operator detail never leaks.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Parse(_) => 100,
            Self::Signature(_) => 101,
            Self::OrderParameter(_) => 102,
            Self::UnknownMarket(_) => 103,
            Self::MarketNotRunning(_) => 104,
            Self::ClockRange { .. } => 105,
            Self::DuplicateOrder(_) => 106,
            Self::OrderNotFound(_) => 107,
            Self::QuantityTooHigh(_) => 108,
            Self::Funding(_) => 200,
            Self::CoinAuth(_) => 201,
            Self::TransactionUndiscovered(_) => 202,
            Self::CoinNotFound(_) => 203,
            Self::RequestTimeout => 204,
            Self::CoinLocked { .. } => 205,
            Self::PreimageMismatch(_) => 300,
            Self::EpochClosed(_) => 301,
            Self::MatchNotFound(_) => 400,
            Self::WrongMatchState { .. } => 401,
            Self::MatchRevoked(_) => 402,
            Self::RpcInternal(_) | Self::ArchiveFailure(_) | Self::Io(_) => 900,
            Self::Configuration(_) => 902,
        }
    }

    /// Whether the router's latency queue should retry the failed coin
    /// lookup instead of failing the order.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CoinNotFound(_) | Self::RequestTimeout)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, DexError>;

impl From<std::io::Error> for DexError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
