//! System-wide constants for the swapmatch server.

use rust_decimal::Decimal;

/// Size in bytes of an order commitment (SHA-256 of the preimage).
pub const COMMITMENT_SIZE: usize = 32;

/// Size in bytes of an order preimage.
pub const PREIMAGE_SIZE: usize = 32;

/// Maximum allowed client clock offset in milliseconds (10 minutes).
pub const MAX_CLOCK_OFFSET_MS: i64 = 600_000;

/// How long the order router waits for an undiscovered funding coin before
/// failing the order with `TransactionUndiscovered`.
pub const FUNDING_COIN_WAIT_MS: u64 = 60_000;

/// Tick interval of the router's latency queue.
pub const LATENCY_QUEUE_TICK_MS: u64 = 2_000;

/// Per-query deadline for a single backend coin lookup.
pub const COIN_QUERY_TIMEOUT_MS: u64 = 1_000;

/// Default deadline for a wire request awaiting its response.
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Deadline for a client to answer a preimage request after epoch close.
pub const PREIMAGE_REQUEST_TIMEOUT_MS: u64 = 20_000;

/// Default epoch duration for a market that does not configure one.
pub const DEFAULT_EPOCH_DURATION_MS: u64 = 10_000;

/// Initial capacity of one side (buy or sell) of an order book: 2^16 orders.
pub const BOOK_HALF_CAPACITY: usize = 1 << 16;

/// Default market-buy buffer: the minimum quote-asset quantity of a market
/// buy order is this multiple of one lot's worth at the mid-gap rate.
#[must_use]
pub fn default_market_buy_buffer() -> Decimal {
    Decimal::new(125, 2) // 1.25
}

/// Zero-confirmation funding coins must carry a fee rate of at least this
/// fraction of the last known fee rate for the asset.
#[must_use]
pub fn zero_conf_fee_rate_threshold() -> Decimal {
    Decimal::new(9, 1) // 0.9
}

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name, used in log banners and the `connect` response.
pub const SERVER_NAME: &str = "swapmatch";
