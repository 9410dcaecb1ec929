//! Rate and fee arithmetic shared by the router, matcher, and balancer.
//!
//! Rates are integers in units of quote atoms per *rate-encoding unit* of
//! the base asset, so conversions multiply or divide by
//! [`RATE_ENCODING_FACTOR`]. All intermediate products widen to u128 to
//! avoid overflow for large quantities.

use crate::asset::Asset;

/// The base-asset quantity that one rate unit prices (1e8 atoms).
pub const RATE_ENCODING_FACTOR: u64 = 100_000_000;

/// Convert a base-asset quantity to its quote-asset value at `rate`.
#[must_use]
pub fn base_to_quote(rate: u64, base_qty: u64) -> u64 {
    let quote = u128::from(rate) * u128::from(base_qty) / u128::from(RATE_ENCODING_FACTOR);
    u64::try_from(quote).unwrap_or(u64::MAX)
}

/// Convert a quote-asset value to the base-asset quantity it buys at `rate`.
/// A zero rate yields zero rather than dividing by it.
#[must_use]
pub fn quote_to_base(rate: u64, quote_qty: u64) -> u64 {
    if rate == 0 {
        return 0;
    }
    let base = u128::from(quote_qty) * u128::from(RATE_ENCODING_FACTOR) / u128::from(rate);
    u64::try_from(base).unwrap_or(u64::MAX)
}

/// The minimum funding value required to back an order.
///
/// For UTXO assets the client must fund the traded quantity plus worst-case
/// swap fees: one transaction carrying the funding inputs and the first
/// contract output, then one more contract per remaining lot, all at the
/// asset's max fee rate. Account-based assets carry no spend size; their
/// fee headroom is checked by the balancer instead.
#[must_use]
pub fn required_order_funds(qty: u64, spend_size: u64, lots: u64, asset: &Asset) -> u64 {
    let swap_bytes = spend_size
        + asset.swap_size_base
        + lots.saturating_sub(1).saturating_mul(asset.swap_size);
    qty.saturating_add(swap_bytes.saturating_mul(asset.max_fee_rate))
}
