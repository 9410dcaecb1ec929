//! Epoch records: the durable account of one sealed-auction round.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::OrderId;

/// The epoch index containing `now_ms` for the given duration:
/// `floor(now_ms / dur_ms)`.
#[must_use]
pub fn epoch_index(now_ms: i64, dur_ms: u64) -> i64 {
    now_ms.div_euclid(dur_ms as i64)
}

/// The millisecond timestamp at which the given epoch begins.
#[must_use]
pub fn epoch_start_ms(idx: i64, dur_ms: u64) -> i64 {
    idx * dur_ms as i64
}

/// Candle statistics for one epoch's matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochStats {
    /// Rate of the first trade match, zero if none.
    pub start_rate: u64,
    /// Rate of the last trade match, zero if none.
    pub end_rate: u64,
    pub high_rate: u64,
    pub low_rate: u64,
    /// Total matched base-asset volume.
    pub match_volume: u64,
    /// Total matched quote-asset volume.
    pub quote_volume: u64,
    /// Number of trade matches (cancel matches excluded).
    pub match_count: u32,
}

impl EpochStats {
    /// Fold one trade match into the running stats.
    pub fn add_match(&mut self, rate: u64, base_qty: u64, quote_qty: u64) {
        if self.match_count == 0 {
            self.start_rate = rate;
            self.high_rate = rate;
            self.low_rate = rate;
        }
        self.end_rate = rate;
        self.high_rate = self.high_rate.max(rate);
        self.low_rate = self.low_rate.min(rate);
        self.match_volume = self.match_volume.saturating_add(base_qty);
        self.quote_volume = self.quote_volume.saturating_add(quote_qty);
        self.match_count += 1;
    }
}

/// The archived record of a closed epoch: the commitment checksum and
/// shuffle seed (so any auditor can replay the shuffle), the orders that
/// revealed and missed, and the candle stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochResults {
    pub market: String,
    pub epoch_idx: i64,
    pub epoch_dur_ms: u64,
    pub match_time: DateTime<Utc>,
    /// SHA-256 over the commitments of all epoch orders, sorted by order ID.
    pub csum: [u8; 32],
    /// SHA-256 over `csum` and the revealed preimages, sorted by order ID.
    pub seed: [u8; 32],
    /// Orders whose preimage arrived and verified, in sorted-ID order.
    pub orders_revealed: Vec<OrderId>,
    /// Orders dropped for a missed or mismatched preimage.
    pub orders_missed: Vec<OrderId>,
    pub stats: EpochStats,
}

/// The final epoch index and close time of a market being suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendEpoch {
    pub idx: i64,
    pub end: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_index_buckets() {
        assert_eq!(epoch_index(0, 10_000), 0);
        assert_eq!(epoch_index(9_999, 10_000), 0);
        assert_eq!(epoch_index(10_000, 10_000), 1);
        assert_eq!(epoch_index(25_000, 10_000), 2);
    }

    #[test]
    fn epoch_start_inverts_index() {
        let dur = 7_500;
        for ms in [0_i64, 7_499, 7_500, 1_000_000] {
            let idx = epoch_index(ms, dur);
            assert!(epoch_start_ms(idx, dur) <= ms);
            assert!(ms < epoch_start_ms(idx + 1, dur));
        }
    }

    #[test]
    fn stats_track_extremes() {
        let mut stats = EpochStats::default();
        stats.add_match(100, 10, 1_000);
        stats.add_match(50, 10, 500);
        stats.add_match(200, 10, 2_000);
        assert_eq!(stats.start_rate, 100);
        assert_eq!(stats.end_rate, 200);
        assert_eq!(stats.high_rate, 200);
        assert_eq!(stats.low_rate, 50);
        assert_eq!(stats.match_volume, 30);
        assert_eq!(stats.quote_volume, 3_500);
        assert_eq!(stats.match_count, 3);
    }

    #[test]
    fn empty_stats_are_zero() {
        let stats = EpochStats::default();
        assert_eq!(stats.match_count, 0);
        assert_eq!(stats.low_rate, 0);
    }
}
