//! The epoch matcher.
//!
//! At epoch close the market freezes the queue and runs the preimage
//! round; what arrives here is the set of revealed orders, the misses,
//! and the commitments of every order the epoch held. Matching is then a
//! pure function of those inputs: derive the seed, shuffle, and walk the
//! shuffled sequence against the book. Wall-clock arrival order plays no
//! part.
//!
//! Fills always execute at the resting maker's rate (price-time priority
//! favors the resting order). Standing residuals book immediately during
//! the walk, so an order later in the shuffle can match a standing
//! residual booked earlier in the same epoch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use swapmatch_types::epoch::EpochStats;
use swapmatch_types::{
    calc, Commitment, LimitOrder, Match, MarketOrder, Order, OrderId, Preimage, TimeInForce,
};
use tracing::{debug, info, warn};

use crate::book::{Book, FillResult};
use crate::shuffle::{commitment_checksum, shuffle_orders, shuffle_seed};

/// The verdict of the preimage round.
#[derive(Debug, Default)]
pub struct PreimageOutcome {
    /// Orders whose preimage arrived and hashes to the commitment.
    pub revealed: Vec<(Order, Preimage)>,
    /// Orders dropped for a missing or mismatched preimage.
    pub misses: Vec<OrderId>,
}

/// Check each epoch order's preimage response against its commitment.
/// Mismatches and absent responses are misses; a miss drops only that
/// order, never the epoch.
#[must_use]
pub fn validate_preimages(
    epoch_orders: Vec<Order>,
    responses: &HashMap<OrderId, Preimage>,
) -> PreimageOutcome {
    let mut outcome = PreimageOutcome::default();
    for order in epoch_orders {
        let oid = order.id();
        match responses.get(&oid) {
            Some(pi) if pi.commitment() == order.commitment() => {
                outcome.revealed.push((order, *pi));
            }
            Some(_) => {
                warn!(order = %oid, "preimage does not hash to commitment");
                outcome.misses.push(oid);
            }
            None => {
                debug!(order = %oid, "no preimage response");
                outcome.misses.push(oid);
            }
        }
    }
    outcome
}

/// Everything an epoch's matching produced: the matches, the book deltas,
/// and the proof material (checksum, seed, reveals, misses).
#[derive(Debug)]
pub struct MatchResults {
    pub epoch_idx: i64,
    pub csum: [u8; 32],
    pub seed: [u8; 32],
    pub matches: Vec<Match>,
    /// Standing residuals inserted into the book this epoch.
    pub booked: Vec<LimitOrder>,
    /// Makers removed from the book (fully filled or cancelled).
    pub unbooked: Vec<LimitOrder>,
    /// Partial maker fills: `(order, remaining)`.
    pub updated: Vec<(OrderId, u64)>,
    /// Epoch orders that died with no match at all.
    pub nomatched: Vec<OrderId>,
    /// Revealed order IDs in sorted order (the proof ordering).
    pub revealed: Vec<OrderId>,
    /// Revealed preimages, index-aligned with `revealed`.
    pub preimages: Vec<Preimage>,
    pub misses: Vec<OrderId>,
    pub stats: EpochStats,
}

/// Run one closed epoch against the book.
///
/// `commits_sorted` holds the commitments of *every* order the epoch
/// accepted, misses included, in sorted order-ID order; the checksum
/// commits to the full epoch while the seed mixes in only the revealed
/// preimages.
#[must_use]
pub fn match_epoch(
    book: &Book,
    epoch_idx: i64,
    commits_sorted: &[Commitment],
    outcome: PreimageOutcome,
    match_time: DateTime<Utc>,
) -> MatchResults {
    let csum = commitment_checksum(commits_sorted);

    // Proof ordering: revealed orders sorted by ID.
    let mut revealed = outcome.revealed;
    revealed.sort_unstable_by_key(|(order, _)| order.id());
    let revealed_ids: Vec<OrderId> = revealed.iter().map(|(o, _)| o.id()).collect();
    let preimages: Vec<Preimage> = revealed.iter().map(|(_, pi)| *pi).collect();
    let seed = shuffle_seed(&csum, &preimages);

    let mut queue: Vec<Order> = revealed.into_iter().map(|(o, _)| o).collect();
    shuffle_orders(seed, &mut queue);

    let mut run = MatchRun {
        book,
        epoch_idx,
        match_time,
        results: MatchResults {
            epoch_idx,
            csum,
            seed,
            matches: Vec::new(),
            booked: Vec::new(),
            unbooked: Vec::new(),
            updated: Vec::new(),
            nomatched: Vec::new(),
            revealed: revealed_ids,
            preimages,
            misses: outcome.misses,
            stats: EpochStats::default(),
        },
    };

    for order in queue {
        match order {
            Order::Cancel(co) => run.match_cancel(&co),
            Order::Limit(lo) => run.match_limit(lo),
            Order::Market(mo) => run.match_market(mo),
        }
    }

    info!(
        epoch = epoch_idx,
        matches = run.results.matches.len(),
        booked = run.results.booked.len(),
        misses = run.results.misses.len(),
        seed = hex::encode(run.results.seed),
        "epoch matching complete"
    );

    run.results
}

struct MatchRun<'a> {
    book: &'a Book,
    epoch_idx: i64,
    match_time: DateTime<Utc>,
    results: MatchResults,
}

impl MatchRun<'_> {
    /// A cancel pairs with its target as a zero-quantity match. The
    /// target must be a booked standing limit owned by the same account;
    /// anything else and the cancel dies unmatched.
    fn match_cancel(&mut self, co: &swapmatch_types::CancelOrder) {
        let target = self.book.order(&co.target_order_id);
        match target {
            Some(lo) if lo.prefix.account_id == co.prefix.account_id => {
                if let Some(removed) = self.book.remove(&co.target_order_id) {
                    debug!(target = %co.target_order_id, "cancel matched");
                    self.results.matches.push(Match::cancellation(
                        &removed,
                        co,
                        self.epoch_idx,
                        self.match_time,
                    ));
                    self.results.unbooked.push(removed);
                    return;
                }
                self.results.nomatched.push(co.id());
            }
            _ => {
                debug!(target = %co.target_order_id, "cancel target not cancelable");
                self.results.nomatched.push(co.id());
            }
        }
    }

    /// Match a limit taker while the opposite best price crosses its
    /// rate, then book or cancel the residual per time-in-force.
    fn match_limit(&mut self, mut lo: LimitOrder) {
        let taker = Order::Limit(lo.clone());
        while lo.remaining() > 0 {
            let maker = if lo.trade.sell {
                match self.book.best_buy() {
                    Some(m) if m.rate >= lo.rate => m,
                    _ => break,
                }
            } else {
                match self.book.best_sell() {
                    Some(m) if m.rate <= lo.rate => m,
                    _ => break,
                }
            };
            let fill = lo.remaining().min(maker.remaining());
            self.execute(&maker, &taker, fill);
            lo.trade.filled += fill;
        }

        if lo.remaining() == 0 {
            return;
        }
        match lo.force {
            TimeInForce::Standing => {
                if self.book.insert(lo.clone()) {
                    self.results.booked.push(lo);
                } else {
                    warn!(order = %lo.id(), "book refused standing residual");
                    self.results.nomatched.push(lo.id());
                }
            }
            TimeInForce::Immediate => {
                if lo.trade.filled == 0 {
                    self.results.nomatched.push(lo.id());
                }
                // A partially filled immediate order's residual just dies.
            }
        }
    }

    fn match_market(&mut self, mo: MarketOrder) {
        if mo.trade.sell {
            self.match_market_sell(mo);
        } else {
            self.match_market_buy(mo);
        }
    }

    /// Market sell: base-denominated, greedy against the buy side until
    /// filled or the book is exhausted.
    fn match_market_sell(&mut self, mut mo: MarketOrder) {
        let taker = Order::Market(mo.clone());
        while mo.trade.remaining() > 0 {
            let Some(maker) = self.book.best_buy() else {
                break;
            };
            let fill = mo.trade.remaining().min(maker.remaining());
            self.execute(&maker, &taker, fill);
            mo.trade.filled += fill;
        }
        if mo.trade.filled == 0 {
            self.results.nomatched.push(mo.id());
        }
    }

    /// Market buy: quote-denominated. Consumes sell-side liquidity until
    /// the remaining quote value cannot buy one lot at the best ask; the
    /// sub-lot residual is cancelled, never matched.
    fn match_market_buy(&mut self, mut mo: MarketOrder) {
        let taker = Order::Market(mo.clone());
        let lot_size = self.book.lot_size();
        while mo.trade.remaining() > 0 {
            let Some(maker) = self.book.best_sell() else {
                break;
            };
            let base_equiv = calc::quote_to_base(maker.rate, mo.trade.remaining());
            let lots = base_equiv / lot_size;
            if lots == 0 {
                break;
            }
            // Fills are whole lots, so a partially filled maker stays
            // lot-aligned in the book.
            let fill = (lots * lot_size).min(maker.remaining());
            self.execute(&maker, &taker, fill);
            mo.trade.filled += calc::base_to_quote(maker.rate, fill);
        }
        if mo.trade.filled == 0 {
            self.results.nomatched.push(mo.id());
        }
    }

    /// Record a fill of `qty` against the booked maker at the maker's
    /// rate, updating the book in place.
    fn execute(&mut self, maker: &LimitOrder, taker: &Order, qty: u64) {
        let m = Match::trade(maker, taker, qty, self.epoch_idx, self.match_time);
        self.results
            .stats
            .add_match(m.rate, m.base_qty, m.quote_qty);
        debug!(
            maker = %m.maker_order,
            taker = %m.taker_order,
            rate = m.rate,
            qty = m.quantity,
            "match"
        );
        self.results.matches.push(m);

        let maker_id = maker.id();
        match self.book.fill(&maker_id, qty) {
            Some(FillResult::Filled(done)) => self.results.unbooked.push(done),
            Some(FillResult::Partial(remaining)) => {
                self.results.updated.push((maker_id, remaining));
            }
            None => warn!(order = %maker_id, "fill against vanished maker"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_tracker::AccountTracking;
    use swapmatch_types::order::{from_unix_ms, test_orders};
    use swapmatch_types::{AccountId, CancelOrder, OrderType, Prefix};

    const LOT: u64 = 100_000_000;
    const RATE: u64 = 1_000_000;

    fn book() -> Book {
        Book::new(LOT, AccountTracking::none())
    }

    fn reveal(orders: Vec<Order>) -> (Vec<Commitment>, PreimageOutcome) {
        // test_orders commitments open with the user-byte preimage.
        let mut with_ids: Vec<(OrderId, Order)> = orders.into_iter().map(|o| (o.id(), o)).collect();
        with_ids.sort_unstable_by_key(|(oid, _)| *oid);
        let commits = with_ids.iter().map(|(_, o)| o.commitment()).collect();
        let responses: HashMap<OrderId, Preimage> = with_ids
            .iter()
            .map(|(oid, o)| (*oid, Preimage(o.user().0)))
            .collect();
        let outcome =
            validate_preimages(with_ids.into_iter().map(|(_, o)| o).collect(), &responses);
        (commits, outcome)
    }

    fn run(book: &Book, orders: Vec<Order>) -> MatchResults {
        let (commits, outcome) = reveal(orders);
        match_epoch(book, 1, &commits, outcome, from_unix_ms(50_000))
    }

    #[test]
    fn trivial_cross_fills_at_maker_rate() {
        let b = book();
        let maker = test_orders::limit(1, true, RATE, LOT, 10_000);
        b.insert(maker.clone());

        let taker = test_orders::limit(2, false, RATE, LOT, 20_000);
        let results = run(&b, vec![Order::Limit(taker.clone())]);

        assert_eq!(results.matches.len(), 1);
        let m = &results.matches[0];
        assert_eq!(m.rate, RATE);
        assert_eq!(m.quantity, LOT);
        assert_eq!(m.maker_order, maker.id());
        assert_eq!(m.taker_order, taker.id());
        // Both orders are gone from the book.
        assert_eq!(b.buy_count() + b.sell_count(), 0);
        assert_eq!(results.unbooked.len(), 1);
        assert!(results.booked.is_empty());
    }

    #[test]
    fn price_time_priority_fills_earlier_maker() {
        let b = book();
        let early = test_orders::limit(1, true, RATE, LOT, 10_000);
        let late = test_orders::limit(2, true, RATE, LOT, 11_000);
        b.insert(late.clone());
        b.insert(early.clone());

        let taker = test_orders::limit(3, false, RATE, LOT, 20_000);
        let results = run(&b, vec![Order::Limit(taker)]);

        assert_eq!(results.matches.len(), 1);
        assert_eq!(results.matches[0].maker_order, early.id());
        assert!(b.have_order(&late.id()));
        assert!(!b.have_order(&early.id()));
    }

    #[test]
    fn limit_does_not_cross_worse_price() {
        let b = book();
        b.insert(test_orders::limit(1, true, 2 * RATE, LOT, 10_000));

        let taker = test_orders::limit(2, false, RATE, LOT, 20_000);
        let results = run(&b, vec![Order::Limit(taker.clone())]);

        assert!(results.matches.is_empty());
        // Standing residual booked instead.
        assert_eq!(results.booked.len(), 1);
        assert!(b.have_order(&taker.id()));
    }

    #[test]
    fn immediate_residual_dies() {
        let b = book();
        b.insert(test_orders::limit(1, true, RATE, LOT, 10_000));

        let mut taker = test_orders::limit(2, false, RATE, 2 * LOT, 20_000);
        taker.force = TimeInForce::Immediate;
        let results = run(&b, vec![Order::Limit(taker.clone())]);

        assert_eq!(results.matches.len(), 1);
        assert_eq!(results.matches[0].quantity, LOT);
        assert!(!b.have_order(&taker.id()));
        // Partially filled: not a nomatch.
        assert!(results.nomatched.is_empty());
    }

    #[test]
    fn unfilled_immediate_is_nomatch() {
        let b = book();
        let mut taker = test_orders::limit(2, false, RATE, LOT, 20_000);
        taker.force = TimeInForce::Immediate;
        let results = run(&b, vec![Order::Limit(taker.clone())]);
        assert_eq!(results.nomatched, vec![taker.id()]);
    }

    #[test]
    fn partial_fill_updates_maker_in_place() {
        let b = book();
        let maker = test_orders::limit(1, true, RATE, 3 * LOT, 10_000);
        b.insert(maker.clone());

        let taker = test_orders::limit(2, false, RATE, LOT, 20_000);
        let results = run(&b, vec![Order::Limit(taker)]);

        assert_eq!(results.matches.len(), 1);
        assert_eq!(results.updated, vec![(maker.id(), 2 * LOT)]);
        assert_eq!(b.order(&maker.id()).unwrap().remaining(), 2 * LOT);
    }

    #[test]
    fn market_sell_walks_the_buy_side() {
        let b = book();
        b.insert(test_orders::limit(1, false, 2 * RATE, LOT, 10_000));
        b.insert(test_orders::limit(2, false, RATE, LOT, 11_000));

        let taker = test_orders::market(3, true, 2 * LOT, 20_000);
        let results = run(&b, vec![Order::Market(taker)]);

        assert_eq!(results.matches.len(), 2);
        // Best (highest) buy first.
        assert_eq!(results.matches[0].rate, 2 * RATE);
        assert_eq!(results.matches[1].rate, RATE);
        assert_eq!(b.buy_count(), 0);
    }

    #[test]
    fn market_buy_buffer_residual_is_cancelled() {
        let b = book();
        // One lot on offer at RATE; lot-worth in quote = LOT*RATE/1e8.
        b.insert(test_orders::limit(1, true, RATE, LOT, 10_000));
        let lot_worth = calc::base_to_quote(RATE, LOT);

        // Quote quantity of 1.5 lot-worths.
        let taker = test_orders::market(2, false, lot_worth * 3 / 2, 20_000);
        let results = run(&b, vec![Order::Market(taker.clone())]);

        assert_eq!(results.matches.len(), 1);
        assert_eq!(results.matches[0].quantity, LOT);
        // The half-lot residual matched nothing and the order is done.
        assert!(results.nomatched.is_empty());
        assert_eq!(b.sell_count(), 0);
    }

    #[test]
    fn market_buy_fills_whole_lots_against_deep_maker() {
        let b = book();
        // A 3-lot maker: fills are bounded by the quote, not the maker.
        let maker = test_orders::limit(1, true, RATE, 3 * LOT, 10_000);
        b.insert(maker.clone());
        let lot_worth = calc::base_to_quote(RATE, LOT);

        // 1.5 lot-worths of quote buys exactly one lot; the half-lot
        // residual cannot round the maker off lot alignment.
        let taker = test_orders::market(2, false, lot_worth * 3 / 2, 20_000);
        let results = run(&b, vec![Order::Market(taker)]);

        assert_eq!(results.matches.len(), 1);
        assert_eq!(results.matches[0].quantity, LOT);
        assert_eq!(results.updated, vec![(maker.id(), 2 * LOT)]);
        let resting = b.order(&maker.id()).unwrap();
        assert_eq!(resting.remaining(), 2 * LOT);
        assert_eq!(resting.remaining() % LOT, 0);
    }

    #[test]
    fn market_buy_sub_lot_quote_is_nomatch() {
        let b = book();
        b.insert(test_orders::limit(1, true, RATE, LOT, 10_000));
        let lot_worth = calc::base_to_quote(RATE, LOT);

        let taker = test_orders::market(2, false, lot_worth / 2, 20_000);
        let results = run(&b, vec![Order::Market(taker.clone())]);

        assert!(results.matches.is_empty());
        assert_eq!(results.nomatched, vec![taker.id()]);
        assert!(b.have_order(&test_orders::limit(1, true, RATE, LOT, 10_000).id()));
    }

    #[test]
    fn cancel_removes_standing_target() {
        let b = book();
        let target = test_orders::limit(1, true, RATE, LOT, 10_000);
        b.insert(target.clone());

        let co = CancelOrder {
            prefix: Prefix {
                account_id: target.prefix.account_id,
                base: target.prefix.base,
                quote: target.prefix.quote,
                order_type: OrderType::Cancel,
                client_time: from_unix_ms(20_000),
                server_time: Some(from_unix_ms(20_010)),
                commit: Preimage([1; 32]).commitment(),
            },
            target_order_id: target.id(),
        };
        let results = run(&b, vec![Order::Cancel(co)]);

        assert_eq!(results.matches.len(), 1);
        assert!(results.matches[0].is_cancellation());
        assert_eq!(results.matches[0].quantity, 0);
        assert!(!b.have_order(&target.id()));
    }

    #[test]
    fn cancel_by_stranger_fails() {
        let b = book();
        let target = test_orders::limit(1, true, RATE, LOT, 10_000);
        b.insert(target.clone());

        let co = CancelOrder {
            prefix: Prefix {
                account_id: AccountId::from_bytes([9; 32]),
                base: target.prefix.base,
                quote: target.prefix.quote,
                order_type: OrderType::Cancel,
                client_time: from_unix_ms(20_000),
                server_time: Some(from_unix_ms(20_010)),
                commit: Preimage([9; 32]).commitment(),
            },
            target_order_id: target.id(),
        };
        let results = run(&b, vec![Order::Cancel(co.clone())]);

        assert!(results.matches.is_empty());
        assert_eq!(results.nomatched, vec![co.id()]);
        assert!(b.have_order(&target.id()));
    }

    #[test]
    fn missed_preimage_drops_only_that_order() {
        let b = book();
        b.insert(test_orders::limit(1, true, RATE, 2 * LOT, 10_000));

        let good = Order::Limit(test_orders::limit(2, false, RATE, LOT, 20_000));
        let missing = Order::Limit(test_orders::limit(3, false, RATE, LOT, 21_000));

        let mut all: Vec<(OrderId, Order)> = vec![
            (good.id(), good.clone()),
            (missing.id(), missing.clone()),
        ];
        all.sort_unstable_by_key(|(oid, _)| *oid);
        let commits: Vec<Commitment> = all.iter().map(|(_, o)| o.commitment()).collect();
        // Only the good order answers.
        let responses = HashMap::from([(good.id(), Preimage(good.user().0))]);
        let outcome =
            validate_preimages(all.into_iter().map(|(_, o)| o).collect(), &responses);

        let results = match_epoch(&b, 1, &commits, outcome, from_unix_ms(50_000));
        assert_eq!(results.misses, vec![missing.id()]);
        assert_eq!(results.matches.len(), 1);
        assert_eq!(results.matches[0].taker_order, good.id());
    }

    #[test]
    fn mismatched_preimage_is_a_miss() {
        let order = Order::Limit(test_orders::limit(1, true, RATE, LOT, 10_000));
        let responses = HashMap::from([(order.id(), Preimage([0xff; 32]))]);
        let outcome = validate_preimages(vec![order.clone()], &responses);
        assert!(outcome.revealed.is_empty());
        assert_eq!(outcome.misses, vec![order.id()]);
    }

    #[test]
    fn matching_is_deterministic_across_runs() {
        let seed_book = || {
            let b = book();
            b.insert(test_orders::limit(10, true, 2 * RATE, 2 * LOT, 10_000));
            b.insert(test_orders::limit(11, true, RATE, LOT, 10_500));
            b.insert(test_orders::limit(12, false, RATE / 2, LOT, 11_000));
            b
        };
        let epoch_orders = || {
            vec![
                Order::Limit(test_orders::limit(1, false, 2 * RATE, LOT, 20_000)),
                Order::Limit(test_orders::limit(2, false, RATE, LOT, 21_000)),
                Order::Market(test_orders::market(3, true, LOT, 22_000)),
                Order::Limit(test_orders::limit(4, true, RATE, LOT, 23_000)),
            ]
        };

        let b1 = seed_book();
        let r1 = run(&b1, epoch_orders());
        let b2 = seed_book();
        // Same orders submitted in a different arrival order.
        let mut reversed = epoch_orders();
        reversed.reverse();
        let r2 = run(&b2, reversed);

        assert_eq!(r1.seed, r2.seed);
        assert_eq!(r1.csum, r2.csum);
        let ids =
            |r: &MatchResults| r.matches.iter().map(|m| m.id).collect::<Vec<_>>();
        assert_eq!(ids(&r1), ids(&r2));
        assert_eq!(b1.buy_orders(), b2.buy_orders());
        assert_eq!(b1.sell_orders(), b2.sell_orders());
    }

    #[test]
    fn standing_residual_matches_later_epoch_mate() {
        // A standing sell booked mid-walk can fill a later buy in the
        // same epoch. With a single-order book side and one crossing
        // buy, whichever shuffle order results, the pair must trade.
        let b = book();
        let sell = test_orders::limit(1, true, RATE, LOT, 20_000);
        let buy = test_orders::limit(2, false, RATE, LOT, 21_000);
        let results = run(&b, vec![Order::Limit(sell), Order::Limit(buy)]);
        assert_eq!(results.matches.len(), 1);
        assert_eq!(b.buy_count() + b.sell_count(), 0);
    }

    #[test]
    fn stats_aggregate_trade_matches() {
        let b = book();
        b.insert(test_orders::limit(1, true, RATE, LOT, 10_000));
        b.insert(test_orders::limit(2, true, 2 * RATE, LOT, 10_500));

        let taker = test_orders::limit(3, false, 2 * RATE, 2 * LOT, 20_000);
        let results = run(&b, vec![Order::Limit(taker)]);

        assert_eq!(results.stats.match_count, 2);
        assert_eq!(results.stats.low_rate, RATE);
        assert_eq!(results.stats.high_rate, 2 * RATE);
        assert_eq!(results.stats.match_volume, 2 * LOT);
    }
}
