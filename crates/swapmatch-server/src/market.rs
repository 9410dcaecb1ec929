//! The per-market pipeline.
//!
//! A [`Market`] owns one book and one live epoch. Ingress submissions
//! stamp the server time under the epoch gate's lock (stamps are
//! monotonic per market) and commit their coin locks before the order is
//! visible to anything else. The epoch loop closes each window, runs the
//! preimage round with one concurrent request per order, matches the
//! survivors, applies the book deltas, and hands trade matches to the
//! swap coordinator. Archive write failures halt the market; other
//! markets are unaffected.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use swapmatch_ingress::{
    AccountCommitments, AuthManager, BalanceSource, CoinLocker, MarketTunnel, OrderRecord,
};
use swapmatch_matchcore::{match_epoch, validate_preimages, Book, Epoch, MatchResults};
use swapmatch_matchcore::account_tracker::AccountTracking;
use swapmatch_swap::SwapCoordinator;
use swapmatch_types::epoch::{epoch_start_ms, EpochResults};
use swapmatch_types::msgs::{
    BookOrderNote, CandleUpdateNote, EpochOrderNote, MatchProofNote, NoMatchNote, OrderResult,
    SpotsNote, SuspensionNote, UnbookOrderNote, UpdateRemainingNote, SIDE_BUY, SIDE_SELL,
};
use swapmatch_types::order::{from_unix_ms, unix_ms};
use swapmatch_types::{
    calc, constants, AccountId, AssetId, BackedAsset, CoinId, Commitment, DexError, LimitOrder,
    MarketConfig, Match, MatchId, Order, OrderId, Preimage, Result, SuspendEpoch,
};
use tracing::{debug, error, info, warn};

use crate::archive::Archive;
use crate::notify::Feed;

/// Epoch gate: everything that must change together under one lock.
struct EpochGate {
    epoch: Epoch,
    closed: VecDeque<Epoch>,
    running: bool,
    /// `(final_epoch_idx, persist_book)` once a suspension is scheduled.
    suspend: Option<(i64, bool)>,
    /// Set when a purge suspension takes effect; consumed by the next tick.
    purge_pending: bool,
    last_stamp_ms: i64,
}

/// An order with live matches still settling: the in-flight quantities
/// keep counting against account balances until the swaps terminate.
struct Settling {
    order: Order,
    matched: HashMap<MatchId, u64>,
}

/// One market: book, epoch queue, and the apply pipeline between them.
pub struct Market {
    cfg: MarketConfig,
    base: BackedAsset,
    quote: BackedAsset,
    book: Book,
    state: Mutex<EpochGate>,
    /// Funding coins per live order, for release and match transfer.
    order_coins: Mutex<HashMap<OrderId, (AssetId, Vec<CoinId>)>>,
    settling: Mutex<HashMap<OrderId, Settling>>,
    coin_locker: Arc<CoinLocker>,
    auth: Arc<dyn AuthManager>,
    archive: Arc<dyn Archive>,
    feed: Arc<dyn Feed>,
    swapper: Arc<SwapCoordinator>,
}

impl Market {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: MarketConfig,
        base: BackedAsset,
        quote: BackedAsset,
        coin_locker: Arc<CoinLocker>,
        auth: Arc<dyn AuthManager>,
        archive: Arc<dyn Archive>,
        feed: Arc<dyn Feed>,
        swapper: Arc<SwapCoordinator>,
        now: DateTime<Utc>,
    ) -> Self {
        let tracking = AccountTracking {
            base: base.backend.account_balancer().is_some(),
            quote: quote.backend.account_balancer().is_some(),
        };
        let epoch = Epoch::for_time(unix_ms(now), cfg.epoch_duration_ms);
        Self {
            book: Book::new(cfg.lot_size, tracking),
            state: Mutex::new(EpochGate {
                epoch,
                closed: VecDeque::new(),
                running: true,
                suspend: None,
                purge_pending: false,
                last_stamp_ms: 0,
            }),
            order_coins: Mutex::new(HashMap::new()),
            settling: Mutex::new(HashMap::new()),
            cfg,
            base,
            quote,
            coin_locker,
            auth,
            archive,
            feed,
            swapper,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    #[must_use]
    pub fn book(&self) -> &Book {
        &self.book
    }

    fn gate(&self) -> std::sync::MutexGuard<'_, EpochGate> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Advance the live epoch to the window containing `now_ms`, parking
    /// any closed epoch for processing.
    fn rotate_locked(&self, gate: &mut EpochGate, now_ms: i64) {
        if gate.epoch.includes_time(now_ms) || now_ms < gate.epoch.start_ms() {
            return;
        }
        let fresh = Epoch::for_time(now_ms, self.cfg.epoch_duration_ms);
        let old = std::mem::replace(&mut gate.epoch, fresh);
        if !old.is_empty() {
            gate.closed.push_back(old);
        }
        if let Some((final_idx, persist)) = gate.suspend {
            if gate.epoch.idx > final_idx && gate.running {
                info!(market = %self.cfg.name, final_idx, persist, "market suspended");
                gate.running = false;
                gate.purge_pending = !persist;
            }
        }
    }

    /// Stop the market after a fatal failure. Other markets continue.
    fn halt(&self, reason: &str) {
        error!(market = %self.cfg.name, reason, "halting market");
        self.gate().running = false;
    }

    /// Drive the market: rotate the epoch, process anything that closed,
    /// and prune settled matches. Called from the market's run loop and
    /// directly by tests.
    pub fn tick(&self, now: DateTime<Utc>) {
        let now_ms = unix_ms(now);
        let (closed, purge) = {
            let mut gate = self.gate();
            self.rotate_locked(&mut gate, now_ms);
            let purge = std::mem::take(&mut gate.purge_pending);
            (std::mem::take(&mut gate.closed), purge)
        };
        for epoch in closed {
            self.process_epoch(epoch, now);
        }
        if purge {
            self.purge_book();
        }
        self.prune_settling();
    }

    /// Run the epoch loop until `stop` flips.
    pub fn run(&self, stop: &Arc<std::sync::atomic::AtomicBool>) {
        while !stop.load(std::sync::atomic::Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(
                (self.cfg.epoch_duration_ms / 10).clamp(10, 250),
            ));
            self.tick(Utc::now());
        }
    }

    // =================================================================
    // Epoch close
    // =================================================================

    #[allow(clippy::too_many_lines)]
    fn process_epoch(&self, epoch: Epoch, now: DateTime<Utc>) {
        let epoch_idx = epoch.idx;
        let dur_ms = epoch.dur_ms;
        let (limits, markets, cancels) = epoch.type_counts();
        info!(
            market = %self.cfg.name,
            epoch = epoch_idx,
            limits,
            markets,
            cancels,
            "epoch closed; requesting preimages"
        );

        let sorted_ids = epoch.sorted_order_ids();
        let commits: Vec<Commitment> = sorted_ids
            .iter()
            .filter_map(|oid| epoch.order(oid).map(Order::commitment))
            .collect();
        let orders_by_id = epoch.into_orders();
        let orders: Vec<Order> = sorted_ids
            .iter()
            .filter_map(|oid| orders_by_id.get(oid).cloned())
            .collect();

        let responses = self.collect_preimages(&orders);
        let outcome = validate_preimages(orders, &responses);
        let results = match_epoch(&self.book, epoch_idx, &commits, outcome, now);

        // Liveness accounting.
        for oid in &results.revealed {
            if let Some(order) = orders_by_id.get(oid) {
                self.auth.preimage_success(&order.user(), now, *oid);
            }
        }
        for oid in &results.misses {
            if let Some(order) = orders_by_id.get(oid) {
                self.auth.missed_preimage(&order.user(), now, *oid);
            }
            self.release_order_coins(oid);
        }

        self.apply_results(&results, &orders_by_id, now);

        let epoch_results = EpochResults {
            market: self.cfg.name.clone(),
            epoch_idx,
            epoch_dur_ms: dur_ms,
            match_time: now,
            csum: results.csum,
            seed: results.seed,
            orders_revealed: results.revealed.clone(),
            orders_missed: results.misses.clone(),
            stats: results.stats,
        };
        if let Err(err) = self.archive.store_epoch_results(&epoch_results) {
            self.halt(&format!("epoch archive write failed: {err}"));
            return;
        }
        self.feed.epoch_report(&epoch_results);
        self.feed.match_proof(MatchProofNote {
            market: self.cfg.name.clone(),
            epoch_idx,
            csum: results.csum,
            seed: results.seed,
            preimages: results.preimages.clone(),
            misses: results.misses.clone(),
        });
        self.feed.spots(SpotsNote {
            market: self.cfg.name.clone(),
            epoch_idx,
            rate: self.book.mid_gap(),
        });
        if results.stats.match_count > 0 {
            self.feed.candle_update(CandleUpdateNote {
                market: self.cfg.name.clone(),
                dur_ms,
                stats: results.stats,
            });
        }
    }

    /// One concurrent preimage request per order, each with its own
    /// deadline; the epoch loop waits only for the slowest of the batch.
    fn collect_preimages(&self, orders: &[Order]) -> HashMap<OrderId, Preimage> {
        let deadline = Duration::from_millis(constants::PREIMAGE_REQUEST_TIMEOUT_MS);
        std::thread::scope(|s| {
            let handles: Vec<(OrderId, std::thread::ScopedJoinHandle<'_, Option<Preimage>>)> =
                orders
                    .iter()
                    .map(|order| {
                        let auth = Arc::clone(&self.auth);
                        let user = order.user();
                        let oid = order.id();
                        (oid, s.spawn(move || auth.request_preimage(&user, oid, deadline)))
                    })
                    .collect();
            handles
                .into_iter()
                .filter_map(|(oid, handle)| match handle.join() {
                    Ok(Some(pi)) => Some((oid, pi)),
                    Ok(None) => None,
                    Err(_) => {
                        warn!(order = %oid, "preimage request thread panicked");
                        None
                    }
                })
                .collect()
        })
    }

    fn apply_results(
        &self,
        results: &MatchResults,
        orders_by_id: &HashMap<OrderId, Order>,
        now: DateTime<Utc>,
    ) {
        // Last trade match per order, for coin-lock transfer.
        let mut last_match: HashMap<OrderId, MatchId> = HashMap::new();
        for m in results.matches.iter().filter(|m| !m.is_cancellation()) {
            last_match.insert(m.maker_order, m.id);
            last_match.insert(m.taker_order, m.id);
        }

        for m in &results.matches {
            if let Err(err) = self.archive.store_match(m) {
                self.halt(&format!("match archive write failed: {err}"));
                return;
            }
            if m.is_cancellation() {
                continue;
            }
            self.swapper.negotiate(m.clone(), now);
            self.note_settling(&m.maker_order, m, orders_by_id);
            self.note_settling(&m.taker_order, m, orders_by_id);
        }

        for lo in &results.booked {
            self.feed.book_order(BookOrderNote {
                market: self.cfg.name.clone(),
                order_id: lo.id(),
                side: if lo.trade.sell { SIDE_SELL } else { SIDE_BUY },
                rate: lo.rate,
                quantity: lo.remaining(),
                time: lo.prefix.server_time_ms() as u64,
            });
        }

        for (oid, remaining) in &results.updated {
            self.feed.update_remaining(UpdateRemainingNote {
                market: self.cfg.name.clone(),
                order_id: *oid,
                remaining: *remaining,
            });
        }

        for lo in &results.unbooked {
            let oid = lo.id();
            self.feed.unbook_order(UnbookOrderNote {
                market: self.cfg.name.clone(),
                order_id: oid,
            });
            if lo.remaining() == 0 {
                // Fully filled: the funding coins now belong to the swap.
                self.transfer_order_coins(&oid, last_match.get(&oid).copied());
                self.auth.record_completed_order(&lo.prefix.account_id, oid, now);
            } else {
                // Cancelled out of the book.
                self.release_order_coins(&oid);
            }
        }

        // Epoch takers that did not book: their coins either follow the
        // match into settlement or come free again.
        let booked_ids: Vec<OrderId> = results.booked.iter().map(LimitOrder::id).collect();
        for oid in &results.revealed {
            if booked_ids.contains(oid) {
                continue;
            }
            match last_match.get(oid) {
                Some(mid) => self.transfer_order_coins(oid, Some(*mid)),
                None => self.release_order_coins(oid),
            }
        }

        for oid in &results.nomatched {
            if let Some(order) = orders_by_id.get(oid) {
                self.feed.nomatch(&order.user(), NoMatchNote { order_id: *oid });
            }
        }
    }

    fn note_settling(
        &self,
        oid: &OrderId,
        m: &Match,
        orders_by_id: &HashMap<OrderId, Order>,
    ) {
        let mut settling = self.settling.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = settling.get_mut(oid) {
            entry.matched.insert(m.id, m.quantity);
            return;
        }
        // Taker orders come from this epoch; maker orders from the book
        // (possibly just removed, in which case the archive already has
        // them and the balance exposure follows the match records).
        let order = orders_by_id
            .get(oid)
            .cloned()
            .or_else(|| self.book.order(oid).map(Order::Limit));
        if let Some(order) = order {
            settling.insert(
                *oid,
                Settling {
                    order,
                    matched: HashMap::from([(m.id, m.quantity)]),
                },
            );
        }
    }

    /// Drop settling entries whose matches have all terminated, and free
    /// their coin locks.
    fn prune_settling(&self) {
        let mut done: Vec<OrderId> = Vec::new();
        {
            let mut settling = self.settling.lock().unwrap_or_else(|e| e.into_inner());
            for (oid, entry) in settling.iter_mut() {
                entry
                    .matched
                    .retain(|mid, _| self.swapper.live_match(mid).is_some());
                if entry.matched.is_empty() {
                    done.push(*oid);
                }
            }
            for oid in &done {
                settling.remove(oid);
            }
        }
        for oid in &done {
            // Gone from book and epoch: nothing holds these coins now.
            if !self.book.have_order(oid) {
                self.release_order_coins(oid);
            }
        }
    }

    fn release_order_coins(&self, oid: &OrderId) {
        if let Some((asset, coins)) = self
            .order_coins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(oid)
        {
            self.coin_locker.release_coins(asset, &coins);
        }
    }

    fn transfer_order_coins(&self, oid: &OrderId, mid: Option<MatchId>) {
        let Some(mid) = mid else {
            self.release_order_coins(oid);
            return;
        };
        let coins = self.order_coins.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((asset, ids)) = coins.get(oid) {
            if let Err(err) = self.coin_locker.transfer_to_match(*asset, ids, *oid, mid) {
                warn!(order = %oid, %err, "coin transfer to match failed");
            }
        }
    }

    /// Revoke every booked order on a purge suspension.
    fn purge_book(&self) {
        info!(market = %self.cfg.name, "purging book");
        let sells = self.book.sell_orders();
        let buys = self.book.buy_orders();
        for lo in sells.iter().chain(buys.iter()) {
            let oid = lo.id();
            if self.book.remove(&oid).is_some() {
                self.release_order_coins(&oid);
                self.feed.unbook_order(UnbookOrderNote {
                    market: self.cfg.name.clone(),
                    order_id: oid,
                });
            }
        }
    }

    /// Estimated lots an order commits, for the settling-limit gate.
    fn order_lots(&self, order: &Order) -> u64 {
        let Some(trade) = order.trade() else {
            return 0;
        };
        match order {
            Order::Market(mo) if !mo.trade.sell => {
                let mid = if self.book.mid_gap() == 0 {
                    self.cfg.rate_step
                } else {
                    self.book.mid_gap()
                };
                calc::quote_to_base(mid, trade.quantity) / self.cfg.lot_size
            }
            _ => trade.quantity / self.cfg.lot_size,
        }
    }
}

// ---------------------------------------------------------------------------
// MarketTunnel: the router's view
// ---------------------------------------------------------------------------

impl MarketTunnel for Market {
    fn submit_order(&self, mut rec: OrderRecord) -> Result<OrderResult> {
        let mut gate = self.gate();
        if !gate.running {
            return Err(DexError::MarketNotRunning(self.cfg.name.clone()));
        }
        if rec.order.trade().is_some() {
            let lots = self.order_lots(&rec.order);
            let limit = self.auth.user_settling_limit(&rec.order.user(), self.cfg.lot_size);
            if lots > limit {
                return Err(DexError::QuantityTooHigh(rec.order.user()));
            }
        }

        // Stamp under the gate lock: server times are monotonic per
        // market, and the order ID becomes valid here.
        let now_ms = Utc::now().timestamp_millis().max(gate.last_stamp_ms + 1);
        gate.last_stamp_ms = now_ms;
        self.rotate_locked(&mut gate, now_ms);
        if !gate.running {
            return Err(DexError::MarketNotRunning(self.cfg.name.clone()));
        }
        rec.order.stamp(from_unix_ms(now_ms));
        let oid = rec.order.id();

        // Coin locks commit before the order is visible to any other
        // subsystem.
        if !rec.coins.is_empty() {
            self.coin_locker
                .lock_order_coins(rec.funding_asset, &rec.coins, oid)?;
        }
        if let Err(err) = self.archive.store_order(&self.cfg.name, &rec.order) {
            self.coin_locker.release_coins(rec.funding_asset, &rec.coins);
            drop(gate);
            self.halt(&format!("order archive write failed: {err}"));
            return Err(DexError::RpcInternal(err.to_string()));
        }
        if let Err(err) = gate.epoch.insert(rec.order.clone()) {
            self.coin_locker.release_coins(rec.funding_asset, &rec.coins);
            return Err(err);
        }
        let epoch_idx = gate.epoch.idx;
        self.order_coins
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(oid, (rec.funding_asset, rec.coins.clone()));
        drop(gate);

        if let Some(trade) = rec.order.trade() {
            self.feed.epoch_order(EpochOrderNote {
                market: self.cfg.name.clone(),
                epoch_idx,
                order_id: oid,
                order_type: rec.order.order_type().code(),
                side: if trade.sell { SIDE_SELL } else { SIDE_BUY },
                rate: match &rec.order {
                    Order::Limit(lo) => lo.rate,
                    _ => 0,
                },
                quantity: trade.quantity,
            });
        }
        debug!(market = %self.cfg.name, order = %oid, epoch = epoch_idx, "order accepted");
        Ok(OrderResult {
            order_id: oid,
            server_time: now_ms as u64,
        })
    }

    fn mid_gap(&self) -> u64 {
        self.book.mid_gap()
    }

    fn market_buy_buffer(&self) -> Decimal {
        self.cfg.market_buy_buffer
    }

    fn lot_size(&self) -> u64 {
        self.cfg.lot_size
    }

    fn rate_step(&self) -> u64 {
        self.cfg.rate_step
    }

    fn cancelable(&self, oid: &OrderId) -> bool {
        if self.book.have_order(oid) {
            return true;
        }
        self.gate().epoch.standing_limit(oid)
    }

    fn running(&self) -> bool {
        self.gate().running
    }

    fn suspend(&self, as_soon_as: DateTime<Utc>, persist_book: bool) -> SuspendEpoch {
        let mut gate = self.gate();
        let final_idx = swapmatch_types::epoch::epoch_index(
            unix_ms(as_soon_as),
            self.cfg.epoch_duration_ms,
        )
        .max(gate.epoch.idx);
        gate.suspend = Some((final_idx, persist_book));
        drop(gate);

        let end = from_unix_ms(epoch_start_ms(final_idx + 1, self.cfg.epoch_duration_ms));
        self.feed.suspension(SuspensionNote {
            market: self.cfg.name.clone(),
            final_epoch: final_idx,
            suspend_time: unix_ms(end) as u64,
            persist_book,
        });
        info!(market = %self.cfg.name, final_idx, persist_book, "suspension scheduled");
        SuspendEpoch {
            idx: final_idx,
            end,
        }
    }

    fn check_unfilled(&self, asset: AssetId, user: &AccountId) -> Vec<LimitOrder> {
        let candidates = if asset == self.base.asset.id {
            self.book.unfilled_user_sells(user)
        } else if asset == self.quote.asset.id {
            self.book.unfilled_user_buys(user)
        } else {
            return Vec::new();
        };
        let backed = if asset == self.base.asset.id {
            &self.base
        } else {
            &self.quote
        };
        let Some(tracker) = backed.backend.output_tracker() else {
            return Vec::new();
        };

        let mut unbooked = Vec::new();
        for lo in candidates {
            let oid = lo.id();
            let coins = self
                .order_coins
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(&oid)
                .map(|(_, c)| c.clone())
                .unwrap_or_default();
            let spent = coins.iter().any(|coin| {
                matches!(
                    tracker.funding_coin(
                        coin,
                        &[],
                        Duration::from_millis(constants::COIN_QUERY_TIMEOUT_MS),
                    ),
                    Err(DexError::CoinNotFound(_))
                )
            });
            if spent {
                if let Some(removed) = self.book.remove(&oid) {
                    warn!(market = %self.cfg.name, order = %oid, "unbooking unfunded order");
                    self.release_order_coins(&oid);
                    self.feed.unbook_order(UnbookOrderNote {
                        market: self.cfg.name.clone(),
                        order_id: oid,
                    });
                    unbooked.push(removed);
                }
            }
        }
        unbooked
    }
}

// ---------------------------------------------------------------------------
// BalanceSource: the balancer's view
// ---------------------------------------------------------------------------

/// `(qty, lots, redeems)` one trade contributes against `asset` for the
/// account address `acct`.
fn trade_exposure(
    order: &Order,
    rate: u64,
    acct: &str,
    asset: AssetId,
    base: AssetId,
    quote: AssetId,
    lot_size: u64,
    fallback_rate: u64,
    qty_override: Option<u64>,
) -> AccountCommitments {
    let mut out = AccountCommitments::default();
    let Some(trade) = order.trade() else {
        return out;
    };
    let qty = qty_override.unwrap_or(trade.remaining());
    if qty == 0 {
        return out;
    }
    let funding = if trade.sell { base } else { quote };
    let receiving = if trade.sell { quote } else { base };

    if asset == funding && trade.from_account() == acct {
        if trade.sell {
            out.qty = qty;
            out.lots = qty / lot_size;
        } else if rate > 0 {
            out.qty = calc::base_to_quote(rate, qty);
            out.lots = qty / lot_size;
        } else {
            // Market buy: quantity is already quote-denominated.
            out.qty = qty;
            out.lots = calc::quote_to_base(fallback_rate, qty) / lot_size;
        }
    }
    if asset == receiving && trade.to_account() == acct {
        let base_qty = if trade.sell || rate > 0 {
            qty
        } else {
            calc::quote_to_base(fallback_rate, qty)
        };
        out.redeems = base_qty.div_ceil(lot_size).max(1);
    }
    out
}

impl BalanceSource for Market {
    fn account_commitments(&self, acct: &str, asset: AssetId) -> AccountCommitments {
        let base = self.base.asset.id;
        let quote = self.quote.asset.id;
        if asset != base && asset != quote {
            return AccountCommitments::default();
        }
        let lot_size = self.cfg.lot_size;
        let fallback = if self.book.mid_gap() == 0 {
            self.cfg.rate_step
        } else {
            self.book.mid_gap()
        };

        let mut total = AccountCommitments::default();
        let mut fold = |order: &Order, rate: u64, qty_override: Option<u64>| {
            total.absorb(trade_exposure(
                order, rate, acct, asset, base, quote, lot_size, fallback, qty_override,
            ));
        };

        // Booked orders.
        let mut booked: Vec<LimitOrder> = Vec::new();
        if asset == base {
            self.book.iterate_base_account(acct, |lo| booked.push(lo.clone()));
        } else {
            self.book.iterate_quote_account(acct, |lo| booked.push(lo.clone()));
        }
        for lo in booked {
            let rate = lo.rate;
            fold(&Order::Limit(lo), rate, None);
        }

        // The live epoch queue.
        {
            let gate = self.gate();
            for order in gate.epoch.orders_iter() {
                let rate = match order {
                    Order::Limit(lo) => lo.rate,
                    _ => 0,
                };
                fold(order, rate, None);
            }
        }

        // Matches still settling.
        {
            let settling = self.settling.lock().unwrap_or_else(|e| e.into_inner());
            for entry in settling.values() {
                // Matched quantities are base atoms; market buys commit
                // quote, so convert at the fallback rate.
                let mut in_flight: u64 = entry.matched.values().sum();
                let rate = match &entry.order {
                    Order::Limit(lo) => lo.rate,
                    _ => 0,
                };
                if matches!(&entry.order, Order::Market(mo) if !mo.trade.sell) {
                    in_flight = calc::base_to_quote(fallback, in_flight);
                }
                fold(&entry.order, rate, Some(in_flight));
            }
        }

        total
    }
}
