//! The order router: the `limit`, `market`, and `cancel` route handlers.
//!
//! Every handler runs the same pipeline: authenticate the submitter,
//! check suspension, resolve the market, validate timestamps and
//! parameters, verify funding, and hand the order to the market tunnel,
//! which stamps the server time and commits the coin locks under its
//! epoch lock.
//!
//! Funding verification splits by asset kind. UTXO funding may lag the
//! order (the client just broadcast the funding tx), so coin lookups
//! retry on the latency queue for up to the funding wait window instead
//! of failing immediately; the response then goes out through the auth
//! manager rather than the request path. Account funding needs no coin
//! discovery and submits synchronously after a balance check.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use swapmatch_types::msgs::{
    CancelPayload, CoinProof, LimitPayload, MarketPayload, Message, OrderResult, RedeemSig,
};
use swapmatch_types::{
    calc, constants, market_name, AccountId, Asset, AssetId, BackedAsset, CoinId, DexError,
    FundingCoin, LimitOrder, Order, OrderId, Preimage, Result, SuspendEpoch, Trade,
};
use tracing::{debug, error, info, trace};

use crate::balancer::DexBalancer;
use crate::coin_locker::CoinLocker;
use crate::latency_queue::{TickerQueue, TryDirective, Waiter};

/// The auth layer's surface as the router and markets see it:
/// authentication, suspension state, outbound sends, the preimage round,
/// and reputation bookkeeping.
pub trait AuthManager: Send + Sync {
    /// Verify `sig` over `msg` for the user's registered key.
    fn auth(&self, user: &AccountId, msg: &[u8], sig: &[u8]) -> Result<()>;
    /// Whether the account is suspended (may cancel, may not trade).
    fn suspended(&self, user: &AccountId) -> bool;
    /// Send a message to a connected user.
    fn send(&self, user: &AccountId, msg: Message) -> Result<()>;
    /// Request an order's preimage, blocking up to `deadline`. `None` on
    /// timeout or disconnect.
    fn request_preimage(
        &self,
        user: &AccountId,
        order_id: OrderId,
        deadline: Duration,
    ) -> Option<Preimage>;
    /// Liveness accounting for the reputation layer.
    fn preimage_success(&self, user: &AccountId, ref_time: DateTime<Utc>, order_id: OrderId);
    fn missed_preimage(&self, user: &AccountId, ref_time: DateTime<Utc>, order_id: OrderId);
    fn record_cancel(
        &self,
        user: &AccountId,
        order_id: OrderId,
        target: OrderId,
        t: DateTime<Utc>,
    );
    fn record_completed_order(&self, user: &AccountId, order_id: OrderId, t: DateTime<Utc>);
    /// The user's settling limit in lots for a market with this lot size.
    fn user_settling_limit(&self, user: &AccountId, lot_size: u64) -> u64;
}

/// A connection to a market: the surface the router needs to validate
/// against and submit into.
pub trait MarketTunnel: Send + Sync {
    /// Submit to the epoch queue. Stamps the server time and commits the
    /// record's coin locks atomically under the epoch lock.
    fn submit_order(&self, rec: OrderRecord) -> Result<OrderResult>;
    /// The rate halfway between the best buy and best sell, zero on an
    /// empty book.
    fn mid_gap(&self) -> u64;
    fn market_buy_buffer(&self) -> Decimal;
    fn lot_size(&self) -> u64;
    fn rate_step(&self) -> u64;
    /// Whether the order is a standing limit in this book or epoch queue.
    fn cancelable(&self, oid: &OrderId) -> bool;
    /// Whether the market accepts new trade orders.
    fn running(&self) -> bool;
    /// Schedule suspension, returning the final epoch.
    fn suspend(&self, as_soon_as: DateTime<Utc>, persist_book: bool) -> SuspendEpoch;
    /// Unbook any of the user's unfilled orders whose funding coins for
    /// the asset have been spent, returning what was unbooked.
    fn check_unfilled(&self, asset: AssetId, user: &AccountId) -> Vec<LimitOrder>;
}

/// Source of the last reported tx fee rate estimate for an asset.
pub trait FeeSource: Send + Sync {
    fn last_rate(&self, asset: AssetId) -> u64;
}

/// The validated order and everything the market needs to accept it.
#[derive(Debug)]
pub struct OrderRecord {
    pub order: Order,
    /// The asset whose coins fund the order.
    pub funding_asset: AssetId,
    /// Funding coins to lock on submission. Empty for cancels and
    /// account-funded orders.
    pub coins: Vec<CoinId>,
    /// The request the record answers, for the async response path.
    pub msg_id: u64,
}

/// Pointers to the two market assets, addressed four ways.
#[derive(Clone)]
struct AssetSet {
    funding: BackedAsset,
    receiving: BackedAsset,
    base: BackedAsset,
    quote: BackedAsset,
}

impl AssetSet {
    fn new(base: BackedAsset, quote: BackedAsset, sell: bool) -> Self {
        let (funding, receiving) = if sell {
            (base.clone(), quote.clone())
        } else {
            (quote.clone(), base.clone())
        };
        Self {
            funding,
            receiving,
            base,
            quote,
        }
    }
}

/// Handles the `limit`, `market`, and `cancel` routes.
pub struct OrderRouter {
    auth: Arc<dyn AuthManager>,
    assets: HashMap<AssetId, BackedAsset>,
    tunnels: HashMap<String, Arc<dyn MarketTunnel>>,
    latency_q: Arc<TickerQueue>,
    fee_source: Arc<dyn FeeSource>,
    balancer: Arc<DexBalancer>,
    coin_locker: Arc<CoinLocker>,
}

impl OrderRouter {
    #[must_use]
    pub fn new(
        auth: Arc<dyn AuthManager>,
        assets: HashMap<AssetId, BackedAsset>,
        tunnels: HashMap<String, Arc<dyn MarketTunnel>>,
        fee_source: Arc<dyn FeeSource>,
        balancer: Arc<DexBalancer>,
        coin_locker: Arc<CoinLocker>,
    ) -> Self {
        Self {
            auth,
            assets,
            tunnels,
            latency_q: Arc::new(TickerQueue::new(Duration::from_millis(
                constants::LATENCY_QUEUE_TICK_MS,
            ))),
            fee_source,
            balancer,
            coin_locker,
        }
    }

    /// The funding-retry queue, for the server's ticker thread.
    #[must_use]
    pub fn latency_queue(&self) -> Arc<TickerQueue> {
        Arc::clone(&self.latency_q)
    }

    // =================================================================
    // Route handlers
    // =================================================================

    /// Handle a `limit` request. `Ok(Some(_))` is a synchronous accept,
    /// `Ok(None)` means the outcome will arrive via the auth manager
    /// (UTXO funding still being discovered), and `Err` is an immediate
    /// rejection for the comms layer to return.
    pub fn handle_limit(&self, user: AccountId, msg: &Message) -> Result<Option<OrderResult>> {
        let payload: LimitPayload = msg.parse_payload()?;
        let order = payload.to_order()?;
        self.verify_account(&user, &order.prefix.account_id, &payload.signing_bytes()?, &payload.sig)?;
        if self.auth.suspended(&user) {
            return Err(DexError::MarketNotRunning(format!(
                "suspended account {user} may not submit trade orders"
            )));
        }

        let (tunnel, assets) = self.market_details(&order.prefix.base, &order.prefix.quote, order.trade.sell)?;
        if !tunnel.running() {
            return Err(DexError::MarketNotRunning("market closed to new orders".into()));
        }

        if order.rate == 0 {
            return Err(DexError::OrderParameter("rate = 0 not allowed".into()));
        }
        let rate_step = tunnel.rate_step();
        if order.rate % rate_step != 0 {
            return Err(DexError::OrderParameter(format!(
                "rate ({}) not a multiple of ratestep ({rate_step})",
                order.rate
            )));
        }

        check_times(order.prefix.client_time, payload.prefix.server_time)?;
        self.check_trade(&assets, tunnel.lot_size(), &order.trade, &payload.trade.coins, true)?;

        let rate = order.rate;
        let sig_msg = payload.signing_bytes()?;
        self.process_trade(
            Order::Limit(order),
            &payload.trade.coins,
            payload.redeem_sig.as_ref(),
            &sig_msg,
            tunnel,
            assets,
            rate,
            msg.id,
            user,
        )
    }

    /// Handle a `market` request. Same contract as [`Self::handle_limit`].
    pub fn handle_market(&self, user: AccountId, msg: &Message) -> Result<Option<OrderResult>> {
        let payload: MarketPayload = msg.parse_payload()?;
        let order = payload.to_order()?;
        self.verify_account(&user, &order.prefix.account_id, &payload.signing_bytes()?, &payload.sig)?;
        if self.auth.suspended(&user) {
            return Err(DexError::MarketNotRunning(format!(
                "suspended account {user} may not submit trade orders"
            )));
        }

        let (tunnel, assets) = self.market_details(&order.prefix.base, &order.prefix.quote, order.trade.sell)?;
        if !tunnel.running() {
            return Err(DexError::MarketNotRunning("market closed to new orders".into()));
        }

        check_times(order.prefix.client_time, payload.prefix.server_time)?;
        // Market buys are quote-denominated: skip the lot-size check.
        let check_lot = order.trade.sell;
        self.check_trade(&assets, tunnel.lot_size(), &order.trade, &payload.trade.coins, check_lot)?;

        let sig_msg = payload.signing_bytes()?;
        self.process_trade(
            Order::Market(order),
            &payload.trade.coins,
            payload.redeem_sig.as_ref(),
            &sig_msg,
            tunnel,
            assets,
            0,
            msg.id,
            user,
        )
    }

    /// Handle a `cancel` request. Cancels carry no funding and submit
    /// synchronously; suspended accounts are allowed.
    pub fn handle_cancel(&self, user: AccountId, msg: &Message) -> Result<OrderResult> {
        let payload: CancelPayload = msg.parse_payload()?;
        let order = payload.to_order()?;
        self.verify_account(&user, &order.prefix.account_id, &payload.signing_bytes()?, &payload.sig)?;

        let (tunnel, _) = self.market_details(&order.prefix.base, &order.prefix.quote, false)?;

        if !tunnel.cancelable(&payload.target_id) {
            return Err(DexError::OrderParameter(format!(
                "target order not known: {}",
                payload.target_id
            )));
        }
        check_times(order.prefix.client_time, payload.prefix.server_time)?;

        let target = payload.target_id;
        let result = tunnel.submit_order(OrderRecord {
            funding_asset: order.prefix.quote,
            order: Order::Cancel(order),
            coins: Vec::new(),
            msg_id: msg.id,
        })?;
        self.auth
            .record_cancel(&user, result.order_id, target, Utc::now());
        Ok(result)
    }

    // =================================================================
    // Suspension
    // =================================================================

    /// Schedule a suspension of one market.
    #[must_use]
    pub fn suspend_market(
        &self,
        name: &str,
        as_soon_as: DateTime<Utc>,
        persist_book: bool,
    ) -> Option<SuspendEpoch> {
        self.tunnels
            .get(name)
            .map(|t| t.suspend(as_soon_as, persist_book))
    }

    /// Schedule a suspension of every market.
    #[must_use]
    pub fn suspend_all(
        &self,
        as_soon_as: DateTime<Utc>,
        persist_book: bool,
    ) -> HashMap<String, SuspendEpoch> {
        self.tunnels
            .iter()
            .map(|(name, t)| (name.clone(), t.suspend(as_soon_as, persist_book)))
            .collect()
    }

    // =================================================================
    // Pipeline stages
    // =================================================================

    fn verify_account(
        &self,
        user: &AccountId,
        claimed: &AccountId,
        sig_msg: &[u8],
        sig: &[u8],
    ) -> Result<()> {
        if user != claimed {
            return Err(DexError::OrderParameter("account ID mismatch".into()));
        }
        self.auth
            .auth(user, sig_msg, sig)
            .map_err(|e| DexError::Signature(e.to_string()))
    }

    fn market_details(
        &self,
        base: &AssetId,
        quote: &AssetId,
        sell: bool,
    ) -> Result<(Arc<dyn MarketTunnel>, AssetSet)> {
        let base_asset = self
            .assets
            .get(base)
            .ok_or_else(|| DexError::UnknownMarket(format!("unknown base asset {base}")))?;
        let quote_asset = self
            .assets
            .get(quote)
            .ok_or_else(|| DexError::UnknownMarket(format!("unknown quote asset {quote}")))?;
        let name = market_name(&base_asset.asset.symbol, &quote_asset.asset.symbol);
        let tunnel = self
            .tunnels
            .get(&name)
            .ok_or_else(|| DexError::UnknownMarket(format!("unknown market {name}")))?;
        Ok((
            Arc::clone(tunnel),
            AssetSet::new(base_asset.clone(), quote_asset.clone(), sell),
        ))
    }

    /// Validate the trade body: receiving address, quantity, and coin
    /// proof shape.
    fn check_trade(
        &self,
        assets: &AssetSet,
        lot_size: u64,
        trade: &Trade,
        coins: &[CoinProof],
        check_lot: bool,
    ) -> Result<()> {
        if !assets.receiving.backend.check_address(&trade.address) {
            return Err(DexError::OrderParameter("address doesn't check".into()));
        }
        if trade.quantity == 0 {
            return Err(DexError::OrderParameter("zero quantity not allowed".into()));
        }
        if check_lot && trade.quantity % lot_size != 0 {
            return Err(DexError::OrderParameter(
                "order quantity not a multiple of lot size".into(),
            ));
        }
        if coins.is_empty() {
            return Err(DexError::Funding("order must specify funding coins".into()));
        }
        for (i, coin) in coins.iter().enumerate() {
            if coin.sigs.is_empty() {
                return Err(DexError::Signature(format!("no signature for coin {i}")));
            }
            if coin.pubkeys.len() != coin.sigs.len() {
                return Err(DexError::OrderParameter(format!(
                    "pubkey count {} not equal to signature count {} for coin {i}",
                    coin.pubkeys.len(),
                    coin.sigs.len(),
                )));
            }
        }
        Ok(())
    }

    /// Verify funding and submit: the tail of the limit/market pipeline.
    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    fn process_trade(
        &self,
        order: Order,
        coins: &[CoinProof],
        redeem_sig: Option<&RedeemSig>,
        sig_msg: &[u8],
        tunnel: Arc<dyn MarketTunnel>,
        assets: AssetSet,
        rate: u64,
        msg_id: u64,
        user: AccountId,
    ) -> Result<Option<OrderResult>> {
        let trade = order
            .trade()
            .ok_or_else(|| DexError::RpcInternal("trade order without trade body".into()))?
            .clone();

        // Receiving-side account asset: redemption fees cannot come out
        // of the received amount, so require a redeem signature and fee
        // headroom in the receiving account.
        if let Some(receiving_balancer) = assets.receiving.backend.account_balancer() {
            let Some(rs) = redeem_sig else {
                info!(%user, asset = %assets.receiving.asset.symbol, "order missing redeem signature");
                return Err(DexError::OrderParameter(format!(
                    "no redeem address verification included for asset {}",
                    assets.receiving.asset.symbol
                )));
            };
            let acct_addr = trade.to_account().to_string();
            receiving_balancer
                .validate_signature(&acct_addr, &rs.pubkey, sig_msg, &rs.sig)
                .map_err(|_| DexError::Signature("redeem signature validation failed".into()))?;
            if !self.sufficient_account_balance(
                &acct_addr,
                &order,
                rate,
                &assets.receiving.asset,
                assets.receiving.asset.id,
                tunnel.as_ref(),
            ) {
                return Err(DexError::Funding("insufficient balance".into()));
            }
        }

        // Account-funded orders need no coin discovery: verify the
        // account proof and balance, then submit synchronously.
        if let Some(funding_balancer) = assets.funding.backend.account_balancer() {
            if coins.len() != 1 {
                info!(%user, n = coins.len(), "account-funded order with wrong coin count");
                return Err(DexError::OrderParameter(
                    "account-type asset funding requires exactly one coin ID".into(),
                ));
            }
            let proof = &coins[0];
            if proof.pubkeys.len() != 1 || proof.sigs.len() != 1 || !proof.redeem.is_empty() {
                return Err(DexError::OrderParameter(
                    "account-type asset funding requires exactly one coin ID".into(),
                ));
            }
            let acct_addr = trade.from_account();
            funding_balancer
                .validate_signature(&acct_addr, &proof.pubkeys[0], sig_msg, &proof.sigs[0])
                .map_err(|_| DexError::Signature("signature validation failed".into()))?;
            if !self.sufficient_account_balance(
                &acct_addr,
                &order,
                rate,
                &assets.funding.asset,
                assets.receiving.asset.id,
                tunnel.as_ref(),
            ) {
                return Err(DexError::Funding("insufficient balance".into()));
            }
            let result = tunnel.submit_order(OrderRecord {
                funding_asset: assets.funding.asset.id,
                order,
                coins: Vec::new(),
                msg_id,
            })?;
            self.respond_result(msg_id, &user, &result);
            return Ok(Some(result));
        }

        // UTXO funding: validate the IDs, then hunt the coins on the
        // latency queue.
        let funding_id = assets.funding.asset.id;
        for proof in coins {
            assets
                .funding
                .backend
                .validate_coin_id(&proof.id)
                .map_err(|e| DexError::Funding(format!("invalid coin ID {}: {e}", proof.id)))?;
            if self.coin_locker.locked(funding_id, &proof.id) {
                return Err(DexError::Funding(format!(
                    "coin {} is locked",
                    proof.id
                )));
            }
        }

        // Use the submission as a chance to sweep the user's unfilled
        // book orders for spent funding coins, on every market.
        for (mkt_name, t) in &self.tunnels {
            for bad in t.check_unfilled(funding_id, &user) {
                info!(order = %bad.id(), market = %mkt_name, %user, "unbooked unfunded order");
            }
        }

        let lot_size = tunnel.lot_size();
        let sell = trade.sell;
        let mut lots = trade.quantity / lot_size;
        if !sell && rate == 0 {
            lots = calc::quote_to_base(safe_mid_gap(tunnel.as_ref()), trade.quantity) / lot_size;
        }

        self.wait_for_coins(
            order, trade, coins, tunnel, assets, rate, lots, msg_id, user,
        );
        Ok(None)
    }

    /// Park a coin-discovery waiter on the latency queue. Every outcome,
    /// success or rejection or expiry, is delivered through the auth
    /// manager.
    #[allow(clippy::too_many_arguments)]
    fn wait_for_coins(
        &self,
        order: Order,
        trade: Trade,
        coins: &[CoinProof],
        tunnel: Arc<dyn MarketTunnel>,
        assets: AssetSet,
        rate: u64,
        lots: u64,
        msg_id: u64,
        user: AccountId,
    ) {
        let auth = Arc::clone(&self.auth);
        let fee_source = Arc::clone(&self.fee_source);
        let coin_str = coins
            .iter()
            .map(|c| c.id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        trace!(coins = %coin_str, asset = %assets.funding.asset.symbol, "searching for funding coins");

        let mut needed: HashMap<usize, CoinProof> =
            coins.iter().cloned().enumerate().collect();
        let mut val_sum: u64 = 0;
        let mut spend_size: u64 = 0;
        let mut order_slot = Some(order);
        let funding_id = assets.funding.asset.id;

        let expire_auth = Arc::clone(&self.auth);
        let expire_user = user;
        let expire_coins = coin_str.clone();

        let try_fn = move || {
            // Hunt any coins still missing.
            let tracker = match assets.funding.backend.output_tracker() {
                Some(t) => t,
                None => {
                    respond_error(
                        auth.as_ref(),
                        msg_id,
                        &user,
                        &DexError::Funding("funding requested for incapable asset".into()),
                    );
                    return TryDirective::DontTryAgain;
                }
            };
            let keys: Vec<usize> = needed.keys().copied().collect();
            for key in keys {
                let proof = needed.get(&key).expect("key just listed");
                let coin = match tracker.funding_coin(
                    &proof.id,
                    &proof.redeem,
                    Duration::from_millis(constants::COIN_QUERY_TIMEOUT_MS),
                ) {
                    Ok(coin) => coin,
                    Err(err) if err.is_retryable() => {
                        trace!(coin = %proof.id, %err, "funding coin not ready");
                        return TryDirective::TryAgain;
                    }
                    Err(err) => {
                        error!(coin = %proof.id, %user, %err, "funding coin retrieval failed");
                        respond_error(
                            auth.as_ref(),
                            msg_id,
                            &user,
                            &DexError::Funding(format!("error retrieving coin ID {}", proof.id)),
                        );
                        return TryDirective::DontTryAgain;
                    }
                };

                // Verify the user controls the coin.
                if let Err(err) = coin.auth(&proof.pubkeys, &proof.sigs, proof.id.as_slice()) {
                    debug!(coin = %proof.id, %err, "coin auth failed");
                    respond_error(
                        auth.as_ref(),
                        msg_id,
                        &user,
                        &DexError::CoinAuth(proof.id.clone()),
                    );
                    return TryDirective::DontTryAgain;
                }

                if let Err(err) =
                    check_zero_confs(coin.as_ref(), &assets.funding, fee_source.as_ref())
                {
                    respond_error(auth.as_ref(), msg_id, &user, &err);
                    return TryDirective::DontTryAgain;
                }

                val_sum += coin.value();
                spend_size += u64::from(coin.spend_size());
                needed.remove(&key);
            }

            if val_sum == 0 {
                respond_error(
                    auth.as_ref(),
                    msg_id,
                    &user,
                    &DexError::Funding("zero value funding coins not permitted".into()),
                );
                return TryDirective::DontTryAgain;
            }

            // All coins found: check the sum against worst-case funding.
            let req_val = if trade.sell {
                calc::required_order_funds(trade.quantity, spend_size, lots, &assets.funding.asset)
            } else if rate > 0 {
                let quote_qty = calc::base_to_quote(rate, trade.quantity);
                calc::required_order_funds(quote_qty, spend_size, lots, &assets.quote.asset)
            } else {
                // Market buy: quote-denominated quantity must satisfy the
                // market-buy buffer at the mid-gap rate.
                let mid_gap = safe_mid_gap(tunnel.as_ref());
                let lot_with_buffer = buffered_lot(tunnel.lot_size(), tunnel.market_buy_buffer());
                let min_req = calc::base_to_quote(mid_gap, lot_with_buffer);
                if trade.quantity < min_req {
                    respond_error(
                        auth.as_ref(),
                        msg_id,
                        &user,
                        &DexError::Funding(format!(
                            "order quantity does not satisfy market buy buffer. {} < {min_req}. midGap = {mid_gap}",
                            trade.quantity
                        )),
                    );
                    return TryDirective::DontTryAgain;
                }
                calc::required_order_funds(min_req, spend_size, 1, &assets.quote.asset)
            };
            if val_sum < req_val {
                respond_error(
                    auth.as_ref(),
                    msg_id,
                    &user,
                    &DexError::Funding(format!(
                        "not enough funds. need at least {req_val}, got {val_sum}"
                    )),
                );
                return TryDirective::DontTryAgain;
            }

            // Found and validated: hand to the epoch queue.
            let order = order_slot.take().expect("single submission");
            let coin_ids: Vec<CoinId> = trade.coins.clone();
            match tunnel.submit_order(OrderRecord {
                funding_asset: funding_id,
                order,
                coins: coin_ids,
                msg_id,
            }) {
                Ok(result) => {
                    let msg = Message::response(msg_id, &result)
                        .unwrap_or_else(|_| Message::error_response(msg_id, &DexError::RpcInternal(String::new())));
                    if let Err(err) = auth.send(&user, msg) {
                        info!(%user, %err, "failed to send order result to disconnected user");
                    }
                }
                Err(err) => respond_error(auth.as_ref(), msg_id, &user, &err),
            }
            TryDirective::DontTryAgain
        };

        self.latency_q.wait(Waiter {
            expiration: Utc::now()
                + chrono::Duration::milliseconds(constants::FUNDING_COIN_WAIT_MS as i64),
            try_fn: Box::new(try_fn),
            expire_fn: Box::new(move || {
                respond_error(
                    expire_auth.as_ref(),
                    msg_id,
                    &expire_user,
                    &DexError::TransactionUndiscovered(format!(
                        "failed to find funding coins {expire_coins}"
                    )),
                );
            }),
        });
    }

    /// Whether the account balance supports the order, considering the
    /// user's other orders and active matches across all markets.
    fn sufficient_account_balance(
        &self,
        acct_addr: &str,
        order: &Order,
        rate: u64,
        asset_info: &Asset,
        redeem_asset: AssetId,
        tunnel: &dyn MarketTunnel,
    ) -> bool {
        let Some(trade) = order.trade() else {
            return false;
        };
        let lot_size = tunnel.lot_size();
        let qty = trade.quantity;

        let (mut funding_qty, mut funding_lots, mut redeems) = (0u64, 0u64, 0u64);
        if order.prefix().base == asset_info.id {
            if trade.sell {
                funding_qty = qty;
                funding_lots = qty / lot_size;
            } else if rate > 0 {
                // Limit buy receiving base: one redeem per lot bought.
                redeems = qty / lot_size;
            } else {
                // Market buy: estimate lots from the mid-gap.
                redeems = calc::quote_to_base(safe_mid_gap(tunnel), qty) / lot_size;
            }
        } else if trade.sell {
            // Selling base, receiving quote: one redeem per lot sold.
            redeems = qty / lot_size;
        } else if rate > 0 {
            funding_qty = calc::base_to_quote(rate, qty);
            funding_lots = qty / lot_size;
        } else {
            // Market buy funds with its quote quantity directly.
            funding_qty = qty;
            funding_lots = calc::quote_to_base(safe_mid_gap(tunnel), qty) / lot_size;
        }

        self.balancer.check_balance(
            acct_addr,
            asset_info.id,
            redeem_asset,
            funding_qty,
            funding_lots,
            redeems,
        )
    }

    fn respond_result(&self, msg_id: u64, user: &AccountId, result: &OrderResult) {
        match Message::response(msg_id, result) {
            Ok(msg) => {
                if let Err(err) = self.auth.send(user, msg) {
                    info!(%user, %err, "failed to send order result to disconnected user");
                }
            }
            Err(err) => error!(%err, "failed to build order response"),
        }
    }
}

/// Send an error response through the auth manager, for outcomes decided
/// off the request path.
fn respond_error(auth: &dyn AuthManager, msg_id: u64, user: &AccountId, err: &DexError) {
    debug!(%user, %err, "error going to user");
    if let Err(send_err) = auth.send(user, Message::error_response(msg_id, err)) {
        info!(%user, %send_err, "failed to send error response to disconnected user");
    }
}

/// The mid-gap rate, falling back to the rate step on an empty book.
fn safe_mid_gap(tunnel: &dyn MarketTunnel) -> u64 {
    let mid = tunnel.mid_gap();
    if mid == 0 {
        tunnel.rate_step()
    } else {
        mid
    }
}

/// One lot scaled by the market-buy buffer, rounded to atoms.
fn buffered_lot(lot_size: u64, buffer: Decimal) -> u64 {
    (Decimal::from(lot_size) * buffer)
        .round()
        .to_u64()
        .unwrap_or(lot_size)
}

/// Zero-confirmation coins must pay at least 90% of the last known fee
/// rate for the asset. Acceptance here is sticky: the check runs once at
/// submission and is never revisited on later fee updates.
fn check_zero_confs(
    coin: &dyn FundingCoin,
    funding: &BackedAsset,
    fee_source: &dyn FeeSource,
) -> Result<()> {
    let confs = coin
        .confirmations()
        .map_err(|_| DexError::Funding(format!("failed to verify coin {}", coin.id())))?;
    if confs > 0 {
        return Ok(());
    }
    let last_known = fee_source.last_rate(funding.asset.id);
    let minimum = (Decimal::from(last_known) * constants::zero_conf_fee_rate_threshold())
        .round()
        .to_u64()
        .unwrap_or(0);
    let fee_rate = coin.fee_rate();
    if last_known > 0 && fee_rate < minimum {
        debug!(coin = %coin.id(), fee_rate, minimum, "zero-conf fee rate too low");
        return Err(DexError::Funding(format!(
            "fee rate for {} is too low. {fee_rate} < {minimum}",
            coin.id()
        )));
    }
    Ok(())
}

/// Validate the timestamps: client clock within range, server time unset.
fn check_times(client_time: DateTime<Utc>, wire_server_time: u64) -> Result<()> {
    let offset = (Utc::now() - client_time).num_milliseconds().abs();
    if offset >= constants::MAX_CLOCK_OFFSET_MS {
        return Err(DexError::ClockRange {
            offset_ms: offset,
            max_ms: constants::MAX_CLOCK_OFFSET_MS,
        });
    }
    if wire_server_time != 0 {
        return Err(DexError::OrderParameter(
            "non-zero server time not allowed".into(),
        ));
    }
    Ok(())
}
