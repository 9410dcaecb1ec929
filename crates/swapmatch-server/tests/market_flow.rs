//! End-to-end server tests: ingress through epoch matching into swap
//! negotiation, with fake backends and a scripted clock driving the
//! market ticks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use swapmatch_ingress::{AuthManager, CoinLocker, LockHolder, MarketTunnel};
use swapmatch_server::{Archive, MemArchive, NullFeed, Server};
use swapmatch_swap::SwapNotifier;
use swapmatch_types::msgs::{
    self, AuditNote, CoinProof, InitPayload, LimitPayload, Message, PrefixWire, RedeemPayload,
    RedemptionNote, RevokeMatchNote, TradeWire,
};
use swapmatch_types::{
    AccountId, Asset, AssetId, BackedAsset, Backend, Coin, CoinId, Denomination, DexError,
    FundingCoin, MarketConfig, MatchId, MatchStatus, Network, OrderId, OrderType, Preimage,
    Result, ServerConfig, TimeInForce, UnitInfo,
};

const LOT: u64 = 100_000_000;
const RATE: u64 = 1_000_000;
const EPOCH_MS: u64 = 10_000;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeAuth {
    sent: Mutex<Vec<(AccountId, Message)>>,
    completed: Mutex<Vec<OrderId>>,
    missed: Mutex<Vec<OrderId>>,
    silent_users: Mutex<HashSet<AccountId>>,
}

impl AuthManager for FakeAuth {
    fn auth(&self, _user: &AccountId, _msg: &[u8], _sig: &[u8]) -> Result<()> {
        Ok(())
    }
    fn suspended(&self, _user: &AccountId) -> bool {
        false
    }
    fn send(&self, user: &AccountId, msg: Message) -> Result<()> {
        self.sent.lock().unwrap().push((*user, msg));
        Ok(())
    }
    fn request_preimage(
        &self,
        user: &AccountId,
        _order_id: OrderId,
        _deadline: Duration,
    ) -> Option<Preimage> {
        if self.silent_users.lock().unwrap().contains(user) {
            return None;
        }
        // Test orders commit to the user's own ID bytes.
        Some(Preimage(user.0))
    }
    fn preimage_success(&self, _user: &AccountId, _t: DateTime<Utc>, _oid: OrderId) {}
    fn missed_preimage(&self, _user: &AccountId, _t: DateTime<Utc>, oid: OrderId) {
        self.missed.lock().unwrap().push(oid);
    }
    fn record_cancel(&self, _user: &AccountId, _oid: OrderId, _target: OrderId, _t: DateTime<Utc>) {
    }
    fn record_completed_order(&self, _user: &AccountId, oid: OrderId, _t: DateTime<Utc>) {
        self.completed.lock().unwrap().push(oid);
    }
    fn user_settling_limit(&self, _user: &AccountId, _lot_size: u64) -> u64 {
        u64::MAX
    }
}

#[derive(Default)]
struct SilentNotifier {
    revokes: Mutex<Vec<(AccountId, MatchId)>>,
}

impl SwapNotifier for SilentNotifier {
    fn audit(&self, _user: &AccountId, _note: AuditNote) {}
    fn redemption(&self, _user: &AccountId, _note: RedemptionNote) {}
    fn revoke(&self, _user: &AccountId, _note: RevokeMatchNote) {}
    fn swap_failure(&self, user: &AccountId, match_id: MatchId) {
        self.revokes.lock().unwrap().push((*user, match_id));
    }
}

#[derive(Debug)]
struct FakeCoin {
    id: CoinId,
    value: u64,
}

impl Coin for FakeCoin {
    fn id(&self) -> &CoinId {
        &self.id
    }
    fn value(&self) -> u64 {
        self.value
    }
    fn fee_rate(&self) -> u64 {
        100
    }
    fn confirmations(&self) -> Result<i64> {
        Ok(3)
    }
}

impl FundingCoin for FakeCoin {
    fn auth(&self, _pubkeys: &[Vec<u8>], _sigs: &[Vec<u8>], _msg: &[u8]) -> Result<()> {
        Ok(())
    }
    fn spend_size(&self) -> u32 {
        250
    }
}

#[derive(Default)]
struct FakeUtxoBackend {
    coins: Mutex<HashMap<CoinId, u64>>,
}

impl Backend for FakeUtxoBackend {
    fn validate_coin_id(&self, coin_id: &CoinId) -> Result<String> {
        Ok(coin_id.to_string())
    }
    fn check_address(&self, addr: &str) -> bool {
        !addr.is_empty()
    }
    fn output_tracker(&self) -> Option<&dyn swapmatch_types::OutputTracker> {
        Some(self)
    }
}

impl swapmatch_types::OutputTracker for FakeUtxoBackend {
    fn funding_coin(
        &self,
        coin_id: &CoinId,
        _redeem_script: &[u8],
        _timeout: Duration,
    ) -> Result<Box<dyn FundingCoin>> {
        let value = self
            .coins
            .lock()
            .unwrap()
            .get(coin_id)
            .copied()
            .ok_or_else(|| DexError::CoinNotFound(coin_id.clone()))?;
        Ok(Box::new(FakeCoin {
            id: coin_id.clone(),
            value,
        }))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn utxo_asset(id: u32, symbol: &str) -> Asset {
    Asset {
        id: AssetId(id),
        symbol: symbol.into(),
        version: 0,
        max_fee_rate: 10,
        swap_size: 251,
        swap_size_base: 85,
        redeem_size: 0,
        swap_conf: 1,
        unit_info: UnitInfo {
            atomic_unit: "atoms".into(),
            conventional: Denomination {
                unit: symbol.to_uppercase(),
                conversion_factor: 100_000_000,
            },
        },
    }
}

struct Rig {
    server: Server,
    auth: Arc<FakeAuth>,
    notifier: Arc<SilentNotifier>,
    archive: Arc<MemArchive>,
    dcr: Arc<FakeUtxoBackend>,
    btc: Arc<FakeUtxoBackend>,
}

fn rig() -> Rig {
    let auth = Arc::new(FakeAuth::default());
    let notifier = Arc::new(SilentNotifier::default());
    let archive = Arc::new(MemArchive::new());
    let dcr = Arc::new(FakeUtxoBackend::default());
    let btc = Arc::new(FakeUtxoBackend::default());

    let assets = HashMap::from([
        (
            AssetId(42),
            BackedAsset {
                asset: utxo_asset(42, "dcr"),
                backend: dcr.clone(),
            },
        ),
        (
            AssetId(0),
            BackedAsset {
                asset: utxo_asset(0, "btc"),
                backend: btc.clone(),
            },
        ),
    ]);

    let cfg = ServerConfig {
        network: Network::Regtest,
        data_dir: "/tmp/swapmatch-test".into(),
        listen: "127.0.0.1:17232".parse().unwrap(),
        markets: vec![MarketConfig {
            name: "dcr_btc".into(),
            base: AssetId(42),
            quote: AssetId(0),
            lot_size: LOT,
            rate_step: 10_000,
            epoch_duration_ms: EPOCH_MS,
            market_buy_buffer: swapmatch_types::constants::default_market_buy_buffer(),
        }],
    };

    let server = Server::new(
        &cfg,
        assets,
        auth.clone(),
        archive.clone(),
        Arc::new(NullFeed),
        notifier.clone(),
    )
    .unwrap();

    Rig {
        server,
        auth,
        notifier,
        archive,
        dcr,
        btc,
    }
}

fn user(b: u8) -> AccountId {
    AccountId::from_bytes([b; 32])
}

fn limit_msg(rig: &Rig, user_byte: u8, sell: bool, qty: u64, coin: CoinId) -> (AccountId, Message) {
    let backend = if sell { &rig.dcr } else { &rig.btc };
    backend.coins.lock().unwrap().insert(coin.clone(), 100 * LOT);

    let acct = user(user_byte);
    let payload = LimitPayload {
        prefix: PrefixWire {
            account_id: acct,
            base: AssetId(42),
            quote: AssetId(0),
            order_type: OrderType::Limit.code(),
            client_time: Utc::now().timestamp_millis() as u64,
            server_time: 0,
            commit: Preimage([user_byte; 32]).commitment(),
        },
        trade: TradeWire {
            coins: vec![CoinProof {
                id: coin,
                pubkeys: vec![vec![2; 33]],
                sigs: vec![vec![3; 64]],
                redeem: vec![],
            }],
            side: if sell { msgs::SIDE_SELL } else { msgs::SIDE_BUY },
            quantity: qty,
            address: format!("addr-{user_byte}"),
        },
        rate: RATE,
        tif: TimeInForce::Standing.code(),
        redeem_sig: None,
        sig: vec![1; 64],
    };
    (acct, Message::request(u64::from(user_byte), msgs::LIMIT_ROUTE, &payload).unwrap())
}

/// Close the market's current epoch by ticking past its window.
fn close_epoch(rig: &Rig, offset_epochs: i64) -> DateTime<Utc> {
    let now = Utc::now() + chrono::Duration::milliseconds(EPOCH_MS as i64 * offset_epochs);
    rig.server.market("dcr_btc").unwrap().tick(now);
    now
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn order_to_match_to_swap_completion() {
    let r = rig();
    let market = r.server.market("dcr_btc").unwrap();
    let router = r.server.router();

    // Epoch 1: Alice's standing sell books.
    let (alice, msg) = limit_msg(&r, 1, true, LOT, CoinId::from_bytes(vec![1; 36]));
    router.handle_limit(alice, &msg).unwrap();
    close_epoch(&r, 2);
    assert_eq!(market.book().sell_count(), 1);

    // Epoch 2: Bob's crossing buy matches it.
    let (bob, msg) = limit_msg(&r, 2, false, LOT, CoinId::from_bytes(vec![2; 36]));
    router.handle_limit(bob, &msg).unwrap();
    close_epoch(&r, 4);

    assert_eq!(market.book().sell_count() + market.book().buy_count(), 0);
    assert_eq!(r.server.swapper().active(), 1);
    let live = r.archive.active_matches().unwrap();
    assert_eq!(live.len(), 1);
    let m = &live[0];
    assert_eq!(m.rate, RATE);
    assert_eq!(m.quantity, LOT);
    assert_eq!(m.maker_user, alice);
    assert_eq!(m.taker_user, bob);
    // Two epoch reports archived, the second carrying the match volume.
    let epochs = r.archive.epoch_results();
    assert_eq!(epochs.len(), 2);
    assert_eq!(epochs[1].stats.match_volume, LOT);
    assert_eq!(epochs[1].orders_revealed.len(), 1);

    // Both parties' funding coins now ride under the match.
    // (Holder checks go through the market's coin locker via the router;
    // the transfer leaves no order-held locks behind.)

    // Drive the swap to completion.
    let swapper = r.server.swapper();
    let now = Utc::now();
    swapper
        .handle_init(
            &alice,
            &InitPayload {
                order_id: m.maker_order,
                match_id: m.id,
                coin_id: CoinId::from_bytes(vec![0xa1; 8]),
                contract: vec![0xc0],
                sig: vec![],
            },
            now,
        )
        .unwrap();
    swapper
        .handle_init(
            &bob,
            &InitPayload {
                order_id: m.taker_order,
                match_id: m.id,
                coin_id: CoinId::from_bytes(vec![0xb1; 8]),
                contract: vec![0xc1],
                sig: vec![],
            },
            now,
        )
        .unwrap();
    swapper
        .handle_redeem(
            &alice,
            &RedeemPayload {
                order_id: m.maker_order,
                match_id: m.id,
                coin_id: CoinId::from_bytes(vec![0xa2; 8]),
                secret: vec![9; 32],
                sig: vec![],
            },
            now,
        )
        .unwrap();
    swapper
        .handle_redeem(
            &bob,
            &RedeemPayload {
                order_id: m.taker_order,
                match_id: m.id,
                coin_id: CoinId::from_bytes(vec![0xb2; 8]),
                secret: vec![],
                sig: vec![],
            },
            now,
        )
        .unwrap();
    assert_eq!(swapper.active(), 0);
    assert_eq!(
        r.archive.match_record(&m.id).unwrap().status,
        MatchStatus::MatchComplete
    );
    // The archive holds the full audited transition log.
    assert_eq!(r.archive.transitions().len(), 4);

    // The next tick prunes the settled order state.
    close_epoch(&r, 5);
}

#[test]
fn missed_preimage_releases_coin_locks() {
    let r = rig();
    let router = r.server.router();

    let (alice, msg) = limit_msg(&r, 3, true, LOT, CoinId::from_bytes(vec![3; 36]));
    r.auth.silent_users.lock().unwrap().insert(alice);
    router.handle_limit(alice, &msg).unwrap();

    close_epoch(&r, 2);

    // The order was dropped, reported missed, and its coins released.
    assert_eq!(r.auth.missed.lock().unwrap().len(), 1);
    let epochs = r.archive.epoch_results();
    assert_eq!(epochs[0].orders_missed.len(), 1);
    assert!(epochs[0].orders_revealed.is_empty());
    let market = r.server.market("dcr_btc").unwrap();
    assert_eq!(market.book().sell_count(), 0);
}

#[test]
fn swap_deadline_revocation_flows_back() {
    let r = rig();
    let router = r.server.router();

    let (alice, msg) = limit_msg(&r, 1, true, LOT, CoinId::from_bytes(vec![1; 36]));
    router.handle_limit(alice, &msg).unwrap();
    close_epoch(&r, 2);
    let (bob, msg) = limit_msg(&r, 2, false, LOT, CoinId::from_bytes(vec![2; 36]));
    router.handle_limit(bob, &msg).unwrap();
    close_epoch(&r, 4);

    let m = &r.archive.active_matches().unwrap()[0];
    // Nobody acts: past the broadcast deadline the maker is at fault.
    let revoked = r
        .server
        .swapper()
        .tick(Utc::now() + chrono::Duration::seconds(601) + chrono::Duration::milliseconds(4 * EPOCH_MS as i64));
    assert_eq!(revoked, vec![m.id]);
    assert_eq!(
        r.notifier.revokes.lock().unwrap().as_slice(),
        &[(alice, m.id)]
    );
    assert_eq!(
        r.archive.match_record(&m.id).unwrap().status,
        MatchStatus::Refunded
    );
}

#[test]
fn archive_failure_halts_market() {
    let r = rig();
    let router = r.server.router();
    let market = r.server.market("dcr_btc").unwrap();

    r.archive.break_writes();
    let (alice, msg) = limit_msg(&r, 1, true, LOT, CoinId::from_bytes(vec![1; 36]));
    router.handle_limit(alice, &msg).unwrap();

    // The submission failed at the archive write and halted the market.
    assert!(!r.server.archive_healthy());
    assert!(!market.running());
    // The rejection went back through the auth manager.
    let errors: Vec<u16> = r
        .auth
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter_map(|(_, msg)| {
            msg.parse_payload::<msgs::ResponsePayload>()
                .ok()
                .and_then(|p| p.error)
                .map(|e| e.code)
        })
        .collect();
    assert_eq!(errors, vec![900]);
}

#[test]
fn purge_suspension_revokes_booked_orders() {
    let r = rig();
    let router = r.server.router();
    let market = r.server.market("dcr_btc").unwrap();

    let (alice, msg) = limit_msg(&r, 1, true, LOT, CoinId::from_bytes(vec![1; 36]));
    router.handle_limit(alice, &msg).unwrap();
    close_epoch(&r, 2);
    assert_eq!(market.book().sell_count(), 1);

    router.suspend_market("dcr_btc", Utc::now(), false).unwrap();
    close_epoch(&r, 3);

    assert!(!market.running());
    assert_eq!(market.book().sell_count(), 0, "purged book");

    // New submissions are refused.
    let (carol, msg) = limit_msg(&r, 4, true, LOT, CoinId::from_bytes(vec![4; 36]));
    let err = router.handle_limit(carol, &msg).unwrap_err();
    assert!(matches!(err, DexError::MarketNotRunning(_)));
}

#[test]
fn persist_suspension_keeps_the_book() {
    let r = rig();
    let router = r.server.router();
    let market = r.server.market("dcr_btc").unwrap();

    let (alice, msg) = limit_msg(&r, 1, true, LOT, CoinId::from_bytes(vec![1; 36]));
    router.handle_limit(alice, &msg).unwrap();
    close_epoch(&r, 2);

    router.suspend_market("dcr_btc", Utc::now(), true).unwrap();
    close_epoch(&r, 3);

    assert!(!market.running());
    assert_eq!(market.book().sell_count(), 1, "book retained");
}

#[test]
fn restart_recovery_resumes_live_matches() {
    let r = rig();
    let router = r.server.router();

    let (alice, msg) = limit_msg(&r, 1, true, LOT, CoinId::from_bytes(vec![1; 36]));
    router.handle_limit(alice, &msg).unwrap();
    close_epoch(&r, 2);
    let (bob, msg) = limit_msg(&r, 2, false, LOT, CoinId::from_bytes(vec![2; 36]));
    router.handle_limit(bob, &msg).unwrap();
    close_epoch(&r, 4);
    assert_eq!(r.server.swapper().active(), 1);

    // A fresh server over the same archive picks the match back up.
    let assets = HashMap::from([
        (
            AssetId(42),
            BackedAsset {
                asset: utxo_asset(42, "dcr"),
                backend: r.dcr.clone(),
            },
        ),
        (
            AssetId(0),
            BackedAsset {
                asset: utxo_asset(0, "btc"),
                backend: r.btc.clone(),
            },
        ),
    ]);
    let cfg = ServerConfig {
        network: Network::Regtest,
        data_dir: "/tmp/swapmatch-test".into(),
        listen: "127.0.0.1:17233".parse().unwrap(),
        markets: vec![MarketConfig {
            name: "dcr_btc".into(),
            base: AssetId(42),
            quote: AssetId(0),
            lot_size: LOT,
            rate_step: 10_000,
            epoch_duration_ms: EPOCH_MS,
            market_buy_buffer: swapmatch_types::constants::default_market_buy_buffer(),
        }],
    };
    let reborn = Server::new(
        &cfg,
        assets,
        r.auth.clone(),
        r.archive.clone(),
        Arc::new(NullFeed),
        r.notifier.clone(),
    )
    .unwrap();
    assert_eq!(reborn.swapper().active(), 1);
}

#[test]
fn coin_lock_exclusivity_across_submissions() {
    let r = rig();
    let router = r.server.router();

    let shared = CoinId::from_bytes(vec![7; 36]);
    let (alice, msg) = limit_msg(&r, 1, true, LOT, shared.clone());
    router.handle_limit(alice, &msg).unwrap();

    // A second order spending the same coin is refused at ingress.
    let (carol, msg) = limit_msg(&r, 4, true, LOT, shared);
    let err = router.handle_limit(carol, &msg).unwrap_err();
    match err {
        DexError::Funding(reason) => assert!(reason.contains("locked")),
        other => panic!("expected funding error, got {other}"),
    }
}

#[test]
fn locker_is_shared_between_router_and_markets() {
    // Sanity-check the LockHolder transfer surface used by the market.
    let locker = CoinLocker::new();
    let oid = OrderId::from_bytes([1; 32]);
    let mid = MatchId::from_bytes([2; 32]);
    let coin = CoinId::from_bytes(vec![1, 2, 3]);
    locker
        .lock_order_coins(AssetId(42), &[coin.clone()], oid)
        .unwrap();
    locker
        .transfer_to_match(AssetId(42), &[coin.clone()], oid, mid)
        .unwrap();
    assert_eq!(
        locker.holder(AssetId(42), &coin),
        Some(LockHolder::Match(mid))
    );
}
