//! The per-match swap state machine.
//!
//! ```text
//! NewlyMatched
//!   └─> MakerSwapCast          (maker broadcast their contract)
//!         └─> TakerSwapCast    (taker audited it, broadcast theirs)
//!               └─> MakerRedeemed  (maker redeemed, revealing the secret)
//!                     └─> MatchComplete (taker redeemed with the secret)
//! any non-terminal ──deadline missed──> Refunded
//! ```
//!
//! Maker acts first, and lock times are asymmetric (the taker's
//! contract locks for ~8 h against the maker's ~20 h), so if the maker
//! vanishes mid-protocol the taker's funds unlock first.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use swapmatch_types::msgs::{
    AuditNote, InitPayload, MatchStatusResult, RedeemPayload, RedemptionNote, RevokeMatchNote,
};
use swapmatch_types::{
    lock_time_maker, lock_time_taker, AccountId, DexError, Match, MatchId, MatchStatus, Network,
    Result,
};
use tracing::{debug, info, warn};

/// Default deadline for each required broadcast action.
pub const DEFAULT_BROADCAST_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Which side of the match an actor is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapSide {
    Maker,
    Taker,
}

impl std::fmt::Display for SwapSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Maker => write!(f, "maker"),
            Self::Taker => write!(f, "taker"),
        }
    }
}

/// The action a transition records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    MakerSwap,
    TakerSwap,
    MakerRedeem,
    TakerRedeem,
    Revoke,
}

impl std::fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MakerSwap => write!(f, "maker_swap"),
            Self::TakerSwap => write!(f, "taker_swap"),
            Self::MakerRedeem => write!(f, "maker_redeem"),
            Self::TakerRedeem => write!(f, "taker_redeem"),
            Self::Revoke => write!(f, "revoke"),
        }
    }
}

/// One audited protocol step: who did what to which match, with proof.
#[derive(Debug, Clone)]
pub struct SwapTransition {
    pub match_id: MatchId,
    pub actor: AccountId,
    pub action: TransitionAction,
    pub coin: Option<swapmatch_types::CoinId>,
    pub new_status: MatchStatus,
    pub time: DateTime<Utc>,
}

/// Archive sink for transition records.
pub trait SwapArchiver: Send + Sync {
    /// # Errors
    /// An archive failure marks the archive unhealthy upstream.
    fn record_transition(&self, rec: &SwapTransition) -> Result<()>;
}

/// Outbound notifications and failure accounting, implemented by the
/// comms/auth layer.
pub trait SwapNotifier: Send + Sync {
    fn audit(&self, user: &AccountId, note: AuditNote);
    fn redemption(&self, user: &AccountId, note: RedemptionNote);
    fn revoke(&self, user: &AccountId, note: RevokeMatchNote);
    /// A missed broadcast deadline, charged to the non-acting party.
    fn swap_failure(&self, user: &AccountId, match_id: MatchId);
}

/// A live match under negotiation.
#[derive(Debug, Clone)]
struct ActiveSwap {
    m: Match,
    /// Deadline for the next required action.
    deadline: DateTime<Utc>,
    /// Lock expiry of the maker's contract, once cast.
    maker_lock_expiry: Option<DateTime<Utc>>,
    /// Lock expiry of the taker's contract, once cast.
    taker_lock_expiry: Option<DateTime<Utc>>,
    /// The swap secret, once the maker's redemption reveals it.
    secret: Option<Vec<u8>>,
}

impl ActiveSwap {
    /// Who must act next, given the current status.
    fn next_actor(&self) -> Option<SwapSide> {
        match self.m.status {
            MatchStatus::NewlyMatched | MatchStatus::TakerSwapCast => Some(SwapSide::Maker),
            MatchStatus::MakerSwapCast | MatchStatus::MakerRedeemed => Some(SwapSide::Taker),
            MatchStatus::MatchComplete | MatchStatus::Refunded => None,
        }
    }

    fn user(&self, side: SwapSide) -> AccountId {
        match side {
            SwapSide::Maker => self.m.maker_user,
            SwapSide::Taker => self.m.taker_user,
        }
    }

    fn side_of(&self, user: &AccountId) -> Option<SwapSide> {
        if *user == self.m.maker_user {
            Some(SwapSide::Maker)
        } else if *user == self.m.taker_user {
            Some(SwapSide::Taker)
        } else {
            None
        }
    }
}

/// Drives all active matches through the swap protocol.
pub struct SwapCoordinator {
    network: Network,
    bcast_timeout: Duration,
    archive: Arc<dyn SwapArchiver>,
    notifier: Arc<dyn SwapNotifier>,
    swaps: Mutex<HashMap<MatchId, ActiveSwap>>,
}

impl SwapCoordinator {
    #[must_use]
    pub fn new(
        network: Network,
        bcast_timeout: Duration,
        archive: Arc<dyn SwapArchiver>,
        notifier: Arc<dyn SwapNotifier>,
    ) -> Self {
        Self {
            network,
            bcast_timeout,
            archive,
            notifier,
            swaps: Mutex::new(HashMap::new()),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<MatchId, ActiveSwap>> {
        self.swaps.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deadline_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        t + chrono::Duration::from_std(self.bcast_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(10))
    }

    /// Accept a new match from the epoch pipeline. Cancel matches are
    /// settled bookkeeping and never negotiate.
    pub fn negotiate(&self, m: Match, now: DateTime<Utc>) {
        if m.is_cancellation() {
            debug!(match_id = %m.id, "cancel match requires no negotiation");
            return;
        }
        info!(match_id = %m.id, maker = %m.maker_user.short(), taker = %m.taker_user.short(), "negotiating match");
        self.table().insert(
            m.id,
            ActiveSwap {
                deadline: self.deadline_after(now),
                m,
                maker_lock_expiry: None,
                taker_lock_expiry: None,
                secret: None,
            },
        );
    }

    /// Rebuild the live set from archived matches after a restart.
    /// Deadlines restart from `now`: the counterparty keeps its full
    /// broadcast window rather than being penalized for our downtime.
    pub fn resume(&self, matches: Vec<Match>, now: DateTime<Utc>) {
        let mut table = self.table();
        for m in matches {
            if m.status.is_terminal() || m.is_cancellation() {
                continue;
            }
            debug!(match_id = %m.id, status = %m.status, "resuming swap");
            table.insert(
                m.id,
                ActiveSwap {
                    deadline: self.deadline_after(now),
                    maker_lock_expiry: None,
                    taker_lock_expiry: None,
                    secret: None,
                    m,
                },
            );
        }
    }

    /// The number of matches still negotiating.
    #[must_use]
    pub fn active(&self) -> usize {
        self.table().len()
    }

    /// Handle an `init` notification: the actor broadcast their swap
    /// contract.
    ///
    /// # Errors
    /// `MatchNotFound` for an unknown match, `WrongMatchState` when the
    /// actor is not the one the protocol is waiting on, or
    /// `OrderParameter` for an empty contract.
    pub fn handle_init(
        &self,
        user: &AccountId,
        payload: &InitPayload,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if payload.contract.is_empty() {
            return Err(DexError::OrderParameter("empty swap contract".into()));
        }
        let mut table = self.table();
        let swap = table
            .get_mut(&payload.match_id)
            .ok_or(DexError::MatchNotFound(payload.match_id))?;
        let side = swap
            .side_of(user)
            .ok_or(DexError::MatchNotFound(payload.match_id))?;

        let (action, new_status) = match (swap.m.status, side) {
            (MatchStatus::NewlyMatched, SwapSide::Maker) => {
                (TransitionAction::MakerSwap, MatchStatus::MakerSwapCast)
            }
            (MatchStatus::MakerSwapCast, SwapSide::Taker) => {
                (TransitionAction::TakerSwap, MatchStatus::TakerSwapCast)
            }
            (status, side) => {
                return Err(DexError::WrongMatchState {
                    match_id: payload.match_id,
                    detail: format!("init from {side} in state {status}"),
                })
            }
        };

        match side {
            SwapSide::Maker => {
                swap.m.maker_swap_coin = Some(payload.coin_id.clone());
                let lock = lock_time_maker(self.network);
                swap.maker_lock_expiry =
                    Some(now + chrono::Duration::seconds(lock.as_secs() as i64));
            }
            SwapSide::Taker => {
                swap.m.taker_swap_coin = Some(payload.coin_id.clone());
                let lock = lock_time_taker(self.network);
                swap.taker_lock_expiry =
                    Some(now + chrono::Duration::seconds(lock.as_secs() as i64));
            }
        }
        swap.m.status = new_status;
        swap.m.updated_at = now;
        swap.deadline = self.deadline_after(now);

        let counterparty = swap.user(swap.next_actor().unwrap_or(SwapSide::Taker));
        let audit = AuditNote {
            match_id: swap.m.id,
            order_id: payload.order_id,
            coin_id: payload.coin_id.clone(),
            contract: payload.contract.clone(),
            time: now.timestamp_millis() as u64,
        };
        let rec = SwapTransition {
            match_id: swap.m.id,
            actor: *user,
            action,
            coin: Some(payload.coin_id.clone()),
            new_status,
            time: now,
        };
        drop(table);

        self.archive.record_transition(&rec)?;
        self.notifier.audit(&counterparty, audit);
        info!(match_id = %rec.match_id, action = %action, "swap contract recorded");
        Ok(())
    }

    /// Handle a `redeem` notification. The maker's redemption must carry
    /// the revealed secret; the taker's closes the match.
    ///
    /// # Errors
    /// Same contract as [`Self::handle_init`].
    pub fn handle_redeem(
        &self,
        user: &AccountId,
        payload: &RedeemPayload,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut table = self.table();
        let swap = table
            .get_mut(&payload.match_id)
            .ok_or(DexError::MatchNotFound(payload.match_id))?;
        let side = swap
            .side_of(user)
            .ok_or(DexError::MatchNotFound(payload.match_id))?;

        let (action, new_status) = match (swap.m.status, side) {
            (MatchStatus::TakerSwapCast, SwapSide::Maker) => {
                if payload.secret.is_empty() {
                    return Err(DexError::OrderParameter(
                        "maker redemption must reveal the secret".into(),
                    ));
                }
                (TransitionAction::MakerRedeem, MatchStatus::MakerRedeemed)
            }
            (MatchStatus::MakerRedeemed, SwapSide::Taker) => {
                (TransitionAction::TakerRedeem, MatchStatus::MatchComplete)
            }
            (status, side) => {
                return Err(DexError::WrongMatchState {
                    match_id: payload.match_id,
                    detail: format!("redeem from {side} in state {status}"),
                })
            }
        };

        match side {
            SwapSide::Maker => {
                swap.m.maker_redeem_coin = Some(payload.coin_id.clone());
                swap.secret = Some(payload.secret.clone());
            }
            SwapSide::Taker => swap.m.taker_redeem_coin = Some(payload.coin_id.clone()),
        }
        swap.m.status = new_status;
        swap.m.updated_at = now;
        swap.deadline = self.deadline_after(now);

        let counterparty = swap.user(match side {
            SwapSide::Maker => SwapSide::Taker,
            SwapSide::Taker => SwapSide::Maker,
        });
        let note = RedemptionNote {
            match_id: swap.m.id,
            order_id: payload.order_id,
            coin_id: payload.coin_id.clone(),
            secret: payload.secret.clone(),
        };
        let rec = SwapTransition {
            match_id: swap.m.id,
            actor: *user,
            action,
            coin: Some(payload.coin_id.clone()),
            new_status,
            time: now,
        };
        let done = new_status == MatchStatus::MatchComplete;
        if done {
            table.remove(&payload.match_id);
        }
        drop(table);

        self.archive.record_transition(&rec)?;
        self.notifier.redemption(&counterparty, note);
        if done {
            info!(match_id = %rec.match_id, "match complete");
        }
        Ok(())
    }

    /// Check broadcast deadlines. A match whose next actor missed its
    /// deadline is revoked: the failure is charged to the non-acting
    /// party, both sides are notified, and the waiting counterparty
    /// refunds once their contract's lock time expires.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<MatchId> {
        let expired: Vec<ActiveSwap> = {
            let mut table = self.table();
            let ids: Vec<MatchId> = table
                .iter()
                .filter(|(_, s)| now >= s.deadline)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| table.remove(id)).collect()
        };

        let mut revoked = Vec::with_capacity(expired.len());
        for mut swap in expired {
            let Some(at_fault) = swap.next_actor() else {
                continue;
            };
            let at_fault_user = swap.user(at_fault);
            warn!(
                match_id = %swap.m.id,
                status = %swap.m.status,
                at_fault = %at_fault,
                maker_lock_expiry = ?swap.maker_lock_expiry,
                taker_lock_expiry = ?swap.taker_lock_expiry,
                "broadcast deadline missed; revoking match"
            );
            swap.m.status = MatchStatus::Refunded;
            swap.m.updated_at = now;

            let rec = SwapTransition {
                match_id: swap.m.id,
                actor: at_fault_user,
                action: TransitionAction::Revoke,
                coin: None,
                new_status: MatchStatus::Refunded,
                time: now,
            };
            if let Err(err) = self.archive.record_transition(&rec) {
                warn!(match_id = %swap.m.id, %err, "failed to archive revocation");
            }
            self.notifier.swap_failure(&at_fault_user, swap.m.id);
            for (side, order) in [
                (SwapSide::Maker, swap.m.maker_order),
                (SwapSide::Taker, swap.m.taker_order),
            ] {
                self.notifier.revoke(
                    &swap.user(side),
                    RevokeMatchNote {
                        match_id: swap.m.id,
                        order_id: order,
                    },
                );
            }
            revoked.push(swap.m.id);
        }
        revoked
    }

    /// Answer a `match_status` request for the given matches.
    #[must_use]
    pub fn match_status(&self, ids: &[MatchId]) -> Vec<MatchStatusResult> {
        let table = self.table();
        ids.iter()
            .filter_map(|id| table.get(id))
            .map(|s| MatchStatusResult {
                match_id: s.m.id,
                status: s.m.status,
                maker_swap: s.m.maker_swap_coin.clone(),
                taker_swap: s.m.taker_swap_coin.clone(),
                maker_redeem: s.m.maker_redeem_coin.clone(),
                taker_redeem: s.m.taker_redeem_coin.clone(),
            })
            .collect()
    }

    /// Copy out a live match.
    #[must_use]
    pub fn live_match(&self, id: &MatchId) -> Option<Match> {
        self.table().get(id).map(|s| s.m.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swapmatch_types::order::{from_unix_ms, test_orders};
    use swapmatch_types::{CoinId, Order};

    #[derive(Default)]
    struct RecordingArchive {
        recs: Mutex<Vec<SwapTransition>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl SwapArchiver for RecordingArchive {
        fn record_transition(&self, rec: &SwapTransition) -> Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(DexError::ArchiveFailure("down".into()));
            }
            self.recs.lock().unwrap().push(rec.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        audits: Mutex<Vec<(AccountId, AuditNote)>>,
        redemptions: Mutex<Vec<(AccountId, RedemptionNote)>>,
        revokes: Mutex<Vec<(AccountId, RevokeMatchNote)>>,
        failures: Mutex<Vec<(AccountId, MatchId)>>,
    }

    impl SwapNotifier for RecordingNotifier {
        fn audit(&self, user: &AccountId, note: AuditNote) {
            self.audits.lock().unwrap().push((*user, note));
        }
        fn redemption(&self, user: &AccountId, note: RedemptionNote) {
            self.redemptions.lock().unwrap().push((*user, note));
        }
        fn revoke(&self, user: &AccountId, note: RevokeMatchNote) {
            self.revokes.lock().unwrap().push((*user, note));
        }
        fn swap_failure(&self, user: &AccountId, match_id: MatchId) {
            self.failures.lock().unwrap().push((*user, match_id));
        }
    }

    struct Rig {
        coord: SwapCoordinator,
        archive: Arc<RecordingArchive>,
        notifier: Arc<RecordingNotifier>,
        m: Match,
    }

    fn rig() -> Rig {
        let archive = Arc::new(RecordingArchive::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let coord = SwapCoordinator::new(
            Network::Regtest,
            Duration::from_secs(600),
            archive.clone(),
            notifier.clone(),
        );
        let maker = test_orders::limit(1, true, 1_000_000, 100_000_000, 10_000);
        let taker = Order::Limit(test_orders::limit(2, false, 1_000_000, 100_000_000, 20_000));
        let m = Match::trade(&maker, &taker, 100_000_000, 3, from_unix_ms(30_000));
        coord.negotiate(m.clone(), from_unix_ms(30_000));
        Rig {
            coord,
            archive,
            notifier,
            m,
        }
    }

    fn init(order: swapmatch_types::OrderId, m: MatchId, tag: u8) -> InitPayload {
        InitPayload {
            order_id: order,
            match_id: m,
            coin_id: CoinId::from_bytes(vec![tag; 8]),
            contract: vec![0xc0, tag],
            sig: vec![],
        }
    }

    fn redeem(order: swapmatch_types::OrderId, m: MatchId, tag: u8, secret: Vec<u8>) -> RedeemPayload {
        RedeemPayload {
            order_id: order,
            match_id: m,
            coin_id: CoinId::from_bytes(vec![tag; 8]),
            secret,
            sig: vec![],
        }
    }

    #[test]
    fn happy_path_runs_to_completion() {
        let r = rig();
        let (maker, taker) = (r.m.maker_user, r.m.taker_user);
        let mid = r.m.id;

        r.coord
            .handle_init(&maker, &init(r.m.maker_order, mid, 1), from_unix_ms(31_000))
            .unwrap();
        assert_eq!(
            r.coord.live_match(&mid).unwrap().status,
            MatchStatus::MakerSwapCast
        );
        // Taker got the audit.
        assert_eq!(r.notifier.audits.lock().unwrap()[0].0, taker);

        r.coord
            .handle_init(&taker, &init(r.m.taker_order, mid, 2), from_unix_ms(32_000))
            .unwrap();
        assert_eq!(
            r.coord.live_match(&mid).unwrap().status,
            MatchStatus::TakerSwapCast
        );

        r.coord
            .handle_redeem(
                &maker,
                &redeem(r.m.maker_order, mid, 3, vec![9; 32]),
                from_unix_ms(33_000),
            )
            .unwrap();
        assert_eq!(
            r.coord.live_match(&mid).unwrap().status,
            MatchStatus::MakerRedeemed
        );
        // The taker's redemption note carries the revealed secret.
        let redemptions = r.notifier.redemptions.lock().unwrap();
        assert_eq!(redemptions[0].0, taker);
        assert_eq!(redemptions[0].1.secret, vec![9; 32]);
        drop(redemptions);

        r.coord
            .handle_redeem(
                &taker,
                &redeem(r.m.taker_order, mid, 4, vec![]),
                from_unix_ms(34_000),
            )
            .unwrap();
        assert_eq!(r.coord.active(), 0, "completed match leaves the live set");

        let recs = r.archive.recs.lock().unwrap();
        let actions: Vec<TransitionAction> = recs.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![
                TransitionAction::MakerSwap,
                TransitionAction::TakerSwap,
                TransitionAction::MakerRedeem,
                TransitionAction::TakerRedeem,
            ]
        );
    }

    #[test]
    fn taker_cannot_act_first() {
        let r = rig();
        let err = r
            .coord
            .handle_init(
                &r.m.taker_user,
                &init(r.m.taker_order, r.m.id, 1),
                from_unix_ms(31_000),
            )
            .unwrap_err();
        assert!(matches!(err, DexError::WrongMatchState { .. }));
    }

    #[test]
    fn stranger_is_not_found() {
        let r = rig();
        let stranger = AccountId::from_bytes([0xaa; 32]);
        let err = r
            .coord
            .handle_init(&stranger, &init(r.m.maker_order, r.m.id, 1), from_unix_ms(31_000))
            .unwrap_err();
        assert!(matches!(err, DexError::MatchNotFound(_)));
    }

    #[test]
    fn maker_redeem_requires_secret() {
        let r = rig();
        let (maker, taker) = (r.m.maker_user, r.m.taker_user);
        let mid = r.m.id;
        r.coord
            .handle_init(&maker, &init(r.m.maker_order, mid, 1), from_unix_ms(31_000))
            .unwrap();
        r.coord
            .handle_init(&taker, &init(r.m.taker_order, mid, 2), from_unix_ms(32_000))
            .unwrap();

        let err = r
            .coord
            .handle_redeem(&maker, &redeem(r.m.maker_order, mid, 3, vec![]), from_unix_ms(33_000))
            .unwrap_err();
        assert!(matches!(err, DexError::OrderParameter(_)));
    }

    #[test]
    fn missed_deadline_revokes_and_charges_the_idle_party() {
        let r = rig();
        // Nobody acts; the maker is on the hook.
        let revoked = r.coord.tick(from_unix_ms(30_000 + 600_001));
        assert_eq!(revoked, vec![r.m.id]);
        assert_eq!(r.coord.active(), 0);

        let failures = r.notifier.failures.lock().unwrap();
        assert_eq!(failures.as_slice(), &[(r.m.maker_user, r.m.id)]);
        // Both sides were told.
        assert_eq!(r.notifier.revokes.lock().unwrap().len(), 2);
        // The revocation is archived with Refunded status.
        let recs = r.archive.recs.lock().unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].action, TransitionAction::Revoke);
        assert_eq!(recs[0].new_status, MatchStatus::Refunded);
    }

    #[test]
    fn deadline_resets_on_each_action() {
        let r = rig();
        r.coord
            .handle_init(
                &r.m.maker_user,
                &init(r.m.maker_order, r.m.id, 1),
                from_unix_ms(30_000 + 500_000),
            )
            .unwrap();
        // The original deadline has passed but the maker acted; the new
        // deadline (for the taker) has not.
        assert!(r.coord.tick(from_unix_ms(30_000 + 600_001)).is_empty());
        // The taker's own window then expires.
        let revoked = r.coord.tick(from_unix_ms(30_000 + 500_000 + 600_001));
        assert_eq!(revoked, vec![r.m.id]);
        assert_eq!(
            r.notifier.failures.lock().unwrap().as_slice(),
            &[(r.m.taker_user, r.m.id)]
        );
    }

    #[test]
    fn resume_rehydrates_non_terminal_matches() {
        let r = rig();
        let mut live = r.m.clone();
        live.status = MatchStatus::MakerSwapCast;
        let mut dead = r.m.clone();
        dead.id = MatchId::from_bytes([0xdd; 32]);
        dead.status = MatchStatus::MatchComplete;

        let archive = Arc::new(RecordingArchive::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let coord = SwapCoordinator::new(
            Network::Regtest,
            Duration::from_secs(600),
            archive,
            notifier,
        );
        coord.resume(vec![live.clone(), dead], from_unix_ms(99_000));
        assert_eq!(coord.active(), 1);
        // The resumed match picks up where it left off: taker inits next.
        coord
            .handle_init(&live.taker_user, &init(live.taker_order, live.id, 2), from_unix_ms(99_500))
            .unwrap();
        assert_eq!(
            coord.live_match(&live.id).unwrap().status,
            MatchStatus::TakerSwapCast
        );
    }

    #[test]
    fn cancel_matches_are_not_negotiated() {
        let r = rig();
        let target = test_orders::limit(5, true, 1_000_000, 100_000_000, 10_000);
        let cancel = swapmatch_types::CancelOrder {
            prefix: swapmatch_types::Prefix {
                account_id: target.prefix.account_id,
                base: target.prefix.base,
                quote: target.prefix.quote,
                order_type: swapmatch_types::OrderType::Cancel,
                client_time: from_unix_ms(1_000),
                server_time: Some(from_unix_ms(1_010)),
                commit: swapmatch_types::Commitment::default(),
            },
            target_order_id: target.id(),
        };
        let cm = Match::cancellation(&target, &cancel, 3, from_unix_ms(30_000));
        let before = r.coord.active();
        r.coord.negotiate(cm, from_unix_ms(30_000));
        assert_eq!(r.coord.active(), before);
    }

    #[test]
    fn match_status_reports_coins() {
        let r = rig();
        let mid = r.m.id;
        r.coord
            .handle_init(&r.m.maker_user, &init(r.m.maker_order, mid, 1), from_unix_ms(31_000))
            .unwrap();

        let statuses = r.coord.match_status(&[mid]);
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, MatchStatus::MakerSwapCast);
        assert!(statuses[0].maker_swap.is_some());
        assert!(statuses[0].taker_swap.is_none());
    }

    #[test]
    fn archive_failure_surfaces() {
        let r = rig();
        r.archive
            .fail
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = r
            .coord
            .handle_init(
                &r.m.maker_user,
                &init(r.m.maker_order, r.m.id, 1),
                from_unix_ms(31_000),
            )
            .unwrap_err();
        assert!(matches!(err, DexError::ArchiveFailure(_)));
    }
}
