//! Settlement coordinator
//!
//! Drives every session through `Open -> Finished | Cancelled`. The guarded
//! `try_transition` write is the only thing that decides whether a session
//! has been paid: the ledger is touched strictly after it returns `true`, and
//! callers that lose the race get `AlreadySettled` without any ledger call.

use crate::{
    common::traits::{BalanceLedger, OutcomeNotifier, RandomSource, SessionStore},
    config::StakeplayConfig,
    errors::{SessionError, SessionResult},
    games::{
        odds,
        types::{
            Cancellation, GameSession, GameVariant, NewSession, Resolution, Selection, SelectionUpdate,
            SessionContext, SessionId, SessionStatus,
        },
    },
    metrics::SettlementMetrics,
    notifications::OutcomeEvent,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How many of an owner's most recent sessions are checked for an open one
const OPEN_CHECK_WINDOW: usize = 32;

/// Collaborators the coordinator is wired with
#[derive(Clone)]
pub struct SettlementPorts {
    pub store: Arc<dyn SessionStore>,
    pub ledger: Arc<dyn BalanceLedger>,
    pub notifier: Arc<dyn OutcomeNotifier>,
    pub random: Arc<dyn RandomSource>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementOptions {
    /// Gross coin-game payout per unit staked
    pub coin_payout_multiplier: f64,
    /// Reject a new session while the owner has an open one of the same variant
    pub one_open_session_per_owner: bool,
}

impl SettlementOptions {
    pub fn from_config(config: &StakeplayConfig) -> Self {
        Self {
            coin_payout_multiplier: config.games.coin.payout_multiplier,
            one_open_session_per_owner: config.settlement.one_open_session_per_owner,
        }
    }
}

impl Default for SettlementOptions {
    fn default() -> Self {
        Self::from_config(&StakeplayConfig::default())
    }
}

pub struct SettlementCoordinator {
    store: Arc<dyn SessionStore>,
    ledger: Arc<dyn BalanceLedger>,
    notifier: Arc<dyn OutcomeNotifier>,
    random: Arc<dyn RandomSource>,
    options: SettlementOptions,
    metrics: Arc<SettlementMetrics>,
}

impl SettlementCoordinator {
    pub fn new(ports: SettlementPorts, options: SettlementOptions, metrics: Arc<SettlementMetrics>) -> Self {
        Self {
            store: ports.store,
            ledger: ports.ledger,
            notifier: ports.notifier,
            random: ports.random,
            options,
            metrics,
        }
    }

    pub fn options(&self) -> &SettlementOptions {
        &self.options
    }

    pub fn metrics(&self) -> &Arc<SettlementMetrics> {
        &self.metrics
    }

    /// Debit the stake and persist a new `Open` session
    pub async fn create_session(
        &self,
        owner_key: &str,
        bet_amount: u64,
        variant: GameVariant,
        context: SessionContext,
    ) -> SessionResult<SessionId> {
        if owner_key.trim().is_empty() {
            return Err(SessionError::invalid("owner key must not be empty"));
        }
        if bet_amount == 0 {
            return Err(SessionError::invalid("bet amount must be positive"));
        }

        if self.options.one_open_session_per_owner {
            let recent = self.store.list_by_owner(owner_key, OPEN_CHECK_WINDOW).await?;
            if let Some(open) = recent
                .iter()
                .find(|s| s.status == SessionStatus::Open && s.variant == variant)
            {
                debug!(owner = owner_key, session_id = %open.id, %variant, "Owner already has an open session");
                return Err(SessionError::Conflict {
                    id: open.id,
                    status: open.status,
                });
            }
        }

        self.ledger.debit(owner_key, bet_amount).await?;

        let request = NewSession {
            owner_key: owner_key.to_string(),
            variant,
            bet_amount,
            context,
        };
        let session = match self.store.create(request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(owner = owner_key, bet = bet_amount, error = %e, "Session create failed, returning stake");
                if let Err(refund_err) = self.ledger.credit(owner_key, bet_amount).await {
                    error!(
                        owner = owner_key,
                        bet = bet_amount,
                        error = %refund_err,
                        "Stake compensation failed; ledger needs reconciliation"
                    );
                }
                return Err(e.into());
            }
        };

        self.metrics.record_created(bet_amount);
        info!(session_id = %session.id, owner = owner_key, %variant, bet = bet_amount, "Session opened");
        Ok(session.id)
    }

    /// Replace the selection of an open session (last write wins)
    pub async fn update_selection(&self, id: SessionId, selection: Selection) -> SessionResult<()> {
        validate_selection(&selection)?;

        let session = self.load(id).await?;
        if session.variant != selection.variant() {
            return Err(SessionError::invalid(format!(
                "{} selection for a {} session",
                selection.variant(),
                session.variant
            )));
        }
        if session.status != SessionStatus::Open {
            return Err(SessionError::Conflict {
                id,
                status: session.status,
            });
        }

        match self.store.update_selection(id, selection).await? {
            SelectionUpdate::Applied => {
                debug!(session_id = %id, "Selection updated");
                Ok(())
            }
            SelectionUpdate::NotOpen(status) => Err(SessionError::Conflict { id, status }),
            SelectionUpdate::Missing => Err(SessionError::NotFound(id)),
        }
    }

    /// Draw and settle. Exactly one caller per session sees `Settled`.
    pub async fn resolve(&self, id: SessionId) -> SessionResult<Resolution> {
        let session = self.load(id).await?;
        if session.status != SessionStatus::Open {
            return Ok(self.noop(id, session.status));
        }

        let selection = session
            .selection
            .as_ref()
            .ok_or_else(|| SessionError::invalid(format!("session {} has no selection yet", id)))?;

        let outcome = odds::draw_outcome(
            session.bet_amount,
            selection,
            self.options.coin_payout_multiplier,
            self.random.as_ref(),
        );

        let applied = self
            .store
            .try_transition(id, SessionStatus::Open, SessionStatus::Finished, Some(outcome.clone()))
            .await?;
        if !applied {
            let status = self.current_status(id).await?;
            return Ok(self.noop(id, status));
        }
        self.metrics.record_settled(outcome.won, outcome.payout);

        if outcome.won && outcome.payout > 0 {
            if let Err(e) = self.ledger.credit(&session.owner_key, outcome.payout).await {
                error!(
                    session_id = %id,
                    owner = %session.owner_key,
                    payout = outcome.payout,
                    error = %e,
                    "Payout credit failed for a finished session"
                );
                return Err(SessionError::CreditFailed {
                    id,
                    status: SessionStatus::Finished,
                    source: e,
                });
            }
        }

        info!(
            session_id = %id,
            owner = %session.owner_key,
            variant = %session.variant,
            won = outcome.won,
            payout = outcome.payout,
            "Session resolved"
        );
        self.notifier.publish(OutcomeEvent::settled(&session, outcome.clone()));
        Ok(Resolution::Settled(outcome))
    }

    /// Cancel an open session and refund the full stake
    pub async fn cancel(&self, id: SessionId) -> SessionResult<Cancellation> {
        let session = self.load(id).await?;
        if session.status != SessionStatus::Open {
            self.metrics.record_noop();
            debug!(session_id = %id, status = %session.status, "Cancel ignored, session already settled");
            return Ok(Cancellation::AlreadySettled(session.status));
        }

        let applied = self
            .store
            .try_transition(id, SessionStatus::Open, SessionStatus::Cancelled, None)
            .await?;
        if !applied {
            let status = self.current_status(id).await?;
            self.metrics.record_noop();
            debug!(session_id = %id, %status, "Cancel lost the race");
            return Ok(Cancellation::AlreadySettled(status));
        }

        let refunded = session.bet_amount;
        if let Err(e) = self.ledger.credit(&session.owner_key, refunded).await {
            error!(
                session_id = %id,
                owner = %session.owner_key,
                refund = refunded,
                error = %e,
                "Refund failed for a cancelled session"
            );
            return Err(SessionError::CreditFailed {
                id,
                status: SessionStatus::Cancelled,
                source: e,
            });
        }
        self.metrics.record_cancelled(refunded);

        info!(session_id = %id, owner = %session.owner_key, refunded, "Session cancelled");
        self.notifier.publish(OutcomeEvent::cancelled(&session, refunded));
        Ok(Cancellation::Cancelled { refunded })
    }

    pub async fn get(&self, id: SessionId) -> SessionResult<GameSession> {
        self.load(id).await
    }

    /// Most recent sessions of an owner, newest first
    pub async fn history(&self, owner_key: &str, limit: usize) -> SessionResult<Vec<GameSession>> {
        Ok(self.store.list_by_owner(owner_key, limit).await?)
    }

    /// Open sessions, oldest first
    pub async fn open_sessions(&self, limit: usize) -> SessionResult<Vec<GameSession>> {
        Ok(self.store.list_open(limit).await?)
    }

    pub async fn balance(&self, owner_key: &str) -> SessionResult<u64> {
        Ok(self.ledger.balance(owner_key).await?)
    }

    async fn load(&self, id: SessionId) -> SessionResult<GameSession> {
        self.store.get(id).await?.ok_or(SessionError::NotFound(id))
    }

    async fn current_status(&self, id: SessionId) -> SessionResult<SessionStatus> {
        Ok(self.load(id).await?.status)
    }

    fn noop(&self, id: SessionId, status: SessionStatus) -> Resolution {
        self.metrics.record_noop();
        debug!(session_id = %id, %status, "Resolve ignored, session already settled");
        Resolution::AlreadySettled(status)
    }
}

/// Variant-independent selection checks
fn validate_selection(selection: &Selection) -> SessionResult<()> {
    match selection {
        Selection::Coin { .. } => Ok(()),
        Selection::Chest { items } if items.is_empty() => Err(SessionError::invalid("chest selection is empty")),
        Selection::Chest { .. } => Ok(()),
        Selection::Cracker { slots } if slots.is_empty() => {
            Err(SessionError::invalid("cracker selection is empty"))
        }
        Selection::Cracker { slots } if slots.len() >= odds::CRACKER_SLOT_COUNT => Err(SessionError::invalid(
            format!("cracker selection must leave at least one slot out, got {}", slots.len()),
        )),
        Selection::Cracker { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::{LedgerError, StakeError, StakeResult},
        game_store::InMemorySessionStore,
        games::random::{ScriptedDraw, ScriptedRandom},
        games::types::{CoinSide, CrackerSlot},
        ledger::InMemoryLedger,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<OutcomeEvent>>,
    }

    impl RecordingNotifier {
        fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    impl OutcomeNotifier for RecordingNotifier {
        fn publish(&self, event: OutcomeEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    /// Ledger that accepts debits but rejects every credit
    struct CreditFailingLedger(InMemoryLedger);

    #[async_trait]
    impl BalanceLedger for CreditFailingLedger {
        async fn credit(&self, _owner_key: &str, _amount: u64) -> StakeResult<()> {
            Err(LedgerError::Unavailable("ledger offline".to_string()).into())
        }

        async fn debit(&self, owner_key: &str, amount: u64) -> StakeResult<()> {
            self.0.debit(owner_key, amount).await
        }

        async fn balance(&self, owner_key: &str) -> StakeResult<u64> {
            self.0.balance(owner_key).await
        }
    }

    struct Harness {
        coordinator: SettlementCoordinator,
        ledger: Arc<InMemoryLedger>,
        notifier: Arc<RecordingNotifier>,
        random: Arc<ScriptedRandom>,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(InMemoryLedger::with_balances([("alice", 10_000), ("bob", 10_000)]));
        let notifier = Arc::new(RecordingNotifier::default());
        let random = Arc::new(ScriptedRandom::default());
        let ports = SettlementPorts {
            store: Arc::new(InMemorySessionStore::new()),
            ledger: ledger.clone(),
            notifier: notifier.clone(),
            random: random.clone(),
        };
        let coordinator = SettlementCoordinator::new(ports, SettlementOptions::default(), Arc::new(SettlementMetrics::new()));
        Harness {
            coordinator,
            ledger,
            notifier,
            random,
        }
    }

    async fn open_coin(h: &Harness, owner: &str, bet: u64, side: CoinSide) -> SessionId {
        let id = h
            .coordinator
            .create_session(owner, bet, GameVariant::Coin, SessionContext::default())
            .await
            .unwrap();
        h.coordinator
            .update_selection(id, Selection::Coin { side })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_debits_stake() {
        let h = harness();
        let id = open_coin(&h, "alice", 1000, CoinSide::Heads).await;

        let session = h.coordinator.get(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Open);
        assert_eq!(session.bet_amount, 1000);
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 9_000);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_arguments() {
        let h = harness();
        let zero = h
            .coordinator
            .create_session("alice", 0, GameVariant::Coin, SessionContext::default())
            .await;
        assert!(matches!(zero, Err(SessionError::InvalidArgument(_))));

        let broke = h
            .coordinator
            .create_session("carol", 10, GameVariant::Coin, SessionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(
            broke,
            SessionError::Settlement(StakeError::Ledger(LedgerError::InsufficientFunds { .. }))
        ));
        assert!(!broke.is_retryable());
    }

    #[tokio::test]
    async fn test_one_open_session_per_owner_and_variant() {
        let h = harness();
        let first = open_coin(&h, "alice", 100, CoinSide::Heads).await;

        let second = h
            .coordinator
            .create_session("alice", 100, GameVariant::Coin, SessionContext::default())
            .await;
        assert!(matches!(second, Err(SessionError::Conflict { id, .. }) if id == first));

        // Other variants are unaffected
        h.coordinator
            .create_session("alice", 100, GameVariant::Cracker, SessionContext::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_coin_loss_leaves_ledger_unchanged() {
        let h = harness();
        let id = open_coin(&h, "alice", 1000, CoinSide::Heads).await;
        let before = h.ledger.balance("alice").await.unwrap();
        h.random.push(ScriptedDraw::Coin(false));

        let resolution = h.coordinator.resolve(id).await.unwrap();
        let Resolution::Settled(outcome) = resolution else {
            panic!("expected a settled outcome");
        };
        assert!(!outcome.won);
        assert_eq!(outcome.payout, 0);

        let session = h.coordinator.get(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Finished);
        assert_eq!(session.outcome, Some(outcome));
        assert_eq!(h.ledger.balance("alice").await.unwrap(), before);
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let h = harness();
        let id = open_coin(&h, "alice", 1000, CoinSide::Heads).await;
        h.random.push(ScriptedDraw::Coin(true));

        assert!(matches!(h.coordinator.resolve(id).await.unwrap(), Resolution::Settled(_)));
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 11_000);

        for _ in 0..3 {
            let again = h.coordinator.resolve(id).await.unwrap();
            assert_eq!(again, Resolution::AlreadySettled(SessionStatus::Finished));
        }
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 11_000);
        assert_eq!(h.notifier.count(), 1);
        assert_eq!(h.coordinator.metrics().snapshot().settlement_noops, 3);
    }

    #[tokio::test]
    async fn test_resolve_without_selection_is_rejected() {
        let h = harness();
        let id = h
            .coordinator
            .create_session("alice", 100, GameVariant::Cracker, SessionContext::default())
            .await
            .unwrap();

        assert!(matches!(h.coordinator.resolve(id).await, Err(SessionError::InvalidArgument(_))));
        assert_eq!(h.coordinator.get(id).await.unwrap().status, SessionStatus::Open);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.coordinator.resolve(SessionId(404)).await,
            Err(SessionError::NotFound(SessionId(404)))
        ));
        assert!(matches!(
            h.coordinator.cancel(SessionId(404)).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_selection_rules() {
        let h = harness();
        let id = h
            .coordinator
            .create_session("bob", 100, GameVariant::Cracker, SessionContext::default())
            .await
            .unwrap();

        let wrong_variant = h
            .coordinator
            .update_selection(id, Selection::Coin { side: CoinSide::Tails })
            .await;
        assert!(matches!(wrong_variant, Err(SessionError::InvalidArgument(_))));

        let all_slots = Selection::Cracker {
            slots: CrackerSlot::ALL.into_iter().collect(),
        };
        assert!(matches!(
            h.coordinator.update_selection(id, all_slots).await,
            Err(SessionError::InvalidArgument(_))
        ));

        h.coordinator.cancel(id).await.unwrap();
        let late = h
            .coordinator
            .update_selection(id, Selection::Cracker { slots: [CrackerSlot::Red].into() })
            .await;
        assert!(matches!(
            late,
            Err(SessionError::Conflict { status: SessionStatus::Cancelled, .. })
        ));
    }

    #[tokio::test]
    async fn test_cracker_win_pays_table_multiplier() {
        let h = harness();
        let id = h
            .coordinator
            .create_session("bob", 1000, GameVariant::Cracker, SessionContext::default())
            .await
            .unwrap();
        h.coordinator
            .update_selection(
                id,
                Selection::Cracker {
                    slots: [CrackerSlot::Red, CrackerSlot::Blue].into(),
                },
            )
            .await
            .unwrap();
        // Index 4 is Blue
        h.random.push(ScriptedDraw::Index(4));

        let Resolution::Settled(outcome) = h.coordinator.resolve(id).await.unwrap() else {
            panic!("expected a settled outcome");
        };
        assert!(outcome.won);
        assert_eq!(outcome.payout, 2900);
        assert_eq!(h.ledger.balance("bob").await.unwrap(), 9_000 + 2900);
    }

    #[tokio::test]
    async fn test_cancel_refunds_once() {
        let h = harness();
        let id = open_coin(&h, "alice", 1500, CoinSide::Tails).await;
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 8_500);

        assert_eq!(
            h.coordinator.cancel(id).await.unwrap(),
            Cancellation::Cancelled { refunded: 1500 }
        );
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 10_000);

        assert_eq!(
            h.coordinator.cancel(id).await.unwrap(),
            Cancellation::AlreadySettled(SessionStatus::Cancelled)
        );
        assert_eq!(
            h.coordinator.resolve(id).await.unwrap(),
            Resolution::AlreadySettled(SessionStatus::Cancelled)
        );
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 10_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_resolve_settles_exactly_once() {
        let h = harness();
        let id = open_coin(&h, "alice", 1000, CoinSide::Heads).await;
        for _ in 0..32 {
            h.random.push(ScriptedDraw::Coin(true));
        }
        let coordinator = Arc::new(h.coordinator);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move { coordinator.resolve(id).await }));
        }

        let mut settled = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                Resolution::Settled(_) => settled += 1,
                Resolution::AlreadySettled(status) => assert_eq!(status, SessionStatus::Finished),
            }
        }

        assert_eq!(settled, 1);
        assert_eq!(h.ledger.balance("alice").await.unwrap(), 11_000);
        assert_eq!(h.notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_credit_failure_after_transition_is_not_retryable() {
        let ledger = Arc::new(CreditFailingLedger(InMemoryLedger::with_balances([("alice", 5_000)])));
        let random = Arc::new(ScriptedRandom::new([ScriptedDraw::Coin(true)]));
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = SettlementCoordinator::new(
            SettlementPorts {
                store: Arc::new(InMemorySessionStore::new()),
                ledger: ledger.clone(),
                notifier: notifier.clone(),
                random,
            },
            SettlementOptions::default(),
            Arc::new(SettlementMetrics::new()),
        );

        let id = coordinator
            .create_session("alice", 1000, GameVariant::Coin, SessionContext::default())
            .await
            .unwrap();
        coordinator
            .update_selection(id, Selection::Coin { side: CoinSide::Heads })
            .await
            .unwrap();

        let err = coordinator.resolve(id).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::CreditFailed {
                status: SessionStatus::Finished,
                ..
            }
        ));
        assert!(!err.is_retryable());

        // The guarded write already happened, a retry must not pay again
        assert_eq!(coordinator.get(id).await.unwrap().status, SessionStatus::Finished);
        assert_eq!(
            coordinator.resolve(id).await.unwrap(),
            Resolution::AlreadySettled(SessionStatus::Finished)
        );
        assert_eq!(notifier.count(), 0);
    }
}
