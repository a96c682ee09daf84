//! End-to-end settlement through the public API with in-memory ports

use futures::future::join_all;
use stakeplay::{
    config::StakeplayConfig,
    factory::StakeplayFactory,
    games::{
        types::{CoinSide, CrackerSlot, Draw, SessionContext},
        ScriptedDraw, ScriptedRandom,
    },
    BalanceLedger, Cancellation, InMemoryLedger, OutcomeKind, Resolution, SessionError, SessionStatus,
};
use std::sync::Arc;
use std::time::Duration;

async fn runtime_with(
    balances: &[(&str, u64)],
    draws: Vec<ScriptedDraw>,
) -> (stakeplay::StakeplayRuntime, Arc<InMemoryLedger>) {
    let ledger = Arc::new(InMemoryLedger::with_balances(balances.iter().map(|(o, b)| (*o, *b))));
    let runtime = StakeplayFactory::build_with(
        StakeplayConfig::in_memory(),
        ledger.clone(),
        Arc::new(ScriptedRandom::new(draws)),
    )
    .await
    .expect("runtime");
    (runtime, ledger)
}

#[tokio::test]
async fn test_coin_loss_end_to_end() {
    let (runtime, ledger) = runtime_with(&[("alice", 5_000)], vec![ScriptedDraw::Coin(false)]).await;

    let id = runtime.coin.start("alice", 1000, SessionContext::default()).await.unwrap();
    runtime.coin.choose(id, CoinSide::Heads).await.unwrap();
    let after_stake = ledger.balance("alice").await.unwrap();

    let resolution = runtime.coin.flip(id).await.unwrap();
    let Resolution::Settled(outcome) = resolution else {
        panic!("expected a settled outcome");
    };
    assert_eq!(outcome.draw, Draw::Coin { side: CoinSide::Tails });
    assert!(!outcome.won);
    assert_eq!(outcome.payout, 0);

    let session = runtime.coordinator.get(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Finished);
    assert_eq!(session.outcome, Some(outcome));
    assert_eq!(ledger.balance("alice").await.unwrap(), after_stake);
    assert_eq!(after_stake, 4_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_racing_resolvers_pay_once() {
    let draws = vec![ScriptedDraw::Index(2); 64];
    let (runtime, ledger) = runtime_with(&[("bob", 10_000)], draws).await;

    let id = runtime.cracker.start("bob", 1000, SessionContext::default()).await.unwrap();
    runtime
        .cracker
        .pick_slots(id, &[CrackerSlot::Yellow])
        .await
        .unwrap();

    let tasks = (0..64).map(|_| {
        let cracker = runtime.cracker.clone();
        tokio::spawn(async move { cracker.pull(id).await })
    });
    let results: Vec<_> = join_all(tasks).await.into_iter().map(|r| r.unwrap().unwrap()).collect();

    let settled = results.iter().filter(|r| matches!(r, Resolution::Settled(_))).count();
    assert_eq!(settled, 1);
    assert!(results
        .iter()
        .all(|r| matches!(r, Resolution::Settled(_) | Resolution::AlreadySettled(SessionStatus::Finished))));

    // 1000 staked, 5.8x back
    assert_eq!(ledger.balance("bob").await.unwrap(), 9_000 + 5_800);
    assert_eq!(runtime.metrics.snapshot().settlements_applied, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_resolve_racing_cancel_has_one_winner() {
    let (runtime, ledger) = runtime_with(&[("carol", 10_000)], vec![ScriptedDraw::Coin(true); 16]).await;

    for _ in 0..20 {
        let id = runtime.coin.start("carol", 500, SessionContext::default()).await.unwrap();
        runtime.coin.choose(id, CoinSide::Tails).await.unwrap();
        let before = ledger.balance("carol").await.unwrap();

        let coin = runtime.coin.clone();
        let resolver = tokio::spawn(async move { coin.flip(id).await });
        let coin = runtime.coin.clone();
        let canceller = tokio::spawn(async move { coin.cancel(id).await });

        let resolution = resolver.await.unwrap().unwrap();
        let cancellation = canceller.await.unwrap().unwrap();
        let after = ledger.balance("carol").await.unwrap();

        match (resolution, cancellation) {
            (Resolution::Settled(outcome), Cancellation::AlreadySettled(SessionStatus::Finished)) => {
                assert_eq!(after, before + outcome.payout);
            }
            (Resolution::AlreadySettled(SessionStatus::Cancelled), Cancellation::Cancelled { refunded }) => {
                assert_eq!(refunded, 500);
                assert_eq!(after, before + 500);
            }
            other => panic!("both or neither transition applied: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_outcome_event_reaches_watcher() {
    let (runtime, _) = runtime_with(&[("dave", 100_000)], vec![ScriptedDraw::Unit(0.0)]).await;

    let id = runtime.chest.start("dave", 10_000, SessionContext::default()).await.unwrap();
    runtime.chest.pick_items(id, &["goblet", "boot"]).await.unwrap();
    let watcher = runtime.watchers.watch(id);

    runtime.chest.open(id).await.unwrap();
    let event = runtime
        .watchers
        .wait(id, watcher, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(event.owner_key, "dave");
    match event.kind {
        OutcomeKind::Settled { outcome } => {
            assert!(outcome.won);
            assert_eq!(outcome.payout, 10_050);
        }
        other => panic!("unexpected event {:?}", other),
    }
    runtime.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_errors_reported_to_callers() {
    let (runtime, ledger) = runtime_with(&[("erin", 1_000)], vec![]).await;

    let too_big = runtime.coin.start("erin", 5_000_000, SessionContext::default()).await;
    assert!(matches!(too_big, Err(SessionError::InvalidArgument(_))));

    let broke = runtime.coin.start("erin", 2_000, SessionContext::default()).await.unwrap_err();
    assert!(matches!(broke, SessionError::Settlement(_)));
    assert!(!broke.is_retryable());
    assert_eq!(ledger.balance("erin").await.unwrap(), 1_000);

    let id = runtime.coin.start("erin", 100, SessionContext::default()).await.unwrap();
    let wrong_facade = runtime.cracker.pull(id).await;
    assert!(matches!(wrong_facade, Err(SessionError::InvalidArgument(_))));

    let no_selection = runtime.coin.flip(id).await;
    assert!(matches!(no_selection, Err(SessionError::InvalidArgument(_))));

    let history = runtime.coordinator.history("erin", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, SessionStatus::Open);
}
