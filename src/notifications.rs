//! Outcome notifications
//!
//! Settlement publishes an `OutcomeEvent` after every applied terminal
//! transition. Publication only enqueues into a bounded channel; a worker task
//! drains the queue and hands each event to the registered sinks. A full
//! queue or a failing sink is logged and the event is dropped, settlement
//! never waits on either.

use crate::{
    common::traits::{OutcomeNotifier, OutcomeSink},
    games::types::{GameSession, GameVariant, Outcome, SessionContext, SessionId},
    metrics::SettlementMetrics,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// What happened to the session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeKind {
    Settled { outcome: Outcome },
    Cancelled { refunded: u64 },
}

/// Event emitted once per applied terminal transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeEvent {
    pub event_id: Uuid,
    pub session_id: SessionId,
    pub owner_key: String,
    pub variant: GameVariant,
    pub bet_amount: u64,
    pub kind: OutcomeKind,
    #[serde(default)]
    pub context: SessionContext,
    pub at: DateTime<Utc>,
}

impl OutcomeEvent {
    pub fn settled(session: &GameSession, outcome: Outcome) -> Self {
        Self::new(session, OutcomeKind::Settled { outcome })
    }

    pub fn cancelled(session: &GameSession, refunded: u64) -> Self {
        Self::new(session, OutcomeKind::Cancelled { refunded })
    }

    fn new(session: &GameSession, kind: OutcomeKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            session_id: session.id,
            owner_key: session.owner_key.clone(),
            variant: session.variant,
            bet_amount: session.bet_amount,
            kind,
            context: session.context.clone(),
            at: Utc::now(),
        }
    }

    /// Amount credited to the owner by this transition
    pub fn credited(&self) -> u64 {
        match &self.kind {
            OutcomeKind::Settled { outcome } => outcome.payout,
            OutcomeKind::Cancelled { refunded } => *refunded,
        }
    }
}

/// Bounded-queue notifier backed by a single delivery worker
#[derive(Clone)]
pub struct QueuedNotifier {
    sender: mpsc::Sender<OutcomeEvent>,
    metrics: Arc<SettlementMetrics>,
}

impl QueuedNotifier {
    /// Start the delivery worker. The worker exits once every clone of the
    /// returned notifier has been dropped and the queue is drained.
    pub fn spawn(
        capacity: usize,
        sinks: Vec<Arc<dyn OutcomeSink>>,
        metrics: Arc<SettlementMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (notifier, receiver) = Self::with_queue(capacity, metrics);
        let worker = tokio::spawn(deliver_loop(receiver, sinks));
        (notifier, worker)
    }

    fn with_queue(capacity: usize, metrics: Arc<SettlementMetrics>) -> (Self, mpsc::Receiver<OutcomeEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, metrics }, receiver)
    }

    /// Free slots in the queue
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }
}

impl OutcomeNotifier for QueuedNotifier {
    fn publish(&self, event: OutcomeEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.record_notification_dropped();
                warn!(session = %event.session_id, "Notification queue full, dropping outcome event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.metrics.record_notification_dropped();
                warn!(session = %event.session_id, "Notification worker stopped, dropping outcome event");
            }
        }
    }
}

async fn deliver_loop(mut receiver: mpsc::Receiver<OutcomeEvent>, sinks: Vec<Arc<dyn OutcomeSink>>) {
    debug!(sinks = sinks.len(), "Notification worker started");
    while let Some(event) = receiver.recv().await {
        for sink in &sinks {
            if let Err(e) = sink.deliver(&event).await {
                warn!(sink = sink.name(), session = %event.session_id, error = %e, "Outcome delivery failed");
            }
        }
    }
    debug!("Notification worker stopped");
}

/// Notifier used when notifications are switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNotifier;

impl OutcomeNotifier for DisabledNotifier {
    fn publish(&self, event: OutcomeEvent) {
        trace!(session = %event.session_id, "Notifications disabled, event discarded");
    }
}

/// Live feed for any number of subscribers
#[derive(Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<OutcomeEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutcomeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl OutcomeSink for BroadcastSink {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn deliver(&self, event: &OutcomeEvent) -> Result<(), String> {
        // No subscribers is normal
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Writes each outcome to the tracing output
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl OutcomeSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, event: &OutcomeEvent) -> Result<(), String> {
        match &event.kind {
            OutcomeKind::Settled { outcome } => info!(
                session = %event.session_id,
                owner = %event.owner_key,
                variant = %event.variant,
                bet = event.bet_amount,
                won = outcome.won,
                payout = outcome.payout,
                "Session settled"
            ),
            OutcomeKind::Cancelled { refunded } => info!(
                session = %event.session_id,
                owner = %event.owner_key,
                variant = %event.variant,
                refunded,
                "Session cancelled"
            ),
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WatchError {
    #[error("No outcome for session {session_id} within {timeout_ms}ms")]
    Timeout { session_id: SessionId, timeout_ms: u64 },

    #[error("Outcome watcher closed")]
    Closed,
}

/// Lets a caller wait for the outcome of one session. Register with `watch`
/// before triggering the resolve, otherwise the event may already be gone.
#[derive(Clone, Default)]
pub struct OutcomeWatchers {
    pending: Arc<DashMap<SessionId, Vec<oneshot::Sender<OutcomeEvent>>>>,
}

impl OutcomeWatchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&self, session_id: SessionId) -> oneshot::Receiver<OutcomeEvent> {
        // Receivers dropped without `wait` leave closed senders behind
        self.pending.retain(|_, senders| {
            senders.retain(|sender| !sender.is_closed());
            !senders.is_empty()
        });

        let (tx, rx) = oneshot::channel();
        self.pending.entry(session_id).or_default().push(tx);
        trace!(session = %session_id, watchers = self.pending.len(), "Outcome watcher registered");
        rx
    }

    /// Await an already registered watcher, dropping it on timeout
    pub async fn wait(
        &self,
        session_id: SessionId,
        receiver: oneshot::Receiver<OutcomeEvent>,
        timeout: Duration,
    ) -> Result<OutcomeEvent, WatchError> {
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(WatchError::Closed),
            Err(_) => {
                self.prune(session_id);
                Err(WatchError::Timeout {
                    session_id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Sessions with at least one live watcher
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn prune(&self, session_id: SessionId) {
        if let Some(mut senders) = self.pending.get_mut(&session_id) {
            senders.retain(|sender| !sender.is_closed());
        }
        self.pending.remove_if(&session_id, |_, senders| senders.is_empty());
    }
}

#[async_trait]
impl OutcomeSink for OutcomeWatchers {
    fn name(&self) -> &'static str {
        "watchers"
    }

    async fn deliver(&self, event: &OutcomeEvent) -> Result<(), String> {
        if let Some((_, senders)) = self.pending.remove(&event.session_id) {
            for sender in senders {
                // Receiver may have timed out already
                let _ = sender.send(event.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::{CoinSide, Draw, NewSession};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(id: u64) -> GameSession {
        GameSession::open(
            SessionId(id),
            NewSession {
                owner_key: "alice".to_string(),
                variant: GameVariant::Coin,
                bet_amount: 100,
                context: SessionContext::default(),
            },
            Utc::now(),
        )
    }

    fn coin_event(id: u64) -> OutcomeEvent {
        let outcome = Outcome::new(Draw::Coin { side: CoinSide::Heads }, true, 200);
        OutcomeEvent::settled(&session(id), outcome)
    }

    struct FailingSink;

    #[async_trait]
    impl OutcomeSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _event: &OutcomeEvent) -> Result<(), String> {
            Err("sink offline".to_string())
        }
    }

    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl OutcomeSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn deliver(&self, _event: &OutcomeEvent) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = coin_event(7);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["session_id"], 7);
        assert_eq!(json["variant"], "coin");
        assert_eq!(json["kind"]["type"], "settled");
        assert_eq!(json["kind"]["outcome"]["payout"], 200);
        assert_eq!(event.credited(), 200);
    }

    #[tokio::test]
    async fn test_broadcast_subscriber_receives_event() {
        let metrics = Arc::new(SettlementMetrics::new());
        let broadcast = BroadcastSink::new(16);
        let mut feed = broadcast.subscribe();
        let sinks = vec![Arc::new(broadcast.clone()) as Arc<dyn OutcomeSink>];
        let (notifier, _worker) = QueuedNotifier::spawn(8, sinks, metrics);

        notifier.publish(coin_event(1));

        let received = feed.recv().await.unwrap();
        assert_eq!(received.session_id, SessionId(1));
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_delivery() {
        let metrics = Arc::new(SettlementMetrics::new());
        let counter = Arc::new(CountingSink(AtomicUsize::new(0)));
        let sinks = vec![Arc::new(FailingSink) as Arc<dyn OutcomeSink>, counter.clone()];
        let (notifier, worker) = QueuedNotifier::spawn(8, sinks, metrics.clone());

        notifier.publish(coin_event(1));
        notifier.publish(coin_event(2));
        drop(notifier);
        worker.await.unwrap();

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().notifications_dropped, 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let metrics = Arc::new(SettlementMetrics::new());
        let (notifier, mut receiver) = QueuedNotifier::with_queue(1, metrics.clone());

        notifier.publish(coin_event(1));
        notifier.publish(coin_event(2));

        assert_eq!(metrics.snapshot().notifications_dropped, 1);
        assert_eq!(receiver.recv().await.unwrap().session_id, SessionId(1));
    }

    #[tokio::test]
    async fn test_closed_queue_counts_drop() {
        let metrics = Arc::new(SettlementMetrics::new());
        let (notifier, receiver) = QueuedNotifier::with_queue(4, metrics.clone());
        drop(receiver);

        notifier.publish(coin_event(1));
        assert_eq!(metrics.snapshot().notifications_dropped, 1);
    }

    #[tokio::test]
    async fn test_watchers_receive_matching_outcome() {
        let watchers = OutcomeWatchers::new();
        let first = watchers.watch(SessionId(3));
        let second = watchers.watch(SessionId(3));
        let other = watchers.watch(SessionId(4));

        watchers.deliver(&coin_event(3)).await.unwrap();

        assert_eq!(first.await.unwrap().session_id, SessionId(3));
        assert_eq!(second.await.unwrap().session_id, SessionId(3));
        assert_eq!(watchers.pending_count(), 1);

        let err = watchers
            .wait(SessionId(4), other, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::Timeout { session_id: SessionId(4), .. }));
        assert_eq!(watchers.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_watchers_are_pruned() {
        let watchers = OutcomeWatchers::new();
        drop(watchers.watch(SessionId(5)));
        drop(watchers.watch(SessionId(6)));
        assert_eq!(watchers.pending_count(), 2);

        let live = watchers.watch(SessionId(7));
        assert_eq!(watchers.pending_count(), 1);

        watchers.deliver(&coin_event(7)).await.unwrap();
        assert_eq!(live.await.unwrap().session_id, SessionId(7));
        assert_eq!(watchers.pending_count(), 0);
    }
}
