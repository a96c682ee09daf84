//! Port traits consumed by the settlement core
//!
//! Every collaborator the coordinator talks to sits behind one of these
//! traits and is passed in explicitly, never looked up globally.

use crate::errors::StakeResult;
use crate::games::types::{
    GameSession, NewSession, Outcome, Selection, SelectionUpdate, SessionId, SessionStatus,
};
use crate::notifications::OutcomeEvent;
use async_trait::async_trait;

/// Persistence for game-session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new `Open` session and assign its id
    async fn create(&self, request: NewSession) -> StakeResult<GameSession>;

    /// Load a session by id
    async fn get(&self, id: SessionId) -> StakeResult<Option<GameSession>>;

    /// Replace the selection of an open session
    async fn update_selection(&self, id: SessionId, selection: Selection) -> StakeResult<SelectionUpdate>;

    /// Conditional write on `status`: applies only if the stored status equals
    /// `expected`. Under concurrent callers at most one gets `true`. Missing
    /// records never transition.
    async fn try_transition(
        &self,
        id: SessionId,
        expected: SessionStatus,
        next: SessionStatus,
        outcome: Option<Outcome>,
    ) -> StakeResult<bool>;

    /// Sessions of one owner, newest first
    async fn list_by_owner(&self, owner_key: &str, limit: usize) -> StakeResult<Vec<GameSession>>;

    /// Open sessions, oldest first
    async fn list_open(&self, limit: usize) -> StakeResult<Vec<GameSession>>;
}

/// User balance store. Calls are not idempotent; the coordinator makes each
/// at most once per terminal transition.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    async fn credit(&self, owner_key: &str, amount: u64) -> StakeResult<()>;

    async fn debit(&self, owner_key: &str, amount: u64) -> StakeResult<()>;

    async fn balance(&self, owner_key: &str) -> StakeResult<u64>;
}

/// Fire-and-forget publication of outcome events. Must not block and must
/// not fail into the caller.
pub trait OutcomeNotifier: Send + Sync {
    fn publish(&self, event: OutcomeEvent);
}

/// Downstream consumer of published events (live feed, watchers, logs)
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, event: &OutcomeEvent) -> Result<(), String>;
}

/// Uniform random draws, safe to share between threads
pub trait RandomSource: Send + Sync {
    /// Fair boolean
    fn coin(&self) -> bool;

    /// Uniform index in `0..len`; `len` is never zero
    fn index(&self, len: usize) -> usize;

    /// Uniform value in `[0, 1)`
    fn unit(&self) -> f64;
}
