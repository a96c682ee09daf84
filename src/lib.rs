//! Stakeplay - session lifecycle and settlement for chance games
//!
//! Users stake balance on a coin flip, a pooled-prize chest, or a six-slot
//! cracker. Every play is a `GameSession` that leaves `Open` exactly once.
//! The session store's guarded status write decides which caller settles it,
//! and the ledger is only credited after that write succeeds, so retries and
//! racing resolvers can never pay twice.

pub mod common;
pub mod config;
pub mod errors;
pub mod factory;
pub mod game_store;
pub mod games;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod notifications;
pub mod storage;

pub use common::traits::{BalanceLedger, OutcomeNotifier, OutcomeSink, RandomSource, SessionStore};
pub use config::{ConfigLoader, StakeplayConfig};
pub use errors::{SessionError, SessionResult, StakeError, StakeResult};
pub use factory::{StakeplayFactory, StakeplayRuntime};
pub use game_store::{InMemorySessionStore, RocksSessionStore};
pub use games::{
    Cancellation, ChestGame, CoinGame, CrackerGame, GameSession, GameVariant, Outcome, Resolution, Selection,
    SessionId, SessionStatus, SettlementCoordinator,
};
pub use ledger::InMemoryLedger;
pub use metrics::{MetricsSnapshot, SettlementMetrics};
pub use notifications::{OutcomeEvent, OutcomeKind};
