pub mod chest;
pub mod coin;
pub mod cracker;
pub mod odds;
pub mod random;
pub mod reaper;
pub mod settlement;
pub mod types;

pub use chest::ChestGame;
pub use coin::CoinGame;
pub use cracker::CrackerGame;
pub use random::{ScriptedDraw, ScriptedRandom, ThreadRandom};
pub use reaper::SessionReaper;
pub use settlement::{SettlementCoordinator, SettlementOptions, SettlementPorts};
pub use types::*;

use crate::config::BetLimits;
use crate::errors::{SessionError, SessionResult};

/// Bet bounds shared by the facades
pub(crate) fn check_bet(variant: GameVariant, limits: &BetLimits, bet_amount: u64) -> SessionResult<()> {
    if limits.contains(bet_amount) {
        Ok(())
    } else {
        Err(SessionError::invalid(format!(
            "{} bet must be between {} and {}, got {}",
            variant, limits.min, limits.max, bet_amount
        )))
    }
}

/// Facades only act on sessions of their own variant
pub(crate) async fn ensure_variant(
    coordinator: &SettlementCoordinator,
    id: SessionId,
    variant: GameVariant,
) -> SessionResult<GameSession> {
    let session = coordinator.get(id).await?;
    if session.variant != variant {
        return Err(SessionError::invalid(format!(
            "session {} is a {} game, not {}",
            id, session.variant, variant
        )));
    }
    Ok(session)
}
