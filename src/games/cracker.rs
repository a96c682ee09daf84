//! Cracker game: cover up to five of six slots, one slot is drawn

use super::{check_bet, ensure_variant};
use crate::{
    config::CrackerGameConfig,
    errors::{SessionError, SessionResult},
    games::{
        odds,
        settlement::SettlementCoordinator,
        types::{Cancellation, CrackerSlot, GameVariant, Resolution, Selection, SessionContext, SessionId},
    },
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Largest selection that still has a payout
pub const MAX_PICKS: usize = odds::CRACKER_SLOT_COUNT - 1;

#[derive(Clone)]
pub struct CrackerGame {
    coordinator: Arc<SettlementCoordinator>,
    config: CrackerGameConfig,
}

impl CrackerGame {
    pub fn new(coordinator: Arc<SettlementCoordinator>, config: CrackerGameConfig) -> Self {
        Self { coordinator, config }
    }

    pub async fn start(&self, owner_key: &str, bet_amount: u64, context: SessionContext) -> SessionResult<SessionId> {
        check_bet(GameVariant::Cracker, &self.config.limits, bet_amount)?;
        self.coordinator
            .create_session(owner_key, bet_amount, GameVariant::Cracker, context)
            .await
    }

    /// Cover the given slots. Returns the payout multiplier for that many picks.
    pub async fn pick_slots(&self, id: SessionId, slots: &[CrackerSlot]) -> SessionResult<f64> {
        let slots: BTreeSet<CrackerSlot> = slots.iter().copied().collect();
        if slots.is_empty() || slots.len() > MAX_PICKS {
            return Err(SessionError::invalid(format!(
                "pick between 1 and {} distinct slots, got {}",
                MAX_PICKS,
                slots.len()
            )));
        }
        ensure_variant(&self.coordinator, id, GameVariant::Cracker).await?;

        let multiplier = odds::cracker_multiplier(slots.len());
        self.coordinator
            .update_selection(id, Selection::Cracker { slots })
            .await?;
        Ok(multiplier)
    }

    pub async fn pull(&self, id: SessionId) -> SessionResult<Resolution> {
        ensure_variant(&self.coordinator, id, GameVariant::Cracker).await?;
        self.coordinator.resolve(id).await
    }

    pub async fn cancel(&self, id: SessionId) -> SessionResult<Cancellation> {
        ensure_variant(&self.coordinator, id, GameVariant::Cracker).await?;
        self.coordinator.cancel(id).await
    }
}
