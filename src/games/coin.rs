//! Coin game: pick heads or tails, a fair flip decides

use super::{check_bet, ensure_variant};
use crate::{
    config::CoinGameConfig,
    errors::SessionResult,
    games::{
        settlement::SettlementCoordinator,
        types::{Cancellation, CoinSide, GameVariant, Resolution, Selection, SessionContext, SessionId},
    },
};
use std::sync::Arc;

#[derive(Clone)]
pub struct CoinGame {
    coordinator: Arc<SettlementCoordinator>,
    config: CoinGameConfig,
}

impl CoinGame {
    pub fn new(coordinator: Arc<SettlementCoordinator>, config: CoinGameConfig) -> Self {
        Self { coordinator, config }
    }

    pub fn payout_multiplier(&self) -> f64 {
        self.coordinator.options().coin_payout_multiplier
    }

    pub async fn start(&self, owner_key: &str, bet_amount: u64, context: SessionContext) -> SessionResult<SessionId> {
        check_bet(GameVariant::Coin, &self.config.limits, bet_amount)?;
        self.coordinator
            .create_session(owner_key, bet_amount, GameVariant::Coin, context)
            .await
    }

    pub async fn choose(&self, id: SessionId, side: CoinSide) -> SessionResult<()> {
        ensure_variant(&self.coordinator, id, GameVariant::Coin).await?;
        self.coordinator.update_selection(id, Selection::Coin { side }).await
    }

    pub async fn flip(&self, id: SessionId) -> SessionResult<Resolution> {
        ensure_variant(&self.coordinator, id, GameVariant::Coin).await?;
        self.coordinator.resolve(id).await
    }

    /// Start, choose and flip in one call. A failed choice cancels the
    /// session so the stake is returned.
    pub async fn play(
        &self,
        owner_key: &str,
        bet_amount: u64,
        side: CoinSide,
        context: SessionContext,
    ) -> SessionResult<(SessionId, Resolution)> {
        let id = self.start(owner_key, bet_amount, context).await?;
        if let Err(e) = self.coordinator.update_selection(id, Selection::Coin { side }).await {
            self.coordinator.cancel(id).await?;
            return Err(e);
        }
        let resolution = self.coordinator.resolve(id).await?;
        Ok((id, resolution))
    }

    pub async fn cancel(&self, id: SessionId) -> SessionResult<Cancellation> {
        ensure_variant(&self.coordinator, id, GameVariant::Coin).await?;
        self.coordinator.cancel(id).await
    }
}
