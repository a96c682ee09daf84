//! Chest game: stake against a pool of catalog items
//!
//! The more valuable the pool relative to the bet, the lower the chance of
//! winning it. Item values are copied into the selection when picked, so a
//! later catalog change does not move an open session's odds.

use super::{check_bet, ensure_variant};
use crate::{
    config::{ChestGameConfig, ChestItem},
    errors::{SessionError, SessionResult},
    games::{
        odds,
        settlement::SettlementCoordinator,
        types::{Cancellation, ChestPick, GameVariant, Resolution, Selection, SessionContext, SessionId},
    },
};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct ChestGame {
    coordinator: Arc<SettlementCoordinator>,
    config: ChestGameConfig,
}

impl ChestGame {
    pub fn new(coordinator: Arc<SettlementCoordinator>, config: ChestGameConfig) -> Self {
        Self { coordinator, config }
    }

    pub fn catalog(&self) -> &[ChestItem] {
        &self.config.catalog
    }

    pub async fn start(&self, owner_key: &str, bet_amount: u64, context: SessionContext) -> SessionResult<SessionId> {
        check_bet(GameVariant::Chest, &self.config.limits, bet_amount)?;
        self.coordinator
            .create_session(owner_key, bet_amount, GameVariant::Chest, context)
            .await
    }

    /// Put catalog items into the pool. Returns the resulting win chance.
    pub async fn pick_items<S: AsRef<str>>(&self, id: SessionId, item_ids: &[S]) -> SessionResult<f64> {
        let items = self.resolve_items(item_ids)?;
        let session = ensure_variant(&self.coordinator, id, GameVariant::Chest).await?;

        let selection = Selection::Chest { items };
        let chance = odds::chest_win_chance(session.bet_amount, selection.pool_value());
        self.coordinator.update_selection(id, selection).await?;
        Ok(chance)
    }

    /// Current win chance of an open session, zero before any pick
    pub async fn win_chance(&self, id: SessionId) -> SessionResult<f64> {
        let session = ensure_variant(&self.coordinator, id, GameVariant::Chest).await?;
        let pool_value = session.selection.as_ref().map(Selection::pool_value).unwrap_or(0);
        Ok(odds::chest_win_chance(session.bet_amount, pool_value))
    }

    pub async fn open(&self, id: SessionId) -> SessionResult<Resolution> {
        ensure_variant(&self.coordinator, id, GameVariant::Chest).await?;
        self.coordinator.resolve(id).await
    }

    pub async fn cancel(&self, id: SessionId) -> SessionResult<Cancellation> {
        ensure_variant(&self.coordinator, id, GameVariant::Chest).await?;
        self.coordinator.cancel(id).await
    }

    fn resolve_items<S: AsRef<str>>(&self, item_ids: &[S]) -> SessionResult<Vec<ChestPick>> {
        if item_ids.is_empty() {
            return Err(SessionError::invalid("pick at least one chest item"));
        }
        if item_ids.len() > self.config.max_items {
            return Err(SessionError::invalid(format!(
                "at most {} chest items, got {}",
                self.config.max_items,
                item_ids.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut picks = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            let item_id = item_id.as_ref();
            if !seen.insert(item_id) {
                return Err(SessionError::invalid(format!("chest item {} picked twice", item_id)));
            }
            let item = self
                .config
                .item(item_id)
                .ok_or_else(|| SessionError::invalid(format!("unknown chest item {}", item_id)))?;
            picks.push(ChestPick {
                item_id: item.id.clone(),
                value: item.value,
            });
        }
        Ok(picks)
    }
}
