//! In-process balance ledger
//!
//! Reference implementation of `BalanceLedger`. Each balance lives in its own
//! DashMap entry, so a credit or debit is an atomic read-modify-write on that
//! entry.

use crate::{
    common::traits::BalanceLedger,
    errors::{LedgerError, StakeResult},
};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

#[derive(Default)]
pub struct InMemoryLedger {
    balances: DashMap<String, u64>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-funded with the given balances
    pub fn with_balances<I, K>(balances: I) -> Self
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<String>,
    {
        let ledger = Self::new();
        for (owner, amount) in balances {
            ledger.balances.insert(owner.into(), amount);
        }
        ledger
    }

    /// Sum of all balances
    pub fn total(&self) -> u128 {
        self.balances.iter().map(|entry| *entry.value() as u128).sum()
    }
}

#[async_trait]
impl BalanceLedger for InMemoryLedger {
    async fn credit(&self, owner_key: &str, amount: u64) -> StakeResult<()> {
        let mut balance = self.balances.entry(owner_key.to_string()).or_insert(0);
        *balance = balance.checked_add(amount).ok_or_else(|| LedgerError::Overflow {
            owner: owner_key.to_string(),
        })?;
        debug!(owner = owner_key, amount, balance = *balance, "Ledger credit");
        Ok(())
    }

    async fn debit(&self, owner_key: &str, amount: u64) -> StakeResult<()> {
        let mut balance = self.balances.entry(owner_key.to_string()).or_insert(0);
        if *balance < amount {
            return Err(LedgerError::InsufficientFunds {
                owner: owner_key.to_string(),
                balance: *balance,
                requested: amount,
            }
            .into());
        }
        *balance -= amount;
        debug!(owner = owner_key, amount, balance = *balance, "Ledger debit");
        Ok(())
    }

    async fn balance(&self, owner_key: &str) -> StakeResult<u64> {
        Ok(self.balances.get(owner_key).map(|entry| *entry.value()).unwrap_or(0))
    }
}
