//! Stale-session reaper
//!
//! Sessions left open past their TTL are cancelled through the coordinator,
//! which refunds them with the same guarded transition `resolve` uses. A
//! resolve landing at the same moment simply makes the cancel a no-op.
//! A TTL of zero disables reaping.

use crate::{
    config::SettlementConfig,
    errors::SessionResult,
    games::{
        settlement::SettlementCoordinator,
        types::{Cancellation, GameSession},
    },
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

fn ttl_secs(ttl: Option<Duration>) -> u64 {
    ttl.map(|ttl| ttl.as_secs()).unwrap_or(0)
}

/// What a single sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub examined: usize,
    pub cancelled: usize,
    pub already_settled: usize,
    pub failed: usize,
}

pub struct SessionReaper {
    coordinator: Arc<SettlementCoordinator>,
    ttl: Option<Duration>,
    interval: Duration,
    batch_size: usize,
}

impl SessionReaper {
    pub fn new(coordinator: Arc<SettlementCoordinator>, config: &SettlementConfig) -> Self {
        Self {
            coordinator,
            ttl: Some(config.open_session_ttl()).filter(|ttl| !ttl.is_zero()),
            interval: config.reaper_interval().max(MIN_INTERVAL),
            batch_size: config.reaper_batch_size.max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.ttl.is_some()
    }

    fn is_stale(&self, session: &GameSession, now: DateTime<Utc>, ttl: Duration) -> bool {
        now.signed_duration_since(session.created_at)
            .to_std()
            .map(|age| age >= ttl)
            .unwrap_or(false)
    }

    /// Cancel up to one batch of stale open sessions
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SessionResult<ReapReport> {
        let Some(ttl) = self.ttl else {
            return Ok(ReapReport::default());
        };
        let open = self.coordinator.open_sessions(self.batch_size).await?;
        let mut report = ReapReport::default();

        // Oldest first, so the first fresh session ends the sweep
        for session in open.iter().take_while(|s| self.is_stale(s, now, ttl)) {
            report.examined += 1;
            match self.coordinator.cancel(session.id).await {
                Ok(Cancellation::Cancelled { refunded }) => {
                    report.cancelled += 1;
                    debug!(session_id = %session.id, owner = %session.owner_key, refunded, "Stale session reaped");
                }
                Ok(Cancellation::AlreadySettled(_)) => report.already_settled += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(session_id = %session.id, error = %e, "Failed to reap stale session");
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                cancelled = report.cancelled,
                already_settled = report.already_settled,
                failed = report.failed,
                "Reaper sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep on an interval until `shutdown` flips to true or its sender is dropped
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.is_enabled() {
                debug!("Session TTL is zero, reaper idle until shutdown");
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                return;
            }

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(ttl_secs = ttl_secs(self.ttl), interval_secs = self.interval.as_secs(), "Session reaper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once(Utc::now()).await {
                            warn!(error = %e, "Reaper sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Session reaper stopped");
        })
    }
}
