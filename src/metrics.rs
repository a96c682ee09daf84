//! Settlement counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct SettlementMetrics {
    start_time: Instant,
    sessions_created: AtomicU64,
    settlements_applied: AtomicU64,
    settlement_noops: AtomicU64,
    wins: AtomicU64,
    cancellations: AtomicU64,
    total_staked: AtomicU64,
    total_paid_out: AtomicU64,
    total_refunded: AtomicU64,
    notifications_dropped: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub settlements_applied: u64,
    pub settlement_noops: u64,
    pub wins: u64,
    pub cancellations: u64,
    pub total_staked: u64,
    pub total_paid_out: u64,
    pub total_refunded: u64,
    pub notifications_dropped: u64,
}

impl MetricsSnapshot {
    /// Share of settled stakes kept by the house; refunded stakes are excluded
    pub fn observed_house_edge(&self) -> f64 {
        let settled_stake = self.total_staked.saturating_sub(self.total_refunded);
        if settled_stake == 0 {
            return 0.0;
        }
        1.0 - self.total_paid_out as f64 / settled_stake as f64
    }

    pub fn win_rate(&self) -> f64 {
        if self.settlements_applied == 0 {
            return 0.0;
        }
        self.wins as f64 / self.settlements_applied as f64
    }
}

impl SettlementMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            sessions_created: AtomicU64::new(0),
            settlements_applied: AtomicU64::new(0),
            settlement_noops: AtomicU64::new(0),
            wins: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            total_staked: AtomicU64::new(0),
            total_paid_out: AtomicU64::new(0),
            total_refunded: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
        }
    }

    pub fn record_created(&self, bet: u64) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.total_staked.fetch_add(bet, Ordering::Relaxed);
    }

    pub fn record_settled(&self, won: bool, payout: u64) {
        self.settlements_applied.fetch_add(1, Ordering::Relaxed);
        if won {
            self.wins.fetch_add(1, Ordering::Relaxed);
            self.total_paid_out.fetch_add(payout, Ordering::Relaxed);
        }
    }

    pub fn record_noop(&self) {
        self.settlement_noops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, refunded: u64) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
        self.total_refunded.fetch_add(refunded, Ordering::Relaxed);
    }

    pub fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            settlements_applied: self.settlements_applied.load(Ordering::Relaxed),
            settlement_noops: self.settlement_noops.load(Ordering::Relaxed),
            wins: self.wins.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            total_staked: self.total_staked.load(Ordering::Relaxed),
            total_paid_out: self.total_paid_out.load(Ordering::Relaxed),
            total_refunded: self.total_refunded.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for SettlementMetrics {
    fn default() -> Self {
        Self::new()
    }
}
