//! Observability and metrics for the ledger.
//!
//! - **Counters**: applied and rejected actions, per operation and per error kind
//! - **Histograms**: latency of `Ledger::apply`
//! - **Gauges**: ledger clock and aggregate totals after the last action
//!
//! # Usage
//!
//! ```rust,ignore
//! use boostledger_core::metrics::LedgerMetrics;
//!
//! let metrics = LedgerMetrics::new();
//! ledger.apply_observed(&AllowAllGate, action, &metrics)?;
//! println!("{}", metrics.to_json());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use crate::ledger::{ActionOutcome, Ledger};
use crate::LedgerError;

// =============================================================================
// Metric Types
// =============================================================================

/// A simple counter that can only increase.
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge holding the latest observed value.
#[derive(Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Token amounts above `u64::MAX` saturate.
    pub fn set_amount(&self, v: u128) {
        self.set(u64::try_from(v).unwrap_or(u64::MAX));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A histogram for tracking distributions.
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    bucket_bounds: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create with default buckets suitable for in-memory operation latencies (in
    /// milliseconds).
    pub fn new_latency() -> Self {
        Self::new(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0])
    }

    pub fn new(bucket_bounds: Vec<f64>) -> Self {
        let buckets = (0..=bucket_bounds.len())
            .map(|_| AtomicU64::new(0))
            .collect();

        Self {
            buckets,
            bucket_bounds,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .bucket_bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bucket_bounds.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed); // Store as micros
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn get_mean(&self) -> f64 {
        let count = self.get_count();
        if count == 0 {
            0.0
        } else {
            self.get_sum() / count as f64
        }
    }
}

// =============================================================================
// Ledger Metrics Collection
// =============================================================================

/// Central metrics collection for a ledger.
pub struct LedgerMetrics {
    // Counters
    pub actions_applied: Counter,
    pub actions_rejected: Counter,
    pub escrow_locks: Counter,
    pub stakes_created: Counter,
    pub withdrawals: Counter,
    pub reward_claims: Counter,
    pub rewards_paid: Counter,

    // Gauges (state after the last observed action)
    pub current_time: Gauge,
    pub farms: Gauge,
    pub escrow_supply: Gauge,
    pub total_liquidity_locked: Gauge,
    pub total_liquidity_unlocked: Gauge,
    pub total_combined_weight: Gauge,

    // Histograms (latencies in ms)
    pub apply_latency: Histogram,

    // Per-label counters
    applied_by_op: RwLock<HashMap<String, Counter>>,
    rejections_by_kind: RwLock<HashMap<String, Counter>>,
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self {
            actions_applied: Counter::new(),
            actions_rejected: Counter::new(),
            escrow_locks: Counter::new(),
            stakes_created: Counter::new(),
            withdrawals: Counter::new(),
            reward_claims: Counter::new(),
            rewards_paid: Counter::new(),

            current_time: Gauge::new(),
            farms: Gauge::new(),
            escrow_supply: Gauge::new(),
            total_liquidity_locked: Gauge::new(),
            total_liquidity_unlocked: Gauge::new(),
            total_combined_weight: Gauge::new(),

            apply_latency: Histogram::new_latency(),

            applied_by_op: RwLock::new(HashMap::new()),
            rejections_by_kind: RwLock::new(HashMap::new()),
        }
    }

    /// Record a successful action and its outcome.
    pub fn record_applied(&self, op: &str, outcome: &ActionOutcome) {
        self.actions_applied.inc();
        inc_label(&self.applied_by_op, op);
        match outcome {
            ActionOutcome::EscrowLocked(_) => self.escrow_locks.inc(),
            ActionOutcome::Staked(_) => self.stakes_created.inc(),
            ActionOutcome::Withdrawn(_) => self.withdrawals.inc(),
            ActionOutcome::RewardsPaid(p) => {
                self.reward_claims.inc();
                self.rewards_paid
                    .inc_by(u64::try_from(p.total()).unwrap_or(u64::MAX));
            }
            _ => {}
        }
    }

    /// Record a rejected action under its error kind.
    pub fn record_rejected(&self, _op: &str, err: &LedgerError) {
        self.actions_rejected.inc();
        inc_label(&self.rejections_by_kind, err.kind());
    }

    /// Refresh gauges from the ledger state.
    pub fn observe_ledger(&self, ledger: &Ledger) {
        self.current_time.set(ledger.now());
        self.farms.set(ledger.farms().len() as u64);
        self.escrow_supply.set_amount(ledger.escrow().supply());

        let (mut locked, mut unlocked, mut weight) = (0u128, 0u128, 0u128);
        for farm in ledger.farms() {
            let stakes = farm.stakes();
            locked = locked.saturating_add(stakes.total_liquidity_locked());
            unlocked = unlocked.saturating_add(stakes.total_liquidity_unlocked());
            weight = weight.saturating_add(stakes.total_combined_weight());
        }
        self.total_liquidity_locked.set_amount(locked);
        self.total_liquidity_unlocked.set_amount(unlocked);
        self.total_combined_weight.set_amount(weight);
    }

    /// Applied count for an operation name (see `LedgerAction::name`).
    pub fn applied_of(&self, op: &str) -> u64 {
        get_label(&self.applied_by_op, op)
    }

    /// Rejection count for an error kind (see `LedgerError::kind`).
    pub fn rejections_of(&self, kind: &str) -> u64 {
        get_label(&self.rejections_by_kind, kind)
    }

    /// Export metrics as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "counters": {
                "actions_applied": self.actions_applied.get(),
                "actions_rejected": self.actions_rejected.get(),
                "escrow_locks": self.escrow_locks.get(),
                "stakes_created": self.stakes_created.get(),
                "withdrawals": self.withdrawals.get(),
                "reward_claims": self.reward_claims.get(),
                "rewards_paid": self.rewards_paid.get(),
            },
            "gauges": {
                "current_time": self.current_time.get(),
                "farms": self.farms.get(),
                "escrow_supply": self.escrow_supply.get(),
                "total_liquidity_locked": self.total_liquidity_locked.get(),
                "total_liquidity_unlocked": self.total_liquidity_unlocked.get(),
                "total_combined_weight": self.total_combined_weight.get(),
            },
            "latencies_ms": {
                "apply_mean": self.apply_latency.get_mean(),
                "apply_count": self.apply_latency.get_count(),
            },
            "applied_by_op": snapshot(&self.applied_by_op),
            "rejections_by_kind": snapshot(&self.rejections_by_kind),
        })
    }
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn inc_label(map: &RwLock<HashMap<String, Counter>>, label: &str) {
    if let Ok(mut map) = map.write() {
        map.entry(label.to_string()).or_insert_with(Counter::new).inc();
    }
}

fn get_label(map: &RwLock<HashMap<String, Counter>>, label: &str) -> u64 {
    if let Ok(map) = map.read() {
        map.get(label).map(|c| c.get()).unwrap_or(0)
    } else {
        0
    }
}

fn snapshot(map: &RwLock<HashMap<String, Counter>>) -> serde_json::Value {
    let mut out = serde_json::Map::new();
    if let Ok(map) = map.read() {
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for k in keys {
            out.insert(k.clone(), map[k].get().into());
        }
    }
    serde_json::Value::Object(out)
}

// =============================================================================
// Timer
// =============================================================================

/// Records the elapsed time into a histogram when dropped.
pub struct StageTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl<'a> StageTimer<'a> {
    pub fn start(histogram: &'a Histogram) -> Self {
        Self {
            histogram,
            start: Instant::now(),
        }
    }
}

impl<'a> Drop for StageTimer<'a> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        self.histogram.observe(elapsed.as_secs_f64() * 1000.0);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AccountId, RewardPayout};

    #[test]
    fn counter_increments() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn gauge_saturates_large_amounts() {
        let gauge = Gauge::new();

        gauge.set(100);
        assert_eq!(gauge.get(), 100);

        gauge.set_amount(u128::MAX);
        assert_eq!(gauge.get(), u64::MAX);
    }

    #[test]
    fn histogram_tracks_distribution() {
        let hist = Histogram::new_latency();

        hist.observe(0.02);
        hist.observe(1.0);
        hist.observe(500.0);

        assert_eq!(hist.get_count(), 3);
        assert_eq!(hist.buckets[1].load(Ordering::Relaxed), 1);
        assert_eq!(hist.buckets[4].load(Ordering::Relaxed), 1);
        assert_eq!(hist.buckets[9].load(Ordering::Relaxed), 1);
        assert!((hist.get_mean() - 501.02 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn outcomes_feed_typed_counters() {
        let metrics = LedgerMetrics::new();
        let payout = RewardPayout {
            account: AccountId::from_label("alice"),
            amounts: vec![7, 5],
        };

        metrics.record_applied("get_reward", &ActionOutcome::RewardsPaid(payout));
        metrics.record_applied("sync", &ActionOutcome::Unit);
        metrics.record_rejected("withdraw_locked", &LedgerError::LockStillActive);
        metrics.record_rejected("withdraw_locked", &LedgerError::LockStillActive);

        assert_eq!(metrics.actions_applied.get(), 2);
        assert_eq!(metrics.reward_claims.get(), 1);
        assert_eq!(metrics.rewards_paid.get(), 12);
        assert_eq!(metrics.applied_of("sync"), 1);
        assert_eq!(metrics.rejections_of("lock_still_active"), 2);
        assert_eq!(metrics.rejections_of("zero_amount"), 0);
    }

    #[test]
    fn metrics_export_to_json() {
        let metrics = LedgerMetrics::new();

        metrics.record_applied("sync", &ActionOutcome::Unit);
        metrics.record_rejected("stake_locked", &LedgerError::ZeroAmount);

        let json = metrics.to_json();

        assert_eq!(json["counters"]["actions_applied"], 1);
        assert_eq!(json["counters"]["actions_rejected"], 1);
        assert_eq!(json["applied_by_op"]["sync"], 1);
        assert_eq!(json["rejections_by_kind"]["zero_amount"], 1);
    }

    #[test]
    fn stage_timer_records_on_drop() {
        let hist = Histogram::new_latency();
        {
            let _timer = StageTimer::start(&hist);
        }
        assert_eq!(hist.get_count(), 1);
    }
}
