//! Vote-escrow ledger: principal locked until a maturity date yields a balance that decays
//! linearly to zero at the unlock time.
//!
//! Each lock contributes a `(bias, slope)` pair scaled by [`ESCROW_SCALE`]. The global point is
//! advanced quantum by quantum, applying slope changes scheduled at unlock times, so both
//! per-account and total balances can be reconstructed for any past timestamp from the
//! append-only checkpoint logs.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{LedgerError, Result};

use super::gate::require_governance;
use super::invariants::{InvariantId, InvariantViolation};
use super::math::{
    add_i128, add_u128, add_u64, floor_to_quantum, mul_div_floor, mul_i128, sub_i128, sub_u128,
    to_i128,
};
use super::params::EscrowParams;
use super::types::{AccountId, EscrowId, EscrowLockOutcome};

/// Fixed-point scale of checkpoint bias and slope.
///
/// A bias is at most `principal × ESCROW_SCALE`, which fits `i128` for principals up to about
/// 1.7e29 base units.
pub const ESCROW_SCALE: u128 = 1_000_000_000;

/// Upper bound on quanta walked by a single global checkpoint.
pub const MAX_CHECKPOINT_WALK_QUANTA: u64 = 100_000;

/// Source of escrow balances for boost computation.
pub trait EscrowBalance {
    /// Escrow balance of `account` at time `at` (0 when the account holds no lock).
    fn escrow_balance_at(&self, account: AccountId, at: u64) -> u128;
}

/// Escrow source that never boosts.
pub struct NoEscrow;

impl EscrowBalance for NoEscrow {
    fn escrow_balance_at(&self, _account: AccountId, _at: u64) -> u128 {
        0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowPosition {
    pub escrow_id: EscrowId,
    pub owner: AccountId,
    pub principal: u128,
    pub unlock_time: u64,
    pub created_at: u64,
}

/// A decay point: balance at `t >= timestamp` is `bias − slope × (t − timestamp)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowCheckpoint {
    pub timestamp: u64,
    pub bias: i128,
    pub slope: i128,
}

impl EscrowCheckpoint {
    /// Decayed balance in token units at `t`, clamped at zero.
    pub fn balance_at(&self, t: u64) -> u128 {
        let dt = t.saturating_sub(self.timestamp) as i128;
        let decay = self.slope.checked_mul(dt).unwrap_or(i128::MAX);
        let bias = self.bias.saturating_sub(decay).max(0);
        bias as u128 / ESCROW_SCALE
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct LockSnapshot {
    principal: u128,
    unlock_time: u64,
}

impl LockSnapshot {
    const EMPTY: LockSnapshot = LockSnapshot {
        principal: 0,
        unlock_time: 0,
    };
}

struct AccountChange {
    account: AccountId,
    old: LockSnapshot,
    new: LockSnapshot,
}

/// Everything a checkpoint appends, computed before anything is committed.
struct CheckpointPlan {
    global: Vec<EscrowCheckpoint>,
    account_point: Option<(AccountId, EscrowCheckpoint)>,
    slope_updates: Vec<(u64, i128)>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowLedger {
    params: EscrowParams,
    governance: AccountId,
    emergency_unlock: bool,
    positions: BTreeMap<AccountId, EscrowPosition>,
    global_history: Vec<EscrowCheckpoint>,
    account_history: BTreeMap<AccountId, Vec<EscrowCheckpoint>>,
    slope_changes: BTreeMap<u64, i128>,
    supply: u128,
}

impl EscrowLedger {
    /// Creates an empty escrow ledger whose first global checkpoint sits at `genesis`.
    pub fn new(params: EscrowParams, governance: AccountId, genesis: u64) -> EscrowLedger {
        EscrowLedger {
            params,
            governance,
            emergency_unlock: false,
            positions: BTreeMap::new(),
            global_history: vec![EscrowCheckpoint {
                timestamp: genesis,
                bias: 0,
                slope: 0,
            }],
            account_history: BTreeMap::new(),
            slope_changes: BTreeMap::new(),
            supply: 0,
        }
    }

    pub fn params(&self) -> &EscrowParams {
        &self.params
    }

    pub fn governance(&self) -> AccountId {
        self.governance
    }

    pub fn is_emergency_unlocked(&self) -> bool {
        self.emergency_unlock
    }

    /// Total principal currently locked.
    pub fn supply(&self) -> u128 {
        self.supply
    }

    /// Index of the latest global checkpoint.
    pub fn epoch(&self) -> usize {
        self.global_history.len().saturating_sub(1)
    }

    pub fn locked(&self, account: AccountId) -> Option<&EscrowPosition> {
        self.positions.get(&account)
    }

    pub fn positions(&self) -> impl Iterator<Item = &EscrowPosition> {
        self.positions.values()
    }

    pub fn global_checkpoints(&self) -> &[EscrowCheckpoint] {
        &self.global_history
    }

    pub fn account_checkpoints(&self, account: AccountId) -> &[EscrowCheckpoint] {
        self.account_history
            .get(&account)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Accounts that have at least one per-account checkpoint.
    pub fn checkpointed_accounts(&self) -> impl Iterator<Item = &AccountId> {
        self.account_history.keys()
    }

    pub fn last_checkpoint_time(&self) -> u64 {
        self.last_global().timestamp
    }

    /// Scheduled slope change at `t` (non-positive; zero when nothing unlocks at `t`).
    pub fn slope_change_at(&self, t: u64) -> i128 {
        self.slope_changes.get(&t).copied().unwrap_or(0)
    }

    /// Escrow balance of `account` at `at`.
    ///
    /// Uses the last per-account checkpoint at or before `at`; 0 before the account's first
    /// checkpoint and from the unlock time onwards.
    pub fn balance_of(&self, account: AccountId, at: u64) -> u128 {
        let Some(history) = self.account_history.get(&account) else {
            return 0;
        };
        let idx = history.partition_point(|p| p.timestamp <= at);
        if idx == 0 {
            return 0;
        }
        history[idx - 1].balance_at(at)
    }

    /// Sum of all escrow balances at `at`.
    ///
    /// Starts from the last global checkpoint at or before `at` and applies the scheduled
    /// slope changes between it and `at`.
    pub fn total_supply(&self, at: u64) -> u128 {
        let idx = self.global_history.partition_point(|p| p.timestamp <= at);
        if idx == 0 {
            return 0;
        }
        let mut point = self.global_history[idx - 1];
        if at > point.timestamp {
            let pending = self
                .slope_changes
                .range((Excluded(point.timestamp), Included(at)));
            for (&t, &d_slope) in pending {
                let dt = (t - point.timestamp) as i128;
                point.bias = point
                    .bias
                    .saturating_sub(point.slope.saturating_mul(dt))
                    .max(0);
                point.slope = point.slope.saturating_add(d_slope).max(0);
                point.timestamp = t;
            }
        }
        point.balance_at(at)
    }

    pub fn create_lock(
        &mut self,
        caller: AccountId,
        principal: u128,
        unlock_time: u64,
        now: u64,
    ) -> Result<EscrowLockOutcome> {
        self.ensure_time(now)?;
        if principal == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if self.positions.contains_key(&caller) {
            return Err(LedgerError::LockAlreadyExists);
        }
        let unlock = self.validate_unlock_time(unlock_time, now)?;
        let new_supply = add_u128(self.supply, principal)?;
        let plan = self.plan_checkpoint(
            Some(AccountChange {
                account: caller,
                old: LockSnapshot::EMPTY,
                new: LockSnapshot {
                    principal,
                    unlock_time: unlock,
                },
            }),
            now,
        )?;
        let escrow_id = EscrowId::derive(caller, now);

        // Commit.
        self.commit_checkpoint(plan);
        self.positions.insert(
            caller,
            EscrowPosition {
                escrow_id,
                owner: caller,
                principal,
                unlock_time: unlock,
                created_at: now,
            },
        );
        self.supply = new_supply;

        debug!(
            account = %caller,
            principal,
            unlock_time = unlock,
            "escrow lock created"
        );
        Ok(EscrowLockOutcome {
            escrow_id,
            unlock_time: unlock,
            balance: self.balance_of(caller, now),
        })
    }

    /// Adds `delta` to the caller's unexpired position; the unlock time is unchanged.
    pub fn increase_amount(
        &mut self,
        caller: AccountId,
        delta: u128,
        now: u64,
    ) -> Result<EscrowLockOutcome> {
        self.add_principal(caller, delta, now)
    }

    /// Adds `delta` to another account's unexpired position.
    pub fn deposit_for(
        &mut self,
        _caller: AccountId,
        beneficiary: AccountId,
        delta: u128,
        now: u64,
    ) -> Result<EscrowLockOutcome> {
        self.add_principal(beneficiary, delta, now)
    }

    pub fn increase_unlock_time(
        &mut self,
        caller: AccountId,
        new_unlock_time: u64,
        now: u64,
    ) -> Result<EscrowLockOutcome> {
        self.ensure_time(now)?;
        let position = self
            .positions
            .get(&caller)
            .cloned()
            .ok_or(LedgerError::LockNotFound)?;
        if position.unlock_time <= now {
            return Err(LedgerError::LockExpired);
        }
        let rounded = floor_to_quantum(new_unlock_time, self.params.quantum());
        if rounded <= position.unlock_time {
            return Err(LedgerError::InvalidUnlockTime(format!(
                "new unlock time {rounded} does not extend current unlock time {}",
                position.unlock_time
            )));
        }
        let unlock = self.validate_unlock_time(new_unlock_time, now)?;
        let plan = self.plan_checkpoint(
            Some(AccountChange {
                account: caller,
                old: LockSnapshot {
                    principal: position.principal,
                    unlock_time: position.unlock_time,
                },
                new: LockSnapshot {
                    principal: position.principal,
                    unlock_time: unlock,
                },
            }),
            now,
        )?;

        // Commit.
        self.commit_checkpoint(plan);
        if let Some(p) = self.positions.get_mut(&caller) {
            p.unlock_time = unlock;
        }

        debug!(account = %caller, unlock_time = unlock, "escrow unlock time extended");
        Ok(EscrowLockOutcome {
            escrow_id: position.escrow_id,
            unlock_time: unlock,
            balance: self.balance_of(caller, now),
        })
    }

    /// Releases the caller's principal once matured (or at any time under emergency unlock).
    pub fn withdraw(&mut self, caller: AccountId, now: u64) -> Result<u128> {
        self.ensure_time(now)?;
        let position = self
            .positions
            .get(&caller)
            .cloned()
            .ok_or(LedgerError::LockNotFound)?;
        if now < position.unlock_time && !self.emergency_unlock {
            return Err(LedgerError::LockStillActive);
        }
        let new_supply = sub_u128(self.supply, position.principal)?;
        let plan = self.plan_checkpoint(
            Some(AccountChange {
                account: caller,
                old: LockSnapshot {
                    principal: position.principal,
                    unlock_time: position.unlock_time,
                },
                new: LockSnapshot::EMPTY,
            }),
            now,
        )?;

        // Commit.
        self.commit_checkpoint(plan);
        self.positions.remove(&caller);
        self.supply = new_supply;

        debug!(account = %caller, principal = position.principal, "escrow withdrawn");
        Ok(position.principal)
    }

    /// Brings the global checkpoint log current. Calling it twice at the same `now` is a no-op.
    pub fn checkpoint(&mut self, now: u64) -> Result<()> {
        let plan = self.plan_checkpoint(None, now)?;
        self.commit_checkpoint(plan);
        Ok(())
    }

    /// Flips the governance emergency-unlock flag; returns the new value.
    pub fn toggle_emergency_unlock(&mut self, caller: AccountId) -> Result<bool> {
        require_governance(self.governance, caller)?;
        self.emergency_unlock = !self.emergency_unlock;
        warn!(
            active = self.emergency_unlock,
            "escrow emergency unlock toggled"
        );
        Ok(self.emergency_unlock)
    }

    pub fn check_invariants(&self) -> std::result::Result<(), InvariantViolation> {
        let mut sum: u128 = 0;
        for p in self.positions.values() {
            sum = sum.checked_add(p.principal).ok_or_else(|| {
                InvariantViolation::new(
                    InvariantId::EscrowSupplyMatchesPositions,
                    "principal sum overflow",
                )
            })?;
        }
        if sum != self.supply {
            return Err(InvariantViolation::new(
                InvariantId::EscrowSupplyMatchesPositions,
                format!("supply {} != sum of principals {sum}", self.supply),
            ));
        }
        check_log("global", &self.global_history)?;
        for (account, log) in &self.account_history {
            check_log(&account.to_string(), log)?;
        }
        Ok(())
    }

    fn add_principal(
        &mut self,
        beneficiary: AccountId,
        delta: u128,
        now: u64,
    ) -> Result<EscrowLockOutcome> {
        self.ensure_time(now)?;
        if delta == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let position = self
            .positions
            .get(&beneficiary)
            .cloned()
            .ok_or(LedgerError::LockNotFound)?;
        if position.unlock_time <= now {
            return Err(LedgerError::LockExpired);
        }
        let new_principal = add_u128(position.principal, delta)?;
        let new_supply = add_u128(self.supply, delta)?;
        let plan = self.plan_checkpoint(
            Some(AccountChange {
                account: beneficiary,
                old: LockSnapshot {
                    principal: position.principal,
                    unlock_time: position.unlock_time,
                },
                new: LockSnapshot {
                    principal: new_principal,
                    unlock_time: position.unlock_time,
                },
            }),
            now,
        )?;

        // Commit.
        self.commit_checkpoint(plan);
        if let Some(p) = self.positions.get_mut(&beneficiary) {
            p.principal = new_principal;
        }
        self.supply = new_supply;

        debug!(account = %beneficiary, delta, "escrow principal increased");
        Ok(EscrowLockOutcome {
            escrow_id: position.escrow_id,
            unlock_time: position.unlock_time,
            balance: self.balance_of(beneficiary, now),
        })
    }

    fn last_global(&self) -> EscrowCheckpoint {
        self.global_history.last().copied().unwrap_or_default()
    }

    fn ensure_time(&self, now: u64) -> Result<()> {
        if now < self.last_global().timestamp {
            return Err(LedgerError::NonMonotonicTime);
        }
        Ok(())
    }

    /// Rounds `unlock_time` down to the quantum and checks it lies in `(now, now + max_horizon]`.
    fn validate_unlock_time(&self, unlock_time: u64, now: u64) -> Result<u64> {
        let rounded = floor_to_quantum(unlock_time, self.params.quantum());
        if rounded <= now {
            return Err(LedgerError::InvalidUnlockTime(format!(
                "unlock time {rounded} is not in the future"
            )));
        }
        let horizon = add_u64(now, self.params.max_horizon())?;
        if rounded > horizon {
            return Err(LedgerError::InvalidUnlockTime(format!(
                "unlock time {rounded} exceeds maximum horizon {horizon}"
            )));
        }
        Ok(rounded)
    }

    /// `(slope, bias)` contributed by a lock at `now`; zero once matured.
    fn lock_point(&self, lock: LockSnapshot, now: u64) -> Result<(i128, i128)> {
        if lock.principal == 0 || lock.unlock_time <= now {
            return Ok((0, 0));
        }
        let slope = to_i128(mul_div_floor(
            lock.principal,
            ESCROW_SCALE,
            self.params.max_horizon() as u128,
        )?)?;
        let bias = mul_i128(slope, (lock.unlock_time - now) as i128)?;
        Ok((slope, bias))
    }

    /// Walks the global point from the last checkpoint to `now`.
    ///
    /// Returns the points recorded at each crossed quantum boundary before `now`, and the
    /// point at `now` itself (not yet recorded).
    fn walk_global(&self, now: u64) -> Result<(Vec<EscrowCheckpoint>, EscrowCheckpoint)> {
        let mut last = self.last_global();
        if now < last.timestamp {
            return Err(LedgerError::NonMonotonicTime);
        }
        let quantum = self.params.quantum();
        if (now - last.timestamp) / quantum > MAX_CHECKPOINT_WALK_QUANTA {
            return Err(LedgerError::BoundedValueExceeded(format!(
                "checkpoint walk exceeds {MAX_CHECKPOINT_WALK_QUANTA} quanta"
            )));
        }

        let mut crossed = Vec::new();
        let mut t_i = floor_to_quantum(last.timestamp, quantum);
        loop {
            t_i = add_u64(t_i, quantum)?;
            let mut d_slope = 0;
            if t_i > now {
                t_i = now;
            } else {
                d_slope = self.slope_change_at(t_i);
            }
            let dt = (t_i - last.timestamp) as i128;
            last.bias = sub_i128(last.bias, mul_i128(last.slope, dt)?)?.max(0);
            last.slope = add_i128(last.slope, d_slope)?.max(0);
            last.timestamp = t_i;
            if t_i == now {
                break;
            }
            crossed.push(last);
        }
        Ok((crossed, last))
    }

    fn plan_checkpoint(&self, change: Option<AccountChange>, now: u64) -> Result<CheckpointPlan> {
        let previous = self.last_global();
        let (mut global, mut last) = self.walk_global(now)?;
        let mut slope_updates = Vec::new();
        let mut account_point = None;

        match change {
            Some(AccountChange { account, old, new }) => {
                let (old_slope, old_bias) = self.lock_point(old, now)?;
                let (new_slope, new_bias) = self.lock_point(new, now)?;

                last.slope = add_i128(last.slope, sub_i128(new_slope, old_slope)?)?.max(0);
                last.bias = add_i128(last.bias, sub_i128(new_bias, old_bias)?)?.max(0);

                // Reschedule the decay end of the old and new lock.
                let mut old_dslope = self.slope_change_at(old.unlock_time);
                let mut new_dslope = if new.unlock_time == old.unlock_time {
                    old_dslope
                } else {
                    self.slope_change_at(new.unlock_time)
                };
                if old.unlock_time > now {
                    old_dslope = add_i128(old_dslope, old_slope)?;
                    if new.unlock_time == old.unlock_time {
                        old_dslope = sub_i128(old_dslope, new_slope)?;
                    }
                    slope_updates.push((old.unlock_time, old_dslope));
                }
                if new.unlock_time > now && new.unlock_time > old.unlock_time {
                    new_dslope = sub_i128(new_dslope, new_slope)?;
                    slope_updates.push((new.unlock_time, new_dslope));
                }

                account_point = Some((
                    account,
                    EscrowCheckpoint {
                        timestamp: now,
                        bias: new_bias,
                        slope: new_slope,
                    },
                ));
                global.push(last);
            }
            None => {
                if last != previous {
                    global.push(last);
                }
            }
        }

        Ok(CheckpointPlan {
            global,
            account_point,
            slope_updates,
        })
    }

    fn commit_checkpoint(&mut self, plan: CheckpointPlan) {
        self.global_history.extend(plan.global);
        for (t, d_slope) in plan.slope_updates {
            if d_slope == 0 {
                self.slope_changes.remove(&t);
            } else {
                self.slope_changes.insert(t, d_slope);
            }
        }
        if let Some((account, point)) = plan.account_point {
            self.account_history.entry(account).or_default().push(point);
        }
    }
}

impl EscrowBalance for EscrowLedger {
    fn escrow_balance_at(&self, account: AccountId, at: u64) -> u128 {
        self.balance_of(account, at)
    }
}

fn check_log(name: &str, log: &[EscrowCheckpoint]) -> std::result::Result<(), InvariantViolation> {
    for (i, p) in log.iter().enumerate() {
        if p.bias < 0 || p.slope < 0 {
            return Err(InvariantViolation::new(
                InvariantId::EscrowNonNegative,
                format!("{name} checkpoint {i} has bias {} slope {}", p.bias, p.slope),
            ));
        }
        if i > 0 && p.timestamp < log[i - 1].timestamp {
            return Err(InvariantViolation::new(
                InvariantId::EscrowCheckpointsMonotone,
                format!("{name} checkpoint {i} goes back in time"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{SECONDS_PER_WEEK, SECONDS_PER_YEAR};
    use proptest::prelude::*;

    const WEEK: u64 = SECONDS_PER_WEEK;
    const T0: u64 = 10 * WEEK;

    fn id(label: &str) -> AccountId {
        AccountId::from_label(label)
    }

    fn ledger() -> EscrowLedger {
        let params = EscrowParams::new(4 * SECONDS_PER_YEAR, WEEK).unwrap();
        EscrowLedger::new(params, id("gov"), T0)
    }

    #[test]
    fn create_lock_sets_bias_from_remaining_horizon() {
        let mut e = ledger();
        let out = e
            .create_lock(id("alice"), 1_000_000_000, T0 + 52 * WEEK, T0)
            .unwrap();
        assert_eq!(out.unlock_time, T0 + 52 * WEEK);
        // 1e9 × 52 weeks / 4 years
        assert_eq!(out.balance, 249_315_068);
        assert_eq!(e.balance_of(id("alice"), T0 + 26 * WEEK), 124_657_534);
        assert_eq!(e.balance_of(id("alice"), T0 + 52 * WEEK), 0);
        assert_eq!(e.balance_of(id("alice"), T0 - 1), 0);
        assert_eq!(e.supply(), 1_000_000_000);
        assert_eq!(e.total_supply(T0), 249_315_068);
    }

    #[test]
    fn eighteen_decimal_principals_fit_checkpoints() {
        use crate::ledger::types::PRECISION;

        let mut e = ledger();
        let principal = 1_000_000 * PRECISION;
        let out = e
            .create_lock(id("alice"), principal, T0 + 4 * SECONDS_PER_YEAR, T0)
            .unwrap();
        let horizon = (4 * SECONDS_PER_YEAR) as u128;
        let expected = |at: u64| principal * (out.unlock_time - at) as u128 / horizon;
        assert!(out.balance.abs_diff(expected(T0)) <= 1);
        let t = T0 + 2 * SECONDS_PER_YEAR;
        assert!(e.balance_of(id("alice"), t).abs_diff(expected(t)) <= 1);
        e.checkpoint(T0 + 3 * WEEK).unwrap();
        assert!(e.total_supply(T0 + 3 * WEEK) <= out.balance);
        assert!(e.check_invariants().is_ok());
    }

    #[test]
    fn epoch_of_an_empty_history_is_zero() {
        let mut raw = serde_json::to_value(ledger()).unwrap();
        raw["global_history"] = serde_json::json!([]);
        let e: EscrowLedger = serde_json::from_value(raw).unwrap();
        assert_eq!(e.epoch(), 0);
        assert_eq!(e.total_supply(T0), 0);
    }

    #[test]
    fn unlock_time_is_rounded_down_and_bounded() {
        let mut e = ledger();
        let out = e
            .create_lock(id("alice"), 100, T0 + 3 * WEEK + 5, T0)
            .unwrap();
        assert_eq!(out.unlock_time, T0 + 3 * WEEK);

        assert!(matches!(
            e.create_lock(id("bob"), 100, T0 + WEEK - 1, T0),
            Err(LedgerError::InvalidUnlockTime(_))
        ));
        assert!(matches!(
            e.create_lock(id("bob"), 100, T0 + 5 * SECONDS_PER_YEAR, T0),
            Err(LedgerError::InvalidUnlockTime(_))
        ));
        assert_eq!(
            e.create_lock(id("bob"), 0, T0 + 2 * WEEK, T0),
            Err(LedgerError::ZeroAmount)
        );
        assert_eq!(
            e.create_lock(id("alice"), 5, T0 + 2 * WEEK, T0),
            Err(LedgerError::LockAlreadyExists)
        );
    }

    #[test]
    fn increase_amount_keeps_unlock_and_adds_remaining_horizon_share() {
        let mut e = ledger();
        e.create_lock(id("alice"), 1_000_000_000, T0 + 52 * WEEK, T0)
            .unwrap();
        let before = e.balance_of(id("alice"), T0 + 26 * WEEK);
        let out = e
            .increase_amount(id("alice"), 1_000_000_000, T0 + 26 * WEEK)
            .unwrap();
        assert_eq!(out.unlock_time, T0 + 52 * WEEK);
        // Doubling the principal doubles the remaining balance (± rounding).
        assert!(out.balance.abs_diff(2 * before) <= 1);
        // History before the increase is untouched.
        assert_eq!(e.balance_of(id("alice"), T0), 249_315_068);

        assert_eq!(
            e.increase_amount(id("bob"), 5, T0 + 26 * WEEK),
            Err(LedgerError::LockNotFound)
        );
        assert_eq!(
            e.increase_amount(id("alice"), 0, T0 + 26 * WEEK),
            Err(LedgerError::ZeroAmount)
        );
        assert_eq!(
            e.increase_amount(id("alice"), 5, T0 + 52 * WEEK),
            Err(LedgerError::LockExpired)
        );
    }

    #[test]
    fn deposit_for_tops_up_another_account() {
        let mut e = ledger();
        e.create_lock(id("alice"), 1_000, T0 + 52 * WEEK, T0).unwrap();
        e.deposit_for(id("bob"), id("alice"), 500, T0 + WEEK).unwrap();
        assert_eq!(e.locked(id("alice")).unwrap().principal, 1_500);
        assert_eq!(e.supply(), 1_500);
        assert!(e.locked(id("bob")).is_none());
    }

    #[test]
    fn increase_unlock_time_requires_strict_extension() {
        let mut e = ledger();
        e.create_lock(id("alice"), 1_000_000_000, T0 + 52 * WEEK, T0)
            .unwrap();
        assert!(matches!(
            e.increase_unlock_time(id("alice"), T0 + 52 * WEEK + 3, T0 + WEEK),
            Err(LedgerError::InvalidUnlockTime(_))
        ));
        let before = e.balance_of(id("alice"), T0 + WEEK);
        let out = e
            .increase_unlock_time(id("alice"), T0 + 104 * WEEK, T0 + WEEK)
            .unwrap();
        assert_eq!(out.unlock_time, T0 + 104 * WEEK);
        assert!(out.balance > before);
        assert!(e.balance_of(id("alice"), T0 + 60 * WEEK) > 0);
        assert_eq!(e.balance_of(id("alice"), T0 + 104 * WEEK), 0);
        // The old decay end no longer carries a scheduled slope change.
        assert_eq!(e.slope_change_at(T0 + 52 * WEEK), 0);
        assert!(e.slope_change_at(T0 + 104 * WEEK) < 0);
    }

    #[test]
    fn withdraw_requires_maturity_unless_emergency() {
        let mut e = ledger();
        e.create_lock(id("alice"), 1_000, T0 + 4 * WEEK, T0).unwrap();
        assert_eq!(
            e.withdraw(id("alice"), T0 + 4 * WEEK - 1),
            Err(LedgerError::LockStillActive)
        );
        assert_eq!(e.withdraw(id("alice"), T0 + 4 * WEEK), Ok(1_000));
        assert_eq!(e.withdraw(id("alice"), T0 + 4 * WEEK), Err(LedgerError::LockNotFound));
        assert_eq!(e.supply(), 0);

        e.create_lock(id("bob"), 2_000, T0 + 20 * WEEK, T0 + 4 * WEEK)
            .unwrap();
        assert_eq!(
            e.toggle_emergency_unlock(id("bob")),
            Err(LedgerError::Unauthorized)
        );
        assert_eq!(e.toggle_emergency_unlock(id("gov")), Ok(true));
        assert_eq!(e.withdraw(id("bob"), T0 + 5 * WEEK), Ok(2_000));
        assert_eq!(e.total_supply(T0 + 5 * WEEK), 0);
        assert_eq!(e.slope_change_at(T0 + 20 * WEEK), 0);
        assert!(e.check_invariants().is_ok());
    }

    #[test]
    fn checkpoint_walks_quanta_and_is_idempotent() {
        let mut e = ledger();
        e.create_lock(id("alice"), 1_000_000_000, T0 + 2 * WEEK, T0)
            .unwrap();
        let epoch = e.epoch();
        e.checkpoint(T0 + 3 * WEEK + 10).unwrap();
        // Boundaries T0+1w, T0+2w and T0+3w, plus the point at now.
        assert_eq!(e.epoch(), epoch + 4);
        let len = e.global_checkpoints().len();
        e.checkpoint(T0 + 3 * WEEK + 10).unwrap();
        assert_eq!(e.global_checkpoints().len(), len);

        let last = e.global_checkpoints()[e.epoch()];
        assert_eq!((last.bias, last.slope), (0, 0));
        assert_eq!(e.checkpoint(T0), Err(LedgerError::NonMonotonicTime));
    }

    #[test]
    fn total_supply_tracks_sum_of_balances_across_unlocks() {
        let mut e = ledger();
        e.create_lock(id("alice"), 1_000_000_000, T0 + 10 * WEEK, T0)
            .unwrap();
        e.create_lock(id("bob"), 3_000_000_000, T0 + 30 * WEEK, T0 + WEEK)
            .unwrap();
        for w in [1, 5, 10, 11, 20, 30, 40] {
            let t = T0 + w * WEEK + 17;
            let sum = e.balance_of(id("alice"), t) + e.balance_of(id("bob"), t);
            assert!(e.total_supply(t).abs_diff(sum) <= 2, "week {w}");
        }
        // Querying a past time after later checkpoints gives the same answer.
        let t = T0 + 2 * WEEK;
        let before = e.total_supply(t);
        e.checkpoint(T0 + 12 * WEEK).unwrap();
        assert_eq!(e.total_supply(t), before);
    }

    proptest! {
        #[test]
        fn balance_decays_monotonically_to_zero(
            principal in 1u128..1_000_000_000_000u128,
            weeks in 1u64..200u64,
            t1 in 0u64..(200 * WEEK),
            t2 in 0u64..(200 * WEEK),
        ) {
            let mut e = ledger();
            let unlock = T0 + weeks * WEEK;
            e.create_lock(id("alice"), principal, unlock, T0).unwrap();
            let (a, b) = if t1 <= t2 { (T0 + t1, T0 + t2) } else { (T0 + t2, T0 + t1) };
            let ba = e.balance_of(id("alice"), a);
            let bb = e.balance_of(id("alice"), b);
            prop_assert!(bb <= ba);
            prop_assert!(ba <= principal);
            if b >= unlock {
                prop_assert_eq!(bb, 0);
            }
        }
    }
}
