//! Locked and unlocked staking positions and the combined-weight formula.
//!
//! The stake ledger only validates and plans mutations; the farm decides when to commit them
//! so reward accrual always happens with the weight in force before the change.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{LedgerError, Result};

use super::bounds::RuntimeBounds;
use super::invariants::{InvariantId, InvariantViolation};
use super::math::{
    add_u128, add_u64, boost_factor, lock_multiplier, min_escrow_for_max_boost, mul_div_floor,
    scaled_liquidity, sub_u128,
};
use super::params::StakeParams;
use super::types::{AccountId, Multiplier, StakeId, PRECISION};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedStake {
    pub id: StakeId,
    pub owner: AccountId,
    pub liquidity: u128,
    pub lock_start: u64,
    pub lock_end: u64,
    pub lock_multiplier: Multiplier,
}

/// Boost-independent inputs of an account's combined weight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WeightInputs {
    /// `Σ floor(liquidity × lock_multiplier / PRECISION) + unlocked balance`.
    pub base_weight: u128,
    /// Liquidity held in locked stakes (drives the boost threshold).
    pub locked_liquidity: u128,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum StakeChange {
    Insert(LockedStake),
    Remove(StakeId),
    Grow { id: StakeId, liquidity: u128 },
    Relock {
        id: StakeId,
        lock_start: u64,
        lock_end: u64,
        multiplier: Multiplier,
    },
    Unlocked { balance: u128 },
}

/// A validated stake-table mutation with the totals it produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StakePlan {
    pub account: AccountId,
    pub change: StakeChange,
    pub total_locked: u128,
    pub total_unlocked: u128,
    pub inputs_after: WeightInputs,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakeLedger {
    params: StakeParams,
    max_stakes_per_account: usize,
    stakes: BTreeMap<StakeId, LockedStake>,
    by_owner: BTreeMap<AccountId, BTreeSet<StakeId>>,
    unlocked_balances: BTreeMap<AccountId, u128>,
    total_liquidity_locked: u128,
    total_liquidity_unlocked: u128,
    combined_weights: BTreeMap<AccountId, u128>,
    total_combined_weight: u128,
    denylist: BTreeSet<AccountId>,
    stakes_unlocked: bool,
    nonce: u64,
}

impl StakeLedger {
    pub fn new(params: StakeParams, bounds: RuntimeBounds) -> StakeLedger {
        StakeLedger {
            params,
            max_stakes_per_account: bounds.max_stakes_per_account,
            stakes: BTreeMap::new(),
            by_owner: BTreeMap::new(),
            unlocked_balances: BTreeMap::new(),
            total_liquidity_locked: 0,
            total_liquidity_unlocked: 0,
            combined_weights: BTreeMap::new(),
            total_combined_weight: 0,
            denylist: BTreeSet::new(),
            stakes_unlocked: false,
            nonce: 0,
        }
    }

    pub fn params(&self) -> &StakeParams {
        &self.params
    }

    pub fn total_liquidity_locked(&self) -> u128 {
        self.total_liquidity_locked
    }

    pub fn total_liquidity_unlocked(&self) -> u128 {
        self.total_liquidity_unlocked
    }

    pub fn total_combined_weight(&self) -> u128 {
        self.total_combined_weight
    }

    /// Cached reward-effective weight as of the account's last checkpoint.
    pub fn combined_weight_of(&self, account: AccountId) -> u128 {
        self.combined_weights.get(&account).copied().unwrap_or(0)
    }

    pub fn stake(&self, id: StakeId) -> Option<&LockedStake> {
        self.stakes.get(&id)
    }

    pub fn locked_stakes_of(&self, account: AccountId) -> Vec<&LockedStake> {
        self.by_owner
            .get(&account)
            .into_iter()
            .flatten()
            .filter_map(|id| self.stakes.get(id))
            .collect()
    }

    pub fn locked_liquidity_of(&self, account: AccountId) -> u128 {
        self.locked_stakes_of(account)
            .iter()
            .fold(0u128, |acc, s| acc.saturating_add(s.liquidity))
    }

    pub fn unlocked_balance_of(&self, account: AccountId) -> u128 {
        self.unlocked_balances.get(&account).copied().unwrap_or(0)
    }

    pub fn is_denylisted(&self, account: AccountId) -> bool {
        self.denylist.contains(&account)
    }

    pub fn stakes_unlocked(&self) -> bool {
        self.stakes_unlocked
    }

    /// Accounts holding any position or cached weight.
    pub fn accounts(&self) -> BTreeSet<AccountId> {
        self.by_owner
            .keys()
            .chain(self.unlocked_balances.keys())
            .chain(self.combined_weights.keys())
            .copied()
            .collect()
    }

    /// Lock multiplier for `duration`; `InvalidLockDuration` outside `[min, max]`.
    pub fn lock_multiplier_for(&self, duration: u64) -> Result<Multiplier> {
        if duration < self.params.min_lock_duration() || duration > self.params.max_lock_duration()
        {
            return Err(LedgerError::InvalidLockDuration(format!(
                "duration {duration} outside [{}, {}]",
                self.params.min_lock_duration(),
                self.params.max_lock_duration()
            )));
        }
        lock_multiplier(
            duration,
            self.params.max_lock_duration(),
            self.params.max_lock_multiplier(),
        )
    }

    /// Escrow balance at which `account` reaches the maximum boost.
    pub fn min_escrow_for_max_boost(&self, account: AccountId) -> Result<u128> {
        min_escrow_for_max_boost(
            self.locked_liquidity_of(account),
            self.params.escrow_per_liquidity_for_max_boost(),
        )
    }

    /// Boost factor `account` would get with `escrow_balance`.
    pub fn boost_factor_of(&self, account: AccountId, escrow_balance: u128) -> Result<Multiplier> {
        self.boost_for(self.locked_liquidity_of(account), escrow_balance)
    }

    /// Boost factor of `escrow_balance` measured against `boost_liquidity` locked tokens.
    pub fn boost_for(&self, boost_liquidity: u128, escrow_balance: u128) -> Result<Multiplier> {
        let threshold = min_escrow_for_max_boost(
            boost_liquidity,
            self.params.escrow_per_liquidity_for_max_boost(),
        )?;
        boost_factor(escrow_balance, threshold, self.params.max_boost_factor())
    }

    pub fn weight_inputs(&self, account: AccountId) -> Result<WeightInputs> {
        let mut base = self.unlocked_balance_of(account);
        let mut locked = 0u128;
        for stake in self.locked_stakes_of(account) {
            base = add_u128(base, scaled_liquidity(stake.liquidity, stake.lock_multiplier)?)?;
            locked = add_u128(locked, stake.liquidity)?;
        }
        Ok(WeightInputs {
            base_weight: base,
            locked_liquidity: locked,
        })
    }

    /// `floor(base × boost / PRECISION)` for the given inputs and escrow balance.
    pub fn combined_weight(&self, inputs: WeightInputs, escrow_balance: u128) -> Result<u128> {
        self.shared_combined_weight(inputs, inputs.locked_liquidity, escrow_balance)
    }

    /// Like [`Self::combined_weight`], but the max-boost threshold is measured on
    /// `boost_liquidity`, which a delegated escrow balance spreads over all its delegators.
    pub fn shared_combined_weight(
        &self,
        inputs: WeightInputs,
        boost_liquidity: u128,
        escrow_balance: u128,
    ) -> Result<u128> {
        let boost = self.boost_for(boost_liquidity, escrow_balance)?;
        mul_div_floor(inputs.base_weight, boost.get(), PRECISION)
    }

    /// Checks shared by every new-stake path: amount, duration and denylist.
    pub(crate) fn validate_new_locked(
        &self,
        owner: AccountId,
        amount: u128,
        duration: u64,
    ) -> Result<Multiplier> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let multiplier = self.lock_multiplier_for(duration)?;
        if self.is_denylisted(owner) {
            return Err(LedgerError::AddressDenylisted);
        }
        Ok(multiplier)
    }

    pub(crate) fn plan_insert_locked(
        &self,
        owner: AccountId,
        amount: u128,
        lock_start: u64,
        duration: u64,
        multiplier: Multiplier,
    ) -> Result<StakePlan> {
        let held = self.by_owner.get(&owner).map_or(0, BTreeSet::len);
        if held >= self.max_stakes_per_account {
            return Err(LedgerError::BoundedValueExceeded(format!(
                "account already holds {held} locked stakes"
            )));
        }
        let lock_end = add_u64(lock_start, duration)?;
        let stake = LockedStake {
            id: StakeId::derive(owner, lock_start, amount, self.nonce),
            owner,
            liquidity: amount,
            lock_start,
            lock_end,
            lock_multiplier: multiplier,
        };
        let inputs = self.weight_inputs(owner)?;
        let inputs_after = WeightInputs {
            base_weight: add_u128(inputs.base_weight, scaled_liquidity(amount, multiplier)?)?,
            locked_liquidity: add_u128(inputs.locked_liquidity, amount)?,
        };
        Ok(StakePlan {
            account: owner,
            change: StakeChange::Insert(stake),
            total_locked: add_u128(self.total_liquidity_locked, amount)?,
            total_unlocked: self.total_liquidity_unlocked,
            inputs_after,
        })
    }

    pub(crate) fn plan_lock_additional(
        &self,
        caller: AccountId,
        id: StakeId,
        amount: u128,
        now: u64,
    ) -> Result<StakePlan> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let stake = self.stakes.get(&id).ok_or(LedgerError::LockNotFound)?;
        if stake.owner != caller {
            return Err(LedgerError::Unauthorized);
        }
        if now >= stake.lock_end {
            return Err(LedgerError::LockExpired);
        }
        let liquidity = add_u128(stake.liquidity, amount)?;
        let inputs = self.weight_inputs(caller)?;
        let old_scaled = scaled_liquidity(stake.liquidity, stake.lock_multiplier)?;
        let new_scaled = scaled_liquidity(liquidity, stake.lock_multiplier)?;
        let inputs_after = WeightInputs {
            base_weight: add_u128(sub_u128(inputs.base_weight, old_scaled)?, new_scaled)?,
            locked_liquidity: add_u128(inputs.locked_liquidity, amount)?,
        };
        Ok(StakePlan {
            account: caller,
            change: StakeChange::Grow { id, liquidity },
            total_locked: add_u128(self.total_liquidity_locked, amount)?,
            total_unlocked: self.total_liquidity_unlocked,
            inputs_after,
        })
    }

    /// Plans moving an unexpired stake's end out to `new_end`. The stake restarts at `now`
    /// and takes the multiplier of the remaining duration, so an extension can lower it.
    pub(crate) fn plan_lock_longer(
        &self,
        caller: AccountId,
        id: StakeId,
        new_end: u64,
        now: u64,
    ) -> Result<StakePlan> {
        let stake = self.stakes.get(&id).ok_or(LedgerError::LockNotFound)?;
        if stake.owner != caller {
            return Err(LedgerError::Unauthorized);
        }
        if now >= stake.lock_end {
            return Err(LedgerError::LockExpired);
        }
        if new_end <= stake.lock_end {
            return Err(LedgerError::InvalidUnlockTime(format!(
                "new end {new_end} does not extend current end {}",
                stake.lock_end
            )));
        }
        let multiplier = self.lock_multiplier_for(new_end - now)?;
        let inputs = self.weight_inputs(caller)?;
        let old_scaled = scaled_liquidity(stake.liquidity, stake.lock_multiplier)?;
        let new_scaled = scaled_liquidity(stake.liquidity, multiplier)?;
        Ok(StakePlan {
            account: caller,
            change: StakeChange::Relock {
                id,
                lock_start: now,
                lock_end: new_end,
                multiplier,
            },
            total_locked: self.total_liquidity_locked,
            total_unlocked: self.total_liquidity_unlocked,
            inputs_after: WeightInputs {
                base_weight: add_u128(sub_u128(inputs.base_weight, old_scaled)?, new_scaled)?,
                locked_liquidity: inputs.locked_liquidity,
            },
        })
    }

    /// Plans removal of `id` owned by `owner`; `bypass_maturity` skips the lock-end check.
    pub(crate) fn plan_remove_locked(
        &self,
        owner: AccountId,
        id: StakeId,
        now: u64,
        bypass_maturity: bool,
    ) -> Result<(StakePlan, LockedStake)> {
        let stake = self.stakes.get(&id).ok_or(LedgerError::LockNotFound)?;
        if stake.owner != owner {
            return Err(LedgerError::Unauthorized);
        }
        if now < stake.lock_end && !self.stakes_unlocked && !bypass_maturity {
            return Err(LedgerError::LockStillActive);
        }
        let inputs = self.weight_inputs(owner)?;
        let inputs_after = WeightInputs {
            base_weight: sub_u128(
                inputs.base_weight,
                scaled_liquidity(stake.liquidity, stake.lock_multiplier)?,
            )?,
            locked_liquidity: sub_u128(inputs.locked_liquidity, stake.liquidity)?,
        };
        let plan = StakePlan {
            account: owner,
            change: StakeChange::Remove(id),
            total_locked: sub_u128(self.total_liquidity_locked, stake.liquidity)?,
            total_unlocked: self.total_liquidity_unlocked,
            inputs_after,
        };
        Ok((plan, stake.clone()))
    }

    pub(crate) fn plan_stake_unlocked(&self, owner: AccountId, amount: u128) -> Result<StakePlan> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if self.is_denylisted(owner) {
            return Err(LedgerError::AddressDenylisted);
        }
        let inputs = self.weight_inputs(owner)?;
        Ok(StakePlan {
            account: owner,
            change: StakeChange::Unlocked {
                balance: add_u128(self.unlocked_balance_of(owner), amount)?,
            },
            total_locked: self.total_liquidity_locked,
            total_unlocked: add_u128(self.total_liquidity_unlocked, amount)?,
            inputs_after: WeightInputs {
                base_weight: add_u128(inputs.base_weight, amount)?,
                locked_liquidity: inputs.locked_liquidity,
            },
        })
    }

    pub(crate) fn plan_withdraw_unlocked(&self, owner: AccountId, amount: u128) -> Result<StakePlan> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let balance = self.unlocked_balance_of(owner);
        if amount > balance {
            return Err(LedgerError::InsufficientBalance(format!(
                "unlocked balance {balance} < requested {amount}"
            )));
        }
        let inputs = self.weight_inputs(owner)?;
        Ok(StakePlan {
            account: owner,
            change: StakeChange::Unlocked {
                balance: balance - amount,
            },
            total_locked: self.total_liquidity_locked,
            total_unlocked: sub_u128(self.total_liquidity_unlocked, amount)?,
            inputs_after: WeightInputs {
                base_weight: sub_u128(inputs.base_weight, amount)?,
                locked_liquidity: inputs.locked_liquidity,
            },
        })
    }

    /// Total combined weight after replacing `account`'s cached weight with `weight`.
    pub(crate) fn total_weight_after(&self, account: AccountId, weight: u128) -> Result<u128> {
        let without = sub_u128(self.total_combined_weight, self.combined_weight_of(account))?;
        add_u128(without, weight)
    }

    /// Applies a validated plan. Infallible: every value was computed by the plan.
    pub(crate) fn apply_plan(&mut self, plan: StakePlan) {
        match plan.change {
            StakeChange::Insert(stake) => {
                self.by_owner.entry(plan.account).or_default().insert(stake.id);
                self.stakes.insert(stake.id, stake);
                self.nonce = self.nonce.wrapping_add(1);
            }
            StakeChange::Remove(id) => {
                self.stakes.remove(&id);
                if let Some(ids) = self.by_owner.get_mut(&plan.account) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.by_owner.remove(&plan.account);
                    }
                }
            }
            StakeChange::Grow { id, liquidity } => {
                if let Some(stake) = self.stakes.get_mut(&id) {
                    stake.liquidity = liquidity;
                }
            }
            StakeChange::Relock {
                id,
                lock_start,
                lock_end,
                multiplier,
            } => {
                if let Some(stake) = self.stakes.get_mut(&id) {
                    stake.lock_start = lock_start;
                    stake.lock_end = lock_end;
                    stake.lock_multiplier = multiplier;
                }
            }
            StakeChange::Unlocked { balance } => {
                if balance == 0 {
                    self.unlocked_balances.remove(&plan.account);
                } else {
                    self.unlocked_balances.insert(plan.account, balance);
                }
            }
        }
        self.total_liquidity_locked = plan.total_locked;
        self.total_liquidity_unlocked = plan.total_unlocked;
    }

    /// Stores a weight previously checked with [`Self::total_weight_after`].
    pub(crate) fn set_weight(&mut self, account: AccountId, weight: u128, total: u128) {
        if weight == 0 {
            self.combined_weights.remove(&account);
        } else {
            self.combined_weights.insert(account, weight);
        }
        self.total_combined_weight = total;
    }

    pub(crate) fn toggle_stakes_unlocked(&mut self) -> bool {
        self.stakes_unlocked = !self.stakes_unlocked;
        info!(unlocked = self.stakes_unlocked, "stake maturity checks toggled");
        self.stakes_unlocked
    }

    pub(crate) fn set_denylisted(&mut self, account: AccountId, denied: bool) {
        if denied {
            self.denylist.insert(account);
        } else {
            self.denylist.remove(&account);
        }
        info!(account = %account, denied, "denylist updated");
    }

    pub fn check_invariants(&self) -> std::result::Result<(), InvariantViolation> {
        let locked = self
            .stakes
            .values()
            .try_fold(0u128, |acc, s| acc.checked_add(s.liquidity));
        if locked != Some(self.total_liquidity_locked) {
            return Err(InvariantViolation::new(
                InvariantId::LiquidityConserved,
                format!(
                    "total_liquidity_locked {} != Σ stakes {locked:?}",
                    self.total_liquidity_locked
                ),
            ));
        }
        let unlocked = self
            .unlocked_balances
            .values()
            .try_fold(0u128, |acc, b| acc.checked_add(*b));
        if unlocked != Some(self.total_liquidity_unlocked) {
            return Err(InvariantViolation::new(
                InvariantId::LiquidityConserved,
                format!(
                    "total_liquidity_unlocked {} != Σ balances {unlocked:?}",
                    self.total_liquidity_unlocked
                ),
            ));
        }
        let indexed: usize = self.by_owner.values().map(BTreeSet::len).sum();
        if indexed != self.stakes.len() {
            return Err(InvariantViolation::new(
                InvariantId::LiquidityConserved,
                format!("owner index holds {indexed} ids for {} stakes", self.stakes.len()),
            ));
        }
        if self
            .by_owner
            .values()
            .any(|ids| ids.len() > self.max_stakes_per_account)
        {
            return Err(InvariantViolation::new(
                InvariantId::BoundsRespected,
                "account exceeds max_stakes_per_account",
            ));
        }
        let weights = self
            .combined_weights
            .values()
            .try_fold(0u128, |acc, w| acc.checked_add(*w));
        if weights != Some(self.total_combined_weight) {
            return Err(InvariantViolation::new(
                InvariantId::CombinedWeightConserved,
                format!(
                    "total_combined_weight {} != Σ cached weights {weights:?}",
                    self.total_combined_weight
                ),
            ));
        }
        Ok(())
    }
}
