//! One staking farm: stake table, reward streams, migration gate and staking-token custody.
//!
//! Every operation that can change an account's weight follows the same order:
//!
//! 1. validate the request against current state,
//! 2. sync every stream with the total weight in force until now,
//! 3. settle the account's rewards with the weight it held until now,
//! 4. compute the new weight from the planned stake table and the escrow balance,
//! 5. commit everything at once.
//!
//! Callers pass the escrow balance source by reference so several farms can share one
//! [`EscrowLedger`](super::escrow::EscrowLedger).

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{LedgerError, Result};

use super::bounds::RuntimeBounds;
use super::escrow::EscrowBalance;
use super::gate::{require_governance, require_owner};
use super::invariants::{InvariantId, InvariantViolation};
use super::math::{add_u128, min_escrow_for_max_boost, sub_u128};
use super::migration::MigrationController;
use super::params::{RewardParams, StakeParams};
use super::proxy::ProxyRegistry;
use super::rewards::{AccountRewardState, RewardAccrualEngine, RewardStream};
use super::stake::{LockedStake, StakeChange, StakeLedger, StakePlan};
use super::types::{
    AccountId, Multiplier, RewardPayout, StakeId, StakeOutcome, WithdrawOutcome,
};

/// Everything a checkpoint commits, computed up front.
struct Settlement {
    account: AccountId,
    streams: Vec<RewardStream>,
    state: AccountRewardState,
    stake_plan: Option<StakePlan>,
    weight: u128,
    total_weight: u128,
    payout: Option<Vec<u128>>,
    now: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Farm {
    governance: AccountId,
    stakes: StakeLedger,
    rewards: RewardAccrualEngine,
    migration: MigrationController,
    proxies: ProxyRegistry,
    staking_paused: bool,
    withdrawals_paused: bool,
    rewards_collection_paused: bool,
    held_staking_tokens: u128,
    last_update: u64,
}

impl Farm {
    pub fn new(
        governance: AccountId,
        stake_params: StakeParams,
        reward_params: RewardParams,
        bounds: RuntimeBounds,
        genesis: u64,
    ) -> Farm {
        Farm {
            governance,
            stakes: StakeLedger::new(stake_params, bounds),
            rewards: RewardAccrualEngine::new(reward_params, bounds.max_reward_streams),
            migration: MigrationController::new(bounds.max_migrators),
            proxies: ProxyRegistry::new(bounds.max_proxies),
            staking_paused: false,
            withdrawals_paused: false,
            rewards_collection_paused: false,
            held_staking_tokens: 0,
            last_update: genesis,
        }
    }

    pub fn governance(&self) -> AccountId {
        self.governance
    }

    pub fn stakes(&self) -> &StakeLedger {
        &self.stakes
    }

    pub fn rewards(&self) -> &RewardAccrualEngine {
        &self.rewards
    }

    pub fn migration(&self) -> &MigrationController {
        &self.migration
    }

    pub fn proxies(&self) -> &ProxyRegistry {
        &self.proxies
    }

    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    pub fn is_staking_paused(&self) -> bool {
        self.staking_paused
    }

    pub fn is_withdrawals_paused(&self) -> bool {
        self.withdrawals_paused
    }

    pub fn is_rewards_collection_paused(&self) -> bool {
        self.rewards_collection_paused
    }

    pub fn held_staking_tokens(&self) -> u128 {
        self.held_staking_tokens
    }

    /// Staking tokens held beyond what stakers are owed.
    pub fn stranded_tokens(&self) -> u128 {
        self.held_staking_tokens
            .saturating_sub(self.stakes.total_liquidity_locked())
            .saturating_sub(self.stakes.total_liquidity_unlocked())
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Cached weight as of the account's last checkpoint (what rewards accrue on).
    pub fn combined_weight_of(&self, account: AccountId) -> u128 {
        self.stakes.combined_weight_of(account)
    }

    /// Weight the account would get if it checkpointed at `now`.
    pub fn current_combined_weight(
        &self,
        escrow: &impl EscrowBalance,
        account: AccountId,
        now: u64,
    ) -> Result<u128> {
        let inputs = self.stakes.weight_inputs(account)?;
        let (balance, boost_liquidity) =
            self.boost_basis(&self.proxies, escrow, account, inputs.locked_liquidity, now)?;
        self.stakes
            .shared_combined_weight(inputs, boost_liquidity, balance)
    }

    pub fn boost_factor_of(
        &self,
        escrow: &impl EscrowBalance,
        account: AccountId,
        now: u64,
    ) -> Result<Multiplier> {
        let (balance, boost_liquidity) = self.boost_basis(
            &self.proxies,
            escrow,
            account,
            self.stakes.locked_liquidity_of(account),
            now,
        )?;
        self.stakes.boost_for(boost_liquidity, balance)
    }

    pub fn locked_stakes_of(&self, account: AccountId) -> Vec<&LockedStake> {
        self.stakes.locked_stakes_of(account)
    }

    pub fn locked_liquidity_of(&self, account: AccountId) -> u128 {
        self.stakes.locked_liquidity_of(account)
    }

    pub fn unlocked_balance_of(&self, account: AccountId) -> u128 {
        self.stakes.unlocked_balance_of(account)
    }

    pub fn total_liquidity_locked(&self) -> u128 {
        self.stakes.total_liquidity_locked()
    }

    pub fn total_combined_weight(&self) -> u128 {
        self.stakes.total_combined_weight()
    }

    pub fn min_escrow_for_max_boost(&self, account: AccountId) -> Result<u128> {
        self.stakes.min_escrow_for_max_boost(account)
    }

    /// Escrow balance `proxy` needs to max-boost every staker delegating to it.
    pub fn min_escrow_for_max_boost_proxy(&self, proxy: AccountId) -> Result<u128> {
        min_escrow_for_max_boost(
            self.delegated_liquidity(&self.proxies, proxy, None)?,
            self.stakes.params().escrow_per_liquidity_for_max_boost(),
        )
    }

    /// Accumulator of stream `index` after a virtual sync to `now`.
    pub fn reward_per_weight(&self, index: usize, now: u64) -> Result<u128> {
        self.ensure_time(now)?;
        self.rewards
            .reward_per_weight(index, now, self.stakes.total_combined_weight())
    }

    /// Per-stream amounts `get_reward` would pay at `now` (virtual sync, no state change).
    pub fn earned(&self, account: AccountId, now: u64) -> Result<Vec<u128>> {
        self.ensure_time(now)?;
        self.rewards.earned(
            account,
            self.stakes.combined_weight_of(account),
            now,
            self.stakes.total_combined_weight(),
        )
    }

    pub fn reward_for_duration(&self) -> Result<Vec<u128>> {
        self.rewards.reward_for_duration()
    }

    // ---------------------------------------------------------------------
    // Staking
    // ---------------------------------------------------------------------

    pub fn stake_locked(
        &mut self,
        escrow: &impl EscrowBalance,
        caller: AccountId,
        amount: u128,
        duration: u64,
        now: u64,
    ) -> Result<StakeOutcome> {
        self.ensure_time(now)?;
        let multiplier = self.stakes.validate_new_locked(caller, amount, duration)?;
        self.ensure_staking_open()?;
        let plan = self
            .stakes
            .plan_insert_locked(caller, amount, now, duration, multiplier)?;
        self.commit_new_stake(escrow, caller, amount, plan, now)
    }

    pub fn stake_unlocked(
        &mut self,
        escrow: &impl EscrowBalance,
        caller: AccountId,
        amount: u128,
        now: u64,
    ) -> Result<u128> {
        self.ensure_time(now)?;
        let plan = self.stakes.plan_stake_unlocked(caller, amount)?;
        self.ensure_staking_open()?;
        let held = add_u128(self.held_staking_tokens, amount)?;
        let settlement = self.settle(escrow, caller, now, Some(plan), false)?;

        // Commit after all fallible computations.
        self.held_staking_tokens = held;
        let (weight, _) = self.commit(settlement);
        debug!(account = %caller, amount, weight, "unlocked stake added");
        Ok(weight)
    }

    /// Adds liquidity to an unexpired stake; multiplier and lock end are unchanged.
    pub fn lock_additional(
        &mut self,
        escrow: &impl EscrowBalance,
        caller: AccountId,
        stake_id: StakeId,
        amount: u128,
        now: u64,
    ) -> Result<u128> {
        self.ensure_time(now)?;
        let plan = self
            .stakes
            .plan_lock_additional(caller, stake_id, amount, now)?;
        self.ensure_staking_open()?;
        let held = add_u128(self.held_staking_tokens, amount)?;
        let settlement = self.settle(escrow, caller, now, Some(plan), false)?;

        // Commit after all fallible computations.
        self.held_staking_tokens = held;
        let (weight, _) = self.commit(settlement);
        debug!(account = %caller, stake = %stake_id, amount, weight, "stake liquidity added");
        Ok(weight)
    }

    /// Extends an unexpired stake to `new_end`. Rewards accrue at the old multiplier up to
    /// `now`; the stake then restarts at `now` with the multiplier of its remaining duration.
    pub fn lock_longer(
        &mut self,
        escrow: &impl EscrowBalance,
        caller: AccountId,
        stake_id: StakeId,
        new_end: u64,
        now: u64,
    ) -> Result<StakeOutcome> {
        self.ensure_time(now)?;
        let plan = self
            .stakes
            .plan_lock_longer(caller, stake_id, new_end, now)?;
        self.ensure_staking_open()?;
        let StakeChange::Relock {
            lock_end,
            multiplier,
            ..
        } = plan.change
        else {
            return Err(LedgerError::ExecutionError(
                "lock extension plan does not relock a stake".into(),
            ));
        };
        let settlement = self.settle(escrow, caller, now, Some(plan), false)?;

        // Commit after all fallible computations.
        let (weight, _) = self.commit(settlement);
        debug!(
            account = %caller,
            stake = %stake_id,
            lock_end,
            multiplier = %multiplier,
            weight,
            "stake lock extended"
        );
        Ok(StakeOutcome {
            stake_id,
            lock_multiplier: multiplier,
            lock_end,
            combined_weight: weight,
        })
    }

    pub fn withdraw_locked(
        &mut self,
        escrow: &impl EscrowBalance,
        caller: AccountId,
        stake_id: StakeId,
        now: u64,
    ) -> Result<WithdrawOutcome> {
        self.ensure_time(now)?;
        let stake = self.stakes.stake(stake_id).ok_or(LedgerError::LockNotFound)?;
        require_owner(stake.owner, caller)?;
        if self.withdrawals_paused {
            return Err(LedgerError::WithdrawalsPaused);
        }
        let (plan, stake) = self
            .stakes
            .plan_remove_locked(caller, stake_id, now, false)?;
        self.commit_withdrawal(escrow, caller, caller, plan, Some(stake.id), stake.liquidity, now)
    }

    pub fn withdraw_unlocked(
        &mut self,
        escrow: &impl EscrowBalance,
        caller: AccountId,
        amount: u128,
        now: u64,
    ) -> Result<WithdrawOutcome> {
        self.ensure_time(now)?;
        if self.withdrawals_paused {
            return Err(LedgerError::WithdrawalsPaused);
        }
        let plan = self.stakes.plan_withdraw_unlocked(caller, amount)?;
        self.commit_withdrawal(escrow, caller, caller, plan, None, amount, now)
    }

    // ---------------------------------------------------------------------
    // Rewards
    // ---------------------------------------------------------------------

    /// Checkpoints `caller` and pays out everything accrued on every stream.
    pub fn get_reward(
        &mut self,
        escrow: &impl EscrowBalance,
        caller: AccountId,
        now: u64,
    ) -> Result<RewardPayout> {
        self.ensure_time(now)?;
        if self.rewards_collection_paused {
            return Err(LedgerError::RewardsCollectionPaused);
        }
        let settlement = self.settle(escrow, caller, now, None, true)?;

        // Commit after all fallible computations.
        let (_, payout) = self.commit(settlement);
        let payout = RewardPayout {
            account: caller,
            amounts: payout.unwrap_or_default(),
        };
        debug!(account = %caller, total = payout.total(), "rewards paid");
        Ok(payout)
    }

    /// Settles rewards for `account` and refreshes its weight from the current escrow balance.
    pub fn checkpoint_account(
        &mut self,
        escrow: &impl EscrowBalance,
        account: AccountId,
        now: u64,
    ) -> Result<u128> {
        self.ensure_time(now)?;
        let settlement = self.settle(escrow, account, now, None, false)?;
        let (weight, _) = self.commit(settlement);
        debug!(account = %account, weight, "account checkpointed");
        Ok(weight)
    }

    /// Brings every reward stream current at `now`.
    pub fn sync(&mut self, now: u64) -> Result<()> {
        self.ensure_time(now)?;
        self.rewards.sync(now, self.stakes.total_combined_weight())?;
        self.last_update = now;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Governance
    // ---------------------------------------------------------------------

    pub fn toggle_staking_paused(&mut self, caller: AccountId) -> Result<bool> {
        require_governance(self.governance, caller)?;
        self.staking_paused = !self.staking_paused;
        info!(paused = self.staking_paused, "staking pause toggled");
        Ok(self.staking_paused)
    }

    pub fn toggle_withdrawals_paused(&mut self, caller: AccountId) -> Result<bool> {
        require_governance(self.governance, caller)?;
        self.withdrawals_paused = !self.withdrawals_paused;
        info!(paused = self.withdrawals_paused, "withdrawal pause toggled");
        Ok(self.withdrawals_paused)
    }

    pub fn toggle_rewards_collection_paused(&mut self, caller: AccountId) -> Result<bool> {
        require_governance(self.governance, caller)?;
        self.rewards_collection_paused = !self.rewards_collection_paused;
        info!(
            paused = self.rewards_collection_paused,
            "reward collection pause toggled"
        );
        Ok(self.rewards_collection_paused)
    }

    /// Relaxes (or restores) the maturity check on every locked stake.
    pub fn toggle_stakes_unlocked(&mut self, caller: AccountId) -> Result<bool> {
        require_governance(self.governance, caller)?;
        Ok(self.stakes.toggle_stakes_unlocked())
    }

    pub fn set_denylisted(
        &mut self,
        caller: AccountId,
        account: AccountId,
        denied: bool,
    ) -> Result<()> {
        require_governance(self.governance, caller)?;
        self.stakes.set_denylisted(account, denied);
        Ok(())
    }

    pub fn add_reward_stream(
        &mut self,
        caller: AccountId,
        token: String,
        rate_per_second: u128,
        funding: u128,
        now: u64,
    ) -> Result<usize> {
        require_governance(self.governance, caller)?;
        self.ensure_time(now)?;
        let index = self.rewards.add_stream(
            token,
            rate_per_second,
            funding,
            now,
            self.stakes.total_combined_weight(),
        )?;
        self.last_update = now;
        Ok(index)
    }

    /// Adds funding to a stream. Open to any caller.
    pub fn fund_stream(&mut self, index: usize, amount: u128, now: u64) -> Result<u128> {
        self.ensure_time(now)?;
        let funded = self.rewards.fund_stream(
            index,
            amount,
            now,
            self.stakes.total_combined_weight(),
        )?;
        self.last_update = now;
        Ok(funded)
    }

    pub fn toggle_reward_stream(
        &mut self,
        caller: AccountId,
        index: usize,
        now: u64,
    ) -> Result<bool> {
        require_governance(self.governance, caller)?;
        self.ensure_time(now)?;
        let enabled =
            self.rewards
                .toggle_stream(index, now, self.stakes.total_combined_weight())?;
        self.last_update = now;
        Ok(enabled)
    }

    /// Installs new per-second rates after settling everything emitted so far.
    pub fn set_reward_rates(
        &mut self,
        caller: AccountId,
        rates: &[u128],
        start_new_period_immediately: bool,
        now: u64,
    ) -> Result<()> {
        require_governance(self.governance, caller)?;
        self.ensure_time(now)?;
        self.rewards.set_reward_rates(
            rates,
            start_new_period_immediately,
            now,
            self.stakes.total_combined_weight(),
        )?;
        self.last_update = now;
        Ok(())
    }

    pub fn set_stream_rate(
        &mut self,
        caller: AccountId,
        index: usize,
        rate: u128,
        start_new_period_immediately: bool,
        now: u64,
    ) -> Result<()> {
        require_governance(self.governance, caller)?;
        self.ensure_time(now)?;
        self.rewards.set_stream_rate(
            index,
            rate,
            start_new_period_immediately,
            now,
            self.stakes.total_combined_weight(),
        )?;
        self.last_update = now;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Migration
    // ---------------------------------------------------------------------

    pub fn add_migrator(&mut self, caller: AccountId, migrator: AccountId) -> Result<()> {
        require_governance(self.governance, caller)?;
        self.migration.add_migrator(migrator)
    }

    pub fn remove_migrator(&mut self, caller: AccountId, migrator: AccountId) -> Result<()> {
        require_governance(self.governance, caller)?;
        self.migration.remove_migrator(migrator);
        Ok(())
    }

    pub fn staker_allow_migrator(&mut self, caller: AccountId, migrator: AccountId) -> Result<()> {
        self.migration.staker_allow_migrator(caller, migrator)
    }

    pub fn staker_disallow_migrator(&mut self, caller: AccountId) {
        self.migration.staker_disallow_migrator(caller);
    }

    pub fn toggle_migrations(&mut self, caller: AccountId) -> Result<bool> {
        require_governance(self.governance, caller)?;
        Ok(self.migration.toggle())
    }

    /// Releases a staker's locked stake to an authorized migrator, ignoring maturity and
    /// pause flags.
    pub fn migrator_withdraw_locked(
        &mut self,
        escrow: &impl EscrowBalance,
        migrator: AccountId,
        staker: AccountId,
        stake_id: StakeId,
        now: u64,
    ) -> Result<WithdrawOutcome> {
        self.ensure_time(now)?;
        self.migration.authorize(migrator, staker)?;
        let (plan, stake) = self.stakes.plan_remove_locked(staker, stake_id, now, true)?;
        self.commit_withdrawal(escrow, staker, migrator, plan, Some(stake.id), stake.liquidity, now)
    }

    pub fn migrator_withdraw_unlocked(
        &mut self,
        escrow: &impl EscrowBalance,
        migrator: AccountId,
        staker: AccountId,
        amount: u128,
        now: u64,
    ) -> Result<WithdrawOutcome> {
        self.ensure_time(now)?;
        self.migration.authorize(migrator, staker)?;
        let plan = self.stakes.plan_withdraw_unlocked(staker, amount)?;
        self.commit_withdrawal(escrow, staker, migrator, plan, None, amount, now)
    }

    /// Re-creates a migrated stake for `staker`, keeping its original start so the lock end
    /// and multiplier match the source position.
    #[allow(clippy::too_many_arguments)]
    pub fn migrator_stake_locked_for(
        &mut self,
        escrow: &impl EscrowBalance,
        migrator: AccountId,
        staker: AccountId,
        amount: u128,
        duration: u64,
        original_start: u64,
        now: u64,
    ) -> Result<StakeOutcome> {
        self.ensure_time(now)?;
        self.migration.authorize(migrator, staker)?;
        if original_start > now {
            return Err(LedgerError::InvalidUnlockTime(format!(
                "original start {original_start} is in the future"
            )));
        }
        let multiplier = self.stakes.validate_new_locked(staker, amount, duration)?;
        let plan = self
            .stakes
            .plan_insert_locked(staker, amount, original_start, duration, multiplier)?;
        self.commit_new_stake(escrow, staker, amount, plan, now)
    }

    pub fn migrator_stake_unlocked_for(
        &mut self,
        escrow: &impl EscrowBalance,
        migrator: AccountId,
        staker: AccountId,
        amount: u128,
        now: u64,
    ) -> Result<u128> {
        self.ensure_time(now)?;
        self.migration.authorize(migrator, staker)?;
        let plan = self.stakes.plan_stake_unlocked(staker, amount)?;
        let held = add_u128(self.held_staking_tokens, amount)?;
        let settlement = self.settle(escrow, staker, now, Some(plan), false)?;

        // Commit after all fallible computations.
        self.held_staking_tokens = held;
        let (weight, _) = self.commit(settlement);
        debug!(staker = %staker, migrator = %migrator, amount, "unlocked stake migrated in");
        Ok(weight)
    }

    // ---------------------------------------------------------------------
    // Escrow proxies
    // ---------------------------------------------------------------------

    /// Cached weights of existing delegators pick the change up at their next checkpoint.
    pub fn toggle_valid_proxy(&mut self, caller: AccountId, proxy: AccountId) -> Result<bool> {
        require_governance(self.governance, caller)?;
        self.proxies.toggle_valid(proxy)
    }

    /// Called by a valid proxy; re-weights `staker` immediately.
    pub fn proxy_toggle_staker(
        &mut self,
        escrow: &impl EscrowBalance,
        proxy: AccountId,
        staker: AccountId,
        now: u64,
    ) -> Result<bool> {
        self.ensure_time(now)?;
        let mut proxies = self.proxies.clone();
        let allowed = proxies.toggle_staker(proxy, staker)?;
        let settlement = self.settle_in(&proxies, escrow, staker, now, None, false)?;

        // Commit after all fallible computations.
        self.proxies = proxies;
        self.commit(settlement);
        Ok(allowed)
    }

    /// Points `caller`'s boost at `proxy`'s escrow balance and re-weights `caller`.
    pub fn staker_set_proxy(
        &mut self,
        escrow: &impl EscrowBalance,
        caller: AccountId,
        proxy: AccountId,
        now: u64,
    ) -> Result<u128> {
        self.ensure_time(now)?;
        let mut proxies = self.proxies.clone();
        proxies.set_proxy(caller, proxy)?;
        let settlement = self.settle_in(&proxies, escrow, caller, now, None, false)?;

        // Commit after all fallible computations.
        self.proxies = proxies;
        let (weight, _) = self.commit(settlement);
        debug!(account = %caller, proxy = %proxy, weight, "boost delegated to escrow proxy");
        Ok(weight)
    }

    // ---------------------------------------------------------------------
    // Custody
    // ---------------------------------------------------------------------

    /// Records a raw staking-token transfer into the farm that is not tied to a stake.
    pub fn receive_staking_tokens(&mut self, amount: u128) -> Result<u128> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        self.held_staking_tokens = add_u128(self.held_staking_tokens, amount)?;
        Ok(self.held_staking_tokens)
    }

    /// Sweeps staking tokens that no staker is owed. Only while migrating.
    pub fn recover_stranded_tokens(&mut self, caller: AccountId, amount: u128) -> Result<u128> {
        require_governance(self.governance, caller)?;
        self.migration.ensure_migrating()?;
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let stranded = self.stranded_tokens();
        if amount > stranded {
            return Err(LedgerError::InsufficientBalance(format!(
                "only {stranded} stranded tokens, requested {amount}"
            )));
        }
        self.held_staking_tokens = sub_u128(self.held_staking_tokens, amount)?;
        warn!(amount, "stranded staking tokens recovered");
        Ok(amount)
    }

    pub fn check_invariants(&self) -> std::result::Result<(), InvariantViolation> {
        self.stakes.check_invariants()?;
        self.rewards.check_invariants()?;
        let owed = self
            .stakes
            .total_liquidity_locked()
            .checked_add(self.stakes.total_liquidity_unlocked());
        match owed {
            Some(owed) if owed <= self.held_staking_tokens => Ok(()),
            _ => Err(InvariantViolation::new(
                InvariantId::CustodyCoversStakes,
                format!(
                    "held {} < locked {} + unlocked {}",
                    self.held_staking_tokens,
                    self.stakes.total_liquidity_locked(),
                    self.stakes.total_liquidity_unlocked()
                ),
            )),
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn ensure_time(&self, now: u64) -> Result<()> {
        if now < self.last_update {
            return Err(LedgerError::NonMonotonicTime);
        }
        Ok(())
    }

    fn ensure_staking_open(&self) -> Result<()> {
        if self.staking_paused {
            return Err(LedgerError::StakingPaused);
        }
        self.migration.ensure_not_migrating()
    }

    fn settle(
        &self,
        escrow: &impl EscrowBalance,
        account: AccountId,
        now: u64,
        stake_plan: Option<StakePlan>,
        pay: bool,
    ) -> Result<Settlement> {
        self.settle_in(&self.proxies, escrow, account, now, stake_plan, pay)
    }

    /// Locked liquidity sharing `proxy`'s escrow balance. `replace` substitutes one
    /// delegator's planned liquidity for its stored one.
    fn delegated_liquidity(
        &self,
        proxies: &ProxyRegistry,
        proxy: AccountId,
        replace: Option<(AccountId, u128)>,
    ) -> Result<u128> {
        let mut total = 0u128;
        for staker in proxies.delegators(proxy) {
            let liquidity = match replace {
                Some((account, planned)) if account == staker => planned,
                _ => self.stakes.locked_liquidity_of(staker),
            };
            total = add_u128(total, liquidity)?;
        }
        Ok(total)
    }

    /// Escrow balance and locked liquidity `account`'s boost is measured against.
    fn boost_basis(
        &self,
        proxies: &ProxyRegistry,
        escrow: &impl EscrowBalance,
        account: AccountId,
        locked_liquidity: u128,
        now: u64,
    ) -> Result<(u128, u128)> {
        match proxies.active_proxy(account) {
            Some(proxy) => Ok((
                escrow.escrow_balance_at(proxy, now),
                self.delegated_liquidity(proxies, proxy, Some((account, locked_liquidity)))?,
            )),
            None => Ok((escrow.escrow_balance_at(account, now), locked_liquidity)),
        }
    }

    fn settle_in(
        &self,
        proxies: &ProxyRegistry,
        escrow: &impl EscrowBalance,
        account: AccountId,
        now: u64,
        stake_plan: Option<StakePlan>,
        pay: bool,
    ) -> Result<Settlement> {
        let streams = self
            .rewards
            .synced_streams(now, self.stakes.total_combined_weight())?;
        let state = self.rewards.settled_account(
            &streams,
            account,
            self.stakes.combined_weight_of(account),
        )?;
        let inputs = match &stake_plan {
            Some(plan) => plan.inputs_after,
            None => self.stakes.weight_inputs(account)?,
        };
        let (balance, boost_liquidity) =
            self.boost_basis(proxies, escrow, account, inputs.locked_liquidity, now)?;
        let weight = self
            .stakes
            .shared_combined_weight(inputs, boost_liquidity, balance)?;
        let total_weight = self.stakes.total_weight_after(account, weight)?;

        let mut settlement = Settlement {
            account,
            streams,
            state,
            stake_plan,
            weight,
            total_weight,
            payout: None,
            now,
        };
        if pay {
            let amounts = RewardAccrualEngine::plan_payout(
                &mut settlement.streams,
                &mut settlement.state,
            )?;
            settlement.payout = Some(amounts);
        }
        Ok(settlement)
    }

    fn commit(&mut self, s: Settlement) -> (u128, Option<Vec<u128>>) {
        self.rewards.commit_streams(s.streams);
        self.rewards.commit_account(s.account, s.state);
        if let Some(plan) = s.stake_plan {
            self.stakes.apply_plan(plan);
        }
        self.stakes.set_weight(s.account, s.weight, s.total_weight);
        self.last_update = s.now;
        (s.weight, s.payout)
    }

    fn commit_new_stake(
        &mut self,
        escrow: &impl EscrowBalance,
        owner: AccountId,
        amount: u128,
        plan: StakePlan,
        now: u64,
    ) -> Result<StakeOutcome> {
        let StakeChange::Insert(stake) = &plan.change else {
            return Err(LedgerError::ExecutionError(
                "new stake plan does not insert a stake".into(),
            ));
        };
        let stake = stake.clone();
        let held = add_u128(self.held_staking_tokens, amount)?;
        let settlement = self.settle(escrow, owner, now, Some(plan), false)?;

        // Commit after all fallible computations.
        self.held_staking_tokens = held;
        let (weight, _) = self.commit(settlement);
        debug!(
            account = %owner,
            stake = %stake.id,
            amount,
            lock_end = stake.lock_end,
            multiplier = %stake.lock_multiplier,
            "locked stake created"
        );
        Ok(StakeOutcome {
            stake_id: stake.id,
            lock_multiplier: stake.lock_multiplier,
            lock_end: stake.lock_end,
            combined_weight: weight,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_withdrawal(
        &mut self,
        escrow: &impl EscrowBalance,
        owner: AccountId,
        recipient: AccountId,
        plan: StakePlan,
        stake_id: Option<StakeId>,
        amount: u128,
        now: u64,
    ) -> Result<WithdrawOutcome> {
        let held = sub_u128(self.held_staking_tokens, amount)?;
        let settlement = self.settle(escrow, owner, now, Some(plan), false)?;

        // Commit after all fallible computations.
        self.held_staking_tokens = held;
        self.commit(settlement);
        debug!(account = %owner, recipient = %recipient, amount, "liquidity withdrawn");
        Ok(WithdrawOutcome {
            owner,
            stake_id,
            amount,
            recipient,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::escrow::NoEscrow;
    use crate::ledger::math::scaled_liquidity;
    use crate::ledger::types::{PRECISION, SECONDS_PER_DAY, SECONDS_PER_WEEK, SECONDS_PER_YEAR};

    const DAY: u64 = SECONDS_PER_DAY;
    const WEEK: u64 = SECONDS_PER_WEEK;

    struct FixedEscrow(u128);

    impl EscrowBalance for FixedEscrow {
        fn escrow_balance_at(&self, _account: AccountId, _at: u64) -> u128 {
            self.0
        }
    }

    /// Escrow held by a single account.
    struct EscrowOf(AccountId, u128);

    impl EscrowBalance for EscrowOf {
        fn escrow_balance_at(&self, account: AccountId, _at: u64) -> u128 {
            if account == self.0 {
                self.1
            } else {
                0
            }
        }
    }

    fn gov() -> AccountId {
        AccountId::from_label("gov")
    }

    fn alice() -> AccountId {
        AccountId::from_label("alice")
    }

    fn bob() -> AccountId {
        AccountId::from_label("bob")
    }

    fn farm() -> Farm {
        let stake = StakeParams::new(
            DAY,
            3 * SECONDS_PER_YEAR,
            Multiplier::from_parts(3, 0).unwrap(),
            Multiplier::from_parts(2, 0).unwrap(),
            4 * PRECISION,
        )
        .unwrap();
        Farm::new(
            gov(),
            stake,
            RewardParams::new(WEEK).unwrap(),
            RuntimeBounds::default(),
            0,
        )
    }

    #[test]
    fn ten_thousand_for_a_week_plus_quarter_for_548_days() {
        let mut f = farm();
        let a = f.stake_locked(&NoEscrow, alice(), 10_000, 7 * DAY, 0).unwrap();
        let b = f.stake_locked(&NoEscrow, alice(), 2_500, 548 * DAY, 0).unwrap();
        assert!(b.lock_multiplier > a.lock_multiplier);
        let expected = 10_000 * a.lock_multiplier.get() / PRECISION
            + 2_500 * b.lock_multiplier.get() / PRECISION;
        assert_eq!(f.combined_weight_of(alice()), expected);
        assert_eq!(f.current_combined_weight(&NoEscrow, alice(), 0).unwrap(), expected);
        assert_eq!(f.total_combined_weight(), expected);
        assert_eq!(f.locked_liquidity_of(alice()), 12_500);
    }

    #[test]
    fn escrow_boost_applies_at_checkpoint() {
        let mut f = farm();
        f.stake_locked(&NoEscrow, alice(), 1_000, DAY, 0).unwrap();
        let base = f.combined_weight_of(alice());
        // Cached weight only changes on the next checkpoint.
        assert_eq!(
            f.current_combined_weight(&FixedEscrow(4_000), alice(), 1).unwrap(),
            2 * base
        );
        assert_eq!(f.combined_weight_of(alice()), base);
        assert_eq!(f.checkpoint_account(&FixedEscrow(4_000), alice(), 1).unwrap(), 2 * base);
        assert_eq!(f.total_combined_weight(), 2 * base);
        assert_eq!(
            f.boost_factor_of(&FixedEscrow(2_000), alice(), 1).unwrap().get(),
            PRECISION + PRECISION / 2
        );
    }

    #[test]
    fn maturity_gate_allows_exactly_one_withdrawal() {
        let mut f = farm();
        let s = f.stake_locked(&NoEscrow, alice(), 500, DAY, 0).unwrap();
        assert_eq!(
            f.withdraw_locked(&NoEscrow, alice(), s.stake_id, DAY - 1),
            Err(LedgerError::LockStillActive)
        );
        assert_eq!(
            f.withdraw_locked(&NoEscrow, bob(), s.stake_id, DAY),
            Err(LedgerError::Unauthorized)
        );
        let out = f.withdraw_locked(&NoEscrow, alice(), s.stake_id, DAY).unwrap();
        assert_eq!(out.amount, 500);
        assert_eq!(out.recipient, alice());
        assert_eq!(
            f.withdraw_locked(&NoEscrow, alice(), s.stake_id, DAY),
            Err(LedgerError::LockNotFound)
        );
        assert_eq!(f.total_liquidity_locked(), 0);
        assert_eq!(f.total_combined_weight(), 0);
        assert!(f.check_invariants().is_ok());
    }

    #[test]
    fn pauses_and_migration_mode_block_end_user_staking() {
        let mut f = farm();
        assert_eq!(f.toggle_staking_paused(alice()), Err(LedgerError::Unauthorized));
        assert_eq!(f.toggle_staking_paused(gov()), Ok(true));
        assert_eq!(
            f.stake_locked(&NoEscrow, alice(), 1, DAY, 0),
            Err(LedgerError::StakingPaused)
        );
        f.toggle_staking_paused(gov()).unwrap();
        f.toggle_migrations(gov()).unwrap();
        assert_eq!(
            f.stake_locked(&NoEscrow, alice(), 1, DAY, 0),
            Err(LedgerError::MigrationActive)
        );
        assert_eq!(
            f.stake_unlocked(&NoEscrow, alice(), 1, 0),
            Err(LedgerError::MigrationActive)
        );
        f.toggle_migrations(gov()).unwrap();
        let s = f.stake_locked(&NoEscrow, alice(), 1, DAY, 0).unwrap();
        f.toggle_withdrawals_paused(gov()).unwrap();
        assert_eq!(
            f.withdraw_locked(&NoEscrow, alice(), s.stake_id, DAY),
            Err(LedgerError::WithdrawalsPaused)
        );
    }

    #[test]
    fn earned_matches_get_reward_and_accrues_before_weight_change() {
        let mut f = farm();
        f.add_reward_stream(gov(), "FXS".into(), 100, 1_000 * WEEK as u128, 0)
            .unwrap();
        f.stake_locked(&NoEscrow, alice(), 1_000, DAY, 0).unwrap();
        // Bob joins half-way with the same weight.
        f.stake_locked(&NoEscrow, bob(), 1_000, DAY, WEEK / 2).unwrap();

        let earned_alice = f.earned(alice(), WEEK).unwrap();
        let earned_bob = f.earned(bob(), WEEK).unwrap();
        let half = 100 * (WEEK / 2) as u128;
        assert!(earned_alice[0].abs_diff(half + half / 2) <= 2);
        assert!(earned_bob[0].abs_diff(half / 2) <= 2);

        let paid = f.get_reward(&NoEscrow, alice(), WEEK).unwrap();
        assert_eq!(paid.amounts, earned_alice);
        assert_eq!(f.earned(alice(), WEEK).unwrap(), vec![0]);

        f.toggle_rewards_collection_paused(gov()).unwrap();
        assert_eq!(
            f.get_reward(&NoEscrow, bob(), WEEK),
            Err(LedgerError::RewardsCollectionPaused)
        );
        assert!(f.check_invariants().is_ok());
    }

    #[test]
    fn lock_longer_accrues_at_the_old_weight_first() {
        let mut f = farm();
        f.add_reward_stream(gov(), "FXS".into(), 100, 1_000 * WEEK as u128, 0)
            .unwrap();
        let sid = f.stake_locked(&NoEscrow, alice(), 1_000, 2 * DAY, 0).unwrap().stake_id;
        f.stake_locked(&NoEscrow, bob(), 1_000, 2 * DAY, 0).unwrap();
        let w = f.combined_weight_of(bob());
        let day_emission = 100 * DAY as u128;

        let before = f.earned(alice(), DAY).unwrap()[0];
        assert!(before.abs_diff(day_emission / 2) <= 2);
        let out = f.lock_longer(&NoEscrow, alice(), sid, DAY + 3 * SECONDS_PER_YEAR, DAY)
            .unwrap();
        assert_eq!(out.lock_end, DAY + 3 * SECONDS_PER_YEAR);
        assert_eq!(out.lock_multiplier, Multiplier::from_parts(3, 0).unwrap());
        assert_eq!(out.combined_weight, 3_000);
        assert_eq!(f.earned(alice(), DAY).unwrap()[0], before);
        assert_eq!(f.total_combined_weight(), 3_000 + w);

        let second_day = day_emission * 3_000 / (3_000 + w);
        assert!(f.earned(alice(), 2 * DAY).unwrap()[0].abs_diff(before + second_day) <= 3);
        assert_eq!(
            f.withdraw_locked(&NoEscrow, alice(), sid, 2 * DAY),
            Err(LedgerError::LockStillActive)
        );
        let bob_stake = f.locked_stakes_of(bob())[0].id;
        f.withdraw_locked(&NoEscrow, bob(), bob_stake, 2 * DAY).unwrap();

        f.toggle_migrations(gov()).unwrap();
        assert_eq!(
            f.lock_longer(&NoEscrow, alice(), sid, 2 * DAY + 3 * SECONDS_PER_YEAR, 2 * DAY),
            Err(LedgerError::MigrationActive)
        );
        assert!(f.check_invariants().is_ok());
    }

    #[test]
    fn escrow_proxy_boost_is_shared_by_its_delegators() {
        let whale = AccountId::from_label("whale");
        let esc = EscrowOf(whale, 4_000);
        let mut f = farm();
        f.stake_locked(&esc, alice(), 1_000, DAY, 0).unwrap();
        f.stake_locked(&esc, bob(), 1_000, DAY, 0).unwrap();
        let base = f.combined_weight_of(alice());

        assert_eq!(f.toggle_valid_proxy(alice(), whale), Err(LedgerError::Unauthorized));
        assert_eq!(
            f.proxy_toggle_staker(&esc, whale, alice(), 1),
            Err(LedgerError::InvalidProxy)
        );
        assert!(f.toggle_valid_proxy(gov(), whale).unwrap());
        assert_eq!(
            f.staker_set_proxy(&esc, alice(), whale, 1),
            Err(LedgerError::ProxyNotAllowed)
        );
        assert!(f.proxy_toggle_staker(&esc, whale, alice(), 1).unwrap());
        assert_eq!(f.combined_weight_of(alice()), base);

        // Alone, alice gets the whale's full balance against her own liquidity.
        assert_eq!(f.staker_set_proxy(&esc, alice(), whale, 1).unwrap(), 2 * base);
        assert_eq!(
            f.boost_factor_of(&esc, alice(), 1).unwrap(),
            Multiplier::from_parts(2, 0).unwrap()
        );
        assert_eq!(f.min_escrow_for_max_boost_proxy(whale).unwrap(), 4_000);

        // A second delegator halves the balance per locked token.
        f.proxy_toggle_staker(&esc, whale, bob(), 2).unwrap();
        assert_eq!(f.staker_set_proxy(&esc, bob(), whale, 2).unwrap(), base * 3 / 2);
        assert_eq!(f.min_escrow_for_max_boost_proxy(whale).unwrap(), 8_000);
        assert_eq!(f.combined_weight_of(alice()), 2 * base);
        assert_eq!(f.checkpoint_account(&esc, alice(), 2).unwrap(), base * 3 / 2);

        // Revocation falls back to the staker's own (empty) escrow.
        assert!(!f.proxy_toggle_staker(&esc, whale, alice(), 3).unwrap());
        assert_eq!(f.proxies().designated_proxy(alice()), None);
        assert_eq!(f.combined_weight_of(alice()), base);
        assert_eq!(f.total_combined_weight(), base + base * 3 / 2);

        // Invalidating the proxy suspends bob's delegation at his next checkpoint.
        assert!(!f.toggle_valid_proxy(gov(), whale).unwrap());
        assert_eq!(f.checkpoint_account(&esc, bob(), 3).unwrap(), base);
        assert_eq!(f.proxies().designated_proxy(bob()), Some(whale));
        assert!(f.check_invariants().is_ok());
    }

    #[test]
    fn eighteen_decimal_stakes_and_emission_keep_the_farm_live() {
        let mut f = farm();
        let per_week = 1_000 * PRECISION;
        let rate = per_week / WEEK as u128;
        f.add_reward_stream(gov(), "FXS".into(), rate, per_week, 0).unwrap();

        let a = f
            .stake_locked(&NoEscrow, alice(), 10_000 * PRECISION, 7 * DAY, 0)
            .unwrap();
        assert_eq!(
            a.combined_weight,
            scaled_liquidity(10_000 * PRECISION, a.lock_multiplier).unwrap()
        );
        let escrow = FixedEscrow(40_000 * PRECISION);
        let b = f
            .stake_locked(&escrow, bob(), 100 * PRECISION, DAY, 0)
            .unwrap();
        assert_eq!(
            b.combined_weight,
            2 * scaled_liquidity(100 * PRECISION, b.lock_multiplier).unwrap()
        );

        let earned_alice = f.earned(alice(), WEEK).unwrap();
        let earned_bob = f.earned(bob(), WEEK).unwrap();
        assert!(earned_alice[0] + earned_bob[0] <= rate * WEEK as u128);
        assert!(earned_alice[0] > earned_bob[0]);

        let out = f.withdraw_locked(&escrow, bob(), b.stake_id, WEEK).unwrap();
        assert_eq!(out.amount, 100 * PRECISION);
        let out = f.withdraw_locked(&NoEscrow, alice(), a.stake_id, WEEK).unwrap();
        assert_eq!(out.amount, 10_000 * PRECISION);
        assert_eq!(f.get_reward(&NoEscrow, alice(), WEEK).unwrap().amounts, earned_alice);
        assert_eq!(f.get_reward(&escrow, bob(), WEEK).unwrap().amounts, earned_bob);
        assert_eq!(f.total_liquidity_locked(), 0);
        assert!(f.check_invariants().is_ok());
    }

    #[test]
    fn failed_operation_leaves_farm_unchanged() {
        let mut f = farm();
        f.add_reward_stream(gov(), "FXS".into(), 1, WEEK as u128, 0).unwrap();
        f.stake_locked(&NoEscrow, alice(), 1_000, DAY, 0).unwrap();
        let before = serde_json::to_string(&f).unwrap();
        let unknown = StakeId::derive(alice(), 0, 1, 99);
        assert_eq!(
            f.withdraw_locked(&NoEscrow, alice(), unknown, DAY),
            Err(LedgerError::LockNotFound)
        );
        assert_eq!(
            f.stake_locked(&NoEscrow, alice(), 0, DAY, DAY),
            Err(LedgerError::ZeroAmount)
        );
        assert!(matches!(
            f.set_reward_rates(gov(), &[2], false, DAY),
            Err(LedgerError::InsufficientRewardFunding(_))
        ));
        assert_eq!(serde_json::to_string(&f).unwrap(), before);
    }

    #[test]
    fn migration_moves_stake_with_original_start() {
        let mut f = farm();
        let migrator = AccountId::from_label("migrator");
        let s = f.stake_locked(&NoEscrow, alice(), 1_000, 30 * DAY, 0).unwrap();

        f.add_migrator(gov(), migrator).unwrap();
        f.staker_allow_migrator(alice(), migrator).unwrap();
        assert_eq!(
            f.migrator_withdraw_locked(&NoEscrow, migrator, alice(), s.stake_id, DAY),
            Err(LedgerError::MigrationNotActive)
        );
        f.toggle_migrations(gov()).unwrap();
        let out = f
            .migrator_withdraw_locked(&NoEscrow, migrator, alice(), s.stake_id, DAY)
            .unwrap();
        assert_eq!((out.amount, out.recipient), (1_000, migrator));
        assert_eq!(f.held_staking_tokens(), 0);

        let again = f
            .migrator_stake_locked_for(&NoEscrow, migrator, alice(), 1_000, 30 * DAY, 0, DAY)
            .unwrap();
        assert_eq!(again.lock_end, 30 * DAY);
        assert_eq!(again.lock_multiplier, s.lock_multiplier);
        assert_eq!(f.locked_stakes_of(alice())[0].lock_start, 0);
        assert!(matches!(
            f.migrator_stake_locked_for(&NoEscrow, migrator, alice(), 1, DAY, 2 * DAY, DAY),
            Err(LedgerError::InvalidUnlockTime(_))
        ));
        assert!(f.check_invariants().is_ok());
    }

    #[test]
    fn stranded_tokens_recoverable_only_while_migrating() {
        let mut f = farm();
        f.stake_unlocked(&NoEscrow, alice(), 100, 0).unwrap();
        f.receive_staking_tokens(40).unwrap();
        assert_eq!(f.stranded_tokens(), 40);
        assert_eq!(
            f.recover_stranded_tokens(gov(), 10),
            Err(LedgerError::MigrationNotActive)
        );
        f.toggle_migrations(gov()).unwrap();
        assert!(matches!(
            f.recover_stranded_tokens(gov(), 41),
            Err(LedgerError::InsufficientBalance(_))
        ));
        assert_eq!(f.recover_stranded_tokens(alice(), 40), Err(LedgerError::Unauthorized));
        assert_eq!(f.recover_stranded_tokens(gov(), 40), Ok(40));
        assert_eq!(f.held_staking_tokens(), 100);
        assert!(f.check_invariants().is_ok());
    }
}
