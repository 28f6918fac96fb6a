use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LedgerConfig;
use crate::hash::hash_state_preimage_v1;
use crate::metrics::{LedgerMetrics, StageTimer};
use crate::{Hash32, LedgerError, Result};

use super::actions::{ActionOutcome, LedgerAction};
use super::bounds::RuntimeBounds;
use super::escrow::EscrowLedger;
use super::farm::Farm;
use super::gate::LedgerGate;
use super::invariants::{InvariantId, InvariantViolation};
use super::types::AccountId;

/// The ledger aggregate: one escrow ledger shared by a set of farms, and the clock they run
/// on.
///
/// `apply` is the single entry point for traces, the invariant rail and the CLI. Actions run
/// at the ledger clock; only [`LedgerAction::AdvanceTime`] moves it, and never backwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ledger {
    bounds: RuntimeBounds,
    now: u64,
    escrow: EscrowLedger,
    farms: Vec<Farm>,
}

impl Ledger {
    /// Builds a ledger at `config.genesis_time`, creating every configured farm and its
    /// initial reward streams.
    pub fn new(config: &LedgerConfig) -> Result<Ledger> {
        config.validate()?;
        let bounds = config.bounds.runtime_bounds()?;
        let genesis = config.genesis_time;
        let escrow = EscrowLedger::new(
            config.escrow.escrow_params()?,
            config.escrow.governance_id(),
            genesis,
        );

        let mut farms = Vec::with_capacity(config.farms.len());
        for fc in &config.farms {
            let governance = fc.governance_id();
            let mut farm = Farm::new(
                governance,
                fc.stake_params()?,
                fc.reward_params()?,
                bounds,
                genesis,
            );
            for s in &fc.streams {
                farm.add_reward_stream(
                    governance,
                    s.token.clone(),
                    s.rate_per_second,
                    s.funding,
                    genesis,
                )?;
            }
            farms.push(farm);
        }
        Ledger::from_parts(bounds, genesis, escrow, farms)
    }

    /// Assembles a ledger from already-built components.
    pub fn from_parts(
        bounds: RuntimeBounds,
        now: u64,
        escrow: EscrowLedger,
        farms: Vec<Farm>,
    ) -> Result<Ledger> {
        bounds.validate()?;
        if farms.len() > bounds.max_farms {
            return Err(LedgerError::BoundedValueExceeded(format!(
                "{} farms exceed max_farms {}",
                farms.len(),
                bounds.max_farms
            )));
        }
        if escrow.global_checkpoints().is_empty() {
            return Err(LedgerError::InvalidInput(
                "escrow ledger has no global checkpoint".into(),
            ));
        }
        if escrow.last_checkpoint_time() > now || farms.iter().any(|f| f.last_update() > now) {
            return Err(LedgerError::NonMonotonicTime);
        }
        Ok(Ledger {
            bounds,
            now,
            escrow,
            farms,
        })
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn bounds(&self) -> RuntimeBounds {
        self.bounds
    }

    pub fn escrow(&self) -> &EscrowLedger {
        &self.escrow
    }

    pub fn farms(&self) -> &[Farm] {
        &self.farms
    }

    pub fn farm(&self, index: usize) -> Result<&Farm> {
        self.farms
            .get(index)
            .ok_or_else(|| LedgerError::InvalidInput(format!("unknown farm {index}")))
    }

    /// Per-stream claimable amounts of `account` in farm `index` at the ledger clock.
    pub fn earned(&self, index: usize, account: AccountId) -> Result<Vec<u128>> {
        self.farm(index)?.earned(account, self.now)
    }

    /// Weight `account` would get in farm `index` if it checkpointed now.
    pub fn current_combined_weight(
        &self,
        index: usize,
        account: AccountId,
    ) -> Result<u128> {
        self.farm(index)?
            .current_combined_weight(&self.escrow, account, self.now)
    }

    /// Applies one action after consulting `gate`. On `Err` the ledger is unchanged.
    pub fn apply(&mut self, gate: &impl LedgerGate, action: LedgerAction) -> Result<ActionOutcome> {
        gate.check(self, &action)?;
        let op = action.name();
        let now = self.now;
        let Ledger {
            escrow,
            farms,
            now: clock,
            ..
        } = &mut *self;

        let outcome = match action {
            LedgerAction::AdvanceTime { to } => {
                if to < now {
                    return Err(LedgerError::NonMonotonicTime);
                }
                *clock = to;
                ActionOutcome::Unit
            }

            LedgerAction::CreateLock {
                caller,
                principal,
                unlock_time,
            } => ActionOutcome::EscrowLocked(escrow.create_lock(
                caller,
                principal,
                unlock_time,
                now,
            )?),
            LedgerAction::IncreaseAmount { caller, delta } => {
                ActionOutcome::EscrowLocked(escrow.increase_amount(caller, delta, now)?)
            }
            LedgerAction::DepositFor {
                caller,
                beneficiary,
                delta,
            } => ActionOutcome::EscrowLocked(escrow.deposit_for(caller, beneficiary, delta, now)?),
            LedgerAction::IncreaseUnlockTime {
                caller,
                unlock_time,
            } => ActionOutcome::EscrowLocked(escrow.increase_unlock_time(
                caller,
                unlock_time,
                now,
            )?),
            LedgerAction::WithdrawEscrow { caller } => {
                ActionOutcome::Amount(escrow.withdraw(caller, now)?)
            }
            LedgerAction::CheckpointEscrow => {
                escrow.checkpoint(now)?;
                ActionOutcome::Unit
            }
            LedgerAction::ToggleEmergencyUnlock { caller } => {
                ActionOutcome::Toggled(escrow.toggle_emergency_unlock(caller)?)
            }

            LedgerAction::StakeLocked {
                farm,
                caller,
                amount,
                duration,
            } => ActionOutcome::Staked(farm_mut(farms, farm)?.stake_locked(
                &*escrow, caller, amount, duration, now,
            )?),
            LedgerAction::StakeUnlocked {
                farm,
                caller,
                amount,
            } => ActionOutcome::Amount(
                farm_mut(farms, farm)?.stake_unlocked(&*escrow, caller, amount, now)?,
            ),
            LedgerAction::LockAdditional {
                farm,
                caller,
                stake_id,
                amount,
            } => ActionOutcome::Amount(farm_mut(farms, farm)?.lock_additional(
                &*escrow, caller, stake_id, amount, now,
            )?),
            LedgerAction::LockLonger {
                farm,
                caller,
                stake_id,
                new_end,
            } => ActionOutcome::Staked(farm_mut(farms, farm)?.lock_longer(
                &*escrow, caller, stake_id, new_end, now,
            )?),
            LedgerAction::WithdrawLocked {
                farm,
                caller,
                stake_id,
            } => ActionOutcome::Withdrawn(
                farm_mut(farms, farm)?.withdraw_locked(&*escrow, caller, stake_id, now)?,
            ),
            LedgerAction::WithdrawUnlocked {
                farm,
                caller,
                amount,
            } => ActionOutcome::Withdrawn(
                farm_mut(farms, farm)?.withdraw_unlocked(&*escrow, caller, amount, now)?,
            ),

            LedgerAction::GetReward { farm, caller } => ActionOutcome::RewardsPaid(
                farm_mut(farms, farm)?.get_reward(&*escrow, caller, now)?,
            ),
            LedgerAction::CheckpointAccount { farm, account } => ActionOutcome::Amount(
                farm_mut(farms, farm)?.checkpoint_account(&*escrow, account, now)?,
            ),
            LedgerAction::Sync { farm } => {
                farm_mut(farms, farm)?.sync(now)?;
                ActionOutcome::Unit
            }
            LedgerAction::AddRewardStream {
                farm,
                caller,
                token,
                rate_per_second,
                funding,
            } => ActionOutcome::StreamAdded(farm_mut(farms, farm)?.add_reward_stream(
                caller,
                token,
                rate_per_second,
                funding,
                now,
            )?),
            LedgerAction::FundStream {
                farm,
                index,
                amount,
            } => ActionOutcome::Amount(farm_mut(farms, farm)?.fund_stream(index, amount, now)?),
            LedgerAction::ToggleRewardStream {
                farm,
                caller,
                index,
            } => ActionOutcome::Toggled(
                farm_mut(farms, farm)?.toggle_reward_stream(caller, index, now)?,
            ),
            LedgerAction::SetRewardRates {
                farm,
                caller,
                rates,
                start_new_period_immediately,
            } => {
                farm_mut(farms, farm)?.set_reward_rates(
                    caller,
                    &rates,
                    start_new_period_immediately,
                    now,
                )?;
                ActionOutcome::Unit
            }
            LedgerAction::SetStreamRate {
                farm,
                caller,
                index,
                rate,
                start_new_period_immediately,
            } => {
                farm_mut(farms, farm)?.set_stream_rate(
                    caller,
                    index,
                    rate,
                    start_new_period_immediately,
                    now,
                )?;
                ActionOutcome::Unit
            }

            LedgerAction::ToggleStakingPaused { farm, caller } => {
                ActionOutcome::Toggled(farm_mut(farms, farm)?.toggle_staking_paused(caller)?)
            }
            LedgerAction::ToggleWithdrawalsPaused { farm, caller } => {
                ActionOutcome::Toggled(farm_mut(farms, farm)?.toggle_withdrawals_paused(caller)?)
            }
            LedgerAction::ToggleRewardsCollectionPaused { farm, caller } => ActionOutcome::Toggled(
                farm_mut(farms, farm)?.toggle_rewards_collection_paused(caller)?,
            ),
            LedgerAction::ToggleStakesUnlocked { farm, caller } => {
                ActionOutcome::Toggled(farm_mut(farms, farm)?.toggle_stakes_unlocked(caller)?)
            }
            LedgerAction::SetDenylisted {
                farm,
                caller,
                account,
                denied,
            } => {
                farm_mut(farms, farm)?.set_denylisted(caller, account, denied)?;
                ActionOutcome::Unit
            }

            LedgerAction::AddMigrator {
                farm,
                caller,
                migrator,
            } => {
                farm_mut(farms, farm)?.add_migrator(caller, migrator)?;
                ActionOutcome::Unit
            }
            LedgerAction::RemoveMigrator {
                farm,
                caller,
                migrator,
            } => {
                farm_mut(farms, farm)?.remove_migrator(caller, migrator)?;
                ActionOutcome::Unit
            }
            LedgerAction::StakerAllowMigrator {
                farm,
                caller,
                migrator,
            } => {
                farm_mut(farms, farm)?.staker_allow_migrator(caller, migrator)?;
                ActionOutcome::Unit
            }
            LedgerAction::StakerDisallowMigrator { farm, caller } => {
                farm_mut(farms, farm)?.staker_disallow_migrator(caller);
                ActionOutcome::Unit
            }
            LedgerAction::ToggleMigrations { farm, caller } => {
                ActionOutcome::Toggled(farm_mut(farms, farm)?.toggle_migrations(caller)?)
            }
            LedgerAction::MigratorWithdrawLocked {
                farm,
                migrator,
                staker,
                stake_id,
            } => ActionOutcome::Withdrawn(farm_mut(farms, farm)?.migrator_withdraw_locked(
                &*escrow, migrator, staker, stake_id, now,
            )?),
            LedgerAction::MigratorWithdrawUnlocked {
                farm,
                migrator,
                staker,
                amount,
            } => ActionOutcome::Withdrawn(farm_mut(farms, farm)?.migrator_withdraw_unlocked(
                &*escrow, migrator, staker, amount, now,
            )?),
            LedgerAction::MigratorStakeLockedFor {
                farm,
                migrator,
                staker,
                amount,
                duration,
                original_start,
            } => ActionOutcome::Staked(farm_mut(farms, farm)?.migrator_stake_locked_for(
                &*escrow,
                migrator,
                staker,
                amount,
                duration,
                original_start,
                now,
            )?),
            LedgerAction::MigratorStakeUnlockedFor {
                farm,
                migrator,
                staker,
                amount,
            } => ActionOutcome::Amount(farm_mut(farms, farm)?.migrator_stake_unlocked_for(
                &*escrow, migrator, staker, amount, now,
            )?),

            LedgerAction::ToggleValidProxy {
                farm,
                caller,
                proxy,
            } => ActionOutcome::Toggled(
                farm_mut(farms, farm)?.toggle_valid_proxy(caller, proxy)?,
            ),
            LedgerAction::ProxyToggleStaker {
                farm,
                proxy,
                staker,
            } => ActionOutcome::Toggled(farm_mut(farms, farm)?.proxy_toggle_staker(
                &*escrow, proxy, staker, now,
            )?),
            LedgerAction::StakerSetProxy {
                farm,
                caller,
                proxy,
            } => ActionOutcome::Amount(farm_mut(farms, farm)?.staker_set_proxy(
                &*escrow, caller, proxy, now,
            )?),

            LedgerAction::ReceiveStakingTokens { farm, amount } => {
                ActionOutcome::Amount(farm_mut(farms, farm)?.receive_staking_tokens(amount)?)
            }
            LedgerAction::RecoverStrandedTokens {
                farm,
                caller,
                amount,
            } => ActionOutcome::Amount(
                farm_mut(farms, farm)?.recover_stranded_tokens(caller, amount)?,
            ),
        };

        debug!(op, now = self.now, "ledger action applied");
        Ok(outcome)
    }

    /// [`Ledger::apply`] with timing, outcome counters and state gauges recorded in `metrics`.
    pub fn apply_observed(
        &mut self,
        gate: &impl LedgerGate,
        action: LedgerAction,
        metrics: &LedgerMetrics,
    ) -> Result<ActionOutcome> {
        let op = action.name();
        let result = {
            let _timer = StageTimer::start(&metrics.apply_latency);
            self.apply(gate, action)
        };
        match &result {
            Ok(outcome) => metrics.record_applied(op, outcome),
            Err(e) => metrics.record_rejected(op, e),
        }
        metrics.observe_ledger(self);
        result
    }

    /// Commitment to the full ledger state (canonical JSON, domain-separated SHA-256).
    pub fn state_hash_v1(&self) -> Result<Hash32> {
        let preimage = serde_json::to_vec(self)
            .map_err(|e| LedgerError::ExecutionError(format!("state serialization failed: {e}")))?;
        Ok(hash_state_preimage_v1(&preimage))
    }

    pub fn check_invariants_v1(&self) -> std::result::Result<(), InvariantViolation> {
        if self.farms.len() > self.bounds.max_farms {
            return Err(InvariantViolation::new(
                InvariantId::BoundsRespected,
                format!("{} farms exceed max_farms", self.farms.len()),
            ));
        }
        self.escrow.check_invariants()?;
        for farm in &self.farms {
            farm.check_invariants()?;
        }
        Ok(())
    }
}

fn farm_mut(farms: &mut [Farm], index: usize) -> Result<&mut Farm> {
    farms
        .get_mut(index)
        .ok_or_else(|| LedgerError::InvalidInput(format!("unknown farm {index}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::gate::{AllowAllGate, DenyAllGate};
    use crate::ledger::types::{SECONDS_PER_DAY, SECONDS_PER_WEEK};

    fn id(label: &str) -> AccountId {
        AccountId::from_label(label)
    }

    fn ledger() -> Ledger {
        Ledger::new(&LedgerConfig::default()).unwrap()
    }

    #[test]
    fn default_config_builds_one_farm() {
        let l = ledger();
        assert_eq!(l.farms().len(), 1);
        assert_eq!(l.now(), LedgerConfig::default().genesis_time);
        assert!(l.check_invariants_v1().is_ok());
    }

    #[test]
    fn clock_only_moves_forward() {
        let mut l = ledger();
        let t = l.now() + SECONDS_PER_DAY;
        assert_eq!(
            l.apply(&AllowAllGate, LedgerAction::AdvanceTime { to: t }),
            Ok(ActionOutcome::Unit)
        );
        assert_eq!(
            l.apply(&AllowAllGate, LedgerAction::AdvanceTime { to: t - 1 }),
            Err(LedgerError::NonMonotonicTime)
        );
        assert_eq!(l.now(), t);
    }

    #[test]
    fn denied_and_failed_actions_do_not_change_state() {
        let mut l = ledger();
        let before = l.state_hash_v1().unwrap();
        let stake = LedgerAction::StakeLocked {
            farm: 0,
            caller: id("alice"),
            amount: 1_000,
            duration: 7 * SECONDS_PER_DAY,
        };
        assert!(l.apply(&DenyAllGate, stake).is_err());
        assert!(l
            .apply(
                &AllowAllGate,
                LedgerAction::StakeLocked {
                    farm: 9,
                    caller: id("alice"),
                    amount: 1_000,
                    duration: 7 * SECONDS_PER_DAY,
                }
            )
            .is_err());
        assert_eq!(l.state_hash_v1().unwrap(), before);
    }

    #[test]
    fn escrow_boost_flows_into_farm_weight() {
        let mut l = ledger();
        let t0 = l.now();
        let alice = id("alice");
        let out = l
            .apply(
                &AllowAllGate,
                LedgerAction::StakeLocked {
                    farm: 0,
                    caller: alice,
                    amount: 1_000,
                    duration: 7 * SECONDS_PER_DAY,
                },
            )
            .unwrap();
        let ActionOutcome::Staked(staked) = out else {
            panic!("expected stake outcome");
        };
        let base = staked.combined_weight;
        l.apply(
            &AllowAllGate,
            LedgerAction::CreateLock {
                caller: alice,
                principal: 1_000_000,
                unlock_time: t0 + 200 * SECONDS_PER_WEEK,
            },
        )
        .unwrap();
        assert_eq!(l.current_combined_weight(0, alice).unwrap(), 2 * base);
        assert_eq!(l.farm(0).unwrap().combined_weight_of(alice), base);
        l.apply(
            &AllowAllGate,
            LedgerAction::CheckpointAccount {
                farm: 0,
                account: alice,
            },
        )
        .unwrap();
        assert_eq!(l.farm(0).unwrap().combined_weight_of(alice), 2 * base);
        assert!(l.check_invariants_v1().is_ok());
    }

    #[test]
    fn ledger_without_escrow_checkpoints_is_rejected() {
        let l = ledger();
        let mut raw = serde_json::to_value(l.escrow()).unwrap();
        raw["global_history"] = serde_json::json!([]);
        let escrow: EscrowLedger = serde_json::from_value(raw).unwrap();
        assert!(matches!(
            Ledger::from_parts(l.bounds(), l.now(), escrow, l.farms().to_vec()),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(Ledger::from_parts(l.bounds(), l.now(), l.escrow().clone(), Vec::new()).is_ok());
    }

    #[test]
    fn apply_observed_counts_outcomes() {
        let mut l = ledger();
        let metrics = LedgerMetrics::new();
        l.apply_observed(&AllowAllGate, LedgerAction::CheckpointEscrow, &metrics)
            .unwrap();
        let _ = l.apply_observed(
            &AllowAllGate,
            LedgerAction::WithdrawEscrow { caller: id("bob") },
            &metrics,
        );
        assert_eq!(metrics.actions_applied.get(), 1);
        assert_eq!(metrics.actions_rejected.get(), 1);
        assert_eq!(metrics.rejections_of("lock_not_found"), 1);
    }
}
