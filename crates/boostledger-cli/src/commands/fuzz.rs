//! Random-trace fuzzing of ledger invariants.

use anyhow::{Context, Result};
use tracing::debug;

use boostledger_core::ledger::{
    first_invariant_counterexample_v1, minimize_counterexample_v1, AccountId, ActionOutcome,
    AllowAllGate, Ledger, LedgerAction, StakeId, SECONDS_PER_DAY, SECONDS_PER_WEEK,
};
use boostledger_core::LedgerConfig;

#[derive(Clone, Copy)]
struct XorShift64(u64);

impl XorShift64 {
    fn new(seed: u64) -> Self {
        // Avoid the all-zero state.
        Self(if seed == 0 {
            0x9E37_79B9_7F4A_7C15
        } else {
            seed
        })
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn gen_range(&mut self, upper: u64) -> u64 {
        if upper == 0 {
            return 0;
        }
        self.next_u64() % upper
    }

    fn gen_amount(&mut self, upper: u64) -> u128 {
        (self.gen_range(upper) + 1) as u128
    }

    fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.gen_range(items.len() as u64) as usize)
    }
}

fn staker(i: u64) -> AccountId {
    AccountId::from_label(&format!("staker-{i}"))
}

/// Builds a random trace, applying it as it goes so later actions can reference stake ids
/// produced by earlier ones.
fn generate_trace(
    config: &LedgerConfig,
    seed: u64,
    steps: u32,
    accounts: u32,
) -> Result<Vec<LedgerAction>> {
    let mut ledger = Ledger::new(config).context("Failed to build ledger")?;
    let mut rng = XorShift64::new(seed);
    let accounts = u64::from(accounts.max(1));
    let farms = ledger.farms().len().max(1) as u64;
    let escrow_gov = config.escrow.governance_id();
    let migrator = AccountId::from_label("migrator");
    let proxy = AccountId::from_label("proxy");

    let mut actions: Vec<LedgerAction> = Vec::new();
    let mut stakes: Vec<(usize, AccountId, StakeId)> = Vec::new();

    // Bootstrap: an escrowed proxy, then one funded stream, a whitelisted migrator and a
    // valid proxy per farm.
    actions.push(LedgerAction::CreateLock {
        caller: proxy,
        principal: 500_000,
        unlock_time: config.genesis_time + config.escrow.max_horizon_secs / 2,
    });
    for (farm, fc) in config.farms.iter().enumerate() {
        let gov = fc.governance_id();
        let rate = 1_000u128;
        let funding = rate * u128::from(fc.period_duration_secs) * 8;
        actions.push(LedgerAction::AddRewardStream {
            farm,
            caller: gov,
            token: format!("REWARD-{farm}"),
            rate_per_second: rate,
            funding,
        });
        actions.push(LedgerAction::AddMigrator {
            farm,
            caller: gov,
            migrator,
        });
        actions.push(LedgerAction::ToggleValidProxy {
            farm,
            caller: gov,
            proxy,
        });
    }
    for a in &actions {
        let _ = ledger.apply(&AllowAllGate, a.clone());
    }

    for _ in 0..steps {
        let now = ledger.now();
        let farm = rng.gen_range(farms) as usize;
        let gov = config
            .farms
            .get(farm)
            .map(|f| f.governance_id())
            .unwrap_or(escrow_gov);
        let who = staker(rng.gen_range(accounts));
        let horizon = config.escrow.max_horizon_secs;
        let (min_lock, max_lock) = config
            .farms
            .get(farm)
            .map(|f| (f.min_lock_secs, f.max_lock_secs))
            .unwrap_or((SECONDS_PER_DAY, SECONDS_PER_DAY));

        let a = match rng.gen_range(20) {
            0 | 1 => LedgerAction::AdvanceTime {
                to: now + rng.gen_range(2 * SECONDS_PER_WEEK) + 1,
            },
            2 => LedgerAction::CreateLock {
                caller: who,
                principal: rng.gen_amount(1_000_000),
                unlock_time: now + rng.gen_range(horizon) + 1,
            },
            3 => LedgerAction::IncreaseAmount {
                caller: who,
                delta: rng.gen_amount(100_000),
            },
            4 => LedgerAction::DepositFor {
                caller: staker(rng.gen_range(accounts)),
                beneficiary: who,
                delta: rng.gen_amount(100_000),
            },
            5 => LedgerAction::IncreaseUnlockTime {
                caller: who,
                unlock_time: now + rng.gen_range(horizon) + 1,
            },
            6 => LedgerAction::WithdrawEscrow { caller: who },
            7 | 8 => LedgerAction::StakeLocked {
                farm,
                caller: who,
                amount: rng.gen_amount(50_000),
                duration: min_lock + rng.gen_range(max_lock - min_lock + 1),
            },
            9 => LedgerAction::StakeUnlocked {
                farm,
                caller: who,
                amount: rng.gen_amount(50_000),
            },
            10 => {
                let Some(&(farm, owner, stake_id)) = rng.pick(&stakes) else {
                    continue;
                };
                if rng.gen_range(2) == 0 {
                    LedgerAction::LockAdditional {
                        farm,
                        caller: owner,
                        stake_id,
                        amount: rng.gen_amount(10_000),
                    }
                } else {
                    LedgerAction::LockLonger {
                        farm,
                        caller: owner,
                        stake_id,
                        new_end: now + rng.gen_range(max_lock) + 1,
                    }
                }
            }
            11 => {
                let Some(&(farm, owner, stake_id)) = rng.pick(&stakes) else {
                    continue;
                };
                LedgerAction::WithdrawLocked {
                    farm,
                    caller: owner,
                    stake_id,
                }
            }
            12 => LedgerAction::WithdrawUnlocked {
                farm,
                caller: who,
                amount: rng.gen_amount(50_000),
            },
            13 | 14 => LedgerAction::GetReward { farm, caller: who },
            15 => match rng.gen_range(3) {
                0 => LedgerAction::CheckpointAccount { farm, account: who },
                1 => LedgerAction::Sync { farm },
                _ => LedgerAction::CheckpointEscrow,
            },
            16 => match rng.gen_range(3) {
                0 => LedgerAction::FundStream {
                    farm,
                    index: 0,
                    amount: rng.gen_amount(10_000_000),
                },
                1 => LedgerAction::SetStreamRate {
                    farm,
                    caller: gov,
                    index: 0,
                    rate: rng.gen_amount(2_000),
                    start_new_period_immediately: rng.gen_range(2) == 0,
                },
                _ => LedgerAction::ToggleRewardStream {
                    farm,
                    caller: gov,
                    index: 0,
                },
            },
            17 => match rng.gen_range(4) {
                0 => LedgerAction::ToggleStakingPaused { farm, caller: gov },
                1 => LedgerAction::ToggleWithdrawalsPaused { farm, caller: gov },
                2 => LedgerAction::ToggleStakesUnlocked { farm, caller: gov },
                _ => LedgerAction::ToggleEmergencyUnlock { caller: escrow_gov },
            },
            18 => match rng.gen_range(5) {
                0 => LedgerAction::StakerAllowMigrator {
                    farm,
                    caller: who,
                    migrator,
                },
                1 => LedgerAction::ToggleMigrations { farm, caller: gov },
                2 => LedgerAction::StakerDisallowMigrator { farm, caller: who },
                3 => LedgerAction::ProxyToggleStaker {
                    farm,
                    proxy,
                    staker: who,
                },
                _ => LedgerAction::StakerSetProxy {
                    farm,
                    caller: who,
                    proxy,
                },
            },
            _ => match rng.pick(&stakes) {
                Some(&(farm, owner, stake_id)) if rng.gen_range(2) == 0 => {
                    LedgerAction::MigratorWithdrawLocked {
                        farm,
                        migrator,
                        staker: owner,
                        stake_id,
                    }
                }
                _ => LedgerAction::MigratorStakeUnlockedFor {
                    farm,
                    migrator,
                    staker: who,
                    amount: rng.gen_amount(50_000),
                },
            },
        };

        match ledger.apply(&AllowAllGate, a.clone()) {
            Ok(ActionOutcome::Staked(out)) => {
                if let LedgerAction::StakeLocked { farm, caller, .. } = &a {
                    stakes.push((*farm, *caller, out.stake_id));
                }
            }
            Ok(ActionOutcome::Withdrawn(out)) => {
                if let Some(id) = out.stake_id {
                    stakes.retain(|(_, _, s)| *s != id);
                }
            }
            Ok(_) => {}
            Err(e) => debug!(action = a.name(), error = %e, "generated action rejected"),
        }
        actions.push(a);
    }

    Ok(actions)
}

pub fn run(config: &LedgerConfig, seed: u64, steps: u32, iters: u32, accounts: u32) -> Result<()> {
    for i in 0..iters {
        let run_seed = seed ^ (0x9E37_79B9_7F4A_7C15u64.wrapping_mul(i as u64 + 1));
        let trace = generate_trace(config, run_seed, steps, accounts)?;

        let Some(ce) = first_invariant_counterexample_v1(config, &trace)
            .context("Failed to run invariant check")?
        else {
            continue;
        };

        let min = minimize_counterexample_v1(config, &ce)
            .context("Failed to minimize invariant counterexample")?;

        println!("{}", min.short());
        println!();
        println!("Minimal trace ({} actions):", min.actions.len());
        println!(
            "{}",
            serde_json::to_string_pretty(&min.actions).context("Failed to serialize trace")?
        );
        anyhow::bail!("invariant violation (iteration {i}, seed {run_seed})");
    }

    println!(
        "No invariant violations found (iters={iters}, steps={steps}, accounts={accounts})."
    );
    Ok(())
}
