use std::collections::BTreeMap;

use crate::config::LedgerConfig;
use crate::{LedgerError, Result};

use super::escrow::EscrowCheckpoint;
use super::types::AccountId;
use super::{
    AllowAllGate, InvariantCounterexample, InvariantId, InvariantViolation,
    Ledger, LedgerAction,
};

/// Observations taken before an action so its effect can be checked afterwards.
struct TransitionSnapshot {
    accumulators: Vec<Vec<u128>>,
    global_log: Vec<EscrowCheckpoint>,
    account_logs: BTreeMap<AccountId, Vec<EscrowCheckpoint>>,
}

impl TransitionSnapshot {
    fn take(ledger: &Ledger) -> TransitionSnapshot {
        let escrow = ledger.escrow();
        TransitionSnapshot {
            accumulators: accumulators(ledger),
            global_log: escrow.global_checkpoints().to_vec(),
            account_logs: escrow
                .checkpointed_accounts()
                .map(|a| (*a, escrow.account_checkpoints(*a).to_vec()))
                .collect(),
        }
    }
}

fn accumulators(ledger: &Ledger) -> Vec<Vec<u128>> {
    ledger
        .farms()
        .iter()
        .map(|f| {
            f.rewards()
                .streams()
                .iter()
                .map(|s| s.reward_per_weight_stored)
                .collect()
        })
        .collect()
}

/// Run an action trace and return the first invariant counterexample (if any).
///
/// Invariants checked:
/// - "no mutation on error" (state hash must not change if `apply` returns `Err`)
/// - `Ledger::check_invariants_v1` after every successful action
/// - transition checks: reward accumulators never decrease, checkpoint logs only grow
pub fn first_invariant_counterexample_v1(
    config: &LedgerConfig,
    actions: &[LedgerAction],
) -> Result<Option<InvariantCounterexample>> {
    let mut ledger = Ledger::new(config)?;
    let gate = AllowAllGate;

    for (i, a) in actions.iter().cloned().enumerate() {
        let before_hash = ledger.state_hash_v1()?;
        let before = TransitionSnapshot::take(&ledger);
        let r = ledger.apply(&gate, a);

        match r {
            Err(e) => {
                let after_hash = ledger.state_hash_v1()?;
                if after_hash != before_hash {
                    return Ok(Some(InvariantCounterexample {
                        violation: InvariantViolation::new(
                            InvariantId::NoMutationOnError,
                            format!("action returned Err but state hash changed: {e}"),
                        ),
                        at_step: i,
                        state_hash: after_hash,
                        actions: actions[..=i].to_vec(),
                    }));
                }
                continue;
            }
            Ok(_) => {
                let violation = check_transition_invariants(&before, &ledger)
                    .or_else(|| ledger.check_invariants_v1().err());
                if let Some(v) = violation {
                    return Ok(Some(InvariantCounterexample {
                        violation: v,
                        at_step: i,
                        state_hash: ledger.state_hash_v1()?,
                        actions: actions[..=i].to_vec(),
                    }));
                }
            }
        }
    }

    Ok(None)
}

fn check_transition_invariants(
    before: &TransitionSnapshot,
    ledger: &Ledger,
) -> Option<InvariantViolation> {
    let after = accumulators(ledger);
    for (farm, (old, new)) in before.accumulators.iter().zip(&after).enumerate() {
        for (stream, (o, n)) in old.iter().zip(new).enumerate() {
            if n < o {
                return Some(InvariantViolation::new(
                    InvariantId::RewardAccumulatorMonotone,
                    format!("farm {farm} stream {stream}: accumulator {o} -> {n}"),
                ));
            }
        }
    }

    let escrow = ledger.escrow();
    if !escrow.global_checkpoints().starts_with(&before.global_log) {
        return Some(InvariantViolation::new(
            InvariantId::CheckpointLogAppendOnly,
            "global checkpoint log was rewritten",
        ));
    }
    for (account, log) in &before.account_logs {
        if !escrow.account_checkpoints(*account).starts_with(log) {
            return Some(InvariantViolation::new(
                InvariantId::CheckpointLogAppendOnly,
                format!("checkpoint log of {account} was rewritten"),
            ));
        }
    }
    None
}

/// Minimize an invariant counterexample by removing actions while preserving the same invariant id.
///
/// This is a deterministic delta-debugging (ddmin) pass over the action list.
pub fn minimize_counterexample_v1(
    config: &LedgerConfig,
    ce: &InvariantCounterexample,
) -> Result<InvariantCounterexample> {
    let want = ce.violation.id;

    // Always start from the smallest prefix that actually triggers the violation.
    let Some(first) = first_invariant_counterexample_v1(config, &ce.actions)? else {
        return Err(LedgerError::ExecutionError(
            "minimize_counterexample_v1: provided trace does not reproduce".into(),
        ));
    };
    if first.violation.id != want {
        return Err(LedgerError::ExecutionError(
            "minimize_counterexample_v1: provided trace reproduces a different invariant".into(),
        ));
    }
    let mut cur = first.actions;

    // ddmin: remove chunks while preserving failure.
    let mut n = 2usize;
    while cur.len() >= 2 {
        let len = cur.len();
        let chunk = (len + n - 1) / n;
        let mut reduced = false;

        for start in (0..len).step_by(chunk) {
            let end = (start + chunk).min(len);
            if start == 0 && end == len {
                continue;
            }
            let mut cand = Vec::with_capacity(len - (end - start));
            cand.extend_from_slice(&cur[..start]);
            cand.extend_from_slice(&cur[end..]);

            let Some(r) = first_invariant_counterexample_v1(config, &cand)? else {
                continue;
            };
            if r.violation.id != want {
                continue;
            }

            cur = r.actions;
            n = n.saturating_sub(1).max(2);
            reduced = true;
            break;
        }

        if reduced {
            continue;
        }
        if n >= len {
            break;
        }
        n = (n * 2).min(len);
    }

    let Some(out) = first_invariant_counterexample_v1(config, &cur)? else {
        return Err(LedgerError::ExecutionError(
            "minimize_counterexample_v1: lost counterexample during minimization".into(),
        ));
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{SECONDS_PER_DAY, SECONDS_PER_WEEK};

    fn id(label: &str) -> AccountId {
        AccountId::from_label(label)
    }

    fn config() -> LedgerConfig {
        LedgerConfig::builder()
            .with_reward_stream(0, "FXS", 10, 1_000 * SECONDS_PER_WEEK as u128)
            .build()
            .unwrap()
    }

    #[test]
    fn invariant_rail_ignores_invalid_actions_that_do_not_mutate() {
        let actions = vec![
            LedgerAction::WithdrawEscrow { caller: id("alice") },
            LedgerAction::StakeLocked {
                farm: 0,
                caller: id("alice"),
                amount: 0,
                duration: SECONDS_PER_DAY,
            },
            LedgerAction::ToggleMigrations {
                farm: 0,
                caller: id("mallory"),
            },
        ];
        let ce = first_invariant_counterexample_v1(&config(), &actions).unwrap();
        assert!(ce.is_none());
    }

    #[test]
    fn invariant_rail_accepts_basic_happy_path() {
        let cfg = config();
        let t0 = cfg.genesis_time;
        let gov = cfg.farms[0].governance_id();
        let migrator = id("migrator");
        let actions = vec![
            LedgerAction::CreateLock {
                caller: id("alice"),
                principal: 50_000,
                unlock_time: t0 + 52 * SECONDS_PER_WEEK,
            },
            LedgerAction::StakeLocked {
                farm: 0,
                caller: id("alice"),
                amount: 10_000,
                duration: 7 * SECONDS_PER_DAY,
            },
            LedgerAction::StakeUnlocked {
                farm: 0,
                caller: id("bob"),
                amount: 4_000,
            },
            LedgerAction::AdvanceTime {
                to: t0 + 3 * SECONDS_PER_WEEK,
            },
            LedgerAction::GetReward {
                farm: 0,
                caller: id("alice"),
            },
            LedgerAction::CheckpointEscrow,
            LedgerAction::AddMigrator {
                farm: 0,
                caller: gov,
                migrator,
            },
            LedgerAction::StakerAllowMigrator {
                farm: 0,
                caller: id("bob"),
                migrator,
            },
            LedgerAction::ToggleMigrations { farm: 0, caller: gov },
            LedgerAction::MigratorWithdrawUnlocked {
                farm: 0,
                migrator,
                staker: id("bob"),
                amount: 4_000,
            },
            LedgerAction::GetReward {
                farm: 0,
                caller: id("bob"),
            },
            LedgerAction::Sync { farm: 0 },
        ];
        let ce = first_invariant_counterexample_v1(&cfg, &actions).unwrap();
        assert!(ce.is_none(), "{:?}", ce.map(|c| c.short()));
    }

    #[test]
    fn minimize_rejects_traces_that_do_not_reproduce() {
        let ce = InvariantCounterexample {
            violation: InvariantViolation::new(InvariantId::RewardNonLeakage, "synthetic"),
            at_step: 0,
            state_hash: crate::Hash32([0; 32]),
            actions: vec![LedgerAction::CheckpointEscrow],
        };
        assert!(matches!(
            minimize_counterexample_v1(&config(), &ce),
            Err(LedgerError::ExecutionError(_))
        ));
    }
}
