use serde::{Deserialize, Serialize};

use super::types::{AccountId, EscrowLockOutcome, RewardPayout, StakeId, StakeOutcome, WithdrawOutcome};

/// Ledger state transition inputs.
///
/// This is the action space that traces, the invariant rail and external gates operate on.
/// Every farm-scoped action names its farm by index; every time-dependent action runs at the
/// ledger clock, which only [`LedgerAction::AdvanceTime`] moves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    /// Move the ledger clock forward (never backwards).
    AdvanceTime { to: u64 },

    // Escrow
    CreateLock {
        caller: AccountId,
        principal: u128,
        unlock_time: u64,
    },
    IncreaseAmount {
        caller: AccountId,
        delta: u128,
    },
    DepositFor {
        caller: AccountId,
        beneficiary: AccountId,
        delta: u128,
    },
    IncreaseUnlockTime {
        caller: AccountId,
        unlock_time: u64,
    },
    WithdrawEscrow {
        caller: AccountId,
    },
    CheckpointEscrow,
    ToggleEmergencyUnlock {
        caller: AccountId,
    },

    // Staking
    StakeLocked {
        farm: usize,
        caller: AccountId,
        amount: u128,
        duration: u64,
    },
    StakeUnlocked {
        farm: usize,
        caller: AccountId,
        amount: u128,
    },
    LockAdditional {
        farm: usize,
        caller: AccountId,
        stake_id: StakeId,
        amount: u128,
    },
    LockLonger {
        farm: usize,
        caller: AccountId,
        stake_id: StakeId,
        new_end: u64,
    },
    WithdrawLocked {
        farm: usize,
        caller: AccountId,
        stake_id: StakeId,
    },
    WithdrawUnlocked {
        farm: usize,
        caller: AccountId,
        amount: u128,
    },

    // Rewards
    GetReward {
        farm: usize,
        caller: AccountId,
    },
    CheckpointAccount {
        farm: usize,
        account: AccountId,
    },
    Sync {
        farm: usize,
    },
    AddRewardStream {
        farm: usize,
        caller: AccountId,
        token: String,
        rate_per_second: u128,
        funding: u128,
    },
    FundStream {
        farm: usize,
        index: usize,
        amount: u128,
    },
    ToggleRewardStream {
        farm: usize,
        caller: AccountId,
        index: usize,
    },
    SetRewardRates {
        farm: usize,
        caller: AccountId,
        rates: Vec<u128>,
        start_new_period_immediately: bool,
    },
    SetStreamRate {
        farm: usize,
        caller: AccountId,
        index: usize,
        rate: u128,
        start_new_period_immediately: bool,
    },

    // Governance
    ToggleStakingPaused {
        farm: usize,
        caller: AccountId,
    },
    ToggleWithdrawalsPaused {
        farm: usize,
        caller: AccountId,
    },
    ToggleRewardsCollectionPaused {
        farm: usize,
        caller: AccountId,
    },
    ToggleStakesUnlocked {
        farm: usize,
        caller: AccountId,
    },
    SetDenylisted {
        farm: usize,
        caller: AccountId,
        account: AccountId,
        denied: bool,
    },

    // Migration
    AddMigrator {
        farm: usize,
        caller: AccountId,
        migrator: AccountId,
    },
    RemoveMigrator {
        farm: usize,
        caller: AccountId,
        migrator: AccountId,
    },
    StakerAllowMigrator {
        farm: usize,
        caller: AccountId,
        migrator: AccountId,
    },
    StakerDisallowMigrator {
        farm: usize,
        caller: AccountId,
    },
    ToggleMigrations {
        farm: usize,
        caller: AccountId,
    },
    MigratorWithdrawLocked {
        farm: usize,
        migrator: AccountId,
        staker: AccountId,
        stake_id: StakeId,
    },
    MigratorWithdrawUnlocked {
        farm: usize,
        migrator: AccountId,
        staker: AccountId,
        amount: u128,
    },
    MigratorStakeLockedFor {
        farm: usize,
        migrator: AccountId,
        staker: AccountId,
        amount: u128,
        duration: u64,
        original_start: u64,
    },
    MigratorStakeUnlockedFor {
        farm: usize,
        migrator: AccountId,
        staker: AccountId,
        amount: u128,
    },

    // Escrow proxies
    ToggleValidProxy {
        farm: usize,
        caller: AccountId,
        proxy: AccountId,
    },
    ProxyToggleStaker {
        farm: usize,
        proxy: AccountId,
        staker: AccountId,
    },
    StakerSetProxy {
        farm: usize,
        caller: AccountId,
        proxy: AccountId,
    },

    // Custody
    ReceiveStakingTokens {
        farm: usize,
        amount: u128,
    },
    RecoverStrandedTokens {
        farm: usize,
        caller: AccountId,
        amount: u128,
    },
}

impl LedgerAction {
    /// Stable snake_case name (matches the serialized variant name).
    pub fn name(&self) -> &'static str {
        match self {
            LedgerAction::AdvanceTime { .. } => "advance_time",
            LedgerAction::CreateLock { .. } => "create_lock",
            LedgerAction::IncreaseAmount { .. } => "increase_amount",
            LedgerAction::DepositFor { .. } => "deposit_for",
            LedgerAction::IncreaseUnlockTime { .. } => "increase_unlock_time",
            LedgerAction::WithdrawEscrow { .. } => "withdraw_escrow",
            LedgerAction::CheckpointEscrow => "checkpoint_escrow",
            LedgerAction::ToggleEmergencyUnlock { .. } => "toggle_emergency_unlock",
            LedgerAction::StakeLocked { .. } => "stake_locked",
            LedgerAction::StakeUnlocked { .. } => "stake_unlocked",
            LedgerAction::LockAdditional { .. } => "lock_additional",
            LedgerAction::LockLonger { .. } => "lock_longer",
            LedgerAction::WithdrawLocked { .. } => "withdraw_locked",
            LedgerAction::WithdrawUnlocked { .. } => "withdraw_unlocked",
            LedgerAction::GetReward { .. } => "get_reward",
            LedgerAction::CheckpointAccount { .. } => "checkpoint_account",
            LedgerAction::Sync { .. } => "sync",
            LedgerAction::AddRewardStream { .. } => "add_reward_stream",
            LedgerAction::FundStream { .. } => "fund_stream",
            LedgerAction::ToggleRewardStream { .. } => "toggle_reward_stream",
            LedgerAction::SetRewardRates { .. } => "set_reward_rates",
            LedgerAction::SetStreamRate { .. } => "set_stream_rate",
            LedgerAction::ToggleStakingPaused { .. } => "toggle_staking_paused",
            LedgerAction::ToggleWithdrawalsPaused { .. } => "toggle_withdrawals_paused",
            LedgerAction::ToggleRewardsCollectionPaused { .. } => {
                "toggle_rewards_collection_paused"
            }
            LedgerAction::ToggleStakesUnlocked { .. } => "toggle_stakes_unlocked",
            LedgerAction::SetDenylisted { .. } => "set_denylisted",
            LedgerAction::AddMigrator { .. } => "add_migrator",
            LedgerAction::RemoveMigrator { .. } => "remove_migrator",
            LedgerAction::StakerAllowMigrator { .. } => "staker_allow_migrator",
            LedgerAction::StakerDisallowMigrator { .. } => "staker_disallow_migrator",
            LedgerAction::ToggleMigrations { .. } => "toggle_migrations",
            LedgerAction::MigratorWithdrawLocked { .. } => "migrator_withdraw_locked",
            LedgerAction::MigratorWithdrawUnlocked { .. } => "migrator_withdraw_unlocked",
            LedgerAction::MigratorStakeLockedFor { .. } => "migrator_stake_locked_for",
            LedgerAction::MigratorStakeUnlockedFor { .. } => "migrator_stake_unlocked_for",
            LedgerAction::ToggleValidProxy { .. } => "toggle_valid_proxy",
            LedgerAction::ProxyToggleStaker { .. } => "proxy_toggle_staker",
            LedgerAction::StakerSetProxy { .. } => "staker_set_proxy",
            LedgerAction::ReceiveStakingTokens { .. } => "receive_staking_tokens",
            LedgerAction::RecoverStrandedTokens { .. } => "recover_stranded_tokens",
        }
    }
}

/// Observable result of a successful action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Unit,
    /// New value of a toggled flag.
    Toggled(bool),
    EscrowLocked(EscrowLockOutcome),
    Staked(StakeOutcome),
    Withdrawn(WithdrawOutcome),
    /// A single amount: escrow principal returned, combined weight, funding total, etc.
    Amount(u128),
    RewardsPaid(RewardPayout),
    StreamAdded(usize),
}
