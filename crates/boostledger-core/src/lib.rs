//! boostledger core: a deterministic, IO-free ledger for time-locked,
//! vote-escrow boosted staking with multi-stream reward accrual.
//!
//! - [`ledger::EscrowLedger`] turns a principal locked until a maturity date into a
//!   decaying boost balance with historical checkpoints.
//! - [`ledger::Farm`] records locked stakes, derives combined weights from lock duration
//!   and escrow balance, and distributes reward streams by weight.
//! - [`ledger::MigrationController`] gates dual-consent migration of positions.
//! - [`ledger::ProxyRegistry`] lets a staker borrow an escrow holder's boost balance.
//! - [`ledger::Ledger`] owns all of the above behind a single action interface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod hash;
pub mod ledger;
pub mod metrics;

pub use config::LedgerConfig;

/// 32-byte hash newtype used for identifiers and state commitments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Hash32> {
        let bytes = hex::decode(s)
            .map_err(|e| LedgerError::InvalidInput(format!("invalid hex: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            LedgerError::InvalidInput(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Hash32(arr))
    }
}

pub type StateHash = Hash32;

/// Errors returned by every fallible ledger operation.
///
/// All checks run before any mutation: an `Err` always means the ledger is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // Position lookups and maturity
    #[error("Lock not found")]
    LockNotFound,

    #[error("Lock is still active")]
    LockStillActive,

    #[error("Lock has expired")]
    LockExpired,

    #[error("An active lock already exists; withdraw it first")]
    LockAlreadyExists,

    #[error("Invalid unlock time: {0}")]
    InvalidUnlockTime(String),

    #[error("Invalid lock duration: {0}")]
    InvalidLockDuration(String),

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    // Access control
    #[error("Address is denylisted")]
    AddressDenylisted,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Staking is paused")]
    StakingPaused,

    #[error("Withdrawals are paused")]
    WithdrawalsPaused,

    #[error("Reward collection is paused")]
    RewardsCollectionPaused,

    // Reward streams
    #[error("Reward stream is disabled")]
    StreamDisabled,

    #[error("Reward stream not found")]
    StreamNotFound,

    #[error("Insufficient reward funding: {0}")]
    InsufficientRewardFunding(String),

    // Migration
    #[error("Not in migration")]
    MigrationNotActive,

    #[error("Staking is suspended while migration is active")]
    MigrationActive,

    #[error("Migrator is not whitelisted")]
    MigratorNotWhitelisted,

    #[error("Migrator is not approved by staker")]
    MigratorNotApprovedByStaker,

    // Escrow delegation
    #[error("Invalid escrow proxy")]
    InvalidProxy,

    #[error("Escrow proxy has not allowed this staker")]
    ProxyNotAllowed,

    // Time and arithmetic
    #[error("Timestamp is earlier than the last recorded update")]
    NonMonotonicTime,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Bounded value exceeded: {0}")]
    BoundedValueExceeded(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl LedgerError {
    /// Stable snake_case name of the error kind (used for metrics labels).
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::LockNotFound => "lock_not_found",
            LedgerError::LockStillActive => "lock_still_active",
            LedgerError::LockExpired => "lock_expired",
            LedgerError::LockAlreadyExists => "lock_already_exists",
            LedgerError::InvalidUnlockTime(_) => "invalid_unlock_time",
            LedgerError::InvalidLockDuration(_) => "invalid_lock_duration",
            LedgerError::ZeroAmount => "zero_amount",
            LedgerError::InsufficientBalance(_) => "insufficient_balance",
            LedgerError::AddressDenylisted => "address_denylisted",
            LedgerError::Unauthorized => "unauthorized",
            LedgerError::StakingPaused => "staking_paused",
            LedgerError::WithdrawalsPaused => "withdrawals_paused",
            LedgerError::RewardsCollectionPaused => "rewards_collection_paused",
            LedgerError::StreamDisabled => "stream_disabled",
            LedgerError::StreamNotFound => "stream_not_found",
            LedgerError::InsufficientRewardFunding(_) => "insufficient_reward_funding",
            LedgerError::MigrationNotActive => "migration_not_active",
            LedgerError::MigrationActive => "migration_active",
            LedgerError::MigratorNotWhitelisted => "migrator_not_whitelisted",
            LedgerError::MigratorNotApprovedByStaker => "migrator_not_approved_by_staker",
            LedgerError::InvalidProxy => "invalid_proxy",
            LedgerError::ProxyNotAllowed => "proxy_not_allowed",
            LedgerError::NonMonotonicTime => "non_monotonic_time",
            LedgerError::InvalidInput(_) => "invalid_input",
            LedgerError::BoundedValueExceeded(_) => "bounded_value_exceeded",
            LedgerError::ConfigError(_) => "config_error",
            LedgerError::ExecutionError(_) => "execution_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash32_hex_roundtrip_and_length_check() {
        let h = Hash32([0xab; 32]);
        assert_eq!(Hash32::from_hex(&h.to_hex()).unwrap(), h);
        assert!(matches!(
            Hash32::from_hex("abcd"),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(Hash32::from_hex("zz").is_err());
    }

    #[test]
    fn error_kinds_are_snake_case() {
        assert_eq!(LedgerError::LockStillActive.kind(), "lock_still_active");
        assert_eq!(
            LedgerError::MigratorNotApprovedByStaker.kind(),
            "migrator_not_approved_by_staker"
        );
        assert_eq!(
            LedgerError::InvalidInput("x".into()).to_string(),
            "Invalid input: x"
        );
    }
}
