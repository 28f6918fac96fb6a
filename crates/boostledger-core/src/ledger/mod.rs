//! Boosted staking ledger (IO-free kernel).
//!
//! Components, bottom-up:
//! - [`EscrowLedger`]: principal locked until maturity, decaying linearly into a boost
//!   balance, with append-only global and per-account checkpoint logs.
//! - [`StakeLedger`]: locked and unlocked staking positions and the combined weight they
//!   earn (`liquidity × lock_multiplier × boost`).
//! - [`RewardAccrualEngine`]: continuously emitted reward streams distributed by weight
//!   through a reward-per-weight accumulator.
//! - [`MigrationController`]: governance whitelist plus per-staker approval for moving
//!   positions between farms.
//! - [`ProxyRegistry`]: consent table through which a staker borrows another account's
//!   escrow balance for its boost.
//!
//! [`Farm`] composes the last four; [`Ledger`] owns one escrow ledger, a set of farms and
//! the clock, and exposes everything through [`LedgerAction`].
//!
//! Design goals:
//! - Deterministic and bounded arithmetic (u128 intermediates, floor division)
//! - Validate first, commit last: an `Err` never leaves partial state behind
//! - Time-dependent state is brought current lazily by the operation that needs it

pub mod actions;
pub mod bounds;
pub mod engine;
pub mod escrow;
pub mod farm;
pub mod gate;
pub mod invariant_rail;
pub mod invariants;
pub mod math;
pub mod migration;
pub mod params;
pub mod proxy;
pub mod rewards;
pub mod stake;
pub mod types;

pub use actions::{ActionOutcome, LedgerAction};
pub use bounds::RuntimeBounds;
pub use engine::Ledger;
pub use escrow::{EscrowBalance, EscrowCheckpoint, EscrowLedger, EscrowPosition, NoEscrow};
pub use farm::Farm;
pub use gate::{AllowAllGate, DenyAllGate, LedgerGate};
pub use invariant_rail::{first_invariant_counterexample_v1, minimize_counterexample_v1};
pub use invariants::{InvariantCounterexample, InvariantId, InvariantViolation};
pub use migration::MigrationController;
pub use params::{EscrowParams, RewardParams, StakeParams};
pub use proxy::ProxyRegistry;
pub use rewards::{AccountRewardState, RewardAccrualEngine, RewardStream};
pub use stake::{LockedStake, StakeLedger, WeightInputs};
pub use types::{
    AccountId, EscrowId, EscrowLockOutcome, Multiplier, RewardPayout, StakeId, StakeOutcome,
    WithdrawOutcome, PRECISION, SECONDS_PER_DAY, SECONDS_PER_WEEK, SECONDS_PER_YEAR,
};
