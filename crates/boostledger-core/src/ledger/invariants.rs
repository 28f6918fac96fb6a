use crate::{Hash32, LedgerError};

/// Stable identifiers for ledger invariants (used for testing and counterexamples).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvariantId {
    /// Ledger mutated state even though the action returned `Err`.
    NoMutationOnError,

    /// Safety bounds were exceeded (unreachable state).
    BoundsRespected,

    /// Escrow `supply` disagreed with the sum of position principals.
    EscrowSupplyMatchesPositions,

    /// A checkpoint log had a timestamp earlier than its predecessor.
    EscrowCheckpointsMonotone,

    /// A checkpoint carried a negative bias or slope.
    EscrowNonNegative,

    /// A checkpoint log entry was rewritten or removed.
    CheckpointLogAppendOnly,

    /// `total_liquidity_locked` / `total_liquidity_unlocked` disagreed with the stake table.
    LiquidityConserved,

    /// `total_combined_weight` disagreed with the sum of cached account weights.
    CombinedWeightConserved,

    /// A stream paid more than it owes, or owes more than it was funded.
    RewardNonLeakage,

    /// A stream's reward-per-weight accumulator decreased.
    RewardAccumulatorMonotone,

    /// Farm custody fell below the liquidity it owes to stakers.
    CustodyCoversStakes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantViolation {
    pub id: InvariantId,
    pub details: String,
}

impl InvariantViolation {
    pub fn new(id: InvariantId, details: impl Into<String>) -> Self {
        Self {
            id,
            details: details.into(),
        }
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.id, self.details)
    }
}

impl std::error::Error for InvariantViolation {}

impl From<InvariantViolation> for LedgerError {
    fn from(v: InvariantViolation) -> Self {
        LedgerError::ExecutionError(format!("ledger invariant violated: {v}"))
    }
}

/// A reproducible invariant failure with a minimal action trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvariantCounterexample {
    pub violation: InvariantViolation,
    /// Index of the first action that leads to a violated invariant.
    pub at_step: usize,
    /// State hash at the time of detection.
    pub state_hash: Hash32,
    /// The action prefix that reproduces the violation (includes the failing step).
    pub actions: Vec<super::LedgerAction>,
}

impl InvariantCounterexample {
    pub fn short(&self) -> String {
        format!(
            "Invariant {:?} violated at step {} (state_hash={})",
            self.violation.id,
            self.at_step,
            hex::encode(self.state_hash.0)
        )
    }
}
