use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};

use super::types::{Multiplier, PRECISION};

/// Escrow decay parameters (validated once at construction).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowParams {
    max_horizon: u64,
    quantum: u64,
}

impl EscrowParams {
    /// Preconditions (enforced):
    /// - `quantum > 0`
    /// - `max_horizon >= quantum` (a lock must be able to span at least one quantum)
    pub fn new(max_horizon: u64, quantum: u64) -> Result<EscrowParams> {
        if quantum == 0 {
            return Err(LedgerError::InvalidInput("escrow quantum must be > 0".into()));
        }
        if max_horizon < quantum {
            return Err(LedgerError::InvalidInput(format!(
                "escrow max_horizon ({max_horizon}) must be >= quantum ({quantum})"
            )));
        }
        Ok(EscrowParams {
            max_horizon,
            quantum,
        })
    }

    pub fn max_horizon(&self) -> u64 {
        self.max_horizon
    }

    pub fn quantum(&self) -> u64 {
        self.quantum
    }
}

/// Lock-duration and boost parameters of a farm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeParams {
    min_lock_duration: u64,
    max_lock_duration: u64,
    max_lock_multiplier: Multiplier,
    max_boost_factor: Multiplier,
    escrow_per_liquidity_for_max_boost: u128,
}

impl StakeParams {
    /// Preconditions (enforced):
    /// - `0 < min_lock_duration <= max_lock_duration`
    /// - `escrow_per_liquidity_for_max_boost > 0` whenever the boost can exceed 1.0
    pub fn new(
        min_lock_duration: u64,
        max_lock_duration: u64,
        max_lock_multiplier: Multiplier,
        max_boost_factor: Multiplier,
        escrow_per_liquidity_for_max_boost: u128,
    ) -> Result<StakeParams> {
        if min_lock_duration == 0 {
            return Err(LedgerError::InvalidInput(
                "min_lock_duration must be > 0".into(),
            ));
        }
        if min_lock_duration > max_lock_duration {
            return Err(LedgerError::InvalidInput(format!(
                "min_lock_duration ({min_lock_duration}) exceeds max_lock_duration ({max_lock_duration})"
            )));
        }
        if max_boost_factor > Multiplier::ONE && escrow_per_liquidity_for_max_boost == 0 {
            return Err(LedgerError::InvalidInput(
                "escrow_per_liquidity_for_max_boost must be > 0 when boosting".into(),
            ));
        }
        Ok(StakeParams {
            min_lock_duration,
            max_lock_duration,
            max_lock_multiplier,
            max_boost_factor,
            escrow_per_liquidity_for_max_boost,
        })
    }

    pub fn min_lock_duration(&self) -> u64 {
        self.min_lock_duration
    }

    pub fn max_lock_duration(&self) -> u64 {
        self.max_lock_duration
    }

    pub fn max_lock_multiplier(&self) -> Multiplier {
        self.max_lock_multiplier
    }

    pub fn max_boost_factor(&self) -> Multiplier {
        self.max_boost_factor
    }

    /// Escrow units required per unit of locked liquidity for the full boost (scaled by
    /// [`PRECISION`]).
    pub fn escrow_per_liquidity_for_max_boost(&self) -> u128 {
        self.escrow_per_liquidity_for_max_boost
    }
}

/// Reward period parameters of a farm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardParams {
    period_duration: u64,
}

impl RewardParams {
    pub fn new(period_duration: u64) -> Result<RewardParams> {
        if period_duration == 0 {
            return Err(LedgerError::InvalidInput(
                "period_duration must be > 0".into(),
            ));
        }
        Ok(RewardParams { period_duration })
    }

    pub fn period_duration(&self) -> u64 {
        self.period_duration
    }
}

/// Converts a whole-plus-fraction decimal such as `4.0` into [`PRECISION`] units.
pub(crate) fn scaled_ratio(whole: u64, frac_bps: u16) -> Result<u128> {
    if frac_bps >= 10_000 {
        return Err(LedgerError::InvalidInput(format!(
            "fractional bps out of range: {frac_bps}"
        )));
    }
    (whole as u128)
        .checked_mul(PRECISION)
        .and_then(|w| w.checked_add(frac_bps as u128 * (PRECISION / 10_000)))
        .ok_or_else(|| LedgerError::BoundedValueExceeded("ratio overflow".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escrow_params_require_nonzero_quantum_within_horizon() {
        assert!(EscrowParams::new(100, 0).is_err());
        assert!(EscrowParams::new(5, 7).is_err());
        let p = EscrowParams::new(70, 7).unwrap();
        assert_eq!((p.max_horizon(), p.quantum()), (70, 7));
    }

    #[test]
    fn stake_params_reject_inverted_durations() {
        let three = Multiplier::from_parts(3, 0).unwrap();
        let two = Multiplier::from_parts(2, 0).unwrap();
        assert!(StakeParams::new(0, 10, three, two, PRECISION).is_err());
        assert!(StakeParams::new(11, 10, three, two, PRECISION).is_err());
        assert!(StakeParams::new(1, 10, three, two, 0).is_err());
        assert!(StakeParams::new(1, 10, three, Multiplier::ONE, 0).is_ok());
    }

    #[test]
    fn scaled_ratio_matches_precision() {
        assert_eq!(scaled_ratio(4, 0).unwrap(), 4 * PRECISION);
        assert_eq!(scaled_ratio(0, 2_500).unwrap(), PRECISION / 4);
        assert!(scaled_ratio(1, 10_000).is_err());
        assert!(RewardParams::new(0).is_err());
    }
}
