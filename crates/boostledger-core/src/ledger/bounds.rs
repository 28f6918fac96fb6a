use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Runtime bounds for the in-memory ledger.
///
/// These are **safety bounds**, not economic parameters: they cap state growth per account
/// and per farm so every operation stays bounded in memory and CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeBounds {
    pub max_stakes_per_account: usize,
    pub max_reward_streams: usize,
    pub max_farms: usize,
    pub max_migrators: usize,
    pub max_proxies: usize,
}

impl RuntimeBounds {
    pub const HARD_MAX_STAKES_PER_ACCOUNT: usize = 1024;
    pub const HARD_MAX_REWARD_STREAMS: usize = 64;
    pub const HARD_MAX_FARMS: usize = 256;
    pub const HARD_MAX_MIGRATORS: usize = 1024;
    pub const HARD_MAX_PROXIES: usize = 1024;

    pub const DEFAULT_MAX_STAKES_PER_ACCOUNT: usize = 64;
    pub const DEFAULT_MAX_REWARD_STREAMS: usize = 8;
    pub const DEFAULT_MAX_FARMS: usize = 16;
    pub const DEFAULT_MAX_MIGRATORS: usize = 32;
    pub const DEFAULT_MAX_PROXIES: usize = 32;

    pub fn new(
        max_stakes_per_account: usize,
        max_reward_streams: usize,
        max_farms: usize,
        max_migrators: usize,
        max_proxies: usize,
    ) -> Result<Self> {
        let b = RuntimeBounds {
            max_stakes_per_account,
            max_reward_streams,
            max_farms,
            max_migrators,
            max_proxies,
        };
        b.validate()?;
        Ok(b)
    }

    pub fn validate(self) -> Result<()> {
        check_bound(
            "max_stakes_per_account",
            self.max_stakes_per_account,
            Self::HARD_MAX_STAKES_PER_ACCOUNT,
        )?;
        check_bound(
            "max_reward_streams",
            self.max_reward_streams,
            Self::HARD_MAX_REWARD_STREAMS,
        )?;
        check_bound("max_farms", self.max_farms, Self::HARD_MAX_FARMS)?;
        check_bound("max_migrators", self.max_migrators, Self::HARD_MAX_MIGRATORS)?;
        check_bound("max_proxies", self.max_proxies, Self::HARD_MAX_PROXIES)?;
        Ok(())
    }
}

fn check_bound(name: &str, value: usize, hard_max: usize) -> Result<()> {
    if value == 0 || value > hard_max {
        return Err(LedgerError::InvalidInput(format!(
            "{name} out of bounds: {value}"
        )));
    }
    Ok(())
}

impl Default for RuntimeBounds {
    fn default() -> Self {
        Self {
            max_stakes_per_account: Self::DEFAULT_MAX_STAKES_PER_ACCOUNT,
            max_reward_streams: Self::DEFAULT_MAX_REWARD_STREAMS,
            max_farms: Self::DEFAULT_MAX_FARMS,
            max_migrators: Self::DEFAULT_MAX_MIGRATORS,
            max_proxies: Self::DEFAULT_MAX_PROXIES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RuntimeBounds::default().validate().is_ok());
    }

    #[test]
    fn zero_and_oversized_bounds_rejected() {
        assert!(RuntimeBounds::new(0, 1, 1, 1, 1).is_err());
        assert!(
            RuntimeBounds::new(1, RuntimeBounds::HARD_MAX_REWARD_STREAMS + 1, 1, 1, 1).is_err()
        );
        assert!(RuntimeBounds::new(1, 1, 1, 1, RuntimeBounds::HARD_MAX_PROXIES + 1).is_err());
        assert!(RuntimeBounds::new(1, 1, 1, 1, 1).is_ok());
    }
}
