//! Configuration management for boostledger.
//!
//! Every economic constant of the ledger is configuration: escrow horizon and quantum,
//! lock durations, multiplier and boost caps, reward periods and the initial reward
//! streams of each farm.
//!
//! # Configuration Sources
//!
//! Configuration can be loaded from:
//! - Environment variables (prefixed with `BOOSTLEDGER_`)
//! - JSON documents (missing fields take their defaults)
//! - Programmatic defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use boostledger_core::config::LedgerConfig;
//!
//! let config = LedgerConfig::builder()
//!     .genesis_time(1_704_326_400)
//!     .with_reward_stream(0, "FXS", 10, 10_000_000)
//!     .build()?;
//! ```

use crate::ledger::params::scaled_ratio;
use crate::ledger::{
    AccountId, EscrowParams, Multiplier, RewardParams, RuntimeBounds, StakeParams,
    SECONDS_PER_DAY, SECONDS_PER_WEEK, SECONDS_PER_YEAR,
};
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Complete ledger configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Initial ledger clock (seconds).
    pub genesis_time: u64,

    /// Escrow decay configuration.
    pub escrow: EscrowConfig,

    /// One entry per farm instance, in farm index order.
    pub farms: Vec<FarmConfig>,

    /// Runtime safety bounds.
    pub bounds: BoundsConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            // 2024-01-04T00:00:00Z, a week boundary.
            genesis_time: 1_704_326_400,
            escrow: EscrowConfig::default(),
            farms: vec![FarmConfig::default()],
            bounds: BoundsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> LedgerConfigBuilder {
        LedgerConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Looks for variables prefixed with `BOOSTLEDGER_`:
    /// - `BOOSTLEDGER_GENESIS_TIME` - Initial ledger clock in seconds
    /// - `BOOSTLEDGER_MAX_HORIZON_SECS` - Maximum escrow lock horizon
    /// - `BOOSTLEDGER_PERIOD_DURATION_SECS` - Reward period of every farm
    /// - `BOOSTLEDGER_LOG_LEVEL` - Logging level (trace, debug, info, warn, error)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: LedgerConfig = serde_json::from_str(json)
            .map_err(|e| LedgerError::ConfigError(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(t) = var("BOOSTLEDGER_GENESIS_TIME") {
            self.genesis_time = parse_env("BOOSTLEDGER_GENESIS_TIME", &t)?;
        }

        if let Some(h) = var("BOOSTLEDGER_MAX_HORIZON_SECS") {
            self.escrow.max_horizon_secs = parse_env("BOOSTLEDGER_MAX_HORIZON_SECS", &h)?;
        }

        if let Some(p) = var("BOOSTLEDGER_PERIOD_DURATION_SECS") {
            let period = parse_env("BOOSTLEDGER_PERIOD_DURATION_SECS", &p)?;
            for farm in &mut self.farms {
                farm.period_duration_secs = period;
            }
        }

        if let Some(level) = var("BOOSTLEDGER_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        self.escrow.escrow_params().map_err(as_config_error)?;
        let bounds = self.bounds.runtime_bounds().map_err(as_config_error)?;

        if self.farms.len() > bounds.max_farms {
            return Err(LedgerError::ConfigError(format!(
                "{} farms exceed max_farms {}",
                self.farms.len(),
                bounds.max_farms
            )));
        }

        for (i, farm) in self.farms.iter().enumerate() {
            farm.stake_params()
                .map_err(|e| LedgerError::ConfigError(format!("farm {i}: {e}")))?;
            farm.reward_params()
                .map_err(|e| LedgerError::ConfigError(format!("farm {i}: {e}")))?;

            if farm.streams.len() > bounds.max_reward_streams {
                return Err(LedgerError::ConfigError(format!(
                    "farm {i}: {} streams exceed max_reward_streams {}",
                    farm.streams.len(),
                    bounds.max_reward_streams
                )));
            }
            for (j, s) in farm.streams.iter().enumerate() {
                let per_period = s
                    .rate_per_second
                    .checked_mul(farm.period_duration_secs as u128)
                    .ok_or_else(|| {
                        LedgerError::ConfigError(format!("farm {i} stream {j}: rate overflow"))
                    })?;
                if per_period > s.funding {
                    return Err(LedgerError::ConfigError(format!(
                        "farm {i} stream {j} ({}): rate × period {per_period} exceeds funding {}",
                        s.token, s.funding
                    )));
                }
            }
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LedgerError::ConfigError(format!(
                    "unknown log level: {other}"
                )))
            }
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| LedgerError::ConfigError(format!("Invalid {name}: {e}")))
}

fn as_config_error(e: LedgerError) -> LedgerError {
    match e {
        LedgerError::ConfigError(_) => e,
        other => LedgerError::ConfigError(other.to_string()),
    }
}

fn multiplier_from_bps(bps: u64) -> Result<Multiplier> {
    Multiplier::from_parts(bps / 10_000, (bps % 10_000) as u16)
}

/// Escrow decay configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Governance account (64-char hex id or a label).
    pub governance: String,

    /// Longest permitted lock, measured from the time of the call.
    pub max_horizon_secs: u64,

    /// Unlock times are rounded down to a multiple of this.
    pub quantum_secs: u64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            governance: "governance".into(),
            max_horizon_secs: 4 * SECONDS_PER_YEAR,
            quantum_secs: SECONDS_PER_WEEK,
        }
    }
}

impl EscrowConfig {
    pub fn escrow_params(&self) -> Result<EscrowParams> {
        EscrowParams::new(self.max_horizon_secs, self.quantum_secs)
    }

    pub fn governance_id(&self) -> AccountId {
        AccountId::parse(&self.governance)
    }
}

/// Configuration of one farm instance.
///
/// Ratios are given in basis points: `30_000` is a 3.0x multiplier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    pub governance: String,
    pub min_lock_secs: u64,
    pub max_lock_secs: u64,
    pub max_lock_multiplier_bps: u64,
    pub max_boost_factor_bps: u64,
    pub escrow_per_liquidity_for_max_boost_bps: u64,
    pub period_duration_secs: u64,
    /// Streams registered at genesis.
    pub streams: Vec<StreamConfig>,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            governance: "governance".into(),
            min_lock_secs: SECONDS_PER_DAY,
            max_lock_secs: 3 * SECONDS_PER_YEAR,
            max_lock_multiplier_bps: 30_000,
            max_boost_factor_bps: 20_000,
            escrow_per_liquidity_for_max_boost_bps: 40_000,
            period_duration_secs: SECONDS_PER_WEEK,
            streams: Vec::new(),
        }
    }
}

impl FarmConfig {
    pub fn governance_id(&self) -> AccountId {
        AccountId::parse(&self.governance)
    }

    pub fn stake_params(&self) -> Result<StakeParams> {
        let ratio = self.escrow_per_liquidity_for_max_boost_bps;
        StakeParams::new(
            self.min_lock_secs,
            self.max_lock_secs,
            multiplier_from_bps(self.max_lock_multiplier_bps)?,
            multiplier_from_bps(self.max_boost_factor_bps)?,
            scaled_ratio(ratio / 10_000, (ratio % 10_000) as u16)?,
        )
    }

    pub fn reward_params(&self) -> Result<RewardParams> {
        RewardParams::new(self.period_duration_secs)
    }
}

/// A reward stream registered when the ledger is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub token: String,
    pub rate_per_second: u128,
    /// Reward tokens deposited up front; must cover one full period at `rate_per_second`.
    pub funding: u128,
}

/// Runtime safety bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    pub max_stakes_per_account: usize,
    pub max_reward_streams: usize,
    pub max_farms: usize,
    pub max_migrators: usize,
    pub max_proxies: usize,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        let b = RuntimeBounds::default();
        Self {
            max_stakes_per_account: b.max_stakes_per_account,
            max_reward_streams: b.max_reward_streams,
            max_farms: b.max_farms,
            max_migrators: b.max_migrators,
            max_proxies: b.max_proxies,
        }
    }
}

impl BoundsConfig {
    pub fn runtime_bounds(&self) -> Result<RuntimeBounds> {
        RuntimeBounds::new(
            self.max_stakes_per_account,
            self.max_reward_streams,
            self.max_farms,
            self.max_migrators,
            self.max_proxies,
        )
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// JSON output format.
    pub json_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json_output: false,
        }
    }
}

/// Builder for LedgerConfig.
#[derive(Default)]
pub struct LedgerConfigBuilder {
    config: LedgerConfig,
    unknown_farm: Option<usize>,
}

impl LedgerConfigBuilder {
    /// Set the initial ledger clock.
    pub fn genesis_time(mut self, t: u64) -> Self {
        self.config.genesis_time = t;
        self
    }

    /// Set the escrow horizon and quantum.
    pub fn escrow_horizon(mut self, max_horizon_secs: u64, quantum_secs: u64) -> Self {
        self.config.escrow.max_horizon_secs = max_horizon_secs;
        self.config.escrow.quantum_secs = quantum_secs;
        self
    }

    /// Set the governance account of the escrow and of every farm.
    pub fn governance(mut self, governance: impl Into<String>) -> Self {
        let g = governance.into();
        self.config.escrow.governance = g.clone();
        for farm in &mut self.config.farms {
            farm.governance = g.clone();
        }
        self
    }

    /// Replace the farm list.
    pub fn farms(mut self, farms: Vec<FarmConfig>) -> Self {
        self.config.farms = farms;
        self
    }

    /// Append a farm; its index is the number of farms configured before it.
    pub fn with_farm(mut self, farm: FarmConfig) -> Self {
        self.config.farms.push(farm);
        self
    }

    /// Register a reward stream on farm `farm` at genesis.
    ///
    /// An out-of-range farm index is reported by `build`.
    pub fn with_reward_stream(
        mut self,
        farm: usize,
        token: impl Into<String>,
        rate_per_second: u128,
        funding: u128,
    ) -> Self {
        let stream = StreamConfig {
            token: token.into(),
            rate_per_second,
            funding,
        };
        match self.config.farms.get_mut(farm) {
            Some(f) => f.streams.push(stream),
            None => self.unknown_farm = Some(farm),
        }
        self
    }

    /// Set runtime bounds.
    pub fn bounds(mut self, bounds: BoundsConfig) -> Self {
        self.config.bounds = bounds;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<LedgerConfig> {
        if let Some(farm) = self.unknown_farm {
            return Err(LedgerError::ConfigError(format!(
                "reward stream registered on unknown farm {farm}"
            )));
        }
        self.config.validate()?;
        Ok(self.config)
    }
}
