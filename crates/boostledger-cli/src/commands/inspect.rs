//! Weight-formula inspection and config printing.

use anyhow::{bail, Context, Result};

use boostledger_core::ledger::math::{boost_factor, min_escrow_for_max_boost};
use boostledger_core::ledger::{Ledger, WeightInputs};
use boostledger_core::LedgerConfig;

pub fn multiplier(config: &LedgerConfig, duration: u64) -> Result<()> {
    let ledger = Ledger::new(config).context("Failed to build ledger")?;
    let Some(farm) = ledger.farms().first() else {
        bail!("configuration has no farms");
    };
    let m = farm
        .stakes()
        .lock_multiplier_for(duration)
        .context("Failed to compute lock multiplier")?;
    println!("duration:        {duration}s ({:.2} days)", duration as f64 / 86_400.0);
    println!("lock multiplier: {m}");
    Ok(())
}

pub fn boost(config: &LedgerConfig, escrow: u128, liquidity: u128) -> Result<()> {
    let ledger = Ledger::new(config).context("Failed to build ledger")?;
    let Some(farm) = ledger.farms().first() else {
        bail!("configuration has no farms");
    };
    let stakes = farm.stakes();
    let params = stakes.params();

    let threshold = min_escrow_for_max_boost(liquidity, params.escrow_per_liquidity_for_max_boost())
        .context("Failed to compute boost threshold")?;
    let boost = boost_factor(escrow, threshold, params.max_boost_factor())
        .context("Failed to compute boost")?;
    let weight = stakes
        .combined_weight(
            WeightInputs {
                base_weight: liquidity,
                locked_liquidity: liquidity,
            },
            escrow,
        )
        .context("Failed to compute combined weight")?;

    println!("escrow balance:            {escrow}");
    println!("locked liquidity:          {liquidity}");
    println!("escrow for max boost:      {threshold}");
    println!("boost factor:              {boost} (max {})", params.max_boost_factor());
    println!("combined weight (1x lock): {weight}");
    if threshold > 0 && escrow < threshold {
        let pct = escrow.saturating_mul(100) / threshold;
        println!("saturation:                {pct}%");
    }
    Ok(())
}

pub fn print_config(config: &LedgerConfig) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(config).context("Failed to serialize config")?
    );
    Ok(())
}
