//! boostledger CLI
//!
//! Replay action traces against the ledger, fuzz its invariants, and evaluate the weight
//! formulas under a given configuration.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

/// boostledger: vote-escrow boosted staking ledger
///
/// Locked stakes earn reward-stream emissions in proportion to their combined weight:
/// liquidity × lock multiplier × escrow boost.
#[derive(Parser)]
#[command(name = "boostledger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (JSON)
    #[arg(short, long, global = true, env = "BOOSTLEDGER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply an action trace to a fresh ledger
    Replay {
        /// Trace file (JSON array of actions)
        #[arg(short, long)]
        trace: PathBuf,

        /// Output format (json, human)
        #[arg(short, long, default_value = "human")]
        format: String,

        /// Write the final ledger state (JSON) to this file
        #[arg(long)]
        state_out: Option<PathBuf>,

        /// Run the invariant rail over the trace as well
        #[arg(long)]
        check_invariants: bool,
    },

    /// Fuzz ledger invariants with random traces
    FuzzInvariants {
        #[arg(long, default_value_t = 1)]
        seed: u64,

        #[arg(long, default_value_t = 200)]
        steps: u32,

        #[arg(long, default_value_t = 50)]
        iters: u32,

        /// Number of distinct staker accounts
        #[arg(long, default_value_t = 4)]
        accounts: u32,
    },

    /// Lock multiplier for a lock duration (first farm's parameters)
    Multiplier {
        /// Lock duration in seconds
        #[arg(short, long)]
        duration: u64,
    },

    /// Boost factor and combined weight for an escrow balance and locked liquidity
    Boost {
        /// Escrow balance
        #[arg(short, long)]
        escrow: u128,

        /// Locked liquidity (unscaled)
        #[arg(short, long)]
        liquidity: u128,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize logging
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Replay {
            trace,
            format,
            state_out,
            check_invariants,
        } => commands::replay::run(&config, trace, format, state_out, check_invariants),
        Commands::FuzzInvariants {
            seed,
            steps,
            iters,
            accounts,
        } => commands::fuzz::run(&config, seed, steps, iters, accounts),
        Commands::Multiplier { duration } => commands::inspect::multiplier(&config, duration),
        Commands::Boost { escrow, liquidity } => {
            commands::inspect::boost(&config, escrow, liquidity)
        }
        Commands::Config => commands::inspect::print_config(&config),
    }
}
