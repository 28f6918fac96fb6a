//! Trace replay.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use boostledger_core::ledger::{
    first_invariant_counterexample_v1, ActionOutcome, AllowAllGate, Ledger, LedgerAction,
};
use boostledger_core::metrics::LedgerMetrics;
use boostledger_core::LedgerConfig;

#[derive(Serialize)]
struct StepReport {
    step: usize,
    now: u64,
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<ActionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(
    config: &LedgerConfig,
    trace: PathBuf,
    format: String,
    state_out: Option<PathBuf>,
    check_invariants: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(&trace)
        .with_context(|| format!("Failed to read trace {}", trace.display()))?;
    let actions: Vec<LedgerAction> =
        serde_json::from_str(&raw).context("Failed to parse trace (expected a JSON array)")?;

    let mut ledger = Ledger::new(config).context("Failed to build ledger")?;
    let metrics = LedgerMetrics::new();
    let mut reports = Vec::with_capacity(actions.len());

    info!(actions = actions.len(), trace = %trace.display(), "replaying trace");
    for (step, action) in actions.iter().cloned().enumerate() {
        let name = action.name();
        let result = ledger.apply_observed(&AllowAllGate, action, &metrics);
        let (outcome, error) = match result {
            Ok(o) => (Some(o), None),
            Err(e) => (None, Some(e.to_string())),
        };
        reports.push(StepReport {
            step,
            now: ledger.now(),
            action: name,
            outcome,
            error,
        });
    }

    let state_hash = ledger.state_hash_v1().context("Failed to hash ledger state")?;
    let violation = if check_invariants {
        first_invariant_counterexample_v1(config, &actions)
            .context("Failed to run invariant check")?
    } else {
        None
    };

    match format.as_str() {
        "json" => {
            let out = serde_json::json!({
                "steps": reports,
                "state_hash": state_hash.to_hex(),
                "metrics": metrics.to_json(),
                "invariant_violation": violation.as_ref().map(|ce| ce.short()),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        _ => {
            for r in &reports {
                match (&r.outcome, &r.error) {
                    (Some(o), _) => println!("{:03} @{} {:<28} ok  {:?}", r.step, r.now, r.action, o),
                    (_, Some(e)) => println!("{:03} @{} {:<28} ERR {}", r.step, r.now, r.action, e),
                    _ => {}
                }
            }
            println!();
            println!("Applied:    {}", metrics.actions_applied.get());
            println!("Rejected:   {}", metrics.actions_rejected.get());
            println!("State hash: {}", state_hash.to_hex());
            if check_invariants {
                match &violation {
                    Some(ce) => println!("Invariants: VIOLATED ({})", ce.short()),
                    None => println!("Invariants: ok"),
                }
            }
        }
    }

    if let Some(path) = state_out {
        let json =
            serde_json::to_string_pretty(&ledger).context("Failed to serialize ledger state")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write state to {}", path.display()))?;
        info!(path = %path.display(), "wrote ledger state");
    }

    if violation.is_some() {
        anyhow::bail!("invariant violation");
    }
    Ok(())
}
