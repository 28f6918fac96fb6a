use crate::{LedgerError, Result};

use super::actions::LedgerAction;
use super::engine::Ledger;
use super::types::AccountId;

/// Authorization hook consulted by [`Ledger::apply`] before any state transition.
///
/// Gates stay IO-free: adapters may gather evidence externally and then implement a pure
/// `check()` over it. Role checks that belong to the ledger itself (governance, ownership,
/// migrator consent) are enforced inside the operations regardless of the gate.
pub trait LedgerGate {
    fn check(&self, ledger: &Ledger, action: &LedgerAction) -> Result<()>;
}

/// Gate that allows all actions (useful for simulation/tests).
pub struct AllowAllGate;

impl LedgerGate for AllowAllGate {
    fn check(&self, _ledger: &Ledger, _action: &LedgerAction) -> Result<()> {
        Ok(())
    }
}

/// Gate that denies all actions (useful for tests).
pub struct DenyAllGate;

impl LedgerGate for DenyAllGate {
    fn check(&self, _ledger: &Ledger, _action: &LedgerAction) -> Result<()> {
        Err(LedgerError::InvalidInput("gate denied ledger action".into()))
    }
}

/// Capability check: `caller` must be the governance account.
pub fn require_governance(governance: AccountId, caller: AccountId) -> Result<()> {
    if caller != governance {
        return Err(LedgerError::Unauthorized);
    }
    Ok(())
}

/// Capability check: `caller` must own the position.
pub fn require_owner(owner: AccountId, caller: AccountId) -> Result<()> {
    if caller != owner {
        return Err(LedgerError::Unauthorized);
    }
    Ok(())
}
