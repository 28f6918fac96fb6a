use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{LedgerError, Result};

use super::types::AccountId;

/// Dual-consent migration state: a governance whitelist and per-staker approvals, gated by a
/// global migration mode.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationController {
    active: bool,
    max_migrators: usize,
    whitelist: BTreeSet<AccountId>,
    approvals: BTreeMap<AccountId, AccountId>,
}

impl MigrationController {
    pub fn new(max_migrators: usize) -> MigrationController {
        MigrationController {
            max_migrators,
            ..MigrationController::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_whitelisted(&self, migrator: AccountId) -> bool {
        self.whitelist.contains(&migrator)
    }

    pub fn approved_migrator(&self, staker: AccountId) -> Option<AccountId> {
        self.approvals.get(&staker).copied()
    }

    pub fn migrators(&self) -> impl Iterator<Item = &AccountId> {
        self.whitelist.iter()
    }

    /// `migrator` may act for `staker` only while migration mode is on, the migrator is
    /// whitelisted and the staker approved that migrator. Checked in that order.
    pub fn authorize(&self, migrator: AccountId, staker: AccountId) -> Result<()> {
        if !self.active {
            return Err(LedgerError::MigrationNotActive);
        }
        if !self.is_whitelisted(migrator) {
            return Err(LedgerError::MigratorNotWhitelisted);
        }
        if self.approved_migrator(staker) != Some(migrator) {
            return Err(LedgerError::MigratorNotApprovedByStaker);
        }
        Ok(())
    }

    /// End-user staking entry points are suspended while migrating.
    pub fn ensure_not_migrating(&self) -> Result<()> {
        if self.active {
            return Err(LedgerError::MigrationActive);
        }
        Ok(())
    }

    pub fn ensure_migrating(&self) -> Result<()> {
        if !self.active {
            return Err(LedgerError::MigrationNotActive);
        }
        Ok(())
    }

    pub(crate) fn add_migrator(&mut self, migrator: AccountId) -> Result<()> {
        if !self.whitelist.contains(&migrator) && self.whitelist.len() >= self.max_migrators {
            return Err(LedgerError::BoundedValueExceeded(format!(
                "whitelist already holds {} migrators",
                self.whitelist.len()
            )));
        }
        self.whitelist.insert(migrator);
        info!(migrator = %migrator, "migrator whitelisted");
        Ok(())
    }

    /// Removing a migrator leaves staker approvals in place; they stop authorizing anything
    /// until the migrator is whitelisted again.
    pub(crate) fn remove_migrator(&mut self, migrator: AccountId) {
        self.whitelist.remove(&migrator);
        info!(migrator = %migrator, "migrator removed from whitelist");
    }

    pub(crate) fn staker_allow_migrator(
        &mut self,
        staker: AccountId,
        migrator: AccountId,
    ) -> Result<()> {
        if !self.is_whitelisted(migrator) {
            return Err(LedgerError::MigratorNotWhitelisted);
        }
        self.approvals.insert(staker, migrator);
        info!(staker = %staker, migrator = %migrator, "staker approved migrator");
        Ok(())
    }

    pub(crate) fn staker_disallow_migrator(&mut self, staker: AccountId) {
        self.approvals.remove(&staker);
        info!(staker = %staker, "staker revoked migrator approval");
    }

    pub(crate) fn toggle(&mut self) -> bool {
        self.active = !self.active;
        warn!(active = self.active, "migration mode toggled");
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (AccountId, AccountId) {
        (AccountId::from_label("migrator"), AccountId::from_label("staker"))
    }

    #[test]
    fn authorize_requires_all_three_conditions_in_order() {
        let (m, s) = ids();
        let mut c = MigrationController::new(4);
        assert_eq!(c.authorize(m, s), Err(LedgerError::MigrationNotActive));
        c.toggle();
        assert_eq!(c.authorize(m, s), Err(LedgerError::MigratorNotWhitelisted));
        c.add_migrator(m).unwrap();
        assert_eq!(c.authorize(m, s), Err(LedgerError::MigratorNotApprovedByStaker));
        c.staker_allow_migrator(s, m).unwrap();
        assert!(c.authorize(m, s).is_ok());

        c.remove_migrator(m);
        assert_eq!(c.authorize(m, s), Err(LedgerError::MigratorNotWhitelisted));
        c.add_migrator(m).unwrap();
        c.staker_disallow_migrator(s);
        assert_eq!(c.authorize(m, s), Err(LedgerError::MigratorNotApprovedByStaker));
    }

    #[test]
    fn approval_requires_whitelisted_migrator_and_replaces_previous() {
        let (m, s) = ids();
        let other = AccountId::from_label("other");
        let mut c = MigrationController::new(4);
        assert_eq!(
            c.staker_allow_migrator(s, m),
            Err(LedgerError::MigratorNotWhitelisted)
        );
        c.add_migrator(m).unwrap();
        c.add_migrator(other).unwrap();
        c.staker_allow_migrator(s, m).unwrap();
        c.staker_allow_migrator(s, other).unwrap();
        assert_eq!(c.approved_migrator(s), Some(other));
    }

    #[test]
    fn whitelist_is_bounded() {
        let mut c = MigrationController::new(1);
        c.add_migrator(AccountId::from_label("a")).unwrap();
        c.add_migrator(AccountId::from_label("a")).unwrap();
        assert!(matches!(
            c.add_migrator(AccountId::from_label("b")),
            Err(LedgerError::BoundedValueExceeded(_))
        ));
    }

    #[test]
    fn migration_mode_guards() {
        let mut c = MigrationController::new(1);
        assert!(c.ensure_not_migrating().is_ok());
        assert_eq!(c.ensure_migrating(), Err(LedgerError::MigrationNotActive));
        assert!(c.toggle());
        assert_eq!(c.ensure_not_migrating(), Err(LedgerError::MigrationActive));
        assert!(c.ensure_migrating().is_ok());
    }
}
