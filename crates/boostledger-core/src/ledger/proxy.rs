use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{LedgerError, Result};

use super::types::AccountId;

/// Escrow delegation consent: governance marks proxies valid, a proxy opts stakers in and a
/// staker designates one proxy. A delegation is active only while all three hold.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRegistry {
    max_proxies: usize,
    valid: BTreeSet<AccountId>,
    /// proxy -> stakers it accepts.
    allowed: BTreeMap<AccountId, BTreeSet<AccountId>>,
    /// staker -> chosen proxy.
    designated: BTreeMap<AccountId, AccountId>,
}

impl ProxyRegistry {
    pub fn new(max_proxies: usize) -> ProxyRegistry {
        ProxyRegistry {
            max_proxies,
            ..ProxyRegistry::default()
        }
    }

    pub fn is_valid(&self, proxy: AccountId) -> bool {
        self.valid.contains(&proxy)
    }

    pub fn allows(&self, proxy: AccountId, staker: AccountId) -> bool {
        self.allowed
            .get(&proxy)
            .is_some_and(|stakers| stakers.contains(&staker))
    }

    pub fn designated_proxy(&self, staker: AccountId) -> Option<AccountId> {
        self.designated.get(&staker).copied()
    }

    /// The proxy whose escrow balance boosts `staker`, if the delegation is active.
    pub fn active_proxy(&self, staker: AccountId) -> Option<AccountId> {
        self.designated_proxy(staker)
            .filter(|proxy| self.is_valid(*proxy) && self.allows(*proxy, staker))
    }

    /// Stakers currently boosted by `proxy`.
    pub fn delegators(&self, proxy: AccountId) -> impl Iterator<Item = AccountId> + '_ {
        self.designated
            .iter()
            .filter(move |(staker, p)| **p == proxy && self.active_proxy(**staker) == Some(proxy))
            .map(|(staker, _)| *staker)
    }

    /// Invalidating a proxy keeps its opt-ins and designations; they resume if it is
    /// validated again.
    pub(crate) fn toggle_valid(&mut self, proxy: AccountId) -> Result<bool> {
        if self.valid.remove(&proxy) {
            info!(proxy = %proxy, valid = false, "escrow proxy toggled");
            return Ok(false);
        }
        if self.valid.len() >= self.max_proxies {
            return Err(LedgerError::BoundedValueExceeded(format!(
                "already {} valid escrow proxies",
                self.valid.len()
            )));
        }
        self.valid.insert(proxy);
        info!(proxy = %proxy, valid = true, "escrow proxy toggled");
        Ok(true)
    }

    /// Flips whether `proxy` accepts `staker`. Revoking also clears the staker's designation
    /// when it points at this proxy.
    pub(crate) fn toggle_staker(&mut self, proxy: AccountId, staker: AccountId) -> Result<bool> {
        if !self.is_valid(proxy) {
            return Err(LedgerError::InvalidProxy);
        }
        let stakers = self.allowed.entry(proxy).or_default();
        let allowed = if stakers.remove(&staker) {
            if stakers.is_empty() {
                self.allowed.remove(&proxy);
            }
            if self.designated.get(&staker) == Some(&proxy) {
                self.designated.remove(&staker);
            }
            false
        } else {
            stakers.insert(staker);
            true
        };
        info!(proxy = %proxy, staker = %staker, allowed, "proxy staker toggled");
        Ok(allowed)
    }

    /// Replaces any previous designation.
    pub(crate) fn set_proxy(&mut self, staker: AccountId, proxy: AccountId) -> Result<()> {
        if !self.is_valid(proxy) {
            return Err(LedgerError::InvalidProxy);
        }
        if !self.allows(proxy, staker) {
            return Err(LedgerError::ProxyNotAllowed);
        }
        self.designated.insert(staker, proxy);
        info!(staker = %staker, proxy = %proxy, "staker designated escrow proxy");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (AccountId, AccountId) {
        (AccountId::from_label("whale"), AccountId::from_label("staker"))
    }

    #[test]
    fn delegation_needs_governance_proxy_and_staker_consent() {
        let (p, s) = ids();
        let mut r = ProxyRegistry::new(4);
        assert_eq!(r.toggle_staker(p, s), Err(LedgerError::InvalidProxy));
        assert_eq!(r.set_proxy(s, p), Err(LedgerError::InvalidProxy));

        assert!(r.toggle_valid(p).unwrap());
        assert_eq!(r.set_proxy(s, p), Err(LedgerError::ProxyNotAllowed));
        assert!(r.toggle_staker(p, s).unwrap());
        assert_eq!(r.active_proxy(s), None);
        r.set_proxy(s, p).unwrap();
        assert_eq!(r.active_proxy(s), Some(p));
        assert_eq!(r.delegators(p).collect::<Vec<_>>(), vec![s]);

        // Invalidation suspends the delegation without forgetting it.
        assert!(!r.toggle_valid(p).unwrap());
        assert_eq!(r.active_proxy(s), None);
        assert_eq!(r.designated_proxy(s), Some(p));
        assert!(r.toggle_valid(p).unwrap());
        assert_eq!(r.active_proxy(s), Some(p));
    }

    #[test]
    fn proxy_revoking_a_staker_clears_its_designation() {
        let (p, s) = ids();
        let other = AccountId::from_label("other-whale");
        let mut r = ProxyRegistry::new(4);
        r.toggle_valid(p).unwrap();
        r.toggle_valid(other).unwrap();
        r.toggle_staker(p, s).unwrap();
        r.toggle_staker(other, s).unwrap();
        r.set_proxy(s, p).unwrap();

        // Revoking from a proxy the staker does not use leaves the designation alone.
        assert!(!r.toggle_staker(other, s).unwrap());
        assert_eq!(r.designated_proxy(s), Some(p));
        assert!(!r.toggle_staker(p, s).unwrap());
        assert_eq!(r.designated_proxy(s), None);
        assert_eq!(r.delegators(p).count(), 0);
        assert_eq!(r.set_proxy(s, p), Err(LedgerError::ProxyNotAllowed));
    }

    #[test]
    fn valid_proxy_set_is_bounded() {
        let mut r = ProxyRegistry::new(1);
        r.toggle_valid(AccountId::from_label("a")).unwrap();
        assert!(matches!(
            r.toggle_valid(AccountId::from_label("b")),
            Err(LedgerError::BoundedValueExceeded(_))
        ));
        assert!(!r.toggle_valid(AccountId::from_label("a")).unwrap());
        assert!(r.toggle_valid(AccountId::from_label("b")).unwrap());
    }
}
