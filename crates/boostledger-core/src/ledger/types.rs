use crate::{hash, Hash32, LedgerError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Fixed-point scale for multipliers, boost factors and the reward accumulator.
pub const PRECISION: u128 = 1_000_000_000_000_000_000;

pub const SECONDS_PER_DAY: u64 = 86_400;
pub const SECONDS_PER_WEEK: u64 = 7 * SECONDS_PER_DAY;
pub const SECONDS_PER_YEAR: u64 = 365 * SECONDS_PER_DAY;

/// Fixed-point multiplier `>= 1.0` (scaled by [`PRECISION`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Multiplier(u128);

impl Multiplier {
    pub const ONE: Multiplier = Multiplier(PRECISION);

    /// Constructs a multiplier; values below 1.0 are rejected (fail-closed).
    pub fn new(scaled: u128) -> Result<Multiplier> {
        if scaled < PRECISION {
            return Err(LedgerError::InvalidInput(format!(
                "multiplier below 1.0: {scaled}"
            )));
        }
        Ok(Multiplier(scaled))
    }

    /// `whole + frac_bps / 10_000`, e.g. `from_parts(2, 5_000)` is 2.5x.
    pub fn from_parts(whole: u64, frac_bps: u16) -> Result<Multiplier> {
        if frac_bps >= 10_000 {
            return Err(LedgerError::InvalidInput(format!(
                "fractional bps out of range: {frac_bps}"
            )));
        }
        let whole_scaled = (whole as u128)
            .checked_mul(PRECISION)
            .ok_or_else(|| LedgerError::BoundedValueExceeded("multiplier overflow".into()))?;
        let frac_scaled = (frac_bps as u128) * (PRECISION / 10_000);
        Multiplier::new(whole_scaled + frac_scaled)
    }

    pub fn get(self) -> u128 {
        self.0
    }

    /// The part above 1.0.
    pub fn excess(self) -> u128 {
        self.0 - PRECISION
    }
}

impl std::fmt::Display for Multiplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let whole = self.0 / PRECISION;
        let frac = (self.0 % PRECISION) / (PRECISION / 1_000_000);
        write!(f, "{whole}.{frac:06}x")
    }
}

macro_rules! hex_id {
    ($name:ident) => {
        impl $name {
            pub fn to_hex(&self) -> String {
                self.0.to_hex()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0.to_hex()[..16])
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.serialize_str(&self.0.to_hex())
            }
        }
    };
}

/// Ledger participant (staker, migrator or governance).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(pub Hash32);

hex_id!(AccountId);

impl AccountId {
    /// Derives an account id from a human-readable label (traces, CLI, tests).
    pub fn from_label(label: &str) -> AccountId {
        AccountId(hash::sha256_domain(
            hash::ACCOUNT_LABEL_DOMAIN_V1,
            label.as_bytes(),
        ))
    }

    /// Parses 64 hex characters as a raw id; any other string is treated as a label.
    pub fn parse(s: &str) -> AccountId {
        if s.len() == 64 {
            if let Ok(h) = Hash32::from_hex(s) {
                return AccountId(h);
            }
        }
        AccountId::from_label(s)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Ok(AccountId::parse(&s))
    }
}

/// Identifier of a locked stake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StakeId(pub Hash32);

hex_id!(StakeId);

impl StakeId {
    pub const DOMAIN_V1: &'static [u8] = b"BOOSTLEDGER_STAKE_ID_V1";

    /// Deterministically derives a stake identifier.
    ///
    /// Uniqueness comes from the per-ledger `nonce`; the other fields bind the id to the
    /// position it was created for.
    pub fn derive(owner: AccountId, lock_start: u64, liquidity: u128, nonce: u64) -> StakeId {
        let mut bytes = Vec::with_capacity(Self::DOMAIN_V1.len() + 32 + 8 + 16 + 8);
        bytes.extend_from_slice(Self::DOMAIN_V1);
        bytes.extend_from_slice(&owner.0 .0);
        bytes.extend_from_slice(&lock_start.to_le_bytes());
        bytes.extend_from_slice(&liquidity.to_le_bytes());
        bytes.extend_from_slice(&nonce.to_le_bytes());
        StakeId(hash::sha256(&bytes))
    }
}

impl<'de> Deserialize<'de> for StakeId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Hash32::from_hex(&s)
            .map(StakeId)
            .map_err(serde::de::Error::custom)
    }
}

/// Identifier of an escrow position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EscrowId(pub Hash32);

hex_id!(EscrowId);

impl EscrowId {
    pub const DOMAIN_V1: &'static [u8] = b"BOOSTLEDGER_ESCROW_ID_V1";

    pub fn derive(owner: AccountId, created_at: u64) -> EscrowId {
        let mut bytes = Vec::with_capacity(Self::DOMAIN_V1.len() + 32 + 8);
        bytes.extend_from_slice(Self::DOMAIN_V1);
        bytes.extend_from_slice(&owner.0 .0);
        bytes.extend_from_slice(&created_at.to_le_bytes());
        EscrowId(hash::sha256(&bytes))
    }
}

impl<'de> Deserialize<'de> for EscrowId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Hash32::from_hex(&s)
            .map(EscrowId)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowLockOutcome {
    pub escrow_id: EscrowId,
    pub unlock_time: u64,
    /// Escrow balance right after the operation.
    pub balance: u128,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeOutcome {
    pub stake_id: StakeId,
    pub lock_multiplier: Multiplier,
    pub lock_end: u64,
    /// The owner's combined weight after the stake was recorded.
    pub combined_weight: u128,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawOutcome {
    pub owner: AccountId,
    pub stake_id: Option<StakeId>,
    pub amount: u128,
    /// Account the liquidity is released to (the owner, or the migrator during migration).
    pub recipient: AccountId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPayout {
    pub account: AccountId,
    /// Amount paid per stream, indexed like the farm's reward streams.
    pub amounts: Vec<u128>,
}

impl RewardPayout {
    pub fn total(&self) -> u128 {
        self.amounts.iter().fold(0u128, |acc, a| acc.saturating_add(*a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_rejects_values_below_one() {
        assert!(Multiplier::new(PRECISION - 1).is_err());
        assert_eq!(Multiplier::new(PRECISION).unwrap(), Multiplier::ONE);
        assert_eq!(
            Multiplier::from_parts(2, 5_000).unwrap().get(),
            2 * PRECISION + PRECISION / 2
        );
        assert!(Multiplier::from_parts(0, 9_999).is_err());
        assert!(Multiplier::from_parts(1, 10_000).is_err());
        assert_eq!(Multiplier::from_parts(3, 0).unwrap().to_string(), "3.000000x");
    }

    #[test]
    fn account_parse_accepts_hex_and_labels() {
        let alice = AccountId::from_label("alice");
        assert_eq!(AccountId::parse(&alice.to_hex()), alice);
        assert_eq!(AccountId::parse("alice"), alice);
        assert_ne!(AccountId::parse("bob"), alice);
    }

    #[test]
    fn ids_serialize_as_hex_strings() {
        let alice = AccountId::from_label("alice");
        let json = serde_json::to_string(&alice).unwrap();
        assert_eq!(json, format!("\"{}\"", alice.to_hex()));
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alice);

        let sid = StakeId::derive(alice, 10, 5, 0);
        let back: StakeId = serde_json::from_str(&serde_json::to_string(&sid).unwrap()).unwrap();
        assert_eq!(back, sid);
        assert!(serde_json::from_str::<StakeId>("\"not-hex\"").is_err());
    }

    #[test]
    fn stake_ids_depend_on_nonce() {
        let a = AccountId::from_label("alice");
        assert_ne!(StakeId::derive(a, 1, 1, 0), StakeId::derive(a, 1, 1, 1));
        assert_eq!(StakeId::derive(a, 1, 1, 7), StakeId::derive(a, 1, 1, 7));
    }
}
