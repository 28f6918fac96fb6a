use crate::{LedgerError, Result};

use super::types::{Multiplier, PRECISION};

/// `floor(a × b / denom)` with a 256-bit intermediate product.
///
/// Fails only when the quotient itself does not fit in `u128`.
pub fn mul_div_floor(a: u128, b: u128, denom: u128) -> Result<u128> {
    if denom == 0 {
        return Err(LedgerError::InvalidInput("division by zero".into()));
    }
    mul_u128_to_u256(a, b)
        .div_floor(denom)
        .ok_or_else(|| LedgerError::BoundedValueExceeded("u128 overflow in mul_div".into()))
}

/// Unsigned 256-bit value as `(hi, lo)` 128-bit halves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct U256 {
    hi: u128,
    lo: u128,
}

impl U256 {
    /// Long division by a 128-bit divisor; `None` if the quotient needs more than 128 bits.
    fn div_floor(self, denom: u128) -> Option<u128> {
        if self.hi == 0 {
            return Some(self.lo / denom);
        }
        if self.hi >= denom {
            return None;
        }
        // Invariant: rem < denom before each step.
        let mut rem = self.hi;
        let mut q = 0u128;
        for i in (0..128).rev() {
            let carry = rem >> 127;
            rem = (rem << 1) | ((self.lo >> i) & 1);
            q <<= 1;
            if carry == 1 || rem >= denom {
                rem = rem.wrapping_sub(denom);
                q |= 1;
            }
        }
        Some(q)
    }
}

fn mul_u128_to_u256(a: u128, b: u128) -> U256 {
    let a_lo = a as u64 as u128;
    let a_hi = a >> 64;
    let b_lo = b as u64 as u128;
    let b_hi = b >> 64;

    let p0 = a_lo * b_lo;
    let p1 = a_lo * b_hi;
    let p2 = a_hi * b_lo;
    let p3 = a_hi * b_hi;

    let (mid, mid_carry) = p1.overflowing_add(p2);
    let (lo, lo_carry) = p0.overflowing_add(mid << 64);
    let hi = p3 + (mid >> 64) + ((mid_carry as u128) << 64) + lo_carry as u128;
    U256 { hi, lo }
}

pub fn mul_u128(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b)
        .ok_or_else(|| LedgerError::BoundedValueExceeded("u128 overflow in mul".into()))
}

pub fn add_u128(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::BoundedValueExceeded("u128 overflow in add".into()))
}

pub fn sub_u128(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b)
        .ok_or_else(|| LedgerError::InvalidInput("u128 underflow in sub".into()))
}

pub fn add_u64(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::BoundedValueExceeded("u64 overflow in add".into()))
}

pub fn to_i128(v: u128) -> Result<i128> {
    i128::try_from(v).map_err(|_| LedgerError::BoundedValueExceeded("i128 overflow".into()))
}

pub fn add_i128(a: i128, b: i128) -> Result<i128> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::BoundedValueExceeded("i128 overflow in add".into()))
}

pub fn sub_i128(a: i128, b: i128) -> Result<i128> {
    a.checked_sub(b)
        .ok_or_else(|| LedgerError::BoundedValueExceeded("i128 overflow in sub".into()))
}

pub fn mul_i128(a: i128, b: i128) -> Result<i128> {
    a.checked_mul(b)
        .ok_or_else(|| LedgerError::BoundedValueExceeded("i128 overflow in mul".into()))
}

/// Rounds a timestamp down to a multiple of `quantum`.
pub fn floor_to_quantum(t: u64, quantum: u64) -> u64 {
    if quantum == 0 {
        return t;
    }
    (t / quantum) * quantum
}

/// Lock multiplier by linear interpolation:
/// `1 + duration × (max_multiplier − 1) / max_duration`.
///
/// Callers validate `duration <= max_duration`; longer durations are clamped.
pub fn lock_multiplier(
    duration: u64,
    max_duration: u64,
    max_multiplier: Multiplier,
) -> Result<Multiplier> {
    if max_duration == 0 {
        return Err(LedgerError::InvalidInput("max_duration must be > 0".into()));
    }
    let d = duration.min(max_duration);
    let bonus = mul_div_floor(d as u128, max_multiplier.excess(), max_duration as u128)?;
    Multiplier::new(add_u128(PRECISION, bonus)?)
}

/// `floor(liquidity × multiplier / PRECISION)`.
pub fn scaled_liquidity(liquidity: u128, multiplier: Multiplier) -> Result<u128> {
    mul_div_floor(liquidity, multiplier.get(), PRECISION)
}

/// Escrow balance at which the boost saturates:
/// `locked_liquidity × escrow_per_liquidity / PRECISION`.
pub fn min_escrow_for_max_boost(locked_liquidity: u128, escrow_per_liquidity: u128) -> Result<u128> {
    mul_div_floor(locked_liquidity, escrow_per_liquidity, PRECISION)
}

/// Boost factor `1 + min(escrow × (max − 1) / min_escrow_for_max, max − 1)`.
///
/// Returns exactly 1.0 when either the escrow balance or the saturation threshold is zero,
/// so the boost never drops a weight below its unboosted floor.
pub fn boost_factor(
    escrow_balance: u128,
    min_escrow_for_max: u128,
    max_boost: Multiplier,
) -> Result<Multiplier> {
    if escrow_balance == 0 || min_escrow_for_max == 0 {
        return Ok(Multiplier::ONE);
    }
    let cap = max_boost.excess();
    let bonus = if escrow_balance >= min_escrow_for_max {
        cap
    } else {
        mul_div_floor(escrow_balance, cap, min_escrow_for_max)?.min(cap)
    };
    Multiplier::new(add_u128(PRECISION, bonus)?)
}

/// Accumulator increment for `emission` spread over `total_weight`
/// (`emission × PRECISION / total_weight`); zero when nobody holds weight.
pub fn reward_per_weight_delta(emission: u128, total_weight: u128) -> Result<u128> {
    if total_weight == 0 {
        return Ok(0);
    }
    mul_div_floor(emission, PRECISION, total_weight)
}

/// Reward earned by `weight` since `paid`: `weight × (current − paid) / PRECISION`.
pub fn earned_since(weight: u128, current: u128, paid: u128) -> Result<u128> {
    let delta = sub_u128(current, paid)?;
    mul_div_floor(weight, delta, PRECISION)
}
