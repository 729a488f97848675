//! Bounded, non-negative integer amounts (§3 invariant 7: `0 <= amount < 2^256`),
//! serialized as decimal strings on the wire to avoid JSON float precision loss.

use alloy_primitives::U256;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

static DECIMAL_INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BoundedAmountError {
    #[error("amount must be a non-empty decimal integer")]
    NotDecimalInteger,
    #[error("amount must be >= 1")]
    Zero,
    #[error("amount must be < 2^256")]
    TooLarge,
}

/// An amount in the smallest token unit: a non-negative integer strictly
/// less than 2^256. Deliberately distinct from [`crate::util::money`]'s
/// teacher-analogue `MoneyAmount`/`Decimal` newtype: settlement math never
/// touches human-scale decimals, only raw on-chain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BoundedAmount(U256);

impl BoundedAmount {
    pub const ZERO: BoundedAmount = BoundedAmount(U256::ZERO);

    /// Parses a decimal-string amount, requiring `amount >= 1` (§8 property 8:
    /// `0` is rejected at this boundary -- callers that need to accept `0`,
    /// e.g. a computed fee, use `from_u256` directly).
    pub fn parse_nonzero(s: &str) -> Result<Self, BoundedAmountError> {
        if !DECIMAL_INTEGER.is_match(s) {
            return Err(BoundedAmountError::NotDecimalInteger);
        }
        let value = U256::from_str_radix(s, 10).map_err(|_| BoundedAmountError::TooLarge)?;
        if value.is_zero() {
            return Err(BoundedAmountError::Zero);
        }
        Ok(BoundedAmount(value))
    }

    pub fn from_u256(value: U256) -> Self {
        BoundedAmount(value)
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_sub(&self, other: BoundedAmount) -> Option<BoundedAmount> {
        self.0.checked_sub(other.0).map(BoundedAmount)
    }

    pub fn checked_add(&self, other: BoundedAmount) -> Option<BoundedAmount> {
        self.0.checked_add(other.0).map(BoundedAmount)
    }
}

impl fmt::Display for BoundedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for BoundedAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for BoundedAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BoundedAmount::parse_nonzero(&s).map_err(serde::de::Error::custom)
    }
}

/// Fee basis points, clamped to the 1000 bps (10%) ceiling (§3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeeBps(pub u16);

pub const MAX_FEE_BPS: u16 = 1_000;
pub const BPS_DIVISOR: u64 = 10_000;

impl FeeBps {
    pub fn clamp(bps: u16) -> Self {
        FeeBps(bps.min(MAX_FEE_BPS))
    }
}

/// Floor-division fee split: `fee = floor(amount * bps / 10000)`, `net = amount - fee`.
/// Identical semantics to the on-chain `FeeSplitter.splitPayment` arithmetic
/// (§4.4 "Arithmetic"), so the off-chain bookkeeping and the on-chain event
/// never disagree on the same inputs.
pub fn net_and_fee(amount: BoundedAmount, bps: FeeBps) -> (BoundedAmount, BoundedAmount) {
    let bps = bps.0.min(MAX_FEE_BPS);
    if bps == 0 {
        return (amount, BoundedAmount::ZERO);
    }
    let fee = amount.0 * U256::from(bps) / U256::from(BPS_DIVISOR);
    let net = amount.0 - fee;
    (BoundedAmount(net), BoundedAmount(fee))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_non_integer() {
        assert_eq!(BoundedAmount::parse_nonzero("0"), Err(BoundedAmountError::Zero));
        assert_eq!(
            BoundedAmount::parse_nonzero("1.5"),
            Err(BoundedAmountError::NotDecimalInteger)
        );
        assert_eq!(
            BoundedAmount::parse_nonzero("-1"),
            Err(BoundedAmountError::NotDecimalInteger)
        );
        assert_eq!(
            BoundedAmount::parse_nonzero(""),
            Err(BoundedAmountError::NotDecimalInteger)
        );
    }

    #[test]
    fn accepts_one_and_max() {
        assert!(BoundedAmount::parse_nonzero("1").is_ok());
        let max = U256::MAX;
        assert!(BoundedAmount::parse_nonzero(&max.to_string()).is_ok());
    }

    #[test]
    fn net_and_fee_s1_usdc_point_one_percent() {
        let amount = BoundedAmount::parse_nonzero("1000000").unwrap();
        let (net, fee) = net_and_fee(amount, FeeBps(10));
        assert_eq!(fee.to_string(), "1000");
        assert_eq!(net.to_string(), "999000");
    }

    #[test]
    fn net_and_fee_dust_rounds_to_zero() {
        let amount = BoundedAmount::parse_nonzero("99").unwrap();
        let (net, fee) = net_and_fee(amount, FeeBps(10));
        assert_eq!(fee, BoundedAmount::ZERO);
        assert_eq!(net.to_string(), "99");
    }

    #[test]
    fn net_and_fee_exempt_is_zero_regardless_of_configured_bps() {
        let amount = BoundedAmount::parse_nonzero("100000000000000000000").unwrap(); // 100e18
        let (net, fee) = net_and_fee(amount, FeeBps(0));
        assert_eq!(fee, BoundedAmount::ZERO);
        assert_eq!(net, amount);
    }

    #[test]
    fn fee_bps_clamps_to_ceiling() {
        assert_eq!(FeeBps::clamp(5000).0, MAX_FEE_BPS);
    }
}
