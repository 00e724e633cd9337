//! Bounded fee arithmetic shared by funding audits and refund sweeps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fee per weight unit: satoshi per virtual byte on unspent-output chains,
/// smallest-unit gas price on account-based chains.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FeeRate(u64);

impl FeeRate {
    pub fn new(rate: u64) -> Self {
        FeeRate(rate)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An absolute fee in the chain's smallest unit.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Fee(u64);

impl Fee {
    pub fn new(fee: u64) -> Self {
        Fee(fee)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum FeeError {
    #[error("a fee rate of zero signals an oracle failure, not a cheap market")]
    AbsurdRate,
    #[error("minimum fee exceeds maximum fee")]
    InvertedBounds,
}

/// Fee bounds and buffer applied to every fee this engine computes.
///
/// The clamp works both ways: a floor against dust fees that would leave a
/// transaction stuck forever, a ceiling against a runaway oracle reading.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub safety_buffer_bps: u32,
    pub min_fee: Fee,
    pub max_fee: Fee,
}

impl FeePolicy {
    /// `rate × weight × (1 + safety_buffer_bps/10000)`, clamped into
    /// `[min_fee, max_fee]`.
    pub fn estimate(&self, rate: FeeRate, weight: u64) -> Result<Fee, FeeError> {
        if rate.0 == 0 {
            return Err(FeeError::AbsurdRate);
        }
        if self.min_fee > self.max_fee {
            return Err(FeeError::InvertedBounds);
        }

        let raw = u128::from(rate.0) * u128::from(weight);
        let buffered = raw
            .saturating_mul(10_000 + u128::from(self.safety_buffer_bps))
            / 10_000;

        let min = u128::from(self.min_fee.0);
        let max = u128::from(self.max_fee.0);
        let clamped = buffered.max(min).min(max);

        // The clamp guarantees the value fits, max_fee is a u64.
        #[allow(clippy::cast_possible_truncation)]
        Ok(Fee(clamped as u64))
    }

    /// Rate to use for the n-th sweep attempt: the base rate raised by
    /// `escalation_percent` for every attempt after the first. The resulting
    /// fee still goes through `estimate` and therefore never exceeds
    /// `max_fee`.
    pub fn escalate(&self, rate: FeeRate, attempt: u32, escalation_percent: u32) -> FeeRate {
        let mut escalated = u128::from(rate.0);
        for _ in 1..attempt {
            escalated = escalated.saturating_mul(100 + u128::from(escalation_percent)) / 100;
        }

        #[allow(clippy::cast_possible_truncation)]
        FeeRate(escalated.min(u128::from(u64::MAX)) as u64)
    }
}

/// Inputs and output of a fee computation, recorded on the swap record for
/// auditability.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeeSnapshot {
    pub policy: FeePolicy,
    pub rate: FeeRate,
    pub weight: u64,
    pub fee: Fee,
    pub sampled_at: DateTime<Utc>,
}

impl FeeSnapshot {
    pub fn record(policy: FeePolicy, rate: FeeRate, weight: u64, fee: Fee) -> Self {
        FeeSnapshot {
            policy,
            rate,
            weight,
            fee,
            sampled_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FeePolicy {
        FeePolicy {
            safety_buffer_bps: 1_000, // 10%
            min_fee: Fee::new(1_000),
            max_fee: Fee::new(100_000),
        }
    }

    #[test]
    fn buffered_fee_is_exact() {
        // 10 sat/vB * 350 vB * 1.10 = 3850
        let fee = policy().estimate(FeeRate::new(10), 350).unwrap();

        assert_eq!(fee, Fee::new(3_850));
    }

    #[test]
    fn dust_fee_is_raised_to_the_floor() {
        let fee = policy().estimate(FeeRate::new(1), 100).unwrap();

        assert_eq!(fee, policy().min_fee);
    }

    #[test]
    fn runaway_fee_is_clamped_to_the_ceiling() {
        let fee = policy().estimate(FeeRate::new(1_000_000), 350).unwrap();

        assert_eq!(fee, policy().max_fee);
    }

    #[test]
    fn zero_rate_is_rejected_not_floored() {
        assert_eq!(
            policy().estimate(FeeRate::new(0), 350),
            Err(FeeError::AbsurdRate)
        );
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let policy = FeePolicy {
            safety_buffer_bps: 0,
            min_fee: Fee::new(10),
            max_fee: Fee::new(1),
        };

        assert_eq!(
            policy.estimate(FeeRate::new(10), 350),
            Err(FeeError::InvertedBounds)
        );
    }

    #[test]
    fn escalation_doubles_per_attempt_at_100_percent() {
        let policy = policy();
        let base = FeeRate::new(10);

        assert_eq!(policy.escalate(base, 1, 100), FeeRate::new(10));
        assert_eq!(policy.escalate(base, 2, 100), FeeRate::new(20));
        assert_eq!(policy.escalate(base, 4, 100), FeeRate::new(80));
    }

    quickcheck::quickcheck! {
        fn estimate_is_always_within_bounds(rate: u64, weight: u64) -> bool {
            let policy = policy();

            match policy.estimate(FeeRate::new(rate), weight) {
                Ok(fee) => policy.min_fee <= fee && fee <= policy.max_fee,
                Err(FeeError::AbsurdRate) => rate == 0,
                Err(_) => false,
            }
        }
    }
}
