//! Runtime settings with chain-family-appropriate defaults.

use crate::{
    fee::{Fee, FeePolicy},
    record::TimelockPolicy,
    ChainFamily,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Cadence of the per-swap verification poll, in seconds.
    pub poll_interval_secs: u64,
    /// Ceiling for the backoff applied after transient verification errors.
    pub max_poll_backoff_secs: u64,
    pub timelock_policy: TimelockPolicy,
    /// Confirmation depth defaults; callers can override per leg.
    pub utxo_confirmations: u32,
    pub account_confirmations: u32,
    pub utxo_fees: FeePolicy,
    pub account_fees: FeePolicy,
    pub sweep: SweepSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            poll_interval_secs: 30,
            max_poll_backoff_secs: 300,
            timelock_policy: TimelockPolicy::default(),
            utxo_confirmations: 6,
            account_confirmations: 12,
            utxo_fees: FeePolicy {
                safety_buffer_bps: 1_000,
                min_fee: Fee::new(1_000),
                max_fee: Fee::new(100_000),
            },
            account_fees: FeePolicy {
                safety_buffer_bps: 1_000,
                min_fee: Fee::new(100_000_000_000_000),
                max_fee: Fee::new(100_000_000_000_000_000),
            },
            sweep: SweepSettings::default(),
        }
    }
}

impl Settings {
    pub fn default_confirmations(&self, family: ChainFamily) -> u32 {
        match family {
            ChainFamily::UtxoScript => self.utxo_confirmations,
            ChainFamily::AccountContract => self.account_confirmations,
        }
    }

    pub fn fee_policy(&self, family: ChainFamily) -> FeePolicy {
        match family {
            ChainFamily::UtxoScript => self.utxo_fees,
            ChainFamily::AccountContract => self.account_fees,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_poll_backoff(&self) -> Duration {
        Duration::from_secs(self.max_poll_backoff_secs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    /// Fixed scan cadence, independent of urgency: urgency is expressed in
    /// fee escalation, not in tighter polling.
    pub tick_interval_secs: u64,
    pub max_attempts: u32,
    /// Fee-rate increase per attempt after the first, in percent.
    pub fee_escalation_percent: u32,
    /// Minimum spacing between two broadcast attempts for the same leg.
    pub min_retry_interval_secs: u64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        SweepSettings {
            tick_interval_secs: 60,
            max_attempts: 8,
            fee_escalation_percent: 100,
            min_retry_interval_secs: 300,
        }
    }
}

impl SweepSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}
