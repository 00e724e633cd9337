//! The persisted shape of a swap and the rules that keep it consistent.

use crate::{
    chain::{HtlcLocation, TxRef},
    fee::{Fee, FeeSnapshot},
    htlc::{self, LegParams, ValidationError},
    SecretHash, Side, SwapId, Timestamp,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a swap record.
///
/// The happy path walks the variants top to bottom; any leg whose timelock
/// elapses unclaimed branches into `RefundPending`. `Claimed`, `Refunded` and
/// `Failed` are terminal.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SwapState {
    Created,
    FundedInitiator,
    FundedBoth,
    ClaimPending,
    Claimed,
    RefundPending,
    Refunded,
    Failed,
}

impl SwapState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SwapState::Claimed | SwapState::Refunded | SwapState::Failed)
    }

    pub fn can_transition_to(self, next: SwapState) -> bool {
        use SwapState::*;

        match (self, next) {
            (Created, FundedInitiator) => true,
            (FundedInitiator, FundedBoth) => true,
            (FundedInitiator, RefundPending) => true,
            (FundedBoth, ClaimPending) => true,
            (FundedBoth, RefundPending) => true,
            (ClaimPending, Claimed) => true,
            (ClaimPending, RefundPending) => true,
            (RefundPending, Refunded) => true,
            // A claim that lands while a refund is pending wins; the secret
            // is public at that point and the other leg must be claimed too.
            (RefundPending, ClaimPending) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: SwapState,
    pub to: SwapState,
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
#[error("leg already settled by the opposite path")]
pub struct LegAlreadySettled;

/// One side of the swap: the locking parameters plus everything observed
/// on-chain for it so far.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub params: LegParams,
    pub min_confirmations: u32,
    pub funding_tx: Option<TxRef>,
    pub funding_location: Option<HtlcLocation>,
    pub claim_tx: Option<TxRef>,
    pub refund_tx: Option<TxRef>,
    pub fee: Option<FeeSnapshot>,
}

impl Leg {
    pub fn new(params: LegParams, min_confirmations: u32) -> Self {
        Leg {
            params,
            min_confirmations,
            funding_tx: None,
            funding_location: None,
            claim_tx: None,
            refund_tx: None,
            fee: None,
        }
    }

    pub fn is_funded(&self) -> bool {
        self.funding_tx.is_some()
    }

    /// A settled leg has a claim or refund out; no further broadcast is ever
    /// attempted for it once the settling transaction confirms.
    pub fn is_settled(&self) -> bool {
        self.claim_tx.is_some() || self.refund_tx.is_some()
    }

    pub fn record_claim(&mut self, tx: TxRef) -> Result<(), LegAlreadySettled> {
        if self.refund_tx.is_some() {
            return Err(LegAlreadySettled);
        }
        self.claim_tx = Some(tx);
        Ok(())
    }

    /// Records a refund broadcast. Replacing an earlier, still-unconfirmed
    /// refund with a fee-bumped one is allowed; replacing a claim is not.
    pub fn record_refund(&mut self, tx: TxRef) -> Result<(), LegAlreadySettled> {
        if self.claim_tx.is_some() {
            return Err(LegAlreadySettled);
        }
        self.refund_tx = Some(tx);
        Ok(())
    }
}

/// How much longer the initiator's refund window must stay open compared to
/// the counterparty's.
///
/// The initiator reveals the secret last risk-wise; without this margin the
/// counterparty could stall until the initiator's window closes while still
/// being able to claim. The percentage is policy, not protocol: it is carried
/// per swap and anything non-positive is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockPolicy {
    pub margin_percent: u32,
}

impl Default for TimelockPolicy {
    fn default() -> Self {
        TimelockPolicy { margin_percent: 50 }
    }
}

impl TimelockPolicy {
    pub fn validate(
        &self,
        now: Timestamp,
        counterparty: Timestamp,
        initiator: Timestamp,
    ) -> Result<(), ValidationError> {
        if self.margin_percent == 0 {
            return Err(ValidationError::NonPositiveMargin);
        }

        let counterparty_window = u64::from(counterparty.seconds_until(now));
        let initiator_window = u64::from(initiator.seconds_until(now));

        let required = u128::from(counterparty_window)
            * u128::from(100 + self.margin_percent)
            / 100;

        if u128::from(initiator_window) < required {
            return Err(ValidationError::TimelockOrdering {
                counterparty,
                initiator,
                margin_percent: self.margin_percent,
            });
        }

        Ok(())
    }
}

/// The central entity: one record per swap, identity immutable for life.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: SwapId,
    pub secret_hash: SecretHash,
    pub state: SwapState,
    pub leg_initiator: Leg,
    pub leg_counterparty: Leg,
    pub timelock_policy: TimelockPolicy,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

impl SwapRecord {
    /// Validates the agreed terms and mints the record.
    ///
    /// Everything that can be rejected before a single network action happens
    /// here: malformed leg parameters, a secret hash that differs between the
    /// legs, timelocks already in the past and a timelock ordering that
    /// violates the safety margin.
    pub fn new(
        swap_id: SwapId,
        secret_hash: SecretHash,
        leg_initiator: Leg,
        leg_counterparty: Leg,
        timelock_policy: TimelockPolicy,
        now: Timestamp,
    ) -> Result<Self, ValidationError> {
        for leg in &[&leg_initiator, &leg_counterparty] {
            if leg.params.secret_hash() != secret_hash {
                return Err(ValidationError::SecretHashMismatch);
            }

            let expiry = leg.params.expiry();
            if expiry.has_elapsed_by(now) || expiry == now {
                return Err(ValidationError::TimelockInPast {
                    timelock: expiry,
                    now,
                });
            }

            // Rejects zero amounts and malformed identities.
            htlc::build(&leg.params)?;
        }

        timelock_policy.validate(
            now,
            leg_counterparty.params.expiry(),
            leg_initiator.params.expiry(),
        )?;

        let created_at = Utc::now();

        Ok(SwapRecord {
            swap_id,
            secret_hash,
            state: SwapState::Created,
            leg_initiator,
            leg_counterparty,
            timelock_policy,
            failure: None,
            created_at,
            last_transition_at: created_at,
        })
    }

    pub fn leg(&self, side: Side) -> &Leg {
        match side {
            Side::Initiator => &self.leg_initiator,
            Side::Counterparty => &self.leg_counterparty,
        }
    }

    pub fn leg_mut(&mut self, side: Side) -> &mut Leg {
        match side {
            Side::Initiator => &mut self.leg_initiator,
            Side::Counterparty => &mut self.leg_counterparty,
        }
    }

    pub fn transition_to(&mut self, next: SwapState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }

        self.state = next;
        self.last_transition_at = Utc::now();
        Ok(())
    }
}

/// One refund broadcast attempt, appended to the audit trail and never
/// mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepAttempt {
    pub swap_id: SwapId,
    pub side: Side,
    pub attempt_number: u32,
    pub fee_level_used: Option<Fee>,
    pub broadcast_reference: Option<TxRef>,
    pub outcome: SweepOutcome,
    pub observed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SweepOutcome {
    /// The refund transaction went out.
    Broadcast,
    /// A claim beat the sweep; the refund was aborted.
    AbortedClaimed,
    /// The chain backend or the fee oracle was unreachable.
    TransientFailure(String),
    /// Escalation hit the fee ceiling without a confirmation.
    FeeCeilingReached,
    /// The attempt cap was reached; the swap is handed to an operator.
    Exhausted,
    /// The leg's refund already confirmed, nothing to do.
    LegSettled,
    /// Skipped to respect the per-swap rate limit.
    RateLimited,
}

#[derive(Debug, thiserror::Error)]
#[error(
    "refund of swap {swap_id} ({side}) gave up after {attempts} attempts; \
     manual recovery required"
)]
pub struct SweepExhausted {
    pub swap_id: SwapId,
    pub side: Side,
    pub attempts: u32,
}
