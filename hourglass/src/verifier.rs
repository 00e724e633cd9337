//! The cross-chain confirmation gate.
//!
//! Every state-advancing fact must come through here: the verifier rebuilds
//! the expected locking construct from the agreed parameters (it never trusts
//! a caller-supplied address), asks the chain client what actually happened at
//! that construct and classifies the answer. `Pending` and `NotFound` never
//! advance anything; `Mismatch` is a distinct, higher-severity verdict that
//! the orchestrator treats as a potential counterparty attack.

use crate::{
    asset,
    chain::{ChainClients, FundingSighting, SpendSighting, TxRef},
    htlc::{self, LegParams},
    utxo, ChainFamily, Secret,
};
use tracing::Instrument;

/// Outcome of checking a leg's funding against expectations.
#[derive(Clone, Debug, PartialEq)]
pub enum Confirmation {
    /// The expected transaction exists and is at or above the requested
    /// confirmation depth.
    Confirmed(FundingSighting),
    /// The expected transaction exists but is still shy of the requested
    /// depth.
    Pending(FundingSighting),
    /// Nothing at the locking construct yet; a transient absence.
    NotFound,
    /// A transaction exists at the construct but disagrees on the amount.
    Mismatch {
        tx: TxRef,
        expected: asset::Quantity,
        observed: asset::Quantity,
    },
}

/// A spend of the locking construct, classified by path.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedSpend {
    pub tx: TxRef,
    pub outcome: SpendOutcome,
    pub confirmations: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SpendOutcome {
    /// The claim path ran: the unlocking material revealed the preimage.
    Claimed { secret: Secret },
    /// The timeout path ran; no preimage anywhere in the unlocking material.
    Refunded,
}

/// The chain backend could not answer; retry with backoff, never treat as
/// `NotFound`.
#[derive(Debug, thiserror::Error)]
#[error("chain backend temporarily unavailable")]
pub struct TransientUnavailable(#[source] pub anyhow::Error);

#[derive(Debug)]
pub struct Verifier {
    clients: ChainClients,
}

impl Verifier {
    pub fn new(clients: ChainClients) -> Self {
        Verifier { clients }
    }

    /// Checks whether the leg is funded as agreed.
    pub async fn confirm_funding(
        &self,
        params: &LegParams,
        min_confirmations: u32,
    ) -> anyhow::Result<Confirmation> {
        let expected = params.quantity();
        let construct = htlc::build(params)?;
        let client = self.clients.for_family(params.chain_family());

        let sighting = client
            .funding_at(&construct)
            .instrument(tracing::info_span!("", action = "verify_funding"))
            .await
            .map_err(|e| anyhow::Error::new(TransientUnavailable(e)))?;

        let sighting = match sighting {
            Some(sighting) => sighting,
            None => return Ok(Confirmation::NotFound),
        };

        if sighting.quantity != expected {
            return Ok(Confirmation::Mismatch {
                tx: sighting.tx,
                expected,
                observed: sighting.quantity,
            });
        }

        if sighting.confirmations >= min_confirmations {
            Ok(Confirmation::Confirmed(sighting))
        } else {
            Ok(Confirmation::Pending(sighting))
        }
    }

    /// Looks for a spend of the leg's locking construct and classifies it.
    ///
    /// The preimage check doubles as path classification: a spend whose
    /// unlocking material contains a value hashing to the swap's secret hash
    /// is a claim, anything else is a refund.
    pub async fn observe_spend(
        &self,
        params: &LegParams,
    ) -> anyhow::Result<Option<ObservedSpend>> {
        let construct = htlc::build(params)?;
        let client = self.clients.for_family(params.chain_family());

        let sighting = client
            .spend_of(&construct)
            .instrument(tracing::info_span!("", action = "observe_spend"))
            .await
            .map_err(|e| anyhow::Error::new(TransientUnavailable(e)))?;

        let SpendSighting {
            tx,
            unlock_data,
            confirmations,
        } = match sighting {
            Some(sighting) => sighting,
            None => return Ok(None),
        };

        let secret_hash = params.secret_hash();
        let secret = match params.chain_family() {
            ChainFamily::UtxoScript => utxo::extract_secret(&unlock_data, &secret_hash),
            ChainFamily::AccountContract => unlock_data
                .iter()
                .find_map(|data| match Secret::from_vec(data) {
                    Ok(secret) if crate::SecretHash::new(secret) == secret_hash => Some(secret),
                    _ => None,
                }),
        };

        let outcome = match secret {
            Some(secret) => SpendOutcome::Claimed { secret },
            None => SpendOutcome::Refunded,
        };

        Ok(Some(ObservedSpend {
            tx,
            outcome,
            confirmations,
        }))
    }

    /// Confirmation depth of an arbitrary transaction of the given family.
    pub async fn confirmations(
        &self,
        family: ChainFamily,
        tx: &TxRef,
    ) -> anyhow::Result<Option<u32>> {
        self.clients
            .for_family(family)
            .confirmations(tx)
            .await
            .map_err(|e| anyhow::Error::new(TransientUnavailable(e)))
    }
}
