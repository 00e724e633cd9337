//! Interfaces of the external collaborators this engine drives.
//!
//! The engine never signs and never talks to a chain itself: it decides what
//! must be signed and when it is safe to publish it, then hands the work to
//! these traits. Implementations are expected to be stateless services; every
//! broadcast carries an idempotency key so a retried call after a crash
//! cannot double-broadcast.

use crate::{
    account, asset,
    fee::{Fee, FeeRate},
    htlc::LockingConstruct,
    utxo, ChainFamily, Secret, Side, SwapId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// The three money-moving actions of a swap leg.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActionKind {
    Fund,
    Claim,
    Refund,
}

/// Deterministic identifier of one broadcast request.
///
/// A chain client that sees a key again must return the original transaction
/// reference instead of broadcasting a second time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub swap_id: SwapId,
    pub side: Side,
    pub action: ActionKind,
    pub attempt: u32,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.swap_id, self.side, self.action, self.attempt
        )
    }
}

/// Family-typed reference to an on-chain transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxRef {
    UtxoScript(utxo::Txid),
    AccountContract(account::Hash),
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxRef::UtxoScript(txid) => txid.fmt(f),
            TxRef::AccountContract(hash) => hash.fmt(f),
        }
    }
}

/// Where the locked funds live once the funding transaction exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HtlcLocation {
    UtxoScript(utxo::OutPoint),
    AccountContract(account::Address),
}

/// A funding transaction observed at the locking address.
#[derive(Clone, Debug, PartialEq)]
pub struct FundingSighting {
    pub tx: TxRef,
    pub location: HtlcLocation,
    pub quantity: asset::Quantity,
    pub confirmations: u32,
}

/// A transaction spending the locking construct, claim or refund alike.
///
/// `unlock_data` carries the raw unlocking material: witness items on
/// unspent-output chains, event log payloads on account-based chains. The
/// verifier decides which path was taken by looking for a valid preimage in
/// there.
#[derive(Clone, Debug, PartialEq)]
pub struct SpendSighting {
    pub tx: TxRef,
    pub unlock_data: Vec<Vec<u8>>,
    pub confirmations: u32,
}

/// What the signer collaborator is asked to sign.
///
/// Constructed only through [`SpendRequest::claim`] and
/// [`SpendRequest::refund`] so that a refund can never carry the secret.
#[derive(Clone, Debug)]
pub struct SpendRequest {
    pub kind: ActionKind,
    pub construct: LockingConstruct,
    pub location: HtlcLocation,
    pub value: asset::Quantity,
    pub fee: Fee,
    pub secret: Option<Secret>,
}

impl SpendRequest {
    pub fn claim(
        construct: LockingConstruct,
        location: HtlcLocation,
        value: asset::Quantity,
        fee: Fee,
        secret: Secret,
    ) -> Self {
        SpendRequest {
            kind: ActionKind::Claim,
            construct,
            location,
            value,
            fee,
            secret: Some(secret),
        }
    }

    pub fn refund(
        construct: LockingConstruct,
        location: HtlcLocation,
        value: asset::Quantity,
        fee: Fee,
    ) -> Self {
        SpendRequest {
            kind: ActionKind::Refund,
            construct,
            location,
            value,
            fee,
            secret: None,
        }
    }
}

/// Read/broadcast access to one chain family.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    async fn broadcast(&self, raw: Vec<u8>, key: IdempotencyKey) -> anyhow::Result<TxRef>;

    /// Confirmation depth of a transaction, `None` while unseen.
    async fn confirmations(&self, tx: &TxRef) -> anyhow::Result<Option<u32>>;

    /// The transaction paying into the locking construct, if any.
    async fn funding_at(&self, construct: &LockingConstruct)
        -> anyhow::Result<Option<FundingSighting>>;

    /// The transaction spending the locking construct, if any.
    async fn spend_of(&self, construct: &LockingConstruct)
        -> anyhow::Result<Option<SpendSighting>>;
}

/// The external signer. It receives no more secret material than the action
/// strictly requires.
#[async_trait]
pub trait Signer: Send + Sync + 'static {
    async fn sign_and_serialize(&self, request: SpendRequest) -> anyhow::Result<Vec<u8>>;
}

/// External fee-rate source; this engine only ever consumes the value.
#[async_trait]
pub trait FeeOracle: Send + Sync + 'static {
    async fn current_fee_rate(&self, family: ChainFamily) -> anyhow::Result<FeeRate>;
}

/// One client per chain family; adding a family means adding a field, which
/// every exhaustive match downstream will flag.
#[derive(Clone)]
pub struct ChainClients {
    pub utxo: Arc<dyn ChainClient>,
    pub account: Arc<dyn ChainClient>,
}

impl ChainClients {
    pub fn for_family(&self, family: ChainFamily) -> &Arc<dyn ChainClient> {
        match family {
            ChainFamily::UtxoScript => &self.utxo,
            ChainFamily::AccountContract => &self.account,
        }
    }
}

impl fmt::Debug for ChainClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChainClients")
    }
}
