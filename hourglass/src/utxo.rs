//! Locking construct for the unspent-output chain family.
//!
//! Funds are locked by paying into a pay-to-witness-script-hash address whose
//! witness script releases them either against the secret preimage and the
//! recipient's signature, or against an elapsed absolute timelock and the
//! funder's signature.

use crate::{asset, Secret, SecretHash, Timestamp};
use bitcoin::{
    blockdata::{
        opcodes,
        script::{Builder, Script},
    },
    hashes::{hash160, Hash},
    secp256k1,
};
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::{fmt, str::FromStr};

pub use bitcoin::{OutPoint, Txid};

/// A compressed public key identifying one party on a script-locked chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(bitcoin::PublicKey);

impl PublicKey {
    pub fn to_bytes(self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn pubkey_hash(self) -> hash160::Hash {
        hash160::Hash::hash(&self.0.key.serialize())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<secp256k1::PublicKey> for PublicKey {
    fn from(key: secp256k1::PublicKey) -> Self {
        Self(bitcoin::PublicKey {
            compressed: true, // we always want the PublicKey to be serialized in a compressed way
            key,
        })
    }
}

impl From<PublicKey> for bitcoin::PublicKey {
    fn from(pubkey: PublicKey) -> bitcoin::PublicKey {
        pubkey.0
    }
}

impl From<bitcoin::PublicKey> for PublicKey {
    fn from(key: bitcoin::PublicKey) -> Self {
        Self(key)
    }
}

impl FromStr for PublicKey {
    type Err = bitcoin::util::key::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(bitcoin::PublicKey::from_str(s)?.into())
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PublicKeyVisitor;

        impl<'de> Visitor<'de> for PublicKeyVisitor {
            type Value = PublicKey;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "a hex-encoded, compressed public key")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(PublicKeyVisitor)
    }
}

/// The network kind of a script-locked chain.
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
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl From<Network> for bitcoin::Network {
    fn from(network: Network) -> bitcoin::Network {
        match network {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

/// Data required to lock coins on an unspent-output chain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub network: Network,
    pub asset: asset::Coin,
    pub redeem_identity: PublicKey,
    pub refund_identity: PublicKey,
    pub expiry: Timestamp,
    pub secret_hash: SecretHash,
}

impl Params {
    pub fn witness_script(&self) -> Script {
        build_htlc(
            self.redeem_identity,
            self.refund_identity,
            self.expiry,
            self.secret_hash,
        )
    }

    pub fn compute_address(&self) -> bitcoin::Address {
        bitcoin::Address::p2wsh(&self.witness_script(), self.network.into())
    }

    /// Conservative virtual-size estimate for a single-input spend of the
    /// locking output, script and witness included.
    pub fn spend_weight_estimate() -> u64 {
        350
    }
}

/// Witness script enforcing the two HTLC paths.
///
/// Claim path: `SHA256(<secret>) == secret_hash` plus a signature matching the
/// recipient's key hash. Refund path: the absolute locktime must have elapsed
/// plus a signature matching the funder's key hash.
pub fn build_htlc(
    redeem_identity: PublicKey,
    refund_identity: PublicKey,
    expiry: Timestamp,
    secret_hash: SecretHash,
) -> Script {
    let redeem_pubkey_hash = redeem_identity.pubkey_hash();
    let refund_pubkey_hash = refund_identity.pubkey_hash();

    Builder::new()
        .push_opcode(opcodes::all::OP_IF)
        .push_opcode(opcodes::all::OP_SHA256)
        .push_slice(secret_hash.as_raw())
        .push_opcode(opcodes::all::OP_EQUALVERIFY)
        .push_opcode(opcodes::all::OP_DUP)
        .push_opcode(opcodes::all::OP_HASH160)
        .push_slice(&redeem_pubkey_hash[..])
        .push_opcode(opcodes::all::OP_ELSE)
        .push_int(i64::from(u32::from(expiry)))
        .push_opcode(opcodes::all::OP_CLTV)
        .push_opcode(opcodes::all::OP_DROP)
        .push_opcode(opcodes::all::OP_DUP)
        .push_opcode(opcodes::all::OP_HASH160)
        .push_slice(&refund_pubkey_hash[..])
        .push_opcode(opcodes::all::OP_ENDIF)
        .push_opcode(opcodes::all::OP_EQUALVERIFY)
        .push_opcode(opcodes::all::OP_CHECKSIG)
        .into_script()
}

/// Pulls the claim preimage out of the unlocking witness, if present.
pub fn extract_secret(unlock_data: &[Vec<u8>], secret_hash: &SecretHash) -> Option<Secret> {
    unlock_data
        .iter()
        .find_map(|item| match Secret::from_vec(item) {
            Ok(secret) if SecretHash::new(secret) == *secret_hash => Some(secret),
            _ => None,
        })
}
