//! Locking construct for the account-based chain family.
//!
//! Funds are locked by deploying a small contract whose init code embeds the
//! secret hash, the timelock and both identities. Calling it with the 32-byte
//! secret as calldata pays the recipient (the contract verifies the preimage
//! through the SHA-256 precompile); calling it with empty calldata after the
//! timelock pays the funder back.

use crate::{asset, timestamp::Timestamp, SecretHash};
use hex::FromHexError;
use hex_literal::hex;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_hex::{SerHex, StrictPfx};
use std::{
    fmt,
    fmt::{Display, Formatter, LowerHex},
    ops::Range,
    str::FromStr,
};
use tiny_keccak::{Hasher, Keccak};

#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Address(#[serde(with = "SerHex::<StrictPfx>")] [u8; 20]);

impl Address {
    pub fn from_slice(src: &[u8]) -> Self {
        let mut address = Address([0u8; 20]);
        address.0.copy_from_slice(src);
        address
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Generates a random address for use in tests where the actual value
    /// doesn't / shouldn't matter.
    pub fn random() -> Address {
        use rand::RngCore;

        let mut buffer = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut buffer);

        Address(buffer)
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }
}

impl From<Address> for [u8; 20] {
    fn from(s: Address) -> Self {
        s.0
    }
}

impl FromStr for Address {
    type Err = FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim_start_matches("0x");
        let vec = hex::decode(hex)?;
        if vec.len() != 20 {
            return Err(FromHexError::InvalidStringLength);
        }
        Ok(Address::from_slice(&vec))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl LowerHex for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(hex::encode(&self.0).as_str())
    }
}

/// A 32-byte chain-level hash, used for transaction references.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Hash(#[serde(with = "SerHex::<StrictPfx>")] [u8; 32]);

impl Hash {
    pub fn from_slice(src: &[u8]) -> Self {
        let mut hash = Hash([0u8; 32]);
        hash.0.copy_from_slice(src);
        hash
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl FromStr for Hash {
    type Err = FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim_start_matches("0x");
        let vec = hex::decode(hex)?;
        if vec.len() != 32 {
            return Err(FromHexError::InvalidStringLength);
        }
        Ok(Hash::from_slice(&vec))
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// The chain id disambiguates networks within the account family.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(u32);

impl ChainId {
    pub const MAINNET: Self = ChainId(1);
    pub const DEV: Self = ChainId(1337);
}

impl From<u32> for ChainId {
    fn from(id: u32) -> Self {
        ChainId(id)
    }
}

impl From<ChainId> for u32 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl Display for ChainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Data required to lock tokens on an account-based chain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub asset: asset::Token,
    pub redeem_identity: Address,
    pub refund_identity: Address,
    pub expiry: Timestamp,
    pub secret_hash: SecretHash,
    pub chain_id: ChainId,
}

impl Params {
    pub fn htlc(&self) -> Htlc {
        Htlc::new(
            self.expiry,
            self.refund_identity,
            self.redeem_identity,
            self.secret_hash,
            self.asset.contract,
            self.asset.quantity,
        )
    }

    /// The address the contract ends up at when the funder deploys the init
    /// code through a deterministic-deployment call, salted with the secret
    /// hash. Both peers derive the same value without communicating it.
    pub fn compute_address(&self) -> Address {
        deterministic_address(
            self.refund_identity,
            self.secret_hash.into_raw(),
            &self.htlc().into_init_code(),
        )
    }
}

pub const SECRET_HASH_RANGE: Range<usize> = 53..85;
pub const EXPIRY_RANGE: Range<usize> = 102..106;
pub const REDEEM_IDENTITY_RANGE: Range<usize> = 157..177;
pub const REFUND_IDENTITY_RANGE: Range<usize> = 224..244;
pub const TOKEN_QUANTITY_RANGE: Range<usize> = 261..293;
pub const TOKEN_CONTRACT_RANGE: Range<usize> = 307..327;

const CONTRACT_TEMPLATE: [u8; 339] = hex!("61014461000f6000396101446000f3361561005457602036141561006057602060006000376020602160206000600060026048f17f000000000000000000000000000000000000000000000000000000000000000060215114166100665760006000f35b426300000000106100a9575b60006000f35b7fb8cac300e37f03ad332e581dea21b2f0b84eaaadc184a295fef71e81f44a741360206000a17300000000000000000000000000000000000000006020526100ec565b7f5d26862916391bf49478b2f5103b0720a842b45ef145a268f2cd1fb2aed5517860006000a17300000000000000000000000000000000000000006020526100ec565b63a9059cbb6000527f0000000000000000000000000000000000000000000000000000000000000064604052602060606044601c6000730000000000000000000000000000000000000000620186a05a03f150602051ff");

/// Parameterized init code of the locking contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Htlc(Vec<u8>);

impl Htlc {
    pub fn new(
        expiry: Timestamp,
        refund_identity: Address,
        redeem_identity: Address,
        secret_hash: SecretHash,
        token_contract: Address,
        token_quantity: U256,
    ) -> Self {
        let mut data = CONTRACT_TEMPLATE.to_vec();

        data[SECRET_HASH_RANGE].copy_from_slice(secret_hash.as_raw());
        data[EXPIRY_RANGE].copy_from_slice(&u32::from(expiry).to_be_bytes());
        data[REDEEM_IDENTITY_RANGE].copy_from_slice(redeem_identity.as_bytes());
        data[REFUND_IDENTITY_RANGE].copy_from_slice(refund_identity.as_bytes());

        let mut quantity = [0u8; 32];
        token_quantity.to_big_endian(&mut quantity);
        data[TOKEN_QUANTITY_RANGE].copy_from_slice(&quantity);
        data[TOKEN_CONTRACT_RANGE].copy_from_slice(token_contract.as_bytes());

        Htlc(data)
    }

    pub fn as_init_code(&self) -> &[u8] {
        &self.0
    }

    pub fn into_init_code(self) -> Vec<u8> {
        self.0
    }

    /// Gas needed to execute either contract entry point.
    pub fn spend_gas_limit() -> u64 {
        100_000
    }
}

impl From<Htlc> for Vec<u8> {
    fn from(htlc: Htlc) -> Self {
        htlc.0
    }
}

/// Calldata for the claim entry point: the bare 32-byte secret.
pub fn claim_calldata(secret: &crate::Secret) -> Vec<u8> {
    secret.as_raw_secret().to_vec()
}

/// Calldata for the refund entry point: nothing, the contract falls through
/// to the timelock branch on empty input.
pub fn refund_calldata() -> Vec<u8> {
    Vec::new()
}

/// Address of a contract deployed through a deterministic-deployment call:
/// keccak256(0xff ‖ deployer ‖ salt ‖ keccak256(init_code)), last 20 bytes.
pub fn deterministic_address(deployer: Address, salt: [u8; 32], init_code: &[u8]) -> Address {
    let mut preimage = Vec::with_capacity(1 + 20 + 32 + 32);
    preimage.push(0xff);
    preimage.extend_from_slice(deployer.as_bytes());
    preimage.extend_from_slice(&salt);
    preimage.extend_from_slice(&keccak256(init_code));

    let digest = keccak256(&preimage);
    Address::from_slice(&digest[12..])
}

fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut output = [0u8; 32];
    let mut hasher = Keccak::v256();
    hasher.update(bytes);
    hasher.finalize(&mut output);
    output
}
