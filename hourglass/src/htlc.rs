//! Chain-family dispatch for building locking constructs.
//!
//! `build` is pure: identical parameters produce byte-identical constructs,
//! which is what lets two peers derive the same locking address from the
//! agreed swap terms without ever exchanging the address itself.

use crate::{account, asset, utxo, ChainFamily, SecretHash, SwapId, Timestamp};
use serde::{Deserialize, Serialize};

/// Parameters of one leg's locking construct, tagged by chain family.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LegParams {
    UtxoScript(utxo::Params),
    AccountContract(account::Params),
}

impl LegParams {
    pub fn chain_family(&self) -> ChainFamily {
        match self {
            LegParams::UtxoScript(_) => ChainFamily::UtxoScript,
            LegParams::AccountContract(_) => ChainFamily::AccountContract,
        }
    }

    pub fn expiry(&self) -> Timestamp {
        match self {
            LegParams::UtxoScript(params) => params.expiry,
            LegParams::AccountContract(params) => params.expiry,
        }
    }

    pub fn secret_hash(&self) -> SecretHash {
        match self {
            LegParams::UtxoScript(params) => params.secret_hash,
            LegParams::AccountContract(params) => params.secret_hash,
        }
    }

    pub fn quantity(&self) -> asset::Quantity {
        match self {
            LegParams::UtxoScript(params) => params.asset.into(),
            LegParams::AccountContract(params) => params.asset.into(),
        }
    }

    /// Estimated transaction weight of spending this leg's locking output,
    /// in the unit the family's fee rate is quoted in.
    pub fn spend_weight_estimate(&self) -> u64 {
        match self {
            LegParams::UtxoScript(_) => utxo::Params::spend_weight_estimate(),
            LegParams::AccountContract(_) => account::Htlc::spend_gas_limit(),
        }
    }
}

/// The chain-specific mechanism enforcing the HTLC semantics of one leg.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LockingConstruct {
    UtxoScript {
        witness_script: Vec<u8>,
        address: String,
    },
    AccountContract {
        address: account::Address,
        init_code: Vec<u8>,
        chain_id: account::ChainId,
    },
}

impl LockingConstruct {
    pub fn chain_family(&self) -> ChainFamily {
        match self {
            LockingConstruct::UtxoScript { .. } => ChainFamily::UtxoScript,
            LockingConstruct::AccountContract { .. } => ChainFamily::AccountContract,
        }
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("locked amount must be strictly positive")]
    NonPositiveAmount,
    #[error("identity must not be all zeroes")]
    ZeroIdentity,
    #[error("the two identities of a leg must differ")]
    IdentitiesEqual,
    #[error("legs disagree on the secret hash")]
    SecretHashMismatch,
    #[error("timelock {timelock} is not in the future (now: {now})")]
    TimelockInPast { timelock: Timestamp, now: Timestamp },
    #[error("timelock safety margin must be strictly positive")]
    NonPositiveMargin,
    #[error(
        "counterparty timelock {counterparty} must elapse a {margin_percent}% margin \
         before initiator timelock {initiator}"
    )]
    TimelockOrdering {
        counterparty: Timestamp,
        initiator: Timestamp,
        margin_percent: u32,
    },
    #[error("secret hash was already used by swap {0}")]
    SecretHashReuse(SwapId),
    #[error("secret does not hash to the secret hash of this swap")]
    WrongSecret,
}

/// Derives the locking construct for one leg.
///
/// Rejects malformed parameters before anything touches a network; timelock
/// recency is checked at record creation, not here, to keep this function
/// free of any clock.
pub fn build(params: &LegParams) -> Result<LockingConstruct, ValidationError> {
    if params.quantity().is_zero() {
        return Err(ValidationError::NonPositiveAmount);
    }

    match params {
        LegParams::UtxoScript(params) => {
            if params.redeem_identity == params.refund_identity {
                return Err(ValidationError::IdentitiesEqual);
            }

            Ok(LockingConstruct::UtxoScript {
                witness_script: params.witness_script().to_bytes(),
                address: params.compute_address().to_string(),
            })
        }
        LegParams::AccountContract(params) => {
            if params.redeem_identity.is_zero()
                || params.refund_identity.is_zero()
                || params.asset.contract.is_zero()
            {
                return Err(ValidationError::ZeroIdentity);
            }
            if params.redeem_identity == params.refund_identity {
                return Err(ValidationError::IdentitiesEqual);
            }

            Ok(LockingConstruct::AccountContract {
                address: params.compute_address(),
                init_code: params.htlc().into_init_code(),
                chain_id: params.chain_id,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{asset::Token, Secret};
    use primitive_types::U256;

    fn utxo_params() -> utxo::Params {
        utxo::Params {
            network: utxo::Network::Regtest,
            asset: asset::Coin::from_sat(100_000_000),
            redeem_identity:
                "0298e113cc06bc862ac205f2c0f27ee8c0de98d0716537bbf74e2ea6f38a84d5dc"
                    .parse()
                    .unwrap(),
            refund_identity:
                "020c04eb8cb87485501e30b656f37439ea7866d7c58b3c38161e5793b68e712356"
                    .parse()
                    .unwrap(),
            expiry: Timestamp::from(1_620_000_000),
            secret_hash: SecretHash::new(Secret::from(*b"hello world, you are beautiful!!")),
        }
    }

    fn account_params() -> account::Params {
        account::Params {
            asset: Token::new(account::Address::from([3u8; 20]), U256::from(4_000u64)),
            redeem_identity: account::Address::from([1u8; 20]),
            refund_identity: account::Address::from([2u8; 20]),
            expiry: Timestamp::from(1_620_000_000),
            secret_hash: SecretHash::new(Secret::from(*b"hello world, you are beautiful!!")),
            chain_id: account::ChainId::DEV,
        }
    }

    #[test]
    fn build_is_deterministic_across_independent_callers() {
        let ours = build(&LegParams::UtxoScript(utxo_params())).unwrap();

        // A peer reconstructing the parameters from the agreed swap terms.
        let theirs = {
            let json = serde_json::to_string(&LegParams::UtxoScript(utxo_params())).unwrap();
            let params: LegParams = serde_json::from_str(&json).unwrap();
            build(&params).unwrap()
        };

        assert_eq!(ours, theirs);

        let ours = build(&LegParams::AccountContract(account_params())).unwrap();
        let theirs = build(&LegParams::AccountContract(account_params())).unwrap();

        assert_eq!(ours, theirs);
    }

    #[test]
    fn zero_amount_is_rejected() {
        let mut params = utxo_params();
        params.asset = asset::Coin::ZERO;

        assert_eq!(
            build(&LegParams::UtxoScript(params)),
            Err(ValidationError::NonPositiveAmount)
        );

        let mut params = account_params();
        params.asset.quantity = U256::zero();

        assert_eq!(
            build(&LegParams::AccountContract(params)),
            Err(ValidationError::NonPositiveAmount)
        );
    }

    #[test]
    fn zero_identity_is_rejected() {
        let mut params = account_params();
        params.redeem_identity = account::Address::default();

        assert_eq!(
            build(&LegParams::AccountContract(params)),
            Err(ValidationError::ZeroIdentity)
        );
    }

    #[test]
    fn equal_identities_are_rejected() {
        let mut params = account_params();
        params.redeem_identity = params.refund_identity;

        assert_eq!(
            build(&LegParams::AccountContract(params)),
            Err(ValidationError::IdentitiesEqual)
        );
    }
}
