//! Quantities locked in a swap leg, one representation per chain family.

use crate::{account, ChainFamily};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Native coin amount on an unspent-output chain, denominated in its
/// smallest unit.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Coin(u64);

impl Coin {
    pub const ZERO: Coin = Coin(0);

    pub fn from_sat(sat: u64) -> Self {
        Coin(sat)
    }

    pub fn as_sat(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

/// A token on an account-based chain: the contract that issues it and the
/// quantity to lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub contract: account::Address,
    pub quantity: U256,
}

impl Token {
    pub fn new(contract: account::Address, quantity: U256) -> Self {
        Token { contract, quantity }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of token {}", self.quantity, self.contract)
    }
}

/// Family-tagged quantity, the unit in which funding amounts are compared.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Quantity {
    Coin(Coin),
    Token(Token),
}

impl Quantity {
    pub fn chain_family(&self) -> ChainFamily {
        match self {
            Quantity::Coin(_) => ChainFamily::UtxoScript,
            Quantity::Token(_) => ChainFamily::AccountContract,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Quantity::Coin(coin) => coin.as_sat() == 0,
            Quantity::Token(token) => token.quantity.is_zero(),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Coin(coin) => coin.fmt(f),
            Quantity::Token(token) => token.fmt(f),
        }
    }
}

impl From<Coin> for Quantity {
    fn from(coin: Coin) -> Self {
        Quantity::Coin(coin)
    }
}

impl From<Token> for Quantity {
    fn from(token: Token) -> Self {
        Quantity::Token(token)
    }
}
