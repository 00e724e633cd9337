use std::{fmt, str::FromStr};

/// The 32-byte preimage that unlocks the claim path of both legs.
///
/// A secret is a capability: it is handed to exactly the claim-construction
/// call that needs it and is deliberately *not* serializable, so it can never
/// end up in the persisted swap record. Once a claim transaction is on-chain
/// the value is public anyway and can be re-extracted from there.
#[derive(Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct Secret([u8; Self::LENGTH]);

impl Secret {
    pub const LENGTH: usize = 32;

    /// Generates a fresh secret from the thread-local CSPRNG.
    pub fn random() -> Secret {
        use rand::RngCore;

        let mut bytes = [0u8; Self::LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);

        Secret(bytes)
    }

    pub fn from_vec(vec: &[u8]) -> Result<Secret, FromErr> {
        if vec.len() != Self::LENGTH {
            return Err(FromErr::InvalidLength {
                expected: Self::LENGTH,
                got: vec.len(),
            });
        }
        let mut data = [0; Self::LENGTH];
        data.copy_from_slice(vec);
        Ok(Secret(data))
    }

    pub fn as_raw_secret(&self) -> &[u8; Self::LENGTH] {
        &self.0
    }

    pub fn into_raw_secret(self) -> [u8; Self::LENGTH] {
        self.0
    }
}

impl From<[u8; Self::LENGTH]> for Secret {
    fn from(secret: [u8; Self::LENGTH]) -> Self {
        Secret(secret)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The value is security-critical, don't leak it through debug logs.
        f.write_str("Secret([redacted])")
    }
}

impl fmt::LowerHex for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(hex::encode(&self.0).as_str())
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum FromErr {
    #[error("invalid length, expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("invalid hex: {0}")]
    FromHex(#[from] hex::FromHexError),
}

impl FromStr for Secret {
    type Err = FromErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let vec = hex::decode(s)?;
        Self::from_vec(&vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_length_from_str() {
        let result =
            Secret::from_str("68d627971643a6f97f27c58957826fcba853ec2077fd10ec6b93d8e61deb4c");

        assert_eq!(
            result.unwrap_err(),
            FromErr::InvalidLength {
                expected: 32,
                got: 31
            }
        );
    }

    #[test]
    fn random_secrets_differ() {
        assert_ne!(Secret::random(), Secret::random());
    }

    #[test]
    fn debug_output_does_not_contain_the_value() {
        let secret = Secret::from(*b"This is our favourite passphrase");
        let debug = format!("{:?}", secret);

        assert!(!debug.contains("favourite"));
        assert!(!format!("{:x}", secret).is_empty());
    }
}
