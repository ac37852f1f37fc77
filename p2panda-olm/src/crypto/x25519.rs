// SPDX-License-Identifier: MIT OR Apache-2.0

//! Elliptic-curve Diffie-Hellman key agreement over Curve25519 (X25519).
//!
//! <https://www.rfc-editor.org/rfc/rfc7748>
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::StaticSecret;

use crate::crypto::secret::Secret;
use crate::crypto::{Rng, RngError};

pub const PUBLIC_KEY_SIZE: usize = 32;

pub const SECRET_KEY_SIZE: usize = 32;

pub const SHARED_SECRET_SIZE: usize = 32;

/// Curve25519 public key.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parses a hex-encoded public key as it is published on the network.
    pub fn from_hex(value: &str) -> Result<Self, X25519Error> {
        let bytes = hex::decode(value).map_err(|_| X25519Error::InvalidEncoding)?;
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| X25519Error::InvalidLength(bytes.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_hex()).finish()
    }
}

/// Curve25519 secret key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(Secret<SECRET_KEY_SIZE>);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(Secret::from_bytes(bytes))
    }

    /// Generates a fresh secret key.
    pub fn generate(rng: &Rng) -> Result<Self, RngError> {
        Ok(Self::from_bytes(rng.random_array()?))
    }

    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(*self.0.as_bytes());
        PublicKey(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }

    /// Calculates the shared secret between our secret key and their public key.
    ///
    /// Fails if their public key is a low-order point, in which case the result would not depend
    /// on our secret at all.
    pub fn calculate_agreement(
        &self,
        their_public_key: &PublicKey,
    ) -> Result<Secret<SHARED_SECRET_SIZE>, X25519Error> {
        let secret = StaticSecret::from(*self.0.as_bytes());
        let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(their_public_key.0));
        if !shared.was_contributory() {
            return Err(X25519Error::NonContributory);
        }
        Ok(Secret::from_bytes(shared.to_bytes()))
    }
}

#[derive(Debug, Error)]
pub enum X25519Error {
    #[error("public key is not valid hex")]
    InvalidEncoding,

    #[error("expected public key of {PUBLIC_KEY_SIZE} bytes, got {0}")]
    InvalidLength(usize),

    #[error("diffie-hellman with low-order public key is not contributory")]
    NonContributory,
}
