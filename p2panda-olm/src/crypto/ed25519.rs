// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ed25519 signatures, used by devices to sign their published one-time keys.
//!
//! The public half of a device's signing key is also known as its "fingerprint".
use std::fmt;

use thiserror::Error;

use crate::crypto::{Rng, RngError};

pub const VERIFYING_KEY_SIZE: usize = 32;

pub const SIGNATURE_SIZE: usize = 64;

/// Ed25519 signing key of our own device.
#[derive(Clone)]
pub struct SigningKey(ed25519_dalek::SigningKey);

impl SigningKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    pub fn generate(rng: &Rng) -> Result<Self, RngError> {
        Ok(Self::from_bytes(rng.random_array()?))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey(self.0.verifying_key())
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        use ed25519_dalek::Signer;
        Signature(self.0.sign(bytes))
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("verifying_key", &self.verifying_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key ("fingerprint") of a device.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct VerifyingKey(ed25519_dalek::VerifyingKey);

impl VerifyingKey {
    pub fn from_bytes(bytes: &[u8; VERIFYING_KEY_SIZE]) -> Result<Self, Ed25519Error> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| Ed25519Error::InvalidVerifyingKey)?;
        Ok(Self(key))
    }

    pub fn from_hex(value: &str) -> Result<Self, Ed25519Error> {
        let bytes = hex::decode(value).map_err(|_| Ed25519Error::InvalidEncoding)?;
        let bytes: [u8; VERIFYING_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| Ed25519Error::InvalidVerifyingKey)?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Verifies an Ed25519 signature over `bytes`.
    ///
    /// Uses strict verification, rejecting weak keys and malleable signatures.
    pub fn verify(&self, bytes: &[u8], signature: &Signature) -> Result<(), Ed25519Error> {
        self.0
            .verify_strict(bytes, &signature.0)
            .map_err(|_| Ed25519Error::VerificationFailed)
    }
}

impl fmt::Display for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VerifyingKey").field(&self.to_hex()).finish()
    }
}

/// 512-bit Ed25519 signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8; SIGNATURE_SIZE]) -> Self {
        Self(ed25519_dalek::Signature::from_bytes(bytes))
    }

    pub fn from_hex(value: &str) -> Result<Self, Ed25519Error> {
        let bytes = hex::decode(value).map_err(|_| Ed25519Error::InvalidEncoding)?;
        let bytes: [u8; SIGNATURE_SIZE] = bytes
            .try_into()
            .map_err(|_| Ed25519Error::InvalidSignature)?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn to_bytes(self) -> [u8; SIGNATURE_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[derive(Debug, Error)]
pub enum Ed25519Error {
    #[error("value is not valid hex")]
    InvalidEncoding,

    #[error("invalid ed25519 public key")]
    InvalidVerifyingKey,

    #[error("invalid ed25519 signature")]
    InvalidSignature,

    #[error("signature does not match public key and bytes")]
    VerificationFailed,
}
