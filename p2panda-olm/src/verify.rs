// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authenticity checks of claimed one-time keys.
//!
//! A one-time key is only usable if the owning device signed it with its long-term Ed25519 key.
//! Otherwise the key-claim service (or anyone in between) could hand out keys of their own and
//! read all messages sent through the resulting session.
use thiserror::Error;

use crate::crypto::ed25519::{Ed25519Error, Signature};
use crate::identity::{DeviceIdentity, UserId};
use crate::one_time_key::ClaimedKey;

/// Verifies that `claimed_key` was signed by `device`, owned by `user_id`.
///
/// The signature is looked up under `ed25519:<device id>` and checked against the device's
/// fingerprint over the canonical JSON of the key. Every failure is returned as a value, the
/// caller decides how to handle an unverified key.
pub fn verify_one_time_key(
    claimed_key: &ClaimedKey,
    user_id: &UserId,
    device: &DeviceIdentity,
) -> Result<(), VerificationError> {
    let signing_key_reference = device.device_id().signing_key_reference();

    let signature = claimed_key
        .signature(user_id, &signing_key_reference)
        .filter(|signature| !signature.is_empty())
        .ok_or(VerificationError::MissingSignature(signing_key_reference))?;

    let fingerprint = device
        .fingerprint()
        .ok_or(VerificationError::MissingFingerprint)?;

    let signature = Signature::from_hex(signature)?;
    let signable = claimed_key
        .signable_json()
        .map_err(|err| VerificationError::Encoding(err.to_string()))?;

    fingerprint.verify(signable.as_bytes(), &signature)?;

    Ok(())
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("one-time key is not signed with {0}")]
    MissingSignature(String),

    #[error("device has no known fingerprint")]
    MissingFingerprint,

    #[error("could not encode one-time key: {0}")]
    Encoding(String),

    #[error(transparent)]
    Signature(#[from] Ed25519Error),
}
