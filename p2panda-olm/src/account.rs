// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key material of our own device.
//!
//! An account holds a long-term Curve25519 identity key for the key agreement, a long-term Ed25519
//! signing key to authenticate published keys and a pool of one-time keys which others can claim
//! to initiate sessions with us.
use std::collections::HashMap;

use thiserror::Error;

use crate::crypto::ed25519::{Signature, SigningKey, VerifyingKey};
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, RngError};
use crate::identity::{DeviceId, DeviceIdentity, UserId};
use crate::one_time_key::{ClaimedKey, OneTimeKeyAlgorithm};
use crate::session::{Session, SessionError};

/// Unique, monotonically increasing identifier of one of our one-time keys.
pub type OneTimeKeyId = u64;

#[derive(Debug)]
pub struct Account {
    user_id: UserId,
    device_id: DeviceId,
    identity_secret: SecretKey,
    signing_key: SigningKey,
    one_time_secrets: HashMap<PublicKey, (OneTimeKeyId, SecretKey)>,
    next_one_time_key_id: OneTimeKeyId,
}

impl Account {
    /// Creates a new account with freshly generated long-term keys.
    pub fn new(
        user_id: impl Into<UserId>,
        device_id: impl Into<DeviceId>,
        rng: &Rng,
    ) -> Result<Self, AccountError> {
        Ok(Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            identity_secret: SecretKey::generate(rng)?,
            signing_key: SigningKey::generate(rng)?,
            one_time_secrets: HashMap::new(),
            next_one_time_key_id: 0,
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Long-term Curve25519 identity key, used by others to address this device.
    pub fn identity_key(&self) -> PublicKey {
        self.identity_secret.public_key()
    }

    /// Long-term Ed25519 signing key, used by others to verify our published keys.
    pub fn fingerprint(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public snapshot of this device as others would learn about it from the device directory.
    pub fn device_identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(
            self.user_id.clone(),
            self.device_id.clone(),
            Some(self.identity_key()),
            Some(self.fingerprint()),
        )
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        self.signing_key.sign(bytes)
    }

    /// Number of one-time keys which were not used yet.
    pub fn one_time_key_count(&self) -> usize {
        self.one_time_secrets.len()
    }

    /// Generates `count` new one-time keys, signed with our signing key and ready to be published.
    pub fn generate_one_time_keys(
        &mut self,
        count: usize,
        rng: &Rng,
    ) -> Result<Vec<ClaimedKey>, AccountError> {
        let mut keys = Vec::with_capacity(count);

        for _ in 0..count {
            let secret = SecretKey::generate(rng)?;
            let public_key = secret.public_key();
            let id = self.next_one_time_key_id;

            let mut key = ClaimedKey::new(
                OneTimeKeyAlgorithm::SignedCurve25519,
                format!("{id:08x}"),
                public_key.to_hex(),
                false,
                Default::default(),
            );
            let signature = self.sign(key.signable_json()?.as_bytes());
            key.add_signature(
                self.user_id.clone(),
                self.device_id.signing_key_reference(),
                signature.to_hex(),
            );

            if self.one_time_secrets.contains_key(&public_key) {
                return Err(AccountError::DuplicateOneTimeKey(public_key));
            }
            self.one_time_secrets.insert(public_key, (id, secret));

            self.next_one_time_key_id += 1;
            keys.push(key);
        }

        Ok(keys)
    }

    /// Initiates a new session with a remote device using their identity key and one of their
    /// one-time keys (hex-encoded, as it was claimed).
    ///
    /// The one-time key needs to be verified by the caller before.
    pub fn create_outbound_session(
        &self,
        their_identity_key: &PublicKey,
        their_one_time_key: &str,
        rng: &Rng,
    ) -> Result<Session, SessionError> {
        let their_one_time_key = PublicKey::from_hex(their_one_time_key)?;
        Session::outbound(
            &self.identity_secret,
            *their_identity_key,
            their_one_time_key,
            rng,
        )
    }

    /// Completes a session a remote device initiated with one of our one-time keys.
    ///
    /// The one-time secret is removed from the account, a second attempt with the same key fails.
    pub fn create_inbound_session(
        &mut self,
        their_identity_key: &PublicKey,
        their_base_key: &PublicKey,
        one_time_key: &PublicKey,
    ) -> Result<Session, SessionError> {
        let (_, one_time_secret) = self
            .one_time_secrets
            .remove(one_time_key)
            .ok_or(SessionError::UnknownOneTimeKey(*one_time_key))?;
        Session::inbound(
            &self.identity_secret,
            &one_time_secret,
            *their_identity_key,
            *their_base_key,
        )
    }
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("could not encode one-time key: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("one-time key {0} was already generated")]
    DuplicateOneTimeKey(PublicKey),
}
