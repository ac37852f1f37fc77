// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pairwise Olm sessions established with a triple Diffie-Hellman (3DH) key agreement.
//!
//! The initiator ("Alice") combines her long-term identity key `I_a` and a freshly generated
//! ephemeral base key `E_a` with the receiver's ("Bob") long-term identity key `I_b` and one of his
//! published one-time keys `O_b`:
//!
//! ```text
//! S = DH(I_a, O_b) || DH(E_a, I_b) || DH(E_a, O_b)
//! root_key || chain_key = HKDF-SHA256(salt = 0, ikm = S, info = "OLM_ROOT")
//! ```
//!
//! Bob computes the same secret from his side as soon as he learns about Alice's identity and base
//! key, consuming his one-time secret. Both sides derive the same session id from the public keys
//! involved.
//!
//! Only the initial key agreement is handled here, encrypting messages with the established
//! session is the concern of the ratchet built on top.
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hkdf::{HkdfError, hkdf};
use crate::crypto::secret::Secret;
use crate::crypto::sha2::sha2_256;
use crate::crypto::x25519::{PublicKey, SecretKey, X25519Error};
use crate::crypto::{Rng, RngError};

const ROOT_KEY_INFO: &[u8] = b"OLM_ROOT";

const KEY_SIZE: usize = 32;

/// Identifier of an established session.
///
/// Derived from the public keys used during the key agreement, so both parties end up with the
/// same id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn derive(
        initiator_identity_key: &PublicKey,
        base_key: &PublicKey,
        one_time_key: &PublicKey,
    ) -> Self {
        let digest = sha2_256(&[
            initiator_identity_key.as_bytes(),
            base_key.as_bytes(),
            one_time_key.as_bytes(),
        ]);
        Self(hex::encode(digest))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Which side of the key agreement we've been.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRole {
    /// We claimed their one-time key and initiated the session.
    Outbound,

    /// They used one of our one-time keys.
    Inbound,
}

/// Established session with a remote device.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    session_id: SessionId,
    role: SessionRole,
    their_identity_key: PublicKey,
    base_key: PublicKey,
    one_time_key: PublicKey,
    root_key: Secret<KEY_SIZE>,
    chain_key: Secret<KEY_SIZE>,
    created_at: u64,
}

impl Session {
    /// Initiates a new session using their identity key and one of their one-time keys.
    pub(crate) fn outbound(
        our_identity_secret: &SecretKey,
        their_identity_key: PublicKey,
        their_one_time_key: PublicKey,
        rng: &Rng,
    ) -> Result<Self, SessionError> {
        let base_secret = SecretKey::generate(rng)?;
        let base_key = base_secret.public_key();

        let dh_1 = our_identity_secret.calculate_agreement(&their_one_time_key)?;
        let dh_2 = base_secret.calculate_agreement(&their_identity_key)?;
        let dh_3 = base_secret.calculate_agreement(&their_one_time_key)?;
        let (root_key, chain_key) = derive_root_key(&dh_1, &dh_2, &dh_3)?;

        let our_identity_key = our_identity_secret.public_key();

        Ok(Self {
            session_id: SessionId::derive(&our_identity_key, &base_key, &their_one_time_key),
            role: SessionRole::Outbound,
            their_identity_key,
            base_key,
            one_time_key: their_one_time_key,
            root_key,
            chain_key,
            created_at: now(),
        })
    }

    /// Completes a session they've initiated with one of our one-time keys.
    pub(crate) fn inbound(
        our_identity_secret: &SecretKey,
        our_one_time_secret: &SecretKey,
        their_identity_key: PublicKey,
        their_base_key: PublicKey,
    ) -> Result<Self, SessionError> {
        let dh_1 = our_one_time_secret.calculate_agreement(&their_identity_key)?;
        let dh_2 = our_identity_secret.calculate_agreement(&their_base_key)?;
        let dh_3 = our_one_time_secret.calculate_agreement(&their_base_key)?;
        let (root_key, chain_key) = derive_root_key(&dh_1, &dh_2, &dh_3)?;

        let one_time_key = our_one_time_secret.public_key();

        Ok(Self {
            session_id: SessionId::derive(&their_identity_key, &their_base_key, &one_time_key),
            role: SessionRole::Inbound,
            their_identity_key,
            base_key: their_base_key,
            one_time_key,
            root_key,
            chain_key,
            created_at: now(),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Long-term identity key of the remote device.
    pub fn their_identity_key(&self) -> &PublicKey {
        &self.their_identity_key
    }

    /// Ephemeral key generated by the initiator of this session.
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    /// One-time key of the receiving side which was used for this session.
    pub fn one_time_key(&self) -> &PublicKey {
        &self.one_time_key
    }

    /// Root key of the ratchet encrypting messages in this session.
    pub fn root_key(&self) -> &Secret<KEY_SIZE> {
        &self.root_key
    }

    /// Initial chain key of the ratchet.
    pub fn chain_key(&self) -> &Secret<KEY_SIZE> {
        &self.chain_key
    }

    /// UNIX timestamp in seconds of when this session was established.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

fn derive_root_key(
    dh_1: &Secret<KEY_SIZE>,
    dh_2: &Secret<KEY_SIZE>,
    dh_3: &Secret<KEY_SIZE>,
) -> Result<(Secret<KEY_SIZE>, Secret<KEY_SIZE>), SessionError> {
    let mut ikm = [0u8; 3 * KEY_SIZE];
    ikm[..KEY_SIZE].copy_from_slice(dh_1.as_bytes());
    ikm[KEY_SIZE..2 * KEY_SIZE].copy_from_slice(dh_2.as_bytes());
    ikm[2 * KEY_SIZE..].copy_from_slice(dh_3.as_bytes());
    let ikm = Secret::from_bytes(ikm);

    let okm = Secret::from_bytes(hkdf::<{ 2 * KEY_SIZE }>(&[], ikm.as_bytes(), ROOT_KEY_INFO)?);
    let root_key =
        Secret::from_slice(&okm.as_bytes()[..KEY_SIZE]).ok_or(SessionError::Derivation)?;
    let chain_key =
        Secret::from_slice(&okm.as_bytes()[KEY_SIZE..]).ok_or(SessionError::Derivation)?;

    Ok((root_key, chain_key))
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("invalid key material: {0}")]
    InvalidKey(#[from] X25519Error),

    #[error(transparent)]
    Hkdf(#[from] HkdfError),

    #[error("could not derive root and chain key")]
    Derivation,

    #[error("unknown or already used one-time key {0}")]
    UnknownOneTimeKey(PublicKey),
}
