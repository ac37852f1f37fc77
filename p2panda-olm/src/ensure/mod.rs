// SPDX-License-Identifier: MIT OR Apache-2.0

//! Make sure we have an Olm session with every device we want to encrypt towards.
//!
//! Devices we already share a session with are used as-is. For all others we claim one of their
//! published one-time keys in a single batch, verify that the owning device signed it and
//! establish a new session with it.
//!
//! Failures around single devices (no identity key, no one-time key left, unsupported algorithm,
//! invalid signature, malformed key material) are logged and the device is left out of the
//! result. Callers need to treat a missing device as "can't encrypt towards it right now". Only
//! failing to claim keys at all, after exhausting all retries, aborts the whole call.
//!
//! ## Concurrent calls
//!
//! No lock is held while waiting for the claim. Two concurrent calls for overlapping devices can
//! both find no session, both claim a one-time key and both establish a session. The last
//! recorded one wins in the store, the other device eventually receives a pre-key message for a
//! session nobody continues to use. Callers who need exactly one session per device have to
//! serialise calls themselves.
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::claim::{ClaimError, ClaimRequest, ClaimResponse, claim_one_time_keys};
use crate::config::EnsureConfig;
use crate::crypto::Rng;
use crate::identity::{DeviceIdentity, DeviceKey, UserId};
use crate::one_time_key::ClaimedKey;
use crate::session::{Session, SessionError, SessionId};
use crate::traits::{KeyClaimClient, SessionStore};
use crate::verify::{VerificationError, verify_one_time_key};

/// Session available for a device after `ensure_sessions`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// We already had a session with this device.
    Existing {
        device: DeviceIdentity,
        session_id: SessionId,
    },

    /// A new session was established during this call.
    Established {
        device: DeviceIdentity,
        session_id: SessionId,
    },
}

impl SessionOutcome {
    pub fn device(&self) -> &DeviceIdentity {
        match self {
            Self::Existing { device, .. } | Self::Established { device, .. } => device,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Existing { session_id, .. } | Self::Established { session_id, .. } => {
                session_id
            }
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established { .. })
    }
}

/// Establishes sessions with remote devices on behalf of our account.
#[derive(Debug)]
pub struct SessionEnsurer<S, C> {
    account: Account,
    store: S,
    client: C,
    config: EnsureConfig,
    rng: Rng,
}

impl<S, C> SessionEnsurer<S, C>
where
    S: SessionStore,
    C: KeyClaimClient,
{
    pub fn new(account: Account, store: S, client: C, config: EnsureConfig, rng: Rng) -> Self {
        Self {
            account,
            store,
            client,
            config,
            rng,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns a session for every given device we can encrypt towards.
    ///
    /// With `force_new_session` a new session is established even for devices we already share
    /// one with.
    ///
    /// New sessions are recorded in the store in one batch, only after all claimed keys have been
    /// processed. Dropping the returned future before that batch completes, or failing to record
    /// it, leaves the store without any of the new sessions.
    ///
    /// Devices are expected to be listed under their own user id, others are ignored.
    pub async fn ensure_sessions(
        &self,
        devices_by_user: &BTreeMap<UserId, Vec<DeviceIdentity>>,
        force_new_session: bool,
    ) -> Result<BTreeMap<DeviceKey, SessionOutcome>, EnsureError> {
        let mut outcomes = BTreeMap::new();
        let mut devices_without_session: BTreeMap<DeviceKey, &DeviceIdentity> = BTreeMap::new();

        for (user_id, devices) in devices_by_user {
            for device in devices {
                let key = device.device_key();

                if device.user_id() != user_id {
                    warn!("ignoring device {key} listed under other user {user_id}");
                    continue;
                }

                let Some(identity_key) = device.identity_key() else {
                    warn!("ignoring device {key} without identity key");
                    continue;
                };

                let session_id = self
                    .store
                    .session_id(identity_key)
                    .await
                    .map_err(|err| EnsureError::Store(err.to_string()))?
                    .filter(|session_id| !session_id.is_empty());

                match session_id {
                    Some(session_id) if !force_new_session => {
                        debug!("using session {session_id} for {key}");
                        devices_without_session.remove(&key);
                        outcomes.insert(
                            key,
                            SessionOutcome::Existing {
                                device: device.clone(),
                                session_id,
                            },
                        );
                    }
                    _ => {
                        debug!("found no existing session for {key} (force={force_new_session})");
                        outcomes.remove(&key);
                        devices_without_session.insert(key, device);
                    }
                }
            }
        }

        info!(
            "devices without session (count: {}): {}",
            devices_without_session.len(),
            devices_without_session
                .keys()
                .map(ToString::to_string)
                .collect::<Vec<String>>()
                .join(", ")
        );

        if devices_without_session.is_empty() {
            return Ok(outcomes);
        }

        let algorithm = self.config.one_time_key_algorithm();
        let mut request = ClaimRequest::new(self.config.claim_timeout);
        for key in devices_without_session.keys() {
            request.insert(key.clone(), algorithm.clone());
        }

        let response = claim_one_time_keys(
            &self.client,
            &request,
            self.config.claim_retry_attempts,
            self.config.retry_interval,
        )
        .await?;

        let established = self.establish_sessions(&devices_without_session, &response);

        let mut new_outcomes = Vec::with_capacity(established.len());
        let mut batch = Vec::with_capacity(established.len());
        for (device, session) in established {
            let key = device.device_key();
            new_outcomes.push((
                key.clone(),
                SessionOutcome::Established {
                    device: device.clone(),
                    session_id: session.session_id().clone(),
                },
            ));
            batch.push((key, session));
        }

        // All new sessions are recorded at once or not at all.
        if !batch.is_empty() {
            self.store
                .record_sessions(batch)
                .await
                .map_err(|err| EnsureError::Store(err.to_string()))?;
        }

        outcomes.extend(new_outcomes);
        Ok(outcomes)
    }

    /// Verifies every claimed key and establishes a session with it.
    ///
    /// Keys are only looked up for devices we've asked for, everything else the service returned
    /// is ignored.
    fn establish_sessions<'a>(
        &self,
        devices: &BTreeMap<DeviceKey, &'a DeviceIdentity>,
        response: &ClaimResponse,
    ) -> Vec<(&'a DeviceIdentity, Session)> {
        let algorithm = self.config.one_time_key_algorithm();
        let mut established = Vec::new();

        for (key, device) in devices {
            let Some(claimed_key) = response.get(key) else {
                debug!("no one-time key for {key}");
                continue;
            };

            if claimed_key.algorithm() != &algorithm {
                info!(
                    "skipping one-time key for {key} because of unsupported algorithm {}",
                    claimed_key.algorithm()
                );
                continue;
            }

            debug!("creating outbound session for {key}");
            match self.verify_key_and_start_session(claimed_key, &key.user_id, device) {
                Ok(session) => {
                    debug!(
                        "created outbound session {} for {key}",
                        session.session_id()
                    );
                    established.push((*device, session));
                }
                Err(err) => {
                    warn!("failed to create outbound session for {key}: {err}");
                }
            }
        }

        established
    }

    fn verify_key_and_start_session(
        &self,
        claimed_key: &ClaimedKey,
        user_id: &UserId,
        device: &DeviceIdentity,
    ) -> Result<Session, DeviceError> {
        // Never start a session with a key we could not verify.
        verify_one_time_key(claimed_key, user_id, device)?;

        let identity_key = device
            .identity_key()
            .ok_or(DeviceError::MissingIdentityKey)?;
        let session =
            self.account
                .create_outbound_session(identity_key, claimed_key.key(), &self.rng)?;

        Ok(session)
    }
}

/// Reasons why no session could be established with a single device.
#[derive(Debug, Error)]
enum DeviceError {
    #[error("unable to verify signature on one-time key: {0}")]
    Verification(#[from] VerificationError),

    #[error("device has no identity key")]
    MissingIdentityKey,

    #[error("error starting session: {0}")]
    Session(#[from] SessionError),
}

#[derive(Debug, Error)]
pub enum EnsureError {
    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error("session store failed: {0}")]
    Store(String),
}
